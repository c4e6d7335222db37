//! Monitor subscription registry: registration, lazy expiry, and fan-out.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Subscription {
    peer: SocketAddr,
    facility: String,
    expiry: Instant,
}

/// Live monitor subscriptions. Expired entries are reaped lazily on the next
/// `fan_out` call, whichever facility triggered it (§4.6).
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    subscriptions: Vec<Subscription>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        MonitorRegistry { subscriptions: Vec::new() }
    }

    pub fn register(&mut self, peer: SocketAddr, facility: &str, seconds: i32, now: Instant) {
        let ttl = Duration::from_secs(seconds.max(0) as u64);
        self.subscriptions.push(Subscription { peer, facility: facility.to_string(), expiry: now + ttl });
    }

    /// Reaps every subscription whose expiry has passed, then invokes `send`
    /// once per surviving subscriber of `facility`.
    pub fn fan_out(&mut self, facility: &str, now: Instant, mut send: impl FnMut(SocketAddr)) {
        self.subscriptions.retain(|s| now <= s.expiry);
        for s in self.subscriptions.iter().filter(|s| s.facility == facility) {
            send(s.peer);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn zero_second_subscription_expires_on_first_fanout() {
        let mut reg = MonitorRegistry::new();
        let now = Instant::now();
        reg.register(addr(), "RoomA", 0, now);

        let mut received = 0;
        reg.fan_out("RoomA", now + Duration::from_millis(1), |_| received += 1);
        assert_eq!(received, 0);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn live_subscription_receives_matching_facility_update() {
        let mut reg = MonitorRegistry::new();
        let now = Instant::now();
        reg.register(addr(), "RoomA", 5, now);

        let mut received = Vec::new();
        reg.fan_out("RoomA", now, |peer| received.push(peer));
        assert_eq!(received, vec![addr()]);

        let mut other = Vec::new();
        reg.fan_out("RoomB", now, |peer| other.push(peer));
        assert!(other.is_empty());
    }

    #[test]
    fn independent_subscriptions_from_same_peer() {
        let mut reg = MonitorRegistry::new();
        let now = Instant::now();
        reg.register(addr(), "RoomA", 5, now);
        reg.register(addr(), "RoomA", 5, now);

        let mut count = 0;
        reg.fan_out("RoomA", now, |_| count += 1);
        assert_eq!(count, 2);
    }
}
