//! Seeded pseudo-random drop decision shared by every outbound datagram path.

use std::net::{SocketAddr, UdpSocket};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug)]
pub struct LossSimulator {
    rng: StdRng,
    rate: f64,
}

impl LossSimulator {
    pub fn new(seed: i64, rate: f64) -> Self {
        LossSimulator { rng: StdRng::seed_from_u64(seed as u64), rate: rate.clamp(0.0, 1.0) }
    }

    /// Draws a uniform sample in `[0,1)`; the datagram is dropped iff the
    /// sample is strictly less than the configured rate (0 disables).
    pub fn should_drop(&mut self) -> bool {
        self.rate > 0.0 && self.rng.random::<f64>() < self.rate
    }

    /// Sends `buf` to `target` unless the loss simulator decides to drop it.
    pub fn send(&mut self, socket: &UdpSocket, buf: &[u8], target: SocketAddr) -> std::io::Result<()> {
        if self.should_drop() {
            log::debug!("loss simulator dropped {} bytes destined for {}", buf.len(), target);
            return Ok(());
        }
        socket.send_to(buf, target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_zero_never_drops() {
        let mut sim = LossSimulator::new(1, 0.0);
        for _ in 0..1000 {
            assert!(!sim.should_drop());
        }
    }

    #[test]
    fn rate_one_always_drops() {
        let mut sim = LossSimulator::new(1, 1.0);
        for _ in 0..1000 {
            assert!(sim.should_drop());
        }
    }

    #[test]
    fn same_seed_same_rate_is_deterministic() {
        let mut a = LossSimulator::new(42, 0.5);
        let mut b = LossSimulator::new(42, 0.5);
        let decisions_a: Vec<bool> = (0..50).map(|_| a.should_drop()).collect();
        let decisions_b: Vec<bool> = (0..50).map(|_| b.should_drop()).collect();
        assert_eq!(decisions_a, decisions_b);
    }
}
