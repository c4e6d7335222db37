//! Invocation-semantics layer: client retry/dedup and server reply cache.

pub mod cache;
pub mod client;

use std::net::SocketAddr;

use cache::{CacheKey, ReplyCache};

/// Server-side AMO/ALO gate. In AMO mode, a cache hit short-circuits the
/// handler entirely and retransmits the cached bytes verbatim; a miss runs
/// `compute`, caches its result, then returns it. In ALO mode `compute` runs
/// unconditionally and nothing is cached.
pub fn handle_with_semantics(
    amo: bool,
    cache: &mut ReplyCache,
    peer: SocketAddr,
    request_id: u64,
    compute: impl FnOnce() -> Vec<u8>,
) -> Vec<u8> {
    if !amo {
        return compute();
    }
    let key: CacheKey = (peer, request_id);
    if let Some(cached) = cache.get(&key) {
        log::debug!("AMO cache hit for {peer:?}/{request_id}, replaying cached reply");
        return cached.to_vec();
    }
    let reply = compute();
    cache.insert(key, reply.clone());
    reply
}
