//! Client-side retry-with-timeout loop.

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::codec::{DecodeError, Message, MAX_DATAGRAM};
use crate::loss::LossSimulator;

pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_ATTEMPTS: u32 = 8;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no reply received after {0} attempts")]
    NoReply(u32),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoded request is {0} bytes, exceeds MAX_DATAGRAM ({MAX_DATAGRAM})")]
    PayloadTooLarge(usize),
}

/// Sends `request` to `server`, retransmitting identical bytes on each
/// one-second timeout, discarding stray/malformed datagrams, and returning the
/// first reply whose request id matches. Fails with `NoReply` after 8
/// consecutive timeouts.
pub fn send_with_retry(socket: &UdpSocket, server: SocketAddr, request: &Message, loss: &mut LossSimulator) -> Result<Message, ClientError> {
    let bytes = request.encode();
    if bytes.len() > MAX_DATAGRAM {
        return Err(ClientError::PayloadTooLarge(bytes.len()));
    }
    let mut buf = [0u8; MAX_DATAGRAM];

    for attempt in 1..=MAX_ATTEMPTS {
        log::debug!("sending request {} (opcode {}), attempt {}/{}", request.request_id, request.opcode, attempt, MAX_ATTEMPTS);
        loss.send(socket, &bytes, server)?;

        let deadline = Instant::now() + RECEIVE_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            socket.set_read_timeout(Some(remaining))?;
            match socket.recv_from(&mut buf) {
                Ok((n, _from)) => match Message::decode(&buf[..n]) {
                    Ok(reply) if reply.request_id == request.request_id => return Ok(reply),
                    Ok(other) => {
                        log::debug!("discarding unmatched datagram (opcode {}, request id {})", other.opcode, other.request_id);
                    }
                    Err(DecodeError::Malformed(reason)) => log::debug!("discarding malformed datagram: {reason}"),
                    Err(DecodeError::InvalidUtf8) => log::debug!("discarding datagram with invalid UTF-8 payload"),
                },
                Err(e) if is_timeout(&e) => break,
                Err(e) => return Err(e.into()),
            }
        }
        log::warn!("timeout waiting for reply to request {}, retrying", request.request_id);
    }

    Err(ClientError::NoReply(MAX_ATTEMPTS))
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PayloadWriter, Semantics, OP_BOOK};

    #[test]
    fn oversized_request_is_rejected_before_any_send() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let mut loss = LossSimulator::new(1, 0.0);

        let mut w = PayloadWriter::new();
        w.write_str(&"x".repeat(MAX_DATAGRAM));
        let request = Message::request(Semantics::Amo, OP_BOOK, 1, w.into_bytes());

        let err = send_with_retry(&socket, server, &request, &mut loss).unwrap_err();
        assert!(matches!(err, ClientError::PayloadTooLarge(_)));
    }
}
