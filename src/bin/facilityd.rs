//! Server binary: owns the socket and runs the single-threaded receive loop.

use std::net::UdpSocket;

use clap::Parser;

use facility_proto::codec::{Message, Semantics, MAX_DATAGRAM};
use facility_proto::facility::FacilityStore;
use facility_proto::logging;
use facility_proto::loss::LossSimulator;
use facility_proto::monitor::MonitorRegistry;
use facility_proto::request_id::RequestIdGenerator;
use facility_proto::router::{self, ServerContext};
use facility_proto::semantics::cache::ReplyCache;
use facility_proto::semantics::handle_with_semantics;
use facility_proto::DEFAULT_FACILITIES;

#[derive(Parser, Debug)]
#[command(name = "facilityd", about = "Connectionless facility-reservation server")]
struct Args {
    #[arg(default_value_t = 5000)]
    port: u16,

    #[arg(default_value = "amo")]
    semantics: Semantics,

    #[arg(long = "loss-rate", default_value_t = 0.0)]
    loss_rate: f64,

    #[arg(default_value_t = 42)]
    seed: i64,

    /// Repeatable. Falls back to a small default set if none are given.
    #[arg(long = "facility")]
    facility: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init("facilityd");

    let facility_names: Vec<String> =
        if args.facility.is_empty() { DEFAULT_FACILITIES.iter().map(|s| s.to_string()).collect() } else { args.facility.clone() };

    let mut facilities = FacilityStore::new(args.seed as u64);
    for name in &facility_names {
        facilities.add_facility(name);
    }
    let mut monitors = MonitorRegistry::new();
    let mut cache = ReplyCache::new();
    let mut loss = LossSimulator::new(args.seed, args.loss_rate);
    let request_ids = RequestIdGenerator::new();

    let socket = UdpSocket::bind(("0.0.0.0", args.port))?;
    let amo = args.semantics == Semantics::Amo;

    log::info!("listening on port {} ({} mode, loss_rate={}, facilities={:?})", args.port, args.semantics, args.loss_rate, facility_names);

    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (n, peer) = socket.recv_from(&mut buf)?;
        let request = match Message::decode(&buf[..n]) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("discarding malformed datagram from {peer}: {e}");
                continue;
            }
        };
        log::debug!("received request {} (opcode {}) from {peer}", request.request_id, request.opcode);

        let reply_bytes = handle_with_semantics(amo, &mut cache, peer, request.request_id, || {
            let mut ctx = ServerContext {
                facilities: &mut facilities,
                monitors: &mut monitors,
                socket: &socket,
                loss: &mut loss,
                request_ids: &request_ids,
                semantics: args.semantics,
            };
            router::dispatch(&mut ctx, peer, &request).encode()
        });

        if let Err(e) = loss.send(&socket, &reply_bytes, peer) {
            log::warn!("failed to send reply to {peer}: {e}");
        }
    }
}
