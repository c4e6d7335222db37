//! Client binary: one-shot subcommands driving the protocol, plus a bounded
//! monitor-mode receive loop.

use std::net::{ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use facility_proto::codec::{
    Message, PayloadReader, PayloadWriter, Semantics, MAX_DATAGRAM, OP_BOOK, OP_CANCEL, OP_CHANGE, OP_EXTEND, OP_MONITOR_REGISTER,
    OP_MONITOR_UPDATE, OP_QUERY, OP_QUERY_BOOKING,
};
use facility_proto::logging;
use facility_proto::loss::LossSimulator;
use facility_proto::request_id::RequestIdGenerator;
use facility_proto::semantics::client::send_with_retry;

#[derive(Parser, Debug)]
#[command(name = "facilityctl", about = "One-shot client for the facility-reservation protocol")]
struct Args {
    #[arg(default_value = "127.0.0.1")]
    host: String,

    #[arg(default_value_t = 5000)]
    port: u16,

    #[arg(long, default_value = "amo")]
    semantics: Semantics,

    #[arg(long = "loss-rate", default_value_t = 0.0)]
    loss_rate: f64,

    #[arg(long, default_value_t = 777)]
    seed: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Comma-separated day list, e.g. "mon,tue"; omit for just the header.
    Query {
        facility: String,
        #[arg(default_value = "")]
        days: String,
    },
    Book {
        facility: String,
        day: i32,
        start: i32,
        end: i32,
    },
    Change {
        id: i64,
        shift: i32,
    },
    Cancel {
        id: i64,
    },
    Extend {
        id: i64,
        start_delta: i32,
        end_delta: i32,
    },
    Monitor {
        facility: String,
        seconds: i32,
    },
    QueryBooking {
        id: i64,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init("facilityctl");

    let server_addr = format!("{}:{}", args.host, args.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("could not resolve {}:{}", args.host, args.port))?;

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let mut loss = LossSimulator::new(args.seed, args.loss_rate);
    let request_ids = RequestIdGenerator::new();

    let (opcode, payload) = encode_command(&args.command);
    let request = Message::request(args.semantics, opcode, request_ids.next(), payload);

    let reply = send_with_retry(&socket, server_addr, &request, &mut loss)?;
    print_reply(&reply);

    if let Command::Monitor { seconds, .. } = &args.command {
        run_monitor_loop(&socket, *seconds)?;
    }

    Ok(())
}

fn encode_command(command: &Command) -> (u8, Vec<u8>) {
    let mut w = PayloadWriter::new();
    match command {
        Command::Query { facility, days } => {
            w.write_str(facility).write_str(days);
            (OP_QUERY, w.into_bytes())
        }
        Command::Book { facility, day, start, end } => {
            w.write_str(facility).write_i32(*day).write_i32(*start).write_i32(*end);
            (OP_BOOK, w.into_bytes())
        }
        Command::Change { id, shift } => {
            w.write_i64(*id).write_i32(*shift);
            (OP_CHANGE, w.into_bytes())
        }
        Command::Cancel { id } => {
            w.write_i64(*id);
            (OP_CANCEL, w.into_bytes())
        }
        Command::Extend { id, start_delta, end_delta } => {
            w.write_i64(*id).write_i32(*start_delta).write_i32(*end_delta);
            (OP_EXTEND, w.into_bytes())
        }
        Command::Monitor { facility, seconds } => {
            w.write_str(facility).write_i32(*seconds);
            (OP_MONITOR_REGISTER, w.into_bytes())
        }
        Command::QueryBooking { id } => {
            w.write_i64(*id);
            (OP_QUERY_BOOKING, w.into_bytes())
        }
    }
}

fn print_reply(reply: &Message) {
    let mut r = PayloadReader::new(&reply.payload);
    let text = r.read_str().unwrap_or_else(|_| "<malformed reply payload>".to_string());
    if reply.error {
        println!("ERROR: {text}");
    } else {
        println!("{text}");
    }
}

/// Swallows timeouts until `seconds + 1s` grace have elapsed; prints each
/// `MONITOR_UPDATE` as it arrives. There is no ordering guarantee relative to
/// any reply the registration itself produced (§4.6, §9).
fn run_monitor_loop(socket: &UdpSocket, seconds: i32) -> anyhow::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(seconds.max(0) as u64) + Duration::from_secs(1);
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        socket.set_read_timeout(Some(remaining))?;
        match socket.recv_from(&mut buf) {
            Ok((n, _from)) => match Message::decode(&buf[..n]) {
                Ok(msg) if msg.opcode == OP_MONITOR_UPDATE => {
                    let mut r = PayloadReader::new(&msg.payload);
                    let facility = r.read_str().unwrap_or_default();
                    let text = r.read_str().unwrap_or_default();
                    println!("[monitor update: {facility}]\n{text}");
                }
                Ok(other) => log::debug!("discarding non-update datagram (opcode {}) during monitor wait", other.opcode),
                Err(e) => log::debug!("discarding malformed datagram during monitor wait: {e}"),
            },
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    log::info!("monitor loop finished after {seconds}s (+1s grace)");
    Ok(())
}
