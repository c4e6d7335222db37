//! Request dispatch: one handler per opcode, wired together behind a panic
//! boundary so a bug in any single handler degrades to an error reply instead
//! of taking the server process down.

use std::net::{SocketAddr, UdpSocket};
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use thiserror::Error;

use crate::codec::{
    monitor_update_payload, single_string_payload, DecodeError, Message, PayloadReader, PayloadWriter, Semantics, OP_BOOK,
    OP_CANCEL, OP_CHANGE, OP_EXTEND, OP_MONITOR_REGISTER, OP_MONITOR_UPDATE, OP_QUERY, OP_QUERY_BOOKING,
};
use crate::facility::{FacilityStore, StateError};
use crate::loss::LossSimulator;
use crate::monitor::MonitorRegistry;
use crate::request_id::RequestIdGenerator;
use crate::time::{self, TimeError, WeekSlot, MINUTES_PER_DAY};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Time(#[from] TimeError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u8),
}

struct HandlerOutcome {
    text: String,
    /// Set on every successful mutation (BOOK, CHANGE, EXTEND, successful
    /// CANCEL, MONITOR_REGISTER); drives the post-handler fan-out (§4.6).
    fanout_facility: Option<String>,
}

impl HandlerOutcome {
    fn reply(text: String) -> Self {
        HandlerOutcome { text, fanout_facility: None }
    }

    fn mutation(text: String, facility: String) -> Self {
        HandlerOutcome { text, fanout_facility: Some(facility) }
    }
}

/// Everything the router needs to mutate state and emit datagrams, bundled
/// so the binaries have one thing to hold on to across the receive loop.
pub struct ServerContext<'a> {
    pub facilities: &'a mut FacilityStore,
    pub monitors: &'a mut MonitorRegistry,
    pub socket: &'a UdpSocket,
    pub loss: &'a mut LossSimulator,
    pub request_ids: &'a RequestIdGenerator,
    pub semantics: Semantics,
}

/// Decodes nothing further (the caller already decoded the frame); dispatches
/// on `request.opcode`, mutates `ctx.facilities`/`ctx.monitors`, fans out on
/// success, and returns the reply `Message` to send back to `peer`.
///
/// Wrapped in `catch_unwind` per the error-handling design: a handler must
/// never be able to take the server process down.
pub fn dispatch(ctx: &mut ServerContext, peer: SocketAddr, request: &Message) -> Message {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| dispatch_opcode(ctx.facilities, ctx.monitors, peer, request)));

    match outcome {
        Ok(Ok(outcome)) => {
            if let Some(facility) = &outcome.fanout_facility {
                fan_out_facility(ctx, facility);
            }
            Message::reply_to(request, false, single_string_payload(&outcome.text))
        }
        Ok(Err(e)) => {
            log::warn!("request {} (opcode {}) failed: {e}", request.request_id, request.opcode);
            Message::reply_to(request, true, single_string_payload(&e.to_string()))
        }
        Err(panic_payload) => {
            let text = panic_message(&panic_payload);
            log::error!("handler for opcode {} panicked: {text}", request.opcode);
            Message::reply_to(request, true, single_string_payload(&format!("Exception: {text}")))
        }
    }
}

fn dispatch_opcode(
    facilities: &mut FacilityStore,
    monitors: &mut MonitorRegistry,
    peer: SocketAddr,
    request: &Message,
) -> Result<HandlerOutcome, HandlerError> {
    match request.opcode {
        OP_QUERY => handle_query(facilities, &request.payload),
        OP_BOOK => handle_book(facilities, &request.payload),
        OP_CHANGE => handle_change(facilities, &request.payload),
        OP_MONITOR_REGISTER => handle_monitor_register(facilities, monitors, peer, &request.payload),
        OP_CANCEL => handle_cancel(facilities, &request.payload),
        OP_EXTEND => handle_extend(facilities, &request.payload),
        OP_QUERY_BOOKING => handle_query_booking(facilities, &request.payload),
        other => Err(HandlerError::UnknownOpcode(other)),
    }
}

fn handle_query(facilities: &FacilityStore, payload: &[u8]) -> Result<HandlerOutcome, HandlerError> {
    let mut r = PayloadReader::new(payload);
    let facility = r.read_str()?;
    let days_csv = r.read_str()?;
    if !facilities.has_facility(&facility) {
        return Err(StateError::NoSuchFacility.into());
    }

    let mut text = format!("=== {facility} Status ===\n");
    for token in days_csv.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let day = time::day_from_prefix(token).ok_or_else(|| TimeError::BadSlot(format!("unrecognized day '{token}'")))?;
        text.push_str(&format!("{}:\n{}\n", time::day_name(day), facilities.detailed_availability(&facility, day)?));
    }
    Ok(HandlerOutcome::reply(text))
}

fn handle_book(facilities: &mut FacilityStore, payload: &[u8]) -> Result<HandlerOutcome, HandlerError> {
    let mut r = PayloadReader::new(payload);
    let facility = r.read_str()?;
    let day = r.read_i32()?;
    let start = r.read_i32()?;
    let end = r.read_i32()?;

    if !facilities.has_facility(&facility) {
        return Err(StateError::NoSuchFacility.into());
    }
    let slot = WeekSlot::new(day, start, end)?;
    let id = facilities.book(&facility, slot)?;
    Ok(HandlerOutcome::mutation(format!("CONFIRM# {id}"), facility))
}

fn handle_change(facilities: &mut FacilityStore, payload: &[u8]) -> Result<HandlerOutcome, HandlerError> {
    let mut r = PayloadReader::new(payload);
    let id = read_booking_id(&mut r)?;
    let shift = r.read_i32()?;

    let (facility, old_slot) = locate_booking(facilities, id)?;
    // `shift_minutes` normalizes the day via modulo, so the only failure it can
    // still produce is the slot straddling two days (the `newEnd > 1440` case).
    let new_slot = old_slot.shift_minutes(shift).map_err(|_| StateError::ExceedEndOfDay)?;
    facilities.move_booking(id, new_slot)?;
    Ok(HandlerOutcome::mutation(format!("CHANGED# {id} (shifted {shift:+} min)"), facility))
}

fn handle_extend(facilities: &mut FacilityStore, payload: &[u8]) -> Result<HandlerOutcome, HandlerError> {
    let mut r = PayloadReader::new(payload);
    let id = read_booking_id(&mut r)?;
    let start_delta = r.read_i32()?;
    let end_delta = r.read_i32()?;

    let (facility, old_slot) = locate_booking(facilities, id)?;
    let new_start = old_slot.start as i32 + start_delta;
    let new_end = old_slot.end as i32 + end_delta;
    if new_start < 0 || new_end > MINUTES_PER_DAY || new_start >= new_end {
        return Err(StateError::InvalidRange.into());
    }
    let new_slot = WeekSlot::new(old_slot.day as i32, new_start, new_end)?;
    facilities.move_booking(id, new_slot)?;
    Ok(HandlerOutcome::mutation(
        format!("EXTENDED# {id} (start {start_delta:+} min, end {end_delta:+} min)"),
        facility,
    ))
}

fn handle_cancel(facilities: &mut FacilityStore, payload: &[u8]) -> Result<HandlerOutcome, HandlerError> {
    let mut r = PayloadReader::new(payload);
    let id = read_booking_id(&mut r)?;

    let (removed, facility) = facilities.cancel(id);
    if removed {
        Ok(HandlerOutcome::mutation(format!("CANCELED# {id}"), facility.expect("cancel reported a facility on removal")))
    } else {
        Ok(HandlerOutcome::reply("ALREADY_CANCELED_OR_NOT_FOUND".to_string()))
    }
}

fn handle_monitor_register(
    facilities: &FacilityStore,
    monitors: &mut MonitorRegistry,
    peer: SocketAddr,
    payload: &[u8],
) -> Result<HandlerOutcome, HandlerError> {
    let mut r = PayloadReader::new(payload);
    let facility = r.read_str()?;
    let seconds = r.read_i32()?;

    if !facilities.has_facility(&facility) {
        return Err(StateError::NoSuchFacility.into());
    }
    monitors.register(peer, &facility, seconds, Instant::now());
    Ok(HandlerOutcome::mutation(format!("MONITORING# {facility} for {seconds}s"), facility))
}

fn handle_query_booking(facilities: &FacilityStore, payload: &[u8]) -> Result<HandlerOutcome, HandlerError> {
    let mut r = PayloadReader::new(payload);
    let id = read_booking_id(&mut r)?;

    let (facility, booking) = facilities.find_booking(id).ok_or(StateError::NoSuchBooking(id))?;
    let slot = booking.slot;
    let text = format!(
        "Confirmation ID: {id}\nFacility: {facility}\nDay: {}\nTime: {} - {}\nDuration: {} minutes",
        time::day_name(slot.day),
        time::render_minute(slot.start as i32),
        time::render_minute(slot.end as i32),
        slot.end - slot.start,
    );
    Ok(HandlerOutcome::reply(text))
}

fn read_booking_id(r: &mut PayloadReader) -> Result<u64, DecodeError> {
    Ok(r.read_i64()? as u64)
}

fn locate_booking(facilities: &FacilityStore, id: u64) -> Result<(String, WeekSlot), HandlerError> {
    facilities.find_booking(id).map(|(name, b)| (name.to_string(), b.slot)).ok_or_else(|| StateError::NoSuchBooking(id).into())
}

/// Emits one `MONITOR_UPDATE` datagram per live, non-expired subscriber of
/// `facility`. Best-effort: a send may be silently dropped by the loss
/// simulator and is never retransmitted (§4.6).
fn fan_out_facility(ctx: &mut ServerContext, facility: &str) {
    let Ok(week_text) = ctx.facilities.full_week_text(facility) else {
        return;
    };
    let body = format!("=== {facility} Status ===\n{week_text}");

    let socket = ctx.socket;
    let loss = &mut *ctx.loss;
    let request_ids = ctx.request_ids;
    let semantics = ctx.semantics;

    ctx.monitors.fan_out(facility, Instant::now(), |peer| {
        let payload = monitor_update_payload(facility, &body);
        let update = Message::request(semantics, OP_MONITOR_UPDATE, request_ids.next(), payload);
        if let Err(e) = loss.send(socket, &update.encode(), peer) {
            log::warn!("failed to send monitor update to {peer}: {e}");
        }
    });
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Semantics, OP_BOOK, OP_CANCEL, OP_QUERY};

    fn ctx_pieces() -> (FacilityStore, MonitorRegistry, UdpSocket, LossSimulator, RequestIdGenerator) {
        let mut facilities = FacilityStore::new(1);
        facilities.add_facility("RoomA");
        let monitors = MonitorRegistry::new();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let loss = LossSimulator::new(1, 0.0);
        let request_ids = RequestIdGenerator::new();
        (facilities, monitors, socket, loss, request_ids)
    }

    fn book_request(day: i32, start: i32, end: i32) -> Message {
        let mut w = PayloadWriter::new();
        w.write_str("RoomA").write_i32(day).write_i32(start).write_i32(end);
        Message::request(Semantics::Amo, OP_BOOK, 1, w.into_bytes())
    }

    #[test]
    fn book_then_overlapping_book_conflicts() {
        let (mut facilities, mut monitors, socket, mut loss, request_ids) = ctx_pieces();
        let mut ctx = ServerContext { facilities: &mut facilities, monitors: &mut monitors, socket: &socket, loss: &mut loss, request_ids: &request_ids, semantics: Semantics::Amo };
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let first = dispatch(&mut ctx, peer, &book_request(0, 540, 630));
        assert!(!first.error);
        let mut r = PayloadReader::new(&first.payload);
        assert!(r.read_str().unwrap().starts_with("CONFIRM# "));

        let second = dispatch(&mut ctx, peer, &book_request(0, 600, 660));
        assert!(second.error);
        let mut r = PayloadReader::new(&second.payload);
        assert_eq!(r.read_str().unwrap(), "Unavailable in requested period");
    }

    #[test]
    fn unknown_opcode_sets_error_flag() {
        let (mut facilities, mut monitors, socket, mut loss, request_ids) = ctx_pieces();
        let mut ctx = ServerContext { facilities: &mut facilities, monitors: &mut monitors, socket: &socket, loss: &mut loss, request_ids: &request_ids, semantics: Semantics::Amo };
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let request = Message::request(Semantics::Amo, 99, 1, Vec::new());

        let reply = dispatch(&mut ctx, peer, &request);
        assert!(reply.error);
    }

    #[test]
    fn cancel_unknown_id_is_a_success_reply() {
        let (mut facilities, mut monitors, socket, mut loss, request_ids) = ctx_pieces();
        let mut ctx = ServerContext { facilities: &mut facilities, monitors: &mut monitors, socket: &socket, loss: &mut loss, request_ids: &request_ids, semantics: Semantics::Amo };
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let mut w = PayloadWriter::new();
        w.write_i64(4242);
        let request = Message::request(Semantics::Amo, OP_CANCEL, 1, w.into_bytes());

        let reply = dispatch(&mut ctx, peer, &request);
        assert!(!reply.error);
        let mut r = PayloadReader::new(&reply.payload);
        assert_eq!(r.read_str().unwrap(), "ALREADY_CANCELED_OR_NOT_FOUND");
    }

    #[test]
    fn empty_days_csv_yields_only_header() {
        let (mut facilities, mut monitors, socket, mut loss, request_ids) = ctx_pieces();
        let mut ctx = ServerContext { facilities: &mut facilities, monitors: &mut monitors, socket: &socket, loss: &mut loss, request_ids: &request_ids, semantics: Semantics::Amo };
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let mut w = PayloadWriter::new();
        w.write_str("RoomA").write_str("");
        let request = Message::request(Semantics::Amo, OP_QUERY, 1, w.into_bytes());

        let reply = dispatch(&mut ctx, peer, &request);
        assert!(!reply.error);
        let mut r = PayloadReader::new(&reply.payload);
        assert_eq!(r.read_str().unwrap(), "=== RoomA Status ===\n");
    }
}
