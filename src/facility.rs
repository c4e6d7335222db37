//! Per-facility weekly availability grid, booking index, and rendering helpers.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::time::{self, WeekSlot, DAYS_PER_WEEK, MINUTES_PER_DAY};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("No such facility")]
    NoSuchFacility,
    #[error("Unavailable in requested period")]
    UnavailableRequested,
    #[error("Unavailable for new period")]
    UnavailableNew,
    #[error("No booking found with ID: {0}")]
    NoSuchBooking(u64),
    #[error("outside week range")]
    OutsideWeekRange,
    #[error("exceed end of day")]
    ExceedEndOfDay,
    #[error("New start time must be before end time")]
    InvalidRange,
}

#[derive(Debug, Clone)]
pub struct Booking {
    pub id: u64,
    pub facility: String,
    pub slot: WeekSlot,
}

#[derive(Debug)]
struct Facility {
    week_grid: Box<[[bool; 1440]; 7]>,
    bookings: HashMap<u64, Booking>,
}

impl Facility {
    fn new() -> Self {
        Facility { week_grid: Box::new([[false; 1440]; 7]), bookings: HashMap::new() }
    }

    fn is_free(&self, slot: &WeekSlot) -> bool {
        let row = &self.week_grid[slot.day as usize];
        row[slot.start as usize..slot.end as usize].iter().all(|occupied| !occupied)
    }

    fn occupy(&mut self, slot: &WeekSlot) {
        let row = &mut self.week_grid[slot.day as usize];
        for minute in &mut row[slot.start as usize..slot.end as usize] {
            *minute = true;
        }
    }

    fn free(&mut self, slot: &WeekSlot) {
        let row = &mut self.week_grid[slot.day as usize];
        for minute in &mut row[slot.start as usize..slot.end as usize] {
            *minute = false;
        }
    }

    /// Contiguous booked/free minute ranges for one day, chronological order.
    fn detailed_availability(&self, day: u8) -> String {
        let row = &self.week_grid[day as usize];
        let mut lines = Vec::new();
        let mut i = 0usize;
        while i < row.len() {
            let occupied = row[i];
            let start = i;
            while i < row.len() && row[i] == occupied {
                i += 1;
            }
            let label = if occupied { "Booked" } else { "Free" };
            lines.push(format!("{}: {}", label, WeekSlot { day, start: start as u16, end: i as u16 }.render_range()));
        }
        if lines.len() == 1 && !row[0] {
            return "All day free (00:00-24:00)".to_string();
        }
        lines.join("\n")
    }

    fn weekly_free_minutes(&self) -> [u32; 7] {
        let mut out = [0u32; 7];
        for (day, row) in self.week_grid.iter().enumerate() {
            out[day] = row.iter().filter(|occupied| !**occupied).count() as u32;
        }
        out
    }
}

/// Owns every facility's weekly grid and booking index for the lifetime of the
/// server process. Single-threaded by design (§5): no locking is needed.
#[derive(Debug)]
pub struct FacilityStore {
    facilities: HashMap<String, Facility>,
    rng: StdRng,
}

impl FacilityStore {
    pub fn new(seed: u64) -> Self {
        FacilityStore { facilities: HashMap::new(), rng: StdRng::seed_from_u64(seed) }
    }

    pub fn add_facility(&mut self, name: &str) {
        self.facilities.entry(name.to_string()).or_insert_with(Facility::new);
    }

    pub fn has_facility(&self, name: &str) -> bool {
        self.facilities.contains_key(name)
    }

    pub fn facility_names(&self) -> Vec<&str> {
        self.facilities.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_free(&self, facility: &str, slot: &WeekSlot) -> Result<bool, StateError> {
        self.facilities.get(facility).map(|f| f.is_free(slot)).ok_or(StateError::NoSuchFacility)
    }

    /// Allocates a fresh confirmation id (abs of a random i64, re-rolled on the
    /// astronomically unlikely collision) and occupies `slot` under it.
    pub fn book(&mut self, facility: &str, slot: WeekSlot) -> Result<u64, StateError> {
        if !self.facilities.contains_key(facility) {
            return Err(StateError::NoSuchFacility);
        }
        if !self.is_free(facility, &slot)? {
            return Err(StateError::UnavailableRequested);
        }
        let id = self.allocate_id();
        let f = self.facilities.get_mut(facility).unwrap();
        f.occupy(&slot);
        f.bookings.insert(id, Booking { id, facility: facility.to_string(), slot });
        Ok(id)
    }

    fn allocate_id(&mut self) -> u64 {
        loop {
            let candidate = self.rng.random::<i64>().unsigned_abs();
            if self.find_booking(candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Linear search across every facility's booking map (O(total-bookings); see
    /// DESIGN.md Open Question 1).
    pub fn find_booking(&self, id: u64) -> Option<(&str, &Booking)> {
        self.facilities.iter().find_map(|(name, f)| f.bookings.get(&id).map(|b| (name.as_str(), b)))
    }

    /// Moves an existing booking to `new_slot`, rolling back on conflict so the
    /// facility state is unchanged on failure (P6).
    pub fn move_booking(&mut self, id: u64, new_slot: WeekSlot) -> Result<(), StateError> {
        let facility_name = self.find_booking(id).map(|(name, _)| name.to_string()).ok_or(StateError::NoSuchBooking(id))?;
        let old_slot = self.facilities[&facility_name].bookings[&id].slot;

        let f = self.facilities.get_mut(&facility_name).unwrap();
        f.free(&old_slot);
        if !f.is_free(&new_slot) {
            f.occupy(&old_slot);
            return Err(StateError::UnavailableNew);
        }
        f.occupy(&new_slot);
        f.bookings.get_mut(&id).unwrap().slot = new_slot;
        Ok(())
    }

    /// Returns `true` if a booking was found and removed, `false` if it was
    /// already gone (CANCEL is observationally idempotent either way, P5).
    /// Returns the owning facility's name alongside so callers can fan out.
    pub fn cancel(&mut self, id: u64) -> (bool, Option<String>) {
        let Some(facility_name) = self.find_booking(id).map(|(name, _)| name.to_string()) else {
            return (false, None);
        };
        let f = self.facilities.get_mut(&facility_name).unwrap();
        if let Some(booking) = f.bookings.remove(&id) {
            f.free(&booking.slot);
            (true, Some(facility_name))
        } else {
            (false, None)
        }
    }

    pub fn detailed_availability(&self, facility: &str, day: u8) -> Result<String, StateError> {
        self.facilities.get(facility).map(|f| f.detailed_availability(day)).ok_or(StateError::NoSuchFacility)
    }

    pub fn full_week_text(&self, facility: &str) -> Result<String, StateError> {
        let f = self.facilities.get(facility).ok_or(StateError::NoSuchFacility)?;
        let mut out = String::new();
        for day in 0..DAYS_PER_WEEK as u8 {
            out.push_str(&format!("{}:\n{}\n", time::day_name(day), f.detailed_availability(day)));
        }
        Ok(out)
    }

    /// Per-day free-minute counts, in day order.
    pub fn weekly_summary(&self, facility: &str) -> Result<[u32; 7], StateError> {
        self.facilities.get(facility).map(Facility::weekly_free_minutes).ok_or(StateError::NoSuchFacility)
    }
}
