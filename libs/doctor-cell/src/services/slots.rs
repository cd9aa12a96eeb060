// libs/doctor-cell/src/services/slots.rs
use std::collections::HashSet;
use std::iter;

use chrono::{Datelike, NaiveDate, NaiveDateTime};

use crate::models::{Slot, SlotTime, WeekSchedule};

/// Bookable half-hour slots for `date`.
///
/// An empty result means the doctor does not work that weekday. A non-empty
/// result whose slots are all unavailable means the day is open but booked out
/// or already over. Slots at or before `now` on the current date, and every
/// slot on a date before `now`, are returned with `is_available = false`.
pub fn generate_slots(
    date: NaiveDate,
    week: &WeekSchedule,
    booked_times: &HashSet<SlotTime>,
    now: NaiveDateTime,
) -> Vec<Slot> {
    let day = week.day(date.weekday());
    if !day.is_available {
        return Vec::new();
    }

    let today = now.date();
    let clock = now.time();

    iter::successors(Some(day.start), SlotTime::next)
        .take_while(|time| *time < day.end)
        .map(|time| {
            let in_future = date > today || (date == today && time.as_naive() > clock);
            Slot {
                time,
                is_available: in_future && !booked_times.contains(&time),
            }
        })
        .collect()
}

/// Drops unavailable slots, for callers that want only what can be booked.
pub fn bookable(slots: Vec<Slot>) -> Vec<Slot> {
    slots.into_iter().filter(|slot| slot.is_available).collect()
}
