//! Wildcard day/time patterns for event jobs.
//!
//! A pattern is written `"<day>|<HH>:<MM>"` where `day` is a three-letter
//! weekday name or `*`, and each of the four digit slots `H1 H2 : M1 M2` is
//! independently a literal digit or `*`. One pattern therefore covers many
//! wall-clock minutes: `"*|1*:30"` fires at minute 30 of hours 10–19 on any
//! day. A bare `*` stands for a whole unconstrained component (`"mon|09:*"`
//! is every minute of hour nine), while the spelled-out `"**"` minute is
//! rejected as degenerate.
//!
//! Patterns are parsed once at registration and matched per tick as a single
//! pass producing one boolean, so a matched minute can fire at most once.

use std::fmt;
use std::str::FromStr;

use chrono::Weekday;

use crate::error::SchedError;

/// Accepted day tokens, in weekday order.
const DAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// One `H`/`M` digit position: a literal digit or a wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Digit(u8),
    Any,
}

impl Slot {
    fn parse(c: char) -> Option<Slot> {
        match c {
            '*' => Some(Slot::Any),
            '0'..='9' => Some(Slot::Digit(c as u8 - b'0')),
            _ => None,
        }
    }

    fn matches(self, digit: u8) -> bool {
        match self {
            Slot::Any => true,
            Slot::Digit(d) => d == digit,
        }
    }
}

/// Day selector: a specific weekday or any day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DaySel {
    Day(Weekday),
    Any,
}

/// A parsed `"<day>|<HH>:<MM>"` wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhenPattern {
    raw: String,
    day: DaySel,
    hour: [Slot; 2],
    minute: [Slot; 2],
}

impl WhenPattern {
    /// Parse and validate a pattern. Input is case-insensitive.
    pub fn parse(input: &str) -> Result<Self, SchedError> {
        let raw = input.trim().to_ascii_lowercase();
        let invalid = |reason: &str| SchedError::InvalidPattern {
            pattern: input.to_string(),
            reason: reason.to_string(),
        };

        let (day_token, time) = raw
            .split_once('|')
            .ok_or_else(|| invalid("expected '<day>|<HH>:<MM>'"))?;

        let day = if day_token == "*" {
            DaySel::Any
        } else {
            let idx = DAY_NAMES
                .iter()
                .position(|d| *d == day_token)
                .ok_or_else(|| invalid("day must be one of mon..sun or '*'"))?;
            DaySel::Day(weekday_from_index(idx))
        };

        let (hh, mm) = time
            .split_once(':')
            .ok_or_else(|| invalid("expected '<day>|<HH>:<MM>'"))?;

        // A bare `*` leaves the whole component unconstrained; the
        // two-character `**` minute spells the same thing and is rejected as
        // degenerate.
        if mm == "**" {
            return Err(invalid("minute may not be '**' (write '*' to leave it unconstrained)"));
        }

        let hour = parse_slots(hh).ok_or_else(|| invalid("hour must be 'HH' with digits or '*' per position"))?;
        let minute =
            parse_slots(mm).ok_or_else(|| invalid("minute must be 'MM' with digits or '*' per position"))?;

        Ok(Self {
            raw,
            day,
            hour,
            minute,
        })
    }

    /// Single-pass match against the current wall-clock components.
    pub fn matches(&self, day: Weekday, hour: u8, minute: u8) -> bool {
        let day_ok = match self.day {
            DaySel::Any => true,
            DaySel::Day(d) => d == day,
        };
        day_ok
            && self.hour[0].matches(hour / 10)
            && self.hour[1].matches(hour % 10)
            && self.minute[0].matches(minute / 10)
            && self.minute[1].matches(minute % 10)
    }

    /// The normalized (lowercased, trimmed) pattern text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for WhenPattern {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WhenPattern::parse(s)
    }
}

impl fmt::Display for WhenPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_slots(s: &str) -> Option<[Slot; 2]> {
    if s == "*" {
        return Some([Slot::Any, Slot::Any]);
    }
    let mut chars = s.chars();
    let a = Slot::parse(chars.next()?)?;
    let b = Slot::parse(chars.next()?)?;
    if chars.next().is_some() {
        return None;
    }
    Some([a, b])
}

fn weekday_from_index(idx: usize) -> Weekday {
    match idx {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}
