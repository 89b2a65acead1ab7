use std::{fmt, str::FromStr};

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// AM/PM designator for alarms written in 12-hour form
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeOfDay {
    #[serde(alias = "am")]
    AM,
    #[serde(alias = "pm")]
    PM,
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AM => "AM",
            Self::PM => "PM",
        })
    }
}

impl FromStr for TimeOfDay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('.', "").as_str() {
            "am" | "a" => Ok(Self::AM),
            "pm" | "p" => Ok(Self::PM),
            other => Err(Error::Validation(format!("expected AM or PM, got `{other}`"))),
        }
    }
}

#[inline]
#[must_use]
pub const fn always_true() -> bool {
    true
}

#[inline]
#[must_use]
pub const fn default_volume() -> f32 {
    100.0
}

/// a single daily wake-up time
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Alarm {
    pub id: u64,
    /// 0-23, or 1-12 when `time_of_day` is set
    pub hour: u8,
    pub minute: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_day: Option<TimeOfDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// ringtone name (relative to the sounds directory) or absolute path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default = "always_true")]
    pub enabled: bool,
    #[serde(skip)]
    pub triggered_today: bool,
}

impl Alarm {
    /// hour normalized to 24-hour form
    #[must_use]
    pub const fn hour24(&self) -> u8 {
        to_hour24(self.hour, self.time_of_day)
    }

    #[must_use]
    pub fn time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour24()), u32::from(self.minute), 0)
            .unwrap_or(NaiveTime::MIN)
    }

    /// whether the alarm goes off during the minute containing `now`
    #[must_use]
    pub fn matches(&self, now: NaiveTime) -> bool {
        u32::from(self.hour24()) == now.hour() && u32::from(self.minute) == now.minute()
    }

    /// Check a record that didn't come through [`AlarmBuilder`], e.g. one read
    /// from a hand-edited file.
    ///
    /// # Errors
    /// `Error::Validation` when the hour, minute or volume is out of range
    pub fn validate(&self) -> Result<()> {
        AlarmBuilder::new(self.hour, self.minute, self.time_of_day)
            .volume(self.volume)
            .validate()
    }

    /// the time in the form it was entered, e.g. `07:30 AM` or `19:05`
    #[must_use]
    pub fn time_string(&self) -> String {
        match self.time_of_day {
            Some(ampm) => format!("{:02}:{:02} {ampm}", self.hour, self.minute),
            None => format!("{:02}:{:02}", self.hour, self.minute),
        }
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.time_string())?;
        if let Some(label) = &self.label {
            write!(f, " \"{label}\"")?;
        }
        if !self.enabled {
            f.write_str(" (disabled)")?;
        }
        Ok(())
    }
}

const fn to_hour24(hour: u8, time_of_day: Option<TimeOfDay>) -> u8 {
    match time_of_day {
        None => hour,
        Some(TimeOfDay::AM) => hour % 12,
        Some(TimeOfDay::PM) => hour % 12 + 12,
    }
}

/// the user-supplied part of an alarm, before it has an id
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmBuilder {
    pub hour: u8,
    pub minute: u8,
    pub time_of_day: Option<TimeOfDay>,
    pub label: Option<String>,
    pub sound: Option<String>,
    pub volume: f32,
}

impl AlarmBuilder {
    #[must_use]
    pub const fn new(hour: u8, minute: u8, time_of_day: Option<TimeOfDay>) -> Self {
        Self {
            hour,
            minute,
            time_of_day,
            label: None,
            sound: None,
            volume: default_volume(),
        }
    }

    #[must_use]
    pub fn label(mut self, label: Option<String>) -> Self {
        self.label = label.filter(|l| !l.trim().is_empty());
        self
    }

    #[must_use]
    pub fn sound(mut self, sound: Option<String>) -> Self {
        self.sound = sound.filter(|s| !s.trim().is_empty());
        self
    }

    #[must_use]
    pub const fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// # Errors
    /// `Error::Validation` when the hour, minute or volume is out of range
    pub fn validate(&self) -> Result<()> {
        match self.time_of_day {
            Some(ampm) if !(1..=12).contains(&self.hour) => {
                return Err(Error::Validation(format!(
                    "hour {} {ampm} is outside 1-12",
                    self.hour
                )));
            }
            None if self.hour > 23 => {
                return Err(Error::Validation(format!(
                    "hour {} is outside 0-23",
                    self.hour
                )));
            }
            _ => {}
        }
        if self.minute > 59 {
            return Err(Error::Validation(format!(
                "minute {} is outside 0-59",
                self.minute
            )));
        }
        if !(0.0..=100.0).contains(&self.volume) {
            return Err(Error::Validation(format!(
                "volume {} is outside 0-100",
                self.volume
            )));
        }
        Ok(())
    }

    /// # Errors
    /// see [`Self::validate`]
    pub fn build(self, id: u64) -> Result<Alarm> {
        self.validate()?;
        Ok(Alarm {
            id,
            hour: self.hour,
            minute: self.minute,
            time_of_day: self.time_of_day,
            label: self.label,
            sound: self.sound,
            volume: self.volume,
            enabled: true,
            triggered_today: false,
        })
    }
}

/// Parse a time typed by a user: `7:30`, `7:30am`, `07:30 PM`, `19:05` or `7pm`.
/// Only the shape is checked here, ranges are checked by [`AlarmBuilder::validate`].
///
/// # Errors
/// `Error::Validation` if the text isn't a time
pub fn parse_time(input: &str) -> Result<(u8, u8, Option<TimeOfDay>)> {
    let lower = input.trim().to_ascii_lowercase();
    let split = lower
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(lower.len());
    let (clock, suffix) = lower.split_at(split);
    let time_of_day = if suffix.is_empty() {
        None
    } else {
        Some(suffix.parse::<TimeOfDay>()?)
    };
    let clock = clock.trim();
    let (hour, minute) = clock.split_once(':').unwrap_or((clock, "0"));
    let parse = |part: &str, what: &str| {
        part.trim()
            .parse::<u8>()
            .map_err(|_| Error::Validation(format!("`{input}` has no valid {what}")))
    };
    Ok((parse(hour, "hour")?, parse(minute, "minute")?, time_of_day))
}
