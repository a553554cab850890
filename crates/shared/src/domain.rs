use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Walk time assumed when the setup form leaves it blank or non-numeric.
pub const DEFAULT_WALK_MINS: u32 = 5;
/// Largest train delay a user may log, in minutes.
pub const MAX_DELAY_MINUTES: u32 = 120;

const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Day of the week as sent to the prediction service: 0 = Monday … 6 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct WeekdayIndex(u8);

impl WeekdayIndex {
    pub const MONDAY: Self = Self(0);
    pub const SUNDAY: Self = Self(6);

    pub fn new(index: u8) -> Result<Self, ValidationError> {
        if usize::from(index) < WEEKDAY_NAMES.len() {
            Ok(Self(index))
        } else {
            Err(ValidationError::InvalidWeekday(i64::from(index)))
        }
    }

    pub fn from_weekday(day: Weekday) -> Self {
        // num_days_from_monday is always 0..=6
        Self(day.num_days_from_monday() as u8)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self::from_weekday(date.weekday())
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        WEEKDAY_NAMES[usize::from(self.0)]
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..WEEKDAY_NAMES.len() as u8).map(Self)
    }
}

impl TryFrom<u8> for WeekdayIndex {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WeekdayIndex> for u8 {
    fn from(value: WeekdayIndex) -> Self {
        value.0
    }
}

impl fmt::Display for WeekdayIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Checks a `HH:MM` clock string: two-digit hours 00-23, two-digit minutes 00-59.
pub fn validate_arrival_time(raw: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidArrivalTime(raw.to_string());
    let bytes = raw.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return Err(invalid());
    }
    if !bytes[..2].iter().chain(&bytes[3..]).all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    let hours = u32::from(bytes[0] - b'0') * 10 + u32::from(bytes[1] - b'0');
    let minutes = u32::from(bytes[3] - b'0') * 10 + u32::from(bytes[4] - b'0');
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok(())
}

/// Checks a logged delay against `0..=MAX_DELAY_MINUTES`.
pub fn validate_delay_minutes(minutes: i64) -> Result<u32, ValidationError> {
    u32::try_from(minutes)
        .ok()
        .filter(|value| *value <= MAX_DELAY_MINUTES)
        .ok_or(ValidationError::DelayOutOfRange {
            minutes,
            max: MAX_DELAY_MINUTES,
        })
}

/// Parses raw delay text typed by the user. Fractions and words are rejected
/// rather than rounded.
pub fn parse_delay_minutes(raw: &str) -> Result<u32, ValidationError> {
    let trimmed = raw.trim();
    let minutes = trimmed
        .parse::<i64>()
        .map_err(|_| ValidationError::NonIntegerDelay(trimmed.to_string()))?;
    validate_delay_minutes(minutes)
}

/// The single commute setup of this installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub home: String,
    pub station: String,
    pub walk_mins: u32,
    pub arrival_time: String,
}

impl Profile {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.home.trim().is_empty() {
            return Err(ValidationError::empty("home"));
        }
        if self.station.trim().is_empty() {
            return Err(ValidationError::empty("station"));
        }
        if self.arrival_time.trim().is_empty() {
            return Err(ValidationError::empty("arrival_time"));
        }
        validate_arrival_time(&self.arrival_time)
    }
}

/// Unvalidated setup form input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileDraft {
    pub home: String,
    pub station: String,
    pub walk_mins: Option<String>,
    pub arrival_time: String,
}

impl ProfileDraft {
    pub fn into_profile(self) -> Result<Profile, ValidationError> {
        let walk_mins = match self.walk_mins.as_deref().map(str::trim) {
            Some(raw) => match raw.parse::<i64>() {
                Ok(value) if value < 0 => return Err(ValidationError::NegativeWalkMins(value)),
                Ok(value) => u32::try_from(value).unwrap_or(DEFAULT_WALK_MINS),
                Err(_) => DEFAULT_WALK_MINS,
            },
            None => DEFAULT_WALK_MINS,
        };

        let profile = Profile {
            home: self.home.trim().to_string(),
            station: self.station.trim().to_string(),
            walk_mins,
            arrival_time: self.arrival_time.trim().to_string(),
        };
        profile.validate()?;
        Ok(profile)
    }
}

impl From<&Profile> for ProfileDraft {
    fn from(profile: &Profile) -> Self {
        Self {
            home: profile.home.clone(),
            station: profile.station.clone(),
            walk_mins: Some(profile.walk_mins.to_string()),
            arrival_time: profile.arrival_time.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Train,
    Road,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => f.write_str("Train"),
            Self::Road => f.write_str("Road"),
        }
    }
}

/// One way of getting there as returned by the planning service. Only
/// `leave_at` and `total_duration_mins` are interpreted; the rest is passed
/// through for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteLegSet {
    pub leave_at: String,
    pub total_duration_mins: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_buffer_mins: Option<i64>,
    #[serde(default)]
    pub details: Value,
}

impl RouteLegSet {
    pub fn summary(&self) -> Option<&str> {
        self.details.get("summary").and_then(Value::as_str)
    }

    /// Leg descriptions (`leg1_*`, `leg2_*`, ...) in leg order. A plain string
    /// `details` counts as a single leg.
    pub fn leg_descriptions(&self) -> Vec<&str> {
        match &self.details {
            Value::String(text) => vec![text.as_str()],
            Value::Object(map) => {
                let mut legs = map
                    .iter()
                    .filter(|(key, _)| key.starts_with("leg"))
                    .filter_map(|(key, value)| value.as_str().map(|text| (key.as_str(), text)))
                    .collect::<Vec<_>>();
                legs.sort_by(|a, b| a.0.cmp(b.0));
                legs.into_iter().map(|(_, text)| text).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Merged outcome of one commute calculation. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommuteResult {
    pub recommendation: Recommendation,
    pub train_route: Option<RouteLegSet>,
    pub road_route: RouteLegSet,
    pub ml_estimate_mins: Option<f64>,
}

impl CommuteResult {
    /// Route matching the recommendation. Falls back to the road route when a
    /// train recommendation arrives without a train route.
    pub fn recommended_route(&self) -> &RouteLegSet {
        match (self.recommendation, &self.train_route) {
            (Recommendation::Train, Some(train)) => train,
            _ => &self.road_route,
        }
    }

    /// The route that was not recommended, when the planner returned one.
    pub fn alternative_route(&self) -> Option<&RouteLegSet> {
        match (self.recommendation, &self.train_route) {
            (Recommendation::Train, Some(_)) => Some(&self.road_route),
            (Recommendation::Road, Some(train)) => Some(train),
            (_, None) => None,
        }
    }
}
