use thiserror::Error;

/// Malformed user input to a profile save or a delay entry. Always recoverable
/// by correcting the input; never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("arrival time '{0}' must match HH:MM (hours 00-23, minutes 00-59)")]
    InvalidArrivalTime(String),
    #[error("walk minutes must be zero or more, got {0}")]
    NegativeWalkMins(i64),
    #[error("delay of {minutes} minutes is outside 0..={max}")]
    DelayOutOfRange { minutes: i64, max: u32 },
    #[error("delay '{0}' is not a whole number of minutes")]
    NonIntegerDelay(String),
    #[error("weekday index {0} is outside 0..=6 (0 = Monday)")]
    InvalidWeekday(i64),
}

impl ValidationError {
    pub fn empty(field: &'static str) -> Self {
        Self::EmptyField { field }
    }

    /// Input field the user should correct.
    pub fn field(&self) -> &'static str {
        match self {
            Self::EmptyField { field } => field,
            Self::InvalidArrivalTime(_) => "arrival_time",
            Self::NegativeWalkMins(_) => "walk_mins",
            Self::DelayOutOfRange { .. } | Self::NonIntegerDelay(_) => "delay_mins",
            Self::InvalidWeekday(_) => "weekday",
        }
    }
}
