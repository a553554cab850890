use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use shared::{
    domain::{validate_delay_minutes, WeekdayIndex},
    error::ValidationError,
};
use storage::KeyValueStore;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DELAY_LEDGER_KEY: &str = "delay_ledger";
/// Observations kept per weekday before the oldest is evicted.
pub const DEFAULT_DELAY_WINDOW: usize = 4;

/// How a fractional mean delay becomes whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundingRule {
    /// 0.5 rounds up.
    #[default]
    HalfUp,
    /// 0.5 rounds to the nearest even number.
    HalfToEven,
}

impl RoundingRule {
    fn divide(self, sum: u64, count: u64) -> u64 {
        let quotient = sum / count;
        let twice_remainder = (sum % count) * 2;
        let round_up = match self {
            Self::HalfUp => twice_remainder >= count,
            Self::HalfToEven => {
                twice_remainder > count || (twice_remainder == count && quotient % 2 == 1)
            }
        };
        if round_up {
            quotient + 1
        } else {
            quotient
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerPolicy {
    pub window: usize,
    pub rounding: RoundingRule,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_DELAY_WINDOW,
            rounding: RoundingRule::default(),
        }
    }
}

impl LedgerPolicy {
    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(1),
            ..Self::default()
        }
    }
}

/// Rounded mean of `entries`, 0 when there are none.
pub fn average_delay(entries: &[u32], rounding: RoundingRule) -> u32 {
    if entries.is_empty() {
        return 0;
    }
    let sum = entries.iter().map(|minutes| u64::from(*minutes)).sum::<u64>();
    let average = rounding.divide(sum, entries.len() as u64);
    // the mean never exceeds the largest entry
    u32::try_from(average).unwrap_or(u32::MAX)
}

/// Per-weekday rolling window of observed train delays, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DelayLedger {
    days: BTreeMap<WeekdayIndex, Vec<u32>>,
}

impl DelayLedger {
    pub fn entries(&self, weekday: WeekdayIndex) -> &[u32] {
        self.days.get(&weekday).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn average(&self, weekday: WeekdayIndex, rounding: RoundingRule) -> u32 {
        average_delay(self.entries(weekday), rounding)
    }

    /// Appends an already validated observation and evicts from the front until
    /// the window holds. Returns whatever was evicted.
    pub fn push(&mut self, weekday: WeekdayIndex, minutes: u32, window: usize) -> Vec<u32> {
        let entries = self.days.entry(weekday).or_default();
        entries.push(minutes);
        let overflow = entries.len().saturating_sub(window.max(1));
        entries.drain(..overflow).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.days.values().all(Vec::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (WeekdayIndex, &[u32])> {
        self.days
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(weekday, entries)| (*weekday, entries.as_slice()))
    }

    /// Builds a ledger from a stored document, dropping what no longer fits the
    /// policy. The flag reports whether anything was dropped.
    fn from_stored(stored: BTreeMap<u8, Vec<i64>>, policy: LedgerPolicy) -> (Self, bool) {
        let mut ledger = Self::default();
        let mut sanitized = false;
        for (raw_weekday, raw_entries) in stored {
            let Ok(weekday) = WeekdayIndex::new(raw_weekday) else {
                sanitized = true;
                continue;
            };
            for raw in raw_entries {
                match validate_delay_minutes(raw) {
                    Ok(minutes) => {
                        if !ledger.push(weekday, minutes, policy.window).is_empty() {
                            sanitized = true;
                        }
                    }
                    Err(_) => sanitized = true,
                }
            }
        }
        (ledger, sanitized)
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("delay ledger storage unavailable: {0}")]
    Storage(String),
}

/// Durable per-weekday delay history. The whole ledger is rewritten on every
/// change.
pub struct DelayLedgerStore {
    store: Arc<dyn KeyValueStore>,
    policy: LedgerPolicy,
}

impl DelayLedgerStore {
    pub fn new(store: Arc<dyn KeyValueStore>, policy: LedgerPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> LedgerPolicy {
        self.policy
    }

    /// Current ledger; storage faults and corrupt records read as empty.
    pub async fn load(&self) -> DelayLedger {
        match self.read().await {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!("delay ledger: {err}; using an empty ledger");
                DelayLedger::default()
            }
        }
    }

    /// Rolling average for `weekday` under this store's rounding rule.
    pub async fn average_delay(&self, weekday: WeekdayIndex) -> u32 {
        self.load().await.average(weekday, self.policy.rounding)
    }

    pub async fn record_delay(
        &self,
        weekday: WeekdayIndex,
        minutes: i64,
    ) -> Result<DelayLedger, LedgerError> {
        let minutes = validate_delay_minutes(minutes)?;

        // a fault here must not be mistaken for an empty history, or the write
        // below would wipe the other weekdays
        let mut ledger = self.read().await?;
        let evicted = ledger.push(weekday, minutes, self.policy.window);
        if !evicted.is_empty() {
            debug!(weekday = weekday.get(), ?evicted, "delay ledger: window full, evicted oldest");
        }

        let raw = serde_json::to_string(&ledger)
            .map_err(|err| LedgerError::Storage(format!("failed to encode ledger: {err}")))?;
        self.store
            .set(DELAY_LEDGER_KEY, &raw)
            .await
            .map_err(|err| LedgerError::Storage(format!("{err:#}")))?;

        info!(
            weekday = weekday.get(),
            minutes,
            average = ledger.average(weekday, self.policy.rounding),
            "delay ledger: recorded delay"
        );
        Ok(ledger)
    }

    pub async fn reset(&self) -> Result<(), LedgerError> {
        self.store
            .delete(DELAY_LEDGER_KEY)
            .await
            .map_err(|err| LedgerError::Storage(format!("{err:#}")))?;
        info!("delay ledger: reset");
        Ok(())
    }

    async fn read(&self) -> Result<DelayLedger, LedgerError> {
        let raw = self
            .store
            .get(DELAY_LEDGER_KEY)
            .await
            .map_err(|err| LedgerError::Storage(format!("{err:#}")))?;
        let Some(raw) = raw else {
            return Ok(DelayLedger::default());
        };

        match serde_json::from_str::<BTreeMap<u8, Vec<i64>>>(&raw) {
            Ok(stored) => {
                let (ledger, sanitized) = DelayLedger::from_stored(stored, self.policy);
                if sanitized {
                    warn!("delay ledger: dropped stored entries outside the current policy");
                }
                Ok(ledger)
            }
            Err(err) => {
                warn!("delay ledger: stored record is unreadable, starting fresh: {err}");
                Ok(DelayLedger::default())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/delay_ledger_tests.rs"]
mod tests;
