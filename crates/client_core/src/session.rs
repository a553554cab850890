use std::sync::Arc;

use chrono::Local;
use shared::domain::{CommuteResult, Profile, ProfileDraft, WeekdayIndex};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    delay_ledger::{DelayLedger, DelayLedgerStore, LedgerError, LedgerPolicy},
    orchestrator::{CommuteError, CommuteRequestOrchestrator},
    profile_store::{ProfileError, ProfileStore, StorageUnavailable},
};

const SESSION_EVENT_CAPACITY: usize = 64;

/// Source of "today". Read once per calculation.
pub trait Clock: Send + Sync {
    fn today(&self) -> WeekdayIndex;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> WeekdayIndex {
        WeekdayIndex::from_date(Local::now().date_naive())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    Setup,
    Ready,
    Calculating,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    ResultReady(CommuteResult),
    CalculationFailed(CommuteError),
    DelayRecorded {
        weekday: WeekdayIndex,
        minutes: u32,
        average: u32,
    },
}

#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("the session has not finished loading")]
    NotStarted,
    #[error("no commute profile is set up yet")]
    NoProfile,
    #[error("a commute calculation is already running")]
    AlreadyCalculating,
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Commute(#[from] CommuteError),
    #[error(transparent)]
    Storage(#[from] StorageUnavailable),
}

/// Point-in-time copy of the session for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub profile: Option<Profile>,
    pub last_result: Option<CommuteResult>,
    pub last_error: Option<CommuteError>,
    pub storage_available: bool,
}

struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

struct SessionState {
    phase: SessionPhase,
    profile: Option<Profile>,
    last_result: Option<CommuteResult>,
    last_error: Option<CommuteError>,
    storage_available: bool,
    in_flight: Option<InFlight>,
    generation: u64,
}

/// Drives setup, calculation and reset over the profile store, the delay
/// ledger and the orchestrator. The state lock is never held across a remote
/// call; profile writes happen under it.
pub struct CommuteSessionController {
    profiles: ProfileStore,
    ledger: DelayLedgerStore,
    orchestrator: CommuteRequestOrchestrator,
    clock: Arc<dyn Clock>,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl CommuteSessionController {
    pub fn new(
        profiles: ProfileStore,
        ledger: DelayLedgerStore,
        orchestrator: CommuteRequestOrchestrator,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Arc::new(Self {
            profiles,
            ledger,
            orchestrator,
            clock,
            inner: Mutex::new(SessionState {
                phase: SessionPhase::Loading,
                profile: None,
                last_result: None,
                last_error: None,
                storage_available: true,
                in_flight: None,
                generation: 0,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.lock().await.phase
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let guard = self.inner.lock().await;
        SessionSnapshot {
            phase: guard.phase,
            profile: guard.profile.clone(),
            last_result: guard.last_result.clone(),
            last_error: guard.last_error.clone(),
            storage_available: guard.storage_available,
        }
    }

    /// Reads the stored profile and routes to `Setup` or `Ready`. Unreadable
    /// storage routes to `Setup`.
    pub async fn start(&self) -> SessionPhase {
        self.set_phase(&mut *self.inner.lock().await, SessionPhase::Loading);

        let loaded = self.profiles.load().await;

        let mut guard = self.inner.lock().await;
        let phase = match loaded {
            Ok(Some(profile)) => {
                guard.profile = Some(profile);
                guard.storage_available = true;
                SessionPhase::Ready
            }
            Ok(None) => {
                guard.profile = None;
                guard.storage_available = true;
                SessionPhase::Setup
            }
            Err(err) => {
                warn!("session: {err}; continuing without stored data");
                guard.profile = None;
                guard.storage_available = false;
                SessionPhase::Setup
            }
        };
        self.set_phase(&mut guard, phase);
        info!(?phase, "session: started");
        phase
    }

    /// Saves a new or edited profile and moves to `Ready`. On failure the
    /// session stays where it was.
    ///
    /// The state lock is held across the local write so a calculation cannot
    /// start between the phase check and the new profile taking effect.
    pub async fn save_profile(&self, draft: ProfileDraft) -> Result<Profile, SessionError> {
        let mut guard = self.inner.lock().await;
        match guard.phase {
            SessionPhase::Loading => return Err(SessionError::NotStarted),
            SessionPhase::Calculating => return Err(SessionError::AlreadyCalculating),
            SessionPhase::Setup | SessionPhase::Ready => {}
        }

        let profile = match self.profiles.save(draft).await {
            Ok(profile) => profile,
            Err(err) => {
                if matches!(err, ProfileError::Storage(_)) {
                    guard.storage_available = false;
                }
                return Err(err.into());
            }
        };
        guard.storage_available = true;
        guard.profile = Some(profile.clone());
        guard.last_result = None;
        guard.last_error = None;
        self.set_phase(&mut guard, SessionPhase::Ready);
        Ok(profile)
    }

    /// Runs one commute calculation for today.
    ///
    /// The weekday and the ledger average are captured once, when the session
    /// enters `Calculating`. A reset while the request is in flight cancels it
    /// and the outcome is discarded.
    pub async fn calculate(&self) -> Result<CommuteResult, SessionError> {
        let (profile, generation, cancel) = {
            let mut guard = self.inner.lock().await;
            match guard.phase {
                SessionPhase::Ready => {}
                SessionPhase::Calculating => return Err(SessionError::AlreadyCalculating),
                SessionPhase::Loading => return Err(SessionError::NotStarted),
                SessionPhase::Setup => return Err(SessionError::NoProfile),
            }
            let profile = guard.profile.clone().ok_or(SessionError::NoProfile)?;

            guard.generation += 1;
            let generation = guard.generation;
            let cancel = CancellationToken::new();
            guard.in_flight = Some(InFlight {
                generation,
                cancel: cancel.clone(),
            });
            guard.last_result = None;
            guard.last_error = None;
            self.set_phase(&mut guard, SessionPhase::Calculating);
            (profile, generation, cancel)
        };

        let weekday = self.clock.today();
        let delay_buffer_mins = self.ledger.average_delay(weekday).await;
        info!(
            weekday = weekday.get(),
            delay_buffer_mins, "session: calculating commute"
        );

        let outcome = self
            .orchestrator
            .plan_commute_with_cancel(&profile, delay_buffer_mins, weekday, &cancel)
            .await;

        let mut guard = self.inner.lock().await;
        let still_current = guard
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation);
        if !still_current {
            info!(generation, "session: discarding outcome of a superseded calculation");
            return Err(CommuteError::Cancelled.into());
        }
        guard.in_flight = None;

        match outcome {
            Ok(result) => {
                guard.last_result = Some(result.clone());
                self.set_phase(&mut guard, SessionPhase::Ready);
                let _ = self.events.send(SessionEvent::ResultReady(result.clone()));
                Ok(result)
            }
            Err(err) => {
                guard.last_error = Some(err.clone());
                self.set_phase(&mut guard, SessionPhase::Ready);
                let _ = self.events.send(SessionEvent::CalculationFailed(err.clone()));
                Err(err.into())
            }
        }
    }

    /// Forgets the profile and returns to `Setup`, cancelling any calculation
    /// in flight. The session ends up in `Setup` even if the stored record
    /// could not be removed.
    pub async fn reset(&self) -> Result<(), SessionError> {
        let mut guard = self.inner.lock().await;
        if let Some(in_flight) = guard.in_flight.take() {
            in_flight.cancel.cancel();
        }
        guard.profile = None;
        guard.last_result = None;
        guard.last_error = None;
        self.set_phase(&mut guard, SessionPhase::Setup);

        if let Err(err) = self.profiles.clear().await {
            warn!("session: reset could not remove the stored profile: {err}");
            guard.storage_available = false;
            return Err(err.into());
        }
        info!("session: reset to setup");
        Ok(())
    }

    /// Logs a train delay against today's weekday.
    pub async fn record_delay(&self, minutes: i64) -> Result<DelayLedger, SessionError> {
        self.record_delay_for(self.clock.today(), minutes).await
    }

    pub async fn record_delay_for(
        &self,
        weekday: WeekdayIndex,
        minutes: i64,
    ) -> Result<DelayLedger, SessionError> {
        let ledger = self.ledger.record_delay(weekday, minutes).await?;
        let average = ledger.average(weekday, self.ledger.policy().rounding);
        let recorded = ledger.entries(weekday).last().copied().unwrap_or_default();
        let _ = self.events.send(SessionEvent::DelayRecorded {
            weekday,
            minutes: recorded,
            average,
        });
        Ok(ledger)
    }

    pub async fn delay_ledger(&self) -> DelayLedger {
        self.ledger.load().await
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        self.ledger.policy()
    }

    pub async fn reset_delays(&self) -> Result<(), SessionError> {
        self.ledger.reset().await?;
        Ok(())
    }

    fn set_phase(&self, state: &mut SessionState, phase: SessionPhase) {
        if state.phase == phase {
            return;
        }
        state.phase = phase;
        let _ = self.events.send(SessionEvent::PhaseChanged(phase));
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
