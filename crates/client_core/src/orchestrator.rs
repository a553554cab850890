use std::{future::Future, sync::Arc, time::Duration};

use shared::{
    domain::{CommuteResult, Profile, WeekdayIndex},
    protocol::{CommutePlanRequest, PredictRequest},
};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{CommuteApi, RemoteCallError, PLAN_ENDPOINT, PREDICT_ENDPOINT};

/// Shared deadline for the plan and prediction calls, measured from dispatch.
pub const DEFAULT_COMMUTE_DEADLINE: Duration = Duration::from_secs(60);

/// Why no commute result could be produced. Only plan-call failures end up
/// here; prediction failures just leave the estimate empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommuteError {
    #[error("the commute planner did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("could not reach the commute planner: {0}")]
    Network(String),
    #[error("the commute planner reported an error: {0}")]
    Service(String),
    #[error("the commute calculation was cancelled")]
    Cancelled,
}

impl CommuteError {
    fn from_plan_failure(err: RemoteCallError, deadline: Duration) -> Self {
        match err {
            RemoteCallError::DeadlineExceeded { .. } => Self::Timeout(deadline),
            RemoteCallError::Cancelled { .. } => Self::Cancelled,
            RemoteCallError::Network { message, .. } => Self::Network(message),
            RemoteCallError::Status {
                status, message, ..
            } => Self::Service(format!("status {status}: {message}")),
            RemoteCallError::Reported { message, .. } => Self::Service(message),
            RemoteCallError::Decode { message, .. } => {
                Self::Service(format!("malformed plan response: {message}"))
            }
        }
    }
}

pub struct CommuteRequestOrchestrator {
    api: Arc<dyn CommuteApi>,
    deadline: Duration,
}

impl CommuteRequestOrchestrator {
    pub fn new(api: Arc<dyn CommuteApi>) -> Self {
        Self::with_deadline(api, DEFAULT_COMMUTE_DEADLINE)
    }

    pub fn with_deadline(api: Arc<dyn CommuteApi>, deadline: Duration) -> Self {
        Self { api, deadline }
    }

    pub async fn plan_commute(
        &self,
        profile: &Profile,
        delay_buffer_mins: u32,
        weekday: WeekdayIndex,
    ) -> Result<CommuteResult, CommuteError> {
        self.plan_commute_with_cancel(profile, delay_buffer_mins, weekday, &CancellationToken::new())
            .await
    }

    /// Dispatches the plan and prediction calls together and merges them.
    ///
    /// The plan call is mandatory: missing the deadline, failing, or being
    /// cancelled through `parent` ends the calculation. The prediction call is
    /// best effort and only ever contributes `ml_estimate_mins`. Both branches
    /// have settled by the time this returns.
    pub async fn plan_commute_with_cancel(
        &self,
        profile: &Profile,
        delay_buffer_mins: u32,
        weekday: WeekdayIndex,
        parent: &CancellationToken,
    ) -> Result<CommuteResult, CommuteError> {
        let plan_request = CommutePlanRequest {
            origin: profile.home.clone(),
            arrival_time: profile.arrival_time.clone(),
            delay_buffer_mins,
        };
        let predict_request = PredictRequest {
            time: profile.arrival_time.clone(),
            day_of_week: weekday,
        };

        let cancel = parent.child_token();
        let deadline = Instant::now() + self.deadline;
        info!(
            origin = %plan_request.origin,
            arrival_time = %plan_request.arrival_time,
            delay_buffer_mins,
            weekday = weekday.get(),
            "commute: dispatching plan and prediction"
        );

        let plan_branch = async {
            let outcome = guarded_call(
                PLAN_ENDPOINT,
                self.api.plan(&plan_request, &cancel),
                &cancel,
                deadline,
            )
            .await;
            if outcome.is_err() {
                // nothing left to enrich; release the prediction branch
                cancel.cancel();
            }
            outcome
        };

        let predict_branch = async {
            match guarded_call(
                PREDICT_ENDPOINT,
                self.api.predict(&predict_request, &cancel),
                &cancel,
                deadline,
            )
            .await
            {
                Ok(response) => response
                    .predicted_duration_mins
                    .filter(|minutes| minutes.is_finite()),
                Err(RemoteCallError::Cancelled { .. }) => {
                    debug!("commute: prediction abandoned");
                    None
                }
                Err(err) => {
                    warn!("commute: prediction unavailable, continuing without it: {err}");
                    None
                }
            }
        };

        let (plan, ml_estimate_mins) = tokio::join!(plan_branch, predict_branch);

        let plan = plan.map_err(|err| {
            let err = CommuteError::from_plan_failure(err, self.deadline);
            warn!("commute: plan failed: {err}");
            err
        })?;

        info!(
            recommendation = %plan.recommendation,
            has_train_route = plan.train_route.is_some(),
            ml_estimate_mins = ?ml_estimate_mins,
            "commute: plan ready"
        );

        Ok(CommuteResult {
            recommendation: plan.recommendation,
            train_route: plan.train_route,
            road_route: plan.road_route,
            ml_estimate_mins,
        })
    }
}

/// Runs one remote call until it finishes, `cancel` fires, or `deadline`
/// passes, whichever comes first.
async fn guarded_call<T>(
    endpoint: &'static str,
    call: impl Future<Output = Result<T, RemoteCallError>>,
    cancel: &CancellationToken,
    deadline: Instant,
) -> Result<T, RemoteCallError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RemoteCallError::Cancelled { endpoint }),
        _ = tokio::time::sleep_until(deadline) => Err(RemoteCallError::DeadlineExceeded { endpoint }),
        outcome = call => outcome,
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
