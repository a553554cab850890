//! Scripted planning service and in-memory store shared by the client tests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::json;
use shared::{
    domain::{Recommendation, RouteLegSet},
    protocol::{
        CommutePlanRequest, CommutePlanResponse, HealthResponse, PredictRequest, PredictResponse,
    },
};
use storage::KeyValueStore;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{CommuteApi, RemoteCallError, PLAN_ENDPOINT, PREDICT_ENDPOINT};

pub(crate) fn road_only_plan() -> CommutePlanResponse {
    CommutePlanResponse {
        recommendation: Recommendation::Road,
        train_route: None,
        road_route: RouteLegSet {
            leave_at: "08:10".into(),
            total_duration_mins: 45,
            mode: None,
            delay_buffer_mins: None,
            details: json!({ "summary": "Drive via highway" }),
        },
    }
}

pub(crate) fn train_plan() -> CommutePlanResponse {
    CommutePlanResponse {
        recommendation: Recommendation::Train,
        train_route: Some(RouteLegSet {
            leave_at: "07:55".into(),
            total_duration_mins: 65,
            mode: Some("Hybrid (Road + Train)".into()),
            delay_buffer_mins: Some(9),
            details: json!({
                "leg1_road": "Home → Thane Station (12 mins)",
                "leg2_train": "Slow train Thane → Vidyavihar (08:07 – 08:40)",
                "leg3_walk": "Vidyavihar Station → KJSCE gate (8 mins)",
            }),
        }),
        road_route: RouteLegSet {
            leave_at: "07:40".into(),
            total_duration_mins: 80,
            mode: Some("Road Only".into()),
            delay_buffer_mins: None,
            details: json!({ "summary": "Drive directly (24 km)" }),
        },
    }
}

/// One scripted answer: wait `delay`, then return `outcome`.
#[derive(Clone)]
pub(crate) struct Scripted<T> {
    pub delay: Duration,
    pub outcome: Result<T, RemoteCallError>,
}

impl<T> Scripted<T> {
    pub fn ok_after(delay: Duration, value: T) -> Self {
        Self {
            delay,
            outcome: Ok(value),
        }
    }

    pub fn err_after(delay: Duration, err: RemoteCallError) -> Self {
        Self {
            delay,
            outcome: Err(err),
        }
    }
}

pub(crate) fn network_error(endpoint: &'static str) -> RemoteCallError {
    RemoteCallError::Network {
        endpoint,
        message: "connection refused".into(),
    }
}

pub(crate) struct FakeCommuteApi {
    plan: Scripted<CommutePlanResponse>,
    predict: Scripted<PredictResponse>,
    pub plan_requests: Arc<Mutex<Vec<CommutePlanRequest>>>,
    pub predict_requests: Arc<Mutex<Vec<PredictRequest>>>,
}

impl FakeCommuteApi {
    pub fn new(plan: Scripted<CommutePlanResponse>, predict: Scripted<PredictResponse>) -> Self {
        Self {
            plan,
            predict,
            plan_requests: Arc::new(Mutex::new(Vec::new())),
            predict_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn instant(plan: CommutePlanResponse, predicted: Option<f64>) -> Self {
        Self::new(
            Scripted::ok_after(Duration::ZERO, plan),
            Scripted::ok_after(
                Duration::ZERO,
                PredictResponse {
                    predicted_duration_mins: predicted,
                },
            ),
        )
    }

    async fn play<T: Clone>(
        &self,
        endpoint: &'static str,
        script: &Scripted<T>,
        cancel: &CancellationToken,
    ) -> Result<T, RemoteCallError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(RemoteCallError::Cancelled { endpoint }),
            _ = tokio::time::sleep(script.delay) => script.outcome.clone(),
        }
    }
}

#[async_trait]
impl CommuteApi for FakeCommuteApi {
    async fn plan(
        &self,
        request: &CommutePlanRequest,
        cancel: &CancellationToken,
    ) -> Result<CommutePlanResponse, RemoteCallError> {
        self.plan_requests.lock().await.push(request.clone());
        self.play(PLAN_ENDPOINT, &self.plan, cancel).await
    }

    async fn predict(
        &self,
        request: &PredictRequest,
        cancel: &CancellationToken,
    ) -> Result<PredictResponse, RemoteCallError> {
        self.predict_requests.lock().await.push(request.clone());
        self.play(PREDICT_ENDPOINT, &self.predict, cancel).await
    }

    async fn health(&self) -> Result<HealthResponse, RemoteCallError> {
        Ok(HealthResponse {
            status: "healthy".into(),
            service: Some("fake planner".into()),
        })
    }
}

/// Key/value store kept in memory. Never touches real I/O, so it is safe to
/// use under a paused tokio clock.
#[derive(Default)]
pub(crate) struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
