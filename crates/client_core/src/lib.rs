use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::protocol::{
    CommutePlanRequest, CommutePlanResponse, HealthResponse, PredictRequest, PredictResponse,
    ServiceErrorBody,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

pub mod config;
pub mod delay_ledger;
pub mod orchestrator;
pub mod profile_store;
pub mod session;

pub use delay_ledger::{DelayLedger, DelayLedgerStore, LedgerError, LedgerPolicy, RoundingRule};
pub use orchestrator::{CommuteError, CommuteRequestOrchestrator};
pub use profile_store::{ProfileError, ProfileStore, StorageUnavailable};
pub use session::{
    Clock, CommuteSessionController, SessionError, SessionEvent, SessionPhase, SessionSnapshot,
    SystemClock,
};

pub const PLAN_ENDPOINT: &str = "/api/commute";
pub const PREDICT_ENDPOINT: &str = "/api/predict";
pub const HEALTH_ENDPOINT: &str = "/health";

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Failure of a single remote call. Which of these are fatal is decided by the
/// orchestrator, not here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteCallError {
    #[error("request to {endpoint} failed: {message}")]
    Network {
        endpoint: &'static str,
        message: String,
    },
    #[error("{endpoint} returned status {status}: {message}")]
    Status {
        endpoint: &'static str,
        status: u16,
        message: String,
    },
    #[error("{endpoint} reported an error: {message}")]
    Reported {
        endpoint: &'static str,
        message: String,
    },
    #[error("{endpoint} returned an unreadable body: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
    #[error("{endpoint} did not answer before the deadline")]
    DeadlineExceeded { endpoint: &'static str },
    #[error("request to {endpoint} was cancelled")]
    Cancelled { endpoint: &'static str },
}

/// The remote planning service. Implementations observe `cancel` before
/// dispatch and while waiting on the network.
#[async_trait]
pub trait CommuteApi: Send + Sync {
    async fn plan(
        &self,
        request: &CommutePlanRequest,
        cancel: &CancellationToken,
    ) -> Result<CommutePlanResponse, RemoteCallError>;

    async fn predict(
        &self,
        request: &PredictRequest,
        cancel: &CancellationToken,
    ) -> Result<PredictResponse, RemoteCallError>;

    async fn health(&self) -> Result<HealthResponse, RemoteCallError>;
}

pub struct HttpCommuteApi {
    http: Client,
    base_url: Url,
}

impl HttpCommuteApi {
    /// `request_timeout` bounds each individual request on top of any deadline
    /// the caller applies.
    pub fn new(server_url: &str, request_timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(server_url.trim())
            .with_context(|| format!("invalid commute server url '{server_url}'"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("commute server url '{server_url}' cannot be a base url"));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: &'static str) -> Result<Url, RemoteCallError> {
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|err| RemoteCallError::Network {
                endpoint,
                message: format!("invalid endpoint url: {err}"),
            })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<T, RemoteCallError> {
        if cancel.is_cancelled() {
            return Err(RemoteCallError::Cancelled { endpoint });
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(RemoteCallError::Cancelled { endpoint }),
            response = request.send() => response.map_err(|err| classify_reqwest_error(endpoint, err))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                _ = cancel.cancelled() => return Err(RemoteCallError::Cancelled { endpoint }),
                body = response.text() => body.unwrap_or_default(),
            };
            return Err(RemoteCallError::Status {
                endpoint,
                status: status.as_u16(),
                message: service_error_message(&body),
            });
        }

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(RemoteCallError::Cancelled { endpoint }),
            body = response.bytes() => body.map_err(|err| classify_reqwest_error(endpoint, err))?,
        };
        debug!(endpoint, bytes = body.len(), "commute api: response received");

        serde_json::from_slice(&body).map_err(|err| {
            // the planner also reports failures as `{"error": ...}` with a 200
            match serde_json::from_slice::<ServiceErrorBody>(&body) {
                Ok(reported) => RemoteCallError::Reported {
                    endpoint,
                    message: reported.error,
                },
                Err(_) => RemoteCallError::Decode {
                    endpoint,
                    message: err.to_string(),
                },
            }
        })
    }
}

#[async_trait]
impl CommuteApi for HttpCommuteApi {
    async fn plan(
        &self,
        request: &CommutePlanRequest,
        cancel: &CancellationToken,
    ) -> Result<CommutePlanResponse, RemoteCallError> {
        let url = self.endpoint_url(PLAN_ENDPOINT)?;
        self.execute(PLAN_ENDPOINT, self.http.post(url).json(request), cancel)
            .await
    }

    async fn predict(
        &self,
        request: &PredictRequest,
        cancel: &CancellationToken,
    ) -> Result<PredictResponse, RemoteCallError> {
        let url = self.endpoint_url(PREDICT_ENDPOINT)?;
        self.execute(PREDICT_ENDPOINT, self.http.post(url).json(request), cancel)
            .await
    }

    async fn health(&self) -> Result<HealthResponse, RemoteCallError> {
        let url = self.endpoint_url(HEALTH_ENDPOINT)?;
        self.execute(HEALTH_ENDPOINT, self.http.get(url), &CancellationToken::new())
            .await
    }
}

fn classify_reqwest_error(endpoint: &'static str, err: reqwest::Error) -> RemoteCallError {
    if err.is_timeout() {
        RemoteCallError::DeadlineExceeded { endpoint }
    } else if err.is_decode() {
        RemoteCallError::Decode {
            endpoint,
            message: err.to_string(),
        }
    } else {
        RemoteCallError::Network {
            endpoint,
            message: err.to_string(),
        }
    }
}

fn service_error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ServiceErrorBody>(body) {
        return parsed.error;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no error details".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
