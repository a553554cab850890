use serde::{Deserialize, Serialize};

use crate::domain::{Recommendation, RouteLegSet, WeekdayIndex};

/// Body of `POST /api/commute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommutePlanRequest {
    pub origin: String,
    pub arrival_time: String,
    pub delay_buffer_mins: u32,
}

/// Response of `POST /api/commute`. `train_route` is null when no train
/// reaches the destination in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommutePlanResponse {
    pub recommendation: Recommendation,
    #[serde(default)]
    pub train_route: Option<RouteLegSet>,
    pub road_route: RouteLegSet,
}

/// Body of `POST /api/predict`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictRequest {
    pub time: String,
    pub day_of_week: WeekdayIndex,
}

/// Response of `POST /api/predict`. The service answers null when its model
/// is not loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub predicted_duration_mins: Option<f64>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
}

/// Error body the planning service sends with non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceErrorBody {
    pub error: String,
}
