//! HTTP handlers for admission checks and administration.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::error::RatekeeperError;
use crate::policy::{HeaderRule, PolicyEvaluator, PolicyRuleSpec};
use crate::ratelimit::{LimiterSpec, RateLimiter, Snapshot};

/// Header carrying the client identifier.
pub const CLIENT_ID_HEADER: &str = "X-Client-ID";
/// Client identifier used when the header is missing.
pub const ANONYMOUS_CLIENT: &str = "anonymous";
/// Route checked when the request does not name one.
pub const DEFAULT_ROUTE: &str = "/check";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub policies: Arc<PolicyEvaluator>,
}

/// Query parameters of a check request.
#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    pub route: Option<String>,
}

/// Body returned by the check endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Body of a limits-only update.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsUpdate {
    pub name: String,
    pub limit: u64,
    /// Window in seconds
    pub window: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// An error rendered as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl From<RatekeeperError> for ApiError {
    fn from(err: RatekeeperError) -> Self {
        let status = match err {
            RatekeeperError::UnsupportedAlgorithm(_) | RatekeeperError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// JSON request body whose rejection is rendered as an [`ApiError`].
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                warn!(error = %rejection.body_text(), "Rejected request body");
                Err(ApiError {
                    status: StatusCode::BAD_REQUEST,
                    message: "invalid request body".to_string(),
                })
            }
        }
    }
}

/// Run the policy gate and then the route's limiter for one request.
#[instrument(skip_all, fields(route = query.route.as_deref().unwrap_or(DEFAULT_ROUTE)))]
pub async fn check(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
    headers: HeaderMap,
) -> (StatusCode, Json<CheckResponse>) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let client = header(CLIENT_ID_HEADER)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string());
    let route = query.route.as_deref().unwrap_or(DEFAULT_ROUTE);

    let policy = state.policies.evaluate(route, header);
    if !policy.allowed {
        return (
            StatusCode::FORBIDDEN,
            Json(CheckResponse {
                allowed: false,
                remaining: None,
                reset_at: None,
                reason: policy.reason,
            }),
        );
    }

    match state.limiter.check(route, &client, Utc::now()) {
        None => (
            StatusCode::OK,
            Json(CheckResponse {
                allowed: true,
                remaining: None,
                reset_at: None,
                reason: Some("no limiter configured for this route".to_string()),
            }),
        ),
        Some(decision) if decision.allowed => (
            StatusCode::OK,
            Json(CheckResponse {
                allowed: true,
                remaining: Some(decision.remaining),
                reset_at: Some(decision.reset_at),
                reason: None,
            }),
        ),
        Some(decision) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(CheckResponse {
                allowed: false,
                remaining: Some(decision.remaining),
                reset_at: Some(decision.reset_at),
                reason: Some("rate limit exceeded".to_string()),
            }),
        ),
    }
}

/// Create or replace a limiter.
pub async fn configure_limiter(
    State(state): State<AppState>,
    ApiJson(spec): ApiJson<LimiterSpec>,
) -> Result<Json<MessageResponse>, ApiError> {
    if spec.name.is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            message: "limiter name is required".to_string(),
        });
    }

    state.limiter.configure_spec(&spec)?;
    Ok(Json(MessageResponse {
        message: "limiter added/updated successfully".to_string(),
    }))
}

/// Change only the limit and window of an existing limiter.
pub async fn update_limiter(
    State(state): State<AppState>,
    ApiJson(update): ApiJson<LimitsUpdate>,
) -> Result<Json<MessageResponse>, ApiError> {
    let updated = state
        .limiter
        .update_limits(&update.name, update.limit, Duration::from_secs(update.window))?;

    if !updated {
        warn!(route = %update.name, "Limits update for unknown limiter");
        return Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("no limiter configured for {}", update.name),
        });
    }
    Ok(Json(MessageResponse {
        message: "limiter updated successfully".to_string(),
    }))
}

/// List configured limiter names.
pub async fn list_limiters(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.limiter.routes())
}

/// Append policy rules.
pub async fn add_policies(
    State(state): State<AppState>,
    ApiJson(rules): ApiJson<Vec<PolicyRuleSpec>>,
) -> Json<MessageResponse> {
    for rule in &rules {
        state.policies.add_rule(&rule.route, HeaderRule::from(rule));
    }
    info!(count = rules.len(), "Added policy rules");
    Json(MessageResponse {
        message: "policies added/updated successfully".to_string(),
    })
}

/// Replace the rules of every route named in the request.
pub async fn replace_policies(
    State(state): State<AppState>,
    ApiJson(rules): ApiJson<Vec<PolicyRuleSpec>>,
) -> Json<MessageResponse> {
    let mut replaced = HashSet::new();
    for rule in &rules {
        if replaced.insert(rule.route.as_str()) {
            state.policies.set_rule(&rule.route, HeaderRule::from(rule));
        } else {
            state.policies.add_rule(&rule.route, HeaderRule::from(rule));
        }
    }
    info!(routes = replaced.len(), "Replaced policy rules");
    Json(MessageResponse {
        message: "policies replaced successfully".to_string(),
    })
}

/// Dump live limiter state.
pub async fn snapshot(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.limiter.snapshot())
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}
