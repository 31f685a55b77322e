use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use console_bridge::intent::params_from_json;
use console_bridge::{
    BridgeError, Confirmation, ConsoleValue, ContainerHandle, ContainerSelector, ErrorKind,
    Intent, IntentOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(ready))
        .route("/metrics", get(metrics_handler))
        .route("/containers", get(list_containers))
        .route("/containers/:container/intents/:intent", post(run_intent))
        .route(
            "/containers/:container/intents/:intent/confirm",
            post(confirm_intent),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    uptime_secs: u64,
}

async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ok",
        uptime_secs: state.uptime_secs(),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        ApiError(err)
    }
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    message: String,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnknownIntent | ErrorKind::ContainerNotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidParams => StatusCode::BAD_REQUEST,
        ErrorKind::ExecSpawnFailed | ErrorKind::StreamError | ErrorKind::MalformedOutput => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::ConsoleError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        (
            status_for(kind),
            Json(ApiErrorBody {
                error: kind.as_str(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

fn finish<T>(route: &str, result: Result<T, BridgeError>) -> ApiResult<T> {
    match result {
        Ok(value) => {
            metrics::record_request(route, StatusCode::OK.as_u16());
            Ok(Json(value))
        }
        Err(err) => {
            metrics::record_request(route, status_for(err.kind()).as_u16());
            Err(ApiError(err))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContainerQuery {
    pub name: Option<String>,
}

async fn list_containers(
    State(state): State<AppState>,
    Query(query): Query<ContainerQuery>,
) -> ApiResult<Vec<ContainerHandle>> {
    let filter = query.name.as_deref().filter(|name| !name.is_empty());
    finish("containers", state.bridge().list_containers(filter).await)
}

#[derive(Debug, Default, Deserialize)]
pub struct IntentRequest {
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub options: IntentOptions,
}

#[derive(Debug, Serialize)]
pub struct IntentResponse {
    pub result: ConsoleValue,
}

async fn run_intent(
    State(state): State<AppState>,
    Path((container, intent)): Path<(String, String)>,
    Json(body): Json<IntentRequest>,
) -> ApiResult<IntentResponse> {
    let selector = ContainerSelector::parse(&container);
    let result = state
        .bridge()
        .run_intent(&intent, &selector, params_from_json(&body.params), body.options)
        .await
        .map(|result| IntentResponse { result });
    finish("intent", result)
}

async fn confirm_intent(
    State(state): State<AppState>,
    Path((container, intent)): Path<(String, String)>,
    Json(body): Json<IntentRequest>,
) -> ApiResult<Confirmation> {
    let selector = ContainerSelector::parse(&container);
    let result = match Intent::parse(&intent, params_from_json(&body.params)) {
        Ok(parsed) => {
            state
                .bridge()
                .submit_and_confirm(&parsed.with_options(body.options), &selector)
                .await
        }
        Err(err) => Err(err.into()),
    };
    finish("confirm", result)
}
