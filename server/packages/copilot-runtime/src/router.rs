use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use copilot_runtime_error::{ErrorType, ProblemDetails, RuntimeError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::{Modify, OpenApi, ToSchema};
use uuid::Uuid;

use crate::config::{RuntimeConfig, AGENT_TYPE};
use crate::envelope::EnvelopeBuilder;
use crate::failure::{EnvelopeStream, FailureTranslator};
use crate::framing::{self, FramingMode};
use crate::gateway::{AgentGateway, GatewayRequest};
use crate::request::{
    self, ActionInput, AgentSessionInput, FrontendInput, GenerateCopilotResponseRequest,
    GenerateData, GenerateVariables, InboundRequest, MessageInput, RequestError, Role,
    TextMessageInput,
};
use crate::sequencer::{PatchSequencer, SequencerContext};

mod types;

pub use types::*;

const HEALTH_MESSAGE: &str = "Copilot runtime is running";

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: RuntimeConfig,
    pub gateway: Arc<dyn AgentGateway>,
}

impl AppState {
    pub fn new(config: RuntimeConfig, gateway: Arc<dyn AgentGateway>) -> Self {
        Self { config, gateway }
    }
}

pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);
    let copilotkit = get(get_info).post(post_copilotkit);

    let mut router = Router::new()
        .route("/health", get(get_health))
        .route("/copilotkit", copilotkit.clone())
        .route("/copilotkit/", copilotkit)
        .route("/copilotkit/langgraph", post(post_copilotkit))
        .with_state(shared);

    let http_logging = match std::env::var("COPILOT_RUNTIME_LOG_HTTP") {
        Ok(value) if value == "0" || value.eq_ignore_ascii_case("false") => false,
        _ => true,
    };
    if http_logging {
        let include_headers = std::env::var("COPILOT_RUNTIME_LOG_HTTP_HEADERS").is_ok();
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(move |req: &Request<_>| {
                if include_headers {
                    let headers: Vec<(String, String)> = req
                        .headers()
                        .iter()
                        .map(|(name, value)| {
                            let display_value = if *name == header::AUTHORIZATION {
                                "<redacted>".to_string()
                            } else {
                                value.to_str().unwrap_or("<binary>").to_string()
                            };
                            (name.as_str().to_string(), display_value)
                        })
                        .collect();
                    tracing::info_span!(
                        "http.request",
                        method = %req.method(),
                        uri = %req.uri(),
                        headers = ?headers
                    )
                } else {
                    tracing::info_span!(
                        "http.request",
                        method = %req.method(),
                        uri = %req.uri()
                    )
                }
            })
            .on_request(|_req: &Request<_>, span: &Span| {
                tracing::info!(parent: span, "request");
            })
            .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                tracing::info!(
                    parent: span,
                    status = %res.status(),
                    latency_ms = latency.as_millis()
                );
            });
        router = router.layer(trace_layer);
    }

    router
}

#[derive(OpenApi)]
#[openapi(
    paths(get_health, get_info, post_copilotkit),
    components(
        schemas(
            HealthResponse,
            InfoResponse,
            AgentInfo,
            GenerateCopilotResponseRequest,
            GenerateVariables,
            GenerateData,
            FrontendInput,
            AgentSessionInput,
            MessageInput,
            TextMessageInput,
            ActionInput,
            Role,
            ProblemDetails,
            ErrorType
        )
    ),
    tags(
        (name = "meta", description = "Service metadata"),
        (name = "copilotkit", description = "Streaming agent runs")
    ),
    modifiers(&ServerAddon)
)]
pub struct ApiDoc;

struct ServerAddon;

impl Modify for ServerAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.servers = Some(vec![utoipa::openapi::Server::new("http://localhost:3006")]);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl From<RequestError> for ApiError {
    fn from(value: RequestError) -> Self {
        Self::Runtime(value.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem: ProblemDetails = match &self {
            ApiError::Runtime(err) => err.to_problem_details(),
        };
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, body = HealthResponse)),
    tag = "meta"
)]
async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: HEALTH_MESSAGE.to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/copilotkit",
    responses((status = 200, body = InfoResponse)),
    tag = "copilotkit"
)]
async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse::from_config(&state.config))
}

#[utoipa::path(
    post,
    path = "/copilotkit",
    request_body = GenerateCopilotResponseRequest,
    responses(
        (status = 200, description = "Incremental response stream, or the info object for other operations"),
        (status = 400, body = ProblemDetails),
        (status = 500, body = ProblemDetails)
    ),
    tag = "copilotkit"
)]
async fn post_copilotkit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let model = match request::parse(&body)? {
        InboundRequest::Info => {
            return Ok(Json(InfoResponse::from_config(&state.config)).into_response());
        }
        InboundRequest::Generate(model) => model,
    };

    let framing = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .and_then(FramingMode::from_accept)
        .unwrap_or(state.config.framing);
    let run_id = model
        .run_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let agent_name = model
        .agent_name
        .clone()
        .unwrap_or_else(|| state.config.agent_name.clone());

    tracing::info!(
        thread_id = %model.thread_id,
        run_id = %run_id,
        framing = %framing,
        gateway = state.gateway.name(),
        messages = model.messages.len(),
        tools = model.tools.len(),
        "starting run"
    );

    let events = state
        .gateway
        .invoke(GatewayRequest::from_model(&model, run_id.clone()));
    let sequencer = PatchSequencer::new(
        SequencerContext::from_model(&model, run_id, agent_name),
        state.config.sequencer,
    );
    let builder = EnvelopeBuilder::new(model.thread_id.to_string(), model.run_id.clone());
    let envelopes = FailureTranslator::new(events, sequencer, builder)
        .with_token_delay(state.config.token_delay)
        .into_stream();

    stream_response(framing, envelopes)
}

fn stream_response(mode: FramingMode, envelopes: EnvelopeStream) -> Result<Response, ApiError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static(mode.content_type()),
        )
        .header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
        .header(header::CONNECTION, HeaderValue::from_static("keep-alive"))
        .header("x-accel-buffering", HeaderValue::from_static("no"))
        .body(Body::from_stream(framing::frame(mode, envelopes)))
        .map_err(|err| {
            RuntimeError::Internal {
                message: err.to_string(),
            }
            .into()
        })
}
