use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;
use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;

use crate::config::{RuntimeConfig, DEFAULT_AGENT_DESCRIPTION, DEFAULT_AGENT_NAME};
use crate::framing::FramingMode;
use crate::gateway::{
    AgentGateway, MockGateway, OpenAiConfig, OpenAiGateway, DEFAULT_MODEL,
    DEFAULT_OPENAI_BASE_URL,
};
use crate::router::{build_router, ApiDoc, AppState};
use crate::sequencer::SequencerOptions;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3006;

#[derive(Parser, Debug)]
#[command(name = "copilot-runtime", bin_name = "copilot-runtime")]
#[command(about = "Incremental-delivery runtime for CopilotKit chat agents", version)]
#[command(arg_required_else_help = true)]
pub struct CopilotRuntimeCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the streaming HTTP server.
    Server(ServerArgs),
    /// Print the OpenAPI document as JSON.
    Openapi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GatewayKind {
    /// Echo agent, no network access.
    Mock,
    /// OpenAI-compatible chat completions.
    Openai,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long, short = 'H', default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long = "cors-allow-origin", short = 'O')]
    cors_allow_origin: Vec<String>,

    #[arg(long = "cors-allow-method", short = 'M')]
    cors_allow_method: Vec<String>,

    #[arg(long = "cors-allow-header", short = 'A')]
    cors_allow_header: Vec<String>,

    #[arg(long = "cors-allow-credentials", short = 'C')]
    cors_allow_credentials: bool,

    /// Framing used when the Accept header does not pick one.
    #[arg(long, value_enum, default_value_t = FramingMode::Multipart)]
    framing: FramingMode,

    #[arg(long, value_enum, default_value_t = GatewayKind::Openai)]
    gateway: GatewayKind,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long = "openai-base-url", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    #[arg(long = "agent-name", default_value = DEFAULT_AGENT_NAME)]
    agent_name: String,

    #[arg(long = "agent-description", default_value = DEFAULT_AGENT_DESCRIPTION)]
    agent_description: String,

    /// Pause between content patches, in milliseconds.
    #[arg(long = "token-delay-ms", default_value_t = 0)]
    token_delay_ms: u64,

    /// Send every token of a delta in one envelope.
    #[arg(long = "batch-tokens")]
    batch_tokens: bool,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid cors origin: {0}")]
    InvalidCorsOrigin(String),
    #[error("invalid cors method: {0}")]
    InvalidCorsMethod(String),
    #[error("invalid cors header: {0}")]
    InvalidCorsHeader(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(String),
}

pub fn run_copilot_runtime() -> Result<(), CliError> {
    let cli = CopilotRuntimeCli::parse();
    if let Err(err) = init_logging() {
        eprintln!("failed to init logging: {err}");
        return Err(err);
    }
    run_command(&cli.command)
}

pub fn init_logging() -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|err| CliError::Server(err.to_string()))
}

pub fn run_command(command: &Command) -> Result<(), CliError> {
    match command {
        Command::Server(args) => run_server(args),
        Command::Openapi => print_openapi(),
    }
}

fn run_server(server: &ServerArgs) -> Result<(), CliError> {
    let state = AppState::new(runtime_config(server), build_gateway(server));
    let gateway_name = state.gateway.name();
    let framing = state.config.framing;
    let router = build_router(state).layer(build_cors_layer(server)?);

    let addr = format!("{}:{}", server.host, server.port);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Server(err.to_string()))?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, gateway = gateway_name, framing = %framing, "server listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutting down");
            })
            .await
            .map_err(|err| CliError::Server(err.to_string()))
    })
}

fn runtime_config(server: &ServerArgs) -> RuntimeConfig {
    RuntimeConfig {
        agent_name: server.agent_name.clone(),
        agent_description: server.agent_description.clone(),
        framing: server.framing,
        sequencer: SequencerOptions {
            batch_tokens: server.batch_tokens,
        },
        token_delay: Duration::from_millis(server.token_delay_ms),
        ..RuntimeConfig::default()
    }
}

fn build_gateway(server: &ServerArgs) -> Arc<dyn AgentGateway> {
    match server.gateway {
        GatewayKind::Mock => Arc::new(MockGateway::default()),
        GatewayKind::Openai => {
            let config = OpenAiConfig::from_env(&server.openai_base_url, &server.model);
            if config.api_key.is_none() {
                tracing::warn!("OPENAI_API_KEY is not set; runs will fail until it is");
            }
            Arc::new(OpenAiGateway::new(config))
        }
    }
}

fn print_openapi() -> Result<(), CliError> {
    let doc = ApiDoc::openapi().to_pretty_json()?;
    let mut out = std::io::stdout();
    writeln!(out, "{doc}")?;
    out.flush()?;
    Ok(())
}

/// Request headers a browser client needs for the streaming endpoint: the
/// JSON body type, and `Accept`, which selects the framing.
const STREAMING_REQUEST_HEADERS: [HeaderName; 2] = [header::ACCEPT, header::CONTENT_TYPE];

fn build_cors_layer(server: &ServerArgs) -> Result<CorsLayer, CliError> {
    let origins = server
        .cors_allow_origin
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .map_err(|_| CliError::InvalidCorsOrigin(origin.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let methods = server
        .cors_allow_method
        .iter()
        .map(|method| {
            method
                .parse::<Method>()
                .map_err(|_| CliError::InvalidCorsMethod(method.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut headers = server
        .cors_allow_header
        .iter()
        .map(|name| {
            name.parse::<HeaderName>()
                .map_err(|_| CliError::InvalidCorsHeader(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let credentials = server.cors_allow_credentials;

    let mut cors = CorsLayer::new().expose_headers([header::CONTENT_TYPE]);
    cors = if origins.is_empty() {
        cors.allow_origin(AllowOrigin::predicate(|_, _| false))
    } else {
        cors.allow_origin(origins)
    };

    // Wildcards are rejected alongside credentials, so mirror the preflight.
    cors = match (methods.is_empty(), credentials) {
        (true, false) => cors.allow_methods(Any),
        (true, true) => cors.allow_methods(AllowMethods::mirror_request()),
        (false, _) => cors.allow_methods(methods),
    };
    cors = match (headers.is_empty(), credentials) {
        (true, false) => cors.allow_headers(Any),
        (true, true) => cors.allow_headers(AllowHeaders::mirror_request()),
        (false, _) => {
            for required in STREAMING_REQUEST_HEADERS {
                if !headers.contains(&required) {
                    headers.push(required);
                }
            }
            cors.allow_headers(headers)
        }
    };
    if credentials {
        cors = cors.allow_credentials(true);
    }

    tracing::info!(
        origins = ?server.cors_allow_origin,
        methods = ?server.cors_allow_method,
        headers = ?server.cors_allow_header,
        credentials,
        "cors policy"
    );
    Ok(cors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_args(args: &[&str]) -> ServerArgs {
        let cli = CopilotRuntimeCli::try_parse_from(
            ["copilot-runtime", "server"].iter().chain(args.iter()),
        )
        .expect("parse");
        match cli.command {
            Command::Server(args) => args,
            Command::Openapi => panic!("expected server command"),
        }
    }

    #[test]
    fn server_defaults() {
        let args = server_args(&[]);
        assert_eq!(args.port, 3006);
        assert_eq!(args.framing, FramingMode::Multipart);
        assert_eq!(args.gateway, GatewayKind::Openai);
        assert_eq!(args.model, "gpt-4o");

        let config = runtime_config(&args);
        assert_eq!(config.agent_name, "agentic_chat");
        assert_eq!(config.token_delay, Duration::ZERO);
        assert!(!config.sequencer.batch_tokens);
    }

    #[test]
    fn server_flags_flow_into_config() {
        let args = server_args(&[
            "--framing",
            "sse",
            "--gateway",
            "mock",
            "--token-delay-ms",
            "25",
            "--batch-tokens",
        ]);
        let config = runtime_config(&args);
        assert_eq!(config.framing, FramingMode::EventStream);
        assert_eq!(config.token_delay, Duration::from_millis(25));
        assert!(config.sequencer.batch_tokens);
        assert_eq!(build_gateway(&args).name(), "mock");
    }

    async fn preflight(args: &[&str], request_headers: &str) -> axum::http::HeaderMap {
        use axum::body::Body;
        use axum::http::Request;
        use axum::routing::post;
        use tower::ServiceExt;

        let layer = build_cors_layer(&server_args(args)).expect("cors layer");
        let app = axum::Router::new()
            .route("/copilotkit", post(|| async {}))
            .layer(layer);
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/copilotkit")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, request_headers)
            .body(Body::empty())
            .expect("request");
        app.oneshot(request).await.expect("response").headers().clone()
    }

    #[tokio::test]
    async fn explicit_header_list_keeps_framing_headers() {
        let headers = preflight(
            &["-O", "http://localhost:3000", "-A", "authorization"],
            "accept,content-type",
        )
        .await;
        let allowed = headers
            .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
            .and_then(|value| value.to_str().ok())
            .expect("allow headers")
            .to_ascii_lowercase();
        assert!(allowed.contains("authorization"));
        assert!(allowed.contains("accept"));
        assert!(allowed.contains("content-type"));
    }

    #[tokio::test]
    async fn credentials_mirror_the_preflight_request() {
        let headers = preflight(&["-O", "http://localhost:3000", "-C"], "accept,x-trace").await;
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS),
            Some(&HeaderValue::from_static("true"))
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_HEADERS),
            Some(&HeaderValue::from_static("accept,x-trace"))
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("http://localhost:3000"))
        );
    }

    #[test]
    fn invalid_cors_origin_is_rejected() {
        let args = server_args(&["--cors-allow-origin", "bad\norigin"]);
        assert!(matches!(
            build_cors_layer(&args),
            Err(CliError::InvalidCorsOrigin(_))
        ));
    }
}
