use std::sync::Arc;
use std::time::Duration;

use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::routing::{get, post};
use axum::Router;
use clap::Args;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info_span, Span};

use persia_infer::directory::{DnsDirectory, EnvDirectory, MiddlewareDirectory, StaticDirectory};
use persia_infer::{
    DevicePreference, InferenceAdapter, PreprocessMode, ReadinessOptions, StartupContext,
};

use crate::server::routes::{default, predictions};
use crate::server::state::ServerState;

fn parse_device(s: &str) -> Result<DevicePreference, String> {
    s.parse::<DevicePreference>().map_err(|e| e.to_string())
}

#[derive(Debug, Args)]
pub struct RouterArgs {
    /// Local model folder or `org/name[:revision]` on the Hugging Face hub
    #[clap(short, long, env = "PERSIA_MODEL_REPO")]
    pub model_repo: String,

    /// `auto`, `cpu`, `cuda[:N]` or `metal[:N]`
    #[clap(short, long, default_value = "auto", value_parser = parse_device)]
    pub device: DevicePreference,

    /// Middleware address, `host:port`
    #[clap(long = "middleware-addr", env = "PERSIA_MIDDLEWARE_ADDRS", value_delimiter = ',')]
    pub middleware_addrs: Vec<String>,

    /// DNS name resolving to every middleware replica, takes precedence over addresses
    #[clap(long, env = "PERSIA_MIDDLEWARE_SERVICE")]
    pub middleware_service: Option<String>,

    #[clap(long, value_enum, default_value = "inference")]
    pub mode: PreprocessMode,

    /// Seconds to wait for the embedding tier before giving up
    #[clap(long, default_value = "600")]
    pub readiness_timeout: u64,

    #[clap(long, default_value = "5")]
    pub readiness_retry_interval: u64,

    /// Seconds per middleware call
    #[clap(long, default_value = "30")]
    pub rpc_timeout: u64,

    /// Seconds per HTTP request
    #[clap(long, default_value = "15")]
    pub request_timeout: u64,
}

impl RouterArgs {
    pub fn startup_context(&self) -> StartupContext {
        let mut context = StartupContext::new(self.model_repo.clone());
        context.device = self.device;
        context.mode = self.mode;
        context.readiness = ReadinessOptions {
            timeout: Duration::from_secs(self.readiness_timeout),
            retry_interval: Duration::from_secs(self.readiness_retry_interval),
        };
        context.rpc_timeout = Duration::from_secs(self.rpc_timeout);
        context
    }

    pub fn directory(&self) -> Box<dyn MiddlewareDirectory> {
        match &self.middleware_service {
            Some(service) => Box::new(DnsDirectory::new(service.clone())),
            None if !self.middleware_addrs.is_empty() => {
                Box::new(StaticDirectory::new(self.middleware_addrs.iter()))
            }
            None => Box::new(EnvDirectory::default()),
        }
    }
}

/// Bring the adapter up and hand it to the executor. Blocks until the embedding tier is ready.
pub async fn init_state(args: &RouterArgs) -> anyhow::Result<Arc<ServerState>> {
    let context = args.startup_context();
    let directory = args.directory();

    let adapter = InferenceAdapter::initialize(&context, directory.as_ref()).await?;
    tracing::info!("Adapter ready on {:?}", adapter.device());

    Ok(Arc::new(ServerState::new(adapter)?))
}

pub fn init_router(state: Arc<ServerState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/predictions", post(predictions::predict_raw))
        .route("/v1/predictions", post(predictions::predict_json))
        .route("/ping", get(default::ping))
        .route("/health", get(default::health_check))
        .with_state(state)
        .layer((
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    // Log the matched route's path (with placeholders not filled in).
                    let matched_path = request
                        .extensions()
                        .get::<MatchedPath>()
                        .map(MatchedPath::as_str);
                    tracing::debug!("{}", request.uri());

                    info_span!(
                        "http_request",
                        method = ?request.method(),
                        matched_path,
                    )
                })
                .on_response(|response: &Response<_>, latency: Duration, _span: &Span| {
                    tracing::debug!("{} in {} ms", response.status(), latency.as_millis());
                }),
            TimeoutLayer::new(request_timeout),
        ))
}
