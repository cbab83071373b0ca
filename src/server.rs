//! HTTP front end: `POST /split-image`.
//!
//! ## Request
//!
//! ```json
//! { "url": "uploads/tall.png", "images_prefix": "chapter",
//!   "width": 1500, "max_images": 0, "create_zip": true }
//! ```
//!
//! `url` is appended to the configured `storage.url_host`; only
//! `images_prefix` and `url` are required.
//!
//! ## Responses
//!
//! | Status | Body |
//! |---|---|
//! | 200 | `{"status":"success","message":…,"zipUrl":…,"images":[…]}` |
//! | 400 | `{"error":"Invalid JSON"}` or a validation message |
//! | 401 | `Unauthorized` (basic auth configured, credentials missing or wrong) |
//! | 405 | `{"error":"Method not allowed"}` |
//! | 500 | `{"error":"<pipeline error>"}` |
//!
//! ## Lifecycle
//!
//! Each split runs on the blocking pool. An [`InFlight`] counter tracks
//! running splits independently of their connections, so a client that
//! hangs up does not hide its run from shutdown. On SIGINT or SIGTERM the
//! listener stops accepting and shutdown waits for the counter to reach
//! zero, bounded by `server.shutdown_grace_secs`.

use crate::config::AppConfig;
use crate::imaging::SplitBackend;
use crate::process::{self, ProcessError, RunConfig, SplitRequest, source_url};
use crate::types::ProcessingResult;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server task failed: {0}")]
    Task(String),
}

// =============================================================================
// Shared state
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn SplitBackend>,
    run_config: Arc<RunConfig>,
    url_host: Arc<str>,
    auth: Option<Arc<AuthState>>,
    in_flight: Arc<InFlight>,
}

impl AppState {
    pub fn new(config: &AppConfig, backend: Arc<dyn SplitBackend>) -> Self {
        let auth = config
            .server
            .auth_enabled()
            .then(|| Arc::new(AuthState::new(&config.server.username, &config.server.password)));
        Self {
            backend,
            run_config: Arc::new(RunConfig::from_app_config(config)),
            url_host: Arc::from(config.storage.url_host.as_str()),
            auth,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    pub fn in_flight(&self) -> Arc<InFlight> {
        self.in_flight.clone()
    }
}

/// Basic auth credentials, kept only as SHA-256 digests.
pub struct AuthState {
    username_sha256: [u8; 32],
    password_sha256: [u8; 32],
}

fn sha256(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Compare two digests without a data-dependent branch in the source.
///
/// The optimizer may still short-circuit the fold. What an attacker could
/// time is then a prefix match of SHA-256 digests, which says nothing about
/// the plaintext credentials.
fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl AuthState {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username_sha256: sha256(username),
            password_sha256: sha256(password),
        }
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        // Both sides are always compared.
        let user_ok = digests_match(&sha256(username), &self.username_sha256);
        let pass_ok = digests_match(&sha256(password), &self.password_sha256);
        user_ok & pass_ok
    }
}

/// Decode an `Authorization: Basic …` header value into `(user, password)`.
pub fn parse_basic_credentials(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

// =============================================================================
// In-flight tracking
// =============================================================================

/// Counted-completion barrier for running splits.
#[derive(Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Keeps one run counted until dropped.
pub struct InFlightGuard(Arc<InFlight>);

impl InFlight {
    pub fn start(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }

    pub fn active(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolve once no run is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            let mut notified = std::pin::pin!(notified);
            // Register before reading the count so a drop in between is seen.
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// JSON body of `POST /split-image`.
///
/// Numeric fields are signed so negative values reach validation instead of
/// failing as malformed JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SplitImageRequest {
    pub url: String,
    pub images_prefix: String,
    pub width: i64,
    pub max_images: i64,
    pub create_zip: bool,
}

fn clamp_to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

impl SplitImageRequest {
    /// Validate and resolve against the trusted host.
    pub fn into_split_request(self, url_host: &str) -> Result<SplitRequest, ProcessError> {
        if self.url.is_empty() {
            return Err(ProcessError::Validation("URL is required".into()));
        }
        if self.max_images < 0 {
            return Err(ProcessError::Validation(
                "max_images must be a positive integer".into(),
            ));
        }
        if self.width < 0 {
            return Err(ProcessError::Validation(
                "width must not be negative".into(),
            ));
        }
        let request = SplitRequest {
            url: source_url(url_host, &self.url),
            prefix: self.images_prefix,
            max_width: clamp_to_u32(self.width),
            max_chunks: clamp_to_u32(self.max_images),
            create_archive: self.create_zip,
        };
        request.validate()?;
        Ok(request)
    }
}

/// JSON body of a successful split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitResponse {
    pub status: String,
    pub message: String,
    /// Archive path relative to the storage root, `""` without an archive.
    #[serde(rename = "zipUrl")]
    pub zip_url: String,
    pub images: Vec<String>,
}

impl From<ProcessingResult> for SplitResponse {
    fn from(result: ProcessingResult) -> Self {
        Self {
            status: result.status.to_string(),
            message: result.message,
            zip_url: result
                .archive
                .map(|a| a.relative_path)
                .unwrap_or_default(),
            images: result.chunks.into_iter().map(|c| c.relative_path).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// An error response with a JSON `{"error": …}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ProcessError> for ApiError {
    fn from(e: ProcessError) -> Self {
        let status = if e.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn split_image(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SplitResponse>, ApiError> {
    let payload: SplitImageRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "Invalid JSON"))?;
    let request = payload.into_split_request(&state.url_host)?;
    info!(url = %request.url, prefix = %request.prefix, "split request");

    // Counted before spawning; the guard moves into the blocking task and is
    // released only when the run ends, whatever happens to the connection.
    let guard = state.in_flight.start();
    let backend = state.backend.clone();
    let run_config = state.run_config.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        process::run(backend.as_ref(), &run_config, &request)
    })
    .await
    .map_err(|e| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("split task failed: {e}"),
        )
    })??;

    Ok(Json(SplitResponse::from(result)))
}

async fn method_not_allowed() -> ApiError {
    ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, r#"Basic realm="Restricted""#)],
        "Unauthorized",
    )
        .into_response()
}

async fn require_basic_auth(
    State(auth): State<Arc<AuthState>>,
    req: Request,
    next: Next,
) -> Response {
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic_credentials)
        .is_some_and(|(user, pass)| auth.verify(&user, &pass));

    if !authorized {
        warn!(path = %req.uri().path(), "unauthorized request");
        return unauthorized();
    }
    next.run(req).await
}

/// Build the service router. Basic auth wraps every method when configured.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new().route(
        "/split-image",
        post(split_image).fallback(method_not_allowed),
    );
    if let Some(auth) = state.auth.clone() {
        router = router.layer(from_fn_with_state(auth, require_basic_auth));
    }
    router.with_state(state)
}

// =============================================================================
// Serving
// =============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "SIGINT", "caught signal"),
        _ = terminate => info!(signal = "SIGTERM", "caught signal"),
    }
}

fn joined(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), ServeError> {
    result.map_err(|e| ServeError::Task(e.to_string()))??;
    Ok(())
}

/// Serve until `signal` resolves, then drain for at most `grace`.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: AppState,
    grace: Duration,
    signal: F,
) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let in_flight = state.in_flight();
    let stop = Arc::new(Notify::new());
    let trigger = stop.clone();

    let server = axum::serve(listener, build_router(state).into_make_service())
        .with_graceful_shutdown(async move {
            signal.await;
            trigger.notify_one();
        });
    let mut server = tokio::spawn(server.into_future());

    tokio::select! {
        result = &mut server => return joined(result),
        _ = stop.notified() => {}
    }

    info!(in_flight = in_flight.active(), "completing background tasks");
    let drain = async {
        let result = (&mut server).await;
        in_flight.wait_idle().await;
        result
    };
    match tokio::time::timeout(grace, drain).await {
        Ok(result) => joined(result)?,
        Err(_) => warn!(
            in_flight = in_flight.active(),
            grace_secs = grace.as_secs(),
            "grace period elapsed, exiting with runs still in flight"
        ),
    }
    Ok(())
}

/// Bind the configured address and serve until SIGINT or SIGTERM.
pub async fn serve(config: &AppConfig, backend: Arc<dyn SplitBackend>) -> Result<(), ServeError> {
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let state = AppState::new(config, backend);
    if state.auth.is_some() {
        info!("basic authentication enabled");
    } else {
        info!("basic authentication disabled");
    }
    info!(
        addr = %listener.local_addr()?,
        url_host = %config.storage.url_host,
        storage_root = %config.storage.root.display(),
        strategy = ?config.processing.strategy,
        "starting server"
    );

    serve_with_shutdown(listener, state, config.server.shutdown_grace(), shutdown_signal())
        .await?;

    info!(addr = %addr, version = env!("CARGO_PKG_VERSION"), "stopped server");
    Ok(())
}
