//! HTTP surface: router, shared state and server.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    response::Json,
    routing::{get, options},
    Router,
};
use secrecy::SecretString;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

use crate::session::SessionService;

pub mod cookie;
pub(crate) mod handlers;
mod openapi;

pub use cookie::CookieSigner;
pub use handlers::{
    auth::{LoginRequest, LoginResponse},
    error::ErrorResponse,
};
pub use openapi::openapi;

/// HTTP-side settings.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    frontend_base_url: String,
    cookie_secret: SecretString,
    trusted_proxy_headers: bool,
}

impl ApiConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, cookie_secret: SecretString) -> Self {
        Self {
            frontend_base_url,
            cookie_secret,
            trusted_proxy_headers: false,
        }
    }

    /// Read the client address from `X-Forwarded-For`/`X-Real-IP`. Enable only
    /// behind a proxy that overwrites those headers.
    #[must_use]
    pub fn with_trusted_proxy_headers(mut self, trusted: bool) -> Self {
        self.trusted_proxy_headers = trusted;
        self
    }

    #[must_use]
    pub fn trusted_proxy_headers(&self) -> bool {
        self.trusted_proxy_headers
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn cookie_secret(&self) -> &SecretString {
        &self.cookie_secret
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        Url::parse(&self.frontend_base_url).is_ok_and(|url| url.scheme() == "https")
    }
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    sessions: SessionService,
    cookies: CookieSigner,
    trusted_proxy_headers: bool,
}

impl AppState {
    /// # Errors
    /// Return error if the cookie secret is unusable
    pub fn new(sessions: SessionService, config: &ApiConfig) -> Result<Self> {
        let cookies = CookieSigner::new(config.cookie_secret(), config.cookie_secure())
            .map_err(|err| anyhow!("Invalid cookie secret: {err}"))?;
        Ok(Self {
            sessions,
            cookies,
            trusted_proxy_headers: config.trusted_proxy_headers(),
        })
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    #[must_use]
    pub fn cookies(&self) -> &CookieSigner {
        &self.cookies
    }

    #[must_use]
    pub fn trusts_proxy_headers(&self) -> bool {
        self.trusted_proxy_headers
    }
}

/// Build the application router with every documented route, `/openapi.json`
/// and the request-id/trace layers. CORS is added by [`new`].
pub fn router(state: Arc<AppState>) -> Router {
    let (router, openapi) = openapi::router_and_document();
    router
        .route("/health", options(handlers::health::health))
        .route(
            "/openapi.json",
            get(move || {
                let openapi = openapi.clone();
                async move { Json(openapi) }
            }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, state: Arc<AppState>, config: &ApiConfig) -> Result<()> {
    let frontend_origin = frontend_origin(config.frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = router(state).layer(cors);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
