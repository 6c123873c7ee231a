use super::error::ErrorMessage;
use super::handlers;
use super::state::AppState;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(handlers::detailed_health))
        // Dashboard
        .route("/api/dashboard/stats", get(handlers::dashboard_stats))
        .route("/api/dashboard/refresh", post(handlers::refresh_dashboard))
        .route("/api/ai/insights", get(handlers::ai_insights))
        // Portfolio
        .route("/api/portfolio/allocations", get(handlers::portfolio_allocations))
        .route("/api/portfolio/performance", get(handlers::portfolio_performance))
        // ETF
        .route("/api/etf/opportunities", get(handlers::etf_opportunities))
        .route("/api/etf/universe", get(handlers::etf_universe))
        .route("/api/etf/analysis/:symbol", get(handlers::etf_analysis))
        // Background tasks
        .route("/api/tasks", get(handlers::list_tasks))
        .route(
            "/api/tasks/:task",
            get(handlers::task_status).post(handlers::enqueue_task),
        )
        .with_state(state);

    with_layers(routes)
}

/// Panic recovery, 500 logging, tracing and CORS around `routes`
fn with_layers(routes: Router) -> Router {
    routes
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(log_server_errors))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Log every 500 with the request that produced it
async fn log_server_errors(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
        let error = response
            .extensions()
            .get::<ErrorMessage>()
            .map(|m| m.0.as_str())
            .unwrap_or("unknown");
        tracing::error!(%method, %path, error, "Request failed");
    }

    response
}

const PANIC_ERROR: &str = "handler panicked";

/// 500 for a panicking handler; the panic text only reaches the log
fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        format!("{}: {}", PANIC_ERROR, s)
    } else if let Some(s) = err.downcast_ref::<&str>() {
        format!("{}: {}", PANIC_ERROR, s)
    } else {
        PANIC_ERROR.to_string()
    };

    let body = serde_json::json!({
        "detail": "Internal server error",
        "error": PANIC_ERROR,
    });

    let mut response = (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response();
    response.extensions_mut().insert(ErrorMessage(message));
    response
}

pub struct ApiServer {
    app: Router,
    addr: SocketAddr,
}

impl ApiServer {
    pub fn new(state: AppState) -> anyhow::Result<Self> {
        let addr: SocketAddr = state.settings.bind_address().parse()?;
        Ok(Self {
            app: router(state),
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!("API server listening on {}", self.addr);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await?;

        tracing::info!("API server stopped");
        Ok(())
    }
}
