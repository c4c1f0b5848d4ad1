use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::idempotency::{idempotency_layer, IdempotencyCache};
use crate::observability::{get_metrics, HealthChecker, LatencyTimer};
use crate::repositories::ExpenseRepository;
use crate::services::ExpenseService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub expenses: ExpenseService,
    pub idempotency: Arc<IdempotencyCache>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(repo: Arc<dyn ExpenseRepository>, idempotency: Arc<IdempotencyCache>) -> Self {
        let expenses = ExpenseService::new(repo);
        let health_checker = Arc::new(HealthChecker::new(
            expenses.clone(),
            Arc::clone(&idempotency),
        ));

        Self {
            expenses,
            idempotency,
            health_checker,
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Creates the main router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(handlers::detailed_health_check))
        .route("/health/ready", get(handlers::readiness_check))
        // Expense endpoints
        .route(
            "/expenses",
            get(handlers::list_expenses).post(handlers::create_expense),
        )
        .route(
            "/expenses/summary/by-category",
            get(handlers::expense_summary),
        )
        .route(
            "/expenses/:id",
            get(handlers::get_expense).delete(handlers::delete_expense),
        );

    Router::new()
        .route("/", get(handlers::root))
        .route("/metrics", get(handlers::metrics_endpoint))
        .nest("/api", api)
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.idempotency),
            idempotency_layer,
        ))
        .layer(middleware::from_fn(track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Records request count and latency, labelled by route template.
async fn track_http_metrics(request: Request, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    get_metrics().record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        timer.elapsed_ms(),
    );
    response
}
