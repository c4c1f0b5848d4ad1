use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::api::requests::{CreateExpenseRequest, ListExpensesQuery};
use crate::api::responses::{
    ApiResponse, DeleteResponse, ErrorResponse, ExpenseListResponse, MessageResponse,
    SummaryResponse,
};
use crate::error::{AppError, Result};
use crate::idempotency::extract_key;
use crate::models::Expense;
use crate::observability::{AggregatedHealth, HealthStatus};

use super::routes::AppState;

/// Service banner.
pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse::new("Expense Tracker API").with_version())
}

/// Liveness check endpoint.
pub async fn health_check() -> Json<MessageResponse> {
    Json(MessageResponse::new("Server running").with_timestamp())
}

/// Detailed health check with dependency status.
pub async fn detailed_health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<AggregatedHealth>>) {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(ApiResponse::success(health)))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => AppError::NotFound("Metrics are disabled".to_string()).into_response(),
    }
}

/// Catch-all for unknown routes.
pub async fn not_found() -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Not found")))
}

// ============================================================================
// Expense Handlers
// ============================================================================

/// Create a new expense.
///
/// Duplicate submissions carrying the same `Idempotency-Key` never reach this
/// handler; the idempotency layer replays the first response instead.
pub async fn create_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<CreateExpenseRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Expense>>)> {
    let Json(request) = payload.map_err(|rejection| {
        AppError::validation(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let input = request.validate().map_err(AppError::Validation)?;
    let key = extract_key(&headers)?;

    let expense = state.expenses.create_expense(input, key.as_deref()).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(expense))))
}

/// List expenses with optional category filter and date sort.
pub async fn list_expenses(
    State(state): State<AppState>,
    Query(query): Query<ListExpensesQuery>,
) -> Result<Json<ExpenseListResponse>> {
    let filter = query.validate().map_err(AppError::Validation)?;
    let list = state.expenses.list_expenses(filter).await?;

    Ok(Json(ExpenseListResponse::from(list)))
}

/// Get an expense by ID.
pub async fn get_expense(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Expense>>> {
    let expense = state.expenses.get_expense(parse_expense_id(&id)?).await?;
    Ok(Json(ApiResponse::success(expense)))
}

/// Delete an expense by ID.
pub async fn delete_expense(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let expense = state.expenses.delete_expense(parse_expense_id(&id)?).await?;
    Ok(Json(DeleteResponse::new(expense)))
}

/// Totals grouped by category, largest first.
pub async fn expense_summary(State(state): State<AppState>) -> Result<Json<SummaryResponse>> {
    let report = state.expenses.summary_by_category().await?;
    Ok(Json(SummaryResponse::from(report)))
}

/// A malformed id can never match a stored expense.
fn parse_expense_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound("Expense not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_expense_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_expense_id(&id.to_string()).unwrap(), id);
        assert!(matches!(
            parse_expense_id("not-a-uuid"),
            Err(AppError::NotFound(_))
        ));
    }
}
