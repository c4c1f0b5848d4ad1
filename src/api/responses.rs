use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{CategorySummary, Expense};
use crate::services::{CategoryReport, ExpenseList};

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            details: None,
        }
    }

    pub fn validation(details: Vec<String>) -> Self {
        Self {
            success: false,
            error: "Validation Error".to_string(),
            details: Some(details),
        }
    }
}

/// Expense listing with the count and total of the returned rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseListResponse {
    pub success: bool,
    pub count: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub data: Vec<Expense>,
}

impl From<ExpenseList> for ExpenseListResponse {
    fn from(list: ExpenseList) -> Self {
        Self {
            success: true,
            count: list.count,
            total: list.total,
            data: list.data,
        }
    }
}

/// Per-category totals plus the grand total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub success: bool,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub data: Vec<CategorySummary>,
}

impl From<CategoryReport> for SummaryResponse {
    fn from(report: CategoryReport) -> Self {
        Self {
            success: true,
            total: report.total,
            data: report.data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
    pub data: Expense,
}

impl DeleteResponse {
    pub fn new(expense: Expense) -> Self {
        Self {
            success: true,
            message: "Expense deleted successfully".to_string(),
            data: expense,
        }
    }
}

/// Liveness and banner response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            version: None,
            timestamp: None,
        }
    }

    pub fn with_version(mut self) -> Self {
        self.version = Some(env!("CARGO_PKG_VERSION").to_string());
        self
    }

    pub fn with_timestamp(mut self) -> Self {
        self.timestamp = Some(Utc::now());
        self
    }
}
