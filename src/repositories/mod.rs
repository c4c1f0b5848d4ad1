pub mod expense_repository;
pub mod memory_repository;

pub use expense_repository::PostgresExpenseRepository;
pub use memory_repository::InMemoryExpenseRepository;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{CategorySummary, Expense, ExpenseFilter};

/// Storage operations over expense records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    /// Persists a new expense and returns the stored record.
    async fn create(&self, expense: &Expense) -> Result<Expense>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Expense>>;

    /// Lists expenses matching the filter, in the filter's date order.
    async fn list(&self, filter: &ExpenseFilter) -> Result<Vec<Expense>>;

    /// Deletes an expense, returning it if it existed.
    async fn delete(&self, id: Uuid) -> Result<Option<Expense>>;

    /// Totals grouped by category, largest total first.
    async fn summarize_by_category(&self) -> Result<Vec<CategorySummary>>;

    /// Connectivity check used by health endpoints.
    async fn ping(&self) -> Result<()>;
}
