use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{CategorySummary, Expense, ExpenseFilter, NewExpense};
use crate::observability::{get_metrics, LatencyTimer};
use crate::repositories::ExpenseRepository;

const NOT_FOUND: &str = "Expense not found";

/// Filtered expense listing with its running total.
#[derive(Debug, Clone)]
pub struct ExpenseList {
    pub count: usize,
    pub total: Decimal,
    pub data: Vec<Expense>,
}

/// Category breakdown with the grand total across all categories.
#[derive(Debug, Clone)]
pub struct CategoryReport {
    pub total: Decimal,
    pub data: Vec<CategorySummary>,
}

/// Service for expense operations.
#[derive(Clone)]
pub struct ExpenseService {
    repo: Arc<dyn ExpenseRepository>,
}

impl ExpenseService {
    pub fn new(repo: Arc<dyn ExpenseRepository>) -> Self {
        Self { repo }
    }

    /// Creates an expense from already-validated input.
    pub async fn create_expense(
        &self,
        input: NewExpense,
        idempotency_key: Option<&str>,
    ) -> Result<Expense> {
        let timer = LatencyTimer::new();

        let mut expense = Expense::new(input);
        if let Some(key) = idempotency_key {
            expense = expense.with_idempotency_key(key);
        }

        let created = self.repo.create(&expense).await?;

        let metrics = get_metrics();
        metrics.record_expense_created(created.category.as_str());
        metrics.record_store_write_latency(timer.elapsed_ms());

        info!(
            expense_id = %created.id,
            category = %created.category,
            "Expense created"
        );
        Ok(created)
    }

    pub async fn list_expenses(&self, filter: ExpenseFilter) -> Result<ExpenseList> {
        let data = self.repo.list(&filter).await?;
        let total = data.iter().map(|e| e.amount).sum();

        Ok(ExpenseList {
            count: data.len(),
            total,
            data,
        })
    }

    pub async fn get_expense(&self, id: Uuid) -> Result<Expense> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(NOT_FOUND.to_string()))
    }

    pub async fn delete_expense(&self, id: Uuid) -> Result<Expense> {
        let deleted = self
            .repo
            .delete(id)
            .await?
            .ok_or_else(|| AppError::NotFound(NOT_FOUND.to_string()))?;

        get_metrics().record_expense_deleted(deleted.category.as_str());
        info!(expense_id = %deleted.id, "Expense deleted");
        Ok(deleted)
    }

    pub async fn summary_by_category(&self) -> Result<CategoryReport> {
        let data = self.repo.summarize_by_category().await?;
        let total = data.iter().map(|s| s.total).sum();

        Ok(CategoryReport { total, data })
    }

    /// Checks that the backing store is reachable.
    pub async fn ping(&self) -> Result<()> {
        self.repo.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExpenseCategory;
    use crate::repositories::{InMemoryExpenseRepository, MockExpenseRepository};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn input(amount: Decimal, category: ExpenseCategory) -> NewExpense {
        NewExpense {
            amount,
            category,
            description: "test".to_string(),
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_tags_idempotency_key() {
        let service = ExpenseService::new(Arc::new(InMemoryExpenseRepository::new()));

        let tagged = service
            .create_expense(input(dec!(12.50), ExpenseCategory::Food), Some("abc"))
            .await
            .unwrap();
        assert_eq!(tagged.idempotency_key.as_deref(), Some("abc"));

        let untagged = service
            .create_expense(input(dec!(1.00), ExpenseCategory::Food), None)
            .await
            .unwrap();
        assert!(untagged.idempotency_key.is_none());
    }

    #[tokio::test]
    async fn test_list_totals_match_data() {
        let service = ExpenseService::new(Arc::new(InMemoryExpenseRepository::new()));
        service
            .create_expense(input(dec!(12.50), ExpenseCategory::Food), None)
            .await
            .unwrap();
        service
            .create_expense(input(dec!(7.25), ExpenseCategory::Bills), None)
            .await
            .unwrap();

        let all = service.list_expenses(ExpenseFilter::default()).await.unwrap();
        assert_eq!(all.count, 2);
        assert_eq!(all.total, dec!(19.75));

        let bills = service
            .list_expenses(ExpenseFilter {
                category: Some(ExpenseCategory::Bills),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(bills.count, 1);
        assert_eq!(bills.total, dec!(7.25));
    }

    #[tokio::test]
    async fn test_summary_grand_total_is_sum_of_categories() {
        let service = ExpenseService::new(Arc::new(InMemoryExpenseRepository::new()));
        for (amount, category) in [
            (dec!(3.10), ExpenseCategory::Food),
            (dec!(4.20), ExpenseCategory::Food),
            (dec!(100), ExpenseCategory::Education),
            (dec!(0.01), ExpenseCategory::Other),
        ] {
            service.create_expense(input(amount, category), None).await.unwrap();
        }

        let report = service.summary_by_category().await.unwrap();
        let per_category: Decimal = report.data.iter().map(|s| s.total).sum();
        assert_eq!(report.total, per_category);
        assert_eq!(report.total, dec!(107.31));
        assert_eq!(report.data[0].category, ExpenseCategory::Education);
    }

    #[tokio::test]
    async fn test_missing_expense_is_not_found() {
        let mut repo = MockExpenseRepository::new();
        repo.expect_find_by_id().returning(|_| Ok(None));
        repo.expect_delete().returning(|_| Ok(None));
        let service = ExpenseService::new(Arc::new(repo));

        let err = service.get_expense(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref msg) if msg == "Expense not found"));

        let err = service.delete_expense(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut repo = MockExpenseRepository::new();
        repo.expect_create()
            .times(1)
            .returning(|_| Err(AppError::Internal(anyhow::anyhow!("disk full"))));
        let service = ExpenseService::new(Arc::new(repo));

        let err = service
            .create_expense(input(dec!(1), ExpenseCategory::Food), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
