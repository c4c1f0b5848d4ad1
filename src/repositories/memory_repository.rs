use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ExpenseRepository;
use crate::error::{AppError, Result};
use crate::models::{CategorySummary, Expense, ExpenseCategory, ExpenseFilter};

/// Process-local expense store, used for tests and database-less runs.
#[derive(Debug, Default)]
pub struct InMemoryExpenseRepository {
    expenses: RwLock<HashMap<Uuid, Expense>>,
}

impl InMemoryExpenseRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored expenses.
    pub async fn len(&self) -> usize {
        self.expenses.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.expenses.read().await.is_empty()
    }
}

#[async_trait]
impl ExpenseRepository for InMemoryExpenseRepository {
    async fn create(&self, expense: &Expense) -> Result<Expense> {
        let mut expenses = self.expenses.write().await;
        if expenses.contains_key(&expense.id) {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Expense {} already exists",
                expense.id
            )));
        }
        expenses.insert(expense.id, expense.clone());
        Ok(expense.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Expense>> {
        Ok(self.expenses.read().await.get(&id).cloned())
    }

    async fn list(&self, filter: &ExpenseFilter) -> Result<Vec<Expense>> {
        let mut matching: Vec<Expense> = self
            .expenses
            .read()
            .await
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        filter.sort(&mut matching);
        Ok(matching)
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Expense>> {
        Ok(self.expenses.write().await.remove(&id))
    }

    async fn summarize_by_category(&self) -> Result<Vec<CategorySummary>> {
        let expenses = self.expenses.read().await;

        let mut groups: BTreeMap<ExpenseCategory, (Decimal, i64)> = BTreeMap::new();
        for expense in expenses.values() {
            let entry = groups.entry(expense.category).or_insert((Decimal::ZERO, 0));
            entry.0 += expense.amount;
            entry.1 += 1;
        }

        let mut summary: Vec<CategorySummary> = groups
            .into_iter()
            .map(|(category, (total, count))| CategorySummary {
                category,
                total,
                count,
            })
            .collect();
        // Stable sort keeps category order for equal totals.
        summary.sort_by(|a, b| b.total.cmp(&a.total));
        Ok(summary)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
