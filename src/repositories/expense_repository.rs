use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::ExpenseRepository;
use crate::error::{AppError, Result};
use crate::models::{CategorySummary, Expense, ExpenseCategory, ExpenseFilter, ExpenseSort};

#[derive(Debug, FromRow)]
struct ExpenseRow {
    id: Uuid,
    amount: Decimal,
    category: String,
    description: String,
    date: DateTime<Utc>,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ExpenseRow> for Expense {
    type Error = AppError;

    fn try_from(row: ExpenseRow) -> Result<Self> {
        Ok(Expense {
            id: row.id,
            amount: row.amount,
            category: parse_category(&row.category)?,
            description: row.description,
            date: row.date,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    category: String,
    total: Decimal,
    count: i64,
}

fn parse_category(raw: &str) -> Result<ExpenseCategory> {
    raw.parse()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Corrupt expense row: {}", e)))
}

/// Repository for expenses stored in PostgreSQL.
pub struct PostgresExpenseRepository {
    pool: PgPool,
}

impl PostgresExpenseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExpenseRepository for PostgresExpenseRepository {
    async fn create(&self, expense: &Expense) -> Result<Expense> {
        let row = sqlx::query_as::<_, ExpenseRow>(
            r#"
            INSERT INTO expenses (id, amount, category, description, date, idempotency_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, amount, category, description, date, idempotency_key, created_at, updated_at
            "#,
        )
        .bind(expense.id)
        .bind(expense.amount)
        .bind(expense.category.as_str())
        .bind(&expense.description)
        .bind(expense.date)
        .bind(&expense.idempotency_key)
        .bind(expense.created_at)
        .bind(expense.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)?;

        row.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Expense>> {
        let row = sqlx::query_as::<_, ExpenseRow>(
            r#"
            SELECT id, amount, category, description, date, idempotency_key, created_at, updated_at
            FROM expenses
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        row.map(Expense::try_from).transpose()
    }

    async fn list(&self, filter: &ExpenseFilter) -> Result<Vec<Expense>> {
        let direction = match filter.sort {
            ExpenseSort::DateDesc => "DESC",
            ExpenseSort::DateAsc => "ASC",
        };
        let sql = format!(
            r#"
            SELECT id, amount, category, description, date, idempotency_key, created_at, updated_at
            FROM expenses
            WHERE ($1::text IS NULL OR category = $1)
            ORDER BY date {direction}, created_at {direction}
            "#
        );

        let rows = sqlx::query_as::<_, ExpenseRow>(&sql)
            .bind(filter.category.map(|c| c.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)?;

        rows.into_iter().map(Expense::try_from).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<Option<Expense>> {
        let row = sqlx::query_as::<_, ExpenseRow>(
            r#"
            DELETE FROM expenses
            WHERE id = $1
            RETURNING id, amount, category, description, date, idempotency_key, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        row.map(Expense::try_from).transpose()
    }

    async fn summarize_by_category(&self) -> Result<Vec<CategorySummary>> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT category, SUM(amount) AS total, COUNT(*) AS count
            FROM expenses
            GROUP BY category
            ORDER BY total DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        rows.into_iter()
            .map(|row| {
                Ok(CategorySummary {
                    category: parse_category(&row.category)?,
                    total: row.total,
                    count: row.count,
                })
            })
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }
}
