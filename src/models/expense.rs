use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ExpenseCategory;

/// A single recorded expense.
///
/// Serialized with the field names the browser client expects: `_id` for the
/// identifier and camelCase timestamps. Amounts travel as JSON numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub category: ExpenseCategory,
    pub description: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    /// Creates a new expense from validated input.
    pub fn new(input: NewExpense) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            amount: input.amount,
            category: input.category,
            description: input.description,
            date: input.date,
            idempotency_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Tags the expense with the idempotency key it was submitted under.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Validated input for creating an expense.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpense {
    pub amount: Decimal,
    pub category: ExpenseCategory,
    pub description: String,
    pub date: DateTime<Utc>,
}

/// Ordering applied when listing expenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpenseSort {
    #[default]
    DateDesc,
    DateAsc,
}

impl FromStr for ExpenseSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date_desc" => Ok(ExpenseSort::DateDesc),
            "date_asc" => Ok(ExpenseSort::DateAsc),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

impl fmt::Display for ExpenseSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpenseSort::DateDesc => f.write_str("date_desc"),
            ExpenseSort::DateAsc => f.write_str("date_asc"),
        }
    }
}

/// Filter for listing expenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpenseFilter {
    pub category: Option<ExpenseCategory>,
    pub sort: ExpenseSort,
}

impl ExpenseFilter {
    pub fn matches(&self, expense: &Expense) -> bool {
        self.category.map_or(true, |c| c == expense.category)
    }

    /// Orders expenses by date, falling back to creation time on ties.
    pub fn sort(&self, expenses: &mut [Expense]) {
        expenses.sort_by(|a, b| {
            let ordering = a
                .date
                .cmp(&b.date)
                .then_with(|| a.created_at.cmp(&b.created_at));
            match self.sort {
                ExpenseSort::DateAsc => ordering,
                ExpenseSort::DateDesc => ordering.reverse(),
            }
        });
    }
}

/// Per-category aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: ExpenseCategory,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn expense_on(day: u32, category: ExpenseCategory) -> Expense {
        Expense::new(NewExpense {
            amount: dec!(10.00),
            category,
            description: format!("day {}", day),
            date: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        })
    }

    #[test]
    fn test_expense_serializes_client_field_names() {
        let expense = Expense::new(NewExpense {
            amount: dec!(12.50),
            category: ExpenseCategory::Food,
            description: "Lunch".to_string(),
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });

        let json = serde_json::to_value(&expense).unwrap();
        assert_eq!(json["_id"], expense.id.to_string());
        assert_eq!(json["amount"], 12.5);
        assert_eq!(json["category"], "Food");
        assert_eq!(json["date"], "2024-01-01T00:00:00Z");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("idempotencyKey").is_none());

        let tagged = expense.with_idempotency_key("abc");
        let json = serde_json::to_value(&tagged).unwrap();
        assert_eq!(json["idempotencyKey"], "abc");
    }

    #[test]
    fn test_sort_from_str() {
        assert_eq!("date_desc".parse::<ExpenseSort>().unwrap(), ExpenseSort::DateDesc);
        assert_eq!("date_asc".parse::<ExpenseSort>().unwrap(), ExpenseSort::DateAsc);
        assert!("amount".parse::<ExpenseSort>().is_err());
        assert_eq!(ExpenseSort::default(), ExpenseSort::DateDesc);
    }

    #[test]
    fn test_filter_sort_and_match() {
        let mut expenses = vec![
            expense_on(2, ExpenseCategory::Food),
            expense_on(3, ExpenseCategory::Bills),
            expense_on(1, ExpenseCategory::Food),
        ];

        let desc = ExpenseFilter::default();
        desc.sort(&mut expenses);
        assert_eq!(expenses[0].description, "day 3");
        assert_eq!(expenses[2].description, "day 1");

        let asc = ExpenseFilter {
            category: Some(ExpenseCategory::Food),
            sort: ExpenseSort::DateAsc,
        };
        asc.sort(&mut expenses);
        assert_eq!(expenses[0].description, "day 1");

        let food: Vec<_> = expenses.iter().filter(|e| asc.matches(e)).collect();
        assert_eq!(food.len(), 2);
    }
}
