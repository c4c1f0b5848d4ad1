use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::models::{ExpenseCategory, ExpenseFilter, ExpenseSort, NewExpense};

pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const MAX_AMOUNT_SCALE: u32 = 2;

/// Largest amount that fits the store's `NUMERIC(12, 2)` column.
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999, 2)
}

/// Amount as sent by the client: a JSON number or a numeric string.
///
/// Any other JSON value is kept so validation can report it per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Number(serde_json::Number),
    Text(String),
    Other(Value),
}

impl AmountInput {
    fn parse(&self) -> Option<Decimal> {
        let raw = match self {
            AmountInput::Number(n) => n.to_string(),
            AmountInput::Text(s) => s.trim().to_string(),
            AmountInput::Other(_) => return None,
        };
        // serde_json renders large and tiny floats in exponent form.
        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .ok()
    }
}

/// Request to create a new expense.
///
/// Text fields stay loosely typed so a wrong JSON type is reported against
/// its field alongside every other failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateExpenseRequest {
    pub amount: Option<AmountInput>,
    pub category: Option<Value>,
    pub description: Option<Value>,
    pub date: Option<Value>,
}

impl CreateExpenseRequest {
    pub fn validate(&self) -> Result<NewExpense, Vec<String>> {
        self.validate_at(Utc::now())
    }

    /// Validates against `now`, collecting every failure message.
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<NewExpense, Vec<String>> {
        let mut errors = Vec::new();

        let amount = match &self.amount {
            None => {
                errors.push("Amount is required".to_string());
                None
            }
            Some(raw) => match raw.parse() {
                Some(amount) if amount.is_sign_negative() && !amount.is_zero() => {
                    errors.push("Amount must be a positive number".to_string());
                    None
                }
                Some(amount) if amount.normalize().scale() > MAX_AMOUNT_SCALE => {
                    errors.push("Amount cannot have more than 2 decimal places".to_string());
                    None
                }
                Some(amount) if amount > max_amount() => {
                    errors.push("Amount is too large".to_string());
                    None
                }
                Some(amount) => Some(amount.normalize()),
                None => {
                    errors.push("Amount must be a positive number".to_string());
                    None
                }
            },
        };

        let category = match field_text(&self.category) {
            FieldText::Missing => {
                errors.push("Category is required".to_string());
                None
            }
            FieldText::NotText => {
                errors.push("Invalid category".to_string());
                None
            }
            FieldText::Text(raw) => match ExpenseCategory::from_str(raw) {
                Ok(category) => Some(category),
                Err(_) => {
                    errors.push("Invalid category".to_string());
                    None
                }
            },
        };

        let description = match field_text(&self.description) {
            FieldText::Missing => {
                errors.push("Description is required".to_string());
                None
            }
            FieldText::NotText => {
                errors.push("Description must be a string".to_string());
                None
            }
            FieldText::Text(raw) if raw.chars().count() > MAX_DESCRIPTION_CHARS => {
                errors.push("Description cannot exceed 500 characters".to_string());
                None
            }
            FieldText::Text(raw) => Some(raw.to_string()),
        };

        let date = match field_text(&self.date) {
            FieldText::Missing => {
                errors.push("Date is required".to_string());
                None
            }
            FieldText::NotText => {
                errors.push("Invalid date format".to_string());
                None
            }
            FieldText::Text(raw) => match parse_iso8601(raw) {
                // One day of slack for clients in timezones ahead of UTC.
                Some(date) if date > now + Duration::days(1) => {
                    errors.push("Date cannot be in the future".to_string());
                    None
                }
                Some(date) => Some(date),
                None => {
                    errors.push("Invalid date format".to_string());
                    None
                }
            },
        };

        match (amount, category, description, date) {
            (Some(amount), Some(category), Some(description), Some(date)) if errors.is_empty() => {
                Ok(NewExpense {
                    amount,
                    category,
                    description,
                    date,
                })
            }
            _ => Err(errors),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

enum FieldText<'a> {
    Missing,
    NotText,
    Text(&'a str),
}

/// Null, absent and blank strings all count as missing.
fn field_text(value: &Option<Value>) -> FieldText<'_> {
    match value {
        None | Some(Value::Null) => FieldText::Missing,
        Some(Value::String(s)) => match s.trim() {
            "" => FieldText::Missing,
            trimmed => FieldText::Text(trimmed),
        },
        Some(_) => FieldText::NotText,
    }
}

/// Datetime layouts with a zone designator. `%#z` takes `Z`, `+05`, `+0530`
/// and `+05:30`.
const ZONED_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M%#z"];

/// Zone-less layouts, read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Accepts ISO 8601 calendar dates and datetimes at minute, second or
/// fractional precision, with or without a zone. Zone-less values are UTC and
/// plain `YYYY-MM-DD` dates are midnight UTC.
pub fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Query parameters for listing expenses.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListExpensesQuery {
    pub category: Option<String>,
    pub sort: Option<String>,
}

impl ListExpensesQuery {
    pub fn validate(&self) -> Result<ExpenseFilter, Vec<String>> {
        let mut errors = Vec::new();

        let category = match non_blank(&self.category) {
            None => None,
            Some(raw) => match ExpenseCategory::from_str(raw) {
                Ok(category) => Some(category),
                Err(_) => {
                    errors.push("Invalid category".to_string());
                    None
                }
            },
        };

        let sort = match non_blank(&self.sort) {
            None => ExpenseSort::default(),
            Some(raw) => match ExpenseSort::from_str(raw) {
                Ok(sort) => sort,
                Err(_) => {
                    errors.push("Invalid sort parameter. Use date_desc or date_asc".to_string());
                    ExpenseSort::default()
                }
            },
        };

        if errors.is_empty() {
            Ok(ExpenseFilter { category, sort })
        } else {
            Err(errors)
        }
    }
}
