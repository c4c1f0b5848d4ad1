pub mod category;
pub mod expense;

pub use category::{CategoryParseError, ExpenseCategory};
pub use expense::{CategorySummary, Expense, ExpenseFilter, ExpenseSort, NewExpense};
