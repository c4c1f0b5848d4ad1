pub mod expense_service;

pub use expense_service::{CategoryReport, ExpenseList, ExpenseService};
