//! Scheduling and status engine for recurring payment obligations.
//!
//! Given a set of obligations (subscriptions, bills) and an injected "today", this crate
//! works out when each one next falls due, whether it is paid, upcoming or archived,
//! and what the month ahead looks like in aggregate. Everything here is a pure
//! function of its arguments: nothing reads the system clock or touches storage.

mod aggregate;
mod obligation;
mod recurrence;

pub use aggregate::{
    aggregate, due_within, monthly_cost, Classified, CostPolicy, MonthWindow, MonthlyAggregate,
    StatusGroups, WindowError, CUSTOM_INTERVAL_MONTH_DAYS, DEFAULT_DUE_SOON_DAYS,
    WEEKS_PER_MONTH,
};
pub use obligation::{
    decide_status, Classification, Obligation, ObligationError, ObligationId, ObligationRecord,
    Status, MAX_AMOUNT,
};
pub use recurrence::{days_in_month, is_leap_year, RecurrenceRule, RuleError};

// This represents the number of decimal places that a currency can validly express.
// @todo Support the full range of currency precisions specified in ISO 4217.
pub const CURRENCY_PRECISION: u32 = 2;
