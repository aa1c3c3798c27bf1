use crate::recurrence::{RecurrenceRule, RuleError};
use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The largest amount an obligation may carry. A month of daily occurrences summed
/// over many obligations has to stay well inside `Decimal`'s 96-bit range.
pub const MAX_AMOUNT: Decimal = dec!(1000000000000000);

/// Identifier assigned by the store that owns the obligation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObligationId(pub u64);

/// A recurring payment intent, such as a subscription or a utility bill.
///
/// `Obligation`s are created, toggled and deleted by whoever owns them; this crate only
/// derives transient state from them. The engine never mutates one.
///
/// Deserializing goes through [`ObligationRecord`] and the same checks as
/// [`Obligation::new`], so a single invalid record (say, a yearly rule on 30 February)
/// fails the decode of a whole `Vec<Obligation>`. Stores that want to keep the valid
/// entries should decode `Vec<ObligationRecord>` and convert each one with
/// `Obligation::try_from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ObligationRecord")]
pub struct Obligation {
    id: ObligationId,
    name: String,
    amount: Decimal,
    rule: RecurrenceRule,
    is_active: bool,
    // The most recent date somebody marked this as settled
    last_paid_date: Option<NaiveDate>,
    // Next due date as computed when the obligation was created. Advisory only; status
    // is always recomputed against today.
    cached_next_payment_date: Option<NaiveDate>,
}

/// The plain record shape an obligation store hands over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObligationRecord {
    pub id: ObligationId,
    #[serde(default)]
    pub name: String,
    pub amount: Decimal,
    pub rule: RecurrenceRule,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    #[serde(default)]
    pub last_paid_date: Option<NaiveDate>,
    #[serde(default)]
    pub cached_next_payment_date: Option<NaiveDate>,
}

#[derive(Error, Debug, PartialEq)]
pub enum ObligationError {
    #[error("obligation amounts cannot be negative, got {0}")]
    NegativeAmount(Decimal),
    #[error("obligation amounts cannot exceed {}, got {0}", MAX_AMOUNT)]
    AmountTooLarge(Decimal),
    #[error("invalid recurrence rule")]
    Rule(#[from] RuleError),
}

/// Where an obligation stands relative to today
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Paid,
    Overdue,
    Upcoming,
    Archived,
}

/// The derived view of one obligation on a given day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: Status,
    /// The date to show: the next occurrence if there is one, else the last payment
    pub display_date: Option<NaiveDate>,
    /// The freshly computed next occurrence. Always `None` for archived obligations.
    pub next_occurrence: Option<NaiveDate>,
}

impl Obligation {
    /// Create a new active `Obligation`, caching its first due date as seen from
    /// `created_on`.
    pub fn new<S: Into<String>>(
        id: ObligationId,
        name: S,
        amount: Decimal,
        rule: RecurrenceRule,
        created_on: NaiveDate,
    ) -> Result<Self, ObligationError> {
        validate_amount(amount)?;
        rule.validate()?;

        Ok(Obligation {
            id,
            name: name.into(),
            amount,
            rule,
            is_active: true,
            last_paid_date: None,
            cached_next_payment_date: rule.next_occurrence(created_on),
        })
    }

    pub fn with_last_paid_date(mut self, date: NaiveDate) -> Self {
        self.last_paid_date = Some(date);
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn id(&self) -> ObligationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn rule(&self) -> &RecurrenceRule {
        &self.rule
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn last_paid_date(&self) -> Option<NaiveDate> {
        self.last_paid_date
    }

    pub fn cached_next_payment_date(&self) -> Option<NaiveDate> {
        self.cached_next_payment_date
    }

    /// Classifies this obligation as of `today`.
    ///
    /// Inactive obligations are archived without any date arithmetic. Otherwise the
    /// next occurrence is recomputed from `today` (the cached date is never trusted)
    /// and the status follows [`decide_status`].
    pub fn classify(&self, today: NaiveDate) -> Classification {
        if !self.is_active {
            return Classification {
                status: Status::Archived,
                display_date: self.last_paid_date,
                next_occurrence: None,
            };
        }

        let next = self.rule.next_occurrence(today);
        let status = decide_status(self.last_paid_date, next, today);

        debug!(
            "obligation {} ({}) on {}: {} (next {:?}, last paid {:?})",
            self.id.0, self.rule, today, status, next, self.last_paid_date
        );

        Classification {
            status,
            display_date: next.or(self.last_paid_date),
            next_occurrence: next,
        }
    }
}

/// The status decision table for an active obligation, in priority order:
///
/// 1. paid on or after the next due date => `Paid` (the upcoming cycle is covered)
/// 2. paid, and nothing is due => `Paid`
/// 3. next due date before today => `Overdue`
/// 4. anything else => `Upcoming`
pub fn decide_status(
    last_paid: Option<NaiveDate>,
    next: Option<NaiveDate>,
    today: NaiveDate,
) -> Status {
    match (last_paid, next) {
        (Some(paid), Some(next)) if paid >= next => Status::Paid,
        (Some(_), None) => Status::Paid,
        (_, Some(next)) if next < today => Status::Overdue,
        _ => Status::Upcoming,
    }
}

impl TryFrom<ObligationRecord> for Obligation {
    type Error = ObligationError;

    fn try_from(record: ObligationRecord) -> Result<Self, Self::Error> {
        validate_amount(record.amount)?;
        record.rule.validate()?;

        Ok(Obligation {
            id: record.id,
            name: record.name,
            amount: record.amount,
            rule: record.rule,
            is_active: record.is_active,
            last_paid_date: record.last_paid_date,
            cached_next_payment_date: record.cached_next_payment_date,
        })
    }
}

impl From<Obligation> for ObligationRecord {
    fn from(obligation: Obligation) -> Self {
        ObligationRecord {
            id: obligation.id,
            name: obligation.name,
            amount: obligation.amount,
            rule: obligation.rule,
            is_active: obligation.is_active,
            last_paid_date: obligation.last_paid_date,
            cached_next_payment_date: obligation.cached_next_payment_date,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Paid => "paid",
            Status::Overdue => "overdue",
            Status::Upcoming => "upcoming",
            Status::Archived => "archived",
        };
        f.write_str(label)
    }
}

fn validate_amount(amount: Decimal) -> Result<(), ObligationError> {
    if amount < Decimal::ZERO {
        return Err(ObligationError::NegativeAmount(amount));
    }
    if amount > MAX_AMOUNT {
        return Err(ObligationError::AmountTooLarge(amount));
    }
    Ok(())
}

fn active_by_default() -> bool {
    true
}
