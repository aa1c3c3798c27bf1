use crate::{
    obligation::{Classification, Obligation, Status},
    recurrence::{days_in_month, RecurrenceRule},
    CURRENCY_PRECISION,
};
use chrono::{Datelike, Duration, NaiveDate};
use log::{debug, trace};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Average number of weeks in a month, used when amortising weekly obligations
pub const WEEKS_PER_MONTH: Decimal = dec!(4.33);

/// The nominal month length custom intervals are amortised over
pub const CUSTOM_INTERVAL_MONTH_DAYS: Decimal = dec!(30);

/// How many days ahead [`due_within`] looks by default
pub const DEFAULT_DUE_SOON_DAYS: u32 = 5;

/// How non-monthly obligations contribute to a month's projected cost. One policy is
/// applied to every obligation in an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPolicy {
    /// The literal cost landing inside the calendar month: amount times the number of
    /// occurrences in it. A quarterly bill contributes nothing in its off months.
    ExactThisMonth,
    /// A smoothed monthly equivalent for budgeting: daily => days in month,
    /// weekly => 4.33, monthly => 1, quarterly => 1/3, yearly => 1/12 and
    /// every n days => 30/n.
    Amortized,
}

impl Default for CostPolicy {
    fn default() -> Self {
        CostPolicy::ExactThisMonth
    }
}

/// A calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthWindow {
    first_day: NaiveDate,
    last_day: NaiveDate,
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum WindowError {
    #[error("month must be between 1 and 12, got {0}")]
    Month(u32),
    #[error("the year {0} is outside the supported date range")]
    Year(i32),
}

impl MonthWindow {
    pub fn new(year: i32, month: u32) -> Result<Self, WindowError> {
        let length = days_in_month(year, month).ok_or(WindowError::Month(month))?;
        let first_day = NaiveDate::from_ymd_opt(year, month, 1).ok_or(WindowError::Year(year))?;
        let last_day =
            NaiveDate::from_ymd_opt(year, month, length).ok_or(WindowError::Year(year))?;

        Ok(MonthWindow {
            first_day,
            last_day,
        })
    }

    /// The month `date` falls in
    pub fn containing(date: NaiveDate) -> Self {
        let last_day = days_in_month(date.year(), date.month())
            .and_then(|length| date.with_day(length))
            .unwrap_or(date);
        MonthWindow {
            first_day: date.with_day(1).unwrap_or(date),
            last_day,
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn last_day(&self) -> NaiveDate {
        self.last_day
    }

    pub fn days(&self) -> u32 {
        self.last_day.day()
    }
}

/// One obligation together with its classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classified<'a> {
    pub obligation: &'a Obligation,
    pub classification: Classification,
}

/// Obligations partitioned by status, each group sorted for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusGroups<'a> {
    /// Earliest missed date first
    pub overdue: Vec<Classified<'a>>,
    /// Soonest due first; obligations without a next occurrence last
    pub upcoming: Vec<Classified<'a>>,
    /// Ascending by display date; undated ones last, in input order
    pub paid: Vec<Classified<'a>>,
    /// Input order
    pub archived: Vec<Classified<'a>>,
}

impl<'a> StatusGroups<'a> {
    /// Each group with its status, in the order they are presented.
    pub fn in_display_order(&self) -> [(Status, &[Classified<'a>]); 4] {
        [
            (Status::Overdue, self.overdue.as_slice()),
            (Status::Upcoming, self.upcoming.as_slice()),
            (Status::Paid, self.paid.as_slice()),
            (Status::Archived, self.archived.as_slice()),
        ]
    }

    /// The archived group ordered by name, for callers that need a total order
    pub fn archived_by_name(&self) -> Vec<Classified<'a>> {
        let mut archived = self.archived.clone();
        archived.sort_by(|a, b| a.obligation.name().cmp(b.obligation.name()));
        archived
    }

    pub fn len(&self) -> usize {
        self.overdue.len() + self.upcoming.len() + self.paid.len() + self.archived.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Set-level rollup of obligations for one calendar month
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyAggregate<'a> {
    pub window: MonthWindow,
    pub policy: CostPolicy,
    /// Rounded to `CURRENCY_PRECISION` decimal places
    pub projected_monthly_cost: Decimal,
    /// Occurrences of active obligations from today (or the start of the month, if
    /// later) to the end of the month
    pub remaining_occurrences_this_month: usize,
    /// Every obligation supplied, archived ones included
    pub total_obligations: usize,
    pub groups: StatusGroups<'a>,
}

/// Rolls up `obligations` for `window`, classifying each of them as of `today`.
///
/// Inactive obligations only ever land in the archived group; they contribute neither
/// cost nor occurrences.
pub fn aggregate<'a>(
    obligations: &'a [Obligation],
    window: MonthWindow,
    today: NaiveDate,
    policy: CostPolicy,
) -> MonthlyAggregate<'a> {
    debug!(
        "aggregating {} obligations for {} - {} as of {} ({:?})",
        obligations.len(),
        window.first_day(),
        window.last_day(),
        today,
        policy
    );

    let remaining_from = today.max(window.first_day());
    let mut cost = Decimal::ZERO;
    let mut remaining = 0;
    let mut groups = StatusGroups::default();

    for obligation in obligations {
        let classification = obligation.classify(today);
        let entry = Classified {
            obligation,
            classification,
        };

        match classification.status {
            Status::Overdue => groups.overdue.push(entry),
            Status::Upcoming => groups.upcoming.push(entry),
            Status::Paid => groups.paid.push(entry),
            Status::Archived => {
                groups.archived.push(entry);
                continue;
            }
        }

        let contribution = monthly_cost(obligation, window, policy);
        let left = obligation
            .rule()
            .occurrences_within(remaining_from, window.last_day())
            .len();

        trace!(
            "obligation {} contributes {} and has {} occurrences left",
            obligation.id().0,
            contribution,
            left
        );

        cost += contribution;
        remaining += left;
    }

    sort_by_date(&mut groups.overdue, |c| c.display_date);
    sort_by_date(&mut groups.upcoming, |c| c.next_occurrence);
    sort_by_date(&mut groups.paid, |c| c.display_date);

    let aggregate = MonthlyAggregate {
        window,
        policy,
        projected_monthly_cost: cost.round_dp(CURRENCY_PRECISION),
        remaining_occurrences_this_month: remaining,
        total_obligations: obligations.len(),
        groups,
    };

    debug!(
        "projected cost {} with {} occurrences remaining",
        aggregate.projected_monthly_cost, aggregate.remaining_occurrences_this_month
    );

    aggregate
}

/// What one obligation costs in `window` under `policy`, unrounded.
pub fn monthly_cost(obligation: &Obligation, window: MonthWindow, policy: CostPolicy) -> Decimal {
    let amount = obligation.amount();

    match policy {
        CostPolicy::ExactThisMonth => {
            let count = obligation
                .rule()
                .occurrences_within(window.first_day(), window.last_day())
                .len();
            amount * Decimal::from(count)
        }
        CostPolicy::Amortized => match *obligation.rule() {
            RecurrenceRule::Daily => amount * Decimal::from(window.days()),
            RecurrenceRule::Weekly { .. } => amount * WEEKS_PER_MONTH,
            RecurrenceRule::Monthly { .. } | RecurrenceRule::MonthlyLastDay => amount,
            RecurrenceRule::Quarterly { .. } => amount / dec!(3),
            RecurrenceRule::Yearly { .. } => amount / dec!(12),
            RecurrenceRule::CustomInterval { days: 0, .. } => Decimal::ZERO,
            RecurrenceRule::CustomInterval { days, .. } => {
                amount * CUSTOM_INTERVAL_MONTH_DAYS / Decimal::from(days)
            }
        },
    }
}

/// Active, unsettled obligations falling due within `days` days of `today` (inclusive),
/// soonest first.
pub fn due_within(obligations: &[Obligation], today: NaiveDate, days: u32) -> Vec<Classified<'_>> {
    let horizon = today
        .checked_add_signed(Duration::days(days as i64))
        .unwrap_or(NaiveDate::MAX);

    let mut due: Vec<Classified> = obligations
        .iter()
        .map(|obligation| Classified {
            obligation,
            classification: obligation.classify(today),
        })
        .filter(|c| match c.classification.status {
            Status::Upcoming | Status::Overdue => {
                c.classification.next_occurrence.map_or(false, |next| next <= horizon)
            }
            Status::Paid | Status::Archived => false,
        })
        .collect();

    sort_by_date(&mut due, |c| c.next_occurrence);
    due
}

// Stable sort, ascending by date, with undated entries kept at the end
fn sort_by_date(group: &mut [Classified], key: fn(&Classification) -> Option<NaiveDate>) {
    group.sort_by_key(|c| {
        let date = key(&c.classification);
        (date.is_none(), date)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obligation::{ObligationId, MAX_AMOUNT};

    fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn obligation(id: u64, name: &str, amount: Decimal, rule: RecurrenceRule) -> Obligation {
        Obligation::new(ObligationId(id), name, amount, rule, ymd(2025, 1, 1)).unwrap()
    }

    fn ids(group: &[Classified]) -> Vec<u64> {
        group.iter().map(|c| c.obligation.id().0).collect()
    }

    #[test]
    fn month_window_bounds() {
        let window = MonthWindow::new(2024, 2).unwrap();
        assert_eq!(window.first_day(), ymd(2024, 2, 1));
        assert_eq!(window.last_day(), ymd(2024, 2, 29));
        assert_eq!(window.days(), 29);
        assert_eq!(MonthWindow::containing(ymd(2024, 2, 17)), window);
    }

    #[test]
    fn month_window_invalid_month() {
        assert_eq!(MonthWindow::new(2025, 13), Err(WindowError::Month(13)));
        assert_eq!(MonthWindow::new(2025, 0), Err(WindowError::Month(0)));
    }

    #[test]
    fn cost_policy_default_is_exact() {
        assert_eq!(CostPolicy::default(), CostPolicy::ExactThisMonth);
    }

    #[test]
    fn amortized_daily_plus_monthly() {
        let _ = env_logger::builder().is_test(true).try_init();
        let obligations = vec![
            obligation(1, "Lunch", dec!(100), RecurrenceRule::Daily),
            obligation(2, "Rent", dec!(3000), RecurrenceRule::monthly(1).unwrap()),
        ];
        let window = MonthWindow::new(2025, 11).unwrap();
        let result = aggregate(&obligations, window, ymd(2025, 11, 1), CostPolicy::Amortized);
        assert_eq!(result.projected_monthly_cost, dec!(6000));
    }

    #[test]
    fn exact_daily_plus_monthly() {
        let obligations = vec![
            obligation(1, "Lunch", dec!(100), RecurrenceRule::Daily),
            obligation(2, "Rent", dec!(3000), RecurrenceRule::monthly(1).unwrap()),
        ];
        let window = MonthWindow::new(2025, 11).unwrap();
        let result = aggregate(
            &obligations,
            window,
            ymd(2025, 11, 1),
            CostPolicy::ExactThisMonth,
        );
        assert_eq!(result.projected_monthly_cost, dec!(6000));
    }

    #[test]
    fn exact_skips_off_months() {
        let obligations = vec![
            obligation(1, "Insurance", dec!(900), RecurrenceRule::quarterly(1, 10).unwrap()),
            obligation(2, "Domain", dec!(15), RecurrenceRule::yearly(3, 1).unwrap()),
            obligation(3, "Gym", dec!(25), RecurrenceRule::weekly(1).unwrap()),
        ];

        // November 2025 has four Mondays, and no January/April/July/October or March
        let november = MonthWindow::new(2025, 11).unwrap();
        let result = aggregate(&obligations, november, ymd(2025, 11, 1), CostPolicy::default());
        assert_eq!(result.projected_monthly_cost, dec!(100));

        let october = MonthWindow::new(2025, 10).unwrap();
        let result = aggregate(&obligations, october, ymd(2025, 10, 1), CostPolicy::default());
        assert_eq!(result.projected_monthly_cost, dec!(1000));
    }

    #[test]
    fn exact_skips_missing_day() {
        let obligations = vec![obligation(
            1,
            "Card",
            dec!(50),
            RecurrenceRule::monthly(31).unwrap(),
        )];
        let window = MonthWindow::new(2025, 2).unwrap();
        let result = aggregate(&obligations, window, ymd(2025, 2, 1), CostPolicy::default());
        assert_eq!(result.projected_monthly_cost, Decimal::ZERO);
    }

    #[test]
    fn amortized_multipliers() {
        let window = MonthWindow::new(2025, 11).unwrap();
        let cost = |rule, amount| {
            monthly_cost(&obligation(1, "x", amount, rule), window, CostPolicy::Amortized)
        };

        assert_eq!(cost(RecurrenceRule::weekly(2).unwrap(), dec!(100)), dec!(433));
        assert_eq!(cost(RecurrenceRule::MonthlyLastDay, dec!(80)), dec!(80));
        assert_eq!(cost(RecurrenceRule::quarterly(1, 1).unwrap(), dec!(90)), dec!(30));
        assert_eq!(cost(RecurrenceRule::yearly(1, 1).unwrap(), dec!(120)), dec!(10));
        assert_eq!(cost(RecurrenceRule::custom_interval(15).unwrap(), dec!(10)), dec!(20));
    }

    #[test]
    fn amortized_rounds_to_currency_precision() {
        let obligations = vec![obligation(
            1,
            "Water",
            dec!(100),
            RecurrenceRule::quarterly(2, 1).unwrap(),
        )];
        let window = MonthWindow::new(2025, 11).unwrap();
        let result = aggregate(&obligations, window, ymd(2025, 11, 3), CostPolicy::Amortized);
        assert_eq!(result.projected_monthly_cost, dec!(33.33));
    }

    #[test]
    fn amortized_daily_follows_month_length() {
        let obligations = vec![obligation(1, "Coffee", dec!(3), RecurrenceRule::Daily)];
        let window = MonthWindow::new(2024, 2).unwrap();
        let result = aggregate(&obligations, window, ymd(2024, 2, 1), CostPolicy::Amortized);
        assert_eq!(result.projected_monthly_cost, dec!(87));
    }

    #[test]
    fn inactive_obligations_cost_nothing() {
        let obligations = vec![
            obligation(1, "Old", dec!(500), RecurrenceRule::Daily).with_active(false),
            obligation(2, "Rent", dec!(3000), RecurrenceRule::monthly(1).unwrap()),
        ];
        let window = MonthWindow::new(2025, 11).unwrap();
        for policy in [CostPolicy::ExactThisMonth, CostPolicy::Amortized] {
            let result = aggregate(&obligations, window, ymd(2025, 11, 1), policy);
            assert_eq!(result.projected_monthly_cost, dec!(3000));
            assert_eq!(result.total_obligations, 2);
            assert_eq!(ids(&result.groups.archived), vec![1]);
        }
    }

    #[test]
    fn remaining_occurrences_from_today() {
        let obligations = vec![
            // Mondays 24 Nov only
            obligation(1, "Gym", dec!(25), RecurrenceRule::weekly(1).unwrap()),
            // 5th already passed
            obligation(2, "Phone", dec!(30), RecurrenceRule::monthly(5).unwrap()),
            // 20 - 30 November
            obligation(3, "Lunch", dec!(10), RecurrenceRule::Daily),
            obligation(4, "Old", dec!(10), RecurrenceRule::Daily).with_active(false),
        ];
        let today = ymd(2025, 11, 20);
        let result = aggregate(
            &obligations,
            MonthWindow::containing(today),
            today,
            CostPolicy::default(),
        );
        assert_eq!(result.remaining_occurrences_this_month, 1 + 0 + 11);
    }

    #[test]
    fn remaining_occurrences_counts_today() {
        let obligations = vec![obligation(
            1,
            "Phone",
            dec!(30),
            RecurrenceRule::monthly(20).unwrap(),
        )];
        let today = ymd(2025, 11, 20);
        let result = aggregate(
            &obligations,
            MonthWindow::containing(today),
            today,
            CostPolicy::default(),
        );
        assert_eq!(result.remaining_occurrences_this_month, 1);
    }

    #[test]
    fn remaining_occurrences_past_and_future_windows() {
        let obligations = vec![obligation(1, "Lunch", dec!(10), RecurrenceRule::Daily)];
        let today = ymd(2025, 11, 20);

        let past = aggregate(
            &obligations,
            MonthWindow::new(2025, 10).unwrap(),
            today,
            CostPolicy::default(),
        );
        assert_eq!(past.remaining_occurrences_this_month, 0);

        let future = aggregate(
            &obligations,
            MonthWindow::new(2025, 12).unwrap(),
            today,
            CostPolicy::default(),
        );
        assert_eq!(future.remaining_occurrences_this_month, 31);
    }

    #[test]
    fn groups_sorted_for_display() {
        let today = ymd(2025, 11, 20);
        let obligations = vec![
            obligation(1, "Rent", dec!(1), RecurrenceRule::monthly(1).unwrap()),
            obligation(2, "Gym", dec!(1), RecurrenceRule::weekly(1).unwrap()),
            obligation(3, "Old", dec!(1), RecurrenceRule::Daily).with_active(false),
            obligation(4, "Phone", dec!(1), RecurrenceRule::monthly(25).unwrap())
                .with_last_paid_date(ymd(2025, 11, 25)),
            obligation(5, "Lunch", dec!(1), RecurrenceRule::Daily),
            obligation(6, "Car", dec!(1), RecurrenceRule::Daily)
                .with_last_paid_date(today),
            obligation(7, "Bank", dec!(1), RecurrenceRule::Daily).with_active(false),
        ];
        let result = aggregate(
            &obligations,
            MonthWindow::containing(today),
            today,
            CostPolicy::default(),
        );

        assert!(result.groups.overdue.is_empty());
        // Today, Monday 24th, 1 December
        assert_eq!(ids(&result.groups.upcoming), vec![5, 2, 1]);
        // Today, then the 25th
        assert_eq!(ids(&result.groups.paid), vec![6, 4]);
        assert_eq!(ids(&result.groups.archived), vec![3, 7]);
        assert_eq!(
            result
                .groups
                .archived_by_name()
                .iter()
                .map(|c| c.obligation.name())
                .collect::<Vec<_>>(),
            vec!["Bank", "Old"]
        );
        assert_eq!(result.groups.len(), 7);

        let order: Vec<Status> = result
            .groups
            .in_display_order()
            .iter()
            .map(|(status, _)| *status)
            .collect();
        assert_eq!(
            order,
            vec![Status::Overdue, Status::Upcoming, Status::Paid, Status::Archived]
        );
    }

    #[test]
    fn overdue_and_undated_sorting() {
        let a = obligation(1, "a", dec!(1), RecurrenceRule::Daily);
        let b = obligation(2, "b", dec!(1), RecurrenceRule::Daily);
        let c = obligation(3, "c", dec!(1), RecurrenceRule::Daily);
        let mut group = vec![
            Classified {
                obligation: &a,
                classification: Classification {
                    status: Status::Overdue,
                    display_date: None,
                    next_occurrence: None,
                },
            },
            Classified {
                obligation: &b,
                classification: Classification {
                    status: Status::Overdue,
                    display_date: Some(ymd(2025, 11, 10)),
                    next_occurrence: Some(ymd(2025, 11, 10)),
                },
            },
            Classified {
                obligation: &c,
                classification: Classification {
                    status: Status::Overdue,
                    display_date: Some(ymd(2025, 11, 2)),
                    next_occurrence: Some(ymd(2025, 11, 2)),
                },
            },
        ];
        sort_by_date(&mut group, |c| c.display_date);
        assert_eq!(ids(&group), vec![3, 2, 1]);
    }

    #[test]
    fn aggregate_empty() {
        let today = ymd(2025, 11, 20);
        let result = aggregate(&[], MonthWindow::containing(today), today, CostPolicy::Amortized);
        assert_eq!(result.projected_monthly_cost, Decimal::ZERO);
        assert_eq!(result.remaining_occurrences_this_month, 0);
        assert_eq!(result.total_obligations, 0);
        assert!(result.groups.is_empty());
    }

    #[test]
    fn largest_amounts_aggregate_without_overflow() {
        let obligations = vec![
            obligation(1, "Payroll", MAX_AMOUNT, RecurrenceRule::Daily),
            obligation(2, "Sweep", MAX_AMOUNT, RecurrenceRule::custom_interval(1).unwrap()),
            obligation(3, "Lease", MAX_AMOUNT, RecurrenceRule::weekly(1).unwrap()),
        ];
        let window = MonthWindow::new(2025, 11).unwrap();
        let today = ymd(2025, 11, 1);

        // November 2025 has 30 days and 4 Mondays. An unanchored interval counted
        // from 1 November lands on every day but the first.
        let exact = aggregate(&obligations, window, today, CostPolicy::ExactThisMonth);
        assert_eq!(exact.projected_monthly_cost, MAX_AMOUNT * dec!(63));

        let amortized = aggregate(&obligations, window, today, CostPolicy::Amortized);
        assert_eq!(
            amortized.projected_monthly_cost,
            MAX_AMOUNT * dec!(30) + MAX_AMOUNT * dec!(30) + MAX_AMOUNT * WEEKS_PER_MONTH
        );
    }

    #[test]
    fn due_within_default_horizon() {
        let today = ymd(2025, 11, 20);
        let obligations = vec![
            obligation(1, "Rent", dec!(1), RecurrenceRule::monthly(1).unwrap()),
            obligation(2, "Gym", dec!(1), RecurrenceRule::weekly(1).unwrap()),
            obligation(3, "Phone", dec!(1), RecurrenceRule::monthly(25).unwrap()),
            obligation(4, "Paid", dec!(1), RecurrenceRule::monthly(22).unwrap())
                .with_last_paid_date(ymd(2025, 11, 22)),
            obligation(5, "Old", dec!(1), RecurrenceRule::monthly(21).unwrap())
                .with_active(false),
            obligation(6, "Lunch", dec!(1), RecurrenceRule::Daily),
        ];
        let due = due_within(&obligations, today, DEFAULT_DUE_SOON_DAYS);
        // Today, Monday 24th, 25th (the horizon)
        assert_eq!(ids(&due), vec![6, 2, 3]);
    }
}
