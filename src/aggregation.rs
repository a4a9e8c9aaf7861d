//! Running totals derived from the current entry list.
//!
//! Totals are recomputed from the full list on every change, never maintained
//! incrementally.

use serde::Serialize;

use crate::entry::{Entry, EntryKind};

/// The income and expense sums of an entry list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateTotals {
    /// The sum of the amounts of all income entries.
    pub income_sum: f64,
    /// The sum of the amounts of all expense entries.
    pub expense_sum: f64,
}

impl AggregateTotals {
    /// Income minus expenses.
    pub fn net(&self) -> f64 {
        self.income_sum - self.expense_sum
    }
}

/// Sum the amounts of `entries` by kind.
///
/// Every entry counts towards exactly one of the two sums. An empty list gives zero
/// for both.
pub fn aggregate(entries: &[Entry]) -> AggregateTotals {
    entries
        .iter()
        .fold(AggregateTotals::default(), |mut totals, entry| {
            match entry.kind {
                EntryKind::Income => totals.income_sum += entry.amount,
                EntryKind::Expense => totals.expense_sum += entry.amount,
            }

            totals
        })
}
