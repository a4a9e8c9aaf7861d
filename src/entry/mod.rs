//! Ledger entries and the rules for creating and editing them.

mod domain;
mod validation;

pub use domain::{Category, Entry, EntryFields, EntryId, EntryKind};
pub use validation::{EntryCandidate, ValidationError, validate};
