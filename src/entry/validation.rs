//! Validation of user input for new and edited entries.

use crate::entry::{Category, Entry, EntryFields, EntryKind};

/// The reasons a candidate entry can be rejected before it reaches the store.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The title was empty or only whitespace.
    #[error("title cannot be empty")]
    EmptyTitle,

    /// The amount was missing, not a number, not finite, or not greater than zero.
    #[error("amount must be a number greater than zero")]
    InvalidAmount,

    /// Neither income nor expense was selected.
    #[error("select either income or expense")]
    MissingKind,
}

/// The raw state of an entry form, before validation.
///
/// `amount` is `None` when the amount input is empty or not a number, see
/// [EntryCandidate::parse_amount]. `kind` is `None` while the user has not
/// picked income or expense.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryCandidate {
    /// The title as typed.
    pub title: String,
    /// The parsed amount, `None` if the input was empty or not a number.
    pub amount: Option<f64>,
    /// The selected kind, `None` while nothing is selected.
    pub kind: Option<EntryKind>,
    /// The selected category, if any.
    pub category: Option<Category>,
    /// The note as typed.
    pub note: String,
}

impl EntryCandidate {
    /// Create a candidate from the three required fields.
    pub fn new(title: &str, amount: f64, kind: EntryKind) -> Self {
        Self {
            title: title.to_owned(),
            amount: Some(amount),
            kind: Some(kind),
            category: None,
            note: String::new(),
        }
    }

    /// Set the category.
    pub fn category(mut self, category: Option<Category>) -> Self {
        self.category = category;
        self
    }

    /// Set the note.
    pub fn note(mut self, note: &str) -> Self {
        self.note = note.to_owned();
        self
    }

    /// Parse the text of an amount input.
    ///
    /// Empty and non-numeric text, as well as NaN and infinities, give `None` so
    /// they can never be mistaken for a valid amount of zero.
    pub fn parse_amount(text: &str) -> Option<f64> {
        text.trim()
            .parse::<f64>()
            .ok()
            .filter(|amount| amount.is_finite())
    }

    /// Pre-fill a candidate from an existing entry so it can be edited.
    ///
    /// An amount of zero (which only comes from a malformed record) is shown as an
    /// empty amount input so the user has to enter a real one.
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            title: entry.title.clone(),
            amount: Some(entry.amount).filter(|amount| *amount != 0.0),
            kind: Some(entry.kind),
            category: entry.category,
            note: entry.note.clone().unwrap_or_default(),
        }
    }

    /// Check every rule and return the first one that fails.
    ///
    /// # Errors
    /// Returns the [ValidationError] for the first failed rule, checked in the order
    /// title, amount, kind.
    pub fn check(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }

        match self.amount {
            Some(amount) if amount.is_finite() && amount > 0.0 => {}
            _ => return Err(ValidationError::InvalidAmount),
        }

        if self.kind.is_none() {
            return Err(ValidationError::MissingKind);
        }

        Ok(())
    }

    /// Validate the candidate and convert it into the fields sent to the store.
    ///
    /// The title and note are trimmed and a blank note becomes absent.
    ///
    /// # Errors
    /// Returns a [ValidationError] if [EntryCandidate::check] fails.
    pub fn normalize(&self) -> Result<EntryFields, ValidationError> {
        self.check()?;

        let (Some(amount), Some(kind)) = (self.amount, self.kind) else {
            // check() has already rejected both of these.
            return Err(ValidationError::InvalidAmount);
        };

        let note = self.note.trim();

        Ok(EntryFields {
            title: self.title.trim().to_owned(),
            amount,
            kind,
            category: self.category,
            note: (!note.is_empty()).then(|| note.to_owned()),
        })
    }
}

/// Whether `candidate` may be submitted to the store.
///
/// Category and note never affect the result.
pub fn validate(candidate: &EntryCandidate) -> bool {
    candidate.check().is_ok()
}

#[cfg(test)]
mod validate_tests {
    use crate::entry::{Category, EntryCandidate, EntryKind, ValidationError, validate};

    fn lunch() -> EntryCandidate {
        EntryCandidate::new("Lunch", 120.0, EntryKind::Expense)
    }

    #[test]
    fn accepts_complete_candidate() {
        assert!(validate(&lunch()));
    }

    #[test]
    fn rejects_empty_and_whitespace_titles() {
        for title in ["", " ", "\n\t \r"] {
            let candidate = EntryCandidate {
                title: title.to_owned(),
                ..lunch()
            };

            assert!(!validate(&candidate), "title {title:?} should be rejected");
            assert_eq!(candidate.check(), Err(ValidationError::EmptyTitle));
        }
    }

    #[test]
    fn rejects_non_positive_amounts() {
        for amount in [0.0, -0.0, -1.0, -120.5] {
            let candidate = EntryCandidate {
                amount: Some(amount),
                ..lunch()
            };

            assert!(!validate(&candidate), "amount {amount} should be rejected");
        }
    }

    #[test]
    fn rejects_missing_and_non_finite_amounts() {
        for amount in [None, Some(f64::NAN), Some(f64::INFINITY)] {
            let candidate = EntryCandidate { amount, ..lunch() };

            assert_eq!(candidate.check(), Err(ValidationError::InvalidAmount));
        }
    }

    #[test]
    fn rejects_missing_kind() {
        let candidate = EntryCandidate {
            kind: None,
            ..lunch()
        };

        assert!(!validate(&candidate));
        assert_eq!(candidate.check(), Err(ValidationError::MissingKind));
    }

    #[test]
    fn category_and_note_do_not_affect_validity() {
        let candidate = lunch().category(Some(Category::Other)).note("   ");

        assert!(validate(&candidate));
    }

    #[test]
    fn income_with_empty_title_is_invalid() {
        let candidate = EntryCandidate::new("", 50.0, EntryKind::Income);

        assert!(!validate(&candidate));
    }
}

#[cfg(test)]
mod parse_amount_tests {
    use crate::entry::EntryCandidate;

    #[test]
    fn parses_numbers() {
        assert_eq!(EntryCandidate::parse_amount("120"), Some(120.0));
        assert_eq!(EntryCandidate::parse_amount(" 12.5 "), Some(12.5));
    }

    #[test]
    fn empty_and_non_numeric_input_is_none() {
        for text in ["", "   ", "abc", "12abc", "NaN", "inf"] {
            assert_eq!(EntryCandidate::parse_amount(text), None, "input {text:?}");
        }
    }
}
