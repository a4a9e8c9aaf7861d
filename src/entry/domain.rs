//! Core ledger entry domain types.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// The opaque identifier the record store assigns to an entry when it is created.
///
/// IDs are stable for the lifetime of an entry and are never reused after deletion.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(String);

impl EntryId {
    /// Wrap a store-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl AsRef<str> for EntryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<i64> for EntryId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl FromStr for EntryId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether money was earned or spent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Money coming in, e.g. a salary payment.
    Income,
    /// Money going out, e.g. lunch.
    Expense,
}

impl EntryKind {
    /// The name used for the kind in stored documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Income => "income",
            EntryKind::Expense => "expense",
        }
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(EntryKind::Income),
            "expense" => Ok(EntryKind::Expense),
            other => Err(format!("unknown entry kind \"{other}\"")),
        }
    }
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of categories an entry may be filed under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum Category {
    Salary,
    Food,
    Transport,
    Bills,
    Shopping,
    Other,
}

impl Category {
    /// Every category, in the order they are offered to the user.
    pub const ALL: [Category; 6] = [
        Category::Salary,
        Category::Food,
        Category::Transport,
        Category::Bills,
        Category::Shopping,
        Category::Other,
    ];

    /// The name used for the category in stored documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Salary => "salary",
            Category::Food => "food",
            Category::Transport => "transport",
            Category::Bills => "bills",
            Category::Shopping => "shopping",
            Category::Other => "other",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| format!("unknown category \"{s}\""))
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single income or expense record as published by the
/// [SyncEngine](crate::SyncEngine).
///
/// Entries are only ever built from store snapshots, so `id` and `created_at`
/// always come from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// The ID the store assigned to the entry.
    pub id: EntryId,
    /// A short description of the entry, e.g. "Lunch".
    pub title: String,
    /// How much money was earned or spent. Always positive, `kind` gives the direction.
    pub amount: f64,
    /// Whether this entry is income or an expense.
    pub kind: EntryKind,
    /// The optional category of the entry.
    pub category: Option<Category>,
    /// Optional free text.
    pub note: Option<String>,
    /// When the store created the entry.
    ///
    /// `None` means the stored record had no readable timestamp. It is treated as the
    /// earliest possible time when ordering entries.
    pub created_at: Option<OffsetDateTime>,
}

/// The normalized, mutable fields of an entry that are sent to the store on
/// create and update.
///
/// Use [EntryCandidate::normalize](crate::EntryCandidate::normalize) to build
/// one from user input.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFields {
    /// The trimmed, non-empty title.
    pub title: String,
    /// A finite amount greater than zero.
    pub amount: f64,
    /// Whether the entry is income or an expense.
    pub kind: EntryKind,
    /// The optional category.
    pub category: Option<Category>,
    /// The trimmed note, absent if it was blank.
    pub note: Option<String>,
}

impl EntryFields {
    /// Convert the fields into the document shape used by the store.
    ///
    /// Absent optional fields are written as `null` so that an update clears them.
    /// `createdAt` is never included, the store owns it.
    pub fn to_document(&self) -> Map<String, Value> {
        let mut document = Map::new();
        document.insert("title".to_owned(), Value::from(self.title.clone()));
        document.insert("amount".to_owned(), Value::from(self.amount));
        document.insert("type".to_owned(), Value::from(self.kind.as_str()));
        document.insert(
            "category".to_owned(),
            self.category
                .map_or(Value::Null, |category| Value::from(category.as_str())),
        );
        document.insert(
            "note".to_owned(),
            self.note.clone().map_or(Value::Null, Value::from),
        );

        document
    }
}
