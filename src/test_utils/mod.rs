#![allow(missing_docs)]

pub(crate) mod stores;

pub(crate) use stores::{FailingStore, GatedStore};
