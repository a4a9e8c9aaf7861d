//! Create, update and delete entries through an explicit save-state machine.
//!
//! A [MutationController] runs one mutation at a time:
//!
//! ```text
//! Idle ──> Validating ──> Saving ──> Succeeded | Failed ──> Idle
//!   │                       ^
//!   └──> PendingConfirmation┘   (delete only, after confirm_delete)
//! ```
//!
//! Invalid input goes straight from `Validating` back to `Idle` without touching the
//! store. Terminal states stay visible until the caller acknowledges them or starts
//! another mutation.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    Error,
    entry::{EntryCandidate, EntryId},
    store::RecordStore,
};

/// Where a [MutationController] is in its save cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveState {
    /// Nothing is happening, a new mutation may start.
    Idle,
    /// A delete of the entry has been requested and is waiting for the caller to
    /// confirm or cancel it.
    PendingConfirmation(EntryId),
    /// The input of a create or update is being checked.
    Validating,
    /// The store has been asked to save a change and has not answered yet.
    Saving,
    /// The store accepted the change to the entry with this ID.
    Succeeded(EntryId),
    /// The store rejected the change. Holds the reason for display.
    Failed(String),
}

impl SaveState {
    /// Whether a mutation is in flight, during which new submissions are rejected.
    pub fn is_busy(&self) -> bool {
        matches!(self, SaveState::Validating | SaveState::Saving)
    }

    /// Whether the state is one of the two outcomes of a save.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SaveState::Succeeded(_) | SaveState::Failed(_))
    }
}

/// Drives validated create, update and delete operations against a record store.
///
/// Only one mutation may be in flight per controller. A submission made while another
/// is being validated or saved fails with [Error::SaveInProgress] and has no side
/// effects. Failed saves are reported and never retried.
pub struct MutationController {
    store: Arc<dyn RecordStore>,
    collection: String,
    state: watch::Sender<SaveState>,
}

impl MutationController {
    /// Create a controller that writes to `collection`.
    pub fn new(store: Arc<dyn RecordStore>, collection: &str) -> Self {
        let (state, _) = watch::channel(SaveState::Idle);

        Self {
            store,
            collection: collection.to_owned(),
            state,
        }
    }

    /// The current state.
    pub fn state(&self) -> SaveState {
        self.state.borrow().clone()
    }

    /// Watch state changes, e.g. to disable a submit button while saving.
    pub fn watch_state(&self) -> watch::Receiver<SaveState> {
        self.state.subscribe()
    }

    /// Whether a save is in flight.
    pub fn is_saving(&self) -> bool {
        self.state.borrow().is_busy()
    }

    /// The entry waiting for delete confirmation, if any.
    pub fn pending_delete(&self) -> Option<EntryId> {
        match &*self.state.borrow() {
            SaveState::PendingConfirmation(id) => Some(id.clone()),
            _ => None,
        }
    }

    /// Mark a terminal state as observed and return to [SaveState::Idle].
    ///
    /// Returns the state that was observed. Has no effect in any other state.
    pub fn acknowledge(&self) -> SaveState {
        let observed = self.state();

        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                *state = SaveState::Idle;
                true
            } else {
                false
            }
        });

        observed
    }

    /// Validate `candidate` and add it to the store.
    ///
    /// On success the controller is left in [SaveState::Succeeded] with the new ID.
    ///
    /// # Errors
    /// - [Error::SaveInProgress] if another mutation is in flight,
    /// - [Error::AwaitingDeleteConfirmation] if a delete is waiting for confirmation,
    /// - [Error::Validation] if the candidate is invalid (the store is not called),
    /// - or the store's error if saving failed.
    pub async fn create(&self, candidate: &EntryCandidate) -> Result<EntryId, Error> {
        let in_flight = self.begin_validation("create")?;

        let fields = match candidate.normalize() {
            Ok(fields) => fields,
            Err(error) => return Err(in_flight.reject(error.into())),
        };

        in_flight.saving();
        let result = self
            .store
            .create_document(&self.collection, fields.to_document())
            .await;

        in_flight.finish(result)
    }

    /// Validate `candidate` and write its fields over the entry `id`.
    ///
    /// The entry's creation time is never changed. An entry that no longer exists
    /// fails like any other save.
    ///
    /// # Errors
    /// The same as [MutationController::create].
    pub async fn update(&self, id: &EntryId, candidate: &EntryCandidate) -> Result<(), Error> {
        let in_flight = self.begin_validation("update")?;

        let fields = match candidate.normalize() {
            Ok(fields) => fields,
            Err(error) => return Err(in_flight.reject(error.into())),
        };

        in_flight.saving();
        let result = self
            .store
            .update_document(&self.collection, id, fields.to_document())
            .await
            .map(|_| id.clone());

        in_flight.finish(result).map(|_| ())
    }

    /// Ask for confirmation before deleting the entry `id`.
    ///
    /// Nothing is sent to the store until [MutationController::confirm_delete] is
    /// called. Requesting again replaces the entry waiting for confirmation.
    ///
    /// # Errors
    /// Returns [Error::SaveInProgress] if another mutation is in flight.
    pub fn request_delete(&self, id: EntryId) -> Result<(), Error> {
        let mut accepted = false;

        self.state.send_if_modified(|state| {
            if state.is_busy() {
                return false;
            }

            *state = SaveState::PendingConfirmation(id.clone());
            accepted = true;
            true
        });

        if accepted {
            tracing::debug!("Waiting for confirmation to delete entry {id}");
            Ok(())
        } else {
            Err(Error::SaveInProgress)
        }
    }

    /// Dismiss a pending delete and return to [SaveState::Idle].
    ///
    /// Returns false if no delete was waiting for confirmation.
    pub fn cancel_delete(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, SaveState::PendingConfirmation(_)) {
                *state = SaveState::Idle;
                true
            } else {
                false
            }
        })
    }

    /// Delete the entry that is waiting for confirmation.
    ///
    /// # Errors
    /// - [Error::SaveInProgress] if another mutation is in flight,
    /// - [Error::NoPendingDelete] if [MutationController::request_delete] was not
    ///   called first,
    /// - or the store's error if deleting failed.
    pub async fn confirm_delete(&self) -> Result<EntryId, Error> {
        let mut outcome = Err(Error::NoPendingDelete);

        self.state.send_if_modified(|state| match state {
            SaveState::PendingConfirmation(id) => {
                outcome = Ok(id.clone());
                *state = SaveState::Saving;
                true
            }
            SaveState::Validating | SaveState::Saving => {
                outcome = Err(Error::SaveInProgress);
                false
            }
            _ => false,
        });

        let id = outcome?;
        let in_flight = InFlight::new(&self.state, "delete");
        let result = self
            .store
            .delete_document(&self.collection, &id)
            .await
            .map(|_| id);

        in_flight.finish(result)
    }

    /// Move to [SaveState::Validating] unless another mutation holds the controller.
    fn begin_validation(&self, action: &'static str) -> Result<InFlight<'_>, Error> {
        let mut outcome = Ok(());

        self.state.send_if_modified(|state| match state {
            SaveState::Validating | SaveState::Saving => {
                outcome = Err(Error::SaveInProgress);
                false
            }
            SaveState::PendingConfirmation(_) => {
                outcome = Err(Error::AwaitingDeleteConfirmation);
                false
            }
            SaveState::Idle | SaveState::Succeeded(_) | SaveState::Failed(_) => {
                *state = SaveState::Validating;
                true
            }
        });

        match outcome {
            Ok(()) => Ok(InFlight::new(&self.state, action)),
            Err(error) => {
                tracing::debug!("Rejected submission: {error}");
                Err(error)
            }
        }
    }
}

/// Holds a [MutationController] while one of its mutations is validating or saving.
///
/// Every path out of a mutation goes through [InFlight::reject] or
/// [InFlight::finish]. If the guard is dropped first, e.g. because the caller's
/// future was cancelled, the controller moves to [SaveState::Failed] with
/// [Error::SaveCancelled] so it can accept the next submission.
struct InFlight<'a> {
    state: &'a watch::Sender<SaveState>,
    action: &'static str,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn new(state: &'a watch::Sender<SaveState>, action: &'static str) -> Self {
        Self {
            state,
            action,
            settled: false,
        }
    }

    fn saving(&self) {
        self.state.send_replace(SaveState::Saving);
    }

    fn reject(mut self, error: Error) -> Error {
        tracing::debug!("Entry failed validation: {error}");
        self.settle(SaveState::Idle);
        error
    }

    fn finish(mut self, result: Result<EntryId, Error>) -> Result<EntryId, Error> {
        match &result {
            Ok(id) => {
                tracing::info!("Finished {} of entry {id}", self.action);
                self.settle(SaveState::Succeeded(id.clone()));
            }
            Err(error) => {
                tracing::error!("Failed to {} entry: {error}", self.action);
                self.settle(SaveState::Failed(error.to_string()));
            }
        }

        result
    }

    fn settle(&mut self, state: SaveState) {
        self.settled = true;
        self.state.send_replace(state);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("The {} was cancelled before the store answered", self.action);
            self.state
                .send_replace(SaveState::Failed(Error::SaveCancelled.to_string()));
        }
    }
}
