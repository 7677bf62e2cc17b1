//! # Borrow Tracking Module
//!
//! Per-view read/write borrow tracker for chunk columns.
//!
//! ## Purpose
//!
//! Cross-job exclusion is the scheduler's job: conflicting jobs never run at
//! the same time. Inside one job, however, a body can ask a
//! [`crate::ChunkView`] for the same column twice. This tracker enforces
//! Rust's aliasing rules on those requests at runtime:
//!
//! - A column may be borrowed for reading any number of times.
//! - A column borrowed for writing may not be borrowed again at all.
//!
//! A conflicting request fails immediately with
//! [`ExecutionError::BorrowConflict`]. Nothing blocks, since a single job
//! waiting on itself would never make progress.
//!
//! ## State Encoding
//!
//! | State | Meaning |
//! |------:|--------|
//! | `0` | Unborrowed |
//! | `1` | Write-borrowed |
//! | `>= 2` | Read-borrowed (`state - 1` active readers) |
//!
//! ## Threading
//!
//! The tracker uses `Cell`s. A view lives on one worker thread at a time, so
//! the tracker is `Send` but not `Sync`.

use std::cell::Cell;

use crate::engine::error::ExecutionError;
use crate::engine::types::ComponentID;


/// Tracks column borrows handed out by one chunk view.

#[derive(Debug, Default)]
pub struct BorrowTracker {
    states: Vec<(ComponentID, Cell<usize>)>,
}

impl BorrowTracker {
    /// Creates a tracker covering `components`, all unborrowed.
    pub fn new(components: impl IntoIterator<Item = ComponentID>) -> Self {
        Self { states: components.into_iter().map(|c| (c, Cell::new(0))).collect() }
    }

    fn state(&self, component_id: ComponentID) -> Option<&Cell<usize>> {
        self.states.iter().find(|(c, _)| *c == component_id).map(|(_, s)| s)
    }

    /// Acquires a **shared (read) borrow**.
    ///
    /// ## State Transitions
    ///
    /// - `0 → 2` : first reader
    /// - `N → N+1` : additional reader
    /// - `1` : conflict

    pub fn try_acquire_read(
        &self,
        component_id: ComponentID,
        name: &'static str,
    ) -> Result<(), ExecutionError> {
        let Some(state) = self.state(component_id) else {
            return Err(ExecutionError::BorrowConflict { component: name });
        };
        match state.get() {
            1 => Err(ExecutionError::BorrowConflict { component: name }),
            0 => {
                state.set(2);
                Ok(())
            }
            n => {
                state.set(n + 1);
                Ok(())
            }
        }
    }

    /// Releases a shared borrow taken by [`try_acquire_read`](Self::try_acquire_read).
    pub fn release_read(&self, component_id: ComponentID) {
        if let Some(state) = self.state(component_id) {
            let previous = state.get();
            debug_assert!(previous >= 2);
            state.set(if previous == 2 { 0 } else { previous - 1 });
        }
    }

    /// Acquires an **exclusive (write) borrow**.
    ///
    /// ## State Transition
    ///
    /// - `0 → 1`
    /// - anything else : conflict

    pub fn try_acquire_write(
        &self,
        component_id: ComponentID,
        name: &'static str,
    ) -> Result<(), ExecutionError> {
        match self.state(component_id) {
            Some(state) if state.get() == 0 => {
                state.set(1);
                Ok(())
            }
            _ => Err(ExecutionError::BorrowConflict { component: name }),
        }
    }

    /// Releases an exclusive borrow.
    pub fn release_write(&self, component_id: ComponentID) {
        if let Some(state) = self.state(component_id) {
            debug_assert_eq!(state.get(), 1);
            state.set(0);
        }
    }
}
