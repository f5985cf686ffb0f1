//! The transaction scope: per unit-of-work state shared by every handler call.
//!
//! A scope starts `Unstarted`, becomes `Active` when the handler begins the
//! transaction on first use, and ends `Committed` or `RolledBack`. Callers
//! create one scope per unit of work and pass it by `&mut` to each handler
//! operation, which keeps calls on one scope serialized.

use std::fmt;

/// Payload-free view of a scope's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Unstarted,
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Unstarted => write!(f, "unstarted"),
            TxState::Active => write!(f, "active"),
            TxState::Committed => write!(f, "committed"),
            TxState::RolledBack => write!(f, "rolled back"),
        }
    }
}

pub(crate) enum ScopeState<T> {
    Unstarted,
    Active(T),
    Committed,
    RolledBack,
}

/// Carrier for at most one live transaction handle.
pub struct TxScope<T> {
    pub(crate) state: ScopeState<T>,
}

impl<T> TxScope<T> {
    pub fn new() -> Self {
        Self {
            state: ScopeState::Unstarted,
        }
    }

    pub fn state(&self) -> TxState {
        match self.state {
            ScopeState::Unstarted => TxState::Unstarted,
            ScopeState::Active(_) => TxState::Active,
            ScopeState::Committed => TxState::Committed,
            ScopeState::RolledBack => TxState::RolledBack,
        }
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self.state, ScopeState::RolledBack)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ScopeState::Active(_))
    }

    /// Terminal scopes refuse every further operation.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, ScopeState::Committed | ScopeState::RolledBack)
    }

    /// The live transaction handle, if one has been begun.
    pub fn transaction(&self) -> Option<&T> {
        match &self.state {
            ScopeState::Active(tx) => Some(tx),
            _ => None,
        }
    }

    /// Take the live handle out and move to `next`.
    pub(crate) fn finish(&mut self, next: ScopeState<T>) -> Option<T> {
        match std::mem::replace(&mut self.state, next) {
            ScopeState::Active(tx) => Some(tx),
            _ => None,
        }
    }
}

impl<T> Default for TxScope<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TxScope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxScope")
            .field("state", &self.state())
            .finish()
    }
}
