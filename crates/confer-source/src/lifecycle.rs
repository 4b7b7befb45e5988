//! Source lifecycle: `Uninitialized -> Ready -> Closed`.
//!
//! Each source keeps its backend client in a [`ClientSlot`]. The client is
//! installed once by `init`, shared by concurrent requests while the source
//! is ready, and taken out again by `close`. A closed source never reopens.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{SourceError, SourceResult};

/// Observable lifecycle state of a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Ready,
    Closed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Closed => "closed",
        })
    }
}

enum Slot<C: ?Sized> {
    Uninitialized,
    Ready(Arc<C>),
    Closed,
}

/// Holder for a source's backend client.
pub struct ClientSlot<C: ?Sized> {
    repo: String,
    slot: RwLock<Slot<C>>,
}

impl<C: ?Sized> ClientSlot<C> {
    /// An empty slot for the repository named `repo`.
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            slot: RwLock::new(Slot::Uninitialized),
        }
    }

    pub fn state(&self) -> LifecycleState {
        match &*self.slot.read().expect("lock poisoned") {
            Slot::Uninitialized => LifecycleState::Uninitialized,
            Slot::Ready(_) => LifecycleState::Ready,
            Slot::Closed => LifecycleState::Closed,
        }
    }

    /// Fail unless the slot is still waiting for a client.
    ///
    /// Lets `init` bail out before connecting; [`ClientSlot::install`] checks
    /// again since another `init` may have raced in between.
    pub fn ensure_uninitialized(&self) -> SourceResult<()> {
        match &*self.slot.read().expect("lock poisoned") {
            Slot::Uninitialized => Ok(()),
            Slot::Ready(_) => Err(self.already_initialized()),
            Slot::Closed => Err(self.closed()),
        }
    }

    /// Install the client, moving to `Ready`.
    ///
    /// On failure the client is handed back so the caller can release it.
    pub fn install(&self, client: Arc<C>) -> Result<(), (SourceError, Arc<C>)> {
        let mut slot = self.slot.write().expect("lock poisoned");
        match &*slot {
            Slot::Uninitialized => {
                *slot = Slot::Ready(client);
                Ok(())
            }
            Slot::Ready(_) => Err((self.already_initialized(), client)),
            Slot::Closed => Err((self.closed(), client)),
        }
    }

    /// The client, if the source is ready.
    pub fn client(&self) -> SourceResult<Arc<C>> {
        match &*self.slot.read().expect("lock poisoned") {
            Slot::Ready(client) => Ok(Arc::clone(client)),
            Slot::Uninitialized => Err(self.not_ready()),
            Slot::Closed => Err(self.closed()),
        }
    }

    /// Move to `Closed`, returning the client for release.
    ///
    /// Requests already holding the client finish with it.
    pub fn take(&self) -> SourceResult<Arc<C>> {
        let mut slot = self.slot.write().expect("lock poisoned");
        match std::mem::replace(&mut *slot, Slot::Closed) {
            Slot::Ready(client) => Ok(client),
            Slot::Uninitialized => {
                *slot = Slot::Uninitialized;
                Err(self.not_ready())
            }
            Slot::Closed => Err(self.closed()),
        }
    }

    fn not_ready(&self) -> SourceError {
        SourceError::NotReady {
            repo: self.repo.clone(),
        }
    }

    fn closed(&self) -> SourceError {
        SourceError::Closed {
            repo: self.repo.clone(),
        }
    }

    fn already_initialized(&self) -> SourceError {
        SourceError::AlreadyInitialized {
            repo: self.repo.clone(),
        }
    }
}

impl<C: ?Sized> fmt::Debug for ClientSlot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSlot")
            .field("repo", &self.repo)
            .field("state", &self.state())
            .finish()
    }
}
