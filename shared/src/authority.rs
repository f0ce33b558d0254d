//! Access layer for authoritative fields.
//!
//! Every replicated field has exactly one state-authority: the server
//! process. Writes go through [`Replicated::write`], which rejects any
//! process other than the authority. Observers only ever receive values
//! through [`Replicated::apply_authoritative`].

use crate::ClientId;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use thiserror::Error;

/// Which process is acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    Server,
    Client(ClientId),
}

/// Raised when a process touches state or input it does not own.
///
/// This is a programming error, not a runtime condition: callers log it and
/// carry on, tests assert on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotAuthorized {
    #[error("{writer:?} attempted to write state owned by {authority:?}")]
    StateWrite {
        authority: ProcessId,
        writer: ProcessId,
    },
    #[error("client {submitter} submitted input for an entity owned by {owner:?}")]
    Input {
        owner: Option<ClientId>,
        submitter: ClientId,
    },
}

/// A value whose writes are gated on state-authority.
#[derive(Debug, Clone)]
pub struct Replicated<T> {
    value: T,
    authority: ProcessId,
    revision: u32,
}

impl<T> Replicated<T> {
    pub fn new(authority: ProcessId, value: T) -> Self {
        Self {
            value,
            authority,
            revision: 0,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn authority(&self) -> ProcessId {
        self.authority
    }

    /// Bumped on every authoritative write or receipt.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Grants mutable access to the authority and nobody else.
    pub fn write(&mut self, writer: ProcessId) -> Result<&mut T, NotAuthorized> {
        if writer != self.authority {
            return Err(NotAuthorized::StateWrite {
                authority: self.authority,
                writer,
            });
        }
        self.revision = self.revision.wrapping_add(1);
        Ok(&mut self.value)
    }

    /// Observer path: overwrite with a value received from the authority.
    pub fn apply_authoritative(&mut self, value: T) {
        self.value = value;
        self.revision = self.revision.wrapping_add(1);
    }
}

impl<T> Deref for Replicated<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Only the owning client may submit input for an entity. Entities without
/// an input-authority (projectiles) accept input from nobody.
pub fn check_input_authority(
    owner: Option<ClientId>,
    submitter: ClientId,
) -> Result<(), NotAuthorized> {
    match owner {
        Some(owner) if owner == submitter => Ok(()),
        _ => Err(NotAuthorized::Input { owner, submitter }),
    }
}
