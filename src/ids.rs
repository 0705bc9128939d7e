use crate::error::{Error, Result};
use crate::types::TokenId;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Source of primary keys for new records.
pub trait IdGenerator: Send + Sync {
    /// Returns the next unused identifier.
    fn next_id(&self) -> Result<i64>;
}

/// In-process monotonically increasing id source.
#[derive(Debug)]
pub struct SequenceIds {
    next: AtomicI64,
}

impl SequenceIds {
    /// Starts the sequence at `first`.
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for SequenceIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequenceIds {
    fn next_id(&self) -> Result<i64> {
        // The counter parks at `i64::MAX` once exhausted.
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
            .map_err(|_| Error::InvalidId("id sequence exhausted".to_string()))
    }
}

/// Source of unique session token identifiers.
pub trait TokenIdGenerator: Send + Sync {
    /// Returns a fresh identifier, never reused.
    fn next_token_id(&self) -> TokenId;
}

/// Random UUIDv4 token identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidTokenIds;

impl TokenIdGenerator for UuidTokenIds {
    fn next_token_id(&self) -> TokenId {
        TokenId::from_string(Uuid::new_v4().to_string())
    }
}
