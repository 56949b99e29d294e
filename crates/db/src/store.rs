//! Storage contract for the user directory.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{TradeKey, TradeRecord, User};

/// A document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub doc: T,
}

/// Precondition a write places on the stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// The document must not exist yet.
    Absent,
    /// The document must still be at this version.
    Version(u64),
    /// Unconditional write.
    Any,
}

impl Expect {
    /// Expectation matching how a document was read: absent or at its version.
    pub fn from_read<T>(read: Option<&Versioned<T>>) -> Self {
        match read {
            Some(found) => Expect::Version(found.version),
            None => Expect::Absent,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Write {
    PutUser { user: User, expect: Expect },
    PutTrade { record: TradeRecord, expect: Expect },
    /// Holds the batch to the ledger record as read without rewriting it.
    CheckTrade { key: TradeKey, expect: Expect },
}

impl Write {
    pub fn describe(&self) -> String {
        match self {
            Write::PutUser { user, .. } => format!("user:{}", user.username),
            Write::PutTrade { record, .. } => format!("trade:{}", record.key),
            Write::CheckTrade { key, .. } => format!("trade:{key}"),
        }
    }
}

/// An ordered set of conditional writes.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_user(mut self, user: User, expect: Expect) -> Self {
        self.writes.push(Write::PutUser { user, expect });
        self
    }

    pub fn put_trade(mut self, record: TradeRecord, expect: Expect) -> Self {
        self.writes.push(Write::PutTrade { record, expect });
        self
    }

    pub fn check_trade(mut self, key: TradeKey, expect: Expect) -> Self {
        self.writes.push(Write::CheckTrade { key, expect });
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("version conflict on {document}")]
    VersionConflict { document: String },

    #[error("batch torn after {applied} of {total} writes: {reason}")]
    Partial {
        applied: usize,
        total: usize,
        reason: String,
    },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Document store holding users and the trade ledger.
///
/// `commit` must either apply every write of the batch or none, failing
/// with `VersionConflict` when any expectation does not hold. Backends
/// that cannot guarantee this report `Partial` so callers can repair.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, username: &str) -> Result<Option<Versioned<User>>, StoreError>;

    async fn list_users(&self) -> Result<Vec<Versioned<User>>, StoreError>;

    async fn get_trade(&self, key: &TradeKey)
        -> Result<Option<Versioned<TradeRecord>>, StoreError>;

    async fn list_trades(&self) -> Result<Vec<Versioned<TradeRecord>>, StoreError>;

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}
