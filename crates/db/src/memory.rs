use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{TradeKey, TradeRecord, User};
use crate::store::{Expect, StoreError, UserDirectory, Versioned, Write, WriteBatch};

#[derive(Default)]
struct Tables {
    users: HashMap<String, Versioned<User>>,
    trades: HashMap<TradeKey, Versioned<TradeRecord>>,
}

/// In-process directory. A single write lock covers the whole batch, so
/// commits are atomic and serializable.
#[derive(Default)]
pub struct MemoryDirectory {
    tables: RwLock<Tables>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check(
    expect: Expect,
    current: Option<u64>,
    document: impl FnOnce() -> String,
) -> Result<(), StoreError> {
    let holds = match (expect, current) {
        (Expect::Any, _) => true,
        (Expect::Absent, None) => true,
        (Expect::Version(wanted), Some(found)) => wanted == found,
        _ => false,
    };
    if holds {
        Ok(())
    } else {
        Err(StoreError::VersionConflict {
            document: document(),
        })
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn get_user(&self, username: &str) -> Result<Option<Versioned<User>>, StoreError> {
        Ok(self.tables.read().await.users.get(username).cloned())
    }

    async fn list_users(&self) -> Result<Vec<Versioned<User>>, StoreError> {
        let tables = self.tables.read().await;
        let mut users: Vec<_> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| a.doc.username.cmp(&b.doc.username));
        Ok(users)
    }

    async fn get_trade(
        &self,
        key: &TradeKey,
    ) -> Result<Option<Versioned<TradeRecord>>, StoreError> {
        Ok(self.tables.read().await.trades.get(key).cloned())
    }

    async fn list_trades(&self) -> Result<Vec<Versioned<TradeRecord>>, StoreError> {
        let tables = self.tables.read().await;
        let mut trades: Vec<_> = tables.trades.values().cloned().collect();
        trades.sort_by(|a, b| a.doc.key.cmp(&b.doc.key));
        Ok(trades)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;

        for write in batch.writes() {
            match write {
                Write::PutUser { user, expect } => {
                    let current = tables.users.get(&user.username).map(|u| u.version);
                    check(*expect, current, || write.describe())?;
                }
                Write::PutTrade { record, expect } => {
                    let current = tables.trades.get(&record.key).map(|t| t.version);
                    check(*expect, current, || write.describe())?;
                }
                Write::CheckTrade { key, expect } => {
                    let current = tables.trades.get(key).map(|t| t.version);
                    check(*expect, current, || write.describe())?;
                }
            }
        }

        let total = batch.len();
        for write in batch.into_writes() {
            match write {
                Write::PutUser { user, .. } => {
                    let version = tables.users.get(&user.username).map_or(1, |u| u.version + 1);
                    tables
                        .users
                        .insert(user.username.clone(), Versioned { version, doc: user });
                }
                Write::PutTrade { record, .. } => {
                    let version = tables.trades.get(&record.key).map_or(1, |t| t.version + 1);
                    tables
                        .trades
                        .insert(record.key.clone(), Versioned { version, doc: record });
                }
                Write::CheckTrade { .. } => {}
            }
        }

        tracing::trace!(target: "bookswap-db", writes = total, "batch committed");
        Ok(())
    }
}
