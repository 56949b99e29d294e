//! Aligning both sides of a trade with its ledger record.
//!
//! The ledger record is the first write of every paired batch, so after a
//! torn batch it holds the intended state. Repair rolls the user documents
//! forward to it; entries without any ledger record are orphans and are
//! dropped.

use std::collections::BTreeSet;

use bookswap_db::{
    Expect, StoreError, TradeKey, TradeRecord, TradeState, User, Versioned, WriteBatch,
};
use serde::Serialize;
use tracing::{info, warn};

use super::workflow::TradeService;
use crate::error::DomainError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub repaired: usize,
    pub failed: usize,
}

impl TradeService {
    /// Bring owner and requester in line with the ledger for `key`.
    /// Returns whether anything had to change.
    pub async fn repair(&self, key: &TradeKey) -> Result<bool, DomainError> {
        for attempt in 0..=self.commit_retries {
            let ledger = self.directory.get_trade(key).await?;
            let owner = self.directory.get_user(&key.owner).await?;
            let requester = self.directory.get_user(&key.requester).await?;

            let record = ledger.as_ref().map(|found| &found.doc);
            let mut changed = Vec::with_capacity(2);

            if let Some(Versioned { version, mut doc }) = owner {
                if align_owner(&mut doc, key, record) {
                    changed.push((doc, version));
                }
            }
            if let Some(Versioned { version, mut doc }) = requester {
                if align_requester(&mut doc, key, record) {
                    changed.push((doc, version));
                }
            }

            if changed.is_empty() {
                return Ok(false);
            }

            // A transition committed after the ledger read must void this plan.
            let mut batch =
                WriteBatch::new().check_trade(key.clone(), Expect::from_read(ledger.as_ref()));
            for (doc, version) in changed {
                batch = batch.put_user(doc, Expect::Version(version));
            }

            match self.directory.commit(batch).await {
                Ok(()) => {
                    info!(
                        %key,
                        state = ?record.map(|r| r.state),
                        "trade sides realigned with ledger"
                    );
                    return Ok(true);
                }
                Err(StoreError::VersionConflict { document }) => {
                    warn!(%key, attempt, %document, "repair raced another update; retrying");
                }
                Err(StoreError::Partial { reason, .. }) => {
                    return Err(DomainError::PartialFailure {
                        key: key.to_string(),
                        reason,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(DomainError::Conflict(format!(
            "repair of {key} kept losing to concurrent updates"
        )))
    }

    /// Repair every trade key known to the ledger or referenced by any user.
    pub async fn reconcile(&self) -> Result<ReconcileReport, DomainError> {
        let mut keys = BTreeSet::new();

        for trade in self.directory.list_trades().await? {
            keys.insert(trade.doc.key);
        }
        for user in self.directory.list_users().await? {
            let user = user.doc;
            for wish in &user.wishlist {
                keys.insert(TradeKey::new(&wish.owner, &user.username, &wish.isbn));
            }
            for request in &user.requestlist {
                keys.insert(TradeKey::new(&user.username, &request.requester, &request.isbn));
            }
        }

        let mut report = ReconcileReport {
            checked: keys.len(),
            ..ReconcileReport::default()
        };

        for key in &keys {
            match self.repair(key).await {
                Ok(true) => report.repaired += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(%key, error = %err, "reconciliation could not repair trade");
                    report.failed += 1;
                }
            }
        }

        if report.repaired > 0 || report.failed > 0 {
            warn!(
                checked = report.checked,
                repaired = report.repaired,
                failed = report.failed,
                "reconciliation pass found divergent trades"
            );
        } else {
            info!(checked = report.checked, "reconciliation pass clean");
        }

        Ok(report)
    }
}

/// Whether the ledger expects both entries to exist.
fn live(record: Option<&TradeRecord>) -> Option<&TradeRecord> {
    record.filter(|r| matches!(r.state, TradeState::Proposed | TradeState::Accepted))
}

fn align_owner(owner: &mut User, key: &TradeKey, record: Option<&TradeRecord>) -> bool {
    let current: Vec<_> = owner
        .requestlist
        .iter()
        .filter(|entry| entry.requester == key.requester && entry.isbn == key.isbn)
        .cloned()
        .collect();

    match live(record) {
        Some(record) => {
            let wanted = record.request_entry();
            if current.len() == 1 && current[0] == wanted {
                return false;
            }
            let owner_saw_accept = current.iter().any(|e| e.trade_id == record.id && e.accepted);
            owner.pull_request(&key.requester, &key.isbn);
            owner.requestlist.push(wanted);
            // The accept batch drops the book in the same document write that
            // flips the flag, so the book is still there only if that write was lost.
            if record.state == TradeState::Accepted && !owner_saw_accept {
                owner.pull_book(&key.isbn);
            }
            true
        }
        None => owner.pull_request(&key.requester, &key.isbn),
    }
}

fn align_requester(requester: &mut User, key: &TradeKey, record: Option<&TradeRecord>) -> bool {
    let current: Vec<_> = requester
        .wishlist
        .iter()
        .filter(|entry| entry.owner == key.owner && entry.isbn == key.isbn)
        .cloned()
        .collect();

    match live(record) {
        Some(record) => {
            let wanted = record.wishlist_entry();
            if current.len() == 1 && current[0] == wanted {
                return false;
            }
            requester.pull_wish(&key.owner, &key.isbn);
            requester.wishlist.push(wanted);
            true
        }
        None => requester.pull_wish(&key.owner, &key.isbn),
    }
}
