//! Propose / accept / reject / withdraw for paired trade requests.
//!
//! Each transition reads the owner, the requester and the ledger record for
//! the trade key, plans the new documents, and commits all of them as one
//! conditional batch. A version conflict means another request touched one
//! of the documents in between, so the transition is re-read and re-planned;
//! preconditions are therefore always evaluated against the state that is
//! actually committed over.

use std::sync::Arc;

use bookswap_db::model::now_unix;
use bookswap_db::{
    Expect, RequestEntry, StoreError, TradeKey, TradeRecord, TradeState, User, UserDirectory,
    Versioned, WriteBatch,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::CatalogLookup;
use crate::error::{catalog_id, required, DomainError};

/// Outcome of a successful transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeReceipt {
    pub trade_id: Uuid,
    pub state: TradeState,
    pub owner: String,
    pub requester: String,
    pub isbn: String,
}

impl TradeReceipt {
    fn of(record: &TradeRecord) -> Self {
        Self {
            trade_id: record.id,
            state: record.state,
            owner: record.key.owner.clone(),
            requester: record.key.requester.clone(),
            isbn: record.key.isbn.clone(),
        }
    }
}

/// Owner, requester and ledger as read for one attempt.
pub(crate) struct Snapshot {
    pub owner: Versioned<User>,
    pub requester: Versioned<User>,
    pub ledger: Option<Versioned<TradeRecord>>,
}

enum Guard {
    Clear,
    NeedsRepair,
}

/// What an attempt decided to do.
enum Plan {
    Commit(WriteBatch, TradeReceipt),
    /// The two sides disagree; align them with the ledger and re-plan.
    Repair,
}

pub struct TradeService {
    pub(crate) directory: Arc<dyn UserDirectory>,
    catalog: Arc<dyn CatalogLookup>,
    pub(crate) commit_retries: u32,
}

impl TradeService {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        catalog: Arc<dyn CatalogLookup>,
        commit_retries: u32,
    ) -> Self {
        Self {
            directory,
            catalog,
            commit_retries,
        }
    }

    /// Open a trade request from `requester` for `owner`'s copy of `isbn`.
    pub async fn propose(
        &self,
        requester: &str,
        owner: &str,
        isbn: &str,
        location: &str,
    ) -> Result<TradeReceipt, DomainError> {
        let key = trade_key(owner, requester, isbn)?;
        let location = required("location", location)?;

        // Cheap pre-flight so duplicates never cost a catalog round trip.
        let snapshot = self.load(&key).await?;
        let guard = propose_guard(
            &snapshot.owner.doc,
            &snapshot.requester.doc,
            snapshot.ledger.as_ref(),
            &key,
        )?;
        if let Guard::NeedsRepair = guard {
            self.repair(&key).await?;
        }

        let entry = self.catalog.resolve(&key.isbn).await?;

        self.run(&key, "propose", |snapshot| {
            let Snapshot {
                mut owner,
                mut requester,
                ledger,
            } = snapshot;

            let guard = propose_guard(&owner.doc, &requester.doc, ledger.as_ref(), &key)?;
            if let Guard::NeedsRepair = guard {
                return Ok(Plan::Repair);
            }

            let book = owner.doc.book(&key.isbn).ok_or_else(|| {
                DomainError::NotFound(format!("book '{}' on {}'s shelf", key.isbn, key.owner))
            })?;

            let record = TradeRecord {
                id: Uuid::now_v7(),
                key: key.clone(),
                state: TradeState::Proposed,
                title: entry.title.clone(),
                thumbnail: entry.thumbnail.clone().or_else(|| book.thumbnail.clone()),
                location: location.clone(),
                updated_at: now_unix(),
            };

            owner.doc.requestlist.push(record.request_entry());
            requester.doc.wishlist.push(record.wishlist_entry());

            let receipt = TradeReceipt::of(&record);
            let batch = WriteBatch::new()
                .put_trade(record, Expect::from_read(ledger.as_ref()))
                .put_user(owner.doc, Expect::Version(owner.version))
                .put_user(requester.doc, Expect::Version(requester.version));
            Ok(Plan::Commit(batch, receipt))
        })
        .await
    }

    /// Owner accepts: both flags flip to accepted and the owner's book leaves the shelf.
    pub async fn accept(
        &self,
        owner: &str,
        requester: &str,
        isbn: &str,
    ) -> Result<TradeReceipt, DomainError> {
        let key = trade_key(owner, requester, isbn)?;
        self.run(&key, "accept", |snapshot| {
            settle(snapshot, &key, TradeState::Accepted)
        })
        .await
    }

    /// Owner declines: both entries are deleted.
    pub async fn reject(
        &self,
        owner: &str,
        requester: &str,
        isbn: &str,
    ) -> Result<TradeReceipt, DomainError> {
        let key = trade_key(owner, requester, isbn)?;
        self.run(&key, "reject", |snapshot| {
            settle(snapshot, &key, TradeState::Rejected)
        })
        .await
    }

    /// Requester cancels an outstanding request: both entries are deleted.
    pub async fn withdraw(
        &self,
        requester: &str,
        owner: &str,
        isbn: &str,
    ) -> Result<TradeReceipt, DomainError> {
        let key = trade_key(owner, requester, isbn)?;
        self.run(&key, "withdraw", |snapshot| {
            settle(snapshot, &key, TradeState::Withdrawn)
        })
        .await
    }

    /// Requests on the owner's books still waiting for an answer.
    pub async fn incoming(&self, owner: &str) -> Result<Vec<RequestEntry>, DomainError> {
        let owner = self
            .directory
            .get_user(owner)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("user '{owner}'")))?;
        Ok(owner.doc.pending_requests().cloned().collect())
    }

    pub(crate) async fn load(&self, key: &TradeKey) -> Result<Snapshot, DomainError> {
        let owner = self
            .directory
            .get_user(&key.owner)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("user '{}'", key.owner)))?;
        let requester = self
            .directory
            .get_user(&key.requester)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("user '{}'", key.requester)))?;
        let ledger = self.directory.get_trade(key).await?;

        Ok(Snapshot {
            owner,
            requester,
            ledger,
        })
    }

    async fn run<F>(
        &self,
        key: &TradeKey,
        op: &'static str,
        mut plan: F,
    ) -> Result<TradeReceipt, DomainError>
    where
        F: FnMut(Snapshot) -> Result<Plan, DomainError>,
    {
        for attempt in 0..=self.commit_retries {
            let snapshot = self.load(key).await?;
            let (batch, receipt) = match plan(snapshot)? {
                Plan::Commit(batch, receipt) => (batch, receipt),
                Plan::Repair => {
                    warn!(%key, op, "trade sides disagree; repairing before retry");
                    self.repair(key).await?;
                    continue;
                }
            };

            match self.directory.commit(batch).await {
                Ok(()) => {
                    info!(
                        %key,
                        op,
                        trade_id = %receipt.trade_id,
                        state = ?receipt.state,
                        "trade transition committed"
                    );
                    return Ok(receipt);
                }
                Err(StoreError::VersionConflict { document }) => {
                    debug!(%key, op, attempt, %document, "concurrent update; re-planning");
                }
                Err(StoreError::Partial {
                    applied,
                    total,
                    reason,
                }) => {
                    warn!(%key, op, applied, total, %reason, "paired write torn; repairing");
                    return self.recover(key, receipt, reason).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(DomainError::Conflict(format!(
            "{op} on {key} kept losing to concurrent updates; try again"
        )))
    }

    /// Roll a torn batch forward to what the ledger recorded.
    async fn recover(
        &self,
        key: &TradeKey,
        receipt: TradeReceipt,
        reason: String,
    ) -> Result<TradeReceipt, DomainError> {
        if let Err(err) = self.repair(key).await {
            return Err(DomainError::PartialFailure {
                key: key.to_string(),
                reason: format!("{reason}; repair failed: {err}"),
            });
        }

        let ledger = self.directory.get_trade(key).await?;
        match ledger {
            Some(found) if found.doc.id == receipt.trade_id && found.doc.state == receipt.state => {
                warn!(%key, trade_id = %receipt.trade_id, "torn write repaired");
                Ok(receipt)
            }
            _ => Err(DomainError::PartialFailure {
                key: key.to_string(),
                reason: format!("{reason}; write did not reach the ledger and was rolled back"),
            }),
        }
    }
}

fn trade_key(owner: &str, requester: &str, isbn: &str) -> Result<TradeKey, DomainError> {
    let owner = required("owner", owner)?;
    let requester = required("requester", requester)?;
    if owner == requester {
        return Err(DomainError::validation(
            "owner",
            "cannot request a trade for your own book",
        ));
    }
    Ok(TradeKey::new(owner, requester, catalog_id(isbn)?))
}

/// Whether a triple may be proposed, given what the three documents hold.
fn propose_guard(
    owner: &User,
    requester: &User,
    ledger: Option<&Versioned<TradeRecord>>,
    key: &TradeKey,
) -> Result<Guard, DomainError> {
    if requester.wish(&key.owner, &key.isbn).is_some()
        || owner.request(&key.requester, &key.isbn).is_some()
    {
        return Err(DomainError::Conflict(format!(
            "a trade request for {key} already exists"
        )));
    }
    if let Some(ledger) = ledger {
        if matches!(ledger.doc.state, TradeState::Proposed | TradeState::Accepted) {
            // The ledger expects entries that are missing.
            return Ok(Guard::NeedsRepair);
        }
    }
    if requester.has_outstanding_wish(&key.isbn) {
        return Err(DomainError::Conflict(format!(
            "{} already has an outstanding request for '{}'",
            key.requester, key.isbn
        )));
    }
    if owner.has_outstanding_request(&key.isbn) {
        return Err(DomainError::Conflict(format!(
            "'{}' from {} already has an outstanding request",
            key.isbn, key.owner
        )));
    }

    Ok(Guard::Clear)
}

/// Plan a terminal transition of an outstanding trade.
fn settle(snapshot: Snapshot, key: &TradeKey, outcome: TradeState) -> Result<Plan, DomainError> {
    let Snapshot {
        mut owner,
        mut requester,
        ledger,
    } = snapshot;

    let wish = requester.doc.wish(&key.owner, &key.isbn).cloned();
    let request = owner.doc.request(&key.requester, &key.isbn).cloned();

    let mut ledger = match (wish, request, ledger) {
        (None, None, Some(ledger)) if ledger.doc.state.is_terminal() => {
            return Err(DomainError::Conflict(format!(
                "trade {key} is already {}",
                state_name(ledger.doc.state)
            )));
        }
        (None, None, None) => {
            return Err(DomainError::NotFound(format!("trade request {key}")));
        }
        (Some(wish), Some(request), Some(ledger))
            if wish.trade_id == request.trade_id
                && wish.trade_id == ledger.doc.id
                && wish.accepted == request.accepted
                && wish.accepted == (ledger.doc.state == TradeState::Accepted) =>
        {
            if wish.accepted {
                return Err(DomainError::Conflict(format!(
                    "trade {key} is already accepted"
                )));
            }
            ledger
        }
        _ => return Ok(Plan::Repair),
    };

    match outcome {
        TradeState::Accepted => {
            if !owner.doc.pull_book(&key.isbn) {
                return Err(DomainError::Conflict(format!(
                    "{} no longer lists '{}'",
                    key.owner, key.isbn
                )));
            }
            if let Some(entry) = owner.doc.request_mut(&key.requester, &key.isbn) {
                entry.accepted = true;
            }
            if let Some(entry) = requester.doc.wish_mut(&key.owner, &key.isbn) {
                entry.accepted = true;
            }
        }
        TradeState::Rejected | TradeState::Withdrawn => {
            owner.doc.pull_request(&key.requester, &key.isbn);
            requester.doc.pull_wish(&key.owner, &key.isbn);
        }
        TradeState::Proposed => {
            return Err(DomainError::validation("state", "cannot settle into proposed"));
        }
    }

    let expect = Expect::Version(ledger.version);
    ledger.doc.transition(outcome);
    let receipt = TradeReceipt::of(&ledger.doc);

    let batch = WriteBatch::new()
        .put_trade(ledger.doc, expect)
        .put_user(owner.doc, Expect::Version(owner.version))
        .put_user(requester.doc, Expect::Version(requester.version));
    Ok(Plan::Commit(batch, receipt))
}

fn state_name(state: TradeState) -> &'static str {
    match state {
        TradeState::Proposed => "proposed",
        TradeState::Accepted => "accepted",
        TradeState::Rejected => "rejected",
        TradeState::Withdrawn => "withdrawn",
    }
}
