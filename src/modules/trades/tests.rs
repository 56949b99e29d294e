use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bookswap_db::{
    BookRecord, Expect, MemoryDirectory, StoreError, TradeKey, TradeRecord, TradeState, User,
    UserDirectory, Versioned, Write, WriteBatch,
};
use bookswap_http::auth::PRINCIPAL_HEADER;
use bookswap_kernel::settings::Settings;
use bookswap_kernel::Module;
use tower::ServiceExt;

use super::*;
use crate::catalog::{CatalogEntry, CatalogLookup, StaticCatalog};
use crate::error::DomainError;

const ISBN: &str = "ISBN123";

fn catalog() -> Arc<dyn CatalogLookup> {
    Arc::new(StaticCatalog::from_entries([
        CatalogEntry {
            isbn: ISBN.to_string(),
            title: "Dune".to_string(),
            thumbnail: Some("https://covers.example/dune.jpg".to_string()),
        },
        CatalogEntry {
            isbn: "ISBN456".to_string(),
            title: "Neuromancer".to_string(),
            thumbnail: None,
        },
    ]))
}

fn shelf(owner: &str, isbn: &str) -> BookRecord {
    BookRecord {
        isbn: isbn.to_string(),
        title: "Dune".to_string(),
        location: "NYC".to_string(),
        thumbnail: None,
        owner: owner.to_string(),
    }
}

/// `olive` owns ISBN123; `rory` and `sam` own nothing.
async fn seeded_directory() -> Arc<MemoryDirectory> {
    let directory = Arc::new(MemoryDirectory::new());
    let mut olive = User::new("olive", "NYC");
    olive.put_book(shelf("olive", ISBN));

    directory
        .commit(
            WriteBatch::new()
                .put_user(olive, Expect::Absent)
                .put_user(User::new("rory", "Boston"), Expect::Absent)
                .put_user(User::new("sam", "Chicago"), Expect::Absent),
        )
        .await
        .unwrap();
    directory
}

async fn service() -> (Arc<MemoryDirectory>, TradeService) {
    let directory = seeded_directory().await;
    let service = TradeService::new(directory.clone(), catalog(), 5);
    (directory, service)
}

async fn user(directory: &MemoryDirectory, username: &str) -> User {
    directory.get_user(username).await.unwrap().unwrap().doc
}

async fn ledger(directory: &MemoryDirectory, key: &TradeKey) -> Option<TradeRecord> {
    directory.get_trade(key).await.unwrap().map(|found| found.doc)
}

fn key() -> TradeKey {
    TradeKey::new("olive", "rory", ISBN)
}

#[tokio::test]
async fn propose_then_accept_moves_the_book() {
    let (directory, service) = service().await;

    let proposed = service.propose("rory", "olive", ISBN, "NYC").await.unwrap();
    assert_eq!(proposed.state, TradeState::Proposed);

    let accepted = service.accept("olive", "rory", ISBN).await.unwrap();
    assert_eq!(accepted.trade_id, proposed.trade_id);
    assert_eq!(accepted.state, TradeState::Accepted);

    let olive = user(&directory, "olive").await;
    let rory = user(&directory, "rory").await;
    assert!(olive.book(ISBN).is_none());
    assert!(olive.request("rory", ISBN).unwrap().accepted);
    assert!(rory.wish("olive", ISBN).unwrap().accepted);
    assert_eq!(
        ledger(&directory, &key()).await.unwrap().state,
        TradeState::Accepted
    );
}

#[tokio::test]
async fn propose_then_reject_leaves_nothing_behind() {
    let (directory, service) = service().await;

    service.propose("rory", "olive", ISBN, "NYC").await.unwrap();
    let rejected = service.reject("olive", "rory", ISBN).await.unwrap();
    assert_eq!(rejected.state, TradeState::Rejected);

    let olive = user(&directory, "olive").await;
    let rory = user(&directory, "rory").await;
    assert!(olive.requestlist.is_empty());
    assert!(rory.wishlist.is_empty());
    assert!(olive.book(ISBN).is_some());
}

#[tokio::test]
async fn entries_share_trade_id_and_metadata() {
    let (directory, service) = service().await;

    let receipt = service.propose("rory", "olive", ISBN, "NYC").await.unwrap();

    let olive = user(&directory, "olive").await;
    let rory = user(&directory, "rory").await;
    let request = olive.request("rory", ISBN).unwrap();
    let wish = rory.wish("olive", ISBN).unwrap();

    assert_eq!(request.trade_id, receipt.trade_id);
    assert_eq!(wish.trade_id, receipt.trade_id);
    assert_eq!(wish.title, "Dune");
    assert_eq!(wish.location, "NYC");
    assert_eq!(
        wish.thumbnail.as_deref(),
        Some("https://covers.example/dune.jpg")
    );
    assert!(!wish.accepted && !request.accepted);
}

#[tokio::test]
async fn repeated_propose_is_a_conflict() {
    let (directory, service) = service().await;

    service.propose("rory", "olive", ISBN, "NYC").await.unwrap();
    let err = service.propose("rory", "olive", ISBN, "NYC").await.unwrap_err();

    assert!(matches!(err, DomainError::Conflict(_)));
    assert_eq!(user(&directory, "rory").await.wishlist.len(), 1);
    assert_eq!(user(&directory, "olive").await.requestlist.len(), 1);
}

#[tokio::test]
async fn one_outstanding_request_per_book_on_each_side() {
    let (directory, service) = service().await;
    service.propose("rory", "olive", ISBN, "NYC").await.unwrap();

    // Someone else asking for the same copy while rory's request is open.
    let err = service.propose("sam", "olive", ISBN, "NYC").await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));

    // rory asking a second owner for the same title.
    let mut sam = user(&directory, "sam").await;
    sam.put_book(shelf("sam", ISBN));
    let version = directory.get_user("sam").await.unwrap().unwrap().version;
    directory
        .commit(WriteBatch::new().put_user(sam, Expect::Version(version)))
        .await
        .unwrap();

    let err = service.propose("rory", "sam", ISBN, "NYC").await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
}

#[tokio::test]
async fn settled_trades_cannot_be_settled_again() {
    let (_, service) = service().await;
    service.propose("rory", "olive", ISBN, "NYC").await.unwrap();
    service.accept("olive", "rory", ISBN).await.unwrap();

    let err = service.reject("olive", "rory", ISBN).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
    let err = service.accept("olive", "rory", ISBN).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));

    let (_, service) = self::service().await;
    service.propose("rory", "olive", ISBN, "NYC").await.unwrap();
    service.reject("olive", "rory", ISBN).await.unwrap();

    let err = service.accept("olive", "rory", ISBN).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
}

#[tokio::test]
async fn unknown_trade_is_not_found() {
    let (_, service) = service().await;
    let err = service.accept("olive", "rory", ISBN).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));
}

#[tokio::test]
async fn rejected_triple_can_be_proposed_again() {
    let (_, service) = service().await;

    let first = service.propose("rory", "olive", ISBN, "NYC").await.unwrap();
    service.reject("olive", "rory", ISBN).await.unwrap();
    let second = service.propose("rory", "olive", ISBN, "NYC").await.unwrap();

    assert_ne!(first.trade_id, second.trade_id);
    assert_eq!(second.state, TradeState::Proposed);
}

#[tokio::test]
async fn propose_preconditions() {
    let (_, service) = service().await;

    let err = service.propose("olive", "olive", ISBN, "NYC").await.unwrap_err();
    assert!(matches!(err, DomainError::Validation { field: "owner", .. }));

    let err = service.propose("rory", "olive", ISBN, "   ").await.unwrap_err();
    assert!(matches!(err, DomainError::Validation { field: "location", .. }));

    let err = service.propose("rory", "olive", "not an isbn", "NYC").await.unwrap_err();
    assert!(matches!(err, DomainError::Validation { field: "isbn", .. }));

    let err = service.propose("rory", "nobody", ISBN, "NYC").await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));

    // In the catalog but not on olive's shelf.
    let err = service.propose("rory", "olive", "ISBN456", "NYC").await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));

    // Not in the catalog at all.
    let err = service.propose("rory", "olive", "ISBN999", "NYC").await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));
}

#[tokio::test]
async fn withdraw_removes_both_sides() {
    let (directory, service) = service().await;
    service.propose("rory", "olive", ISBN, "NYC").await.unwrap();

    let receipt = service.withdraw("rory", "olive", ISBN).await.unwrap();
    assert_eq!(receipt.state, TradeState::Withdrawn);
    assert!(user(&directory, "olive").await.requestlist.is_empty());
    assert!(user(&directory, "rory").await.wishlist.is_empty());

    let err = service.withdraw("rory", "olive", ISBN).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
}

#[tokio::test]
async fn incoming_lists_only_unanswered_requests() {
    let (_, service) = service().await;
    service.propose("rory", "olive", ISBN, "NYC").await.unwrap();

    let pending = service.incoming("olive").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].requester, "rory");

    service.accept("olive", "rory", ISBN).await.unwrap();
    assert!(service.incoming("olive").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_yield_one_winner() {
    let (directory, service) = service().await;
    let service = Arc::new(service);
    service.propose("rory", "olive", ISBN, "NYC").await.unwrap();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.accept("olive", "rory", ISBN).await })
        })
        .collect();

    let mut ok = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(DomainError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!((ok, conflicts), (1, 1));
    assert!(user(&directory, "olive").await.book(ISBN).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_proposals_for_one_copy_yield_one_request() {
    let (directory, service) = service().await;
    let service = Arc::new(service);

    let handles: Vec<_> = ["rory", "sam"]
        .into_iter()
        .map(|requester| {
            let service = service.clone();
            tokio::spawn(async move { service.propose(requester, "olive", ISBN, "NYC").await })
        })
        .collect();

    let mut ok = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(DomainError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!((ok, conflicts), (1, 1));
    let olive = user(&directory, "olive").await;
    assert_eq!(olive.requestlist.len(), 1);
    let winner = olive.requestlist[0].requester.clone();
    let loser = if winner == "rory" { "sam" } else { "rory" };
    assert!(user(&directory, &winner).await.wish("olive", ISBN).is_some());
    assert!(user(&directory, loser).await.wishlist.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn accept_racing_reject_settles_once() {
    let (directory, service) = service().await;
    let service = Arc::new(service);
    service.propose("rory", "olive", ISBN, "NYC").await.unwrap();

    let accept = {
        let service = service.clone();
        tokio::spawn(async move { service.accept("olive", "rory", ISBN).await })
    };
    let reject = {
        let service = service.clone();
        tokio::spawn(async move { service.reject("olive", "rory", ISBN).await })
    };
    let accept = accept.await.unwrap();
    let reject = reject.await.unwrap();

    let olive = user(&directory, "olive").await;
    let rory = user(&directory, "rory").await;
    let state = ledger(&directory, &key()).await.unwrap().state;
    match (accept, reject) {
        (Ok(_), Err(DomainError::Conflict(_))) => {
            assert_eq!(state, TradeState::Accepted);
            assert!(olive.book(ISBN).is_none());
            assert!(olive.request("rory", ISBN).unwrap().accepted);
            assert!(rory.wish("olive", ISBN).unwrap().accepted);
        }
        (Err(DomainError::Conflict(_)), Ok(_)) => {
            assert_eq!(state, TradeState::Rejected);
            assert!(olive.book(ISBN).is_some());
            assert!(olive.requestlist.is_empty());
            assert!(rory.wishlist.is_empty());
        }
        (accept, reject) => panic!("expected one winner, got {accept:?} and {reject:?}"),
    }
}

/// Applies only the first write of a batch, a fixed number of times.
struct TornDirectory {
    inner: Arc<MemoryDirectory>,
    tears: AtomicU32,
}

impl TornDirectory {
    fn tear_next(&self, count: u32) {
        self.tears.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserDirectory for TornDirectory {
    async fn get_user(&self, username: &str) -> Result<Option<Versioned<User>>, StoreError> {
        self.inner.get_user(username).await
    }

    async fn list_users(&self) -> Result<Vec<Versioned<User>>, StoreError> {
        self.inner.list_users().await
    }

    async fn get_trade(
        &self,
        key: &TradeKey,
    ) -> Result<Option<Versioned<TradeRecord>>, StoreError> {
        self.inner.get_trade(key).await
    }

    async fn list_trades(&self) -> Result<Vec<Versioned<TradeRecord>>, StoreError> {
        self.inner.list_trades().await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let tear = self
            .tears
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !tear || batch.len() < 2 {
            return self.inner.commit(batch).await;
        }

        let total = batch.len();
        let first = match batch.into_writes().into_iter().next() {
            Some(Write::PutUser { user, expect }) => WriteBatch::new().put_user(user, expect),
            Some(Write::PutTrade { record, expect }) => {
                WriteBatch::new().put_trade(record, expect)
            }
            Some(Write::CheckTrade { key, expect }) => WriteBatch::new().check_trade(key, expect),
            None => WriteBatch::new(),
        };
        self.inner.commit(first).await?;
        Err(StoreError::Partial {
            applied: 1,
            total,
            reason: "connection reset".to_string(),
        })
    }
}

async fn torn_service() -> (Arc<MemoryDirectory>, Arc<TornDirectory>, TradeService) {
    let inner = seeded_directory().await;
    let torn = Arc::new(TornDirectory {
        inner: inner.clone(),
        tears: AtomicU32::new(0),
    });
    let service = TradeService::new(torn.clone(), catalog(), 5);
    (inner, torn, service)
}

#[tokio::test]
async fn torn_propose_is_rolled_forward() {
    let (directory, torn, service) = torn_service().await;
    torn.tear_next(1);

    let receipt = service.propose("rory", "olive", ISBN, "NYC").await.unwrap();

    let olive = user(&directory, "olive").await;
    let rory = user(&directory, "rory").await;
    assert_eq!(olive.request("rory", ISBN).unwrap().trade_id, receipt.trade_id);
    assert_eq!(rory.wish("olive", ISBN).unwrap().trade_id, receipt.trade_id);
}

#[tokio::test]
async fn torn_accept_still_removes_the_book() {
    let (directory, torn, service) = torn_service().await;
    service.propose("rory", "olive", ISBN, "NYC").await.unwrap();
    torn.tear_next(1);

    let receipt = service.accept("olive", "rory", ISBN).await.unwrap();
    assert_eq!(receipt.state, TradeState::Accepted);

    let olive = user(&directory, "olive").await;
    let rory = user(&directory, "rory").await;
    assert!(olive.book(ISBN).is_none());
    assert!(olive.request("rory", ISBN).unwrap().accepted);
    assert!(rory.wish("olive", ISBN).unwrap().accepted);
}

#[tokio::test]
async fn unrepaired_tear_surfaces_and_reconcile_heals_it() {
    let (directory, torn, service) = torn_service().await;
    // Tear the proposal and the immediate repair that follows it.
    torn.tear_next(2);

    let err = service.propose("rory", "olive", ISBN, "NYC").await.unwrap_err();
    assert!(matches!(err, DomainError::PartialFailure { .. }));
    assert!(user(&directory, "rory").await.wishlist.is_empty());

    let report = service.reconcile().await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            checked: 1,
            repaired: 1,
            failed: 0
        }
    );

    let olive = user(&directory, "olive").await;
    let rory = user(&directory, "rory").await;
    assert_eq!(
        olive.request("rory", ISBN).unwrap().trade_id,
        rory.wish("olive", ISBN).unwrap().trade_id
    );
}

#[tokio::test]
async fn reconcile_fixes_flags_and_drops_orphans() {
    let (directory, service) = service().await;
    let proposed = service.propose("rory", "olive", ISBN, "NYC").await.unwrap();
    service.accept("olive", "rory", ISBN).await.unwrap();

    // Flip rory's flag back and add a wish nobody recorded.
    let mut rory = user(&directory, "rory").await;
    if let Some(wish) = rory.wish_mut("olive", ISBN) {
        wish.accepted = false;
    }
    let mut orphan = rory.wish("olive", ISBN).unwrap().clone();
    orphan.owner = "sam".to_string();
    rory.wishlist.push(orphan);
    directory
        .commit(WriteBatch::new().put_user(rory, Expect::Any))
        .await
        .unwrap();

    let report = service.reconcile().await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.repaired, 2);

    let rory = user(&directory, "rory").await;
    let wish = rory.wish("olive", ISBN).unwrap();
    assert!(wish.accepted);
    assert_eq!(wish.trade_id, proposed.trade_id);
    assert!(rory.wish("sam", ISBN).is_none());

    let again = service.reconcile().await.unwrap();
    assert_eq!(again.repaired, 0);
}

enum Race {
    Accept,
    Propose,
}

/// Runs a competing transition right after the ledger is read, so the
/// caller plans against a ledger that is already stale.
struct RacingDirectory {
    inner: Arc<MemoryDirectory>,
    racer: TradeService,
    race: std::sync::Mutex<Option<Race>>,
}

#[async_trait]
impl UserDirectory for RacingDirectory {
    async fn get_user(&self, username: &str) -> Result<Option<Versioned<User>>, StoreError> {
        self.inner.get_user(username).await
    }

    async fn list_users(&self) -> Result<Vec<Versioned<User>>, StoreError> {
        self.inner.list_users().await
    }

    async fn get_trade(
        &self,
        key: &TradeKey,
    ) -> Result<Option<Versioned<TradeRecord>>, StoreError> {
        let read = self.inner.get_trade(key).await?;
        let race = self.race.lock().unwrap().take();
        match race {
            Some(Race::Accept) => {
                self.racer
                    .accept(&key.owner, &key.requester, &key.isbn)
                    .await
                    .unwrap();
            }
            Some(Race::Propose) => {
                self.racer
                    .propose(&key.requester, &key.owner, &key.isbn, "NYC")
                    .await
                    .unwrap();
            }
            None => {}
        }
        Ok(read)
    }

    async fn list_trades(&self) -> Result<Vec<Versioned<TradeRecord>>, StoreError> {
        self.inner.list_trades().await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.inner.commit(batch).await
    }
}

fn racing_service(inner: Arc<MemoryDirectory>, race: Race) -> TradeService {
    let racing = Arc::new(RacingDirectory {
        racer: TradeService::new(inner.clone(), catalog(), 5),
        inner,
        race: std::sync::Mutex::new(Some(race)),
    });
    TradeService::new(racing, catalog(), 5)
}

#[tokio::test]
async fn repair_does_not_revert_an_accept_committed_after_its_read() {
    let (directory, service) = service().await;
    service.propose("rory", "olive", ISBN, "NYC").await.unwrap();

    let repairing = racing_service(directory.clone(), Race::Accept);
    assert!(!repairing.repair(&key()).await.unwrap());

    let olive = user(&directory, "olive").await;
    let rory = user(&directory, "rory").await;
    assert_eq!(
        ledger(&directory, &key()).await.unwrap().state,
        TradeState::Accepted
    );
    assert!(olive.request("rory", ISBN).unwrap().accepted);
    assert!(rory.wish("olive", ISBN).unwrap().accepted);
    assert!(olive.book(ISBN).is_none());

    // A later relist of the same title must survive the next pass.
    let mut olive = olive;
    olive.put_book(shelf("olive", ISBN));
    directory
        .commit(WriteBatch::new().put_user(olive, Expect::Any))
        .await
        .unwrap();

    let report = repairing.reconcile().await.unwrap();
    assert_eq!(report.repaired, 0);
    assert!(user(&directory, "olive").await.book(ISBN).is_some());
}

#[tokio::test]
async fn repair_does_not_drop_a_proposal_committed_after_its_read() {
    let (directory, _) = service().await;

    let repairing = racing_service(directory.clone(), Race::Propose);
    assert!(!repairing.repair(&key()).await.unwrap());

    let olive = user(&directory, "olive").await;
    let rory = user(&directory, "rory").await;
    let record = ledger(&directory, &key()).await.unwrap();
    assert_eq!(record.state, TradeState::Proposed);
    assert_eq!(olive.request("rory", ISBN).unwrap().trade_id, record.id);
    assert_eq!(rory.wish("olive", ISBN).unwrap().trade_id, record.id);
}

fn module(directory: Arc<MemoryDirectory>) -> TradesModule {
    let ctx = AppContext::new(Settings::default(), directory, catalog());
    TradesModule::new(&ctx)
}

fn post_json(uri: &str, user: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::post(uri).header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header(PRINCIPAL_HEADER, user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn routes_map_outcomes_to_statuses() {
    let router = module(seeded_directory().await).routes();
    let body = serde_json::json!({ "owner": "olive", "isbn": ISBN, "location": "NYC" });

    let response = router
        .clone()
        .oneshot(post_json("/", None, body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .clone()
        .oneshot(post_json("/", Some("rory"), body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(post_json("/", Some("rory"), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = router
        .clone()
        .oneshot(post_json(
            "/accept",
            Some("olive"),
            serde_json::json!({ "requester": "rory", "isbn": ISBN }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(
            Request::delete(format!("/wishlist/olive/{ISBN}"))
                .header(PRINCIPAL_HEADER, "rory")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn reconciler_runs_between_start_and_stop() {
    let mut settings = Settings::default();
    settings.trades.reconcile_interval_secs = 3600;
    let ctx = AppContext::new(settings.clone(), seeded_directory().await, catalog());
    let module = TradesModule::new(&ctx);
    let init = bookswap_kernel::InitCtx {
        settings: &settings,
    };

    module.start(&init).await.unwrap();
    assert!(module.reconciler.lock().await.is_some());

    module.stop().await.unwrap();
    assert!(module.reconciler.lock().await.is_none());
}
