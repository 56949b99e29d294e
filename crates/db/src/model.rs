//! Documents held by the user directory.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longitude/latitude pair, in that order, as the geocoder reports it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

/// A book the user owns and offers for trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub isbn: String,
    pub title: String,
    pub location: String,
    pub thumbnail: Option<String>,
    pub owner: String,
}

/// Requester-side view of a trade: a book wanted from `owner`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishlistEntry {
    pub trade_id: Uuid,
    pub isbn: String,
    pub title: String,
    pub location: String,
    pub thumbnail: Option<String>,
    pub owner: String,
    pub accepted: bool,
}

/// Owner-side view of a trade: `requester` wants one of the owner's books.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEntry {
    pub trade_id: Uuid,
    pub isbn: String,
    pub title: String,
    pub location: String,
    pub thumbnail: Option<String>,
    pub requester: String,
    pub accepted: bool,
}

/// A user document with its three embedded collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub location: String,
    #[serde(default)]
    pub coords: Option<GeoPoint>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub books: Vec<BookRecord>,
    #[serde(default)]
    pub wishlist: Vec<WishlistEntry>,
    #[serde(default)]
    pub requestlist: Vec<RequestEntry>,
}

impl User {
    pub fn new(username: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            location: location.into(),
            coords: None,
            email: None,
            books: Vec::new(),
            wishlist: Vec::new(),
            requestlist: Vec::new(),
        }
    }

    pub fn book(&self, isbn: &str) -> Option<&BookRecord> {
        self.books.iter().find(|book| book.isbn == isbn)
    }

    /// Replace any record for the same ISBN, then append.
    pub fn put_book(&mut self, book: BookRecord) {
        self.pull_book(&book.isbn);
        self.books.push(book);
    }

    /// Remove every record for `isbn`; returns whether anything was removed.
    pub fn pull_book(&mut self, isbn: &str) -> bool {
        let before = self.books.len();
        self.books.retain(|book| book.isbn != isbn);
        self.books.len() != before
    }

    /// The wishlist entry for exactly this owner and ISBN.
    pub fn wish(&self, owner: &str, isbn: &str) -> Option<&WishlistEntry> {
        self.wishlist
            .iter()
            .find(|entry| entry.owner == owner && entry.isbn == isbn)
    }

    pub fn wish_mut(&mut self, owner: &str, isbn: &str) -> Option<&mut WishlistEntry> {
        self.wishlist
            .iter_mut()
            .find(|entry| entry.owner == owner && entry.isbn == isbn)
    }

    pub fn pull_wish(&mut self, owner: &str, isbn: &str) -> bool {
        let before = self.wishlist.len();
        self.wishlist
            .retain(|entry| !(entry.owner == owner && entry.isbn == isbn));
        self.wishlist.len() != before
    }

    /// The request entry for exactly this requester and ISBN.
    pub fn request(&self, requester: &str, isbn: &str) -> Option<&RequestEntry> {
        self.requestlist
            .iter()
            .find(|entry| entry.requester == requester && entry.isbn == isbn)
    }

    pub fn request_mut(&mut self, requester: &str, isbn: &str) -> Option<&mut RequestEntry> {
        self.requestlist
            .iter_mut()
            .find(|entry| entry.requester == requester && entry.isbn == isbn)
    }

    pub fn pull_request(&mut self, requester: &str, isbn: &str) -> bool {
        let before = self.requestlist.len();
        self.requestlist
            .retain(|entry| !(entry.requester == requester && entry.isbn == isbn));
        self.requestlist.len() != before
    }

    /// Whether the user already waits on an unaccepted request for `isbn`, from anyone.
    pub fn has_outstanding_wish(&self, isbn: &str) -> bool {
        self.wishlist
            .iter()
            .any(|entry| entry.isbn == isbn && !entry.accepted)
    }

    /// Whether someone already has an unaccepted request on the user's `isbn`.
    pub fn has_outstanding_request(&self, isbn: &str) -> bool {
        self.requestlist
            .iter()
            .any(|entry| entry.isbn == isbn && !entry.accepted)
    }

    pub fn pending_requests(&self) -> impl Iterator<Item = &RequestEntry> {
        self.requestlist.iter().filter(|entry| !entry.accepted)
    }
}

/// Identity of a trade request: who asks whom for which book.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeKey {
    pub owner: String,
    pub requester: String,
    pub isbn: String,
}

impl TradeKey {
    pub fn new(
        owner: impl Into<String>,
        requester: impl Into<String>,
        isbn: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            requester: requester.into(),
            isbn: isbn.into(),
        }
    }
}

impl std::fmt::Display for TradeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<-{}:{}", self.owner, self.requester, self.isbn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    Proposed,
    Accepted,
    Rejected,
    Withdrawn,
}

impl TradeState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TradeState::Proposed)
    }
}

/// Ledger record for the latest trade on a key.
///
/// Written first in every paired batch, so it always reflects the most
/// recent intent even when a backend tears the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub key: TradeKey,
    pub state: TradeState,
    pub title: String,
    pub thumbnail: Option<String>,
    pub location: String,
    /// Unix seconds of the last state change.
    pub updated_at: i64,
}

impl TradeRecord {
    pub fn wishlist_entry(&self) -> WishlistEntry {
        WishlistEntry {
            trade_id: self.id,
            isbn: self.key.isbn.clone(),
            title: self.title.clone(),
            location: self.location.clone(),
            thumbnail: self.thumbnail.clone(),
            owner: self.key.owner.clone(),
            accepted: self.state == TradeState::Accepted,
        }
    }

    pub fn request_entry(&self) -> RequestEntry {
        RequestEntry {
            trade_id: self.id,
            isbn: self.key.isbn.clone(),
            title: self.title.clone(),
            location: self.location.clone(),
            thumbnail: self.thumbnail.clone(),
            requester: self.key.requester.clone(),
            accepted: self.state == TradeState::Accepted,
        }
    }

    pub fn transition(&mut self, state: TradeState) {
        self.state = state;
        self.updated_at = now_unix();
    }
}

pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: TradeState) -> TradeRecord {
        TradeRecord {
            id: Uuid::new_v4(),
            key: TradeKey::new("olive", "rory", "ISBN123"),
            state,
            title: "Dune".to_string(),
            thumbnail: None,
            location: "NYC".to_string(),
            updated_at: 0,
        }
    }

    #[test]
    fn put_book_replaces_same_isbn() {
        let mut user = User::new("olive", "NYC");
        let mut book = BookRecord {
            isbn: "ISBN123".to_string(),
            title: "Dune".to_string(),
            location: "NYC".to_string(),
            thumbnail: None,
            owner: "olive".to_string(),
        };
        user.put_book(book.clone());
        book.title = "Dune (2nd ed.)".to_string();
        user.put_book(book);

        assert_eq!(user.books.len(), 1);
        assert_eq!(user.book("ISBN123").unwrap().title, "Dune (2nd ed.)");
    }

    #[test]
    fn exact_match_distinguishes_counterparties() {
        let mut rory = User::new("rory", "NYC");
        rory.wishlist.push(record(TradeState::Proposed).wishlist_entry());

        assert!(rory.wish("olive", "ISBN123").is_some());
        assert!(rory.wish("someone-else", "ISBN123").is_none());
        assert!(rory.has_outstanding_wish("ISBN123"));
        assert!(!rory.pull_wish("someone-else", "ISBN123"));
        assert!(rory.pull_wish("olive", "ISBN123"));
        assert!(rory.wishlist.is_empty());
    }

    #[test]
    fn entries_from_record_share_trade_id_and_flag() {
        let accepted = record(TradeState::Accepted);
        let wish = accepted.wishlist_entry();
        let request = accepted.request_entry();

        assert_eq!(wish.trade_id, request.trade_id);
        assert!(wish.accepted && request.accepted);
        assert_eq!(request.requester, "rory");
        assert_eq!(wish.owner, "olive");
    }

    #[test]
    fn only_proposed_is_open() {
        assert!(!TradeState::Proposed.is_terminal());
        assert!(TradeState::Accepted.is_terminal());
        assert!(TradeState::Rejected.is_terminal());
        assert!(TradeState::Withdrawn.is_terminal());
    }
}
