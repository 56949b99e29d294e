use bookswap_db::{GeoPoint, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for creating a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUser {
    pub username: String,
    /// Free-form city or address
    pub location: String,
    /// Geocoded position of `location`, when the client has one
    #[serde(default)]
    pub coords: Option<GeoPoint>,
    #[serde(default)]
    pub email: Option<String>,
    /// Token from `POST /pending`; its search is handed back on success
    #[serde(default)]
    pub pending_token: Option<Uuid>,
}

/// A search the visitor started before registering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSearch {
    pub title: String,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingToken {
    pub token: Uuid,
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub user: User,
    /// The stashed search, if a valid pending token was supplied
    pub resume: Option<PendingSearch>,
}

/// Full user document plus the number of requests awaiting an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(flatten)]
    pub user: User,
    pub pending_requests: usize,
}

/// What another user may see to arrange a hand-over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub username: String,
    pub location: String,
    pub email: Option<String>,
}
