use serde::{Deserialize, Serialize};

/// Body of a new trade request; the requester is the acting user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeTrade {
    /// User who owns the wanted book
    pub owner: String,
    /// Catalog identifier of the wanted book
    pub isbn: String,
    /// Where the requester wants to meet
    pub location: String,
}

/// Body of an accept or reject; the owner is the acting user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleTrade {
    pub requester: String,
    pub isbn: String,
}
