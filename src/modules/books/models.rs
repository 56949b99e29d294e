use bookswap_db::BookRecord;
use serde::{Deserialize, Serialize};

/// A book on a user's shelf as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    /// Catalog identifier
    pub isbn: String,
    pub title: String,
    /// Owner's location when the book was shelved
    pub location: String,
    /// Cover image reference
    pub thumbnail: Option<String>,
    pub owner: String,
}

impl From<BookRecord> for Book {
    fn from(record: BookRecord) -> Self {
        Self {
            isbn: record.isbn,
            title: record.title,
            location: record.location,
            thumbnail: record.thumbnail,
            owner: record.owner,
        }
    }
}
