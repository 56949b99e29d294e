//! User directory storage: user documents with embedded book, wishlist and
//! request collections, plus the trade ledger.

pub mod memory;
pub mod model;
pub mod store;

pub use memory::MemoryDirectory;
pub use model::{
    BookRecord, GeoPoint, RequestEntry, TradeKey, TradeRecord, TradeState, User, WishlistEntry,
};
pub use store::{Expect, StoreError, UserDirectory, Versioned, Write, WriteBatch};

/// Build the directory backend used by the running service.
pub fn init() -> std::sync::Arc<dyn UserDirectory> {
    tracing::info!(target: "bookswap-db", backend = "memory", "user directory ready");
    std::sync::Arc::new(MemoryDirectory::new())
}
