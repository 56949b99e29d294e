//! bookswap application library
//!
//! Application modules (users, books, trades), the catalog lookup and the
//! domain error taxonomy.

pub mod catalog;
pub mod context;
pub mod error;
pub mod modules;

pub use context::AppContext;
pub use error::DomainError;
pub use modules::register_all;
