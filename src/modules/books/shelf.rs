//! Adding and removing books on a user's shelf.

use std::sync::Arc;

use bookswap_db::{BookRecord, Expect, StoreError, User, UserDirectory, Versioned, WriteBatch};
use tracing::{debug, info};

use crate::catalog::CatalogLookup;
use crate::error::{catalog_id, DomainError};

pub struct BookShelf {
    directory: Arc<dyn UserDirectory>,
    catalog: Arc<dyn CatalogLookup>,
    commit_retries: u32,
}

impl BookShelf {
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

    /// Shelve `isbn` for `owner`, replacing any earlier record for it.
    pub async fn add(&self, owner: &str, isbn: &str) -> Result<BookRecord, DomainError> {
        let isbn = catalog_id(isbn)?;
        // Fail on unknown users before spending a catalog round trip.
        self.user(owner).await?;
        let entry = self.catalog.resolve(&isbn).await?;

        self.update(owner, "add", |user| {
            let record = BookRecord {
                isbn: entry.isbn.clone(),
                title: entry.title.clone(),
                location: user.location.clone(),
                thumbnail: entry.thumbnail.clone(),
                owner: user.username.clone(),
            };
            user.put_book(record.clone());
            Ok(record)
        })
        .await
    }

    pub async fn remove(&self, owner: &str, isbn: &str) -> Result<(), DomainError> {
        let isbn = catalog_id(isbn)?;
        self.update(owner, "remove", |user| {
            if user.pull_book(&isbn) {
                Ok(())
            } else {
                Err(DomainError::NotFound(format!(
                    "book '{isbn}' on {}'s shelf",
                    user.username
                )))
            }
        })
        .await
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<BookRecord>, DomainError> {
        Ok(self.user(owner).await?.doc.books)
    }

    async fn user(&self, username: &str) -> Result<Versioned<User>, DomainError> {
        self.directory
            .get_user(username)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("user '{username}'")))
    }

    /// Read-modify-write of one user document, re-read on version conflicts.
    async fn update<T, F>(
        &self,
        username: &str,
        op: &'static str,
        mut edit: F,
    ) -> Result<T, DomainError>
    where
        F: FnMut(&mut User) -> Result<T, DomainError>,
    {
        for attempt in 0..=self.commit_retries {
            let Versioned { version, mut doc } = self.user(username).await?;
            let outcome = edit(&mut doc)?;

            match self
                .directory
                .commit(WriteBatch::new().put_user(doc, Expect::Version(version)))
                .await
            {
                Ok(()) => {
                    info!(user = username, op, "shelf updated");
                    return Ok(outcome);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(user = username, op, attempt, "concurrent shelf update; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(DomainError::Conflict(format!(
            "{op} on {username}'s shelf kept losing to concurrent updates; try again"
        )))
    }
}
