use std::sync::Arc;

use bookswap_db::{Expect, GeoPoint, StoreError, User, UserDirectory, WriteBatch};
use tracing::{debug, info};

use super::models::{Contact, PendingSearch, PendingToken, Profile, RegisterUser, Registration};
use super::pending::PendingActions;
use crate::error::{required, DomainError};

const MAX_USERNAME_LEN: usize = 32;

pub struct UserService {
    directory: Arc<dyn UserDirectory>,
    pending: PendingActions,
}

impl UserService {
    pub fn new(directory: Arc<dyn UserDirectory>, pending: PendingActions) -> Self {
        Self { directory, pending }
    }

    pub async fn register(&self, request: RegisterUser) -> Result<Registration, DomainError> {
        let username = username(&request.username)?;
        let location = required("location", &request.location)?;
        if let Some(coords) = request.coords {
            check_coords(coords)?;
        }
        let email = match request.email.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(email) if email.contains('@') => Some(email.to_string()),
            Some(_) => return Err(DomainError::validation("email", "not an email address")),
        };

        let mut user = User::new(username, location);
        user.coords = request.coords;
        user.email = email;

        match self
            .directory
            .commit(WriteBatch::new().put_user(user.clone(), Expect::Absent))
            .await
        {
            Ok(()) => {}
            Err(StoreError::VersionConflict { .. }) => {
                return Err(DomainError::Conflict(format!(
                    "username '{}' already exists",
                    user.username
                )));
            }
            Err(err) => return Err(err.into()),
        }
        info!(user = %user.username, "user registered");

        let resume = request.pending_token.and_then(|token| {
            let search = self.pending.take(&token);
            if search.is_none() {
                debug!(%token, "pending token unknown or expired");
            }
            search
        });

        Ok(Registration { user, resume })
    }

    pub async fn profile(&self, username: &str) -> Result<Profile, DomainError> {
        let user = self.user(username).await?;
        let pending_requests = user.pending_requests().count();
        Ok(Profile {
            user,
            pending_requests,
        })
    }

    pub async fn contact(&self, username: &str) -> Result<Contact, DomainError> {
        let user = self.user(username).await?;
        Ok(Contact {
            username: user.username,
            location: user.location,
            email: user.email,
        })
    }

    /// Keep a visitor's search server-side until they have registered.
    pub fn stash(&self, title: &str, location: &str) -> Result<PendingToken, DomainError> {
        let search = PendingSearch {
            title: required("title", title)?,
            location: required("location", location)?,
        };
        Ok(PendingToken {
            token: self.pending.stash(search),
            expires_in_secs: self.pending.ttl().as_secs(),
        })
    }

    async fn user(&self, username: &str) -> Result<User, DomainError> {
        self.directory
            .get_user(username)
            .await?
            .map(|found| found.doc)
            .ok_or_else(|| DomainError::NotFound(format!("user '{username}'")))
    }
}

fn username(raw: &str) -> Result<String, DomainError> {
    let name = required("username", raw)?;
    if name.len() > MAX_USERNAME_LEN {
        return Err(DomainError::validation(
            "username",
            format!("longer than {MAX_USERNAME_LEN} characters"),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(DomainError::validation(
            "username",
            "only letters, digits, '_' and '-' are allowed",
        ));
    }
    Ok(name)
}

fn check_coords(coords: GeoPoint) -> Result<(), DomainError> {
    if !(-180.0..=180.0).contains(&coords.longitude) {
        return Err(DomainError::validation("coords", "longitude out of range"));
    }
    if !(-90.0..=90.0).contains(&coords.latitude) {
        return Err(DomainError::validation("coords", "latitude out of range"));
    }
    Ok(())
}
