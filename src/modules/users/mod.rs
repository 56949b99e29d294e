pub mod models;
mod pending;
mod service;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bookswap_http::{AppError, Principal};
use bookswap_kernel::{InitCtx, Module};
use serde::Deserialize;
use serde_json::json;

use crate::context::AppContext;
pub use pending::PendingActions;
pub use service::UserService;

/// Registration, profiles and contact cards
pub struct UsersModule {
    service: Arc<UserService>,
}

impl UsersModule {
    pub fn new(ctx: &AppContext) -> Self {
        let ttl = Duration::from_secs(ctx.settings.users.pending_ttl_secs);
        Self {
            service: Arc::new(UserService::new(
                ctx.directory.clone(),
                PendingActions::new(ttl),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StashSearch {
    title: String,
    location: String,
}

#[async_trait]
impl Module for UsersModule {
    fn name(&self) -> &'static str {
        "users"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            pending_ttl_secs = ctx.settings.users.pending_ttl_secs,
            "users module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/", post(register))
            .route("/me", get(me))
            .route("/pending", post(stash_pending))
            .route("/{username}", get(contact))
            .with_state(self.service.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(json!({
            "paths": {
                "/": {
                    "post": {
                        "summary": "Register a user",
                        "tags": ["Users"],
                        "requestBody": {
                            "required": true,
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/RegisterUser" }
                                }
                            }
                        },
                        "responses": {
                            "201": {
                                "description": "User created; carries the resumed search if any",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/Registration" }
                                    }
                                }
                            },
                            "409": {
                                "description": "Username already exists",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                                    }
                                }
                            },
                            "422": {
                                "description": "Validation error",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                                    }
                                }
                            }
                        }
                    }
                },
                "/me": {
                    "get": {
                        "summary": "Your profile with shelf, wishlist and requests",
                        "tags": ["Users"],
                        "responses": {
                            "200": {
                                "description": "User profile",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/UserProfile" }
                                    }
                                }
                            },
                            "401": {
                                "description": "No acting user",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                                    }
                                }
                            }
                        }
                    }
                },
                "/pending": {
                    "post": {
                        "summary": "Keep a search across registration",
                        "tags": ["Users"],
                        "responses": {
                            "201": {
                                "description": "Single-use token",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/PendingToken" }
                                    }
                                }
                            }
                        }
                    }
                },
                "/{username}": {
                    "get": {
                        "summary": "Contact card of another user",
                        "tags": ["Users"],
                        "parameters": [
                            { "name": "username", "in": "path", "required": true, "schema": { "type": "string" } }
                        ],
                        "responses": {
                            "200": {
                                "description": "Contact card",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/Contact" }
                                    }
                                }
                            },
                            "404": {
                                "description": "User not found",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "RegisterUser": {
                        "type": "object",
                        "properties": {
                            "username": { "type": "string" },
                            "location": { "type": "string" },
                            "coords": {
                                "type": "object",
                                "nullable": true,
                                "properties": {
                                    "longitude": { "type": "number" },
                                    "latitude": { "type": "number" }
                                }
                            },
                            "email": { "type": "string", "format": "email", "nullable": true },
                            "pending_token": { "type": "string", "format": "uuid", "nullable": true }
                        },
                        "required": ["username", "location"]
                    },
                    "Registration": {
                        "type": "object",
                        "properties": {
                            "user": { "type": "object" },
                            "resume": {
                                "type": "object",
                                "nullable": true,
                                "properties": {
                                    "title": { "type": "string" },
                                    "location": { "type": "string" }
                                }
                            }
                        },
                        "required": ["user"]
                    },
                    "UserProfile": {
                        "type": "object",
                        "properties": {
                            "username": { "type": "string" },
                            "location": { "type": "string" },
                            "email": { "type": "string", "nullable": true },
                            "books": { "type": "array", "items": { "$ref": "#/components/schemas/Book" } },
                            "wishlist": { "type": "array", "items": { "type": "object" } },
                            "requestlist": { "type": "array", "items": { "type": "object" } },
                            "pending_requests": { "type": "integer" }
                        },
                        "required": ["username", "location", "books", "wishlist", "requestlist", "pending_requests"]
                    },
                    "PendingToken": {
                        "type": "object",
                        "properties": {
                            "token": { "type": "string", "format": "uuid" },
                            "expires_in_secs": { "type": "integer" }
                        },
                        "required": ["token", "expires_in_secs"]
                    },
                    "Contact": {
                        "type": "object",
                        "properties": {
                            "username": { "type": "string" },
                            "location": { "type": "string" },
                            "email": { "type": "string", "nullable": true }
                        },
                        "required": ["username", "location"]
                    }
                }
            }
        }))
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "users module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "users module stopped");
        Ok(())
    }
}

async fn register(
    State(service): State<Arc<UserService>>,
    Json(body): Json<models::RegisterUser>,
) -> Result<(StatusCode, Json<models::Registration>), AppError> {
    let registration = service.register(body).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

async fn me(
    State(service): State<Arc<UserService>>,
    principal: Principal,
) -> Result<Json<models::Profile>, AppError> {
    Ok(Json(service.profile(principal.username()).await?))
}

async fn contact(
    State(service): State<Arc<UserService>>,
    _principal: Principal,
    Path(username): Path<String>,
) -> Result<Json<models::Contact>, AppError> {
    Ok(Json(service.contact(&username).await?))
}

async fn stash_pending(
    State(service): State<Arc<UserService>>,
    Json(body): Json<StashSearch>,
) -> Result<(StatusCode, Json<models::PendingToken>), AppError> {
    let token = service.stash(&body.title, &body.location)?;
    Ok((StatusCode::CREATED, Json(token)))
}

/// Create a new instance of the users module
pub fn create_module(ctx: &AppContext) -> Arc<dyn Module> {
    Arc::new(UsersModule::new(ctx))
}
