pub mod models;
mod shelf;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use bookswap_http::{AppError, Principal};
use bookswap_kernel::{InitCtx, Module};
use serde_json::json;

use crate::context::AppContext;
pub use shelf::BookShelf;

/// Books a user owns and offers for trade
pub struct BooksModule {
    shelf: Arc<BookShelf>,
}

impl BooksModule {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            shelf: Arc::new(BookShelf::new(
                ctx.directory.clone(),
                ctx.catalog.clone(),
                ctx.settings.trades.commit_retries,
            )),
        }
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/", get(list_books))
            .route("/{isbn}", post(add_book).delete(remove_book))
            .with_state(self.shelf.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(json!({
            "paths": {
                "/": {
                    "get": {
                        "summary": "List your shelf",
                        "tags": ["Books"],
                        "responses": {
                            "200": {
                                "description": "Books on the acting user's shelf",
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "type": "array",
                                            "items": {
                                                "$ref": "#/components/schemas/Book"
                                            }
                                        }
                                    }
                                }
                            },
                            "401": {
                                "description": "No acting user",
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "$ref": "#/components/schemas/ErrorResponse"
                                        }
                                    }
                                }
                            }
                        }
                    }
                },
                "/{isbn}": {
                    "parameters": [
                        {
                            "name": "isbn",
                            "in": "path",
                            "required": true,
                            "schema": { "type": "string" }
                        }
                    ],
                    "post": {
                        "summary": "Put a book on your shelf",
                        "tags": ["Books"],
                        "responses": {
                            "201": {
                                "description": "Book shelved",
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "$ref": "#/components/schemas/Book"
                                        }
                                    }
                                }
                            },
                            "404": {
                                "description": "Unknown catalog identifier",
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "$ref": "#/components/schemas/ErrorResponse"
                                        }
                                    }
                                }
                            },
                            "503": {
                                "description": "Catalog unavailable",
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "$ref": "#/components/schemas/ErrorResponse"
                                        }
                                    }
                                }
                            }
                        }
                    },
                    "delete": {
                        "summary": "Take a book off your shelf",
                        "tags": ["Books"],
                        "responses": {
                            "204": { "description": "Book removed" },
                            "404": {
                                "description": "Book not on the shelf",
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "$ref": "#/components/schemas/ErrorResponse"
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Book": {
                        "type": "object",
                        "properties": {
                            "isbn": {
                                "type": "string",
                                "description": "Catalog identifier"
                            },
                            "title": {
                                "type": "string",
                                "description": "Title of the book"
                            },
                            "location": {
                                "type": "string",
                                "description": "Owner's location when shelved"
                            },
                            "thumbnail": {
                                "type": "string",
                                "nullable": true,
                                "description": "Cover image reference"
                            },
                            "owner": {
                                "type": "string",
                                "description": "Username of the owner"
                            }
                        },
                        "required": ["isbn", "title", "location", "owner"]
                    }
                }
            }
        }))
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module stopped");
        Ok(())
    }
}

async fn list_books(
    State(shelf): State<Arc<BookShelf>>,
    principal: Principal,
) -> Result<Json<Vec<models::Book>>, AppError> {
    let books = shelf.list(principal.username()).await?;
    Ok(Json(books.into_iter().map(models::Book::from).collect()))
}

async fn add_book(
    State(shelf): State<Arc<BookShelf>>,
    principal: Principal,
    Path(isbn): Path<String>,
) -> Result<(StatusCode, Json<models::Book>), AppError> {
    let book = shelf.add(principal.username(), &isbn).await?;
    Ok((StatusCode::CREATED, Json(book.into())))
}

async fn remove_book(
    State(shelf): State<Arc<BookShelf>>,
    principal: Principal,
    Path(isbn): Path<String>,
) -> Result<StatusCode, AppError> {
    shelf.remove(principal.username(), &isbn).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create a new instance of the books module
pub fn create_module(ctx: &AppContext) -> Arc<dyn Module> {
    Arc::new(BooksModule::new(ctx))
}
