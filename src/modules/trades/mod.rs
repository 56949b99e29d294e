pub mod models;
mod repair;
mod workflow;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use bookswap_db::RequestEntry;
use bookswap_http::{AppError, Principal};
use bookswap_kernel::{InitCtx, Module};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::context::AppContext;
pub use repair::ReconcileReport;
pub use workflow::{TradeReceipt, TradeService};

/// Paired trade requests between a requester's wishlist and an owner's requestlist.
pub struct TradesModule {
    service: Arc<TradeService>,
    reconcile_interval: Duration,
    reconciler: Mutex<Option<JoinHandle<()>>>,
}

impl TradesModule {
    pub fn new(ctx: &AppContext) -> Self {
        let settings = &ctx.settings.trades;
        Self {
            service: Arc::new(TradeService::new(
                ctx.directory.clone(),
                ctx.catalog.clone(),
                settings.commit_retries,
            )),
            reconcile_interval: Duration::from_secs(settings.reconcile_interval_secs),
            reconciler: Mutex::new(None),
        }
    }

    pub fn service(&self) -> Arc<TradeService> {
        self.service.clone()
    }
}

#[async_trait]
impl Module for TradesModule {
    fn name(&self) -> &'static str {
        "trades"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            commit_retries = ctx.settings.trades.commit_retries,
            reconcile_interval_secs = ctx.settings.trades.reconcile_interval_secs,
            "trades module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/", post(propose))
            .route("/accept", post(accept))
            .route("/reject", post(reject))
            .route("/wishlist/{owner}/{isbn}", delete(withdraw))
            .route("/incoming", get(incoming))
            .route("/reconcile", post(reconcile))
            .with_state(self.service.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        let error = json!({
            "content": {
                "application/json": {
                    "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                }
            }
        });
        let receipt = json!({
            "description": "Trade transition committed",
            "content": {
                "application/json": {
                    "schema": { "$ref": "#/components/schemas/TradeReceipt" }
                }
            }
        });
        let settle_body = json!({
            "required": true,
            "content": {
                "application/json": {
                    "schema": { "$ref": "#/components/schemas/SettleTrade" }
                }
            }
        });
        let with = |description: &str| {
            let mut response = error.clone();
            response["description"] = json!(description);
            response
        };

        Some(json!({
            "paths": {
                "/": {
                    "post": {
                        "summary": "Request a trade for another user's book",
                        "tags": ["Trades"],
                        "requestBody": {
                            "required": true,
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/ProposeTrade" }
                                }
                            }
                        },
                        "responses": {
                            "201": receipt,
                            "401": with("No acting user"),
                            "404": with("User, book or catalog entry not found"),
                            "409": with("A request for this book is already outstanding"),
                            "422": with("Invalid request"),
                            "503": with("Catalog unavailable")
                        }
                    }
                },
                "/accept": {
                    "post": {
                        "summary": "Accept an incoming trade request",
                        "tags": ["Trades"],
                        "requestBody": settle_body,
                        "responses": {
                            "200": receipt,
                            "404": with("No such trade request"),
                            "409": with("Trade already settled")
                        }
                    }
                },
                "/reject": {
                    "post": {
                        "summary": "Reject an incoming trade request",
                        "tags": ["Trades"],
                        "requestBody": settle_body,
                        "responses": {
                            "200": receipt,
                            "404": with("No such trade request"),
                            "409": with("Trade already settled")
                        }
                    }
                },
                "/wishlist/{owner}/{isbn}": {
                    "delete": {
                        "summary": "Withdraw an outstanding trade request",
                        "tags": ["Trades"],
                        "parameters": [
                            { "name": "owner", "in": "path", "required": true, "schema": { "type": "string" } },
                            { "name": "isbn", "in": "path", "required": true, "schema": { "type": "string" } }
                        ],
                        "responses": {
                            "200": receipt,
                            "404": with("No such trade request"),
                            "409": with("Trade already settled")
                        }
                    }
                },
                "/incoming": {
                    "get": {
                        "summary": "Requests on your books still waiting for an answer",
                        "tags": ["Trades"],
                        "responses": {
                            "200": {
                                "description": "Pending incoming requests",
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "type": "array",
                                            "items": { "$ref": "#/components/schemas/RequestEntry" }
                                        }
                                    }
                                }
                            },
                            "404": with("User not found")
                        }
                    }
                },
                "/reconcile": {
                    "post": {
                        "summary": "Align every trade's two sides with the ledger",
                        "tags": ["Trades"],
                        "responses": {
                            "200": {
                                "description": "Reconciliation report",
                                "content": {
                                    "application/json": {
                                        "schema": { "$ref": "#/components/schemas/ReconcileReport" }
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "ProposeTrade": {
                        "type": "object",
                        "properties": {
                            "owner": { "type": "string" },
                            "isbn": { "type": "string" },
                            "location": { "type": "string" }
                        },
                        "required": ["owner", "isbn", "location"]
                    },
                    "SettleTrade": {
                        "type": "object",
                        "properties": {
                            "requester": { "type": "string" },
                            "isbn": { "type": "string" }
                        },
                        "required": ["requester", "isbn"]
                    },
                    "TradeReceipt": {
                        "type": "object",
                        "properties": {
                            "trade_id": { "type": "string", "format": "uuid" },
                            "state": {
                                "type": "string",
                                "enum": ["proposed", "accepted", "rejected", "withdrawn"]
                            },
                            "owner": { "type": "string" },
                            "requester": { "type": "string" },
                            "isbn": { "type": "string" }
                        },
                        "required": ["trade_id", "state", "owner", "requester", "isbn"]
                    },
                    "RequestEntry": {
                        "type": "object",
                        "properties": {
                            "trade_id": { "type": "string", "format": "uuid" },
                            "isbn": { "type": "string" },
                            "title": { "type": "string" },
                            "location": { "type": "string" },
                            "thumbnail": { "type": "string", "nullable": true },
                            "requester": { "type": "string" },
                            "accepted": { "type": "boolean" }
                        },
                        "required": ["trade_id", "isbn", "title", "location", "requester", "accepted"]
                    },
                    "ReconcileReport": {
                        "type": "object",
                        "properties": {
                            "checked": { "type": "integer" },
                            "repaired": { "type": "integer" },
                            "failed": { "type": "integer" }
                        },
                        "required": ["checked", "repaired", "failed"]
                    }
                }
            }
        }))
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        if self.reconcile_interval.is_zero() {
            tracing::info!(module = self.name(), "background reconciliation disabled");
            return Ok(());
        }

        let service = self.service.clone();
        let period = self.reconcile_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = service.reconcile().await {
                    tracing::error!(error = %err, "background reconciliation failed");
                }
            }
        });

        if let Some(previous) = self.reconciler.lock().await.replace(handle) {
            previous.abort();
        }
        tracing::info!(
            module = self.name(),
            every_secs = period.as_secs(),
            "trades module started"
        );
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.reconciler.lock().await.take() {
            handle.abort();
        }
        tracing::info!(module = self.name(), "trades module stopped");
        Ok(())
    }
}

async fn propose(
    State(service): State<Arc<TradeService>>,
    principal: Principal,
    Json(body): Json<models::ProposeTrade>,
) -> Result<(StatusCode, Json<TradeReceipt>), AppError> {
    let receipt = service
        .propose(principal.username(), &body.owner, &body.isbn, &body.location)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn accept(
    State(service): State<Arc<TradeService>>,
    principal: Principal,
    Json(body): Json<models::SettleTrade>,
) -> Result<Json<TradeReceipt>, AppError> {
    let receipt = service
        .accept(principal.username(), &body.requester, &body.isbn)
        .await?;
    Ok(Json(receipt))
}

async fn reject(
    State(service): State<Arc<TradeService>>,
    principal: Principal,
    Json(body): Json<models::SettleTrade>,
) -> Result<Json<TradeReceipt>, AppError> {
    let receipt = service
        .reject(principal.username(), &body.requester, &body.isbn)
        .await?;
    Ok(Json(receipt))
}

async fn withdraw(
    State(service): State<Arc<TradeService>>,
    principal: Principal,
    Path((owner, isbn)): Path<(String, String)>,
) -> Result<Json<TradeReceipt>, AppError> {
    let receipt = service
        .withdraw(principal.username(), &owner, &isbn)
        .await?;
    Ok(Json(receipt))
}

async fn incoming(
    State(service): State<Arc<TradeService>>,
    principal: Principal,
) -> Result<Json<Vec<RequestEntry>>, AppError> {
    Ok(Json(service.incoming(principal.username()).await?))
}

async fn reconcile(
    State(service): State<Arc<TradeService>>,
    principal: Principal,
) -> Result<Json<ReconcileReport>, AppError> {
    tracing::info!(requested_by = principal.username(), "manual reconciliation pass");
    Ok(Json(service.reconcile().await?))
}

/// Create a new instance of the trades module
pub fn create_module(ctx: &AppContext) -> Arc<dyn Module> {
    Arc::new(TradesModule::new(ctx))
}
