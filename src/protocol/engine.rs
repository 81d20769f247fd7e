//! Query engine seam and the forwarding adapter.
//!
//! The engine is an external collaborator: it resolves an [`Operation`] into a
//! lazy stream of [`ExecutionResult`]s (one item for queries and mutations,
//! any number for subscriptions). [`EngineAdapter`] forwards operations to it
//! and never interprets the results.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::wire::{ExecutionResult, GraphQlError, Operation};

/// Lazily produced results for one operation.
pub type ResultStream = BoxStream<'static, ExecutionResult>;

/// The engine refused the operation outright (parse or validation failure).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    pub code: Option<String>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    fn into_result(self) -> ExecutionResult {
        let error = match self.code {
            Some(code) => GraphQlError::with_code(self.message, &code),
            None => GraphQlError::new(self.message),
        };
        ExecutionResult {
            errors: vec![error],
            ..ExecutionResult::default()
        }
    }
}

/// The query engine behind the gateway.
pub trait QueryEngine: Send + Sync {
    fn execute(&self, operation: Operation) -> Result<ResultStream, EngineError>;
}

/// Event sent from a subscription task back to its owning session.
#[derive(Debug)]
pub enum SubscriptionEvent {
    Next {
        id: String,
        generation: u64,
        result: ExecutionResult,
    },
    Complete {
        id: String,
        generation: u64,
    },
}

/// Forwards operations to the engine on behalf of either transport.
#[derive(Clone)]
pub struct EngineAdapter {
    engine: Arc<dyn QueryEngine>,
}

impl EngineAdapter {
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self { engine }
    }

    /// Results for an operation. Engine refusals become a single error result.
    pub fn stream(&self, operation: Operation) -> ResultStream {
        match self.engine.execute(operation) {
            Ok(results) => results,
            Err(e) => {
                debug!(error = %e, "engine_rejected_operation");
                stream::once(async move { e.into_result() }).boxed()
            }
        }
    }

    /// First result only, for request/response transports.
    pub async fn execute_single(&self, operation: Operation) -> ExecutionResult {
        self.stream(operation)
            .next()
            .await
            .unwrap_or_else(|| ExecutionResult::error("Query engine produced no result"))
    }

    /// Forward every result of a subscription to `events` until the engine
    /// finishes, the receiver goes away, or the returned handle is aborted.
    pub fn spawn_subscription(
        &self,
        id: String,
        generation: u64,
        operation: Operation,
        events: mpsc::Sender<SubscriptionEvent>,
    ) -> JoinHandle<()> {
        let mut results = self.stream(operation);
        tokio::spawn(async move {
            while let Some(result) = results.next().await {
                let event = SubscriptionEvent::Next {
                    id: id.clone(),
                    generation,
                    result,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            let _ = events
                .send(SubscriptionEvent::Complete { id, generation })
                .await;
        })
    }
}

/// Stand-in engine for running the gateway without a real backend.
///
/// Queries and mutations echo their name and variables. Documents starting
/// with `subscription` emit `{"tick": n}` every `tick` interval, stopping
/// after `variables.limit` ticks when given.
#[derive(Debug, Clone)]
pub struct EchoEngine {
    tick: Duration,
}

impl EchoEngine {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl QueryEngine for EchoEngine {
    fn execute(&self, operation: Operation) -> Result<ResultStream, EngineError> {
        let document = operation.query.trim_start();
        if document.starts_with("subscription") {
            let limit = operation
                .variables
                .get("limit")
                .and_then(serde_json::Value::as_u64);
            let tick = self.tick;
            let ticks = stream::unfold(0u64, move |n| async move {
                if limit.is_some_and(|limit| n >= limit) {
                    return None;
                }
                tokio::time::sleep(tick).await;
                Some((ExecutionResult::data(json!({ "tick": n })), n + 1))
            });
            return Ok(ticks.boxed());
        }
        let recognised = document.starts_with('{')
            || document.starts_with("query")
            || document.starts_with("mutation");
        if !recognised {
            return Err(EngineError::with_code(
                "Syntax Error: expected a query, mutation or subscription",
                "GRAPHQL_PARSE_FAILED",
            ));
        }
        let result = ExecutionResult::data(json!({
            "echo": {
                "operationName": operation.operation_name,
                "variables": operation.variables,
            }
        }));
        Ok(stream::once(async move { result }).boxed())
    }
}
