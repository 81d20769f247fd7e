//! # GraphGate
//!
//! A GraphQL gateway serving queries and mutations over plain HTTP and
//! subscriptions over WebSocket, both on the same route.
//!
//! ## Request Flow
//!
//! ```text
//! request on /graphql
//!     ↓
//! [classify]          → Upgrade(protocol) | SimplePost | Rejected(400)
//!     ↓
//! SimplePost: [guard] → content type, CSRF header, body → Operation
//!     ↓                 (400 transport error, 422 no operation)
//! [EngineAdapter]     → first ExecutionResult as JSON
//!
//! Upgrade: 101 → connection_init → CSRF (init payload) → connection_ack
//!     ↓
//! start/subscribe → EngineAdapter::spawn_subscription → next/data … complete
//! ```
//!
//! The query engine and the session store behind CSRF validation are
//! supplied by the caller through [`QueryEngine`] and [`CsrfValidator`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use graphgate::{Config, EchoEngine, Gateway};
//!
//! let gateway = Gateway::new(Config::load()?, Arc::new(EchoEngine::default()))?;
//! graphgate::protocol::rest::start_http_server(Arc::new(gateway)).await?;
//! ```

pub mod config;
pub mod protocol;

pub use config::Config;
pub use protocol::{
    CsrfValidator, EchoEngine, ExecutionResult, Gateway, GatewayError, GatewayResult,
    InMemorySessionStore, Operation, QueryEngine, StoreCsrfValidator,
};
