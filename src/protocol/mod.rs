//! Gateway Protocol
//!
//! One route, two transports: simple HTTP requests for queries and mutations,
//! an upgraded WebSocket for subscriptions.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                     /graphql (any method)                   |
//! +-------------------------------------------------------------+
//! |  classify ──► Rejected ──► 400                              |
//! |     │                                                       |
//! |     ├──► SimplePost ──► guard (content type, CSRF) ──►      |
//! |     │                   adapter.execute_single ──► 200/422  |
//! |     │                                                       |
//! |     └──► Upgrade ──► 101 ──► session (handshake, CSRF) ──►  |
//! |                              adapter.spawn_subscription     |
//! +-------------------------------------------------------------+
//! ```
//!
//! # Module Structure
//!
//! - `classify` - Transport classification (pure)
//! - `guard` - Simple-request checks
//! - `csrf` - CSRF validator seam and the session-store backed default
//! - `engine` - Query engine seam and the forwarding adapter
//! - `state` - WebSocket session state machine
//! - `gateway` - Shared per-process state handed to every connection
//! - `wire` - Wire format types
//! - `error` - Error taxonomy
//! - `rest` - HTTP routing and the WebSocket session driver

pub mod classify;
pub mod csrf;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod rest;
pub mod state;
pub mod wire;

pub use classify::{classify, Rejection, Transport};
pub use csrf::{
    CsrfContext, CsrfDecision, CsrfValidator, InMemorySessionStore, SessionStore,
    StoreCsrfValidator, TokenSource,
};
pub use engine::{EchoEngine, EngineAdapter, EngineError, QueryEngine, ResultStream};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{Gateway, SessionStats};
pub use state::{SessionEvent, SessionState};
pub use wire::{
    ClientMessage, ExecutionResult, GraphQlError, Operation, RawOperation, ServerMessage,
    SubProtocol,
};

/// Default HTTP server port
pub const DEFAULT_PORT: u16 = 4000;

/// WebSocket close codes used when the server ends a session.
pub mod close_code {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Unexpected server condition
    pub const INTERNAL_ERROR: u16 = 1011;
    /// Malformed or unexpected frame
    pub const BAD_REQUEST: u16 = 4400;
    /// Subscribe before `connection_ack`
    pub const UNAUTHORIZED: u16 = 4401;
    /// Handshake rejected by the CSRF check
    pub const FORBIDDEN: u16 = 4403;
    /// No `connection_init` within the handshake timeout
    pub const HANDSHAKE_TIMEOUT: u16 = 4408;
    /// Subscription id already in use
    pub const DUPLICATE_SUBSCRIPTION: u16 = 4409;
    /// Second `connection_init`
    pub const TOO_MANY_INIT: u16 = 4429;
}
