//! HTTP Handlers
//!
//! - `graphql` - the gateway route, both transports
//! - `ws` - WebSocket session driver
//! - `admin` - health check

pub mod admin;
pub mod graphql;
pub mod ws;
