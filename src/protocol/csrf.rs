//! CSRF token validation.
//!
//! The gateway only consumes a yes/no answer. Where tokens come from and how
//! sessions are stored belong to the caller, injected through
//! [`CsrfValidator`] or, for the default validator, [`SessionStore`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Where the presented token was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// Request header on a simple request or WebSocket upgrade
    Header,
    /// `connection_init` payload
    InitPayload,
}

/// Everything a validator may look at for one check.
#[derive(Debug, Clone, Copy)]
pub struct CsrfContext<'a> {
    pub source: TokenSource,
    pub session_id: Option<&'a str>,
    pub token: Option<&'a str>,
    pub origin: Option<&'a str>,
}

/// Result of one CSRF check. Never cached past the request or handshake that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfDecision {
    Valid,
    Invalid,
    /// Protection disabled; the validator was not consulted
    NotApplicable,
}

impl CsrfDecision {
    pub fn permits(self) -> bool {
        !matches!(self, CsrfDecision::Invalid)
    }
}

/// Pluggable CSRF check. Implementations must be side-effect free and safe to
/// share across every connection.
#[async_trait]
pub trait CsrfValidator: Send + Sync {
    async fn validate(&self, ctx: &CsrfContext<'_>) -> bool;
}

/// Read-only view of the session store holding each session's CSRF token.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn csrf_token(&self, session_id: &str) -> Option<String>;
}

/// Validates the presented token against the one recorded for the session.
pub struct StoreCsrfValidator {
    store: Arc<dyn SessionStore>,
}

impl StoreCsrfValidator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CsrfValidator for StoreCsrfValidator {
    async fn validate(&self, ctx: &CsrfContext<'_>) -> bool {
        let (Some(session_id), Some(presented)) = (ctx.session_id, ctx.token) else {
            return false;
        };
        if presented.is_empty() {
            return false;
        }
        match self.store.csrf_token(session_id).await {
            Some(expected) => tokens_match(&expected, presented),
            None => false,
        }
    }
}

/// Compare fixed-length digests so the comparison time does not depend on
/// where the first differing byte of the raw tokens sits.
fn tokens_match(expected: &str, presented: &str) -> bool {
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(presented.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Session store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    tokens: DashMap<String, String>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue (or replace) the token for a session and return it.
    pub fn issue(&self, session_id: &str) -> String {
        let token = generate_token();
        self.tokens.insert(session_id.to_string(), token.clone());
        token
    }

    pub fn insert(&self, session_id: impl Into<String>, token: impl Into<String>) {
        self.tokens.insert(session_id.into(), token.into());
    }

    pub fn revoke(&self, session_id: &str) -> bool {
        self.tokens.remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn csrf_token(&self, session_id: &str) -> Option<String> {
        self.tokens.get(session_id).map(|t| t.value().clone())
    }
}

/// Generate a random token (32 bytes → 64 hex characters).
pub fn generate_token() -> String {
    use rand::Rng;
    use std::fmt::Write;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    let mut hex = String::with_capacity(64);
    for b in &bytes {
        let _ = write!(hex, "{b:02x}");
    }
    hex
}

/// First value of a header, if it is valid visible ASCII.
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Value of a cookie from any `Cookie` header.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}
