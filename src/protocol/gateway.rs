//! Shared gateway state handed to every request and session.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::config::Config;

use super::csrf::{CsrfContext, CsrfDecision, CsrfValidator};
use super::engine::{EngineAdapter, QueryEngine};
use super::error::{GatewayError, GatewayResult};

/// Counters reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub active_subscriptions: usize,
    pub total_sessions: u64,
}

/// Process-wide state: configuration, the engine adapter and the CSRF
/// validator. Read-only after construction apart from the counters.
pub struct Gateway {
    config: Config,
    adapter: EngineAdapter,
    csrf: Option<Arc<dyn CsrfValidator>>,
    started_at: Instant,
    active_sessions: AtomicUsize,
    active_subscriptions: AtomicUsize,
    total_sessions: AtomicU64,
}

impl Gateway {
    pub fn new(config: Config, engine: Arc<dyn QueryEngine>) -> GatewayResult<Self> {
        config.validate().map_err(GatewayError::InvalidConfig)?;
        Ok(Self {
            config,
            adapter: EngineAdapter::new(engine),
            csrf: None,
            started_at: Instant::now(),
            active_sessions: AtomicUsize::new(0),
            active_subscriptions: AtomicUsize::new(0),
            total_sessions: AtomicU64::new(0),
        })
    }

    /// Install the validator consulted when CSRF protection is enabled.
    pub fn with_csrf_validator(mut self, validator: Arc<dyn CsrfValidator>) -> Self {
        self.csrf = Some(validator);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn adapter(&self) -> &EngineAdapter {
        &self.adapter
    }

    pub fn csrf_enabled(&self) -> bool {
        self.config.csrf.enabled
    }

    /// Run the CSRF check. Callers test [`Gateway::csrf_enabled`] first so
    /// that a disabled deployment never builds a context at all; calling this
    /// with protection disabled still answers `NotApplicable` without
    /// consulting the validator.
    pub async fn csrf_decision(&self, ctx: &CsrfContext<'_>) -> CsrfDecision {
        if !self.config.csrf.enabled {
            return CsrfDecision::NotApplicable;
        }
        let Some(validator) = &self.csrf else {
            warn!("csrf_validator_missing");
            return CsrfDecision::Invalid;
        };
        if validator.validate(ctx).await {
            CsrfDecision::Valid
        } else {
            CsrfDecision::Invalid
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn session_stats(&self) -> SessionStats {
        SessionStats {
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            active_subscriptions: self.active_subscriptions.load(Ordering::Relaxed),
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn subscription_started(&self) {
        self.active_subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn subscriptions_ended(&self, count: usize) {
        self.active_subscriptions.fetch_sub(count, Ordering::Relaxed);
    }
}
