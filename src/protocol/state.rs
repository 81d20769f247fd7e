//! WebSocket session state machine.
//!
//! ```text
//! Connecting ──Upgraded──► Handshaking ──Init(ok)──► Acknowledged ◄─┐ Subscribe / Stop /
//!                              │                        │          └─ attributable Malformed
//!                              │ Init(denied), Malformed,│ Init, Violation,
//!                              │ Subscribe, HandshakeTimeout  unattributable Malformed
//!                              ▼                        ▼
//!                           Errored ◄───────────────────┘
//!                              │ Drained
//!                              ▼
//!   (any) ──PeerClosed / IdleTimeout──► Closed ◄──Drained── Closing ◄──CloseRequested── (live)
//! ```
//!
//! The session driver feeds events in and acts on the resulting state; the
//! table itself has no I/O.

/// Protocol state of one WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Acknowledged,
    Closing,
    Errored,
    Closed,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// HTTP upgrade completed
    Upgraded,
    /// `connection_init` received; `authorized` is the CSRF outcome
    Init { authorized: bool },
    /// `start` / `subscribe`
    Subscribe,
    /// `stop` / client `complete`
    Stop,
    /// `ping`, `pong`
    Heartbeat,
    /// Undecodable frame; `attributable` when it named a subscription id
    Malformed { attributable: bool },
    /// Out-of-sequence frame the driver detected (duplicate subscription id)
    Violation,
    /// No `connection_init` in time
    HandshakeTimeout,
    /// No inbound traffic in time
    IdleTimeout,
    /// Socket closed by the peer or unwritable
    PeerClosed,
    /// Orderly shutdown asked for (`connection_terminate`)
    CloseRequested,
    /// Subscriptions cancelled and the close frame sent
    Drained,
}

impl SessionState {
    /// Transition table.
    pub fn next(self, event: SessionEvent) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Closed, _) => S::Closed,
            (_, E::PeerClosed | E::IdleTimeout) => S::Closed,

            (S::Connecting, E::Upgraded) => S::Handshaking,
            (S::Connecting, _) => S::Errored,

            (S::Handshaking, E::Init { authorized: true }) => S::Acknowledged,
            (S::Handshaking, E::Heartbeat) => S::Handshaking,
            (S::Handshaking, E::CloseRequested) => S::Closing,
            (S::Handshaking, _) => S::Errored,

            (S::Acknowledged, E::Subscribe | E::Stop | E::Heartbeat) => S::Acknowledged,
            (S::Acknowledged, E::Malformed { attributable: true }) => S::Acknowledged,
            (S::Acknowledged, E::CloseRequested) => S::Closing,
            (S::Acknowledged, _) => S::Errored,

            (S::Closing | S::Errored, E::Drained) => S::Closed,
            (S::Closing, _) => S::Closing,
            (S::Errored, _) => S::Errored,
        }
    }

    /// Only an acknowledged session may carry subscription data.
    pub fn can_emit_data(self) -> bool {
        self == SessionState::Acknowledged
    }

    /// Still reading frames from the peer.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Handshaking | SessionState::Acknowledged)
    }
}
