//! Per-mirror state owned by the controller.

use auth_backend::AuthState;
use serde::Serialize;
use sync_protocol_types::{ContextId, Token};

/// Loop-suppression flags. Process-local, reset when the popup reopens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorState {
    /// Set while an externally received token is being applied, so the
    /// resulting local auth events are not re-emitted.
    pub applying_external: bool,
    /// Set while this mirror's own token is being persisted through the
    /// relay, so the resulting store notification is not re-applied.
    pub writing_storage: bool,
    /// Token value the relay was asked to persist while `writing_storage`.
    pub writing_value: Token,
    /// Access token of the last snapshot this mirror processed (`None`
    /// once a sign-out was processed).
    pub last_access_token: Option<String>,
    /// Access token of an applied snapshot that had to be refreshed. Late
    /// copies of it (store notification and relay broadcast both carry it)
    /// are skipped; re-applying the dead pair would sign the mirror out.
    pub superseded_access_token: Option<String>,
}

/// What the popup renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiState {
    pub auth_state: AuthState,
    pub email: Option<String>,
    pub error: Option<String>,
    pub loading: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            auth_state: AuthState::SignedOut,
            email: None,
            error: None,
            loading: false,
        }
    }
}

impl UiState {
    pub fn is_signed_in(&self) -> bool {
        self.auth_state.is_authenticated()
    }
}

/// Counters used by tests and the demo trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    /// Sync messages this mirror sent to the relay.
    pub outbound_syncs: u64,
    /// External snapshots actually applied to the local client.
    pub external_applied: u64,
    /// Inputs skipped because the token was already current.
    pub duplicates_skipped: u64,
    /// Local auth events or store notifications suppressed by a flag.
    pub echoes_suppressed: u64,
}

/// Point-in-time view of one mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorSnapshot {
    #[serde(serialize_with = "serialize_context")]
    pub context: ContextId,
    pub ui: UiState,
    pub session_access_token: Option<String>,
    pub stats: MirrorStats,
}

fn serialize_context<S: serde::Serializer>(id: &ContextId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&id.to_string())
}
