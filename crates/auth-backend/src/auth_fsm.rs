//! Authentication state machine using rust-fsm.
//!
//! Tracks what one session mirror's auth client is doing, so the UI can show
//! progress and handlers can reject transitions that make no sense.
//!
//! ## State Diagram
//!
//! ```text
//!                 ┌─────────────────┐
//!   ┌────────────►│    SignedOut    │ (initial)
//!   │             └──┬─────┬─────┬──┘
//!   │   SignInAttempt│     │     │ExternalToken
//!   │                ▼     │     ▼
//!   │   ┌──────────────┐   │   ┌──────────────────┐
//!   │   │  SigningIn   │   │   │ ApplyingExternal │
//!   │   └──────┬───────┘   │   └────────┬─────────┘
//!   │          │Succeeded  │SessionRestored │Applied/SessionKept  (Cleared/Rejected → SignedOut)
//!   │          ▼           ▼                ▼
//!   │        ┌─────────────────────────────────┐
//!   │        │            SignedIn             │◄── TokenRefreshed
//!   │        └───────────────┬─────────────────┘
//!   │                        │ SignOutRequested
//!   │                        ▼
//!   │               ┌─────────────────┐
//!   └───────────────│   SigningOut    │
//!    SignOutComplete└─────────────────┘
//! ```

use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Generates module `mirror_auth_machine` with State, Input and StateMachine.
state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub mirror_auth_machine(SignedOut)

    SignedOut => {
        SignInAttempt => SigningIn,
        ExternalToken => ApplyingExternal,
        SessionRestored => SignedIn,
        SignOutRequested => SigningOut,
        SessionLost => SignedOut
    },
    SigningIn => {
        SignInSucceeded => SignedIn,
        SignInFailed => SignedOut
    },
    SignedIn => {
        TokenRefreshed => SignedIn,
        SessionRestored => SignedIn,
        ExternalToken => ApplyingExternal,
        SignInAttempt => SigningIn,
        SignOutRequested => SigningOut,
        SessionLost => SignedOut
    },
    ApplyingExternal => {
        ExternalApplied => SignedIn,
        ExternalCleared => SignedOut,
        ExternalRejected => SignedOut,
        SessionKept => SignedIn
    },
    SigningOut => {
        SignOutComplete => SignedOut
    }
}

pub use mirror_auth_machine::Input as AuthMachineInput;
pub use mirror_auth_machine::State as AuthMachineState;
pub use mirror_auth_machine::StateMachine as AuthMachine;

/// User-facing view of the machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    SignedOut,
    SigningIn,
    SignedIn,
    SigningOut,
    /// Adopting a token that arrived from another context.
    ApplyingExternal,
}

impl AuthState {
    /// Returns true if the user has a session (SignedIn state only).
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::SignedIn)
    }

    /// Returns true if the state is an in-progress state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthState::SigningIn | AuthState::SigningOut | AuthState::ApplyingExternal
        )
    }
}

impl From<&AuthMachineState> for AuthState {
    fn from(state: &AuthMachineState) -> Self {
        match state {
            AuthMachineState::SignedOut => AuthState::SignedOut,
            AuthMachineState::SigningIn => AuthState::SigningIn,
            AuthMachineState::SignedIn => AuthState::SignedIn,
            AuthMachineState::SigningOut => AuthState::SigningOut,
            AuthMachineState::ApplyingExternal => AuthState::ApplyingExternal,
        }
    }
}

/// Configuration for retry behavior during token refresh.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Maximum number of attempts.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RefreshConfig {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}
