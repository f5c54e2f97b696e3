//! Auth client for the extension contexts.
//!
//! Every context talks to the backend-as-a-service through the
//! [`AuthBackend`] trait. Two implementations ship here:
//! - **[`SupabaseAuthClient`]**: Supabase Auth over HTTPS (`reqwest`)
//! - **[`InMemoryAuthBackend`]**: deterministic double backed by a shared
//!   [`InMemoryAuthServer`], used by tests and the demo runtime
//!
//! The [`auth_fsm`] module holds the state machine session mirrors use to
//! track sign-in, sign-out and external token application.

pub mod auth_fsm;
mod error;
mod memory;
mod session;
mod supabase;
mod traits;

pub use auth_fsm::{AuthMachine, AuthMachineInput, AuthMachineState, AuthState, RefreshConfig};
pub use error::{AuthError, AuthResult};
pub use memory::{InMemoryAuthBackend, InMemoryAuthServer};
pub use session::{AuthEvent, BackendSession, BackendUser};
pub use supabase::{SupabaseAuthClient, AUTO_REFRESH_MARGIN_SECS, AUTO_REFRESH_TICK_SECS};
pub use traits::AuthBackend;
