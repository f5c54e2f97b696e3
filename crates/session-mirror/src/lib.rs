//! Session mirror for extension pages (popup, side panel).
//!
//! Each open extension page runs one [`SessionMirror`]. It keeps the page's
//! private auth client consistent with the canonical token held in extension
//! storage, in both directions, without echoing its own changes back.
//!
//! Spawn one with [`SessionMirror::spawn`] and drive it through the returned
//! [`MirrorHandle`].

mod error;
mod handle;
mod mirror;
mod state;

pub use error::{MirrorError, MirrorResult};
pub use handle::{MirrorCommand, MirrorHandle};
pub use mirror::SessionMirror;
pub use state::{MirrorSnapshot, MirrorState, MirrorStats, UiState};
