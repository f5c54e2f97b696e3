//! In-process extension runtime.
//!
//! Wires the three kinds of context together over one [`ExtensionBus`]:
//! the background relay, a session mirror per open popup, and a page bridge
//! per matching tab. The CLI and the end-to-end tests drive the protocol
//! through this crate.
//!
//! [`ExtensionBus`]: extension_bus::ExtensionBus

mod demo;
mod error;
mod runtime;
mod web_app;

pub use demo::{run_demo, DemoStep, DEMO_EMAIL, DEMO_PASSWORD};
pub use error::{RuntimeError, RuntimeResult};
pub use runtime::{wait_until, ExtensionRuntime, Popup, Tab};
pub use web_app::WebApp;
