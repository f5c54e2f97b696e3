//! Command handle for a spawned mirror.

use crate::{MirrorError, MirrorResult, MirrorSnapshot};
use std::time::Duration;
use sync_protocol_types::ContextId;
use tokio::sync::{mpsc, oneshot};

pub(crate) const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Poll period for [`MirrorHandle::wait_until`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// User actions and queries, processed in order with the mirror's other
/// inputs.
pub enum MirrorCommand {
    SignIn {
        email: String,
        password: String,
        reply: oneshot::Sender<MirrorResult<()>>,
    },
    SignOut {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<MirrorSnapshot>,
    },
    Shutdown,
}

/// What the popup UI holds on to.
#[derive(Clone)]
pub struct MirrorHandle {
    context: ContextId,
    commands: mpsc::Sender<MirrorCommand>,
}

impl MirrorHandle {
    pub(crate) fn new(context: ContextId, commands: mpsc::Sender<MirrorCommand>) -> Self {
        Self { context, commands }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> MirrorResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(MirrorCommand::SignIn {
            email: email.to_string(),
            password: password.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| MirrorError::Closed)?
    }

    pub async fn sign_out(&self) -> MirrorResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(MirrorCommand::SignOut { reply }).await?;
        rx.await.map_err(|_| MirrorError::Closed)
    }

    pub async fn snapshot(&self) -> MirrorResult<MirrorSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(MirrorCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| MirrorError::Closed)
    }

    /// Poll snapshots until `predicate` holds or `timeout` passes.
    pub async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> MirrorResult<MirrorSnapshot>
    where
        F: Fn(&MirrorSnapshot) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = self.snapshot().await?;
            if predicate(&snapshot) {
                return Ok(snapshot);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MirrorError::Timeout(timeout));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Stop the mirror. Closing the popup.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(MirrorCommand::Shutdown).await;
    }

    async fn send(&self, command: MirrorCommand) -> MirrorResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| MirrorError::Closed)
    }
}
