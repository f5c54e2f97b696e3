//! The session mirror controller.
//!
//! One mirror runs per popup / side-panel instance. It owns a private auth
//! client and keeps it in step with the canonical token:
//!
//! - local auth changes (sign-in, refresh, sign-out) are sent to the relay,
//!   which persists them and fans them out;
//! - snapshots arriving from the relay or from storage are applied to the
//!   local client.
//!
//! Every input is handled to completion before the next is taken, and two
//! flags plus a value comparison keep the two directions from feeding each
//! other. A flag is raised before the first await of a handler and lowered
//! only after one scheduler tick, once the events the handler itself caused
//! have been drained.

use crate::handle::{MirrorCommand, MirrorHandle, COMMAND_CHANNEL_CAPACITY};
use crate::{MirrorResult, MirrorSnapshot, MirrorState, MirrorStats, UiState};
use auth_backend::{AuthBackend, AuthEvent, AuthMachine, AuthMachineInput, AuthMachineState, AuthState};
use extension_bus::{ExtensionBus, MessageOrigin, PagePort};
use std::collections::VecDeque;
use std::sync::Arc;
use sync_protocol_types::{
    access_token_of, describe, ContextId, RelayReply, RelayRequest, SessionMessage, SyncSource,
    Token,
};
use token_storage::{TokenChange, TokenStore, TokenWatch};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Source tag on everything a mirror sends.
const MIRROR_SOURCE: SyncSource = SyncSource::Popup;

/// Input that arrived while a flag was raised but was not caused by the
/// flagged operation. Processed before the next fresh input.
enum Deferred {
    Auth(AuthEvent),
    Store(TokenChange),
}

pub struct SessionMirror {
    auth: Arc<dyn AuthBackend>,
    tokens: TokenStore,
    bus: ExtensionBus,
    context: ContextId,
    machine: AuthMachine,
    state: MirrorState,
    ui: UiState,
    stats: MirrorStats,
    auth_events: broadcast::Receiver<AuthEvent>,
    store_changes: TokenWatch,
    deferred: VecDeque<Deferred>,
}

impl SessionMirror {
    /// Create a mirror for an already connected extension page.
    ///
    /// Subscriptions are taken here so nothing emitted between construction
    /// and [`startup`](Self::startup) is missed.
    pub fn new(
        auth: Arc<dyn AuthBackend>,
        tokens: TokenStore,
        bus: ExtensionBus,
        context: ContextId,
    ) -> Self {
        let auth_events = auth.subscribe();
        let store_changes = tokens.watch();
        Self {
            auth,
            tokens,
            bus,
            context,
            machine: AuthMachine::new(),
            state: MirrorState::default(),
            ui: UiState::default(),
            stats: MirrorStats::default(),
            auth_events,
            store_changes,
            deferred: VecDeque::new(),
        }
    }

    /// Connect a page on `bus` and run a mirror for it on the runtime.
    pub fn spawn(
        auth: Arc<dyn AuthBackend>,
        tokens: TokenStore,
        bus: ExtensionBus,
    ) -> MirrorResult<(MirrorHandle, JoinHandle<()>)> {
        let port = bus.connect_page()?;
        let context = port.id();
        let mirror = SessionMirror::new(auth, tokens, bus, context);
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let task = tokio::spawn(mirror.run(port, rx));
        Ok((MirrorHandle::new(context, tx), task))
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn state(&self) -> &MirrorState {
        &self.state
    }

    pub fn stats(&self) -> MirrorStats {
        self.stats
    }

    pub async fn snapshot(&self) -> MirrorSnapshot {
        MirrorSnapshot {
            context: self.context,
            ui: self.ui.clone(),
            session_access_token: self
                .auth
                .get_session()
                .await
                .map(|s| s.access_token().to_string()),
            stats: self.stats,
        }
    }

    // ==========================================
    // Event loop
    // ==========================================

    /// Drive the mirror until the page closes, the extension context is
    /// invalidated or a shutdown command arrives.
    pub async fn run(mut self, mut port: PagePort, mut commands: mpsc::Receiver<MirrorCommand>) {
        info!(context = %self.context, "session mirror started");
        self.startup().await;

        let mut auth_open = true;
        let mut store_open = true;
        loop {
            self.process_deferred().await;

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(MirrorCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                message = port.recv() => match message {
                    Some(message) => self.on_inbound(message).await,
                    None => {
                        info!(context = %self.context, "page port closed");
                        break;
                    }
                },
                event = self.auth_events.recv(), if auth_open => match event {
                    Ok(event) => self.on_auth_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => auth_open = false,
                },
                change = self.store_changes.recv(), if store_open => match change {
                    Some(change) => self.on_store_change(change).await,
                    None => store_open = false,
                },
            }
        }

        self.bus.disconnect_page(self.context);
        info!(context = %self.context, "session mirror stopped");
    }

    async fn handle_command(&mut self, command: MirrorCommand) {
        match command {
            MirrorCommand::SignIn {
                email,
                password,
                reply,
            } => {
                let result = self.sign_in(&email, &password).await;
                let _ = reply.send(result);
            }
            MirrorCommand::SignOut { reply } => {
                self.sign_out().await;
                let _ = reply.send(());
            }
            MirrorCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot().await);
            }
            MirrorCommand::Shutdown => {}
        }
    }

    /// Handle inputs that were set aside while a flag was raised.
    pub async fn process_deferred(&mut self) {
        while let Some(input) = self.deferred.pop_front() {
            match input {
                Deferred::Auth(event) => self.on_auth_event(event).await,
                Deferred::Store(change) => self.on_store_change(change).await,
            }
        }
    }

    // ==========================================
    // Handlers
    // ==========================================

    /// Adopt whatever the canonical store holds when the popup opens.
    pub async fn startup(&mut self) {
        let stored = match self.tokens.read_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "could not read stored session");
                None
            }
        };

        if stored.is_some() {
            self.apply_external(stored, "startup").await;
        } else {
            debug!(context = %self.context, "no stored session");
            self.ui.email = None;
            self.ui.auth_state = AuthState::from(self.machine.state());
        }
    }

    /// Local auth state change. Sent to the relay unless it was caused by
    /// an external apply or carries the token already processed.
    pub async fn on_auth_event(&mut self, event: AuthEvent) {
        if self.state.applying_external {
            self.stats.echoes_suppressed += 1;
            debug!(event = event.name(), "auth event during external apply, suppressed");
            return;
        }

        let token = event.token();
        if access_token_of(&token) == self.state.last_access_token.as_deref() {
            self.stats.duplicates_skipped += 1;
            debug!(event = event.name(), "auth event carries the processed token");
            return;
        }

        info!(context = %self.context, event = event.name(), "local auth change");
        self.state.last_access_token = access_token_of(&token).map(str::to_string);
        match &event {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
                self.ui.email = session.user.email.clone();
                let input = if matches!(event, AuthEvent::TokenRefreshed(_))
                    && *self.machine.state() == AuthMachineState::SignedIn
                {
                    AuthMachineInput::TokenRefreshed
                } else {
                    AuthMachineInput::SessionRestored
                };
                self.transition(input);
            }
            AuthEvent::SignedOut => {
                self.ui.email = None;
                self.transition(AuthMachineInput::SessionLost);
            }
        }

        self.publish(token, event.name()).await;
    }

    /// Snapshot delivered by the relay.
    pub async fn on_inbound(&mut self, message: SessionMessage) {
        debug!(
            context = %self.context,
            source = %message.source,
            token = %describe(&message.token),
            "inbound session message"
        );
        let via = match message.source {
            SyncSource::Web => "web",
            SyncSource::Popup => "popup",
            SyncSource::Extension => "extension",
        };
        self.apply_external(message.token, via).await;
    }

    /// Change notification for the canonical key.
    pub async fn on_store_change(&mut self, change: TokenChange) {
        if self.state.writing_storage && change.new == self.state.writing_value {
            self.stats.echoes_suppressed += 1;
            debug!("store change from own write, suppressed");
            return;
        }
        self.apply_external(change.new, "storage").await;
    }

    /// Password sign-in from the popup form. Credential errors land in
    /// `UiState::error` verbatim; everything else is only logged.
    pub async fn sign_in(&mut self, email: &str, password: &str) -> MirrorResult<()> {
        self.ui.loading = true;
        self.ui.error = None;
        self.transition(AuthMachineInput::SignInAttempt);

        let result = self.auth.sign_in_with_password(email, password).await;
        self.ui.loading = false;

        match result {
            Ok(session) => {
                info!(context = %self.context, user_id = %session.user.id, "signed in");
                self.transition(AuthMachineInput::SignInSucceeded);
                self.ui.email = session.user.email.clone();
                self.state.last_access_token = Some(session.access_token().to_string());
                self.publish(session.token(), "signed_in").await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "sign-in failed");
                self.transition(AuthMachineInput::SignInFailed);
                if self.auth.get_session().await.is_some() {
                    self.transition(AuthMachineInput::SessionRestored);
                }
                if e.is_user_visible() {
                    self.ui.error = Some(e.user_message());
                }
                Err(e.into())
            }
        }
    }

    /// Local sign-out. A failed server revoke does not stop the local
    /// session from being dropped or the null snapshot from going out.
    pub async fn sign_out(&mut self) {
        self.ui.loading = true;
        self.ui.error = None;
        self.transition(AuthMachineInput::SignOutRequested);

        if let Err(e) = self.auth.sign_out_local().await {
            warn!(error = %e, "server sign-out failed, local session cleared anyway");
        }

        self.state.last_access_token = None;
        self.ui.email = None;
        self.ui.loading = false;
        self.transition(AuthMachineInput::SignOutComplete);
        info!(context = %self.context, "signed out");

        self.publish(None, "signed_out").await;
    }

    // ==========================================
    // Internals
    // ==========================================

    /// Apply a snapshot that originated elsewhere to the local client.
    async fn apply_external(&mut self, token: Token, via: &str) {
        let superseded = self.state.superseded_access_token.as_deref();
        if token.is_some() && access_token_of(&token) == superseded {
            self.stats.duplicates_skipped += 1;
            debug!(context = %self.context, via, "snapshot already replaced by a refresh");
            return;
        }
        self.state.applying_external = true;

        let current = self.auth.get_session().await;
        if current.as_ref().map(|s| s.access_token()) == access_token_of(&token) {
            self.state.last_access_token = access_token_of(&token).map(str::to_string);
            self.stats.duplicates_skipped += 1;
            self.state.applying_external = false;
            debug!(context = %self.context, via, "snapshot already current");
            return;
        }

        self.transition(AuthMachineInput::ExternalToken);
        let mut republish = None;
        let mut stale = false;

        match &token {
            Some(pair) => match self.auth.set_session(pair).await {
                Ok(session) => {
                    info!(context = %self.context, via, "adopted external session");
                    self.stats.external_applied += 1;
                    self.state.last_access_token = Some(session.access_token().to_string());
                    self.ui.email = session.user.email.clone();
                    self.ui.error = None;
                    self.transition(AuthMachineInput::ExternalApplied);
                    if session.tokens != *pair {
                        self.state.superseded_access_token = Some(pair.access_token.clone());
                        republish = Some(session.token());
                    }
                }
                Err(e) if e.is_stale_token() => {
                    warn!(context = %self.context, via, error = %e, "stored session rejected, signing out");
                    if current.is_some() {
                        if let Err(e) = self.auth.sign_out_local().await {
                            debug!(error = %e, "revoke failed while dropping rejected session");
                        }
                    }
                    self.state.last_access_token = None;
                    self.ui.email = None;
                    self.transition(AuthMachineInput::ExternalRejected);
                    stale = true;
                }
                Err(e) => {
                    warn!(context = %self.context, via, error = %e, "could not apply external session");
                    let input = if current.is_some() {
                        AuthMachineInput::SessionKept
                    } else {
                        AuthMachineInput::ExternalRejected
                    };
                    self.transition(input);
                }
            },
            None => {
                if let Err(e) = self.auth.sign_out_local().await {
                    debug!(error = %e, "revoke failed during external sign-out");
                }
                info!(context = %self.context, via, "external sign-out applied");
                self.stats.external_applied += 1;
                self.state.last_access_token = None;
                self.ui.email = None;
                self.transition(AuthMachineInput::ExternalCleared);
            }
        }

        self.settle().await;
        self.state.applying_external = false;

        if let Some(refreshed) = republish {
            // set_session had to refresh; the old pair is dead everywhere.
            self.publish(refreshed, "refreshed_on_apply").await;
        }
        if stale {
            self.clear_rejected(&token).await;
        }
    }

    /// Ask the relay to persist and fan out `token`.
    async fn publish(&mut self, token: Token, reason: &str) {
        self.state.writing_storage = true;
        self.state.writing_value = token.clone();

        let request = RelayRequest::Sync(SessionMessage::sync(MIRROR_SOURCE, token));
        match self
            .bus
            .send_to_relay(MessageOrigin::Page(self.context), request)
            .await
        {
            Ok(RelayReply::Synced(ack)) => {
                self.stats.outbound_syncs += 1;
                info!(
                    context = %self.context,
                    reason,
                    tabs = ack.delivered_count(),
                    "session published"
                );
            }
            Ok(RelayReply::Rejected { reason: why }) => {
                self.stats.outbound_syncs += 1;
                warn!(context = %self.context, reason = %why, "relay rejected session update");
            }
            Ok(other) => debug!(?other, "unexpected relay reply"),
            Err(e) => warn!(context = %self.context, error = %e, "relay unreachable, session not published"),
        }

        self.settle().await;
        self.state.writing_storage = false;
        self.state.writing_value = None;
    }

    /// Clear a rejected token from the store, unless the store already
    /// moved on to something else.
    async fn clear_rejected(&mut self, rejected: &Token) {
        match self.tokens.read_token().await {
            Ok(stored) if stored == *rejected => self.publish(None, "stale_token").await,
            Ok(_) => debug!("store no longer holds the rejected token"),
            Err(e) => warn!(error = %e, "could not read store to clear rejected token"),
        }
    }

    /// Let one tick pass, then take everything already queued on the auth
    /// and storage channels. Echoes of the flagged operation are dropped,
    /// anything else is deferred.
    async fn settle(&mut self) {
        tokio::task::yield_now().await;

        loop {
            match self.auth_events.try_recv() {
                Ok(event) => {
                    if self.is_echo(&event.token()) {
                        self.stats.echoes_suppressed += 1;
                    } else {
                        self.deferred.push_back(Deferred::Auth(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth event subscriber lagged");
                }
                Err(_) => break,
            }
        }

        while let Some(change) = self.store_changes.try_recv() {
            if self.is_echo(&change.new) {
                self.stats.echoes_suppressed += 1;
            } else {
                self.deferred.push_back(Deferred::Store(change));
            }
        }
    }

    fn is_echo(&self, token: &Token) -> bool {
        access_token_of(token) == self.state.last_access_token.as_deref()
            || (self.state.writing_storage && *token == self.state.writing_value)
    }

    fn transition(&mut self, input: AuthMachineInput) {
        if self.machine.consume(&input).is_err() {
            debug!(?input, state = ?self.machine.state(), "auth transition not applicable");
        }
        self.ui.auth_state = AuthState::from(self.machine.state());
    }
}
