//! The sync session: one actor per hosted document.
//!
//! The actor owns the advertiser, the browser, the transport and the peer
//! set. Host commands, network events and its own deferred work all arrive
//! on channels and are handled one at a time, so no state is shared.
//!
//! ## Generations
//!
//! Every start, stop and hosting update bumps a generation counter. Work
//! that finishes later (a retry timer, an invitation) carries the
//! generation it was issued under and is dropped if that is no longer
//! current.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pagesync_core::{
    DiscoveryPayload, PeerHandle, PeerId, ServiceDescriptor, ServiceIdentity, StateMessage,
    Timestamp,
};
use pagesync_net::{
    ConnectionState, DiscoveryEvent, EventReceiver, LanConfig, LanNode, NetEvent, NetworkParts,
    Result as NetResult,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::advertiser::DiscoveryAdvertiser;
use crate::browser::{DiscoveryBrowser, Invitation};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::host::{HostEvent, HostEvents, HostSender, StateSource};
use crate::reconcile::{decide, Decision};
use crate::transport::{PeerChange, SessionTransport};

#[derive(Debug)]
enum Command {
    StartSyncing,
    StopSyncing,
    Send(i64),
    DisconnectFromPeers,
    UpdateHosting(u32),
    Shutdown,
}

/// The host's handle on a running session.
///
/// Every method returns at once; results show up later as
/// [`HostEvent`]s. Calls on a session that has shut down are ignored.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    running: Arc<AtomicBool>,
}

impl SyncHandle {
    /// Advertise and browse. Deferred while the host has no current value.
    /// Calling it again retries anything that gave up.
    pub fn start_syncing(&self) {
        self.command(Command::StartSyncing);
    }

    /// Stop advertising and browsing and drop every peer.
    pub fn stop_syncing(&self) {
        self.command(Command::StopSyncing);
    }

    /// Share a new local value with every connected peer.
    pub fn send(&self, value: i64) {
        self.command(Command::Send(value));
    }

    /// Drop every peer. Discovery carries on.
    pub fn disconnect_from_peers(&self) {
        self.command(Command::DisconnectFromPeers);
    }

    /// A different document is being hosted: drop every peer, then
    /// advertise and browse with the new page count. Starts syncing if the
    /// session was idle.
    pub fn update_hosting(&self, page_count: u32) {
        self.command(Command::UpdateHosting(page_count));
    }

    /// Stop everything and end the session.
    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("session has shut down, command dropped");
        }
    }
}

/// Builds and spawns a sync session.
///
/// # Example
///
/// ```rust,ignore
/// let state = SharedState::with_value(0);
/// let (handle, mut events) = SessionBuilder::new(
///     ServiceIdentity::from_app_id("com.atomicbird.stumpslides"),
///     state.clone(),
/// )
/// .config(SyncConfig { page_count: 24, ..Default::default() })
/// .spawn_lan(LanConfig::default())
/// .await?;
///
/// handle.start_syncing();
/// while let Some(event) = events.recv().await {
///     if let HostEvent::PeerStateReceived(page) = event {
///         state.set(page);
///     }
/// }
/// ```
pub struct SessionBuilder {
    identity: ServiceIdentity,
    state: Arc<dyn StateSource>,
    config: SyncConfig,
    origin_start_time: Option<Timestamp>,
}

impl SessionBuilder {
    pub fn new(identity: ServiceIdentity, state: impl StateSource + 'static) -> Self {
        Self {
            identity,
            state: Arc::new(state),
            config: SyncConfig::default(),
            origin_start_time: None,
        }
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// When this logical session began. Defaults to now.
    pub fn origin_start_time(mut self, at: Timestamp) -> Self {
        self.origin_start_time = Some(at);
        self
    }

    /// Spawn the session on `parts`. Must be called within a Tokio runtime.
    ///
    /// Fails only on invalid identity or configuration.
    pub fn try_spawn(self, parts: NetworkParts) -> Result<(SyncHandle, HostEvents)> {
        let descriptor = self.identity.descriptor()?;
        self.config.validate()?;

        let origin_start_time = self.origin_start_time.unwrap_or_else(Timestamp::now);
        let initial = self.state.current_state_value().unwrap_or(0);
        let payload = DiscoveryPayload::for_page_count(self.config.page_count);

        let (command_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (host, host_events) = HostEvents::channel();
        let running = Arc::new(AtomicBool::new(true));

        let NetworkParts {
            advertiser,
            browser,
            transport,
            events,
        } = parts;
        let transport = SessionTransport::new(transport);

        info!(
            descriptor = %descriptor,
            peer = %transport.local_peer(),
            origin = %origin_start_time,
            page_count = self.config.page_count,
            "session created"
        );

        let actor = SessionActor {
            descriptor,
            payload,
            page_count: self.config.page_count,
            origin_start_time,
            last_sent: StateMessage::state_change(initial, origin_start_time),
            generation: 0,
            phase: Phase::Idle,
            pending_start: false,
            advertise_failures: 0,
            browse_failures: 0,
            advertiser: DiscoveryAdvertiser::new(advertiser),
            browser: DiscoveryBrowser::new(browser, self.config.invite_timeout),
            transport,
            state: self.state,
            retry_delay: self.config.retry_delay,
            host,
            commands,
            net_events: events,
            completions_tx,
            completions,
            running: Arc::clone(&running),
        };
        tokio::spawn(actor.run());

        let handle = SyncHandle {
            commands: command_tx,
            running,
        };
        Ok((handle, host_events))
    }

    /// Like [`try_spawn`](Self::try_spawn), but an invalid identity or
    /// configuration panics. The app cannot sync correctly with one.
    pub fn spawn(self, parts: NetworkParts) -> (SyncHandle, HostEvents) {
        match self.try_spawn(parts) {
            Ok(session) => session,
            Err(e) => panic!("pagesync cannot start: {}", e),
        }
    }

    /// Bind a [`LanNode`] named after `peer_name` (or the device) and spawn
    /// the session on it.
    pub async fn spawn_lan(self, lan: LanConfig) -> Result<(SyncHandle, HostEvents)> {
        self.identity.descriptor()?;
        self.config.validate()?;

        let name = match &self.config.peer_name {
            Some(name) => PeerId::new(name.as_str()),
            None => PeerId::from_device(),
        };
        let parts = LanNode::bind(name, lan).await?;
        self.try_spawn(parts)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Syncing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Advertise,
    Browse,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Advertise => write!(f, "Advertising"),
            Step::Browse => write!(f, "Browsing"),
        }
    }
}

enum Completion {
    Retry {
        generation: u64,
        step: Step,
    },
    Invite {
        generation: u64,
        invitation: Invitation,
        result: NetResult<()>,
    },
}

struct SessionActor {
    descriptor: ServiceDescriptor,
    payload: DiscoveryPayload,
    page_count: u32,
    origin_start_time: Timestamp,
    /// Last value sent or adopted. Sends of the same value are skipped.
    last_sent: StateMessage,
    generation: u64,
    phase: Phase,
    /// Start requested before the host had a value.
    pending_start: bool,
    advertise_failures: u8,
    browse_failures: u8,

    advertiser: DiscoveryAdvertiser,
    browser: DiscoveryBrowser,
    transport: SessionTransport,
    state: Arc<dyn StateSource>,
    retry_delay: Duration,

    host: HostSender,
    commands: mpsc::UnboundedReceiver<Command>,
    net_events: EventReceiver,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    running: Arc<AtomicBool>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.on_command(command).await,
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                }
                Some(event) = self.net_events.recv() => self.on_net_event(event).await,
                Some(done) = self.completions.recv() => self.on_completion(done).await,
            }
        }

        self.stop_syncing().await;
        self.running.store(false, Ordering::SeqCst);
        info!("session shut down");
    }

    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::StartSyncing => self.start_syncing().await,
            Command::StopSyncing => self.stop_syncing().await,
            Command::Send(value) => self.send(value).await,
            Command::DisconnectFromPeers => self.disconnect_from_peers().await,
            Command::UpdateHosting(page_count) => self.update_hosting(page_count).await,
            Command::Shutdown => return false,
        }
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    async fn start_syncing(&mut self) {
        if self.state.current_state_value().is_none() {
            if !self.pending_start {
                self.status("Waiting for a page before syncing");
            }
            self.pending_start = true;
            debug!("start deferred");
            return;
        }

        self.pending_start = false;
        self.generation += 1;
        self.phase = Phase::Syncing;
        self.advertise_failures = 0;
        self.browse_failures = 0;
        info!(
            generation = self.generation,
            descriptor = %self.descriptor,
            "start syncing"
        );

        self.start_step(Step::Advertise).await;
        self.start_step(Step::Browse).await;
    }

    async fn stop_syncing(&mut self) {
        self.generation += 1;
        self.phase = Phase::Idle;
        self.pending_start = false;

        self.advertiser.stop().await;
        self.browser.stop().await;
        self.disconnect_from_peers().await;
        debug!(generation = self.generation, "stopped syncing");
    }

    async fn update_hosting(&mut self, page_count: u32) {
        if page_count == 0 {
            warn!("ignoring hosting update with no pages");
            return;
        }

        self.generation += 1;
        self.page_count = page_count;
        self.payload = DiscoveryPayload::for_page_count(page_count);

        self.advertiser.stop().await;
        self.browser.stop().await;
        self.disconnect_from_peers().await;
        info!(generation = self.generation, page_count, "hosting updated");

        self.start_syncing().await;
    }

    async fn disconnect_from_peers(&mut self) {
        if self.transport.disconnect_all().await {
            self.peers_changed();
        }
    }

    /// Start advertising or browsing. The first failure is retried once;
    /// the second is reported and left alone until the host restarts.
    async fn start_step(&mut self, step: Step) {
        let result = match step {
            Step::Advertise => self.advertiser.start(&self.descriptor, &self.payload).await,
            Step::Browse => self.browser.start(&self.descriptor, &self.payload).await,
        };
        let failures = match step {
            Step::Advertise => &mut self.advertise_failures,
            Step::Browse => &mut self.browse_failures,
        };

        let error = match result {
            Ok(()) => {
                *failures = 0;
                return;
            }
            Err(e) => e,
        };
        *failures = failures.saturating_add(1);

        if *failures == 1 {
            warn!(%step, error = %error, generation = self.generation, "start failed, retrying");
            self.schedule_retry(step);
        } else {
            warn!(%step, error = %error, "start failed again, giving up");
            self.status(format!("{} unavailable: {}", step, error));
        }
    }

    fn schedule_retry(&self, step: Step) {
        let retry = Completion::Retry {
            generation: self.generation,
            step,
        };
        if self.retry_delay.is_zero() {
            let _ = self.completions_tx.send(retry);
            return;
        }

        let tx = self.completions_tx.clone();
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(retry);
        });
    }

    async fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Retry { generation, step } => {
                if generation != self.generation || self.phase != Phase::Syncing {
                    debug!(%step, generation, current = self.generation, "stale retry dropped");
                    return;
                }
                self.start_step(step).await;
            }
            Completion::Invite {
                generation,
                invitation,
                result,
            } => {
                let peer = &invitation.peer.name;
                if generation != self.generation {
                    debug!(peer = %peer, generation, "stale invitation result dropped");
                    return;
                }
                match result {
                    Ok(()) => debug!(peer = %peer, "invitation delivered"),
                    Err(e) => warn!(peer = %peer, error = %e, "invitation failed"),
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Network events
    // ─────────────────────────────────────────────────────────────────────────

    async fn on_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Connection {
                peer,
                state: ConnectionState::Connected,
            } if self.phase == Phase::Idle => {
                // An invitation from before the last stop completed late.
                warn!(peer = %peer, "link established while idle, dropping it");
                self.disconnect_from_peers().await;
            }
            NetEvent::Connection { peer, state } => {
                match self.transport.on_state_change(peer, state) {
                    PeerChange::Added(peer) => {
                        self.peers_changed();
                        self.send_connection_sync(&peer).await;
                    }
                    PeerChange::Removed(_) => self.peers_changed(),
                    PeerChange::Unchanged => {}
                }
            }
            NetEvent::Data { from, bytes } => {
                if let Some(message) = self.transport.on_receive(&bytes, &from) {
                    self.reconcile(message, &from);
                }
            }
            NetEvent::Discovery(DiscoveryEvent::PeerFound { peer, payload }) => {
                if self.phase != Phase::Syncing {
                    return;
                }
                if let Some(invitation) = self.browser.on_peer_found(peer, &payload) {
                    self.dispatch_invitation(invitation);
                }
            }
            NetEvent::Discovery(DiscoveryEvent::PeerLost(peer)) => {
                if self.browser.is_browsing() {
                    let text = self.browser.on_peer_lost(&peer);
                    self.status(text);
                }
            }
        }
    }

    fn dispatch_invitation(&self, invitation: Invitation) {
        debug!(peer = %invitation.peer.name, generation = self.generation, "inviting");
        let generation = self.generation;
        let tx = self.completions_tx.clone();
        let invite = self.browser.invite(invitation);
        tokio::spawn(async move {
            let (invitation, result) = invite.await;
            let _ = tx.send(Completion::Invite {
                generation,
                invitation,
                result,
            });
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────

    /// Tell every connected peer where we are, so the group converges on
    /// the earliest session's value.
    async fn send_connection_sync(&self, joined: &PeerHandle) {
        let value = self
            .state
            .current_state_value()
            .unwrap_or(self.last_sent.value);
        let message = StateMessage::connection_sync(value, self.origin_start_time);

        let outcome = self.transport.broadcast(&message).await;
        debug!(peer = %joined, value, ?outcome, "connection sync");
    }

    fn reconcile(&mut self, message: StateMessage, from: &PeerHandle) {
        match decide(&message, self.origin_start_time, self.page_count) {
            Decision::Adopt(value) => {
                info!(peer = %from, value, kind = ?message.kind, "adopting peer value");
                self.last_sent.value = value;
                self.emit(HostEvent::PeerStateReceived(value));
            }
            Decision::Ignore(reason) => {
                debug!(peer = %from, value = message.value, ?reason, "peer value ignored");
            }
        }
    }

    async fn send(&mut self, value: i64) {
        if self.pending_start {
            self.start_syncing().await;
        }
        if value == self.last_sent.value {
            debug!(value, "value unchanged, not sent");
            return;
        }

        self.last_sent = StateMessage::state_change(value, self.origin_start_time);
        self.transport.broadcast(&self.last_sent).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Host notifications
    // ─────────────────────────────────────────────────────────────────────────

    fn peers_changed(&self) {
        self.emit(HostEvent::PeerSetChanged(self.transport.peers().clone()));
    }

    fn status(&self, text: impl Into<String>) {
        let text = text.into();
        info!(status = %text, "status");
        self.emit(HostEvent::StatusMessage(text));
    }

    fn emit(&self, event: HostEvent) {
        // The host may have stopped listening; the session carries on.
        let _ = self.host.send(event);
    }
}
