use super::protocol::WireMessage;
use super::session::{ConnectionSession, ConnectionState, Role};
use super::transport::Transport;
use crate::game::core::{Player, RoundState, TouchOutcome};
use crate::game::engine::{RoundEngine, unix_millis};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The peer went away in the middle of a networked game
    ConnectionLost,
}

enum Side {
    Host(RoundEngine),
    Client(watch::Sender<Option<RoundState>>),
}

/// Keeps both devices showing the same game.
///
/// The host owns the engine and pushes a snapshot after every change; the
/// client only mirrors those snapshots and sends its touches back.
pub struct ReplicationLink<T: Transport> {
    session: ConnectionSession<T>,
    side: Side,
    events: broadcast::Sender<LinkEvent>,
    task: JoinHandle<()>,
}

impl<T: Transport> Drop for ReplicationLink<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<T: Transport> ReplicationLink<T> {
    /// Authoritative side. Remote touches score as player 2.
    pub fn host(engine: RoundEngine, session: ConnectionSession<T>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let channels = Channels::subscribe(&session, events.clone());
        let (current, updates) = engine.subscribe_with_snapshot();
        let task = tokio::spawn(run_host(
            engine.clone(),
            current,
            updates,
            session.clone(),
            channels,
        ));
        Self {
            session,
            side: Side::Host(engine),
            events,
            task,
        }
    }

    /// Display-only side.
    pub fn client(session: ConnectionSession<T>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (mirror, _) = watch::channel(None);
        let channels = Channels::subscribe(&session, events.clone());
        let task = tokio::spawn(run_client(mirror.clone(), channels));
        Self {
            session,
            side: Side::Client(mirror),
            events,
            task,
        }
    }

    pub fn role(&self) -> Role {
        match self.side {
            Side::Host(_) => Role::Host,
            Side::Client(_) => Role::Client,
        }
    }

    pub fn session(&self) -> &ConnectionSession<T> {
        &self.session
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// What this device should show right now.
    pub fn display_state(&self) -> Option<RoundState> {
        match &self.side {
            Side::Host(engine) => Some(engine.snapshot()),
            Side::Client(mirror) => mirror.borrow().clone(),
        }
    }

    /// Mirrored snapshots on the client. On the host this never changes.
    pub fn subscribe_mirror(&self) -> watch::Receiver<Option<RoundState>> {
        match &self.side {
            Side::Host(_) => watch::channel(None).1,
            Side::Client(mirror) => mirror.subscribe(),
        }
    }

    /// A touch on this device.
    ///
    /// The host only plays player 1 locally. The client's touch is always
    /// player 2 and is judged by the host, so the local result is unknown.
    pub fn touch(&self, player: Player) -> Option<TouchOutcome> {
        match &self.side {
            Side::Host(engine) => {
                if player != Player::One {
                    debug!(?player, "Host only touches as player 1");
                    return None;
                }
                Some(engine.process_touch(Player::One))
            }
            Side::Client(_) => {
                let sent = self.session.send(WireMessage::TouchEvent {
                    timestamp: unix_millis(),
                });
                if !sent {
                    debug!("Touch not sent, no link");
                }
                None
            }
        }
    }
}

/// Session feeds, subscribed before the link task starts so nothing is missed
struct Channels {
    inbound: broadcast::Receiver<WireMessage>,
    states: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<LinkEvent>,
    was_connected: bool,
}

impl Channels {
    fn subscribe<T: Transport>(
        session: &ConnectionSession<T>,
        events: broadcast::Sender<LinkEvent>,
    ) -> Self {
        Self {
            inbound: session.subscribe_messages(),
            states: session.subscribe_state(),
            events,
            was_connected: session.state() == ConnectionState::Connected,
        }
    }

    /// Current connection state, raising `ConnectionLost` on the Connected -> Idle edge.
    fn observe(&mut self) -> ConnectionState {
        let state = *self.states.borrow_and_update();
        match state {
            ConnectionState::Connected => self.was_connected = true,
            ConnectionState::Idle if self.was_connected => {
                self.was_connected = false;
                warn!("Connection lost");
                let _ = self.events.send(LinkEvent::ConnectionLost);
            }
            _ => {}
        }
        state
    }
}

/// `latest` is the newest state this task has seen. Every update after it
/// is still queued in `updates`, so sending `latest` and then the queue keeps
/// the peer in mutation order.
async fn run_host<T: Transport>(
    engine: RoundEngine,
    mut latest: RoundState,
    mut updates: broadcast::Receiver<RoundState>,
    session: ConnectionSession<T>,
    mut channels: Channels,
) {
    let mut connected = channels.observe() == ConnectionState::Connected;
    if connected {
        session.send(WireMessage::StateSnapshot {
            state: latest.clone(),
        });
    }

    loop {
        tokio::select! {
            changed = channels.states.changed() => {
                if changed.is_err() {
                    break;
                }
                let now_connected = channels.observe() == ConnectionState::Connected;
                if now_connected && !connected {
                    info!("Peer joined, sending current state");
                    catch_up(&mut updates, &mut latest);
                    session.send(WireMessage::StateSnapshot { state: latest.clone() });
                }
                connected = now_connected;
            }
            update = updates.recv() => {
                match update {
                    Ok(state) => latest = state,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Replication fell behind, skipping to the newest state");
                        catch_up(&mut updates, &mut latest);
                    }
                    Err(RecvError::Closed) => break,
                }
                if connected {
                    session.send(WireMessage::StateSnapshot { state: latest.clone() });
                }
            }
            message = channels.inbound.recv() => {
                match message {
                    Ok(WireMessage::TouchEvent { timestamp }) => {
                        let outcome = engine.process_touch(Player::Two);
                        debug!(timestamp, ?outcome, "Remote touch");
                    }
                    Ok(WireMessage::StateSnapshot { .. }) => {
                        warn!("Host received a snapshot, ignoring");
                    }
                    Ok(other) => debug!(message = ?other, "Reserved message, ignoring"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped inbound messages"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Fold every queued update into `latest`, leaving the queue empty.
fn catch_up(updates: &mut broadcast::Receiver<RoundState>, latest: &mut RoundState) {
    loop {
        match updates.try_recv() {
            Ok(state) => *latest = state,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

async fn run_client(mirror: watch::Sender<Option<RoundState>>, mut channels: Channels) {
    channels.observe();

    loop {
        tokio::select! {
            changed = channels.states.changed() => {
                if changed.is_err() {
                    break;
                }
                channels.observe();
            }
            message = channels.inbound.recv() => {
                match message {
                    Ok(WireMessage::StateSnapshot { state }) => {
                        mirror.send_replace(Some(state));
                    }
                    Ok(other) => debug!(message = ?other, "Client ignores message"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped inbound snapshots"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}
