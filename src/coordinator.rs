//! Coordinator
//!
//! Owns every piece of shared mutable state: the credential registry, the
//! open connections and (in centralized mode) the distribution session.
//! [`Coordinator`] is a plain synchronous state machine; [`Coordinator::spawn`]
//! moves it into a task that applies commands one at a time, so transports
//! and the owner talk to it through a cloneable [`CoordinatorHandle`].
//!
//! Outbound traffic is pushed to each connection's [`Outbox`]. The transport
//! drains it and closes the socket on [`Outbound::Close`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::domain::{ConnectionState, PeerId, Role, SplitConfig};
use crate::error::{CoordinatorError, ProtocolError, RecoveryError, RegistryError, ShareError};
use crate::protocol::{ClientMessage, Negotiation, ServerMessage};
use crate::recovery::{RecoveryTicket, Submission};
use crate::registry::{AccessToken, CredentialRegistry, Roster};
use crate::session::Session;
use crate::sharing::{Secret, Share, SplitId};
use crate::signaling::{NegotiationPolicy, SignalingRelay};

pub type ConnectionId = u64;

/// Instruction for a connection's transport
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close,
}

pub type Outbox = mpsc::UnboundedSender<Outbound>;

#[derive(Debug)]
struct Connection {
    state: ConnectionState,
    peer: Option<(PeerId, Role)>,
    outbox: Outbox,
}

impl Connection {
    fn send(&self, msg: ServerMessage) {
        if self.outbox.send(Outbound::Message(msg)).is_err() {
            debug!("outbox closed, message dropped");
        }
    }

    fn close(&self) {
        if self.outbox.send(Outbound::Close).is_err() {
            debug!("outbox closed, close dropped");
        }
    }

    /// The peer behind this connection, once it proved who it is
    fn identity(&self) -> Option<(&PeerId, Role)> {
        match self.state {
            ConnectionState::Registered | ConnectionState::Authenticated => {
                self.peer.as_ref().map(|(id, role)| (id, *role))
            }
            ConnectionState::Registering | ConnectionState::Disconnected => None,
        }
    }
}

/// Point-in-time view of the coordinator, for operators and tests
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoordinatorStatus {
    /// Peers with an identified connection, sorted
    pub registered: Vec<PeerId>,
    /// Trustees that hold their share over an open connection, sorted
    pub authenticated: Vec<PeerId>,
    pub secret_id: Option<SplitId>,
    pub recovered: bool,
}

pub struct Coordinator {
    registry: CredentialRegistry,
    relay: SignalingRelay,
    connections: HashMap<ConnectionId, Connection>,
    by_peer: HashMap<PeerId, ConnectionId>,
    session: Option<Session>,
}

impl Coordinator {
    pub fn new(roster: Roster, policy: NegotiationPolicy) -> Self {
        Self {
            registry: CredentialRegistry::new(roster),
            relay: SignalingRelay::new(policy),
            connections: HashMap::new(),
            by_peer: HashMap::new(),
            session: None,
        }
    }

    /// Tracks a freshly opened connection in the `Registering` state
    pub fn connect(&mut self, conn: ConnectionId, outbox: Outbox) {
        self.connections.insert(
            conn,
            Connection {
                state: ConnectionState::Registering,
                peer: None,
                outbox,
            },
        );
        debug!(conn, "connection opened");
    }

    #[must_use]
    pub fn state_of(&self, conn: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&conn).map(|c| c.state)
    }

    /// Handles one inbound text frame
    ///
    /// Failures are answered with an `error` message to the sender only.
    /// Rejected credentials also close the connection.
    pub fn handle_text(&mut self, conn: ConnectionId, text: &str) {
        match self.state_of(conn) {
            None => return,
            Some(ConnectionState::Disconnected) => {
                debug!(conn, "message on closing connection ignored");
                return;
            }
            Some(_) => {}
        }

        let result = ClientMessage::parse(text).and_then(|msg| self.handle(conn, msg));
        if let Err(error) = result {
            self.reject(conn, &error);
        }
    }

    /// Applies one parsed message from `conn`
    ///
    /// # Errors
    /// Whatever the sender should be told about
    pub fn handle(&mut self, conn: ConnectionId, msg: ClientMessage) -> Result<(), ProtocolError> {
        let kind = msg.kind();
        match msg {
            ClientMessage::Register { id, key } => {
                let key = Zeroizing::new(key);
                self.register(conn, &id, &key)
            }
            ClientMessage::Authenticate { name, token } => {
                let token = Zeroizing::new(token);
                self.authenticate(conn, &name, &token)
            }
            ClientMessage::Offer { target_id, payload } => {
                self.negotiate(conn, kind, Negotiation::Offer, &target_id, payload)
            }
            ClientMessage::Answer { target_id, payload } => {
                self.negotiate(conn, kind, Negotiation::Answer, &target_id, payload)
            }
            ClientMessage::Candidate { target_id, payload } => {
                self.negotiate(conn, kind, Negotiation::Candidate, &target_id, payload)
            }
            ClientMessage::SubmitShare { share } => self.submit_share(conn, &share),
        }
    }

    /// Forgets `conn` and frees the id it held
    pub fn disconnect(&mut self, conn: ConnectionId) {
        let Some(connection) = self.connections.remove(&conn) else {
            return;
        };
        let Some((peer, role)) = connection.peer else {
            debug!(conn, "connection closed");
            return;
        };

        if self.by_peer.get(&peer) == Some(&conn) {
            self.by_peer.remove(&peer);
            self.registry.release(&peer);
        }
        info!(peer = %peer, ?role, "peer disconnected");
        if connection.state == ConnectionState::Authenticated {
            if let Some(session) = self.session.as_ref() {
                session.withdraw(&peer);
            }
        }
        self.broadcast_peer_lists();
    }

    /// Splits `secret` for `trustees` and issues one access token each
    ///
    /// Replaces any previous session and revokes its unused tokens.
    ///
    /// # Errors
    /// [`ShareError::InvalidParameters`] if a trustee is not on the roster or
    /// the trustee list does not match the split
    pub fn open_session(
        &mut self,
        secret: &Secret,
        config: SplitConfig,
        trustees: &[PeerId],
    ) -> Result<Vec<(PeerId, AccessToken)>, ShareError> {
        if let Some(stranger) = trustees
            .iter()
            .find(|t| self.registry.roster().role_of(t) != Some(Role::Trustee))
        {
            return Err(ShareError::InvalidParameters(format!(
                "{stranger} is not a trustee on the roster"
            )));
        }

        let session = Session::create(secret, config, trustees)?;
        if self.session.replace(session).is_some() {
            warn!("previous session replaced");
        }
        self.registry.revoke_tokens();
        let tokens = trustees
            .iter()
            .map(|trustee| (trustee.clone(), self.registry.issue_token(trustee)))
            .collect();
        Ok(tokens)
    }

    /// Asks every authenticated trustee for its share
    ///
    /// Nothing is sent when the request cannot start.
    ///
    /// # Errors
    /// [`RecoveryError::NoSession`], [`RecoveryError::AlreadyRecovered`] or
    /// [`RecoveryError::InsufficientConnectedTrustees`]
    pub fn request_shares(&self) -> Result<RecoveryTicket, RecoveryError> {
        let session = self.session.as_ref().ok_or(RecoveryError::NoSession)?;
        let mut reachable: Vec<&PeerId> = self
            .connections
            .values()
            .filter(|c| c.state == ConnectionState::Authenticated)
            .filter_map(|c| c.peer.as_ref().map(|(id, _)| id))
            .collect();
        reachable.sort();

        let ticket = session.request_shares(reachable)?;
        for peer in ticket.participants() {
            if let Some(connection) = self.connection_of(peer) {
                connection.send(ServerMessage::RequestShare);
            }
        }
        info!(
            participants = ticket.participants().len(),
            "shares requested"
        );
        Ok(ticket)
    }

    #[must_use]
    pub fn status(&self) -> CoordinatorStatus {
        let mut registered = Vec::new();
        let mut authenticated = Vec::new();
        for connection in self.connections.values() {
            if let Some((peer, _)) = connection.identity() {
                registered.push(peer.clone());
                if connection.state == ConnectionState::Authenticated {
                    authenticated.push(peer.clone());
                }
            }
        }
        registered.sort();
        authenticated.sort();

        CoordinatorStatus {
            registered,
            authenticated,
            secret_id: self.session.as_ref().map(Session::secret_id),
            recovered: self.session.as_ref().is_some_and(Session::is_recovered),
        }
    }

    fn register(&mut self, conn: ConnectionId, id: &str, key: &str) -> Result<(), ProtocolError> {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return Ok(());
        };
        if connection.state != ConnectionState::Registering {
            return Err(ProtocolError::Unexpected(
                "Connection is already registered".into(),
            ));
        }

        let (peer, role) = self.registry.register(id, key)?;
        info!(peer = %peer, ?role, "peer registered");
        connection.state = ConnectionState::Registered;
        connection.peer = Some((peer.clone(), role));
        connection.send(ServerMessage::RegisterSuccess { id: peer.clone() });
        self.by_peer.insert(peer, conn);
        self.broadcast_peer_lists();
        Ok(())
    }

    fn authenticate(
        &mut self,
        conn: ConnectionId,
        name: &str,
        token: &str,
    ) -> Result<(), ProtocolError> {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return Ok(());
        };
        let session = self.session.as_ref().ok_or(RecoveryError::NoSession)?;
        let claimed = PeerId::from(name);

        let newly_identified = match (connection.state, &connection.peer) {
            (ConnectionState::Registering, _) => {
                if self.registry.is_connected(&claimed) {
                    return Err(RegistryError::AlreadyRegistered(claimed.to_string()).into());
                }
                true
            }
            (ConnectionState::Registered, Some((id, Role::Trustee))) if *id == claimed => false,
            (ConnectionState::Authenticated, _) => {
                return Err(ProtocolError::Unexpected(
                    "Connection is already authenticated".into(),
                ));
            }
            _ => {
                return Err(ProtocolError::Unexpected(format!(
                    "Cannot authenticate as {claimed} on this connection"
                )));
            }
        };

        let peer = self.registry.consume_token(name, token)?;
        let share = session
            .share_for(&peer)
            .ok_or(RegistryError::InvalidToken)?;
        if newly_identified {
            self.registry.claim(&peer)?;
        }

        connection.state = ConnectionState::Authenticated;
        connection.peer = Some((peer.clone(), Role::Trustee));
        connection.send(ServerMessage::ReceiveShare {
            share: share.encode(),
            index: *share.index(),
        });
        info!(peer = %peer, index = *share.index(), "share delivered");

        if newly_identified {
            self.by_peer.insert(peer, conn);
            self.broadcast_peer_lists();
        }
        Ok(())
    }

    fn negotiate(
        &self,
        conn: ConnectionId,
        kind: &'static str,
        step: Negotiation,
        target: &PeerId,
        payload: Value,
    ) -> Result<(), ProtocolError> {
        let (from, from_role) = self
            .connections
            .get(&conn)
            .and_then(Connection::identity)
            .ok_or(ProtocolError::NotRegistered(kind))?;
        let recipient = self
            .connection_of(target)
            .and_then(|c| c.identity().map(|(_, role)| (c, role)));

        match self.relay.route(
            from,
            from_role,
            target,
            recipient.map(|(_, role)| role),
            step,
            payload,
        ) {
            Ok(msg) => {
                if let Some((connection, _)) = recipient {
                    connection.send(msg);
                }
                debug!(from = %from, target = %target, kind, "negotiation forwarded");
            }
            Err(error) => warn!(%error, kind, "negotiation dropped"),
        }
        Ok(())
    }

    fn submit_share(&mut self, conn: ConnectionId, encoded: &str) -> Result<(), ProtocolError> {
        let peer = match self.connections.get(&conn) {
            Some(Connection {
                state: ConnectionState::Authenticated,
                peer: Some((peer, _)),
                ..
            }) => peer.clone(),
            Some(_) => {
                return Err(ProtocolError::Unexpected(
                    "Only authenticated trustees may submit shares".into(),
                ));
            }
            None => return Ok(()),
        };
        let session = self.session.as_ref().ok_or(RecoveryError::NoSession)?;
        let share = Share::decode(encoded)?;

        match session.submit_share(&peer, share) {
            Submission::Recovered { participants } => self.finish_recovery(&participants),
            outcome => debug!(peer = %peer, ?outcome, "share submitted"),
        }
        Ok(())
    }

    fn finish_recovery(&mut self, participants: &[PeerId]) {
        for peer in participants {
            if let Some(connection) = self.connection_of(peer) {
                connection.send(ServerMessage::RecoveryComplete);
                connection.close();
            }
        }
        if let Some(session) = self.session.as_mut() {
            session.retire();
        }
        self.registry.revoke_tokens();
        info!(participants = participants.len(), "recovery complete");
    }

    fn reject(&mut self, conn: ConnectionId, error: &ProtocolError) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };
        warn!(conn, %error, "message rejected");
        connection.send(ServerMessage::error(error));
        if error.closes_connection() {
            connection.state = ConnectionState::Disconnected;
            connection.close();
        }
    }

    fn connection_of(&self, peer: &PeerId) -> Option<&Connection> {
        self.by_peer
            .get(peer)
            .and_then(|conn| self.connections.get(conn))
    }

    /// Peers `viewer` may negotiate with, which is exactly what it may see
    fn visible_peers(&self, viewer: &PeerId, role: Role) -> Vec<PeerId> {
        let policy = self.relay.policy();
        let mut peers: Vec<PeerId> = self
            .connections
            .values()
            .filter_map(Connection::identity)
            .filter(|(id, other)| *id != viewer && policy.permits(role, *other))
            .map(|(id, _)| id.clone())
            .collect();
        peers.sort();
        peers
    }

    fn broadcast_peer_lists(&self) {
        for connection in self.connections.values() {
            if let Some((viewer, role)) = connection.identity() {
                connection.send(ServerMessage::PeerList {
                    peers: self.visible_peers(viewer, role),
                });
            }
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Connect { conn, outbox } => self.connect(conn, outbox),
            Command::Inbound { conn, text } => self.handle_text(conn, &text),
            Command::Disconnect { conn } => self.disconnect(conn),
            Command::OpenSession {
                secret,
                config,
                trustees,
                reply,
            } => {
                let _ = reply.send(self.open_session(&secret, config, &trustees));
            }
            Command::RequestShares { reply } => {
                let _ = reply.send(self.request_shares());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Moves the coordinator into its own task
    ///
    /// The task ends once every handle is dropped.
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (commands, mut inbox) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut coordinator = self;
            while let Some(command) = inbox.recv().await {
                coordinator.apply(command);
            }
            debug!("coordinator stopped");
        });
        let handle = CoordinatorHandle {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (handle, task)
    }
}

enum Command {
    Connect {
        conn: ConnectionId,
        outbox: Outbox,
    },
    Inbound {
        conn: ConnectionId,
        text: String,
    },
    Disconnect {
        conn: ConnectionId,
    },
    OpenSession {
        secret: Secret,
        config: SplitConfig,
        trustees: Vec<PeerId>,
        reply: oneshot::Sender<Result<Vec<(PeerId, AccessToken)>, ShareError>>,
    },
    RequestShares {
        reply: oneshot::Sender<Result<RecoveryTicket, RecoveryError>>,
    },
    Status {
        reply: oneshot::Sender<CoordinatorStatus>,
    },
}

/// Cloneable entry point to a spawned [`Coordinator`]
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl CoordinatorHandle {
    fn dispatch(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("coordinator stopped, command dropped");
        }
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CoordinatorError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| CoordinatorError::Closed)?;
        outcome.await.map_err(|_| CoordinatorError::Closed)
    }

    /// Registers a new connection and returns its id
    pub fn connect(&self, outbox: Outbox) -> ConnectionId {
        let conn = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.dispatch(Command::Connect { conn, outbox });
        conn
    }

    pub fn inbound(&self, conn: ConnectionId, text: String) {
        self.dispatch(Command::Inbound { conn, text });
    }

    pub fn disconnect(&self, conn: ConnectionId) {
        self.dispatch(Command::Disconnect { conn });
    }

    /// See [`Coordinator::open_session`]
    ///
    /// # Errors
    /// Split failures, or [`CoordinatorError::Closed`]
    pub async fn open_session(
        &self,
        secret: Secret,
        config: SplitConfig,
        trustees: Vec<PeerId>,
    ) -> Result<Vec<(PeerId, AccessToken)>, CoordinatorError> {
        let tokens = self
            .call(|reply| Command::OpenSession {
                secret,
                config,
                trustees,
                reply,
            })
            .await??;
        Ok(tokens)
    }

    /// See [`Coordinator::request_shares`]
    ///
    /// # Errors
    /// Recovery preconditions, or [`CoordinatorError::Closed`]
    pub async fn request_shares(&self) -> Result<RecoveryTicket, CoordinatorError> {
        let ticket = self
            .call(|reply| Command::RequestShares { reply })
            .await??;
        Ok(ticket)
    }

    /// # Errors
    /// [`CoordinatorError::Closed`]
    pub async fn status(&self) -> Result<CoordinatorStatus, CoordinatorError> {
        self.call(|reply| Command::Status { reply }).await
    }
}
