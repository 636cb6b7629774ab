//! Mediated mode end to end: negotiation through the coordinator, then
//! distribution and recovery over in-memory direct channels

use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use sharekeeper::coordinator::{Coordinator, CoordinatorHandle, ConnectionId, Outbound};
use sharekeeper::domain::{PeerId, Threshold};
use sharekeeper::mesh::{OwnerDesk, TrusteeVault, VaultEvent};
use sharekeeper::protocol::{DirectMessage, ServerMessage};
use sharekeeper::recovery::Submission;
use sharekeeper::registry::{PreSharedKey, Roster};
use sharekeeper::sharing::Secret;
use sharekeeper::signaling::NegotiationPolicy;

const TRUSTEES: [&str; 3] = ["Alice", "Bob", "Charlie"];

fn roster() -> Roster {
    TRUSTEES.iter().fold(
        Roster::new("Owner".into(), PreSharedKey::new("owner-key")),
        |roster, name| {
            roster.with_trustee(
                PeerId::from(*name),
                PreSharedKey::new(format!("{}-key", name.to_lowercase())),
            )
        },
    )
}

struct Peer {
    conn: ConnectionId,
    inbox: UnboundedReceiver<Outbound>,
}

impl Peer {
    async fn join(handle: &CoordinatorHandle, id: &str, key: &str) -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let conn = handle.connect(outbox);
        handle.inbound(
            conn,
            json!({"type": "register", "id": id, "key": key}).to_string(),
        );
        let mut peer = Self { conn, inbox };
        assert_eq!(
            peer.next().await,
            ServerMessage::RegisterSuccess { id: id.into() }
        );
        peer
    }

    async fn next(&mut self) -> ServerMessage {
        match self.inbox.recv().await {
            Some(Outbound::Message(msg)) => msg,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    /// Skips peer lists until something else arrives
    async fn next_signal(&mut self) -> ServerMessage {
        loop {
            match self.next().await {
                ServerMessage::PeerList { .. } => continue,
                msg => return msg,
            }
        }
    }
}

/// Owner offers, trustee answers; returns once both sides saw the other
async fn negotiate(handle: &CoordinatorHandle, owner: &mut Peer, trustee: &mut Peer, name: &str) {
    handle.inbound(
        owner.conn,
        json!({"type": "offer", "targetId": name, "payload": {"sdp": "offer"}}).to_string(),
    );
    assert_eq!(
        trustee.next_signal().await,
        ServerMessage::Offer {
            from: "Owner".into(),
            payload: json!({"sdp": "offer"}),
        }
    );

    handle.inbound(
        trustee.conn,
        json!({"type": "answer", "targetId": "Owner", "payload": {"sdp": "answer"}}).to_string(),
    );
    assert_eq!(
        owner.next_signal().await,
        ServerMessage::Answer {
            from: name.into(),
            payload: json!({"sdp": "answer"}),
        }
    );
}

/// Runs a trustee vault until the owner clears it
fn spawn_vault(
    name: &str,
    mut from_owner: UnboundedReceiver<DirectMessage>,
    to_owner: UnboundedSender<DirectMessage>,
) -> tokio::task::JoinHandle<Vec<VaultEvent>> {
    let mut vault = TrusteeVault::new(name.into(), "Owner".into(), to_owner);
    tokio::spawn(async move {
        let owner = PeerId::from("Owner");
        let mut events = Vec::new();
        while let Some(msg) = from_owner.recv().await {
            let event = vault.on_message(&owner, msg).unwrap();
            events.push(event);
            if event == VaultEvent::Cleared {
                break;
            }
        }
        events
    })
}

#[tokio::test]
async fn test_mediated_distribution_and_recovery() {
    let (handle, _task) = Coordinator::new(roster(), NegotiationPolicy::OwnerMediated).spawn();
    let mut owner = Peer::join(&handle, "Owner", "owner-key").await;

    let mut desk = OwnerDesk::new("Owner".into());
    let mut returns = Vec::new();
    let mut vaults = Vec::new();
    for name in TRUSTEES {
        let key = format!("{}-key", name.to_lowercase());
        let mut trustee = Peer::join(&handle, name, &key).await;
        negotiate(&handle, &mut owner, &mut trustee, name).await;

        // The negotiated channel, one queue per direction
        let (to_trustee, from_owner) = mpsc::unbounded_channel();
        let (to_owner, from_trustee) = mpsc::unbounded_channel();
        desk.attach(name.into(), to_trustee);
        vaults.push(spawn_vault(name, from_owner, to_owner));
        returns.push((PeerId::from(name), from_trustee));
    }

    let secret = Secret::new(b"held by nobody alone".to_vec());
    desk.distribute(&secret, Threshold::new(2).unwrap()).unwrap();
    let ticket = desk.request_shares().unwrap();
    assert_eq!(ticket.participants().len(), 3);

    let mut recovered_by = None;
    for (peer, from_trustee) in &mut returns {
        let msg = from_trustee.recv().await.unwrap();
        if let Submission::Recovered { .. } = desk.on_message(peer, msg).unwrap() {
            recovered_by = Some(peer.clone());
            break;
        }
    }
    assert_eq!(recovered_by, Some(PeerId::from("Bob")));
    assert_eq!(ticket.outcome().await.unwrap(), secret);

    for vault in vaults {
        let events = vault.await.unwrap();
        assert!(matches!(events[0], VaultEvent::Stored(_)));
        assert_eq!(events[1], VaultEvent::Answered);
        assert_eq!(events.last(), Some(&VaultEvent::Cleared));
    }
}

#[tokio::test]
async fn test_trustees_cannot_reach_each_other() {
    let (handle, _task) = Coordinator::new(roster(), NegotiationPolicy::OwnerMediated).spawn();
    let mut alice = Peer::join(&handle, "Alice", "alice-key").await;
    let mut bob = Peer::join(&handle, "Bob", "bob-key").await;

    // Alice sees nobody: no owner is online and Bob is hidden
    assert_eq!(alice.next().await, ServerMessage::PeerList { peers: vec![] });
    assert_eq!(alice.next().await, ServerMessage::PeerList { peers: vec![] });
    assert_eq!(bob.next().await, ServerMessage::PeerList { peers: vec![] });

    handle.inbound(
        alice.conn,
        json!({"type": "offer", "targetId": "Bob", "payload": {}}).to_string(),
    );

    // The offer is dropped; the owner joining is the next thing Bob hears of
    let mut owner = Peer::join(&handle, "Owner", "owner-key").await;
    assert_eq!(
        bob.next().await,
        ServerMessage::PeerList {
            peers: vec![PeerId::from("Owner")]
        }
    );
    assert_eq!(
        owner.next().await,
        ServerMessage::PeerList {
            peers: vec![PeerId::from("Alice"), PeerId::from("Bob")]
        }
    );
}

#[tokio::test]
async fn test_owner_leaving_empties_trustee_view() {
    let (handle, _task) = Coordinator::new(roster(), NegotiationPolicy::OwnerMediated).spawn();
    let owner = Peer::join(&handle, "Owner", "owner-key").await;
    let mut alice = Peer::join(&handle, "Alice", "alice-key").await;
    assert_eq!(
        alice.next().await,
        ServerMessage::PeerList {
            peers: vec![PeerId::from("Owner")]
        }
    );

    handle.disconnect(owner.conn);
    assert_eq!(alice.next().await, ServerMessage::PeerList { peers: vec![] });
}
