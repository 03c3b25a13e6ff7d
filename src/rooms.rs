//! # Room Router
//!
//! Pairs connections into rooms of two and relays translation results to the
//! other member.
//!
//! ## Rules:
//! - Joining registers the connection's language (default `es-ES`)
//! - When the second member joins, both receive `user_joined` carrying the
//!   other's language
//! - A third member is turned away with a `room_full` error; the two members
//!   already inside are not notified
//! - Joining a different room leaves the previous one
//! - Disconnect removes both the membership and the registered language
//!
//! Notifications are collected under the lock and sent after it is released.

use crate::protocol::OutboundEvent;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub const ROOM_CAPACITY: usize = 2;

/// Something that can push an event to one connected client.
pub trait PeerSink: Send + Sync {
    /// Returns `false` if the client is gone.
    fn send(&self, event: OutboundEvent) -> bool;
}

#[derive(Clone)]
struct Member {
    connection_id: String,
    sink: Arc<dyn PeerSink>,
}

#[derive(Default)]
struct Router {
    rooms: HashMap<String, Vec<Member>>,
    membership: HashMap<String, String>,
    languages: HashMap<String, String>,
}

impl Router {
    fn remove_member(&mut self, connection_id: &str) -> Option<String> {
        let room_id = self.membership.remove(connection_id)?;
        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.retain(|m| m.connection_id != connection_id);
            if members.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
        Some(room_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Joined; carries the peer's language if someone was already there
    Joined { peer_language: Option<String> },
    RoomFull,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomMemberSummary {
    pub connection_id: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub members: Vec<RoomMemberSummary>,
}

pub struct RoomRouter {
    inner: Mutex<Router>,
    default_language: String,
}

impl RoomRouter {
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Router::default()),
            default_language: default_language.into(),
        }
    }

    pub fn join(
        &self,
        room_id: &str,
        connection_id: &str,
        language: Option<String>,
        sink: Arc<dyn PeerSink>,
    ) -> JoinOutcome {
        let language = language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| self.default_language.clone());

        let (notifications, peer_language) = {
            let mut router = self.inner.lock();

            let others = router
                .rooms
                .get(room_id)
                .map(|members| members.iter().filter(|m| m.connection_id != connection_id).count())
                .unwrap_or(0);
            if others >= ROOM_CAPACITY {
                info!(room_id, connection_id, "Room is full, rejecting join");
                return JoinOutcome::RoomFull;
            }

            if router.membership.get(connection_id).is_some_and(|current| current != room_id) {
                router.remove_member(connection_id);
            }

            router.languages.insert(connection_id.to_string(), language.clone());
            router.membership.insert(connection_id.to_string(), room_id.to_string());

            let members = router.rooms.entry(room_id.to_string()).or_default();
            members.retain(|m| m.connection_id != connection_id);
            members.push(Member {
                connection_id: connection_id.to_string(),
                sink: sink.clone(),
            });

            let peer = members.iter().find(|m| m.connection_id != connection_id).cloned();
            match peer {
                Some(peer) => {
                    let peer_language = router
                        .languages
                        .get(&peer.connection_id)
                        .cloned()
                        .unwrap_or_else(|| self.default_language.clone());
                    let notifications = vec![
                        (peer.sink, OutboundEvent::UserJoined { other_language: language.clone() }),
                        (sink, OutboundEvent::UserJoined { other_language: peer_language.clone() }),
                    ];
                    (notifications, Some(peer_language))
                }
                None => (Vec::new(), None),
            }
        };

        for (target, event) in notifications {
            target.send(event);
        }

        info!(room_id, connection_id, language = %language, paired = peer_language.is_some(), "Joined room");
        JoinOutcome::Joined { peer_language }
    }

    /// Remove the connection from its room and forget its language.
    pub fn leave(&self, connection_id: &str) -> Option<String> {
        let mut router = self.inner.lock();
        router.languages.remove(connection_id);
        let room_id = router.remove_member(connection_id);
        if let Some(room_id) = &room_id {
            debug!(room_id = %room_id, connection_id, "Left room");
        }
        room_id
    }

    pub fn language_of(&self, connection_id: &str) -> Option<String> {
        self.inner.lock().languages.get(connection_id).cloned()
    }

    pub fn room_of(&self, connection_id: &str) -> Option<String> {
        self.inner.lock().membership.get(connection_id).cloned()
    }

    /// Send `event` to every member of `room_id` except `sender`.
    /// Returns how many members accepted it.
    pub fn relay(&self, room_id: &str, sender: &str, event: OutboundEvent) -> usize {
        let targets: Vec<Arc<dyn PeerSink>> = {
            let router = self.inner.lock();
            router
                .rooms
                .get(room_id)
                .map(|members| {
                    members
                        .iter()
                        .filter(|m| m.connection_id != sender)
                        .map(|m| m.sink.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        targets.iter().filter(|target| target.send(event.clone())).count()
    }

    pub fn occupied_rooms(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    pub fn summaries(&self) -> Vec<RoomSummary> {
        let router = self.inner.lock();
        let mut rooms: Vec<RoomSummary> = router
            .rooms
            .iter()
            .map(|(room_id, members)| RoomSummary {
                room_id: room_id.clone(),
                members: members
                    .iter()
                    .map(|m| RoomMemberSummary {
                        connection_id: m.connection_id.clone(),
                        language: router.languages.get(&m.connection_id).cloned(),
                    })
                    .collect(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPeer;

    fn router() -> RoomRouter {
        RoomRouter::new("es-ES")
    }

    #[test]
    fn test_pair_exchanges_languages() {
        let router = router();
        let alice = RecordingPeer::new();
        let bob = RecordingPeer::new();

        let first = router.join("r1", "alice", Some("en-US".to_string()), alice.clone());
        assert_eq!(first, JoinOutcome::Joined { peer_language: None });
        assert!(alice.events().is_empty());

        let second = router.join("r1", "bob", Some("fr-FR".to_string()), bob.clone());
        assert_eq!(second, JoinOutcome::Joined { peer_language: Some("en-US".to_string()) });

        assert_eq!(alice.events(), vec![OutboundEvent::UserJoined { other_language: "fr-FR".to_string() }]);
        assert_eq!(bob.events(), vec![OutboundEvent::UserJoined { other_language: "en-US".to_string() }]);
    }

    #[test]
    fn test_language_defaults() {
        let router = router();
        router.join("r1", "alice", None, RecordingPeer::new());
        router.join("r1", "bob", Some("  ".to_string()), RecordingPeer::new());

        assert_eq!(router.language_of("alice").as_deref(), Some("es-ES"));
        assert_eq!(router.language_of("bob").as_deref(), Some("es-ES"));
    }

    #[test]
    fn test_third_member_is_rejected_without_renotifying() {
        let router = router();
        let alice = RecordingPeer::new();
        let bob = RecordingPeer::new();
        let carol = RecordingPeer::new();

        router.join("r1", "alice", Some("en-US".to_string()), alice.clone());
        router.join("r1", "bob", Some("es-ES".to_string()), bob.clone());
        let outcome = router.join("r1", "carol", Some("fr-FR".to_string()), carol.clone());

        assert_eq!(outcome, JoinOutcome::RoomFull);
        assert_eq!(alice.events().len(), 1);
        assert_eq!(bob.events().len(), 1);
        assert!(carol.events().is_empty());
        assert_eq!(router.room_of("carol"), None);
        assert_eq!(router.language_of("carol"), None);
    }

    #[test]
    fn test_relay_skips_sender() {
        let router = router();
        let alice = RecordingPeer::new();
        let bob = RecordingPeer::new();
        router.join("r1", "alice", None, alice.clone());
        router.join("r1", "bob", None, bob.clone());

        let delivered = router.relay("r1", "alice", OutboundEvent::error("x", "y"));
        assert_eq!(delivered, 1);
        assert_eq!(bob.events().last(), Some(&OutboundEvent::error("x", "y")));
        assert_eq!(alice.events().len(), 1);
    }

    #[test]
    fn test_relay_counts_only_live_peers() {
        let router = router();
        let bob = RecordingPeer::new();
        router.join("r1", "alice", None, RecordingPeer::new());
        router.join("r1", "bob", None, bob.clone());
        bob.disconnect();

        assert_eq!(router.relay("r1", "alice", OutboundEvent::error("x", "y")), 0);
        assert_eq!(router.relay("missing", "alice", OutboundEvent::error("x", "y")), 0);
    }

    #[test]
    fn test_switching_rooms_and_leaving() {
        let router = router();
        router.join("r1", "alice", Some("en-US".to_string()), RecordingPeer::new());
        router.join("r2", "alice", Some("en-US".to_string()), RecordingPeer::new());

        assert_eq!(router.room_of("alice").as_deref(), Some("r2"));
        assert_eq!(router.occupied_rooms(), 1);

        assert_eq!(router.leave("alice").as_deref(), Some("r2"));
        assert_eq!(router.language_of("alice"), None);
        assert_eq!(router.occupied_rooms(), 0);
        assert_eq!(router.leave("alice"), None);
    }

    #[test]
    fn test_rejoining_same_room_does_not_take_a_second_seat() {
        let router = router();
        router.join("r1", "alice", None, RecordingPeer::new());
        router.join("r1", "alice", Some("fr-FR".to_string()), RecordingPeer::new());

        let summaries = router.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].members.len(), 1);
        assert_eq!(summaries[0].members[0].language.as_deref(), Some("fr-FR"));
    }
}
