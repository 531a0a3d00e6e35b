//! Presence room manager
//!
//! Tracks who is currently viewing each check-in window and fans out
//! membership and attendance events over per-room broadcast channels.
//! Membership is keyed by user id, not connection id, so duplicate tabs and
//! reconnects collapse into a single entry.
//!
//! Room membership is ephemeral: it is rebuilt on reconnect and is never
//! authoritative for scoring. Mutations complete before the corresponding
//! broadcast is sent; both happen under the registry write lock, so two
//! near-simultaneous joins cannot observe inconsistent snapshots.

use chrono::Utc;
use koino_common::events::{KoinoEvent, PresenceInfo};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

struct RoomMember {
    info: PresenceInfo,
    last_seen: Instant,
}

struct Room {
    tx: broadcast::Sender<KoinoEvent>,
    members: HashMap<String, RoomMember>,
}

impl Room {
    fn new(event_buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(event_buffer);
        Self {
            tx,
            members: HashMap::new(),
        }
    }

    fn snapshot(&self, window_code: &str) -> KoinoEvent {
        let mut members: Vec<PresenceInfo> = self.members.values().map(|m| m.info.clone()).collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        KoinoEvent::RoomState {
            window_code: window_code.to_string(),
            count: members.len(),
            members,
            timestamp: Utc::now(),
        }
    }
}

/// Result of joining a room: the snapshot for the new client plus its
/// subscription to subsequent room events
pub struct JoinResult {
    pub snapshot: KoinoEvent,
    pub rx: broadcast::Receiver<KoinoEvent>,
}

/// Registry of live presence rooms, one per check-in window
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
    heartbeat_timeout: Duration,
    event_buffer: usize,
}

impl RoomRegistry {
    pub fn new(heartbeat_timeout: Duration, event_buffer: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            heartbeat_timeout,
            event_buffer,
        }
    }

    /// Register a member and subscribe it to room events
    ///
    /// Broadcasts `usuarioEntro` to the rest of the room before the new
    /// member's subscription starts, so clients never see their own join.
    /// A join for an already-present user refreshes its liveness without
    /// broadcasting (duplicate tab or reconnect).
    pub async fn join(&self, window_code: &str, user_id: &str, display_name: &str) -> JoinResult {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(window_code.to_string())
            .or_insert_with(|| Room::new(self.event_buffer));

        if let Some(existing) = room.members.get_mut(user_id) {
            existing.last_seen = Instant::now();
            debug!("User {} rejoined room {}", user_id, window_code);
        } else {
            let info = PresenceInfo {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                joined_at: Utc::now(),
            };
            room.members.insert(
                user_id.to_string(),
                RoomMember {
                    info: info.clone(),
                    last_seen: Instant::now(),
                },
            );
            info!("User {} joined room {} ({} present)", user_id, window_code, room.members.len());
            let _ = room.tx.send(KoinoEvent::UserJoined {
                window_code: window_code.to_string(),
                user: info,
                count: room.members.len(),
                timestamp: Utc::now(),
            });
        }

        let rx = room.tx.subscribe();
        JoinResult {
            snapshot: room.snapshot(window_code),
            rx,
        }
    }

    /// Remove a member and broadcast `usuarioSalio`
    ///
    /// Returns false if the user was not present (already left or expired).
    pub async fn leave(&self, window_code: &str, user_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(window_code) else {
            return false;
        };
        if room.members.remove(user_id).is_none() {
            return false;
        }
        info!("User {} left room {} ({} present)", user_id, window_code, room.members.len());
        let _ = room.tx.send(KoinoEvent::UserLeft {
            window_code: window_code.to_string(),
            user_id: user_id.to_string(),
            count: room.members.len(),
            timestamp: Utc::now(),
        });
        if room.members.is_empty() && room.tx.receiver_count() == 0 {
            rooms.remove(window_code);
        }
        true
    }

    /// Heartbeat: refresh liveness and return the full room snapshot
    ///
    /// A heartbeat from a user the server no longer tracks (presence desync)
    /// re-registers it as a join; either way the caller gets the full
    /// snapshot, bounding divergence between server and client views.
    pub async fn heartbeat(&self, window_code: &str, user_id: &str, display_name: &str) -> KoinoEvent {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(window_code.to_string())
            .or_insert_with(|| Room::new(self.event_buffer));

        match room.members.get_mut(user_id) {
            Some(member) => member.last_seen = Instant::now(),
            None => {
                let info = PresenceInfo {
                    user_id: user_id.to_string(),
                    display_name: display_name.to_string(),
                    joined_at: Utc::now(),
                };
                room.members.insert(
                    user_id.to_string(),
                    RoomMember {
                        info: info.clone(),
                        last_seen: Instant::now(),
                    },
                );
                debug!("Heartbeat re-registered {} in room {}", user_id, window_code);
                let _ = room.tx.send(KoinoEvent::UserJoined {
                    window_code: window_code.to_string(),
                    user: info,
                    count: room.members.len(),
                    timestamp: Utc::now(),
                });
            }
        }

        room.snapshot(window_code)
    }

    /// Current snapshot of a room (empty room if nobody is present)
    pub async fn snapshot(&self, window_code: &str) -> KoinoEvent {
        let rooms = self.rooms.read().await;
        match rooms.get(window_code) {
            Some(room) => room.snapshot(window_code),
            None => KoinoEvent::RoomState {
                window_code: window_code.to_string(),
                members: Vec::new(),
                count: 0,
                timestamp: Utc::now(),
            },
        }
    }

    /// Publish an attendance event to everyone viewing the window
    ///
    /// Lossy when nobody is watching. Callers must only pass fully-scored
    /// records.
    pub async fn publish(&self, window_code: &str, event: KoinoEvent) {
        let rooms = self.rooms.read().await;
        if let Some(room) = rooms.get(window_code) {
            let _ = room.tx.send(event);
        }
    }

    /// Expire members whose last heartbeat is older than the timeout
    ///
    /// Implicitly leaves each expired member, broadcasting `usuarioSalio`.
    /// Bounds (does not eliminate) temporary presence overcounting after a
    /// silent disconnect.
    pub async fn sweep(&self) {
        let mut rooms = self.rooms.write().await;
        for (code, room) in rooms.iter_mut() {
            let expired: Vec<String> = room
                .members
                .iter()
                .filter(|(_, m)| m.last_seen.elapsed() > self.heartbeat_timeout)
                .map(|(user_id, _)| user_id.clone())
                .collect();
            for user_id in expired {
                room.members.remove(&user_id);
                info!("User {} expired from room {} (heartbeat timeout)", user_id, code);
                let _ = room.tx.send(KoinoEvent::UserLeft {
                    window_code: code.clone(),
                    user_id,
                    count: room.members.len(),
                    timestamp: Utc::now(),
                });
            }
        }
        rooms.retain(|_, room| !room.members.is_empty() || room.tx.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member_count(snapshot: &KoinoEvent) -> usize {
        match snapshot {
            KoinoEvent::RoomState { count, .. } => *count,
            other => panic!("expected RoomState, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_returns_snapshot_including_self() {
        let rooms = RoomRegistry::new(Duration::from_secs(30), 16);
        let result = rooms.join("W1", "u1", "Ana").await;
        assert_eq!(member_count(&result.snapshot), 1);
    }

    #[tokio::test]
    async fn test_join_broadcasts_to_existing_members() {
        let rooms = RoomRegistry::new(Duration::from_secs(30), 16);
        let mut first = rooms.join("W1", "u1", "Ana").await;
        rooms.join("W1", "u2", "Beto").await;

        let event = first.rx.recv().await.unwrap();
        match event {
            KoinoEvent::UserJoined { user, count, .. } => {
                assert_eq!(user.user_id, "u2");
                assert_eq!(count, 2);
            }
            other => panic!("expected UserJoined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_join_collapses() {
        let rooms = RoomRegistry::new(Duration::from_secs(30), 16);
        rooms.join("W1", "u1", "Ana").await;
        let second = rooms.join("W1", "u1", "Ana").await;
        // Second tab: still one member, no phantom duplicate
        assert_eq!(member_count(&second.snapshot), 1);
    }

    #[tokio::test]
    async fn test_leave_broadcasts_updated_count() {
        let rooms = RoomRegistry::new(Duration::from_secs(30), 16);
        let mut first = rooms.join("W1", "u1", "Ana").await;
        rooms.join("W1", "u2", "Beto").await;
        first.rx.recv().await.unwrap(); // drain u2's join

        assert!(rooms.leave("W1", "u2").await);
        match first.rx.recv().await.unwrap() {
            KoinoEvent::UserLeft { user_id, count, .. } => {
                assert_eq!(user_id, "u2");
                assert_eq!(count, 1);
            }
            other => panic!("expected UserLeft, got {:?}", other),
        }
        // Leaving twice is not an error, just a no-op
        assert!(!rooms.leave("W1", "u2").await);
    }

    #[tokio::test]
    async fn test_sweep_expires_silent_members() {
        let rooms = RoomRegistry::new(Duration::from_millis(20), 16);
        rooms.join("W1", "u1", "Ana").await;
        rooms.join("W1", "u2", "Beto").await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        rooms.heartbeat("W1", "u1", "Ana").await;
        rooms.sweep().await;

        // u2 never pinged and converges out; u1's heartbeat kept it alive
        let snapshot = rooms.snapshot("W1").await;
        assert_eq!(member_count(&snapshot), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_reregisters_desynced_member() {
        let rooms = RoomRegistry::new(Duration::from_secs(30), 16);
        // Server never saw this client join; heartbeat heals the desync
        let snapshot = rooms.heartbeat("W1", "u1", "Ana").await;
        assert_eq!(member_count(&snapshot), 1);
    }

    #[tokio::test]
    async fn test_publish_reaches_room_subscribers() {
        let rooms = RoomRegistry::new(Duration::from_secs(30), 16);
        let mut result = rooms.join("W1", "u1", "Ana").await;

        rooms
            .publish(
                "W1",
                KoinoEvent::UserLeft {
                    window_code: "W1".to_string(),
                    user_id: "ghost".to_string(),
                    count: 1,
                    timestamp: Utc::now(),
                },
            )
            .await;
        let event = result.rx.recv().await.unwrap();
        assert_eq!(event.event_name(), "usuarioSalio");
    }
}
