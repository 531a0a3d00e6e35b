//! Shared service state
//!
//! One `SharedState` is built at startup and handed to every component as an
//! explicit handle (no ambient globals). It owns the database pool, the
//! boundary calendar, the presence room registry, the scoring engine, and the
//! service-wide event channel used for level-ups.

use koino_common::calendar::Calendar;
use koino_common::config::ServiceConfig;
use koino_common::events::KoinoEvent;
use koino_common::Result;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::room::RoomRegistry;
use crate::scoring::ScoringEngine;

/// Shared state accessible by all components
pub struct SharedState {
    pub db: SqlitePool,
    pub config: ServiceConfig,
    pub calendar: Calendar,
    pub rooms: RoomRegistry,
    pub scoring: ScoringEngine,
    /// Service-wide event channel (level-ups; room events go through `rooms`)
    pub event_tx: broadcast::Sender<KoinoEvent>,
}

impl SharedState {
    pub fn new(db: SqlitePool, config: ServiceConfig) -> Result<Self> {
        let calendar = config.calendar()?;
        let rooms = RoomRegistry::new(
            Duration::from_secs(config.heartbeat_timeout_secs),
            config.event_buffer,
        );
        let scoring = ScoringEngine::new(db.clone());
        let (event_tx, _) = broadcast::channel(config.event_buffer);
        Ok(Self {
            db,
            config,
            calendar,
            rooms,
            scoring,
            event_tx,
        })
    }

    /// Broadcast a service-wide event, ignoring the no-receivers case
    pub fn broadcast_event(&self, event: KoinoEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to the service-wide event stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<KoinoEvent> {
        self.event_tx.subscribe()
    }
}
