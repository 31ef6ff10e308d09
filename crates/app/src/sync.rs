//! Synchronization engine - the write side of a room
//!
//! Every write is best-effort: failures are logged and reported as
//! `WriteOutcome::Failed`, local state is never rolled back.

use std::time::Duration;

use serde_json::{json, Map, Value};
use spinroom_core::invariants::assert_record_invariants;
use spinroom_core::{
    is_within_capacity, room_path, PermissionMatrix, RoomId, RoomRecord, SessionContext,
    SpinMessage, WheelAction, SPIN_EVENT_KEY, VIEWERS_KEY,
};
use spinroom_net::{child_path, RoomStore, Subscription};
use tracing::{debug, warn};

/// What happened to a gated write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Name list over the cap; nothing sent
    Suppressed,
    /// Role or connection does not allow the write
    Skipped,
    /// The store refused or the connection failed
    Failed,
}

/// The two live feeds of a joined room
#[derive(Debug)]
pub struct RoomFeeds {
    /// Whole room record on every change
    pub room: Subscription,
    /// Just the spin broadcast slot
    pub spin: Subscription,
}

/// Room reads and writes for one session
#[derive(Clone)]
pub struct SyncEngine<S> {
    store: S,
    rooms_path: String,
    spin_event_ttl: Duration,
}

impl<S: RoomStore> SyncEngine<S> {
    pub fn new(store: S, rooms_path: impl Into<String>, spin_event_ttl: Duration) -> Self {
        Self {
            store,
            rooms_path: rooms_path.into(),
            spin_event_ttl,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn room_path(&self, room_id: &RoomId) -> String {
        room_path(&self.rooms_path, room_id)
    }

    /// Write a brand-new record with default fields
    pub async fn create_room_record(
        &self,
        room_id: &RoomId,
        now_ms: i64,
    ) -> spinroom_net::Result<()> {
        let record = RoomRecord::new(now_ms);
        assert_record_invariants(&record);
        let value = record
            .to_value()
            .map_err(|e| spinroom_net::Error::Protocol(e.to_string()))?;
        self.store.set(&self.room_path(room_id), value).await
    }

    /// Open the room feed and the spin feed
    pub async fn subscribe_room(&self, room_id: &RoomId) -> spinroom_net::Result<RoomFeeds> {
        let path = self.room_path(room_id);
        let room = self.store.subscribe(&path).await?;
        let spin = self
            .store
            .subscribe(&child_path(&path, SPIN_EVENT_KEY))
            .await?;
        Ok(RoomFeeds { room, spin })
    }

    /// Push names, counter and rotation
    pub async fn push_state(&self, ctx: &SessionContext, now_ms: i64) -> WriteOutcome {
        let Some(path) = self.gate(ctx, WheelAction::PushState) else {
            return WriteOutcome::Skipped;
        };
        if !is_within_capacity(&ctx.wheel.names) {
            debug!(count = ctx.wheel.names.len(), "Name list over capacity, not pushing");
            return WriteOutcome::Suppressed;
        }

        let fields = state_fields(ctx, now_ms);
        self.write_fields(&path, fields, "push state").await
    }

    /// Push the post-spin state, including the winner
    pub async fn push_final(&self, ctx: &SessionContext, now_ms: i64) -> WriteOutcome {
        let Some(path) = self.gate(ctx, WheelAction::PushState) else {
            return WriteOutcome::Skipped;
        };
        if !is_within_capacity(&ctx.wheel.names) {
            debug!(count = ctx.wheel.names.len(), "Name list over capacity, not pushing");
            return WriteOutcome::Suppressed;
        }

        let mut fields = state_fields(ctx, now_ms);
        if let Some(winner) = &ctx.wheel.winner {
            fields.insert("winner".into(), json!(winner));
        }
        self.write_fields(&path, fields, "push final state").await
    }

    /// Publish a spin, then remove it once viewers have had time to see it
    pub async fn broadcast_spin(&self, ctx: &SessionContext, message: &SpinMessage) -> WriteOutcome {
        let Some(path) = self.gate(ctx, WheelAction::BroadcastSpin) else {
            return WriteOutcome::Skipped;
        };
        let value = match serde_json::to_value(message) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to encode spin message");
                return WriteOutcome::Failed;
            }
        };

        let event_path = child_path(&path, SPIN_EVENT_KEY);
        if let Err(e) = self.store.set(&event_path, value).await {
            warn!(error = %e, "Failed to broadcast spin");
            return WriteOutcome::Failed;
        }

        let store = self.store.clone();
        let ttl = self.spin_event_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = store.remove(&event_path).await {
                warn!(error = %e, "Failed to clear spin broadcast");
            }
        });
        WriteOutcome::Written
    }

    /// Reset the room's wheel fields
    pub async fn clear_room(&self, ctx: &SessionContext, now_ms: i64) -> WriteOutcome {
        let Some(path) = self.gate(ctx, WheelAction::ClearRoom) else {
            return WriteOutcome::Skipped;
        };
        let mut fields = Map::new();
        fields.insert("names".into(), json!([]));
        fields.insert("totalSpins".into(), json!(0));
        fields.insert("currentRotation".into(), json!(0.0));
        fields.insert("winner".into(), Value::Null);
        fields.insert("lastUpdate".into(), json!(now_ms));
        self.write_fields(&path, fields, "clear room").await
    }

    /// Host rewrites the viewer count it reads
    pub async fn reassert_viewers(&self, ctx: &SessionContext) -> WriteOutcome {
        let Some(path) = self.gate(ctx, WheelAction::ReassertViewers) else {
            return WriteOutcome::Skipped;
        };
        let count = match self.store.get(&child_path(&path, VIEWERS_KEY)).await {
            Ok(value) => value.and_then(|v| v.as_u64()).unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "Failed to read viewer count");
                return WriteOutcome::Failed;
            }
        };

        let mut fields = Map::new();
        fields.insert(VIEWERS_KEY.into(), json!(count));
        self.write_fields(&path, fields, "reassert viewers").await
    }

    /// Viewer announces itself with an atomic increment
    pub async fn increment_viewers(&self, ctx: &SessionContext) -> WriteOutcome {
        let Some(path) = self.gate(ctx, WheelAction::IncrementViewers) else {
            return WriteOutcome::Skipped;
        };
        let result = self
            .store
            .transaction(&child_path(&path, VIEWERS_KEY), |current| {
                json!(current.and_then(|v| v.as_u64()).unwrap_or(0) + 1)
            })
            .await;

        match result {
            Ok(count) => {
                debug!(viewers = %count, "Viewer count incremented");
                WriteOutcome::Written
            }
            Err(e) => {
                warn!(error = %e, "Failed to increment viewer count");
                WriteOutcome::Failed
            }
        }
    }

    /// Room path if this session may perform the write
    fn gate(&self, ctx: &SessionContext, action: WheelAction) -> Option<String> {
        if !ctx.is_connected() || !PermissionMatrix::can_perform(ctx.role, action) {
            debug!(?action, role = ?ctx.role, "Write skipped");
            return None;
        }
        ctx.room_id.as_ref().map(|id| self.room_path(id))
    }

    async fn write_fields(&self, path: &str, fields: Map<String, Value>, what: &str) -> WriteOutcome {
        match self.store.update(path, fields).await {
            Ok(()) => WriteOutcome::Written,
            Err(e) => {
                warn!(error = %e, "Failed to {}", what);
                WriteOutcome::Failed
            }
        }
    }
}

fn state_fields(ctx: &SessionContext, now_ms: i64) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("names".into(), json!(ctx.wheel.names));
    fields.insert("totalSpins".into(), json!(ctx.wheel.total_spins));
    fields.insert("currentRotation".into(), json!(ctx.wheel.current_rotation));
    fields.insert("lastUpdate".into(), json!(now_ms));
    fields
}
