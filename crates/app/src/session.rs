//! Wheel session
//!
//! One task owns everything a host, viewer or local wheel knows and
//! `select!`s over user commands, the room feed, the spin feed, a frame
//! ticker (only while animating) and the idle-resume deadline.

use std::fmt;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use spinroom_core::invariants::assert_session_invariants;
use spinroom_core::{
    reconcile, wheel, Error as WheelError, Intensity, PermissionMatrix, Role, RoomId,
    RoomSnapshot, SessionContext, SpinFrame, SpinMessage, SpinOrigin, SpinPhase, StateDiff,
    SyncConfig, WheelAction, WheelState,
};
use spinroom_net::{RoomStore, Subscription};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::sync::{RoomFeeds, SyncEngine, WriteOutcome};

/// What the wheel is doing between frames
#[derive(Debug, Clone, Copy, PartialEq)]
enum Animation {
    Still,
    /// Slow unsynchronized drift
    Idle,
    Spin {
        started: Instant,
        last_push: Option<Instant>,
    },
}

impl Animation {
    fn is_active(&self) -> bool {
        !matches!(self, Animation::Still)
    }
}

/// Something the user asked for
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    AddName(String),
    /// Zero-based position
    RemoveName(usize),
    Shuffle,
    ClearAll { confirmed: bool },
    SetIntensity(u8),
    Spin,
    CreateRoom,
    JoinRoom(String),
    CopyRoomId,
    Status,
}

/// Successful result of a `UserAction`
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Done,
    Removed(String),
    SpinStarted(SpinMessage),
    /// `None` when no store is available or the room could not be entered
    Room(Option<RoomId>),
    RoomId(RoomId),
    Status(SessionStatus),
}

pub struct SessionCommand {
    pub action: UserAction,
    pub reply: oneshot::Sender<Result<ActionOutcome>>,
}

/// Things that happened without being asked for
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RoomEntered { room_id: RoomId, role: Role },
    /// The store connection went away; the wheel keeps its local state
    RoomLost,
    Synced { diff: StateDiff, wheel: WheelState },
    SpinStarted { origin: SpinOrigin, message: SpinMessage },
    SpinFinished {
        origin: SpinOrigin,
        winner: Option<String>,
        total_spins: u64,
    },
}

/// Snapshot for the status line
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub role: Role,
    pub room_id: Option<RoomId>,
    pub store_available: bool,
    pub wheel: WheelState,
    pub intensity: Intensity,
    pub spinning: bool,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.room_id {
            Some(room_id) => write!(f, "{} room {}", self.role, room_id)?,
            None if self.store_available => write!(f, "{} (no room)", self.role)?,
            None => write!(f, "{} (no store)", self.role)?,
        }
        write!(
            f,
            " | {} names | {} spins | intensity {}",
            self.wheel.names.len(),
            self.wheel.total_spins,
            self.intensity.level()
        )?;
        if self.role != Role::Unconnected {
            let plural = if self.wheel.viewers == 1 { "" } else { "s" };
            write!(f, " | {} viewer{}", self.wheel.viewers, plural)?;
        }
        if let Some(winner) = &self.wheel.winner {
            write!(f, " | winner: {}", winner)?;
        }
        if self.spinning {
            write!(f, " | spinning")?;
        }
        for (i, name) in self.wheel.names.iter().enumerate() {
            write!(f, "\n  {:>3}. {}", i + 1, name)?;
        }
        Ok(())
    }
}

/// A single wheel and its room
pub struct WheelSession<S: RoomStore> {
    ctx: SessionContext,
    sync: Option<SyncEngine<S>>,
    feeds: Option<RoomFeeds>,
    animation: Animation,
    idle_resume_at: Option<Instant>,
    config: SyncConfig,
    rng: StdRng,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<S: RoomStore> WheelSession<S> {
    /// `sync` is `None` in local mode
    pub fn new(
        sync: Option<SyncEngine<S>>,
        config: SyncConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        Self::with_rng(sync, config, StdRng::from_entropy())
    }

    pub fn with_rng(
        sync: Option<SyncEngine<S>>,
        config: SyncConfig,
        rng: StdRng,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            ctx: SessionContext::new(sync.is_some()),
            sync,
            feeds: None,
            animation: Animation::Still,
            idle_resume_at: None,
            config,
            rng,
            events,
        };
        (session, events_rx)
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn wheel(&self) -> &WheelState {
        &self.ctx.wheel
    }

    pub fn is_idling(&self) -> bool {
        self.animation == Animation::Idle
    }

    pub fn idle_resume_at(&self) -> Option<Instant> {
        self.idle_resume_at
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            role: self.ctx.role,
            room_id: self.ctx.room_id.clone(),
            store_available: self.ctx.store_available(),
            wheel: self.ctx.wheel.clone(),
            intensity: self.ctx.intensity,
            spinning: self.ctx.spin.is_spinning(),
        }
    }

    /// Join the requested room, or host a fresh one when a store is available
    pub async fn startup(&mut self, join: Option<&str>) -> Result<Option<RoomId>> {
        if !self.ctx.store_available() {
            info!("No room store, running in local mode");
            return Ok(None);
        }
        match join {
            Some(candidate) => self.join_room(candidate).await,
            None => self.create_room().await,
        }
    }

    /// Host a brand-new room
    #[instrument(skip(self), fields(session = %self.ctx.session_id))]
    pub async fn create_room(&mut self) -> Result<Option<RoomId>> {
        self.ensure(WheelAction::CreateRoom)?;
        let Some(sync) = self.sync.clone() else {
            info!("No room store, staying in local mode");
            return Ok(None);
        };

        let room_id = RoomId::generate(&mut self.rng);
        if let Err(e) = sync.create_room_record(&room_id, now_ms()).await {
            warn!(room = %room_id, error = %e, "Failed to create room");
            return Ok(None);
        }

        self.leave_current_room();
        self.ctx.enter_room(room_id.clone(), Role::Host);
        // Names added in local mode survive the switch
        sync.push_state(&self.ctx, now_ms()).await;
        if !self.attach(&sync, &room_id).await {
            return Ok(None);
        }
        sync.reassert_viewers(&self.ctx).await;

        info!(room = %room_id, "Hosting room");
        self.emit(SessionEvent::RoomEntered {
            room_id: room_id.clone(),
            role: Role::Host,
        });
        Ok(Some(room_id))
    }

    /// Watch an existing room. `candidate` is trimmed and upper-cased.
    #[instrument(skip(self), fields(session = %self.ctx.session_id))]
    pub async fn join_room(&mut self, candidate: &str) -> Result<Option<RoomId>> {
        self.ensure(WheelAction::JoinRoom)?;
        let room_id = RoomId::from_user_input(candidate).map_err(WheelError::from)?;
        if matches!(
            self.ctx.spin.phase(),
            SpinPhase::Spinning {
                origin: SpinOrigin::Local,
                ..
            }
        ) {
            return Err(WheelError::AlreadySpinning.into());
        }
        let Some(sync) = self.sync.clone() else {
            info!("No room store, staying in local mode");
            return Ok(None);
        };

        self.leave_current_room();
        self.ctx.enter_room(room_id.clone(), Role::Viewer);
        if self.animation == Animation::Idle {
            self.animation = Animation::Still;
        }
        self.idle_resume_at = None;

        if !self.attach(&sync, &room_id).await {
            return Ok(None);
        }
        sync.increment_viewers(&self.ctx).await;

        info!(room = %room_id, "Watching room");
        self.emit(SessionEvent::RoomEntered {
            room_id: room_id.clone(),
            role: Role::Viewer,
        });
        Ok(Some(room_id))
    }

    pub async fn add_name(&mut self, name: &str) -> Result<()> {
        self.ensure(WheelAction::AddName)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(WheelError::EmptyName.into());
        }
        self.ctx.wheel.names.push(name.to_string());
        self.after_edit().await;
        Ok(())
    }

    /// Remove by zero-based position
    pub async fn remove_name(&mut self, index: usize) -> Result<String> {
        self.ensure(WheelAction::RemoveName)?;
        let len = self.ctx.wheel.names.len();
        if index >= len {
            return Err(WheelError::IndexOutOfRange { index, len }.into());
        }
        let removed = self.ctx.wheel.names.remove(index);
        self.after_edit().await;
        Ok(removed)
    }

    /// Uniform random permutation
    pub async fn shuffle(&mut self) -> Result<()> {
        self.ensure(WheelAction::Shuffle)?;
        if self.ctx.wheel.names.is_empty() {
            return Ok(());
        }
        self.ctx.wheel.names.shuffle(&mut self.rng);
        self.after_edit().await;
        Ok(())
    }

    /// Reset names, counter, rotation and winner
    pub async fn clear_all(&mut self, confirmed: bool) -> Result<()> {
        self.ensure(WheelAction::ClearAll)?;
        if !confirmed {
            return Err(WheelError::ConfirmationRequired.into());
        }

        let wheel = &mut self.ctx.wheel;
        wheel.names.clear();
        wheel.total_spins = 0;
        wheel.current_rotation = 0.0;
        wheel.winner = None;
        if self.animation == Animation::Idle {
            self.animation = Animation::Still;
        }

        if let Some(sync) = &self.sync {
            sync.clear_room(&self.ctx, now_ms()).await;
        }
        Ok(())
    }

    pub fn set_intensity(&mut self, level: u8) -> Result<()> {
        self.ensure(WheelAction::AdjustIntensity)?;
        self.ctx.intensity = Intensity::new(level)?;
        Ok(())
    }

    pub async fn spin(&mut self) -> Result<SpinMessage> {
        self.spin_at(Instant::now()).await
    }

    /// Start a local spin whose clock starts at `now`
    #[instrument(skip(self, now), fields(session = %self.ctx.session_id))]
    pub async fn spin_at(&mut self, now: Instant) -> Result<SpinMessage> {
        self.ensure(WheelAction::Spin)?;
        let message = self.ctx.spin.start_local(
            self.ctx.intensity,
            self.ctx.wheel.names.len(),
            self.ctx.wheel.current_rotation,
            now_ms(),
            &mut self.rng,
        )?;

        if let Some(sync) = &self.sync {
            sync.broadcast_spin(&self.ctx, &message).await;
        }
        self.animation = Animation::Spin {
            started: now,
            last_push: None,
        };

        info!(
            intensity = message.intensity,
            duration_ms = message.duration,
            "Spin started"
        );
        self.emit(SessionEvent::SpinStarted {
            origin: SpinOrigin::Local,
            message: message.clone(),
        });
        Ok(message)
    }

    /// Room id for the clipboard
    pub fn copy_room_id(&self) -> Result<RoomId> {
        self.ensure(WheelAction::CopyRoomId)?;
        self.ctx
            .room_id
            .clone()
            .ok_or_else(|| WheelError::PermissionDenied("no room to copy".into()).into())
    }

    /// Apply a whole-record value from the room feed
    pub fn apply_room_value(&mut self, value: Option<Value>) {
        let Some(value) = value else {
            debug!("Room record absent");
            return;
        };

        let snapshot = RoomSnapshot::from_value(&value);
        let diff = reconcile(&mut self.ctx.wheel, &snapshot);
        if diff.is_empty() {
            return;
        }

        if self.ctx.wheel.names.is_empty() && self.animation == Animation::Idle {
            self.animation = Animation::Still;
        }
        debug!(?diff, "Room state applied");
        self.emit(SessionEvent::Synced {
            diff,
            wheel: self.ctx.wheel.clone(),
        });
    }

    /// Apply a value from the spin feed; viewers replay it from `now`
    pub fn apply_spin_value(&mut self, value: Option<Value>, now: Instant) {
        let Some(value) = value else {
            return;
        };
        if self.ctx.role != Role::Viewer {
            debug!("Ignoring own spin broadcast");
            return;
        }

        let message: SpinMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable spin broadcast");
                return;
            }
        };
        match self.ctx.spin.start_remote(message.clone()) {
            Ok(()) => {}
            Err(WheelError::AlreadySpinning) => {
                debug!("Spin broadcast while spinning, ignored");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Ignoring invalid spin broadcast");
                return;
            }
        }

        self.ctx.wheel.current_rotation = message.start_rotation;
        self.animation = Animation::Spin {
            started: now,
            last_push: None,
        };
        info!(duration_ms = message.duration, "Replaying spin");
        self.emit(SessionEvent::SpinStarted {
            origin: SpinOrigin::Remote,
            message,
        });
    }

    /// Render one frame at `now`
    pub async fn advance_frame(&mut self, now: Instant) -> Option<SpinFrame> {
        match self.animation {
            Animation::Still => None,
            Animation::Idle => {
                if self.ctx.spin.is_spinning() || self.ctx.wheel.names.is_empty() {
                    self.animation = Animation::Still;
                } else {
                    self.ctx.wheel.current_rotation =
                        wheel::idle_step(self.ctx.wheel.current_rotation);
                }
                None
            }
            Animation::Spin { started, last_push } => {
                let Some(frame) = self.ctx.spin.advance(now.saturating_duration_since(started))
                else {
                    self.animation = Animation::Still;
                    return None;
                };
                self.ctx.wheel.current_rotation = frame.rotation;

                if frame.finished {
                    self.finish_spin(frame, now).await;
                } else if frame.origin == SpinOrigin::Local {
                    let due = last_push.map_or(true, |at| {
                        now.saturating_duration_since(at) >= self.config.spin_push_interval()
                    });
                    if due {
                        self.push_state().await;
                        self.animation = Animation::Spin {
                            started,
                            last_push: Some(now),
                        };
                    }
                }
                Some(frame)
            }
        }
    }

    /// Start the idle drift if its deadline has passed
    pub fn resume_idle(&mut self, now: Instant) {
        match self.idle_resume_at {
            Some(at) if now >= at => {
                self.idle_resume_at = None;
                self.start_idle();
            }
            _ => {}
        }
    }

    /// Main session loop; ends when every command sender is gone
    #[instrument(skip_all, fields(session = %self.ctx.session_id))]
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let mut ticker = tokio::time::interval(self.config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let animating = self.animation.is_active();
            let idle_deadline = self.idle_resume_at;
            let (room_feed, spin_feed) = match self.feeds.as_mut() {
                Some(feeds) => (Some(&mut feeds.room), Some(&mut feeds.spin)),
                None => (None, None),
            };

            tokio::select! {
                command = commands.recv() => {
                    let Some(SessionCommand { action, reply }) = command else {
                        debug!("Command channel closed");
                        break;
                    };
                    let result = self.perform(action).await;
                    let _ = reply.send(result);
                }
                update = next_update(room_feed) => match update {
                    Some(value) => self.apply_room_value(value),
                    None => self.on_feed_closed(),
                },
                update = next_update(spin_feed) => match update {
                    Some(value) => self.apply_spin_value(value, Instant::now()),
                    None => self.on_feed_closed(),
                },
                _ = ticker.tick(), if animating => {
                    self.advance_frame(Instant::now()).await;
                }
                _ = wait_until(idle_deadline) => {
                    self.resume_idle(Instant::now());
                }
            }

            assert_session_invariants(&self.ctx);
        }

        info!("Session stopped");
    }

    /// Dispatch one user action
    pub async fn perform(&mut self, action: UserAction) -> Result<ActionOutcome> {
        let outcome = match action {
            UserAction::AddName(name) => {
                self.add_name(&name).await?;
                ActionOutcome::Done
            }
            UserAction::RemoveName(index) => ActionOutcome::Removed(self.remove_name(index).await?),
            UserAction::Shuffle => {
                self.shuffle().await?;
                ActionOutcome::Done
            }
            UserAction::ClearAll { confirmed } => {
                self.clear_all(confirmed).await?;
                ActionOutcome::Done
            }
            UserAction::SetIntensity(level) => {
                self.set_intensity(level)?;
                ActionOutcome::Done
            }
            UserAction::Spin => ActionOutcome::SpinStarted(self.spin().await?),
            UserAction::CreateRoom => ActionOutcome::Room(self.create_room().await?),
            UserAction::JoinRoom(candidate) => {
                ActionOutcome::Room(self.join_room(&candidate).await?)
            }
            UserAction::CopyRoomId => ActionOutcome::RoomId(self.copy_room_id()?),
            UserAction::Status => ActionOutcome::Status(self.status()),
        };
        assert_session_invariants(&self.ctx);
        Ok(outcome)
    }

    fn ensure(&self, action: WheelAction) -> Result<()> {
        if PermissionMatrix::can_perform(self.ctx.role, action) {
            Ok(())
        } else {
            Err(WheelError::PermissionDenied(format!(
                "{:?} is not available while {}",
                action, self.ctx.role
            ))
            .into())
        }
    }

    async fn after_edit(&mut self) {
        self.push_state().await;
        self.start_idle();
    }

    async fn push_state(&mut self) -> WriteOutcome {
        match &self.sync {
            Some(sync) => sync.push_state(&self.ctx, now_ms()).await,
            None => WriteOutcome::Skipped,
        }
    }

    fn start_idle(&mut self) {
        if self.ctx.spin.is_spinning() || self.ctx.wheel.names.is_empty() {
            return;
        }
        if !matches!(self.animation, Animation::Spin { .. }) {
            self.animation = Animation::Idle;
        }
    }

    async fn finish_spin(&mut self, frame: SpinFrame, now: Instant) {
        let winner = wheel::winner(&self.ctx.wheel.names, frame.rotation).map(str::to_string);
        if winner.is_some() {
            self.ctx.wheel.winner = winner.clone();
        }

        if frame.origin == SpinOrigin::Local {
            self.ctx.wheel.total_spins += 1;
            if let Some(sync) = &self.sync {
                sync.push_final(&self.ctx, now_ms()).await;
            }
            self.idle_resume_at = Some(now + self.config.idle_resume_delay());
        }
        self.animation = Animation::Still;

        info!(winner = ?winner, origin = ?frame.origin, "Spin finished");
        self.emit(SessionEvent::SpinFinished {
            origin: frame.origin,
            winner,
            total_spins: self.ctx.wheel.total_spins,
        });
    }

    async fn attach(&mut self, sync: &SyncEngine<S>, room_id: &RoomId) -> bool {
        match sync.subscribe_room(room_id).await {
            Ok(feeds) => {
                self.feeds = Some(feeds);
                true
            }
            Err(e) => {
                warn!(room = %room_id, error = %e, "Failed to subscribe, staying local");
                self.feeds = None;
                self.ctx.leave_room();
                false
            }
        }
    }

    fn leave_current_room(&mut self) {
        if let Some(feeds) = self.feeds.take() {
            debug!(path = feeds.room.path(), "Leaving room");
        }
    }

    fn on_feed_closed(&mut self) {
        warn!("Room feed closed, continuing on local state");
        self.feeds = None;
        self.emit(SessionEvent::RoomLost);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Apply every feed value that has already arrived
    #[cfg(test)]
    fn drain_feeds(&mut self, now: Instant) {
        loop {
            let Some(feeds) = self.feeds.as_mut() else {
                return;
            };
            if let Some(value) = feeds.room.try_recv() {
                self.apply_room_value(value);
            } else if let Some(value) = feeds.spin.try_recv() {
                self.apply_spin_value(value, now);
            } else {
                return;
            }
        }
    }
}

/// Cloneable handle to a running session task
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Run the session on its own task
    pub fn spawn<S: RoomStore>(session: WheelSession<S>) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let task = tokio::spawn(session.run(cmd_rx));
        (Self { cmd_tx }, task)
    }

    pub async fn perform(&self, action: UserAction) -> Result<ActionOutcome> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand { action, reply })
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }
}

async fn next_update(feed: Option<&mut Subscription>) -> Option<Option<Value>> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
