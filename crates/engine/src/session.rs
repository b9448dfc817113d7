// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming sessions
//!
//! A session holds one slot, reads the log from the slot's resume point,
//! decodes it through one publication and pushes committed batches to a
//! consumer channel in commit order. Acknowledgments move the slot forward
//! from the caller's context through [`SessionHandle::ack`].

use crate::decoder::{DecodeError, Decoder, DecoderConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tm_adapters::{BaselineSource, ChannelError, ConsumerChannel};
use tm_core::{
    BatchKind, ChangeBatch, ChangeOp, CloseReason, DecodedChange, ErrorKind, HolderId, Publication,
    RetentionSlot, Seq, SessionId, SessionState, SlotError, SlotKind, TxnId,
};
use tm_storage::{LogStore, SlotRegistry, StorageError};
use tokio::sync::{mpsc, watch};

/// Tunables for one streaming session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Fallback wake-up while waiting for new records
    pub poll_interval: Duration,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    /// How far a physical slot's restart trails its confirmed position
    pub physical_lag_window: u64,
    /// Send a baseline snapshot before streaming a fresh slot
    pub initial_sync: bool,
    pub decoder: DecoderConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            retry_initial_backoff: Duration::from_millis(50),
            retry_max_backoff: Duration::from_secs(5),
            physical_lag_window: 0,
            initial_sync: true,
            decoder: DecoderConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial_backoff = initial;
        self.retry_max_backoff = max.max(initial);
        self
    }

    pub fn with_physical_lag_window(mut self, lag: u64) -> Self {
        self.physical_lag_window = lag;
        self
    }

    pub fn with_initial_sync(mut self, enabled: bool) -> Self {
        self.initial_sync = enabled;
        self
    }

    pub fn with_decoder(mut self, decoder: DecoderConfig) -> Self {
        self.decoder = decoder;
        self
    }
}

/// Operator commands, applied between batch deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("slot {slot} needs seq {needed} but the oldest retained seq is {oldest}")]
    SlotTooFarBehind {
        slot: String,
        needed: Seq,
        oldest: Seq,
    },
    #[error("ack {seq} is ahead of the last delivered commit {last_sent}")]
    AckAhead { seq: Seq, last_sent: Seq },
    #[error("session {0} is closed")]
    Closed(SessionId),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Storage(e) => e.kind(),
            SessionError::SlotTooFarBehind { .. } => ErrorKind::SlotTooFarBehind,
            SessionError::AckAhead { .. } => ErrorKind::InvalidArgument,
            SessionError::Closed(_) => ErrorKind::SessionNotFound,
        }
    }
}

/// Read-only view of a session for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub slot: String,
    pub publication: String,
    pub state: SessionState,
    /// Commit seq of the last batch handed to the channel
    pub last_sent: Seq,
    /// Last acknowledged commit seq
    pub confirmed: Seq,
    pub batches_sent: u64,
    pub changes_sent: u64,
    pub retries: u64,
    pub started_at: DateTime<Utc>,
}

/// Collaborators a session is built from
pub struct SessionDeps<Ch, B> {
    pub store: Arc<LogStore>,
    pub registry: Arc<SlotRegistry>,
    pub channel: Ch,
    pub baseline: B,
}

#[derive(Debug)]
struct Progress {
    last_sent: Seq,
    confirmed: Seq,
    /// Restart floor of each delivered, unacknowledged commit
    floors: BTreeMap<Seq, Seq>,
    batches_sent: u64,
    changes_sent: u64,
    retries: u64,
}

struct Shared {
    id: SessionId,
    holder: HolderId,
    slot: String,
    kind: SlotKind,
    publication: String,
    lag_window: u64,
    started_at: DateTime<Utc>,
    registry: Arc<SlotRegistry>,
    state: watch::Sender<SessionState>,
    progress: Mutex<Progress>,
}

impl Shared {
    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Release the slot, then publish CLOSED; a closed session is left as is
    fn close(&self, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.registry.release(&self.slot, &self.holder) {
            tracing::warn!(slot = %self.slot, error = %e, "failed to release slot");
        }
        self.state.send_replace(SessionState::Closed {
            reason: reason.clone(),
        });
        let progress = self.progress();
        tracing::info!(
            session = %self.id,
            slot = %self.slot,
            ?reason,
            batches = progress.batches_sent,
            confirmed = %progress.confirmed,
            "session closed"
        );
    }
}

/// Operator-side handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("slot", &self.shared.slot)
            .field("state", &*self.shared.state.borrow())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    pub fn slot(&self) -> &str {
        &self.shared.slot
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn info(&self) -> SessionInfo {
        let progress = self.shared.progress();
        SessionInfo {
            id: self.shared.id.clone(),
            slot: self.shared.slot.clone(),
            publication: self.shared.publication.clone(),
            state: self.state(),
            last_sent: progress.last_sent,
            confirmed: progress.confirmed,
            batches_sent: progress.batches_sent,
            changes_sent: progress.changes_sent,
            retries: progress.retries,
            started_at: self.shared.started_at,
        }
    }

    /// Consumer acknowledged everything up to `seq`.
    ///
    /// The slot advance is durable when this returns. Acks at or below the
    /// already confirmed position are accepted and change nothing.
    pub fn ack(&self, seq: Seq) -> Result<RetentionSlot, SessionError> {
        let shared = &self.shared;
        let mut progress = shared.progress();
        if shared.is_closed() {
            return Err(SessionError::Closed(shared.id.clone()));
        }
        let current = shared
            .registry
            .get(&shared.slot)
            .ok_or_else(|| StorageError::from(SlotError::SlotNotFound(shared.slot.clone())))?;
        if seq <= progress.confirmed {
            return Ok(current);
        }
        if seq > progress.last_sent {
            return Err(SessionError::AckAhead {
                seq,
                last_sent: progress.last_sent,
            });
        }

        let floor = progress
            .floors
            .range(..=seq)
            .next_back()
            .map_or(current.restart_seq, |(_, floor)| *floor);
        let target = match shared.kind {
            SlotKind::Logical => floor,
            SlotKind::Physical => floor.min(seq.saturating_sub(shared.lag_window)),
        };
        let restart = target.max(current.restart_seq).min(seq);
        let advanced = shared.registry.advance(&shared.slot, restart, seq)?;

        progress.confirmed = seq;
        progress.floors = progress.floors.split_off(&seq.next());
        tracing::debug!(
            session = %shared.id,
            slot = %shared.slot,
            %restart,
            confirmed = %seq,
            "ack applied"
        );
        Ok(advanced)
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Pause)
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Resume)
    }

    pub fn stop(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Stop)
    }

    fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed(self.shared.id.clone()));
        }
        self.commands
            .send(command)
            .map_err(|_| SessionError::Closed(self.shared.id.clone()))
    }

    /// Wait until the session reaches CLOSED and return why
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.shared.state.subscribe();
        let result = rx.wait_for(|s| s.is_terminal()).await.map(|s| s.clone());
        match result {
            Ok(SessionState::Closed { reason }) => reason,
            _ => CloseReason::Stopped,
        }
    }
}

type Step<T> = Result<T, CloseReason>;

enum Wake {
    Appended,
    Command(Option<SessionCommand>),
    Tick,
}

/// The session task; consume it with [`StreamingSession::run`]
pub struct StreamingSession<Ch, B> {
    shared: Arc<Shared>,
    store: Arc<LogStore>,
    publication: Arc<Publication>,
    channel: Ch,
    baseline: B,
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    tail: watch::Receiver<Seq>,
    /// Explicit operator pause, as opposed to backpressure
    paused: bool,
}

impl<Ch, B> StreamingSession<Ch, B>
where
    Ch: ConsumerChannel,
    B: BaselineSource,
{
    /// INIT: take the slot and check the log still holds its resume point.
    ///
    /// The slot is released again if the check fails.
    pub fn start(
        id: SessionId,
        slot: &str,
        publication: Arc<Publication>,
        deps: SessionDeps<Ch, B>,
        config: SessionConfig,
        started_at: DateTime<Utc>,
    ) -> Result<(Self, SessionHandle), SessionError> {
        let holder = HolderId::new(id.0.clone());
        let acquired = deps.registry.acquire(slot, &holder)?;

        let needed = acquired.resume_seq().max(Seq(1));
        let oldest = deps.store.oldest_seq();
        if needed < oldest {
            if let Err(e) = deps.registry.release(slot, &holder) {
                tracing::warn!(slot, error = %e, "failed to release slot after init");
            }
            tracing::error!(session = %id, slot, %needed, %oldest, "slot too far behind");
            return Err(SessionError::SlotTooFarBehind {
                slot: slot.to_string(),
                needed,
                oldest,
            });
        }

        let (state, _) = watch::channel(SessionState::Init);
        let shared = Arc::new(Shared {
            id: id.clone(),
            holder,
            slot: slot.to_string(),
            kind: acquired.kind,
            publication: publication.name.clone(),
            lag_window: config.physical_lag_window,
            started_at,
            registry: deps.registry,
            state,
            progress: Mutex::new(Progress {
                last_sent: acquired.confirmed_seq,
                confirmed: acquired.confirmed_seq,
                floors: BTreeMap::new(),
                batches_sent: 0,
                changes_sent: 0,
                retries: 0,
            }),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let tail = deps.store.subscribe();
        tracing::info!(
            session = %id,
            slot,
            publication = %publication.name,
            resume = %needed,
            "session started"
        );

        let session = Self {
            shared: Arc::clone(&shared),
            store: deps.store,
            publication,
            channel: deps.channel,
            baseline: deps.baseline,
            config,
            commands: rx,
            tail,
            paused: false,
        };
        let handle = SessionHandle {
            shared,
            commands: tx,
        };
        Ok((session, handle))
    }

    /// Stream until stopped or failed; the slot is released on the way out
    pub async fn run(mut self) -> CloseReason {
        let reason = self.drive().await;
        self.close(reason.clone());
        reason
    }

    async fn drive(&mut self) -> CloseReason {
        let Some(slot) = self.shared.registry.get(&self.shared.slot) else {
            return CloseReason::Failed {
                kind: ErrorKind::SlotNotFound,
                message: format!("slot {} disappeared", self.shared.slot),
            };
        };

        if self.config.initial_sync && slot.needs_initial_sync() {
            if let Err(reason) = self.catchup(&slot).await {
                return reason;
            }
        }
        self.set_state(SessionState::Streaming);
        if self.paused {
            self.set_state(SessionState::Paused);
        }
        match self.stream(slot.resume_seq(), slot.confirmed_seq).await {
            Err(reason) => reason,
            Ok(never) => match never {},
        }
    }

    async fn catchup(&mut self, slot: &RetentionSlot) -> Step<()> {
        self.set_state(SessionState::Catchup);
        let as_of = slot.created_seq;
        let rows = self
            .baseline
            .snapshot(&self.publication.entities, as_of)
            .await
            .map_err(|e| self.fail(e.kind(), e.to_string()))?;

        let changes: Vec<DecodedChange> = rows
            .into_iter()
            .filter(|r| self.publication.entities.contains(&r.entity))
            .map(|r| DecodedChange {
                entity: r.entity,
                operation: ChangeOp::Insert,
                before_image: None,
                after_image: Some(r.row),
                commit_seq: as_of,
                transaction_id: TxnId::SNAPSHOT,
                origin: None,
            })
            .collect();
        tracing::info!(
            session = %self.shared.id,
            %as_of,
            rows = changes.len(),
            "sending baseline"
        );
        self.deliver(ChangeBatch {
            kind: BatchKind::Snapshot,
            xid: TxnId::SNAPSHOT,
            commit_seq: as_of,
            restart_floor: slot.restart_seq.min(as_of),
            changes,
        })
        .await
    }

    async fn stream(&mut self, from: Seq, skip_through: Seq) -> Step<std::convert::Infallible> {
        let mut decoder = Decoder::new(Arc::clone(&self.publication), self.config.decoder.clone());
        let mut next = from;
        loop {
            self.poll_commands()?;
            self.hold().await?;

            let reader = self
                .store
                .read(next)
                .map_err(|e| self.storage_failure(e))?;
            let upper = reader.upper_bound();
            for item in reader {
                let record = item.map_err(|e| self.storage_failure(e))?;
                next = record.seq.next();
                let decoded = decoder
                    .decode(&record)
                    .map_err(|e| self.decode_failure(e))?;
                let Some(batch) = decoded else {
                    continue;
                };
                if batch.commit_seq <= skip_through {
                    continue;
                }
                self.deliver(batch).await?;
                self.poll_commands()?;
                if self.paused {
                    break;
                }
            }

            if next > upper {
                self.wait_for_tail(upper).await?;
            }
        }
    }

    /// Push one batch, retrying backpressure and transient failures
    async fn deliver(&mut self, batch: ChangeBatch) -> Step<()> {
        self.stage(&batch);
        let mut backoff = self.config.retry_initial_backoff;
        loop {
            match self.channel.send(&batch).await {
                Ok(()) => {
                    self.record_sent(&batch);
                    if !self.paused && *self.shared.state.borrow() == SessionState::Paused {
                        self.set_state(SessionState::Streaming);
                    }
                    return Ok(());
                }
                Err(ChannelError::Closed) => {
                    tracing::info!(session = %self.shared.id, "consumer went away");
                    return Err(CloseReason::ConsumerGone);
                }
                Err(ChannelError::Full) => {
                    tracing::debug!(
                        session = %self.shared.id,
                        commit_seq = %batch.commit_seq,
                        "consumer backpressure"
                    );
                    self.set_state(SessionState::Paused);
                }
                Err(ChannelError::Io(message)) => {
                    tracing::warn!(
                        session = %self.shared.id,
                        commit_seq = %batch.commit_seq,
                        error = %message,
                        backoff_ms = backoff.as_millis() as u64,
                        "channel io error, retrying"
                    );
                }
            }
            self.shared.progress().retries += 1;
            self.backoff(backoff).await?;
            self.hold().await?;
            backoff = (backoff * 2).min(self.config.retry_max_backoff);
        }
    }

    /// Make the batch ackable before the consumer can see it
    fn stage(&self, batch: &ChangeBatch) {
        let mut progress = self.shared.progress();
        progress.last_sent = batch.commit_seq;
        progress.floors.insert(batch.commit_seq, batch.restart_floor);
    }

    fn record_sent(&self, batch: &ChangeBatch) {
        let mut progress = self.shared.progress();
        progress.batches_sent += 1;
        progress.changes_sent += batch.len() as u64;
    }

    async fn backoff(&mut self, wait: Duration) -> Step<()> {
        let woke = tokio::select! {
            command = self.commands.recv() => Wake::Command(command),
            _ = tokio::time::sleep(wait) => Wake::Tick,
        };
        self.wake(woke)
    }

    async fn wait_for_tail(&mut self, seen: Seq) -> Step<()> {
        if *self.tail.borrow_and_update() > seen {
            return Ok(());
        }
        let woke = tokio::select! {
            changed = self.tail.changed() => match changed {
                Ok(()) => Wake::Appended,
                Err(_) => Wake::Tick,
            },
            command = self.commands.recv() => Wake::Command(command),
            _ = tokio::time::sleep(self.config.poll_interval) => Wake::Tick,
        };
        self.wake(woke)
    }

    fn wake(&mut self, woke: Wake) -> Step<()> {
        match woke {
            Wake::Appended | Wake::Tick => Ok(()),
            Wake::Command(Some(command)) => self.apply(command),
            Wake::Command(None) => Err(CloseReason::Stopped),
        }
    }

    /// Apply queued commands without waiting
    fn poll_commands(&mut self) -> Step<()> {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.apply(command)?,
                Err(mpsc::error::TryRecvError::Empty) => return Ok(()),
                Err(mpsc::error::TryRecvError::Disconnected) => return Err(CloseReason::Stopped),
            }
        }
    }

    /// Block while explicitly paused
    async fn hold(&mut self) -> Step<()> {
        while self.paused {
            match self.commands.recv().await {
                Some(command) => self.apply(command)?,
                None => return Err(CloseReason::Stopped),
            }
        }
        Ok(())
    }

    fn apply(&mut self, command: SessionCommand) -> Step<()> {
        tracing::info!(session = %self.shared.id, ?command, "session command");
        match command {
            SessionCommand::Stop => return Err(CloseReason::Stopped),
            SessionCommand::Pause => {
                self.paused = true;
                self.set_state(SessionState::Paused);
            }
            SessionCommand::Resume => {
                self.paused = false;
                self.set_state(SessionState::Streaming);
            }
        }
        Ok(())
    }

    fn set_state(&self, next: SessionState) {
        let current = self.shared.state.borrow().clone();
        if current == next {
            return;
        }
        if !current.can_transition_to(&next) {
            tracing::debug!(
                session = %self.shared.id,
                from = %current,
                to = %next,
                "ignoring state change"
            );
            return;
        }
        tracing::debug!(session = %self.shared.id, from = %current, to = %next, "session state");
        self.shared.state.send_replace(next);
    }

    fn fail(&self, kind: ErrorKind, message: String) -> CloseReason {
        tracing::error!(session = %self.shared.id, slot = %self.shared.slot, %kind, %message, "session failed");
        CloseReason::Failed { kind, message }
    }

    fn storage_failure(&self, err: StorageError) -> CloseReason {
        let kind = match err.kind() {
            ErrorKind::Corrupted => ErrorKind::DecodeCorruption,
            other => other,
        };
        self.fail(kind, err.to_string())
    }

    fn decode_failure(&self, err: DecodeError) -> CloseReason {
        self.fail(err.kind(), err.to_string())
    }

    fn close(&mut self, reason: CloseReason) {
        self.shared.close(reason);
    }
}

/// A session dropped before `run` finished, e.g. its task was aborted,
/// still gives its slot back
impl<Ch, B> Drop for StreamingSession<Ch, B> {
    fn drop(&mut self) {
        if !self.shared.is_closed() {
            tracing::warn!(session = %self.shared.id, slot = %self.shared.slot, "session dropped while open");
            self.shared.close(CloseReason::Stopped);
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
