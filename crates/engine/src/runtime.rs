// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime that ties the log, slots, publications, sessions and
//! maintenance together behind the operator interface

use crate::decoder::OpenTransactions;
use crate::error::RuntimeError;
use crate::maintenance::{MaintenanceConfig, MaintenanceHandle, MaintenanceWorker, PassReport};
use crate::monitor::MonitorSnapshot;
use crate::session::{SessionConfig, SessionDeps, SessionHandle, SessionInfo, StreamingSession};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tm_adapters::{
    BaselineSource, ConsumerChannel, DeadRowScanner, MpscChannel, TracedBaseline, TracedChannel,
    TracedScanner,
};
use tm_core::{
    ChangeBatch, Clock, CloseReason, IdGen, Publication, RecordKind, RetentionSlot, RowChange, Seq,
    SessionId, SlotKind, TxnId, TxnMarker,
};
use tm_storage::{LogStore, PublicationCatalog, SlotRegistry};
use tokio::sync::mpsc;

/// Runtime tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub session: SessionConfig,
    pub maintenance: MaintenanceConfig,
    /// Undelivered batches buffered per in-process subscriber
    pub channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            maintenance: MaintenanceConfig::default(),
            channel_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = maintenance;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Runtime dependencies; stores are opened by the caller
pub struct RuntimeDeps<S, B> {
    pub store: Arc<LogStore>,
    pub registry: Arc<SlotRegistry>,
    pub publications: Arc<PublicationCatalog>,
    pub scanner: S,
    pub baseline: B,
}

/// Operator facade over one data directory
pub struct Runtime<S, B, C: Clock, I: IdGen> {
    store: Arc<LogStore>,
    registry: Arc<SlotRegistry>,
    publications: Arc<PublicationCatalog>,
    baseline: TracedBaseline<B>,
    maintenance: MaintenanceWorker<TracedScanner<S>, C>,
    clock: C,
    id_gen: I,
    config: RuntimeConfig,
    sessions: Mutex<BTreeMap<SessionId, SessionHandle>>,
    next_xid: AtomicU64,
}

impl<S, B, C, I> Runtime<S, B, C, I>
where
    S: DeadRowScanner,
    B: BaselineSource,
    C: Clock,
    I: IdGen,
{
    pub fn new(deps: RuntimeDeps<S, B>, config: RuntimeConfig, clock: C, id_gen: I) -> Self {
        let maintenance = MaintenanceWorker::new(
            TracedScanner::new(deps.scanner),
            Arc::clone(&deps.store),
            Arc::clone(&deps.registry),
            config.maintenance.clone(),
            clock.clone(),
        );
        let next_xid = AtomicU64::new(deps.store.last_seq().next().as_u64());
        Self {
            store: deps.store,
            registry: deps.registry,
            publications: deps.publications,
            baseline: TracedBaseline::new(deps.baseline),
            maintenance,
            clock,
            id_gen,
            config,
            sessions: Mutex::new(BTreeMap::new()),
            next_xid,
        }
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SlotRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn sessions_lock(&self) -> MutexGuard<'_, BTreeMap<SessionId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn session(&self, id: &SessionId) -> Result<SessionHandle, RuntimeError> {
        self.sessions_lock()
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::SessionNotFound(id.clone()))
    }

    // -- slots --

    /// Create a slot positioned at the current end of the log.
    ///
    /// Transactions still open at that point are delivered whole once they
    /// commit, so the slot's restart point is moved back to the first record
    /// of the oldest of them.
    pub fn create_slot(&self, name: &str, kind: SlotKind) -> Result<RetentionSlot, RuntimeError> {
        let reader = self.store.read(self.store.oldest_seq())?;
        let start = reader.upper_bound();
        let mut open = OpenTransactions::new();
        for record in reader {
            open.observe(&record?)?;
        }
        let restart = open.earliest().unwrap_or(start);

        // Keep the restart point readable until the slot itself retains it
        let _pin = match open.earliest() {
            Some(first) => {
                tracing::debug!(slot = name, %first, %start, open = open.len(), "slot starts inside open transactions");
                Some(self.store.read(first)?)
            }
            None => None,
        };
        Ok(self
            .registry
            .create_with_restart(name, kind, restart, start, self.clock.now())?)
    }

    pub fn drop_slot(&self, name: &str) -> Result<RetentionSlot, RuntimeError> {
        Ok(self.registry.drop_slot(name)?)
    }

    pub fn list_slots(&self) -> Vec<RetentionSlot> {
        self.registry.list()
    }

    // -- publications --

    pub fn create_publication(
        &self,
        publication: Publication,
    ) -> Result<Arc<Publication>, RuntimeError> {
        Ok(self.publications.create(publication)?)
    }

    /// Replace a publication; running sessions keep the definition they started with
    pub fn alter_publication(
        &self,
        publication: Publication,
    ) -> Result<Arc<Publication>, RuntimeError> {
        Ok(self.publications.alter(publication)?)
    }

    pub fn drop_publication(&self, name: &str) -> Result<(), RuntimeError> {
        Ok(self.publications.drop_publication(name)?)
    }

    pub fn list_publications(&self) -> Vec<Arc<Publication>> {
        self.publications.list()
    }

    // -- sessions --

    /// Start streaming `slot` through `publication` into `channel`.
    ///
    /// Fails synchronously when the slot is missing, busy or too far
    /// behind; later failures close the session.
    pub fn start_session<Ch: ConsumerChannel>(
        &self,
        slot: &str,
        publication: &str,
        channel: Ch,
    ) -> Result<SessionHandle, RuntimeError> {
        let publication = self.publications.get(publication)?;
        let id = self.id_gen.session_id();
        let deps = SessionDeps {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            channel: TracedChannel::new(channel),
            baseline: self.baseline.clone(),
        };
        let (session, handle) = StreamingSession::start(
            id.clone(),
            slot,
            publication,
            deps,
            self.config.session.clone(),
            self.clock.now(),
        )?;
        tokio::spawn(session.run());

        let mut sessions = self.sessions_lock();
        sessions.retain(|_, h| !h.is_closed());
        sessions.insert(id, handle.clone());
        Ok(handle)
    }

    /// Start a session that delivers into a bounded in-process queue
    pub fn subscribe(
        &self,
        slot: &str,
        publication: &str,
    ) -> Result<(SessionHandle, mpsc::Receiver<ChangeBatch>), RuntimeError> {
        let (channel, rx) = MpscChannel::pair(self.config.channel_capacity);
        let handle = self.start_session(slot, publication, channel)?;
        Ok((handle, rx))
    }

    /// Consumer acknowledgment; durable when this returns
    pub fn advance_ack(&self, session: &SessionId, seq: Seq) -> Result<RetentionSlot, RuntimeError> {
        Ok(self.session(session)?.ack(seq)?)
    }

    pub fn pause_session(&self, session: &SessionId) -> Result<(), RuntimeError> {
        Ok(self.session(session)?.pause()?)
    }

    pub fn resume_session(&self, session: &SessionId) -> Result<(), RuntimeError> {
        Ok(self.session(session)?.resume()?)
    }

    /// Stop a session and wait until its slot is released
    pub async fn stop_session(&self, session: &SessionId) -> Result<CloseReason, RuntimeError> {
        let handle = self.session(session)?;
        if !handle.is_closed() {
            handle.stop()?;
        }
        Ok(handle.closed().await)
    }

    pub fn session_info(&self, session: &SessionId) -> Result<SessionInfo, RuntimeError> {
        Ok(self.session(session)?.info())
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions_lock().values().map(SessionHandle::info).collect()
    }

    // -- producer --

    /// Fresh transaction id, always above every sequence in the log
    pub fn allocate_xid(&self) -> TxnId {
        let floor = self.store.last_seq().next().as_u64();
        let prev = self
            .next_xid
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.max(floor) + 1)
            })
            .unwrap_or(floor);
        TxnId(prev.max(floor))
    }

    /// Append a whole transaction: its changes, then the commit marker.
    ///
    /// Every change is stamped with the transaction id. Returns the id and
    /// the commit sequence.
    pub fn append_transaction(
        &self,
        xid: Option<TxnId>,
        changes: Vec<RowChange>,
    ) -> Result<(TxnId, Seq), RuntimeError> {
        let xid = match xid {
            Some(xid) => checked_xid(xid)?,
            None => self.allocate_xid(),
        };
        let mut records = data_records(xid, changes)?;
        records.push((RecordKind::Commit, TxnMarker { xid }.encode()?));

        let seqs = self.store.append_batch(records)?;
        let commit = seqs.last().copied().unwrap_or(Seq::ZERO);
        tracing::debug!(%xid, %commit, records = seqs.len(), "transaction appended");
        Ok((xid, commit))
    }

    /// Append changes to a transaction that stays open; nothing is written
    /// unless every change is valid. Returns the last sequence written.
    pub fn append_open(&self, xid: TxnId, changes: Vec<RowChange>) -> Result<Seq, RuntimeError> {
        let xid = checked_xid(xid)?;
        if changes.is_empty() {
            return Err(RuntimeError::InvalidArgument(format!(
                "no changes to append to open transaction {}",
                xid
            )));
        }
        let seqs = self.store.append_batch(data_records(xid, changes)?)?;
        Ok(seqs.last().copied().unwrap_or(Seq::ZERO))
    }

    /// Append one change of a transaction that commits later
    pub fn append_change(&self, change: RowChange) -> Result<Seq, RuntimeError> {
        checked_xid(change.xid)?;
        validate_change(&change)?;
        Ok(self.store.append(change.encode()?, RecordKind::Data)?)
    }

    pub fn commit_transaction(&self, xid: TxnId) -> Result<Seq, RuntimeError> {
        let xid = checked_xid(xid)?;
        Ok(self
            .store
            .append(TxnMarker { xid }.encode()?, RecordKind::Commit)?)
    }

    /// Write the rollback marker; the transaction's changes are never delivered
    pub fn abort_transaction(&self, xid: TxnId) -> Result<Seq, RuntimeError> {
        let xid = checked_xid(xid)?;
        let seq = self
            .store
            .append(TxnMarker { xid }.encode()?, RecordKind::Abort)?;
        tracing::debug!(%xid, %seq, "transaction aborted");
        Ok(seq)
    }

    // -- maintenance & monitoring --

    pub async fn run_maintenance_pass(&self) -> Result<PassReport, RuntimeError> {
        Ok(self.maintenance.run_pass().await?)
    }

    /// Start the periodic maintenance loop
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        self.maintenance.clone().spawn()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot::new(
            self.clock.now(),
            self.store.stats(),
            &self.registry.list(),
            self.sessions(),
            self.maintenance.cost_snapshots(),
            self.maintenance.last_pass(),
        )
    }

    /// Stop every open session and wait for their slots to be released.
    /// Returns how many sessions were stopped.
    pub async fn stop_sessions(&self) -> usize {
        let handles: Vec<SessionHandle> = self.sessions_lock().values().cloned().collect();
        let mut stopped = 0;
        for handle in &handles {
            if handle.stop().is_ok() {
                handle.closed().await;
                stopped += 1;
            }
        }
        stopped
    }

    /// Stop every session, then make registry and log durable
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let stopped = self.stop_sessions().await;
        self.registry.flush()?;
        self.store.sync()?;
        tracing::info!(sessions = stopped, "runtime shut down");
        Ok(())
    }
}

/// Validate and stamp every change with `xid`, encoded as DATA records
fn data_records(
    xid: TxnId,
    changes: Vec<RowChange>,
) -> Result<Vec<(RecordKind, Vec<u8>)>, RuntimeError> {
    let mut records = Vec::with_capacity(changes.len() + 1);
    for mut change in changes {
        validate_change(&change)?;
        change.xid = xid;
        records.push((RecordKind::Data, change.encode()?));
    }
    Ok(records)
}

/// Xid 0 marks snapshot batches and never names a producer transaction
fn checked_xid(xid: TxnId) -> Result<TxnId, RuntimeError> {
    if xid == TxnId::SNAPSHOT {
        return Err(RuntimeError::InvalidArgument(format!(
            "transaction id {} is reserved for snapshot batches",
            xid
        )));
    }
    Ok(xid)
}

fn validate_change(change: &RowChange) -> Result<(), RuntimeError> {
    if change.entity.trim().is_empty() {
        return Err(RuntimeError::InvalidArgument(
            "change has an empty entity name".to_string(),
        ));
    }
    if change.op.requires_identity() && change.before.is_none() {
        return Err(RuntimeError::InvalidArgument(format!(
            "{} on {} needs a before image",
            change.op, change.entity
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
