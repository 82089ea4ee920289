//! Pending request tables keyed by action kind.
//!
//! Flow:
//! 1. The facade calls [`Correlator::issue`] with the caller's reply handle.
//! 2. Only if the issue succeeds is the outbound terminal call made.
//! 3. The event pump calls [`Correlator::resolve`] when the matching
//!    delegate callback arrives; the entry is removed and the reply is
//!    delivered exactly once.
//! 4. Entries the terminal never answers are expired by [`sweep_task`].

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{ActionKind, CorrelationTable},
    error::BridgeError,
    protocol::CommandReply,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Opaque caller-side destination for one reply.
pub trait ReplyTarget: Send + 'static {
    /// Returns `false` when the caller is no longer listening.
    fn deliver(self: Box<Self>, reply: CommandReply) -> bool;
}

impl ReplyTarget for oneshot::Sender<CommandReply> {
    fn deliver(self: Box<Self>, reply: CommandReply) -> bool {
        (*self).send(reply).is_ok()
    }
}

pub type ReplyHandle = Box<dyn ReplyTarget>;

/// Receives terminal-level failures; unlike a reply handle it may be used many times.
pub type ErrorSink = mpsc::UnboundedSender<BridgeError>;

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// Applied to kinds without an override; `None` disables expiry.
    pub default_timeout: Option<Duration>,
    pub kind_timeouts: HashMap<ActionKind, Duration>,
    pub sweep_interval: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            kind_timeouts: HashMap::from([(ActionKind::ScanAndConnect, DEFAULT_CONNECT_TIMEOUT)]),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl CorrelatorConfig {
    pub fn timeout_for(&self, kind: ActionKind) -> Option<Duration> {
        self.kind_timeouts
            .get(&kind)
            .copied()
            .or(self.default_timeout)
    }

    pub fn with_kind_timeout(mut self, kind: ActionKind, timeout: Duration) -> Self {
        self.kind_timeouts.insert(kind, timeout);
        self
    }
}

struct PendingRequest {
    request_id: Uuid,
    handle: ReplyHandle,
    issued_at: DateTime<Utc>,
    started: Instant,
    timeout: Option<Duration>,
}

impl PendingRequest {
    fn is_overdue(&self, now: Instant) -> bool {
        self.timeout
            .is_some_and(|timeout| now.saturating_duration_since(self.started) >= timeout)
    }
}

#[derive(Default)]
struct CorrelationTables {
    lifecycle: HashMap<ActionKind, PendingRequest>,
    commands: HashMap<ActionKind, PendingRequest>,
    error_sink: Option<ErrorSink>,
}

impl CorrelationTables {
    fn table(&self, kind: ActionKind) -> Option<&HashMap<ActionKind, PendingRequest>> {
        match kind.table() {
            CorrelationTable::Lifecycle => Some(&self.lifecycle),
            CorrelationTable::Command => Some(&self.commands),
            CorrelationTable::ErrorSink => None,
        }
    }

    fn table_mut(&mut self, kind: ActionKind) -> Option<&mut HashMap<ActionKind, PendingRequest>> {
        match kind.table() {
            CorrelationTable::Lifecycle => Some(&mut self.lifecycle),
            CorrelationTable::Command => Some(&mut self.commands),
            CorrelationTable::ErrorSink => None,
        }
    }

    fn drain_where(
        &mut self,
        mut evict: impl FnMut(ActionKind, &PendingRequest) -> bool,
    ) -> Vec<(ActionKind, PendingRequest)> {
        let mut drained = Vec::new();
        for table in [&mut self.lifecycle, &mut self.commands] {
            let kinds: Vec<ActionKind> = table
                .iter()
                .filter(|(kind, pending)| evict(**kind, *pending))
                .map(|(kind, _)| *kind)
                .collect();
            for kind in kinds {
                if let Some(pending) = table.remove(&kind) {
                    drained.push((kind, pending));
                }
            }
        }
        drained
    }
}

#[derive(Debug, Default)]
struct CorrelatorStats {
    issued: AtomicU64,
    resolved: AtomicU64,
    rejected_busy: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    aborted: AtomicU64,
    orphaned: AtomicU64,
    undeliverable: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub issued: u64,
    pub resolved: u64,
    pub rejected_busy: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub aborted: u64,
    /// Callbacks that arrived with no matching pending entry.
    pub orphaned: u64,
    /// Replies whose caller had already gone away.
    pub undeliverable: u64,
}

/// Owns the correlation tables for one terminal binding.
pub struct Correlator {
    tables: Mutex<CorrelationTables>,
    config: CorrelatorConfig,
    stats: CorrelatorStats,
}

impl Correlator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            tables: Mutex::new(CorrelationTables::default()),
            config,
            stats: CorrelatorStats::default(),
        }
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Registers a pending request using the configured timeout for `kind`.
    pub async fn issue(&self, kind: ActionKind, handle: ReplyHandle) -> Result<Uuid, BridgeError> {
        self.issue_with_timeout(kind, handle, None).await
    }

    /// Registers a pending request for `kind`.
    ///
    /// A kind that is already pending is rejected with `Busy`; the rejection
    /// is delivered on `handle` as well as returned, so the caller always
    /// observes exactly one result.
    pub async fn issue_with_timeout(
        &self,
        kind: ActionKind,
        handle: ReplyHandle,
        timeout: Option<Duration>,
    ) -> Result<Uuid, BridgeError> {
        let mut tables = self.tables.lock().await;
        let Some(table) = tables.table_mut(kind) else {
            drop(tables);
            let err = BridgeError::NotIssuable(kind);
            handle.deliver(Err(err.clone()));
            return Err(err);
        };

        if let Some(pending_id) = table.get(&kind).map(|pending| pending.request_id) {
            drop(tables);
            self.stats.rejected_busy.fetch_add(1, Ordering::Relaxed);
            warn!(
                kind = %kind,
                pending_request_id = %pending_id,
                "rejecting request; kind already pending"
            );
            let err = BridgeError::Busy(kind);
            handle.deliver(Err(err.clone()));
            return Err(err);
        }

        let request_id = Uuid::new_v4();
        let timeout = timeout.or_else(|| self.config.timeout_for(kind));
        table.insert(
            kind,
            PendingRequest {
                request_id,
                handle,
                issued_at: Utc::now(),
                started: Instant::now(),
                timeout,
            },
        );
        self.stats.issued.fetch_add(1, Ordering::Relaxed);

        debug!(
            kind = %kind,
            request_id = %request_id,
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            "registered pending request"
        );
        Ok(request_id)
    }

    /// Delivers `reply` to the caller pending on `kind`.
    ///
    /// Returns `false` when nothing was pending; such callbacks are logged
    /// and dropped.
    pub async fn resolve(&self, kind: ActionKind, reply: CommandReply) -> bool {
        let pending = {
            let mut tables = self.tables.lock().await;
            tables
                .table_mut(kind)
                .and_then(|table| table.remove(&kind))
        };

        let Some(pending) = pending else {
            self.stats.orphaned.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %kind, "dropping callback with no pending request");
            return false;
        };

        self.stats.resolved.fetch_add(1, Ordering::Relaxed);
        debug!(
            kind = %kind,
            request_id = %pending.request_id,
            issued_at = %pending.issued_at,
            elapsed_ms = pending.started.elapsed().as_millis() as u64,
            ok = reply.is_ok(),
            "resolved pending request"
        );
        self.deliver(kind, pending, reply);
        true
    }

    /// Forgets the entry for `kind` without replying.
    pub async fn cancel(&self, kind: ActionKind) -> bool {
        let removed = {
            let mut tables = self.tables.lock().await;
            tables
                .table_mut(kind)
                .and_then(|table| table.remove(&kind))
        };
        match removed {
            Some(pending) => {
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(kind = %kind, request_id = %pending.request_id, "cancelled pending request");
                true
            }
            None => false,
        }
    }

    /// Fails every pending entry except `keep` with `reason(kind)`.
    pub async fn abort_pending(
        &self,
        keep: Option<ActionKind>,
        reason: fn(ActionKind) -> BridgeError,
    ) -> usize {
        let drained = {
            let mut tables = self.tables.lock().await;
            tables.drain_where(|kind, _| Some(kind) != keep)
        };

        let count = drained.len();
        for (kind, pending) in drained {
            self.stats.aborted.fetch_add(1, Ordering::Relaxed);
            self.deliver(kind, pending, Err(reason(kind)));
        }
        if count > 0 {
            info!(aborted = count, "aborted pending requests");
        }
        count
    }

    /// Fails overdue entries with `Timeout` and frees their slots.
    pub async fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let expired = {
            let mut tables = self.tables.lock().await;
            tables.drain_where(|_, pending| pending.is_overdue(now))
        };

        let count = expired.len();
        for (kind, pending) in expired {
            let elapsed_ms = now.saturating_duration_since(pending.started).as_millis() as u64;
            self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
            warn!(
                kind = %kind,
                request_id = %pending.request_id,
                elapsed_ms,
                "pending request timed out"
            );
            self.deliver(kind, pending, Err(BridgeError::Timeout { kind, elapsed_ms }));
        }
        count
    }

    /// Installs the error sink; returns `true` when an earlier sink was replaced.
    pub async fn register_error_sink(&self, sink: ErrorSink) -> bool {
        let mut tables = self.tables.lock().await;
        let replaced = tables.error_sink.replace(sink).is_some();
        debug!(replaced, "registered error sink");
        replaced
    }

    pub async fn has_error_sink(&self) -> bool {
        self.tables.lock().await.error_sink.is_some()
    }

    /// Forwards a terminal-level failure to the error sink, if any.
    /// Pending entries are untouched.
    pub async fn report(&self, error: BridgeError) -> bool {
        let mut tables = self.tables.lock().await;
        let Some(sink) = tables.error_sink.clone() else {
            debug!(error = %error, "no error sink registered; dropping report");
            return false;
        };
        if sink.send(error).is_err() {
            debug!("error sink receiver dropped; unregistering");
            tables.error_sink = None;
            return false;
        }
        true
    }

    pub async fn is_pending(&self, kind: ActionKind) -> bool {
        let tables = self.tables.lock().await;
        tables
            .table(kind)
            .is_some_and(|table| table.contains_key(&kind))
    }

    pub async fn pending_kinds(&self) -> Vec<ActionKind> {
        let tables = self.tables.lock().await;
        ActionKind::ALL
            .into_iter()
            .filter(|kind| {
                tables
                    .table(*kind)
                    .is_some_and(|table| table.contains_key(kind))
            })
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        let tables = self.tables.lock().await;
        tables.lifecycle.len() + tables.commands.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            issued: self.stats.issued.load(Ordering::Relaxed),
            resolved: self.stats.resolved.load(Ordering::Relaxed),
            rejected_busy: self.stats.rejected_busy.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
            aborted: self.stats.aborted.load(Ordering::Relaxed),
            orphaned: self.stats.orphaned.load(Ordering::Relaxed),
            undeliverable: self.stats.undeliverable.load(Ordering::Relaxed),
        }
    }

    fn deliver(&self, kind: ActionKind, pending: PendingRequest, reply: CommandReply) {
        if !pending.handle.deliver(reply) {
            self.stats.undeliverable.fetch_add(1, Ordering::Relaxed);
            debug!(
                kind = %kind,
                request_id = %pending.request_id,
                "caller stopped listening before reply"
            );
        }
    }
}

/// Shortest period the sweep runs at; a zero interval is raised to this.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically expires overdue entries until the task is aborted.
pub async fn sweep_task(correlator: Arc<Correlator>) {
    let period = correlator.config().sweep_interval.max(MIN_SWEEP_INTERVAL);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let expired = correlator.expire_overdue().await;
        if expired > 0 {
            debug!(expired, "expired overdue pending requests");
        }
    }
}

#[cfg(test)]
#[path = "tests/correlator_tests.rs"]
mod tests;
