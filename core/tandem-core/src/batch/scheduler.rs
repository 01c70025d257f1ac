//! The deferred write scheduler.
//!
//! Deferred backends hand writes to a scheduler instead of the driver.
//! A background worker polls a [`FlushClock`]; each flush cycle drains
//! the queue, coalesces jobs targeting the same record down to the last
//! one, and sends slices of at most `batch_size` statements to the
//! driver in one round trip each. Queries are materialized at flush
//! time from the record's current state, so a record written five times
//! between flushes produces exactly one statement carrying the final
//! values.
//!
//! `enqueue` hands back a per-job completion channel; the same outcome
//! is broadcast on the record's "updated" channel. Jobs coalesced away
//! pass their senders to the surviving job, so every enqueue observes
//! the final outcome.
//!
//! A failed batch is not abandoned: once every slice of the cycle has
//! been attempted, each job of the failed slices is retried once
//! individually, which isolates a poisoned statement to its own record.
//! A job that fails its individual retry is dropped and its channels
//! are notified with the error.

use crate::batch::job::PendingWrite;
use crate::batch::strategy::{FlushClock, FlushStrategy};
use crate::error::TandemError;
use crate::query::Query;
use crate::record::{Record, UpdateEvent};
use crate::store::StoreDriver;
use crate::store::sql::{WriteOp, build_record_query, finalize_persist};
use crate::value::Row;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Worker poll granularity. The flush cadence itself comes from the
/// strategy; this only bounds how stale the clock check can be.
const WORKER_TICK: Duration = Duration::from_millis(10);

/// One record due for persistence in the current cycle, carrying the
/// completion senders of every job that coalesced into it.
#[derive(Clone)]
struct CoalescedWrite {
    record: Record,
    completions: Vec<Sender<UpdateEvent>>,
}

impl CoalescedWrite {
    /// Delivers the outcome to each per-job channel and to the record's
    /// "updated" subscribers.
    fn notify(&self, result: Result<(), TandemError>) {
        for tx in &self.completions {
            let _ = tx.send(UpdateEvent {
                model: self.record.model().name.clone(),
                result: result.clone(),
            });
        }
        self.record.emit_updated(result);
    }
}

type PreparedJob = (CoalescedWrite, Query, Row, u64, WriteOp);

/// Write-coalescing batch scheduler for one store connection.
pub struct DeferredWriteScheduler {
    driver: Arc<dyn StoreDriver>,
    batch_size: usize,
    queue: Mutex<VecDeque<PendingWrite>>,
    running: AtomicBool,
    /// Guards against re-entrant flush cycles from overlapping ticks.
    flushing: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeferredWriteScheduler {
    /// Spawns the worker thread and returns the running scheduler.
    pub fn start(
        driver: Arc<dyn StoreDriver>,
        batch_size: usize,
        strategy: FlushStrategy,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            driver,
            batch_size,
            queue: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(true),
            flushing: AtomicBool::new(false),
            worker: Mutex::new(None),
        });
        let worker = {
            let scheduler = scheduler.clone();
            let mut clock = FlushClock::new(strategy);
            thread::spawn(move || {
                while scheduler.running.load(Ordering::SeqCst) {
                    if clock.should_fire() {
                        scheduler.flush();
                    }
                    thread::sleep(WORKER_TICK);
                }
            })
        };
        *scheduler.worker.lock() = Some(worker);
        scheduler
    }

    /// Enqueues a write for the record's current (and future) state.
    /// Returns the receiving half of this job's completion channel; the
    /// outcome is also broadcast on the record's "updated" channel.
    pub fn enqueue(&self, record: &Record) -> Receiver<UpdateEvent> {
        let (job, rx) = PendingWrite::new(record);
        self.queue.lock().push_back(job);
        rx
    }

    /// Number of jobs waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs one full flush cycle, repeating until the queue is empty.
    /// An empty queue is a no-op; a cycle already in progress is not
    /// entered twice.
    pub fn flush(&self) {
        if self.flushing.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let jobs: Vec<PendingWrite> = {
                let mut queue = self.queue.lock();
                queue.drain(..).collect()
            };
            if jobs.is_empty() {
                break;
            }
            let writes = coalesce(jobs);
            debug!(
                driver = self.driver.name(),
                records = writes.len(),
                "flushing deferred writes"
            );
            let mut failed: Vec<PreparedJob> = Vec::new();
            for slice in writes.chunks(self.batch_size) {
                failed.extend(self.flush_slice(slice));
            }
            // The retry pass runs only after every slice of the cycle
            // has been attempted.
            self.retry_individually(failed);
        }
        self.flushing.store(false, Ordering::SeqCst);
    }

    /// One batch round trip for a slice. Returns the prepared jobs of a
    /// failed batch for the retry pass.
    fn flush_slice(&self, writes: &[CoalescedWrite]) -> Vec<PreparedJob> {
        let mut prepared: Vec<PreparedJob> = Vec::with_capacity(writes.len());
        for write in writes {
            match build_record_query(write.record.model(), &write.record) {
                Ok((query, values, version, op)) => {
                    prepared.push((write.clone(), query, values, version, op));
                }
                // Unbuildable jobs (e.g. a pk that never got set) fail
                // alone without touching the batch.
                Err(err) => write.notify(Err(err)),
            }
        }
        if prepared.is_empty() {
            return Vec::new();
        }

        let queries: Vec<Query> = prepared.iter().map(|(_, q, ..)| q.clone()).collect();
        match self.driver.execute_batch(&queries) {
            Ok(results) => {
                for ((write, _, values, version, op), result) in
                    prepared.into_iter().zip(results)
                {
                    finalize_persist(
                        write.record.model(),
                        &write.record,
                        op,
                        &result,
                        values,
                        version,
                    );
                    write.notify(Ok(()));
                }
                Vec::new()
            }
            Err(err) => {
                warn!(
                    driver = self.driver.name(),
                    statements = queries.len(),
                    error = %err,
                    "batch failed, statements will be retried individually"
                );
                // Every job in the failed slice is notified first; the
                // retry outcome arrives as a second event.
                for (write, ..) in &prepared {
                    write.notify(Err(TandemError::BatchFailed(err.to_string())));
                }
                prepared
            }
        }
    }

    /// One retry per job of the cycle's failed batches. A second failure
    /// is terminal: the job is dropped and its channels notified.
    fn retry_individually(&self, prepared: Vec<PreparedJob>) {
        for (write, query, values, version, op) in prepared {
            match self.driver.execute(&query) {
                Ok(result) => {
                    finalize_persist(
                        write.record.model(),
                        &write.record,
                        op,
                        &result,
                        values,
                        version,
                    );
                    write.notify(Ok(()));
                }
                Err(err) => {
                    warn!(
                        driver = self.driver.name(),
                        model = %write.record.model().name,
                        error = %err,
                        "deferred write dropped after retry"
                    );
                    write.notify(Err(err));
                }
            }
        }
    }

    /// Stops the worker and drains whatever is still queued. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
        self.flush();
    }
}

/// Last-write-wins coalescing: of several jobs targeting the same record
/// instance, only the latest survives, at its later queue position, and
/// superseded jobs hand their completion senders to it. Detached and
/// tombstoned jobs are dropped here.
fn coalesce(jobs: Vec<PendingWrite>) -> Vec<CoalescedWrite> {
    let mut slots: Vec<Option<CoalescedWrite>> = Vec::with_capacity(jobs.len());
    let mut by_identity: BTreeMap<usize, usize> = BTreeMap::new();
    for job in jobs {
        let Some((record, completion)) = job.resolve() else { continue };
        let mut completions = match by_identity.get(&record.identity()) {
            Some(&slot) => slots[slot]
                .take()
                .map(|write| write.completions)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        completions.push(completion);
        by_identity.insert(record.identity(), slots.len());
        slots.push(Some(CoalescedWrite {
            record,
            completions,
        }));
    }
    slots.into_iter().flatten().collect()
}
