//! Background relay that drains the outbox onto the bus.
//!
//! [`OutboxRelay::tick`] runs one selection plus sequential processing pass.
//! [`RelayWorker`] owns a dedicated thread that runs ticks one after another,
//! either on a fixed delay or only when asked to via [`RelayWorker::tick_now`].

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::application::processor::{EventProcessor, ProcessOutcome};
use crate::application::registry::DispatchRegistry;
use crate::config::OutboxSettings;
use crate::domain::errors::StoreError;
use crate::domain::ports::{EventBus, OutboxStore};

/// Result of a single tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub selected: usize,
    pub published: usize,
    pub failed: usize,
    /// Records that reached the retry cap during this tick.
    pub parked: usize,
    pub unrecorded: usize,
}

impl TickReport {
    fn record(&mut self, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Published => self.published += 1,
            ProcessOutcome::Failed { parked, .. } => {
                self.failed += 1;
                if parked {
                    self.parked += 1;
                }
            }
            ProcessOutcome::Unrecorded => self.unrecorded += 1,
        }
    }
}

pub struct OutboxRelay<S, B> {
    store: S,
    processor: EventProcessor<S, B>,
    batch_size: i64,
    max_retries: i32,
}

impl<S, B> OutboxRelay<S, B>
where
    S: OutboxStore + Clone,
    B: EventBus,
{
    pub fn new(store: S, bus: B, registry: Arc<DispatchRegistry>, settings: &OutboxSettings) -> Self {
        let processor = EventProcessor::new(
            store.clone(),
            bus,
            registry,
            settings.publish_timeout,
            settings.max_retries,
        );
        Self {
            store,
            processor,
            batch_size: settings.batch_size,
            max_retries: settings.max_retries,
        }
    }

    /// Select the oldest eligible records and process them in order.
    ///
    /// Per-record failures are absorbed by the processor; only a failed
    /// selection is returned as an error. A failure does not hold back later
    /// records of the same aggregate in this batch, so those may reach the
    /// bus before the failed one is retried.
    pub fn tick(&self) -> Result<TickReport, StoreError> {
        let batch = self.store.fetch_eligible(self.batch_size, self.max_retries)?;

        let mut report = TickReport {
            selected: batch.len(),
            ..TickReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        for record in &batch {
            report.record(self.processor.process(record));
        }

        log::info!(
            "Outbox tick: {} selected, {} published, {} failed ({} parked)",
            report.selected,
            report.published,
            report.failed,
            report.parked
        );
        Ok(report)
    }
}

/// When the worker runs ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Each tick starts `period` after the previous one finished.
    FixedDelay(Duration),
    /// Only [`RelayWorker::tick_now`] triggers a tick.
    Manual,
}

/// Totals accumulated by a worker over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub ticks: usize,
    pub published: usize,
    pub failed: usize,
    pub parked: usize,
    pub selection_errors: usize,
}

impl RelayStats {
    fn absorb(&mut self, result: &Result<TickReport, StoreError>) {
        self.ticks += 1;
        match result {
            Ok(report) => {
                self.published += report.published;
                self.failed += report.failed;
                self.parked += report.parked;
            }
            Err(_) => self.selection_errors += 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay worker is not running")]
    Stopped,
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum Command {
    Tick(Sender<Result<TickReport, StoreError>>),
    Stop,
}

/// A relay running on its own thread. Ticks never overlap.
pub struct RelayWorker {
    commands: Sender<Command>,
    handle: Option<JoinHandle<RelayStats>>,
}

impl RelayWorker {
    pub fn spawn<S, B>(relay: OutboxRelay<S, B>, schedule: Schedule) -> std::io::Result<Self>
    where
        S: OutboxStore + Clone,
        B: EventBus,
    {
        let (commands, inbox) = channel();
        let handle = thread::Builder::new()
            .name("outbox-relay".to_string())
            .spawn(move || run(relay, schedule, inbox))?;

        log::info!("Outbox relay started ({:?})", schedule);
        Ok(Self {
            commands,
            handle: Some(handle),
        })
    }

    /// Run a tick right away and wait for its report.
    ///
    /// With a fixed-delay schedule this also restarts the delay.
    pub fn tick_now(&self) -> Result<TickReport, RelayError> {
        let (reply, report) = channel();
        self.commands
            .send(Command::Tick(reply))
            .map_err(|_| RelayError::Stopped)?;
        let result = report.recv().map_err(|_| RelayError::Stopped)?;
        Ok(result?)
    }

    /// Stop after the tick in progress (if any) and return the totals.
    pub fn stop(mut self) -> RelayStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> RelayStats {
        let _ = self.commands.send(Command::Stop);
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => {
                log::info!("Outbox relay stopped: {:?}", stats);
                stats
            }
            Some(Err(_)) => {
                log::error!("Outbox relay thread panicked");
                RelayStats::default()
            }
            None => RelayStats::default(),
        }
    }
}

impl Drop for RelayWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn run<S, B>(relay: OutboxRelay<S, B>, schedule: Schedule, inbox: Receiver<Command>) -> RelayStats
where
    S: OutboxStore + Clone,
    B: EventBus,
{
    let mut stats = RelayStats::default();

    loop {
        let command = match schedule {
            Schedule::FixedDelay(period) => match inbox.recv_timeout(period) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            Schedule::Manual => match inbox.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(Command::Stop) => break,
            Some(Command::Tick(reply)) => {
                let result = run_tick(&relay);
                stats.absorb(&result);
                let _ = reply.send(result);
            }
            None => {
                let result = run_tick(&relay);
                stats.absorb(&result);
            }
        }
    }

    stats
}

fn run_tick<S, B>(relay: &OutboxRelay<S, B>) -> Result<TickReport, StoreError>
where
    S: OutboxStore + Clone,
    B: EventBus,
{
    let result = relay.tick();
    if let Err(e) = &result {
        log::error!("Outbox selection failed, retrying next tick: {}", e);
    }
    result
}
