use super::tailer::OffsetTailer;
use super::watch::BufferWatch;
use crate::capture::CaptureSummary;
use crate::upload::Batcher;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the tail worker did over the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TailSummary {
    pub records_read: u64,
    pub delivered: u64,
    pub abandoned: u64,
    pub batches: u64,
    pub malformed: u64,
    pub circuit_open: bool,
    pub reached_end: bool,
    /// Set when capture reported completion (not just went away).
    pub capture: Option<CaptureSummary>,
}

impl TailSummary {
    /// Every record read from the buffer was acknowledged by the collector.
    pub fn fully_shipped(&self) -> bool {
        !self.circuit_open && self.abandoned == 0 && self.delivered == self.records_read
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TailOptions {
    pub poll_interval: Duration,
    pub watch_fs: bool,
    pub flush_interval: Option<Duration>,
}

/// Drives an [`OffsetTailer`] into a [`Batcher`] until capture completes.
pub struct TailWorker {
    tailer: OffsetTailer,
    batcher: Batcher,
    options: TailOptions,
}

impl TailWorker {
    pub fn new(tailer: OffsetTailer, batcher: Batcher, options: TailOptions) -> Self {
        Self {
            tailer,
            batcher,
            options,
        }
    }

    /// Poll until `writing_done` resolves, then drain once more and flush.
    ///
    /// `cancel` is only observed: the worker keeps going so that whatever
    /// capture already wrote still gets shipped.
    pub async fn run(
        mut self,
        writing_done: oneshot::Receiver<CaptureSummary>,
        cancel: CancellationToken,
    ) -> TailSummary {
        let mut ticker = time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut flush_ticker = self.options.flush_interval.map(|every| {
            let mut ticker = time::interval_at(time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let mut watch = if self.options.watch_fs {
            match BufferWatch::new(self.tailer.path()) {
                Ok(watch) => Some(watch),
                Err(e) => {
                    warn!(error = %e, "Filesystem watch unavailable, polling on timer only");
                    None
                }
            }
        } else {
            None
        };

        let mut cancel_seen = false;
        let mut capture = None;
        tokio::pin!(writing_done);

        loop {
            tokio::select! {
                biased;

                done = &mut writing_done => {
                    match done {
                        Ok(summary) => {
                            debug!(lines = summary.lines, "Capture reported completion");
                            capture = Some(summary);
                        }
                        Err(_) => warn!("Capture went away without reporting completion"),
                    }
                    break;
                }
                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    info!("Intake cancelled, draining until capture completes");
                }
                _ = ticker.tick() => self.drain().await,
                change = next_change(&mut watch) => match change {
                    Some(()) => self.drain().await,
                    None => watch = None,
                },
                _ = next_tick(&mut flush_ticker) => self.batcher.flush().await,
            }
        }

        self.drain().await;
        self.batcher.flush().await;

        let stats = self.batcher.stats();
        let summary = TailSummary {
            records_read: self.tailer.records_read(),
            delivered: stats.delivered,
            abandoned: stats.abandoned,
            batches: stats.batches,
            malformed: self.tailer.malformed(),
            circuit_open: self.batcher.circuit_open(),
            reached_end: self.tailer.ended(),
            capture,
        };
        info!(
            records = summary.records_read,
            delivered = summary.delivered,
            abandoned = summary.abandoned,
            batches = summary.batches,
            "Tail drained"
        );
        summary
    }

    async fn drain(&mut self) {
        match self.tailer.poll().await {
            Ok(records) => {
                for record in records {
                    self.batcher.push(record).await;
                }
            }
            Err(e) => warn!(path = %self.tailer.path().display(), error = %e, "Buffer poll failed"),
        }
    }
}

async fn next_change(watch: &mut Option<BufferWatch>) -> Option<()> {
    match watch {
        Some(watch) => watch.changed().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
