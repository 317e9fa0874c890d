use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::broadcast::{UploadPhase, UploadProgressBroadcaster};
use crate::config::SchedulerConfig;
use crate::error::WorkerError;
use crate::pipeline::progress::{BroadcastProgress, NoopProgress, ProgressReporter};
use crate::pipeline::{Pipeline, PipelineContext};
use crate::worker::job::{JobResult, UploadRequest};

/// Anything that accepts upload jobs for background processing.
pub trait JobQueue: Send + Sync {
    fn submit(&self, request: UploadRequest) -> Result<(), WorkerError>;
}

pub struct WorkerPool {
    job_sender: Sender<UploadRequest>,
    result_receiver: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, scheduler: SchedulerConfig, worker_count: usize) -> Self {
        Self::with_progress(pipeline, scheduler, worker_count, None)
    }

    /// Creates a new worker pool with an optional progress broadcaster.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn with_progress(
        pipeline: Arc<Pipeline>,
        scheduler: SchedulerConfig,
        worker_count: usize,
        progress: Option<UploadProgressBroadcaster>,
    ) -> Self {
        assert!(worker_count > 0, "an upload pool needs at least one worker");
        let (job_sender, job_receiver) = bounded::<UploadRequest>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<JobResult>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(InFlight::default());

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                jobs: job_receiver.clone(),
                results: result_sender.clone(),
                shutdown: Arc::clone(&shutdown),
                in_flight: Arc::clone(&in_flight),
                pipeline: Arc::clone(&pipeline),
                scheduler: scheduler.clone(),
                progress: progress.clone(),
            };

            workers.push(thread::spawn(move || worker.run()));
        }

        info!("Upload workers online: {}", worker_count);

        Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn submit(&self, request: UploadRequest) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(request)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<JobResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<JobResult> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<JobResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Upload queue closing; in-flight uploads will finish");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        drop(self.job_sender);

        for (slot, handle) in self.workers.into_iter().enumerate() {
            match handle.join() {
                Ok(()) => debug!("Upload worker {} joined", slot),
                Err(panic) => error!("Upload worker {} died: {:?}", slot, panic),
            }
        }

        info!("Upload workers drained");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

impl JobQueue for WorkerPool {
    fn submit(&self, request: UploadRequest) -> Result<(), WorkerError> {
        WorkerPool::submit(self, request)
    }
}

/// Delay before attempt `attempt + 1`: `base * 2^(attempt - 1)`.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Upload ids currently being processed. A second job for the same upload
/// waits until the first one is done.
#[derive(Default)]
struct InFlight {
    ids: Mutex<HashSet<i64>>,
    released: Condvar,
}

impl InFlight {
    fn acquire(&self, upload_id: i64) -> InFlightGuard<'_> {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        while ids.contains(&upload_id) {
            ids = self
                .released
                .wait(ids)
                .unwrap_or_else(|e| e.into_inner());
        }
        ids.insert(upload_id);
        InFlightGuard {
            owner: self,
            upload_id,
        }
    }
}

struct InFlightGuard<'a> {
    owner: &'a InFlight,
    upload_id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut ids = self.owner.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.remove(&self.upload_id);
        self.owner.released.notify_all();
    }
}

struct Worker {
    id: usize,
    jobs: Receiver<UploadRequest>,
    results: Sender<JobResult>,
    shutdown: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
    pipeline: Arc<Pipeline>,
    scheduler: SchedulerConfig,
    progress: Option<UploadProgressBroadcaster>,
}

impl Worker {
    fn run(self) {
        debug!("Worker {} started", self.id);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            match self.jobs.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => {
                    debug!(
                        "Worker {} processing upload {} (job {})",
                        self.id, request.upload_id, request.id
                    );

                    let result = {
                        let _guard = self.in_flight.acquire(request.upload_id);
                        self.process(&request)
                    };

                    if let Err(e) = self.results.send(result) {
                        error!("Worker {} failed to send result: {}", self.id, e);
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    continue;
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    debug!("Worker {} job channel disconnected", self.id);
                    break;
                }
            }
        }

        debug!("Worker {} stopped", self.id);
    }

    fn process(&self, request: &UploadRequest) -> JobResult {
        match &self.progress {
            Some(broadcaster) => {
                let progress = BroadcastProgress::from_tracker(
                    broadcaster.tracker(request.upload_id, &request.id),
                );
                progress
                    .tracker()
                    .update(UploadPhase::Queued, 0, "Job picked up by worker");
                self.run_with_retries(request, &progress, Some(&progress))
            }
            None => self.run_with_retries(request, &NoopProgress, None),
        }
    }

    /// Runs the pipeline until it succeeds, fails with a non-retryable
    /// error, or `max_attempts` is used up.
    fn run_with_retries(
        &self,
        request: &UploadRequest,
        progress: &dyn ProgressReporter,
        broadcast: Option<&BroadcastProgress>,
    ) -> JobResult {
        let max_attempts = self.scheduler.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let ctx = PipelineContext::new(request.clone());
            let (result, _ctx) = self.pipeline.run(ctx, progress);

            match result {
                Ok(outcome) => {
                    info!(
                        "Upload {} finished as {} after {} attempt(s)",
                        request.upload_id, outcome.status, attempt
                    );
                    return JobResult::success(request, outcome.status, attempt);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff_delay(self.scheduler.backoff_base_ms, attempt);
                    warn!(
                        "Upload {} attempt {}/{} failed: {}; retrying in {:?}",
                        request.upload_id, attempt, max_attempts, e, delay
                    );
                    if let Some(progress) = broadcast {
                        progress.tracker().retrying(attempt, &e.to_string());
                    }
                    thread::sleep(delay);
                }
                Err(e) => {
                    let failure = WorkerError::JobFailed {
                        upload_id: request.upload_id,
                        attempts: attempt,
                        reason: e.to_string(),
                    };
                    error!("{}", failure);
                    return JobResult::failure(request, e.to_string(), attempt);
                }
            }
        }
    }
}
