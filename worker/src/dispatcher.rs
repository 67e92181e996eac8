use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use futures::FutureExt;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{BoxedJob, DispatcherError, DispatcherMetrics, Job, Timer};

/// The job channel of a single worker. An idle worker publishes a clone of
/// its sender to the dispatcher and waits on the matching receiver.
type JobSender = mpsc::Sender<BoxedJob>;

struct Queues {
    job_rx: mpsc::Receiver<BoxedJob>,
    idle_rx: mpsc::Receiver<JobSender>,
}

/// Matches queued jobs to idle workers.
///
/// The pool is sized once at construction. [`Dispatcher::run`] starts
/// exactly `max_workers` worker loops and one dispatch loop. The job queue
/// has a single slot, so [`Dispatcher::add`] suspends the producer whenever
/// the dispatch loop is not ready to take the next job.
pub struct Dispatcher {
    max_workers: usize,
    job_tx: mpsc::Sender<BoxedJob>,
    idle_tx: mpsc::Sender<JobSender>,
    queues: StdMutex<Option<Queues>>,
    workers: StdMutex<Vec<WorkerHandle>>,
    cancel: CancellationToken,
    metrics: Arc<DispatcherMetrics>,
}

impl Dispatcher {
    pub fn new(max_workers: usize) -> Self {
        Self::new_with_metrics(max_workers, Arc::new(DispatcherMetrics::new()))
    }

    pub fn new_with_metrics(max_workers: usize, metrics: Arc<DispatcherMetrics>) -> Self {
        let max_workers = max_workers.max(1);
        let (job_tx, job_rx) = mpsc::channel(1);
        let (idle_tx, idle_rx) = mpsc::channel(max_workers);

        Self {
            max_workers,
            job_tx,
            idle_tx,
            queues: StdMutex::new(Some(Queues { job_rx, idle_rx })),
            workers: StdMutex::new(Vec::with_capacity(max_workers)),
            cancel: CancellationToken::new(),
            metrics,
        }
    }

    /// Start the worker loops and the dispatch loop in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run(&self) -> Result<(), DispatcherError> {
        if self.cancel.is_cancelled() {
            return Err(DispatcherError::Stopped);
        }
        let Queues { job_rx, idle_rx } = self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(DispatcherError::AlreadyRunning)?;

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for id in 0..self.max_workers {
            let worker = Worker::new(
                id,
                self.idle_tx.clone(),
                self.cancel.child_token(),
                self.metrics.clone(),
            );
            workers.push(worker.start());
        }

        tokio::spawn(dispatch(
            job_rx,
            Arc::new(Mutex::new(idle_rx)),
            self.cancel.clone(),
            self.metrics.clone(),
        ));

        info!(max_workers = self.max_workers, "dispatcher started");
        Ok(())
    }

    /// Enqueue a job. Completion is not reported here; jobs that need to be
    /// observed carry their own signal.
    pub async fn add<J: Job>(&self, job: J) -> Result<(), DispatcherError> {
        self.add_boxed(Box::new(job)).await
    }

    pub async fn add_boxed(&self, job: BoxedJob) -> Result<(), DispatcherError> {
        if self.cancel.is_cancelled() {
            return Err(DispatcherError::Stopped);
        }
        if self.is_pending() {
            return Err(DispatcherError::NotRunning);
        }
        self.job_tx
            .send(job)
            .await
            .map_err(|_| DispatcherError::Stopped)
    }

    /// Signal every worker and the dispatch loop to stop. Workers finish the
    /// job they are running; queued jobs that have not reached a worker are
    /// dropped.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for every worker loop to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            worker.join().await;
        }
        info!("dispatcher stopped");
    }

    fn is_pending(&self) -> bool {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn dispatch(
    mut job_rx: mpsc::Receiver<BoxedJob>,
    idle_rx: Arc<Mutex<mpsc::Receiver<JobSender>>>,
    cancel: CancellationToken,
    metrics: Arc<DispatcherMetrics>,
) {
    loop {
        let job = tokio::select! {
            job = job_rx.recv() => job,
            _ = cancel.cancelled() => None,
        };
        let Some(job) = job else {
            break;
        };

        // Waiting for an idle worker happens off the dispatch loop so the loop
        // is always ready for the next job.
        tokio::spawn(hand_off(
            job,
            idle_rx.clone(),
            cancel.clone(),
            metrics.clone(),
        ));
    }
    debug!("dispatch loop exited");
}

async fn hand_off(
    mut job: BoxedJob,
    idle_rx: Arc<Mutex<mpsc::Receiver<JobSender>>>,
    cancel: CancellationToken,
    metrics: Arc<DispatcherMetrics>,
) {
    loop {
        let worker = tokio::select! {
            worker = async { idle_rx.lock().await.recv().await } => worker,
            _ = cancel.cancelled() => None,
        };
        let Some(worker) = worker else {
            debug!("dispatcher stopped before a worker became idle, dropping job");
            return;
        };

        match worker.send(job).await {
            Ok(()) => {
                metrics.jobs_dispatched.add(1, &[]);
                return;
            }
            // the worker quit after registering itself as idle
            Err(mpsc::error::SendError(returned)) => job = returned,
        }
    }
}

/// A single job-running loop. A worker has no identity beyond its job
/// channel; the id only labels log lines.
pub struct Worker {
    id: usize,
    idle_tx: mpsc::Sender<JobSender>,
    job_tx: JobSender,
    job_rx: mpsc::Receiver<BoxedJob>,
    quit: CancellationToken,
    metrics: Arc<DispatcherMetrics>,
}

impl Worker {
    pub fn new(
        id: usize,
        idle_tx: mpsc::Sender<JobSender>,
        quit: CancellationToken,
        metrics: Arc<DispatcherMetrics>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel(1);
        Self {
            id,
            idle_tx,
            job_tx,
            job_rx,
            quit,
            metrics,
        }
    }

    pub fn start(self) -> WorkerHandle {
        WorkerHandle {
            join: tokio::spawn(self.run()),
        }
    }

    async fn run(mut self) {
        loop {
            let registered = tokio::select! {
                res = self.idle_tx.send(self.job_tx.clone()) => res.is_ok(),
                _ = self.quit.cancelled() => false,
            };
            if !registered {
                break;
            }

            let job = tokio::select! {
                biased;
                job = self.job_rx.recv() => job,
                _ = self.quit.cancelled() => None,
            };
            match job {
                Some(job) => self.execute(job).await,
                None => break,
            }
        }
        debug!(worker = self.id, "worker stopped");
    }

    async fn execute(&self, job: BoxedJob) {
        let _timer = Timer::start(&self.metrics.job_duration);
        match AssertUnwindSafe(job.run()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.metrics.jobs_failed.add(1, &[]);
                error!(worker = self.id, "worker's job failed: {:?}", err);
            }
            Err(_) => {
                self.metrics.jobs_failed.add(1, &[]);
                error!(worker = self.id, "worker's job panicked");
            }
        }
    }
}

/// Join handle of a started worker. Workers stop when the dispatcher's
/// token is cancelled.
pub struct WorkerHandle {
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub async fn join(self) {
        if let Err(err) = self.join.await {
            error!("worker task failed: {:?}", err);
        }
    }
}
