//! Bounded-concurrency job execution.
//!
//! A [`Dispatcher`] owns a fixed pool of [`Worker`]s and a single job queue.
//! Producers submit [`Job`]s with [`Dispatcher::add`]; the dispatch loop
//! hands every job to the next idle worker. There are no priorities, retries
//! or deadlines: a job that never finishes occupies its worker forever and
//! the pool shrinks by one. Callers that need cancellation must build it into
//! the job itself.
//!
//! Job failures are logged by the worker and otherwise dropped. Callers that
//! need to observe failures thread their own reporting channel through the
//! job.

mod dispatcher;
mod error;
mod job;
mod metrics;

pub use dispatcher::{Dispatcher, Worker, WorkerHandle};
pub use error::DispatcherError;
pub use job::{BoxedJob, Job};
pub use metrics::{DispatcherMetrics, Timer};
