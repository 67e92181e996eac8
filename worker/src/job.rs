use anyhow::Result;
use async_trait::async_trait;

/// A unit of work run exactly once by a worker.
///
/// Jobs are consumed by [`Job::run`]; there is no reuse and no pooling. An
/// error returned from `run` is terminal for that job only and is logged by
/// the worker that ran it.
#[async_trait]
pub trait Job: Send + 'static {
    async fn run(self: Box<Self>) -> Result<()>;
}

pub type BoxedJob = Box<dyn Job>;
