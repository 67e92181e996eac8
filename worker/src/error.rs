#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DispatcherError {
    #[error("dispatcher is not running, call run() before adding jobs")]
    NotRunning,

    #[error("dispatcher is already running")]
    AlreadyRunning,

    #[error("dispatcher has been stopped")]
    Stopped,
}
