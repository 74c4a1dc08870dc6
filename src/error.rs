use thiserror::Error;

/// Crate-wide error taxonomy for infrastructure failures.
///
/// Target-level failures (a probe timing out, a DNS lookup failing) are
/// never represented here — they are normalised into [`crate::model::CheckResult`]
/// and [`crate::classify::ErrorType`] and never escape as a `Result::Err`.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("persistence error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("monitor not found: {0}")]
    MonitorNotFound(String),

    #[error("job lease conflict for monitor {0}")]
    LeaseConflict(String),

    #[error("manual check cooldown active for monitor {0}, retry in {1}s")]
    CooldownActive(String, u64),

    #[error("scheduler is not the leader")]
    NotLeader,

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("notification transport error: {0}")]
    Notify(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
