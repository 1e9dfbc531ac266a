/// Everything that can stop a histogram run.
///
/// Only [`HistoError::CorrectnessViolation`] is raised after a run has
/// completed; every other variant aborts the run where it happens.
#[derive(Debug, thiserror::Error)]
pub enum HistoError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to allocate {what}: {reason}")]
    Allocation { what: &'static str, reason: String },

    #[error("runtime primitive `{op}` failed: {reason}")]
    RuntimePrimitive { op: &'static str, reason: String },

    #[error("a peer rank aborted the run")]
    PeerAborted,

    #[error("verification failed: {total_errors} slot(s) did not return to zero")]
    CorrectnessViolation { total_errors: u64 },
}

pub type Result<T, E = HistoError> = std::result::Result<T, E>;

impl HistoError {
    pub(crate) fn primitive(op: &'static str, reason: impl Into<String>) -> Self {
        HistoError::RuntimePrimitive {
            op,
            reason: reason.into(),
        }
    }
}
