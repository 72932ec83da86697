use crate::timeline::TimelineError;

/// Errors surfaced by plan operations.
///
/// `Data` covers invalid user-supplied values; `Logic` covers violations of
/// the calling contract (stale keys, broken invariants).
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("data error: {0}")]
    Data(String),
    #[error("logic error: {0}")]
    Logic(String),
    #[error("timeline inconsistency: {0}")]
    Timeline(#[from] TimelineError),
}

impl PlanError {
    pub fn data(msg: impl Into<String>) -> Self {
        PlanError::Data(msg.into())
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        PlanError::Logic(msg.into())
    }

    pub fn is_data(&self) -> bool {
        matches!(self, PlanError::Data(_))
    }

    pub fn is_logic(&self) -> bool {
        matches!(self, PlanError::Logic(_))
    }
}

pub type PlanResult<T> = Result<T, PlanError>;
