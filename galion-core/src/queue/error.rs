//! Structured errors for queue persistence operations.

use thiserror::Error;
use uuid::Uuid;

/// Coarse classification of a `sqlx::Error`, used for logging and for
/// deciding whether a caller might usefully retry the database operation
/// itself (distinct from job-level retry policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDbErrorKind {
    Busy,
    Constraint,
    NotFound,
    Connection,
    Other,
}

fn classify_database_error(err: &sqlx::Error) -> QueueDbErrorKind {
    match err {
        sqlx::Error::RowNotFound => QueueDbErrorKind::NotFound,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            QueueDbErrorKind::Connection
        }
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_ascii_lowercase();
            if message.contains("database is locked") || message.contains("busy") {
                QueueDbErrorKind::Busy
            } else if message.contains("constraint") {
                QueueDbErrorKind::Constraint
            } else {
                QueueDbErrorKind::Other
            }
        }
        _ => QueueDbErrorKind::Other,
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue database error ({kind:?}): {message}")]
    Database {
        kind: QueueDbErrorKind,
        message: String,
    },

    #[error("job {0} not found\n  Suggestion: check the job id with `galion status`.")]
    JobNotFound(Uuid),

    #[error("job {job_id} is already in a terminal state ({status})")]
    AlreadyTerminal { job_id: Uuid, status: String },
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        let kind = classify_database_error(&err);
        Self::Database {
            kind,
            message: err.to_string(),
        }
    }
}

impl QueueError {
    pub fn database_kind(&self) -> Option<QueueDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.database_kind() == Some(QueueDbErrorKind::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_has_suggestion() {
        let id = Uuid::new_v4();
        let err = QueueError::JobNotFound(id);
        assert!(err.to_string().contains("Suggestion"));
    }

    #[test]
    fn row_not_found_classifies_as_not_found() {
        let err: QueueError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.database_kind(), Some(QueueDbErrorKind::NotFound));
    }
}
