//! Pipeline error type.

use locdedup::GroupStatus;
use uuid::Uuid;

/// Errors surfaced by the pipeline. Precondition variants map to 4xx at the
/// API layer; `Database` maps to 5xx.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("grupo {0} não encontrado")]
    GroupNotFound(Uuid),

    #[error("grupo {id} está {status} e não permite {operation}")]
    InvalidStatus {
        id: Uuid,
        status: GroupStatus,
        operation: &'static str,
    },

    #[error("registro canônico {member} não pertence ao grupo {id}")]
    CanonicalNotMember { id: Uuid, member: String },

    #[error("grupo {0} não tem sugestão de canônico para aprovar")]
    NoSuggestion(Uuid),

    #[error("mapa de FKs não cobre {table}.{column}")]
    UnknownFkEdge { table: String, column: String },
}

impl PipelineError {
    /// Whether the error is a caller mistake rather than a system failure.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        !matches!(self, PipelineError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        let id = Uuid::nil();
        assert!(PipelineError::GroupNotFound(id).is_precondition());
        assert!(PipelineError::NoSuggestion(id).is_precondition());
        assert!(PipelineError::CanonicalNotMember {
            id,
            member: "x".to_string()
        }
        .is_precondition());
        assert!(!PipelineError::Database(sqlx::Error::RowNotFound).is_precondition());
    }

    #[test]
    fn test_invalid_status_message() {
        let err = PipelineError::InvalidStatus {
            id: Uuid::nil(),
            status: GroupStatus::Executed,
            operation: "unificação",
        };
        let msg = err.to_string();
        assert!(msg.contains("executado"));
        assert!(msg.contains("unificação"));
    }
}
