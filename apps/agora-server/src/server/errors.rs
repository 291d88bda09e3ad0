/// Persistence-layer failures. `NotFound` and the unique-key violations
/// are domain-expected; everything else is a collaborator fault.
#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("username is already taken")]
    UniqueName,
    #[error("email is already registered")]
    UniqueEmail,
    #[error("store failure: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db) => match db.constraint() {
                Some(constraint) if constraint.contains("users_name") => Self::UniqueName,
                Some(constraint) if constraint.contains("users_email") => Self::UniqueEmail,
                _ => Self::Internal(error.to_string()),
            },
            _ => Self::Internal(error.to_string()),
        }
    }
}

/// Classification every request handler resolves to. A `Warning` has
/// already been reported to the requester as an error-result reply and
/// leaves the connection open; a `Fatal` error terminates it.
#[derive(Debug, thiserror::Error)]
pub(crate) enum HandlerError {
    #[error("{0}")]
    Warning(String),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl HandlerError {
    pub(crate) fn is_warning(&self) -> bool {
        matches!(self, Self::Warning(_))
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::{HandlerError, StoreError};

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let mapped = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(mapped, StoreError::NotFound));
    }

    #[test]
    fn warning_classification() {
        assert!(HandlerError::Warning(String::from("not logged in")).is_warning());
        assert!(!HandlerError::Fatal(anyhow::anyhow!("db down")).is_warning());
    }
}
