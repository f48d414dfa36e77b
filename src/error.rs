use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The store is unreachable. Aborts the whole run.
    #[error("Database connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No {extension} member found in archive {archive}")]
    MissingMember { archive: String, extension: String },

    #[error("Failed to load {table}: {source}")]
    Load {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl AppError {
    /// Wrap a failure raised while writing `table`. Failures that mean the
    /// store went away are reported as [`AppError::Connection`].
    pub fn load(table: &'static str, source: sqlx::Error) -> Self {
        if is_connection_error(&source) {
            AppError::Connection(source)
        } else {
            AppError::Load { table, source }
        }
    }

    /// Fatal errors terminate the run instead of skipping one archive.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Connection(_))
    }
}

pub(crate) fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_closed_during_load_is_fatal() {
        let err = AppError::load("rainfall_data_daily", sqlx::Error::PoolClosed);
        assert!(matches!(err, AppError::Connection(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_row_error_during_load_is_not_fatal() {
        let err = AppError::load("rainfall_data_monthly", sqlx::Error::RowNotFound);
        assert!(matches!(
            err,
            AppError::Load {
                table: "rainfall_data_monthly",
                ..
            }
        ));
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("rainfall_data_monthly"));
    }

    #[test]
    fn test_missing_member_message() {
        let err = AppError::MissingMember {
            archive: "001006_rainfall.zip".to_string(),
            extension: ".csv".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No .csv member found in archive 001006_rainfall.zip"
        );
    }
}
