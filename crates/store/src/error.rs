/// Store errors, split by whether a retry can help.
///
/// Callers never recover mid-turn from `Permanent` -- they surface it.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Retriable: the database was busy or locked.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Not retriable: schema/data-shape problems, corrupt rows.
    #[error("permanent store error: {0}")]
    Permanent(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Transient(e.to_string())
            }
            _ => StoreError::Permanent(e.to_string()),
        }
    }
}

impl From<StoreError> for hearth_domain::Error {
    fn from(e: StoreError) -> Self {
        hearth_domain::Error::Store(e.to_string())
    }
}
