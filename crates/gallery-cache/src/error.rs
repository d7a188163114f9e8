//! Error types for the gallery cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    Io(Box<std::io::Error>),
    InvalidHash(String),
    InvalidKey(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::InvalidHash(value) => write!(f, "Invalid hash: {}", value),
            CacheError::InvalidKey(key) => write!(f, "Invalid cache key: {}", key),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<tempfile::PathPersistError> for CacheError {
    fn from(err: tempfile::PathPersistError) -> Self {
        CacheError::Io(Box::new(err.error))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_hash_display() {
        let err = CacheError::InvalidHash("not-a-hash".to_string());
        assert_eq!(format!("{}", err), "Invalid hash: not-a-hash");
    }

    #[test]
    fn test_io_error_has_source() {
        let err = CacheError::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        assert!(format!("{}", err).contains("missing"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
