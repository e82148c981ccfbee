use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub const SERVER_ERROR: &str = "Server error. Please try again later.";

/// Failure to read, parse or rewrite a collection document.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} is not a valid collection document: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No id left in {collection} after {max}")]
    IdsExhausted { collection: String, max: i64 },

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Every way a resource operation can fail. `Display` is the public message.
#[derive(Error, Debug)]
pub enum ShelfError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Not found.")]
    UnknownCollection(String),

    #[error("Method not allowed.")]
    Unsupported,

    #[error("{}", SERVER_ERROR)]
    Storage(#[from] StorageError),
}

impl ShelfError {
    pub fn status(&self) -> u16 {
        match self {
            ShelfError::Validation(_) => 400,
            ShelfError::NotFound(_) | ShelfError::UnknownCollection(_) => 404,
            ShelfError::Unsupported => 405,
            ShelfError::Storage(_) => 500,
        }
    }
}

/// Failure to load a catalog file.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Could not read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid catalog: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_messages_hide_storage_detail() {
        let err = ShelfError::from(StorageError::Parse {
            path: "cards.json".into(),
            reason: "expected value".into(),
        });
        assert_eq!(err.to_string(), SERVER_ERROR);
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn statuses() {
        assert_eq!(ShelfError::Validation("x".into()).status(), 400);
        assert_eq!(ShelfError::NotFound("Card ID not found.".into()).to_string(), "Card ID not found.");
        assert_eq!(ShelfError::UnknownCollection("nope".into()).status(), 404);
        assert_eq!(ShelfError::Unsupported.status(), 405);
    }
}
