//! Error types for the historian

use thiserror::Error;

use crate::types::RegistryEntry;

/// Main error type for the historian
#[derive(Error, Debug)]
pub enum Error {
    /// The underlying store endpoint is unreachable or refused the connection
    #[error("connection error: {0}")]
    Connection(String),

    /// Strict-mode lookup of a collection that does not exist
    #[error("collection '{0}' does not exist")]
    CollectionNotFound(String),

    /// A physical identifier could not be derived from the logical key
    #[error("the collection name could not be generated: {0}")]
    NameGeneration(#[from] NamingError),

    /// Two distinct logical keys produced the same hashed identifier
    ///
    /// Non-fatal: the physical collection behind the second key is still
    /// usable, the registry merely records the ambiguity.
    #[error("collection name hash collision on '{identifier}'")]
    HashCollision {
        /// The colliding hashed identifier
        identifier: String,
        /// The key that first claimed the identifier
        existing: Box<RegistryEntry>,
    },

    /// An unknown data model was requested
    #[error("invalid data model: {0}")]
    InvalidDataModel(String),

    /// An unknown or unconfigured resolution was requested
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    /// The underlying store rejected or failed a write
    #[error("write error: {0}")]
    Write(String),

    /// The underlying store rejected or failed a read
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Configuration could not be loaded or validated
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Map a backend failure on the write path
    pub(crate) fn write(err: StoreError) -> Self {
        match err {
            StoreError::Connection(message) => Error::Connection(message),
            other => Error::Write(other.to_string()),
        }
    }

    /// Map a backend failure on the read path
    pub(crate) fn retrieval(err: StoreError) -> Self {
        match err {
            StoreError::Connection(message) => Error::Connection(message),
            other => Error::Retrieval(other.to_string()),
        }
    }
}

/// Identifier-derivation errors
#[derive(Error, Debug)]
pub enum NamingError {
    /// The raw identifier exceeds the namespace budget and hashing is off
    ///
    /// The caller must enable hashing or shorten the key; there is no
    /// partial result.
    #[error("identifier of {length} bytes exceeds the {budget}-byte namespace budget and hashing is disabled")]
    NameTooLong {
        /// Byte length of the full namespace the key would have produced
        length: usize,
        /// The configured namespace budget
        budget: usize,
    },
}

/// Errors surfaced by a document-store backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// The addressed namespace does not exist
    #[error("namespace not found: {0}")]
    NotFound(String),

    /// The store endpoint is unreachable or refused the connection
    #[error("connection error: {0}")]
    Connection(String),

    /// A store command failed
    #[error("command failed: {0}")]
    Command(String),

    /// A stored document could not be decoded into its expected shape
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
