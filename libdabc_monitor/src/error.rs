use std::path::PathBuf;
use thiserror::Error;

use super::object::ObjectState;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Transport received status {0} for {1}")]
    BadStatus(u16, String),
    #[error("Transport could not parse document response: {0}")]
    BadDocument(#[from] serde_json::Error),
    #[error("Transport worker pool is shut down")]
    Disconnected,
}

// Responses travel between threads and get queued, so the error must be Clone.
// reqwest and serde_json errors are not, hence the message-only fallback.
impl Clone for TransportError {
    fn clone(&self) -> Self {
        match self {
            TransportError::Http(e) => TransportError::BadStatus(0, e.to_string()),
            TransportError::BadStatus(code, url) => TransportError::BadStatus(*code, url.clone()),
            TransportError::BadDocument(e) => TransportError::BadStatus(0, e.to_string()),
            TransportError::Disconnected => TransportError::Disconnected,
        }
    }
}

#[derive(Debug, Error)]
pub enum BinaryError {
    #[error("Binary payload of {0} bytes is too short for the object header")]
    TooShort(usize),
    #[error("Incorrect magic {0} found in object header; expected {exp}", exp = super::binary::HEADER_MAGIC)]
    BadMagic(u32),
    #[error("Mismatch between payload length {got} and header value {expected}")]
    LengthMismatch { got: usize, expected: usize },
    #[error("Mismatch between inflated length {got} and header value {expected}")]
    InflateMismatch { got: usize, expected: usize },
    #[error("Failed to parse buffer into object header: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum HierarchyError {
    #[error("Hierarchy document is not a JSON object")]
    NotAnObject,
    #[error("Hierarchy node is missing the _name field")]
    MissingName,
    #[error("Hierarchy document is missing the _version field")]
    MissingVersion,
    #[error("Hierarchy document failed to parse: {0}")]
    BadDocument(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("Illegal object state transition from {from:?} to {to:?}")]
    IllegalTransition { from: ObjectState, to: ObjectState },
    #[error("Object item received a response while in state {0:?}")]
    UnexpectedResponse(ObjectState),
    #[error("Object item has no stashed payload for the deferred decode")]
    MissingPayload,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History document failed to parse: {0}")]
    BadDocument(#[from] HierarchyError),
    #[error("History response carried a binary body where a document was expected")]
    NotADocument,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command descriptor failed to parse: {0}")]
    BadDescriptor(String),
    #[error("Command {0} has no descriptor loaded yet")]
    NoDescriptor(String),
    #[error("Command {0} is still waiting for a previous request")]
    Busy(String),
    #[error("Command response carried a binary body where a document was expected")]
    NotADocument,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config value for {0} is invalid")]
    BadValue(&'static str),
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Manager could not find hierarchy node for item {0}")]
    NodeNotFound(String),
    #[error("Item path {0} is not long enough for master reference {1}")]
    BadMasterReference(String, String),
    #[error("Manager has no registered item {0}")]
    UnknownItem(String),
    #[error("Manager failed due to object error: {0}")]
    ObjectError(#[from] ObjectError),
    #[error("Manager failed due to history error: {0}")]
    HistoryError(#[from] HistoryError),
    #[error("Manager failed due to command error: {0}")]
    CommandError(#[from] CommandError),
}
