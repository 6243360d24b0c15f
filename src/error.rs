//! Crate-wide error types, one per subsystem boundary (see spec.md §7).
//!
//! None of these are meant to unwind past the module that produces them;
//! each caller either logs-and-continues or folds the error into a result
//! record (`TriggerEvent`, a sync-pass summary, a control-plane response).

use std::fmt;

/// A BMP frame or embedded BGP UPDATE could not be parsed.
#[derive(Debug, Clone)]
pub struct BmpParseError(pub String);

impl fmt::Display for BmpParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "malformed BMP payload: {}", self.0)
    }
}

impl std::error::Error for BmpParseError {}

impl From<&str> for BmpParseError {
    fn from(s: &str) -> Self {
        BmpParseError(s.to_string())
    }
}

impl From<String> for BmpParseError {
    fn from(s: String) -> Self {
        BmpParseError(s)
    }
}

/// The routing daemon rejected, or could not be reached for, a FlowSpec POST.
#[derive(Debug, Clone)]
pub struct DispatchError(pub String);

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "flowspec dispatch failed: {}", self.0)
    }
}

impl std::error::Error for DispatchError {}

/// The topology/trigger source could not be reached or returned bad data.
#[derive(Debug, Clone)]
pub struct SyncError(pub String);

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "trigger sync failed: {}", self.0)
    }
}

impl std::error::Error for SyncError {}

/// Errors surfaced to a control-plane caller (the out-of-scope façade maps
/// these to HTTP 400 / 404 respectively).
#[derive(Debug, Clone)]
pub enum ControlError {
    BadRequest(String),
    NotFound(String),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ControlError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            ControlError::NotFound(msg) => write!(f, "not found: {}", msg),
        }
    }
}

impl std::error::Error for ControlError {}
