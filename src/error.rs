//! # Reaper Error Types
//!
//! Structured error handling for reconciliation runs using thiserror.
//! Each variant carries enough context to be logged against the unit that
//! can make an independent forward-progress decision (resource, reaper, run).

use thiserror::Error;

use crate::config::ConfigurationError;

/// Result alias used across the crate
pub type ReaperResult<T> = Result<T, ReaperError>;

/// Errors surfaced by reconciliation and its external collaborators
#[derive(Error, Debug)]
pub enum ReaperError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Membership snapshot failed: {message}")]
    Membership { message: String },

    #[error("Authentication against {service} failed: {message}")]
    Authentication { service: String, message: String },

    #[error("Request to {service} failed during {operation}: {message}")]
    Request {
        service: String,
        operation: String,
        message: String,
    },

    #[error("{service} rejected {operation}: {status} - {message}")]
    Api {
        service: String,
        operation: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {service}: {field} - {reason}")]
    InvalidResponse {
        service: String,
        field: String,
        reason: String,
    },

    #[error("Could not resolve project scope: {message}")]
    ScopeResolution { message: String },

    #[error("Shutdown requested before {stage}")]
    Shutdown { stage: String },
}

impl ReaperError {
    pub fn membership(message: impl Into<String>) -> Self {
        Self::Membership {
            message: message.into(),
        }
    }

    pub fn authentication(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn request(
        service: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Request {
            service: service.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn api(
        service: impl Into<String>,
        operation: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::Api {
            service: service.into(),
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    /// Protocol violation: a response is missing a field we cannot default
    pub fn invalid_response(
        service: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidResponse {
            service: service.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn scope_resolution(message: impl Into<String>) -> Self {
        Self::ScopeResolution {
            message: message.into(),
        }
    }

    pub fn shutdown(stage: impl Into<String>) -> Self {
        Self::Shutdown {
            stage: stage.into(),
        }
    }

    /// Whether this error aborts the whole run no matter where it surfaces
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReaperError::Configuration(_) | ReaperError::Membership { .. }
        )
    }
}
