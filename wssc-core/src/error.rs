//! Unified error handling system
//!
//! Structured session errors with context, recovery suggestions, and error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type WsscResult<T> = Result<T, WsscError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for secure conversation session handling
#[derive(Error, Debug)]
pub enum WsscError {
    #[error("Session creation failed: {message}")]
    SessionCreation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    /// A session already exists under the same lookup key.
    #[error("Duplicate session: {key}")]
    DuplicateSession { key: String, context: ErrorContext },

    #[error("Invalid session duration: {duration_ms}ms")]
    InvalidDuration {
        duration_ms: i64,
        context: ErrorContext,
    },

    #[error("Session lookup failed: {message}")]
    SessionLookup {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Key derivation failed: {message}")]
    KeyDerivation {
        message: String,
        context: ErrorContext,
    },

    #[error("Encryption error: {message}")]
    Encryption {
        message: String,
        context: ErrorContext,
    },

    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WsscError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            WsscError::SessionCreation { context, .. } => Some(context),
            WsscError::DuplicateSession { context, .. } => Some(context),
            WsscError::InvalidDuration { context, .. } => Some(context),
            WsscError::SessionLookup { context, .. } => Some(context),
            WsscError::KeyDerivation { context, .. } => Some(context),
            WsscError::Encryption { context, .. } => Some(context),
            WsscError::Persistence { context, .. } => Some(context),
            WsscError::Config { context, .. } => Some(context),
            WsscError::Validation { context, .. } => Some(context),
            _ => None,
        }
    }

    /// True for every failure raised while creating a session.
    ///
    /// Duplicate keys and invalid durations are specialisations of a creation
    /// failure; callers that only care about "could not create" match here.
    pub fn is_creation_error(&self) -> bool {
        matches!(
            self,
            WsscError::SessionCreation { .. }
                | WsscError::DuplicateSession { .. }
                | WsscError::InvalidDuration { .. }
        )
    }

    pub fn is_duplicate(&self) -> bool {
        match self {
            WsscError::DuplicateSession { .. } => true,
            WsscError::SessionCreation {
                source: Some(source),
                ..
            } => source
                .downcast_ref::<WsscError>()
                .is_some_and(WsscError::is_duplicate),
            _ => false,
        }
    }

    /// Check if error is recoverable
    ///
    /// Creation failures are never retried: retrying a duplicate identifier
    /// would need a new identifier, which is a new creation.
    pub fn is_recoverable(&self) -> bool {
        match self {
            WsscError::Persistence { .. } => true,
            WsscError::Io(_) => true,
            _ => false,
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            WsscError::Persistence { .. } | WsscError::Io(_) => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Storage error (may be recoverable)"
                );
            }
            WsscError::Config { .. } | WsscError::Validation { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Configuration or validation error"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! creation_error {
    ($msg:expr, $component:expr) => {
        $crate::WsscError::SessionCreation {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::WsscError::SessionCreation {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! lookup_error {
    ($msg:expr, $component:expr) => {
        $crate::WsscError::SessionLookup {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::WsscError::SessionLookup {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! persistence_error {
    ($msg:expr, $component:expr) => {
        $crate::WsscError::Persistence {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::WsscError::Persistence {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::WsscError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'wssc config --init' to create default config"),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        $crate::WsscError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check the field value and format"),
        }
    };
}
