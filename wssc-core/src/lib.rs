//! WSSC Core - shared foundations for secure conversation session management
//!
//! Error taxonomy, configuration, logging, and the clock / random-source
//! collaborators consumed by the session and persistence crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use crate::config::*;
pub use error::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use tracing;
