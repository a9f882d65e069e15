//! Host platform utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with querying the host environment.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("The software root environment variable (FLEET_EXEC_ROOT) is not set")]
    RootNotSet,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the root directory of the software installation.
///
/// The root is read from the `FLEET_EXEC_ROOT` environment variable, which
/// must point at the checkout containing the `params` and `sessions`
/// directories.
pub fn get_fleet_exec_root() -> Result<PathBuf, HostError> {
    std::env::var("FLEET_EXEC_ROOT")
        .map(PathBuf::from)
        .map_err(|_| HostError::RootNotSet)
}
