//! Shared typed errors
//!
//! Errors that cross the coordinator's internal seams: provisioning
//! failures are fatal to an execution, lifecycle errors describe the cases
//! finalization refuses to guess about.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a runtime provisioner backend
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A runtime could not be created or started
    #[error("failed to start runtime: {0}")]
    StartFailed(String),

    /// Some runtimes started before one failed; the started ones were torn
    /// down again. Never reported as a short success list.
    #[error("only {started} of {requested} runtimes started for execution {execution_id}")]
    Partial {
        execution_id: Uuid,
        requested: u32,
        started: u32,
    },

    /// The backend itself (podman, process table) was unusable
    #[error("provisioner backend unavailable: {0}")]
    Backend(String),
}

/// Errors raised by execution finalization
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Agents ended in a mixed Terminated/Crashed set. There is no defined
    /// final status for this combination; the execution is left for
    /// operator attention instead of being finalized ambiguously.
    #[error(
        "execution {execution_id} ended with an unsupported agent-state combination: \
         {terminated} terminated, {crashed} crashed"
    )]
    UnsupportedStateCombination {
        execution_id: Uuid,
        terminated: usize,
        crashed: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_provision_message() {
        let err = ProvisionError::Partial {
            execution_id: Uuid::nil(),
            requested: 5,
            started: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("2 of 5"));
    }

    #[test]
    fn test_unsupported_combination_message() {
        let err = LifecycleError::UnsupportedStateCombination {
            execution_id: Uuid::nil(),
            terminated: 1,
            crashed: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("1 terminated"));
        assert!(msg.contains("2 crashed"));
    }
}
