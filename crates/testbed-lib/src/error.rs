//! Error types shared by the testbed library

use thiserror::Error;

/// Errors raised by the control-loop engine
#[derive(Debug, Error)]
pub enum TestbedError {
    /// A required component has not been set up
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// A keyed registry lookup found nothing
    #[error("not found: {0}")]
    NotFound(String),

    /// A setter received a value it cannot accept
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was attempted on a component in the wrong state
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by an external collaborator (VM, sensor, driver)
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl TestbedError {
    /// True for errors that describe the experiment's setup rather than one cycle
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TestbedError::NotConfigured(_)
                | TestbedError::NotFound(_)
                | TestbedError::InvalidArgument(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TestbedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(TestbedError::NotConfigured("app".into()).is_configuration());
        assert!(TestbedError::InvalidArgument("ts".into()).is_configuration());
        assert!(!TestbedError::InvalidState("nan".into()).is_configuration());
        assert!(!TestbedError::Collaborator(anyhow::anyhow!("vm gone")).is_configuration());
    }

    #[test]
    fn test_collaborator_error_is_transparent() {
        let err: TestbedError = anyhow::anyhow!("hypervisor unreachable").into();
        assert_eq!(err.to_string(), "hypervisor unreachable");
    }
}
