//! Error types for the device plugin lifecycle.

use core::error::Error;
use std::path::PathBuf;

use derive_more::Display;
use error_stack::Report;

use crate::plugin::LifecycleStage;

/// Result type for device plugin operations.
pub type PluginResult<T> = Result<T, Report<DevicePluginError>>;

/// Errors that can occur while serving or registering the device plugin.
#[derive(Debug, Display)]
pub enum DevicePluginError {
    /// A leftover socket from a previous run could not be removed
    #[display("Failed to remove stale socket {}", path.display())]
    RemoveStaleSocket { path: PathBuf },

    /// The listening socket could not be bound
    #[display("Failed to bind device plugin socket {}", path.display())]
    Bind { path: PathBuf },

    /// The gRPC server could not be launched
    #[display("Failed to launch gRPC server on {}", path.display())]
    Serve { path: PathBuf },

    /// The freshly bound socket did not accept a connection
    #[display("Device plugin socket {} is not reachable", path.display())]
    SelfCheck { path: PathBuf },

    /// Registration with the kubelet failed
    #[display("Failed to register with kubelet at {}: {message}", kubelet_socket.display())]
    Registration {
        kubelet_socket: PathBuf,
        message: String,
    },

    /// The socket could not be removed during shutdown
    #[display("Failed to remove device plugin socket {}", path.display())]
    RemoveSocket { path: PathBuf },

    /// The operation is not valid in the current lifecycle stage
    #[display("Cannot {operation} a device plugin that is {stage}")]
    InvalidState {
        operation: &'static str,
        stage: LifecycleStage,
    },

    /// Invalid plugin configuration
    #[display("Configuration error: {message}")]
    Configuration { message: String },
}

impl Error for DevicePluginError {}

impl DevicePluginError {
    /// Whether the process must not keep running after this error.
    ///
    /// Fatal errors leave the plugin half initialised; everything else is
    /// reported to the caller, who may retry from a fresh instance.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RemoveStaleSocket { .. } | Self::Bind { .. } | Self::Serve { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn error_display_formatting() {
        let bind = DevicePluginError::Bind {
            path: PathBuf::from("/tmp/dp/fake-dev.sock"),
        };
        assert_eq!(
            bind.to_string(),
            "Failed to bind device plugin socket /tmp/dp/fake-dev.sock"
        );

        let registration = DevicePluginError::Registration {
            kubelet_socket: PathBuf::from("/tmp/dp/kubelet.sock"),
            message: "connection refused".to_string(),
        };
        assert_eq!(
            registration.to_string(),
            "Failed to register with kubelet at /tmp/dp/kubelet.sock: connection refused"
        );

        let invalid = DevicePluginError::InvalidState {
            operation: "start",
            stage: LifecycleStage::Terminated,
        };
        assert_eq!(
            invalid.to_string(),
            "Cannot start a device plugin that is terminated"
        );
    }

    #[test]
    fn startup_faults_are_fatal() {
        let path = PathBuf::from("/tmp/fake-dev.sock");
        assert!(DevicePluginError::RemoveStaleSocket { path: path.clone() }.is_fatal());
        assert!(DevicePluginError::Bind { path: path.clone() }.is_fatal());
        assert!(DevicePluginError::Serve { path: path.clone() }.is_fatal());
        assert!(!DevicePluginError::SelfCheck { path: path.clone() }.is_fatal());
        assert!(!DevicePluginError::RemoveSocket { path }.is_fatal());
        assert!(!DevicePluginError::Registration {
            kubelet_socket: PathBuf::from("/tmp/kubelet.sock"),
            message: "timed out".to_string(),
        }
        .is_fatal());
    }
}
