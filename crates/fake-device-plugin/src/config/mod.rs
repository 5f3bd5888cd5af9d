//! device plugin configuration
//!
//! [`PluginConfig`] is what the library consumes; [`Cli`] maps command line
//! flags and environment variables onto it.

pub mod cli;

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use device_plugin_pb::DEVICE_PLUGIN_PATH;
use device_plugin_pb::KUBELET_SOCKET_NAME;
use error_stack::Report;

use crate::error::DevicePluginError;
use crate::error::PluginResult;

pub use cli::Cli;

/// Resource name advertised to the kubelet by default.
pub const DEFAULT_RESOURCE_NAME: &str = "demo.org/fake-dev";

/// Socket file name of the plugin inside the device plugin directory.
pub const DEFAULT_SOCKET_NAME: &str = "fake-dev.sock";

/// Number of fake units advertised by default, one per MiB of 115 GiB.
pub const DEFAULT_MAX_DEVICES: usize = 115 * 1024;

pub const DEFAULT_DEVICE_PREFIX: &str = "vgpu-memory";

pub const DEFAULT_UNIT_LABEL: &str = "1MiB";

/// Bound on dialing the plugin's own socket and the kubelet socket.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on waiting for the gRPC server to drain during stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Device plugin configuration.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// resource name (e.g. "demo.org/fake-dev")
    pub resource_name: String,
    /// directory holding the plugin socket, usually the kubelet device plugin directory
    pub socket_dir: PathBuf,
    /// plugin socket file name, announced to the kubelet as the endpoint
    pub socket_name: String,
    /// kubelet registration socket
    pub kubelet_socket: PathBuf,
    /// number of fake devices advertised in ListAndWatch
    pub max_devices: usize,
    /// prefix of every device id
    pub device_prefix: String,
    /// unit size label embedded in every device id
    pub unit_label: String,
    /// dial timeout for the self-check and the registration call
    pub dial_timeout: Duration,
    /// how long stop waits for the gRPC server to finish
    pub shutdown_timeout: Duration,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self::new(DEVICE_PLUGIN_PATH)
    }
}

impl PluginConfig {
    /// create a config with default parameters whose sockets live in `socket_dir`.
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        let socket_dir = socket_dir.into();
        Self {
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
            kubelet_socket: socket_dir.join(KUBELET_SOCKET_NAME),
            socket_dir,
            socket_name: DEFAULT_SOCKET_NAME.to_string(),
            max_devices: DEFAULT_MAX_DEVICES,
            device_prefix: DEFAULT_DEVICE_PREFIX.to_string(),
            unit_label: DEFAULT_UNIT_LABEL.to_string(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// set resource name.
    pub fn with_resource_name(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = resource_name.into();
        self
    }

    /// set plugin socket file name.
    pub fn with_socket_name(mut self, socket_name: impl Into<String>) -> Self {
        self.socket_name = socket_name.into();
        self
    }

    /// set kubelet registration socket.
    pub fn with_kubelet_socket(mut self, kubelet_socket: impl Into<PathBuf>) -> Self {
        self.kubelet_socket = kubelet_socket.into();
        self
    }

    /// set number of advertised devices.
    pub fn with_max_devices(mut self, max_devices: usize) -> Self {
        self.max_devices = max_devices;
        self
    }

    /// set device id prefix and unit label.
    pub fn with_device_naming(
        mut self,
        device_prefix: impl Into<String>,
        unit_label: impl Into<String>,
    ) -> Self {
        self.device_prefix = device_prefix.into();
        self.unit_label = unit_label.into();
        self
    }

    /// set dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// set shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// full path of the plugin socket.
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(&self.socket_name)
    }

    /// check the config can describe a registrable plugin.
    pub fn validate(&self) -> PluginResult<()> {
        if self.resource_name.is_empty() {
            return Err(configuration_error("resource name must not be empty"));
        }
        match self.resource_name.split_once('/') {
            Some((domain, name)) if !domain.is_empty() && !name.is_empty() => {}
            _ => {
                return Err(configuration_error(format!(
                    "resource name `{}` must have the form <domain>/<name>",
                    self.resource_name
                )))
            }
        }
        if self.socket_name.contains('/') || Path::new(&self.socket_name).file_name().is_none() {
            return Err(configuration_error(format!(
                "socket name `{}` is not a file name",
                self.socket_name
            )));
        }
        if self.max_devices == 0 {
            return Err(configuration_error("max devices must be greater than zero"));
        }
        Ok(())
    }
}

fn configuration_error(message: impl Into<String>) -> Report<DevicePluginError> {
    Report::new(DevicePluginError::Configuration {
        message: message.into(),
    })
}
