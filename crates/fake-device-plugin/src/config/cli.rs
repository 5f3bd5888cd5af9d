use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use device_plugin_pb::DEVICE_PLUGIN_PATH;
use utils::version;

use crate::config::PluginConfig;
use crate::config::DEFAULT_DEVICE_PREFIX;
use crate::config::DEFAULT_MAX_DEVICES;
use crate::config::DEFAULT_RESOURCE_NAME;
use crate::config::DEFAULT_SOCKET_NAME;
use crate::config::DEFAULT_UNIT_LABEL;

/// Advertise a pool of fake devices to the kubelet
#[derive(Parser, Debug, Clone)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    /// Resource name registered with the kubelet
    #[arg(long, env = "FAKE_DEVICE_RESOURCE_NAME", default_value = DEFAULT_RESOURCE_NAME)]
    pub resource_name: String,

    /// Directory where the device plugin socket is created
    #[arg(long, env = "FAKE_DEVICE_PLUGIN_PATH", default_value = DEVICE_PLUGIN_PATH)]
    pub device_plugin_path: PathBuf,

    /// Device plugin socket file name
    #[arg(long, env = "FAKE_DEVICE_SOCKET_NAME", default_value = DEFAULT_SOCKET_NAME)]
    pub socket_name: String,

    /// Kubelet registration socket, defaults to kubelet.sock in the device plugin path
    #[arg(long, env = "FAKE_DEVICE_KUBELET_SOCKET")]
    pub kubelet_socket: Option<PathBuf>,

    /// Number of fake devices to advertise
    #[arg(long, env = "FAKE_DEVICE_MAX_DEVICES", default_value_t = DEFAULT_MAX_DEVICES)]
    pub max_devices: usize,

    /// Prefix of the advertised device ids
    #[arg(long, env = "FAKE_DEVICE_PREFIX", default_value = DEFAULT_DEVICE_PREFIX)]
    pub device_prefix: String,

    /// Unit size label embedded in the advertised device ids
    #[arg(long, env = "FAKE_DEVICE_UNIT_LABEL", default_value = DEFAULT_UNIT_LABEL)]
    pub unit_label: String,

    /// Timeout in seconds for dialing the plugin and kubelet sockets
    #[arg(long, env = "FAKE_DEVICE_DIAL_TIMEOUT_SECS", default_value_t = 5)]
    pub dial_timeout_secs: u64,
}

impl From<&Cli> for PluginConfig {
    fn from(cli: &Cli) -> Self {
        let mut config = PluginConfig::new(&cli.device_plugin_path)
            .with_resource_name(&cli.resource_name)
            .with_socket_name(&cli.socket_name)
            .with_max_devices(cli.max_devices)
            .with_device_naming(&cli.device_prefix, &cli.unit_label)
            .with_dial_timeout(Duration::from_secs(cli.dial_timeout_secs));
        if let Some(kubelet_socket) = &cli.kubelet_socket {
            config = config.with_kubelet_socket(kubelet_socket);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_plugin_config() {
        let cli = Cli::try_parse_from(["fake-device-plugin"]).expect("should parse defaults");
        let config = PluginConfig::from(&cli);
        let default = PluginConfig::default();

        assert_eq!(config.resource_name, default.resource_name);
        assert_eq!(config.socket_path(), default.socket_path());
        assert_eq!(config.kubelet_socket, default.kubelet_socket);
        assert_eq!(config.max_devices, default.max_devices);
        assert_eq!(config.dial_timeout, default.dial_timeout);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "fake-device-plugin",
            "--resource-name",
            "example.com/widget",
            "--device-plugin-path",
            "/tmp/plugins",
            "--socket-name",
            "widget.sock",
            "--max-devices",
            "3",
            "--device-prefix",
            "widget",
            "--unit-label",
            "2GiB",
            "--dial-timeout-secs",
            "1",
        ])
        .expect("should parse flags");
        let config = PluginConfig::from(&cli);

        assert_eq!(config.resource_name, "example.com/widget");
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/plugins/widget.sock"));
        assert_eq!(config.kubelet_socket, PathBuf::from("/tmp/plugins/kubelet.sock"));
        assert_eq!(config.max_devices, 3);
        assert_eq!(config.device_prefix, "widget");
        assert_eq!(config.unit_label, "2GiB");
        assert_eq!(config.dial_timeout, Duration::from_secs(1));
    }
}
