//! Generated bindings for the kubelet device plugin API (`deviceplugin/v1beta1`).

#![allow(clippy::doc_markdown)]
pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

/// API version announced during registration.
pub const VERSION: &str = "v1beta1";

/// Health value of a device that can be allocated.
pub const HEALTHY: &str = "Healthy";

/// Health value of a device that must not be allocated.
pub const UNHEALTHY: &str = "Unhealthy";

/// Directory kubelet watches for device plugin sockets.
pub const DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins/";

/// File name of the kubelet registration socket inside [`DEVICE_PLUGIN_PATH`].
pub const KUBELET_SOCKET_NAME: &str = "kubelet.sock";
