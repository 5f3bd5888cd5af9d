//! Registration of the device plugin with the kubelet.

use std::path::Path;
use std::time::Duration;

use device_plugin_pb::api::registration_client::RegistrationClient;
use device_plugin_pb::api::DevicePluginOptions;
use device_plugin_pb::api::RegisterRequest;
use device_plugin_pb::VERSION;
use error_stack::Report;
use tonic::Request;
use tracing::info;

use crate::error::DevicePluginError;
use crate::error::PluginResult;
use crate::uds;

/// Build the request announcing `resource_name` served on `endpoint`.
///
/// `endpoint` is the socket file name relative to the kubelet device plugin
/// directory, not a full path.
pub fn register_request(endpoint: &str, resource_name: &str) -> RegisterRequest {
    RegisterRequest {
        version: VERSION.to_string(),
        endpoint: endpoint.to_string(),
        resource_name: resource_name.to_string(),
        options: Some(DevicePluginOptions::default()),
    }
}

/// Register the device plugin with the kubelet listening on `kubelet_socket`.
///
/// Makes a single attempt. Both the dial and the call are bounded by
/// `timeout`; failures are returned as [`DevicePluginError::Registration`].
pub async fn register_with_kubelet(
    kubelet_socket: &Path,
    request: RegisterRequest,
    timeout: Duration,
) -> PluginResult<()> {
    info!(
        resource_name = %request.resource_name,
        endpoint = %request.endpoint,
        "registering device plugin with kubelet: {}",
        kubelet_socket.display()
    );

    let registration_error = |message: String| {
        Report::new(DevicePluginError::Registration {
            kubelet_socket: kubelet_socket.to_path_buf(),
            message,
        })
    };

    // the channel is dropped on every return path below
    let channel = uds::connect(kubelet_socket, timeout)
        .await
        .map_err(|e| registration_error(format!("dial failed: {e}")))?;
    let mut client = RegistrationClient::new(channel);

    match tokio::time::timeout(timeout, client.register(Request::new(request))).await {
        Ok(Ok(_)) => {
            info!("successfully registered device plugin with kubelet");
            Ok(())
        }
        Ok(Err(status)) => Err(registration_error(format!(
            "kubelet rejected registration: {status}"
        ))),
        Err(_) => Err(registration_error(format!(
            "no reply within {timeout:?}"
        ))),
    }
}
