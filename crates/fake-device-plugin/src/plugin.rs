//! Lifecycle of the device plugin endpoint.
//!
//! A [`FakeDevicePlugin`] moves through `Created -> Serving -> Terminated`
//! exactly once. Starting binds the Unix socket, serves the DevicePlugin
//! service on a background task, confirms the socket accepts connections and
//! then registers with the kubelet. Stopping tears all of that down again and
//! leaves the instance unusable.

use std::fmt::Display;
use std::future::Future;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use device_plugin_pb::api::device_plugin_server::DevicePluginServer;
use error_stack::Report;
use error_stack::ResultExt;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::PluginConfig;
use crate::devices::DeviceInventory;
use crate::error::DevicePluginError;
use crate::error::PluginResult;
use crate::fatal::FatalHandler;
use crate::health::HealthReporter;
use crate::registration;
use crate::service::DevicePluginService;
use crate::uds;

/// Who the plugin is: the advertised resource and the socket serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginIdentity {
    pub resource_name: String,
    pub socket_path: PathBuf,
}

impl PluginIdentity {
    /// socket file name announced to the kubelet
    pub fn endpoint(&self) -> String {
        self.socket_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Observable lifecycle stage of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum LifecycleStage {
    #[display("created")]
    Created,
    #[display("serving")]
    Serving,
    #[display("terminated")]
    Terminated,
}

/// The live endpoint: exists only while serving.
#[derive(Debug)]
struct ServingHandle {
    stop: CancellationToken,
    server_task: JoinHandle<()>,
    service: DevicePluginService,
}

#[derive(Debug)]
enum LifecycleState {
    Created,
    Serving(ServingHandle),
    Terminated,
}

impl LifecycleState {
    fn stage(&self) -> LifecycleStage {
        match self {
            Self::Created => LifecycleStage::Created,
            Self::Serving(_) => LifecycleStage::Serving,
            Self::Terminated => LifecycleStage::Terminated,
        }
    }
}

/// Device plugin advertising a fixed pool of fake devices.
#[derive(Debug)]
pub struct FakeDevicePlugin {
    config: PluginConfig,
    identity: PluginIdentity,
    health: HealthReporter,
    fatal: FatalHandler,
    state: LifecycleState,
}

impl FakeDevicePlugin {
    pub fn new(config: PluginConfig) -> Self {
        let identity = PluginIdentity {
            resource_name: config.resource_name.clone(),
            socket_path: config.socket_path(),
        };
        let inventory = DeviceInventory::new(
            &config.device_prefix,
            &config.unit_label,
            config.max_devices,
        );
        Self {
            config,
            identity,
            health: HealthReporter::new(inventory.records()),
            fatal: FatalHandler::default(),
            state: LifecycleState::Created,
        }
    }

    /// Replace the reaction to background faults, which terminates the
    /// process by default.
    pub fn with_fatal_handler(mut self, fatal: FatalHandler) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn resource_name(&self) -> &str {
        &self.identity.resource_name
    }

    pub fn socket_path(&self) -> &Path {
        &self.identity.socket_path
    }

    pub fn stage(&self) -> LifecycleStage {
        self.state.stage()
    }

    /// Handle for reporting device health changes to the open streams.
    pub fn health_reporter(&self) -> HealthReporter {
        self.health.clone()
    }

    /// The service answering kubelet calls, available only while serving.
    pub fn service(&self) -> PluginResult<DevicePluginService> {
        match &self.state {
            LifecycleState::Serving(handle) => Ok(handle.service.clone()),
            other => Err(invalid_state("use", other.stage())),
        }
    }

    /// Serve the plugin socket and register with the kubelet.
    ///
    /// Errors for which [`DevicePluginError::is_fatal`] holds mean the socket
    /// could not be set up; the caller should terminate. A configuration
    /// error is reported before anything is touched. Any other error means
    /// the endpoint was torn down again after a failed self-check or
    /// registration. In every case the plugin ends up terminated.
    pub async fn start(&mut self) -> PluginResult<()> {
        if !matches!(self.state, LifecycleState::Created) {
            return Err(invalid_state("start", self.stage()));
        }

        if let Err(e) = self.config.validate() {
            error!("Invalid device plugin configuration: {e:?}");
            self.state = LifecycleState::Terminated;
            return Err(e);
        }

        let handle = match self.serve() {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    "Could not start device plugin for '{}': {e:?}",
                    self.resource_name()
                );
                self.state = LifecycleState::Terminated;
                return Err(e);
            }
        };
        self.state = LifecycleState::Serving(handle);

        if let Err(e) = self.self_check().await {
            error!("Device plugin socket did not come up: {e:?}");
            self.teardown_after_failure().await;
            return Err(e);
        }
        info!(
            "Starting to serve '{}' on {}",
            self.resource_name(),
            self.socket_path().display()
        );

        let request =
            registration::register_request(&self.identity.endpoint(), self.resource_name());
        if let Err(e) = registration::register_with_kubelet(
            &self.config.kubelet_socket,
            request,
            self.config.dial_timeout,
        )
        .await
        {
            error!("Could not register device plugin: {e:?}");
            self.teardown_after_failure().await;
            return Err(e);
        }
        info!(
            "Registered device plugin for '{}' with Kubelet",
            self.resource_name()
        );

        Ok(())
    }

    /// Stop serving and remove the socket.
    ///
    /// Does nothing when the plugin never started or already stopped.
    pub async fn stop(&mut self) -> PluginResult<()> {
        let handle = match std::mem::replace(&mut self.state, LifecycleState::Terminated) {
            LifecycleState::Serving(handle) => handle,
            other => {
                self.state = other;
                return Ok(());
            }
        };

        info!(
            "Stopping to serve '{}' on {}",
            self.resource_name(),
            self.socket_path().display()
        );

        // ends the gRPC server and every ListAndWatch stream
        handle.stop.cancel();

        let mut server_task = handle.server_task;
        if tokio::time::timeout(self.config.shutdown_timeout, &mut server_task)
            .await
            .is_err()
        {
            warn!(
                "gRPC server did not stop within {:?}, aborting it",
                self.config.shutdown_timeout
            );
            server_task.abort();
        }

        remove_socket(self.socket_path()).change_context(DevicePluginError::RemoveSocket {
            path: self.socket_path().to_path_buf(),
        })?;

        Ok(())
    }

    /// remove the stale socket, bind a new one and spawn the gRPC server
    fn serve(&self) -> PluginResult<ServingHandle> {
        let socket_path = self.socket_path().to_path_buf();

        let runtime = tokio::runtime::Handle::try_current().change_context(
            DevicePluginError::Serve {
                path: socket_path.clone(),
            },
        )?;

        remove_socket(&socket_path).change_context(DevicePluginError::RemoveStaleSocket {
            path: socket_path.clone(),
        })?;

        let listener = UnixListener::bind(&socket_path).change_context(
            DevicePluginError::Bind {
                path: socket_path.clone(),
            },
        )?;

        let stop = CancellationToken::new();
        let service = DevicePluginService::new(
            self.resource_name(),
            stop.clone(),
            self.health.clone(),
            self.fatal.clone(),
        );
        let device_plugin_server = DevicePluginServer::new(service.clone());

        info!(
            "Starting GRPC server for '{}', serving on '{}'",
            self.resource_name(),
            socket_path.display()
        );
        let shutdown_token = stop.clone();
        let server = tonic::transport::Server::builder()
            .add_service(device_plugin_server)
            .serve_with_incoming_shutdown(
                tokio_stream::wrappers::UnixListenerStream::new(listener),
                async move {
                    shutdown_token.cancelled().await;
                    info!("shutting down gRPC server");
                },
            );
        let server_task = runtime.spawn(supervise_server(
            self.resource_name().to_string(),
            stop.clone(),
            server,
            self.fatal.clone(),
        ));

        Ok(ServingHandle {
            stop,
            server_task,
            service,
        })
    }

    /// dial the freshly bound socket to make sure the server accepts connections
    async fn self_check(&self) -> PluginResult<()> {
        let channel = uds::connect(self.socket_path(), self.config.dial_timeout)
            .await
            .change_context(DevicePluginError::SelfCheck {
                path: self.socket_path().to_path_buf(),
            })?;
        drop(channel);
        Ok(())
    }

    async fn teardown_after_failure(&mut self) {
        if let Err(e) = self.stop().await {
            warn!("Failed to clean up device plugin after startup failure: {e:?}");
        }
    }
}

impl Drop for FakeDevicePlugin {
    fn drop(&mut self) {
        if let LifecycleState::Serving(handle) = &self.state {
            handle.stop.cancel();
        }
    }
}

/// Run the gRPC server and raise a fatal fault if it ends before `stop` fires.
async fn supervise_server<E: Display>(
    resource_name: String,
    stop: CancellationToken,
    server: impl Future<Output = Result<(), E>>,
    fatal: FatalHandler,
) {
    let result = server.await;
    if stop.is_cancelled() {
        return;
    }
    // only stop may end the server
    match result {
        Ok(()) => fatal.raise(
            &resource_name,
            "GRPC server has exited without being stopped",
        ),
        Err(e) => fatal.raise(&resource_name, format!("GRPC server crashed: {e}")),
    }
}

fn invalid_state(operation: &'static str, stage: LifecycleStage) -> Report<DevicePluginError> {
    Report::new(DevicePluginError::InvalidState { operation, stage })
}

/// remove a socket file, treating a missing file as success
fn remove_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    fn recording_handler() -> (FatalHandler, Arc<Mutex<Vec<String>>>) {
        let raised = Arc::new(Mutex::new(Vec::new()));
        let sink = raised.clone();
        let handler = FatalHandler::new(move |resource_name, cause| {
            sink.lock()
                .unwrap()
                .push(format!("{resource_name}: {cause}"));
        });
        (handler, raised)
    }

    #[test]
    fn endpoint_is_socket_basename() {
        let identity = PluginIdentity {
            resource_name: "demo.org/fake-dev".to_string(),
            socket_path: PathBuf::from("/var/lib/kubelet/device-plugins/fake-dev.sock"),
        };
        assert_eq!(identity.endpoint(), "fake-dev.sock");
    }

    #[test]
    fn remove_socket_ignores_missing_file() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("stale.sock");

        remove_socket(&path).expect("missing file is not an error");

        std::fs::write(&path, b"").expect("should create file");
        remove_socket(&path).expect("should remove file");
        assert!(!path.exists());
    }

    #[test]
    fn new_plugin_is_created() {
        let plugin = FakeDevicePlugin::new(PluginConfig::new("/tmp/plugins"));

        assert_eq!(plugin.stage(), LifecycleStage::Created);
        assert_eq!(plugin.socket_path(), Path::new("/tmp/plugins/fake-dev.sock"));
        assert_eq!(plugin.resource_name(), "demo.org/fake-dev");
        assert!(plugin.service().is_err());
    }

    #[test(tokio::test)]
    async fn server_exiting_without_stop_is_fatal() {
        let (handler, raised) = recording_handler();

        supervise_server(
            "demo.org/fake-dev".to_string(),
            CancellationToken::new(),
            async { Ok::<(), io::Error>(()) },
            handler,
        )
        .await;

        assert_eq!(
            *raised.lock().unwrap(),
            vec!["demo.org/fake-dev: GRPC server has exited without being stopped".to_string()]
        );
    }

    #[test(tokio::test)]
    async fn server_crash_is_fatal() {
        let (handler, raised) = recording_handler();

        supervise_server(
            "demo.org/fake-dev".to_string(),
            CancellationToken::new(),
            async { Err(io::Error::other("listener closed")) },
            handler,
        )
        .await;

        assert_eq!(
            *raised.lock().unwrap(),
            vec!["demo.org/fake-dev: GRPC server crashed: listener closed".to_string()]
        );
    }

    #[test(tokio::test)]
    async fn server_ending_after_stop_is_not_fatal() {
        let (handler, raised) = recording_handler();
        let stop = CancellationToken::new();
        stop.cancel();

        supervise_server(
            "demo.org/fake-dev".to_string(),
            stop,
            async { Err(io::Error::other("connection reset")) },
            handler,
        )
        .await;

        assert!(raised.lock().unwrap().is_empty());
    }

    #[test(tokio::test)]
    async fn start_rejects_invalid_config_before_touching_socket() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let config = PluginConfig::new(dir.path()).with_max_devices(0);
        let mut plugin = FakeDevicePlugin::new(config);

        let err = plugin.start().await.expect_err("zero devices should be rejected");

        assert!(matches!(
            err.current_context(),
            DevicePluginError::Configuration { .. }
        ));
        assert!(!err.current_context().is_fatal());
        assert_eq!(plugin.stage(), LifecycleStage::Terminated);
        assert!(!plugin.socket_path().exists());
    }

    #[test(tokio::test)]
    async fn start_rejects_parent_dir_socket_name() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let config = PluginConfig::new(dir.path()).with_socket_name("..");
        let mut plugin = FakeDevicePlugin::new(config);

        let err = plugin.start().await.expect_err("'..' is not a socket name");

        assert!(matches!(
            err.current_context(),
            DevicePluginError::Configuration { .. }
        ));
        assert_eq!(plugin.stage(), LifecycleStage::Terminated);
        assert!(plugin.service().is_err());
    }
}
