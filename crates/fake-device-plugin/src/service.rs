use std::pin::Pin;
use std::sync::Arc;

use device_plugin_pb::api::device_plugin_server::DevicePlugin;
use device_plugin_pb::api::AllocateRequest;
use device_plugin_pb::api::AllocateResponse;
use device_plugin_pb::api::ContainerAllocateResponse;
use device_plugin_pb::api::DevicePluginOptions;
use device_plugin_pb::api::Empty;
use device_plugin_pb::api::ListAndWatchResponse;
use device_plugin_pb::api::PreStartContainerRequest;
use device_plugin_pb::api::PreStartContainerResponse;
use device_plugin_pb::api::PreferredAllocationRequest;
use device_plugin_pb::api::PreferredAllocationResponse;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::info;

use crate::devices::list_and_watch_response;
use crate::devices::DeviceRecord;
use crate::fatal::FatalHandler;
use crate::health::HealthReporter;

/// DevicePlugin service implementation
///
/// Advertises the fake inventory and answers every other call with an empty
/// success response.
#[derive(Debug, Clone)]
pub struct DevicePluginService {
    resource_name: Arc<str>,
    /// stop signal, fired once when the plugin stops
    stop: CancellationToken,
    health: HealthReporter,
    fatal: FatalHandler,
}

impl DevicePluginService {
    pub(crate) fn new(
        resource_name: &str,
        stop: CancellationToken,
        health: HealthReporter,
        fatal: FatalHandler,
    ) -> Self {
        Self {
            resource_name: Arc::from(resource_name),
            stop,
            health,
            fatal,
        }
    }
}

/// Per-stream state of one ListAndWatch call.
struct DeviceWatch {
    resource_name: Arc<str>,
    stop: CancellationToken,
    devices: watch::Receiver<Vec<DeviceRecord>>,
    tx: mpsc::UnboundedSender<Result<ListAndWatchResponse, Status>>,
    fatal: FatalHandler,
}

impl DeviceWatch {
    /// push the current device list, returns false once kubelet is gone
    fn push(&mut self) -> bool {
        let response = list_and_watch_response(&self.devices.borrow_and_update());
        if let Err(e) = self.tx.send(Ok(response)) {
            self.fatal.raise(
                &self.resource_name,
                format!("failed to send ListAndWatch response: {e}"),
            );
            return false;
        }
        true
    }

    async fn run(mut self) {
        if self.stop.is_cancelled() {
            debug!("device plugin already stopped, closing stream");
            return;
        }

        info!(
            devices = self.devices.borrow().len(),
            "sending initial device list"
        );
        if !self.push() {
            return;
        }

        let mut health_open = true;
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    info!("device watch task stopped");
                    return;
                }
                changed = self.devices.changed(), if health_open => match changed {
                    Ok(()) => {
                        debug!("device health changed, resending device list");
                        if !self.push() {
                            return;
                        }
                    }
                    Err(_) => health_open = false,
                },
            }
        }
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    /// get device plugin options
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");

        Ok(Response::new(DevicePluginOptions::default()))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    /// list and watch device state changes
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        info!(resource_name = %self.resource_name, "starting to watch device list");

        let (tx, rx) = mpsc::unbounded_channel();
        let watch = DeviceWatch {
            resource_name: self.resource_name.clone(),
            stop: self.stop.clone(),
            devices: self.health.subscribe(),
            tx,
            fatal: self.fatal.clone(),
        };

        tokio::spawn(watch.run());

        let stream = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }

    /// get preferred device allocation
    async fn get_preferred_allocation(
        &self,
        request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        let req = request.into_inner();
        debug!("getting preferred device allocation: {:?}", req);

        Ok(Response::new(PreferredAllocationResponse {
            container_responses: vec![],
        }))
    }

    /// allocate devices to container
    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        let req = request.into_inner();

        // fake devices need nothing in the container, one empty response per request
        let container_responses = req
            .container_requests
            .iter()
            .map(|container_req| {
                info!(
                    "allocating devices to container, device IDs: {:?}",
                    container_req.devices_ids
                );
                ContainerAllocateResponse::default()
            })
            .collect();

        Ok(Response::new(AllocateResponse {
            container_responses,
        }))
    }

    /// pre-start container
    async fn pre_start_container(
        &self,
        request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        let req = request.into_inner();
        debug!("pre-start container processing: {:?}", req);

        Ok(Response::new(PreStartContainerResponse {}))
    }
}
