use std::future::Future;
use std::sync::Arc;

use log::{debug, info};
use tokio::net::TcpListener;
use tonic::transport::server::TcpIncoming;
use tonic::{Request, Response, Status};

use crate::controller;
use crate::controller::PartitionController;
use crate::rpc::convert::{
    common_params, general_reply, session_id, status_reply, topology_source,
};
use crate::rpc::gen;
use crate::rpc::gen::controller_service_server::{ControllerService, ControllerServiceServer};

/// The gRPC face of the partition controller: a thin translation layer,
/// one rpc per request kind.
pub struct ControllerServer {
    controller: Arc<PartitionController>,
}

impl ControllerServer {
    pub fn new(controller: Arc<PartitionController>) -> Self {
        Self { controller }
    }
}

#[tonic::async_trait]
impl ControllerService for ControllerServer {
    async fn initialize(
        &self,
        request: Request<gen::InitializeRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let request = controller::InitializeRequest {
            common: common_params(request.common),
            session_id: session_id(&request.session_id)?,
        };
        Ok(Response::new(general_reply(
            self.controller.initialize(request).await,
        )))
    }

    async fn submit(
        &self,
        request: Request<gen::SubmitRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let request = controller::SubmitRequest {
            common: common_params(request.common),
            plugin: request.plugin,
            resources: request.resources,
        };
        Ok(Response::new(general_reply(
            self.controller.submit(request).await,
        )))
    }

    async fn activate(
        &self,
        request: Request<gen::ActivateRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let request = controller::ActivateRequest {
            common: common_params(request.common),
            topology: topology_source(request.topology),
        };
        Ok(Response::new(general_reply(
            self.controller.activate(request).await,
        )))
    }

    async fn run(
        &self,
        request: Request<gen::RunRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let request = controller::RunRequest {
            common: common_params(request.common),
            session_id: session_id(&request.session_id)?,
            plugin: request.plugin,
            resources: request.resources,
            topology: topology_source(request.topology),
            extract_topo_resources: request.extract_topo_resources,
        };
        Ok(Response::new(general_reply(
            self.controller.run(request).await,
        )))
    }

    async fn update(
        &self,
        request: Request<gen::UpdateRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let request = controller::UpdateRequest {
            common: common_params(request.common),
            topology: topology_source(request.topology),
        };
        Ok(Response::new(general_reply(
            self.controller.update(request).await,
        )))
    }

    async fn set_properties(
        &self,
        request: Request<gen::SetPropertiesRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let request = controller::SetPropertiesRequest {
            common: common_params(request.common),
            path: request.path,
            properties: request
                .properties
                .into_iter()
                .map(|p| (p.key, p.value))
                .collect(),
        };
        Ok(Response::new(general_reply(
            self.controller.set_properties(request).await,
        )))
    }

    async fn get_state(
        &self,
        request: Request<gen::DeviceRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = device_request(request);
        Ok(Response::new(general_reply(
            self.controller.get_state(request).await,
        )))
    }

    async fn configure(
        &self,
        request: Request<gen::DeviceRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = device_request(request);
        Ok(Response::new(general_reply(
            self.controller.configure(request).await,
        )))
    }

    async fn start(
        &self,
        request: Request<gen::DeviceRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = device_request(request);
        Ok(Response::new(general_reply(
            self.controller.start(request).await,
        )))
    }

    async fn stop(
        &self,
        request: Request<gen::DeviceRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = device_request(request);
        Ok(Response::new(general_reply(
            self.controller.stop(request).await,
        )))
    }

    async fn reset(
        &self,
        request: Request<gen::DeviceRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = device_request(request);
        Ok(Response::new(general_reply(
            self.controller.reset(request).await,
        )))
    }

    async fn terminate(
        &self,
        request: Request<gen::DeviceRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = device_request(request);
        Ok(Response::new(general_reply(
            self.controller.terminate(request).await,
        )))
    }

    async fn shutdown(
        &self,
        request: Request<gen::ShutdownRequest>,
    ) -> Result<Response<gen::GeneralReply>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let request = controller::ShutdownRequest {
            common: common_params(request.common),
        };
        Ok(Response::new(general_reply(
            self.controller.shutdown(request).await,
        )))
    }

    async fn status(
        &self,
        request: Request<gen::StatusRequest>,
    ) -> Result<Response<gen::StatusReply>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let request = controller::StatusRequest {
            running_only: request.running_only,
        };
        Ok(Response::new(status_reply(
            self.controller.status(request).await,
        )))
    }
}

fn device_request(request: Request<gen::DeviceRequest>) -> controller::DeviceRequest {
    let request = request.into_inner();
    debug!("{request:?}");
    controller::DeviceRequest {
        common: common_params(request.common),
        path: request.path,
        detailed: request.detailed,
    }
}

/// Serve the controller on a TCP listener until the shutdown signal
/// resolves.
pub async fn serve<F>(
    controller: Arc<PartitionController>,
    listener: TcpListener,
    signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()>,
{
    info!("serving the partition controller on {}", listener.local_addr()?);
    let incoming = TcpIncoming::from(listener).with_nodelay(Some(true));
    tonic::transport::Server::builder()
        .add_service(ControllerServiceServer::new(ControllerServer::new(
            controller,
        )))
        .serve_with_incoming_shutdown(incoming, signal)
        .await?;
    Ok(())
}
