use crate::api::{
    ActionResponse, ConnectResponse, ConsoleResponse, ControlApi, CreateBody, CreateVmResponse,
    Endpoint, Envelope, ListBody, ListVmsResponse, MigrateBody, MigrateResponse, VmTargetBody,
    normalize_action, normalize_connect, normalize_console, normalize_create, normalize_list,
    normalize_migrate,
};
use crate::config::ApiConfig;
use crate::session::ConnectParams;
use crate::uri::Connection;
use crate::vm::{CreateVmRequest, VmAction};
use crate::{PilotError, Result, log_debug, log_warn};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// [`ControlApi`] over HTTP: one JSON POST per call.
#[derive(Clone)]
pub struct HttpControlApi {
    client: Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl HttpControlApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            timeout: None,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        let api = Self::new(config.base_url.clone());
        match config.request_timeout() {
            Some(timeout) => api.with_timeout(timeout),
            None => api,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), endpoint.path())
    }

    async fn post<B: Serialize + ?Sized>(&self, endpoint: Endpoint, body: &B) -> Result<Value> {
        let url = self.url(endpoint);
        log_debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            log_warn!("{} did not complete: {}", endpoint.path(), e);
            PilotError::TransportFailure(format!("{}: {}", endpoint.path(), e))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            log_warn!("{} response body was cut off: {}", endpoint.path(), e);
            PilotError::TransportFailure(format!("{}: {}", endpoint.path(), e))
        })?;

        let parsed = serde_json::from_str::<Value>(&text);

        if !status.is_success() {
            log_warn!("{} answered HTTP {}", endpoint.path(), status);
            let reason = match &parsed {
                Ok(value) => Envelope::from_value(value).reason(endpoint),
                Err(_) => format!("HTTP {}", status),
            };
            return Err(PilotError::RemoteRejection(reason));
        }

        parsed.map_err(|e| {
            log_warn!("{} returned a non-JSON body: {}", endpoint.path(), e);
            PilotError::RemoteRejection(format!("invalid response body from {}", endpoint.path()))
        })
    }
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn connect(&self, params: &ConnectParams) -> Result<ConnectResponse> {
        let value = self.post(Endpoint::Connect, params).await?;
        normalize_connect(value)
    }

    async fn list_vms(&self, connection: &Connection) -> Result<ListVmsResponse> {
        let body = ListBody {
            params: &connection.params,
            uri: &connection.uri,
        };
        let value = self.post(Endpoint::ListAllVms, &body).await?;
        normalize_list(value)
    }

    async fn vm_action(
        &self,
        connection: &Connection,
        action: VmAction,
        vm_name: &str,
    ) -> Result<ActionResponse> {
        let body = VmTargetBody {
            uri: &connection.uri,
            vm_name,
        };
        let value = self.post(Endpoint::for_action(action), &body).await?;
        normalize_action(action, value)
    }

    async fn create_vm(
        &self,
        connection: &Connection,
        request: &CreateVmRequest,
    ) -> Result<CreateVmResponse> {
        request.validate()?;
        let body = CreateBody::new(connection, request);
        let value = self.post(Endpoint::CreateVm, &body).await?;
        normalize_create(value)
    }

    async fn open_console(
        &self,
        connection: &Connection,
        vm_name: &str,
    ) -> Result<ConsoleResponse> {
        let body = VmTargetBody {
            uri: &connection.uri,
            vm_name,
        };
        let value = self.post(Endpoint::ConsoleVm, &body).await?;
        normalize_console(value)
    }

    async fn migrate_vm(
        &self,
        connection: &Connection,
        vm_name: &str,
        destination_uri: &str,
    ) -> Result<MigrateResponse> {
        let body = MigrateBody {
            uri: &connection.uri,
            vm_name,
            dest_uri: destination_uri,
        };
        let value = self.post(Endpoint::MigrateVm, &body).await?;
        normalize_migrate(value)
    }
}
