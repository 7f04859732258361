//! Control-API boundary: endpoint names, wire bodies, normalized responses
//! and the [`ControlApi`] trait every orchestration component talks to.
//!
//! Each call is exactly one request/response round trip. Nothing here
//! retries, batches or caches.

use crate::session::ConnectParams;
use crate::uri::Connection;
use crate::vm::{CreateVmRequest, VirtualMachine, VmAction};
use crate::{PilotError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Connect,
    ListAllVms,
    CreateVm,
    StartVm,
    StopVm,
    ShutdownVm,
    DeleteVm,
    ConsoleVm,
    MigrateVm,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Connect => "/connect",
            Endpoint::ListAllVms => "/listallvms",
            Endpoint::CreateVm => "/createvm",
            Endpoint::StartVm => "/startvm",
            Endpoint::StopVm => "/stopvm",
            Endpoint::ShutdownVm => "/shutdownvm",
            Endpoint::DeleteVm => "/deletevm",
            Endpoint::ConsoleVm => "/consolevm",
            Endpoint::MigrateVm => "/migratevm",
        }
    }

    pub fn for_action(action: VmAction) -> Self {
        match action {
            VmAction::Start => Endpoint::StartVm,
            VmAction::Stop => Endpoint::StopVm,
            VmAction::Shutdown => Endpoint::ShutdownVm,
            VmAction::Delete => Endpoint::DeleteVm,
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            Endpoint::Connect => "connect",
            Endpoint::ListAllVms => "list VMs",
            Endpoint::CreateVm => "create VM",
            Endpoint::StartVm => "start VM",
            Endpoint::StopVm => "stop VM",
            Endpoint::ShutdownVm => "shutdown VM",
            Endpoint::DeleteVm => "delete VM",
            Endpoint::ConsoleVm => "open console",
            Endpoint::MigrateVm => "migrate VM",
        }
    }
}

// Request bodies

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmTargetBody<'a> {
    pub uri: &'a str,
    pub vm_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateBody<'a> {
    pub uri: &'a str,
    pub vm_name: &'a str,
    pub dest_uri: &'a str,
}

/// `/listallvms` takes the raw session fields; `uri` rides along.
#[derive(Debug, Serialize)]
pub struct ListBody<'a> {
    #[serde(flatten)]
    pub params: &'a ConnectParams,
    pub uri: &'a str,
}

#[derive(Debug, Serialize)]
pub struct CreateBody<'a> {
    #[serde(flatten)]
    pub params: &'a ConnectParams,
    pub uri: &'a str,
    #[serde(rename = "vmName")]
    pub vm_name: &'a str,
    pub cpu: u32,
    pub memory: u32,
    pub iso: &'a str,
    pub disk_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<&'a str>,
}

impl<'a> CreateBody<'a> {
    pub fn new(connection: &'a Connection, request: &'a CreateVmRequest) -> Self {
        Self {
            params: &connection.params,
            uri: &connection.uri,
            vm_name: request.name.trim(),
            cpu: request.cpu_count,
            memory: request.memory_mb,
            iso: &request.iso_image,
            disk_size: request.disk_size_mb,
            network: request.network.as_deref(),
        }
    }
}

// Normalized responses

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectResponse {
    pub uri: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListVmsResponse {
    pub uri: Option<String>,
    pub vms: Vec<VirtualMachine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    #[serde(default)]
    pub vm_name: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateVmResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleResponse {
    pub status: String,
    #[serde(default)]
    pub vm_name: Option<String>,
    #[serde(default)]
    pub websocket_port: Option<u16>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ConsoleResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// `websocketPort` wins over the legacy `port` field.
    pub fn websocket_port(&self) -> Option<u16> {
        self.websocket_port.or(self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateResponse {
    #[serde(default)]
    pub vm_name: Option<String>,
    #[serde(default)]
    pub dest_uri: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Outcome fields shared by every response. The remote uses either
/// `success: bool` or `status: "ok" | "error"`, and puts the reason in
/// `message` or `error`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl Envelope {
    pub(crate) fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    fn is_rejection(&self) -> bool {
        self.success == Some(false)
            || self.status.as_deref().is_some_and(|s| s != "ok")
            || (self.success.is_none() && self.status.is_none() && self.error.is_some())
    }

    fn is_success(&self) -> bool {
        self.success == Some(true) || self.status.as_deref() == Some("ok")
    }

    pub(crate) fn reason(&self, endpoint: Endpoint) -> String {
        self.message
            .iter()
            .chain(self.error.iter())
            .find(|m| !m.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("{} failed", endpoint.operation()))
    }

    /// Classifies a body that must carry an explicit outcome.
    pub(crate) fn outcome(&self, endpoint: Endpoint) -> Result<()> {
        if self.is_rejection() {
            return Err(PilotError::RemoteRejection(self.reason(endpoint)));
        }
        if self.is_success() {
            return Ok(());
        }
        Err(PilotError::ResourceMissing(format!(
            "an outcome field in the {} response",
            endpoint.operation()
        )))
    }
}

fn decode<T: for<'de> Deserialize<'de>>(endpoint: Endpoint, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        PilotError::RemoteRejection(format!(
            "malformed {} response: {}",
            endpoint.operation(),
            e
        ))
    })
}

/// Turns a decoded JSON body into the normalized payload for `endpoint`.
pub fn normalize_connect(value: Value) -> Result<ConnectResponse> {
    let endpoint = Endpoint::Connect;
    Envelope::from_value(&value).outcome(endpoint)?;
    if value.get("uri").and_then(Value::as_str).is_none() {
        return Err(PilotError::ResourceMissing("uri in connect response".to_string()));
    }
    decode(endpoint, value)
}

pub fn normalize_list(value: Value) -> Result<ListVmsResponse> {
    let endpoint = Endpoint::ListAllVms;
    let envelope = Envelope::from_value(&value);
    if envelope.is_rejection() {
        return Err(PilotError::RemoteRejection(envelope.reason(endpoint)));
    }

    let uri = value.get("uri").and_then(Value::as_str).map(str::to_string);
    match value.get("vms") {
        Some(Value::Array(_)) => {
            let vms = value.get("vms").cloned().unwrap_or(Value::Null);
            Ok(ListVmsResponse {
                uri,
                vms: decode(endpoint, vms)?,
            })
        }
        // The remote nests its own failure object under `vms`.
        Some(nested @ Value::Object(_)) => Err(PilotError::RemoteRejection(
            Envelope::from_value(nested).reason(endpoint),
        )),
        Some(_) => Err(PilotError::RemoteRejection(
            "malformed list VMs response: vms is not a list".to_string(),
        )),
        None => Err(PilotError::ResourceMissing(
            "vms in list VMs response".to_string(),
        )),
    }
}

pub fn normalize_action(action: VmAction, value: Value) -> Result<ActionResponse> {
    let endpoint = Endpoint::for_action(action);
    Envelope::from_value(&value).outcome(endpoint)?;
    decode(endpoint, value)
}

pub fn normalize_create(value: Value) -> Result<CreateVmResponse> {
    let endpoint = Endpoint::CreateVm;
    Envelope::from_value(&value).outcome(endpoint)?;
    decode(endpoint, value)
}

pub fn normalize_console(value: Value) -> Result<ConsoleResponse> {
    let endpoint = Endpoint::ConsoleVm;
    Envelope::from_value(&value).outcome(endpoint)?;
    decode(endpoint, value)
}

pub fn normalize_migrate(value: Value) -> Result<MigrateResponse> {
    let endpoint = Endpoint::MigrateVm;
    Envelope::from_value(&value).outcome(endpoint)?;
    decode(endpoint, value)
}

/// The remote hypervisor-control service.
///
/// Implementations take already-resolved arguments, never the session.
#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn connect(&self, params: &ConnectParams) -> Result<ConnectResponse>;

    async fn list_vms(&self, connection: &Connection) -> Result<ListVmsResponse>;

    async fn vm_action(
        &self,
        connection: &Connection,
        action: VmAction,
        vm_name: &str,
    ) -> Result<ActionResponse>;

    /// Implementations must call [`CreateVmRequest::validate`] before sending.
    async fn create_vm(
        &self,
        connection: &Connection,
        request: &CreateVmRequest,
    ) -> Result<CreateVmResponse>;

    async fn open_console(&self, connection: &Connection, vm_name: &str)
    -> Result<ConsoleResponse>;

    async fn migrate_vm(
        &self,
        connection: &Connection,
        vm_name: &str,
        destination_uri: &str,
    ) -> Result<MigrateResponse>;

    async fn start_vm(&self, connection: &Connection, vm_name: &str) -> Result<ActionResponse> {
        self.vm_action(connection, VmAction::Start, vm_name).await
    }

    async fn stop_vm(&self, connection: &Connection, vm_name: &str) -> Result<ActionResponse> {
        self.vm_action(connection, VmAction::Stop, vm_name).await
    }

    async fn shutdown_vm(&self, connection: &Connection, vm_name: &str) -> Result<ActionResponse> {
        self.vm_action(connection, VmAction::Shutdown, vm_name).await
    }

    /// Irreversible. Callers confirm with the user first.
    async fn delete_vm(&self, connection: &Connection, vm_name: &str) -> Result<ActionResponse> {
        self.vm_action(connection, VmAction::Delete, vm_name).await
    }
}
