// Shared fake control API for orchestration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use virtpilot::api::{
    ActionResponse, ConnectResponse, ConsoleResponse, ControlApi, CreateVmResponse,
    ListVmsResponse, MigrateResponse,
};
use virtpilot::session::ConnectParams;
use virtpilot::uri::{Connection, connection_uri};
use virtpilot::{CreateVmRequest, PilotError, Result, SessionStore, VirtualMachine, VmAction};

#[derive(Debug, Clone)]
pub enum Failure {
    Transport,
    Reject(String),
}

impl Failure {
    fn into_error(self) -> PilotError {
        match self {
            Failure::Transport => PilotError::TransportFailure("connection refused".to_string()),
            Failure::Reject(msg) => PilotError::RemoteRejection(msg),
        }
    }
}

pub struct ListStep {
    pub result: std::result::Result<Vec<VirtualMachine>, Failure>,
    pub gate: Option<oneshot::Receiver<()>>,
}

impl ListStep {
    pub fn ok(vms: Vec<VirtualMachine>) -> Self {
        Self {
            result: Ok(vms),
            gate: None,
        }
    }

    pub fn fail(failure: Failure) -> Self {
        Self {
            result: Err(failure),
            gate: None,
        }
    }

    pub fn gated(mut self) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        self.gate = Some(rx);
        (self, tx)
    }
}

#[derive(Default)]
pub struct FakeControlApi {
    calls: Mutex<Vec<String>>,
    connect_failure: Mutex<Option<Failure>>,
    list_steps: Mutex<VecDeque<ListStep>>,
    action_failure: Mutex<Option<Failure>>,
    migrate_failure: Mutex<Option<Failure>>,
    migrate_gate: Mutex<Option<oneshot::Receiver<()>>>,
    console_response: Mutex<Option<ConsoleResponse>>,
}

pub fn vm(name: &str, active: bool) -> VirtualMachine {
    VirtualMachine {
        name: name.to_string(),
        active,
    }
}

impl FakeControlApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn fail_connect(&self, failure: Failure) {
        *self.connect_failure.lock().unwrap() = Some(failure);
    }

    pub fn push_list(&self, step: ListStep) {
        self.list_steps.lock().unwrap().push_back(step);
    }

    pub fn fail_actions(&self, failure: Failure) {
        *self.action_failure.lock().unwrap() = Some(failure);
    }

    pub fn fail_migration(&self, failure: Failure) {
        *self.migrate_failure.lock().unwrap() = Some(failure);
    }

    /// The next migrate call blocks until the returned sender fires.
    pub fn gate_migration(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.migrate_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn set_console(&self, response: ConsoleResponse) {
        *self.console_response.lock().unwrap() = Some(response);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ControlApi for FakeControlApi {
    async fn connect(&self, params: &ConnectParams) -> Result<ConnectResponse> {
        self.record("connect".to_string());
        let failure = self.connect_failure.lock().unwrap().clone();
        if let Some(failure) = failure {
            return Err(failure.into_error());
        }
        Ok(ConnectResponse {
            uri: connection_uri(params),
            message: Some("connected successfully".to_string()),
        })
    }

    async fn list_vms(&self, connection: &Connection) -> Result<ListVmsResponse> {
        self.record("listallvms".to_string());
        let step = self.list_steps.lock().unwrap().pop_front();
        let step = step.unwrap_or_else(|| ListStep::ok(Vec::new()));
        if let Some(gate) = step.gate {
            let _ = gate.await;
        }
        step.result
            .map(|vms| ListVmsResponse {
                uri: Some(connection.uri.clone()),
                vms,
            })
            .map_err(Failure::into_error)
    }

    async fn vm_action(
        &self,
        _connection: &Connection,
        action: VmAction,
        vm_name: &str,
    ) -> Result<ActionResponse> {
        self.record(format!("{}vm:{}", action, vm_name));
        let failure = self.action_failure.lock().unwrap().clone();
        if let Some(failure) = failure {
            return Err(failure.into_error());
        }
        Ok(ActionResponse {
            vm_name: Some(vm_name.to_string()),
            action: Some(action.to_string()),
            message: None,
        })
    }

    async fn create_vm(
        &self,
        _connection: &Connection,
        request: &CreateVmRequest,
    ) -> Result<CreateVmResponse> {
        request.validate()?;
        self.record(format!("createvm:{}", request.name));
        Ok(CreateVmResponse {
            message: Some("VM created and started".to_string()),
            uuid: None,
        })
    }

    async fn open_console(
        &self,
        _connection: &Connection,
        vm_name: &str,
    ) -> Result<ConsoleResponse> {
        self.record(format!("consolevm:{}", vm_name));
        let response = self.console_response.lock().unwrap().clone();
        response.ok_or_else(|| PilotError::RemoteRejection("VM has no VNC graphics".to_string()))
    }

    async fn migrate_vm(
        &self,
        _connection: &Connection,
        vm_name: &str,
        destination_uri: &str,
    ) -> Result<MigrateResponse> {
        self.record(format!("migratevm:{}->{}", vm_name, destination_uri));
        let gate = self.migrate_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let failure = self.migrate_failure.lock().unwrap().clone();
        if let Some(failure) = failure {
            return Err(failure.into_error());
        }
        Ok(MigrateResponse {
            vm_name: Some(vm_name.to_string()),
            dest_uri: Some(destination_uri.to_string()),
            message: Some("Migration completed successfully".to_string()),
        })
    }
}

/// A session store that already holds a local session.
pub fn connected_store() -> Arc<SessionStore> {
    let store = Arc::new(SessionStore::in_memory());
    store.create(ConnectParams::local());
    store
}
