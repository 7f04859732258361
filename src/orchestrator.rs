use crate::api::{ControlApi, CreateVmResponse};
use crate::config::PilotConfig;
use crate::console::ConsoleLauncher;
use crate::dispatch::ActionDispatcher;
use crate::http::HttpControlApi;
use crate::migration::MigrationWorkflow;
use crate::session::{ConnectParams, Session, SessionStore};
use crate::sync::VmListSynchronizer;
use crate::vm::CreateVmRequest;
use crate::{PilotError, Result, log_info, log_warn};
use std::sync::Arc;

/// Explicit context shared by every orchestration component: one control
/// API handle and one session store, handed out by `Arc`.
pub struct Orchestrator {
    api: Arc<dyn ControlApi>,
    sessions: Arc<SessionStore>,
    synchronizer: Arc<VmListSynchronizer>,
    dispatcher: ActionDispatcher,
    migration: MigrationWorkflow,
    console: ConsoleLauncher,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn ControlApi>,
        sessions: Arc<SessionStore>,
        console_scheme: impl Into<String>,
        console_host: impl Into<String>,
    ) -> Self {
        let synchronizer = Arc::new(VmListSynchronizer::new(api.clone(), sessions.clone()));
        let dispatcher = ActionDispatcher::new(api.clone(), sessions.clone(), synchronizer.clone());
        let migration = MigrationWorkflow::new(api.clone(), sessions.clone(), synchronizer.clone());
        let console = ConsoleLauncher::new(
            api.clone(),
            sessions.clone(),
            console_scheme,
            console_host,
        );

        Self {
            api,
            sessions,
            synchronizer,
            dispatcher,
            migration,
            console,
        }
    }

    pub fn from_config(config: &PilotConfig) -> Self {
        let api: Arc<dyn ControlApi> = Arc::new(HttpControlApi::from_config(&config.api));
        let sessions = Arc::new(SessionStore::at_path(config.session_file()));
        let host = config
            .console_host()
            .unwrap_or_else(|| "localhost".to_string());
        Self::new(api, sessions, config.console.scheme.clone(), host)
    }

    /// Opens a session. Parameters are checked locally first, and the session
    /// is stored only if the control API reports success.
    pub async fn connect(&self, params: ConnectParams) -> Result<Session> {
        let params = params.normalized();
        params.validate()?;
        log_info!("Connecting to {} hypervisor", params.protocol);

        let response = self.api.connect(&params).await?;
        log_info!(
            "Connected to {} ({})",
            response.uri,
            response.message.as_deref().unwrap_or("ok")
        );

        Ok(self.sessions.create(params))
    }

    pub fn logout(&self) {
        self.sessions.clear();
        log_info!("Session cleared");
    }

    pub fn session(&self) -> Option<Session> {
        self.sessions.read()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Validates locally, creates the VM, then refreshes the list.
    pub async fn create_vm(&self, request: CreateVmRequest) -> Result<CreateVmResponse> {
        request.validate()?;
        let connection = self.sessions.connection()?;

        log_info!("Creating VM '{}'", request.name);
        let response = self.api.create_vm(&connection, &request).await?;

        if let Err(e) = self.synchronizer.sync().await {
            if !matches!(e, PilotError::NotConnected) {
                log_warn!("VM list refresh after create failed: {}", e);
            }
        }
        Ok(response)
    }

    pub fn synchronizer(&self) -> &VmListSynchronizer {
        &self.synchronizer
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn migration(&self) -> &MigrationWorkflow {
        &self.migration
    }

    pub fn console(&self) -> &ConsoleLauncher {
        &self.console
    }
}
