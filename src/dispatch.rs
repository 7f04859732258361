use crate::api::ControlApi;
use crate::session::SessionStore;
use crate::sync::VmListSynchronizer;
use crate::vm::VmAction;
use crate::{PilotError, log_info, log_warn};
use std::sync::Arc;
use thiserror::Error;

/// A user-requested lifecycle action. Destructive actions carry an explicit
/// confirmation flag that must be set before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: VmAction,
    pub vm_name: String,
    confirmed: bool,
}

impl ActionRequest {
    pub fn new(action: VmAction, vm_name: impl Into<String>) -> Self {
        Self {
            action,
            vm_name: vm_name.into(),
            confirmed: false,
        }
    }

    /// Records that the user explicitly agreed to this action.
    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }

    pub fn needs_confirmation(&self) -> bool {
        self.action.is_destructive() && !self.confirmed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub action: VmAction,
    pub vm_name: String,
    pub message: Option<String>,
    /// Whether the follow-up list refresh succeeded.
    pub refreshed: bool,
}

/// Failure scoped to one action on one VM. Nothing is rolled back or retried.
#[derive(Debug, Error)]
#[error("{action} '{vm_name}' failed: {}", .source.describe())]
pub struct ActionFailure {
    pub action: VmAction,
    pub vm_name: String,
    #[source]
    pub source: PilotError,
}

impl ActionFailure {
    fn new(request: &ActionRequest, source: PilotError) -> Self {
        Self {
            action: request.action,
            vm_name: request.vm_name.clone(),
            source,
        }
    }

    pub fn is_not_connected(&self) -> bool {
        self.source.is_not_connected()
    }
}

pub struct ActionDispatcher {
    api: Arc<dyn ControlApi>,
    sessions: Arc<SessionStore>,
    synchronizer: Arc<VmListSynchronizer>,
}

impl ActionDispatcher {
    pub fn new(
        api: Arc<dyn ControlApi>,
        sessions: Arc<SessionStore>,
        synchronizer: Arc<VmListSynchronizer>,
    ) -> Self {
        Self {
            api,
            sessions,
            synchronizer,
        }
    }

    pub async fn dispatch(
        &self,
        request: ActionRequest,
    ) -> std::result::Result<ActionOutcome, ActionFailure> {
        if request.needs_confirmation() {
            return Err(ActionFailure::new(
                &request,
                PilotError::ValidationFailure(format!(
                    "{} '{}' requires explicit confirmation",
                    request.action, request.vm_name
                )),
            ));
        }

        let connection = self
            .sessions
            .connection()
            .map_err(|e| ActionFailure::new(&request, e))?;

        log_info!("Dispatching {} for VM '{}'", request.action, request.vm_name);

        let response = self
            .api
            .vm_action(&connection, request.action, &request.vm_name)
            .await
            .map_err(|e| {
                log_warn!("{} '{}' failed: {}", request.action, request.vm_name, e);
                ActionFailure::new(&request, e)
            })?;

        let refreshed = self.synchronizer.sync().await.is_ok();

        Ok(ActionOutcome {
            action: request.action,
            vm_name: request.vm_name,
            message: response.message.or(response.action),
            refreshed,
        })
    }
}
