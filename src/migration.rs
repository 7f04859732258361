//! Migration workflow.
//!
//! One job at a time moves through `Idle -> Running -> Succeeded | Failed`.
//! `Succeeded` and `Failed` are terminal for that job; a fresh job always
//! starts from `Idle`. Exclusion is local to this workflow instance, the
//! control API does not lock anything.

use crate::api::ControlApi;
use crate::session::SessionStore;
use crate::sync::VmListSynchronizer;
use crate::{PilotError, log_debug, log_error, log_info, log_warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

pub const DESTINATION_HINT: &str = "qemu+ssh://user@172.19.5.99/system";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Idle,
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationJob {
    Idle {
        vm_name: Option<String>,
        notice: Option<String>,
    },
    Running {
        job_id: Uuid,
        vm_name: String,
        destination_uri: String,
    },
    Succeeded {
        job_id: Uuid,
        vm_name: String,
        destination_uri: String,
        message: String,
    },
    Failed {
        job_id: Uuid,
        vm_name: String,
        destination_uri: String,
        message: String,
    },
}

impl Default for MigrationJob {
    fn default() -> Self {
        MigrationJob::Idle {
            vm_name: None,
            notice: None,
        }
    }
}

impl MigrationJob {
    pub fn status(&self) -> MigrationStatus {
        match self {
            MigrationJob::Idle { .. } => MigrationStatus::Idle,
            MigrationJob::Running { .. } => MigrationStatus::Running,
            MigrationJob::Succeeded { .. } => MigrationStatus::Success,
            MigrationJob::Failed { .. } => MigrationStatus::Error,
        }
    }

    pub fn vm_name(&self) -> Option<&str> {
        match self {
            MigrationJob::Idle { vm_name, .. } => vm_name.as_deref(),
            MigrationJob::Running { vm_name, .. }
            | MigrationJob::Succeeded { vm_name, .. }
            | MigrationJob::Failed { vm_name, .. } => Some(vm_name),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            MigrationJob::Idle { notice, .. } => notice.as_deref(),
            MigrationJob::Running { .. } => None,
            MigrationJob::Succeeded { message, .. } | MigrationJob::Failed { message, .. } => {
                Some(message)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, MigrationJob::Running { .. })
    }

    fn job_id(&self) -> Option<Uuid> {
        match self {
            MigrationJob::Idle { .. } => None,
            MigrationJob::Running { job_id, .. }
            | MigrationJob::Succeeded { job_id, .. }
            | MigrationJob::Failed { job_id, .. } => Some(*job_id),
        }
    }
}

/// Reasons a migration was never dispatched.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration of '{0}' is already running")]
    AlreadyRunning(String),
    #[error(transparent)]
    Rejected(#[from] PilotError),
}

pub struct MigrationWorkflow {
    api: Arc<dyn ControlApi>,
    sessions: Arc<SessionStore>,
    synchronizer: Arc<VmListSynchronizer>,
    state: watch::Sender<MigrationJob>,
}

impl MigrationWorkflow {
    pub fn new(
        api: Arc<dyn ControlApi>,
        sessions: Arc<SessionStore>,
        synchronizer: Arc<VmListSynchronizer>,
    ) -> Self {
        let (state, _) = watch::channel(MigrationJob::default());
        Self {
            api,
            sessions,
            synchronizer,
            state,
        }
    }

    pub fn current(&self) -> MigrationJob {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MigrationJob> {
        self.state.subscribe()
    }

    /// Points the workflow at a new VM, discarding any finished job.
    pub fn select_vm(&self, vm_name: impl Into<String>) -> Result<(), MigrationError> {
        let vm_name = vm_name.into();
        let mut blocked = None;
        self.state.send_if_modified(|job| {
            if let MigrationJob::Running { vm_name: running, .. } = job {
                blocked = Some(running.clone());
                return false;
            }
            *job = MigrationJob::Idle {
                vm_name: Some(vm_name.clone()),
                notice: None,
            };
            true
        });
        match blocked {
            Some(running) => Err(MigrationError::AlreadyRunning(running)),
            None => Ok(()),
        }
    }

    /// Returns to `Idle` from any state. A response for a dismissed job is
    /// ignored when it arrives.
    pub fn dismiss(&self) {
        self.state.send_replace(MigrationJob::default());
    }

    /// Runs one migration to completion.
    ///
    /// `Err` means the job never left `Idle`. Once dispatched, the terminal
    /// job (`Succeeded` or `Failed`) is returned as `Ok`. On success the VM
    /// list is refreshed and the workflow auto-dismisses back to `Idle`.
    pub async fn initiate(
        &self,
        vm_name: &str,
        destination_uri: &str,
    ) -> Result<MigrationJob, MigrationError> {
        let destination_uri = destination_uri.trim();

        if let Some(running) = self.running_vm() {
            return Err(MigrationError::AlreadyRunning(running));
        }

        if destination_uri.is_empty() {
            let notice = format!("Please enter a destination URI (e.g. {})", DESTINATION_HINT);
            self.state.send_if_modified(|job| {
                if job.is_running() {
                    return false;
                }
                *job = MigrationJob::Idle {
                    vm_name: Some(vm_name.to_string()),
                    notice: Some(notice.clone()),
                };
                true
            });
            return Err(PilotError::ValidationFailure(notice).into());
        }

        let connection = self.sessions.connection()?;

        let job_id = Uuid::new_v4();
        let mut blocked = None;
        self.state.send_if_modified(|job| {
            if let MigrationJob::Running { vm_name: running, .. } = job {
                blocked = Some(running.clone());
                return false;
            }
            *job = MigrationJob::Running {
                job_id,
                vm_name: vm_name.to_string(),
                destination_uri: destination_uri.to_string(),
            };
            true
        });
        if let Some(running) = blocked {
            return Err(MigrationError::AlreadyRunning(running));
        }

        log_info!(
            "Migrating VM '{}' to '{}' (job {})",
            vm_name,
            destination_uri,
            job_id
        );

        let result = self
            .api
            .migrate_vm(&connection, vm_name, destination_uri)
            .await;

        match result {
            Ok(response) => {
                let terminal = MigrationJob::Succeeded {
                    job_id,
                    vm_name: vm_name.to_string(),
                    destination_uri: destination_uri.to_string(),
                    message: response
                        .message
                        .unwrap_or_else(|| "Migration completed successfully".to_string()),
                };
                log_info!("Migration job {} completed", job_id);
                self.finish(job_id, terminal.clone());

                if let Err(e) = self.synchronizer.sync().await {
                    log_warn!("VM list refresh after migration failed: {}", e);
                }

                self.state.send_if_modified(|job| {
                    if job.job_id() == Some(job_id) {
                        *job = MigrationJob::default();
                        true
                    } else {
                        false
                    }
                });
                Ok(terminal)
            }
            Err(e) => {
                log_error!("Migration job {} failed: {}", job_id, e);
                let terminal = MigrationJob::Failed {
                    job_id,
                    vm_name: vm_name.to_string(),
                    destination_uri: destination_uri.to_string(),
                    message: e.to_string(),
                };
                self.finish(job_id, terminal.clone());
                Ok(terminal)
            }
        }
    }

    fn running_vm(&self) -> Option<String> {
        match &*self.state.borrow() {
            MigrationJob::Running { vm_name, .. } => Some(vm_name.clone()),
            _ => None,
        }
    }

    /// Applies a terminal state only if `job_id` is still the running job.
    fn finish(&self, job_id: Uuid, terminal: MigrationJob) {
        let applied = self.state.send_if_modified(|job| match job {
            MigrationJob::Running { job_id: current, .. } if *current == job_id => {
                *job = terminal;
                true
            }
            _ => false,
        });
        if !applied {
            log_debug!("Migration job {} was dismissed before it finished", job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(MigrationJob::default().status(), MigrationStatus::Idle);
        let failed = MigrationJob::Failed {
            job_id: Uuid::new_v4(),
            vm_name: "web".to_string(),
            destination_uri: "qemu+ssh://h/system".to_string(),
            message: "migration failed".to_string(),
        };
        assert_eq!(failed.status(), MigrationStatus::Error);
        assert_eq!(failed.message(), Some("migration failed"));
        assert_eq!(failed.vm_name(), Some("web"));
    }
}
