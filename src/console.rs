use crate::api::{ConsoleResponse, ControlApi};
use crate::session::SessionStore;
use crate::{PilotError, log_info, log_warn};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_CONSOLE_SCHEME: &str = "https";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("Console unavailable: {0}")]
    Rejected(String),
    #[error("Console response carried no websocket port")]
    MissingPort,
}

impl From<ConsoleError> for PilotError {
    fn from(err: ConsoleError) -> Self {
        match err {
            ConsoleError::Rejected(msg) => PilotError::RemoteRejection(msg),
            ConsoleError::MissingPort => {
                PilotError::ResourceMissing("websocket port in console response".to_string())
            }
        }
    }
}

/// Builds the noVNC URL for a console response. Opening it is up to the caller.
pub fn resolve_console_url(
    response: &ConsoleResponse,
    current_host: &str,
) -> Result<String, ConsoleError> {
    resolve_with_scheme(DEFAULT_CONSOLE_SCHEME, response, current_host)
}

fn resolve_with_scheme(
    scheme: &str,
    response: &ConsoleResponse,
    current_host: &str,
) -> Result<String, ConsoleError> {
    if !response.is_ok() {
        return Err(ConsoleError::Rejected(
            response
                .message
                .clone()
                .unwrap_or_else(|| "console request failed".to_string()),
        ));
    }

    let port = response.websocket_port().ok_or(ConsoleError::MissingPort)?;

    Ok(format!(
        "{scheme}://{host}:{port}/vnc.html?host={host}&port={port}&path=websockify&autoconnect=1",
        scheme = scheme,
        host = current_host,
        port = port
    ))
}

pub struct ConsoleLauncher {
    api: Arc<dyn ControlApi>,
    sessions: Arc<SessionStore>,
    scheme: String,
    host: String,
}

impl ConsoleLauncher {
    pub fn new(
        api: Arc<dyn ControlApi>,
        sessions: Arc<SessionStore>,
        scheme: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            api,
            sessions,
            scheme: scheme.into(),
            host: host.into(),
        }
    }

    pub fn resolve(&self, response: &ConsoleResponse) -> Result<String, ConsoleError> {
        resolve_with_scheme(&self.scheme, response, &self.host)
    }

    /// Asks the control API for a console on `vm_name` and returns its URL.
    pub async fn launch(&self, vm_name: &str) -> crate::Result<String> {
        let connection = self.sessions.connection()?;
        let response = self.api.open_console(&connection, vm_name).await?;

        match self.resolve(&response) {
            Ok(url) => {
                log_info!("Console for '{}' available at {}", vm_name, url);
                Ok(url)
            }
            Err(e) => {
                log_warn!("Console for '{}' could not be resolved: {}", vm_name, e);
                Err(e.into())
            }
        }
    }
}
