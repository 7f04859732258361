//! VM list synchronization.
//!
//! The displayed list is always the exact `vms` array of the most recent
//! successful listing. A failed listing keeps the previous snapshot and
//! raises an error indicator next to it.
//!
//! Every call to [`VmListSynchronizer::sync`] takes a sequence number. A
//! response that lands after a newer call was dispatched is dropped, so two
//! overlapping refreshes can never leave an older snapshot on screen.

use crate::api::ControlApi;
use crate::session::SessionStore;
use crate::vm::VirtualMachine;
use crate::{Result, log_debug, log_info, log_warn};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmListView {
    pub vms: Vec<VirtualMachine>,
    pub error: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
}

pub struct VmListSynchronizer {
    api: Arc<dyn ControlApi>,
    sessions: Arc<SessionStore>,
    issued: AtomicU64,
    view: Mutex<VmListView>,
}

impl VmListSynchronizer {
    pub fn new(api: Arc<dyn ControlApi>, sessions: Arc<SessionStore>) -> Self {
        Self {
            api,
            sessions,
            issued: AtomicU64::new(0),
            view: Mutex::new(VmListView::default()),
        }
    }

    /// Refetches the full VM list.
    ///
    /// Returns `NotConnected` without touching the view when there is no
    /// session; the caller sends the user to the connect flow.
    pub async fn sync(&self) -> Result<Vec<VirtualMachine>> {
        let connection = self.sessions.connection()?;
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        log_debug!("Synchronizing VM list (request #{}) from {}", seq, connection.uri);

        let result = self.api.list_vms(&connection).await;

        let mut view = self.view.lock().unwrap_or_else(PoisonError::into_inner);
        let latest = self.issued.load(Ordering::SeqCst);
        if seq != latest {
            log_debug!("Dropping VM list response #{}; #{} is newer", seq, latest);
            return result.map(|response| response.vms);
        }

        match result {
            Ok(response) => {
                log_info!("VM list refreshed: {} VM(s)", response.vms.len());
                view.vms = response.vms.clone();
                view.error = None;
                view.synced_at = Some(Utc::now());
                Ok(response.vms)
            }
            Err(e) => {
                log_warn!("VM list refresh failed: {}", e);
                view.error = Some(e.describe());
                Err(e)
            }
        }
    }

    pub fn snapshot(&self) -> VmListView {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dismiss_error(&self) {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .error = None;
    }
}
