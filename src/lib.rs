pub mod api;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod logger;
pub mod migration;
pub mod orchestrator;
pub mod session;
pub mod sync;
pub mod uri;
pub mod vm;

pub use error::{ErrorKind, PilotError};

pub type Result<T> = std::result::Result<T, PilotError>;

// Convenience re-exports for the orchestration surface
pub use api::ControlApi;
pub use dispatch::{ActionDispatcher, ActionFailure, ActionOutcome, ActionRequest};
pub use http::HttpControlApi;
pub use migration::{MigrationJob, MigrationStatus, MigrationWorkflow};
pub use orchestrator::Orchestrator;
pub use session::{ConnectParams, HypervisorPath, Protocol, Session, SessionStore};
pub use sync::{VmListSynchronizer, VmListView};
pub use vm::{CreateVmRequest, VirtualMachine, VmAction};
