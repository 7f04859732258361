//! Single active hypervisor session with a fixed time-to-live.
//!
//! The store never evicts in the background. Expiry is decided lazily on
//! every [`SessionStore::read`], which also deletes the stale record.

use crate::uri::Connection;
use crate::{PilotError, Result, log_debug, log_error, log_info, log_warn};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

pub const SESSION_TTL_MINUTES: i64 = 20;

pub fn session_ttl() -> Duration {
    Duration::minutes(SESSION_TTL_MINUTES)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Protocol {
    /// Local QEMU control plane (`qemu`); host, user and port are ignored.
    LocalQemu,
    /// QEMU tunnelled over SSH (`qemu+ssh`).
    QemuSsh,
    /// Any other libvirt transport, e.g. `qemu+tcp` or `xen`.
    Named(String),
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::LocalQemu => "qemu",
            Protocol::QemuSsh => "qemu+ssh",
            Protocol::Named(name) => name,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Protocol::LocalQemu)
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::LocalQemu
    }
}

impl FromStr for Protocol {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(PilotError::ValidationFailure(
                "protocol must not be empty".to_string(),
            )),
            "qemu" | "local" => Ok(Protocol::LocalQemu),
            "qemu+ssh" => Ok(Protocol::QemuSsh),
            other => Ok(Protocol::Named(other.to_string())),
        }
    }
}

impl TryFrom<String> for Protocol {
    type Error = PilotError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Protocol> for String {
    fn from(protocol: Protocol) -> Self {
        protocol.as_str().to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorPath {
    #[default]
    System,
    Session,
}

impl HypervisorPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            HypervisorPath::System => "system",
            HypervisorPath::Session => "session",
        }
    }
}

impl FromStr for HypervisorPath {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "system" => Ok(HypervisorPath::System),
            "session" => Ok(HypervisorPath::Session),
            other => Err(PilotError::ValidationFailure(format!(
                "path must be 'system' or 'session', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for HypervisorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The raw connection fields sent to `/connect` and kept in the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub path: HypervisorPath,
}

impl ConnectParams {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn remote(protocol: Protocol, host: impl Into<String>) -> Self {
        Self {
            protocol,
            host: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_path(mut self, path: HypervisorPath) -> Self {
        self.path = path;
        self
    }

    /// Blank strings and port 0 mean "unset".
    pub fn normalized(mut self) -> Self {
        self.user = self.user.filter(|u| !u.trim().is_empty());
        self.host = self.host.filter(|h| !h.trim().is_empty());
        self.port = self.port.filter(|p| *p != 0);
        self
    }

    /// Remote protocols need a host; without one the identifier would be
    /// `proto://user@/path`, which no later call can use.
    pub fn validate(&self) -> Result<()> {
        if !self.protocol.is_local() && self.host.is_none() {
            return Err(PilotError::ValidationFailure(format!(
                "a host is required for the {} protocol",
                self.protocol
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection: ConnectParams,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + session_ttl()
    }
}

/// On-disk shape: `{"connection": {...}, "createdAt": <epoch-millis>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub connection: ConnectParams,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

impl SessionRecord {
    fn from_session(session: &Session) -> Self {
        Self {
            connection: session.connection.clone(),
            created_at: session.created_at.timestamp_millis(),
        }
    }

    fn into_session(self) -> Option<Session> {
        let created_at = DateTime::<Utc>::from_timestamp_millis(self.created_at)?;
        Some(Session {
            connection: self.connection,
            created_at,
        })
    }
}

pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<SessionRecord>>;
    fn save(&self, record: &SessionRecord) -> Result<()>;
    fn remove(&self) -> Result<()>;
}

pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("virtpilot")
            .join("session.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<Option<SessionRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        let record: SessionRecord = serde_json::from_str(&contents)?;
        Ok(Some(record))
    }

    fn save(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string(record)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemorySessionStorage {
    record: Mutex<Option<SessionRecord>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<SessionRecord>> {
        Ok(self
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, record: &SessionRecord) -> Result<()> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SessionStore {
    storage: Arc<dyn SessionStorage>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<dyn SessionStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStorage::new()))
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileSessionStorage::new(path)))
    }

    /// Replaces any previous session. Field contents are not checked here;
    /// the connect call has already vouched for them.
    pub fn create(&self, connection: ConnectParams) -> Session {
        let session = Session {
            connection,
            created_at: self.clock.now(),
        };

        if let Err(e) = self.storage.save(&SessionRecord::from_session(&session)) {
            log_error!("Failed to persist session: {}", e);
        } else {
            log_info!(
                "Session stored for {} (expires {})",
                session.connection.protocol,
                session.expires_at()
            );
        }

        session
    }

    pub fn read(&self) -> Option<Session> {
        let record = match self.storage.load() {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                log_warn!("Discarding unreadable session record: {}", e);
                self.clear();
                return None;
            }
        };

        let Some(session) = record.into_session() else {
            log_warn!("Discarding session record with invalid timestamp");
            self.clear();
            return None;
        };

        if self.clock.now() - session.created_at > session_ttl() {
            log_debug!("Session created at {} has expired", session.created_at);
            self.clear();
            return None;
        }

        Some(session)
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove() {
            log_error!("Failed to remove session record: {}", e);
        }
    }

    /// Time left before the current session expires.
    pub fn remaining(&self) -> Option<Duration> {
        let session = self.read()?;
        Some(session.expires_at() - self.clock.now())
    }

    /// Resolves the live session into the identifier every VM call needs.
    pub fn connection(&self) -> Result<Connection> {
        self.read()
            .map(|session| Connection::from_session(&session))
            .ok_or(PilotError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_store() -> (SessionStore, Arc<ManualClock>, Arc<MemorySessionStorage>) {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let storage = Arc::new(MemorySessionStorage::new());
        let store = SessionStore::with_clock(storage.clone(), clock.clone());
        (store, clock, storage)
    }

    #[test]
    fn read_just_before_ttl_returns_session() {
        let (store, clock, _) = fixed_store();
        let created = store.create(ConnectParams::local());

        clock.advance(session_ttl() - Duration::milliseconds(1));
        assert_eq!(store.read(), Some(created));
    }

    #[test]
    fn read_exactly_at_ttl_is_still_valid() {
        let (store, clock, _) = fixed_store();
        store.create(ConnectParams::local());

        clock.advance(session_ttl());
        assert!(store.read().is_some());
    }

    #[test]
    fn read_after_ttl_clears_storage() {
        let (store, clock, storage) = fixed_store();
        store.create(ConnectParams::local());

        clock.advance(session_ttl() + Duration::milliseconds(1));
        assert!(store.read().is_none());
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn create_overwrites_previous_session() {
        let (store, _, _) = fixed_store();
        store.create(ConnectParams::local());
        let remote = ConnectParams::remote(Protocol::QemuSsh, "10.0.0.5").with_user("root");
        store.create(remote.clone());

        assert_eq!(store.read().unwrap().connection, remote);
    }

    #[test]
    fn clear_is_idempotent() {
        let (store, _, _) = fixed_store();
        store.create(ConnectParams::local());
        store.clear();
        store.clear();
        assert!(store.read().is_none());
        assert!(matches!(store.connection(), Err(PilotError::NotConnected)));
    }

    #[test]
    fn remaining_counts_down() {
        let (store, clock, _) = fixed_store();
        store.create(ConnectParams::local());
        clock.advance(Duration::minutes(5));
        assert_eq!(store.remaining(), Some(Duration::minutes(15)));
    }

    #[test]
    fn protocol_parsing() {
        assert_eq!("qemu".parse::<Protocol>().unwrap(), Protocol::LocalQemu);
        assert_eq!("local".parse::<Protocol>().unwrap(), Protocol::LocalQemu);
        assert_eq!("qemu+ssh".parse::<Protocol>().unwrap(), Protocol::QemuSsh);
        assert_eq!(
            "qemu+tcp".parse::<Protocol>().unwrap(),
            Protocol::Named("qemu+tcp".to_string())
        );
        assert!("  ".parse::<Protocol>().is_err());
    }

    #[test]
    fn record_uses_camel_case_timestamp() {
        let record = SessionRecord {
            connection: ConnectParams::remote(Protocol::QemuSsh, "h").with_port(2222),
            created_at: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["createdAt"], 1_700_000_000_000i64);
        assert_eq!(json["connection"]["protocol"], "qemu+ssh");
        assert_eq!(json["connection"]["path"], "system");
        assert!(json["connection"].get("user").is_none());
    }

    #[test]
    fn normalized_drops_blank_fields() {
        let params = ConnectParams {
            protocol: Protocol::QemuSsh,
            user: Some(" ".to_string()),
            host: Some("host".to_string()),
            port: Some(0),
            path: HypervisorPath::System,
        }
        .normalized();
        assert_eq!(params.user, None);
        assert_eq!(params.port, None);
        assert_eq!(params.host.as_deref(), Some("host"));
    }

    #[test]
    fn remote_protocol_without_host_is_rejected() {
        let params = ConnectParams {
            protocol: Protocol::QemuSsh,
            user: Some("root".to_string()),
            host: Some("  ".to_string()),
            port: None,
            path: HypervisorPath::System,
        }
        .normalized();
        assert!(matches!(
            params.validate(),
            Err(PilotError::ValidationFailure(_))
        ));

        assert!(ConnectParams::local().validate().is_ok());
        assert!(
            ConnectParams::remote(Protocol::Named("qemu+tcp".to_string()), "hv")
                .validate()
                .is_ok()
        );
    }
}
