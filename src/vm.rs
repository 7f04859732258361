use crate::{PilotError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// One VM as last reported by the control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub name: String,
    #[serde(default)]
    pub active: bool,
}

impl VirtualMachine {
    pub fn state_label(&self) -> &'static str {
        if self.active { "running" } else { "shut off" }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmAction {
    Start,
    Stop,
    Shutdown,
    Delete,
}

impl VmAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmAction::Start => "start",
            VmAction::Stop => "stop",
            VmAction::Shutdown => "shutdown",
            VmAction::Delete => "delete",
        }
    }

    /// Destructive actions need explicit confirmation before dispatch.
    pub fn is_destructive(&self) -> bool {
        matches!(self, VmAction::Delete)
    }
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const CPU_RANGE: RangeInclusive<u32> = 1..=32;
pub const MEMORY_MB_RANGE: RangeInclusive<u32> = 256..=4096;
pub const DISK_MB_RANGE: RangeInclusive<u32> = 1024..=102_400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVmRequest {
    pub name: String,
    pub cpu_count: u32,
    pub memory_mb: u32,
    pub iso_image: String,
    pub disk_size_mb: u32,
    pub network: Option<String>,
}

impl CreateVmRequest {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("VM name is required"));
        }
        if self.iso_image.trim().is_empty() {
            return Err(invalid("an ISO image is required"));
        }
        check_range("CPU count", self.cpu_count, &CPU_RANGE)?;
        check_range("memory (MB)", self.memory_mb, &MEMORY_MB_RANGE)?;
        check_range("disk size (MB)", self.disk_size_mb, &DISK_MB_RANGE)?;
        Ok(())
    }
}

fn check_range(field: &str, value: u32, range: &RangeInclusive<u32>) -> Result<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(invalid(&format!(
            "{} must be between {} and {}, got {}",
            field,
            range.start(),
            range.end(),
            value
        )))
    }
}

fn invalid(msg: &str) -> PilotError {
    PilotError::ValidationFailure(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateVmRequest {
        CreateVmRequest {
            name: "debian-13".to_string(),
            cpu_count: 2,
            memory_mb: 2048,
            iso_image: "debian-13.iso".to_string(),
            disk_size_mb: 10_240,
            network: None,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn bounds_are_inclusive() {
        let mut req = request();
        req.cpu_count = 32;
        req.memory_mb = 256;
        req.disk_size_mb = 102_400;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn memory_outside_range_is_rejected() {
        let mut req = request();
        req.memory_mb = 8192;
        let err = req.validate().unwrap_err();
        assert!(matches!(err, PilotError::ValidationFailure(ref m) if m.contains("memory")));

        req.memory_mb = 255;
        assert!(req.validate().is_err());
    }

    #[test]
    fn cpu_and_disk_bounds() {
        let mut req = request();
        req.cpu_count = 0;
        assert!(req.validate().is_err());

        let mut req = request();
        req.disk_size_mb = 1023;
        assert!(req.validate().is_err());
    }

    #[test]
    fn blank_name_or_iso_is_rejected() {
        let mut req = request();
        req.name = "  ".to_string();
        assert!(req.validate().is_err());

        let mut req = request();
        req.iso_image.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn only_delete_is_destructive() {
        assert!(VmAction::Delete.is_destructive());
        assert!(!VmAction::Stop.is_destructive());
        assert!(!VmAction::Shutdown.is_destructive());
    }
}
