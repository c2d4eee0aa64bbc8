//! Process and platform descriptors attached to every occurrence.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Static facts about the host and the running process
#[derive(Debug, Clone, Serialize)]
pub struct PlatformInfo {
    /// Hash of the machine name
    pub device_id: String,
    pub device_type: String,
    pub operating_system: String,
    pub os_version: String,
    pub os_build: String,
    pub architecture: String,
    pub process_path: String,
}

impl PlatformInfo {
    pub fn collect() -> Self {
        let uts = Uname::read();
        Self {
            device_id: device_id(&uts.nodename),
            device_type: uts.machine,
            operating_system: std::env::consts::OS.to_string(),
            os_version: uts.release,
            os_build: uts.version,
            architecture: std::env::consts::ARCH.to_string(),
            process_path: std::env::current_exe()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Returns a 16-char hex digest of the machine name
fn device_id(node_name: &str) -> String {
    let digest = Sha256::digest(node_name.as_bytes());
    hex::encode(&digest[..8])
}

struct Uname {
    nodename: String,
    machine: String,
    release: String,
    version: String,
}

impl Uname {
    #[cfg(unix)]
    fn read() -> Self {
        // SAFETY: utsname is plain old data; uname fills it or returns -1.
        let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::uname(&mut uts) };
        if rc != 0 {
            return Self::fallback();
        }
        Self {
            nodename: c_field(&uts.nodename),
            machine: c_field(&uts.machine),
            release: c_field(&uts.release),
            version: c_field(&uts.version),
        }
    }

    #[cfg(not(unix))]
    fn read() -> Self {
        Self::fallback()
    }

    fn fallback() -> Self {
        Self {
            nodename: std::env::var("COMPUTERNAME")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_default(),
            machine: std::env::consts::ARCH.to_string(),
            release: String::new(),
            version: String::new(),
        }
    }
}

#[cfg(unix)]
fn c_field(field: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = field
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
