use std::thread;

use gridforce_protocol::AuthPayload;

/// Description of the machine the agent runs on, in the naming the
/// orchestrator expects (`linux`, `amd64`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub os: String,
    pub arch: String,
    pub cpu_cores: i64,
}

impl HostInfo {
    pub fn detect() -> Self {
        let cpu_cores = thread::available_parallelism()
            .map(|n| n.get() as i64)
            .unwrap_or(1);
        Self {
            os: os_name(std::env::consts::OS).to_string(),
            arch: arch_name(std::env::consts::ARCH).to_string(),
            cpu_cores,
        }
    }

    pub fn auth_payload(&self, device_id: &str, wallet_address: &str) -> AuthPayload {
        AuthPayload {
            device_id: device_id.to_string(),
            wallet_address: wallet_address.to_string(),
            os: self.os.clone(),
            arch: self.arch.clone(),
            cpu_cores: self.cpu_cores,
        }
    }
}

fn os_name(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn arch_name(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64",
        other => other,
    }
}
