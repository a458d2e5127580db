use serde::{Deserialize, Serialize};

/// Identity and host description a provider sends right after connecting.
///
/// Missing fields decode to their zero value; nothing here is validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub wallet_address: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub cpu_cores: i64,
}

impl AuthPayload {
    /// Human-readable host summary, e.g. `linux/amd64 - 8 Cores`.
    pub fn capabilities_summary(&self) -> String {
        format!("{}/{} - {} Cores", self.os, self.arch, self.cpu_cores)
    }
}

/// Unit of work pushed to a provider: a container image and its command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOffer {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub cmd: Vec<String>,
}

impl JobOffer {
    pub fn new(image: impl Into<String>, cmd: Vec<String>) -> Self {
        Self {
            image: image.into(),
            cmd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_summary_format() {
        let auth = AuthPayload {
            device_id: "gpu-1".into(),
            wallet_address: "0xabc".into(),
            os: "linux".into(),
            arch: "amd64".into(),
            cpu_cores: 8,
        };
        assert_eq!(auth.capabilities_summary(), "linux/amd64 - 8 Cores");
    }

    #[test]
    fn auth_payload_tolerates_missing_fields() {
        let auth: AuthPayload = serde_json::from_str(r#"{"device_id":"gpu-1"}"#).unwrap();
        assert_eq!(auth.device_id, "gpu-1");
        assert_eq!(auth.wallet_address, "");
        assert_eq!(auth.cpu_cores, 0);
    }

    #[test]
    fn job_offer_uses_cmd_field_name() {
        let offer = JobOffer::new("alpine", vec!["echo".into(), "hi".into()]);
        let value = serde_json::to_value(&offer).unwrap();
        assert_eq!(value["image"], "alpine");
        assert_eq!(value["cmd"][1], "hi");
    }
}
