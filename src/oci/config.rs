use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// OCI image configuration blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub architecture: String,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    pub config: ImageConfig,
    pub rootfs: RootFs,
    #[serde(default)]
    pub history: Vec<History>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(rename = "Cmd", skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    pub diff_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    pub created_by: String,
}

impl ConfigFile {
    /// Configuration of the empty base image: no layers, no command.
    pub fn scratch(os: &str) -> Self {
        Self {
            architecture: String::new(),
            os: os.to_string(),
            created: source_date_epoch(),
            config: ImageConfig::default(),
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids: Vec::new(),
            },
            history: Vec::new(),
        }
    }

    pub fn push_layer(&mut self, diff_id: &str, created_by: &str) {
        self.rootfs.diff_ids.push(diff_id.to_string());
        self.history.push(History {
            created: self.created.clone(),
            created_by: created_by.to_string(),
        });
    }
}

/// Build timestamp pinned through `SOURCE_DATE_EPOCH`, if set.
///
/// Without it the `created` fields are omitted so that rebuilding the same
/// inputs yields the same config digest.
fn source_date_epoch() -> Option<String> {
    let secs = std::env::var("SOURCE_DATE_EPOCH").ok()?.trim().parse::<i64>().ok()?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .map(|t| t.to_rfc3339())
}
