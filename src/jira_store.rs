use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::json_file::{init_folder, read_json, write_json, FileLock, StoreError};
use crate::logging;
use crate::metrics::Metrics;

const CONFIGURATION_FILE: &str = "jira_config.json";

/// A flat `chutneyId -> jiraId` map persisted as one JSON object file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Scenario,
    Campaign,
    CampaignExecution,
}

impl LinkKind {
    pub const ALL: [LinkKind; 3] = [
        LinkKind::Scenario,
        LinkKind::Campaign,
        LinkKind::CampaignExecution,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            LinkKind::Scenario => "scenario_link.json",
            LinkKind::Campaign => "campaign_link.json",
            LinkKind::CampaignExecution => "campaign_execution_link.json",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "scenario" => Some(LinkKind::Scenario),
            "campaign" => Some(LinkKind::Campaign),
            "campaign-execution" | "campaign_execution" => Some(LinkKind::CampaignExecution),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkUpdate {
    Upsert(String),
    Delete,
}

impl LinkUpdate {
    /// An empty value means "unlink".
    pub fn from_value(value: &str) -> Self {
        if value.is_empty() {
            LinkUpdate::Delete
        } else {
            LinkUpdate::Upsert(value.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraServerConfiguration {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_proxy: Option<String>,
}

impl JiraServerConfiguration {
    pub fn has_proxy(&self) -> bool {
        self.url_proxy
            .as_deref()
            .map(|url| !url.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug)]
pub struct JiraFileStore {
    folder: PathBuf,
    metrics: Arc<Metrics>,
}

impl JiraFileStore {
    pub fn open(folder: impl Into<PathBuf>, metrics: Arc<Metrics>) -> Result<Self, StoreError> {
        let folder = folder.into();
        init_folder(&folder)?;
        logging::debug(format!("jira store folder {}", folder.display()));
        Ok(Self { folder, metrics })
    }

    pub fn folder_path(&self) -> &Path {
        &self.folder
    }

    fn link_path(&self, kind: LinkKind) -> PathBuf {
        self.folder.join(kind.file_name())
    }

    pub fn get_all(&self, kind: LinkKind) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(read_json(&self.link_path(kind), &self.metrics)?.unwrap_or_default())
    }

    /// Jira id linked to `key`, or an empty string when unlinked.
    pub fn get_by_id(&self, kind: LinkKind, key: &str) -> Result<String, StoreError> {
        Ok(self.get_all(kind)?.remove(key).unwrap_or_default())
    }

    pub fn save(&self, kind: LinkKind, key: &str, value: &str) -> Result<(), StoreError> {
        self.apply(kind, key, LinkUpdate::from_value(value))
    }

    pub fn remove(&self, kind: LinkKind, key: &str) -> Result<(), StoreError> {
        self.apply(kind, key, LinkUpdate::Delete)
    }

    pub fn apply(&self, kind: LinkKind, key: &str, update: LinkUpdate) -> Result<(), StoreError> {
        let path = self.link_path(kind);
        let _lock = FileLock::acquire(&path)?;

        let mut map: BTreeMap<String, String> =
            read_json(&path, &self.metrics)?.unwrap_or_default();
        match update {
            LinkUpdate::Upsert(value) => {
                logging::debug(format!("link {:?} {} -> {}", kind, key, value));
                map.insert(key.to_string(), value);
            }
            LinkUpdate::Delete => {
                logging::debug(format!("unlink {:?} {}", kind, key));
                map.remove(key);
            }
        }
        write_json(&path, &map, &self.metrics)
    }

    pub fn load_server_configuration(&self) -> Result<JiraServerConfiguration, StoreError> {
        let path = self.folder.join(CONFIGURATION_FILE);
        Ok(read_json(&path, &self.metrics)?.unwrap_or_default())
    }

    pub fn save_server_configuration(
        &self,
        configuration: &JiraServerConfiguration,
    ) -> Result<(), StoreError> {
        let path = self.folder.join(CONFIGURATION_FILE);
        let _lock = FileLock::acquire(&path)?;
        write_json(&path, configuration, &self.metrics)?;
        logging::info(format!(
            "saved jira server configuration url={} proxy={}",
            configuration.url,
            configuration.has_proxy()
        ));
        Ok(())
    }
}
