//! Firestore REST 写入端
//!
//! 通过 Firestore REST API 在 `device_pairings` 集合中创建文档：
//!
//! ```text
//! POST {endpoint}/projects/{project}/databases/{database}/documents/device_pairings
//! {"fields": {"name": {"stringValue": ...},
//!             "address": {"stringValue": ...},
//!             "paired_at": {"integerValue": "<ms>"}}}
//! ```
//!
//! Firestore 的 `integerValue` 以字符串编码 int64。
//! 不重试，不设超时；失败原样交给调用方。

use log::{debug, info};

use crate::sink::{EventSink, PAIRINGS_COLLECTION, PairingLogEntry, SinkError, WriteReceipt};
use serde::Deserialize;
use serde_json::{Value, json};

pub const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com/v1";

#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// REST 根地址，本地模拟器形如 `http://localhost:8080/v1`
    pub endpoint: String,
    pub project_id: String,
    pub database: String,
    /// Web API key，作为 `key` 查询参数
    pub api_key: Option<String>,
    /// OAuth2 访问令牌，作为 Bearer 认证头
    pub auth_token: Option<String>,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project_id: project_id.into(),
            database: "(default)".to_string(),
            api_key: None,
            auth_token: None,
        }
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents/{}",
            self.endpoint.trim_end_matches('/'),
            self.project_id,
            self.database,
            PAIRINGS_COLLECTION
        )
    }
}

#[derive(Deserialize)]
struct CreatedDocument {
    name: String,
}

pub struct FirestoreSink {
    client: reqwest::Client,
    config: FirestoreConfig,
}

impl FirestoreSink {
    pub fn new(config: FirestoreConfig) -> Result<Self, SinkError> {
        if config.project_id.trim().is_empty() {
            return Err(SinkError::Other(format!(
                "Firestore project id is empty; {}",
                crate::config::FIRESTORE_HINT
            )));
        }
        let client = reqwest::Client::builder().build()?;
        info!("Firestore sink: {}", config.collection_url());
        Ok(Self { client, config })
    }

    /// 把配对日志编码为 Firestore 文档
    pub fn encode_document(entry: &PairingLogEntry) -> Value {
        json!({
            "fields": {
                "name": { "stringValue": entry.name },
                "address": { "stringValue": entry.address },
                "paired_at": { "integerValue": entry.paired_at.to_string() },
            }
        })
    }
}

#[async_trait::async_trait]
impl EventSink for FirestoreSink {
    async fn write(&self, entry: &PairingLogEntry) -> Result<WriteReceipt, SinkError> {
        let mut request = self
            .client
            .post(self.config.collection_url())
            .json(&Self::encode_document(entry));
        if let Some(key) = &self.config.api_key {
            request = request.query(&[("key", key)]);
        }
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        debug!("Writing pairing record for {}", entry.address);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreatedDocument = response.json().await?;
        debug!("Created document {}", created.name);
        Ok(WriteReceipt {
            document: created.name,
        })
    }

    fn describe(&self) -> String {
        "Firestore".to_string()
    }
}
