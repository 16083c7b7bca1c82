//! 事件写入端 (Event Sink)
//!
//! 每次发起配对时写入一条配对日志。写入只追加，不更新也不删除。
//!
//! # 后端
//!
//! - **firestore**: Firestore REST API (reqwest)
//! - **memory**: 保存在内存中，用于开发和测试

pub mod firestore;
pub mod memory;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub use firestore::FirestoreSink;
pub use memory::MemorySink;

/// 配对日志所在的集合
pub const PAIRINGS_COLLECTION: &str = "device_pairings";

/// 配对日志条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingLogEntry {
    pub name: String,
    pub address: String,
    /// 毫秒级 Unix 时间戳
    pub paired_at: u64,
}

impl PairingLogEntry {
    /// 以当前时间创建条目
    pub fn now(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            paired_at: epoch_millis(),
        }
    }
}

/// 写入成功后由后端返回的文档标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub document: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("{0}")]
    Other(String),
}

#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// 写入一条配对日志
    async fn write(&self, entry: &PairingLogEntry) -> Result<WriteReceipt, SinkError>;

    /// 后端名称，用于通知文本
    fn describe(&self) -> String;
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
