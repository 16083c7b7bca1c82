//! 命令通道协议
//!
//! 界面与守护进程之间按行分隔的 JSON 消息 (Unix Domain Socket)。
//!
//! - 客户端 → 守护进程: [`MethodCall`]
//! - 守护进程 → 客户端: [`ServerFrame`]，即命令应答或主动推送的事件

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::notice::{Notice, NoticeLevel};

pub const METHOD_PAIR_DEVICE: &str = "pairDevice";
pub const METHOD_GET_PAIRED_DEVICES: &str = "getPairedDevices";
pub const METHOD_START_SCAN: &str = "startScan";

/// 默认 socket 路径: `$XDG_RUNTIME_DIR/hardwarelab.sock`，回退到 `/tmp`
pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("hardwarelab.sock")
}

/// 一次命名命令调用
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MethodCall {
    #[serde(default)]
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(id: u64, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            arguments: Value::Null,
        }
    }

    pub fn with_argument(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.arguments.is_object() {
            self.arguments = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(map) = &mut self.arguments {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// 读取一个参数；缺失、为 null 或类型不符时返回 `None`
    pub fn argument<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.arguments.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => serde_json::from_value(value.clone()).ok(),
        }
    }
}

/// 命令结果
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandResult {
    Success {
        value: Value,
    },
    Error {
        code: String,
        message: Option<String>,
        details: Option<Value>,
    },
    NotImplemented,
}

impl CommandResult {
    pub fn success(value: impl Into<Value>) -> Self {
        CommandResult::Success {
            value: value.into(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        CommandResult::Error {
            code: code.into(),
            message: Some(message.into()),
            details: None,
        }
    }
}

/// 守护进程主动推送给界面的事件
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "method", content = "arguments")]
pub enum PushEvent {
    #[serde(rename = "onDeviceFound")]
    DeviceFound { name: String, address: String },
    #[serde(rename = "onNotice")]
    Notice { level: NoticeLevel, message: String },
}

impl From<Notice> for PushEvent {
    fn from(notice: Notice) -> Self {
        PushEvent::Notice {
            level: notice.level,
            message: notice.message,
        }
    }
}

/// 守护进程写给客户端的一行
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "reply")]
    Reply { id: u64, result: CommandResult },
    #[serde(rename = "event")]
    Event { event: PushEvent },
}
