//! 设备注册表 (Registry)
//!
//! 操作系统蓝牙栈的窄接口：列出已配对设备、查询适配器状态、
//! 按地址查找设备、发起配对、启动发现广播。
//!
//! # 后端
//!
//! - **bluez**: 通过 bluer (BlueZ D-Bus) 访问真实适配器
//! - **memory**: 进程内注册表，用于开发和测试

pub mod bluez;
pub mod memory;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use bluez::BluezRegistry;
pub use memory::MemoryRegistry;

/// 设备没有名称时显示的名称
pub const UNKNOWN_DEVICE: &str = "Unknown";

/// 注册表中的设备记录
///
/// 由注册表提供，适配器只读不写。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: Option<String>,
    pub address: String,
}

impl DeviceRecord {
    pub fn new(name: Option<&str>, address: impl Into<String>) -> Self {
        Self {
            name: name.map(str::to_string),
            address: address.into(),
        }
    }

    /// 用于 `getPairedDevices` 的 "name - address" 形式
    pub fn label(&self) -> String {
        format!(
            "{} - {}",
            self.name.as_deref().unwrap_or(UNKNOWN_DEVICE),
            self.address
        )
    }
}

/// 注册表在发现过程中发出的异步通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Broadcast {
    /// 发现了一个设备；`device` 为 `None` 表示设备对象无法解析
    DeviceFound { device: Option<DeviceRecord> },
    /// 远端设备发起了配对请求
    PairingRequest { address: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid Bluetooth address: {0}")]
    InvalidAddress(String),
    #[error("Bluetooth adapter unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Bluez(#[from] bluer::Error),
}

/// 注册表能力接口
///
/// 所有方法都是单次直接调用，不重试、不缓存。
#[async_trait::async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// 当前已配对设备快照
    async fn list_paired(&self) -> Result<Vec<DeviceRecord>, RegistryError>;

    /// 适配器是否处于开启状态
    async fn is_active(&self) -> Result<bool, RegistryError>;

    /// 按硬件地址查找设备，注册表不认识时返回 `None`
    async fn find_device(&self, address: &str) -> Result<Option<DeviceRecord>, RegistryError>;

    /// 发起系统级配对，不等待配对完成
    async fn request_pairing(&self, device: &DeviceRecord) -> Result<(), RegistryError>;

    /// 启动一次发现广播
    async fn start_discovery(&self) -> Result<(), RegistryError>;

    /// 订阅发现广播
    fn subscribe(&self) -> broadcast::Receiver<Broadcast>;
}
