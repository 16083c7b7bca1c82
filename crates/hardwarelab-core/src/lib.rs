//! hardwarelab Core Library
//!
//! 把经典蓝牙的设备发现和配对暴露给应用界面，并把配对事件记录到远程文档数据库。
//!
//! # 模块
//!
//! - **registry**: 设备注册表（BlueZ / 内存）
//! - **sink**: 配对日志写入端（Firestore / 内存）
//! - **channel**: 界面与守护进程之间的命令通道协议
//! - **adapter**: 命令分发和广播转发
//! - **notice**: 面向用户的短暂通知
//! - **config**: 应用设置
//!
//! # 使用示例
//!
//! ```ignore
//! use hardwarelab_core::{Adapter, AdapterOptions, BluezRegistry, MemorySink, MethodCall};
//!
//! let registry = Arc::new(BluezRegistry::new(None, Duration::from_secs(12), 64).await?);
//! let adapter = Adapter::new(registry, Arc::new(MemorySink::new()), AdapterOptions::default());
//!
//! // 界面可见期间保持监听
//! let _visible = adapter.resume();
//! let mut events = adapter.subscribe();
//!
//! let result = adapter.dispatch(&MethodCall::new(1, "startScan")).await;
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod adapter;
pub mod channel;
pub mod config;
pub mod notice;
pub mod registry;
pub mod sink;

pub use adapter::{Adapter, AdapterOptions, PendingWrite, VisibilityGuard, WriteMode};
pub use channel::{CommandResult, MethodCall, PushEvent, ServerFrame};
pub use config::AppSettings;
pub use notice::{Notice, NoticeLevel};
pub use registry::{
    Broadcast, BluezRegistry, DeviceRecord, DeviceRegistry, MemoryRegistry, RegistryError,
};
pub use sink::{
    EventSink, FirestoreSink, MemorySink, PairingLogEntry, SinkError, WriteReceipt,
};
