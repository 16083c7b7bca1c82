//! 适配器
//!
//! 把命令通道上的命名命令翻译成注册表调用，把注册表的发现广播转发给界面，
//! 并在发起配对时向写入端记录一条配对日志。
//!
//! 适配器本身不保存设备状态：适配器开关和已配对集合都由注册表维护。
//! 唯一的可变状态是广播监听器是否已注册。
//!
//! # 监听器生命周期
//!
//! - [`Adapter::resume`] 返回 [`VisibilityGuard`]，第一个存活的守卫注册监听器
//! - 最后一个守卫释放时注销监听器（包括 `startScan` 注册的那个）
//! - `startScan` 在适配器开启时注册监听器（如尚未注册）

use log::{debug, info, warn};

use crate::channel::{
    CommandResult, METHOD_GET_PAIRED_DEVICES, METHOD_PAIR_DEVICE, METHOD_START_SCAN, MethodCall,
    PushEvent,
};
use crate::notice::{Notice, NoticeLevel};
use crate::registry::{Broadcast, DeviceRegistry, RegistryError};
pub use crate::registry::UNKNOWN_DEVICE;
use crate::sink::{EventSink, PairingLogEntry, SinkError, WriteReceipt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const ERROR_CODE: &str = "ERROR";
pub const PAIRING_INITIATED: &str = "Pairing initiated.";
pub const SCANNING: &str = "Scanning for devices...";
pub const ENABLE_BLUETOOTH: &str = "Please enable Bluetooth first.";
pub const MISSING_ADDRESS: &str = "Bluetooth address not found";
pub const UNNAMED_DEVICE: &str = "Unnamed Device";

/// 配对日志写入方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// 后台写入，命令立即返回
    #[default]
    Detach,
    /// 等待写入（及其通知）完成后再返回命令结果
    Await,
}

#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub write_mode: WriteMode,
    /// 推送事件通道容量
    pub event_capacity: usize,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::Detach,
            event_capacity: 64,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("device-found broadcast carried no device")]
    MissingDevice,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// 进行中的配对日志写入
pub struct PendingWrite {
    handle: JoinHandle<Result<WriteReceipt, SinkError>>,
}

impl PendingWrite {
    /// 等待写入完成
    pub async fn wait(self) -> Result<WriteReceipt, SinkError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(SinkError::Other(format!("write task failed: {e}"))),
        }
    }

    /// 不再关心结果，写入在后台继续
    pub fn detach(self) {}
}

#[derive(Default)]
struct ListenerSlot {
    relay: Option<JoinHandle<()>>,
    visible: usize,
}

impl ListenerSlot {
    fn is_registered(&self) -> bool {
        self.relay.as_ref().is_some_and(|relay| !relay.is_finished())
    }

    fn release(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
            info!("Broadcast listener unregistered");
        }
    }
}

/// 界面可见期间持有；释放最后一个时注销广播监听器
pub struct VisibilityGuard {
    listener: Arc<Mutex<ListenerSlot>>,
}

impl Drop for VisibilityGuard {
    fn drop(&mut self) {
        let mut slot = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        slot.visible = slot.visible.saturating_sub(1);
        if slot.visible == 0 {
            slot.release();
        }
    }
}

pub struct Adapter {
    registry: Arc<dyn DeviceRegistry>,
    sink: Arc<dyn EventSink>,
    events: broadcast::Sender<PushEvent>,
    listener: Arc<Mutex<ListenerSlot>>,
    write_mode: WriteMode,
}

impl Adapter {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        sink: Arc<dyn EventSink>,
        options: AdapterOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            registry,
            sink,
            events,
            listener: Arc::new(Mutex::new(ListenerSlot::default())),
            write_mode: options.write_mode,
        }
    }

    /// 订阅推送给界面的事件
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.lock_listener().is_registered()
    }

    /// 界面变为可见
    pub fn resume(&self) -> VisibilityGuard {
        {
            let mut slot = self.lock_listener();
            slot.visible += 1;
            self.register_listener(&mut slot);
        }
        VisibilityGuard {
            listener: Arc::clone(&self.listener),
        }
    }

    /// 处理一次命名命令
    pub async fn dispatch(&self, call: &MethodCall) -> CommandResult {
        debug!("Dispatching '{}'", call.method);
        match call.method.as_str() {
            METHOD_PAIR_DEVICE => self.pair_device(call.argument("address")).await,
            METHOD_GET_PAIRED_DEVICES => self.paired_devices().await,
            METHOD_START_SCAN => self.start_scan().await,
            other => {
                debug!("Method '{}' is not implemented", other);
                CommandResult::NotImplemented
            }
        }
    }

    async fn pair_device(&self, address: Option<String>) -> CommandResult {
        let Some(address) = address.filter(|a| !a.trim().is_empty()) else {
            return CommandResult::error(ERROR_CODE, MISSING_ADDRESS);
        };

        let device = match self.registry.find_device(&address).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                info!("Device {} is unknown to the registry, nothing to pair", address);
                return CommandResult::success(PAIRING_INITIATED);
            }
            Err(e) => {
                warn!("Lookup of {} failed: {}", address, e);
                return CommandResult::error(ERROR_CODE, e.to_string());
            }
        };

        if let Err(e) = self.registry.request_pairing(&device).await {
            warn!("Pairing request for {} failed: {}", device.address, e);
            return CommandResult::error(ERROR_CODE, e.to_string());
        }

        let name = device
            .name
            .clone()
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
        let pending = self.log_pairing(PairingLogEntry::now(name, device.address));
        match self.write_mode {
            WriteMode::Await => {
                // 失败只体现在通知里
                let _ = pending.wait().await;
            }
            WriteMode::Detach => pending.detach(),
        }

        CommandResult::success(PAIRING_INITIATED)
    }

    async fn paired_devices(&self) -> CommandResult {
        match self.registry.list_paired().await {
            Ok(devices) => {
                let labels: Vec<String> = devices.iter().map(|d| d.label()).collect();
                debug!("{} paired device(s)", labels.len());
                CommandResult::success(labels)
            }
            Err(e) => {
                warn!("Listing paired devices failed: {}", e);
                CommandResult::error(ERROR_CODE, e.to_string())
            }
        }
    }

    async fn start_scan(&self) -> CommandResult {
        match self.registry.is_active().await {
            Ok(true) => {
                self.register_listener(&mut self.lock_listener());
                if let Err(e) = self.registry.start_discovery().await {
                    warn!("Starting discovery failed: {}", e);
                    self.notify(Notice::error(format!("Error starting scan: {e}")));
                }
            }
            Ok(false) => {
                info!("Scan requested while Bluetooth is off");
                self.notify(Notice::new(NoticeLevel::Warn, ENABLE_BLUETOOTH));
            }
            Err(e) => {
                warn!("Querying adapter state failed: {}", e);
                self.notify(Notice::error(format!("Error starting scan: {e}")));
            }
        }

        CommandResult::success(SCANNING)
    }

    /// 在后台写入一条配对日志；写入结果会以通知的形式推送
    pub fn log_pairing(&self, entry: PairingLogEntry) -> PendingWrite {
        let sink = Arc::clone(&self.sink);
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let result = sink.write(&entry).await;
            let notice = match &result {
                Ok(receipt) => {
                    info!("Pairing of {} logged as {}", entry.address, receipt.document);
                    Notice::info(format!("Device logged to {}", sink.describe()))
                }
                Err(e) => {
                    warn!("Logging pairing of {} failed: {}", entry.address, e);
                    Notice::error(format!("Error logging device: {e}"))
                }
            };
            let _ = events.send(notice.into());
            result
        });

        PendingWrite { handle }
    }

    /// 处理一条注册表广播，返回推送给界面的事件（如有）
    pub async fn handle_broadcast(&self, event: Broadcast) -> Option<PushEvent> {
        relay_one(self.registry.as_ref(), &self.events, event).await
    }

    fn notify(&self, notice: Notice) {
        debug!("Notice: {}", notice);
        let _ = self.events.send(notice.into());
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, ListenerSlot> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_listener(&self, slot: &mut ListenerSlot) {
        if slot.is_registered() {
            return;
        }

        let rx = self.registry.subscribe();
        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        slot.relay = Some(tokio::spawn(relay_broadcasts(registry, events, rx)));
        info!("Broadcast listener registered");
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.lock_listener().release();
    }
}

async fn relay_broadcasts(
    registry: Arc<dyn DeviceRegistry>,
    events: broadcast::Sender<PushEvent>,
    mut rx: broadcast::Receiver<Broadcast>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                relay_one(registry.as_ref(), &events, event).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Broadcast listener lagged, {} broadcast(s) skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Registry broadcast channel closed");
                break;
            }
        }
    }
}

async fn relay_one(
    registry: &dyn DeviceRegistry,
    events: &broadcast::Sender<PushEvent>,
    event: Broadcast,
) -> Option<PushEvent> {
    match filter_broadcast(registry, event).await {
        Ok(Some(push)) => {
            let _ = events.send(push.clone());
            Some(push)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Dropping broadcast: {}", e);
            let _ = events.send(Notice::error(format!("Discovery error: {e}")).into());
            None
        }
    }
}

/// 只有未配对的设备才会推送给界面
async fn filter_broadcast(
    registry: &dyn DeviceRegistry,
    event: Broadcast,
) -> Result<Option<PushEvent>, RelayError> {
    let device = match event {
        Broadcast::DeviceFound { device } => device.ok_or(RelayError::MissingDevice)?,
        Broadcast::PairingRequest { address } => {
            debug!("Pairing request from {}", address);
            return Ok(None);
        }
    };

    let paired = registry.list_paired().await?;
    if paired
        .iter()
        .any(|p| p.address.eq_ignore_ascii_case(&device.address))
    {
        debug!("Ignoring already paired device {}", device.address);
        return Ok(None);
    }

    Ok(Some(PushEvent::DeviceFound {
        name: device.name.unwrap_or_else(|| UNNAMED_DEVICE.to_string()),
        address: device.address,
    }))
}
