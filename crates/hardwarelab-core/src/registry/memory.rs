//! 内存注册表
//!
//! 不依赖蓝牙硬件的注册表实现。守护进程的 `memory` 后端和测试都使用它：
//! 调用方可以预置已配对/可见设备、切换适配器开关、注入广播，
//! 并读取各操作的调用次数。

use log::debug;

use crate::registry::{Broadcast, DeviceRecord, DeviceRegistry, RegistryError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

#[derive(Default)]
struct Calls {
    lookups: AtomicUsize,
    pairings: AtomicUsize,
    discoveries: AtomicUsize,
    subscriptions: AtomicUsize,
}

pub struct MemoryRegistry {
    active: AtomicBool,
    paired: Mutex<Vec<DeviceRecord>>,
    visible: Mutex<Vec<DeviceRecord>>,
    pairing_requests: Mutex<Vec<DeviceRecord>>,
    events: broadcast::Sender<Broadcast>,
    calls: Calls,
}

impl MemoryRegistry {
    pub fn new(broadcast_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            active: AtomicBool::new(true),
            paired: Mutex::new(Vec::new()),
            visible: Mutex::new(Vec::new()),
            pairing_requests: Mutex::new(Vec::new()),
            events,
            calls: Calls::default(),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// 添加一个已配对设备（同时可被查找到）
    pub fn add_paired(&self, device: DeviceRecord) {
        lock(&self.paired).push(device);
    }

    /// 添加一个可被 `find_device` 查找到但未配对的设备
    pub fn add_visible(&self, device: DeviceRecord) {
        lock(&self.visible).push(device);
    }

    /// 注入一条广播，返回收到它的订阅者数量
    pub fn emit(&self, event: Broadcast) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn pairing_requests(&self) -> Vec<DeviceRecord> {
        lock(&self.pairing_requests).clone()
    }

    pub fn lookup_calls(&self) -> usize {
        self.calls.lookups.load(Ordering::SeqCst)
    }

    pub fn pairing_calls(&self) -> usize {
        self.calls.pairings.load(Ordering::SeqCst)
    }

    pub fn discovery_calls(&self) -> usize {
        self.calls.discoveries.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.calls.subscriptions.load(Ordering::SeqCst)
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait::async_trait]
impl DeviceRegistry for MemoryRegistry {
    async fn list_paired(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        Ok(lock(&self.paired).clone())
    }

    async fn is_active(&self) -> Result<bool, RegistryError> {
        Ok(self.active.load(Ordering::SeqCst))
    }

    async fn find_device(&self, address: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        self.calls.lookups.fetch_add(1, Ordering::SeqCst);
        let wanted = address.trim();
        let found = lock(&self.paired)
            .iter()
            .chain(lock(&self.visible).iter())
            .find(|d| d.address.eq_ignore_ascii_case(wanted))
            .cloned();
        Ok(found)
    }

    async fn request_pairing(&self, device: &DeviceRecord) -> Result<(), RegistryError> {
        self.calls.pairings.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated pairing request for {}", device.address);
        lock(&self.pairing_requests).push(device.clone());
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), RegistryError> {
        self.calls.discoveries.fetch_add(1, Ordering::SeqCst);
        if !self.active.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("adapter is powered off".into()));
        }

        // 把可见但未配对的设备作为发现结果广播出去
        let visible = lock(&self.visible).clone();
        debug!("Simulated discovery: {} visible device(s)", visible.len());
        for device in visible {
            let _ = self.events.send(Broadcast::DeviceFound {
                device: Some(device),
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.calls.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.events.subscribe()
    }
}
