//! BlueZ 注册表 - 经典蓝牙设备发现与配对
//!
//! 使用 bluer (BlueZ D-Bus) 访问本机适配器。
//!
//! # 发现
//!
//! 发现过滤器限定为 BR/EDR 传输（经典蓝牙），每次发现持续一个固定窗口
//! （默认 12 秒，与经典 inquiry 时长一致）。
//!
//! BlueZ 会把缓存中的设备也作为 `DeviceAdded` 报告，即使它们不在范围内。
//! 只有在本次 inquiry 中带有 RSSI 的设备才算被发现，每个设备在一个窗口内
//! 只广播一次 `Broadcast::DeviceFound`。缓存设备在本次 inquiry 中响应后会
//! 收到 RSSI 属性变化，届时再广播。
//!
//! # 配对
//!
//! `Device::pair` 在后台任务中执行，由系统的配对代理 (agent) 负责提示用户。

use log::{debug, info, warn};

use crate::registry::{Broadcast, DeviceRecord, DeviceRegistry, RegistryError};
use bluer::{AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport};
use futures_util::{Stream, StreamExt};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub struct BluezRegistry {
    _session: bluer::Session,
    adapter: bluer::Adapter,
    discovery_window: Duration,
    events: broadcast::Sender<Broadcast>,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl BluezRegistry {
    /// 连接到 BlueZ；`adapter_name` 为空时使用默认适配器
    pub async fn new(
        adapter_name: Option<&str>,
        discovery_window: Duration,
        broadcast_capacity: usize,
    ) -> Result<Self, RegistryError> {
        let session = bluer::Session::new().await?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter '{}'", adapter.name());

        let (events, _) = broadcast::channel(broadcast_capacity.max(1));
        Ok(Self {
            _session: session,
            adapter,
            discovery_window,
            events,
            discovery: Mutex::new(None),
        })
    }

    fn parse_address(address: &str) -> Result<Address, RegistryError> {
        address
            .trim()
            .parse()
            .map_err(|_| RegistryError::InvalidAddress(address.to_string()))
    }
}

#[async_trait::async_trait]
impl DeviceRegistry for BluezRegistry {
    async fn list_paired(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        let addrs = self.adapter.device_addresses().await?;
        debug!("Checking {} known devices for pairing state", addrs.len());

        let mut paired = Vec::new();
        for addr in addrs {
            let device = self.adapter.device(addr)?;
            if !device.is_paired().await? {
                continue;
            }
            paired.push(DeviceRecord {
                name: device.name().await?,
                address: addr.to_string(),
            });
        }
        Ok(paired)
    }

    async fn is_active(&self) -> Result<bool, RegistryError> {
        Ok(self.adapter.is_powered().await?)
    }

    async fn find_device(&self, address: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        let addr = Self::parse_address(address)?;
        if !self.adapter.device_addresses().await?.contains(&addr) {
            debug!("Device {} is not known to BlueZ", addr);
            return Ok(None);
        }

        let device = self.adapter.device(addr)?;
        Ok(Some(DeviceRecord {
            name: device.name().await?,
            address: addr.to_string(),
        }))
    }

    async fn request_pairing(&self, device: &DeviceRecord) -> Result<(), RegistryError> {
        let addr = Self::parse_address(&device.address)?;
        let device = self.adapter.device(addr)?;

        tokio::spawn(async move {
            info!("Requesting pairing with {}", addr);
            match device.pair().await {
                Ok(()) => info!("Pairing with {} completed", addr),
                Err(e) => warn!("Pairing with {} failed: {}", addr, e),
            }
        });
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), RegistryError> {
        // 已有的发现窗口直接重启
        let previous = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            debug!("Restarting running discovery");
            previous.abort();
        }

        self.adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::BrEdr,
                ..Default::default()
            })
            .await?;
        let discoverer = self.adapter.discover_devices_with_changes().await?;

        info!(
            "Starting classic discovery for {} seconds",
            self.discovery_window.as_secs()
        );
        let task = tokio::spawn(relay_discovery(
            self.adapter.clone(),
            discoverer,
            self.events.clone(),
            self.discovery_window,
        ));
        *self.discovery.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.events.subscribe()
    }
}

impl Drop for BluezRegistry {
    fn drop(&mut self) {
        if let Some(task) = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

/// 一次发现窗口内已广播的设备
#[derive(Default)]
struct InquiryResults {
    reported: HashSet<Address>,
}

impl InquiryResults {
    fn is_reported(&self, addr: &Address) -> bool {
        self.reported.contains(addr)
    }

    /// 本次 inquiry 中有 RSSI 且尚未广播过的设备才会被接受
    fn admit(&mut self, addr: Address, rssi: Option<i16>) -> bool {
        rssi.is_some() && self.reported.insert(addr)
    }

    /// 无法解析的设备只报告一次
    fn mark_unresolved(&mut self, addr: Address) -> bool {
        self.reported.insert(addr)
    }
}

/// 在发现窗口内把 `DeviceAdded` 事件转成广播
async fn relay_discovery(
    adapter: bluer::Adapter,
    discoverer: impl Stream<Item = AdapterEvent>,
    events: broadcast::Sender<Broadcast>,
    window: Duration,
) {
    let timeout_fut = tokio::time::sleep(window);
    tokio::pin!(timeout_fut);
    futures_util::pin_mut!(discoverer);

    let mut inquiry = InquiryResults::default();
    loop {
        tokio::select! {
            _ = &mut timeout_fut => {
                break;
            }
            event = discoverer.next() => {
                match event {
                    Some(AdapterEvent::DeviceAdded(addr)) if !inquiry.is_reported(&addr) => {
                        let device = match read_device(&adapter, addr).await {
                            Ok((name, rssi)) => {
                                if !inquiry.admit(addr, rssi) {
                                    debug!("Skipping cached device {} (no RSSI in this inquiry)", addr);
                                    continue;
                                }
                                debug!("Device found: addr={}, name={:?}, rssi={:?}", addr, name, rssi);
                                Some(DeviceRecord {
                                    name,
                                    address: addr.to_string(),
                                })
                            }
                            Err(e) => {
                                warn!("Cannot resolve discovered device {}: {}", addr, e);
                                if !inquiry.mark_unresolved(addr) {
                                    continue;
                                }
                                None
                            }
                        };
                        if events.send(Broadcast::DeviceFound { device }).is_err() {
                            debug!("No listener for device {}", addr);
                        }
                    }
                    None => break,
                    _ => {}
                }
            }
        }
    }

    info!(
        "Discovery window closed: {} broadcast(s)",
        inquiry.reported.len()
    );
}

async fn read_device(
    adapter: &bluer::Adapter,
    addr: Address,
) -> bluer::Result<(Option<String>, Option<i16>)> {
    let device = adapter.device(addr)?;
    Ok((device.name().await?, device.rssi().await?))
}
