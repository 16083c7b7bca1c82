//! Core Service - 按配置组装注册表、写入端和适配器

use anyhow::Result;
use hardwarelab_core::config::{FIRESTORE_HINT, RegistryBackend, SinkBackend};
use hardwarelab_core::{
    Adapter, AppSettings, BluezRegistry, DeviceRegistry, EventSink, FirestoreSink,
    MemoryRegistry, MemorySink,
};
use std::sync::Arc;

pub async fn build_adapter(settings: &AppSettings) -> Result<Arc<Adapter>> {
    tracing::info!("核心服务初始化...");

    let registry_settings = &settings.registry;
    let registry: Arc<dyn DeviceRegistry> = match registry_settings.backend {
        RegistryBackend::Bluez => Arc::new(
            BluezRegistry::new(
                registry_settings.adapter.as_deref(),
                registry_settings.discovery_window(),
                registry_settings.broadcast_capacity,
            )
            .await?,
        ),
        RegistryBackend::Memory => {
            tracing::warn!("使用内存注册表（模拟模式，无蓝牙硬件）");
            Arc::new(MemoryRegistry::new(registry_settings.broadcast_capacity))
        }
    };

    let sink: Arc<dyn EventSink> = match settings.sink.backend {
        SinkBackend::Firestore => Arc::new(FirestoreSink::new(settings.sink.firestore())?),
        SinkBackend::Memory => {
            tracing::warn!("配对日志只保存在内存中；启用 Firestore: {}", FIRESTORE_HINT);
            Arc::new(MemorySink::new())
        }
    };

    tracing::info!(
        "注册表: {:?}, 写入端: {}, 写入方式: {:?}",
        registry_settings.backend,
        sink.describe(),
        settings.sink.write_mode
    );

    Ok(Arc::new(Adapter::new(
        registry,
        sink,
        settings.adapter_options(),
    )))
}
