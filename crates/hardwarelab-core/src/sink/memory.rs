//! 内存写入端

use log::debug;

use crate::sink::{EventSink, PairingLogEntry, SinkError, WriteReceipt};
use std::sync::{Mutex, PoisonError};

#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<PairingLogEntry>>,
    failure: Mutex<Option<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的写入都以 `reason` 失败；传 `None` 恢复正常
    pub fn fail_with(&self, reason: Option<&str>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = reason.map(str::to_string);
    }

    pub fn entries(&self) -> Vec<PairingLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl EventSink for MemorySink {
    async fn write(&self, entry: &PairingLogEntry) -> Result<WriteReceipt, SinkError> {
        if let Some(reason) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(SinkError::Other(reason));
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push(entry.clone());
        debug!("Stored pairing record #{} for {}", entries.len(), entry.address);
        Ok(WriteReceipt {
            document: format!("memory/{}", entries.len()),
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
