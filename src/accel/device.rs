use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

/// Byte storage shared between a buffer and the stream jobs that touch it.
pub(crate) type SharedBytes = Arc<Mutex<Vec<u8>>>;

pub(crate) fn lock_bytes(bytes: &SharedBytes) -> MutexGuard<'_, Vec<u8>> {
    bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Page-locked host memory visible to the device's copy engine.
#[derive(Debug)]
pub struct HostBuffer {
    bytes: SharedBytes,
    len: usize,
}

/// Memory resident on the accelerator.
#[derive(Debug)]
pub struct DeviceBuffer {
    bytes: SharedBytes,
    len: usize,
}

impl HostBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write(&self, src: &[u8]) -> Result<()> {
        if src.len() != self.len {
            return Err(anyhow!(
                "host buffer holds {} bytes, write of {}",
                self.len,
                src.len()
            ));
        }
        lock_bytes(&self.bytes).copy_from_slice(src);
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        lock_bytes(&self.bytes).clone()
    }

    pub(crate) fn share(&self) -> SharedBytes {
        Arc::clone(&self.bytes)
    }
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn share(&self) -> SharedBytes {
        Arc::clone(&self.bytes)
    }
}

/// Accelerator memory allocator.
///
/// Buffers are returned to the device by value, so each one is freed once.
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    fn alloc_pinned(&self, len: usize) -> Result<HostBuffer>;

    fn alloc_device(&self, len: usize) -> Result<DeviceBuffer>;

    fn free_pinned(&self, buffer: HostBuffer);

    fn free_device(&self, buffer: DeviceBuffer);

    /// Bytes currently held across pinned and device allocations.
    fn allocated_bytes(&self) -> usize;
}

/// Device emulated in host memory.
///
/// An optional budget caps device-side allocations so exhaustion paths can be
/// exercised without hardware.
#[derive(Debug, Default)]
pub struct HostDevice {
    device_budget: Option<usize>,
    pinned: AtomicUsize,
    device: AtomicUsize,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(device_budget: usize) -> Self {
        Self {
            device_budget: Some(device_budget),
            ..Self::default()
        }
    }

    pub fn device_bytes(&self) -> usize {
        self.device.load(Ordering::SeqCst)
    }

    pub fn pinned_bytes(&self) -> usize {
        self.pinned.load(Ordering::SeqCst)
    }
}

impl Device for HostDevice {
    fn name(&self) -> &str {
        "host"
    }

    fn alloc_pinned(&self, len: usize) -> Result<HostBuffer> {
        self.pinned.fetch_add(len, Ordering::SeqCst);
        Ok(HostBuffer {
            bytes: Arc::new(Mutex::new(vec![0; len])),
            len,
        })
    }

    fn alloc_device(&self, len: usize) -> Result<DeviceBuffer> {
        let reserved = self
            .device
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                let next = used.checked_add(len)?;
                match self.device_budget {
                    Some(budget) if next > budget => None,
                    _ => Some(next),
                }
            });
        if let Err(used) = reserved {
            return Err(anyhow!(
                "out of device memory: requested {} bytes with {} of {} in use",
                len,
                used,
                self.device_budget.unwrap_or(usize::MAX)
            ));
        }
        Ok(DeviceBuffer {
            bytes: Arc::new(Mutex::new(vec![0; len])),
            len,
        })
    }

    fn free_pinned(&self, buffer: HostBuffer) {
        self.pinned.fetch_sub(buffer.len, Ordering::SeqCst);
    }

    fn free_device(&self, buffer: DeviceBuffer) {
        self.device.fetch_sub(buffer.len, Ordering::SeqCst);
    }

    fn allocated_bytes(&self) -> usize {
        self.pinned_bytes() + self.device_bytes()
    }
}
