use std::{
    fmt::{self, Display},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{MlErr, Result};

/// Where a tensor or a network's parameters reside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Host,
    Accelerator(usize),
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Host => write!(f, "host"),
            DeviceKind::Accelerator(ordinal) => write!(f, "accelerator:{ordinal}"),
        }
    }
}

/// The bookkeeping of the memory resident on a device.
#[derive(Debug)]
struct MemoryPool {
    capacity: Option<usize>,
    used: AtomicUsize,
}

impl MemoryPool {
    fn available(&self) -> usize {
        match self.capacity {
            Some(capacity) => capacity.saturating_sub(self.used.load(Ordering::Acquire)),
            None => usize::MAX,
        }
    }
}

/// A compute device, every clone shares the same memory pool.
#[derive(Debug, Clone)]
pub struct Device {
    kind: DeviceKind,
    pool: Arc<MemoryPool>,
}

impl Device {
    /// Returns the host device, which has no memory limit.
    pub fn host() -> Self {
        Self {
            kind: DeviceKind::Host,
            pool: Arc::new(MemoryPool {
                capacity: None,
                used: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns an accelerator device.
    ///
    /// # Arguments
    /// * `ordinal` - The index of the accelerator.
    /// * `capacity` - The amount of bytes it can hold at once, `None` for unbounded.
    ///
    /// # Returns
    /// A new `Device` with a fresh memory pool.
    pub fn accelerator(ordinal: usize, capacity: Option<usize>) -> Self {
        Self {
            kind: DeviceKind::Accelerator(ordinal),
            pool: Arc::new(MemoryPool {
                capacity,
                used: AtomicUsize::new(0),
            }),
        }
    }

    /// Picks the active compute device: the accelerator if one is available, else the host.
    pub fn active(accelerator: Option<Device>) -> Self {
        accelerator.unwrap_or_else(Self::host)
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn is_host(&self) -> bool {
        self.kind == DeviceKind::Host
    }

    /// The amount of bytes currently reserved on this device.
    pub fn used_bytes(&self) -> usize {
        self.pool.used.load(Ordering::Acquire)
    }

    /// Reserves `bytes` bytes on this device.
    ///
    /// # Returns
    /// A lease that gives the memory back once dropped, or `MlErr::DeviceTransfer` if the
    /// device's capacity would be exceeded.
    pub fn reserve(&self, bytes: usize) -> Result<Lease> {
        let pool = &self.pool;

        if let Some(capacity) = pool.capacity {
            pool.used
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                    let total = used.checked_add(bytes)?;
                    (total <= capacity).then_some(total)
                })
                .map_err(|_| MlErr::DeviceTransfer {
                    device: self.kind.to_string(),
                    requested: bytes,
                    available: pool.available(),
                })?;
        } else {
            pool.used.fetch_add(bytes, Ordering::AcqRel);
        }

        Ok(Lease {
            device: self.clone(),
            bytes,
        })
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// A reservation of device memory, released on drop.
#[derive(Debug)]
pub struct Lease {
    device: Device,
    bytes: usize,
}

impl Lease {
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.device
            .pool
            .used
            .fetch_sub(self.bytes, Ordering::AcqRel);
    }
}
