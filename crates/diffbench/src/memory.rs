use crate::errors::{BenchError, BenchResult};
use nvml_wrapper::Nvml;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sysinfo::{Pid, System};

const BYTES_PER_GIGABYTE: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn bytes_to_gigabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GIGABYTE
}

/// Reads how much memory the benchmarked pipeline currently holds
pub trait MemoryProbe {
    fn current_bytes(&mut self) -> u64;
}

/// Resident memory of this process, used when the pipeline runs on the host
pub struct ProcessMemoryProbe {
    system: System,
    pid: Pid,
}

impl ProcessMemoryProbe {
    pub fn new() -> BenchResult<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| BenchError::Other(format!("Failed to get current process id: {}", e)))?;
        Ok(Self {
            system: System::new(),
            pid,
        })
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn current_bytes(&mut self) -> u64 {
        self.system.refresh_process(self.pid);
        self.system
            .process(self.pid)
            .map(|process| process.memory())
            .unwrap_or(0)
    }
}

/// Used memory on an NVIDIA device, read through NVML
pub struct NvmlProbe {
    nvml: Nvml,
    index: u32,
}

impl NvmlProbe {
    pub fn new(index: u32) -> BenchResult<Self> {
        let nvml = Nvml::init()
            .map_err(|e| BenchError::BackendError(format!("Failed to initialize NVML: {}", e)))?;
        nvml.device_by_index(index)
            .map_err(|e| BenchError::BackendError(format!("No NVML device {}: {}", index, e)))?;
        Ok(Self { nvml, index })
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.nvml
            .device_by_index(self.index)
            .and_then(|device| device.memory_info())
            .map(|info| info.total)
            .ok()
    }
}

impl MemoryProbe for NvmlProbe {
    fn current_bytes(&mut self) -> u64 {
        self.nvml
            .device_by_index(self.index)
            .and_then(|device| device.memory_info())
            .map(|info| info.used)
            .unwrap_or(0)
    }
}

/// NVML probe for device `index`, or the process probe when NVML cannot
/// be initialized or has no such device
pub fn device_memory_probe(index: u32) -> BenchResult<Box<dyn MemoryProbe>> {
    match NvmlProbe::new(index) {
        Ok(probe) => Ok(Box::new(probe)),
        Err(e) => {
            tracing::warn!("{}, falling back to process memory", e);
            Ok(Box::new(ProcessMemoryProbe::new()?))
        }
    }
}

/// Probe over a shared byte counter kept by the caller
#[derive(Clone, Default)]
pub struct CounterProbe {
    bytes: Arc<AtomicU64>,
}

impl CounterProbe {
    pub fn new(bytes: Arc<AtomicU64>) -> Self {
        Self { bytes }
    }
}

impl MemoryProbe for CounterProbe {
    fn current_bytes(&mut self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}

/// Keeps the highest memory reading seen across samples
pub struct MemoryTracker {
    probe: Box<dyn MemoryProbe>,
    peak: u64,
    samples: usize,
}

impl MemoryTracker {
    pub fn new(probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            probe,
            peak: 0,
            samples: 0,
        }
    }

    /// Take a reading and return it
    pub fn sample(&mut self) -> u64 {
        let current = self.probe.current_bytes();
        self.peak = self.peak.max(current);
        self.samples += 1;
        current
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak
    }

    pub fn peak_gigabytes(&self) -> f64 {
        bytes_to_gigabytes(self.peak)
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn reset(&mut self) {
        self.peak = 0;
        self.samples = 0;
    }
}
