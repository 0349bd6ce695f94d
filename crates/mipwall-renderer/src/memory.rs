//! GPU Memory Probe
//!
//! Vendor-specific video memory queries. Unsupported vendors produce an empty
//! report rather than an error.

use mipwall_core::DiagnosticsConfig;

use crate::gpu::MemoryQuery;

/// `GPU_MEMORY_INFO_CURRENT_AVAILABLE_VIDMEM_NVX`
pub const NVX_CURRENT_AVAILABLE_VIDMEM: u32 = 0x9049;
/// `GPU_MEMORY_INFO_EVICTED_MEMORY_NVX`
pub const NVX_EVICTED_MEMORY: u32 = 0x904B;
/// `TEXTURE_FREE_MEMORY_ATI`
pub const ATI_TEXTURE_FREE_MEMORY: u32 = 0x87FC;

/// GPU vendor families with a memory query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    Nvidia,
    Amd,
    Unsupported,
}

impl Vendor {
    /// Classify a `GL_VENDOR` string, ignoring case
    pub fn from_vendor_string(vendor: &str) -> Self {
        let lower = vendor.to_ascii_lowercase();
        if lower.contains("nvidia") {
            return Self::Nvidia;
        }

        let ati = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word == "ati");
        if ati || lower.contains("amd") || lower.contains("advanced micro devices") {
            Self::Amd
        } else {
            Self::Unsupported
        }
    }
}

/// Video memory figures in MiB; zero when unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReport {
    pub vendor: Option<Vendor>,
    pub available_mib: u32,
    pub evicted_mib: u32,
}

impl MemoryReport {
    /// The zero report for vendors without a query
    pub fn unsupported() -> Self {
        Self {
            vendor: Some(Vendor::Unsupported),
            ..Default::default()
        }
    }
}

fn kib_to_mib(kib: i32) -> u32 {
    (kib.max(0) / 1024) as u32
}

/// Query video memory on the current context.
///
/// Reports are logged unless `config.test_mode` is set.
pub fn query_memory<Q: MemoryQuery + ?Sized>(query: &Q, config: &DiagnosticsConfig) -> MemoryReport {
    let vendor_string = query.vendor();
    let vendor = Vendor::from_vendor_string(&vendor_string);
    if !config.test_mode {
        log::info!("GPU vendor: {}", vendor_string);
    }

    let report = match vendor {
        Vendor::Nvidia => MemoryReport {
            vendor: Some(vendor),
            available_mib: kib_to_mib(query.integer(NVX_CURRENT_AVAILABLE_VIDMEM)),
            evicted_mib: kib_to_mib(query.integer(NVX_EVICTED_MEMORY)),
        },
        Vendor::Amd => {
            // free pool, largest block, free auxiliary, largest auxiliary block
            let mut info = [0i32; 4];
            query.integers(ATI_TEXTURE_FREE_MEMORY, &mut info);
            MemoryReport {
                vendor: Some(vendor),
                available_mib: kib_to_mib(info[0]),
                evicted_mib: 0,
            }
        }
        Vendor::Unsupported => {
            if !config.test_mode {
                log::warn!("Unsupported graphics card vendor: {}", vendor_string);
            }
            return MemoryReport::unsupported();
        }
    };

    if !config.test_mode {
        log::info!(
            "GPU memory available {} MiB (evicted {} MiB)",
            report.available_mib,
            report.evicted_mib
        );
    }
    report
}
