//! ACPI contract: given the RSDP from the boot parameter block, locate the
//! MADT (LAPIC/IOAPIC addresses, CPU count) and the FADT. Nothing else is
//! walked; table internals stay behind the `acpi` crate.

use core::ptr::NonNull;

use acpi::{AcpiHandler, AcpiTables, InterruptModel, PhysicalMapping};
use spin::Once;

use crate::{log_info, log_warn};

/// Identity mapper for ACPI tables; with physical memory identity-mapped the
/// tables are readable in place.
#[derive(Clone)]
struct IdentityMapper;

impl AcpiHandler for IdentityMapper {
    unsafe fn map_physical_region<T>(
        &self,
        physical_address: usize,
        size: usize,
    ) -> PhysicalMapping<Self, T> {
        PhysicalMapping::new(
            physical_address,
            NonNull::new_unchecked(physical_address as *mut T),
            size,
            size,
            Self,
        )
    }

    fn unmap_physical_region<T>(_region: &PhysicalMapping<Self, T>) {}
}

/// What the rest of the kernel needs from ACPI.
#[derive(Debug, Clone, Copy)]
pub struct PlatformSummary {
    pub local_apic_address: u64,
    pub io_apic_address: u64,
    pub cpu_count: usize,
    pub has_fadt: bool,
}

static PLATFORM: Once<PlatformSummary> = Once::new();

/// Walk XSDT/RSDT from `rsdp` and cache the platform summary.
pub fn init(rsdp: u64) -> Result<PlatformSummary, &'static str> {
    if rsdp == 0 {
        return Err("no RSDP provided by the loader");
    }
    if let Some(summary) = PLATFORM.get() {
        return Ok(*summary);
    }

    let tables = unsafe { AcpiTables::from_rsdp(IdentityMapper, rsdp as usize) }
        .map_err(|_| "RSDP/XSDT parse failed")?;

    let platform_info = tables
        .platform_info()
        .map_err(|_| "ACPI platform info unavailable")?;

    let (local_apic_address, io_apic_address) = match &platform_info.interrupt_model {
        InterruptModel::Apic(apic) => (
            apic.local_apic_address,
            apic.io_apics.first().map(|io| io.address as u64).unwrap_or(0),
        ),
        _ => {
            log_warn!("MADT missing or pre-APIC interrupt model reported");
            (0, 0)
        }
    };

    let cpu_count = platform_info
        .processor_info
        .as_ref()
        .map(|info| 1 + info.application_processors.len())
        .unwrap_or(1);

    let has_fadt = tables.find_table::<acpi::fadt::Fadt>().is_ok();

    let summary = PlatformSummary {
        local_apic_address,
        io_apic_address,
        cpu_count,
        has_fadt,
    };
    PLATFORM.call_once(|| summary);

    log_info!(
        "ACPI: lapic={:#x} ioapic={:#x} cpus={} fadt={}",
        summary.local_apic_address,
        summary.io_apic_address,
        summary.cpu_count,
        summary.has_fadt
    );
    Ok(summary)
}

/// Cached summary from a prior `init`.
pub fn platform_summary() -> Option<PlatformSummary> {
    PLATFORM.get().copied()
}
