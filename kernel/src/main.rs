//! Osmium kernel binary: Limine handoff and the ordered boot sequence.
//!
//! Boot flow: record the bootloader's memory map and direct-map offset,
//! run the leveled initcalls (consoles, frame allocator, slab heap,
//! descriptor tables + PIC, tick timer), bring up the scheduler, enable
//! interrupts and idle. From then on the timer drives everything.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    use core::panic::PanicInfo;

    use limine::{FramebufferRequest, HhdmRequest, MemmapRequest, MemoryMapEntryType};
    use osmium_kernel::config::{KERNEL_PHYS_BASE, KERNEL_VIRT_BASE, MAX_MEM_REGIONS};
    use osmium_kernel::{arch, initcall, mm, pr_emerg, pr_info, pr_warn, sched};
    use osmium_kernel::{MemRegion, RegionKind};

    #[used]
    static HHDM_REQUEST: HhdmRequest = HhdmRequest::new(0);

    #[used]
    static MEMMAP_REQUEST: MemmapRequest = MemmapRequest::new(0);

    #[used]
    static FRAMEBUFFER_REQUEST: FramebufferRequest = FramebufferRequest::new(0);

    extern "C" {
        /// End of the kernel image, from the linker script. Fallback for
        /// memory maps without a kernel/modules entry.
        static _kernel_end: u8;
    }

    fn region_kind(typ: &MemoryMapEntryType) -> RegionKind {
        match typ {
            MemoryMapEntryType::Usable => RegionKind::Usable,
            MemoryMapEntryType::BootloaderReclaimable => RegionKind::BootloaderReclaimable,
            MemoryMapEntryType::KernelAndModules => RegionKind::KernelAndModules,
            MemoryMapEntryType::AcpiReclaimable => RegionKind::AcpiReclaimable,
            MemoryMapEntryType::AcpiNvs => RegionKind::AcpiNvs,
            MemoryMapEntryType::Framebuffer => RegionKind::Framebuffer,
            _ => RegionKind::Reserved,
        }
    }

    #[no_mangle]
    pub extern "C" fn _start() -> ! {
        let hhdm = HHDM_REQUEST
            .get_response()
            .get()
            .expect("bootloader did not provide an HHDM response");
        mm::set_hhdm_offset(hhdm.offset);

        let memmap = MEMMAP_REQUEST
            .get_response()
            .get()
            .expect("bootloader did not provide a memory map");

        let mut regions = [MemRegion::new(0, 0, RegionKind::Reserved); MAX_MEM_REGIONS];
        let mut count = 0;
        for entry in memmap.memmap() {
            if count == MAX_MEM_REGIONS {
                pr_warn!("boot: memory map truncated to {} entries", MAX_MEM_REGIONS);
                break;
            }
            regions[count] = MemRegion::new(entry.base, entry.len, region_kind(&entry.typ));
            count += 1;
        }

        // Fallback kernel end, derived from the linker symbol.
        // SAFETY: _kernel_end is defined by the linker script; only its
        // address is taken.
        let kernel_virt_end = unsafe { &raw const _kernel_end } as u64;
        let kernel_phys_end = KERNEL_PHYS_BASE + (kernel_virt_end - KERNEL_VIRT_BASE);
        mm::record_boot_memory(&regions[..count], kernel_phys_end);

        initcall::run_initcalls();

        pr_info!("Osmium {} booting", env!("CARGO_PKG_VERSION"));
        if let Some(fb_response) = FRAMEBUFFER_REQUEST.get_response().get() {
            if let Some(fb) = fb_response.framebuffers().first() {
                pr_info!(
                    "boot: framebuffer {}x{}, pitch {}, {} bpp",
                    fb.width,
                    fb.height,
                    fb.pitch,
                    fb.bpp
                );
            }
        }

        sched::init();

        arch::x86_64::local_irq_enable();
        pr_info!("boot: initialization sequence complete");

        loop {
            arch::idle();
        }
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        // Interrupts off first; the console path takes locks.
        x86_64::instructions::interrupts::disable();
        pr_emerg!("Kernel panic: {}", info);
        arch::halt();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
