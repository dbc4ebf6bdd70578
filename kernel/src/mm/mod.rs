//! Memory management: the physical frame allocator and the slab heap
//! built on top of it.
//!
//! Physical memory is addressed through the bootloader's higher-half
//! direct map: every physical address is visible at `HHDM_OFFSET +
//! phys`. The offset is recorded once, early, before any allocator
//! touches memory.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::MAX_MEM_REGIONS;
use crate::error::KernelResult;
use crate::sync::SpinLock;

pub mod frame_allocator;
pub mod kmalloc;
pub mod slab;

pub use frame_allocator::{FrameAllocError, FrameAllocator, Page, FRAME_ALLOCATOR};
pub use kmalloc::{kcalloc, kfree, kmalloc};

/// Size of a physical page frame.
pub const PAGE_SIZE: usize = 4096;

/// log2(PAGE_SIZE).
pub const PAGE_SHIFT: u64 = 12;

/// Classification of a boot memory map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Free RAM, ours to manage.
    Usable,
    /// Bootloader structures; reclaimable, treated as managed RAM.
    BootloaderReclaimable,
    /// The kernel image and modules.
    KernelAndModules,
    /// ACPI tables that could be reclaimed later.
    AcpiReclaimable,
    /// ACPI non-volatile storage.
    AcpiNvs,
    /// The boot framebuffer.
    Framebuffer,
    /// Anything else. Never touched.
    Reserved,
}

/// One boot memory map entry.
#[derive(Debug, Clone, Copy)]
pub struct MemRegion {
    pub base: u64,
    pub len: u64,
    pub kind: RegionKind,
}

impl MemRegion {
    pub const fn new(base: u64, len: u64, kind: RegionKind) -> Self {
        Self { base, len, kind }
    }

    pub fn end(&self) -> u64 {
        self.base + self.len
    }
}

// ---------------------------------------------------------------------------
// Higher-half direct map
// ---------------------------------------------------------------------------

static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Record the higher-half direct map offset. Called once during early
/// boot, before the frame allocator initializes.
pub fn set_hhdm_offset(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Release);
}

pub fn hhdm_offset() -> u64 {
    HHDM_OFFSET.load(Ordering::Acquire)
}

/// Kernel virtual address of a physical address.
pub fn phys_to_virt(phys: u64) -> *mut u8 {
    (hhdm_offset() + phys) as *mut u8
}

/// Physical address of a direct-mapped kernel virtual address.
pub fn virt_to_phys(ptr: *const u8) -> u64 {
    (ptr as u64) - hhdm_offset()
}

// ---------------------------------------------------------------------------
// Boot handoff
// ---------------------------------------------------------------------------

struct BootMemory {
    regions: [MemRegion; MAX_MEM_REGIONS],
    len: usize,
    kernel_end_fallback: u64,
}

static BOOT_MEMORY: SpinLock<BootMemory> = SpinLock::new(BootMemory {
    regions: [MemRegion::new(0, 0, RegionKind::Reserved); MAX_MEM_REGIONS],
    len: 0,
    kernel_end_fallback: 0,
});

/// Stash the boot memory map for the `core`-level initcall. Entries past
/// the fixed capacity are dropped (and logged by the caller).
pub fn record_boot_memory(regions: &[MemRegion], kernel_end_fallback: u64) {
    let mut boot = BOOT_MEMORY.lock();
    let n = regions.len().min(MAX_MEM_REGIONS);
    boot.regions[..n].copy_from_slice(&regions[..n]);
    boot.len = n;
    boot.kernel_end_fallback = kernel_end_fallback;
}

/// `core` initcall: bring up the physical frame allocator from the
/// recorded boot memory map.
fn mem_setup() -> KernelResult<()> {
    let boot = BOOT_MEMORY.lock();
    let regions = &boot.regions[..boot.len];

    let mut allocator = FRAME_ALLOCATOR.lock();
    if let Err(err) = allocator.init(regions, boot.kernel_end_fallback) {
        panic!("pmm: init failed: {:?}", err);
    }

    let total = allocator.max_pfn() << PAGE_SHIFT;
    let free = allocator.nr_free() << PAGE_SHIFT;
    pr_info!(
        "pmm: total: {} MiB, free: {} MiB, used: {} MiB",
        total >> 20,
        free >> 20,
        (total - free) >> 20
    );
    Ok(())
}

initcall!(core, mem_setup);

// ---------------------------------------------------------------------------
// Global allocation entry points
// ---------------------------------------------------------------------------

/// Allocate `1 << order` contiguous frames from the global allocator.
pub fn alloc_pages(order: u32) -> Result<core::ptr::NonNull<Page>, FrameAllocError> {
    FRAME_ALLOCATOR.lock().alloc_pages(order)
}

/// Allocate a single frame.
pub fn alloc_page() -> Result<core::ptr::NonNull<Page>, FrameAllocError> {
    alloc_pages(0)
}

/// Return `1 << order` frames to the global allocator.
pub fn free_pages(page: core::ptr::NonNull<Page>, order: u32) {
    if let Err(err) = FRAME_ALLOCATOR.lock().free_pages(page, order) {
        pr_warn!("pmm: free_pages rejected: {:?}", err);
    }
}

/// Return a single frame.
pub fn free_page(page: core::ptr::NonNull<Page>) {
    free_pages(page, 0);
}

/// Number of free frames in the global allocator.
pub fn nr_free_pages() -> u64 {
    FRAME_ALLOCATOR.lock().nr_free()
}

// ---------------------------------------------------------------------------
// Test support: a page-aligned arena standing in for physical memory
// ---------------------------------------------------------------------------

#[cfg(all(test, not(target_os = "none")))]
pub(crate) mod testing {
    use super::*;
    use std::boxed::Box;
    use std::sync::{Mutex, MutexGuard, Once, OnceLock};
    use std::vec;

    /// Total arena size. Large enough for the boot-shaped scenario (a
    /// 64 MiB usable window) plus every other test's windows.
    const ARENA_SIZE: usize = 160 * 1024 * 1024;

    struct Arena {
        next: Mutex<u64>,
    }

    static ARENA: OnceLock<Arena> = OnceLock::new();

    fn arena() -> &'static Arena {
        ARENA.get_or_init(|| {
            let storage: Box<[u8]> = vec![0u8; ARENA_SIZE + PAGE_SIZE].into_boxed_slice();
            let raw = Box::leak(storage).as_mut_ptr() as u64;
            let base = (raw + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
            // "Physical" addresses in tests are arena offsets: the HHDM
            // offset maps phys 0 to the arena base.
            set_hhdm_offset(base);
            Arena {
                next: Mutex::new(PAGE_SIZE as u64),
            }
        })
    }

    /// Carve a page-aligned window of fake physical memory out of the
    /// arena and return its base "physical" address.
    pub fn alloc_phys_window(len: u64) -> u64 {
        let mut next = arena().next.lock().expect("arena cursor mutex healthy");
        let base = (*next + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        let end = base + len;
        assert!(
            end <= ARENA_SIZE as u64,
            "test arena exhausted: grow ARENA_SIZE"
        );
        *next = end;
        base
    }

    /// Serializes tests that assert on global allocator counters.
    static GLOBAL_MM: Mutex<()> = Mutex::new(());
    static GLOBAL_MM_INIT: Once = Once::new();

    /// Initialize the global FRAME_ALLOCATOR over a dedicated window
    /// (once per test process) and serialize the caller against other
    /// global-state tests.
    pub fn global_mm() -> MutexGuard<'static, ()> {
        let guard = match GLOBAL_MM.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        GLOBAL_MM_INIT.call_once(|| {
            let base = alloc_phys_window(16 * 1024 * 1024);
            let regions = [MemRegion::new(base, 16 * 1024 * 1024, RegionKind::Usable)];
            FRAME_ALLOCATOR
                .lock()
                .init(&regions, 0)
                .expect("global test allocator init succeeds");
        });
        guard
    }
}
