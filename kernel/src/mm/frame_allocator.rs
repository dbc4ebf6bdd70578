//! Physical frame allocator.
//!
//! A bitmap over page frame numbers plus a `Page` back-array
//! (`mem_map`), both carved out of the first usable memory hole past the
//! kernel image during [`FrameAllocator::init`]. A set bit means the
//! frame is used; out-of-range PFNs read as used. Allocation is a
//! first-fit scan for a run of clear bits.
//!
//! The allocator is an ordinary value so tests can build private
//! instances over synthetic memory maps; the kernel keeps one global
//! instance behind [`FRAME_ALLOCATOR`].

use core::ptr::NonNull;

use crate::config::KERNEL_PHYS_BASE;
use crate::mm::{phys_to_virt, virt_to_phys, MemRegion, RegionKind, PAGE_SHIFT, PAGE_SIZE};
use crate::sync::IrqSpinLock;

/// Entry of the `mem_map` back-array. One per managed page frame,
/// created at init and never destroyed.
#[repr(C)]
#[derive(Debug)]
pub struct Page {
    pfn: u64,
}

impl Page {
    /// Page frame number.
    pub fn pfn(&self) -> u64 {
        self.pfn
    }

    /// Physical address of the first byte of the frame.
    pub fn phys_addr(&self) -> u64 {
        self.pfn << PAGE_SHIFT
    }

    /// Kernel virtual address of the frame via the direct map.
    pub fn virt_addr(&self) -> *mut u8 {
        phys_to_virt(self.phys_addr())
    }
}

/// Frame allocator errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAllocError {
    /// The allocator has not been initialized yet.
    NotInitialized,
    /// Fewer free frames than requested.
    OutOfMemory,
    /// Enough free frames exist, but no contiguous run of them.
    NoContiguousRun,
    /// The memory map contains no usable memory.
    NoUsableMemory,
    /// No usable hole large enough for the bitmap and back-array.
    NoMetadataRoom,
    /// A PFN outside the managed range.
    InvalidFrame,
    /// A frame in the run is already free.
    DoubleFree,
}

pub struct FrameAllocator {
    bitmap: Option<NonNull<u64>>,
    mem_map: Option<NonNull<Page>>,
    max_pfn: u64,
    nr_free: u64,
}

// SAFETY: the raw metadata pointers are only dereferenced by &mut self
// methods; the global instance is protected by an IrqSpinLock.
unsafe impl Send for FrameAllocator {}

impl FrameAllocator {
    pub const fn new() -> Self {
        Self {
            bitmap: None,
            mem_map: None,
            max_pfn: 0,
            nr_free: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.bitmap.is_some()
    }

    /// Number of currently free frames.
    pub fn nr_free(&self) -> u64 {
        self.nr_free
    }

    /// One past the highest managed PFN.
    pub fn max_pfn(&self) -> u64 {
        self.max_pfn
    }

    fn set_bit(&mut self, pfn: u64) {
        if pfn >= self.max_pfn {
            return;
        }
        if let Some(bitmap) = self.bitmap {
            // SAFETY: pfn < max_pfn, and the bitmap covers max_pfn bits.
            unsafe {
                *bitmap.as_ptr().add((pfn >> 6) as usize) |= 1u64 << (pfn & 63);
            }
        }
    }

    fn clear_bit(&mut self, pfn: u64) {
        if pfn >= self.max_pfn {
            return;
        }
        if let Some(bitmap) = self.bitmap {
            // SAFETY: pfn < max_pfn, and the bitmap covers max_pfn bits.
            unsafe {
                *bitmap.as_ptr().add((pfn >> 6) as usize) &= !(1u64 << (pfn & 63));
            }
        }
    }

    /// Out-of-range PFNs read as used.
    fn test_bit(&self, pfn: u64) -> bool {
        if pfn >= self.max_pfn {
            return true;
        }
        match self.bitmap {
            // SAFETY: pfn < max_pfn, and the bitmap covers max_pfn bits.
            Some(bitmap) => unsafe {
                (*bitmap.as_ptr().add((pfn >> 6) as usize)) & (1u64 << (pfn & 63)) != 0
            },
            None => true,
        }
    }

    /// Figure out where the kernel image ends in physical memory. Prefer
    /// the boot memory map; fall back to the linker-derived address.
    fn kernel_range(regions: &[MemRegion], fallback_end: u64) -> (u64, u64) {
        for region in regions {
            if region.kind == RegionKind::KernelAndModules {
                return (region.base, align_up(region.end(), PAGE_SIZE as u64));
            }
        }
        pr_warn!("pmm: using linker symbols for kernel end");
        (KERNEL_PHYS_BASE, align_up(fallback_end, PAGE_SIZE as u64))
    }

    /// Find a usable hole past the kernel image large enough for the
    /// allocator metadata.
    fn metadata_location(regions: &[MemRegion], kernel_end: u64, size: u64) -> Option<u64> {
        for region in regions {
            if region.kind != RegionKind::Usable {
                continue;
            }
            let start = align_up(region.base.max(kernel_end), PAGE_SIZE as u64);
            if start < region.end() && region.end() - start >= size {
                return Some(start);
            }
        }
        None
    }

    /// Initialize from a boot memory map.
    ///
    /// Sizes the bitmap and the `mem_map` back-array, places them in the
    /// first fitting usable hole, marks every non-managed PFN used, and
    /// reserves the kernel image and the metadata itself.
    pub fn init(
        &mut self,
        regions: &[MemRegion],
        kernel_end_fallback: u64,
    ) -> Result<(), FrameAllocError> {
        let mut max_pfn = 0u64;
        for region in regions {
            if managed(region.kind) {
                let end_pfn = align_up(region.end(), PAGE_SIZE as u64) >> PAGE_SHIFT;
                max_pfn = max_pfn.max(end_pfn);
            }
        }
        if max_pfn == 0 {
            return Err(FrameAllocError::NoUsableMemory);
        }

        let bitmap_words = max_pfn.div_ceil(64);
        let bitmap_size = bitmap_words * 8;
        let mem_map_size = max_pfn * core::mem::size_of::<Page>() as u64;
        let metadata_size = bitmap_size + mem_map_size;

        let (kernel_start, kernel_end) = Self::kernel_range(regions, kernel_end_fallback);
        let metadata_phys = Self::metadata_location(regions, kernel_end, metadata_size)
            .ok_or(FrameAllocError::NoMetadataRoom)?;

        pr_debug!(
            "pmm: managing {} pages, {} KiB metadata at {:#x}",
            max_pfn,
            metadata_size >> 10,
            metadata_phys
        );

        let bitmap = phys_to_virt(metadata_phys) as *mut u64;
        // SAFETY: metadata_location returned a hole of at least
        // metadata_size bytes of usable direct-mapped memory.
        unsafe {
            core::ptr::write_bytes(bitmap, 0, bitmap_words as usize);
        }
        self.bitmap = NonNull::new(bitmap);
        self.max_pfn = max_pfn;

        // Everything starts out used; managed regions are then cleared.
        for pfn in 0..max_pfn {
            self.set_bit(pfn);
        }
        for region in regions {
            if managed(region.kind) {
                let start_pfn = region.base >> PAGE_SHIFT;
                let end_pfn = region.end() >> PAGE_SHIFT;
                for pfn in start_pfn..end_pfn.min(max_pfn) {
                    self.clear_bit(pfn);
                }
            }
        }

        self.nr_free = (0..max_pfn).filter(|&pfn| !self.test_bit(pfn)).count() as u64;

        // Reserve the kernel image.
        for pfn in (kernel_start >> PAGE_SHIFT)..(kernel_end >> PAGE_SHIFT) {
            if !self.test_bit(pfn) {
                self.set_bit(pfn);
                self.nr_free -= 1;
            }
        }

        // Reserve the metadata itself.
        let metadata_pages = metadata_size.div_ceil(PAGE_SIZE as u64);
        for i in 0..metadata_pages {
            let pfn = (metadata_phys >> PAGE_SHIFT) + i;
            if !self.test_bit(pfn) {
                self.set_bit(pfn);
                self.nr_free -= 1;
            }
        }

        // Populate the back-array so PFN <-> Page resolution works.
        let mem_map = phys_to_virt(metadata_phys + bitmap_size) as *mut Page;
        for pfn in 0..max_pfn {
            // SAFETY: mem_map holds max_pfn Page slots inside the
            // reserved metadata hole.
            unsafe {
                mem_map.add(pfn as usize).write(Page { pfn });
            }
        }
        self.mem_map = NonNull::new(mem_map);

        Ok(())
    }

    fn page_at(&self, pfn: u64) -> Option<NonNull<Page>> {
        if pfn >= self.max_pfn {
            return None;
        }
        self.mem_map
            // SAFETY: pfn < max_pfn and mem_map holds max_pfn entries.
            .map(|m| unsafe { NonNull::new_unchecked(m.as_ptr().add(pfn as usize)) })
    }

    /// `Page` for a physical address, if it is in the managed range.
    pub fn phys_to_page(&self, phys: u64) -> Option<NonNull<Page>> {
        self.page_at(phys >> PAGE_SHIFT)
    }

    /// `Page` containing a direct-mapped virtual address.
    pub fn virt_to_page(&self, ptr: *const u8) -> Option<NonNull<Page>> {
        self.phys_to_page(virt_to_phys(ptr))
    }

    /// First-fit search for a run of `count` contiguous free frames.
    fn find_free_run(&self, count: u64) -> Option<u64> {
        let mut consecutive = 0u64;
        let mut start_pfn = 0u64;
        for pfn in 0..self.max_pfn {
            if !self.test_bit(pfn) {
                if consecutive == 0 {
                    start_pfn = pfn;
                }
                consecutive += 1;
                if consecutive == count {
                    return Some(start_pfn);
                }
            } else {
                consecutive = 0;
            }
        }
        None
    }

    /// Allocate `1 << order` contiguous frames. On success the caller
    /// owns the frames until it hands them back via [`Self::free_pages`].
    pub fn alloc_pages(&mut self, order: u32) -> Result<NonNull<Page>, FrameAllocError> {
        if !self.is_initialized() {
            return Err(FrameAllocError::NotInitialized);
        }
        let count = 1u64 << order;
        if self.nr_free < count {
            return Err(FrameAllocError::OutOfMemory);
        }

        let start_pfn = self
            .find_free_run(count)
            .ok_or(FrameAllocError::NoContiguousRun)?;
        for pfn in start_pfn..start_pfn + count {
            self.set_bit(pfn);
        }
        self.nr_free -= count;

        Ok(self
            .page_at(start_pfn)
            .expect("start_pfn returned by find_free_run is in range"))
    }

    /// Allocate a single frame.
    pub fn alloc_page(&mut self) -> Result<NonNull<Page>, FrameAllocError> {
        self.alloc_pages(0)
    }

    /// Free `1 << order` contiguous frames starting at `page`.
    ///
    /// The whole run is validated before any bit changes: a PFN out of
    /// range or an already-free frame anywhere in the run refuses the
    /// entire free without touching state.
    pub fn free_pages(&mut self, page: NonNull<Page>, order: u32) -> Result<(), FrameAllocError> {
        if !self.is_initialized() {
            return Err(FrameAllocError::NotInitialized);
        }
        let count = 1u64 << order;
        // SAFETY: Page handles only originate from this allocator's
        // mem_map, where they live for the kernel's lifetime.
        let start_pfn = unsafe { page.as_ref() }.pfn;

        if start_pfn >= self.max_pfn || start_pfn + count > self.max_pfn {
            return Err(FrameAllocError::InvalidFrame);
        }
        for pfn in start_pfn..start_pfn + count {
            if !self.test_bit(pfn) {
                return Err(FrameAllocError::DoubleFree);
            }
        }

        for pfn in start_pfn..start_pfn + count {
            self.clear_bit(pfn);
        }
        self.nr_free += count;
        Ok(())
    }

    /// Free a single frame.
    pub fn free_page(&mut self, page: NonNull<Page>) -> Result<(), FrameAllocError> {
        self.free_pages(page, 0)
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn managed(kind: RegionKind) -> bool {
    matches!(kind, RegionKind::Usable | RegionKind::BootloaderReclaimable)
}

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Global frame allocator instance
pub static FRAME_ALLOCATOR: IrqSpinLock<FrameAllocator> = IrqSpinLock::new(FrameAllocator::new());

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::mm::testing::alloc_phys_window;
    use crate::mm::PAGE_SIZE;
    use std::vec::Vec;

    const MIB: u64 = 1024 * 1024;

    /// Build an allocator over a fresh window shaped like a small boot
    /// memory map: [kernel image][gap][usable RAM].
    fn boot_shaped(usable: u64) -> (FrameAllocator, u64) {
        let window = alloc_phys_window(3 * MIB + usable);
        let regions = [
            MemRegion::new(window, MIB, RegionKind::Reserved),
            MemRegion::new(window + MIB, MIB, RegionKind::KernelAndModules),
            MemRegion::new(window + 3 * MIB, usable, RegionKind::Usable),
        ];
        let mut allocator = FrameAllocator::new();
        allocator
            .init(&regions, 0)
            .expect("allocator init over a valid map succeeds");
        (allocator, window)
    }

    fn metadata_pages(max_pfn: u64) -> u64 {
        let metadata = max_pfn.div_ceil(64) * 8 + max_pfn * core::mem::size_of::<Page>() as u64;
        metadata.div_ceil(PAGE_SIZE as u64)
    }

    #[test]
    fn test_boot_map_free_count_and_first_allocation() {
        // A 64 MiB usable region with the kernel image below it.
        let (mut allocator, window) = boot_shaped(64 * MIB);

        let max_pfn = (window + 3 * MIB + 64 * MIB) >> PAGE_SHIFT;
        assert_eq!(allocator.max_pfn(), max_pfn);

        let expected_free = 64 * MIB / PAGE_SIZE as u64 - metadata_pages(max_pfn);
        assert_eq!(allocator.nr_free(), expected_free);

        // The first allocation lands past the metadata reservation.
        let metadata_end_pfn = ((window + 3 * MIB) >> PAGE_SHIFT) + metadata_pages(max_pfn);
        let page = allocator.alloc_page().expect("allocation succeeds");
        // SAFETY: page handle from this allocator's mem_map.
        assert!(unsafe { page.as_ref() }.pfn() >= metadata_end_pfn);
    }

    #[test]
    fn test_conservation_across_matched_pairs() {
        let (mut allocator, _) = boot_shaped(8 * MIB);
        let start_free = allocator.nr_free();

        let mut held = Vec::new();
        for order in [0u32, 1, 3, 0, 2, 4, 0] {
            held.push((
                allocator
                    .alloc_pages(order)
                    .expect("allocation within budget succeeds"),
                order,
            ));
        }
        assert_eq!(
            allocator.nr_free(),
            start_free - held.iter().map(|&(_, o)| 1u64 << o).sum::<u64>()
        );

        // Free in a scrambled order.
        for &(page, order) in held.iter().rev() {
            allocator
                .free_pages(page, order)
                .expect("freeing an allocated run succeeds");
        }
        assert_eq!(allocator.nr_free(), start_free);
    }

    #[test]
    fn test_contiguity_of_high_order_allocation() {
        let (mut allocator, _) = boot_shaped(8 * MIB);

        let order = 4;
        let page = allocator
            .alloc_pages(order)
            .expect("order-4 allocation succeeds");
        // SAFETY: page handle from this allocator's mem_map.
        let start = unsafe { page.as_ref() }.pfn();

        // Every frame of the run is now used, and was free before.
        for pfn in start..start + (1 << order) {
            assert!(allocator.test_bit(pfn), "frame {} must be marked used", pfn);
        }

        // Back-array identity holds across the run.
        for i in 0..(1u64 << order) {
            let p = allocator
                .phys_to_page((start + i) << PAGE_SHIFT)
                .expect("run PFN resolves to a Page");
            // SAFETY: page handle from this allocator's mem_map.
            assert_eq!(unsafe { p.as_ref() }.pfn(), start + i);
        }
    }

    #[test]
    fn test_double_free_is_refused() {
        let (mut allocator, _) = boot_shaped(4 * MIB);
        let page = allocator.alloc_page().expect("allocation succeeds");

        allocator.free_page(page).expect("first free succeeds");
        let free_after = allocator.nr_free();

        assert_eq!(allocator.free_page(page), Err(FrameAllocError::DoubleFree));
        assert_eq!(allocator.nr_free(), free_after, "refused free must not corrupt state");
    }

    #[test]
    fn test_partial_double_free_leaves_run_untouched(){
        let (mut allocator, _) = boot_shaped(4 * MIB);
        let run = allocator.alloc_pages(2).expect("order-2 allocation succeeds");
        // SAFETY: page handle from this allocator's mem_map.
        let start = unsafe { run.as_ref() }.pfn();

        // Free one inner frame, then free the whole run: the run free
        // must be refused and change nothing.
        let inner = allocator
            .phys_to_page((start + 2) << PAGE_SHIFT)
            .expect("inner PFN resolves");
        allocator.free_page(inner).expect("inner free succeeds");
        let free_after = allocator.nr_free();

        assert_eq!(allocator.free_pages(run, 2), Err(FrameAllocError::DoubleFree));
        assert_eq!(allocator.nr_free(), free_after);
        assert!(!allocator.test_bit(start + 2), "inner frame stays free");
        assert!(allocator.test_bit(start), "outer frames stay used");
    }

    #[test]
    fn test_exhaustion_fails_cleanly() {
        let (mut allocator, _) = boot_shaped(MIB);
        let free = allocator.nr_free();

        let mut held = Vec::new();
        for _ in 0..free {
            held.push(allocator.alloc_page().expect("allocation within budget"));
        }
        assert_eq!(allocator.nr_free(), 0);
        assert_eq!(allocator.alloc_page(), Err(FrameAllocError::OutOfMemory));

        for page in held {
            allocator.free_page(page).expect("free succeeds");
        }
        assert_eq!(allocator.nr_free(), free);
    }

    #[test]
    fn test_uninitialized_allocator_refuses() {
        let mut allocator = FrameAllocator::new();
        assert_eq!(allocator.alloc_page(), Err(FrameAllocError::NotInitialized));
    }

    #[test]
    fn test_no_usable_memory() {
        let mut allocator = FrameAllocator::new();
        let regions = [MemRegion::new(0x1000, 0x1000, RegionKind::Reserved)];
        assert_eq!(
            allocator.init(&regions, 0),
            Err(FrameAllocError::NoUsableMemory)
        );
    }
}
