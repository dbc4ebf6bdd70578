// Global Descriptor Table

use lazy_static::lazy_static;
use x86_64::{
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
    VirtAddr,
};

use crate::mm::PAGE_SIZE;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();

        // One statically allocated frame, referenced from IST[0]: the
        // double fault gate switches to it, so a fault on a corrupted
        // stack still has somewhere to run. Must be 16-byte aligned for
        // the x86_64 ABI.
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = {
            #[repr(align(16))]
            #[allow(dead_code)] // Alignment wrapper -- accessed via raw pointer
            struct AlignedStack([u8; PAGE_SIZE]);
            static mut STACK: AlignedStack = AlignedStack([0; PAGE_SIZE]);

            let stack_ptr = &raw const STACK;
            let stack_start = VirtAddr::from_ptr(stack_ptr);
            stack_start + PAGE_SIZE as u64
        };
        tss
    };
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.add_entry(Descriptor::kernel_code_segment());      // 0x08
        let data_selector = gdt.add_entry(Descriptor::kernel_data_segment());      // 0x10
        let user_code_selector = gdt.add_entry(Descriptor::user_code_segment());   // 0x18 (+ RPL 3 = 0x1B)
        let user_data_selector = gdt.add_entry(Descriptor::user_data_segment());   // 0x20 (+ RPL 3 = 0x23)
        let tss_selector = gdt.add_entry(Descriptor::tss_segment(&TSS));           // 0x28 (2 entries)
        (
            gdt,
            Selectors {
                code_selector,
                data_selector,
                user_code_selector,
                user_data_selector,
                tss_selector,
            },
        )
    };
}

/// GDT segment selectors.
///
/// Layout:
/// - 0x00: Null descriptor
/// - 0x08: Kernel code segment (Ring 0, 64-bit)
/// - 0x10: Kernel data segment (Ring 0)
/// - 0x18: User code segment (Ring 3, 64-bit)
/// - 0x20: User data segment (Ring 3)
/// - 0x28: TSS (16-byte descriptor, occupies 0x28-0x30)
pub struct Selectors {
    pub code_selector: SegmentSelector,
    pub data_selector: SegmentSelector,
    pub user_code_selector: SegmentSelector,
    pub user_data_selector: SegmentSelector,
    pub tss_selector: SegmentSelector,
}

/// Build and load the GDT and TSS, then reload the segment registers.
/// Must run exactly once, before the IDT is loaded.
pub fn init() {
    use x86_64::instructions::{
        segmentation::{Segment, CS, DS},
        tables::load_tss,
    };

    GDT.0.load();
    // SAFETY: the selectors come from the GDT that was just loaded, so
    // they reference valid descriptors. CS/DS reloads and the TSS load
    // are required after swapping descriptor tables.
    unsafe {
        CS::set_reg(GDT.1.code_selector);
        DS::set_reg(GDT.1.data_selector);
        load_tss(GDT.1.tss_selector);
    }
}

/// The GDT selectors. The lazy_static ensures the table exists on first
/// access; loading it into the CPU is [`init`]'s job.
pub fn selectors() -> &'static Selectors {
    &GDT.1
}

/// Raw kernel code selector, as stored in new task frames.
pub fn kernel_code_selector() -> u16 {
    selectors().code_selector.0
}

/// Raw kernel data selector, as stored in new task frames.
pub fn kernel_data_selector() -> u16 {
    selectors().data_selector.0
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_selector_layout() {
        let s = selectors();
        assert_eq!(s.code_selector.0, 0x08);
        assert_eq!(s.data_selector.0, 0x10);
        assert_eq!(s.tss_selector.0, 0x28);
    }

    #[test]
    fn test_double_fault_stack_wired_into_tss() {
        // Force TSS construction and check IST[0] points at the top of
        // a 16-byte aligned frame.
        let _ = selectors();
        let ist0 = TSS.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize];
        assert_ne!(ist0.as_u64(), 0);
        assert_eq!(ist0.as_u64() % 16, 0);
    }
}
