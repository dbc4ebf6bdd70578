//! Leveled boot initialization calls.
//!
//! Subsystems register an init function at one of seven levels; boot
//! walks the levels in order. Registration places a small entry record
//! in a named link section per level (`initcall0`..`initcall6`), and the
//! linker script brackets each section with `__start_`/`__stop_`
//! symbols, so there is no central list to maintain.
//!
//! Levels, in run order:
//! - `pure`: no dependencies at all (early consoles)
//! - `core`: core subsystems (physical memory)
//! - `postcore`: things built on core (slab heap)
//! - `arch`: architecture setup (descriptor tables, PIC)
//! - `subsys`: major subsystems
//! - `fs`: filesystem drivers
//! - `device`: device drivers (tick timer)

use crate::error::KernelResult;

/// An init function. A returned error is fatal to boot.
pub type InitCall = fn() -> KernelResult<()>;

/// One registered initcall.
#[repr(C)]
pub struct InitCallEntry {
    pub name: &'static str,
    pub call: InitCall,
}

// The entries only contain fn pointers and &'static str.
unsafe impl Sync for InitCallEntry {}

/// Register `$func` to run at boot level `$level`.
///
/// ```ignore
/// fn mem_setup() -> KernelResult<()> { /* ... */ Ok(()) }
/// initcall!(core, mem_setup);
/// ```
#[macro_export]
macro_rules! initcall {
    (pure, $func:ident) => {
        $crate::initcall!(@entry "initcall0", $func);
    };
    (core, $func:ident) => {
        $crate::initcall!(@entry "initcall1", $func);
    };
    (postcore, $func:ident) => {
        $crate::initcall!(@entry "initcall2", $func);
    };
    (arch, $func:ident) => {
        $crate::initcall!(@entry "initcall3", $func);
    };
    (subsys, $func:ident) => {
        $crate::initcall!(@entry "initcall4", $func);
    };
    (fs, $func:ident) => {
        $crate::initcall!(@entry "initcall5", $func);
    };
    (device, $func:ident) => {
        $crate::initcall!(@entry "initcall6", $func);
    };
    (@entry $section:literal, $func:ident) => {
        const _: () = {
            #[used]
            #[link_section = $section]
            static ENTRY: $crate::initcall::InitCallEntry = $crate::initcall::InitCallEntry {
                name: stringify!($func),
                call: $func,
            };
        };
    };
}

/// Run every registered initcall, level by level. Panics on the first
/// failure; a kernel that cannot finish its init sequence has nothing
/// sane left to do.
#[cfg(target_os = "none")]
pub fn run_initcalls() {
    extern "C" {
        static __start_initcall0: InitCallEntry;
        static __stop_initcall0: InitCallEntry;
        static __start_initcall1: InitCallEntry;
        static __stop_initcall1: InitCallEntry;
        static __start_initcall2: InitCallEntry;
        static __stop_initcall2: InitCallEntry;
        static __start_initcall3: InitCallEntry;
        static __stop_initcall3: InitCallEntry;
        static __start_initcall4: InitCallEntry;
        static __stop_initcall4: InitCallEntry;
        static __start_initcall5: InitCallEntry;
        static __stop_initcall5: InitCallEntry;
        static __start_initcall6: InitCallEntry;
        static __stop_initcall6: InitCallEntry;
    }

    // SAFETY: the linker script defines each __start/__stop pair to
    // bracket an array of InitCallEntry records emitted by initcall!().
    let levels: [(*const InitCallEntry, *const InitCallEntry); 7] = unsafe {
        [
            (&__start_initcall0, &__stop_initcall0),
            (&__start_initcall1, &__stop_initcall1),
            (&__start_initcall2, &__stop_initcall2),
            (&__start_initcall3, &__stop_initcall3),
            (&__start_initcall4, &__stop_initcall4),
            (&__start_initcall5, &__stop_initcall5),
            (&__start_initcall6, &__stop_initcall6),
        ]
    };

    for (start, stop) in levels {
        let mut entry = start;
        while entry < stop {
            // SAFETY: entry points into the initcall section, which holds
            // only valid InitCallEntry records.
            let e = unsafe { &*entry };
            if let Err(err) = (e.call)() {
                panic!("initcall {} failed: {}", e.name, err);
            }
            // SAFETY: stepping within the same section until `stop`.
            entry = unsafe { entry.add(1) };
        }
    }
}
