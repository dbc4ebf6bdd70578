//! Osmium Kernel Library
//!
//! This library provides the core functionality for the Osmium kernel
//! and exports the pieces the test suite needs: physical memory
//! management, the slab heap, interrupt dispatch, the scheduler and the
//! kernel log.
//!
//! The crate builds for two targets:
//! - `x86_64-unknown-none` (the real kernel, entered via `main.rs`)
//! - the host target, where the unit tests run under the standard
//!   harness with the system allocator

#![no_std]

// On bare metal the kernel heap (slab + kmalloc) backs Rust allocations.
// On the host (x86_64-unknown-linux-gnu) for testing, delegate to the
// system allocator so that test code compiles and runs normally.
#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: mm::kmalloc::KernelHeap = mm::kmalloc::KernelHeap;

#[macro_use]
pub mod printk;
#[macro_use]
pub mod initcall;

pub mod arch;
pub mod config;
pub mod error;
pub mod irq;
pub mod klog;
pub mod mm;
pub mod panic;
pub mod sched;
pub mod serial;
pub mod sync;

// Re-export for tests and callers that don't want the full paths.
pub use arch::x86_64::context::PtRegs;
pub use error::{KernelError, KernelResult};
pub use mm::{MemRegion, RegionKind, PAGE_SIZE};
