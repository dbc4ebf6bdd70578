//! Synchronization primitives.
//!
//! Single-CPU kernel: a spinlock alone does not make a critical section
//! interrupt-safe, so every piece of state that is touched from IRQ
//! context goes behind [`IrqSpinLock`], which pairs the lock with a
//! local interrupt save/restore.

pub mod spinlock;

pub use spinlock::{IrqSpinLock, IrqSpinLockGuard, SpinLock};
