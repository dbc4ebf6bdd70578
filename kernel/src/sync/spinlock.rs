//! Spinlocks and the interrupt-saving lock guard.

use core::ops::{Deref, DerefMut};

use crate::arch::x86_64::{local_irq_restore, local_irq_save, IrqFlags};

/// Plain test-and-set spinlock. Safe only for state that is never
/// touched from interrupt context.
pub type SpinLock<T> = spin::Mutex<T>;

/// A spinlock whose guard also disables local interrupts.
///
/// Acquisition saves the interrupt-enable flag and disables interrupts
/// before taking the lock; dropping the guard releases the lock and then
/// restores the saved flag. Encoding the pairing in the guard means no
/// exit path can forget the restore half.
pub struct IrqSpinLock<T> {
    inner: spin::Mutex<T>,
}

/// Guard returned by [`IrqSpinLock::lock`].
pub struct IrqSpinLockGuard<'a, T> {
    // Dropped before the flags are restored; Option makes the order explicit.
    guard: Option<spin::MutexGuard<'a, T>>,
    flags: IrqFlags,
}

impl<T> IrqSpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    /// Save and disable local interrupts, then acquire the lock.
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let flags = local_irq_save();
        IrqSpinLockGuard {
            guard: Some(self.inner.lock()),
            flags,
        }
    }
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_ref().expect("guard present until drop")
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().expect("guard present until drop")
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release the lock first, then restore the interrupt flag.
        self.guard.take();
        local_irq_restore(self.flags);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_mutual_exclusion() {
        // Two "interrupt contexts" hammering one counter must not lose
        // any increments.
        const N: u64 = 100_000;
        let counter = IrqSpinLock::new(0u64);

        std::thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..N {
                        *counter.lock() += 1;
                    }
                });
            }
        });

        assert_eq!(*counter.lock(), 2 * N);
    }

    #[test]
    fn test_irq_flags_restored_after_lock() {
        let before = local_irq_save();
        local_irq_restore(before);

        let lock = IrqSpinLock::new(());
        drop(lock.lock());

        let after = local_irq_save();
        local_irq_restore(after);
        assert_eq!(before, after);
    }

    #[test]
    fn test_guard_releases_on_every_path() {
        let lock = IrqSpinLock::new(5u32);
        {
            let mut g = lock.lock();
            *g = 7;
        }
        // Would deadlock if the guard leaked the inner lock.
        assert_eq!(*lock.lock(), 7);
    }
}
