//! Kernel error types.
//!
//! A single error enum with struct variants, so call sites carry enough
//! context to log something useful without allocating.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Not enough physical memory to satisfy the request.
    OutOfMemory { requested: usize },
    /// An argument was outside its valid range.
    InvalidArgument { name: &'static str, value: u64 },
    /// A resource with this identity is already registered.
    AlreadyExists { resource: &'static str, id: u64 },
    /// No resource with this identity is registered.
    NotFound { resource: &'static str, id: u64 },
    /// A fixed-size table is full.
    ResourceExhausted { resource: &'static str },
    /// A subsystem was used before its init ran.
    NotInitialized { subsystem: &'static str },
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory { requested } => {
                write!(f, "out of memory (requested {} bytes)", requested)
            }
            KernelError::InvalidArgument { name, value } => {
                write!(f, "invalid argument {}={:#x}", name, value)
            }
            KernelError::AlreadyExists { resource, id } => {
                write!(f, "{} {} already exists", resource, id)
            }
            KernelError::NotFound { resource, id } => {
                write!(f, "{} {} not found", resource, id)
            }
            KernelError::ResourceExhausted { resource } => {
                write!(f, "{} exhausted", resource)
            }
            KernelError::NotInitialized { subsystem } => {
                write!(f, "{} not initialized", subsystem)
            }
        }
    }
}
