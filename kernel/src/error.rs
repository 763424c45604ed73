//! Kernel error types.
//!
//! Internal helpers return structured errors and propagate them with `?`;
//! only the syscall dispatcher flattens an error to the user-visible
//! sentinel (-1). Variants carry just enough payload to make a serial log
//! line useful.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A caller-supplied value was rejected (null pointer, bad length,
    /// out-of-range frequency, malformed command string).
    InvalidArgument { name: &'static str },

    /// A named object does not exist (file, directory entry).
    NotFound { resource: &'static str },

    /// A fixed-size pool is full (pid bitmap, FD table).
    ResourceExhausted { resource: &'static str },

    /// File descriptor is out of range, unopened, or protected.
    BadFileDescriptor { fd: usize },

    /// The operation is not defined for this descriptor kind
    /// (write on stdin, read on stdout, any write into the filesystem).
    Unsupported { operation: &'static str },

    /// The named file failed the ELF sanity check.
    NotExecutable,

    /// The filesystem image is structurally inconsistent (index out of
    /// the superblock's range, truncated block).
    FsCorrupted { what: &'static str },

    /// A pid was used before `execute` allocated it.
    NoSuchProcess { pid: usize },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::InvalidArgument { name } => write!(f, "invalid argument: {}", name),
            KernelError::NotFound { resource } => write!(f, "not found: {}", resource),
            KernelError::ResourceExhausted { resource } => {
                write!(f, "resource exhausted: {}", resource)
            }
            KernelError::BadFileDescriptor { fd } => write!(f, "bad file descriptor {}", fd),
            KernelError::Unsupported { operation } => write!(f, "unsupported: {}", operation),
            KernelError::NotExecutable => write!(f, "not an executable"),
            KernelError::FsCorrupted { what } => write!(f, "filesystem corrupted: {}", what),
            KernelError::NoSuchProcess { pid } => write!(f, "no such process {}", pid),
        }
    }
}

/// Result alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

/// The single out-of-band value every failed syscall returns.
pub const SYSCALL_FAILURE: isize = -1;

/// Flatten a kernel result into the user ABI convention.
pub fn to_syscall_ret(result: KernelResult<usize>) -> isize {
    match result {
        Ok(value) => value as isize,
        Err(_) => SYSCALL_FAILURE,
    }
}
