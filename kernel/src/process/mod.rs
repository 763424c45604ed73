//! Process control: PCBs, file descriptors, the pid pool, command
//! parsing, and the ELF loader.

pub mod loader;
pub mod pcb;
pub mod table;

pub use pcb::{FdKind, FileDescriptor, Pcb, Pid};

use crate::error::{KernelError, KernelResult};

/// Concurrent live-process limit (one bit per pid).
pub const MAX_PROCESSES: usize = 8;
/// Descriptors per process.
pub const FD_COUNT: usize = 8;
/// Capacity of the per-process argument buffer.
pub const ARG_BUF_LEN: usize = 128;
/// Bytes in each per-process kernel stack.
pub const KERNEL_STACK_SIZE: usize = 8192;
/// Longest executable name, bounded by the filesystem's name field.
pub const CMD_NAME_LEN: usize = crate::fs::FNAME_LEN;

/// A command string split into `argv[0]` and the verbatim tail.
#[derive(Debug, Clone, Copy)]
pub struct ParsedCommand {
    pub name: [u8; CMD_NAME_LEN],
    pub name_len: usize,
    pub args: [u8; ARG_BUF_LEN],
    pub args_len: usize,
}

impl ParsedCommand {
    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..self.name_len]
    }

    pub fn args_bytes(&self) -> &[u8] {
        &self.args[..self.args_len]
    }
}

/// Split `command` at the first inter-token space run.
///
/// Leading spaces are skipped, the first token becomes the executable
/// name, the separating run of spaces is collapsed, and everything after
/// it is kept verbatim (internal spaces included) as the argument string.
pub fn parse_command(command: &[u8]) -> KernelResult<ParsedCommand> {
    // The string may arrive NUL-terminated from user space.
    let end = command
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(command.len());
    let command = &command[..end];

    let start = command
        .iter()
        .position(|&b| b != b' ')
        .ok_or(KernelError::InvalidArgument { name: "command" })?;
    let rest = &command[start..];
    let name_end = rest.iter().position(|&b| b == b' ').unwrap_or(rest.len());
    let name_src = &rest[..name_end];
    if name_src.len() > CMD_NAME_LEN {
        return Err(KernelError::InvalidArgument { name: "command" });
    }

    let tail = &rest[name_end..];
    let args_src = match tail.iter().position(|&b| b != b' ') {
        Some(skip) => &tail[skip..],
        None => &[][..],
    };
    if args_src.len() > ARG_BUF_LEN {
        return Err(KernelError::InvalidArgument { name: "arguments" });
    }

    let mut parsed = ParsedCommand {
        name: [0; CMD_NAME_LEN],
        name_len: name_src.len(),
        args: [0; ARG_BUF_LEN],
        args_len: args_src.len(),
    };
    parsed.name[..name_src.len()].copy_from_slice(name_src);
    parsed.args[..args_src.len()].copy_from_slice(args_src);
    Ok(parsed)
}
