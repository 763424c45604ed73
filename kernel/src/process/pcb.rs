//! Process control block and file descriptors.

use super::{ARG_BUF_LEN, CMD_NAME_LEN, FD_COUNT};
use crate::error::{KernelError, KernelResult};

/// Process identifier, an index into the PCB array (0..7).
pub type Pid = usize;

/// What a descriptor is wired to. Dispatch is a `match` on this tag; the
/// set is closed, so no function-pointer tables are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    /// Terminal line-buffered input. Writes fail.
    Stdin,
    /// Terminal output. Reads fail.
    Stdout,
    /// Regular file streamed through the filesystem reader.
    File,
    /// Directory iterator yielding one filename per read.
    Directory,
    /// The per-terminal virtual RTC.
    Rtc,
}

/// One slot in the per-process descriptor table.
#[derive(Debug, Clone, Copy)]
pub struct FileDescriptor {
    pub kind: FdKind,
    /// Inode index; 0 unless the descriptor names a regular file.
    pub inode: u32,
    /// Current byte offset (file position or directory cursor).
    pub offset: u32,
    pub in_use: bool,
}

impl FileDescriptor {
    pub const fn closed() -> Self {
        FileDescriptor {
            kind: FdKind::Stdin,
            inode: 0,
            offset: 0,
            in_use: false,
        }
    }

    const fn stdio(kind: FdKind) -> Self {
        FileDescriptor {
            kind,
            inode: 0,
            offset: 0,
            in_use: true,
        }
    }
}

/// Per-process bookkeeping. Lives in the fixed PCB array, indexed by pid;
/// the kernel stack for a pid is a separate static block.
#[derive(Debug, Clone, Copy)]
pub struct Pcb {
    pub pid: Pid,
    /// Parent in this terminal's lineage; `None` for a root shell.
    pub parent: Option<Pid>,
    /// Child spawned by this process's `execute`, while it runs.
    pub child: Option<Pid>,
    /// The terminal this lineage belongs to.
    pub terminal: usize,
    pub fds: [FileDescriptor; FD_COUNT],
    /// Executable name (argv[0]).
    pub name: [u8; CMD_NAME_LEN],
    pub name_len: usize,
    /// Verbatim argument tail (argv[1]).
    pub args: [u8; ARG_BUF_LEN],
    pub args_len: usize,
    /// Parent kernel SP/BP captured inside `execute`, consumed by `halt`.
    pub parent_ksp: u32,
    pub parent_kbp: u32,
    /// Own kernel SP/BP, saved by the scheduler when switched out.
    pub saved_ksp: u32,
    pub saved_kbp: u32,
    /// Set when a CPU exception killed this process; `halt` then reports
    /// 256 to the parent regardless of the status argument.
    pub killed_by_exception: bool,
}

impl Pcb {
    /// Fresh PCB with stdin/stdout bound to the owning terminal.
    pub fn new(pid: Pid, parent: Option<Pid>, terminal: usize) -> Self {
        let mut fds = [FileDescriptor::closed(); FD_COUNT];
        fds[0] = FileDescriptor::stdio(FdKind::Stdin);
        fds[1] = FileDescriptor::stdio(FdKind::Stdout);
        Pcb {
            pid,
            parent,
            child: None,
            terminal,
            fds,
            name: [0; CMD_NAME_LEN],
            name_len: 0,
            args: [0; ARG_BUF_LEN],
            args_len: 0,
            parent_ksp: 0,
            parent_kbp: 0,
            saved_ksp: 0,
            saved_kbp: 0,
            killed_by_exception: false,
        }
    }

    /// Argument tail, or an error when the command carried none.
    pub fn args_bytes(&self) -> KernelResult<&[u8]> {
        if self.args_len == 0 {
            return Err(KernelError::NotFound { resource: "args" });
        }
        Ok(&self.args[..self.args_len])
    }

    /// Claim the first free slot at index 2 or above.
    pub fn alloc_fd(&mut self, kind: FdKind, inode: u32) -> KernelResult<usize> {
        for (fd, slot) in self.fds.iter_mut().enumerate().skip(2) {
            if !slot.in_use {
                *slot = FileDescriptor {
                    kind,
                    inode,
                    offset: 0,
                    in_use: true,
                };
                return Ok(fd);
            }
        }
        Err(KernelError::ResourceExhausted {
            resource: "fd table",
        })
    }

    /// Release a descriptor. Stdin/stdout (0 and 1) cannot be closed.
    pub fn close_fd(&mut self, fd: usize) -> KernelResult<()> {
        if fd < 2 || fd >= FD_COUNT {
            return Err(KernelError::BadFileDescriptor { fd });
        }
        if !self.fds[fd].in_use {
            return Err(KernelError::BadFileDescriptor { fd });
        }
        self.fds[fd] = FileDescriptor::closed();
        Ok(())
    }

    /// Copy of an open descriptor.
    pub fn fd(&self, fd: usize) -> KernelResult<FileDescriptor> {
        if fd >= FD_COUNT || !self.fds[fd].in_use {
            return Err(KernelError::BadFileDescriptor { fd });
        }
        Ok(self.fds[fd])
    }
}
