//! System call surface.
//!
//! Vector 0x80, trap gate, DPL 3. The number arrives in EAX (1..10),
//! arguments in EBX/ECX/EDX, and the result goes back in EAX. Every
//! handler returns `KernelResult` internally; [`dispatch`] flattens any
//! error to the single sentinel -1. Per-descriptor behavior is a `match`
//! over [`FdKind`]; the set of descriptor backends is closed.

use crate::arch::x86::{context, gdt, usermode};
use crate::config::SHELL_CMD;
use crate::error::{to_syscall_ret, KernelError, KernelResult, SYSCALL_FAILURE};
use crate::fs;
use crate::mm::paging;
use crate::mm::{USER_STACK_TOP, USER_VADDR_BASE, VIDMAP_VADDR};
use crate::process::{self, loader, table, FdKind, Pcb};
use crate::tty;

/// Status a parent observes when its child died on a CPU exception.
pub const EXCEPTION_STATUS: u32 = 256;

/// Syscall numbers of the user ABI.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt = 1,
    Execute = 2,
    Read = 3,
    Write = 4,
    Open = 5,
    Close = 6,
    Getargs = 7,
    Vidmap = 8,
    SetHandler = 9,
    Sigreturn = 10,
}

impl TryFrom<usize> for Syscall {
    type Error = KernelError;

    fn try_from(value: usize) -> KernelResult<Self> {
        match value {
            1 => Ok(Syscall::Halt),
            2 => Ok(Syscall::Execute),
            3 => Ok(Syscall::Read),
            4 => Ok(Syscall::Write),
            5 => Ok(Syscall::Open),
            6 => Ok(Syscall::Close),
            7 => Ok(Syscall::Getargs),
            8 => Ok(Syscall::Vidmap),
            9 => Ok(Syscall::SetHandler),
            10 => Ok(Syscall::Sigreturn),
            _ => Err(KernelError::InvalidArgument { name: "syscall" }),
        }
    }
}

/// Entry point from the interrupt stub.
pub fn dispatch(number: usize, arg1: usize, arg2: usize, arg3: usize) -> isize {
    let syscall = match Syscall::try_from(number) {
        Ok(syscall) => syscall,
        Err(_) => return SYSCALL_FAILURE,
    };

    match syscall {
        Syscall::Halt => halt_current((arg1 & 0xFF) as u32),
        Syscall::Execute => sys_execute(arg1),
        Syscall::Read => to_syscall_ret(sys_read(arg1, arg2, arg3)),
        Syscall::Write => to_syscall_ret(sys_write(arg1, arg2, arg3)),
        Syscall::Open => to_syscall_ret(sys_open(arg1)),
        Syscall::Close => to_syscall_ret(sys_close(arg1)),
        Syscall::Getargs => to_syscall_ret(sys_getargs(arg1, arg2)),
        Syscall::Vidmap => to_syscall_ret(sys_vidmap(arg1)),
        // Reserved numbers: signal support never left the drawing board.
        Syscall::SetHandler | Syscall::Sigreturn => SYSCALL_FAILURE,
    }
}

// ---------------------------------------------------------------------------
// User-pointer plumbing
// ---------------------------------------------------------------------------

/// Longest accepted command string: name, separator, argument tail.
const CMD_BUF_LEN: usize = 192;

/// Copy a NUL-terminated user string into `buf`, returning its length.
/// Overlong input is truncated at the buffer.
fn copy_user_cstr(ptr: usize, buf: &mut [u8]) -> KernelResult<usize> {
    if ptr == 0 {
        return Err(KernelError::InvalidArgument { name: "string" });
    }
    for (i, slot) in buf.iter_mut().enumerate() {
        // SAFETY: the user pointer was null-checked; reads stop at the
        // first NUL or the buffer bound, and a fault here arrives as a
        // page fault that kills the calling process, not the kernel.
        let byte = unsafe { core::ptr::read((ptr as *const u8).add(i)) };
        if byte == 0 {
            return Ok(i);
        }
        *slot = byte;
    }
    Ok(buf.len())
}

/// View a user buffer as a mutable byte slice.
fn user_slice_mut(ptr: usize, len: usize) -> KernelResult<&'static mut [u8]> {
    if ptr == 0 {
        return Err(KernelError::InvalidArgument { name: "buffer" });
    }
    if (len as isize) < 0 {
        return Err(KernelError::InvalidArgument { name: "length" });
    }
    // SAFETY: null-checked; the slice aliases user memory that only this
    // process touches while its syscall runs.
    Ok(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len) })
}

/// View a user buffer as a shared byte slice.
fn user_slice(ptr: usize, len: usize) -> KernelResult<&'static [u8]> {
    user_slice_mut(ptr, len).map(|s| &*s)
}

// ---------------------------------------------------------------------------
// read / write / open / close
// ---------------------------------------------------------------------------

fn sys_read(fd: usize, buf: usize, nbytes: usize) -> KernelResult<usize> {
    let descriptor = table::with_current(|pcb| pcb.fd(fd))??;
    let terminal = table::with_current(|pcb| pcb.terminal)?;
    let buf = user_slice_mut(buf, nbytes)?;

    match descriptor.kind {
        FdKind::Stdin => tty::read_line(terminal, buf),
        FdKind::Stdout => Err(KernelError::Unsupported {
            operation: "read on stdout",
        }),
        FdKind::File => {
            let fs = fs::get()?;
            let copied = fs.read_data(descriptor.inode, descriptor.offset, buf)?;
            table::with_current(|pcb| pcb.fds[fd].offset += copied as u32)?;
            Ok(copied)
        }
        FdKind::Directory => {
            let fs = fs::get()?;
            if descriptor.offset >= fs.dentry_count() {
                return Ok(0);
            }
            let entry = fs.read_dentry_by_index(descriptor.offset)?;
            let name = entry.name_bytes();
            let copied = name.len().min(buf.len());
            buf[..copied].copy_from_slice(&name[..copied]);
            table::with_current(|pcb| pcb.fds[fd].offset += 1)?;
            Ok(copied)
        }
        FdKind::Rtc => {
            tty::rtc_wait(terminal)?;
            Ok(0)
        }
    }
}

fn sys_write(fd: usize, buf: usize, nbytes: usize) -> KernelResult<usize> {
    let descriptor = table::with_current(|pcb| pcb.fd(fd))??;
    let terminal = table::with_current(|pcb| pcb.terminal)?;

    match descriptor.kind {
        FdKind::Stdin => Err(KernelError::Unsupported {
            operation: "write on stdin",
        }),
        FdKind::Stdout => {
            if nbytes == 0 {
                return Err(KernelError::InvalidArgument { name: "length" });
            }
            let bytes = user_slice(buf, nbytes)?;
            tty::write_bytes(terminal, bytes)
        }
        FdKind::File | FdKind::Directory => Err(KernelError::Unsupported {
            operation: "write on read-only filesystem",
        }),
        FdKind::Rtc => {
            if nbytes != core::mem::size_of::<u32>() {
                return Err(KernelError::InvalidArgument { name: "length" });
            }
            let bytes = user_slice(buf, nbytes)?;
            let freq = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            tty::rtc_set_freq(terminal, freq)?;
            Ok(nbytes)
        }
    }
}

fn sys_open(name_ptr: usize) -> KernelResult<usize> {
    let mut name_buf = [0u8; fs::FNAME_LEN + 1];
    let len = copy_user_cstr(name_ptr, &mut name_buf)?;
    let fs = fs::get()?;
    let entry = fs.read_dentry_by_name(&name_buf[..len])?;
    let terminal = table::with_current(|pcb| pcb.terminal)?;

    let (kind, inode) = match entry.file_type {
        fs::FileType::Rtc => (FdKind::Rtc, 0),
        fs::FileType::Directory => (FdKind::Directory, 0),
        fs::FileType::Regular => (FdKind::File, entry.inode),
    };

    let fd = table::with_current(|pcb| pcb.alloc_fd(kind, inode))??;
    if kind == FdKind::Rtc {
        tty::rtc_reset(terminal);
    }
    Ok(fd)
}

fn sys_close(fd: usize) -> KernelResult<usize> {
    table::with_current(|pcb| pcb.close_fd(fd))??;
    Ok(0)
}

// ---------------------------------------------------------------------------
// getargs / vidmap
// ---------------------------------------------------------------------------

fn sys_getargs(buf: usize, nbytes: usize) -> KernelResult<usize> {
    let dst = user_slice_mut(buf, nbytes)?;
    table::with_current(|pcb| {
        let args = pcb.args_bytes()?;
        let copied = args.len().min(dst.len());
        dst[..copied].copy_from_slice(&args[..copied]);
        if copied < dst.len() {
            dst[copied] = 0;
        }
        Ok(0)
    })?
}

fn sys_vidmap(screen_start: usize) -> KernelResult<usize> {
    // The out-pointer itself must live inside the user 4 MiB page.
    let lo = USER_VADDR_BASE as usize;
    let hi = lo + paging::PAGE_4M as usize;
    if screen_start < lo || screen_start + core::mem::size_of::<u32>() > hi {
        return Err(KernelError::InvalidArgument {
            name: "screen_start",
        });
    }

    let pid = table::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
    let terminal = table::with_current(|pcb| pcb.terminal)?;
    let target = tty::video_target_for(terminal);
    paging::map_vid_mem(pid, VIDMAP_VADDR, target)?;
    tty::set_vidmap(terminal, true);

    // SAFETY: the pointer was range-checked against the mapped user page.
    unsafe { core::ptr::write(screen_start as *mut u32, VIDMAP_VADDR) };
    Ok(0)
}

// ---------------------------------------------------------------------------
// execute / halt
// ---------------------------------------------------------------------------

fn sys_execute(command_ptr: usize) -> isize {
    let mut command = [0u8; CMD_BUF_LEN];
    let len = match copy_user_cstr(command_ptr, &mut command) {
        Ok(len) => len,
        Err(_) => return SYSCALL_FAILURE,
    };
    execute_command(&command[..len], None)
}

/// Launch `command`. With `root_terminal`, the process becomes that
/// terminal's root shell (no parent); otherwise it is a child of the
/// currently executing process.
///
/// Returns the child's halt status, 256 for an exception death, or the
/// sentinel when the launch itself fails. On success this function only
/// "returns" when `halt` rewinds onto the frame captured below.
pub fn execute_command(command: &[u8], root_terminal: Option<usize>) -> isize {
    match prepare_execute(command, root_terminal) {
        Ok(launch) => execute_frame(launch),
        Err(_) => SYSCALL_FAILURE,
    }
}

/// Everything `execute` decides before it commits to the child.
struct Launch {
    pid: usize,
    entry_point: u32,
}

fn prepare_execute(command: &[u8], root_terminal: Option<usize>) -> KernelResult<Launch> {
    let parsed = process::parse_command(command)?;
    let fs = fs::get()?;
    let exe = loader::validate(fs, parsed.name_bytes())?;

    let (parent, terminal) = match root_terminal {
        Some(term) => (None, term),
        None => {
            let current = table::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
            let terminal = table::with_pcb(current, |pcb| pcb.terminal)?;
            (Some(current), terminal)
        }
    };

    let pid = table::alloc_pid()?;

    if let Err(err) = paging::make_task_pgdir(pid) {
        table::free_pid(pid);
        return Err(err);
    }

    // The child's user page is now active; pour the image into it.
    // SAFETY: make_task_pgdir mapped the (pid + 2) frame at the load
    // address, and no other process aliases that frame.
    if let Err(err) = unsafe { loader::load_image(fs, &exe) } {
        table::free_pid(pid);
        restore_address_space_after_failure(parent);
        return Err(err);
    }

    let mut pcb = Pcb::new(pid, parent, terminal);
    pcb.name[..parsed.name_len].copy_from_slice(parsed.name_bytes());
    pcb.name_len = parsed.name_len;
    pcb.args[..parsed.args_len].copy_from_slice(parsed.args_bytes());
    pcb.args_len = parsed.args_len;
    table::insert(pcb)?;

    match parent {
        Some(parent_pid) => {
            table::with_pcb(parent_pid, |pcb| pcb.child = Some(pid))?;
        }
        None => tty::mark_running(terminal, pid),
    }

    log::info!(
        "execute: pid {} on terminal {} entry {:#010x}",
        pid,
        terminal,
        exe.entry_point
    );
    Ok(Launch {
        pid,
        entry_point: exe.entry_point,
    })
}

fn restore_address_space_after_failure(parent: Option<usize>) {
    match parent {
        Some(parent_pid) => {
            let _ = paging::activate(parent_pid);
        }
        None => paging::activate_kernel(),
    }
}

/// The frame `halt` later rewinds onto. `extern "C"` pins the return
/// value to EAX and `#[inline(never)]` keeps the frame real, so
/// `leave; ret` out of the captured ESP/EBP pair produces exactly one
/// i32-returning call for the parent.
#[inline(never)]
extern "C" fn execute_frame(launch: Launch) -> isize {
    gdt::set_kernel_stack(table::kernel_stack_top(launch.pid));

    let (esp, ebp) = context::save();
    let _ = table::with_pcb(launch.pid, |pcb| {
        pcb.parent_ksp = esp;
        pcb.parent_kbp = ebp;
    });
    table::set_current(Some(launch.pid));

    // SAFETY: entry point and stack both lie in the user page mapped by
    // make_task_pgdir; esp0 was pointed at the child's kernel stack above.
    unsafe { usermode::enter_user(launch.entry_point, USER_STACK_TOP) }
}

/// Terminate the currently executing process and deliver `status` (or
/// [`EXCEPTION_STATUS`]) to its parent's `execute` frame. A terminal's
/// root shell is relaunched instead of leaving the terminal dead.
pub fn halt_current(status: u32) -> isize {
    let Some(pid) = table::current_pid() else {
        return SYSCALL_FAILURE;
    };

    let (parent, terminal, killed, parent_ksp, parent_kbp) =
        match table::with_pcb(pid, |pcb| {
            for fd in 2..process::FD_COUNT {
                let _ = pcb.close_fd(fd);
            }
            (
                pcb.parent,
                pcb.terminal,
                pcb.killed_by_exception,
                pcb.parent_ksp,
                pcb.parent_kbp,
            )
        }) {
            Ok(fields) => fields,
            Err(_) => return SYSCALL_FAILURE,
        };

    let status = if killed { EXCEPTION_STATUS } else { status };
    let _ = paging::remove_task_pgdir(pid);
    table::free_pid(pid);

    match parent {
        Some(parent_pid) => {
            let _ = table::with_pcb(parent_pid, |pcb| pcb.child = None);
            let _ = paging::activate(parent_pid);
            gdt::set_kernel_stack(table::kernel_stack_top(parent_pid));
            table::set_current(Some(parent_pid));
            log::info!("halt: pid {} -> parent {} status {}", pid, parent_pid, status);
            // SAFETY: the pair was captured inside the parent's still-live
            // execute frame, and the parent's paging context is active.
            unsafe { usermode::return_to_parent(parent_ksp, parent_kbp, status) }
        }
        None => {
            // The root shell halted: give the terminal a fresh one.
            log::warn!("halt: root shell of terminal {} exited, relaunching", terminal);
            table::set_current(None);
            execute_command(SHELL_CMD, Some(terminal))
        }
    }
}

/// Exception path out of the IDT: diagnose, mark, and halt with the
/// exception sentinel.
pub fn kill_current_on_exception(name: &str, eip: u32, eflags: u32, error_code: u32) -> ! {
    use core::fmt::Write;

    let terminal = tty::current_process_terminal();
    tty::clear(terminal);
    let mut out = tty::TermWriter(terminal);
    let _ = writeln!(out, "Exception: {}", name);
    let _ = writeln!(out, "  EIP:    {:#010x}", eip);
    let _ = writeln!(out, "  EFLAGS: {:#010x}", eflags);
    let _ = writeln!(out, "  Error:  {:#x}", error_code);
    log::error!("{} at {:#010x} killed pid {:?}", name, eip, table::current_pid());

    let _ = table::with_current(|pcb| pcb.killed_by_exception = true);
    halt_current(0);
    unreachable!("halt of a faulted process returned");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_numbers_match_the_abi() {
        assert_eq!(Syscall::try_from(1).unwrap(), Syscall::Halt);
        assert_eq!(Syscall::try_from(8).unwrap(), Syscall::Vidmap);
        assert!(Syscall::try_from(0).is_err());
        assert!(Syscall::try_from(11).is_err());
    }

    #[test]
    fn unknown_numbers_return_the_sentinel() {
        assert_eq!(dispatch(0, 0, 0, 0), SYSCALL_FAILURE);
        assert_eq!(dispatch(99, 0, 0, 0), SYSCALL_FAILURE);
    }

    #[test]
    fn reserved_signal_numbers_return_the_sentinel() {
        assert_eq!(dispatch(9, 0, 0, 0), SYSCALL_FAILURE);
        assert_eq!(dispatch(10, 0, 0, 0), SYSCALL_FAILURE);
    }

    #[test]
    fn io_syscalls_without_a_process_fail() {
        // No process is "current" on the host; every FD operation must
        // surface the sentinel rather than touch a stale table entry.
        assert_eq!(dispatch(3, 0, 0x1000, 4), SYSCALL_FAILURE);
        assert_eq!(dispatch(4, 1, 0x1000, 4), SYSCALL_FAILURE);
        assert_eq!(dispatch(6, 2, 0, 0), SYSCALL_FAILURE);
        assert_eq!(dispatch(7, 0x1000, 4, 0), SYSCALL_FAILURE);
    }

    #[test]
    fn null_user_pointers_are_rejected() {
        let mut buf = [0u8; 4];
        assert!(copy_user_cstr(0, &mut buf).is_err());
        assert!(user_slice_mut(0, 4).is_err());
    }

    #[test]
    fn kernel_strings_copy_up_to_the_nul() {
        let source = b"shell\0junk";
        let mut buf = [0u8; 16];
        let len = copy_user_cstr(source.as_ptr() as usize, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"shell");
    }

    #[test]
    fn vidmap_rejects_pointers_outside_the_user_page() {
        assert_eq!(dispatch(8, 0, 0, 0), SYSCALL_FAILURE);
        assert_eq!(dispatch(8, 0x1000, 0, 0), SYSCALL_FAILURE);
        let past_end = (USER_VADDR_BASE + paging::PAGE_4M) as usize - 2;
        assert_eq!(dispatch(8, past_end, 0, 0), SYSCALL_FAILURE);
    }

    #[test]
    fn execute_with_a_bad_command_fails_cleanly() {
        assert_eq!(execute_command(b"", None), SYSCALL_FAILURE);
        assert_eq!(execute_command(b"   ", None), SYSCALL_FAILURE);
        // No filesystem mounted in this test context.
        assert_eq!(execute_command(b"shell", Some(0)), SYSCALL_FAILURE);
    }
}
