//! The global process table: eight PCB slots, the pid occupancy bitmap,
//! the per-pid kernel stacks, and the "currently executing" pid.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use super::pcb::{Pcb, Pid};
use super::{KERNEL_STACK_SIZE, MAX_PROCESSES};
use crate::error::{KernelError, KernelResult};

struct ProcessTable {
    /// Bit `0x80 >> pid` set means pid is live (MSB-first, matching the
    /// allocation order).
    bitmap: u8,
    slots: [Option<Pcb>; MAX_PROCESSES],
}

static TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable {
    bitmap: 0,
    slots: [None; MAX_PROCESSES],
});

/// Currently executing pid, or `NO_PROCESS` during early boot.
const NO_PROCESS: usize = usize::MAX;
static CURRENT: AtomicUsize = AtomicUsize::new(NO_PROCESS);

const fn pid_bit(pid: Pid) -> u8 {
    0x80 >> pid
}

/// Claim the lowest free pid, MSB-first over the occupancy byte.
pub fn alloc_pid() -> KernelResult<Pid> {
    let mut table = TABLE.lock();
    for pid in 0..MAX_PROCESSES {
        if table.bitmap & pid_bit(pid) == 0 {
            table.bitmap |= pid_bit(pid);
            return Ok(pid);
        }
    }
    Err(KernelError::ResourceExhausted { resource: "pid" })
}

/// Release a pid and drop its PCB slot.
pub fn free_pid(pid: Pid) {
    let mut table = TABLE.lock();
    table.bitmap &= !pid_bit(pid);
    table.slots[pid] = None;
}

/// Whether `pid` is marked live.
pub fn pid_in_use(pid: Pid) -> bool {
    TABLE.lock().bitmap & pid_bit(pid) != 0
}

/// Number of live processes.
pub fn live_count() -> usize {
    TABLE.lock().bitmap.count_ones() as usize
}

/// Install a PCB into its slot. The pid must have been allocated.
pub fn insert(pcb: Pcb) -> KernelResult<()> {
    let mut table = TABLE.lock();
    let pid = pcb.pid;
    if table.bitmap & pid_bit(pid) == 0 {
        return Err(KernelError::NoSuchProcess { pid });
    }
    table.slots[pid] = Some(pcb);
    Ok(())
}

/// Run `f` against the PCB for `pid`.
pub fn with_pcb<R>(pid: Pid, f: impl FnOnce(&mut Pcb) -> R) -> KernelResult<R> {
    if pid >= MAX_PROCESSES {
        return Err(KernelError::NoSuchProcess { pid });
    }
    let mut table = TABLE.lock();
    match table.slots[pid].as_mut() {
        Some(pcb) => Ok(f(pcb)),
        None => Err(KernelError::NoSuchProcess { pid }),
    }
}

/// Run `f` against the currently executing process's PCB.
pub fn with_current<R>(f: impl FnOnce(&mut Pcb) -> R) -> KernelResult<R> {
    match current_pid() {
        Some(pid) => with_pcb(pid, f),
        None => Err(KernelError::NoSuchProcess { pid: NO_PROCESS }),
    }
}

/// The currently executing pid, if any.
pub fn current_pid() -> Option<Pid> {
    match CURRENT.load(Ordering::Acquire) {
        NO_PROCESS => None,
        pid => Some(pid),
    }
}

/// Record the pid the CPU is about to run on behalf of. The scheduler,
/// `execute`, and `halt` are the only callers.
pub fn set_current(pid: Option<Pid>) {
    CURRENT.store(pid.unwrap_or(NO_PROCESS), Ordering::Release);
}

/// Follow child links from `root` to the lineage's deepest process.
pub fn deepest_child(root: Pid) -> Pid {
    let table = TABLE.lock();
    let mut pid = root;
    // Lineages are linear and at most MAX_PROCESSES deep.
    for _ in 0..MAX_PROCESSES {
        match table.slots[pid].as_ref().and_then(|pcb| pcb.child) {
            Some(child) => pid = child,
            None => break,
        }
    }
    pid
}

// ---------------------------------------------------------------------------
// Kernel stacks
// ---------------------------------------------------------------------------

#[repr(C, align(8192))]
struct KernelStack([u8; KERNEL_STACK_SIZE]);

struct StackPool(UnsafeCell<[KernelStack; MAX_PROCESSES]>);

// SAFETY: the pool is only ever touched through ESP while the owning pid
// runs; Rust code never forms a reference into it.
unsafe impl Sync for StackPool {}

static KERNEL_STACKS: StackPool = StackPool(UnsafeCell::new(
    [
        KernelStack([0; KERNEL_STACK_SIZE]),
        KernelStack([0; KERNEL_STACK_SIZE]),
        KernelStack([0; KERNEL_STACK_SIZE]),
        KernelStack([0; KERNEL_STACK_SIZE]),
        KernelStack([0; KERNEL_STACK_SIZE]),
        KernelStack([0; KERNEL_STACK_SIZE]),
        KernelStack([0; KERNEL_STACK_SIZE]),
        KernelStack([0; KERNEL_STACK_SIZE]),
    ],
));

/// Initial ESP for `pid`'s kernel stack (top of its 8 KiB block, minus
/// one slot so the first push stays inside).
pub fn kernel_stack_top(pid: Pid) -> u32 {
    let base = KERNEL_STACKS.0.get() as u32;
    base + ((pid as u32) + 1) * KERNEL_STACK_SIZE as u32 - 4
}
