//! PIT-driven round-robin scheduler over the three terminals.
//!
//! The unit of scheduling is a terminal lineage, not a process: each tick
//! elects the next runnable terminal and resumes that lineage's deepest
//! child. Election is a pure function ([`elect`]) so the skip/no-op rules
//! are testable; the switch itself runs entirely inside the PIT interrupt
//! with interrupts disabled, and ends by adopting the target's saved
//! kernel stack.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::x86::{context, gdt};
use crate::config::SHELL_CMD;
use crate::drivers::pic;
use crate::irq::IRQ_PIT;
use crate::mm::paging;
use crate::mm::VIDMAP_VADDR;
use crate::process::table;
use crate::syscall;
use crate::tty::{self, TERMINAL_COUNT};

/// Terminal whose lineage the CPU is currently executing.
static ACTIVE_TERMINAL: AtomicUsize = AtomicUsize::new(0);

/// The terminal currently scheduled on the CPU.
pub fn active_terminal() -> usize {
    ACTIVE_TERMINAL.load(Ordering::Acquire)
}

/// Advance the round-robin cursor past `cursor`, skipping terminals that
/// are not runnable. Returns `None` when nothing is runnable at all.
pub fn elect(cursor: usize, runnable: &[bool; TERMINAL_COUNT]) -> Option<usize> {
    for step in 1..=TERMINAL_COUNT {
        let candidate = (cursor + step) % TERMINAL_COUNT;
        if runnable[candidate] {
            return Some(candidate);
        }
    }
    None
}

/// One PIT tick. Entered with interrupts disabled (interrupt gate); every
/// path acknowledges the PIT exactly once.
pub fn tick() {
    let mut runnable = [false; TERMINAL_COUNT];
    let mut running = [false; TERMINAL_COUNT];
    let mut roots = [None; TERMINAL_COUNT];
    for term in 0..TERMINAL_COUNT {
        let (is_running, is_runnable, root) = tty::status(term);
        running[term] = is_running;
        runnable[term] = is_runnable;
        roots[term] = root;
    }

    let current = active_terminal();
    let next = match elect(current, &runnable) {
        Some(next) if next != current => next,
        _ => {
            pic::send_eoi(IRQ_PIT as u8);
            return;
        }
    };

    // Park the outgoing lineage: its resume point is this very frame.
    let (esp, ebp) = context::save();
    let _ = table::with_current(|pcb| {
        pcb.saved_ksp = esp;
        pcb.saved_kbp = ebp;
    });

    ACTIVE_TERMINAL.store(next, Ordering::Release);

    if !running[next] {
        // First visit: the terminal owes itself a root shell. Launched
        // from this stack frame; control returns here only when that
        // lineage is next preempted.
        pic::send_eoi(IRQ_PIT as u8);
        syscall::execute_command(SHELL_CMD, Some(next));
        return;
    }

    let Some(root) = roots[next] else {
        ACTIVE_TERMINAL.store(current, Ordering::Release);
        pic::send_eoi(IRQ_PIT as u8);
        return;
    };
    let target = table::deepest_child(root);

    let (saved_ksp, saved_kbp) = match table::with_pcb(target, |pcb| (pcb.saved_ksp, pcb.saved_kbp))
    {
        Ok(pair) if pair.0 != 0 => pair,
        // A running lineage always has a parked frame; if it does not
        // (PCB mid-teardown), stay on the current lineage this tick.
        _ => {
            ACTIVE_TERMINAL.store(current, Ordering::Release);
            pic::send_eoi(IRQ_PIT as u8);
            return;
        }
    };

    gdt::set_kernel_stack(table::kernel_stack_top(target));
    let _ = paging::activate(target);
    if tty::has_vidmap(next) {
        let _ = paging::map_vid_mem(target, VIDMAP_VADDR, tty::video_target_for(next));
    }
    table::set_current(Some(target));

    pic::send_eoi(IRQ_PIT as u8);
    // SAFETY: the pair was captured by `context::save` in this function on
    // the target's kernel stack during a previous tick, and that stack's
    // paging context was activated above.
    unsafe { context::resume(saved_ksp, saved_kbp) }
}
