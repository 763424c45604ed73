//! Virtual terminals: three logical screens over one VGA buffer.
//!
//! Exactly one terminal is *displayed*; its bytes reach the hardware
//! framebuffer and the hardware cursor. The other two render into 4 KiB
//! shadow buffers that are swapped wholesale on an F-key switch. Each
//! terminal also owns the line discipline for its stdin and a virtual RTC
//! divider.
//!
//! Every entry point takes the single tty lock with interrupts disabled,
//! so the keyboard and RTC handlers and the syscall path see terminal
//! state either entirely before or entirely after any mutation.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::arch::x86::interrupts;
use crate::config::SHELL_PROMPT;
use crate::drivers::rtc::VirtualRtc;
use crate::drivers::vga::{self, ScreenBuffer, COLS, ROWS};
use crate::error::{KernelError, KernelResult};
use crate::mm::paging;
use crate::mm::VIDMAP_VADDR;
use crate::process::{table, Pid};

/// Number of virtual terminals.
pub const TERMINAL_COUNT: usize = 3;
/// Line discipline buffer size; a line holds at most 127 characters plus
/// the newline.
pub const LINE_BUFFER_SIZE: usize = 128;

/// One logical terminal.
pub struct Terminal {
    /// In-progress input line.
    line_buf: [u8; LINE_BUFFER_SIZE],
    line_len: usize,
    cursor_x: usize,
    cursor_y: usize,
    /// Root of this terminal's process lineage, once a shell runs.
    root_pid: Option<Pid>,
    /// A process is blocked in a line-buffered read on this terminal.
    read_pending: bool,
    /// Off-screen cell buffer, displayed terminal excepted (P3).
    shadow: ScreenBuffer,
    /// The lineage has been launched.
    running: bool,
    /// The scheduler may elect this terminal.
    runnable: bool,
    /// User code asked for a video-memory window.
    vidmap: bool,
    vrtc: VirtualRtc,
}

impl Terminal {
    fn new() -> Self {
        Terminal {
            line_buf: [0; LINE_BUFFER_SIZE],
            line_len: 0,
            cursor_x: 0,
            cursor_y: 0,
            root_pid: None,
            read_pending: false,
            shadow: ScreenBuffer::blank(),
            running: false,
            runnable: false,
            vidmap: false,
            vrtc: VirtualRtc::new(),
        }
    }

    fn clear_line_buf(&mut self) {
        self.line_buf = [0; LINE_BUFFER_SIZE];
        self.line_len = 0;
    }

    /// Index of the first newline in the pending line, if complete.
    fn newline_index(&self) -> Option<usize> {
        self.line_buf[..self.line_len].iter().position(|&b| b == b'\n')
    }
}

struct TtyState {
    terminals: [Terminal; TERMINAL_COUNT],
    displayed: usize,
}

lazy_static! {
    static ref TTY: Mutex<TtyState> = Mutex::new(TtyState {
        terminals: [Terminal::new(), Terminal::new(), Terminal::new()],
        displayed: 0,
    });
}

fn with_tty<R>(f: impl FnOnce(&mut TtyState) -> R) -> R {
    interrupts::without_interrupts(|| f(&mut TTY.lock()))
}

// ---------------------------------------------------------------------------
// Cell output
// ---------------------------------------------------------------------------

impl TtyState {
    /// Write one byte on terminal `term`, routing to the hardware buffer
    /// iff that terminal is displayed, its shadow otherwise.
    fn put_byte(&mut self, term: usize, byte: u8) {
        // No tab stops; a tab is one space.
        let byte = if byte == b'\t' { b' ' } else { byte };
        let on_display = term == self.displayed;
        let t = &mut self.terminals[term];
        match byte {
            b'\n' => {
                t.cursor_x = 0;
                t.cursor_y += 1;
            }
            0x08 => {
                // Backspace: retreat one cell and blank it.
                if t.cursor_x > 0 {
                    t.cursor_x -= 1;
                } else if t.cursor_y > 0 {
                    t.cursor_y -= 1;
                    t.cursor_x = COLS - 1;
                }
                let (x, y) = (t.cursor_x, t.cursor_y);
                Self::put_cell(t, on_display, x, y, vga::cell(b' '));
            }
            _ => {
                let (x, y) = (t.cursor_x, t.cursor_y);
                Self::put_cell(t, on_display, x, y, vga::cell(byte));
                t.cursor_x += 1;
                if t.cursor_x >= COLS {
                    t.cursor_x = 0;
                    t.cursor_y += 1;
                }
            }
        }

        if t.cursor_y >= ROWS {
            t.cursor_y = ROWS - 1;
            if on_display {
                // SAFETY: the tty lock is held with interrupts disabled.
                unsafe { vga::phys_scroll_up() };
            } else {
                t.shadow.scroll_up();
            }
        }
    }

    fn put_cell(t: &mut Terminal, on_display: bool, x: usize, y: usize, value: u16) {
        if on_display {
            // SAFETY: the tty lock is held with interrupts disabled.
            unsafe { vga::phys_put(x, y, value) };
        } else {
            t.shadow.put(x, y, value);
        }
    }

    fn write_bytes(&mut self, term: usize, bytes: &[u8]) {
        for &b in bytes {
            self.put_byte(term, b);
        }
        self.sync_cursor(term);
    }

    /// Push the terminal's cursor to the CRTC if it owns the display.
    fn sync_cursor(&self, term: usize) {
        if term == self.displayed {
            let t = &self.terminals[term];
            vga::move_hw_cursor(t.cursor_x, t.cursor_y);
        }
    }

    fn clear_screen(&mut self, term: usize) {
        let on_display = term == self.displayed;
        let t = &mut self.terminals[term];
        t.cursor_x = 0;
        t.cursor_y = 0;
        if on_display {
            // SAFETY: the tty lock is held with interrupts disabled.
            unsafe { vga::phys_clear() };
        } else {
            t.shadow.clear();
        }
        self.sync_cursor(term);
    }
}

/// Write `bytes` on terminal `term`. Returns the number written.
pub fn write_bytes(term: usize, bytes: &[u8]) -> KernelResult<usize> {
    if term >= TERMINAL_COUNT {
        return Err(KernelError::InvalidArgument { name: "terminal" });
    }
    with_tty(|tty| tty.write_bytes(term, bytes));
    Ok(bytes.len())
}

/// Blank terminal `term` and home its cursor.
pub fn clear(term: usize) {
    if term < TERMINAL_COUNT {
        with_tty(|tty| tty.clear_screen(term));
    }
}

// ---------------------------------------------------------------------------
// Kernel console (print! backend)
// ---------------------------------------------------------------------------

struct DisplayWriter;

impl fmt::Write for DisplayWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        with_tty(|tty| {
            let term = tty.displayed;
            tty.write_bytes(term, s.as_bytes());
        });
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;
    let _ = DisplayWriter.write_fmt(args);
}

/// Formatting adaptor bound to one terminal, for kernel messages that
/// must reach a specific screen (exception reports).
pub struct TermWriter(pub usize);

impl fmt::Write for TermWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let _ = write_bytes(self.0, s.as_bytes());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Line discipline
// ---------------------------------------------------------------------------

/// Keyboard input: a decoded character for the displayed terminal.
///
/// A printable byte is echoed and buffered only if the line has room for
/// it plus a newline; the newline itself always fits.
pub fn input_char(byte: u8) {
    with_tty(|tty| {
        let term = tty.displayed;
        let t = &mut tty.terminals[term];
        let fits = if byte == b'\n' {
            t.line_len < LINE_BUFFER_SIZE
        } else {
            t.line_len < LINE_BUFFER_SIZE - 1
        };
        if !fits {
            return;
        }
        let len = t.line_len;
        t.line_buf[len] = byte;
        t.line_len += 1;
        tty.put_byte(term, byte);
        tty.sync_cursor(term);
    });
}

/// Keyboard input: delete the last buffered character, if any.
pub fn input_backspace() {
    with_tty(|tty| {
        let term = tty.displayed;
        let t = &mut tty.terminals[term];
        if t.line_len == 0 {
            return;
        }
        t.line_len -= 1;
        let len = t.line_len;
        t.line_buf[len] = 0;
        tty.put_byte(term, 0x08);
        tty.sync_cursor(term);
    });
}

/// Ctrl+L: clear the displayed screen; when a read is pending, re-draw
/// the prompt and the in-progress line.
pub fn input_clear_screen() {
    with_tty(|tty| {
        let term = tty.displayed;
        tty.clear_screen(term);
        let t = &tty.terminals[term];
        if t.read_pending {
            let mut pending = [0u8; LINE_BUFFER_SIZE];
            let len = t.line_len;
            pending[..len].copy_from_slice(&t.line_buf[..len]);
            tty.write_bytes(term, SHELL_PROMPT);
            tty.write_bytes(term, &pending[..len]);
        }
    });
}

/// Blocking line read for terminal `term`.
///
/// Spins until the discipline has buffered a newline, then consumes
/// through (and including) it, copying at most `buf.len()` bytes and
/// zero-padding the rest. The line buffer is cleared afterwards.
pub fn read_line(term: usize, buf: &mut [u8]) -> KernelResult<usize> {
    if term >= TERMINAL_COUNT {
        return Err(KernelError::InvalidArgument { name: "terminal" });
    }
    if buf.is_empty() {
        return Err(KernelError::InvalidArgument { name: "buffer" });
    }

    with_tty(|tty| tty.terminals[term].read_pending = true);

    loop {
        let done = with_tty(|tty| {
            let t = &mut tty.terminals[term];
            let nl = t.newline_index()?;
            let copied = (nl + 1).min(buf.len());
            buf[..copied].copy_from_slice(&t.line_buf[..copied]);
            for b in buf[copied..].iter_mut() {
                *b = 0;
            }
            t.clear_line_buf();
            t.read_pending = false;
            Some(copied)
        });
        if let Some(copied) = done {
            return Ok(copied);
        }
        // The scheduler interleaves the other terminals while we poll.
        core::hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// Virtual RTC plumbing
// ---------------------------------------------------------------------------

/// Hardware RTC tick: advance every terminal's divider.
pub fn rtc_tick_all() {
    with_tty(|tty| {
        for t in tty.terminals.iter_mut() {
            t.vrtc.tick();
        }
    });
}

/// `open("rtc")`: reset the calling terminal to the default frequency.
pub fn rtc_reset(term: usize) {
    with_tty(|tty| {
        tty.terminals[term].vrtc = VirtualRtc::new();
    });
}

/// `write` on an RTC descriptor: install a validated frequency.
pub fn rtc_set_freq(term: usize, freq: u32) -> KernelResult<()> {
    with_tty(|tty| tty.terminals[term].vrtc.set_virtual_freq(freq))
}

/// `read` on an RTC descriptor: block for one virtual period.
pub fn rtc_wait(term: usize) -> KernelResult<()> {
    if term >= TERMINAL_COUNT {
        return Err(KernelError::InvalidArgument { name: "terminal" });
    }
    with_tty(|tty| tty.terminals[term].vrtc.begin_wait());
    loop {
        if with_tty(|tty| tty.terminals[term].vrtc.wait_done()) {
            return Ok(());
        }
        core::hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// Multiplexer
// ---------------------------------------------------------------------------

/// The terminal whose bytes currently reach the hardware.
pub fn displayed() -> usize {
    with_tty(|tty| tty.displayed)
}

/// Scheduler-facing status snapshot: (running, runnable, root_pid).
pub fn status(term: usize) -> (bool, bool, Option<Pid>) {
    with_tty(|tty| {
        let t = &tty.terminals[term];
        (t.running, t.runnable, t.root_pid)
    })
}

/// Record that `root_pid`'s shell now owns terminal `term`.
pub fn mark_running(term: usize, root_pid: Pid) {
    with_tty(|tty| {
        let t = &mut tty.terminals[term];
        t.running = true;
        t.runnable = true;
        t.root_pid = Some(root_pid);
    });
}

/// Record that user code on `term` holds a vidmap window.
pub fn set_vidmap(term: usize, enabled: bool) {
    with_tty(|tty| tty.terminals[term].vidmap = enabled);
}

/// Whether `term`'s lineage asked for a vidmap window.
pub fn has_vidmap(term: usize) -> bool {
    with_tty(|tty| tty.terminals[term].vidmap)
}

/// The frame a process on `term` should see through a video window:
/// the real framebuffer when displayed, the shadow otherwise.
pub fn video_target_for(term: usize) -> u32 {
    with_tty(|tty| {
        if term == tty.displayed {
            vga::VIDEO_PHYS_ADDR
        } else {
            &tty.terminals[term].shadow as *const ScreenBuffer as u32
        }
    })
}

/// Bring terminal `to` onto the display.
///
/// The whole protocol runs with interrupts disabled: save the outgoing
/// cursor and framebuffer, restore the incoming pair, re-point any vidmap
/// windows, mark the target runnable, and flip the displayed index.
pub fn switch_terminal(to: usize) {
    if to >= TERMINAL_COUNT {
        return;
    }

    let remap = with_tty(|tty| {
        let from = tty.displayed;
        if from == to {
            return None;
        }

        // SAFETY: tty lock held, interrupts disabled: nothing else can
        // touch the framebuffer during the swap.
        unsafe {
            vga::phys_save(&mut tty.terminals[from].shadow);
            vga::phys_restore(&tty.terminals[to].shadow);
        }
        tty.displayed = to;
        tty.terminals[to].runnable = true;
        let t = &tty.terminals[to];
        vga::move_hw_cursor(t.cursor_x, t.cursor_y);

        let from_shadow = &tty.terminals[from].shadow as *const ScreenBuffer as u32;
        let from_vidmap = tty.terminals[from].vidmap;
        let to_vidmap = tty.terminals[to].vidmap;
        let from_root = tty.terminals[from].root_pid;
        let to_root = tty.terminals[to].root_pid;
        Some((from_shadow, from_vidmap, to_vidmap, from_root, to_root))
    });

    // Re-point user video windows outside the tty lock; the paging layer
    // takes its own lock.
    if let Some((from_shadow, from_vidmap, to_vidmap, from_root, to_root)) = remap {
        if from_vidmap {
            if let Some(root) = from_root {
                let pid = table::deepest_child(root);
                let _ = paging::map_vid_mem(pid, VIDMAP_VADDR, from_shadow);
            }
        }
        if to_vidmap {
            if let Some(root) = to_root {
                let pid = table::deepest_child(root);
                let _ = paging::map_vid_mem(pid, VIDMAP_VADDR, vga::VIDEO_PHYS_ADDR);
            }
        }
    }
}

/// The terminal owning the currently executing process, falling back to
/// the displayed terminal during early boot.
pub fn current_process_terminal() -> usize {
    table::with_current(|pcb| pcb.terminal).unwrap_or_else(|_| displayed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::Mutex as TestMutex;

    // The tty state and the host framebuffer are global; serialize.
    static LOCK: TestMutex<()> = TestMutex::new(());

    fn reset() {
        with_tty(|tty| {
            for term in 0..TERMINAL_COUNT {
                tty.terminals[term] = Terminal::new();
            }
            tty.displayed = 0;
        });
        // SAFETY: tests run with the local lock held.
        unsafe { vga::phys_clear() };
    }

    fn phys_row(y: usize, len: usize) -> std::vec::Vec<u8> {
        (0..len)
            // SAFETY: coordinates in range.
            .map(|x| unsafe { (vga::phys_get(x, y) & 0xFF) as u8 })
            .collect()
    }

    #[test]
    fn displayed_writes_land_in_the_framebuffer() {
        let _guard = LOCK.lock();
        reset();
        write_bytes(0, b"391OS> ").unwrap();
        assert_eq!(phys_row(0, 7), b"391OS> ");
        with_tty(|tty| {
            assert_eq!(tty.terminals[0].cursor_x, 7);
            assert_eq!(tty.terminals[0].cursor_y, 0);
        });
    }

    #[test]
    fn background_writes_go_to_the_shadow() {
        let _guard = LOCK.lock();
        reset();
        write_bytes(1, b"hidden").unwrap();
        // Physical buffer untouched.
        assert_eq!(phys_row(0, 6), b"      ");
        with_tty(|tty| {
            assert_eq!(tty.terminals[1].shadow.char_at(0, 0), b'h');
            assert_eq!(tty.terminals[1].shadow.char_at(5, 0), b'n');
        });
    }

    #[test]
    fn newline_tab_and_backspace_controls() {
        let _guard = LOCK.lock();
        reset();
        write_bytes(0, b"ab\ncd").unwrap();
        assert_eq!(phys_row(0, 2), b"ab");
        assert_eq!(phys_row(1, 2), b"cd");

        write_bytes(0, b"\x08").unwrap();
        assert_eq!(phys_row(1, 2), b"c ");
        with_tty(|tty| assert_eq!(tty.terminals[0].cursor_x, 1));

        write_bytes(0, b"\t").unwrap();
        with_tty(|tty| assert_eq!(tty.terminals[0].cursor_x, 2));
    }

    #[test]
    fn bottom_line_writes_scroll_the_screen() {
        let _guard = LOCK.lock();
        reset();
        for i in 0..ROWS {
            let line = [b'0' + (i % 10) as u8, b'\n'];
            write_bytes(0, &line).unwrap();
        }
        // Row 0 scrolled away once.
        assert_eq!(phys_row(0, 1), b"1");
        with_tty(|tty| assert_eq!(tty.terminals[0].cursor_y, ROWS - 1));
    }

    #[test]
    fn switch_round_trip_preserves_cells_and_cursor() {
        let _guard = LOCK.lock();
        reset();
        write_bytes(0, b"terminal zero").unwrap();
        let cursor_before = with_tty(|tty| (tty.terminals[0].cursor_x, tty.terminals[0].cursor_y));

        switch_terminal(1);
        assert_eq!(displayed(), 1);
        // T1's blank shadow now owns the display.
        assert_eq!(phys_row(0, 8), b"        ");
        write_bytes(1, b"terminal one").unwrap();

        switch_terminal(0);
        assert_eq!(displayed(), 0);
        assert_eq!(phys_row(0, 13), b"terminal zero");
        let cursor_after = with_tty(|tty| (tty.terminals[0].cursor_x, tty.terminals[0].cursor_y));
        assert_eq!(cursor_before, cursor_after);
        // T1 kept its own output in its shadow.
        with_tty(|tty| assert_eq!(tty.terminals[1].shadow.char_at(0, 0), b't'));
    }

    #[test]
    fn switching_marks_the_target_runnable() {
        let _guard = LOCK.lock();
        reset();
        assert_eq!(status(2), (false, false, None));
        switch_terminal(2);
        let (_, runnable, _) = status(2);
        assert!(runnable);
        switch_terminal(0);
    }

    #[test]
    fn line_discipline_buffers_echoes_and_bounds() {
        let _guard = LOCK.lock();
        reset();
        input_char(b'h');
        input_char(b'i');
        with_tty(|tty| {
            assert_eq!(&tty.terminals[0].line_buf[..2], b"hi");
            assert_eq!(tty.terminals[0].line_len, 2);
        });
        assert_eq!(phys_row(0, 2), b"hi");

        input_backspace();
        with_tty(|tty| {
            assert_eq!(tty.terminals[0].line_len, 1);
            assert_eq!(tty.terminals[0].line_buf[1], 0);
        });
        assert_eq!(phys_row(0, 2), b"h ");
    }

    #[test]
    fn printable_keys_stop_at_127_but_newline_fits() {
        let _guard = LOCK.lock();
        reset();
        for _ in 0..200 {
            input_char(b'x');
        }
        with_tty(|tty| assert_eq!(tty.terminals[0].line_len, LINE_BUFFER_SIZE - 1));
        input_char(b'\n');
        with_tty(|tty| {
            assert_eq!(tty.terminals[0].line_len, LINE_BUFFER_SIZE);
            assert_eq!(tty.terminals[0].line_buf[LINE_BUFFER_SIZE - 1], b'\n');
        });
    }

    #[test]
    fn read_line_consumes_through_the_newline() {
        let _guard = LOCK.lock();
        reset();
        for &b in b"ls -l\n" {
            input_char(b);
        }
        let mut buf = [0xFFu8; 32];
        let n = read_line(0, &mut buf).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf[..6], b"ls -l\n");
        // Zero padding past the line.
        assert!(buf[6..].iter().all(|&b| b == 0));
        // Buffer cleared and contents past the index zeroed.
        with_tty(|tty| {
            assert_eq!(tty.terminals[0].line_len, 0);
            assert!(tty.terminals[0].line_buf.iter().all(|&b| b == 0));
        });
    }

    #[test]
    fn short_reads_truncate_at_the_caller_buffer() {
        let _guard = LOCK.lock();
        reset();
        for &b in b"abcdef\n" {
            input_char(b);
        }
        let mut buf = [0u8; 3];
        let n = read_line(0, &mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn ctrl_l_redraws_the_prompt_during_a_pending_read() {
        let _guard = LOCK.lock();
        reset();
        for &b in b"cat f" {
            input_char(b);
        }
        with_tty(|tty| tty.terminals[0].read_pending = true);
        input_clear_screen();
        assert_eq!(phys_row(0, 12), b"391OS> cat f");
        with_tty(|tty| tty.terminals[0].read_pending = false);
    }

    #[test]
    fn rtc_dividers_are_per_terminal() {
        let _guard = LOCK.lock();
        reset();
        rtc_reset(0);
        rtc_reset(1);
        rtc_set_freq(1, 1024).unwrap();
        with_tty(|tty| {
            tty.terminals[0].vrtc.begin_wait();
            tty.terminals[1].vrtc.begin_wait();
        });
        rtc_tick_all();
        with_tty(|tty| {
            // 2 Hz divider needs 512 ticks; 1024 Hz is satisfied at once.
            assert!(!tty.terminals[0].vrtc.wait_done());
            assert!(tty.terminals[1].vrtc.wait_done());
        });
        assert!(rtc_set_freq(0, 391).is_err());
    }
}
