//! PS/2 keyboard driver, scancode Set 1, no translation.
//!
//! Decoding is a pure state machine ([`KeyboardState::process`]) so the
//! modifier rules are testable without hardware; the interrupt glue reads
//! port 0x60, runs the machine, and applies the resulting [`KeyAction`] to
//! the displayed terminal's line discipline.

use lazy_static::lazy_static;
use spin::Mutex;

use crate::arch::x86::io::inb;
use crate::drivers::pic;
use crate::irq::{self, IrqNumber, IRQ_KEYBOARD};
use crate::tty;

const STATUS_PORT: u16 = 0x64;
const DATA_PORT: u16 = 0x60;

/// Status bit: output buffer has a byte for us.
const OUTBUF_FULL: u8 = 0x01;

// Set-1 make codes this driver treats specially.
const SC_LCTRL: u8 = 0x1D;
const SC_LSHIFT: u8 = 0x2A;
const SC_RSHIFT: u8 = 0x36;
const SC_LALT: u8 = 0x38;
const SC_CAPSLOCK: u8 = 0x3A;
const SC_BACKSPACE: u8 = 0x0E;
const SC_L: u8 = 0x26;
const SC_F1: u8 = 0x3B;
const SC_F2: u8 = 0x3C;
const SC_F3: u8 = 0x3D;

/// Highest make code tracked (F12).
const SC_MAX_MAKE: u8 = 0x58;
/// Break code = make code + 0x80.
const RELEASE_OFFSET: u8 = 0x80;
/// Escape byte announcing an extended (two-byte) scancode.
const SC_EXTENDED: u8 = 0xE0;

/// Base (unshifted) characters, indexed by make code. Zero means the key
/// produces no character on its own.
#[rustfmt::skip]
const BASE_KEYCODES: [u8; 0x3B] = [
    0, 0, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0',
    b'-', b'=', 0, b'\t',
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n',
    0, // left ctrl
    b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`',
    0, // left shift
    b'\\', b'z', b'x', b'c', b'v', b'b', b'n', b'm', b',', b'.', b'/',
    0, // right shift
    b'*',
    0, // left alt
    b' ',
    0, // caps lock
];

/// What one scancode amounts to, after modifier resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Nothing user-visible (modifier, break code, extended byte).
    None,
    /// A printable character or `\n` for the line discipline.
    Char(u8),
    /// Delete the last buffered character.
    Backspace,
    /// Ctrl+L: clear the screen, redraw the pending line.
    ClearScreen,
    /// F1..F3: bring the given terminal to the display.
    SwitchTerminal(usize),
}

/// Modifier and latch state for the Set-1 decode.
#[derive(Debug)]
pub struct KeyboardState {
    /// Per-make-code held state.
    key_state: [bool; SC_MAX_MAKE as usize + 1],
    /// CapsLock toggle value.
    caps_lock: bool,
    /// Suppresses CapsLock auto-repeat until its break code arrives.
    caps_latch: bool,
    /// One-shot: the previous byte was the E0 escape.
    multibyte: bool,
}

impl KeyboardState {
    pub const fn new() -> Self {
        KeyboardState {
            key_state: [false; SC_MAX_MAKE as usize + 1],
            caps_lock: false,
            caps_latch: false,
            multibyte: false,
        }
    }

    fn shift_held(&self) -> bool {
        self.key_state[SC_LSHIFT as usize] || self.key_state[SC_RSHIFT as usize]
    }

    fn ctrl_held(&self) -> bool {
        self.key_state[SC_LCTRL as usize]
    }

    /// Alt is tracked like the other modifiers but no chord uses it yet.
    pub fn alt_held(&self) -> bool {
        self.key_state[SC_LALT as usize]
    }

    /// Advance the state machine by one raw scancode.
    pub fn process(&mut self, scancode: u8) -> KeyAction {
        if scancode == SC_EXTENDED {
            self.multibyte = true;
            return KeyAction::None;
        }
        if self.multibyte {
            // Extended keys are consumed and ignored.
            self.multibyte = false;
            return KeyAction::None;
        }

        if scancode >= 1 && scancode <= SC_MAX_MAKE {
            return self.process_make(scancode);
        }

        if scancode > RELEASE_OFFSET && scancode <= RELEASE_OFFSET + SC_MAX_MAKE {
            let make = scancode - RELEASE_OFFSET;
            if make == SC_CAPSLOCK {
                self.caps_latch = false;
            } else {
                self.key_state[make as usize] = false;
            }
        }
        KeyAction::None
    }

    fn process_make(&mut self, scancode: u8) -> KeyAction {
        if scancode == SC_CAPSLOCK {
            // Toggle once per physical press; the latch eats auto-repeat.
            if !self.caps_latch {
                self.caps_lock = !self.caps_lock;
                self.caps_latch = true;
            }
            return KeyAction::None;
        }

        self.key_state[scancode as usize] = true;

        if self.ctrl_held() && scancode == SC_L {
            return KeyAction::ClearScreen;
        }
        match scancode {
            SC_F1 => return KeyAction::SwitchTerminal(0),
            SC_F2 => return KeyAction::SwitchTerminal(1),
            SC_F3 => return KeyAction::SwitchTerminal(2),
            SC_BACKSPACE => return KeyAction::Backspace,
            _ => {}
        }

        let base = BASE_KEYCODES
            .get(scancode as usize)
            .copied()
            .unwrap_or(0);
        if base == 0 {
            return KeyAction::None;
        }
        KeyAction::Char(self.resolve(base))
    }

    /// Apply shift and caps-lock to a base character.
    fn resolve(&self, base: u8) -> u8 {
        let shift = self.shift_held();
        let is_letter = base.is_ascii_lowercase();

        if shift || (self.caps_lock && is_letter) {
            // Shift+CapsLock on a letter cancel each other out.
            if is_letter && !(self.caps_lock && shift) {
                return base - (b'a' - b'A');
            }
            if !is_letter && shift {
                return shifted_symbol(base);
            }
        }
        base
    }
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self::new()
    }
}

/// US-QWERTY shift table for non-letter keys.
fn shifted_symbol(base: u8) -> u8 {
    match base {
        b'1' => b'!',
        b'2' => b'@',
        b'3' => b'#',
        b'4' => b'$',
        b'5' => b'%',
        b'6' => b'^',
        b'7' => b'&',
        b'8' => b'*',
        b'9' => b'(',
        b'0' => b')',
        b'`' => b'~',
        b'-' => b'_',
        b'=' => b'+',
        b';' => b':',
        b'\'' => b'"',
        b',' => b'<',
        b'.' => b'>',
        b'/' => b'?',
        b'[' => b'{',
        b']' => b'}',
        b'\\' => b'|',
        other => other,
    }
}

lazy_static! {
    static ref STATE: Mutex<KeyboardState> = Mutex::new(KeyboardState::new());
}

/// Register the interrupt handler and unmask the keyboard line.
pub fn init() {
    *STATE.lock() = KeyboardState::new();
    if irq::register_handler(IrqNumber::new(IRQ_KEYBOARD), irqh_keyboard).is_err() {
        log::error!("keyboard line already claimed");
    }
    pic::enable_irq(IRQ_KEYBOARD as u8);
}

/// Keyboard interrupt: drain one scancode and apply its action.
fn irqh_keyboard(_irq: IrqNumber) {
    // SAFETY: status/data reads on the PS/2 controller ports.
    let action = unsafe {
        if inb(STATUS_PORT) & OUTBUF_FULL != 0 {
            STATE.lock().process(inb(DATA_PORT))
        } else {
            KeyAction::None
        }
    };

    match action {
        KeyAction::None => pic::send_eoi(IRQ_KEYBOARD as u8),
        KeyAction::Char(c) => {
            pic::send_eoi(IRQ_KEYBOARD as u8);
            tty::input_char(c);
        }
        KeyAction::Backspace => {
            pic::send_eoi(IRQ_KEYBOARD as u8);
            tty::input_backspace();
        }
        KeyAction::ClearScreen => {
            pic::send_eoi(IRQ_KEYBOARD as u8);
            tty::input_clear_screen();
        }
        KeyAction::SwitchTerminal(n) => {
            // EOI first: the switch may launch a shell and not come back
            // here for a while.
            pic::send_eoi(IRQ_KEYBOARD as u8);
            tty::switch_terminal(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(state: &mut KeyboardState, sc: u8) -> KeyAction {
        state.process(sc)
    }

    fn release(state: &mut KeyboardState, sc: u8) -> KeyAction {
        state.process(sc + RELEASE_OFFSET)
    }

    #[test]
    fn plain_letters_and_digits() {
        let mut kb = KeyboardState::new();
        assert_eq!(press(&mut kb, 0x1E), KeyAction::Char(b'a'));
        assert_eq!(press(&mut kb, 0x02), KeyAction::Char(b'1'));
        assert_eq!(press(&mut kb, 0x39), KeyAction::Char(b' '));
        assert_eq!(press(&mut kb, 0x1C), KeyAction::Char(b'\n'));
    }

    #[test]
    fn shift_uppercases_letters_and_remaps_symbols() {
        let mut kb = KeyboardState::new();
        press(&mut kb, SC_LSHIFT);
        assert_eq!(press(&mut kb, 0x1E), KeyAction::Char(b'A'));
        assert_eq!(press(&mut kb, 0x02), KeyAction::Char(b'!'));
        assert_eq!(press(&mut kb, 0x0D), KeyAction::Char(b'+'));
        release(&mut kb, SC_LSHIFT);
        assert_eq!(press(&mut kb, 0x1E), KeyAction::Char(b'a'));
    }

    #[test]
    fn caps_lock_affects_letters_only() {
        let mut kb = KeyboardState::new();
        press(&mut kb, SC_CAPSLOCK);
        assert_eq!(press(&mut kb, 0x1E), KeyAction::Char(b'A'));
        assert_eq!(press(&mut kb, 0x02), KeyAction::Char(b'1'));
    }

    #[test]
    fn caps_lock_plus_shift_gives_lowercase() {
        let mut kb = KeyboardState::new();
        press(&mut kb, SC_CAPSLOCK);
        press(&mut kb, SC_RSHIFT);
        assert_eq!(press(&mut kb, 0x1E), KeyAction::Char(b'a'));
        // Shifted symbols still work with caps on.
        assert_eq!(press(&mut kb, 0x02), KeyAction::Char(b'!'));
    }

    #[test]
    fn caps_lock_auto_repeat_is_suppressed_until_release() {
        let mut kb = KeyboardState::new();
        press(&mut kb, SC_CAPSLOCK);
        press(&mut kb, SC_CAPSLOCK); // auto-repeat, must not toggle back
        assert_eq!(press(&mut kb, 0x1E), KeyAction::Char(b'A'));
        release(&mut kb, SC_CAPSLOCK);
        press(&mut kb, SC_CAPSLOCK);
        assert_eq!(press(&mut kb, 0x1E), KeyAction::Char(b'a'));
    }

    #[test]
    fn extended_scancodes_are_discarded() {
        let mut kb = KeyboardState::new();
        assert_eq!(press(&mut kb, SC_EXTENDED), KeyAction::None);
        // The byte after E0 is swallowed even if it looks like 'a'.
        assert_eq!(press(&mut kb, 0x1E), KeyAction::None);
        // And the one after that is decoded normally again.
        assert_eq!(press(&mut kb, 0x1E), KeyAction::Char(b'a'));
    }

    #[test]
    fn control_l_clears_instead_of_typing_l() {
        let mut kb = KeyboardState::new();
        press(&mut kb, SC_LCTRL);
        assert_eq!(press(&mut kb, SC_L), KeyAction::ClearScreen);
        release(&mut kb, SC_LCTRL);
        assert_eq!(press(&mut kb, SC_L), KeyAction::Char(b'l'));
    }

    #[test]
    fn function_keys_switch_terminals() {
        let mut kb = KeyboardState::new();
        assert_eq!(press(&mut kb, SC_F1), KeyAction::SwitchTerminal(0));
        assert_eq!(press(&mut kb, SC_F2), KeyAction::SwitchTerminal(1));
        assert_eq!(press(&mut kb, SC_F3), KeyAction::SwitchTerminal(2));
    }

    #[test]
    fn backspace_is_reported() {
        let mut kb = KeyboardState::new();
        assert_eq!(press(&mut kb, SC_BACKSPACE), KeyAction::Backspace);
    }

    #[test]
    fn alt_state_is_tracked() {
        let mut kb = KeyboardState::new();
        press(&mut kb, SC_LALT);
        assert!(kb.alt_held());
        release(&mut kb, SC_LALT);
        assert!(!kb.alt_held());
    }
}
