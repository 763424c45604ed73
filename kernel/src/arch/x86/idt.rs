//! Interrupt descriptor table and low-level entry stubs.
//!
//! Every vector funnels through one assembly path that builds a
//! [`TrapFrame`], switches to kernel data segments, and calls
//! [`trap_entry`]. Exceptions in user mode kill the offending process;
//! exceptions in kernel mode are unrecoverable. Hardware interrupts are
//! forwarded to the [`crate::irq`] dispatch table. Vector 0x80 has its own
//! stub with the syscall register convention.

use spin::Mutex;

use super::gdt::KERNEL_CS;

/// Number of exception + IRQ stubs generated in assembly.
const STUB_COUNT: usize = 48;

/// First vector the PIC delivers (see [`crate::drivers::pic`]).
pub const IRQ_BASE: u8 = 0x20;

/// Software interrupt vector for system calls.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// One 8-byte IDT gate.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct GateDescriptor {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl GateDescriptor {
    const fn missing() -> Self {
        GateDescriptor {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, selector: u16, type_attr: u8) -> Self {
        GateDescriptor {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: (handler >> 16) as u16,
        }
    }
}

/// 32-bit interrupt gate, DPL 0 (clears IF on entry).
const GATE_INTERRUPT: u8 = 0x8E;
/// 32-bit trap gate, DPL 3 (leaves IF alone; reachable from ring 3).
const GATE_TRAP_USER: u8 = 0xEF;

static IDT: Mutex<[GateDescriptor; 256]> = Mutex::new([GateDescriptor::missing(); 256]);

/// Registers as saved by the common stub, lowest address first.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TrapFrame {
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    // user esp/ss follow iff the interrupt crossed from ring 3
}

/// Exception mnemonics for vectors 0..20, printed in fault diagnostics.
pub const EXCEPTION_NAMES: [&str; 20] = [
    "Divide Error",
    "Debug",
    "Non-Maskable Interrupt",
    "Breakpoint",
    "Overflow",
    "BOUND Range Exceeded",
    "Invalid Opcode",
    "Device Not Available",
    "Double Fault",
    "Coprocessor Segment Overrun",
    "Invalid TSS",
    "Segment Not Present",
    "Stack-Segment Fault",
    "General Protection Fault",
    "Page Fault",
    "Reserved",
    "x87 Floating-Point Error",
    "Alignment Check",
    "Machine Check",
    "SIMD Floating-Point Error",
];

/// Build and load the IDT.
pub fn init() {
    install_gates();
    load();
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn install_gates() {
    extern "C" {
        static isr_stub_table: [u32; STUB_COUNT];
        fn syscall_stub();
    }

    let mut idt = IDT.lock();
    for vector in 0..STUB_COUNT {
        // SAFETY: the table is emitted by the global_asm! block below and
        // holds exactly STUB_COUNT stub addresses.
        let handler = unsafe { isr_stub_table[vector] };
        idt[vector] = GateDescriptor::new(handler, KERNEL_CS, GATE_INTERRUPT);
    }
    idt[SYSCALL_VECTOR as usize] =
        GateDescriptor::new(syscall_stub as u32, KERNEL_CS, GATE_TRAP_USER);
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn install_gates() {}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn load() {
    #[repr(C, packed)]
    struct DescriptorTablePointer {
        limit: u16,
        base: u32,
    }

    let idtr = DescriptorTablePointer {
        limit: (core::mem::size_of::<[GateDescriptor; 256]>() - 1) as u16,
        base: { IDT.lock().as_ptr() as u32 },
    };

    // SAFETY: the IDT is a static, so the base written into IDTR outlives
    // the guard. All present gates point at the assembly stubs below.
    unsafe {
        core::arch::asm!("lidt [{}]", in(reg) &idtr as *const DescriptorTablePointer);
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn load() {}

/// Common Rust-side entry for exceptions and hardware interrupts.
#[no_mangle]
extern "C" fn trap_entry(frame: &mut TrapFrame) {
    let vector = frame.vector;
    if vector < 32 {
        handle_exception(frame);
    } else if vector < 48 {
        crate::irq::dispatch(crate::irq::IrqNumber::new(vector - 32));
    } else {
        log::warn!("spurious vector {}", vector);
    }
}

fn handle_exception(frame: &TrapFrame) {
    let name = EXCEPTION_NAMES
        .get(frame.vector as usize)
        .copied()
        .unwrap_or("Reserved");

    if frame.cs & 3 == 3 {
        // Fault in ring 3: fatal to the process only. Never returns.
        crate::syscall::kill_current_on_exception(name, frame.eip, frame.eflags, frame.error_code);
    }

    panic!(
        "{} in kernel mode: eip={:#010x} eflags={:#010x} err={:#x}",
        name, frame.eip, frame.eflags, frame.error_code
    );
}

/// Register-convention glue for `int 0x80`: number in EAX, arguments in
/// EBX/ECX/EDX, result back in EAX.
#[no_mangle]
extern "C" fn syscall_entry(number: u32, arg1: u32, arg2: u32, arg3: u32) -> i32 {
    crate::syscall::dispatch(number as usize, arg1 as usize, arg2 as usize, arg3 as usize) as i32
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
core::arch::global_asm!(
    r#"
.macro isr_noerr vec
    .global isr_\vec
isr_\vec:
    push 0
    push \vec
    jmp isr_common
.endm

.macro isr_err vec
    .global isr_\vec
isr_\vec:
    push \vec
    jmp isr_common
.endm

    isr_noerr 0
    isr_noerr 1
    isr_noerr 2
    isr_noerr 3
    isr_noerr 4
    isr_noerr 5
    isr_noerr 6
    isr_noerr 7
    isr_err   8
    isr_noerr 9
    isr_err   10
    isr_err   11
    isr_err   12
    isr_err   13
    isr_err   14
    isr_noerr 15
    isr_noerr 16
    isr_err   17
    isr_noerr 18
    isr_noerr 19
    isr_noerr 20
    isr_noerr 21
    isr_noerr 22
    isr_noerr 23
    isr_noerr 24
    isr_noerr 25
    isr_noerr 26
    isr_noerr 27
    isr_noerr 28
    isr_noerr 29
    isr_noerr 30
    isr_noerr 31
    isr_noerr 32
    isr_noerr 33
    isr_noerr 34
    isr_noerr 35
    isr_noerr 36
    isr_noerr 37
    isr_noerr 38
    isr_noerr 39
    isr_noerr 40
    isr_noerr 41
    isr_noerr 42
    isr_noerr 43
    isr_noerr 44
    isr_noerr 45
    isr_noerr 46
    isr_noerr 47

isr_common:
    pushad
    push ds
    push es
    mov eax, 0x10
    mov ds, ax
    mov es, ax
    push esp
    call trap_entry
    add esp, 4
    pop es
    pop ds
    popad
    add esp, 8
    iretd

    .global syscall_stub
syscall_stub:
    push ds
    push es
    push edi
    push esi
    push edx
    push ecx
    push ebx
    push eax
    mov eax, 0x10
    mov ds, ax
    mov es, ax
    call syscall_entry
    add esp, 16
    pop esi
    pop edi
    pop es
    pop ds
    iretd

    .section .rodata
    .global isr_stub_table
isr_stub_table:
    .long isr_0,  isr_1,  isr_2,  isr_3,  isr_4,  isr_5,  isr_6,  isr_7
    .long isr_8,  isr_9,  isr_10, isr_11, isr_12, isr_13, isr_14, isr_15
    .long isr_16, isr_17, isr_18, isr_19, isr_20, isr_21, isr_22, isr_23
    .long isr_24, isr_25, isr_26, isr_27, isr_28, isr_29, isr_30, isr_31
    .long isr_32, isr_33, isr_34, isr_35, isr_36, isr_37, isr_38, isr_39
    .long isr_40, isr_41, isr_42, isr_43, isr_44, isr_45, isr_46, isr_47
    .text
"#
);
