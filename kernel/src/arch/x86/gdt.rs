//! Global descriptor table and task-state segment.
//!
//! Flat 4 GiB model: null, kernel code/data (DPL 0), user code/data
//! (DPL 3), and a single 32-bit TSS. The TSS exists only so the CPU knows
//! which kernel stack to switch to on a ring-3 -> ring-0 transition; the
//! scheduler and `execute` keep `esp0` pointed at the running process's
//! kernel stack.

use spin::Mutex;

/// Kernel code segment selector.
pub const KERNEL_CS: u16 = 0x08;
/// Kernel data segment selector.
pub const KERNEL_DS: u16 = 0x10;
/// User code segment selector (RPL 3).
pub const USER_CS: u16 = 0x1B;
/// User data segment selector (RPL 3).
pub const USER_DS: u16 = 0x23;
/// TSS selector.
pub const TSS_SEL: u16 = 0x28;

/// 32-bit task-state segment. Only `ss0`/`esp0` (and the I/O bitmap
/// offset) matter; the hardware task-switch fields are unused.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct TaskStateSegment {
    prev_task_link: u32,
    pub esp0: u32,
    pub ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt_selector: u32,
    /// Debug-trap flag (bit 0) and I/O-map base in the high word.
    iomap: u32,
}

impl TaskStateSegment {
    const fn new() -> Self {
        TaskStateSegment {
            prev_task_link: 0,
            esp0: 0,
            ss0: KERNEL_DS as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt_selector: 0,
            // No I/O bitmap: base past the segment limit.
            iomap: (core::mem::size_of::<TaskStateSegment>() as u32) << 16,
        }
    }
}

static TSS: Mutex<TaskStateSegment> = Mutex::new(TaskStateSegment::new());

static GDT: Mutex<[u64; 6]> = Mutex::new([0; 6]);

/// Pack a standard 8-byte segment descriptor.
fn descriptor(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    let mut desc: u64 = 0;
    desc |= (limit & 0x0000_FFFF) as u64;
    desc |= ((base & 0x00FF_FFFF) as u64) << 16;
    desc |= (access as u64) << 40;
    desc |= (((limit >> 16) & 0xF) as u64) << 48;
    desc |= ((flags & 0xF) as u64) << 52;
    desc |= ((base >> 24) as u64) << 56;
    desc
}

/// Build and load the GDT and TSS.
pub fn init() {
    let tss_base = { &*TSS.lock() as *const TaskStateSegment as u32 };
    let tss_limit = core::mem::size_of::<TaskStateSegment>() as u32 - 1;

    {
        let mut gdt = GDT.lock();
        gdt[0] = 0;
        // 4 KiB granularity, 32-bit, limit 0xFFFFF -> flat 4 GiB.
        gdt[1] = descriptor(0, 0xF_FFFF, 0x9A, 0xC); // kernel code
        gdt[2] = descriptor(0, 0xF_FFFF, 0x92, 0xC); // kernel data
        gdt[3] = descriptor(0, 0xF_FFFF, 0xFA, 0xC); // user code
        gdt[4] = descriptor(0, 0xF_FFFF, 0xF2, 0xC); // user data
        // Byte-granular available 32-bit TSS.
        gdt[5] = descriptor(tss_base, tss_limit, 0x89, 0x0);
    }

    load();
}

/// Point `esp0` at the top of the given kernel stack. Called by `execute`
/// and the scheduler before any return to ring 3.
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn load() {
    #[repr(C, packed)]
    struct DescriptorTablePointer {
        limit: u16,
        base: u32,
    }

    let gdtr = DescriptorTablePointer {
        limit: (core::mem::size_of::<[u64; 6]>() - 1) as u16,
        base: { GDT.lock().as_ptr() as u32 },
    };

    // SAFETY: the GDT lives in a static, so the base stays valid after the
    // guard drops. Selector constants match the table built above; the
    // far-return reloads CS and the moves reload the data segments, after
    // which ltr installs the TSS.
    unsafe {
        core::arch::asm!(
            "lgdt [{gdtr}]",
            "push {kcs}",
            "mov {tmp}, offset 2f",
            "push {tmp}",
            "retf",
            "2:",
            "mov ds, {kds:x}",
            "mov es, {kds:x}",
            "mov fs, {kds:x}",
            "mov gs, {kds:x}",
            "mov ss, {kds:x}",
            "ltr {tsel:x}",
            gdtr = in(reg) &gdtr as *const DescriptorTablePointer,
            kcs = in(reg) KERNEL_CS as u32,
            kds = in(reg) KERNEL_DS as u32,
            tsel = in(reg) TSS_SEL as u32,
            tmp = out(reg) _,
        );
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn load() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_packs_base_and_limit() {
        // Kernel code: flat, ring 0.
        let d = descriptor(0, 0xF_FFFF, 0x9A, 0xC);
        assert_eq!(d & 0xFFFF, 0xFFFF); // limit low
        assert_eq!((d >> 40) & 0xFF, 0x9A); // access
        assert_eq!((d >> 48) & 0xF, 0xF); // limit high
        assert_eq!((d >> 52) & 0xF, 0xC); // flags

        let d = descriptor(0x1234_5678, 0x67, 0x89, 0x0);
        assert_eq!((d >> 16) & 0xFF_FFFF, 0x34_5678); // base low+mid
        assert_eq!(d >> 56, 0x12); // base high
        assert_eq!(d & 0xFFFF, 0x67);
    }

    #[test]
    fn tss_iomap_base_is_past_the_limit() {
        let tss = TaskStateSegment::new();
        let iomap = tss.iomap;
        assert_eq!(iomap >> 16, core::mem::size_of::<TaskStateSegment>() as u32);
        assert_eq!(core::mem::size_of::<TaskStateSegment>(), 104);
    }
}
