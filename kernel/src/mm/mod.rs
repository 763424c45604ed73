//! Memory management: the paging layer.

pub mod paging;

pub use paging::{
    ELF_LOAD_ADDR, PAGE_4M, PAGE_SIZE, USER_STACK_TOP, USER_VADDR_BASE, VIDMAP_VADDR,
};
