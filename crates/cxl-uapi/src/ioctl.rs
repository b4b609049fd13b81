//! ioctl request numbers and payloads.
//!
//! Numbers follow the Linux `_IOC` encoding of the target architecture.
//! Most targets use 2 direction bits and 14 size bits; powerpc, mips and
//! sparc use 3 direction bits and 13 size bits with different direction
//! values. CAPI hardware lives on powerpc64, so both encodings matter.
//!
//! ```text
//!  31      29 28                16 15        8 7          0
//! ┌──────────┬────────────────────┬───────────┬────────────┐
//! │   dir    │        size        │   type    │     nr     │
//! └──────────┴────────────────────┴───────────┴────────────┘
//!  (generic: dir = bits 31..30, size = bits 29..16)
//! ```

use bytemuck::{Pod, Zeroable};

/// ioctl magic ("type") byte of the cxl driver.
pub const CXL_MAGIC: u8 = 0xCA;

#[cfg(any(
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "sparc",
    target_arch = "sparc64"
))]
mod encoding {
    pub const SIZE_BITS: u32 = 13;
    pub const WRITE: u32 = 4;
    pub const READ: u32 = 2;
}

#[cfg(not(any(
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "sparc",
    target_arch = "sparc64"
)))]
mod encoding {
    pub const SIZE_BITS: u32 = 14;
    pub const WRITE: u32 = 1;
    pub const READ: u32 = 2;
}

const NR_SHIFT: u32 = 0;
const TYPE_SHIFT: u32 = 8;
const SIZE_SHIFT: u32 = 16;
const DIR_SHIFT: u32 = SIZE_SHIFT + encoding::SIZE_BITS;

/// Direction bit for a request the kernel reads from userspace.
pub const IOC_WRITE: u32 = encoding::WRITE;
/// Direction bit for a request the kernel writes back to userspace.
pub const IOC_READ: u32 = encoding::READ;

/// `_IOC(dir, ty, nr, size)`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << DIR_SHIFT)
        | ((size as u32) << SIZE_SHIFT)
        | ((ty as u32) << TYPE_SHIFT)
        | ((nr as u32) << NR_SHIFT)
}

/// `_IOW(ty, nr, T)`.
#[must_use]
pub const fn iow(ty: u8, nr: u8, size: usize) -> u32 {
    ioc(IOC_WRITE, ty, nr, size)
}

/// `_IOR(ty, nr, T)`.
#[must_use]
pub const fn ior(ty: u8, nr: u8, size: usize) -> u32 {
    ioc(IOC_READ, ty, nr, size)
}

/// Attach a context to the AFU and start work.
pub const CXL_IOCTL_START_WORK: u32 =
    iow(CXL_MAGIC, 0x00, std::mem::size_of::<StartWork>());

/// Fetch the process element assigned to this context (`u32` out-parameter).
pub const CXL_IOCTL_GET_PROCESS_ELEMENT: u32 =
    ior(CXL_MAGIC, 0x01, std::mem::size_of::<u32>());

/// `StartWork::flags` bits telling the driver which optional fields are valid.
pub mod start_work_flags {
    /// `amr` carries an authority mask.
    pub const AMR: u64 = 0x0000_0000_0000_0001;
    /// `num_interrupts` carries a requested interrupt count.
    pub const NUM_IRQS: u64 = 0x0000_0000_0000_0002;
}

/// Payload of [`CXL_IOCTL_START_WORK`] (`struct cxl_ioctl_start_work`).
///
/// 64 bytes. Reserved fields must be zero.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct StartWork {
    /// Which optional fields are populated ([`start_work_flags`]).
    pub flags: u64,
    /// Work element descriptor handed to the AFU.
    pub work_element_descriptor: u64,
    /// Authority mask register value.
    pub amr: u64,
    /// Number of AFU interrupts to allocate.
    pub num_interrupts: i16,
    /// Thread id (unused here, zero).
    pub tid: u16,
    /// Reserved.
    pub reserved1: i32,
    /// Reserved.
    pub reserved2: u64,
    /// Reserved.
    pub reserved3: u64,
    /// Reserved.
    pub reserved4: u64,
    /// Reserved.
    pub reserved5: u64,
}

impl StartWork {
    /// Base request: only the work element descriptor is set.
    #[must_use]
    pub const fn new(work_element_descriptor: u64) -> Self {
        Self {
            flags: 0,
            work_element_descriptor,
            amr: 0,
            num_interrupts: 0,
            tid: 0,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
            reserved4: 0,
            reserved5: 0,
        }
    }

    /// Full request: interrupt count and authority mask, flagged so the
    /// driver honours both.
    #[must_use]
    pub const fn full(work_element_descriptor: u64, num_interrupts: i16, amr: u64) -> Self {
        let mut work = Self::new(work_element_descriptor);
        work.flags = start_work_flags::NUM_IRQS | start_work_flags::AMR;
        work.num_interrupts = num_interrupts;
        work.amr = amr;
        work
    }
}
