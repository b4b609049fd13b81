//! Event records delivered by `read(2)` on an AFU descriptor.
//!
//! A single read returns one or more records packed back to back. Each
//! record starts with an [`EventHeader`] whose `size` covers the whole
//! record, header included. Fields are in host byte order.
//!
//! ```text
//! offset  0        2        4                6        8
//!        ┌────────┬────────┬────────────────┬────────┐
//!        │  type  │  size  │ process_elem.  │  rsvd  │   header
//!        ├────────┴────────┴────────────────┴────────┤
//!      8 │ per-type payload (≤ 32 bytes)             │
//!        └───────────────────────────────────────────┘
//! ```

use bytemuck::{Pod, Zeroable};

/// Minimum buffer a read must offer; the kernel rejects smaller reads.
pub const READ_MIN_SIZE: usize = 0x1000;

/// Size of [`EventHeader`].
pub const HEADER_SIZE: usize = std::mem::size_of::<EventHeader>();

/// Largest record the kernel emits (`sizeof(struct cxl_event)`).
pub const MAX_EVENT_SIZE: usize = HEADER_SIZE + 32;

/// Event type codes (`EventHeader::ty`).
pub mod event_type {
    /// Reserved by the kernel; never delivered.
    pub const RESERVED: u16 = 0;
    /// The AFU raised an interrupt.
    pub const AFU_INTERRUPT: u16 = 1;
    /// Translation fault on an AFU memory access.
    pub const DATA_STORAGE: u16 = 2;
    /// The AFU reported an error.
    pub const AFU_ERROR: u16 = 3;
    /// Library-private marker written into an event when the read failed.
    pub const READ_FAIL: u16 = 0xFFFF;
}

/// Byte offsets of payload fields, from the start of the record.
pub mod offsets {
    /// `u16` interrupt number of an AFU interrupt.
    pub const IRQ: usize = 10;
    /// `u64` faulting address of a data-storage event.
    pub const FAULT_ADDR: usize = 16;
    /// `u64` DSISR of a data-storage event.
    pub const FAULT_DSISR: usize = 24;
    /// `u64` error word of an AFU error.
    pub const AFU_ERROR: usize = 16;
}

/// Fill pattern written over an event whose read failed.
pub const POISON: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Common record header (`struct cxl_event_header`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct EventHeader {
    /// Event type ([`event_type`]).
    pub ty: u16,
    /// Record size in bytes, header included.
    pub size: u16,
    /// Process element the event belongs to.
    pub process_element: u16,
    /// Reserved.
    pub reserved1: u16,
}
