//! Userspace access to CAPI accelerator function units (AFUs) through the
//! Linux `cxl` driver.
//!
//! The kernel exposes each adapter and AFU under `/sys/class/cxl` and each
//! AFU view as a character device under `/dev/cxl`. This crate enumerates
//! them, opens and attaches contexts, delivers AFU events and performs
//! ordered MMIO register access.
//!
//! # Lifecycle
//!
//! ```text
//!   AdapterCursor ─▶ Adapter ─▶ AfuCursor ─▶ Afu ─open(view)─┐
//!                                                              ▼
//!   AfuHandle::open(path) / from_fd(fd) ───────────────────▶ AfuHandle
//!                                                              │ attach(wed)
//!                                                              │ map(flags)
//!                                                              ▼
//!                                        read64/write64 · read_event · close
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use cxl_driver::{AllAfus, Endianness, View};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! for afu in AllAfus::open()? {
//!     let afu = afu?;
//!     let mut handle = afu.open(View::Dedicated)?;
//!     handle.attach(0)?;
//!     handle.map_with(Endianness::Big)?;
//!     println!("{} status: {:#x}", afu.name(), handle.read64(0)?);
//!     handle.close()?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Directory locations can be relocated with `CXL_SYSFS_CLASS`,
//! `CXL_DEV_DIR` and `CXL_SYSFS_DEV_CHAR` (see [`SysfsLayout`]).

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod attributes;
mod device;
mod enumerate;
mod error;
pub mod events;
mod handle;
mod layout;
mod mmio;

#[cfg(test)]
mod testing;

/// Kernel contract constants (re-exported from cxl-uapi).
pub mod uapi {
    pub use cxl_uapi::event::event_type;
    pub use cxl_uapi::mmio::flags as mmio_flags;
    pub use cxl_uapi::KERNEL_API_VERSION;
}

pub use attributes::{AdapterAttributes, AfuAttributes, AfuMode, ImageLoaded};
pub use device::{AfuDevice, DeviceNode};
pub use enumerate::{adapters, afus, Adapter, AdapterCursor, Afu, AfuCursor, AllAfus};
pub use error::{CxlError, Result};
pub use events::{Event, EventChannel, ExpectOutcome, RawEvent};
pub use handle::{AfuHandle, AfuPaths, AttachOptions, View};
pub use layout::SysfsLayout;
pub use mmio::Endianness;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        AdapterCursor, AfuHandle, AllAfus, AttachOptions, CxlError, Endianness, Event,
        ExpectOutcome, RawEvent, Result, SysfsLayout, View,
    };
}
