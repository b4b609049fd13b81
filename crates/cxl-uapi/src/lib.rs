//! Kernel contract for coherent accelerator (CAPI/CXL) devices.
//!
//! This crate has **no hardware access**. It is a pure model of the
//! interface the `cxl` kernel driver exposes to userspace: ioctl numbers and
//! payloads, the event record format, the sysfs/devfs directory conventions
//! and the MMIO endian flags.
//!
//! Every layout here is fixed by the kernel ABI and replicated bit-exact.
//! Nothing is reinterpreted.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`ioctl`] | `_IOC` encoding, `START_WORK` / `GET_PROCESS_ELEMENT`, start-work payload |
//! | [`event`] | Event header, type codes, per-type payload offsets, read size |
//! | [`sysfs`] | `/sys/class/cxl`, `/dev/cxl`, naming rules, attribute names |
//! | [`mmio`] | Register unit width, endian flag bits |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod event;
pub mod ioctl;
pub mod mmio;
pub mod sysfs;

/// Highest `api_version_compatible` this library speaks.
///
/// A kernel reporting a larger value may have changed request layouts.
pub const KERNEL_API_VERSION: i64 = 1;
