//! Control requests against an open AFU descriptor
//!
//! [`AfuDevice`] is the seam between handle bookkeeping and the kernel.
//! [`DeviceNode`] is the real implementation: capability and MMIO size come
//! from sysfs attributes under the descriptor's `/sys/dev/char` mirror, the
//! process element and work start are ioctls.
//!
//! ioctls go through `libc`: the two requests take a struct pointer and a
//! `u32` out-pointer respectively, and the request numbers depend on the
//! target's `_IOC` encoding (see `cxl_uapi::ioctl`).

use crate::attributes::AfuAttributes;
use crate::error::{CxlError, Result};
use cxl_uapi::ioctl::{StartWork, CXL_IOCTL_GET_PROCESS_ELEMENT, CXL_IOCTL_START_WORK};
use std::fmt::Debug;
use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::Path;

/// Kernel-facing operations on one AFU descriptor
pub trait AfuDevice: AsFd + Debug {
    /// `api_version_compatible` of the driver serving this descriptor
    ///
    /// # Errors
    ///
    /// Returns an error if the capability record cannot be read.
    fn api_version_compatible(&self) -> Result<i64>;

    /// Authoritative size of the problem-state MMIO area in bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be queried.
    fn mmio_size(&self) -> Result<usize>;

    /// Ask the kernel for this context's process element
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails (e.g. not attached yet).
    fn process_element(&self) -> Result<u32>;

    /// Issue a start-work request
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the request.
    fn start_work(&self, work: &StartWork) -> Result<()>;

    /// Read raw event bytes, exactly like `read(2)`
    ///
    /// # Errors
    ///
    /// Returns the OS error of the read.
    fn read_events(&self, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// An opened `/dev/cxl/afu*` character device
#[derive(Debug)]
pub struct DeviceNode {
    file: File,
    attrs: AfuAttributes,
}

impl DeviceNode {
    /// Wrap an open descriptor whose attributes live under `sysfs_path`
    pub(crate) fn new(file: File, sysfs_path: &Path) -> Self {
        Self {
            file,
            attrs: AfuAttributes::new(sysfs_path),
        }
    }

    /// Sysfs attributes of this device
    pub const fn attributes(&self) -> &AfuAttributes {
        &self.attrs
    }
}

impl AsFd for DeviceNode {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AfuDevice for DeviceNode {
    fn api_version_compatible(&self) -> Result<i64> {
        self.attrs.api_version_compatible()
    }

    fn mmio_size(&self) -> Result<usize> {
        self.attrs.mmio_size()
    }

    fn process_element(&self) -> Result<u32> {
        let mut process_element: u32 = 0;

        // SAFETY: CXL_IOCTL_GET_PROCESS_ELEMENT is _IOR(.., u32): the kernel
        // writes exactly one u32 through the pointer.
        // Invariants: (1) fd is open for the lifetime of self; (2) the pointer
        // refers to a live, aligned u32 on our stack.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                CXL_IOCTL_GET_PROCESS_ELEMENT as _,
                &raw mut process_element,
            )
        };

        if ret < 0 {
            return Err(CxlError::resource(
                "Process element query failed",
                std::io::Error::last_os_error(),
            ));
        }

        Ok(process_element)
    }

    fn start_work(&self, work: &StartWork) -> Result<()> {
        // SAFETY: CXL_IOCTL_START_WORK is _IOW(.., struct cxl_ioctl_start_work):
        // the kernel only reads size_of::<StartWork>() bytes.
        // Invariants: (1) fd is open; (2) StartWork is #[repr(C)] and matches
        // the kernel layout (64 bytes); (3) `work` outlives the call.
        let ret = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                CXL_IOCTL_START_WORK as _,
                std::ptr::from_ref(work),
            )
        };

        if ret < 0 {
            return Err(CxlError::resource(
                "Start work request failed",
                std::io::Error::last_os_error(),
            ));
        }

        Ok(())
    }

    fn read_events(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        rustix::io::read(&self.file, buf).map_err(std::io::Error::from)
    }
}
