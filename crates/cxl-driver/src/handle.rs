//! AFU handle and its lifecycle
//!
//! ```text
//!   open / open_view / from_fd          attach            map
//!  ─────────────────────────────▶ OPEN ───────▶ ATTACHED ─────▶ MAPPED
//!                                   │              │    ◀─────    │
//!                                   └──────────────┴── close ─────┘
//! ```
//!
//! A handle owns its descriptor, the MMIO mapping (only ever created while
//! attached), its path metadata and the event buffer. `close` (or drop)
//! releases the mapping before the descriptor.

use crate::attributes::{read_dev, AfuAttributes};
use crate::device::{AfuDevice, DeviceNode};
use crate::error::{CxlError, Result};
use crate::events::{EventChannel, ExpectOutcome, RawEvent};
use crate::layout::SysfsLayout;
use crate::mmio::{Endianness, MmioRegion};
use cxl_uapi::ioctl::StartWork;
use cxl_uapi::sysfs::{
    afu_base_name, VIEW_SUFFIX_DEDICATED, VIEW_SUFFIX_MASTER, VIEW_SUFFIX_SLAVE,
};
use cxl_uapi::KERNEL_API_VERSION;
use rustix::fs::OFlags;
use std::fs::{File, Metadata, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Mode a handle is opened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    /// Dedicated-process: one context owns the AFU
    Dedicated,
    /// AFU-directed master context
    Master,
    /// AFU-directed slave context
    Slave,
}

impl View {
    /// Character appended to the AFU name to name this view's device
    pub const fn suffix(self) -> char {
        match self {
            Self::Dedicated => VIEW_SUFFIX_DEDICATED,
            Self::Master => VIEW_SUFFIX_MASTER,
            Self::Slave => VIEW_SUFFIX_SLAVE,
        }
    }

    /// Device name of this view of `afu` (any existing view suffix is replaced)
    pub fn device_name(self, afu: &str) -> String {
        format!("{}{}", afu_base_name(afu), self.suffix())
    }
}

/// Optional fields of a full attach request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachOptions {
    /// Number of AFU interrupts to allocate for this context
    pub num_interrupts: u16,
    /// Authority mask register value
    pub amr: u64,
}

/// Where a handle's device lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfuPaths {
    /// Absolute directory holding the device node
    pub dir: PathBuf,
    /// Device node name (`afu0.0d`)
    pub dev_name: String,
    /// `/sys/dev/char/<major>:<minor>` mirror of the device
    pub sysfs: PathBuf,
}

impl AfuPaths {
    /// Split an absolute device path and attach its sysfs mirror
    fn from_device_path(path: &Path, sysfs: PathBuf) -> Result<Self> {
        let absolute = std::path::absolute(path)
            .map_err(|e| CxlError::resource(format!("Cannot resolve {}", path.display()), e))?;

        let (Some(dir), Some(name)) = (absolute.parent(), absolute.file_name()) else {
            return Err(CxlError::invalid_argument(format!(
                "{} does not name a device node",
                path.display()
            )));
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            dev_name: name.to_string_lossy().into_owned(),
            sysfs,
        })
    }

    /// Full path of the device node
    pub fn dev_path(&self) -> PathBuf {
        self.dir.join(&self.dev_name)
    }
}

/// Open instance of an AFU in one view
///
/// Not safe for concurrent use; callers serialize access.
#[derive(Debug)]
pub struct AfuHandle<D: AfuDevice = DeviceNode> {
    // Field order matters: the mapping must go before the descriptor.
    mmio: Option<MmioRegion>,
    device: D,
    paths: AfuPaths,
    layout: SysfsLayout,
    attached: bool,
    process_element: Option<u32>,
    events: EventChannel,
}

impl AfuHandle<DeviceNode> {
    /// Open an AFU device node by path
    ///
    /// # Errors
    ///
    /// - `ResourceUnavailable` if the node cannot be opened, stat'ed or its
    ///   capability record read
    /// - `NotCharDevice` if the path is not a character device
    /// - `ProtocolIncompatible` if the kernel API is newer than supported
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_in(&SysfsLayout::from_env(), path)
    }

    /// [`Self::open`] with an explicit directory layout
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_in(layout: &SysfsLayout, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Opening AFU {}", path.display());

        // Flag bits are small positive values
        #[allow(clippy::cast_possible_wrap)]
        let cloexec = OFlags::CLOEXEC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(cloexec)
            .open(path)
            .map_err(|e| CxlError::resource(format!("Cannot open {}", path.display()), e))?;

        let metadata = file
            .metadata()
            .map_err(|e| CxlError::resource(format!("Cannot stat {}", path.display()), e))?;
        let (major, minor) = char_device_number(&metadata, path)?;

        let paths = AfuPaths::from_device_path(path, layout.dev_char_path(major, minor))?;
        let device = DeviceNode::new(file, &paths.sysfs);

        let reported = device.api_version_compatible()?;
        if reported > KERNEL_API_VERSION {
            // Dropping `device` closes the descriptor.
            return Err(CxlError::ProtocolIncompatible {
                reported,
                supported: KERNEL_API_VERSION,
            });
        }

        tracing::debug!(
            "Opened AFU {} ({major}:{minor}, api_version_compatible={reported})",
            paths.dev_path().display()
        );

        Ok(Self::from_parts(device, paths, layout.clone()))
    }

    /// Open another view of the same AFU
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if the AFU has no such view, otherwise the
    /// errors of [`Self::open`].
    pub fn open_view(&self, view: View) -> Result<Self> {
        open_sibling(&self.layout, &self.paths.dev_name, view)
    }

    /// Adopt an already-open AFU descriptor
    ///
    /// The descriptor carries no path, so it is recovered by searching the
    /// device directory for a node with the same device number. The
    /// capability record is not re-checked. The descriptor is closed if
    /// adoption fails.
    ///
    /// # Errors
    ///
    /// Returns `NotCharDevice` if `fd` is not a character device and
    /// `DeviceNotFound` if no node in the device directory matches it.
    pub fn from_fd(fd: OwnedFd) -> Result<Self> {
        Self::from_fd_in(&SysfsLayout::from_env(), fd)
    }

    /// [`Self::from_fd`] with an explicit directory layout
    ///
    /// # Errors
    ///
    /// See [`Self::from_fd`].
    pub fn from_fd_in(layout: &SysfsLayout, fd: OwnedFd) -> Result<Self> {
        let file = File::from(fd);
        let described = format!("fd {}", file.as_raw_fd());

        let metadata = file
            .metadata()
            .map_err(|e| CxlError::resource(format!("Cannot stat {described}"), e))?;
        let (major, minor) = char_device_number(&metadata, Path::new(&described))?;

        let path = find_dev_path(layout, major, minor)?;
        let paths = AfuPaths::from_device_path(&path, layout.dev_char_path(major, minor))?;

        tracing::debug!("Adopted {described} as {}", paths.dev_path().display());

        let device = DeviceNode::new(file, &paths.sysfs);
        Ok(Self::from_parts(device, paths, layout.clone()))
    }

    /// Sysfs attributes of the opened device
    pub fn attributes(&self) -> &AfuAttributes {
        self.device.attributes()
    }
}

impl<D: AfuDevice> AfuHandle<D> {
    pub(crate) fn from_parts(device: D, paths: AfuPaths, layout: SysfsLayout) -> Self {
        Self {
            mmio: None,
            device,
            paths,
            layout,
            attached: false,
            process_element: None,
            events: EventChannel::new(),
        }
    }

    /// Attach a context, handing the AFU a work element descriptor
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already attached and `ResourceUnavailable`
    /// if the kernel rejects the request.
    pub fn attach(&mut self, wed: u64) -> Result<()> {
        self.start_work(&StartWork::new(wed))
    }

    /// Attach with an interrupt count and authority mask
    ///
    /// # Errors
    ///
    /// As [`Self::attach`], plus `InvalidArgument` if `num_interrupts` does
    /// not fit the kernel's signed 16-bit field.
    pub fn attach_with(&mut self, wed: u64, options: AttachOptions) -> Result<()> {
        let num_interrupts = i16::try_from(options.num_interrupts).map_err(|_| {
            CxlError::invalid_argument(format!(
                "{} interrupts exceeds the kernel limit of {}",
                options.num_interrupts,
                i16::MAX
            ))
        })?;
        self.start_work(&StartWork::full(wed, num_interrupts, options.amr))
    }

    fn start_work(&mut self, work: &StartWork) -> Result<()> {
        if self.attached {
            return Err(CxlError::invalid_state(format!(
                "{} is already attached",
                self.paths.dev_name
            )));
        }

        self.device.start_work(work)?;
        self.attached = true;

        tracing::debug!(
            "Attached {} (wed={:#x}, flags={:#x})",
            self.paths.dev_name,
            work.work_element_descriptor,
            work.flags
        );
        Ok(())
    }

    /// `true` once a start-work request succeeded
    pub const fn is_attached(&self) -> bool {
        self.attached
    }

    /// Process element of this context
    ///
    /// Queried once; later calls return the cached value.
    ///
    /// # Errors
    ///
    /// Returns the query error; nothing is cached on failure.
    pub fn process_element(&mut self) -> Result<u32> {
        if let Some(pe) = self.process_element {
            return Ok(pe);
        }
        let pe = self.device.process_element()?;
        self.process_element = Some(pe);
        Ok(pe)
    }

    /// Map the problem-state MMIO area
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for unknown flag bits
    /// - `DeviceNotReady` if not attached or the size query fails
    /// - `InvalidState` if already mapped
    /// - `ResourceUnavailable` if `mmap` fails
    pub fn map(&mut self, flags: u32) -> Result<()> {
        let endian = Endianness::from_flags(flags)?;
        self.map_with(endian)
    }

    /// [`Self::map`] with a typed byte order
    ///
    /// # Errors
    ///
    /// See [`Self::map`].
    pub fn map_with(&mut self, endian: Endianness) -> Result<()> {
        if !self.attached {
            tracing::error!("Must attach {} before mapping MMIO", self.paths.dev_name);
            return Err(CxlError::device_not_ready("AFU is not attached"));
        }
        if self.mmio.is_some() {
            return Err(CxlError::invalid_state(format!(
                "MMIO of {} is already mapped",
                self.paths.dev_name
            )));
        }

        let size = self
            .device
            .mmio_size()
            .map_err(|e| CxlError::device_not_ready(format!("MMIO size query failed: {e}")))?;

        self.mmio = Some(MmioRegion::map(self.device.as_fd(), size, endian)?);
        Ok(())
    }

    /// Release the MMIO mapping
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotReady` if nothing is mapped and `ResourceUnavailable`
    /// if `munmap` fails.
    pub fn unmap(&mut self) -> Result<()> {
        self.mmio
            .take()
            .ok_or_else(|| CxlError::device_not_ready("MMIO is not mapped"))?
            .unmap()
    }

    /// `true` while the MMIO area is mapped
    pub const fn is_mapped(&self) -> bool {
        self.mmio.is_some()
    }

    /// Base of the MMIO mapping, for callers doing their own access
    pub fn mmio_ptr(&self) -> Option<NonNull<u8>> {
        self.mmio.as_ref().map(MmioRegion::as_ptr)
    }

    /// Size of the MMIO mapping in bytes
    pub fn mmio_size(&self) -> Option<usize> {
        self.mmio.as_ref().map(MmioRegion::size)
    }

    /// Register byte order of the current mapping
    pub fn mmio_endianness(&self) -> Option<Endianness> {
        self.mmio.as_ref().map(MmioRegion::endianness)
    }

    /// Change the register byte order of the current mapping
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotReady` if nothing is mapped.
    pub fn set_mmio_endianness(&mut self, endian: Endianness) -> Result<()> {
        self.region_mut()?.set_endianness(endian);
        Ok(())
    }

    /// Read a 64-bit register at an even unit offset
    ///
    /// # Errors
    ///
    /// `DeviceNotReady` if not mapped, `InvalidOffset` for a bad offset.
    pub fn read64(&self, offset: u64) -> Result<u64> {
        self.region()?.read64(offset)
    }

    /// Write a 64-bit register at an even unit offset
    ///
    /// # Errors
    ///
    /// `DeviceNotReady` if not mapped, `InvalidOffset` for a bad offset.
    pub fn write64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.region_mut()?.write64(offset, value)
    }

    /// Read a 32-bit register
    ///
    /// # Errors
    ///
    /// `DeviceNotReady` if not mapped, `InvalidOffset` for a bad offset.
    pub fn read32(&self, offset: u64) -> Result<u32> {
        self.region()?.read32(offset)
    }

    /// Write a 32-bit register
    ///
    /// # Errors
    ///
    /// `DeviceNotReady` if not mapped, `InvalidOffset` for a bad offset.
    pub fn write32(&mut self, offset: u64, value: u32) -> Result<()> {
        self.region_mut()?.write32(offset, value)
    }

    fn region(&self) -> Result<&MmioRegion> {
        self.mmio
            .as_ref()
            .ok_or_else(|| CxlError::device_not_ready("MMIO is not mapped"))
    }

    fn region_mut(&mut self) -> Result<&mut MmioRegion> {
        self.mmio
            .as_mut()
            .ok_or_else(|| CxlError::device_not_ready("MMIO is not mapped"))
    }

    /// Read the next event, going to the descriptor only when none is buffered
    ///
    /// Blocks unless the caller made the descriptor non-blocking.
    ///
    /// # Errors
    ///
    /// See [`EventChannel::read_event`].
    pub fn read_event(&mut self, event: &mut RawEvent) -> Result<()> {
        let device = &self.device;
        self.events
            .read_event(|buf: &mut [u8]| device.read_events(buf), event)
    }

    /// Read an event and check its type (and interrupt number)
    ///
    /// # Errors
    ///
    /// See [`EventChannel::read_expected`].
    pub fn read_expected(
        &mut self,
        event: &mut RawEvent,
        ty: u16,
        irq: u16,
    ) -> Result<ExpectOutcome> {
        let device = &self.device;
        self.events
            .read_expected(|buf: &mut [u8]| device.read_events(buf), event, ty, irq)
    }

    /// `true` while already-read events remain buffered. Never performs I/O.
    pub const fn pending_event(&self) -> bool {
        self.events.pending()
    }

    /// Device node name (`afu0.0m`)
    pub fn dev_name(&self) -> &str {
        &self.paths.dev_name
    }

    /// Absolute directory of the device node
    pub fn dir_path(&self) -> &Path {
        &self.paths.dir
    }

    /// Device-number mirror in sysfs
    pub fn sysfs_path(&self) -> &Path {
        &self.paths.sysfs
    }

    /// All path metadata
    pub const fn paths(&self) -> &AfuPaths {
        &self.paths
    }

    /// Underlying device
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Get raw file descriptor (for advanced use)
    pub fn as_raw_fd(&self) -> RawFd {
        self.device.as_fd().as_raw_fd()
    }

    /// Close the handle, unmapping before the descriptor is closed
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` if unmapping fails; the descriptor is
    /// closed regardless.
    pub fn close(mut self) -> Result<()> {
        match self.mmio.take() {
            Some(region) => region.unmap(),
            None => Ok(()),
        }
    }
}

impl<D: AfuDevice> AsFd for AfuHandle<D> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.device.as_fd()
    }
}

impl<D: AfuDevice> Drop for AfuHandle<D> {
    fn drop(&mut self) {
        tracing::debug!("Closing AFU {}", self.paths.dev_path().display());
        drop(self.mmio.take());
    }
}

/// Open `view` of the AFU called `dev_name` (with or without a view suffix)
pub(crate) fn open_sibling(
    layout: &SysfsLayout,
    dev_name: &str,
    view: View,
) -> Result<AfuHandle<DeviceNode>> {
    let sibling = view.device_name(dev_name);
    let class_entry = layout.class_dir.join(&sibling);

    let (major, minor) = match read_dev(&class_entry) {
        Ok(dev) => dev,
        Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {
            return Err(CxlError::device_not_found(class_entry));
        }
        Err(e) => return Err(e),
    };

    tracing::debug!("{sibling} is device {major}:{minor}");

    let path = find_dev_path(layout, major, minor)?;
    AfuHandle::open_in(layout, path)
}

/// Device number of a character device, or `NotCharDevice`
fn char_device_number(metadata: &Metadata, path: &Path) -> Result<(u32, u32)> {
    if !metadata.file_type().is_char_device() {
        return Err(CxlError::NotCharDevice {
            path: path.to_path_buf(),
        });
    }
    let rdev = metadata.rdev();
    Ok((rustix::fs::major(rdev), rustix::fs::minor(rdev)))
}

/// Reverse index: find the node in the device directory with this number
fn find_dev_path(layout: &SysfsLayout, major: u32, minor: u32) -> Result<PathBuf> {
    let entries = std::fs::read_dir(&layout.dev_dir).map_err(|e| {
        CxlError::resource(format!("Cannot read {}", layout.dev_dir.display()), e)
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| {
            CxlError::resource(format!("Cannot list {}", layout.dev_dir.display()), e)
        })?;

        if !entry.file_name().to_string_lossy().starts_with('a') {
            continue;
        }

        let path = entry.path();
        // Follows symlinks, like stat(2)
        let Ok(metadata) = std::fs::metadata(&path) else {
            continue;
        };
        if let Ok(number) = char_device_number(&metadata, &path) {
            if number == (major, minor) {
                return Ok(path);
            }
        }
    }

    Err(CxlError::device_not_found(
        layout.dev_dir.join(format!("{major}:{minor}")),
    ))
}
