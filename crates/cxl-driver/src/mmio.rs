//! Problem-state MMIO access
//!
//! The AFU's register area is mapped shared and read-write over the AFU
//! descriptor at offset zero. Offsets are in 4-byte register units; 64-bit
//! registers sit at even units.
//!
//! Every access is bracketed by an I/O barrier: stores are preceded by one
//! (store-release), loads followed by one (load-acquire).
//!
//! Values are converted between host order and the AFU's configured byte
//! order around each access.

// Register access requires exact pointer casts into the mapping;
// alignment is guaranteed by the unit checks below and the page-aligned base.
#![allow(clippy::cast_ptr_alignment)]

use crate::error::{CxlError, Result};
use cxl_uapi::mmio::{flags, WORD_SIZE};
use rustix::fs::{fstat, FileType};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::mem::ManuallyDrop;
use std::os::fd::AsFd;
use std::ptr::NonNull;

/// Byte order of the AFU's registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Endianness {
    /// Same as the host; values pass through unchanged
    #[default]
    Host,
    /// Little-endian registers
    Little,
    /// Big-endian registers
    Big,
}

impl Endianness {
    /// Decode the endian bits of mapping flags
    ///
    /// `0` and [`flags::HOST_ENDIAN`] both select host order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if any unknown flag bit is set.
    pub fn from_flags(bits: u32) -> Result<Self> {
        if bits & !flags::ALL != 0 {
            return Err(CxlError::invalid_argument(format!(
                "unknown MMIO flags {:#x}",
                bits & !flags::ALL
            )));
        }
        Ok(match bits & flags::ENDIAN_MASK {
            flags::LITTLE_ENDIAN => Self::Little,
            flags::BIG_ENDIAN => Self::Big,
            _ => Self::Host,
        })
    }

    /// Flag bits selecting this byte order
    pub const fn flags(self) -> u32 {
        match self {
            Self::Host => flags::HOST_ENDIAN,
            Self::Little => flags::LITTLE_ENDIAN,
            Self::Big => flags::BIG_ENDIAN,
        }
    }

    const fn to_device64(self, value: u64) -> u64 {
        match self {
            Self::Host => value,
            Self::Little => value.to_le(),
            Self::Big => value.to_be(),
        }
    }

    const fn from_device64(self, value: u64) -> u64 {
        match self {
            Self::Host => value,
            Self::Little => u64::from_le(value),
            Self::Big => u64::from_be(value),
        }
    }

    const fn to_device32(self, value: u32) -> u32 {
        match self {
            Self::Host => value,
            Self::Little => value.to_le(),
            Self::Big => value.to_be(),
        }
    }

    const fn from_device32(self, value: u32) -> u32 {
        match self {
            Self::Host => value,
            Self::Little => u32::from_le(value),
            Self::Big => u32::from_be(value),
        }
    }
}

/// Ordered load/store primitives
///
/// Each target supplies the barrier that orders cache-inhibited accesses
/// against surrounding ones. On powerpc64 a sequentially consistent fence
/// is `hwsync`; on x86_64 it is `mfence`.
mod ordered {
    #[cfg(target_arch = "aarch64")]
    #[inline(always)]
    fn io_barrier() {
        // SAFETY: `dmb osh` only orders memory accesses; it reads and writes
        // no registers or memory of its own.
        unsafe { std::arch::asm!("dmb osh", options(nostack, preserves_flags)) }
    }

    #[cfg(not(target_arch = "aarch64"))]
    #[inline(always)]
    fn io_barrier() {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }

    /// Store with release semantics towards the device.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for a volatile write of `T` and aligned for `T`.
    #[inline(always)]
    pub(super) unsafe fn store<T: Copy>(ptr: *mut T, value: T) {
        io_barrier();
        // SAFETY: guaranteed by the caller.
        unsafe { ptr.write_volatile(value) };
    }

    /// Load with acquire semantics towards the device.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for a volatile read of `T` and aligned for `T`.
    #[inline(always)]
    pub(super) unsafe fn load<T: Copy>(ptr: *const T) -> T {
        // SAFETY: guaranteed by the caller.
        let value = unsafe { ptr.read_volatile() };
        io_barrier();
        value
    }
}

/// Mapped AFU register area
///
/// Owns the mapping; dropping it unmaps. The descriptor it was mapped from
/// must stay open at least as long as this value is used.
pub struct MmioRegion {
    ptr: NonNull<u8>,
    size: usize,
    endian: Endianness,
}

impl std::fmt::Debug for MmioRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmioRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .field("endian", &self.endian)
            .finish()
    }
}

// SAFETY: Send - MmioRegion owns its mapping exclusively; the mapping is
// process-wide, so moving the owner between threads does not invalidate it.
unsafe impl Send for MmioRegion {}

// SAFETY: Sync - reads take &self and are bounds-checked volatile loads;
// writes and unmapping require &mut self or ownership.
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// Map `size` bytes of `fd` at offset zero, shared and read-write
    ///
    /// `size` must come from the device itself: pages past the end of the
    /// backing object fault on access. A regular file shorter than `size`
    /// is refused.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotReady` for a zero size, `InvalidArgument` for a
    /// regular file shorter than `size` and `ResourceUnavailable` if `fstat`
    /// or `mmap` fails.
    pub(crate) fn map(fd: impl AsFd, size: usize, endian: Endianness) -> Result<Self> {
        if size == 0 {
            return Err(CxlError::device_not_ready("MMIO size is 0"));
        }

        let stat = fstat(fd.as_fd())
            .map_err(|e| CxlError::resource("Cannot stat MMIO descriptor", e.into()))?;
        if FileType::from_raw_mode(stat.st_mode) == FileType::RegularFile {
            let extent = u64::try_from(stat.st_size).unwrap_or(0);
            if extent < size as u64 {
                return Err(CxlError::invalid_argument(format!(
                    "cannot map {size:#x} bytes of a {extent:#x} byte file"
                )));
            }
        }

        // SAFETY: mmap necessary for MMIO - maps the AFU register area.
        // Invariants: (1) fd is open for read-write; (2) size is non-zero;
        // (3) a fresh address is requested, so no existing mapping is replaced;
        // (4) the pointer is only dereferenced through bounds-checked accessors.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd.as_fd(),
                0,
            )
        }
        .map_err(|e| CxlError::resource("Failed to mmap MMIO area", e.into()))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| CxlError::device_not_ready("mmap returned a null mapping"))?;

        tracing::debug!("Mapped MMIO at {ptr:p}, size={size:#x}, {endian:?} endian");

        Ok(Self { ptr, size, endian })
    }

    /// Mapping size in bytes
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Base address of the mapping
    pub const fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Configured register byte order
    pub const fn endianness(&self) -> Endianness {
        self.endian
    }

    /// Change the register byte order used by later accesses
    pub fn set_endianness(&mut self, endian: Endianness) {
        self.endian = endian;
    }

    /// Read a 64-bit register at an even unit offset
    ///
    /// # Errors
    ///
    /// Returns `InvalidOffset` for an odd or out-of-range offset.
    pub fn read64(&self, offset: u64) -> Result<u64> {
        let ptr = self.register::<u64>(offset)?;
        // SAFETY: register() checked the access lies inside the mapping and
        // is 8-byte aligned (even unit on a page-aligned base).
        let raw = unsafe { ordered::load(ptr.cast_const()) };
        let value = self.endian.from_device64(raw);
        tracing::trace!("Read u64 @ unit {offset:#x} = {value:#x}");
        Ok(value)
    }

    /// Write a 64-bit register at an even unit offset
    ///
    /// # Errors
    ///
    /// Returns `InvalidOffset` for an odd or out-of-range offset; nothing is
    /// written in that case.
    pub fn write64(&mut self, offset: u64, value: u64) -> Result<()> {
        let ptr = self.register::<u64>(offset)?;
        tracing::trace!("Write u64 @ unit {offset:#x} = {value:#x}");
        // SAFETY: register() checked bounds and alignment; &mut self gives
        // exclusive use of the mapping.
        unsafe { ordered::store(ptr, self.endian.to_device64(value)) };
        Ok(())
    }

    /// Read a 32-bit register
    ///
    /// # Errors
    ///
    /// Returns `InvalidOffset` for an out-of-range offset.
    pub fn read32(&self, offset: u64) -> Result<u32> {
        let ptr = self.register::<u32>(offset)?;
        // SAFETY: register() checked bounds; units are 4-byte aligned.
        let raw = unsafe { ordered::load(ptr.cast_const()) };
        let value = self.endian.from_device32(raw);
        tracing::trace!("Read u32 @ unit {offset:#x} = {value:#x}");
        Ok(value)
    }

    /// Write a 32-bit register
    ///
    /// # Errors
    ///
    /// Returns `InvalidOffset` for an out-of-range offset; nothing is written
    /// in that case.
    pub fn write32(&mut self, offset: u64, value: u32) -> Result<()> {
        let ptr = self.register::<u32>(offset)?;
        tracing::trace!("Write u32 @ unit {offset:#x} = {value:#x}");
        // SAFETY: register() checked bounds; units are 4-byte aligned.
        unsafe { ordered::store(ptr, self.endian.to_device32(value)) };
        Ok(())
    }

    /// Unmap now, reporting failure instead of logging it
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` if `munmap` fails; the mapping is
    /// forgotten either way.
    pub fn unmap(self) -> Result<()> {
        let region = ManuallyDrop::new(self);
        // SAFETY: ptr/size are exactly what mmap returned in map(), and
        // ManuallyDrop keeps Drop from unmapping a second time.
        unsafe { munmap(region.ptr.as_ptr().cast(), region.size) }
            .map_err(|e| CxlError::resource("Failed to munmap MMIO area", e.into()))?;
        tracing::debug!("Unmapped MMIO, size={:#x}", region.size);
        Ok(())
    }

    /// Pointer to a `T`-wide register at `offset` units, after validation
    fn register<T>(&self, offset: u64) -> Result<*mut T> {
        let width = std::mem::size_of::<T>();

        if width == 8 && offset & 1 != 0 {
            return Err(CxlError::InvalidOffset {
                offset,
                reason: "64-bit registers need an even unit offset",
            });
        }

        let byte = usize::try_from(offset)
            .ok()
            .and_then(|units| units.checked_mul(WORD_SIZE))
            .filter(|byte| byte.checked_add(width).is_some_and(|end| end <= self.size))
            .ok_or(CxlError::InvalidOffset {
                offset,
                reason: "outside the mapped MMIO area",
            })?;

        // SAFETY: byte + width <= size, so the result stays inside the mapping.
        Ok(unsafe { self.ptr.as_ptr().add(byte) }.cast::<T>())
    }
}

impl Drop for MmioRegion {
    fn drop(&mut self) {
        // SAFETY: munmap necessary - ptr/size come from the successful mmap in
        // map(); Drop runs at most once and unmap() suppresses it.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::FileExt;

    const SIZE: usize = 4096;
    const SENTINEL: u8 = 0xA5;

    fn backing() -> std::fs::File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[SENTINEL; SIZE]).unwrap();
        file
    }

    fn bytes_at(file: &std::fs::File, offset: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        file.read_exact_at(&mut buf, offset).unwrap();
        buf
    }

    #[test]
    fn test_flags_decoding() {
        assert_eq!(Endianness::from_flags(0).unwrap(), Endianness::Host);
        assert_eq!(Endianness::from_flags(0x3).unwrap(), Endianness::Host);
        assert_eq!(Endianness::from_flags(0x2).unwrap(), Endianness::Little);
        assert_eq!(Endianness::from_flags(0x1).unwrap(), Endianness::Big);
        assert!(matches!(
            Endianness::from_flags(0x4),
            Err(CxlError::InvalidArgument { .. })
        ));
        for endian in [Endianness::Host, Endianness::Little, Endianness::Big] {
            assert_eq!(Endianness::from_flags(endian.flags()).unwrap(), endian);
        }
    }

    #[test]
    fn test_roundtrip_each_endianness() {
        let file = backing();
        let mut region = MmioRegion::map(&file, SIZE, Endianness::Host).unwrap();

        for endian in [Endianness::Host, Endianness::Little, Endianness::Big] {
            region.set_endianness(endian);
            region.write64(6, 0x0123_4567_89ab_cdef).unwrap();
            assert_eq!(region.read64(6).unwrap(), 0x0123_4567_89ab_cdef);
            region.write32(3, 0xcafe_f00d).unwrap();
            assert_eq!(region.read32(3).unwrap(), 0xcafe_f00d);
        }
    }

    #[test]
    fn test_conversion_is_applied() {
        let file = backing();
        let mut region = MmioRegion::map(&file, SIZE, Endianness::Little).unwrap();

        region.write64(2, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(
            bytes_at(&file, 8, 8),
            [0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );

        region.set_endianness(Endianness::Big);
        assert_eq!(region.read64(2).unwrap(), 0x8877_6655_4433_2211);

        region.write32(5, 0xaabb_ccdd).unwrap();
        assert_eq!(bytes_at(&file, 20, 4), [0xaa, 0xbb, 0xcc, 0xdd]);
        region.set_endianness(Endianness::Little);
        assert_eq!(region.read32(5).unwrap(), 0xddcc_bbaa);
    }

    #[test]
    fn test_odd_offset_rejected_without_access() {
        let file = backing();
        let mut region = MmioRegion::map(&file, SIZE, Endianness::Host).unwrap();

        let err = region.write64(1, u64::MAX).unwrap_err();
        assert!(matches!(err, CxlError::InvalidOffset { offset: 1, .. }));
        assert!(matches!(
            region.read64(3),
            Err(CxlError::InvalidOffset { offset: 3, .. })
        ));
        assert!(bytes_at(&file, 0, SIZE).iter().all(|&b| b == SENTINEL));
    }

    #[test]
    fn test_bounds_are_checked_in_bytes() {
        let file = backing();
        let mut region = MmioRegion::map(&file, SIZE, Endianness::Host).unwrap();
        let last_unit = (SIZE / WORD_SIZE) as u64 - 1;

        region.write32(last_unit, 1).unwrap();
        assert!(region.write32(last_unit + 1, 1).is_err());
        region.write64(last_unit - 1, 2).unwrap();
        assert!(region.write64(last_unit + 1, 2).is_err());
        assert!(region.read32(u64::MAX).is_err());
        assert!(region.read64(u64::MAX - 1).is_err());
    }

    #[test]
    fn test_zero_size_is_not_mapped() {
        let file = backing();
        assert!(matches!(
            MmioRegion::map(&file, 0, Endianness::Host),
            Err(CxlError::DeviceNotReady { .. })
        ));
    }

    #[test]
    fn test_short_file_is_not_mapped() {
        let empty = tempfile::tempfile().unwrap();
        assert!(matches!(
            MmioRegion::map(&empty, SIZE, Endianness::Host),
            Err(CxlError::InvalidArgument { .. })
        ));

        let file = backing();
        assert!(matches!(
            MmioRegion::map(&file, SIZE * 2, Endianness::Host),
            Err(CxlError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_explicit_unmap() {
        let file = backing();
        let region = MmioRegion::map(&file, SIZE, Endianness::Host).unwrap();
        assert_eq!(region.size(), SIZE);
        region.unmap().unwrap();
    }
}
