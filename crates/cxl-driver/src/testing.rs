//! In-memory stand-in for a kernel AFU, used by unit tests
//!
//! The "MMIO area" is a tempfile, so the real `mmap` path is exercised.

use crate::device::AfuDevice;
use crate::error::{CxlError, Result};
use cxl_uapi::event::{event_type, offsets, EventHeader, HEADER_SIZE};
use cxl_uapi::ioctl::StartWork;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::FileExt;

const SENTINEL: u8 = 0xA5;

#[derive(Debug)]
pub struct MockDevice {
    backing: File,
    mmio_size: Option<usize>,
    start_errno: Option<i32>,
    started: RefCell<Vec<StartWork>>,
    next_pe: Cell<u32>,
    pe_queries: Cell<usize>,
    size_queries: Cell<usize>,
    queued_reads: RefCell<VecDeque<std::io::Result<Vec<u8>>>>,
    reads: Cell<usize>,
}

impl MockDevice {
    pub const MMIO_SIZE: usize = 4096;

    pub fn new() -> Self {
        let mut backing = tempfile::tempfile().unwrap();
        backing.write_all(&[SENTINEL; Self::MMIO_SIZE]).unwrap();

        Self {
            backing,
            mmio_size: Some(Self::MMIO_SIZE),
            start_errno: None,
            started: RefCell::new(Vec::new()),
            next_pe: Cell::new(0),
            pe_queries: Cell::new(0),
            size_queries: Cell::new(0),
            queued_reads: RefCell::new(VecDeque::new()),
            reads: Cell::new(0),
        }
    }

    pub fn failing_start(mut self, errno: i32) -> Self {
        self.start_errno = Some(errno);
        self
    }

    pub fn without_mmio_size(mut self) -> Self {
        self.mmio_size = None;
        self
    }

    /// Each query answers one more than the last, starting at `pe`
    pub fn with_process_element(self, pe: u32) -> Self {
        self.next_pe.set(pe);
        self
    }

    pub fn with_read(self, read: std::io::Result<Vec<u8>>) -> Self {
        self.queued_reads.borrow_mut().push_back(read);
        self
    }

    pub fn interrupt_frames(irqs: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for &irq in irqs {
            let mut frame = [0u8; 16];
            let header = EventHeader {
                ty: event_type::AFU_INTERRUPT,
                size: 16,
                process_element: 0,
                reserved1: 0,
            };
            frame[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
            frame[offsets::IRQ..offsets::IRQ + 2].copy_from_slice(&irq.to_ne_bytes());
            bytes.extend_from_slice(&frame);
        }
        bytes
    }

    pub fn started(&self) -> Vec<StartWork> {
        self.started.borrow().clone()
    }

    pub fn process_element_queries(&self) -> usize {
        self.pe_queries.get()
    }

    pub fn mmio_size_queries(&self) -> usize {
        self.size_queries.get()
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    pub fn backing_bytes(&self, offset: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.backing.read_exact_at(&mut buf, offset).unwrap();
        buf
    }

    pub fn backing_untouched(&self) -> bool {
        self.backing_bytes(0, Self::MMIO_SIZE)
            .iter()
            .all(|&b| b == SENTINEL)
    }
}

impl AsFd for MockDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.backing.as_fd()
    }
}

impl AfuDevice for MockDevice {
    fn api_version_compatible(&self) -> Result<i64> {
        Ok(1)
    }

    fn mmio_size(&self) -> Result<usize> {
        self.size_queries.set(self.size_queries.get() + 1);
        self.mmio_size.ok_or_else(|| {
            CxlError::resource(
                "mmio_size",
                std::io::Error::from_raw_os_error(libc::ENOENT),
            )
        })
    }

    fn process_element(&self) -> Result<u32> {
        self.pe_queries.set(self.pe_queries.get() + 1);
        let pe = self.next_pe.get();
        self.next_pe.set(pe + 1);
        Ok(pe)
    }

    fn start_work(&self, work: &StartWork) -> Result<()> {
        if let Some(errno) = self.start_errno {
            return Err(CxlError::resource(
                "Start work request failed",
                std::io::Error::from_raw_os_error(errno),
            ));
        }
        self.started.borrow_mut().push(*work);
        Ok(())
    }

    fn read_events(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reads.set(self.reads.get() + 1);
        let next = self
            .queued_reads
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(std::io::ErrorKind::WouldBlock.into()));
        let bytes = next?;
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }
}
