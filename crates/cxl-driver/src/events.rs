//! Buffered delivery of AFU events
//!
//! One `read(2)` on an AFU descriptor may return several event records
//! packed back to back. [`EventChannel`] keeps the bytes of the last read and
//! hands out one record per call, only going back to the descriptor once the
//! buffer is drained.
//!
//! Frame sizes come from the device, so every frame is bounds-checked
//! against the filled part of the buffer before the cursor moves.

use crate::error::{CxlError, Result};
use cxl_uapi::event::{
    event_type, offsets, EventHeader, HEADER_SIZE, MAX_EVENT_SIZE, POISON, READ_MIN_SIZE,
};
use std::fmt;

/// One event record, exactly as the kernel framed it
#[derive(Clone, PartialEq, Eq)]
pub struct RawEvent {
    bytes: [u8; MAX_EVENT_SIZE],
}

/// Decoded view of a [`RawEvent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The AFU raised an interrupt
    AfuInterrupt {
        /// Process element the interrupt belongs to
        process_element: u16,
        /// AFU interrupt number
        irq: u16,
    },
    /// The AFU touched memory it could not translate
    DataStorage {
        /// Process element the fault belongs to
        process_element: u16,
        /// Faulting effective address
        addr: u64,
        /// Data storage interrupt status
        dsisr: u64,
    },
    /// The AFU reported an error
    AfuError {
        /// Process element the error belongs to
        process_element: u16,
        /// AFU-specific error word
        error: u64,
    },
    /// Placeholder left behind by a failed read
    ReadFailed,
    /// A record type this library does not know about
    Unknown {
        /// Raw type code
        ty: u16,
        /// Whole record, header included
        bytes: Vec<u8>,
    },
}

/// Result of [`EventChannel::read_expected`] when the read itself succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ExpectOutcome {
    /// Event of the expected type (and interrupt number, if one was given)
    Matched,
    /// A valid event arrived, but not the one expected
    Mismatch,
}

impl RawEvent {
    /// Zeroed record
    pub const fn new() -> Self {
        Self {
            bytes: [0; MAX_EVENT_SIZE],
        }
    }

    /// Build a record from the bytes of one frame
    ///
    /// # Errors
    ///
    /// Returns `MalformedEvent` if `frame` is longer than one record.
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        if frame.len() > MAX_EVENT_SIZE {
            return Err(CxlError::MalformedEvent {
                declared: frame.len(),
                available: MAX_EVENT_SIZE,
            });
        }
        let mut event = Self::new();
        event.bytes[..frame.len()].copy_from_slice(frame);
        Ok(event)
    }

    /// Record header
    pub fn header(&self) -> EventHeader {
        bytemuck::pod_read_unaligned(&self.bytes[..HEADER_SIZE])
    }

    /// Event type code
    pub fn event_type(&self) -> u16 {
        self.header().ty
    }

    /// Declared record size
    pub fn size(&self) -> usize {
        usize::from(self.header().size)
    }

    /// The declared frame (header plus payload)
    pub fn frame(&self) -> &[u8] {
        &self.bytes[..self.size().min(MAX_EVENT_SIZE)]
    }

    /// The whole record storage, including bytes past the frame
    pub const fn as_bytes(&self) -> &[u8; MAX_EVENT_SIZE] {
        &self.bytes
    }

    /// Interrupt number, meaningful for [`event_type::AFU_INTERRUPT`]
    pub fn irq(&self) -> u16 {
        self.u16_at(offsets::IRQ)
    }

    /// Decode the tagged union
    pub fn decode(&self) -> Event {
        let header = self.header();
        let process_element = header.process_element;
        match header.ty {
            event_type::AFU_INTERRUPT => Event::AfuInterrupt {
                process_element,
                irq: self.irq(),
            },
            event_type::DATA_STORAGE => Event::DataStorage {
                process_element,
                addr: self.u64_at(offsets::FAULT_ADDR),
                dsisr: self.u64_at(offsets::FAULT_DSISR),
            },
            event_type::AFU_ERROR => Event::AfuError {
                process_element,
                error: self.u64_at(offsets::AFU_ERROR),
            },
            event_type::READ_FAIL => Event::ReadFailed,
            ty => Event::Unknown {
                ty,
                bytes: self.frame().to_vec(),
            },
        }
    }

    /// Overwrite with the diagnostic pattern and the read-failed header
    fn poison(&mut self) {
        for (byte, toxin) in self.bytes.iter_mut().zip(POISON.iter().cycle()) {
            *byte = *toxin;
        }
        let header = EventHeader {
            ty: event_type::READ_FAIL,
            size: 0,
            ..self.header()
        };
        self.bytes[..4].copy_from_slice(&bytemuck::bytes_of(&header)[..4]);
    }

    fn u16_at(&self, offset: usize) -> u16 {
        bytemuck::pod_read_unaligned(&self.bytes[offset..offset + 2])
    }

    fn u64_at(&self, offset: usize) -> u64 {
        bytemuck::pod_read_unaligned(&self.bytes[offset..offset + 8])
    }
}

impl Default for RawEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawEvent")
            .field("header", &self.header())
            .field("frame", &self.frame())
            .finish()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AfuInterrupt { irq, .. } => write!(f, "AFU Interrupt {irq}"),
            Self::DataStorage { addr, .. } => {
                write!(f, "AFU Invalid memory reference: {addr:#x}")
            }
            Self::AfuError { error, .. } => write!(f, "AFU Error: {error:#x}"),
            Self::ReadFailed => write!(f, "Event read failed"),
            Self::Unknown { ty, bytes } => {
                write!(f, "Unknown event {ty} ({} bytes)", bytes.len())
            }
        }
    }
}

/// Read buffer and cursor for one descriptor's events
///
/// The buffer is allocated on the first read and never resized.
/// `start..end` is the unread, filled part; `start <= end <= READ_MIN_SIZE`.
#[derive(Debug, Default)]
pub struct EventChannel {
    buf: Option<Box<[u8]>>,
    start: usize,
    end: usize,
}

impl EventChannel {
    /// Empty channel; no memory is allocated until the first read
    pub const fn new() -> Self {
        Self {
            buf: None,
            start: 0,
            end: 0,
        }
    }

    /// `true` while buffered events remain. Never performs I/O.
    pub const fn pending(&self) -> bool {
        self.start != self.end
    }

    /// Deliver the next event into `event`
    ///
    /// When nothing is buffered, `fill` is called once with the whole
    /// buffer (at least [`READ_MIN_SIZE`] bytes) and must return how many
    /// bytes it wrote, as `read(2)` would.
    ///
    /// On a failed or empty read, `event` is overwritten with the diagnostic
    /// pattern and a read-failed header of size 0.
    ///
    /// # Errors
    ///
    /// - `EventIo` if `fill` failed (the OS error is kept)
    /// - `NoData` if `fill` returned zero bytes
    /// - `MalformedEvent` if a frame's declared size does not fit; the rest
    ///   of that read is discarded
    pub fn read_event<F>(&mut self, fill: F, event: &mut RawEvent) -> Result<()>
    where
        F: FnOnce(&mut [u8]) -> std::io::Result<usize>,
    {
        if !self.pending() {
            let buf = self.buf.get_or_insert_with(|| {
                tracing::trace!("Allocating {READ_MIN_SIZE} byte event buffer");
                vec![0u8; READ_MIN_SIZE].into_boxed_slice()
            });

            let filled = match fill(&mut buf[..]) {
                Ok(0) => {
                    event.poison();
                    return Err(CxlError::NoData);
                }
                Ok(n) => n.min(buf.len()),
                Err(source) => {
                    event.poison();
                    return Err(CxlError::EventIo { source });
                }
            };

            tracing::trace!("Read {filled} bytes of events");
            self.start = 0;
            self.end = filled;
        }

        self.fetch_buffered(event)
    }

    /// Read one event and check it is the one expected
    ///
    /// For [`event_type::AFU_INTERRUPT`], a nonzero `irq` must also match;
    /// `irq == 0` accepts any interrupt.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read_event`]. A well-formed event of the wrong kind is
    /// `Ok(ExpectOutcome::Mismatch)`, not an error.
    pub fn read_expected<F>(
        &mut self,
        fill: F,
        event: &mut RawEvent,
        ty: u16,
        irq: u16,
    ) -> Result<ExpectOutcome>
    where
        F: FnOnce(&mut [u8]) -> std::io::Result<usize>,
    {
        self.read_event(fill, event)?;

        if event.event_type() != ty {
            return Ok(ExpectOutcome::Mismatch);
        }
        if ty == event_type::AFU_INTERRUPT && irq != 0 && event.irq() != irq {
            return Ok(ExpectOutcome::Mismatch);
        }
        Ok(ExpectOutcome::Matched)
    }

    fn fetch_buffered(&mut self, event: &mut RawEvent) -> Result<()> {
        let Some(buf) = self.buf.as_deref() else {
            return Err(CxlError::invalid_state("event buffer not allocated"));
        };

        let available = self.end - self.start;
        let declared = if available >= HEADER_SIZE {
            let header: EventHeader =
                bytemuck::pod_read_unaligned(&buf[self.start..self.start + HEADER_SIZE]);
            usize::from(header.size)
        } else {
            0
        };

        if declared < HEADER_SIZE || declared > available || declared > MAX_EVENT_SIZE {
            tracing::trace!(
                "Dropping {available} buffered event bytes: frame declares {declared} bytes"
            );
            self.start = self.end;
            event.poison();
            return Err(CxlError::MalformedEvent {
                declared,
                available: available.min(MAX_EVENT_SIZE),
            });
        }

        *event = RawEvent::from_frame(&buf[self.start..self.start + declared])?;
        self.start += declared;
        Ok(())
    }
}
