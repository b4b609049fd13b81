//! Problem-state MMIO conventions.

/// Bytes per register unit. Register offsets are expressed in units.
pub const WORD_SIZE: usize = 4;

/// Flag bits accepted when mapping the MMIO area.
pub mod flags {
    /// AFU registers are big-endian.
    pub const BIG_ENDIAN: u32 = 0x1;
    /// AFU registers are little-endian.
    pub const LITTLE_ENDIAN: u32 = 0x2;
    /// AFU registers use host byte order.
    pub const HOST_ENDIAN: u32 = 0x3;
    /// Bits selecting the endian mode.
    pub const ENDIAN_MASK: u32 = 0x3;
    /// Every flag bit the library understands.
    pub const ALL: u32 = ENDIAN_MASK;
}
