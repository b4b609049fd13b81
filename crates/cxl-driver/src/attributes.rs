//! Typed sysfs attribute readers
//!
//! Attributes are small text files. Reading goes straight to the file on
//! every call; nothing is cached.

use crate::error::{CxlError, Result};
use cxl_uapi::sysfs::{adapter_attr, afu_attr};
use std::path::{Path, PathBuf};

/// Programming model an AFU is currently configured for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfuMode {
    /// One context owns the whole AFU
    DedicatedProcess,
    /// Master and slave contexts share the AFU
    AfuDirected,
    /// AFU disabled
    None,
    /// A mode this library does not know about
    Other(String),
}

impl AfuMode {
    /// Parse mode from sysfs string
    pub fn from_sysfs_str(s: &str) -> Self {
        match s.trim() {
            "dedicated_process" => Self::DedicatedProcess,
            "afu_directed" => Self::AfuDirected,
            "none" => Self::None,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Which flash image an adapter booted from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLoaded {
    /// Field-updatable user image
    User,
    /// Factory fallback image
    Factory,
}

/// Attribute directory of one AFU (or one of its views)
#[derive(Debug, Clone)]
pub struct AfuAttributes {
    dir: PathBuf,
}

impl AfuAttributes {
    /// Attributes found under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory the attributes are read from
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Kernel API version
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is missing or not an integer.
    pub fn api_version(&self) -> Result<i64> {
        read_int(&self.dir, afu_attr::API_VERSION)
    }

    /// Oldest API version the kernel remains compatible with
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is missing or not an integer.
    pub fn api_version_compatible(&self) -> Result<i64> {
        read_int(&self.dir, afu_attr::API_VERSION_COMPATIBLE)
    }

    /// Smallest interrupt count a context must request
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is missing or not an integer.
    pub fn irqs_min(&self) -> Result<i64> {
        read_int(&self.dir, afu_attr::IRQS_MIN)
    }

    /// Largest interrupt count a context may request
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is missing or not an integer.
    pub fn irqs_max(&self) -> Result<i64> {
        read_int(&self.dir, afu_attr::IRQS_MAX)
    }

    /// Size of the per-context MMIO area in bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is missing, not an integer or negative.
    pub fn mmio_size(&self) -> Result<usize> {
        let size = read_int(&self.dir, afu_attr::MMIO_SIZE)?;
        usize::try_from(size).map_err(|_| {
            CxlError::attribute(self.dir.join(afu_attr::MMIO_SIZE), format!("size {size}"))
        })
    }

    /// Current programming model
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute cannot be read.
    pub fn mode(&self) -> Result<AfuMode> {
        read_attr(&self.dir, afu_attr::MODE).map(|s| AfuMode::from_sysfs_str(&s))
    }

    /// Device number of a view device
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is missing or not `<major>:<minor>`.
    pub fn dev(&self) -> Result<(u32, u32)> {
        read_dev(&self.dir)
    }
}

/// Attribute directory of one adapter
#[derive(Debug, Clone)]
pub struct AdapterAttributes {
    dir: PathBuf,
}

impl AdapterAttributes {
    /// Attributes found under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// CAIA architecture version as `(major, minor)`
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is missing or not `<major>.<minor>`.
    pub fn caia_version(&self) -> Result<(u32, u32)> {
        let path = self.dir.join(adapter_attr::CAIA_VERSION);
        let text = read_attr(&self.dir, adapter_attr::CAIA_VERSION)?;
        parse_pair(&text, '.').ok_or_else(|| CxlError::attribute(path, format!("{text:?}")))
    }

    /// PSL revision
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is missing or not an integer.
    pub fn psl_revision(&self) -> Result<i64> {
        read_int(&self.dir, adapter_attr::PSL_REVISION)
    }

    /// Base image revision
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is missing or not an integer.
    pub fn base_image(&self) -> Result<i64> {
        read_int(&self.dir, adapter_attr::BASE_IMAGE)
    }

    /// Which flash image is loaded
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is missing or holds an unknown value.
    pub fn image_loaded(&self) -> Result<ImageLoaded> {
        let text = read_attr(&self.dir, adapter_attr::IMAGE_LOADED)?;
        match text.as_str() {
            "user" => Ok(ImageLoaded::User),
            "factory" => Ok(ImageLoaded::Factory),
            other => Err(CxlError::attribute(
                self.dir.join(adapter_attr::IMAGE_LOADED),
                format!("unknown image {other:?}"),
            )),
        }
    }
}

/// Read an attribute as trimmed text
pub(crate) fn read_attr(dir: &Path, name: &str) -> Result<String> {
    let path = dir.join(name);
    std::fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| CxlError::resource(format!("Cannot read {}", path.display()), e))
}

/// Read a decimal (or `0x` hexadecimal) attribute
pub(crate) fn read_int(dir: &Path, name: &str) -> Result<i64> {
    let text = read_attr(dir, name)?;
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| CxlError::attribute(dir.join(name), format!("{text:?}: {e}")))
}

/// Read a `dev` attribute (`<major>:<minor>`)
pub(crate) fn read_dev(dir: &Path) -> Result<(u32, u32)> {
    let text = read_attr(dir, afu_attr::DEV)?;
    parse_pair(&text, ':')
        .ok_or_else(|| CxlError::attribute(dir.join(afu_attr::DEV), format!("{text:?}")))
}

fn parse_pair(text: &str, sep: char) -> Option<(u32, u32)> {
    let (a, b) = text.split_once(sep)?;
    Some((a.parse().ok()?, b.parse().ok()?))
}
