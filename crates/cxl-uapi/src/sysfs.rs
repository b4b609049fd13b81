//! Directory conventions of the cxl driver.
//!
//! ```text
//! /sys/class/cxl/
//! ├── card0/                 adapter
//! │   ├── afu0.0/            AFU (belongs to card0)
//! │   ├── psl_revision
//! │   └── ...
//! ├── afu0.0d/dev            "243:0"   dedicated view
//! ├── afu0.0m/dev            "243:1"   master view
//! └── afu0.0s/dev            "243:2"   slave view
//!
//! /dev/cxl/afu0.0d  afu0.0m  afu0.0s   character devices
//! /sys/dev/char/243:0 -> ...           device-number mirror
//! ```

/// Class directory listing adapters and view devices.
pub const SYSFS_CLASS: &str = "/sys/class/cxl";

/// Directory holding the character device nodes.
pub const DEV_DIR: &str = "/dev/cxl";

/// Device-number mirror tree (`<major>:<minor>` entries).
pub const SYSFS_DEV_CHAR: &str = "/sys/dev/char";

/// Prefix of adapter directory names (`card<N>`).
pub const ADAPTER_PREFIX: &str = "card";

/// Prefix of AFU directory names (`afu<N>.<M>`).
pub const AFU_PREFIX: &str = "afu";

/// Suffix selecting the dedicated-process view.
pub const VIEW_SUFFIX_DEDICATED: char = 'd';
/// Suffix selecting the AFU-directed master view.
pub const VIEW_SUFFIX_MASTER: char = 'm';
/// Suffix selecting the AFU-directed slave view.
pub const VIEW_SUFFIX_SLAVE: char = 's';

/// AFU attribute names.
pub mod afu_attr {
    /// Kernel API version.
    pub const API_VERSION: &str = "api_version";
    /// Oldest API version the kernel remains compatible with.
    pub const API_VERSION_COMPATIBLE: &str = "api_version_compatible";
    /// Largest interrupt count a context may request.
    pub const IRQS_MAX: &str = "irqs_max";
    /// Smallest interrupt count a context must request.
    pub const IRQS_MIN: &str = "irqs_min";
    /// Size in bytes of the per-context problem-state MMIO area.
    pub const MMIO_SIZE: &str = "mmio_size";
    /// Current programming model.
    pub const MODE: &str = "mode";
    /// `<major>:<minor>` of a view device.
    pub const DEV: &str = "dev";
}

/// Adapter attribute names.
pub mod adapter_attr {
    /// CAIA architecture version (`<major>.<minor>`).
    pub const CAIA_VERSION: &str = "caia_version";
    /// PSL revision.
    pub const PSL_REVISION: &str = "psl_revision";
    /// Base image revision.
    pub const BASE_IMAGE: &str = "base_image";
    /// Which flash image is loaded (`user` / `factory`).
    pub const IMAGE_LOADED: &str = "image_loaded";
}

/// `true` for names of the form `card<digits>`.
#[must_use]
pub fn is_adapter_name(name: &str) -> bool {
    name.strip_prefix(ADAPTER_PREFIX).is_some_and(is_decimal)
}

/// `true` for names of the form `afu<digits>.<digits>`.
#[must_use]
pub fn is_afu_name(name: &str) -> bool {
    name.strip_prefix(AFU_PREFIX)
        .and_then(|rest| rest.split_once('.'))
        .is_some_and(|(card, slice)| is_decimal(card) && is_decimal(slice))
}

/// Strip a trailing view suffix from a device name, if it carries one.
///
/// `afu0.0m` becomes `afu0.0`; `afu0.0` is returned unchanged.
#[must_use]
pub fn afu_base_name(name: &str) -> &str {
    match name.char_indices().last() {
        Some((idx, VIEW_SUFFIX_DEDICATED | VIEW_SUFFIX_MASTER | VIEW_SUFFIX_SLAVE))
            if is_afu_name(&name[..idx]) =>
        {
            &name[..idx]
        }
        _ => name,
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
