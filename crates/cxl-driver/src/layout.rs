//! Where the driver's directories live
//!
//! The kernel fixes these paths, but containers and test rigs relocate them,
//! so every lookup goes through a [`SysfsLayout`]. Overrides come from the
//! environment:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CXL_SYSFS_CLASS` | `/sys/class/cxl` |
//! | `CXL_DEV_DIR` | `/dev/cxl` |
//! | `CXL_SYSFS_DEV_CHAR` | `/sys/dev/char` |

use cxl_uapi::sysfs::{DEV_DIR, SYSFS_CLASS, SYSFS_DEV_CHAR};
use std::path::{Path, PathBuf};

/// Environment override for the class directory
pub const ENV_SYSFS_CLASS: &str = "CXL_SYSFS_CLASS";
/// Environment override for the device node directory
pub const ENV_DEV_DIR: &str = "CXL_DEV_DIR";
/// Environment override for the device-number mirror tree
pub const ENV_SYSFS_DEV_CHAR: &str = "CXL_SYSFS_DEV_CHAR";

/// Locations of the adapter listing, device nodes and device-number mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsLayout {
    /// Adapter and view listing (`/sys/class/cxl`)
    pub class_dir: PathBuf,
    /// Character device nodes (`/dev/cxl`)
    pub dev_dir: PathBuf,
    /// `<major>:<minor>` mirror (`/sys/dev/char`)
    pub dev_char_dir: PathBuf,
}

impl Default for SysfsLayout {
    fn default() -> Self {
        Self {
            class_dir: PathBuf::from(SYSFS_CLASS),
            dev_dir: PathBuf::from(DEV_DIR),
            dev_char_dir: PathBuf::from(SYSFS_DEV_CHAR),
        }
    }
}

impl SysfsLayout {
    /// Kernel defaults, with any environment overrides applied
    pub fn from_env() -> Self {
        let mut layout = Self::default();

        if let Some(dir) = std::env::var_os(ENV_SYSFS_CLASS) {
            layout.class_dir = PathBuf::from(dir);
        }
        if let Some(dir) = std::env::var_os(ENV_DEV_DIR) {
            layout.dev_dir = PathBuf::from(dir);
        }
        if let Some(dir) = std::env::var_os(ENV_SYSFS_DEV_CHAR) {
            layout.dev_char_dir = PathBuf::from(dir);
        }

        if layout != Self::default() {
            tracing::debug!("Using relocated cxl layout: {layout:?}");
        }

        layout
    }

    /// Layout rooted somewhere other than `/`, keeping the kernel's relative paths
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let rebase = |abs: &str| root.join(abs.trim_start_matches('/'));

        Self {
            class_dir: rebase(SYSFS_CLASS),
            dev_dir: rebase(DEV_DIR),
            dev_char_dir: rebase(SYSFS_DEV_CHAR),
        }
    }

    /// Mirror directory for a device number
    pub fn dev_char_path(&self, major: u32, minor: u32) -> PathBuf {
        self.dev_char_dir.join(format!("{major}:{minor}"))
    }
}
