//! Integration tests against a synthetic sysfs/dev tree
//!
//! `/dev/null` and `/dev/zero` stand in for AFU character devices. The class
//! directory, device-number mirror and `/dev/cxl` symlinks are built in a
//! tempdir and selected through `SysfsLayout::rooted_at`.

use cxl_driver::uapi::event_type;
use cxl_driver::{
    AdapterCursor, AfuHandle, AfuMode, AllAfus, CxlError, RawEvent, SysfsLayout, View,
};
use std::os::fd::OwnedFd;
use std::os::unix::fs::{symlink, FileTypeExt, MetadataExt};
use std::path::PathBuf;
use tempfile::TempDir;

const NULL: &str = "/dev/null";
const ZERO: &str = "/dev/zero";

/// The stand-in devices must exist; a host without them fails loudly
fn require_char_devices() {
    for dev in [NULL, ZERO] {
        let metadata = std::fs::metadata(dev)
            .unwrap_or_else(|e| panic!("{dev} is needed as a stand-in AFU device: {e}"));
        assert!(
            metadata.file_type().is_char_device(),
            "{dev} is not a character device"
        );
    }
}

fn dev_number(path: &str) -> (u32, u32) {
    let rdev = std::fs::metadata(path).unwrap().rdev();
    (rustix::fs::major(rdev), rustix::fs::minor(rdev))
}

struct Tree {
    _root: TempDir,
    layout: SysfsLayout,
}

impl Tree {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let layout = SysfsLayout::rooted_at(root.path());
        for dir in [&layout.class_dir, &layout.dev_dir, &layout.dev_char_dir] {
            std::fs::create_dir_all(dir).unwrap();
        }
        Self {
            _root: root,
            layout,
        }
    }

    /// `card<N>/afu<N>.<M>` with `mode`, plus view `view_name` backed by `target`
    fn add_view(&self, view_name: &str, target: &str, api_version_compatible: i64) -> PathBuf {
        let (major, minor) = dev_number(target);

        let class_entry = self.layout.class_dir.join(view_name);
        std::fs::create_dir_all(&class_entry).unwrap();
        std::fs::write(class_entry.join("dev"), format!("{major}:{minor}\n")).unwrap();

        let mirror = self.layout.dev_char_path(major, minor);
        std::fs::create_dir_all(&mirror).unwrap();
        std::fs::write(
            mirror.join("api_version_compatible"),
            format!("{api_version_compatible}\n"),
        )
        .unwrap();
        std::fs::write(mirror.join("mmio_size"), "4096\n").unwrap();

        let node = self.layout.dev_dir.join(view_name);
        symlink(target, &node).unwrap();
        node
    }

    fn add_afu(&self, adapter: &str, afu: &str, mode: &str) {
        let dir = self.layout.class_dir.join(adapter).join(afu);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("mode"), format!("{mode}\n")).unwrap();
    }
}

#[test]
fn test_open_resolves_paths_and_capability() {
    require_char_devices();
    let tree = Tree::new();
    let node = tree.add_view("afu0.0d", NULL, 1);
    let (major, minor) = dev_number(NULL);

    let handle = AfuHandle::open_in(&tree.layout, &node).unwrap();
    assert_eq!(handle.dev_name(), "afu0.0d");
    assert_eq!(handle.dir_path(), tree.layout.dev_dir);
    assert_eq!(handle.sysfs_path(), tree.layout.dev_char_path(major, minor));
    assert!(!handle.is_attached());
    assert!(handle.as_raw_fd() >= 0);
    assert_eq!(handle.attributes().mmio_size().unwrap(), 4096);

    handle.close().unwrap();
}

#[test]
fn test_newer_kernel_api_is_rejected() {
    require_char_devices();
    let tree = Tree::new();
    let node = tree.add_view("afu0.0d", NULL, 2);

    match AfuHandle::open_in(&tree.layout, &node) {
        Err(CxlError::ProtocolIncompatible {
            reported,
            supported,
        }) => {
            assert_eq!(reported, 2);
            assert_eq!(supported, 1);
        }
        other => panic!("expected ProtocolIncompatible, got {other:?}"),
    }
}

#[test]
fn test_regular_file_is_not_a_device() {
    let tree = Tree::new();
    let path = tree.layout.dev_dir.join("afu0.0d");
    std::fs::write(&path, b"").unwrap();

    assert!(matches!(
        AfuHandle::open_in(&tree.layout, &path),
        Err(CxlError::NotCharDevice { .. })
    ));
}

#[test]
fn test_missing_node_keeps_os_error() {
    let tree = Tree::new();
    let err = AfuHandle::open_in(&tree.layout, tree.layout.dev_dir.join("afu9.9d")).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
}

#[test]
fn test_open_view_finds_sibling() {
    require_char_devices();
    let tree = Tree::new();
    let dedicated = tree.add_view("afu0.0d", NULL, 1);
    tree.add_view("afu0.0m", ZERO, 1);

    let handle = AfuHandle::open_in(&tree.layout, &dedicated).unwrap();
    let master = handle.open_view(View::Master).unwrap();
    assert_eq!(master.dev_name(), "afu0.0m");

    assert!(matches!(
        master.open_view(View::Slave),
        Err(CxlError::DeviceNotFound { .. })
    ));
}

#[test]
fn test_adopt_descriptor() {
    require_char_devices();
    let tree = Tree::new();
    tree.add_view("afu0.0d", NULL, 1);
    tree.add_view("afu0.0m", ZERO, 1);

    let fd: OwnedFd = std::fs::File::open(ZERO).unwrap().into();
    let handle = AfuHandle::from_fd_in(&tree.layout, fd).unwrap();
    assert_eq!(handle.dev_name(), "afu0.0m");
    assert_eq!(handle.dir_path(), tree.layout.dev_dir);
}

#[test]
fn test_adopt_unknown_descriptor() {
    require_char_devices();
    let tree = Tree::new();
    tree.add_view("afu0.0d", NULL, 1);

    let fd: OwnedFd = std::fs::File::open(ZERO).unwrap().into();
    assert!(matches!(
        AfuHandle::from_fd_in(&tree.layout, fd),
        Err(CxlError::DeviceNotFound { .. })
    ));
}

#[test]
fn test_attach_failure_keeps_errno_and_blocks_map() {
    require_char_devices();
    let tree = Tree::new();
    let node = tree.add_view("afu0.0d", NULL, 1);
    let mut handle = AfuHandle::open_in(&tree.layout, &node).unwrap();

    // /dev/null does not implement the cxl ioctls
    let err = handle.attach(0).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::ENOTTY));
    assert!(!handle.is_attached());

    assert!(matches!(handle.map(0), Err(CxlError::DeviceNotReady { .. })));
    assert!(matches!(handle.read64(0), Err(CxlError::DeviceNotReady { .. })));
}

#[test]
fn test_empty_read_poisons_event() {
    require_char_devices();
    let tree = Tree::new();
    let node = tree.add_view("afu0.0d", NULL, 1);
    let mut handle = AfuHandle::open_in(&tree.layout, &node).unwrap();

    let mut event = RawEvent::new();
    assert!(matches!(handle.read_event(&mut event), Err(CxlError::NoData)));
    assert_eq!(event.event_type(), event_type::READ_FAIL);
    assert_eq!(event.size(), 0);
    assert_eq!(&event.as_bytes()[8..12], &[0xDE, 0xAD, 0xBE, 0xEF]);
    assert!(!handle.pending_event());
}

#[test]
fn test_enumerate_then_open() {
    require_char_devices();
    let tree = Tree::new();
    tree.add_afu("card0", "afu0.0", "dedicated_process");
    tree.add_view("afu0.0d", NULL, 1);
    std::fs::create_dir_all(tree.layout.class_dir.join("card1")).unwrap();

    let adapters: Vec<String> = AdapterCursor::open_in(&tree.layout)
        .unwrap()
        .map(|a| a.unwrap().name().to_string())
        .collect::<Vec<_>>();
    assert_eq!(adapters.len(), 2);

    let afus: Vec<_> = AllAfus::open_in(&tree.layout)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(afus.len(), 1);

    let afu = &afus[0];
    assert_eq!(afu.adapter(), "card0");
    assert_eq!(afu.attributes().mode().unwrap(), AfuMode::DedicatedProcess);

    let handle = afu.open(View::Dedicated).unwrap();
    assert_eq!(handle.dev_name(), "afu0.0d");
    assert!(matches!(
        afu.open(View::Master),
        Err(CxlError::DeviceNotFound { .. })
    ));
}
