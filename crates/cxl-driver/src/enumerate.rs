//! Adapter and AFU enumeration
//!
//! Walks `/sys/class/cxl`: adapters are `card<N>` entries of the class
//! directory, AFUs are `afu<N>.<M>` entries inside an adapter. Cursors are
//! plain iterators of `Result`s. End of sequence is `None`; a listing
//! failure is yielded once, after which the cursor releases its directory
//! handle and stays exhausted.

use crate::attributes::{AdapterAttributes, AfuAttributes};
use crate::device::DeviceNode;
use crate::error::{CxlError, Result};
use crate::handle::{open_sibling, AfuHandle, View};
use crate::layout::SysfsLayout;
use cxl_uapi::sysfs::{is_adapter_name, is_afu_name};
use std::fs::ReadDir;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};

/// An open directory listing filtered by a name matcher
#[derive(Debug)]
struct Listing {
    dir: PathBuf,
    entries: Option<ReadDir>,
    matches: fn(&str) -> bool,
}

impl Listing {
    fn open(dir: PathBuf, matches: fn(&str) -> bool) -> Result<Self> {
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| CxlError::resource(format!("Cannot open {}", dir.display()), e))?;
        Ok(Self {
            dir,
            entries: Some(entries),
            matches,
        })
    }

    fn next_name(&mut self) -> Option<Result<String>> {
        let entries = self.entries.as_mut()?;
        let matches = self.matches;

        let outcome = loop {
            match entries.next() {
                None => break None,
                Some(Err(e)) => break Some(Err(e)),
                Some(Ok(entry)) => {
                    let name = entry.file_name();
                    if let Some(name) = name.to_str().filter(|n| matches(n)) {
                        break Some(Ok(name.to_owned()));
                    }
                }
            }
        };

        match outcome {
            Some(Ok(name)) => Some(Ok(name)),
            Some(Err(e)) => {
                self.entries = None;
                Some(Err(CxlError::resource(
                    format!("Cannot list {}", self.dir.display()),
                    e,
                )))
            }
            None => {
                self.entries = None;
                None
            }
        }
    }
}

/// A CAPI adapter (`card<N>`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    name: String,
    path: PathBuf,
    layout: SysfsLayout,
}

impl Adapter {
    /// Adapter name (`card0`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sysfs directory of the adapter
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Typed sysfs attributes of the adapter
    pub fn attributes(&self) -> AdapterAttributes {
        AdapterAttributes::new(&self.path)
    }

    /// AFUs of this adapter
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` if the adapter directory cannot be opened.
    pub fn afus(&self) -> Result<AfuCursor> {
        AfuCursor::open(self)
    }
}

/// An accelerator function unit (`afu<N>.<M>`) of an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Afu {
    name: String,
    adapter: String,
    path: PathBuf,
    layout: SysfsLayout,
}

impl Afu {
    /// AFU name without a view suffix (`afu0.0`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning adapter
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    /// Sysfs directory of the AFU under its adapter
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Typed sysfs attributes of the AFU
    pub fn attributes(&self) -> AfuAttributes {
        AfuAttributes::new(&self.path)
    }

    /// Open this AFU in the given view
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if the AFU has no such view, otherwise the
    /// errors of [`AfuHandle::open`].
    pub fn open(&self, view: View) -> Result<AfuHandle<DeviceNode>> {
        open_sibling(&self.layout, &self.name, view)
    }
}

/// Iterator over the adapters of the class directory, in directory order
#[derive(Debug)]
pub struct AdapterCursor {
    listing: Listing,
    layout: SysfsLayout,
    current: Option<Adapter>,
}

impl AdapterCursor {
    /// Start enumerating adapters
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` if the class directory is missing or
    /// unreadable.
    pub fn open() -> Result<Self> {
        Self::open_in(&SysfsLayout::from_env())
    }

    /// [`Self::open`] with an explicit directory layout
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_in(layout: &SysfsLayout) -> Result<Self> {
        let listing = Listing::open(layout.class_dir.clone(), is_adapter_name)?;
        Ok(Self {
            listing,
            layout: layout.clone(),
            current: None,
        })
    }

    /// Adapter returned last
    pub const fn current(&self) -> Option<&Adapter> {
        self.current.as_ref()
    }
}

impl Iterator for AdapterCursor {
    type Item = Result<Adapter>;

    fn next(&mut self) -> Option<Self::Item> {
        let name = match self.listing.next_name()? {
            Ok(name) => name,
            Err(e) => {
                self.current = None;
                return Some(Err(e));
            }
        };

        let adapter = Adapter {
            path: self.layout.class_dir.join(&name),
            name,
            layout: self.layout.clone(),
        };
        tracing::trace!("Found adapter {}", adapter.name);

        self.current = Some(adapter.clone());
        Some(Ok(adapter))
    }
}

impl FusedIterator for AdapterCursor {}

/// Iterator over the AFUs of one adapter, in directory order
#[derive(Debug)]
pub struct AfuCursor {
    listing: Listing,
    adapter: Adapter,
    current: Option<Afu>,
}

impl AfuCursor {
    /// Start enumerating the AFUs of `adapter`
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` if the adapter directory cannot be opened.
    pub fn open(adapter: &Adapter) -> Result<Self> {
        let listing = Listing::open(adapter.path.clone(), is_afu_name)?;
        Ok(Self {
            listing,
            adapter: adapter.clone(),
            current: None,
        })
    }

    /// Adapter being enumerated
    pub const fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// AFU returned last
    pub const fn current(&self) -> Option<&Afu> {
        self.current.as_ref()
    }
}

impl Iterator for AfuCursor {
    type Item = Result<Afu>;

    fn next(&mut self) -> Option<Self::Item> {
        let name = match self.listing.next_name()? {
            Ok(name) => name,
            Err(e) => {
                self.current = None;
                return Some(Err(e));
            }
        };

        let afu = Afu {
            path: self.adapter.path.join(&name),
            name,
            adapter: self.adapter.name.clone(),
            layout: self.adapter.layout.clone(),
        };
        tracing::trace!("Found {} on {}", afu.name, afu.adapter);

        self.current = Some(afu.clone());
        Some(Ok(afu))
    }
}

impl FusedIterator for AfuCursor {}

/// Every AFU of every adapter, adapter by adapter
#[derive(Debug)]
pub struct AllAfus {
    adapters: Option<AdapterCursor>,
    afus: Option<AfuCursor>,
}

impl AllAfus {
    /// Start enumerating all AFUs
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` if the class directory cannot be opened.
    pub fn open() -> Result<Self> {
        Self::open_in(&SysfsLayout::from_env())
    }

    /// [`Self::open`] with an explicit directory layout
    ///
    /// # Errors
    ///
    /// See [`Self::open`].
    pub fn open_in(layout: &SysfsLayout) -> Result<Self> {
        Ok(Self {
            adapters: Some(AdapterCursor::open_in(layout)?),
            afus: None,
        })
    }

    /// AFU returned last
    pub fn current(&self) -> Option<&Afu> {
        self.afus.as_ref().and_then(AfuCursor::current)
    }

    fn finish(&mut self, err: CxlError) -> Option<Result<Afu>> {
        self.adapters = None;
        self.afus = None;
        Some(Err(err))
    }
}

impl Iterator for AllAfus {
    type Item = Result<Afu>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(afus) = self.afus.as_mut() {
                match afus.next() {
                    Some(Ok(afu)) => return Some(Ok(afu)),
                    Some(Err(e)) => return self.finish(e),
                    None => {}
                }
            }

            let adapter = match self.adapters.as_mut()?.next() {
                Some(Ok(adapter)) => adapter,
                Some(Err(e)) => return self.finish(e),
                None => {
                    self.adapters = None;
                    self.afus = None;
                    return None;
                }
            };

            match AfuCursor::open(&adapter) {
                Ok(cursor) => self.afus = Some(cursor),
                Err(e) => return self.finish(e),
            }
        }
    }
}

impl FusedIterator for AllAfus {}

/// Enumerate adapters using the environment's layout
///
/// # Errors
///
/// See [`AdapterCursor::open`].
pub fn adapters() -> Result<AdapterCursor> {
    AdapterCursor::open()
}

/// Enumerate every AFU using the environment's layout
///
/// # Errors
///
/// See [`AllAfus::open`].
pub fn afus() -> Result<AllAfus> {
    AllAfus::open()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn class_tree(entries: &[&str]) -> (TempDir, SysfsLayout) {
        let root = TempDir::new().unwrap();
        let layout = SysfsLayout::rooted_at(root.path());
        std::fs::create_dir_all(&layout.class_dir).unwrap();
        for entry in entries {
            std::fs::create_dir_all(layout.class_dir.join(entry)).unwrap();
        }
        (root, layout)
    }

    /// Names under `dir` that `matches` accepts, in the order the filesystem lists them
    fn listed(dir: &Path, matches: fn(&str) -> bool) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| matches(n))
            .collect()
    }

    #[test]
    fn test_adapters_are_filtered_in_directory_order() {
        let (_root, layout) = class_tree(&["card0", "card3", "other", "afu0.0d"]);

        let names: Vec<String> = AdapterCursor::open_in(&layout)
            .unwrap()
            .map(|a| a.unwrap().name().to_string())
            .collect();

        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, ["card0", "card3"]);
        assert_eq!(names, listed(&layout.class_dir, is_adapter_name));
    }

    #[test]
    fn test_afus_of_adapter() {
        let (_root, layout) =
            class_tree(&["card0/afu0.0", "card0/afu0.1", "card0/notanafu", "card0/afu0.1m"]);

        let adapter = AdapterCursor::open_in(&layout)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let mut cursor = adapter.afus().unwrap();
        assert!(cursor.current().is_none());

        let mut names = Vec::new();
        while let Some(afu) = cursor.next() {
            let afu = afu.unwrap();
            assert_eq!(afu.adapter(), "card0");
            assert_eq!(afu.path(), layout.class_dir.join("card0").join(afu.name()));
            assert_eq!(cursor.current(), Some(&afu));
            names.push(afu.name().to_string());
        }

        names.sort();
        assert_eq!(names, ["afu0.0", "afu0.1"]);
    }

    #[test]
    fn test_empty_directory_is_clean_end() {
        let (_root, layout) = class_tree(&[]);
        let mut cursor = AdapterCursor::open_in(&layout).unwrap();
        assert!(cursor.next().is_none());
        assert!(cursor.next().is_none());

        let mut all = AllAfus::open_in(&layout).unwrap();
        assert!(all.next().is_none());
    }

    #[test]
    fn test_missing_root_is_resource_error() {
        let root = TempDir::new().unwrap();
        let layout = SysfsLayout::rooted_at(root.path());

        let err = AdapterCursor::open_in(&layout).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        assert!(matches!(
            AllAfus::open_in(&layout),
            Err(CxlError::ResourceUnavailable { .. })
        ));
    }

    #[test]
    fn test_composite_flattens_adapters() {
        let (_root, layout) = class_tree(&[
            "card0/afu0.0",
            "card0/afu0.1",
            "card1",
            "card2/afu2.0",
            "unrelated/afu9.9",
        ]);

        let mut found: Vec<(String, String)> = AllAfus::open_in(&layout)
            .unwrap()
            .map(|afu| {
                let afu = afu.unwrap();
                (afu.adapter().to_string(), afu.name().to_string())
            })
            .collect();
        found.sort();

        assert_eq!(
            found,
            [
                ("card0".to_string(), "afu0.0".to_string()),
                ("card0".to_string(), "afu0.1".to_string()),
                ("card2".to_string(), "afu2.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_composite_stops_on_unreadable_adapter() {
        // An adapter entry that is a file cannot be listed
        let (_root, layout) = class_tree(&[]);
        std::fs::write(layout.class_dir.join("card0"), b"").unwrap();

        let mut all = AllAfus::open_in(&layout).unwrap();
        assert!(matches!(
            all.next(),
            Some(Err(CxlError::ResourceUnavailable { .. }))
        ));
        assert!(all.next().is_none());
        assert!(all.current().is_none());
    }
}
