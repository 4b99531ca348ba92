//! ZIP archive resolution.
//!
//! Entries are classified by name only; bytes are read for the single entry
//! that gets selected, so the rest of the archive is never inflated.

use std::cell::RefCell;
use std::io::{Cursor, Read, Seek};

use log::debug;
use zip::ZipArchive;

use super::{classify_at, Dispatch, FileFormat};
use crate::error::LoadError;

/// Directory written by macOS archivers; its entries shadow real files.
const METADATA_DIR: &str = "__MACOSX/";

/// How many archives may be nested inside one another.
pub const MAX_ARCHIVE_DEPTH: usize = 4;

/// A loadable-looking archive member, with a deferred reader.
pub struct ArchiveEntry<'a, R> {
    path: String,
    index: usize,
    archive: &'a RefCell<ZipArchive<R>>,
}

impl<R: Read + Seek> ArchiveEntry<'_, R> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Inflate this member.
    pub fn read(&self) -> Result<Vec<u8>, LoadError> {
        let mut archive = self.archive.borrow_mut();
        let mut file = archive
            .by_index(self.index)
            .map_err(|e| archive_error(&self.path, e))?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data).map_err(|e| LoadError::Archive {
            name: self.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(data)
    }
}

/// List the members of `archive` that name a loadable format.
pub fn loadable_entries<'a, R: Read + Seek>(
    name: &str,
    archive: &'a RefCell<ZipArchive<R>>,
) -> Result<Vec<ArchiveEntry<'a, R>>, LoadError> {
    let count = archive.borrow().len();
    let mut entries = Vec::new();
    for index in 0..count {
        let mut zip = archive.borrow_mut();
        let file = zip.by_index_raw(index).map_err(|e| archive_error(name, e))?;
        if file.is_dir() || file.name().starts_with(METADATA_DIR) {
            continue;
        }
        if FileFormat::from_name(file.name()).is_some() {
            entries.push(ArchiveEntry {
                path: file.name().to_string(),
                index,
                archive,
            });
        }
    }
    Ok(entries)
}

/// Resolve a ZIP archive to the dispatch of its single loadable member.
pub(crate) fn resolve(name: &str, data: &[u8], depth: usize) -> Result<Dispatch, LoadError> {
    if depth >= MAX_ARCHIVE_DEPTH {
        return Err(LoadError::ArchiveTooDeep(name.to_string()));
    }
    let archive = ZipArchive::new(Cursor::new(data)).map_err(|e| archive_error(name, e))?;
    let archive = RefCell::new(archive);
    let mut entries = loadable_entries(name, &archive)?;

    match entries.len() {
        0 => Err(LoadError::NoLoadableFile(name.to_string())),
        1 => {
            let entry = entries.remove(0);
            debug!("archive {} resolved to {}", name, entry.path());
            let bytes = entry.read()?;
            classify_at(entry.path(), bytes, depth + 1)
        }
        _ => Err(LoadError::AmbiguousArchive {
            archive: name.to_string(),
            candidates: entries.iter().map(|e| e.path().to_string()).collect(),
        }),
    }
}

fn archive_error(name: &str, err: zip::result::ZipError) -> LoadError {
    LoadError::Archive {
        name: name.to_string(),
        reason: err.to_string(),
    }
}
