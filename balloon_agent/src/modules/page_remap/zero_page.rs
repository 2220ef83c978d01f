/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{
    fs::{remove_file, File},
    io::Write,
    os::{
        fd::{AsRawFd, RawFd},
        unix::fs::OpenOptionsExt,
    },
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::debug;

/// Distinguishes stores created by the same process
static STORE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A single page of zeros inside an already unlinked file.
///
/// Released balloon pages are all mapped against this one page.
/// The file has no name anymore, so it is gone as soon as the process exits.
pub struct ZeroPageStore {
    /// underlying file, only reachable through its descriptor
    file: File,

    /// size of the zero filled content
    size: usize,
}

impl ZeroPageStore {
    /// Creates, unlinks and zero fills a new store inside of `dir`
    pub fn create(dir: &Path, page_size: usize) -> std::io::Result<Self> {
        let path = dir.join(format!(
            "balloon{:x}-{}",
            std::process::id(),
            STORE_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));

        let mut file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;

        // the open descriptor keeps the data alive
        remove_file(&path)?;

        // write actual zeros instead of just setting the length,
        // so every page in is backed by real file content
        file.write_all(&vec![0u8; page_size])?;
        file.flush()?;

        debug!(
            "Created, unlinked and filled backing page file {} ({} bytes)",
            path.display(),
            page_size
        );

        Ok(Self {
            file,
            size: page_size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Reads the current content without touching the file offset
    #[cfg(test)]
    pub(crate) fn read_content(&self) -> std::io::Result<Vec<u8>> {
        use std::os::unix::fs::FileExt;

        let mut content = vec![0u8; self.size];
        self.file.read_exact_at(&mut content, 0)?;
        Ok(content)
    }
}

impl AsRawFd for ZeroPageStore {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
