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

mod mmap;
mod zero_page;

use core::fmt;

pub use mmap::MmapPageRemapModule;
pub use zero_page::ZeroPageStore;

/// A module that swaps the physical backing of single pages in place
/// (e.g. through `mmap` with `MAP_FIXED`).
///
/// The virtual address of a page and its read/write permissions never change,
/// only what the page is backed by.
pub trait PageRemapModule: Send + Sync + Sized + 'static {
    /// Creates the module once the runtime is initialized.
    fn init() -> std::io::Result<Self>;

    /// Size in bytes of a single page.
    /// This should be the same value on every call or things might break.
    fn page_size(&self) -> usize;

    /// Backs the page starting at `page` with shared, zero filled memory,
    /// so the physical page can be reused by the operating system.
    ///
    /// ### Safety
    ///
    /// `page` has to be page aligned and the page has to be mapped and owned by the caller.
    /// Its previous content is lost.
    unsafe fn release_page(&self, page: *mut u8) -> Result<(), RemapFailure>;

    /// Backs the page starting at `page` with fresh private memory
    /// that is zero filled on first access.
    ///
    /// ### Safety
    ///
    /// Same requirements as for `release_page`.
    unsafe fn restore_page(&self, page: *mut u8) -> Result<(), RemapFailure>;
}

/// Why a single page could not be remapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapFailure {
    /// The map call failed with `errno`
    Map { errno: i32 },

    /// The page was mapped, but not at the requested address
    Displaced { actual: usize },
}

impl fmt::Display for RemapFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemapFailure::Map { errno } => write!(f, "map failed with errno={}", errno),
            RemapFailure::Displaced { actual } => write!(f, "page was mapped at {:#x} instead", actual),
        }
    }
}
