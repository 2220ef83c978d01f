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

use log::{error, trace};

use crate::{
    modules::page_remap::{PageRemapModule, RemapFailure},
    util::{round_down_to_nearest, round_up_to_nearest},
};

/// Byte range of a balloon as it is laid out in memory right now.
///
/// `[base_address, base_address + size_bytes)` is the whole object,
/// its array data starts at `base_address + data_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BalloonRegion {
    pub(crate) base_address: usize,
    pub(crate) data_offset: usize,
    pub(crate) size_bytes: usize,
}

/// Pages that lie completely inside of a balloons data area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageRange {
    pub(crate) start: usize,
    pub(crate) page_count: usize,
}

impl PageRange {
    pub(crate) fn pages(&self, page_size: usize) -> impl Iterator<Item = usize> {
        let start = self.start;
        (0..self.page_count).map(move |i| start + i * page_size)
    }
}

impl BalloonRegion {
    /// Partial pages at the start or the end belong to someone else
    /// and are never part of the returned range.
    pub(crate) fn aligned_pages(&self, page_size: usize) -> PageRange {
        let data_start = self.base_address + self.data_offset;
        let data_end = self.base_address + self.size_bytes;

        let start = round_up_to_nearest(data_start, page_size);
        let end = round_down_to_nearest(data_end, page_size);

        PageRange {
            start,
            page_count: end.saturating_sub(start) / page_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemapKind {
    Release,
    Restore,
}

/// Maps every whole page of `region` against the shared zero page.
///
/// Aborts the process if a single page cannot be remapped.
///
/// ### Safety
///
/// `region` has to describe the current location of a live object whose pages
/// nobody else remaps concurrently.
pub(crate) unsafe fn release_region<R: PageRemapModule>(remapper: &R, region: &BalloonRegion) {
    remap_region(remapper, region, RemapKind::Release);
}

/// Maps every whole page of `region` against fresh private memory.
///
/// Aborts the process if a single page cannot be remapped.
///
/// ### Safety
///
/// Same requirements as for `release_region`.
pub(crate) unsafe fn restore_region<R: PageRemapModule>(remapper: &R, region: &BalloonRegion) {
    remap_region(remapper, region, RemapKind::Restore);
}

unsafe fn remap_region<R: PageRemapModule>(remapper: &R, region: &BalloonRegion, kind: RemapKind) {
    let page_size = remapper.page_size();
    let range = region.aligned_pages(page_size);

    trace!("start {:?} of {} pages at {:#x}", kind, range.page_count, range.start);

    for (index, page) in range.pages(page_size).enumerate() {
        let res = match kind {
            RemapKind::Release => remapper.release_page(page as *mut u8),
            RemapKind::Restore => remapper.restore_page(page as *mut u8),
        };

        if let Err(failure) = res {
            abort_remap(kind, page, index, failure);
        }
    }

    trace!(
        "end {:?} at {:#x}",
        kind,
        range.start + range.page_count * page_size
    );
}

/// Earlier pages of the region are already remapped and the object is unusable now.
/// There is no way back from here.
#[cold]
fn abort_remap(kind: RemapKind, page: usize, index: usize, failure: RemapFailure) -> ! {
    error!(
        "failed to {:?} page {:#x} (page index {:#x}): {}",
        kind, page, index, failure
    );

    std::process::abort()
}
