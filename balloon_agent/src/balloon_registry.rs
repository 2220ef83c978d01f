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

use log::trace;

use crate::{
    modules::{managed_heap::ManagedHeapModule, page_remap::PageRemapModule},
    page_remapper::{release_region, restore_region, BalloonRegion},
};

/// A registered balloon
pub(crate) struct BalloonEntry<H> {
    /// keeps the object alive for as long as it is registered
    handle: H,

    /// Where the object was seen last.
    /// If mapping is enabled, this is where its pages are released right now,
    /// which is not necessarily where the object lives after a collection.
    base_address: usize,

    data_offset: usize,

    size_bytes: usize,
}

impl<H> BalloonEntry<H> {
    pub(crate) fn new(handle: H, base_address: usize, data_offset: usize, size_bytes: usize) -> Self {
        Self {
            handle,
            base_address,
            data_offset,
            size_bytes,
        }
    }

    pub(crate) fn region(&self) -> BalloonRegion {
        BalloonRegion {
            base_address: self.base_address,
            data_offset: self.data_offset,
            size_bytes: self.size_bytes,
        }
    }

    pub(crate) fn base_address(&self) -> usize {
        self.base_address
    }

    pub(crate) fn handle(&self) -> &H {
        &self.handle
    }

    pub(crate) fn into_handle(self) -> H {
        self.handle
    }
}

/// All registered balloons, used as a stack.
///
/// Callers unregister in reverse registration order and
/// always get the most recently registered balloon back.
pub(crate) struct BalloonRegistry<H> {
    entries: Vec<BalloonEntry<H>>,
}

impl<H> BalloonRegistry<H> {
    pub(crate) fn new() -> Self {
        Self {
            entries: vec![],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn top(&self) -> Option<&BalloonEntry<H>> {
        self.entries.last()
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &BalloonEntry<H>> {
        self.entries.iter()
    }

    /// Adds `entry` on top and releases its pages if a `remapper` is given.
    ///
    /// ### Safety
    ///
    /// `entry` has to describe the current location of an object that is kept alive by its handle.
    pub(crate) unsafe fn push<R: PageRemapModule>(&mut self, entry: BalloonEntry<H>, remapper: Option<&R>) {
        if let Some(remapper) = remapper {
            release_region(remapper, &entry.region());
        }

        self.entries.push(entry);
    }

    /// Removes the top entry and restores its pages if a `remapper` is given.
    ///
    /// ### Safety
    ///
    /// The pages at the last seen address of the entry have to still belong to its object.
    /// This holds as long as `fixup_after_gc` is called after every collection.
    pub(crate) unsafe fn pop<R: PageRemapModule>(&mut self, remapper: Option<&R>) -> Option<BalloonEntry<H>> {
        let entry = self.entries.pop()?;

        if let Some(remapper) = remapper {
            restore_region(remapper, &entry.region());
        }

        Some(entry)
    }

    /// Checks every entry against the live address of its object.
    ///
    /// Moved entries get their old pages restored and, with a `remapper`,
    /// their pages at the new address released. Returns the number of moved entries.
    ///
    /// ### Safety
    ///
    /// Has to be called right after a collection finished, before anything else touched the moved objects.
    pub(crate) unsafe fn fixup_after_gc<M, R>(&mut self, heap: &M, remapper: Option<&R>) -> usize
    where
        M: ManagedHeapModule<Handle = H>,
        R: PageRemapModule,
    {
        let mut moved = 0;

        for (i, entry) in self.entries.iter_mut().enumerate() {
            let live_address = heap.base_address(&entry.handle);

            if live_address != entry.base_address {
                trace!(
                    "balloons[{}] moved from {:#x} to {:#x}",
                    i,
                    entry.base_address,
                    live_address
                );

                if let Some(remapper) = remapper {
                    restore_region(remapper, &entry.region());
                    entry.base_address = live_address;
                    release_region(remapper, &entry.region());
                } else {
                    entry.base_address = live_address;
                }

                moved += 1;
            }
        }

        moved
    }
}
