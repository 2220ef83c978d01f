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

use std::{env::temp_dir, os::fd::AsRawFd};

use libc::{
    c_void, mmap, sysconf, MAP_ANONYMOUS, MAP_FAILED, MAP_FIXED, MAP_PRIVATE, MAP_SHARED,
    PROT_READ, PROT_WRITE, _SC_PAGE_SIZE,
};

use super::{PageRemapModule, RemapFailure, ZeroPageStore};
use crate::util::last_errno;

/// Remaps pages with `mmap(MAP_FIXED)`.
///
/// `MAP_FIXED` replaces whatever was mapped at the target address in a single call,
/// so there is never a moment where the page is not mapped at all.
pub struct MmapPageRemapModule {
    zero_page: ZeroPageStore,
    page_size: usize,
}

impl MmapPageRemapModule {
    pub fn new(zero_page: ZeroPageStore) -> Self {
        Self {
            page_size: zero_page.size(),
            zero_page,
        }
    }

    pub fn zero_page(&self) -> &ZeroPageStore {
        &self.zero_page
    }

    unsafe fn replace_page(&self, page: *mut u8, flags: i32, fd: i32) -> Result<(), RemapFailure> {
        let res = unsafe {
            mmap(
                page as *mut c_void,
                self.page_size,
                PROT_READ | PROT_WRITE,
                flags | MAP_FIXED,
                fd,
                0,
            )
        };

        if res == MAP_FAILED {
            Err(RemapFailure::Map { errno: last_errno() })
        } else if res != page as *mut c_void {
            Err(RemapFailure::Displaced {
                actual: res as usize,
            })
        } else {
            Ok(())
        }
    }
}

impl PageRemapModule for MmapPageRemapModule {
    fn init() -> std::io::Result<Self> {
        let page_size = unsafe { sysconf(_SC_PAGE_SIZE) as usize };
        let zero_page = ZeroPageStore::create(&temp_dir(), page_size)?;

        Ok(Self::new(zero_page))
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    unsafe fn release_page(&self, page: *mut u8) -> Result<(), RemapFailure> {
        // shared mapping, so all released pages end up on the same physical page
        self.replace_page(page, MAP_SHARED, self.zero_page.as_raw_fd())
    }

    unsafe fn restore_page(&self, page: *mut u8) -> Result<(), RemapFailure> {
        self.replace_page(page, MAP_PRIVATE | MAP_ANONYMOUS, -1)
    }
}
