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

use core::{
    mem::{align_of, size_of},
    ptr::{copy_nonoverlapping, null_mut, write, write_bytes},
};
use std::sync::{Mutex, MutexGuard, PoisonError};

use libc::{c_void, mmap, munmap, sysconf, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, _SC_PAGE_SIZE};
use log::{trace, warn};
use memoffset::offset_of;
use static_assertions::const_assert;

use super::ManagedHeapModule;
use crate::util::round_up_to_nearest;

/// Every object starts at a multiple of this
const OBJECT_ALIGNMENT: usize = 16;

#[repr(C)]
struct ArrayHeader {
    length: usize,
    slot: usize,
}

#[repr(C)]
struct ArrayObject {
    header: ArrayHeader,
    data: [u8; 0],
}

const_assert!(align_of::<ArrayHeader>() <= OBJECT_ALIGNMENT);

const DATA_OFFSET: usize = offset_of!(ArrayObject, data);

/// Identifies a byte array allocated inside of a `SimulatedHeapModule`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayRef(usize);

/// Strong reference to an array, has to be given back with `delete_strong_ref`
#[derive(Debug, PartialEq, Eq)]
pub struct SimulatedHandle(ArrayRef);

struct Slot {
    address: usize,
    length: usize,
    strong_refs: usize,
}

struct HeapState {
    /// next free byte, relative to the arena start
    top: usize,
    slots: Vec<Slot>,
    collections: usize,
}

/// A managed heap of byte arrays inside of an anonymous memory mapping.
///
/// Nothing is ever freed. A collection copies arrays to the end of the used space
/// and leaves the old copy behind, which is all a moving collector looks like
/// from the outside.
pub struct SimulatedHeapModule {
    base_ptr: *mut u8,
    capacity: usize,
    state: Mutex<HeapState>,
}

// all mutable state is behind `state`, the arena itself is only accessed through it
unsafe impl Send for SimulatedHeapModule {}
unsafe impl Sync for SimulatedHeapModule {}

impl SimulatedHeapModule {
    /// Maps a new arena with at least `capacity` bytes
    pub fn new(capacity: usize) -> Result<Self, ()> {
        let page_size = unsafe { sysconf(_SC_PAGE_SIZE) as usize };
        let capacity = round_up_to_nearest(capacity.max(1), page_size);

        let base_ptr = unsafe {
            mmap(
                null_mut(),
                capacity,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if base_ptr == MAP_FAILED {
            return Err(());
        }

        Ok(Self {
            base_ptr: base_ptr as *mut u8,
            capacity,
            state: Mutex::new(HeapState {
                top: 0,
                slots: vec![],
                collections: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HeapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves space for an object of `size` bytes and returns its address
    fn bump(&self, state: &mut HeapState, size: usize) -> Result<usize, ()> {
        let offset = round_up_to_nearest(state.top, OBJECT_ALIGNMENT);
        if offset + size > self.capacity {
            warn!("Simulated heap is full ({} of {} bytes used)", state.top, self.capacity);
            return Err(());
        }

        state.top = offset + size;
        Ok(self.base_ptr as usize + offset)
    }

    /// Allocates a zeroed byte array with `length` elements
    pub fn allocate_array(&self, length: usize) -> Result<ArrayRef, ()> {
        let mut state = self.lock();
        let address = self.bump(&mut state, DATA_OFFSET + length)?;
        let slot = state.slots.len();

        unsafe {
            write(address as *mut ArrayHeader, ArrayHeader { length, slot });
            write_bytes((address + DATA_OFFSET) as *mut u8, 0, length);
        }

        state.slots.push(Slot {
            address,
            length,
            strong_refs: 0,
        });

        trace!("Allocated array {} with {} bytes at {:#x}", slot, length, address);
        Ok(ArrayRef(slot))
    }

    /// Moves every array in `moved` to a new address, like a moving collector would
    pub fn collect(&self, moved: &[ArrayRef]) -> Result<(), ()> {
        let mut state = self.lock();
        state.collections += 1;

        for array in moved {
            let (old_address, size) = {
                let slot = state.slots.get(array.0).ok_or(())?;
                (slot.address, DATA_OFFSET + slot.length)
            };
            let new_address = self.bump(&mut state, size)?;

            unsafe { copy_nonoverlapping(old_address as *const u8, new_address as *mut u8, size) };
            state.slots[array.0].address = new_address;

            trace!("Moved array {} from {:#x} to {:#x}", array.0, old_address, new_address);
        }

        Ok(())
    }

    pub fn arrays(&self) -> Vec<ArrayRef> {
        (0..self.lock().slots.len()).map(ArrayRef).collect()
    }

    pub fn collections(&self) -> usize {
        self.lock().collections
    }

    pub fn address_of(&self, array: ArrayRef) -> usize {
        self.lock().slots[array.0].address
    }

    /// Address of the first array element right now
    pub fn data_address(&self, array: ArrayRef) -> usize {
        self.address_of(array) + DATA_OFFSET
    }

    pub fn strong_refs(&self, array: ArrayRef) -> usize {
        self.lock().slots[array.0].strong_refs
    }

    /// Copies the current array elements
    pub fn read_data(&self, array: ArrayRef) -> Vec<u8> {
        let state = self.lock();
        let slot = &state.slots[array.0];

        let mut res = vec![0u8; slot.length];
        unsafe {
            copy_nonoverlapping(
                (slot.address + DATA_OFFSET) as *const u8,
                res.as_mut_ptr(),
                slot.length,
            )
        };

        res
    }

    /// Overwrites all array elements with `value`.
    ///
    /// Writing to a released balloon would write to the shared zero page,
    /// so this must only be used for arrays that are not released right now.
    pub fn fill_data(&self, array: ArrayRef, value: u8) {
        let state = self.lock();
        let slot = &state.slots[array.0];

        unsafe { write_bytes((slot.address + DATA_OFFSET) as *mut u8, value, slot.length) };
    }
}

impl ManagedHeapModule for SimulatedHeapModule {
    type Object = ArrayRef;
    type Handle = SimulatedHandle;

    fn new_strong_ref(&self, object: &ArrayRef) -> SimulatedHandle {
        self.lock().slots[object.0].strong_refs += 1;
        SimulatedHandle(*object)
    }

    fn delete_strong_ref(&self, handle: SimulatedHandle) {
        let mut state = self.lock();
        let slot = &mut state.slots[handle.0 .0];
        debug_assert!(slot.strong_refs > 0);
        slot.strong_refs -= 1;
    }

    fn object_size(&self, handle: &SimulatedHandle) -> usize {
        DATA_OFFSET + self.lock().slots[handle.0 .0].length
    }

    fn base_address(&self, handle: &SimulatedHandle) -> usize {
        self.lock().slots[handle.0 .0].address
    }

    fn data_offset(&self, _handle: &SimulatedHandle) -> usize {
        DATA_OFFSET
    }

    fn force_collection(&self) {
        self.lock().collections += 1;
    }
}

impl Drop for SimulatedHeapModule {
    fn drop(&mut self) {
        let code = unsafe { munmap(self.base_ptr as *mut c_void, self.capacity) };

        if code != 0 {
            warn!("Could not unmap simulated heap");
        }
    }
}
