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

mod simulated;

pub use simulated::{ArrayRef, SimulatedHandle, SimulatedHeapModule};

/// The object model of the managed runtime that balloons live in.
///
/// Objects are moved by a collector that this crate does not control,
/// so every address returned here is only valid until the next collection.
pub trait ManagedHeapModule: Send + Sync + 'static {
    /// What the policy passes in when registering a balloon
    type Object: ?Sized;

    /// A strong reference that keeps an object alive until it is deleted
    type Handle: Send + 'static;

    fn new_strong_ref(&self, object: &Self::Object) -> Self::Handle;

    fn delete_strong_ref(&self, handle: Self::Handle);

    /// Total size of the object in bytes, including its header
    fn object_size(&self, handle: &Self::Handle) -> usize;

    /// Address the object starts at right now
    fn base_address(&self, handle: &Self::Handle) -> usize;

    /// Offset from the start of the object to its first array element.
    /// Never changes during the lifetime of an object.
    fn data_offset(&self, handle: &Self::Handle) -> usize;

    /// Runs a full collection before this returns.
    /// Runtimes that cannot be asked for one do nothing.
    ///
    /// The agent reports the collection as finished by itself, implementations
    /// must not deliver an extra `on_gc_finish` for it.
    fn force_collection(&self) {}
}
