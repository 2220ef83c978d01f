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

/// The component that decides when balloons are inflated or deflated.
///
/// All calls happen on the agent worker thread, never while the agent holds its monitor.
/// Implementations are therefore free to register and unregister balloons
/// or to do anything that causes a collection.
pub trait MemoryPolicyModule: Send + 'static {
    /// Called once after the runtime is initialized.
    ///
    /// If this returns `false`, the agent stops tracking collections
    /// and none of the other functions will be called.
    fn init(&mut self, use_alternate_output: bool, dump_every_cycle: bool) -> bool;

    /// Called once per finished collection.
    /// Bursts of collections that happen while the policy is busy are reported only once.
    fn on_cycle_end(&mut self);

    /// Called once when the runtime shuts down.
    fn on_terminate(&mut self);
}
