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

use std::sync::Arc;

use log::trace;

use crate::{
    agent_config::AgentConfig,
    balloon_registry::{BalloonEntry, BalloonRegistry},
    event_channel::{EventChannel, GcEvent},
    modules::{managed_heap::ManagedHeapModule, page_remap::PageRemapModule},
    synchronized_monitor::SynchronizedMonitor,
};

/// Everything that has to be changed under the agent monitor
pub(crate) struct AgentState<H> {
    /// Set when a collection finished and cleared once the worker handled it.
    /// Registrations that see this flag back off.
    pub(crate) interrupted: bool,

    /// Set once the policy failed to initialize, after which collections are ignored
    pub(crate) init_failed: bool,

    pub(crate) registry: BalloonRegistry<H>,

    pub(crate) events: EventChannel,
}

/// The single agent instance, shared by the worker, runtime notifications and balloon calls
pub(crate) struct AgentContext<H: ManagedHeapModule, R: PageRemapModule> {
    pub(crate) config: AgentConfig,
    pub(crate) heap: H,
    pub(crate) remapper: R,
    pub(crate) monitor: SynchronizedMonitor<AgentState<H::Handle>>,
}

impl<H: ManagedHeapModule, R: PageRemapModule> AgentContext<H, R> {
    pub(crate) fn new(config: AgentConfig, heap: H, remapper: R) -> Self {
        Self {
            config,
            heap,
            remapper,
            monitor: SynchronizedMonitor::new(AgentState {
                interrupted: false,
                init_failed: false,
                registry: BalloonRegistry::new(),
                events: EventChannel::new(),
            }),
        }
    }

    /// Pages are only touched if mapping is enabled
    fn active_remapper(&self) -> Option<&R> {
        if self.config.mapping_enabled {
            Some(&self.remapper)
        } else {
            None
        }
    }

    /// Returns `true` if a collection raced with the registration,
    /// in which case `object` is not registered.
    pub(crate) fn register_balloon(&self, object: &H::Object) -> bool {
        let handle = self.heap.new_strong_ref(object);

        // these queries may take a while, do not hold the monitor yet
        let size_bytes = self.heap.object_size(&handle);
        let observed_address = self.heap.base_address(&handle);
        let data_offset = self.heap.data_offset(&handle);

        let mut state = self.monitor.enter();
        let interrupted = state.interrupted;

        let rejected = if interrupted {
            Some(handle)
        } else {
            // the object might have moved before we got the monitor
            let base_address = self.heap.base_address(&handle);
            if base_address != observed_address {
                trace!("Balloon moved from {:#x} to {:#x} before registration", observed_address, base_address);
            }

            let entry = BalloonEntry::new(handle, base_address, data_offset, size_bytes);

            // the handle keeps the object alive and no fixup can run while we own the monitor
            unsafe { state.registry.push(entry, self.active_remapper()) };
            None
        };

        drop(state);

        match rejected {
            Some(handle) => {
                trace!("Registration of balloon with {} bytes interrupted", size_bytes);
                self.heap.delete_strong_ref(handle);
            }
            None => {
                trace!("Registered balloon with {} bytes at {:#x}", size_bytes, observed_address);
            }
        }

        interrupted
    }

    /// Unregisters the most recently registered balloon.
    ///
    /// Returns `true` if a collection raced with the call, in which case nothing is unregistered.
    ///
    /// Panics if no balloon is registered.
    pub(crate) fn unregister_balloon(&self) -> bool {
        let mut state = self.monitor.enter();
        assert!(!state.registry.is_empty(), "unregister_balloon called without any registered balloon");

        let interrupted = state.interrupted;

        let popped = if interrupted {
            None
        } else {
            // pages at the cached address are exactly the ones released for this entry
            unsafe { state.registry.pop(self.active_remapper()) }
        };

        drop(state);

        match popped {
            Some(entry) => {
                trace!(
                    "Unregistered balloon with {} bytes at {:#x}",
                    self.heap.object_size(entry.handle()),
                    entry.base_address()
                );
                self.heap.delete_strong_ref(entry.into_handle());
            }
            None => trace!("Unregistration of balloon interrupted"),
        }

        interrupted
    }

    /// Runs on every finished collection
    pub(crate) fn handle_gc_finish(&self) {
        let mut state = self.monitor.enter();

        if state.init_failed {
            return;
        }

        // interrupt any registration that is in flight
        state.interrupted = true;

        let moved = unsafe { state.registry.fixup_after_gc(&self.heap, self.active_remapper()) };
        if moved > 0 {
            trace!("Fixed up {} moved balloon(s)", moved);
        }

        state.events.push(GcEvent::End);
        state.notify();
    }

    pub(crate) fn push_event(&self, event: GcEvent) {
        let mut state = self.monitor.enter();
        state.events.push(event);
        state.notify();
    }
}

/// Handle to the running agent.
///
/// This is what the policy uses to inflate and deflate balloons.
/// It can be cloned and used from any thread.
pub struct BalloonAgent<H: ManagedHeapModule, R: PageRemapModule> {
    context: Arc<AgentContext<H, R>>,
}

impl<H: ManagedHeapModule, R: PageRemapModule> Clone for BalloonAgent<H, R> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<H: ManagedHeapModule, R: PageRemapModule> BalloonAgent<H, R> {
    pub(crate) fn from_context(context: Arc<AgentContext<H, R>>) -> Self {
        Self { context }
    }

    pub(crate) fn context(&self) -> &Arc<AgentContext<H, R>> {
        &self.context
    }

    /// Registers `object` as a balloon and releases its pages if mapping is enabled.
    ///
    /// Returns `true` if a collection happened in the meantime. The object is
    /// not registered then and the call can be retried.
    pub fn register_balloon(&self, object: &H::Object) -> bool {
        self.context.register_balloon(object)
    }

    /// Unregisters the most recently registered balloon and restores its pages if mapping is enabled.
    ///
    /// Returns `true` if a collection happened in the meantime. Nothing is
    /// unregistered then and the call can be retried.
    ///
    /// Calling this without any registered balloon is a bug and panics.
    pub fn unregister_balloon(&self) -> bool {
        self.context.unregister_balloon()
    }

    pub fn balloon_count(&self) -> usize {
        self.context.monitor.enter().registry.len()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.context.config
    }

    pub fn heap(&self) -> &H {
        &self.context.heap
    }

    pub fn remapper(&self) -> &R {
        &self.context.remapper
    }
}
