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

use std::collections::VecDeque;

/// Lifecycle events passed from runtime notifications to the agent worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GcEvent {
    Init,
    End,
    Terminate,
}

/// Unbounded FIFO of pending events.
///
/// Only reachable through the agent monitor, which is what makes
/// pushing from notification context and popping from the worker safe.
#[derive(Debug, Default)]
pub(crate) struct EventChannel {
    queue: VecDeque<GcEvent>,
}

impl EventChannel {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, event: GcEvent) {
        self.queue.push_back(event);
    }

    pub(crate) fn pop(&mut self) -> Option<GcEvent> {
        self.queue.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// Pops the next event worth acting on.
    ///
    /// An `End` that is followed by more events is outdated and skipped,
    /// so a burst of `End`s collapses into the last one. The second value
    /// is the number of skipped events.
    pub(crate) fn pop_coalesced(&mut self) -> Option<(GcEvent, usize)> {
        let mut event = self.pop()?;
        let mut skipped = 0;

        while event == GcEvent::End {
            match self.pop() {
                Some(next) => {
                    event = next;
                    skipped += 1;
                }
                None => break,
            }
        }

        Some((event, skipped))
    }
}
