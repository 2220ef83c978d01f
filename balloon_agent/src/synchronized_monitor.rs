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
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

/// A single lock and condition variable pair guarding `T`.
///
/// Every transition of the shared agent state goes through one of these:
/// `enter` blocks until the monitor is owned, the returned guard can `wait`
/// for a notification and `notify` the waiting side, dropping it exits.
pub(crate) struct SynchronizedMonitor<T> {
    state: Mutex<T>,
    condvar: Condvar,
}

impl<T> SynchronizedMonitor<T> {
    pub(crate) const fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn enter(&self) -> MonitorGuard<'_, T> {
        // every update of the guarded state is finished before anything that could panic,
        // so a poisoned lock still holds consistent data
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        MonitorGuard {
            guard,
            condvar: &self.condvar,
        }
    }
}

pub(crate) struct MonitorGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    condvar: &'a Condvar,
}

impl<'a, T> MonitorGuard<'a, T> {
    /// Releases the monitor until another thread calls `notify`, then owns it again.
    ///
    /// Spurious wakeups are possible, so callers have to recheck their condition.
    pub(crate) fn wait(self) -> Self {
        let guard = self
            .condvar
            .wait(self.guard)
            .unwrap_or_else(PoisonError::into_inner);

        Self {
            guard,
            condvar: self.condvar,
        }
    }

    pub(crate) fn notify(&self) {
        self.condvar.notify_all();
    }
}

impl<T> Deref for MonitorGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for MonitorGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
