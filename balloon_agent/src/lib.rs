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

//! Memory balloons for managed runtimes.
//!
//! A policy registers byte arrays of the managed heap as balloons, the agent
//! then maps their pages against a single shared zero page so the operating
//! system can reuse the physical memory. Because the collector of the runtime
//! moves objects whenever it likes, every registered balloon is checked and
//! remapped after each collection.

mod agent_config;
mod agent_context;
mod agent_lifecycle;
mod agent_worker;
mod balloon_registry;
mod event_channel;
mod page_remapper;
mod synchronized_monitor;
mod util;

#[cfg(test)]
mod test;

pub use agent_config::AgentConfig;
pub use agent_context::BalloonAgent;
pub use agent_lifecycle::{AgentLifecycle, WORKER_THREAD_NAME};
pub mod modules;
