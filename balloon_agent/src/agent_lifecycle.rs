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
    sync::Arc,
    thread::{self, JoinHandle, Thread},
};

use log::{debug, error, warn};

use crate::{
    agent_config::AgentConfig,
    agent_context::{AgentContext, BalloonAgent},
    agent_worker::AgentWorker,
    event_channel::GcEvent,
    modules::{managed_heap::ManagedHeapModule, memory_policy::MemoryPolicyModule, page_remap::PageRemapModule},
};

/// Name of the agent worker thread
pub const WORKER_THREAD_NAME: &str = "balloon-agent";

/// Connects the notifications of the host runtime to the agent.
///
/// The runtime calls these in the following order:
///
/// 1. `on_load` with the option string
/// 2. `on_runtime_start` once its heap can be accessed
/// 3. `on_runtime_init` once code can be run, this starts the agent
/// 4. `on_gc_finish` after every collection
/// 5. `on_runtime_death` and/or `on_unload` on shutdown
///
/// Notifications that arrive before the agent is started are ignored.
pub struct AgentLifecycle<H: ManagedHeapModule, R: PageRemapModule> {
    config: AgentConfig,

    /// Heap captured on runtime start, moved into the agent on runtime init
    heap: Option<H>,

    agent: Option<BalloonAgent<H, R>>,

    /// The worker runs until the process exits and is never joined
    worker: Option<JoinHandle<()>>,
}

impl<H: ManagedHeapModule, R: PageRemapModule> AgentLifecycle<H, R> {
    pub fn on_load(options: Option<&str>) -> Self {
        let config = AgentConfig::parse(options.unwrap_or(""));
        config.apply_log_level();

        debug!("Agent loaded with {:?}", config);

        Self {
            config,
            heap: None,
            agent: None,
            worker: None,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn on_runtime_start(&mut self, heap: H) {
        debug!("Runtime started");
        self.heap = Some(heap);
    }

    /// Creates the zero page backing store, starts the worker with the policy
    /// returned by `make_policy` and queues its `init` call.
    ///
    /// Aborts the process if the backing store cannot be created.
    pub fn on_runtime_init<P, F>(&mut self, make_policy: F) -> Result<BalloonAgent<H, R>, ()>
    where
        P: MemoryPolicyModule,
        F: FnOnce(BalloonAgent<H, R>) -> P,
    {
        let heap = match self.heap.take() {
            Some(heap) => heap,
            None => {
                debug!("Runtime init without runtime start or after agent start, ignored");
                return Err(());
            }
        };

        let remapper = match R::init() {
            Ok(remapper) => remapper,
            Err(err) => {
                error!("failed to create zero page backing store: {}", err);
                std::process::abort()
            }
        };

        let context = Arc::new(AgentContext::new(self.config, heap, remapper));
        let agent = BalloonAgent::from_context(context.clone());
        let worker = AgentWorker::new(context.clone(), make_policy(agent.clone()));

        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                worker.run();
            })
            .map_err(|err| error!("failed to spawn agent worker: {}", err))?;

        // from now on collections are tracked
        self.worker = Some(worker);
        self.agent = Some(agent.clone());

        context.push_event(GcEvent::Init);
        debug!("Agent started, init queued");

        Ok(agent)
    }

    pub fn agent(&self) -> Option<&BalloonAgent<H, R>> {
        self.agent.as_ref()
    }

    pub fn worker_thread(&self) -> Option<&Thread> {
        self.worker.as_ref().map(|worker| worker.thread())
    }

    /// Fixes up all balloons and notifies the worker
    pub fn on_gc_finish(&self) {
        match self.agent.as_ref() {
            Some(agent) => agent.context().handle_gc_finish(),
            None => debug!("Collection finished before agent start, ignored"),
        }
    }

    /// Forces a last collection and tells the policy to terminate.
    ///
    /// The forced collection is finished like any other one, so moved balloons
    /// are fixed up and an `End` is queued in front of the `Terminate`.
    pub fn on_runtime_death(&self) {
        debug!("Runtime death");

        if let Some(agent) = self.agent.as_ref() {
            let context = agent.context();

            context.heap.force_collection();
            context.handle_gc_finish();
            context.push_event(GcEvent::Terminate);
        }
    }

    /// Tells the policy to terminate.
    ///
    /// Might follow `on_runtime_death`, the second `Terminate` reaches nobody then.
    pub fn on_unload(&self) {
        debug!("Agent unload");

        if let Some(agent) = self.agent.as_ref() {
            agent.context().push_event(GcEvent::Terminate);
        }
    }

    pub fn on_resource_exhausted(&self, flags: i32, description: &str) {
        warn!("Resource exhausted ({}): {}", flags, description);
    }
}
