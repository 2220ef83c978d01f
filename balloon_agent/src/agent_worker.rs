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

use log::{debug, info, warn};

use crate::{
    agent_context::AgentContext,
    event_channel::GcEvent,
    modules::{managed_heap::ManagedHeapModule, memory_policy::MemoryPolicyModule, page_remap::PageRemapModule},
};

/// The only consumer of agent events.
///
/// **Invariant**: the agent monitor is never held while the policy is called.
/// Policy code may cause a collection, and the finish notification of that
/// collection has to acquire the monitor to deliver its `End` event.
pub(crate) struct AgentWorker<H: ManagedHeapModule, R: PageRemapModule, P: MemoryPolicyModule> {
    context: Arc<AgentContext<H, R>>,
    policy: P,

    /// policy accepted `init`
    initialized: bool,

    /// policy saw `on_terminate`, nothing is delivered anymore
    terminated: bool,

    /// `End` events dropped by coalescing after the policy was initialized
    skipped: usize,
}

impl<H: ManagedHeapModule, R: PageRemapModule, P: MemoryPolicyModule> AgentWorker<H, R, P> {
    pub(crate) fn new(context: Arc<AgentContext<H, R>>, policy: P) -> Self {
        Self {
            context,
            policy,
            initialized: false,
            terminated: false,
            skipped: 0,
        }
    }

    /// Handles events until the process exits
    pub(crate) fn run(mut self) -> ! {
        debug!("Agent worker started");

        loop {
            self.process_next_event();
        }
    }

    /// Waits for the next event and hands it to the policy.
    ///
    /// Returns the event that was acted on.
    pub(crate) fn process_next_event(&mut self) -> GcEvent {
        let mut state = self.context.monitor.enter();

        let (event, skipped) = loop {
            if let Some(next) = state.events.pop_coalesced() {
                break next;
            }
            state = state.wait();
        };

        if self.initialized {
            self.skipped += skipped;

            if event != GcEvent::Init {
                // the policy is about to see the collection that set this flag
                state.interrupted = false;
            }
        }

        drop(state);

        // the monitor is released from here on, see type level docs
        if self.terminated {
            return event;
        }

        match event {
            GcEvent::Init => {
                debug!("Calling policy init");
                self.initialized = self.policy.init(
                    self.context.config.use_alternate_output,
                    self.context.config.dump_every_cycle,
                );

                if !self.initialized {
                    warn!("Policy init failed, stop tracking collections");
                    self.context.monitor.enter().init_failed = true;
                }
            }
            GcEvent::End if self.initialized => {
                debug!("Calling policy on_cycle_end");
                self.policy.on_cycle_end();
            }
            GcEvent::Terminate if self.initialized => {
                info!("Skipped {} end events", self.skipped);
                debug!("Calling policy on_terminate");
                self.policy.on_terminate();
                self.terminated = true;
            }
            _ => {}
        }

        event
    }

    #[cfg(test)]
    pub(crate) fn skipped_events(&self) -> usize {
        self.skipped
    }

    #[cfg(test)]
    pub(crate) fn policy(&self) -> &P {
        &self.policy
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::AgentWorker;
    use crate::{
        agent_config::AgentConfig,
        agent_context::AgentContext,
        event_channel::GcEvent,
        test::{
            fake_heap::FakeHeapModule,
            recording_policy::{PolicyCall, RecordingPolicy},
            recording_remap::RecordingPageRemapModule,
        },
    };

    type TestContext = AgentContext<FakeHeapModule, RecordingPageRemapModule>;

    fn worker_with(
        config: AgentConfig,
        init_result: bool,
    ) -> AgentWorker<FakeHeapModule, RecordingPageRemapModule, RecordingPolicy> {
        let context: Arc<TestContext> = Arc::new(AgentContext::new(
            config,
            FakeHeapModule::new(),
            RecordingPageRemapModule::with_page_size(4096),
        ));

        AgentWorker::new(context, RecordingPolicy::new(init_result))
    }

    #[test]
    fn test_end_events_are_coalesced() {
        let mut worker = worker_with(AgentConfig::default(), true);

        worker.context.push_event(GcEvent::Init);
        assert_eq!(worker.process_next_event(), GcEvent::Init);

        for _ in 0..3 {
            worker.context.push_event(GcEvent::End);
        }
        assert_eq!(worker.process_next_event(), GcEvent::End);

        assert_eq!(
            worker.policy().calls(),
            vec![PolicyCall::Init(false, false), PolicyCall::CycleEnd]
        );
        assert_eq!(worker.skipped_events(), 2);
        assert!(worker.context.monitor.enter().events.is_empty());
    }

    #[test]
    fn test_skips_before_init_are_not_counted() {
        let mut worker = worker_with(AgentConfig::default(), true);

        worker.context.push_event(GcEvent::End);
        worker.context.push_event(GcEvent::End);
        worker.context.push_event(GcEvent::Init);
        assert_eq!(worker.process_next_event(), GcEvent::Init);
        assert_eq!(worker.skipped_events(), 0);

        worker.context.push_event(GcEvent::End);
        worker.context.push_event(GcEvent::End);
        assert_eq!(worker.process_next_event(), GcEvent::End);
        assert_eq!(worker.skipped_events(), 1);
    }

    #[test]
    fn test_options_are_passed_to_init() {
        let config = AgentConfig::parse("sysout,all");
        let mut worker = worker_with(config, true);

        worker.context.push_event(GcEvent::Init);
        worker.process_next_event();

        assert_eq!(worker.policy().calls(), vec![PolicyCall::Init(true, true)]);
    }

    #[test]
    fn test_failed_init_makes_agent_inert() {
        let mut worker = worker_with(AgentConfig::default(), false);

        worker.context.push_event(GcEvent::Init);
        worker.process_next_event();
        assert!(worker.context.monitor.enter().init_failed);

        // collections are ignored now
        worker.context.handle_gc_finish();
        assert!(worker.context.monitor.enter().events.is_empty());
        assert!(!worker.context.monitor.enter().interrupted);

        // terminate is still drained
        worker.context.push_event(GcEvent::Terminate);
        assert_eq!(worker.process_next_event(), GcEvent::Terminate);
        assert!(worker.context.monitor.enter().events.is_empty());

        assert_eq!(worker.policy().calls(), vec![PolicyCall::Init(false, false)]);
    }

    #[test]
    fn test_nothing_is_delivered_after_terminate() {
        let mut worker = worker_with(AgentConfig::default(), true);

        for event in [GcEvent::Init, GcEvent::Terminate, GcEvent::End, GcEvent::Terminate] {
            worker.context.push_event(event);
        }
        assert_eq!(worker.process_next_event(), GcEvent::Init);
        assert_eq!(worker.process_next_event(), GcEvent::Terminate);
        assert_eq!(worker.process_next_event(), GcEvent::Terminate);

        assert_eq!(
            worker.policy().calls(),
            vec![PolicyCall::Init(false, false), PolicyCall::Terminate]
        );
    }

    #[test]
    fn test_events_before_init_are_ignored() {
        let mut worker = worker_with(AgentConfig::default(), true);

        worker.context.push_event(GcEvent::Terminate);
        assert_eq!(worker.process_next_event(), GcEvent::Terminate);
        assert!(worker.policy().calls().is_empty());
    }

    #[test]
    fn test_cycle_end_clears_interrupted() {
        let mut worker = worker_with(AgentConfig::default(), true);

        worker.context.push_event(GcEvent::Init);
        worker.process_next_event();

        worker.context.handle_gc_finish();
        assert!(worker.context.monitor.enter().interrupted);

        worker.process_next_event();
        assert!(!worker.context.monitor.enter().interrupted);

        worker.context.push_event(GcEvent::Terminate);
        worker.process_next_event();
        assert_eq!(
            worker.policy().calls(),
            vec![PolicyCall::Init(false, false), PolicyCall::CycleEnd, PolicyCall::Terminate]
        );
    }

    #[test]
    fn test_worker_blocks_until_event_arrives() {
        let mut worker = worker_with(AgentConfig::default(), true);
        let context = worker.context.clone();

        let handle = std::thread::spawn(move || {
            let first = worker.process_next_event();
            let second = worker.process_next_event();
            (first, second, worker.policy().calls())
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        context.push_event(GcEvent::Init);
        std::thread::sleep(std::time::Duration::from_millis(20));
        context.handle_gc_finish();

        let (first, second, calls) = handle.join().unwrap();
        assert_eq!(first, GcEvent::Init);
        assert_eq!(second, GcEvent::End);
        assert_eq!(calls, vec![PolicyCall::Init(false, false), PolicyCall::CycleEnd]);
    }
}
