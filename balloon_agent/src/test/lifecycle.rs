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

use std::sync::{Arc, Mutex};

use super::{
    fake_heap::FakeHeapModule,
    init_test_logger,
    recording_policy::{PolicyCall, RecordingPolicy},
    recording_remap::{RecordingPageRemapModule, RemapCall},
    wait_for,
};
use crate::{
    agent_lifecycle::WORKER_THREAD_NAME, modules::memory_policy::MemoryPolicyModule, AgentLifecycle,
    BalloonAgent,
};

type TestLifecycle = AgentLifecycle<FakeHeapModule, RecordingPageRemapModule>;

fn calls_of(calls: &Arc<Mutex<Vec<PolicyCall>>>) -> Vec<PolicyCall> {
    calls.lock().unwrap().clone()
}

#[test]
fn test_full_lifecycle() {
    init_test_logger();

    let mut lifecycle = TestLifecycle::on_load(Some("map,sysout"));
    assert!(lifecycle.config().mapping_enabled);

    lifecycle.on_runtime_start(FakeHeapModule::new());

    let policy = RecordingPolicy::new(true);
    let calls = policy.shared_calls();
    let agent = lifecycle.on_runtime_init(move |_| policy).unwrap();

    assert_eq!(lifecycle.worker_thread().unwrap().name(), Some(WORKER_THREAD_NAME));
    assert!(wait_for(|| calls_of(&calls) == vec![PolicyCall::Init(true, false)]));

    lifecycle.on_gc_finish();
    assert!(wait_for(|| calls_of(&calls).len() == 2));
    assert_eq!(calls_of(&calls)[1], PolicyCall::CycleEnd);

    lifecycle.on_runtime_death();
    assert_eq!(agent.heap().forced_collections(), 1);
    assert!(wait_for(|| calls_of(&calls).last() == Some(&PolicyCall::Terminate)));
    let delivered = calls_of(&calls).len();

    // second terminate reaches nobody
    lifecycle.on_unload();
    assert!(wait_for(|| agent.context().monitor.enter().events.is_empty()));
    assert_eq!(calls_of(&calls).len(), delivered);
    assert_eq!(
        calls_of(&calls)
            .iter()
            .filter(|call| **call == PolicyCall::Terminate)
            .count(),
        1
    );
}

#[test]
fn test_runtime_death_finishes_forced_collection() {
    let mut lifecycle = TestLifecycle::on_load(Some("map"));
    lifecycle.on_runtime_start(FakeHeapModule::new());

    let policy = RecordingPolicy::new(true);
    let calls = policy.shared_calls();
    let agent = lifecycle.on_runtime_init(move |_| policy).unwrap();
    assert!(wait_for(|| calls_of(&calls) == vec![PolicyCall::Init(false, false)]));

    let object = agent.heap().add_object(0x10000 - 16, 4096 + 16, 16);
    assert!(!agent.register_balloon(&object));
    assert_eq!(agent.remapper().take_calls(), vec![RemapCall::Release(0x10000)]);

    // the last collection moves the balloon
    agent.heap().move_object(object, 0x30000 - 16);
    lifecycle.on_runtime_death();

    assert_eq!(
        agent.remapper().take_calls(),
        vec![RemapCall::Restore(0x10000), RemapCall::Release(0x30000)]
    );
    assert_eq!(
        agent.context().monitor.enter().registry.top().unwrap().base_address(),
        0x30000 - 16
    );

    assert!(wait_for(|| calls_of(&calls).last() == Some(&PolicyCall::Terminate)));
    assert_eq!(calls_of(&calls)[0], PolicyCall::Init(false, false));
}

#[test]
fn test_notifications_before_start_are_ignored() {
    let mut lifecycle = TestLifecycle::on_load(None);

    lifecycle.on_gc_finish();
    lifecycle.on_runtime_death();
    lifecycle.on_unload();
    lifecycle.on_resource_exhausted(1, "Java heap space");
    assert!(lifecycle.agent().is_none());

    // no heap captured yet
    assert!(lifecycle.on_runtime_init(|_| RecordingPolicy::new(true)).is_err());

    lifecycle.on_runtime_start(FakeHeapModule::new());
    assert!(lifecycle.on_runtime_init(|_| RecordingPolicy::new(true)).is_ok());

    // agent is already running
    assert!(lifecycle.on_runtime_init(|_| RecordingPolicy::new(true)).is_err());
}

#[test]
fn test_failed_init_ignores_collections() {
    let mut lifecycle = TestLifecycle::on_load(Some("map"));
    lifecycle.on_runtime_start(FakeHeapModule::new());

    let policy = RecordingPolicy::new(false);
    let calls = policy.shared_calls();
    let agent = lifecycle.on_runtime_init(move |_| policy).unwrap();

    assert!(wait_for(|| agent.context().monitor.enter().init_failed));

    let object = agent.heap().add_object(0x10000 - 16, 2 * 4096, 16);
    assert!(!agent.register_balloon(&object));

    agent.heap().move_object(object, 0x40000);
    lifecycle.on_gc_finish();

    // balloon was neither fixed up nor interrupted
    let state = agent.context().monitor.enter();
    assert!(!state.interrupted);
    assert!(state.events.is_empty());
    assert_eq!(state.registry.top().unwrap().base_address(), 0x10000 - 16);
    drop(state);

    lifecycle.on_runtime_death();
    assert!(wait_for(|| agent.context().monitor.enter().events.is_empty()));
    assert_eq!(calls_of(&calls), vec![PolicyCall::Init(false, false)]);
}

/// Inflates all given objects on init and deflates one per cycle
struct InflatingPolicy {
    agent: BalloonAgent<FakeHeapModule, RecordingPageRemapModule>,
    objects: Vec<usize>,
}

impl MemoryPolicyModule for InflatingPolicy {
    fn init(&mut self, _use_alternate_output: bool, _dump_every_cycle: bool) -> bool {
        for object in self.objects.iter() {
            if self.agent.register_balloon(object) {
                return false;
            }
        }
        true
    }

    fn on_cycle_end(&mut self) {
        if self.agent.balloon_count() > 0 {
            assert!(!self.agent.unregister_balloon());
        }
    }

    fn on_terminate(&mut self) {
        while self.agent.balloon_count() > 0 {
            assert!(!self.agent.unregister_balloon());
        }
    }
}

#[test]
fn test_policy_manages_balloons_from_worker() {
    let heap = FakeHeapModule::new();
    let objects: Vec<usize> = (1..=4)
        .map(|i| heap.add_object(i * 0x100000 - 16, 8 * 4096, 16))
        .collect();

    let mut lifecycle = TestLifecycle::on_load(Some("map"));
    lifecycle.on_runtime_start(heap);

    let agent = lifecycle
        .on_runtime_init(|agent| InflatingPolicy {
            agent,
            objects: objects.clone(),
        })
        .unwrap();

    assert!(wait_for(|| agent.balloon_count() == 4));

    // collection moves the most recent balloon, the policy then deflates it
    agent.heap().move_object(objects[3], 0x900000 - 16);
    lifecycle.on_gc_finish();
    assert!(wait_for(|| agent.balloon_count() == 3));
    assert_eq!(agent.heap().strong_refs(objects[3]), 0);

    lifecycle.on_unload();
    assert!(wait_for(|| agent.balloon_count() == 0));
    assert!(objects.iter().all(|object| agent.heap().strong_refs(*object) == 0));

    // every released page was restored again
    let calls = agent.remapper().take_calls();
    let released = calls
        .iter()
        .filter(|call| matches!(call, RemapCall::Release(_)))
        .count();
    let restored = calls.len() - released;
    assert_eq!(released, restored);
}
