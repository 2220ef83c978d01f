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
    fmt,
    ops::Range,
    sync::mpsc::{self, Sender},
    thread,
    time::Duration,
};

use balloon_agent::{
    modules::{
        managed_heap::{ArrayRef, SimulatedHeapModule},
        memory_policy::MemoryPolicyModule,
        page_remap::{MmapPageRemapModule, PageRemapModule},
    },
    AgentLifecycle, BalloonAgent,
};
use env_logger::{Builder, Env};
use log::{error, info, warn};
use rand::{rngs::SmallRng, Rng, SeedableRng};

type DemoAgent = BalloonAgent<SimulatedHeapModule, MmapPageRemapModule>;

const HEAP_CAPACITY: usize = 64 * 1024 * 1024;
const BALLOON_SIZE: usize = 256 * 1024;
const INITIAL_BALLOONS: usize = 2;
const MAX_BALLOONS: usize = 8;
const COLLECTIONS: usize = 40;
const SEED: u64 = 5446535461589659585;

/// Written to every balloon before it is registered,
/// so pages that were not released stand out when reading them back
const FILL_BYTE: u8 = 0xAA;

/// Inflates a few balloons on init, then one more per cycle until `MAX_BALLOONS`
/// are reached. After that all of them are deflated and it starts over.
struct DemoPolicy {
    agent: DemoAgent,

    /// registered balloons, in registration order
    balloons: Vec<ArrayRef>,

    /// allocated balloon whose registration was interrupted
    pending: Option<ArrayRef>,

    deflating: bool,
    use_alternate_output: bool,
    dump_every_cycle: bool,
    cycles: usize,

    /// receives the number of handled cycles after `init` and every cycle
    cycle_done: Option<Sender<usize>>,
}

impl DemoPolicy {
    fn new(agent: DemoAgent) -> Self {
        Self {
            agent,
            balloons: Vec::new(),
            pending: None,
            deflating: false,
            use_alternate_output: false,
            dump_every_cycle: false,
            cycles: 0,
            cycle_done: None,
        }
    }

    fn with_cycle_notifier(mut self, cycle_done: Sender<usize>) -> Self {
        self.cycle_done = Some(cycle_done);
        self
    }

    /// Statistics go to stdout with `sysout`, to the log otherwise
    fn report(&self, args: fmt::Arguments) {
        if self.use_alternate_output {
            println!("{}", args);
        } else {
            info!("{}", args);
        }
    }

    fn notify_cycle_done(&self) {
        if let Some(cycle_done) = self.cycle_done.as_ref() {
            // main may be gone already
            let _ = cycle_done.send(self.cycles);
        }
    }

    fn allocate_balloon(&self) -> Option<ArrayRef> {
        match self.agent.heap().allocate_array(BALLOON_SIZE) {
            Ok(array) => {
                self.agent.heap().fill_data(array, FILL_BYTE);
                Some(array)
            }
            Err(()) => {
                warn!("Heap is full, cannot inflate");
                None
            }
        }
    }

    fn inflate(&mut self) {
        let array = match self.pending.take().or_else(|| self.allocate_balloon()) {
            Some(array) => array,
            None => return,
        };

        if self.agent.register_balloon(&array) {
            // a collection happened in between, retry on the next cycle
            self.pending = Some(array);
        } else {
            self.balloons.push(array);
        }
    }

    /// Returns `false` if a collection interrupted the deflation
    fn deflate_all(&mut self) -> bool {
        while !self.balloons.is_empty() {
            if self.agent.unregister_balloon() {
                return false;
            }
            self.balloons.pop();
        }
        true
    }

    /// Reads back every balloon and checks that its released pages are zero filled.
    ///
    /// Returns the number of released bytes or the first balloon that is not zero filled.
    fn count_zero_filled(&self) -> Result<usize, ArrayRef> {
        if !self.agent.config().mapping_enabled {
            return Ok(0);
        }

        let page_size = self.agent.remapper().page_size();
        let mut released = 0;

        for array in self.balloons.iter() {
            let data = self.agent.heap().read_data(*array);
            let pages = whole_pages(self.agent.heap().data_address(*array), data.len(), page_size);

            if data[pages.clone()].iter().any(|b| *b != 0) {
                return Err(*array);
            }
            released += pages.len();
        }

        Ok(released)
    }
}

/// Byte range of `[start, start + len)` that covers whole pages only, relative to `start`
fn whole_pages(start: usize, len: usize, page_size: usize) -> Range<usize> {
    let first = (start + page_size - 1) / page_size * page_size;
    let last = (start + len) / page_size * page_size;

    if first >= last {
        0..0
    } else {
        (first - start)..(last - start)
    }
}

impl MemoryPolicyModule for DemoPolicy {
    fn init(&mut self, use_alternate_output: bool, dump_every_cycle: bool) -> bool {
        self.use_alternate_output = use_alternate_output;
        self.dump_every_cycle = dump_every_cycle;

        for _ in 0..INITIAL_BALLOONS {
            self.inflate();
        }

        self.report(format_args!("policy started with {} balloons", self.balloons.len()));
        self.notify_cycle_done();
        true
    }

    fn on_cycle_end(&mut self) {
        self.cycles += 1;

        if self.balloons.len() >= MAX_BALLOONS {
            self.deflating = true;
        }

        if self.deflating {
            self.deflating = !self.deflate_all();
        } else {
            self.inflate();
        }

        match self.count_zero_filled() {
            Ok(released) if self.dump_every_cycle => self.report(format_args!(
                "cycle {}: {} balloons, {} KiB released and zero filled",
                self.cycles,
                self.balloons.len(),
                released / 1024
            )),
            Ok(_) => {}
            Err(array) => error!("balloon {:?} reads back non zero bytes", array),
        }

        self.notify_cycle_done();
    }

    fn on_terminate(&mut self) {
        self.report(format_args!(
            "policy terminates after {} cycles, deflating {} balloons",
            self.cycles,
            self.balloons.len()
        ));

        if !self.deflate_all() {
            warn!("{} balloons could not be deflated", self.balloons.len());
        }
    }
}

fn main() {
    Builder::from_env(Env::default())
        .filter_level(log::LevelFilter::Info)
        .format_module_path(false)
        .init();

    let options = std::env::args().nth(1).unwrap_or_else(|| "map,all".to_string());
    let mut lifecycle: AgentLifecycle<SimulatedHeapModule, MmapPageRemapModule> =
        AgentLifecycle::on_load(Some(&options));

    let heap = match SimulatedHeapModule::new(HEAP_CAPACITY) {
        Ok(heap) => heap,
        Err(()) => {
            error!("Could not create simulated heap");
            return;
        }
    };
    lifecycle.on_runtime_start(heap);

    let (cycle_done, cycles) = mpsc::channel();
    let agent = match lifecycle.on_runtime_init(move |agent| DemoPolicy::new(agent).with_cycle_notifier(cycle_done)) {
        Ok(agent) => agent,
        Err(()) => {
            error!("Could not start balloon agent");
            return;
        }
    };

    // collections only run while the policy is idle, like with a stopped mutator
    let wait_for_policy = || cycles.recv_timeout(Duration::from_secs(5)).is_ok();

    if !wait_for_policy() {
        error!("Policy did not initialize");
        return;
    }

    let mut rng = SmallRng::seed_from_u64(SEED);
    for _ in 0..COLLECTIONS {
        // move roughly a quarter of all arrays
        let moved: Vec<ArrayRef> = agent
            .heap()
            .arrays()
            .into_iter()
            .filter(|_| rng.gen_range(0..4) == 0)
            .collect();

        if agent.heap().collect(&moved).is_err() {
            warn!("Heap is full, stopping collections");
            break;
        }
        lifecycle.on_gc_finish();

        if !wait_for_policy() {
            warn!("Policy did not finish its cycle, stopping collections");
            break;
        }

        thread::sleep(Duration::from_millis(rng.gen_range(5..50)));
    }

    lifecycle.on_runtime_death();
    lifecycle.on_unload();

    // the worker is never joined, give it time to deflate
    thread::sleep(Duration::from_millis(200));
    info!("{} balloons left after shutdown", agent.balloon_count());
}
