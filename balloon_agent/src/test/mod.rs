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
    thread::sleep,
    time::{Duration, Instant},
};


mod lifecycle;

/// Polls `condition` until it holds or a few seconds passed
pub(crate) fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);

    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(1));
    }

    condition()
}

/// Installs a logger once, so `RUST_LOG=trace cargo test` shows agent output
pub(crate) fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
