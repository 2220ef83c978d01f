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

use log::{warn, LevelFilter};

/// Settings given to the agent when it is loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentConfig {
    /// Actually remap pages of registered balloons (`map`).
    /// If disabled, balloons are only tracked.
    pub mapping_enabled: bool,

    /// Trace every agent action (`verbose`)
    pub verbose: bool,

    /// Tell the policy to write its statistics to the alternate output (`sysout`)
    pub use_alternate_output: bool,

    /// Tell the policy to dump statistics on every cycle (`all`)
    pub dump_every_cycle: bool,
}

impl AgentConfig {
    /// Parses a comma separated option string like `map,verbose`.
    ///
    /// Unknown options are reported and skipped.
    pub fn parse(options: &str) -> Self {
        let mut config = Self::default();

        for option in options.split(',').map(str::trim) {
            match option {
                "" => {}
                "map" => config.mapping_enabled = true,
                "verbose" => config.verbose = true,
                "sysout" => config.use_alternate_output = true,
                "all" => config.dump_every_cycle = true,
                unknown => warn!("unknown agent option <{}>", unknown),
            }
        }

        config
    }

    /// Raises the global log level if `verbose` was requested
    pub(crate) fn apply_log_level(&self) {
        if self.verbose {
            log::set_max_level(LevelFilter::Trace);
        }
    }
}

#[cfg(test)]
mod test {
    use super::AgentConfig;

    #[test]
    fn test_parse_all_options() {
        let config = AgentConfig::parse("map,verbose,sysout,all");
        assert_eq!(
            config,
            AgentConfig {
                mapping_enabled: true,
                verbose: true,
                use_alternate_output: true,
                dump_every_cycle: true,
            }
        );
    }

    #[test]
    fn test_parse_defaults() {
        assert_eq!(AgentConfig::parse(""), AgentConfig::default());
        assert!(!AgentConfig::default().mapping_enabled);
    }

    #[test]
    fn test_unknown_options_are_ignored() {
        let config = AgentConfig::parse("bogus,map,,ma,maps");
        assert_eq!(
            config,
            AgentConfig {
                mapping_enabled: true,
                ..Default::default()
            }
        );
    }
}
