// Copyright (c) 2026 Lumize Contributors
// Licence: GNU GPLv3
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! A module to read the engine configuration file.
//!
//! The file is line oriented: one `key = value` pair per line, `#` starts a
//! comment, and all whitespace is stripped before parsing. Any unparsable or
//! out-of-range value is a fatal configuration error.

// Import crate definitions
use crate::definitions::*;

// Import standard library features
use std::fs;
use std::path::Path;

// Import FNV HashMap
use fnv::FnvHashMap;

// Import tracing features
use tracing::{debug, info};

// Import anyhow features
use anyhow::{Context, Result};

/// A function to read and validate the configuration file.
///
/// Returns the complete configuration, or the first error encountered. A
/// missing file, an unparsable value and an out-of-range value are all
/// treated as fatal so the daemon never starts from a half-read config.
///
pub fn read_config(path: &Path) -> Result<LumizeConfig> {
    // Try to read the whole file
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Unable to open config file {}", path.display()))?;

    // Start from the default configuration
    let mut config = LumizeConfig::default();

    // Walk the file line by line
    for (number, raw_line) in contents.lines().enumerate() {
        // Strip all whitespace before parsing
        let line: String = raw_line.chars().filter(|c| !c.is_whitespace()).collect();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Split into key and value
        let Some((key, value)) = line.split_once('=') else {
            continue; // lines without an assignment are ignored
        };

        // Match the key and validate the value
        match key {
            "port" => {
                config.port = parse_number(key, value)?;
                if config.port <= 1000 {
                    bail!("Config parameter \"port\" must be above 1000");
                }
            }
            "channels" => {
                config.channels = parse_number(key, value)?;
                if config.channels < 1 || config.channels > DMX_CHANNELS {
                    bail!("Config parameter \"channels\" must be between 1 and 512");
                }
            }
            "fps" => {
                config.fps = parse_number(key, value)?;
                if config.fps < 10 || config.fps > 200 {
                    bail!("Config parameter \"fps\" must be between 10 and 200");
                }
            }
            "default_transition" => {
                config.default_transition = parse_number(key, value)?;
            }
            "brightness_limits" => {
                config.brightness_limits = parse_brightness_limits(value)?;
            }
            "pushbutton_fade_delta" => {
                config.pushbutton_fade_delta = parse_number(key, value)?;
            }
            "pushbutton_fade_pause" => {
                config.pushbutton_fade_pause = parse_number(key, value)?;
            }
            "pushbutton_fade_reset_delay" => {
                config.pushbutton_fade_reset_delay = parse_number(key, value)?;
            }
            "enable_persistency" => {
                config.enable_persistency = parse_bool(key, value)?;
            }
            "persistency_file_path" => {
                if value.is_empty() {
                    bail!("Config parameter \"persistency_file_path\" must not be empty");
                }
                config.persistency_file_path = value.to_string();
            }
            "persistency_write_interval" => {
                config.persistency_write_interval = parse_number(key, value)?;
                if config.persistency_write_interval == 0 {
                    bail!("Config parameter \"persistency_write_interval\" must be above 0");
                }
            }
            "log_debug" => {
                config.log_debug = parse_bool(key, value)?;
            }

            // Ignore keys this version does not know about
            _ => debug!("[CONFIG] Ignoring unknown parameter \"{}\" on line {}", key, number + 1),
        }
    }

    Ok(config)
}

/// A function to log a recap of the active configuration.
///
pub fn recap_config(config: &LumizeConfig) {
    info!("[CONFIG] Config file read successfully!");
    debug!("         Port: {}", config.port);
    debug!("         Channels: {}", config.channels);
    debug!("         FPS: {}", config.fps);
    debug!("         Default transition: {}ms", config.default_transition);
    debug!("         Pushbutton fade delta: {}/s", config.pushbutton_fade_delta);
    debug!("         Pushbutton fade pause: {}ms", config.pushbutton_fade_pause);
    debug!(
        "         Pushbutton fade reset delay: {}s",
        config.pushbutton_fade_reset_delay
    );
    debug!("         Persistency enabled: {}", config.enable_persistency);
    if config.enable_persistency {
        debug!("         Persistency file: {}", config.persistency_file_path);
        debug!(
            "         Persistency write interval: {}s",
            config.persistency_write_interval
        );
    }
    debug!("         Debug logging: {}", config.log_debug);
}

/// A helper function to parse a decimal number for the provided key.
///
fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("Error parsing parameter \"{}\": value \"{}\" is not a valid number", key, value))
}

/// A helper function to parse a boolean value for the provided key.
///
/// Accepts the usual spellings: true/false, yes/no, on/off and 1/0.
///
fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(anyhow!("Error parsing parameter \"{}\": value \"{}\" is not a valid boolean", key, value)),
    }
}

/// A helper function to parse the brightness limit list.
///
/// The value is a comma-separated list of `<channel>-<min>-<max>` triples.
/// Each channel may appear at most once, both bounds must fit in 0-255 and
/// the minimum may not exceed the maximum. Channels that never appear keep
/// the full passthrough range.
///
fn parse_brightness_limits(value: &str) -> Result<Vec<BrightnessLimits>> {
    // Collect the triples, watching for duplicate channels
    let mut parsed: FnvHashMap<usize, BrightnessLimits> = FnvHashMap::default();
    for triple in value.split(',') {
        // Skip empty entries (e.g. a trailing comma)
        if triple.is_empty() {
            continue;
        }

        // Pull apart the three fields
        let fields: Vec<&str> = triple.split('-').collect();
        if fields.len() != 3 {
            bail!("Error parsing parameter \"brightness_limits\": malformed entry \"{}\"", triple);
        }
        let channel: usize = parse_number("brightness_limits", fields[0])?;
        let min: u8 = parse_number("brightness_limits", fields[1])?;
        let max: u8 = parse_number("brightness_limits", fields[2])?;

        // Validate the entry
        if channel >= DMX_CHANNELS {
            bail!("Error parsing parameter \"brightness_limits\": channel {} is out of range", channel);
        }
        if min > max {
            bail!(
                "Error parsing parameter \"brightness_limits\": minimum above maximum on channel {}",
                channel
            );
        }
        if parsed.insert(channel, BrightnessLimits { min, max }).is_some() {
            bail!("Error parsing parameter \"brightness_limits\": channel {} listed twice", channel);
        }
    }

    // Expand the map into the full per-channel table
    let mut limits = vec![BrightnessLimits::default(); DMX_CHANNELS];
    for (channel, entry) in parsed {
        limits[channel] = entry;
    }
    Ok(limits)
}
