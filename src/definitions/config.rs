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

//! This module implements the configuration structures shared between the
//! config reader and the runtime components.

// Import crate definitions
use super::DMX_CHANNELS;

// Define the default config values
pub const DEFAULT_CONFIG_PORT: u16 = 8056;
pub const DEFAULT_CONFIG_CHANNELS: usize = 25;
pub const DEFAULT_CONFIG_FPS: u32 = 50;
pub const DEFAULT_CONFIG_DEFAULT_TRANSITION: u64 = 1000; // ms
pub const DEFAULT_CONFIG_PUSHBUTTON_FADE_DELTA: u32 = 25; // brightness units per second
pub const DEFAULT_CONFIG_PUSHBUTTON_FADE_PAUSE: u64 = 500; // ms
pub const DEFAULT_CONFIG_PUSHBUTTON_FADE_RESET_DELAY: u64 = 10; // seconds
pub const DEFAULT_CONFIG_PERSISTENCY_FILE_PATH: &str = "/var/lib/lumizedmxengine2/persistency";
pub const DEFAULT_CONFIG_PERSISTENCY_WRITE_INTERVAL: u64 = 600; // seconds

/// A per-channel brightness limit pair.
///
/// The renderer linearly remaps the rendered level from 0-255 into the
/// min-max range so physically dim fixtures never receive values below their
/// usable floor.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BrightnessLimits {
    pub min: u8, // the lowest value sent while the channel is lit
    pub max: u8, // the highest value ever sent on this channel
}

// Implement the default limits, a passthrough of the full range
impl Default for BrightnessLimits {
    fn default() -> Self {
        Self { min: 0, max: 255 }
    }
}

/// The complete engine configuration.
///
#[derive(Clone, Debug)]
pub struct LumizeConfig {
    pub port: u16,                            // the TCP control port
    pub channels: usize,                      // the number of channels sent on the wire
    pub fps: u32,                             // the rendering frame rate
    pub default_transition: u64,              // the default fade duration, in ms
    pub brightness_limits: Vec<BrightnessLimits>, // the per-channel output limits
    pub pushbutton_fade_delta: u32,           // the push-button ramp speed, units per second
    pub pushbutton_fade_pause: u64,           // the pause at the top of the ramp, in ms
    pub pushbutton_fade_reset_delay: u64,     // the direction-reset window, in seconds
    pub enable_persistency: bool,             // a flag to enable the persistency writer
    pub persistency_file_path: String,        // the location of the persistency file
    pub persistency_write_interval: u64,      // the write cadence, in seconds
    pub log_debug: bool,                      // a flag to enable debug logging
}

// Implement the default configuration
impl Default for LumizeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_CONFIG_PORT,
            channels: DEFAULT_CONFIG_CHANNELS,
            fps: DEFAULT_CONFIG_FPS,
            default_transition: DEFAULT_CONFIG_DEFAULT_TRANSITION,
            brightness_limits: vec![BrightnessLimits::default(); DMX_CHANNELS],
            pushbutton_fade_delta: DEFAULT_CONFIG_PUSHBUTTON_FADE_DELTA,
            pushbutton_fade_pause: DEFAULT_CONFIG_PUSHBUTTON_FADE_PAUSE,
            pushbutton_fade_reset_delay: DEFAULT_CONFIG_PUSHBUTTON_FADE_RESET_DELAY,
            enable_persistency: false,
            persistency_file_path: DEFAULT_CONFIG_PERSISTENCY_FILE_PATH.to_string(),
            persistency_write_interval: DEFAULT_CONFIG_PERSISTENCY_WRITE_INTERVAL,
            log_debug: false,
        }
    }
}
