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

//! This module implements the shared light state table. One record per DMX
//! channel holds the outward on/off state, the active fade and the active
//! push-button ramp. The table is shared between the control server, the
//! renderer and the persistency writer behind a single timed mutex; the
//! state transitions live here so that the protocol layer stays a thin
//! parser.

// Import crate definitions
use super::DMX_CHANNELS;

/// The complete state of a single DMX channel.
///
/// The outward state is the client-facing on/off and target brightness pair.
/// It reflects the most recent command, not the instantaneous rendered level,
/// and the brightness is preserved across off/on transitions so that a plain
/// "on" restores the previous level.
///
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChannelState {
    pub outward_on: bool,              // the last client-facing on/off decision
    pub outward_brightness: u8,        // the last commanded target brightness
    pub fade_current: f64,             // the current rendered level, 0-255
    pub fade_start: f64,               // the level the active fade started from
    pub fade_end: f64,                 // the level the active fade ends at
    pub fade_progress: f64,            // the eased-parameter progress, 0-1
    pub fade_delta: f64,               // the per-frame progress increment, 0 if no fade
    pub pushbutton_fade: bool,         // a flag indicating an active push-button ramp
    pub pushbutton_fade_up: bool,      // the direction of the push-button ramp
    pub pushbutton_fade_current: f64,  // the push-button ramp position, 0-255
    pub pushbutton_pause_counter: u32, // frames spent paused at the top of the ramp
    pub pushbutton_last_release: u64,  // the frame number of the last ramp release
}

// Implement the default channel state
impl Default for ChannelState {
    fn default() -> Self {
        Self {
            outward_on: false,
            outward_brightness: 255, // a fresh channel turns on at full brightness
            fade_current: 0.0,
            fade_start: 0.0,
            fade_end: 0.0,
            fade_progress: 0.0,
            fade_delta: 0.0,
            pushbutton_fade: false,
            pushbutton_fade_up: false,
            pushbutton_fade_current: 0.0,
            pushbutton_pause_counter: 0,
            pushbutton_last_release: 0,
        }
    }
}

/// The state table for one complete DMX universe.
///
/// The table also carries a monotonic frame counter, advanced by the renderer
/// once per rendered frame. The counter is the clock used to decide whether a
/// new push-button fade resumes in the inverted direction or starts fresh.
///
pub struct LightStates {
    channels: Vec<ChannelState>, // one record per channel, DMX_CHANNELS long
    frame: u64,                  // the renderer frame counter
}

// Implement key functionality for the light state table
impl LightStates {
    /// A function to create a new table with every channel off.
    ///
    pub fn new() -> Self {
        Self {
            channels: vec![ChannelState::default(); DMX_CHANNELS],
            frame: 0,
        }
    }

    /// A method to access a single channel record.
    ///
    pub fn channel(&self, index: usize) -> &ChannelState {
        &self.channels[index]
    }

    /// A method to access a single channel record mutably.
    ///
    pub fn channel_mut(&mut self, index: usize) -> &mut ChannelState {
        &mut self.channels[index]
    }

    /// A method to read the current renderer frame number.
    ///
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// A method to advance the renderer frame counter by one frame.
    ///
    pub fn advance_frame(&mut self) {
        self.frame += 1;
    }

    /// A method to iterate over the outward on/off and brightness pairs of
    /// every channel, in channel order. Used for status replies and for the
    /// persistency snapshot.
    ///
    pub fn outward_states(&self) -> impl Iterator<Item = (bool, u8)> + '_ {
        self.channels
            .iter()
            .map(|channel| (channel.outward_on, channel.outward_brightness))
    }

    /// A method to start an on-fade on the selected channel.
    ///
    /// The fade starts from the current rendered level and ends at the
    /// requested brightness, or at the last commanded brightness if none was
    /// requested. A zero transition applies the target immediately.
    ///
    pub fn start_on_fade(
        &mut self,
        index: usize,
        brightness: Option<u8>,
        transition: Option<u64>,
        default_transition: u64,
        fps: u32,
    ) {
        // Resolve the target and duration before borrowing the channel
        let target = brightness.unwrap_or(self.channels[index].outward_brightness);
        let duration = transition.unwrap_or(default_transition);

        // Schedule the fade and update the outward state
        self.schedule_fade(index, target as f64, duration, fps);
        let channel = &mut self.channels[index];
        channel.outward_on = true;
        channel.outward_brightness = target;
    }

    /// A method to start an off-fade on the selected channel.
    ///
    /// The fade ends at zero. The outward brightness is left untouched so
    /// that a later "on" command restores the previous level.
    ///
    pub fn start_off_fade(
        &mut self,
        index: usize,
        transition: Option<u64>,
        default_transition: u64,
        fps: u32,
    ) {
        let duration = transition.unwrap_or(default_transition);

        // Schedule the fade and update the outward state
        self.schedule_fade(index, 0.0, duration, fps);
        self.channels[index].outward_on = false;
    }

    /// A method to engage the push-button ramp on the selected channel.
    ///
    /// An explicit direction always wins. Otherwise, if the previous ramp was
    /// released less than the reset delay ago, the ramp resumes in the
    /// inverted direction; a release further in the past starts a fresh ramp
    /// going up. The ramp always departs from the current rendered level.
    ///
    pub fn start_pushbutton_fade(
        &mut self,
        index: usize,
        direction_up: Option<bool>,
        reset_delay_frames: u64,
    ) {
        let now = self.frame();
        let channel = &mut self.channels[index];

        // Resolve the ramp direction
        let up = match direction_up {
            // Honor an explicit direction
            Some(up) => up,

            // Otherwise decide based on the last release
            None => {
                if channel.pushbutton_last_release > 0
                    && now.saturating_sub(channel.pushbutton_last_release) < reset_delay_frames
                {
                    !channel.pushbutton_fade_up // resume, inverted
                } else {
                    true // start fresh, going up
                }
            }
        };

        // Engage the ramp from the current rendered level
        channel.pushbutton_fade = true;
        channel.pushbutton_fade_up = up;
        channel.pushbutton_fade_current = channel.fade_current;
        channel.pushbutton_pause_counter = 0;
    }

    /// A method to end the push-button ramp on the selected channel.
    ///
    /// The momentary ramp value is latched into the outward state (on iff the
    /// value is at least one) and converted into a completed fade so the
    /// renderer keeps emitting it. A release without an active ramp is
    /// ignored.
    ///
    pub fn end_pushbutton_fade(&mut self, index: usize) {
        let now = self.frame();
        let channel = &mut self.channels[index];

        // Ignore a release without a matching start
        if !channel.pushbutton_fade {
            return;
        }

        // Record the release for the direction-reset decision
        channel.pushbutton_fade = false;
        channel.pushbutton_last_release = now;

        // Latch the momentary value as a completed fade
        let value = channel.pushbutton_fade_current.clamp(0.0, 255.0);
        channel.fade_current = value;
        channel.fade_start = value;
        channel.fade_end = value;
        channel.fade_progress = 0.0;
        channel.fade_delta = 0.0;

        // Update the outward state
        channel.outward_brightness = value.round() as u8;
        channel.outward_on = value >= 1.0;
    }

    /// A helper method to schedule a fade from the current rendered level to
    /// the provided end level over the provided duration.
    ///
    /// The per-frame progress increment is chosen so the fade crosses full
    /// progress after fps * duration / 1000 frames. A zero duration applies
    /// the end level immediately with no fade scheduled.
    ///
    fn schedule_fade(&mut self, index: usize, end: f64, duration_ms: u64, fps: u32) {
        let channel = &mut self.channels[index];

        // Apply a zero-duration change immediately
        if duration_ms == 0 {
            channel.fade_current = end;
            channel.fade_start = end;
            channel.fade_end = end;
            channel.fade_progress = 0.0;
            channel.fade_delta = 0.0;
            return;
        }

        // Otherwise schedule the fade from the current level
        channel.fade_start = channel.fade_current;
        channel.fade_end = end;
        channel.fade_progress = 0.0;
        channel.fade_delta = 1000.0 / (fps as f64 * duration_ms as f64);
    }
}
