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

//! A module to render the light state table into DMX frames at a fixed rate.
//!
//! Every frame the renderer advances each channel's fade and push-button
//! ramp, maps the result through the per-channel brightness limits and hands
//! the frame to the DMX sender. The table lock is acquired with a short
//! timeout; if another holder keeps it too long the previous frame is sent
//! again so the output cadence never stalls.

// Import crate definitions
use crate::definitions::*;

// Import other structures into this module
use crate::dmx_sender::DmxSender;

// Import standard library features
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Import the timed mutex
use parking_lot::Mutex;

// Import tracing features
use tracing::{debug, info};

// Define the rendering constants
const LOCK_TIMEOUT: u64 = 5; // the longest wait for the table lock, in ms

/// The per-frame parameters derived from the configuration.
///
#[derive(Clone)]
struct RenderSettings {
    channels: usize,                          // the number of channels rendered and sent
    frame_period: Duration,                   // the target time per frame
    pushbutton_delta: f64,                    // the ramp increment per frame
    pushbutton_pause_frames: u32,             // frames to hold at the top of the ramp
    brightness_limits: Vec<BrightnessLimits>, // the per-channel output mapping
}

/// A structure to run the fixed-rate rendering loop.
///
/// The renderer owns the DMX sender: starting the renderer starts the
/// output, and stopping it stops the output once the last frame is done.
///
pub struct LightRenderer {
    dmx_sender: DmxSender,                        // the DMX output stage
    light_states: Arc<Mutex<LightStates>>,        // the shared light state table
    running: Arc<AtomicBool>,                     // a flag to stop the rendering thread
    rendering_thread: Option<thread::JoinHandle<()>>, // a handle to join the rendering thread
    fps: u32,                                     // the configured frame rate
    settings: RenderSettings,                     // the derived per-frame parameters
}

// Implement key functionality for the light renderer
impl LightRenderer {
    /// A function to create a new renderer over the shared state table.
    ///
    pub fn new(light_states: Arc<Mutex<LightStates>>) -> Self {
        Self {
            dmx_sender: DmxSender::new(),
            light_states,
            running: Arc::new(AtomicBool::new(true)),
            rendering_thread: None,
            fps: DEFAULT_CONFIG_FPS,
            settings: RenderSettings {
                channels: DEFAULT_CONFIG_CHANNELS,
                frame_period: Duration::from_millis(1000 / DEFAULT_CONFIG_FPS as u64),
                pushbutton_delta: DEFAULT_CONFIG_PUSHBUTTON_FADE_DELTA as f64
                    / DEFAULT_CONFIG_FPS as f64,
                pushbutton_pause_frames: (DEFAULT_CONFIG_PUSHBUTTON_FADE_PAUSE
                    * DEFAULT_CONFIG_FPS as u64
                    / 1000) as u32,
                brightness_limits: vec![BrightnessLimits::default(); DMX_CHANNELS],
            },
        }
    }

    /// A method to apply the engine configuration.
    ///
    pub fn configure(&mut self, config: &LumizeConfig) {
        self.fps = config.fps;
        self.settings = RenderSettings {
            channels: config.channels,
            frame_period: Duration::from_millis(1000 / config.fps as u64),
            pushbutton_delta: config.pushbutton_fade_delta as f64 / config.fps as f64,
            pushbutton_pause_frames: (config.pushbutton_fade_pause * config.fps as u64 / 1000)
                as u32,
            brightness_limits: config.brightness_limits.clone(),
        };

        // Configure the DMX output stage
        self.dmx_sender.configure(config.channels);
    }

    /// A method to start the DMX output and the rendering thread.
    ///
    pub fn start(&mut self) -> bool {
        info!("[LIGHT] Starting output to lights...");

        // The output stage comes up first so no frame is lost
        if !self.dmx_sender.start() {
            return false;
        }

        // Launch the rendering thread
        let light_states = self.light_states.clone();
        let running = self.running.clone();
        let dmx = self.dmx_sender.handle();
        let settings = self.settings.clone();
        self.rendering_thread = Some(thread::spawn(move || {
            let mut dmx_frame = vec![0u8; settings.channels];
            while running.load(Ordering::Relaxed) {
                // Note the render start time
                let render_begin = Instant::now();

                // Compute the new frame, or hold the previous one on contention
                if let Some(mut states) =
                    light_states.try_lock_for(Duration::from_millis(LOCK_TIMEOUT))
                {
                    for index in 0..settings.channels {
                        let value = advance_channel(states.channel_mut(index), &settings, index);
                        dmx_frame[index] =
                            map_brightness_limits(value, &settings.brightness_limits[index]);
                    }
                    states.advance_frame();
                }

                // Send the frame, best effort
                dmx.send_frame(&dmx_frame);

                // Wait out the remainder of the frame period
                if let Some(wait) = settings.frame_period.checked_sub(render_begin.elapsed()) {
                    thread::sleep(wait);
                }
            }
        }));

        info!("[LIGHT] Light output started at {} FPS!", self.fps);
        true
    }

    /// A method to stop the rendering thread and then the DMX output.
    ///
    pub fn stop(&mut self) {
        // Stop the rendering thread
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.rendering_thread.take() {
            handle.join().unwrap_or(());
        }

        // Stop the DMX output stage
        self.dmx_sender.stop();
    }
}

/// A function to advance one channel by one frame and return its rendered
/// level.
///
/// The fade advances first. When an eased fade crosses full progress it is
/// retired and the channel rests at its end level. An active push-button
/// ramp then overrides the rendered value: it climbs or falls by a fixed
/// amount per frame, holds for the configured pause at the top, and turns
/// around immediately at the bottom.
///
fn advance_channel(channel: &mut ChannelState, settings: &RenderSettings, index: usize) -> f64 {
    // Advance the fade
    let mut value;
    if channel.fade_delta == 0.0 {
        // No fade active, rest at the current level
        value = channel.fade_current;
    } else {
        channel.fade_progress += channel.fade_delta;

        // Retire a finished fade
        if channel.fade_progress > 1.0 {
            channel.fade_delta = 0.0;
            channel.fade_progress = 0.0;
            channel.fade_current = channel.fade_end;
            debug!("[LIGHT] Fade finished, channel: {}", index);

        // Otherwise compute the eased level
        } else {
            channel.fade_current = (channel.fade_end - channel.fade_start)
                * ease_in_out_sine(channel.fade_progress)
                + channel.fade_start;
        }
        value = channel.fade_current;
    }

    // An active push-button ramp overrides the fade
    if channel.pushbutton_fade {
        // Move the ramp by one frame
        if channel.pushbutton_fade_up {
            channel.pushbutton_fade_current += settings.pushbutton_delta;
        } else {
            channel.pushbutton_fade_current -= settings.pushbutton_delta;
        }

        // Hold at the top for the configured pause, then turn around
        if channel.pushbutton_fade_current >= 255.0 {
            channel.pushbutton_fade_current = 255.0;
            channel.pushbutton_pause_counter += 1;
            if channel.pushbutton_pause_counter >= settings.pushbutton_pause_frames {
                channel.pushbutton_fade_up = false;
                channel.pushbutton_pause_counter = 0;
            }

        // Turn around immediately at the bottom
        } else if channel.pushbutton_fade_current <= 0.0 {
            channel.pushbutton_fade_current = 0.0;
            channel.pushbutton_fade_up = true;
        }

        value = channel.pushbutton_fade_current;
    }

    value
}

/// A function to compute the sine-based in-out easing.
///
fn ease_in_out_sine(t: f64) -> f64 {
    0.5 * (1.0 + (std::f64::consts::PI * (t - 0.5)).sin())
}

/// A function to map a rendered level through the channel's brightness
/// limits.
///
/// A level below one always yields zero so an "off" channel stays dark even
/// with a raised minimum, and a full-scale level yields the channel's
/// maximum. Everything in between is remapped linearly into the min-max
/// range.
///
fn map_brightness_limits(value: f64, limits: &BrightnessLimits) -> u8 {
    if value < 1.0 {
        0
    } else if value > 254.0 {
        limits.max
    } else {
        (value * (limits.max - limits.min) as f64 / 255.0 + limits.min as f64) as u8
    }
}

// Tests of the light renderer module
#[cfg(test)]
mod tests {
    use super::*;

    // A helper to build render settings for the tests
    fn test_settings(fps: u32, pushbutton_delta: u32, pause_ms: u64) -> RenderSettings {
        RenderSettings {
            channels: 512,
            frame_period: Duration::from_millis(1000 / fps as u64),
            pushbutton_delta: pushbutton_delta as f64 / fps as f64,
            pushbutton_pause_frames: (pause_ms * fps as u64 / 1000) as u32,
            brightness_limits: vec![BrightnessLimits::default(); DMX_CHANNELS],
        }
    }

    // Test the endpoints and midpoint of the easing curve
    #[test]
    fn easing_shape() {
        assert!(ease_in_out_sine(0.0).abs() < 1e-9);
        assert!((ease_in_out_sine(0.5) - 0.5).abs() < 1e-9);
        assert!((ease_in_out_sine(1.0) - 1.0).abs() < 1e-9);

        // The curve is monotonic over its domain
        let mut previous = 0.0;
        for step in 0..=100 {
            let value = ease_in_out_sine(step as f64 / 100.0);
            assert!(value >= previous);
            previous = value;
        }
    }

    // Test the brightness limit mapping
    #[test]
    fn brightness_mapping() {
        let limited = BrightnessLimits { min: 10, max: 200 };
        let full = BrightnessLimits::default();

        // Off stays off even with a raised minimum
        assert_eq!(map_brightness_limits(0.0, &limited), 0);
        assert_eq!(map_brightness_limits(0.9, &limited), 0);

        // Full scale maps to the channel maximum
        assert_eq!(map_brightness_limits(255.0, &limited), 200);
        assert_eq!(map_brightness_limits(255.0, &full), 255);

        // The middle of the range lands between the limits, monotonically
        let mut previous = 0;
        for value in 1..=254 {
            let mapped = map_brightness_limits(value as f64, &limited);
            assert!(mapped >= limited.min);
            assert!(mapped <= limited.max);
            assert!(mapped >= previous);
            previous = mapped;
        }
    }

    // Test that a one-second fade at 100 FPS completes after 100 frames
    #[test]
    fn fade_completes_on_schedule() {
        let settings = test_settings(100, 25, 500);
        let mut states = LightStates::new();
        states.start_on_fade(0, Some(255), Some(1000), 1000, 100);
        assert!((states.channel(0).fade_delta - 0.01).abs() < 1e-12);

        // Run one second of frames
        for _ in 0..100 {
            advance_channel(states.channel_mut(0), &settings, 0);
        }

        // The fade crossed full progress and retired
        let channel = states.channel(0);
        assert_eq!(channel.fade_current, 255.0);
        assert_eq!(channel.fade_delta, 0.0);
        assert_eq!(channel.fade_progress, 0.0);
    }

    // Test that a steady channel renders identical values frame after frame
    #[test]
    fn steady_state_is_stable() {
        let settings = test_settings(50, 25, 500);
        let mut states = LightStates::new();
        states.start_on_fade(0, Some(180), Some(0), 1000, 50);

        let first = advance_channel(states.channel_mut(0), &settings, 0);
        let second = advance_channel(states.channel_mut(0), &settings, 0);
        assert_eq!(first, 180.0);
        assert_eq!(first, second);
    }

    // Test the push-button ramp: climb, pause at the top, turn around
    #[test]
    fn pushbutton_ramp_cycle() {
        // 255 units per second at 51 FPS: five units per frame
        let settings = test_settings(51, 255, 1000);
        let mut states = LightStates::new();
        states.start_pushbutton_fade(3, None, 500);

        // Climb to the top
        let mut frames = 0;
        while states.channel(3).pushbutton_fade_current < 255.0 {
            advance_channel(states.channel_mut(3), &settings, 3);
            frames += 1;
            assert!(frames < 100, "ramp never reached the top");
        }
        assert_eq!(frames, 51);
        assert!(states.channel(3).pushbutton_fade_up);

        // Hold for the pause, then invert (the arrival frame already counted one)
        for _ in 1..settings.pushbutton_pause_frames {
            assert_eq!(advance_channel(states.channel_mut(3), &settings, 3), 255.0);
        }
        assert!(!states.channel(3).pushbutton_fade_up);

        // Fall all the way down and turn around immediately
        for _ in 0..51 {
            advance_channel(states.channel_mut(3), &settings, 3);
        }
        assert_eq!(states.channel(3).pushbutton_fade_current, 0.0);
        advance_channel(states.channel_mut(3), &settings, 3);
        assert!(states.channel(3).pushbutton_fade_up);
    }

    // Test that an active ramp overrides a concurrent fade in the output
    #[test]
    fn pushbutton_overrides_fade() {
        let settings = test_settings(50, 250, 500);
        let mut states = LightStates::new();

        // Schedule a fade and engage the ramp on the same channel
        states.start_on_fade(6, Some(255), Some(1000), 1000, 50);
        states.start_pushbutton_fade(6, Some(true), 500);

        // The rendered value follows the ramp, not the fade
        let value = advance_channel(states.channel_mut(6), &settings, 6);
        assert_eq!(value, states.channel(6).pushbutton_fade_current);
    }

    // Test a limited channel end to end: full on renders the channel max
    #[test]
    fn limited_channel_full_on() {
        let mut settings = test_settings(100, 25, 500);
        settings.brightness_limits[0] = BrightnessLimits { min: 10, max: 200 };

        let mut states = LightStates::new();
        states.start_on_fade(0, Some(255), Some(0), 1000, 100);

        let value = advance_channel(states.channel_mut(0), &settings, 0);
        assert_eq!(map_brightness_limits(value, &settings.brightness_limits[0]), 200);
    }

    // Test the mid-fade level against the easing curve
    #[test]
    fn fade_midpoint_matches_easing() {
        let settings = test_settings(100, 25, 500);
        let mut states = LightStates::new();
        states.start_on_fade(0, Some(200), Some(1000), 1000, 100);

        // Advance half the fade
        for _ in 0..50 {
            advance_channel(states.channel_mut(0), &settings, 0);
        }

        // Halfway through the eased curve sits at half the range
        let channel = states.channel(0);
        assert!((channel.fade_current - 100.0).abs() < 1.0);
    }
}
