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

//! A module to parse and apply the wire protocol commands.
//!
//! Commands are comma-separated ASCII with the verb first. A malformed
//! channel or parameter drops the whole command: the table is never left
//! with a partially applied mutation.

// Import crate definitions
use crate::definitions::*;

// Import the timed mutex
use parking_lot::Mutex;

// Import tracing features
use tracing::{debug, warn};

/// The protocol parameters the command handlers need from the
/// configuration.
///
pub struct CommandContext {
    pub fps: u32,                    // the renderer frame rate, for fade deltas
    pub default_transition: u64,     // the fade duration when none is given, in ms
    pub direction_reset_frames: u64, // the push-button direction-reset window, in frames
}

/// The result of handling one protocol line.
///
pub enum CommandOutcome {
    /// a variant carrying a response line for the client
    Reply(String),

    /// a variant indicating the light states changed
    Mutated,

    /// a variant indicating the line had no effect
    Ignored,
}

/// A function to handle one line received from a client.
///
/// All whitespace is stripped before parsing, so newline framing and client
/// padding never reach the verb matcher.
///
pub fn handle_message(
    message: &str,
    light_states: &Mutex<LightStates>,
    context: &CommandContext,
) -> CommandOutcome {
    // Remove whitespace characters from the message
    let cleaned: String = message.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return CommandOutcome::Ignored;
    }

    // Divide the message into fields
    let fields: Vec<&str> = cleaned.split(',').collect();

    // Recognize the verb
    match fields[0] {
        "sreq" => status_request(light_states),
        "on" => turn_on(&fields, light_states, context),
        "off" => turn_off(&fields, light_states, context),
        "pbfs" => pushbutton_fade_start(&fields, light_states, context),
        "pbfe" => pushbutton_fade_end(&fields, light_states),

        // Log and ignore anything else
        _ => {
            warn!("[TCP] Received: Unknown message type");
            CommandOutcome::Ignored
        }
    }
}

/// A helper function to answer a status request.
///
/// The response carries the outward on/off flag and target brightness of
/// every channel in the universe, in channel order.
///
fn status_request(light_states: &Mutex<LightStates>) -> CommandOutcome {
    debug!("[TCP] Received: Status request message");

    // Build the response under the lock
    let states = light_states.lock();
    let mut message = String::with_capacity(DMX_CHANNELS * 6);
    message.push_str("sres");
    for (on, brightness) in states.outward_states() {
        message.push(',');
        message.push(if on { '1' } else { '0' });
        message.push('-');
        message.push_str(&brightness.to_string());
    }
    message.push('\n');

    CommandOutcome::Reply(message)
}

/// A helper function to handle a turn on command.
///
fn turn_on(
    fields: &[&str],
    light_states: &Mutex<LightStates>,
    context: &CommandContext,
) -> CommandOutcome {
    // The channel is required
    let Some(channel) = parse_channel(fields) else {
        return CommandOutcome::Ignored;
    };

    // Gather the optional parameters, dropping the command on any bad one
    let mut brightness: Option<u8> = None;
    let mut transition: Option<u64> = None;
    for field in &fields[2..] {
        // Skip empty fields
        if field.is_empty() {
            continue;
        }

        // Parameters are tagged by their first character
        match field.as_bytes()[0] {
            b'b' => {
                if brightness.is_none() {
                    match field[1..].parse::<u8>() {
                        Ok(value) => brightness = Some(value),
                        Err(_) => {
                            warn!("[TCP] Invalid brightness in on command");
                            return CommandOutcome::Ignored;
                        }
                    }
                }
            }
            b't' => {
                if transition.is_none() {
                    match field[1..].parse::<u64>() {
                        Ok(value) => transition = Some(value),
                        Err(_) => {
                            warn!("[TCP] Invalid transition in on command");
                            return CommandOutcome::Ignored;
                        }
                    }
                }
            }
            _ => {
                warn!("[TCP] Unknown parameter in on command");
                return CommandOutcome::Ignored;
            }
        }
    }

    debug!(
        "[MESSAGE] ON Command, channel: {}, brightness: {:?}, transition: {:?}",
        channel, brightness, transition
    );

    // Apply the command atomically
    light_states.lock().start_on_fade(
        channel,
        brightness,
        transition,
        context.default_transition,
        context.fps,
    );
    CommandOutcome::Mutated
}

/// A helper function to handle a turn off command.
///
fn turn_off(
    fields: &[&str],
    light_states: &Mutex<LightStates>,
    context: &CommandContext,
) -> CommandOutcome {
    // The channel is required
    let Some(channel) = parse_channel(fields) else {
        return CommandOutcome::Ignored;
    };

    // Gather the optional transition
    let mut transition: Option<u64> = None;
    for field in &fields[2..] {
        if field.is_empty() {
            continue;
        }
        match field.as_bytes()[0] {
            b't' => {
                if transition.is_none() {
                    match field[1..].parse::<u64>() {
                        Ok(value) => transition = Some(value),
                        Err(_) => {
                            warn!("[TCP] Invalid transition in off command");
                            return CommandOutcome::Ignored;
                        }
                    }
                }
            }
            _ => {
                warn!("[TCP] Unknown parameter in off command");
                return CommandOutcome::Ignored;
            }
        }
    }

    debug!(
        "[MESSAGE] OFF Command, channel: {}, transition: {:?}",
        channel, transition
    );

    // Apply the command atomically
    light_states.lock().start_off_fade(
        channel,
        transition,
        context.default_transition,
        context.fps,
    );
    CommandOutcome::Mutated
}

/// A helper function to handle a push-button fade start command.
///
fn pushbutton_fade_start(
    fields: &[&str],
    light_states: &Mutex<LightStates>,
    context: &CommandContext,
) -> CommandOutcome {
    // The channel is required
    let Some(channel) = parse_channel(fields) else {
        return CommandOutcome::Ignored;
    };

    // Gather the optional direction flag
    let mut direction: Option<bool> = None;
    for field in &fields[2..] {
        if field.is_empty() {
            continue;
        }
        match *field {
            "u" => {
                if direction.is_none() {
                    direction = Some(true);
                }
            }
            "d" => {
                if direction.is_none() {
                    direction = Some(false);
                }
            }
            _ => {
                warn!("[TCP] Unknown parameter in pbfs command");
                return CommandOutcome::Ignored;
            }
        }
    }

    debug!(
        "[MESSAGE] PBFS Command, channel: {}, direction: {:?}",
        channel, direction
    );

    // Apply the command atomically
    light_states
        .lock()
        .start_pushbutton_fade(channel, direction, context.direction_reset_frames);
    CommandOutcome::Mutated
}

/// A helper function to handle a push-button fade end command.
///
fn pushbutton_fade_end(fields: &[&str], light_states: &Mutex<LightStates>) -> CommandOutcome {
    // The channel is required
    let Some(channel) = parse_channel(fields) else {
        return CommandOutcome::Ignored;
    };

    debug!("[MESSAGE] PBFE Command, channel: {}", channel);

    // Apply the command atomically
    light_states.lock().end_pushbutton_fade(channel);
    CommandOutcome::Mutated
}

/// A helper function to parse the channel field of a command.
///
fn parse_channel(fields: &[&str]) -> Option<usize> {
    // The channel is always the second field
    let Some(field) = fields.get(1) else {
        warn!("[TCP] Malformed command: missing channel");
        return None;
    };

    // Parse the decimal channel number and verify the range
    match field.parse::<usize>() {
        Ok(channel) if channel < DMX_CHANNELS => Some(channel),
        _ => {
            warn!("[TCP] Malformed command: invalid channel");
            None
        }
    }
}

// Tests of the command module
#[cfg(test)]
mod tests {
    use super::*;

    // A helper to build the context used by most tests
    fn test_context(fps: u32) -> CommandContext {
        CommandContext {
            fps,
            default_transition: 1000,
            direction_reset_frames: 10 * fps as u64,
        }
    }

    // A helper to check that a command mutated the table
    fn assert_mutated(outcome: &CommandOutcome) {
        assert!(matches!(outcome, CommandOutcome::Mutated));
    }

    // Test a turn on command with brightness and default transition
    #[test]
    fn on_with_brightness() {
        let states = Mutex::new(LightStates::new());
        let context = test_context(100);

        let outcome = handle_message("on,0,b255", &states, &context);
        assert_mutated(&outcome);

        let table = states.lock();
        let channel = table.channel(0);
        assert!(channel.outward_on);
        assert_eq!(channel.outward_brightness, 255);
        assert_eq!(channel.fade_end, 255.0);
        assert!((channel.fade_delta - 0.01).abs() < 1e-12);
    }

    // Test an instantaneous turn on command
    #[test]
    fn on_instantaneous() {
        let states = Mutex::new(LightStates::new());
        let context = test_context(100);

        handle_message("on,0,b200,t0", &states, &context);
        let table = states.lock();
        assert_eq!(table.channel(0).fade_current, 200.0);
        assert_eq!(table.channel(0).fade_delta, 0.0);
    }

    // Test that an off command keeps the last brightness
    #[test]
    fn off_preserves_brightness() {
        let states = Mutex::new(LightStates::new());
        let context = test_context(100);

        handle_message("on,0,b200,t0", &states, &context);
        let outcome = handle_message("off,0", &states, &context);
        assert_mutated(&outcome);

        let table = states.lock();
        let channel = table.channel(0);
        assert!(!channel.outward_on);
        assert_eq!(channel.outward_brightness, 200);
        assert_eq!(channel.fade_end, 0.0);
        assert_eq!(channel.fade_start, 200.0);
        assert!(channel.fade_delta > 0.0);
    }

    // Test the status reply after the off command above
    #[test]
    fn status_after_off() {
        let states = Mutex::new(LightStates::new());
        let context = test_context(100);

        handle_message("on,0,b200,t0", &states, &context);
        handle_message("off,0", &states, &context);

        let CommandOutcome::Reply(reply) = handle_message("sreq", &states, &context) else {
            panic!("status request did not produce a reply");
        };
        assert!(reply.starts_with("sres,0-200,0-255,0-255"));
        assert!(reply.ends_with('\n'));

        // One verb plus one pair per channel
        assert_eq!(reply.trim_end().split(',').count(), DMX_CHANNELS + 1);
    }

    // Test that whitespace anywhere in the line is ignored
    #[test]
    fn whitespace_is_stripped() {
        let states = Mutex::new(LightStates::new());
        let context = test_context(50);

        let outcome = handle_message(" on , 7 , b90 , t0 \r\n", &states, &context);
        assert_mutated(&outcome);
        assert_eq!(states.lock().channel(7).outward_brightness, 90);
    }

    // Test the push-button verbs
    #[test]
    fn pushbutton_start_and_end() {
        let states = Mutex::new(LightStates::new());
        let context = test_context(50);

        // Start with an explicit downward direction
        handle_message("pbfs,3,d", &states, &context);
        {
            let table = states.lock();
            assert!(table.channel(3).pushbutton_fade);
            assert!(!table.channel(3).pushbutton_fade_up);
        }

        // Nudge the ramp and release it
        states.lock().channel_mut(3).pushbutton_fade_current = 42.0;
        handle_message("pbfe,3", &states, &context);
        let table = states.lock();
        let channel = table.channel(3);
        assert!(!channel.pushbutton_fade);
        assert_eq!(channel.outward_brightness, 42);
        assert!(channel.outward_on);
        assert_eq!(channel.fade_current, 42.0);
    }

    // Test that malformed commands leave the table untouched
    #[test]
    fn malformed_commands_have_no_effect() {
        let states = Mutex::new(LightStates::new());
        let context = test_context(50);

        for message in [
            "on",              // missing channel
            "on,512",          // channel out of range
            "on,-1",           // negative channel
            "on,abc",          // non-numeric channel
            "on,0,b300",       // brightness out of range
            "on,0,bxx",        // non-numeric brightness
            "on,0,t-5",        // negative transition
            "on,0,x5",         // unknown parameter tag
            "off,0,b100",      // brightness not valid for off
            "pbfs,0,x",        // invalid direction flag
            "dance,0",         // unknown verb
            "",                // empty line
        ] {
            let outcome = handle_message(message, &states, &context);
            assert!(
                matches!(outcome, CommandOutcome::Ignored),
                "command was not dropped: {}",
                message
            );
        }

        // Nothing changed anywhere in the table
        let table = states.lock();
        for index in 0..DMX_CHANNELS {
            assert_eq!(*table.channel(index), ChannelState::default());
        }
    }

    // Test that the first of a repeated parameter wins
    #[test]
    fn first_parameter_wins() {
        let states = Mutex::new(LightStates::new());
        let context = test_context(50);

        handle_message("on,5,b10,b20,t0", &states, &context);
        assert_eq!(states.lock().channel(5).outward_brightness, 10);
    }
}
