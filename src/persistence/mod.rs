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

//! A module to persist the outward light states across restarts.
//!
//! The writer snapshots the outward on/off and brightness pair of every
//! channel into a single-line file, either on its timer or when the control
//! server signals a mutation. The file is read back once at startup, before
//! the renderer starts, so lights come back the way they were left.

// Import crate definitions
use crate::definitions::*;

// Import standard library features
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Import the timed mutex
use parking_lot::Mutex;

// Import tokio features
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

// Import tracing features
use tracing::{debug, info, warn};

/// A structure to run the persistency writer.
///
/// One snapshot is in flight at a time: notifications arriving while a
/// write is underway coalesce into the next wake-up.
///
pub struct PersistencyWriter {
    file_path: String,                     // the location of the persistency file
    interval: u64,                         // the write cadence, in seconds
    light_states: Arc<Mutex<LightStates>>, // the shared light state table
    notify: Arc<Notify>,                   // the wake-up line from the control server
    running: Arc<AtomicBool>,              // a flag to stop the writer task
    main_task: Option<JoinHandle<()>>,     // a handle to the writer task
}

// Implement key functionality for the persistency writer
impl PersistencyWriter {
    /// A function to create a new writer over the shared state table.
    ///
    pub fn new(light_states: Arc<Mutex<LightStates>>) -> Self {
        Self {
            file_path: DEFAULT_CONFIG_PERSISTENCY_FILE_PATH.to_string(),
            interval: DEFAULT_CONFIG_PERSISTENCY_WRITE_INTERVAL,
            light_states,
            notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(true)),
            main_task: None,
        }
    }

    /// A method to apply the engine configuration.
    ///
    pub fn configure(&mut self, config: &LumizeConfig) {
        self.file_path = config.persistency_file_path.clone();
        self.interval = config.persistency_write_interval;
    }

    /// A method to get the wake-up line handed to the control server.
    ///
    pub fn notify_handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// A method to start the writer task.
    ///
    pub fn start(&mut self) -> bool {
        info!("[PERSISTENCY] Starting writer on file {}", self.file_path);

        // Launch the writer task
        let file_path = self.file_path.clone();
        let interval = self.interval;
        let light_states = self.light_states.clone();
        let notify = self.notify.clone();
        let running = self.running.clone();
        self.main_task = Some(tokio::spawn(async move {
            while running.load(Ordering::Relaxed) {
                // Write the current snapshot
                write_snapshot(&file_path, &light_states).await;

                // Wait for the interval or the next mutation
                tokio::select! {
                    _ = notify.notified() => (),
                    _ = sleep(Duration::from_secs(interval)) => (),
                }
            }

            // Take one last snapshot so nothing is lost on the way out
            write_snapshot(&file_path, &light_states).await;
        }));

        true
    }

    /// A method to stop the writer task after a final snapshot.
    ///
    pub async fn stop(&mut self) {
        // Ask the task to exit and wait for it
        self.running.store(false, Ordering::Relaxed);
        self.notify.notify_one();
        if let Some(task) = self.main_task.take() {
            task.await.unwrap_or(());
        }
    }
}

/// A helper function to write one snapshot of the outward states.
///
async fn write_snapshot(file_path: &str, light_states: &Mutex<LightStates>) {
    debug!("[PERSISTENCY] Writing persistency file...");

    // Render the snapshot line before touching the filesystem
    let states_string = generate_states_string(light_states);

    // Overwrite the whole file in one shot
    if let Err(error) = tokio::fs::write(file_path, states_string).await {
        warn!("[PERSISTENCY] Error writing to persistency file: {}", error);
    }
}

/// A function to render the persistency line for the whole universe.
///
fn generate_states_string(light_states: &Mutex<LightStates>) -> String {
    let states = light_states.lock();
    let mut string = String::with_capacity(DMX_CHANNELS * 6);
    string.push_str(PERSISTENCY_FILE_VERSION);
    for (on, brightness) in states.outward_states() {
        string.push(',');
        string.push(if on { '1' } else { '0' });
        string.push('-');
        string.push_str(&brightness.to_string());
    }
    string
}

/// A function to read the persistency file into the light state table.
///
/// Runs once at startup, before the renderer starts. A missing or
/// unreadable file and a version mismatch keep the defaults; a bad value
/// only skips its own channel. Returns true if the file was applied.
///
pub fn read_persistency_file(file_path: &str, light_states: &Mutex<LightStates>) -> bool {
    debug!("[PERSISTENCY] Reading persistency file: {}...", file_path);

    // Read the first line of the file, which is all there is
    let contents = match fs::read_to_string(file_path) {
        Ok(contents) => contents,
        Err(error) => {
            warn!("[PERSISTENCY] Unable to read persistency file: {}", error);
            return false;
        }
    };
    let Some(states_string) = contents.lines().next() else {
        warn!("[PERSISTENCY] Persistency file is empty");
        return false;
    };

    // Parse the snapshot line into the table
    if !parse_states_string(states_string, light_states) {
        return false;
    }

    info!("[PERSISTENCY] Successfully read persistency file!");
    true
}

/// A helper function to parse a snapshot line and apply it to the table.
///
fn parse_states_string(states_string: &str, light_states: &Mutex<LightStates>) -> bool {
    // Split the line into the version tag and the channel pairs
    let fields: Vec<&str> = states_string.split(',').collect();

    // A snapshot from a different version is skipped wholesale
    if fields[0] != PERSISTENCY_FILE_VERSION {
        warn!(
            "[PERSISTENCY] Persistency file was written by a different version of Lumize DMX Engine! Skipping..."
        );
        return false;
    }

    // Apply the pairs under one lock
    let mut states = light_states.lock();
    for index in 0..DMX_CHANNELS {
        // A truncated file keeps the defaults for the remaining channels
        let Some(pair) = fields.get(index + 1) else {
            warn!("[PERSISTENCY] Persistency file is truncated at channel {}", index);
            break;
        };

        // Pull apart the on/off flag and the brightness
        let Some((state, brightness)) = pair.split_once('-') else {
            warn!("[PERSISTENCY] Bad entry in persistency file at channel {}", index);
            continue;
        };

        // Parse the on/off flag
        let channel = states.channel_mut(index);
        match state {
            "1" => channel.outward_on = true,
            "0" => channel.outward_on = false,
            _ => warn!("[PERSISTENCY] Bad state value in persistency file at channel {}", index),
        }

        // Parse the brightness, accepting the 0-255 range only
        match brightness.parse::<u8>() {
            Ok(value) => channel.outward_brightness = value,
            Err(_) => {
                warn!("[PERSISTENCY] Bad brightness value in persistency file at channel {}", index)
            }
        }

        // Lit channels come back at their stored level
        channel.fade_current = if channel.outward_on {
            channel.outward_brightness as f64
        } else {
            0.0
        };
    }

    true
}

// Tests of the persistence module
#[cfg(test)]
mod tests {
    use super::*;

    // Import standard library features
    use std::path::PathBuf;

    // A helper to build a table with a few channels set
    fn populated_states() -> Mutex<LightStates> {
        let states = Mutex::new(LightStates::new());
        {
            let mut table = states.lock();
            table.start_on_fade(0, Some(200), Some(0), 1000, 50);
            table.start_on_fade(3, Some(17), Some(0), 1000, 50);
            table.start_off_fade(3, Some(0), 1000, 50);
            table.start_on_fade(511, Some(1), Some(0), 1000, 50);
        }
        states
    }

    // Test that the snapshot line round-trips exactly
    #[test]
    fn snapshot_round_trip() {
        let states = populated_states();
        let line = generate_states_string(&states);
        assert!(line.starts_with("2.0,1-200,0-255"));

        // Parse the line into a fresh table
        let restored = Mutex::new(LightStates::new());
        assert!(parse_states_string(&line, &restored));

        // Every outward pair matches the original
        let original = states.lock();
        let copy = restored.lock();
        for (left, right) in original.outward_states().zip(copy.outward_states()) {
            assert_eq!(left, right);
        }

        // Lit channels restore their rendered level, dark ones stay dark
        assert_eq!(copy.channel(0).fade_current, 200.0);
        assert_eq!(copy.channel(3).fade_current, 0.0);
        assert_eq!(copy.channel(3).outward_brightness, 17);
        assert_eq!(copy.channel(511).fade_current, 1.0);
    }

    // Test that a version mismatch keeps the defaults
    #[test]
    fn version_mismatch_is_skipped() {
        let restored = Mutex::new(LightStates::new());
        assert!(!parse_states_string("1.0,1-200", &restored));
        assert_eq!(*restored.lock().channel(0), ChannelState::default());
    }

    // Test that bad values only affect their own channel
    #[test]
    fn bad_values_keep_defaults() {
        // Channel 0 has a bad flag, channel 1 a bad brightness, channel 2 is fine
        let mut line = String::from("2.0,x-200,1-300,1-128");
        for _ in 3..DMX_CHANNELS {
            line.push_str(",0-255");
        }

        let restored = Mutex::new(LightStates::new());
        assert!(parse_states_string(&line, &restored));

        let table = restored.lock();
        assert!(!table.channel(0).outward_on); // flag kept its default
        assert_eq!(table.channel(0).outward_brightness, 200); // brightness still applied
        assert!(table.channel(1).outward_on);
        assert_eq!(table.channel(1).outward_brightness, 255); // 300 was rejected
        assert_eq!(table.channel(1).fade_current, 255.0);
        assert_eq!(table.channel(2).outward_brightness, 128);
        assert_eq!(table.channel(2).fade_current, 128.0);
    }

    // Test that a truncated line keeps the tail at defaults
    #[test]
    fn truncated_line_keeps_tail() {
        let restored = Mutex::new(LightStates::new());
        assert!(parse_states_string("2.0,1-42", &restored));

        let table = restored.lock();
        assert!(table.channel(0).outward_on);
        assert_eq!(table.channel(0).outward_brightness, 42);
        assert_eq!(*table.channel(1), ChannelState::default());
    }

    // Test the full write-then-read cycle through a real file
    #[test]
    fn file_round_trip() {
        let mut path = std::env::temp_dir();
        path.push("lumize_persistency_test_round_trip");

        // Write the snapshot line the same way the writer task does
        let states = populated_states();
        fs::write(&path, generate_states_string(&states)).unwrap();

        // Read it back into a fresh table
        let restored = Mutex::new(LightStates::new());
        assert!(read_persistency_file(path.to_str().unwrap(), &restored));
        assert_eq!(restored.lock().channel(0).outward_brightness, 200);
    }

    // Test that a missing file is reported but harmless
    #[test]
    fn missing_file_keeps_defaults() {
        let path = PathBuf::from("/nonexistent/lumize_persistency");
        let restored = Mutex::new(LightStates::new());
        assert!(!read_persistency_file(path.to_str().unwrap(), &restored));
        assert_eq!(*restored.lock().channel(0), ChannelState::default());
    }
}
