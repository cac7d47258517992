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

//! A module to drive the DMX universe over an FTDI-based USB serial adapter.
//!
//! # Note
//!
//! This module expects an FT232-style adapter (an Enttec Open DMX USB or
//! compatible) where the host generates the BREAK and MAB itself and the
//! channel bytes go out as plain 250 kbaud 8N2 serial data.

// Import crate definitions
use crate::definitions::DMX_CHANNELS;

// Import standard library features
use std::io::Write;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

// Import the serial features
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};

// Import tracing features
use tracing::{debug, info, warn};

// Define the adapter constants
const FTDI_VID: u16 = 0x0403; // the USB vendor id of the FTDI chip
const FTDI_PID: u16 = 0x6001; // the USB product id of the FT232 family
const DMX_BAUD: u32 = 250_000; // the DMX-512 line rate
const DMX_START_CODE: u8 = 0x00; // the null start code preceding the channel data
const BREAK_TIME: u64 = 110; // the time to hold the line in break, in us
const RECONNECT_DELAY: u64 = 2000; // the cadence of connection probes, in ms
const PORT_TIMEOUT: u64 = 100; // the serial write timeout, in ms
const FRAME_QUEUE_DEPTH: usize = 2; // pending frames before new ones are dropped
const DEFAULT_CHANNELS: usize = 25; // the fallback channel count

/// The messages accepted by the output thread.
///
enum DmxCommand {
    /// a variant carrying one frame of channel data
    Frame(Vec<u8>),

    /// a variant asking the output thread to exit
    Stop,
}

/// A cheap, cloneable handle used by the renderer to submit frames.
///
#[derive(Clone)]
pub struct DmxHandle {
    frame_send: mpsc::SyncSender<DmxCommand>, // a line to pass frames to the output thread
}

// Implement the frame submission method
impl DmxHandle {
    /// A method to submit one frame of channel data, best effort.
    ///
    /// Never blocks: if the output thread is behind (or gone), the frame is
    /// dropped and the next one takes its place.
    ///
    pub fn send_frame(&self, frame: &[u8]) {
        self.frame_send
            .try_send(DmxCommand::Frame(frame.to_vec()))
            .unwrap_or(()); // drop the frame if the queue is full
    }
}

/// A structure to hold and manipulate the DMX output.
///
/// The serial adapter is owned exclusively by a background output thread
/// which doubles as the connection manager: it probes for the adapter every
/// two seconds while disconnected, re-verifies it while idle, and writes
/// frames as they arrive. Device failures are always recoverable; a missing
/// adapter simply means frames are dropped until it appears.
///
pub struct DmxSender {
    channels: usize,                                // the number of channels sent per frame
    frame_send: mpsc::SyncSender<DmxCommand>,       // a line to pass commands to the output thread
    receive: Option<mpsc::Receiver<DmxCommand>>,    // the receive side, handed to the thread on start
    output_thread: Option<thread::JoinHandle<()>>,  // a handle to join the output thread
}

// Implement key functionality for the DMX sender
impl DmxSender {
    /// A function to create a new instance of the DmxSender.
    ///
    pub fn new() -> Self {
        // Create the frame queue
        let (frame_send, receive) = mpsc::sync_channel(FRAME_QUEUE_DEPTH);

        // Return the new instance, not yet started
        Self {
            channels: DEFAULT_CHANNELS,
            frame_send,
            receive: Some(receive),
            output_thread: None,
        }
    }

    /// A method to set the number of channels sent on the wire.
    ///
    /// Values outside 1-512 fall back to the default channel count.
    ///
    pub fn configure(&mut self, channels: usize) {
        if channels >= 1 && channels <= DMX_CHANNELS {
            self.channels = channels;
        } else {
            self.channels = DEFAULT_CHANNELS;
        }
    }

    /// A method to start the output thread.
    ///
    /// Returns true once the thread is live. The adapter itself may connect
    /// much later; until then frames are dropped.
    ///
    pub fn start(&mut self) -> bool {
        // Refuse a second start
        let Some(receive) = self.receive.take() else {
            return self.output_thread.is_some();
        };

        // Launch the output thread
        let mut output = DmxOutput::new(self.channels, receive);
        self.output_thread = Some(thread::spawn(move || {
            output.run_loop();
        }));

        true
    }

    /// A method to get a frame submission handle for the renderer.
    ///
    pub fn handle(&self) -> DmxHandle {
        DmxHandle {
            frame_send: self.frame_send.clone(),
        }
    }

    /// A method to stop the output thread and release the adapter.
    ///
    /// Idempotent after the first call.
    ///
    pub fn stop(&mut self) {
        if let Some(handle) = self.output_thread.take() {
            // Ask the thread to exit and wait for it
            self.frame_send.send(DmxCommand::Stop).unwrap_or(());
            handle.join().unwrap_or(());
        }
    }
}

/// The state owned by the output thread: the serial port, the frame queue
/// and the reconnection bookkeeping.
///
struct DmxOutput {
    channels: usize,                                // the number of channels sent per frame
    receive: mpsc::Receiver<DmxCommand>,            // the incoming command queue
    port: Option<Box<dyn SerialPort>>,              // the serial port, while connected
    last_probe: Option<Instant>,                    // the time of the last connection attempt
    last_check: Instant,                            // the time of the last liveness check
    announced_waiting: bool,                        // a flag to log the missing adapter only once
}

// Implement the output thread logic
impl DmxOutput {
    /// A function to create the output state.
    ///
    fn new(channels: usize, receive: mpsc::Receiver<DmxCommand>) -> Self {
        Self {
            channels,
            receive,
            port: None,
            last_probe: None,
            last_check: Instant::now(),
            announced_waiting: false,
        }
    }

    /// An internal function to run the output loop. This function should be
    /// launched as a new background thread.
    ///
    fn run_loop(&mut self) {
        loop {
            // Keep the connection alive (or keep probing for the adapter)
            self.maintain_connection();

            // Wait for a frame, re-checking the connection on idle timeouts
            match self.receive.recv_timeout(Duration::from_millis(RECONNECT_DELAY)) {
                // Write the frame if the adapter is available
                Ok(DmxCommand::Frame(frame)) => self.write_frame(&frame),

                // Exit on request
                Ok(DmxCommand::Stop) => break,

                // An idle timeout just loops back into maintain_connection
                Err(mpsc::RecvTimeoutError::Timeout) => (),

                // Quit the thread if every sender is gone
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        // Dropping the port closes the adapter
        debug!("[DMX] Output stopped");
    }

    /// A helper function to keep the connection state machine moving.
    ///
    /// While disconnected, a probe runs at most every two seconds. While
    /// connected, the adapter is re-verified on the same cadence so an
    /// unplugged device is noticed even when no frames are flowing.
    ///
    fn maintain_connection(&mut self) {
        // Verify a connection believed healthy
        if self.port.is_some() {
            if self.last_check.elapsed() >= Duration::from_millis(RECONNECT_DELAY) {
                self.last_check = Instant::now();
                let healthy = self
                    .port
                    .as_ref()
                    .map_or(false, |port| port.bytes_to_write().is_ok());
                if !healthy {
                    warn!("[DMX] Lost connection to the DMX adapter");
                    self.port = None;
                    self.last_probe = None; // probe again right away
                }
            }

        // Try to reach the adapter again
        } else {
            let due = self
                .last_probe
                .map_or(true, |probe| probe.elapsed() >= Duration::from_millis(RECONNECT_DELAY));
            if due {
                self.last_probe = Some(Instant::now());
                self.try_connect();
            }
        }
    }

    /// A helper function to locate and open the FTDI adapter.
    ///
    fn try_connect(&mut self) {
        // Look for the adapter among the available serial ports
        let ports = serialport::available_ports().unwrap_or_default();
        let found = ports.into_iter().find(|port| {
            matches!(
                &port.port_type,
                SerialPortType::UsbPort(usb) if usb.vid == FTDI_VID && usb.pid == FTDI_PID
            )
        });

        // If no adapter is plugged in, note it once and keep waiting
        let Some(info) = found else {
            if !self.announced_waiting {
                info!("[DMX] Waiting for DMX adapter...");
                self.announced_waiting = true;
            }
            return;
        };

        // Try to open and configure the port for DMX
        match serialport::new(info.port_name.as_str(), DMX_BAUD)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::Two)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(PORT_TIMEOUT))
            .open()
        {
            Ok(port) => {
                info!("[DMX] DMX adapter ready on {}", info.port_name);
                self.port = Some(port);
                self.last_check = Instant::now();
                self.announced_waiting = false;
            }
            Err(error) => {
                debug!("[DMX] Unable to open {}: {}", info.port_name, error);
            }
        }
    }

    /// A helper function to write one frame to the adapter.
    ///
    /// Each DMX packet is framed by two discrete line transitions: break on,
    /// then break off (the mark after break), followed by the start code and
    /// the channel data. Frames are dropped while disconnected; a write
    /// failure flips the state machine back to disconnected.
    ///
    fn write_frame(&mut self, frame: &[u8]) {
        // Silently drop the frame if the adapter is missing
        let Some(port) = self.port.as_mut() else {
            return;
        };

        // Send the break, the mark after break, and the packet
        let count = self.channels.min(frame.len());
        let result = (|| -> anyhow::Result<()> {
            port.set_break()?;

            // Hold the line low past the 88 us minimum break
            thread::sleep(Duration::from_micros(BREAK_TIME));
            port.clear_break()?;

            // The adapter prepends nothing: start code first, then the data
            port.write_all(&[DMX_START_CODE])?;
            port.write_all(&frame[..count])?;
            Ok(())
        })();

        // On any failure, drop the frame and go back to probing
        if let Err(error) = result {
            warn!("[DMX] Error sending frame: {}", error);
            self.port = None;
            self.last_probe = None; // wake the connection manager immediately
        }
    }
}

// Tests of the DMX sender module
#[cfg(test)]
mod tests {
    use super::*;

    // Test the channel count validation
    #[test]
    fn configure_bounds() {
        let mut sender = DmxSender::new();
        sender.configure(512);
        assert_eq!(sender.channels, 512);
        sender.configure(1);
        assert_eq!(sender.channels, 1);
        sender.configure(0);
        assert_eq!(sender.channels, DEFAULT_CHANNELS);
        sender.configure(513);
        assert_eq!(sender.channels, DEFAULT_CHANNELS);
    }

    // Test that frame submission never blocks, even with no thread running
    #[test]
    fn send_frame_never_blocks() {
        let sender = DmxSender::new();
        let handle = sender.handle();

        // Fill the queue well past its depth
        for _ in 0..20 {
            handle.send_frame(&[0u8; 25]);
        }
    }

    // Test that the output thread starts and stops cleanly without hardware
    #[test]
    fn start_and_stop() {
        let mut sender = DmxSender::new();
        sender.configure(25);
        assert!(sender.start());

        // Frames sent without an adapter are dropped
        let handle = sender.handle();
        handle.send_frame(&[128u8; 25]);

        // Stop is idempotent
        sender.stop();
        sender.stop();
    }
}
