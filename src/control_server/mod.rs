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

//! A module to accept TCP control clients and feed their commands into the
//! light state table.
//!
//! Clients speak a newline-framed ASCII protocol. Each accepted client gets
//! the welcome banner, then its lines are parsed and applied in arrival
//! order. A small fixed number of clients is served at a time; a connection
//! beyond the cap is closed immediately.

// Reexport the command structures
pub use self::commands::{CommandContext, CommandOutcome};

// Define private submodules
mod commands;

// Import crate definitions
use crate::definitions::*;

// Import other structures into this module
use self::commands::handle_message;

// Import standard library features
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// Import the timed mutex
use parking_lot::Mutex;

// Import tokio features
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

// Import tracing features
use tracing::{debug, info, warn};

// Import anyhow features
use anyhow::{Context, Result};

// Define the server constants
const DEFAULT_PORT: u16 = 3141; // the port used when the server is never configured
const MAX_CLIENTS: usize = 5; // the number of clients served at a time

/// A structure to accept and serve the TCP control clients.
///
pub struct ControlServer {
    port: u16,                               // the TCP port to listen on
    light_states: Arc<Mutex<LightStates>>,   // the shared light state table
    context: Arc<CommandContext>,            // the protocol parameters from the config
    persistency_notify: Arc<Notify>,         // a line to wake the persistency writer
    shutdown: watch::Sender<bool>,           // the shutdown signal for every server task
    client_count: Arc<AtomicUsize>,          // the number of connected clients
    accept_task: Option<JoinHandle<()>>,     // a handle to the accept loop
}

// Implement key functionality for the control server
impl ControlServer {
    /// A function to create a new control server over the shared state
    /// table.
    ///
    pub fn new(light_states: Arc<Mutex<LightStates>>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            port: DEFAULT_PORT,
            light_states,
            context: Arc::new(CommandContext {
                fps: DEFAULT_CONFIG_FPS,
                default_transition: DEFAULT_CONFIG_DEFAULT_TRANSITION,
                direction_reset_frames: DEFAULT_CONFIG_PUSHBUTTON_FADE_RESET_DELAY
                    * DEFAULT_CONFIG_FPS as u64,
            }),
            persistency_notify: Arc::new(Notify::new()),
            shutdown,
            client_count: Arc::new(AtomicUsize::new(0)),
            accept_task: None,
        }
    }

    /// A method to apply the engine configuration.
    ///
    pub fn configure(&mut self, config: &LumizeConfig) {
        self.port = config.port;
        self.context = Arc::new(CommandContext {
            fps: config.fps,
            default_transition: config.default_transition,
            direction_reset_frames: config.pushbutton_fade_reset_delay * config.fps as u64,
        });
    }

    /// A method to wire in the persistency writer's wake-up line.
    ///
    pub fn set_persistency_notify(&mut self, notify: Arc<Notify>) {
        self.persistency_notify = notify;
    }

    /// A method to bind the listening socket and start accepting clients.
    ///
    /// Returns the bound address; a bind failure is fatal to startup.
    ///
    pub async fn start(&mut self) -> Result<SocketAddr> {
        info!("[TCP] Starting server...");

        // Bind the listening socket
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .with_context(|| format!("Unable to bind TCP port {}", self.port))?;
        let address = listener.local_addr().context("Unable to read the bound address")?;

        // Launch the accept loop
        let light_states = self.light_states.clone();
        let context = self.context.clone();
        let persistency_notify = self.persistency_notify.clone();
        let client_count = self.client_count.clone();
        let shutdown = self.shutdown.clone();
        let mut shutdown_recv = self.shutdown.subscribe();
        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Take the next incoming connection
                    result = listener.accept() => match result {
                        Ok((socket, peer)) => {
                            debug!("[TCP] New connection from {}", peer);

                            // Turn the connection away if the slots are full
                            if client_count.load(Ordering::SeqCst) >= MAX_CLIENTS {
                                warn!("[TCP] Client {} rejected: too many clients", peer);
                                drop(socket);
                                continue;
                            }

                            // Otherwise serve the client in its own task
                            client_count.fetch_add(1, Ordering::SeqCst);
                            debug!("[TCP] Client {} accepted!", peer);
                            tokio::spawn(handle_client(
                                socket,
                                peer,
                                light_states.clone(),
                                context.clone(),
                                persistency_notify.clone(),
                                client_count.clone(),
                                shutdown.subscribe(),
                            ));
                        }
                        Err(error) => warn!("[TCP] Error accepting client: {}", error),
                    },

                    // Exit when the server stops
                    _ = shutdown_recv.changed() => break,
                }
            }
        }));

        info!("[TCP] Listening on port {}", address.port());
        Ok(address)
    }

    /// A method to stop the accept loop and wake every client task.
    ///
    pub async fn stop(&mut self) {
        // Signal every server task to exit
        self.shutdown.send(true).unwrap_or(());

        // Wait for the accept loop to finish
        if let Some(task) = self.accept_task.take() {
            task.await.unwrap_or(());
        }
    }
}

/// A function to serve one client connection until it disconnects or the
/// server stops.
///
async fn handle_client(
    mut socket: TcpStream,
    peer: SocketAddr,
    light_states: Arc<Mutex<LightStates>>,
    context: Arc<CommandContext>,
    persistency_notify: Arc<Notify>,
    client_count: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Split the socket for buffered line reading
    let (read_half, mut write_half) = socket.split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    // Send the welcome banner
    if write_half.write_all(CLIENT_WELCOME_MESSAGE.as_bytes()).await.is_err() {
        debug!("[TCP] Client {} disconnected before the welcome message", peer);
        client_count.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    // Serve lines in arrival order
    loop {
        line.clear();
        tokio::select! {
            // Read the next line from the client
            result = reader.read_line(&mut line) => match result {
                // A zero-byte read means the client hung up
                Ok(0) => {
                    debug!("[TCP] Client {} disconnected", peer);
                    break;
                }

                // Parse and apply the line
                Ok(_) => match handle_message(&line, &light_states, &context) {
                    // Answer queries directly
                    CommandOutcome::Reply(reply) => {
                        if write_half.write_all(reply.as_bytes()).await.is_err() {
                            debug!("[TCP] Client {} disconnected", peer);
                            break;
                        }
                    }

                    // Wake the persistency writer after a mutation
                    CommandOutcome::Mutated => persistency_notify.notify_one(),

                    // Dropped commands need nothing further
                    CommandOutcome::Ignored => (),
                },

                // Any read error closes the connection
                Err(error) => {
                    debug!("[TCP] Error reading from client {}: {}", peer, error);
                    break;
                }
            },

            // Exit when the server stops
            _ = shutdown.changed() => break,
        }
    }

    // Free up the client slot
    client_count.fetch_sub(1, Ordering::SeqCst);
}

// Tests of the control server module
#[cfg(test)]
mod tests {
    use super::*;

    // Import tokio test features
    use tokio::io::AsyncReadExt;
    use tokio::time::{sleep, Duration};

    // A helper to start a server on an ephemeral port
    async fn start_test_server() -> (ControlServer, SocketAddr, Arc<Mutex<LightStates>>) {
        let light_states = Arc::new(Mutex::new(LightStates::new()));
        let mut server = ControlServer::new(light_states.clone());

        // An ephemeral port keeps the tests from colliding
        let mut config = LumizeConfig::default();
        config.port = 0;
        config.fps = 100;
        server.configure(&config);

        let address = server.start().await.expect("Unable to start the test server.");
        (server, address, light_states)
    }

    // A helper to connect and consume the welcome banner
    async fn connect(address: SocketAddr) -> TcpStream {
        let mut socket = TcpStream::connect(("127.0.0.1", address.port()))
            .await
            .expect("Unable to connect to the test server.");
        let mut banner = vec![0u8; CLIENT_WELCOME_MESSAGE.len()];
        socket
            .read_exact(&mut banner)
            .await
            .expect("Unable to read the welcome message.");
        assert_eq!(banner, CLIENT_WELCOME_MESSAGE.as_bytes());
        socket
    }

    // Test the welcome banner and a full command round trip
    #[tokio::test]
    async fn command_round_trip() {
        let (mut server, address, light_states) = start_test_server().await;
        let mut socket = connect(address).await;

        // Apply an instantaneous on command
        socket.write_all(b"on,0,b100,t0\n").await.unwrap();

        // Wait for the command task to apply the mutation
        let mut applied = false;
        for _ in 0..50 {
            sleep(Duration::from_millis(10)).await;
            if light_states.lock().channel(0).outward_brightness == 100 {
                applied = true;
                break;
            }
        }
        assert!(applied, "the on command was never applied");

        // Request the status and check the reply prefix
        socket.write_all(b"sreq\n").await.unwrap();
        let mut reader = BufReader::new(&mut socket);
        let mut reply = String::new();
        reader.read_line(&mut reply).await.unwrap();
        assert!(reply.starts_with("sres,1-100,0-255"));

        server.stop().await;
    }

    // Test that malformed lines keep the connection open
    #[tokio::test]
    async fn malformed_line_keeps_connection() {
        let (mut server, address, _light_states) = start_test_server().await;
        let mut socket = connect(address).await;

        // Send garbage, then a valid query
        socket.write_all(b"nonsense,5,zz\n").await.unwrap();
        socket.write_all(b"sreq\n").await.unwrap();

        // The reply still arrives
        let mut reader = BufReader::new(&mut socket);
        let mut reply = String::new();
        reader.read_line(&mut reply).await.unwrap();
        assert!(reply.starts_with("sres,"));

        server.stop().await;
    }

    // Test the client cap
    #[tokio::test]
    async fn client_cap_is_enforced() {
        let (mut server, address, _light_states) = start_test_server().await;

        // Fill every slot
        let mut clients = Vec::new();
        for _ in 0..MAX_CLIENTS {
            clients.push(connect(address).await);
        }

        // The next connection is closed without a banner
        let mut extra = TcpStream::connect(("127.0.0.1", address.port()))
            .await
            .expect("Unable to connect the extra client.");
        let mut buffer = [0u8; 1];
        let mut closed = false;
        for _ in 0..50 {
            match extra.read(&mut buffer).await {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(_) => panic!("the extra client received data"),
                Err(_) => {
                    closed = true;
                    break;
                }
            }
        }
        assert!(closed, "the extra client was not turned away");

        server.stop().await;
    }
}
