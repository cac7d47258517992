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

//! The main module of the Lumize DMX Engine which pulls from the other
//! modules: it reads the configuration, wires the components around the
//! shared light state table, and shuts everything down in order.

// Define program modules
mod config_reader;
mod control_server;
mod definitions;
mod dmx_sender;
mod light_renderer;
mod persistence;

// Import crate definitions
use crate::definitions::*;

// Import other structures into this module
use self::config_reader::{read_config, recap_config};
use self::control_server::ControlServer;
use self::light_renderer::LightRenderer;
use self::persistence::{read_persistency_file, PersistencyWriter};

// Import standard library features
use std::path::Path;
use std::process;
use std::sync::Arc;

// Import the timed mutex
use parking_lot::Mutex;

// Import anyhow features
#[macro_use]
extern crate anyhow;

// Import tracing features
use tracing::{error, info, Level};

// Import clap features
use clap::Parser;

/// Struct to hold the optional arguments for the engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Arguments {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,
}

/// The Lumize structure to contain the program launching and overall
/// communication code.
///
struct Lumize;

// Implement the engine startup and shutdown functionality
impl Lumize {
    /// A function to setup the logging configuration
    ///
    fn setup_logging(log_debug: bool) {
        let level = if log_debug { Level::DEBUG } else { Level::INFO };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .init();
    }

    /// A function to build and run the engine until shutdown.
    ///
    /// Returns the process exit code.
    ///
    async fn run(config: LumizeConfig) -> i32 {
        // Create the shared light state table
        let light_states = Arc::new(Mutex::new(LightStates::new()));

        // Create the persistency writer first so the control server can be
        // handed its wake-up line
        let mut persistency_writer = PersistencyWriter::new(light_states.clone());
        persistency_writer.configure(&config);

        // Restore the previous states before any rendering begins
        if config.enable_persistency {
            read_persistency_file(&config.persistency_file_path, &light_states);
        }

        // Start the light renderer, which brings up the DMX output with it
        let mut light_renderer = LightRenderer::new(light_states.clone());
        light_renderer.configure(&config);
        if !light_renderer.start() {
            error!("[LIGHT] Unable to start the light renderer");
            return 2;
        }

        // Start the control server
        let mut control_server = ControlServer::new(light_states.clone());
        control_server.configure(&config);
        control_server.set_persistency_notify(persistency_writer.notify_handle());
        if let Err(server_error) = control_server.start().await {
            error!("[TCP] {:#}", server_error);
            light_renderer.stop();
            return 3;
        }

        // Start the persistency writer if it's enabled
        if config.enable_persistency {
            if !persistency_writer.start() {
                error!("[PERSISTENCY] Unable to start the persistency writer");
                control_server.stop().await;
                light_renderer.stop();
                return 4;
            }
        }

        // Run until asked to shut down
        wait_for_shutdown().await;
        info!("Shutting down...");

        // Stop the components in dependency order: no new commands, then the
        // final snapshot, then the renderer and its DMX output
        control_server.stop().await;
        if config.enable_persistency {
            persistency_writer.stop().await;
        }
        light_renderer.stop();

        0
    }
}

/// A function to wait for a shutdown request from the system.
///
async fn wait_for_shutdown() {
    // Listen for the usual daemon signals
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => (),
                _ = terminate.recv() => (),
            }
        }

        // Fall back to interrupt only
        Err(_) => {
            tokio::signal::ctrl_c().await.unwrap_or(());
        }
    }
}

/// The main function of the program, simplified to as high a level as
/// possible.
///
#[tokio::main]
async fn main() {
    // Get the commandline arguments
    let arguments = Arguments::parse();

    // Read the configuration file before anything else
    let config = match read_config(Path::new(&arguments.config)) {
        Ok(config) => config,
        Err(config_error) => {
            Lumize::setup_logging(false);
            error!("[CONFIG] {:#}", config_error);
            process::exit(1);
        }
    };

    // Bring up logging at the configured level
    Lumize::setup_logging(config.log_debug);
    info!("##### Lumize DMX Engine 2 #####");
    recap_config(&config);

    // Create the engine and run until directed otherwise
    let code = Lumize::run(config).await;
    if code != 0 {
        process::exit(code);
    }
}
