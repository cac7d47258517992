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

//! This module defines all structures and types used across modules.

// Define program constants
pub const DMX_CHANNELS: usize = 512; // the number of channels in one DMX universe
pub const DEFAULT_CONFIG_FILE: &str = "/etc/lumizedmxengine2.conf"; // the default configuration file location
pub const CLIENT_WELCOME_MESSAGE: &str = "Lumize DMX Engine v2.0\n"; // the welcome message for new clients
pub const PERSISTENCY_FILE_VERSION: &str = "2.0"; // the version tag of the persistency file format

// Define submodules
mod channels;
mod config;

// Reexport all the definitions from the submodules
pub use self::channels::*;
pub use self::config::*;
