// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! A userspace runtime for TRDP's Ladder topology: dual redundant
//! subnets, a shared Traffic Store, and the PD (cyclic process data) and
//! MD (request/reply message data) session state machines that keep it
//! fed.
//!
//! # Examples
//! ```no_run
//! use trdp_core::taul::Taul;
//! use trdp_core::config::Config;
//!
//! # fn load_config() -> Config { unimplemented!() }
//! # fn main() {
//! let config = load_config();
//! let taul = match Taul::init(config) {
//!     Ok(t) => t,
//!     Err(e) => {
//!         println!("{:?}", e.to_string());
//!         return;
//!     }
//! };
//! taul.terminate();
//! # }
//! ```
pub mod config;
pub mod constant;
pub mod dataset;
pub mod error;
pub mod md;
pub mod net;
pub mod pd;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod taul;
pub mod wire;
