// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [tokio](https://tokio.rs) based driver for
//! [Huawei SUN2000](https://solar.huawei.com) inverters speaking
//! [Modbus](https://en.wikipedia.org/wiki/Modbus).
//!
//! Registers are addressed by name through a [`Catalogue`](catalogue::Catalogue).
//! Requests for multiple names are merged into as few reads as possible,
//! and the raw words are decoded into typed [`Value`](codec::Value)s.
//!
//! A single background task owns the link to the device. It reconnects
//! and logs in again transparently, keeps a privileged session alive and
//! paces the requests as required by the device.
//!
//! ## Installation
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sun2000-modbus = "*"
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "tcp")]
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use sun2000_modbus::prelude::*;
//!
//! let connector = TcpConnector::new("192.168.200.1:6607".parse()?);
//! let device = Device::new(Config::default(), sun2000::catalogue(), Box::new(connector));
//! device.connect().await?;
//! let readings = device
//!     .get([sun2000::GRID_FREQUENCY, sun2000::ACTIVE_POWER])
//!     .await?;
//! for (name, value) in readings {
//!     match value {
//!         Ok(value) => println!("{name}: {value}"),
//!         Err(err) => println!("{name}: {err}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![warn(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude;

pub mod catalogue;
pub mod codec;
pub mod file;
pub mod planner;
pub mod retry;
pub mod session;
pub mod transport;

#[cfg(any(feature = "tcp", feature = "rtu"))]
pub mod client;

mod device;
pub use self::device::{Config, Device, Readings};

mod error;
pub use self::error::{Error, Result, TransportError};

mod frame;
pub use self::frame::{Address, ExceptionCode, Quantity, UnitId, Word};
