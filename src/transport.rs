// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The two register primitives consumed from a Modbus transport.

use std::{fmt::Debug, io};

use async_trait::async_trait;

use crate::{error::TransportError, Address, Quantity, UnitId, Word};

/// Result of a single round trip.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Transport independent register access.
///
/// Implementations only move words. Framing, checksums and the wire format
/// of exceptions are their business, the latter being reported as
/// [`TransportError::Exception`].
#[async_trait]
pub trait Transport: Send + Debug {
    /// Read multiple holding registers (0x03).
    async fn read_registers(&mut self, addr: Address, cnt: Quantity)
        -> TransportResult<Vec<Word>>;

    /// Write multiple holding registers (0x10).
    async fn write_registers(&mut self, addr: Address, words: &[Word]) -> TransportResult<()>;

    /// Address subsequent requests to another unit behind the link.
    ///
    /// `None` restores the unit the link has been established for.
    fn set_unit(&mut self, unit: Option<UnitId>);

    /// Disconnects the transport.
    ///
    /// Dropping the transport without explicitly disconnecting it
    /// beforehand should also work and free all resources.
    async fn disconnect(&mut self) -> io::Result<()>;
}

/// Trait for (re-)creating new transports on demand.
///
/// The session invokes it for the initial connect and every reconnect.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    /// Establish a new link to the device.
    async fn connect(&self) -> TransportResult<Box<dyn Transport>>;
}
