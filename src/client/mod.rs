// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transports backed by [`tokio_modbus`] clients

use std::{fmt, io};

use async_trait::async_trait;
use tokio_modbus::{
    client::{Client as _, Context, Reader as _, Writer as _},
    prelude::SlaveContext as _,
    Slave,
};

use crate::{
    error::TransportError,
    transport::{Transport, TransportResult},
    Address, ExceptionCode, Quantity, UnitId, Word,
};

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

/// Adapts a connected [`Context`] to the [`Transport`] trait.
pub struct ModbusTransport {
    context: Context,
    /// The unit the context has been connected to.
    slave: Slave,
}

impl ModbusTransport {
    #[must_use]
    pub const fn new(context: Context, slave: Slave) -> Self {
        Self { context, slave }
    }
}

impl fmt::Debug for ModbusTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModbusTransport")
            .field("slave", &self.slave)
            .finish_non_exhaustive()
    }
}

fn flatten<T>(result: tokio_modbus::Result<T>) -> TransportResult<T> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(code)) => Err(TransportError::Exception(ExceptionCode::new(u8::from(code)))),
        Err(tokio_modbus::Error::Transport(err)) => Err(err.into()),
        Err(err) => Err(TransportError::Protocol(err.to_string())),
    }
}

#[async_trait]
impl Transport for ModbusTransport {
    async fn read_registers(
        &mut self,
        addr: Address,
        cnt: Quantity,
    ) -> TransportResult<Vec<Word>> {
        let words = flatten(self.context.read_holding_registers(addr, cnt).await)?;
        if words.len() != usize::from(cnt) {
            return Err(TransportError::Protocol(format!(
                "expected {cnt} registers, received {}",
                words.len()
            )));
        }
        Ok(words)
    }

    async fn write_registers(&mut self, addr: Address, words: &[Word]) -> TransportResult<()> {
        flatten(self.context.write_multiple_registers(addr, words).await)
    }

    fn set_unit(&mut self, unit: Option<UnitId>) {
        self.context.set_slave(unit.map_or(self.slave, Slave));
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        self.context.disconnect().await
    }
}
