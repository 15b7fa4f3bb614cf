// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connecting via Modbus RTU on a serial line

use async_trait::async_trait;
use tokio_modbus::Slave;
use tokio_serial::SerialStream;

use super::ModbusTransport;
use crate::{
    error::TransportError,
    transport::{Connector, Transport, TransportResult},
};

/// Opens the serial port, once per (re-)connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuConnector {
    pub path: String,
    pub baud_rate: u32,
    pub slave: u8,
}

impl RtuConnector {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: 9_600,
            slave: 1,
        }
    }

    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    #[must_use]
    pub fn with_slave(mut self, slave: u8) -> Self {
        self.slave = slave;
        self
    }
}

#[async_trait]
impl Connector for RtuConnector {
    async fn connect(&self) -> TransportResult<Box<dyn Transport>> {
        let builder = tokio_serial::new(&self.path, self.baud_rate);
        let port = SerialStream::open(&builder).map_err(|err| {
            log::warn!("Failed to open {}: {err}", self.path);
            TransportError::from(std::io::Error::from(err))
        })?;
        let context = tokio_modbus::client::rtu::attach_slave(port, Slave(self.slave));
        Ok(Box::new(ModbusTransport::new(context, Slave(self.slave))))
    }
}
