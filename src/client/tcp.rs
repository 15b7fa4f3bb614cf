// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connecting via Modbus TCP

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio_modbus::Slave;

use super::ModbusTransport;
use crate::transport::{Connector, Transport, TransportResult};

/// The unit identifier of the inverter behind the dongle or the
/// inverter's own access point.
pub const DEFAULT_SLAVE: u8 = 1;

/// Connects to a device over TCP, once per (re-)connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpConnector {
    pub socket_addr: SocketAddr,
    pub slave: u8,
}

impl TcpConnector {
    #[must_use]
    pub const fn new(socket_addr: SocketAddr) -> Self {
        Self {
            socket_addr,
            slave: DEFAULT_SLAVE,
        }
    }

    #[must_use]
    pub const fn with_slave(mut self, slave: u8) -> Self {
        self.slave = slave;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> TransportResult<Box<dyn Transport>> {
        let context =
            tokio_modbus::client::tcp::connect_slave(self.socket_addr, Slave(self.slave)).await?;
        Ok(Box::new(ModbusTransport::new(context, Slave(self.slave))))
    }
}
