// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types and traits

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
pub use crate::catalogue::sun2000;

#[cfg(feature = "tcp")]
pub use crate::client::tcp::TcpConnector;

#[cfg(feature = "rtu")]
pub use crate::client::rtu::RtuConnector;

///////////////////////////////////////////////////////////////////
/// Types
///////////////////////////////////////////////////////////////////
pub use crate::{
    catalogue::{Access, Applicability, Catalogue, DecodeRule, Labels, Number, RegisterSpec},
    codec::{DecodedValue, Flag, PeriodKind, Periods, StorageModel, Value},
    file::{Chunk, FileChunks},
    planner::BatchLimits,
    retry::RetryPolicy,
    session::{Credentials, Heartbeat, KeepaliveConfig, SessionConfig, SessionState},
    Address, Config, Device, Error, ExceptionCode, Quantity, Readings, Result, TransportError,
    UnitId, Word,
};

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::{
    retry::Backoff,
    transport::{Connector, Transport},
};
