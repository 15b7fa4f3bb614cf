// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::{borrow::Cow, io, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{Address, ExceptionCode, Quantity};

/// Failure of a single round trip on the underlying transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The server responded with a _Modbus_ exception.
    #[error("exception: {0}")]
    Exception(#[from] ExceptionCode),

    /// No response arrived in time.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The connection failed or has been closed by the peer.
    #[error("i/o error: {0}")]
    Io(Arc<io::Error>),

    /// The response could not be interpreted by the transport.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// There is no open link to the device.
    #[error("not connected")]
    NotConnected,
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl TransportError {
    /// The link is unusable after this error and must be re-established.
    #[must_use]
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Io(_) | Self::Protocol(_) | Self::NotConnected
        )
    }

    /// Repeating the operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Exception(code) => code.is_transient(),
            _ => self.is_link_failure(),
        }
    }
}

/// The error type of this crate.
///
/// Errors are cheap to clone so that a failed register range can be
/// reported for every value it would have covered.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A single register definition is wider than one request may be.
    #[error("register `{name}` spans {word_count} registers, at most {max} fit into one request")]
    SpecTooLarge {
        name: Cow<'static, str>,
        word_count: Quantity,
        max: Quantity,
    },

    /// Fewer words were received than the register definition declares.
    #[error("register `{name}` needs {expected} words, got {actual}")]
    ShortRead {
        name: Cow<'static, str>,
        expected: usize,
        actual: usize,
    },

    /// The raw value violates the declared constraints of the register.
    #[error("register `{name}` holds a malformed value: {reason}")]
    Malformed {
        name: Cow<'static, str>,
        reason: String,
    },

    /// An enumerated register holds a code without a known meaning.
    #[error("register `{name}` holds unknown enumeration value {raw:#x}")]
    UnknownEnumValue { name: Cow<'static, str>, raw: u64 },

    /// The value cannot be represented by the register.
    #[error("value for register `{name}` is out of range: {reason}")]
    OutOfRange {
        name: Cow<'static, str>,
        reason: String,
    },

    /// The register definition itself is invalid.
    #[error("invalid definition of register `{name}`: {reason}")]
    InvalidRegisterSpec {
        name: Cow<'static, str>,
        reason: String,
    },

    /// The catalogue does not know this name.
    #[error("unknown register `{0}`")]
    UnknownRegister(String),

    /// The register cannot be read.
    #[error("register `{0}` is not readable")]
    NotReadable(Cow<'static, str>),

    /// The register cannot be written.
    #[error("register `{0}` is not writable")]
    NotWritable(Cow<'static, str>),

    /// The register does not exist on the configured device model.
    #[error("register `{name}` is not available on model {model}")]
    NotApplicable {
        name: Cow<'static, str>,
        model: u16,
    },

    /// A round trip failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The device refused the credentials.
    #[error("login rejected by device")]
    AuthRejected,

    /// The operation requires a logged in session.
    #[error("operation requires a logged in session")]
    InsufficientPrivilege,

    /// The session could not be (re-)established.
    #[error("session lost after {attempts} attempts: {source}")]
    SessionLost {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// The session task has terminated.
    #[error("session closed")]
    SessionClosed,

    /// Another file transfer occupies the device's transfer slot.
    #[error("a file transfer is already active")]
    TransferAlreadyActive,

    /// The transfer handle was released before the transfer completed.
    #[error("file transfer has been aborted")]
    TransferAborted,

    /// The device refused a file transfer step.
    #[error("device rejected file {file_id:#x} with status {status}")]
    FileRejected { file_id: u16, status: u16 },

    /// The received file content does not match the device's checksum.
    #[error("checksum mismatch for file {file_id:#x}: expected {expected:#06x}, computed {actual:#06x}")]
    ChecksumMismatch {
        file_id: u16,
        expected: u16,
        actual: u16,
    },
}

impl Error {
    /// The session could not be brought into the required state at all,
    /// as opposed to a failure concerning only a particular request.
    #[must_use]
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            Self::SessionLost { .. } | Self::SessionClosed | Self::AuthRejected
        )
    }

    /// Repeating the operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            Self::FileRejected { status, .. } => *status == FILE_STATUS_BUSY,
            _ => false,
        }
    }

    /// The link is unusable after this error.
    #[must_use]
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Transport(err) if err.is_link_failure())
    }

    pub(crate) fn write_denied(address: Address, err: TransportError) -> Self {
        match err {
            TransportError::Exception(ExceptionCode::PermissionDenied) => {
                log::debug!("Write to register {address} denied by device");
                Self::InsufficientPrivilege
            }
            err => err.into(),
        }
    }
}

/// File window status reported while the device is still preparing data.
pub(crate) const FILE_STATUS_BUSY: u16 = 1;

/// Specialized [`std::result::Result`] type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
