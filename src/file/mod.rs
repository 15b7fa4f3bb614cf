// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chunked file transfer
//!
//! Bulk data like optimizer telemetry is not mapped to registers. It is
//! retrieved as a file through a small register window instead. A transfer
//! consists of three steps, each a write to the command register followed
//! by a read of the response block:
//!
//! | step  | command                                   | response                                |
//! |-------|-------------------------------------------|-----------------------------------------|
//! | open  | `[OPEN, file_id, param_len, params…]`     | `[status, token, len_hi, len_lo]`       |
//! | read  | `[READ, token, off_hi, off_lo, want]`     | `[status, token, chunk_len, eof, data…]`|
//! | close | `[CLOSE, token]`                          | `[status, token, crc]`                  |
//!
//! The device offers a single transfer slot.

use std::{borrow::Cow, fmt};

use bytes::{Bytes, BytesMut};
use crc::{Crc, Digest, CRC_16_MODBUS};
use futures_core::Stream;

use crate::{
    error::FILE_STATUS_BUSY,
    frame::words_to_bytes,
    session::Session,
    Address, Error, Quantity, Result, Word,
};

pub mod optimizer;

pub(crate) static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

const OPEN: Word = 1;
const READ: Word = 2;
const CLOSE: Word = 3;

const STATUS_OK: Word = 0;

const OPEN_RESPONSE_WORDS: Quantity = 4;
const CHUNK_HEADER_WORDS: Quantity = 4;
const CLOSE_RESPONSE_WORDS: Quantity = 3;

/// Registers reserved for file transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileWindow {
    /// Start of the command block.
    pub command: Address,
    /// Start of the response block.
    pub response: Address,
    /// Maximum payload of a single chunk in bytes.
    pub chunk_bytes: u16,
}

impl Default for FileWindow {
    fn default() -> Self {
        Self {
            command: 49_200,
            response: 49_300,
            chunk_bytes: 128,
        }
    }
}

impl FileWindow {
    #[must_use]
    pub fn with_chunk_bytes(mut self, chunk_bytes: u16) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }

    pub(crate) fn open_request(file_id: u16, params: &[Word]) -> Result<Vec<Word>> {
        let param_len = Word::try_from(params.len()).map_err(|_| Error::OutOfRange {
            name: Cow::Borrowed("file parameters"),
            reason: format!("{} words", params.len()),
        })?;
        let mut request = vec![OPEN, file_id, param_len];
        request.extend_from_slice(params);
        Ok(request)
    }

    pub(crate) const fn open_response_len() -> Quantity {
        OPEN_RESPONSE_WORDS
    }

    /// Token and total length of the opened file.
    pub(crate) fn parse_open(file_id: u16, words: &[Word]) -> Result<(Word, u32)> {
        let [status, token, len_hi, len_lo] = *header(file_id, words)?;
        check_status(file_id, status)?;
        Ok((token, u32::from(len_hi) << 16 | u32::from(len_lo)))
    }

    /// Number of bytes to request next.
    pub(crate) fn chunk_len(&self, remaining: u32) -> u16 {
        u16::try_from(remaining)
            .unwrap_or(u16::MAX)
            .min(self.chunk_bytes)
    }

    pub(crate) fn read_request(token: Word, offset: u32, want: u16) -> Vec<Word> {
        vec![READ, token, (offset >> 16) as Word, offset as Word, want]
    }

    pub(crate) fn chunk_response_len(want: u16) -> Quantity {
        CHUNK_HEADER_WORDS + want.div_ceil(2)
    }

    /// Payload and end-of-file flag of a chunk.
    pub(crate) fn parse_chunk(
        file_id: u16,
        token: Word,
        want: u16,
        words: &[Word],
    ) -> Result<(Bytes, bool)> {
        let [status, echoed, chunk_len, eof] = *header(file_id, words)?;
        check_status(file_id, status)?;
        check_token(file_id, token, echoed)?;
        let eof = eof != 0;
        if chunk_len > want {
            return Err(malformed(file_id, format!("chunk of {chunk_len} bytes, requested {want}")));
        }
        if chunk_len == 0 && !eof {
            return Err(malformed(file_id, "empty chunk before end of file".into()));
        }
        let data = &words[usize::from(CHUNK_HEADER_WORDS)..];
        let mut bytes = words_to_bytes(data);
        if bytes.len() < usize::from(chunk_len) {
            return Err(malformed(file_id, format!("chunk of {chunk_len} bytes truncated")));
        }
        bytes.truncate(usize::from(chunk_len));
        Ok((Bytes::from(bytes), eof))
    }

    pub(crate) fn close_request(token: Word) -> Vec<Word> {
        vec![CLOSE, token]
    }

    pub(crate) const fn close_response_len() -> Quantity {
        CLOSE_RESPONSE_WORDS
    }

    /// Checksum of the whole file.
    pub(crate) fn parse_close(file_id: u16, token: Word, words: &[Word]) -> Result<u16> {
        match *words {
            [status, echoed, crc, ..] => {
                check_status(file_id, status)?;
                check_token(file_id, token, echoed)?;
                Ok(crc)
            }
            _ => Err(malformed(file_id, format!("close response of {} words", words.len()))),
        }
    }
}

fn header(file_id: u16, words: &[Word]) -> Result<&[Word; 4]> {
    words
        .get(..4)
        .and_then(|header| header.try_into().ok())
        .ok_or_else(|| malformed(file_id, format!("response of {} words", words.len())))
}

fn check_status(file_id: u16, status: Word) -> Result<()> {
    match status {
        STATUS_OK => Ok(()),
        status => {
            if status == FILE_STATUS_BUSY {
                log::debug!("File {file_id:#x} not ready yet");
            }
            Err(Error::FileRejected { file_id, status })
        }
    }
}

fn check_token(file_id: u16, expected: Word, actual: Word) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    Err(malformed(file_id, format!("token {actual} does not match {expected}")))
}

fn malformed(file_id: u16, reason: String) -> Error {
    Error::Malformed {
        name: Cow::Owned(format!("file {file_id:#x}")),
        reason,
    }
}

/// Local identity of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(pub(crate) u64);

/// The device's single transfer slot, owned by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileTransferHandle {
    pub(crate) id: TransferId,
    pub(crate) file_id: u16,
    pub(crate) token: Word,
    /// Total length in bytes as announced on open.
    pub(crate) length: u32,
    pub(crate) offset: u32,
    pub(crate) complete: bool,
}

impl FileTransferHandle {
    pub(crate) fn remaining(&self) -> u32 {
        self.length.saturating_sub(self.offset)
    }
}

/// Result of opening a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TransferTicket {
    pub(crate) id: TransferId,
    pub(crate) file_id: u16,
    pub(crate) length: u32,
}

/// A piece of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the first byte within the file.
    pub offset: u32,
    pub data: Bytes,
    /// This is the last chunk.
    pub eof: bool,
}

/// Opens files on the device.
#[derive(Debug, Clone)]
pub struct FileReader {
    session: Session,
}

impl FileReader {
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self { session }
    }

    /// Open a file for reading.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TransferAlreadyActive`] while another transfer
    /// is in progress, or if the device rejects the file.
    pub async fn read_file(&self, file_id: u16, params: &[Word]) -> Result<FileChunks> {
        let ticket = self.session.open_file(file_id, params.to_vec()).await?;
        log::debug!(
            "Opened file {file_id:#x} of {} bytes as {:?}",
            ticket.length,
            ticket.id
        );
        Ok(FileChunks {
            session: self.session.clone(),
            ticket,
            digest: CRC16.digest(),
            in_flight: false,
            closed: false,
            finished: false,
        })
    }
}

/// Lazy sequence of the chunks of an open file.
///
/// Each call of [`next_chunk()`](Self::next_chunk) performs one round
/// trip. The sequence ends after the last chunk or the first error and
/// cannot be restarted. Dropping it early releases the device's transfer
/// slot in the background.
///
/// The chunk of a `next_chunk()` future dropped before completion may
/// have been consumed already, so the next call aborts the transfer with
/// [`Error::TransferAborted`].
pub struct FileChunks {
    session: Session,
    ticket: TransferTicket,
    digest: Digest<'static, u16>,
    /// Set while a call of `next_chunk()` is pending.
    in_flight: bool,
    closed: bool,
    finished: bool,
}

impl fmt::Debug for FileChunks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileChunks")
            .field("ticket", &self.ticket)
            .field("in_flight", &self.in_flight)
            .field("closed", &self.closed)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl FileChunks {
    #[must_use]
    pub const fn file_id(&self) -> u16 {
        self.ticket.file_id
    }

    /// Total length in bytes as announced by the device.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.ticket.length
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ticket.length == 0
    }

    /// Fetch the next chunk, or `None` after the end of the file.
    ///
    /// The final chunk is only returned after the transfer has been
    /// closed and the checksum announced by the device matches.
    pub async fn next_chunk(&mut self) -> Option<Result<Chunk>> {
        if self.in_flight {
            self.in_flight = false;
            log::warn!(
                "Previous read of file {:#x} has been cancelled",
                self.ticket.file_id
            );
            return Some(Err(self.abort(Error::TransferAborted)));
        }
        if self.finished {
            return None;
        }
        self.in_flight = true;
        let next = self.fetch().await;
        self.in_flight = false;
        Some(next)
    }

    async fn fetch(&mut self) -> Result<Chunk> {
        let chunk = match self.session.read_chunk(self.ticket.id).await {
            Ok(chunk) => chunk,
            Err(err) => return Err(self.abort(err)),
        };
        self.digest.update(&chunk.data);
        if !chunk.eof {
            return Ok(chunk);
        }
        self.finished = true;
        self.closed = true;
        let expected = self.session.close_file(self.ticket.id).await?;
        let actual = std::mem::replace(&mut self.digest, CRC16.digest()).finalize();
        if expected != actual {
            return Err(Error::ChecksumMismatch {
                file_id: self.ticket.file_id,
                expected,
                actual,
            });
        }
        log::debug!("Completed file {:#x}", self.ticket.file_id);
        Ok(chunk)
    }

    /// Read the remaining chunks into a single buffer.
    pub async fn collect(mut self) -> Result<Bytes> {
        let mut buffer = BytesMut::with_capacity(self.ticket.length as usize);
        while let Some(chunk) = self.next_chunk().await {
            buffer.extend_from_slice(&chunk?.data);
        }
        Ok(buffer.freeze())
    }

    /// Adapt into a [`Stream`] of chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<Chunk>> + Send {
        futures_util::stream::unfold(self, |mut chunks| async move {
            let next = chunks.next_chunk().await?;
            Some((next, chunks))
        })
    }

    fn abort(&mut self, err: Error) -> Error {
        self.finished = true;
        if !self.closed {
            self.closed = true;
            self.session.close_file_detached(self.ticket.id);
        }
        err
    }
}

impl Drop for FileChunks {
    fn drop(&mut self) {
        if !self.closed {
            log::debug!("Closing abandoned file {:#x}", self.ticket.file_id);
            self.session.close_file_detached(self.ticket.id);
        }
    }
}
