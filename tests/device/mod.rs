// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A simulated inverter with a login window and a file window.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    io,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use crc::{Crc, CRC_16_MODBUS};
use hmac::{Hmac, Mac as _};
use sha2::{Digest as _, Sha256};

use sun2000_modbus::{
    file::FileWindow,
    retry::{Constant, RetryPolicy},
    session::{LoginWindow, SessionConfig},
    transport::{Connector, Transport, TransportResult},
    Address, Config, ExceptionCode, Quantity, TransportError, UnitId, Word,
};

pub const PASSWORD: &str = "00000a";

const DEVICE_CHALLENGE: [u8; 16] = [
    0x5A, 0x01, 0xC3, 0x7E, 0x22, 0x90, 0x4B, 0x18, 0xEE, 0x03, 0x61, 0xD4, 0x0F, 0xA7, 0x39, 0x85,
];

/// Registers that may only be written after a successful login.
const PROTECTED_FROM: Address = 40_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Connect,
    Read(Address, Quantity),
    Write(Address, Vec<Word>),
    Disconnect,
}

#[derive(Debug, Default)]
struct OpenFile {
    token: Word,
    file_id: u16,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct SimState {
    pub registers: BTreeMap<Address, Word>,
    /// Registers of further units behind the same link.
    pub units: BTreeMap<UnitId, BTreeMap<Address, Word>>,
    pub ops: Vec<Op>,
    pub connects: usize,
    /// Reject all connection attempts.
    pub refuse_connects: bool,
    /// Never answer any request.
    pub hang: bool,
    /// Delay of every read.
    pub read_delay: Duration,
    /// Exceptions for reads starting at the address.
    pub read_exceptions: BTreeMap<Address, ExceptionCode>,
    /// Exceptions for the next writes to the address.
    pub write_exceptions: BTreeMap<Address, VecDeque<ExceptionCode>>,
    pub files: BTreeMap<u16, Vec<u8>>,
    /// Report a wrong checksum when closing a file.
    pub corrupt_checksum: bool,
    link: usize,
    logged_in: bool,
    open_file: Option<OpenFile>,
    next_token: Word,
}

/// Cheap handle to the shared state of the simulated device.
#[derive(Debug, Clone, Default)]
pub struct SimDevice(Arc<Mutex<SimState>>);

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap()
    }

    pub fn set_registers(&self, address: Address, words: &[Word]) {
        let mut state = self.state();
        for (address, word) in (address..).zip(words) {
            state.registers.insert(address, *word);
        }
    }

    pub fn set_unit_registers(&self, unit: UnitId, address: Address, words: &[Word]) {
        let mut state = self.state();
        let registers = state.units.entry(unit).or_default();
        for (address, word) in (address..).zip(words) {
            registers.insert(address, *word);
        }
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state().ops.clone()
    }

    pub fn reads(&self) -> Vec<(Address, Quantity)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Read(address, count) => Some((address, count)),
                _ => None,
            })
            .collect()
    }

    pub fn writes_to(&self, address: Address) -> Vec<Vec<Word>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write(at, words) if at == address => Some(words),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn clear_ops(&self) {
        self.state().ops.clear();
    }
}

pub fn config() -> Config {
    Config::default().with_session(session_config())
}

pub fn session_config() -> SessionConfig {
    SessionConfig::default()
        .with_settle_time(Duration::ZERO)
        .with_cooldown(Duration::ZERO)
        .with_retry(
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_backoff(Constant(Duration::from_millis(100))),
        )
}

pub fn mac(password: &str, challenge: &[u8]) -> Vec<u8> {
    let key = Sha256::digest(password.as_bytes());
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
    mac.update(challenge);
    mac.finalize().into_bytes().to_vec()
}

fn to_words(bytes: &[u8]) -> Vec<Word> {
    bytes
        .chunks(2)
        .map(|pair| Word::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
        .collect()
}

fn to_bytes(words: &[Word]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_be_bytes()).collect()
}

impl SimState {
    fn store(&mut self, address: Address, words: &[Word]) {
        for (address, word) in (address..).zip(words) {
            self.registers.insert(address, *word);
        }
    }

    fn login_command(&mut self, words: &[Word]) {
        let login = LoginWindow::default();
        match words.first() {
            Some(1) => {
                self.logged_in = false;
                self.store(login.challenge, &to_words(&DEVICE_CHALLENGE));
            }
            Some(2) if words.len() == 42 => {
                let client_challenge = to_bytes(&words[1..9]);
                let username_len = usize::from(words[9]);
                let username = to_bytes(&words[10..26]);
                let username = &username[..username_len.min(32)];
                let expected = mac(PASSWORD, &DEVICE_CHALLENGE);
                if username == b"installer" && to_bytes(&words[26..42]) == expected {
                    self.logged_in = true;
                    let mut result = vec![0];
                    result.extend(to_words(&mac(PASSWORD, &client_challenge)));
                    self.store(login.result, &result);
                } else {
                    let mut result = vec![1];
                    result.extend([0; 16]);
                    self.store(login.result, &result);
                }
            }
            _ => {}
        }
    }

    fn file_command(&mut self, words: &[Word]) {
        let window = FileWindow::default();
        let response = match *words {
            [1, file_id, ..] => match self.files.get(&file_id) {
                Some(data) => {
                    self.next_token = self.next_token.wrapping_add(1).max(1);
                    let len = data.len() as u32;
                    self.open_file = Some(OpenFile {
                        token: self.next_token,
                        file_id,
                        data: data.clone(),
                    });
                    vec![0, self.next_token, (len >> 16) as Word, len as Word]
                }
                None => vec![2, 0, 0, 0],
            },
            [2, token, off_hi, off_lo, want] => match &self.open_file {
                Some(open) if open.token == token => {
                    let offset = (usize::from(off_hi) << 16 | usize::from(off_lo)).min(open.data.len());
                    let end = (offset + usize::from(want)).min(open.data.len());
                    let chunk = &open.data[offset..end];
                    let eof = end == open.data.len();
                    let mut response = vec![0, token, chunk.len() as Word, Word::from(eof)];
                    response.extend(to_words(chunk));
                    response
                }
                _ => vec![3, token, 0, 0],
            },
            [3, token] => match self.open_file.take() {
                Some(open) if open.token == token => {
                    let mut crc = Crc::<u16>::new(&CRC_16_MODBUS).checksum(&open.data);
                    if self.corrupt_checksum {
                        crc ^= 0xFFFF;
                    }
                    vec![0, token, crc]
                }
                other => {
                    self.open_file = other;
                    vec![3, token, 0]
                }
            },
            _ => vec![4, 0, 0, 0],
        };
        self.store(window.response, &response);
    }
}

#[derive(Debug)]
struct SimTransport {
    device: SimDevice,
    link: usize,
    unit: Option<UnitId>,
}

impl SimTransport {
    fn check_link(&self, state: &SimState) -> TransportResult<()> {
        if state.link == self.link {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    async fn hang_if_requested(&self) {
        let hang = self.device.state().hang;
        if hang {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn read_registers(&mut self, addr: Address, cnt: Quantity) -> TransportResult<Vec<Word>> {
        self.hang_if_requested().await;
        let delay = self.device.state().read_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.device.state();
        self.check_link(&state)?;
        state.ops.push(Op::Read(addr, cnt));
        if let Some(code) = state.read_exceptions.get(&addr) {
            return Err(TransportError::Exception(*code));
        }
        let registers = match self.unit {
            None => &state.registers,
            Some(unit) => state
                .units
                .get(&unit)
                .ok_or(TransportError::Exception(ExceptionCode::GatewayTargetDevice))?,
        };
        Ok((addr..)
            .take(usize::from(cnt))
            .map(|address| registers.get(&address).copied().unwrap_or_default())
            .collect())
    }

    async fn write_registers(&mut self, addr: Address, words: &[Word]) -> TransportResult<()> {
        self.hang_if_requested().await;
        let mut state = self.device.state();
        self.check_link(&state)?;
        state.ops.push(Op::Write(addr, words.to_vec()));
        if let Some(code) = state
            .write_exceptions
            .get_mut(&addr)
            .and_then(VecDeque::pop_front)
        {
            return Err(TransportError::Exception(code));
        }
        if addr == LoginWindow::default().command {
            state.login_command(words);
        } else if addr == FileWindow::default().command {
            state.file_command(words);
        } else if addr >= PROTECTED_FROM && !state.logged_in {
            return Err(TransportError::Exception(ExceptionCode::PermissionDenied));
        } else if let Some(unit) = self.unit {
            let registers = state
                .units
                .get_mut(&unit)
                .ok_or(TransportError::Exception(ExceptionCode::GatewayTargetDevice))?;
            for (address, word) in (addr..).zip(words) {
                registers.insert(address, *word);
            }
        } else {
            state.store(addr, words);
        }
        Ok(())
    }

    fn set_unit(&mut self, unit: Option<UnitId>) {
        self.unit = unit;
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        let mut state = self.device.state();
        if state.link == self.link {
            state.ops.push(Op::Disconnect);
            state.link += 1;
            state.logged_in = false;
            state.open_file = None;
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for SimDevice {
    async fn connect(&self) -> TransportResult<Box<dyn Transport>> {
        let mut state = self.state();
        state.ops.push(Op::Connect);
        if state.refuse_connects {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }
        state.connects += 1;
        state.link += 1;
        state.logged_in = false;
        state.open_file = None;
        let link = state.link;
        drop(state);
        Ok(Box::new(SimTransport {
            device: self.clone(),
            link,
            unit: None,
        }))
    }
}
