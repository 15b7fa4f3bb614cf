// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session management
//!
//! A [`Session`] is a cheap handle to a background task that exclusively
//! owns the link to the device. All operations are queued and executed one
//! after another in the order of their submission. The task transparently
//! (re-)connects, logs in with remembered credentials, keeps an idle
//! privileged session alive and retries failed round trips.

use std::{fmt, time::Duration};

use futures_util::{future::BoxFuture, FutureExt as _};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{sleep, sleep_until, timeout, Instant},
};

use crate::{
    error::TransportError,
    file::{Chunk, FileTransferHandle, FileWindow, TransferId, TransferTicket},
    planner::RegisterRange,
    retry::RetryPolicy,
    transport::{Connector, Transport},
    Address, Error, Quantity, Result, UnitId, Word,
};

mod login;
mod state;

pub use self::{
    login::{Credentials, LoginWindow},
    state::SessionState,
};
use self::state::{Event, Machine};

/// The operation issued to check an idle session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heartbeat {
    /// Read a single register.
    Read { address: Address },
    /// Write a word into a register.
    Write { address: Address, word: Word },
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::Read { address: 30_070 }
    }
}

impl Heartbeat {
    /// The vendor's dedicated heartbeat register.
    pub const VENDOR: Self = Self::Write {
        address: 49_999,
        word: 1,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Idle time in a privileged session before probing the device.
    pub interval: Duration,
    pub heartbeat: Heartbeat,
    /// Consecutive missed heartbeats until the link is considered dead.
    pub max_missed: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            heartbeat: Heartbeat::default(),
            max_missed: 3,
        }
    }
}

/// Parameters of a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Default time to wait for the response to a round trip or for
    /// establishing the link.
    pub timeout: Duration,
    /// Minimum pause between two round trips.
    pub cooldown: Duration,
    /// Pause after a fresh connect before the first request.
    pub settle_time: Duration,
    pub retry: RetryPolicy,
    pub keepalive: KeepaliveConfig,
    pub login: LoginWindow,
    pub file_window: FileWindow,
    /// Log in on every connect.
    pub credentials: Option<Credentials>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            cooldown: Duration::from_millis(50),
            settle_time: Duration::from_millis(1_500),
            retry: RetryPolicy::default(),
            keepalive: KeepaliveConfig::default(),
            login: LoginWindow::default(),
            file_window: FileWindow::default(),
            credentials: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    #[must_use]
    pub fn with_login_window(mut self, login: LoginWindow) -> Self {
        self.login = login;
        self
    }

    #[must_use]
    pub fn with_file_window(mut self, file_window: FileWindow) -> Self {
        self.file_window = file_window;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Connect(Reply<()>),
    Login(Credentials, Reply<()>),
    Read {
        unit: Option<UnitId>,
        range: RegisterRange,
        timeout: Option<Duration>,
        reply: Reply<Vec<Word>>,
    },
    Write {
        unit: Option<UnitId>,
        address: Address,
        words: Vec<Word>,
        reply: Reply<()>,
    },
    OpenFile {
        file_id: u16,
        params: Vec<Word>,
        reply: Reply<TransferTicket>,
    },
    ReadChunk {
        transfer: TransferId,
        reply: Reply<Chunk>,
    },
    CloseFile {
        transfer: TransferId,
        // `None` if nobody waits for the outcome
        reply: Option<Reply<u16>>,
    },
    Disconnect(Reply<()>),
}

impl Command {
    fn is_cancelled(&self) -> bool {
        match self {
            Self::Connect(reply) | Self::Login(_, reply) | Self::Disconnect(reply) => {
                reply.is_closed()
            }
            Self::Read { reply, .. } => reply.is_closed(),
            Self::Write { reply, .. } => reply.is_closed(),
            Self::OpenFile { reply, .. } => reply.is_closed(),
            Self::ReadChunk { reply, .. } => reply.is_closed(),
            Self::CloseFile { .. } => false,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(_) => f.write_str("Connect"),
            Self::Login(credentials, _) => write!(f, "Login({})", credentials.username()),
            Self::Read {
                unit: Some(unit),
                range,
                ..
            } => write!(f, "Read({range:?} @ {unit})"),
            Self::Read { range, .. } => write!(f, "Read({range:?})"),
            Self::Write {
                unit: Some(unit),
                address,
                words,
                ..
            } => write!(f, "Write({address}, {words:?} @ {unit})"),
            Self::Write { address, words, .. } => write!(f, "Write({address}, {words:?})"),
            Self::OpenFile { file_id, .. } => write!(f, "OpenFile({file_id:#x})"),
            Self::ReadChunk { transfer, .. } => write!(f, "ReadChunk({transfer:?})"),
            Self::CloseFile { transfer, .. } => write!(f, "CloseFile({transfer:?})"),
            Self::Disconnect(_) => f.write_str("Disconnect"),
        }
    }
}

/// Handle of the task owning the link to a device.
///
/// Cloning the handle is cheap. The task terminates and disconnects when
/// the last handle has been dropped.
///
/// Dropping the future of an operation before it has been dispatched
/// removes it from the queue. Once dispatched, it always runs to
/// completion.
#[derive(Debug, Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl Session {
    /// Spawn the session task onto the current tokio runtime.
    ///
    /// No connection is established until the first operation.
    #[must_use]
    pub fn spawn(config: SessionConfig, connector: Box<dyn Connector>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let worker = Worker {
            machine: Machine::new(config.keepalive.max_missed),
            credentials: config.credentials.clone(),
            config,
            connector,
            transport: None,
            unit: None,
            state: state_tx,
            commands: commands_rx,
            last_request: None,
            transfer: None,
            next_transfer: 0,
        };
        tokio::spawn(worker.run());
        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .map_err(|_| Error::SessionClosed)?;
        reply_rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Establish the link, a single attempt.
    pub async fn connect(&self) -> Result<()> {
        self.call(Command::Connect).await
    }

    /// Log in, connecting first if necessary.
    ///
    /// Accepted credentials are remembered and used again after every
    /// reconnect. A rejected login leaves the session connected.
    pub async fn login(&self, credentials: Credentials) -> Result<()> {
        self.call(|reply| Command::Login(credentials, reply)).await
    }

    /// Read a contiguous range of registers.
    pub async fn read(&self, range: RegisterRange) -> Result<Vec<Word>> {
        self.call(|reply| Command::Read {
            unit: None,
            range,
            timeout: None,
            reply,
        })
        .await
    }

    /// Read a contiguous range of registers of another unit behind the
    /// same link, e.g. a secondary inverter daisy-chained over RS485.
    pub async fn read_from(&self, unit: UnitId, range: RegisterRange) -> Result<Vec<Word>> {
        self.call(|reply| Command::Read {
            unit: Some(unit),
            range,
            timeout: None,
            reply,
        })
        .await
    }

    /// Read a contiguous range of registers with a custom timeout for
    /// every round trip.
    pub async fn read_with_timeout(
        &self,
        range: RegisterRange,
        timeout: Duration,
    ) -> Result<Vec<Word>> {
        self.call(|reply| Command::Read {
            unit: None,
            range,
            timeout: Some(timeout),
            reply,
        })
        .await
    }

    /// Write registers, requires a logged in session.
    pub async fn write(&self, address: Address, words: Vec<Word>) -> Result<()> {
        self.call(|reply| Command::Write {
            unit: None,
            address,
            words,
            reply,
        })
        .await
    }

    /// Write registers of another unit behind the same link.
    pub async fn write_to(&self, unit: UnitId, address: Address, words: Vec<Word>) -> Result<()> {
        self.call(|reply| Command::Write {
            unit: Some(unit),
            address,
            words,
            reply,
        })
        .await
    }

    /// Tear down the link.
    pub async fn disconnect(&self) -> Result<()> {
        self.call(Command::Disconnect).await
    }

    pub(crate) async fn open_file(&self, file_id: u16, params: Vec<Word>) -> Result<TransferTicket> {
        self.call(|reply| Command::OpenFile {
            file_id,
            params,
            reply,
        })
        .await
    }

    pub(crate) async fn read_chunk(&self, transfer: TransferId) -> Result<Chunk> {
        self.call(|reply| Command::ReadChunk { transfer, reply })
            .await
    }

    pub(crate) async fn close_file(&self, transfer: TransferId) -> Result<u16> {
        self.call(|reply| Command::CloseFile {
            transfer,
            reply: Some(reply),
        })
        .await
    }

    /// Queue closing a transfer without waiting for the outcome.
    pub(crate) fn close_file_detached(&self, transfer: TransferId) {
        let command = Command::CloseFile {
            transfer,
            reply: None,
        };
        if self.commands.send(command).is_err() {
            log::debug!("Session already terminated, {transfer:?} is gone");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Unprivileged,
    Privileged,
    /// Steps of an open transfer, never reconnects.
    Transfer,
}

/// The session task.
struct Worker {
    config: SessionConfig,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    /// Unit addressed by the transport, `None` for its default.
    unit: Option<UnitId>,
    machine: Machine,
    state: watch::Sender<SessionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Log in after every connect.
    credentials: Option<Credentials>,
    last_request: Option<Instant>,
    transfer: Option<FileTransferHandle>,
    next_transfer: u64,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let command = if self.machine.state() == SessionState::LoggedIn {
                tokio::select! {
                    command = self.commands.recv() => command,
                    () = sleep(self.config.keepalive.interval) => {
                        self.keepalive().await;
                        continue;
                    }
                }
            } else {
                self.commands.recv().await
            };
            let Some(command) = command else {
                break;
            };
            if command.is_cancelled() {
                log::debug!("Skipping cancelled {command:?}");
                continue;
            }
            log::debug!("Call {command:?}");
            self.dispatch(command).await;
        }
        self.link_down().await;
        log::debug!("Session terminated");
    }

    async fn dispatch(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let result = if self.machine.state().is_connected() {
                    Ok(())
                } else {
                    self.connect_once().await
                };
                let _ = reply.send(result);
            }
            Command::Login(credentials, reply) => {
                let _ = reply.send(self.login(credentials).await);
            }
            Command::Read {
                unit,
                range,
                timeout: read_timeout,
                reply,
            } => {
                let result = self
                    .retrying(Scope::Unprivileged, move |worker| {
                        async move {
                            worker.select_unit(unit);
                            let result = worker
                                .read_once(range.start, range.count, read_timeout)
                                .await;
                            worker.select_unit(None);
                            result
                        }
                        .boxed()
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Write {
                unit,
                address,
                words,
                reply,
            } => {
                let result = self
                    .retrying(Scope::Privileged, move |worker| {
                        let words = words.clone();
                        async move {
                            worker.select_unit(unit);
                            let result = worker.write_once(address, &words).await;
                            worker.select_unit(None);
                            result
                        }
                        .boxed()
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::OpenFile {
                file_id,
                params,
                reply,
            } => {
                let result = if self.transfer.is_some() {
                    Err(Error::TransferAlreadyActive)
                } else {
                    self.retrying(Scope::Unprivileged, move |worker| {
                        let params = params.clone();
                        async move { worker.open_once(file_id, &params).await }.boxed()
                    })
                    .await
                };
                let _ = reply.send(result);
            }
            Command::ReadChunk { transfer, reply } => {
                let result = self
                    .retrying(Scope::Transfer, move |worker| {
                        worker.read_chunk_once(transfer).boxed()
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::CloseFile { transfer, reply } => {
                let result = self.close(transfer).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            log::debug!("Closing {transfer:?} failed: {err}");
                        }
                    }
                }
            }
            Command::Disconnect(reply) => {
                self.link_down().await;
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn transition(&mut self, event: Event) {
        match self.machine.apply(event) {
            Ok(state) => {
                self.state.send_replace(state);
            }
            Err(err) => log::warn!("Ignoring {err}"),
        }
    }

    /// Drop the link and everything bound to it.
    async fn link_down(&mut self) {
        if let Some(handle) = self.transfer.take() {
            log::warn!("Aborting transfer of file {:#x}", handle.file_id);
        }
        if let Some(mut transport) = self.transport.take() {
            if let Err(err) = transport.disconnect().await {
                log::debug!("Failed to disconnect: {err}");
            }
        }
        if self.machine.state().is_connected() {
            self.transition(Event::LinkDown);
        }
    }

    async fn connect_once(&mut self) -> Result<()> {
        log::info!("Connecting to {:?}", self.connector);
        let transport = timeout(self.config.timeout, self.connector.connect())
            .await
            .map_err(|_| TransportError::Timeout(self.config.timeout))??;
        self.transport = Some(transport);
        self.unit = None;
        self.transition(Event::LinkUp);
        // The device needs some time before accepting requests.
        sleep(self.config.settle_time).await;
        self.last_request = None;
        Ok(())
    }

    async fn login_once(&mut self, credentials: Credentials) -> Result<()> {
        match self.login_exchange(&credentials).await {
            Ok(()) => {
                log::info!("Logged in as {}", credentials.username());
                self.credentials = Some(credentials);
                self.transition(Event::LoginAccepted);
                Ok(())
            }
            Err(Error::AuthRejected) => {
                log::warn!("Login as {} rejected", credentials.username());
                if self.credentials.as_ref() == Some(&credentials) {
                    self.credentials = None;
                }
                self.transition(Event::LoginRejected);
                Err(Error::AuthRejected)
            }
            Err(err) => {
                if err.is_link_failure() {
                    self.link_down().await;
                }
                Err(err)
            }
        }
    }

    async fn login(&mut self, credentials: Credentials) -> Result<()> {
        if !self.machine.state().is_connected() {
            self.connect_once().await?;
        }
        self.login_once(credentials).await
    }

    /// Bring the session into a state suitable for the scope.
    async fn ensure_ready(&mut self, scope: Scope) -> Result<()> {
        if scope == Scope::Transfer {
            return Ok(());
        }
        if scope == Scope::Privileged
            && self.credentials.is_none()
            && self.machine.state() != SessionState::LoggedIn
        {
            // Nothing could grant the privilege, leave the link alone.
            return Err(Error::InsufficientPrivilege);
        }
        if !self.machine.state().is_connected() {
            self.connect_once().await?;
        }
        if self.machine.state() == SessionState::Connected {
            if let Some(credentials) = self.credentials.clone() {
                match self.login_once(credentials).await {
                    Ok(()) => {}
                    Err(err) if scope == Scope::Unprivileged && !err.is_link_failure() => {
                        log::warn!("Continuing without privilege after failed login: {err}");
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        if scope == Scope::Privileged && self.machine.state() != SessionState::LoggedIn {
            return Err(Error::InsufficientPrivilege);
        }
        Ok(())
    }

    async fn retrying<T, F>(&mut self, scope: Scope, mut op: F) -> Result<T>
    where
        F: for<'w> FnMut(&'w mut Worker) -> BoxFuture<'w, Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.ensure_ready(scope).await {
                Ok(()) => match op(&mut *self).await {
                    Ok(value) => return Ok(value),
                    Err(err) => err,
                },
                Err(err) => err,
            };
            let link_failure = err.is_link_failure();
            if link_failure {
                self.link_down().await;
                if scope == Scope::Transfer {
                    return Err(err);
                }
            }
            if !err.is_retryable() {
                return Err(err);
            }
            match self.config.retry.next_delay(attempt) {
                Some(delay) => {
                    log::warn!("Attempt {attempt} failed: {err}, retrying in {delay:?}");
                    sleep(delay).await;
                }
                None if link_failure => {
                    return Err(Error::SessionLost {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                None => return Err(err),
            }
        }
    }

    fn select_unit(&mut self, unit: Option<UnitId>) {
        if self.unit == unit {
            return;
        }
        if let Some(transport) = self.transport.as_mut() {
            log::debug!("Addressing unit {unit:?}");
            transport.set_unit(unit);
            self.unit = unit;
        }
    }

    async fn pace(&mut self) {
        if let Some(last) = self.last_request {
            sleep_until(last + self.config.cooldown).await;
        }
    }

    async fn read_once(
        &mut self,
        address: Address,
        count: Quantity,
        timeout_override: Option<Duration>,
    ) -> Result<Vec<Word>> {
        let duration = timeout_override.unwrap_or(self.config.timeout);
        self.pace().await;
        let transport = self.transport.as_mut().ok_or(TransportError::NotConnected)?;
        log::debug!("Read {count} register(s) at {address}");
        let result = timeout(duration, transport.read_registers(address, count)).await;
        self.last_request = Some(Instant::now());
        Ok(result.map_err(|_| TransportError::Timeout(duration))??)
    }

    async fn write_once(&mut self, address: Address, words: &[Word]) -> Result<()> {
        let duration = self.config.timeout;
        self.pace().await;
        let transport = self.transport.as_mut().ok_or(TransportError::NotConnected)?;
        log::debug!("Write {} register(s) at {address}", words.len());
        let result = timeout(duration, transport.write_registers(address, words)).await;
        self.last_request = Some(Instant::now());
        result
            .map_err(|_| TransportError::Timeout(duration))?
            .map_err(|err| Error::write_denied(address, err))
    }

    async fn keepalive(&mut self) {
        let result = match self.config.keepalive.heartbeat {
            Heartbeat::Read { address } => self.read_once(address, 1, None).await.map(drop),
            Heartbeat::Write { address, word } => self.write_once(address, &[word]).await,
        };
        match result {
            Err(err) if err.is_link_failure() => {
                log::warn!("Keepalive failed: {err}");
                self.transition(Event::KeepaliveMissed);
                if !self.machine.state().is_connected() {
                    self.link_down().await;
                }
            }
            // Any response proves that the device is alive.
            _ => self.transition(Event::KeepaliveOk),
        }
    }

    fn active_transfer(&self, transfer: TransferId) -> Result<FileTransferHandle> {
        self.transfer
            .filter(|handle| handle.id == transfer)
            .ok_or(Error::TransferAborted)
    }

    async fn open_once(&mut self, file_id: u16, params: &[Word]) -> Result<TransferTicket> {
        if self.transfer.is_some() {
            return Err(Error::TransferAlreadyActive);
        }
        let window = self.config.file_window;
        self.write_once(window.command, &FileWindow::open_request(file_id, params)?)
            .await?;
        let words = self
            .read_once(window.response, FileWindow::open_response_len(), None)
            .await?;
        let (token, length) = FileWindow::parse_open(file_id, &words)?;
        self.next_transfer += 1;
        let id = TransferId(self.next_transfer);
        self.transfer = Some(FileTransferHandle {
            id,
            file_id,
            token,
            length,
            offset: 0,
            complete: false,
        });
        Ok(TransferTicket {
            id,
            file_id,
            length,
        })
    }

    async fn read_chunk_once(&mut self, transfer: TransferId) -> Result<Chunk> {
        let handle = self.active_transfer(transfer)?;
        if handle.complete {
            return Err(Error::Malformed {
                name: format!("file {:#x}", handle.file_id).into(),
                reason: "read beyond the end of file".into(),
            });
        }
        let window = self.config.file_window;
        let want = window.chunk_len(handle.remaining());
        let request = FileWindow::read_request(handle.token, handle.offset, want);
        self.write_once(window.command, &request).await?;
        let words = self
            .read_once(window.response, FileWindow::chunk_response_len(want), None)
            .await?;
        let (data, eof) = FileWindow::parse_chunk(handle.file_id, handle.token, want, &words)?;
        let handle = self.transfer.as_mut().ok_or(Error::TransferAborted)?;
        let offset = handle.offset;
        handle.offset += data.len() as u32;
        handle.complete = eof;
        log::debug!(
            "Received {} byte(s) of file {:#x} at offset {offset}",
            data.len(),
            handle.file_id
        );
        Ok(Chunk { offset, data, eof })
    }

    async fn close_once(&mut self, transfer: TransferId) -> Result<u16> {
        let handle = self.active_transfer(transfer)?;
        let window = self.config.file_window;
        self.write_once(window.command, &FileWindow::close_request(handle.token))
            .await?;
        let words = self
            .read_once(window.response, FileWindow::close_response_len(), None)
            .await?;
        FileWindow::parse_close(handle.file_id, handle.token, &words)
    }

    async fn close(&mut self, transfer: TransferId) -> Result<u16> {
        self.active_transfer(transfer)?;
        let result = self
            .retrying(Scope::Transfer, move |worker| {
                worker.close_once(transfer).boxed()
            })
            .await;
        // Released on every outcome, the device discards stale transfers
        // on the next open.
        if self.transfer.is_some_and(|handle| handle.id == transfer) {
            self.transfer = None;
        }
        log::debug!("Closed {transfer:?}");
        result
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        io,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{transport::TransportResult, ExceptionCode};

    type Responses = Arc<Mutex<VecDeque<TransportResult<Vec<Word>>>>>;

    #[derive(Debug, Default, Clone)]
    struct Mock {
        responses: Responses,
        requests: Arc<Mutex<Vec<(Address, Vec<Word>)>>>,
        connects: Arc<Mutex<usize>>,
        units: Arc<Mutex<Vec<Option<UnitId>>>>,
    }

    impl Mock {
        fn respond(&self, response: TransportResult<Vec<Word>>) {
            self.responses.lock().unwrap().push_back(response);
        }
    }

    #[derive(Debug)]
    struct MockTransport(Mock);

    #[async_trait]
    impl Transport for MockTransport {
        async fn read_registers(&mut self, addr: Address, cnt: Quantity) -> TransportResult<Vec<Word>> {
            self.0.requests.lock().unwrap().push((addr, vec![cnt]));
            self.0
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![0; usize::from(cnt)]))
        }

        async fn write_registers(&mut self, addr: Address, words: &[Word]) -> TransportResult<()> {
            self.0.requests.lock().unwrap().push((addr, words.to_vec()));
            match self.0.responses.lock().unwrap().pop_front() {
                Some(Err(err)) => Err(err),
                _ => Ok(()),
            }
        }

        fn set_unit(&mut self, unit: Option<UnitId>) {
            self.0.units.lock().unwrap().push(unit);
        }

        async fn disconnect(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for Mock {
        async fn connect(&self) -> TransportResult<Box<dyn Transport>> {
            *self.connects.lock().unwrap() += 1;
            Ok(Box::new(MockTransport(self.clone())))
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::default()
            .with_settle_time(Duration::ZERO)
            .with_cooldown(Duration::ZERO)
            .with_retry(RetryPolicy::default().with_max_attempts(3))
    }

    #[tokio::test(start_paused = true)]
    async fn connects_on_first_read() {
        let mock = Mock::default();
        mock.respond(Ok(vec![0x0076]));
        let session = Session::spawn(config(), Box::new(mock.clone()));
        assert_eq!(SessionState::Disconnected, session.state());
        let words = session.read(RegisterRange::new(32_085, 1)).await.unwrap();
        assert_eq!(vec![0x0076], words);
        assert_eq!(SessionState::Connected, session.state());
        assert_eq!(1, *mock.connects.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_device_is_retried() {
        let mock = Mock::default();
        mock.respond(Err(ExceptionCode::ServerDeviceBusy.into()));
        mock.respond(Ok(vec![42]));
        let session = Session::spawn(config(), Box::new(mock.clone()));
        assert_eq!(vec![42], session.read(RegisterRange::new(1, 1)).await.unwrap());
        assert_eq!(1, *mock.connects.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_timeouts_until_exhausted() {
        let mock = Mock::default();
        for _ in 0..3 {
            mock.respond(Err(TransportError::Timeout(Duration::from_secs(1))));
        }
        let session = Session::spawn(config(), Box::new(mock.clone()));
        let err = session.read(RegisterRange::new(1, 1)).await.unwrap_err();
        assert!(matches!(err, Error::SessionLost { attempts: 3, .. }), "{err}");
        assert_eq!(3, *mock.connects.lock().unwrap());
        assert_eq!(SessionState::Disconnected, session.state());
    }

    #[tokio::test(start_paused = true)]
    async fn illegal_address_is_not_retried() {
        let mock = Mock::default();
        mock.respond(Err(ExceptionCode::IllegalDataAddress.into()));
        let session = Session::spawn(config(), Box::new(mock.clone()));
        let err = session.read(RegisterRange::new(1, 1)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Exception(ExceptionCode::IllegalDataAddress))
        ));
        assert_eq!(1, mock.requests.lock().unwrap().len());
        assert_eq!(SessionState::Connected, session.state());
    }

    #[tokio::test(start_paused = true)]
    async fn write_requires_login() {
        let mock = Mock::default();
        let session = Session::spawn(config(), Box::new(mock.clone()));
        let err = session.write(47_075, vec![0, 2_500]).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientPrivilege));
        assert!(mock.requests.lock().unwrap().is_empty());
        // Without credentials there is no point in connecting.
        assert_eq!(0, *mock.connects.lock().unwrap());
        assert_eq!(SessionState::Disconnected, session.state());
    }

    #[tokio::test(start_paused = true)]
    async fn read_from_another_unit() {
        let mock = Mock::default();
        mock.respond(Ok(vec![7]));
        mock.respond(Ok(vec![8]));
        let session = Session::spawn(config(), Box::new(mock.clone()));
        assert_eq!(vec![7], session.read_from(2, RegisterRange::new(32_085, 1)).await.unwrap());
        assert_eq!(vec![8], session.read(RegisterRange::new(32_085, 1)).await.unwrap());
        // Switched for the request only.
        assert_eq!(vec![Some(2), None], *mock.units.lock().unwrap());
        assert_eq!(1, *mock.connects.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn session_ends_with_last_handle() {
        let mock = Mock::default();
        let session = Session::spawn(config(), Box::new(mock));
        let mut state = session.subscribe();
        session.connect().await.unwrap();
        assert_eq!(SessionState::Connected, *state.borrow_and_update());
        drop(session);
        state.changed().await.unwrap();
        assert_eq!(SessionState::Disconnected, *state.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_transfer_is_aborted() {
        let mock = Mock::default();
        let session = Session::spawn(config(), Box::new(mock));
        let err = session.read_chunk(TransferId(1)).await.unwrap_err();
        assert!(matches!(err, Error::TransferAborted));
    }
}
