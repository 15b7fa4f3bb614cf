// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Named access to the registers of a device

use std::{
    borrow::Cow,
    collections::BTreeMap,
    sync::atomic::{AtomicI32, AtomicU8, Ordering},
};

use chrono::{FixedOffset, Offset as _, Utc};

use crate::{
    catalogue::{
        sun2000::{STORAGE_UNIT_1_PRODUCT_MODEL, STORAGE_UNIT_2_PRODUCT_MODEL, TIME_ZONE},
        Catalogue, RegisterSpec,
    },
    codec::{Codec, DecodedValue, StorageModel, Value},
    file::{FileChunks, FileReader},
    planner::{self, BatchLimits, RegisterRange},
    session::{Credentials, Session, SessionConfig, SessionState},
    transport::Connector,
    Address, Error, ExceptionCode, Result, TransportError, UnitId, Word,
};

/// Parameters of a [`Device`].
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub limits: BatchLimits,
    /// Registers not available on this model are rejected without
    /// reading them. Unknown models permit all registers.
    pub model_id: Option<u16>,
    /// Initial offset of the device's local time, replaced on connect.
    pub utc_offset: FixedOffset,
    /// Initial battery model, replaced on connect.
    pub storage_model: Option<StorageModel>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            limits: BatchLimits::default(),
            model_id: None,
            utc_offset: Utc.fix(),
            storage_model: None,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_model_id(mut self, model_id: u16) -> Self {
        self.model_id = Some(model_id);
        self
    }

    #[must_use]
    pub fn with_utc_offset(mut self, utc_offset: FixedOffset) -> Self {
        self.utc_offset = utc_offset;
        self
    }

    #[must_use]
    pub fn with_storage_model(mut self, storage_model: StorageModel) -> Self {
        self.storage_model = Some(storage_model);
        self
    }
}

const fn storage_code(model: Option<StorageModel>) -> u8 {
    match model {
        None => 0,
        Some(StorageModel::LgResu) => 1,
        Some(StorageModel::HuaweiLuna2000) => 2,
    }
}

const fn storage_model(code: u8) -> Option<StorageModel> {
    match code {
        1 => Some(StorageModel::LgResu),
        2 => Some(StorageModel::HuaweiLuna2000),
        _ => None,
    }
}

// The register of the product model does not exist on devices without
// battery support.
fn lacks_battery(err: &Error) -> bool {
    matches!(
        err,
        Error::NotApplicable { .. }
            | Error::Transport(TransportError::Exception(ExceptionCode::IllegalDataAddress))
    )
}

/// The outcome of [`Device::get()`] for every requested name.
pub type Readings = BTreeMap<Cow<'static, str>, Result<DecodedValue>>;

/// A device with a catalogue of named registers.
#[derive(Debug)]
pub struct Device {
    session: Session,
    catalogue: Catalogue,
    limits: BatchLimits,
    model_id: Option<u16>,
    utc_offset_secs: AtomicI32,
    storage_model: AtomicU8,
}

impl Device {
    /// Create a device and spawn its session onto the current tokio
    /// runtime.
    #[must_use]
    pub fn new(config: Config, catalogue: Catalogue, connector: Box<dyn Connector>) -> Self {
        let Config {
            session,
            limits,
            model_id,
            utc_offset,
            storage_model,
        } = config;
        Self {
            session: Session::spawn(session, connector),
            catalogue,
            limits,
            model_id,
            utc_offset_secs: AtomicI32::new(utc_offset.local_minus_utc()),
            storage_model: AtomicU8::new(storage_code(storage_model)),
        }
    }

    #[must_use]
    pub const fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    /// The underlying session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Offset of the device's local time used for decoding timestamps.
    #[must_use]
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs.load(Ordering::Relaxed)).unwrap_or(Utc.fix())
    }

    /// The attached battery, determines the layout of time-of-use
    /// schedules.
    #[must_use]
    pub fn storage_model(&self) -> Option<StorageModel> {
        storage_model(self.storage_model.load(Ordering::Relaxed))
    }

    fn codec(&self) -> Codec {
        Codec::new(self.utc_offset()).with_storage(self.storage_model())
    }

    fn set_utc_offset_minutes(&self, minutes: i64) {
        let Some(offset) = i32::try_from(minutes)
            .ok()
            .and_then(|minutes| FixedOffset::east_opt(minutes.saturating_mul(60)))
        else {
            log::warn!("Ignoring invalid time zone offset of {minutes} min");
            return;
        };
        log::debug!("Device time zone is UTC{offset}");
        self.utc_offset_secs
            .store(offset.local_minus_utc(), Ordering::Relaxed);
    }

    /// Connect to the device, refresh the offset of its local time and
    /// detect the attached battery.
    ///
    /// # Errors
    ///
    /// Fails if the link cannot be established.
    pub async fn connect(&self) -> Result<()> {
        self.session.connect().await?;
        if self.catalogue.contains(TIME_ZONE) {
            match self.get_one(TIME_ZONE).await {
                Ok(decoded) => {
                    if let Some(minutes) = decoded.value.as_i64() {
                        self.set_utc_offset_minutes(minutes);
                    }
                }
                Err(err) if err.is_session_failure() => return Err(err),
                Err(err) => log::warn!("Failed to read the time zone: {err}"),
            }
        }
        self.detect_storage_model().await
    }

    async fn detect_storage_model(&self) -> Result<()> {
        let mut detected = None;
        let mut answered = false;
        for name in [STORAGE_UNIT_1_PRODUCT_MODEL, STORAGE_UNIT_2_PRODUCT_MODEL] {
            if !self.catalogue.contains(name) {
                continue;
            }
            match self.get_one(name).await {
                Ok(decoded) => {
                    answered = true;
                    if let Value::State(label) = &decoded.value {
                        detected = StorageModel::from_label(label);
                    }
                    if detected.is_some() {
                        break;
                    }
                }
                Err(err) if err.is_session_failure() => return Err(err),
                Err(err) if lacks_battery(&err) => {
                    answered = true;
                    log::info!("No battery support: {err}");
                    break;
                }
                Err(err) => {
                    log::warn!("Failed to detect the battery: {err}");
                    return Ok(());
                }
            }
        }
        if !answered {
            return Ok(());
        }
        match detected {
            Some(model) => log::debug!("Detected battery {model:?}"),
            None => log::info!("No battery attached"),
        }
        self.storage_model
            .store(storage_code(detected), Ordering::Relaxed);
        Ok(())
    }

    /// Log in and remember the credentials for reconnects.
    ///
    /// # Errors
    ///
    /// [`Error::AuthRejected`] if the device refuses the credentials.
    pub async fn login(&self, credentials: Credentials) -> Result<()> {
        self.session.login(credentials).await
    }

    /// Tear down the link. The next operation reconnects.
    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    fn readable(&self, name: &str) -> Result<&RegisterSpec> {
        let spec = self.catalogue.lookup(name)?;
        if !spec.access().is_readable() {
            return Err(Error::NotReadable(spec.name().clone()));
        }
        self.check_applicable(spec)?;
        Ok(spec)
    }

    fn check_applicable(&self, spec: &RegisterSpec) -> Result<()> {
        match self.model_id {
            Some(model) if !spec.applicability().applies_to(model) => Err(Error::NotApplicable {
                name: spec.name().clone(),
                model,
            }),
            _ => Ok(()),
        }
    }

    /// Read and decode the named values with as few requests as possible.
    ///
    /// Every name is answered individually: a name that cannot be read or
    /// decoded does not affect the others.
    ///
    /// # Errors
    ///
    /// Only fails as a whole if the session cannot be established, see
    /// [`Error::is_session_failure()`].
    pub async fn get<I, S>(&self, names: I) -> Result<Readings>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.get_with(None, names).await
    }

    /// Like [`Device::get()`], but read from another unit behind the same
    /// link, e.g. the next inverter of an RS485 daisy-chain.
    pub async fn get_from<I, S>(&self, unit: UnitId, names: I) -> Result<Readings>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.get_with(Some(unit), names).await
    }

    async fn read(&self, unit: Option<UnitId>, range: RegisterRange) -> Result<Vec<Word>> {
        match unit {
            Some(unit) => self.session.read_from(unit, range).await,
            None => self.session.read(range).await,
        }
    }

    async fn write(&self, unit: Option<UnitId>, address: Address, words: Vec<Word>) -> Result<()> {
        match unit {
            Some(unit) => self.session.write_to(unit, address, words).await,
            None => self.session.write(address, words).await,
        }
    }

    async fn get_with<I, S>(&self, unit: Option<UnitId>, names: I) -> Result<Readings>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut readings = Readings::new();
        let mut specs = Vec::new();
        let max = self.limits.max_registers_per_request;
        for name in names {
            let name = name.as_ref();
            match self.readable(name) {
                Ok(spec) if spec.word_count() > max => {
                    let err = Error::SpecTooLarge {
                        name: spec.name().clone(),
                        word_count: spec.word_count(),
                        max,
                    };
                    readings.insert(spec.name().clone(), Err(err));
                }
                Ok(spec) => specs.push(spec),
                Err(err) => {
                    readings.insert(Cow::Owned(name.to_owned()), Err(err));
                }
            }
        }

        let plan = match planner::plan(specs.iter().copied(), &self.limits) {
            Ok(plan) => plan,
            Err(err) => {
                for spec in specs {
                    readings.insert(spec.name().clone(), Err(err.clone()));
                }
                return Ok(readings);
            }
        };

        let codec = self.codec();
        for read in plan.iter() {
            match self.read(unit, read.range).await {
                Ok(words) => readings.extend(codec.decode_range(read.range, &words, &read.specs)),
                Err(err) if err.is_session_failure() => return Err(err),
                Err(err) => {
                    log::debug!("Read of {:?} failed: {err}", read.range);
                    for spec in &read.specs {
                        readings.insert(spec.name().clone(), Err(err.clone()));
                    }
                }
            }
        }
        Ok(readings)
    }

    /// Read and decode a single named value.
    pub async fn get_one(&self, name: &str) -> Result<DecodedValue> {
        let readings = self.get([name]).await?;
        take(readings, name)
    }

    /// Read and decode a single named value of another unit.
    pub async fn get_one_from(&self, unit: UnitId, name: &str) -> Result<DecodedValue> {
        let readings = self.get_from(unit, [name]).await?;
        take(readings, name)
    }

    /// Encode and write a named value. Requires a logged in session.
    ///
    /// # Errors
    ///
    /// [`Error::NotWritable`] or [`Error::OutOfRange`] without touching the
    /// device, [`Error::InsufficientPrivilege`] if not logged in or if the
    /// device denies the write.
    pub async fn set(&self, name: &str, value: Value) -> Result<()> {
        self.set_with(None, name, value).await
    }

    /// Like [`Device::set()`], but write to another unit behind the same
    /// link. The login of the session applies.
    pub async fn set_on(&self, unit: UnitId, name: &str, value: Value) -> Result<()> {
        self.set_with(Some(unit), name, value).await
    }

    async fn set_with(&self, unit: Option<UnitId>, name: &str, value: Value) -> Result<()> {
        let spec = self.catalogue.lookup(name)?;
        if !spec.access().is_writable() {
            return Err(Error::NotWritable(spec.name().clone()));
        }
        self.check_applicable(spec)?;
        let words = self.codec().encode(spec, &value)?;
        self.write(unit, spec.start_address(), words).await?;
        if unit.is_none() && spec.name() == TIME_ZONE {
            if let Some(minutes) = value.as_i64() {
                self.set_utc_offset_minutes(minutes);
            }
        }
        Ok(())
    }

    /// Open a file for reading its content chunk by chunk.
    ///
    /// # Errors
    ///
    /// [`Error::TransferAlreadyActive`] while another transfer is open.
    pub async fn read_file(&self, file_id: u16, params: &[Word]) -> Result<FileChunks> {
        FileReader::new(self.session.clone())
            .read_file(file_id, params)
            .await
    }
}

fn take(mut readings: Readings, name: &str) -> Result<DecodedValue> {
    readings
        .remove(name)
        .unwrap_or_else(|| Err(Error::UnknownRegister(name.to_owned())))
}
