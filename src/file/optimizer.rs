// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Optimizer data files

use std::{
    borrow::Cow,
    fmt,
    io::{self, Cursor, Read as _},
};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt as _};
use chrono::{DateTime, TimeZone as _, Utc};

use crate::{
    catalogue::Labels,
    codec::{decode_flags, Flag},
    frame::bytes_to_words,
    Error, Result, Word,
};

/// Alarm bits of an optimizer.
pub const ALARM_LABELS: &[(u64, &str)] = &[
    (0, "Input Overvoltage"),
    (1, "Input Undervoltage"),
    (3, "Output Overvoltage"),
    (4, "Overtemperature"),
    (5, "Output Short Circuit"),
    (6, "EEPROM Fault"),
    (7, "Internal Hardware Fault"),
    (8, "Abnormal Voltage To Ground"),
    (9, "Power-off due to heartbeat timeout"),
    (10, "Fast shutdown"),
    (11, "Request Escape Alarm"),
    (12, "Version mismatch alarm"),
    (15, "Input overvoltage"),
    (16, "Overtemperature"),
    (17, "Output short circuit"),
    (18, "Internal hardware fault"),
    (19, "Version mismatch alarm"),
    (20, "Backfeed alarm"),
    (21, "Abnormal output voltage"),
    (22, "Upgrade failure"),
    (26, "Display bit 16 to bit 30 alarms"),
];

const INVALID_POSITION: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningStatus {
    Offline,
    Standby,
    Faulty,
    Running,
    PowerOff,
    Unknown(i16),
}

impl From<i16> for RunningStatus {
    fn from(code: i16) -> Self {
        match code {
            0 => Self::Offline,
            1 => Self::Standby,
            3 => Self::Faulty,
            4 => Self::Running,
            12 => Self::PowerOff,
            code => Self::Unknown(code),
        }
    }
}

impl fmt::Display for RunningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("Offline"),
            Self::Standby => f.write_str("Standby"),
            Self::Faulty => f.write_str("Faulty"),
            Self::Running => f.write_str("Running"),
            Self::PowerOff => f.write_str("Power off"),
            Self::Unknown(code) => write!(f, "Unknown ({code})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineStatus {
    Offline,
    Online,
    Disconnected,
    Unknown(u16),
}

impl From<u16> for OnlineStatus {
    fn from(code: u16) -> Self {
        match code {
            0 => Self::Offline,
            1 => Self::Online,
            2 => Self::Disconnected,
            code => Self::Unknown(code),
        }
    }
}

/// Measurements of a single optimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct RealTimeData {
    pub address: i16,
    /// W
    pub output_power: f64,
    /// V
    pub voltage_to_ground: f64,
    pub alarms: Vec<Flag>,
    /// V
    pub output_voltage: f64,
    /// A
    pub output_current: f64,
    /// V
    pub input_voltage: f64,
    /// A
    pub input_current: f64,
    /// °C
    pub temperature: f64,
    pub running_status: RunningStatus,
    /// kWh
    pub accumulated_energy_yield: f64,
}

/// Measurements of all optimizers at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct RealTimeDataUnit {
    pub time: DateTime<Utc>,
    pub optimizers: Vec<RealTimeData>,
}

/// Real time data of the optimizers, little-endian.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RealTimeDataFile {
    pub file_version: String,
    pub units: Vec<RealTimeDataUnit>,
}

const REAL_TIME_HEADER_LEN: usize = 12;

impl RealTimeDataFile {
    pub const FILE_TYPE: u16 = 0x44;

    /// Open parameters selecting the data recorded between `start` and `end`.
    #[must_use]
    pub fn query_within_timespan(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Word> {
        const TAG: u8 = 0x10;
        const VALUE_LEN: u8 = 12;
        let mut query = vec![TAG, VALUE_LEN];
        query.extend_from_slice(&epoch_secs(start).to_be_bytes());
        query.extend_from_slice(&epoch_secs(end).to_be_bytes());
        query.extend_from_slice(&0u32.to_be_bytes());
        bytes_to_words(&query)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < REAL_TIME_HEADER_LEN {
            return Ok(Self::default());
        }
        let labels = Labels::from(ALARM_LABELS);
        let mut rdr = Cursor::new(data);
        let file_version = read_text(&mut rdr, 4).map_err(malformed)?;
        skip(&mut rdr, 8).map_err(malformed)?;

        let mut units = Vec::new();
        while (rdr.position() as usize) < data.len() {
            let unit = read_unit(&mut rdr, &labels).map_err(malformed)?;
            units.push(unit);
        }
        Ok(Self {
            file_version,
            units,
        })
    }
}

fn epoch_secs(time: DateTime<Utc>) -> u32 {
    u32::try_from(time.timestamp().max(0)).unwrap_or(u32::MAX)
}

fn read_unit(rdr: &mut Cursor<&[u8]>, labels: &Labels) -> io::Result<RealTimeDataUnit> {
    let time = rdr.read_i32::<LittleEndian>()?;
    skip(rdr, 4)?;
    let _length = rdr.read_i16::<LittleEndian>()?;
    let count = rdr.read_i16::<LittleEndian>()?;
    let time = Utc
        .timestamp_opt(i64::from(time), 0)
        .single()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid time"))?;
    let optimizers = (0..count.max(0))
        .map(|_| read_optimizer(rdr, labels))
        .collect::<io::Result<_>>()?;
    Ok(RealTimeDataUnit { time, optimizers })
}

fn read_optimizer(rdr: &mut Cursor<&[u8]>, labels: &Labels) -> io::Result<RealTimeData> {
    let address = rdr.read_i16::<LittleEndian>()?;
    let output_power = rdr.read_i16::<LittleEndian>()?;
    let voltage_to_ground = rdr.read_i16::<LittleEndian>()?;
    let alarm = rdr.read_u32::<LittleEndian>()?;
    let mut scaled = [0i16; 6];
    rdr.read_i16_into::<LittleEndian>(&mut scaled)?;
    let [output_voltage, output_current, input_voltage, input_current, temperature, running_status] =
        scaled;
    let accumulated_energy_yield = rdr.read_u32::<LittleEndian>()?;
    Ok(RealTimeData {
        address,
        output_power: f64::from(output_power) / 10.0,
        voltage_to_ground: f64::from(voltage_to_ground) / 10.0,
        alarms: decode_flags(labels, u64::from(alarm), 32),
        output_voltage: f64::from(output_voltage) / 10.0,
        output_current: f64::from(output_current) / 100.0,
        input_voltage: f64::from(input_voltage) / 10.0,
        input_current: f64::from(input_current) / 100.0,
        temperature: f64::from(temperature) / 10.0,
        running_status: running_status.into(),
        accumulated_energy_yield: f64::from(accumulated_energy_yield) / 1000.0,
    })
}

/// Static information about a single optimizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInformation {
    pub address: u16,
    pub online_status: OnlineStatus,
    pub string_number: i8,
    /// Position relative to the start of the string.
    pub position_in_string: Option<u16>,
    pub serial_number: String,
    pub software_version: String,
    pub alias: String,
    pub model: String,
    /// Only reported by files of version `V103`.
    pub one_to_more: Option<bool>,
    pub rated_power: Option<u16>,
    pub cpu_type: Option<u16>,
}

/// System information of the optimizers, big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInformationFile {
    pub file_version: String,
    pub optimizers: Vec<SystemInformation>,
}

impl SystemInformationFile {
    pub const FILE_TYPE: u16 = 0x45;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut rdr = Cursor::new(data);
        let (file_version, count) = read_system_header(&mut rdr).map_err(malformed)?;
        let extended = match file_version.as_str() {
            "V102" => false,
            "V103" => true,
            version => {
                return Err(malformed(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported version {version:?}"),
                )))
            }
        };
        let optimizers = (0..count)
            .map(|_| read_system_information(&mut rdr, extended))
            .collect::<io::Result<_>>()
            .map_err(malformed)?;
        Ok(Self {
            file_version,
            optimizers,
        })
    }
}

fn read_system_header(rdr: &mut Cursor<&[u8]>) -> io::Result<(String, u16)> {
    let file_version = read_text(rdr, 4)?;
    let _sequence_number = rdr.read_u16::<BigEndian>()?;
    let _length = rdr.read_u16::<BigEndian>()?;
    skip(rdr, 4)?;
    let count = rdr.read_u16::<BigEndian>()?;
    Ok((file_version, count))
}

fn read_system_information(
    rdr: &mut Cursor<&[u8]>,
    extended: bool,
) -> io::Result<SystemInformation> {
    let address = rdr.read_u16::<BigEndian>()?;
    let online_status = rdr.read_u16::<BigEndian>()?.into();
    // The first byte duplicates the second one.
    skip(rdr, 1)?;
    let string_number = rdr.read_i8()?;
    let position = rdr.read_u16::<BigEndian>()?;
    let serial_number = read_text(rdr, 20)?;
    let software_version = read_text(rdr, 30)?;
    let alias = read_text(rdr, 20)?;
    let model = read_text(rdr, 30)?;
    let mut info = SystemInformation {
        address,
        online_status,
        string_number,
        position_in_string: (position != INVALID_POSITION).then_some(position),
        serial_number,
        software_version,
        alias,
        model,
        one_to_more: None,
        rated_power: None,
        cpu_type: None,
    };
    if extended {
        // machine id
        skip(rdr, 2)?;
        info.one_to_more = Some(rdr.read_u16::<BigEndian>()? != 0);
        info.rated_power = Some(rdr.read_u16::<BigEndian>()?);
        info.cpu_type = Some(rdr.read_u16::<BigEndian>()?);
    }
    Ok(info)
}

fn skip(rdr: &mut Cursor<&[u8]>, len: usize) -> io::Result<()> {
    let mut buf = [0; 8];
    rdr.read_exact(&mut buf[..len])
}

fn read_text(rdr: &mut Cursor<&[u8]>, len: usize) -> io::Result<String> {
    let mut buf = vec![0; len];
    rdr.read_exact(&mut buf)?;
    let end = buf.iter().rposition(|b| *b != 0).map_or(0, |pos| pos + 1);
    buf.truncate(end);
    match String::from_utf8(buf) {
        Ok(text) => Ok(text),
        Err(err) => {
            log::warn!("Ignoring undecodable text {:02x?}", err.as_bytes());
            Ok(String::new())
        }
    }
}

fn malformed(err: io::Error) -> Error {
    Error::Malformed {
        name: Cow::Borrowed("optimizer file"),
        reason: err.to_string(),
    }
}
