// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversion between register words and typed values

mod periods;

pub use self::periods::{
    ChargeDischargePeriod, ChargeFlag, PeriodKind, Periods, PricePeriod, StorageModel,
    TimeOfUsePeriod, Weekdays, MINUTES_PER_DAY,
};

use std::{borrow::Cow, collections::BTreeMap, fmt};

use chrono::{DateTime, FixedOffset, Offset as _, TimeZone as _, Utc};
use smallvec::SmallVec;

use crate::{
    catalogue::{DecodeRule, Labels, Number, RegisterSpec},
    frame::{bytes_to_words, words_to_bytes},
    planner::RegisterRange,
    Error, Result, Word,
};

const NO_TIMESTAMP: u64 = 0xFFFF_FFFF;

// Relative error accepted when scaling decimals, absorbs binary rounding.
const RESOLUTION_TOLERANCE: f64 = 1e-6;

/// A single bit of a bitfield register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flag {
    Known(Cow<'static, str>),
    /// A set bit without a label, `0` is the least significant bit.
    Unknown(u8),
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(label) => f.write_str(label),
            Self::Unknown(bit) => write!(f, "unknown bit {bit}"),
        }
    }
}

/// The physical value of a register.
///
/// Numeric registers always decode to the same kind: [`Value::Integer`]
/// without and [`Value::Decimal`] with a scale. Both kinds are accepted
/// for writing as long as the value is a multiple of the register's
/// resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unscaled integer.
    Integer(i64),
    /// Scaled integer.
    Decimal(f64),
    /// All set bits of a bitfield.
    Flags(Vec<Flag>),
    /// Label of an enumeration.
    State(Cow<'static, str>),
    Timestamp(DateTime<Utc>),
    Text(String),
    Periods(Periods),
    /// The device signals that it has no data for this register.
    Unavailable,
}

impl Value {
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Decimal(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Decimal(value) => write!(f, "{value}"),
            Self::Flags(flags) => {
                f.write_str("[")?;
                for (i, flag) in flags.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{flag}")?;
                }
                f.write_str("]")
            }
            Self::State(label) => f.write_str(label),
            Self::Timestamp(timestamp) => write!(f, "{}", timestamp.to_rfc3339()),
            Self::Text(text) => f.write_str(text),
            Self::Periods(periods) => write!(f, "{periods}"),
            Self::Unavailable => f.write_str("n/a"),
        }
    }
}

/// A freshly decoded register.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue {
    /// The words as received.
    pub raw: SmallVec<[Word; 4]>,
    pub value: Value,
    pub unit: Option<Cow<'static, str>>,
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)?;
        if let Some(unit) = &self.unit {
            write!(f, " {unit}")?;
        }
        Ok(())
    }
}

/// Decoder and encoder of register contents.
///
/// Timestamps are stored in the device's local time. The codec needs to
/// know the device's UTC offset to normalise them. The layout of
/// time-of-use schedules depends on the attached battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    utc_offset: FixedOffset,
    storage: Option<StorageModel>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl Codec {
    #[must_use]
    pub const fn new(utc_offset: FixedOffset) -> Self {
        Self {
            utc_offset,
            storage: None,
        }
    }

    #[must_use]
    pub const fn with_storage(self, storage: Option<StorageModel>) -> Self {
        Self { storage, ..self }
    }

    #[must_use]
    pub const fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    #[must_use]
    pub const fn storage(&self) -> Option<StorageModel> {
        self.storage
    }

    /// Decode every register in `specs` from the response to a read of
    /// `range`.
    ///
    /// Errors only affect the register they occur in.
    #[must_use]
    pub fn decode_range(
        &self,
        range: RegisterRange,
        words: &[Word],
        specs: &[&RegisterSpec],
    ) -> BTreeMap<Cow<'static, str>, Result<DecodedValue>> {
        specs
            .iter()
            .map(|spec| {
                let decoded = match range.offset_of(spec) {
                    Some(offset) => self.decode(spec, words.get(offset..).unwrap_or_default()),
                    None => Err(Error::Malformed {
                        name: spec.name().clone(),
                        reason: format!("not covered by {range:?}"),
                    }),
                };
                (spec.name().clone(), decoded)
            })
            .collect()
    }

    /// Decode a single register from its words.
    ///
    /// Only the first [`RegisterSpec::word_count`] words are considered.
    ///
    /// # Errors
    ///
    /// [`Error::ShortRead`] if there are less words than required,
    /// [`Error::Malformed`] or [`Error::UnknownEnumValue`] if the content
    /// does not match the definition.
    pub fn decode(&self, spec: &RegisterSpec, words: &[Word]) -> Result<DecodedValue> {
        let expected = usize::from(spec.word_count());
        let Some(words) = words.get(..expected) else {
            return Err(Error::ShortRead {
                name: spec.name().clone(),
                expected,
                actual: words.len(),
            });
        };
        let raw = pack(words);
        let value = match spec.rule() {
            DecodeRule::Number(number) => decode_number(spec, number, raw)?,
            DecodeRule::Flags(labels) => Value::Flags(decode_flags(labels, raw, bits(spec))),
            DecodeRule::Enumeration(labels) => labels
                .get(raw)
                .map(|label| Value::State(label.clone()))
                .ok_or_else(|| Error::UnknownEnumValue {
                    name: spec.name().clone(),
                    raw,
                })?,
            DecodeRule::Timestamp => self.decode_timestamp(spec, raw)?,
            DecodeRule::Text => decode_text(spec, words)?,
            DecodeRule::Periods(kind) => Periods::decode(*kind, self.storage, words)
                .map(Value::Periods)
                .map_err(|reason| Error::Malformed {
                    name: spec.name().clone(),
                    reason,
                })?,
        };
        Ok(DecodedValue {
            raw: SmallVec::from_slice(words),
            value,
            unit: spec.unit().cloned(),
        })
    }

    /// Encode a value for writing it into the register.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] if the value does not fit into the register
    /// or does not match its type.
    pub fn encode(&self, spec: &RegisterSpec, value: &Value) -> Result<Vec<Word>> {
        let out_of_range = |reason: String| Error::OutOfRange {
            name: spec.name().clone(),
            reason,
        };
        match (spec.rule(), value) {
            (DecodeRule::Number(number), Value::Integer(_) | Value::Decimal(_)) => {
                let raw = encode_number(number, value, bits(spec)).map_err(out_of_range)?;
                Ok(unpack(raw, spec.word_count()))
            }
            (DecodeRule::Flags(labels), Value::Flags(flags)) => {
                let mut raw = 0u64;
                for flag in flags {
                    let bit = match flag {
                        Flag::Known(label) => labels
                            .code_of(label)
                            .ok_or_else(|| out_of_range(format!("unknown flag `{label}`")))?,
                        Flag::Unknown(bit) => u64::from(*bit),
                    };
                    if bit >= u64::from(bits(spec)) {
                        return Err(out_of_range(format!("bit {bit} exceeds register width")));
                    }
                    raw |= 1 << bit;
                }
                Ok(unpack(raw, spec.word_count()))
            }
            (DecodeRule::Enumeration(labels), Value::State(label)) => {
                let code = labels
                    .code_of(label)
                    .ok_or_else(|| out_of_range(format!("unknown state `{label}`")))?;
                if code > max_unsigned(bits(spec)) {
                    return Err(out_of_range(format!("code {code} exceeds register width")));
                }
                Ok(unpack(code, spec.word_count()))
            }
            (DecodeRule::Timestamp, Value::Timestamp(timestamp)) => {
                let local = timestamp.timestamp() + i64::from(self.utc_offset.local_minus_utc());
                match u64::try_from(local) {
                    Ok(raw) if raw < NO_TIMESTAMP => Ok(unpack(raw, spec.word_count())),
                    _ => Err(out_of_range(format!("{timestamp} cannot be represented"))),
                }
            }
            (DecodeRule::Text, Value::Text(text)) => {
                let capacity = usize::from(spec.word_count()) * 2;
                if text.len() > capacity {
                    return Err(out_of_range(format!(
                        "{} bytes exceed the capacity of {capacity} bytes",
                        text.len()
                    )));
                }
                let mut bytes = text.as_bytes().to_vec();
                bytes.resize(capacity, 0);
                Ok(bytes_to_words(&bytes))
            }
            (DecodeRule::Periods(kind), Value::Periods(periods)) if periods.fits(*kind) => {
                let mut words = periods.encode().map_err(out_of_range)?;
                let capacity = usize::from(spec.word_count());
                if words.len() > capacity {
                    return Err(out_of_range(format!(
                        "{} words exceed the capacity of {capacity} words",
                        words.len()
                    )));
                }
                words.resize(capacity, 0);
                Ok(words)
            }
            (rule, value) => Err(out_of_range(format!("{value:?} does not match {rule:?}"))),
        }
    }

    fn decode_timestamp(&self, spec: &RegisterSpec, raw: u64) -> Result<Value> {
        if raw == NO_TIMESTAMP {
            return Ok(Value::Unavailable);
        }
        let local = i64::try_from(raw).unwrap_or(i64::MAX);
        let utc = local - i64::from(self.utc_offset.local_minus_utc());
        Utc.timestamp_opt(utc, 0)
            .single()
            .map(Value::Timestamp)
            .ok_or_else(|| Error::Malformed {
                name: spec.name().clone(),
                reason: format!("invalid timestamp {raw}"),
            })
    }
}

fn bits(spec: &RegisterSpec) -> u32 {
    u32::from(spec.word_count()) * 16
}

const fn max_unsigned(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1 << bits) - 1
    }
}

const fn max_signed(bits: u32) -> i64 {
    (max_unsigned(bits) >> 1) as i64
}

// Big-endian word order, callers guarantee at most 4 words for integers.
fn pack(words: &[Word]) -> u64 {
    words
        .iter()
        .take(4)
        .fold(0, |acc, word| (acc << 16) | u64::from(*word))
}

fn unpack(raw: u64, word_count: u16) -> Vec<Word> {
    (0..u32::from(word_count))
        .rev()
        .map(|i| (raw >> (16 * i)) as Word)
        .collect()
}

fn decode_number(spec: &RegisterSpec, number: &Number, raw: u64) -> Result<Value> {
    let bits = bits(spec);
    let malformed = |reason: String| Error::Malformed {
        name: spec.name().clone(),
        reason,
    };
    let value = if number.signed {
        if number.no_data && raw == max_signed(bits) as u64 {
            return Ok(Value::Unavailable);
        }
        let shift = 64 - bits;
        let value = ((raw << shift) as i64) >> shift;
        if number.absolute {
            value.saturating_abs()
        } else {
            value
        }
    } else {
        if number.no_data && raw == max_unsigned(bits) {
            return Ok(Value::Unavailable);
        }
        i64::try_from(raw).map_err(|_| malformed(format!("{raw} exceeds the supported range")))?
    };
    if let Some(valid) = &number.valid {
        if !valid.contains(&value) {
            return Err(malformed(format!("{value} not within {valid:?}")));
        }
    }
    if number.scale == 0 {
        return Ok(Value::Integer(value));
    }
    Ok(Value::Decimal(value as f64 / 10f64.powi(i32::from(number.scale))))
}

fn encode_number(number: &Number, value: &Value, bits: u32) -> std::result::Result<u64, String> {
    let factor = 10i64
        .checked_pow(u32::from(number.scale))
        .ok_or_else(|| format!("scale {} is not supported", number.scale))?;
    let raw = match *value {
        Value::Integer(value) => value
            .checked_mul(factor)
            .ok_or_else(|| format!("{value} overflows"))?,
        Value::Decimal(value) => {
            let exact = value * factor as f64;
            let scaled = exact.round();
            if !scaled.is_finite() || scaled.abs() >= 9.2e18 {
                return Err(format!("{value} overflows"));
            }
            if (exact - scaled).abs() > RESOLUTION_TOLERANCE * scaled.abs().max(1.0) {
                return Err(format!(
                    "{value} is finer than the resolution of {} decimal(s)",
                    number.scale
                ));
            }
            scaled as i64
        }
        _ => return Err(format!("{value:?} is not a number")),
    };
    let (min, max) = if number.signed {
        (-max_signed(bits) - 1, max_signed(bits))
    } else {
        (0, i64::try_from(max_unsigned(bits)).unwrap_or(i64::MAX))
    };
    if raw < min || raw > max {
        return Err(format!("{raw} not within {min}..={max}"));
    }
    if let Some(valid) = &number.valid {
        if !valid.contains(&raw) {
            return Err(format!("{raw} not within {valid:?}"));
        }
    }
    // Two's complement, truncated to the register width by `unpack`.
    Ok(raw as u64)
}

pub(crate) fn decode_flags(labels: &Labels, raw: u64, bits: u32) -> Vec<Flag> {
    (0..bits)
        .filter(|bit| raw & (1 << bit) != 0)
        .map(|bit| match labels.get(u64::from(bit)) {
            Some(label) => Flag::Known(label.clone()),
            None => Flag::Unknown(bit as u8),
        })
        .collect()
}

fn decode_text(spec: &RegisterSpec, words: &[Word]) -> Result<Value> {
    let bytes = words_to_bytes(words);
    let text = std::str::from_utf8(&bytes).map_err(|err| Error::Malformed {
        name: spec.name().clone(),
        reason: err.to_string(),
    })?;
    // Only the padding is removed, embedded NULs are content.
    Ok(Value::Text(text.trim_end_matches(['\0', ' ']).to_owned()))
}
