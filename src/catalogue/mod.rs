// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Register definitions
//!
//! A [`Catalogue`] maps the names of logical values to the registers
//! backing them and the rule for decoding their content. It is supplied
//! once when constructing a [`Device`](crate::Device) and never changes
//! afterwards.

use std::{
    borrow::Cow,
    collections::{btree_map, BTreeMap},
    ops::RangeInclusive,
    sync::Arc,
};

use crate::{codec::PeriodKind, Address, Error, Quantity, Result};

pub mod sun2000;

/// Maximum number of words an integer register may span.
pub const MAX_INTEGER_WORDS: Quantity = 4;

/// Whether a register may be read, written or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    #[must_use]
    pub const fn is_readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// The device models on which a register exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Applicability {
    #[default]
    All,
    /// Only on the listed model identifiers.
    Models(Vec<u16>),
}

impl Applicability {
    #[must_use]
    pub fn applies_to(&self, model: u16) -> bool {
        match self {
            Self::All => true,
            Self::Models(models) => models.contains(&model),
        }
    }
}

/// Symbolic names for raw codes.
///
/// For [`DecodeRule::Enumeration`] the key is the raw code, for
/// [`DecodeRule::Flags`] it is the bit position (`0` = least significant).
#[derive(Debug, Clone, PartialEq)]
pub struct Labels(Arc<[(u64, Cow<'static, str>)]>);

impl Labels {
    /// Look up the label of a code.
    #[must_use]
    pub fn get(&self, code: u64) -> Option<&Cow<'static, str>> {
        self.0
            .iter()
            .find_map(|(key, label)| (*key == code).then_some(label))
    }

    /// Reverse lookup of the code of a label.
    #[must_use]
    pub fn code_of(&self, label: &str) -> Option<u64> {
        self.0
            .iter()
            .find_map(|(key, known)| (known == label).then_some(*key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> + '_ {
        self.0.iter().map(|(key, label)| (*key, label.as_ref()))
    }
}

impl<L> FromIterator<(u64, L)> for Labels
where
    L: Into<Cow<'static, str>>,
{
    fn from_iter<T: IntoIterator<Item = (u64, L)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(key, label)| (key, label.into())).collect())
    }
}

impl From<&'static [(u64, &'static str)]> for Labels {
    fn from(table: &'static [(u64, &'static str)]) -> Self {
        table.iter().copied().collect()
    }
}

/// Format of a plain numeric register.
///
/// The physical value is `raw × 10^-scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct Number {
    pub signed: bool,
    pub scale: u8,
    pub unit: Option<Cow<'static, str>>,
    /// Accepted raw values, anything else is malformed.
    pub valid: Option<RangeInclusive<i64>>,
    /// The maximum raw value of the type means "no data".
    pub no_data: bool,
    /// Report the magnitude only. Some firmware versions report values
    /// with the wrong sign.
    pub absolute: bool,
}

impl Number {
    #[must_use]
    pub const fn unsigned(scale: u8) -> Self {
        Self {
            signed: false,
            scale,
            unit: None,
            valid: None,
            no_data: false,
            absolute: false,
        }
    }

    #[must_use]
    pub const fn signed(scale: u8) -> Self {
        Self {
            signed: true,
            scale,
            unit: None,
            valid: None,
            no_data: false,
            absolute: false,
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    #[must_use]
    pub fn with_valid(mut self, valid: RangeInclusive<i64>) -> Self {
        self.valid = Some(valid);
        self
    }

    #[must_use]
    pub fn with_no_data(mut self) -> Self {
        self.no_data = true;
        self
    }

    #[must_use]
    pub fn with_absolute(mut self) -> Self {
        self.absolute = true;
        self
    }
}

/// How the words of a register are turned into a value.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeRule {
    /// Big-endian integer of 1 to 4 words, optionally scaled.
    Number(Number),
    /// Bitfield, every set bit is reported.
    Flags(Labels),
    /// One symbolic state out of a closed set.
    Enumeration(Labels),
    /// Seconds since the epoch in the device's local time (2 words).
    Timestamp,
    /// Fixed-length text padded with NUL or space.
    Text,
    /// Battery schedule, see [`Periods`](crate::codec::Periods).
    Periods(PeriodKind),
}

impl DecodeRule {
    fn check_width(&self, word_count: Quantity) -> std::result::Result<(), String> {
        let max = match self {
            Self::Number(_) | Self::Flags(_) | Self::Enumeration(_) => MAX_INTEGER_WORDS,
            Self::Timestamp => {
                return (word_count == 2)
                    .then_some(())
                    .ok_or_else(|| format!("timestamps span 2 words, not {word_count}"));
            }
            Self::Text => return Ok(()),
            Self::Periods(kind) => {
                let min = kind.min_words();
                return (usize::from(word_count) >= min)
                    .then_some(())
                    .ok_or_else(|| format!("schedules span at least {min} words, not {word_count}"));
            }
        };
        if word_count > max {
            return Err(format!("at most {max} words supported, not {word_count}"));
        }
        Ok(())
    }
}

/// Definition of a single logical value.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterSpec {
    name: Cow<'static, str>,
    start_address: Address,
    word_count: Quantity,
    rule: DecodeRule,
    access: Access,
    applicability: Applicability,
}

impl RegisterSpec {
    /// Create a new, readable register definition.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidRegisterSpec`] if the register is empty,
    /// does not fit into the 16-bit address space or its width does not
    /// suit the decode rule.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        start_address: Address,
        word_count: Quantity,
        rule: DecodeRule,
    ) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: String| Error::InvalidRegisterSpec {
            name: name.clone(),
            reason,
        };
        if word_count == 0 {
            return Err(invalid("word count must be at least 1".into()));
        }
        if start_address.checked_add(word_count - 1).is_none() {
            return Err(invalid(format!(
                "{word_count} words starting at {start_address} exceed the address space"
            )));
        }
        rule.check_width(word_count).map_err(invalid)?;
        Ok(Self {
            name,
            start_address,
            word_count,
            rule,
            access: Access::Read,
            applicability: Applicability::All,
        })
    }

    #[must_use]
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn with_applicability(mut self, applicability: Applicability) -> Self {
        self.applicability = applicability;
        self
    }

    #[must_use]
    pub fn name(&self) -> &Cow<'static, str> {
        &self.name
    }

    #[must_use]
    pub const fn start_address(&self) -> Address {
        self.start_address
    }

    #[must_use]
    pub const fn word_count(&self) -> Quantity {
        self.word_count
    }

    /// Address of the last register, inclusive.
    #[must_use]
    pub const fn last_address(&self) -> Address {
        // Cannot overflow, checked on construction.
        self.start_address + (self.word_count - 1)
    }

    /// Address following the last register, exclusive.
    #[must_use]
    pub const fn end_address(&self) -> u32 {
        self.start_address as u32 + self.word_count as u32
    }

    #[must_use]
    pub const fn rule(&self) -> &DecodeRule {
        &self.rule
    }

    #[must_use]
    pub const fn access(&self) -> Access {
        self.access
    }

    #[must_use]
    pub const fn applicability(&self) -> &Applicability {
        &self.applicability
    }

    /// Physical unit of numeric registers.
    #[must_use]
    pub fn unit(&self) -> Option<&Cow<'static, str>> {
        match &self.rule {
            DecodeRule::Number(number) => number.unit.as_ref(),
            _ => None,
        }
    }
}

/// Immutable lookup table of register definitions by name.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    specs: BTreeMap<Cow<'static, str>, RegisterSpec>,
}

impl Catalogue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition, replacing any previous one of the same name.
    pub fn insert(&mut self, spec: RegisterSpec) -> Option<RegisterSpec> {
        self.specs.insert(spec.name.clone(), spec)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisterSpec> {
        self.specs.get(name)
    }

    /// Look up a definition or fail with [`Error::UnknownRegister`].
    pub fn lookup(&self, name: &str) -> Result<&RegisterSpec> {
        self.get(name)
            .ok_or_else(|| Error::UnknownRegister(name.to_owned()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> btree_map::Values<'_, Cow<'static, str>, RegisterSpec> {
        self.specs.values()
    }
}

impl FromIterator<RegisterSpec> for Catalogue {
    fn from_iter<T: IntoIterator<Item = RegisterSpec>>(iter: T) -> Self {
        let mut catalogue = Self::new();
        for spec in iter {
            catalogue.insert(spec);
        }
        catalogue
    }
}

impl Extend<RegisterSpec> for Catalogue {
    fn extend<T: IntoIterator<Item = RegisterSpec>>(&mut self, iter: T) {
        for spec in iter {
            self.insert(spec);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_empty_register() {
        let err = RegisterSpec::new("empty", 100, 0, DecodeRule::Text).unwrap_err();
        assert!(matches!(err, Error::InvalidRegisterSpec { .. }));
    }

    #[test]
    fn reject_address_overflow() {
        assert!(RegisterSpec::new("last", u16::MAX, 1, DecodeRule::Text).is_ok());
        let err = RegisterSpec::new("beyond", u16::MAX, 2, DecodeRule::Text).unwrap_err();
        assert!(matches!(err, Error::InvalidRegisterSpec { .. }));
    }

    #[test]
    fn reject_mismatching_width() {
        let number = DecodeRule::Number(Number::unsigned(0));
        assert!(RegisterSpec::new("u64", 0, 4, number.clone()).is_ok());
        assert!(RegisterSpec::new("u80", 0, 5, number).is_err());
        assert!(RegisterSpec::new("ts", 0, 1, DecodeRule::Timestamp).is_err());
        assert!(RegisterSpec::new("text", 0, 15, DecodeRule::Text).is_ok());
        let schedule = DecodeRule::Periods(PeriodKind::ChargeDischarge);
        assert!(RegisterSpec::new("tou", 0, 40, schedule.clone()).is_err());
        assert!(RegisterSpec::new("tou", 0, 41, schedule).is_ok());
    }

    #[test]
    fn label_lookup() {
        let labels: Labels = [(0, "Offline"), (2, "Running")].into_iter().collect();
        assert_eq!(Some("Running"), labels.get(2).map(AsRef::as_ref));
        assert_eq!(None, labels.get(1));
        assert_eq!(Some(0), labels.code_of("Offline"));
        assert_eq!(None, labels.code_of("offline"));
    }

    #[test]
    fn catalogue_lookup() {
        let catalogue: Catalogue = [
            RegisterSpec::new("a", 1, 1, DecodeRule::Number(Number::unsigned(0))).unwrap(),
            RegisterSpec::new("b", 2, 2, DecodeRule::Timestamp)
                .unwrap()
                .with_access(Access::ReadWrite),
        ]
        .into_iter()
        .collect();
        assert_eq!(2, catalogue.len());
        assert_eq!(2, catalogue.lookup("b").unwrap().start_address());
        assert!(matches!(
            catalogue.lookup("c"),
            Err(Error::UnknownRegister(name)) if name == "c"
        ));
    }
}
