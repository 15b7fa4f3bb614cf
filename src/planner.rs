// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batch planning
//!
//! Groups the requested registers into as few contiguous reads as the
//! device limits permit.

use std::collections::BTreeSet;

use crate::{catalogue::RegisterSpec, Address, Error, Quantity, Result};

/// Constraints of the device on a single read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum number of registers per read request.
    pub max_registers_per_request: Quantity,
    /// Maximum number of unrequested registers between two requested
    /// ones that may be read along instead of issuing a second request.
    pub max_gap: Quantity,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_registers_per_request: 125,
            max_gap: 64,
        }
    }
}

impl BatchLimits {
    #[must_use]
    pub const fn with_max_registers_per_request(mut self, max: Quantity) -> Self {
        self.max_registers_per_request = max;
        self
    }

    #[must_use]
    pub const fn with_max_gap(mut self, max_gap: Quantity) -> Self {
        self.max_gap = max_gap;
        self
    }
}

/// A contiguous block of registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterRange {
    pub start: Address,
    pub count: Quantity,
}

impl RegisterRange {
    #[must_use]
    pub const fn new(start: Address, count: Quantity) -> Self {
        Self { start, count }
    }

    /// Address following the last register, exclusive.
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.start as u32 + self.count as u32
    }

    #[must_use]
    pub fn contains(&self, spec: &RegisterSpec) -> bool {
        spec.start_address() >= self.start && spec.end_address() <= self.end()
    }

    /// Index of the first word of `spec` within a response for this range.
    pub(crate) fn offset_of(&self, spec: &RegisterSpec) -> Option<usize> {
        self.contains(spec)
            .then(|| usize::from(spec.start_address() - self.start))
    }
}

/// One read request and the registers it covers.
#[derive(Debug, Clone)]
pub struct PlannedRead<'a> {
    pub range: RegisterRange,
    /// Covered registers in ascending address order.
    pub specs: Vec<&'a RegisterSpec>,
}

/// Address-ascending, non-overlapping sequence of reads.
#[derive(Debug, Clone, Default)]
pub struct ReadPlan<'a> {
    reads: Vec<PlannedRead<'a>>,
}

impl<'a> ReadPlan<'a> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlannedRead<'a>> {
        self.reads.iter()
    }

    pub fn ranges(&self) -> impl Iterator<Item = RegisterRange> + '_ {
        self.reads.iter().map(|read| read.range)
    }
}

impl<'a> IntoIterator for ReadPlan<'a> {
    type Item = PlannedRead<'a>;
    type IntoIter = std::vec::IntoIter<PlannedRead<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.reads.into_iter()
    }
}

// Registers that must be read together, either a single definition or
// definitions sharing registers.
struct Unit<'a> {
    start: u32,
    end: u32,
    specs: Vec<&'a RegisterSpec>,
}

impl<'a> Unit<'a> {
    fn new(spec: &'a RegisterSpec) -> Self {
        Self {
            start: u32::from(spec.start_address()),
            end: spec.end_address(),
            specs: vec![spec],
        }
    }

    fn width(&self) -> u32 {
        self.end - self.start
    }

    fn absorb(&mut self, other: Unit<'a>) {
        self.end = self.end.max(other.end);
        self.specs.extend(other.specs);
    }

    fn into_read(self) -> PlannedRead<'a> {
        debug_assert!(self.width() <= u32::from(Quantity::MAX));
        PlannedRead {
            range: RegisterRange::new(self.start as Address, self.width() as Quantity),
            specs: self.specs,
        }
    }
}

/// Plan the reads for the `requested` registers.
///
/// Definitions are sorted by address and merged greedily as long as the
/// gap in between does not exceed [`BatchLimits::max_gap`] and the merged
/// range does not exceed [`BatchLimits::max_registers_per_request`].
/// Definitions that share registers always end up in the same read.
/// Requesting the same name twice has no effect.
///
/// # Errors
///
/// Fails with [`Error::SpecTooLarge`] if a definition, or a group of
/// definitions sharing registers, does not fit into a single request.
pub fn plan<'a, I>(requested: I, limits: &BatchLimits) -> Result<ReadPlan<'a>>
where
    I: IntoIterator<Item = &'a RegisterSpec>,
{
    let max = u32::from(limits.max_registers_per_request);
    let max_gap = u32::from(limits.max_gap);

    let mut seen = BTreeSet::new();
    let mut specs: Vec<_> = requested
        .into_iter()
        .filter(|spec| seen.insert(spec.name().clone()))
        .collect();
    if let Some(spec) = specs
        .iter()
        .find(|spec| u32::from(spec.word_count()) > max)
    {
        return Err(Error::SpecTooLarge {
            name: spec.name().clone(),
            word_count: spec.word_count(),
            max: limits.max_registers_per_request,
        });
    }
    specs.sort_by_key(|spec| (spec.start_address(), spec.end_address()));

    // Definitions sharing registers are inseparable.
    let mut units: Vec<Unit<'a>> = Vec::with_capacity(specs.len());
    for spec in specs {
        let next = Unit::new(spec);
        match units.last_mut() {
            Some(unit) if next.start < unit.end => unit.absorb(next),
            _ => units.push(next),
        }
    }
    if let Some(unit) = units.iter().find(|unit| unit.width() > max) {
        let name = unit.specs[0].name().clone();
        return Err(Error::SpecTooLarge {
            name,
            word_count: unit.width() as Quantity,
            max: limits.max_registers_per_request,
        });
    }

    let mut merged: Vec<Unit<'a>> = Vec::with_capacity(units.len());
    for next in units {
        match merged.last_mut() {
            Some(current)
                if next.start - current.end <= max_gap && next.end - current.start <= max =>
            {
                current.absorb(next);
            }
            _ => merged.push(next),
        }
    }

    let reads: Vec<_> = merged.into_iter().map(Unit::into_read).collect();
    log::debug!(
        "Planned {} read(s): {:?}",
        reads.len(),
        reads.iter().map(|read| read.range).collect::<Vec<_>>()
    );
    Ok(ReadPlan { reads })
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng as _, SeedableRng as _};

    use super::*;
    use crate::catalogue::{DecodeRule, Number};

    fn spec(name: &str, start: Address, count: Quantity) -> RegisterSpec {
        let rule = if count <= 4 {
            DecodeRule::Number(Number::unsigned(0))
        } else {
            DecodeRule::Text
        };
        RegisterSpec::new(name.to_owned(), start, count, rule).unwrap()
    }

    fn ranges(plan: &ReadPlan<'_>) -> Vec<(Address, Quantity)> {
        plan.ranges().map(|r| (r.start, r.count)).collect()
    }

    #[test]
    fn empty_request() {
        let plan = plan(std::iter::empty(), &BatchLimits::default()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn merge_small_gaps() {
        let specs = [spec("a", 32_080, 2), spec("b", 32_085, 1), spec("c", 32_064, 2)];
        let plan = plan(&specs, &BatchLimits::default()).unwrap();
        assert_eq!(vec![(32_064, 22)], ranges(&plan));
        let read = plan.iter().next().unwrap();
        let names: Vec<_> = read.specs.iter().map(|s| s.name().as_ref()).collect();
        assert_eq!(vec!["c", "a", "b"], names);
    }

    #[test]
    fn split_on_large_gap() {
        let specs = [spec("a", 100, 1), spec("b", 102, 1), spec("c", 200, 1)];
        let limits = BatchLimits::default().with_max_gap(1);
        let plan = plan(&specs, &limits).unwrap();
        assert_eq!(vec![(100, 3), (200, 1)], ranges(&plan));

        let limits = BatchLimits::default().with_max_gap(0);
        let plan = super::plan(&specs, &limits).unwrap();
        assert_eq!(vec![(100, 1), (102, 1), (200, 1)], ranges(&plan));
    }

    #[test]
    fn adjacent_registers_merge_without_gap() {
        let specs = [spec("a", 10, 2), spec("b", 12, 2)];
        let limits = BatchLimits::default().with_max_gap(0);
        assert_eq!(vec![(10, 4)], ranges(&plan(&specs, &limits).unwrap()));
    }

    #[test]
    fn split_on_request_size() {
        let specs = [spec("a", 0, 4), spec("b", 4, 4), spec("c", 8, 4)];
        let limits = BatchLimits::default().with_max_registers_per_request(8);
        assert_eq!(vec![(0, 8), (8, 4)], ranges(&plan(&specs, &limits).unwrap()));
    }

    #[test]
    fn reject_oversized_spec() {
        let specs = [spec("model_name", 30_000, 15)];
        let limits = BatchLimits::default().with_max_registers_per_request(10);
        let err = plan(&specs, &limits).unwrap_err();
        assert!(matches!(
            err,
            Error::SpecTooLarge { name, word_count: 15, max: 10 } if name == "model_name"
        ));
    }

    #[test]
    fn overlapping_specs_share_a_read() {
        let specs = [spec("u32", 10, 2), spec("hi", 10, 1), spec("lo", 11, 1)];
        let plan = plan(&specs, &BatchLimits::default()).unwrap();
        assert_eq!(vec![(10, 2)], ranges(&plan));
        assert_eq!(3, plan.iter().next().unwrap().specs.len());
    }

    #[test]
    fn duplicates_are_planned_once() {
        let a = spec("a", 10, 1);
        let plan = plan([&a, &a], &BatchLimits::default()).unwrap();
        assert_eq!(1, plan.iter().next().unwrap().specs.len());
    }

    #[test]
    fn random_requests_satisfy_plan_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let limits = BatchLimits::default()
                .with_max_registers_per_request(rng.gen_range(16..=125))
                .with_max_gap(rng.gen_range(0..=80));
            let specs: Vec<_> = (0..rng.gen_range(0..40))
                .map(|i| spec(&format!("r{i}"), rng.gen_range(0..2_000), rng.gen_range(1..=4)))
                .collect();
            let plan = match plan(&specs, &limits) {
                Ok(plan) => plan,
                Err(err) => {
                    assert!(matches!(err, Error::SpecTooLarge { .. }));
                    continue;
                }
            };
            let ranges: Vec<_> = plan.ranges().collect();
            for range in &ranges {
                assert!(range.count >= 1);
                assert!(range.count <= limits.max_registers_per_request);
            }
            for pair in ranges.windows(2) {
                // ascending and non-overlapping
                assert!(pair[0].end() <= u32::from(pair[1].start));
                // greedy: no two neighbours could have been merged
                let gap = u32::from(pair[1].start) - pair[0].end();
                let merged = pair[1].end() - u32::from(pair[0].start);
                assert!(
                    gap > u32::from(limits.max_gap)
                        || merged > u32::from(limits.max_registers_per_request)
                );
            }
            for spec in &specs {
                let containing = ranges.iter().filter(|r| r.contains(spec)).count();
                assert_eq!(1, containing, "{spec:?} in {ranges:?}");
            }
            let planned: usize = plan.iter().map(|read| read.specs.len()).sum();
            assert_eq!(specs.len(), planned);
        }
    }
}
