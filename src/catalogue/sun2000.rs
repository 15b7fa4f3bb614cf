// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registers of the SUN2000 inverter family
//!
//! Only a representative subset of the vendor's register map is included.
//! Additional definitions can be added to the returned catalogue.

use std::borrow::Cow;

use super::{Access, Applicability, Catalogue, DecodeRule, Labels, Number, RegisterSpec};
use crate::{codec::PeriodKind, Address, Quantity};

pub const MODEL_NAME: &str = "model_name";
pub const SERIAL_NUMBER: &str = "serial_number";
pub const MODEL_ID: &str = "model_id";
pub const NB_PV_STRINGS: &str = "nb_pv_strings";
pub const RATED_POWER: &str = "rated_power";
pub const STATE_1: &str = "state_1";
pub const ALARM_1: &str = "alarm_1";
pub const PV_01_VOLTAGE: &str = "pv_01_voltage";
pub const PV_01_CURRENT: &str = "pv_01_current";
pub const PV_02_VOLTAGE: &str = "pv_02_voltage";
pub const PV_02_CURRENT: &str = "pv_02_current";
pub const INPUT_POWER: &str = "input_power";
pub const GRID_VOLTAGE: &str = "grid_voltage";
pub const PHASE_A_VOLTAGE: &str = "phase_a_voltage";
pub const GRID_CURRENT: &str = "grid_current";
pub const ACTIVE_POWER: &str = "active_power";
pub const REACTIVE_POWER: &str = "reactive_power";
pub const POWER_FACTOR: &str = "power_factor";
pub const GRID_FREQUENCY: &str = "grid_frequency";
pub const EFFICIENCY: &str = "efficiency";
pub const INTERNAL_TEMPERATURE: &str = "internal_temperature";
pub const DEVICE_STATUS: &str = "device_status";
pub const STARTUP_TIME: &str = "startup_time";
pub const ACCUMULATED_YIELD_ENERGY: &str = "accumulated_yield_energy";
pub const DAILY_YIELD_ENERGY: &str = "daily_yield_energy";
pub const STORAGE_UNIT_1_RUNNING_STATUS: &str = "storage_unit_1_running_status";
pub const STORAGE_UNIT_1_CHARGE_DISCHARGE_POWER: &str = "storage_unit_1_charge_discharge_power";
pub const STORAGE_STATE_OF_CAPACITY: &str = "storage_state_of_capacity";
pub const METER_STATUS: &str = "meter_status";
pub const POWER_METER_ACTIVE_POWER: &str = "power_meter_active_power";
pub const GRID_EXPORTED_ENERGY: &str = "grid_exported_energy";
pub const NB_OPTIMIZERS: &str = "nb_optimizers";
pub const NB_ONLINE_OPTIMIZERS: &str = "nb_online_optimizers";
pub const SYSTEM_TIME: &str = "system_time";
pub const STARTUP: &str = "startup";
pub const SHUTDOWN: &str = "shutdown";
pub const TIME_ZONE: &str = "time_zone";
pub const STORAGE_UNIT_1_PRODUCT_MODEL: &str = "storage_unit_1_product_model";
pub const STORAGE_UNIT_2_PRODUCT_MODEL: &str = "storage_unit_2_product_model";
pub const STORAGE_TIME_OF_USE_PRICE_PERIODS: &str = "storage_time_of_use_price_periods";
pub const STORAGE_FIXED_CHARGING_AND_DISCHARGING_PERIODS: &str =
    "storage_fixed_charging_and_discharging_periods";
pub const STORAGE_TIME_OF_USE_CHARGING_AND_DISCHARGING_PERIODS: &str =
    "storage_time_of_use_charging_and_discharging_periods";
pub const STORAGE_MAXIMUM_CHARGING_POWER: &str = "storage_maximum_charging_power";
pub const STORAGE_CHARGING_CUTOFF_CAPACITY: &str = "storage_charging_cutoff_capacity";
pub const ACTIVE_POWER_CONTROL_MODE: &str = "active_power_control_mode";

/// Identifiers of models with battery support, as reported by [`MODEL_ID`].
pub const HYBRID_MODELS: &[u16] = &[400, 401, 402, 403, 404, 405, 406, 407];

pub const DEVICE_STATUS_LABELS: &[(u64, &str)] = &[
    (0x0000, "Standby: initializing"),
    (0x0001, "Standby: detecting insulation resistance"),
    (0x0002, "Standby: detecting irradiation"),
    (0x0003, "Standby: grid detecting"),
    (0x0100, "Starting"),
    (0x0200, "On-grid"),
    (0x0201, "Grid Connection: power limited"),
    (0x0202, "Grid Connection: self-derating"),
    (0x0300, "Shutdown: fault"),
    (0x0301, "Shutdown: command"),
    (0x0302, "Shutdown: OVGR"),
    (0x0303, "Shutdown: communication disconnected"),
    (0x0304, "Shutdown: power limited"),
    (0x0305, "Shutdown: manual startup required"),
    (0x0306, "Shutdown: DC switches disconnected"),
    (0x0307, "Shutdown: rapid cutoff"),
    (0x0308, "Shutdown: input underpowered"),
    (0x0401, "Grid scheduling: cosphi-P curve"),
    (0x0402, "Grid scheduling: Q-U curve"),
    (0x0403, "Grid scheduling: PF-U curve"),
    (0x0404, "Grid scheduling: dry contact"),
    (0x0405, "Grid scheduling: Q-P curve"),
    (0x0500, "Spot-check ready"),
    (0x0501, "Spot-checking"),
    (0x0600, "Inspecting"),
    (0x0700, "AFCI self check"),
    (0x0800, "I-V scanning"),
    (0x0900, "DC input detection"),
    (0x0A00, "Running: off-grid charging"),
    (0xA000, "Standby: no irradiation"),
];

pub const STATE_1_LABELS: &[(u64, &str)] = &[
    (0, "Standby"),
    (1, "Grid-Connected"),
    (2, "Grid-Connected normally"),
    (3, "Grid connection with derating due to power rationing"),
    (4, "Grid connection with derating due to internal causes of the solar inverter"),
    (5, "Normal stop"),
    (6, "Stop due to faults"),
    (7, "Stop due to power rationing"),
    (8, "Shutdown"),
    (9, "Spot check"),
];

pub const ALARM_1_LABELS: &[(u64, &str)] = &[
    (0, "High String Input Voltage"),
    (1, "DC Arc Fault"),
    (2, "String Reverse Connection"),
    (3, "String Current Backfeed"),
    (4, "Abnormal String Power"),
    (5, "AFCI Self-Check Fail"),
    (6, "Phase Wire Short-Circuited to PE"),
    (7, "Grid Loss"),
    (8, "Grid Undervoltage"),
    (9, "Grid Overvoltage"),
    (10, "Grid Volt. Imbalance"),
    (11, "Grid Overfrequency"),
    (12, "Grid Underfrequency"),
    (13, "Unstable Grid Frequency"),
    (14, "Output Overcurrent"),
    (15, "Output DC Component Overhigh"),
];

pub const STORAGE_STATUS_LABELS: &[(u64, &str)] = &[
    (0, "Offline"),
    (1, "Standby"),
    (2, "Running"),
    (3, "Fault"),
    (4, "Sleep mode"),
];

pub const STORAGE_PRODUCT_MODEL_LABELS: &[(u64, &str)] =
    &[(0, "None"), (1, "LG RESU"), (2, "Huawei LUNA2000")];

pub const METER_STATUS_LABELS: &[(u64, &str)] = &[(0, "Offline"), (1, "Normal")];

pub const ACTIVE_POWER_CONTROL_MODE_LABELS: &[(u64, &str)] = &[
    (0, "Unlimited"),
    (1, "DI active scheduling"),
    (5, "Zero power grid connection"),
    (6, "Power-limited grid connection (W)"),
    (7, "Power-limited grid connection (%)"),
];

// Definitions below are validated by the tests of this module.
fn spec(name: &'static str, start_address: Address, word_count: Quantity, rule: DecodeRule) -> RegisterSpec {
    RegisterSpec {
        name: Cow::Borrowed(name),
        start_address,
        word_count,
        rule,
        access: Access::Read,
        applicability: Applicability::All,
    }
}

fn number(signed: bool, scale: u8, unit: &'static str) -> DecodeRule {
    let number = if signed {
        Number::signed(scale)
    } else {
        Number::unsigned(scale)
    };
    let number = if unit.is_empty() {
        number
    } else {
        number.with_unit(unit)
    };
    DecodeRule::Number(number.with_no_data())
}

fn u16_reg(name: &'static str, address: Address, scale: u8, unit: &'static str) -> RegisterSpec {
    spec(name, address, 1, number(false, scale, unit))
}

fn i16_reg(name: &'static str, address: Address, scale: u8, unit: &'static str) -> RegisterSpec {
    spec(name, address, 1, number(true, scale, unit))
}

fn u32_reg(name: &'static str, address: Address, scale: u8, unit: &'static str) -> RegisterSpec {
    spec(name, address, 2, number(false, scale, unit))
}

fn i32_reg(name: &'static str, address: Address, scale: u8, unit: &'static str) -> RegisterSpec {
    spec(name, address, 2, number(true, scale, unit))
}

fn enumeration(name: &'static str, address: Address, labels: &'static [(u64, &'static str)]) -> RegisterSpec {
    spec(name, address, 1, DecodeRule::Enumeration(labels.into()))
}

/// The built-in register catalogue.
#[must_use]
pub fn catalogue() -> Catalogue {
    let hybrid = Applicability::Models(HYBRID_MODELS.to_vec());
    [
        spec(MODEL_NAME, 30000, 15, DecodeRule::Text),
        spec(SERIAL_NUMBER, 30015, 10, DecodeRule::Text),
        spec(MODEL_ID, 30070, 1, DecodeRule::Number(Number::unsigned(0))),
        spec(NB_PV_STRINGS, 30071, 1, DecodeRule::Number(Number::unsigned(0))),
        u32_reg(RATED_POWER, 30073, 0, "W"),
        spec(STATE_1, 32000, 1, DecodeRule::Flags(STATE_1_LABELS.into())),
        spec(ALARM_1, 32008, 1, DecodeRule::Flags(ALARM_1_LABELS.into())),
        i16_reg(PV_01_VOLTAGE, 32016, 1, "V"),
        i16_reg(PV_01_CURRENT, 32017, 2, "A"),
        i16_reg(PV_02_VOLTAGE, 32018, 1, "V"),
        i16_reg(PV_02_CURRENT, 32019, 2, "A"),
        i32_reg(INPUT_POWER, 32064, 0, "W"),
        u16_reg(GRID_VOLTAGE, 32066, 1, "V"),
        u16_reg(PHASE_A_VOLTAGE, 32069, 1, "V"),
        i32_reg(GRID_CURRENT, 32072, 3, "A"),
        i32_reg(ACTIVE_POWER, 32080, 0, "W"),
        i32_reg(REACTIVE_POWER, 32082, 0, "var"),
        spec(
            POWER_FACTOR,
            32084,
            1,
            DecodeRule::Number(Number::signed(3).with_valid(-1000..=1000)),
        ),
        u16_reg(GRID_FREQUENCY, 32085, 2, "Hz"),
        u16_reg(EFFICIENCY, 32086, 2, "%"),
        i16_reg(INTERNAL_TEMPERATURE, 32087, 1, "°C"),
        enumeration(DEVICE_STATUS, 32089, DEVICE_STATUS_LABELS),
        spec(STARTUP_TIME, 32091, 2, DecodeRule::Timestamp),
        u32_reg(ACCUMULATED_YIELD_ENERGY, 32106, 2, "kWh"),
        u32_reg(DAILY_YIELD_ENERGY, 32114, 2, "kWh"),
        enumeration(STORAGE_UNIT_1_RUNNING_STATUS, 37000, STORAGE_STATUS_LABELS)
            .with_applicability(hybrid.clone()),
        i32_reg(STORAGE_UNIT_1_CHARGE_DISCHARGE_POWER, 37001, 0, "W")
            .with_applicability(hybrid.clone()),
        u16_reg(STORAGE_STATE_OF_CAPACITY, 37760, 1, "%").with_applicability(hybrid.clone()),
        enumeration(METER_STATUS, 37100, METER_STATUS_LABELS),
        i32_reg(POWER_METER_ACTIVE_POWER, 37113, 0, "W"),
        spec(
            GRID_EXPORTED_ENERGY,
            37119,
            2,
            DecodeRule::Number(Number::signed(2).with_unit("kWh").with_no_data().with_absolute()),
        ),
        u16_reg(NB_OPTIMIZERS, 37200, 0, ""),
        u16_reg(NB_ONLINE_OPTIMIZERS, 37201, 0, ""),
        spec(SYSTEM_TIME, 40000, 2, DecodeRule::Timestamp).with_access(Access::ReadWrite),
        spec(STARTUP, 40200, 1, DecodeRule::Number(Number::unsigned(0))).with_access(Access::Write),
        spec(SHUTDOWN, 40201, 1, DecodeRule::Number(Number::unsigned(0))).with_access(Access::Write),
        spec(
            TIME_ZONE,
            43006,
            1,
            DecodeRule::Number(Number::signed(0).with_unit("min").with_valid(-720..=840)),
        )
        .with_access(Access::ReadWrite),
        enumeration(STORAGE_UNIT_1_PRODUCT_MODEL, 47000, STORAGE_PRODUCT_MODEL_LABELS)
            .with_applicability(hybrid.clone()),
        spec(
            STORAGE_TIME_OF_USE_PRICE_PERIODS,
            47028,
            41,
            DecodeRule::Periods(PeriodKind::TimeOfUse),
        )
        .with_access(Access::ReadWrite)
        .with_applicability(hybrid.clone()),
        enumeration(STORAGE_UNIT_2_PRODUCT_MODEL, 47089, STORAGE_PRODUCT_MODEL_LABELS)
            .with_applicability(hybrid.clone()),
        spec(
            STORAGE_FIXED_CHARGING_AND_DISCHARGING_PERIODS,
            47200,
            41,
            DecodeRule::Periods(PeriodKind::ChargeDischarge),
        )
        .with_access(Access::ReadWrite)
        .with_applicability(hybrid.clone()),
        spec(
            STORAGE_TIME_OF_USE_CHARGING_AND_DISCHARGING_PERIODS,
            47255,
            43,
            DecodeRule::Periods(PeriodKind::TimeOfUse),
        )
        .with_access(Access::ReadWrite)
        .with_applicability(hybrid.clone()),
        u32_reg(STORAGE_MAXIMUM_CHARGING_POWER, 47075, 0, "W")
            .with_access(Access::ReadWrite)
            .with_applicability(hybrid.clone()),
        spec(
            STORAGE_CHARGING_CUTOFF_CAPACITY,
            47081,
            1,
            DecodeRule::Number(Number::unsigned(1).with_unit("%").with_valid(900..=1000)),
        )
        .with_access(Access::ReadWrite)
        .with_applicability(hybrid),
        enumeration(ACTIVE_POWER_CONTROL_MODE, 47415, ACTIVE_POWER_CONTROL_MODE_LABELS)
            .with_access(Access::ReadWrite),
    ]
    .into_iter()
    .collect()
}
