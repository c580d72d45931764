use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of switched outputs reported in a current-data record.
pub const OUTPUT_COUNT: usize = 13;
/// Number of measurement inputs reported in a current-data record.
pub const INPUT_COUNT: usize = 16;
/// Number of heat meters (WMZ) reported in a current-data record.
pub const HEAT_METER_COUNT: usize = 2;
/// Number of speed-controlled outputs reported in a current-data record.
pub const SPEED_LEVEL_COUNT: usize = 4;
/// Speed-controlled outputs, in record order.
pub const SPEED_LEVEL_NAMES: [&str; SPEED_LEVEL_COUNT] = ["DzA1", "DzA2", "DzA6", "DzA7"];

/// Single-byte opcodes understood by the BL-NET bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Version,
    Header,
    Firmware,
    Mode,
    CurrentData,
}

impl Command {
    pub const fn opcode(self) -> u8 {
        match self {
            Command::Version => 0x81,
            Command::Header => 0xAA,
            Command::Firmware => 0x82,
            Command::Mode => 0x21,
            Command::CurrentData => 0xAB,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Header => "header",
            Command::Firmware => "firmware",
            Command::Mode => "mode",
            Command::CurrentData => "current_data",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), self.opcode())
    }
}

/// How many controllers the bridge is attached to, selected by header length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceMode {
    OneDevice,
    TwoDevice,
    Can,
}

impl DeviceMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            DeviceMode::OneDevice => "1DL",
            DeviceMode::TwoDevice => "2DL",
            DeviceMode::Can => "CAN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Uvr61_3,
    Uvr1611,
    Unknown,
}

impl DeviceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            DeviceType::Uvr61_3 => "UVR61-3",
            DeviceType::Uvr1611 => "UVR1611",
            DeviceType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransmissionMode {
    CurrentData,
    Unknown,
}

impl TransmissionMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            TransmissionMode::CurrentData => "current_data",
            TransmissionMode::Unknown => "unknown",
        }
    }
}

/// Identity of the attached controller, established once by the probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub mode: DeviceMode,
    pub primary_type: DeviceType,
    /// Only present in two-device mode.
    pub secondary_type: Option<DeviceType>,
    pub module_id: Vec<u8>,
    pub firmware_version: String,
    pub transmission_mode: TransmissionMode,
}

impl DeviceInfo {
    pub fn module_id_hex(&self) -> String {
        hex::encode_upper(&self.module_id)
    }
}

/// Measurement unit carried in bits 4-6 of an input's high byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    Unused,
    Digital,
    Celsius,
    LitersPerHour,
    WattsPerSquareMeter,
    RoomCelsius,
    Unknown,
}

impl Unit {
    pub const fn as_str(self) -> &'static str {
        match self {
            Unit::Unused => "unused",
            Unit::Digital => "digital",
            Unit::Celsius => "°C",
            Unit::LitersPerHour => "l/h",
            Unit::WattsPerSquareMeter => "W/m²",
            Unit::RoomCelsius => "°C (room)",
            Unit::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputValue {
    pub value: f64,
    pub unit: Unit,
}

/// Heat meter (WMZ) reading. Both figures are zero while the meter is inactive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeatMeter {
    pub active: bool,
    /// Current power in kW.
    pub current_power: f64,
    /// Accumulated energy in kWh.
    pub total_energy: f64,
}

/// One decoded current-data snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UvrRecord {
    pub outputs: [bool; OUTPUT_COUNT],
    pub speed_levels: [u8; SPEED_LEVEL_COUNT],
    pub inputs: [InputValue; INPUT_COUNT],
    pub heat_meters: [HeatMeter; HEAT_METER_COUNT],
}

impl UvrRecord {
    pub fn units(&self) -> [Unit; INPUT_COUNT] {
        self.inputs.map(|input| input.unit)
    }
}

pub fn output_name(index: usize) -> String {
    format!("A{:02}", index + 1)
}

pub fn input_name(index: usize) -> String {
    format!("S{:02}", index + 1)
}

pub fn heat_meter_name(index: usize) -> String {
    format!("wmz{}", index + 1)
}

/// A value handed to the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Number(value)
    }
}

impl From<u8> for StateValue {
    fn from(value: u8) -> Self {
        StateValue::Number(f64::from(value))
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Bool(value) => write!(f, "{value}"),
            StateValue::Number(value) => write!(f, "{value}"),
            StateValue::Text(value) => f.write_str(value),
        }
    }
}
