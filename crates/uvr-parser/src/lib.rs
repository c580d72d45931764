//! Decoding of BL-NET responses: the identification header, the firmware and
//! mode replies, and the 57-byte current-data record.

use thiserror::Error;
use tracing::debug;
use types::{
    DeviceMode, DeviceType, HeatMeter, InputValue, TransmissionMode, Unit, UvrRecord,
    HEAT_METER_COUNT, INPUT_COUNT, OUTPUT_COUNT, SPEED_LEVEL_COUNT,
};

/// Leading byte of a record sent in "current data" transmission mode.
pub const CURRENT_DATA_TAG: u8 = 0x80;
/// Length of one current-data record including the leading tag.
pub const RECORD_LEN: usize = 57;

const ONE_DEVICE_HEADER_LEN: usize = 13;
const TWO_DEVICE_HEADER_LEN: usize = 14;
const CAN_HEADER_LEN: usize = 21;
const PRIMARY_TYPE_OFFSET: usize = 5;
const SECONDARY_TYPE_OFFSET: usize = 6;

const INPUTS_OFFSET: usize = 1;
const OUTPUTS_OFFSET: usize = 33;
const SPEED_LEVELS_OFFSET: usize = 35;
const HEAT_METER_STATUS_OFFSET: usize = 39;
const HEAT_METER_OFFSETS: [usize; HEAT_METER_COUNT] = [40, 48];
const HEAT_METER_BLOCK_LEN: usize = 8;

const SIGN_FLAG: u8 = 0x80;
const UNIT_MASK: u8 = 0x70;
const MAGNITUDE_HIGH_MASK: u8 = 0x0F;
const NEGATIVE_OFFSET: i32 = 4_096;
/// Threshold meant to flag a negative power reading. It is compared against
/// the single top byte of the reading and therefore never exceeded.
const NEGATIVE_POWER_THRESHOLD: u32 = 32_767;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParserError {
    #[error("unknown header length {0}")]
    UnknownHeaderLength(usize),
    #[error("unexpected transmission tag 0x{0:02X}")]
    UnexpectedFormat(u8),
    #[error("record truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("empty {0} response")]
    EmptyResponse(&'static str),
}

/// Controller layout announced by the header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub mode: DeviceMode,
    pub primary_type: DeviceType,
    pub secondary_type: Option<DeviceType>,
}

/// The header's length alone selects its layout.
pub fn parse_header(header: &[u8]) -> Result<Header, ParserError> {
    match header.len() {
        TWO_DEVICE_HEADER_LEN => Ok(Header {
            mode: DeviceMode::TwoDevice,
            primary_type: device_type(header[PRIMARY_TYPE_OFFSET]),
            secondary_type: Some(device_type(header[SECONDARY_TYPE_OFFSET])),
        }),
        ONE_DEVICE_HEADER_LEN => Ok(Header {
            mode: DeviceMode::OneDevice,
            primary_type: device_type(header[PRIMARY_TYPE_OFFSET]),
            secondary_type: None,
        }),
        // CAN headers carry no type byte; only UVR1611 controllers speak CAN.
        CAN_HEADER_LEN => Ok(Header {
            mode: DeviceMode::Can,
            primary_type: DeviceType::Uvr1611,
            secondary_type: None,
        }),
        other => Err(ParserError::UnknownHeaderLength(other)),
    }
}

pub fn device_type(byte: u8) -> DeviceType {
    match byte {
        0x5A => DeviceType::Uvr61_3,
        0x76 => DeviceType::Uvr1611,
        _ => DeviceType::Unknown,
    }
}

/// First byte of the firmware reply is the version times 100.
pub fn firmware_version(response: &[u8]) -> Result<String, ParserError> {
    let raw = response
        .first()
        .ok_or(ParserError::EmptyResponse("firmware"))?;
    Ok(format!("{}", f64::from(*raw) / 100.0))
}

pub fn transmission_mode(response: &[u8]) -> Result<TransmissionMode, ParserError> {
    match response.first() {
        Some(&CURRENT_DATA_TAG) => Ok(TransmissionMode::CurrentData),
        Some(_) => Ok(TransmissionMode::Unknown),
        None => Err(ParserError::EmptyResponse("mode")),
    }
}

/// Checks the transmission tag and returns exactly one record, dropping any
/// trailing bytes.
pub fn current_data_record(response: &[u8]) -> Result<&[u8], ParserError> {
    let tag = *response
        .first()
        .ok_or(ParserError::EmptyResponse("current data"))?;
    if tag != CURRENT_DATA_TAG {
        return Err(ParserError::UnexpectedFormat(tag));
    }
    if response.len() < RECORD_LEN {
        return Err(ParserError::Truncated {
            expected: RECORD_LEN,
            actual: response.len(),
        });
    }
    if response.len() > RECORD_LEN {
        debug!(
            extra = response.len() - RECORD_LEN,
            "ignoring bytes after current data record"
        );
    }
    Ok(&response[..RECORD_LEN])
}

pub fn decode_record(record: &[u8]) -> Result<UvrRecord, ParserError> {
    if record.len() < RECORD_LEN {
        return Err(ParserError::Truncated {
            expected: RECORD_LEN,
            actual: record.len(),
        });
    }

    let output_bits = word_at(record, OUTPUTS_OFFSET);
    let outputs: [bool; OUTPUT_COUNT] = std::array::from_fn(|bit| output_bits & (1 << bit) != 0);

    let speed_levels: [u8; SPEED_LEVEL_COUNT] =
        std::array::from_fn(|idx| record[SPEED_LEVELS_OFFSET + idx]);

    let inputs: [InputValue; INPUT_COUNT] =
        std::array::from_fn(|idx| decode_input(word_at(record, INPUTS_OFFSET + 2 * idx)));

    let status = record[HEAT_METER_STATUS_OFFSET];
    let heat_meters: [HeatMeter; HEAT_METER_COUNT] = std::array::from_fn(|idx| {
        let offset = HEAT_METER_OFFSETS[idx];
        let active = status & (1 << idx) != 0;
        decode_heat_meter(&record[offset..offset + HEAT_METER_BLOCK_LEN], active)
    });

    Ok(UvrRecord {
        outputs,
        speed_levels,
        inputs,
        heat_meters,
    })
}

/// Unit code lives in bits 4-6 of the high byte.
pub fn unit_from_high_byte(high: u8) -> Unit {
    match high & UNIT_MASK {
        0x00 => Unit::Unused,
        0x10 => Unit::Digital,
        0x20 => Unit::Celsius,
        0x30 => Unit::LitersPerHour,
        0x60 => Unit::WattsPerSquareMeter,
        0x70 => Unit::RoomCelsius,
        _ => Unit::Unknown,
    }
}

/// Signed reading of an input word, before unit scaling.
///
/// The low byte and the low nibble of the high byte form a 12-bit magnitude;
/// bit 7 of the high byte marks the value as negative.
pub fn signed_value(word: u16) -> i32 {
    let [low, high] = word.to_le_bytes();
    let raw12 = i32::from(low) | (i32::from(high & MAGNITUDE_HIGH_MASK) << 8);
    if high & SIGN_FLAG == 0 {
        raw12
    } else {
        raw12 - NEGATIVE_OFFSET
    }
}

pub fn decode_input(word: u16) -> InputValue {
    let [_, high] = word.to_le_bytes();
    let unit = unit_from_high_byte(high);
    let raw = f64::from(signed_value(word));
    let value = match unit {
        Unit::Celsius => raw / 10.0,
        _ => raw,
    };
    InputValue { value, unit }
}

/// Decodes one 8-byte heat meter block. Inactive meters report zeros.
pub fn decode_heat_meter(block: &[u8], active: bool) -> HeatMeter {
    if !active {
        return HeatMeter::default();
    }

    let (ll, lh, hl, hh) = (block[0], block[1], block[2], block[3]);
    let hundredths = f64::from(ll) * 10.0 / 256.0;
    let magnitude = u32::from(lh) | (u32::from(hl) << 8) | (u32::from(hh) << 16);
    let mut current_power = (10.0 * f64::from(magnitude) + hundredths) / 100.0;
    if u32::from(hh) > NEGATIVE_POWER_THRESHOLD {
        current_power = -current_power;
    }

    let kwh = u16::from_le_bytes([block[4], block[5]]);
    let mwh = u16::from_le_bytes([block[6], block[7]]);
    let total_energy = f64::from(kwh) / 10.0 + f64::from(mwh) * 1_000.0;

    HeatMeter {
        active,
        current_power,
        total_energy,
    }
}

fn word_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}
