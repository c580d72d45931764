use thiserror::Error;
use tracing::{debug, info};

use blnet_client::{ClientError, Command, RetryingFetcher, Transport};
use types::{DeviceInfo, UvrRecord};
use uvr_parser::{
    current_data_record, decode_record, firmware_version, parse_header, transmission_mode,
    ParserError,
};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("bridge exchange failed: {0}")]
    Client(#[from] ClientError),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ParserError),
}

/// Identifies the controller behind the bridge.
///
/// Only the header read goes through the retry layer; the other commands are
/// sent once. Any failing step fails the whole probe.
pub async fn probe<T: Transport>(fetcher: &RetryingFetcher<T>) -> Result<DeviceInfo, ProbeError> {
    let transport = fetcher.transport();

    let module_id = transport.send(Command::Version).await?;
    debug!(len = module_id.len(), "module id received");

    let header = parse_header(&fetcher.fetch_block(Command::Header).await?)?;
    let firmware = firmware_version(&transport.send(Command::Firmware).await?)?;
    let mode = transmission_mode(&transport.send(Command::Mode).await?)?;

    let device = DeviceInfo {
        mode: header.mode,
        primary_type: header.primary_type,
        secondary_type: header.secondary_type,
        module_id,
        firmware_version: firmware,
        transmission_mode: mode,
    };
    info!(
        module_id = %device.module_id_hex(),
        mode = device.mode.as_str(),
        primary = device.primary_type.as_str(),
        secondary = device.secondary_type.map(|kind| kind.as_str()).unwrap_or("-"),
        firmware = %device.firmware_version,
        transmission = device.transmission_mode.as_str(),
        "controller identified"
    );
    Ok(device)
}

/// Reads one current-data record, tag checked and trimmed to its fixed length.
pub async fn fetch_current_data<T: Transport>(
    fetcher: &RetryingFetcher<T>,
) -> Result<Vec<u8>, ProbeError> {
    let response = fetcher.fetch_block(Command::CurrentData).await?;
    Ok(current_data_record(&response)?.to_vec())
}

pub async fn fetch_record<T: Transport>(
    fetcher: &RetryingFetcher<T>,
) -> Result<UvrRecord, ProbeError> {
    let record = fetch_current_data(fetcher).await?;
    Ok(decode_record(&record)?)
}
