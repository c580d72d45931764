use blnet_client::{ClientError, Command, MockReply, MockTransport, RetryingFetcher};
use device_probe::{fetch_current_data, fetch_record, probe, ProbeError};
use types::{DeviceMode, DeviceType, TransmissionMode, Unit};
use uvr_parser::{ParserError, RECORD_LEN};

fn header(len: usize, primary: u8, secondary: u8) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    if len > 6 {
        bytes[5] = primary;
        bytes[6] = secondary;
    }
    bytes
}

fn bridge(header_bytes: Vec<u8>) -> MockTransport {
    MockTransport::new()
        .with_reply(Command::Version, MockReply::Bytes(vec![0xA3, 0x1F]))
        .with_reply(Command::Header, MockReply::Bytes(header_bytes))
        .with_reply(Command::Firmware, MockReply::Bytes(vec![197]))
        .with_reply(Command::Mode, MockReply::Bytes(vec![0x80]))
}

fn record() -> Vec<u8> {
    let mut bytes = vec![0u8; RECORD_LEN];
    bytes[0] = 0x80;
    // S01: 21.5 °C
    bytes[1] = 0xD7;
    bytes[2] = 0x20;
    bytes
}

#[tokio::test]
async fn two_device_probe_reads_both_types() {
    let fetcher = RetryingFetcher::new(bridge(header(14, 0x76, 0x5A)), 5);

    let device = probe(&fetcher).await.expect("probe");
    assert_eq!(device.mode, DeviceMode::TwoDevice);
    assert_eq!(device.primary_type, DeviceType::Uvr1611);
    assert_eq!(device.secondary_type, Some(DeviceType::Uvr61_3));
    assert_eq!(device.module_id_hex(), "A31F");
    assert_eq!(device.firmware_version, "1.97");
    assert_eq!(device.transmission_mode, TransmissionMode::CurrentData);

    assert_eq!(
        fetcher.transport().calls(),
        vec![
            Command::Version,
            Command::Header,
            Command::Firmware,
            Command::Mode
        ]
    );
}

#[tokio::test]
async fn one_device_and_can_headers() {
    let fetcher = RetryingFetcher::new(bridge(header(13, 0x5A, 0x00)), 5);
    let device = probe(&fetcher).await.expect("probe");
    assert_eq!(device.mode, DeviceMode::OneDevice);
    assert_eq!(device.primary_type, DeviceType::Uvr61_3);
    assert_eq!(device.secondary_type, None);

    let fetcher = RetryingFetcher::new(bridge(header(21, 0x5A, 0x5A)), 5);
    let device = probe(&fetcher).await.expect("probe");
    assert_eq!(device.mode, DeviceMode::Can);
    assert_eq!(device.primary_type, DeviceType::Uvr1611);
    assert_eq!(device.secondary_type, None);
}

#[tokio::test]
async fn header_read_is_retried() {
    let transport = bridge(vec![0xAA]);
    transport.push(Command::Header, MockReply::Refused);
    transport.push(Command::Header, MockReply::Bytes(header(13, 0x76, 0)));
    let fetcher = RetryingFetcher::new(transport, 5);

    let device = probe(&fetcher).await.expect("probe");
    assert_eq!(device.primary_type, DeviceType::Uvr1611);
    assert_eq!(fetcher.transport().call_count(Command::Header), 3);
}

#[tokio::test]
async fn unknown_header_length_fails_probe() {
    let fetcher = RetryingFetcher::new(bridge(vec![0u8; 16]), 5);

    let err = probe(&fetcher).await.expect_err("bad header");
    assert!(matches!(
        err,
        ProbeError::Protocol(ParserError::UnknownHeaderLength(16))
    ));
    assert_eq!(fetcher.transport().call_count(Command::Firmware), 0);
}

#[tokio::test]
async fn version_is_sent_once_without_retry() {
    let transport = bridge(header(13, 0x76, 0));
    transport.set(Command::Version, MockReply::Refused);
    let fetcher = RetryingFetcher::new(transport, 5);

    let err = probe(&fetcher).await.expect_err("refused");
    assert!(matches!(err, ProbeError::Client(ClientError::Io(_))));
    assert_eq!(fetcher.transport().calls(), vec![Command::Version]);
}

#[tokio::test]
async fn unknown_transmission_mode_is_reported() {
    let transport = bridge(header(13, 0x76, 0));
    transport.set(Command::Mode, MockReply::Bytes(vec![0xA8]));
    let fetcher = RetryingFetcher::new(transport, 5);

    let device = probe(&fetcher).await.expect("probe");
    assert_eq!(device.transmission_mode, TransmissionMode::Unknown);
}

#[tokio::test]
async fn current_data_is_trimmed_to_record_length() {
    let mut response = record();
    response.extend_from_slice(&[0xDE, 0xAD]);
    let transport =
        MockTransport::new().with_reply(Command::CurrentData, MockReply::Bytes(response));
    let fetcher = RetryingFetcher::new(transport, 5);

    let bytes = fetch_current_data(&fetcher).await.expect("fetch");
    assert_eq!(bytes.len(), RECORD_LEN);

    let decoded = fetch_record(&fetcher).await.expect("record");
    assert_eq!(decoded.inputs[0].unit, Unit::Celsius);
    assert_eq!(decoded.inputs[0].value, 21.5);
}

#[tokio::test]
async fn wrong_tag_is_unexpected_format() {
    let mut response = record();
    response[0] = 0xA8;
    let transport =
        MockTransport::new().with_reply(Command::CurrentData, MockReply::Bytes(response));
    let fetcher = RetryingFetcher::new(transport, 5);

    let err = fetch_record(&fetcher).await.expect_err("bad tag");
    assert!(matches!(
        err,
        ProbeError::Protocol(ParserError::UnexpectedFormat(0xA8))
    ));
}

#[tokio::test]
async fn exhausted_current_data_fetch() {
    let transport =
        MockTransport::new().with_reply(Command::CurrentData, MockReply::Bytes(vec![0x80]));
    let fetcher = RetryingFetcher::new(transport, 5);

    let err = fetch_current_data(&fetcher).await.expect_err("runt frames");
    assert!(matches!(
        err,
        ProbeError::Client(ClientError::ExhaustedRetries { attempts: 5, .. })
    ));
    assert_eq!(fetcher.transport().call_count(Command::CurrentData), 5);
}
