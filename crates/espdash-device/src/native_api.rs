//! Minimal plaintext native-API session
//!
//! Speaks just enough of the ESPHome native API to read device info without
//! authenticating: hello handshake, then a device-info exchange. Frames are
//! `0x00`, a varint payload length and a varint message type, followed by a
//! protobuf-encoded payload.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::{DeviceError, DeviceResult};

const PREAMBLE_PLAINTEXT: u8 = 0x00;
const PREAMBLE_ENCRYPTED: u8 = 0x01;

const MSG_HELLO_REQUEST: u64 = 1;
const MSG_HELLO_RESPONSE: u64 = 2;
const MSG_DEVICE_INFO_REQUEST: u64 = 9;
const MSG_DEVICE_INFO_RESPONSE: u64 = 10;

const CLIENT_INFO: &str = "espdash";
const API_VERSION_MAJOR: u64 = 1;
const API_VERSION_MINOR: u64 = 10;

/// Device info reported over the native API
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub mac_address: Option<String>,
    pub esphome_version: Option<String>,
    pub model: Option<String>,
}

/// Connect to a device's native API and request its device info.
///
/// The connection is unauthenticated; devices answer the device-info request
/// before any login. Encrypted-only devices are reported as a protocol
/// error.
pub async fn device_info(host: &str, port: u16) -> DeviceResult<DeviceInfo> {
    debug!(host, port, "querying device info over native API");
    let mut stream = TcpStream::connect((host, port)).await?;

    let mut hello = Vec::new();
    put_string_field(&mut hello, 1, CLIENT_INFO);
    put_varint_field(&mut hello, 2, API_VERSION_MAJOR);
    put_varint_field(&mut hello, 3, API_VERSION_MINOR);
    write_frame(&mut stream, MSG_HELLO_REQUEST, &hello).await?;

    read_until(&mut stream, MSG_HELLO_RESPONSE).await?;

    write_frame(&mut stream, MSG_DEVICE_INFO_REQUEST, &[]).await?;
    let payload = read_until(&mut stream, MSG_DEVICE_INFO_RESPONSE).await?;

    parse_device_info(&payload)
}

fn parse_device_info(payload: &[u8]) -> DeviceResult<DeviceInfo> {
    let mut info = DeviceInfo::default();
    for field in decode_fields(payload)? {
        match field {
            (2, FieldValue::Bytes(bytes)) => info.name = Some(string_value(bytes)?),
            (3, FieldValue::Bytes(bytes)) => info.mac_address = Some(string_value(bytes)?),
            (4, FieldValue::Bytes(bytes)) => info.esphome_version = Some(string_value(bytes)?),
            (6, FieldValue::Bytes(bytes)) => info.model = Some(string_value(bytes)?),
            _ => {}
        }
    }
    Ok(info)
}

fn string_value(bytes: &[u8]) -> DeviceResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| DeviceError::Protocol("non-UTF-8 string field".into()))
}

async fn write_frame(stream: &mut TcpStream, msg_type: u64, payload: &[u8]) -> DeviceResult<()> {
    let mut frame = vec![PREAMBLE_PLAINTEXT];
    put_varint(&mut frame, payload.len() as u64);
    put_varint(&mut frame, msg_type);
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await?;
    Ok(())
}

/// Read frames, skipping message types we are not waiting for.
async fn read_until(stream: &mut TcpStream, wanted: u64) -> DeviceResult<Vec<u8>> {
    loop {
        let (msg_type, payload) = read_frame(stream).await?;
        if msg_type == wanted {
            return Ok(payload);
        }
        trace!(msg_type, "skipping unrelated native API message");
    }
}

async fn read_frame(stream: &mut TcpStream) -> DeviceResult<(u64, Vec<u8>)> {
    let preamble = stream.read_u8().await?;
    match preamble {
        PREAMBLE_PLAINTEXT => {}
        PREAMBLE_ENCRYPTED => {
            return Err(DeviceError::Protocol(
                "device requires an encrypted connection".into(),
            ))
        }
        other => {
            return Err(DeviceError::Protocol(format!(
                "unexpected frame preamble: {other:#04x}"
            )))
        }
    }

    let length = read_varint(stream).await? as usize;
    let msg_type = read_varint(stream).await?;

    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await?;
    Ok((msg_type, payload))
}

async fn read_varint(stream: &mut TcpStream) -> DeviceResult<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = stream.read_u8().await?;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(DeviceError::Protocol("varint overflow".into()));
        }
    }
}

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn put_string_field(buf: &mut Vec<u8>, field: u64, value: &str) {
    put_varint(buf, (field << 3) | 2);
    put_varint(buf, value.len() as u64);
    buf.extend_from_slice(value.as_bytes());
}

fn put_varint_field(buf: &mut Vec<u8>, field: u64, value: u64) {
    put_varint(buf, field << 3);
    put_varint(buf, value);
}

enum FieldValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
}

/// Decode the protobuf fields of a payload, skipping fixed-width wire types.
fn decode_fields(payload: &[u8]) -> DeviceResult<Vec<(u64, FieldValue<'_>)>> {
    let mut fields = Vec::new();
    let mut pos = 0usize;

    while pos < payload.len() {
        let tag = take_varint(payload, &mut pos)?;
        let field = tag >> 3;
        match tag & 0x7 {
            0 => {
                let value = take_varint(payload, &mut pos)?;
                fields.push((field, FieldValue::Varint(value)));
            }
            2 => {
                let length = take_varint(payload, &mut pos)? as usize;
                let end = pos
                    .checked_add(length)
                    .filter(|end| *end <= payload.len())
                    .ok_or_else(|| DeviceError::Protocol("truncated field".into()))?;
                fields.push((field, FieldValue::Bytes(&payload[pos..end])));
                pos = end;
            }
            5 => pos += 4,
            1 => pos += 8,
            wire => {
                return Err(DeviceError::Protocol(format!(
                    "unsupported wire type {wire} for field {field}"
                )))
            }
        }
        if pos > payload.len() {
            return Err(DeviceError::Protocol("truncated payload".into()));
        }
    }

    Ok(fields)
}

fn take_varint(payload: &[u8], pos: &mut usize) -> DeviceResult<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *payload
            .get(*pos)
            .ok_or_else(|| DeviceError::Protocol("truncated varint".into()))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(DeviceError::Protocol("varint overflow".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 6053, u32::MAX as u64] {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            let mut pos = 0;
            assert_eq!(take_varint(&buf, &mut pos).unwrap(), value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_parse_device_info_fields() {
        let mut payload = Vec::new();
        put_varint_field(&mut payload, 1, 0); // uses_password
        put_string_field(&mut payload, 2, "kitchen");
        put_string_field(&mut payload, 3, "AA:BB:CC:DD:EE:FF");
        put_string_field(&mut payload, 4, "2025.7.3");
        put_string_field(&mut payload, 6, "esp32dev");

        let info = parse_device_info(&payload).unwrap();
        assert_eq!(info.name.as_deref(), Some("kitchen"));
        assert_eq!(info.mac_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(info.esphome_version.as_deref(), Some("2025.7.3"));
        assert_eq!(info.model.as_deref(), Some("esp32dev"));
    }

    #[test]
    fn test_parse_device_info_missing_version() {
        let mut payload = Vec::new();
        put_string_field(&mut payload, 2, "kitchen");

        let info = parse_device_info(&payload).unwrap();
        assert_eq!(info.esphome_version, None);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut payload = Vec::new();
        put_string_field(&mut payload, 2, "kitchen");
        payload.truncate(payload.len() - 3);

        assert!(parse_device_info(&payload).is_err());
    }

    async fn read_test_frame(stream: &mut TcpStream) -> (u64, Vec<u8>) {
        read_frame(stream).await.unwrap()
    }

    async fn write_test_frame(stream: &mut TcpStream, msg_type: u64, payload: &[u8]) {
        write_frame(stream, msg_type, payload).await.unwrap();
    }

    /// Speak the device side of the protocol against our own client.
    #[tokio::test]
    async fn test_device_info_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let (msg_type, _) = read_test_frame(&mut stream).await;
            assert_eq!(msg_type, MSG_HELLO_REQUEST);

            let mut hello = Vec::new();
            put_string_field(&mut hello, 3, "fake-device (esphome v2025.7.3)");
            write_test_frame(&mut stream, MSG_HELLO_RESPONSE, &hello).await;

            let (msg_type, _) = read_test_frame(&mut stream).await;
            assert_eq!(msg_type, MSG_DEVICE_INFO_REQUEST);

            let mut payload = Vec::new();
            put_string_field(&mut payload, 2, "kitchen");
            put_string_field(&mut payload, 3, "AA:BB:CC:DD:EE:FF");
            put_string_field(&mut payload, 4, "2025.7.3");
            write_test_frame(&mut stream, MSG_DEVICE_INFO_RESPONSE, &payload).await;
        });

        let info = device_info("127.0.0.1", addr.port()).await.unwrap();
        assert_eq!(info.esphome_version.as_deref(), Some("2025.7.3"));
        assert_eq!(info.name.as_deref(), Some("kitchen"));

        server.await.unwrap();
    }

    /// The client skips unrelated messages while waiting for a response.
    #[tokio::test]
    async fn test_unrelated_messages_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let (msg_type, _) = read_test_frame(&mut stream).await;
            assert_eq!(msg_type, MSG_HELLO_REQUEST);

            // Unsolicited ping-ish message before the hello response.
            write_test_frame(&mut stream, 7, &[]).await;
            write_test_frame(&mut stream, MSG_HELLO_RESPONSE, &[]).await;

            let (msg_type, _) = read_test_frame(&mut stream).await;
            assert_eq!(msg_type, MSG_DEVICE_INFO_REQUEST);

            let mut payload = Vec::new();
            put_string_field(&mut payload, 4, "2024.12.0");
            write_test_frame(&mut stream, MSG_DEVICE_INFO_RESPONSE, &payload).await;
        });

        let info = device_info("127.0.0.1", addr.port()).await.unwrap();
        assert_eq!(info.esphome_version.as_deref(), Some("2024.12.0"));

        server.await.unwrap();
    }

    /// An encrypted-only device is a protocol error, not a hang.
    #[tokio::test]
    async fn test_encrypted_preamble_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_test_frame(&mut stream).await;
            stream.write_all(&[PREAMBLE_ENCRYPTED, 0, 0]).await.unwrap();
        });

        let err = device_info("127.0.0.1", addr.port()).await.unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));
    }
}
