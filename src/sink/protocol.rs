//! Binary sender protocol
//!
//! Every frame, request and response alike, has the same layout:
//!
//! ```text
//! +------+------+----------------+----------------+-----------------+
//! | ZBXD | 0x01 | length (u32 LE)| reserved (0x0) | JSON payload    |
//! |  4B  |  1B  |       4B       |       4B       | `length` bytes  |
//! +------+------+----------------+----------------+-----------------+
//! ```
//!
//! Requests carry `{"request":"sender data","data":[{"host","key","value"}]}`, responses
//! `{"response":"success","info":"processed: N; failed: M; total: T; seconds spent: S"}`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{SinkError, SinkResult};
use super::point::DataPoint;

pub const HEADER_MAGIC: [u8; 5] = *b"ZBXD\x01";

pub const HEADER_LEN: usize = 13;

/// Upper bound for a declared payload length
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

const SENDER_DATA: &str = "sender data";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderRequest {
    pub request: String,
    pub data: Vec<SenderItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderItem {
    pub host: String,
    pub key: String,
    pub value: String,
}

impl From<&DataPoint> for SenderItem {
    fn from(point: &DataPoint) -> Self {
        Self {
            host: point.host.clone(),
            key: point.key.clone(),
            value: point.value.to_string(),
        }
    }
}

impl SenderRequest {
    pub fn sender_data(points: &[DataPoint]) -> Self {
        Self {
            request: SENDER_DATA.to_string(),
            data: points.iter().map(SenderItem::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub info: Option<String>,
}

/// Counters reported in the `info` string of a response
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedInfo {
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
    pub seconds_spent: Option<f64>,
}

static PROCESSED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"processed:?\s*(\d+)").expect("valid regex"));
static FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"failed:?\s*(\d+)").expect("valid regex"));
static TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"total:?\s*(\d+)").expect("valid regex"));
static SECONDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"seconds spent:?\s*([0-9.]+)").expect("valid regex"));
static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"sent:\s*(\d+);\s*skipped:\s*(\d+);\s*total:\s*(\d+)").expect("valid regex")
});

fn capture<T: std::str::FromStr>(regex: &Regex, text: &str) -> Option<T> {
    regex
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|value| value.as_str().parse().ok())
}

impl ProcessedInfo {
    /// Parses `processed: N; failed: M; total: T; seconds spent: S`.
    pub fn parse(info: &str) -> Option<Self> {
        let processed = capture(&PROCESSED, info)?;
        Some(Self {
            processed,
            failed: capture(&FAILED, info).unwrap_or_default(),
            total: capture(&TOTAL, info).unwrap_or(processed),
            seconds_spent: capture(&SECONDS, info),
        })
    }

    /// Parses the summary printed by the external sender tool.
    ///
    /// The tool sends in chunks and prints one server `info` line per chunk, followed by
    /// its own `sent: N; skipped: M; total: T` line. The final line covers the whole
    /// batch and wins; without it every `info` line is summed.
    pub fn parse_tool_output(output: &str) -> Option<Self> {
        if let Some(captures) = SUMMARY.captures_iter(output).last() {
            let field = |index: usize| -> Option<usize> { captures.get(index)?.as_str().parse().ok() };
            return Some(Self {
                processed: field(1)?,
                failed: field(2)?,
                total: field(3)?,
                seconds_spent: None,
            });
        }

        let chunks: Vec<Self> = output.lines().filter_map(Self::parse).collect();
        if chunks.is_empty() {
            return None;
        }
        Some(Self {
            processed: chunks.iter().map(|chunk| chunk.processed).sum(),
            failed: chunks.iter().map(|chunk| chunk.failed).sum(),
            total: chunks.iter().map(|chunk| chunk.total).sum(),
            seconds_spent: chunks
                .iter()
                .filter_map(|chunk| chunk.seconds_spent)
                .reduce(|a, b| a + b),
        })
    }

    /// Succeeds only when exactly `expected` items were processed.
    pub fn verify(self, expected: usize) -> SinkResult<Self> {
        if self.processed == expected && self.failed == 0 {
            Ok(self)
        } else {
            Err(SinkError::Rejected(format!(
                "processed: {}; failed: {}; total: {} (expected {expected})",
                self.processed, self.failed, self.total
            )))
        }
    }
}

impl SenderResponse {
    /// Checks `response == "success"` and that `expected` items were processed.
    pub fn verify(&self, expected: usize) -> SinkResult<ProcessedInfo> {
        if self.response != "success" {
            return Err(SinkError::Rejected(format!(
                "response {:?}: {}",
                self.response,
                self.info.as_deref().unwrap_or_default()
            )));
        }

        let info = self
            .info
            .as_deref()
            .and_then(ProcessedInfo::parse)
            .ok_or_else(|| SinkError::Protocol(format!("unparsable info {:?}", self.info)))?;

        info.verify(expected)
    }
}

/// Wraps a payload into a frame.
pub fn frame(payload: &[u8]) -> SinkResult<Vec<u8>> {
    let length = u32::try_from(payload.len())
        .ok()
        .filter(|&length| (length as usize) <= MAX_PAYLOAD_LEN)
        .ok_or_else(|| SinkError::Protocol(format!("payload too large: {}", payload.len())))?;

    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.extend_from_slice(&HEADER_MAGIC);
    packet.extend_from_slice(&length.to_le_bytes());
    packet.extend_from_slice(&[0; 4]);
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// Builds the complete request frame for a batch of data points.
pub fn encode_request(points: &[DataPoint]) -> SinkResult<Vec<u8>> {
    let payload = serde_json::to_vec(&SenderRequest::sender_data(points))?;
    frame(&payload)
}

/// Validates a header and returns the declared payload length.
pub fn parse_header(header: &[u8]) -> SinkResult<usize> {
    if header.len() < HEADER_LEN {
        return Err(SinkError::Protocol(format!(
            "incomplete header: {} of {HEADER_LEN} bytes",
            header.len()
        )));
    }
    if header[..HEADER_MAGIC.len()] != HEADER_MAGIC {
        return Err(SinkError::Protocol(String::from("invalid header magic")));
    }

    let mut length = [0u8; 4];
    length.copy_from_slice(&header[5..9]);
    let length = u32::from_le_bytes(length) as usize;
    if length > MAX_PAYLOAD_LEN {
        return Err(SinkError::Protocol(format!("declared length too large: {length}")));
    }
    Ok(length)
}

/// Splits a complete frame into its payload.
pub fn decode_frame(packet: &[u8]) -> SinkResult<&[u8]> {
    let length = parse_header(packet)?;
    let body = &packet[HEADER_LEN..];
    if body.len() < length {
        return Err(SinkError::Protocol(format!(
            "incomplete payload: {} of {length} bytes",
            body.len()
        )));
    }
    Ok(&body[..length])
}

pub fn decode_request(packet: &[u8]) -> SinkResult<SenderRequest> {
    Ok(serde_json::from_slice(decode_frame(packet)?)?)
}

pub fn decode_response(packet: &[u8]) -> SinkResult<SenderResponse> {
    Ok(serde_json::from_slice(decode_frame(packet)?)?)
}
