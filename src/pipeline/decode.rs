//! Message decoding: headers, plain-text body and date normalization.
//!
//! Pure functions from a fetched provider message to an `EmailRecord`.
//! Nothing here fails the message: undecodable parts degrade to empty or
//! raw values and are logged.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{NaiveDateTime, TimeDelta, Weekday};
use tracing::warn;

use crate::error::DateParseError;
use crate::pipeline::types::{EmailRecord, RECEIVED_AT_FORMAT};
use crate::provider::{Header, MessagePart, MessagePayload, PartBody, ProviderMessage};

/// URL-safe base64 that accepts both padded and unpadded input.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Fixed offset applied to header dates (UTC+05:30), in minutes.
pub const RECEIVED_AT_OFFSET_MINUTES: i64 = 5 * 60 + 30;

/// Only this many leading characters of a date header are parsed.
const DATE_PREFIX_CHARS: usize = 25;

const TEXT_PLAIN: &str = "text/plain";

/// Header fields kept on a record. Missing headers stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
}

/// Pick `Subject`, `From`, `To` and `Date`, matching names case-sensitively.
/// A repeated header keeps its last value.
pub fn extract_headers(headers: &[Header]) -> MessageHeaders {
    let mut out = MessageHeaders::default();
    for header in headers {
        let slot = match header.name.as_str() {
            "Subject" => &mut out.subject,
            "From" => &mut out.from,
            "To" => &mut out.to,
            "Date" => &mut out.date,
            _ => continue,
        };
        *slot = header.value.clone();
    }
    out
}

/// Plain-text body of a payload.
///
/// Direct body data wins. Otherwise the first top-level `text/plain` part
/// with data is used, then nested parts depth-first. No text at all is an
/// empty body, not an error.
pub fn extract_body(payload: &MessagePayload) -> String {
    let found = match body_data(payload.body.as_ref()) {
        Some(data) => Some(data),
        None => first_plain_part(&payload.parts),
    };

    match found {
        Some(data) => decode_body_data(data).unwrap_or_else(|e| {
            warn!("Message body extraction failed: {e}");
            String::new()
        }),
        None => String::new(),
    }
}

fn body_data(body: Option<&PartBody>) -> Option<&str> {
    body.and_then(|b| b.data.as_deref())
}

fn first_plain_part(parts: &[MessagePart]) -> Option<&str> {
    let top_level = parts
        .iter()
        .filter(|p| p.mime_type == TEXT_PLAIN)
        .find_map(|p| body_data(p.body.as_ref()));
    top_level.or_else(|| parts.iter().find_map(|p| first_plain_part(&p.parts)))
}

/// Decode base64url body data, dropping bytes that are not valid UTF-8.
pub fn decode_body_data(data: &str) -> Result<String, base64::DecodeError> {
    let bytes = URL_SAFE_LENIENT.decode(data.trim())?;
    Ok(bytes.utf8_chunks().map(|chunk| chunk.valid()).collect())
}

/// Parse the leading `<DOW>, <DD> <MON> <YYYY> <HH>:<MM>:<SS>` of a date
/// header, ignoring whatever timezone token follows.
pub fn parse_header_date(raw: &str) -> Result<NaiveDateTime, DateParseError> {
    let err = |reason: String| DateParseError {
        raw: raw.to_string(),
        reason,
    };

    let head: String = raw.chars().take(DATE_PREFIX_CHARS).collect();
    let (weekday, rest) = head
        .split_once(',')
        .ok_or_else(|| err("missing day-of-week".into()))?;
    weekday
        .trim()
        .parse::<Weekday>()
        .map_err(|_| err(format!("unknown day-of-week '{}'", weekday.trim())))?;

    NaiveDateTime::parse_from_str(rest.trim_start(), "%d %b %Y %H:%M:%S")
        .map_err(|e| err(e.to_string()))
}

/// Header date shifted to +05:30 and formatted `DD/MM/YYYY HH:MM:SS`.
pub fn try_normalize_date(raw: &str) -> Result<String, DateParseError> {
    let naive = parse_header_date(raw)?;
    let shifted = naive
        .checked_add_signed(TimeDelta::minutes(RECEIVED_AT_OFFSET_MINUTES))
        .ok_or_else(|| DateParseError {
            raw: raw.to_string(),
            reason: "date out of range".into(),
        })?;
    Ok(shifted.format(RECEIVED_AT_FORMAT).to_string())
}

/// Like [`try_normalize_date`], but an unparseable header is logged and
/// returned unchanged.
pub fn normalize_date(raw: &str) -> String {
    try_normalize_date(raw).unwrap_or_else(|e| {
        warn!("Date formatting failed for '{raw}': {}", e.reason);
        raw.to_string()
    })
}

/// Build the stored record for a fetched message.
pub fn to_record(message: &ProviderMessage) -> EmailRecord {
    let headers = extract_headers(&message.payload.headers);
    EmailRecord {
        id: message.id.clone(),
        sender: headers.from,
        recipient: headers.to,
        subject: headers.subject,
        body: extract_body(&message.payload),
        received_at: normalize_date(&headers.date),
    }
}
