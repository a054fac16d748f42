//! JSON wire format of the etcd v3 gRPC gateway watch endpoint.
//!
//! The gateway follows the proto3 JSON mapping: `bytes` fields are base64,
//! `int64` fields may arrive as strings, and fields holding their default
//! value (an event `type` of `PUT`, `created: false`, ...) are omitted.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::Error as _;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use super::WatchRequest;
use super::WatchResponse;
use crate::Event;
use crate::EventKind;
use crate::KeyValue;
use crate::NetworkError;
use crate::Result;
use crate::Revision;

#[derive(Debug, Serialize)]
pub(crate) struct WatchRequestBody {
    create_request: CreateRequest,
}

#[derive(Debug, Serialize)]
struct CreateRequest {
    key: String,
    range_end: String,
    start_revision: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    prev_kv: bool,
}

impl From<&WatchRequest> for WatchRequestBody {
    fn from(request: &WatchRequest) -> Self {
        WatchRequestBody {
            create_request: CreateRequest {
                key: STANDARD.encode(&request.range.key),
                range_end: STANDARD.encode(&request.range.range_end),
                start_revision: request.start_revision.to_string(),
                prev_kv: request.prev_kv,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct WatchLine {
    result: Option<WireResponse>,
    error: Option<WireError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireResponse {
    header: WireHeader,
    #[serde(deserialize_with = "de_i64")]
    watch_id: i64,
    created: bool,
    canceled: bool,
    #[serde(deserialize_with = "de_i64")]
    compact_revision: Revision,
    cancel_reason: String,
    events: Vec<WireEvent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireHeader {
    #[serde(deserialize_with = "de_i64")]
    revision: Revision,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum WireEventType {
    #[default]
    Put,
    Delete,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: WireEventType,
    kv: WireKeyValue,
    prev_kv: Option<WireKeyValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireKeyValue {
    key: String,
    value: String,
    #[serde(deserialize_with = "de_i64")]
    mod_revision: Revision,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireError {
    #[serde(alias = "grpc_code", deserialize_with = "de_i64")]
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Int64Repr {
    Number(i64),
    Text(String),
}

fn de_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Int64Repr>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Int64Repr::Number(n)) => Ok(n),
        Some(Int64Repr::Text(s)) if s.is_empty() => Ok(0),
        Some(Int64Repr::Text(s)) => s
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid int64 {s:?}"))),
    }
}

fn decode_bytes(
    field: &'static str,
    text: &str,
) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|source| NetworkError::Base64 { field, source }.into())
}

impl WireKeyValue {
    fn into_key_value(self) -> Result<KeyValue> {
        Ok(KeyValue {
            key: decode_bytes("key", &self.key)?,
            value: decode_bytes("value", &self.value)?,
            mod_revision: self.mod_revision,
        })
    }
}

impl WireEvent {
    fn into_event(self) -> Result<Event> {
        Ok(Event {
            kind: match self.kind {
                WireEventType::Put => EventKind::Put,
                WireEventType::Delete => EventKind::Delete,
            },
            kv: self.kv.into_key_value()?,
            prev_kv: self.prev_kv.map(WireKeyValue::into_key_value).transpose()?,
        })
    }
}

/// Decodes one line of the watch stream.
pub fn decode_watch_line(line: &str) -> Result<WatchResponse> {
    let parsed: WatchLine = serde_json::from_str(line)?;
    if let Some(error) = parsed.error {
        return Err(NetworkError::Remote {
            code: error.code,
            message: error.message,
        }
        .into());
    }
    let Some(result) = parsed.result else {
        return Err(NetworkError::Remote {
            code: 0,
            message: "watch message carries neither result nor error".to_string(),
        }
        .into());
    };

    Ok(WatchResponse {
        header_revision: result.header.revision,
        watch_id: result.watch_id,
        created: result.created,
        canceled: result.canceled,
        compact_revision: result.compact_revision,
        cancel_reason: result.cancel_reason,
        events: result
            .events
            .into_iter()
            .map(WireEvent::into_event)
            .collect::<Result<Vec<_>>>()?,
    })
}
