//! CBOR encoding of sturdy-ref records.
//!
//! Records are stored as CBOR maps with small integer keys. The payload is
//! split into an explicit kind discriminator and a kind-specific body so that
//! a record written by a newer or broken writer is detected as an unknown
//! kind instead of being misread as some other capability.

use ciborium::value::Value;

use crate::crypto::TokenHash;
use crate::error::CoreError;
use crate::token::{FrontendRef, MembraneRequirement, ObjectId, Owner, TokenPayload, TokenRecord};
use crate::types::{GrainId, NotificationId};

/// Record field keys. Keys 0-23 encode as single bytes.
mod keys {
    pub const HASH: u64 = 0;
    pub const OWNER: u64 = 1;
    pub const PAYLOAD_KIND: u64 = 2;
    pub const PAYLOAD: u64 = 3;
    pub const CREATED: u64 = 4;
    pub const EXPIRES: u64 = 5;
    pub const REVOKED: u64 = 6;
    pub const REQUIREMENTS: u64 = 7;
}

/// Payload kind discriminators.
pub mod kind {
    pub const APP_REF: u64 = 1;
    pub const WAKE_LOCK: u64 = 2;
    pub const NOTIFICATION_HANDLE: u64 = 3;
    pub const CHILD: u64 = 4;
}

/// Encode a record to bytes.
pub fn encode_token(record: &TokenRecord) -> Result<Vec<u8>, CoreError> {
    let (payload_kind, payload) = payload_to_value(&record.payload);

    let owner = Value::serialized(&record.owner)
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;
    let requirements = Value::serialized(&record.requirements)
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;

    let expires = match record.expires {
        Some(at) => Value::Integer(at.into()),
        None => Value::Null,
    };

    let map = Value::Map(vec![
        (int(keys::HASH), Value::Bytes(record.hash.0.to_vec())),
        (int(keys::OWNER), owner),
        (int(keys::PAYLOAD_KIND), int(payload_kind)),
        (int(keys::PAYLOAD), payload),
        (int(keys::CREATED), Value::Integer(record.created.into())),
        (int(keys::EXPIRES), expires),
        (int(keys::REVOKED), Value::Bool(record.revoked)),
        (int(keys::REQUIREMENTS), requirements),
    ]);

    let mut buf = Vec::new();
    ciborium::into_writer(&map, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}

/// Decode a record from bytes.
///
/// Fails with [`CoreError::UnknownPayloadKind`] when the payload discriminator
/// is not one this build understands.
pub fn decode_token(bytes: &[u8]) -> Result<TokenRecord, CoreError> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;

    let map = match value {
        Value::Map(m) => m,
        _ => return Err(malformed("expected map")),
    };

    let get = |key: u64| -> Option<&Value> {
        map.iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == key as i128))
            .map(|(_, v)| v)
    };

    let hash = match get(keys::HASH) {
        Some(Value::Bytes(b)) => {
            TokenHash::try_from(b.as_slice()).map_err(|_| malformed("invalid hash"))?
        }
        _ => return Err(malformed("missing hash")),
    };

    let owner: Owner = get(keys::OWNER)
        .ok_or_else(|| malformed("missing owner"))?
        .deserialized()
        .map_err(|e| CoreError::DecodingError(format!("owner: {}", e)))?;

    let payload_kind = match get(keys::PAYLOAD_KIND) {
        Some(Value::Integer(i)) => u64::try_from(*i).map_err(|_| malformed("invalid kind"))?,
        _ => return Err(malformed("missing payload kind")),
    };
    let payload = value_to_payload(
        payload_kind,
        get(keys::PAYLOAD).ok_or_else(|| malformed("missing payload"))?,
    )?;

    let created = match get(keys::CREATED) {
        Some(Value::Integer(i)) => i64::try_from(*i).map_err(|_| malformed("invalid created"))?,
        _ => return Err(malformed("missing created")),
    };

    let expires = match get(keys::EXPIRES) {
        Some(Value::Integer(i)) => {
            Some(i64::try_from(*i).map_err(|_| malformed("invalid expires"))?)
        }
        Some(Value::Null) | None => None,
        _ => return Err(malformed("invalid expires")),
    };

    let revoked = match get(keys::REVOKED) {
        Some(Value::Bool(b)) => *b,
        None => false,
        _ => return Err(malformed("invalid revoked")),
    };

    let requirements: Vec<MembraneRequirement> = match get(keys::REQUIREMENTS) {
        Some(v) => v
            .deserialized()
            .map_err(|e| CoreError::DecodingError(format!("requirements: {}", e)))?,
        None => Vec::new(),
    };

    Ok(TokenRecord {
        hash,
        owner,
        payload,
        created,
        expires,
        revoked,
        requirements,
    })
}

/// Split a payload into its kind and body.
fn payload_to_value(payload: &TokenPayload) -> (u64, Value) {
    match payload {
        TokenPayload::Object {
            grain_id,
            object_id: ObjectId::AppRef(data),
        } => (
            kind::APP_REF,
            Value::Array(vec![
                Value::Text(grain_id.as_str().to_string()),
                Value::Bytes(data.to_vec()),
            ]),
        ),
        TokenPayload::Object {
            grain_id,
            object_id: ObjectId::WakeLockNotification(n),
        } => (
            kind::WAKE_LOCK,
            Value::Array(vec![
                Value::Text(grain_id.as_str().to_string()),
                Value::Integer((*n).into()),
            ]),
        ),
        TokenPayload::Frontend(FrontendRef::NotificationHandle(id)) => (
            kind::NOTIFICATION_HANDLE,
            Value::Text(id.as_str().to_string()),
        ),
        TokenPayload::Child { parent } => (kind::CHILD, Value::Bytes(parent.0.to_vec())),
    }
}

fn value_to_payload(payload_kind: u64, value: &Value) -> Result<TokenPayload, CoreError> {
    match payload_kind {
        kind::APP_REF => match value {
            Value::Array(items) => match items.as_slice() {
                [Value::Text(grain), Value::Bytes(data)] => Ok(TokenPayload::Object {
                    grain_id: GrainId::new(grain.clone()),
                    object_id: ObjectId::AppRef(data.clone().into()),
                }),
                _ => Err(malformed("invalid app ref")),
            },
            _ => Err(malformed("invalid app ref")),
        },
        kind::WAKE_LOCK => match value {
            Value::Array(items) => match items.as_slice() {
                [Value::Text(grain), Value::Integer(n)] => Ok(TokenPayload::Object {
                    grain_id: GrainId::new(grain.clone()),
                    object_id: ObjectId::WakeLockNotification(
                        u32::try_from(*n).map_err(|_| malformed("invalid wakelock id"))?,
                    ),
                }),
                _ => Err(malformed("invalid wakelock")),
            },
            _ => Err(malformed("invalid wakelock")),
        },
        kind::NOTIFICATION_HANDLE => match value {
            Value::Text(id) => Ok(TokenPayload::notification(NotificationId::new(id.clone()))),
            _ => Err(malformed("invalid notification handle")),
        },
        kind::CHILD => match value {
            Value::Bytes(b) => Ok(TokenPayload::Child {
                parent: TokenHash::try_from(b.as_slice()).map_err(|_| malformed("invalid parent"))?,
            }),
            _ => Err(malformed("invalid child")),
        },
        other => Err(CoreError::UnknownPayloadKind(other)),
    }
}

fn int(n: u64) -> Value {
    Value::Integer(n.into())
}

fn malformed(msg: &str) -> CoreError {
    CoreError::DecodingError(msg.to_string())
}

/// Build the bytes of a record whose payload kind is `payload_kind`.
///
/// Used to simulate records left behind by an unknown writer.
pub fn encode_with_raw_kind(record: &TokenRecord, payload_kind: u64) -> Result<Vec<u8>, CoreError> {
    let bytes = encode_token(record)?;
    let value: Value =
        ciborium::from_reader(bytes.as_slice()).map_err(|e| CoreError::DecodingError(e.to_string()))?;
    let map = match value {
        Value::Map(entries) => entries
            .into_iter()
            .map(|(k, v)| {
                let is_kind =
                    matches!(&k, Value::Integer(i) if i128::from(*i) == keys::PAYLOAD_KIND as i128);
                if is_kind {
                    (k, int(payload_kind))
                } else {
                    (k, v)
                }
            })
            .collect(),
        _ => return Err(malformed("expected map")),
    };
    let mut buf = Vec::new();
    ciborium::into_writer(&Value::Map(map), &mut buf)
        .map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}
