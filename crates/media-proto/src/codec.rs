use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{ProtoError, ProtoResult};

pub fn encode_str(value: &str) -> Bytes {
    Bytes::copy_from_slice(value.as_bytes())
}

pub fn decode_str(payload: &[u8]) -> ProtoResult<String> {
    Ok(String::from_utf8(payload.to_vec())?)
}

pub fn encode_i32(value: i32) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

pub fn decode_i32(payload: &[u8]) -> ProtoResult<i32> {
    let raw: [u8; 4] = payload.try_into().map_err(|_| ProtoError::InvalidLength {
        expected: 4,
        actual: payload.len(),
    })?;
    Ok(i32::from_be_bytes(raw))
}

pub fn encode_i64(value: i64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

pub fn decode_i64(payload: &[u8]) -> ProtoResult<i64> {
    let raw: [u8; 8] = payload.try_into().map_err(|_| ProtoError::InvalidLength {
        expected: 8,
        actual: payload.len(),
    })?;
    Ok(i64::from_be_bytes(raw))
}

pub fn encode_bool(value: bool) -> Bytes {
    Bytes::copy_from_slice(&[u8::from(value)])
}

pub fn decode_bool(payload: &[u8]) -> ProtoResult<bool> {
    match payload {
        [0] => Ok(false),
        [1] => Ok(true),
        [other] => Err(ProtoError::InvalidBool(*other)),
        _ => Err(ProtoError::InvalidLength {
            expected: 1,
            actual: payload.len(),
        }),
    }
}

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> ProtoResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> ProtoResult<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// Serde adapter carrying optional binary blobs (icons, artwork) as base64 strings.
pub mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|text| {
                STANDARD
                    .decode(text.as_bytes())
                    .map(Bytes::from)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        assert_eq!(encode_i32(0x0102_0304).as_ref(), &[1, 2, 3, 4]);
        assert_eq!(encode_i64(1).as_ref(), &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(decode_i32(&[0xff, 0xff, 0xff, 0xfe]).expect("i32"), -2);
    }

    #[test]
    fn short_integer_payload_is_rejected() {
        let err = decode_i32(&[1, 2]).expect_err("short");
        assert!(matches!(
            err,
            ProtoError::InvalidLength {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[test]
    fn booleans_are_single_strict_bytes() {
        assert_eq!(encode_bool(true).as_ref(), &[1]);
        assert!(!decode_bool(&[0]).expect("false"));
        assert!(matches!(decode_bool(&[2]), Err(ProtoError::InvalidBool(2))));
        assert!(decode_bool(&[]).is_err());
    }

    #[test]
    fn strings_reject_invalid_utf8() {
        assert_eq!(decode_str("héllo".as_bytes()).expect("utf8"), "héllo");
        assert!(decode_str(&[0xc3, 0x28]).is_err());
    }
}
