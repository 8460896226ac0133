use bytes::Bytes;

use crate::{ProtoError, ProtoResult};

/// Reply sent back on the path of the command it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Failure,
    PermissionDenied,
    Timeout,
}

impl Status {
    pub fn as_byte(self) -> u8 {
        match self {
            Status::Success => 0,
            Status::Failure => 1,
            Status::PermissionDenied => 2,
            Status::Timeout => 3,
        }
    }

    pub fn from_byte(byte: u8) -> ProtoResult<Self> {
        match byte {
            0 => Ok(Status::Success),
            1 => Ok(Status::Failure),
            2 => Ok(Status::PermissionDenied),
            3 => Ok(Status::Timeout),
            other => Err(ProtoError::UnknownStatus(other)),
        }
    }

    pub fn encode(self) -> Bytes {
        Bytes::copy_from_slice(&[self.as_byte()])
    }

    pub fn decode(payload: &[u8]) -> ProtoResult<Self> {
        match payload {
            [byte] => Self::from_byte(*byte),
            _ => Err(ProtoError::InvalidLength {
                expected: 1,
                actual: payload.len(),
            }),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Failure => "FAILURE",
            Status::PermissionDenied => "PERMISSION_DENIED",
            Status::Timeout => "TIMEOUT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bytes_are_stable() {
        for (status, byte) in [
            (Status::Success, 0u8),
            (Status::Failure, 1),
            (Status::PermissionDenied, 2),
            (Status::Timeout, 3),
        ] {
            assert_eq!(status.encode().as_ref(), &[byte]);
            assert_eq!(Status::decode(&[byte]).expect("decode"), status);
        }
        assert!(matches!(
            Status::decode(&[9]),
            Err(ProtoError::UnknownStatus(9))
        ));
    }
}
