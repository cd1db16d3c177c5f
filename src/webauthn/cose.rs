use ciborium::value::Value;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::elliptic_curve::generic_array::GenericArray;
use p256::EncodedPoint;
use serde::{Deserialize, Serialize};

pub const COSE_KTY_EC2: i64 = 2;
pub const COSE_ALG_ES256: i64 = -7;
pub const COSE_CRV_P256: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CoseError {
    #[error("cbor: {0}")]
    Cbor(String),
    #[error("missing field {0}")]
    MissingField(i64),
    #[error("unsupported key type {0}")]
    UnsupportedKeyType(i64),
    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(i64),
    #[error("unsupported curve {0}")]
    UnsupportedCurve(i64),
    #[error("coordinate not 32 bytes")]
    BadCoordinate,
    #[error("point not on curve")]
    InvalidPoint,
    #[error("signature rejected")]
    BadSignature,
}

/// Signature algorithm tag carried alongside every stored public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoseAlg {
    Es256,
}

impl CoseAlg {
    pub fn cose_id(self) -> i64 {
        match self {
            Self::Es256 => COSE_ALG_ES256,
        }
    }
}

/// A P-256 public key decoded from a COSE_Key map (kty=2, alg=-7, crv=1, x, y).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoseKey {
    pub alg: CoseAlg,
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl CoseKey {
    /// Decode one COSE_Key from the front of `data`. Trailing bytes are
    /// left alone so the caller can parse authenticator-data extensions.
    pub fn decode(data: &[u8]) -> Result<Self, CoseError> {
        let value: Value =
            ciborium::from_reader(data).map_err(|e| CoseError::Cbor(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, CoseError> {
        let map = match value {
            Value::Map(m) => m,
            _ => return Err(CoseError::Cbor("COSE key must be a map".into())),
        };

        let kty = cose_get_int(map, 1).ok_or(CoseError::MissingField(1))?;
        if kty != COSE_KTY_EC2 {
            return Err(CoseError::UnsupportedKeyType(kty));
        }
        let alg = cose_get_int(map, 3).ok_or(CoseError::MissingField(3))?;
        if alg != COSE_ALG_ES256 {
            return Err(CoseError::UnsupportedAlgorithm(alg));
        }
        let crv = cose_get_int(map, -1).ok_or(CoseError::MissingField(-1))?;
        if crv != COSE_CRV_P256 {
            return Err(CoseError::UnsupportedCurve(crv));
        }

        let x = cose_get_bytes(map, -2).ok_or(CoseError::MissingField(-2))?;
        let y = cose_get_bytes(map, -3).ok_or(CoseError::MissingField(-3))?;
        Ok(Self {
            alg: CoseAlg::Es256,
            x: x.try_into().map_err(|_| CoseError::BadCoordinate)?,
            y: y.try_into().map_err(|_| CoseError::BadCoordinate)?,
        })
    }

    /// Encode as a COSE_Key CBOR map, the exact shape authenticators emit.
    pub fn encode(&self) -> Vec<u8> {
        let map = Value::Map(vec![
            (Value::Integer(1i64.into()), Value::Integer(COSE_KTY_EC2.into())),
            (Value::Integer(3i64.into()), Value::Integer(self.alg.cose_id().into())),
            (Value::Integer((-1i64).into()), Value::Integer(COSE_CRV_P256.into())),
            (Value::Integer((-2i64).into()), Value::Bytes(self.x.to_vec())),
            (Value::Integer((-3i64).into()), Value::Bytes(self.y.to_vec())),
        ]);
        let mut buf = Vec::new();
        ciborium::into_writer(&map, &mut buf).expect("COSE key encoding is infallible");
        buf
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, CoseError> {
        let point = EncodedPoint::from_affine_coordinates(
            GenericArray::from_slice(&self.x),
            GenericArray::from_slice(&self.y),
            false,
        );
        VerifyingKey::from_encoded_point(&point).map_err(|_| CoseError::InvalidPoint)
    }

    /// Verify a DER-encoded ECDSA signature over `data`.
    pub fn verify(&self, data: &[u8], der_sig: &[u8]) -> Result<(), CoseError> {
        let key = self.verifying_key()?;
        let sig = Signature::from_der(der_sig).map_err(|_| CoseError::BadSignature)?;
        key.verify(data, &sig).map_err(|_| CoseError::BadSignature)
    }
}

// CBOR map helpers, shared with the attestation parser.

pub(crate) fn cbor_get<'a>(map: &'a [(Value, Value)], key: i64) -> Option<&'a Value> {
    let target = Value::Integer(key.into());
    map.iter().find(|(k, _)| k == &target).map(|(_, v)| v)
}

pub(crate) fn cbor_get_str<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Text(s) if s == key))
        .map(|(_, v)| v)
}

pub(crate) fn cbor_bytes(v: &Value) -> Option<&[u8]> {
    match v {
        Value::Bytes(b) => Some(b),
        _ => None,
    }
}

pub(crate) fn cbor_text(v: &Value) -> Option<&str> {
    match v {
        Value::Text(s) => Some(s),
        _ => None,
    }
}

pub(crate) fn cbor_int(v: &Value) -> Option<i64> {
    match v {
        Value::Integer(i) => i64::try_from(i128::from(*i)).ok(),
        _ => None,
    }
}

pub(crate) fn cbor_map(v: &Value) -> Option<&[(Value, Value)]> {
    match v {
        Value::Map(m) => Some(m),
        _ => None,
    }
}

fn cose_get_int(map: &[(Value, Value)], key: i64) -> Option<i64> {
    cbor_get(map, key).and_then(cbor_int)
}

fn cose_get_bytes<'a>(map: &'a [(Value, Value)], key: i64) -> Option<&'a [u8]> {
    cbor_get(map, key).and_then(cbor_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;

    fn test_key() -> (SigningKey, CoseKey) {
        let sk = SigningKey::random(&mut rand::rngs::OsRng);
        let point = sk.verifying_key().to_encoded_point(false);
        let cose = CoseKey {
            alg: CoseAlg::Es256,
            x: point.x().unwrap().as_slice().try_into().unwrap(),
            y: point.y().unwrap().as_slice().try_into().unwrap(),
        };
        (sk, cose)
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let (_, cose) = test_key();
        let encoded = cose.encode();
        let decoded = CoseKey::decode(&encoded).unwrap();
        assert_eq!(decoded, cose);
    }

    #[test]
    fn test_decode_rejects_rs256() {
        let map = Value::Map(vec![
            (Value::Integer(1i64.into()), Value::Integer(2i64.into())),
            (Value::Integer(3i64.into()), Value::Integer((-257i64).into())),
            (Value::Integer((-1i64).into()), Value::Integer(1i64.into())),
            (Value::Integer((-2i64).into()), Value::Bytes(vec![0u8; 32])),
            (Value::Integer((-3i64).into()), Value::Bytes(vec![0u8; 32])),
        ]);
        let mut buf = Vec::new();
        ciborium::into_writer(&map, &mut buf).unwrap();
        let err = CoseKey::decode(&buf).unwrap_err();
        assert!(matches!(err, CoseError::UnsupportedAlgorithm(-257)));
    }

    #[test]
    fn test_decode_rejects_short_coordinate() {
        let map = Value::Map(vec![
            (Value::Integer(1i64.into()), Value::Integer(2i64.into())),
            (Value::Integer(3i64.into()), Value::Integer((-7i64).into())),
            (Value::Integer((-1i64).into()), Value::Integer(1i64.into())),
            (Value::Integer((-2i64).into()), Value::Bytes(vec![0u8; 16])),
            (Value::Integer((-3i64).into()), Value::Bytes(vec![0u8; 32])),
        ]);
        let mut buf = Vec::new();
        ciborium::into_writer(&map, &mut buf).unwrap();
        let err = CoseKey::decode(&buf).unwrap_err();
        assert!(matches!(err, CoseError::BadCoordinate));
    }

    #[test]
    fn test_decode_not_a_map() {
        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Integer(7i64.into()), &mut buf).unwrap();
        assert!(matches!(CoseKey::decode(&buf), Err(CoseError::Cbor(_))));
    }

    #[test]
    fn test_verify_good_signature() {
        let (sk, cose) = test_key();
        let msg = b"authenticator data and client data hash";
        let sig: p256::ecdsa::Signature = sk.sign(msg);
        cose.verify(msg, sig.to_der().as_bytes()).unwrap();
    }

    #[test]
    fn test_verify_rejects_wrong_message() {
        let (sk, cose) = test_key();
        let sig: p256::ecdsa::Signature = sk.sign(b"original");
        let err = cose.verify(b"tampered", sig.to_der().as_bytes()).unwrap_err();
        assert!(matches!(err, CoseError::BadSignature));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let (sk, _) = test_key();
        let (_, other) = test_key();
        let msg = b"data";
        let sig: p256::ecdsa::Signature = sk.sign(msg);
        let err = other.verify(msg, sig.to_der().as_bytes()).unwrap_err();
        assert!(matches!(err, CoseError::BadSignature));
    }

    #[test]
    fn test_verify_rejects_garbage_der() {
        let (_, cose) = test_key();
        let err = cose.verify(b"data", &[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, CoseError::BadSignature));
    }
}
