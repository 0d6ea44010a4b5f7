//! Public-key and signature encodings expected by the destination chain's
//! on-chain verifier.
//!
//! The relay chain serializes validator keys as an algorithm byte, a curve
//! label and a SEC1 point; the verifier contract wants curve-labeled
//! uncompressed points (with ECDSA/P-256 as an unlabeled special case) and
//! 65-byte recoverable signatures with a low `s`.

use p256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::{RelayError, Result};

const ALG_ECDSA: u8 = 0x12;
const ALG_SM2: u8 = 0x13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Ecdsa,
    Sm2,
}

impl Algorithm {
    fn byte(self) -> u8 {
        match self {
            Self::Ecdsa => ALG_ECDSA,
            Self::Sm2 => ALG_SM2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    P224,
    P256,
    P384,
    P521,
    Secp256k1,
    Sm2P256V1,
}

impl Curve {
    pub fn label(self) -> u8 {
        match self {
            Self::P224 => 1,
            Self::P256 => 2,
            Self::P384 => 3,
            Self::P521 => 4,
            Self::Secp256k1 => 5,
            Self::Sm2P256V1 => 20,
        }
    }

    fn from_label(label: u8) -> Result<Self> {
        match label {
            1 => Ok(Self::P224),
            2 => Ok(Self::P256),
            3 => Ok(Self::P384),
            4 => Ok(Self::P521),
            5 => Ok(Self::Secp256k1),
            20 => Ok(Self::Sm2P256V1),
            other => Err(RelayError::UnknownCurve(format!("label {other:#04x}"))),
        }
    }
}

/// A validator public key in the form the verifier contract consumes:
/// algorithm, curve, and the uncompressed SEC1 point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierKey {
    pub algorithm: Algorithm,
    pub curve: Curve,
    point: Vec<u8>,
}

impl VerifierKey {
    /// Parse the relay chain's serialized key form. A bare SEC1 point
    /// (leading 0x02/0x03/0x04) is an ECDSA/P-256 key; otherwise the first
    /// two bytes are the algorithm and curve label.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match bytes.first().copied() {
            Some(0x02 | 0x03 | 0x04) => {
                Ok(Self {
                    algorithm: Algorithm::Ecdsa,
                    curve: Curve::P256,
                    point: decompress(Curve::P256, bytes)?,
                })
            }
            Some(alg @ (ALG_ECDSA | ALG_SM2)) => {
                if bytes.len() < 3 {
                    return Err(RelayError::ChainData("serialized key too short".into()));
                }
                let algorithm = if alg == ALG_ECDSA {
                    Algorithm::Ecdsa
                } else {
                    Algorithm::Sm2
                };
                let curve = Curve::from_label(bytes[1])?;
                Ok(Self {
                    algorithm,
                    curve,
                    point: decompress(curve, &bytes[2..])?,
                })
            }
            Some(other) => Err(RelayError::ChainData(format!(
                "unsupported key algorithm byte {other:#04x}"
            ))),
            None => Err(RelayError::ChainData("empty serialized key".into())),
        }
    }

    /// The byte layout the destination contract hashes over. ECDSA/P-256 is
    /// the raw uncompressed point with no prefix; every other key carries
    /// its algorithm and curve label first.
    pub fn uncompressed(&self) -> Vec<u8> {
        match (self.algorithm, self.curve) {
            (Algorithm::Ecdsa, Curve::P256) => self.point.clone(),
            (algorithm, curve) => {
                let mut out = Vec::with_capacity(2 + self.point.len());
                out.push(algorithm.byte());
                out.push(curve.label());
                out.extend_from_slice(&self.point);
                out
            }
        }
    }

    /// The relay chain's canonical serialized form, used only for ordering:
    /// labels followed by the SEC1 compressed point.
    fn sort_key(&self) -> Vec<u8> {
        let coord_len = (self.point.len() - 1) / 2;
        let x = &self.point[1..1 + coord_len];
        let y_parity = self.point[self.point.len() - 1] & 1;
        let mut out = Vec::with_capacity(3 + coord_len);
        out.push(self.algorithm.byte());
        out.push(self.curve.label());
        out.push(0x02 | y_parity);
        out.extend_from_slice(x);
        out
    }
}

/// Decompress a SEC1 point into its uncompressed form. Already-uncompressed
/// points pass through; compressed points require curve arithmetic, which is
/// available for P-256 and secp256k1.
fn decompress(curve: Curve, point: &[u8]) -> Result<Vec<u8>> {
    match point.first().copied() {
        Some(0x04) => Ok(point.to_vec()),
        Some(0x02 | 0x03) => match curve {
            Curve::P256 => {
                let key = p256::PublicKey::from_sec1_bytes(point)
                    .map_err(|e| RelayError::ChainData(format!("invalid P-256 point: {e}")))?;
                Ok(key.to_encoded_point(false).as_bytes().to_vec())
            }
            Curve::Secp256k1 => {
                let key = k256::PublicKey::from_sec1_bytes(point)
                    .map_err(|e| RelayError::ChainData(format!("invalid secp256k1 point: {e}")))?;
                Ok(key.to_encoded_point(false).as_bytes().to_vec())
            }
            other => Err(RelayError::UnknownCurve(format!(
                "cannot decompress point on {other:?}"
            ))),
        },
        _ => Err(RelayError::ChainData("malformed SEC1 point".into())),
    }
}

/// Sort `keys` with the relay chain's canonical public-key ordering and
/// concatenate their verifier encodings.
pub fn encode_bookkeepers(keys: &[VerifierKey]) -> Vec<u8> {
    let mut sorted: Vec<&VerifierKey> = keys.iter().collect();
    sorted.sort_by_key(|k| k.sort_key());
    let mut out = Vec::new();
    for key in sorted {
        out.extend_from_slice(&key.uncompressed());
    }
    out
}

/// Convert a relay-chain signature into the 65-byte `r || s || v` form the
/// destination contract recovers against. `s` is normalized to the lower
/// half of the curve order; `v` is 27, or 28 when `s` had to be flipped.
pub fn eth_compatible(sig: &[u8]) -> Result<[u8; 65]> {
    // A 65-byte input carries a leading signature-scheme byte.
    let rs = match sig.len() {
        64 => sig,
        65 => &sig[1..],
        other => {
            return Err(RelayError::ChainData(format!(
                "signature length {other}, expected 64 or 65"
            )));
        }
    };
    let parsed = p256::ecdsa::Signature::from_slice(rs)
        .map_err(|e| RelayError::ChainData(format!("invalid signature: {e}")))?;
    let (normalized, flipped) = match parsed.normalize_s() {
        Some(low_s) => (low_s, true),
        None => (parsed, false),
    };
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(normalized.to_bytes().as_slice());
    out[64] = if flipped { 28 } else { 27 };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p256_point(scalar: u8) -> Vec<u8> {
        let mut secret = [0u8; 32];
        secret[31] = scalar;
        let key = p256::ecdsa::SigningKey::from_slice(&secret).unwrap();
        key.verifying_key().to_encoded_point(false).as_bytes().to_vec()
    }

    fn k256_point(scalar: u8) -> Vec<u8> {
        let mut secret = [0u8; 32];
        secret[31] = scalar;
        let key = k256::ecdsa::SigningKey::from_slice(&secret).unwrap();
        key.verifying_key().to_encoded_point(false).as_bytes().to_vec()
    }

    #[test]
    fn p256_ecdsa_has_no_prefix() {
        let point = p256_point(7);
        let key = VerifierKey::parse(&point).unwrap();
        let encoded = key.uncompressed();
        assert_eq!(encoded.len(), 65);
        assert_eq!(encoded, point);
    }

    #[test]
    fn secp256k1_carries_algorithm_and_label() {
        let point = k256_point(9);
        let mut serialized = vec![0x12, 0x05];
        serialized.extend_from_slice(&point);
        let key = VerifierKey::parse(&serialized).unwrap();
        let encoded = key.uncompressed();
        assert_eq!(encoded.len(), 67);
        assert_eq!(&encoded[..2], &[0x12, 0x05]);
        assert_eq!(&encoded[2..], &point[..]);
    }

    #[test]
    fn compressed_p256_decompresses() {
        let mut secret = [0u8; 32];
        secret[31] = 11;
        let signing = p256::ecdsa::SigningKey::from_slice(&secret).unwrap();
        let compressed = signing.verifying_key().to_encoded_point(true);
        let key = VerifierKey::parse(compressed.as_bytes()).unwrap();
        assert_eq!(
            key.uncompressed(),
            signing.verifying_key().to_encoded_point(false).as_bytes()
        );
    }

    #[test]
    fn unknown_label_is_rejected() {
        let err = VerifierKey::parse(&[0x12, 0x07, 0x04, 0x00]).unwrap_err();
        assert!(matches!(err, RelayError::UnknownCurve(_)));
    }

    #[test]
    fn compressed_sm2_cannot_decompress() {
        let mut serialized = vec![0x13, 20, 0x02];
        serialized.extend_from_slice(&[0u8; 32]);
        let err = VerifierKey::parse(&serialized).unwrap_err();
        assert!(matches!(err, RelayError::UnknownCurve(_)));
    }

    #[test]
    fn bookkeeper_order_is_input_independent() {
        let a = VerifierKey::parse(&p256_point(3)).unwrap();
        let b = VerifierKey::parse(&p256_point(5)).unwrap();
        let c = {
            let mut serialized = vec![0x12, 0x05];
            serialized.extend_from_slice(&k256_point(3));
            VerifierKey::parse(&serialized).unwrap()
        };
        let forward = encode_bookkeepers(&[a.clone(), b.clone(), c.clone()]);
        let backward = encode_bookkeepers(&[c, b, a]);
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 65 + 65 + 67);
    }

    // P-256 group order, big-endian.
    const ORDER: [u8; 32] = [
        0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xbc, 0xe6, 0xfa, 0xad, 0xa7, 0x17, 0x9e, 0x84, 0xf3, 0xb9, 0xca, 0xc2,
        0xfc, 0x63, 0x25, 0x51,
    ];

    #[test]
    fn low_s_signature_keeps_v_27() {
        let mut rs = [0u8; 64];
        rs[31] = 1; // r = 1
        rs[63] = 1; // s = 1
        let out = eth_compatible(&rs).unwrap();
        assert_eq!(&out[..64], &rs[..]);
        assert_eq!(out[64], 27);
    }

    #[test]
    fn high_s_signature_is_flipped_to_v_28() {
        let mut rs = [0u8; 64];
        rs[31] = 1; // r = 1
        // s = n - 1, the highest valid scalar.
        let mut s = ORDER;
        s[31] -= 1;
        rs[32..].copy_from_slice(&s);

        let out = eth_compatible(&rs).unwrap();
        // n - (n - 1) = 1
        assert_eq!(out[32..64], {
            let mut expect = [0u8; 32];
            expect[31] = 1;
            expect
        });
        assert_eq!(out[64], 28);
    }

    #[test]
    fn scheme_prefixed_signature_is_accepted() {
        let mut sig = [0u8; 65];
        sig[0] = 0x01; // scheme byte
        sig[32] = 1; // r = 1
        sig[64] = 1; // s = 1
        let out = eth_compatible(&sig).unwrap();
        assert_eq!(out[64], 27);
    }
}
