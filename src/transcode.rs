//! Chunk transcoding between raw payload bytes and DNS-label-safe text.
//!
//! Three real schemes plus a raw pass-through kept for compatibility
//! (not label-safe). Decode errors are swallowed at this layer: a
//! malformed chunk yields an empty vec and is treated upstream as "no
//! payload this query".

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Payload text encoding embedded in DNS labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Unpadded base32, emitted lowercase, decoded case-insensitively.
    /// The only scheme that is both label-safe and case-proof, which
    /// matters when resolvers randomize QNAME case (0x20 encoding).
    Base32,
    /// Unpadded URL-safe base64. Denser than base32 but case-sensitive.
    Base64,
    /// Hex. 2x expansion, maximally robust.
    #[default]
    Hex,
    /// No encoding; bytes pass through as-is. Not DNS-label-safe.
    Raw,
}

impl Encoding {
    /// Encode payload bytes as label-safe text.
    pub fn encode(&self, data: &[u8]) -> String {
        match self {
            Encoding::Base32 => BASE32_NOPAD.encode(data).to_ascii_lowercase(),
            Encoding::Base64 => URL_SAFE_NO_PAD.encode(data),
            Encoding::Hex => hex::encode(data),
            Encoding::Raw => String::from_utf8_lossy(data).into_owned(),
        }
    }

    /// Decode text back to payload bytes. Malformed input yields an
    /// empty vec rather than an error.
    pub fn decode(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Base32 => BASE32_NOPAD
                .decode(text.to_ascii_uppercase().as_bytes())
                .unwrap_or_default(),
            Encoding::Base64 => URL_SAFE_NO_PAD.decode(text).unwrap_or_default(),
            Encoding::Hex => hex::decode(text).unwrap_or_default(),
            Encoding::Raw => text.as_bytes().to_vec(),
        }
    }

    /// Worst-case encoded length for `n` payload bytes, used to size
    /// chunks against the QNAME budget.
    pub fn encoded_len(&self, n: usize) -> usize {
        match self {
            Encoding::Base32 => (n * 8 + 4) / 5,
            Encoding::Base64 => (n * 4 + 2) / 3,
            Encoding::Hex => n * 2,
            Encoding::Raw => n,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Base32 => "base32",
            Encoding::Base64 => "base64",
            Encoding::Hex => "hex",
            Encoding::Raw => "raw",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = std::convert::Infallible;

    /// Unknown scheme names map to [`Encoding::Raw`] (pass-through),
    /// preserved for compatibility.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "base32" => Encoding::Base32,
            "base64" | "base64url" => Encoding::Base64,
            "hex" => Encoding::Hex,
            _ => Encoding::Raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMES: [Encoding; 3] = [Encoding::Base32, Encoding::Base64, Encoding::Hex];

    #[test]
    fn roundtrip_all_schemes() {
        let samples: [&[u8]; 5] = [
            b"",
            b"h",
            b"hello",
            &[0x00, 0xff, 0x7f, 0x80, 0x01],
            &[0xde; 100],
        ];
        for scheme in SCHEMES {
            for payload in samples {
                let encoded = scheme.encode(payload);
                assert_eq!(
                    scheme.decode(&encoded),
                    payload,
                    "roundtrip failed for {scheme}"
                );
            }
        }
    }

    #[test]
    fn hex_matches_known_vector() {
        assert_eq!(Encoding::Hex.encode(b"hello"), "68656c6c6f");
        assert_eq!(Encoding::Hex.decode("68656c6c6f"), b"hello");
    }

    #[test]
    fn base32_decode_is_case_insensitive() {
        let encoded = Encoding::Base32.encode(b"hello");
        assert_eq!(encoded, encoded.to_ascii_lowercase());
        assert_eq!(Encoding::Base32.decode(&encoded.to_ascii_uppercase()), b"hello");
    }

    #[test]
    fn malformed_input_decodes_to_empty() {
        assert!(Encoding::Hex.decode("zzz").is_empty());
        assert!(Encoding::Base32.decode("0189").is_empty());
        assert!(Encoding::Base64.decode("!!!").is_empty());
    }

    #[test]
    fn unknown_scheme_name_is_raw_passthrough() {
        let scheme: Encoding = "rot13".parse().unwrap();
        assert_eq!(scheme, Encoding::Raw);
        assert_eq!(scheme.encode(b"plain"), "plain");
        assert_eq!(scheme.decode("plain"), b"plain");
    }

    #[test]
    fn encoded_len_is_an_upper_bound() {
        for scheme in SCHEMES {
            for n in 0..64 {
                let payload = vec![0xa5u8; n];
                assert!(scheme.encode(&payload).len() <= scheme.encoded_len(n));
            }
        }
    }
}
