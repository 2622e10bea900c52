//! TLS 1.3 HKDF-Expand-Label and key-log labels.

use ring::hkdf::{self, KeyType, Prk, HKDF_SHA256, HKDF_SHA384};

use crate::error::DeriveError;

pub const TLS_AES_128_GCM_SHA256: u16 = 0x1301;
pub const TLS_AES_256_GCM_SHA384: u16 = 0x1302;
pub const TLS_CHACHA20_POLY1305_SHA256: u16 = 0x1303;

// RFC 8446 section 7.1
pub const CLIENT_HANDSHAKE_TRAFFIC_LABEL: &str = "c hs traffic";
pub const SERVER_HANDSHAKE_TRAFFIC_LABEL: &str = "s hs traffic";
pub const CLIENT_APPLICATION_TRAFFIC_LABEL: &str = "c ap traffic";
pub const SERVER_APPLICATION_TRAFFIC_LABEL: &str = "s ap traffic";
pub const EXPORTER_LABEL: &str = "exp master";

// NSS key log format
pub const KEY_LOG_LABEL_TLS12: &str = "CLIENT_RANDOM";
pub const KEY_LOG_LABEL_CLIENT_HANDSHAKE: &str = "CLIENT_HANDSHAKE_TRAFFIC_SECRET";
pub const KEY_LOG_LABEL_SERVER_HANDSHAKE: &str = "SERVER_HANDSHAKE_TRAFFIC_SECRET";
pub const KEY_LOG_LABEL_CLIENT_TRAFFIC: &str = "CLIENT_TRAFFIC_SECRET_0";
pub const KEY_LOG_LABEL_SERVER_TRAFFIC: &str = "SERVER_TRAFFIC_SECRET_0";
pub const KEY_LOG_LABEL_EXPORTER_SECRET: &str = "EXPORTER_SECRET";

/// Transcript hash of a TLS 1.3 cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
        }
    }

    fn hkdf_algorithm(&self) -> hkdf::Algorithm {
        match self {
            HashAlgorithm::Sha256 => HKDF_SHA256,
            HashAlgorithm::Sha384 => HKDF_SHA384,
        }
    }

    /// Select the hash from a TLS 1.3 cipher suite id.
    pub fn for_cipher_suite(suite: u16) -> Option<Self> {
        match suite {
            TLS_AES_128_GCM_SHA256 | TLS_CHACHA20_POLY1305_SHA256 => Some(HashAlgorithm::Sha256),
            TLS_AES_256_GCM_SHA384 => Some(HashAlgorithm::Sha384),
            _ => None,
        }
    }
}

struct ExpandLen(usize);

impl KeyType for ExpandLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-Expand-Label(Secret, Label, Context, Length).
///
/// ```text
/// struct {
///     uint16 length = Length;
///     opaque label<7..255> = "tls13 " + Label;
///     opaque context<0..255> = Context;
/// } HkdfLabel;
/// ```
pub fn expand_label(
    secret: &[u8],
    label: &str,
    context: &[u8],
    length: usize,
    hash: HashAlgorithm,
) -> Result<Vec<u8>, DeriveError> {
    let full_label_len = 6 + label.len();
    if full_label_len > u8::MAX as usize || context.len() > u8::MAX as usize {
        return Err(DeriveError::Expand);
    }

    let mut hkdf_label = Vec::with_capacity(2 + 1 + full_label_len + 1 + context.len());
    hkdf_label.extend_from_slice(&(length as u16).to_be_bytes());
    hkdf_label.push(full_label_len as u8);
    hkdf_label.extend_from_slice(b"tls13 ");
    hkdf_label.extend_from_slice(label.as_bytes());
    hkdf_label.push(context.len() as u8);
    hkdf_label.extend_from_slice(context);

    // the captured secret is already the output of HKDF-Extract
    let prk = Prk::new_less_safe(hash.hkdf_algorithm(), secret);
    let info = [hkdf_label.as_slice()];
    let okm = prk
        .expand(&info, ExpandLen(length))
        .map_err(|_| DeriveError::Expand)?;

    let mut out = vec![0u8; length];
    okm.fill(&mut out).map_err(|_| DeriveError::Expand)?;
    Ok(out)
}
