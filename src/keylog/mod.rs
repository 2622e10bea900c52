//! TLS key schedule derivation and key-log persistence.
//!
//! A captured master secret event is turned into the lines of the NSS key
//! log format (`<LABEL> <client_random> <secret>`), one group of lines per
//! TLS session. [`SecretStore`] makes sure each client random is written at
//! most once.

use crate::error::DeriveError;
use crate::event::{MasterSecretBsslEvent, MasterSecretEvent, TlsVersion};

pub mod hkdf;
pub mod store;

pub use hkdf::HashAlgorithm;
pub use store::{Persisted, SecretStore};

use hkdf::{
    expand_label, CLIENT_HANDSHAKE_TRAFFIC_LABEL, KEY_LOG_LABEL_CLIENT_HANDSHAKE,
    KEY_LOG_LABEL_CLIENT_TRAFFIC, KEY_LOG_LABEL_EXPORTER_SECRET, KEY_LOG_LABEL_SERVER_HANDSHAKE,
    KEY_LOG_LABEL_SERVER_TRAFFIC, KEY_LOG_LABEL_TLS12, SERVER_HANDSHAKE_TRAFFIC_LABEL,
};

/// Key-log lines derived for one TLS session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLogRecord {
    pub client_random: Vec<u8>,
    pub version: TlsVersion,
    pub lines: String,
}

impl KeyLogRecord {
    fn new(client_random: &[u8], version: TlsVersion) -> Self {
        Self {
            client_random: client_random.to_vec(),
            version,
            lines: String::new(),
        }
    }

    fn push(&mut self, label: &str, secret: &[u8]) {
        self.lines.push_str(&format!(
            "{} {} {}\n",
            label,
            hex::encode(&self.client_random),
            hex::encode(secret)
        ));
    }

    /// Hex encoded client random, the deduplication key.
    pub fn key(&self) -> String {
        hex::encode(&self.client_random)
    }

    pub fn line_count(&self) -> usize {
        self.lines.lines().count()
    }
}

/// Derive key-log lines from an OpenSSL master secret event.
///
/// TLS 1.3 handshake traffic secrets are expanded from the captured
/// handshake secret; the application and exporter secrets are already final.
pub fn derive_openssl(event: &MasterSecretEvent) -> Result<KeyLogRecord, DeriveError> {
    let mut record = KeyLogRecord::new(&event.client_random, event.version);

    match event.version {
        TlsVersion::Tls13 => {
            let suite = (event.cipher_id & 0x0000_ffff) as u16;
            let hash = HashAlgorithm::for_cipher_suite(suite)
                .ok_or(DeriveError::UnsupportedCipherSuite(event.cipher_id))?;
            let length = hash.output_len();

            let secret = &event.handshake_secret[..length];
            let transcript = &event.handshake_traffic_hash[..length];
            let client_handshake =
                expand_label(secret, CLIENT_HANDSHAKE_TRAFFIC_LABEL, transcript, length, hash)?;
            let server_handshake =
                expand_label(secret, SERVER_HANDSHAKE_TRAFFIC_LABEL, transcript, length, hash)?;

            record.push(KEY_LOG_LABEL_CLIENT_HANDSHAKE, &client_handshake);
            record.push(KEY_LOG_LABEL_SERVER_HANDSHAKE, &server_handshake);
            record.push(
                KEY_LOG_LABEL_CLIENT_TRAFFIC,
                &event.client_app_traffic_secret[..length],
            );
            record.push(
                KEY_LOG_LABEL_SERVER_TRAFFIC,
                &event.server_app_traffic_secret[..length],
            );
            record.push(
                KEY_LOG_LABEL_EXPORTER_SECRET,
                &event.exporter_master_secret[..length],
            );
        }
        TlsVersion::Tls12 | TlsVersion::Other(_) => {
            record.push(KEY_LOG_LABEL_TLS12, &event.master_key);
        }
    }

    Ok(record)
}

/// Derive key-log lines from a BoringSSL master secret event.
///
/// Returns `Ok(None)` when every guarded secret is still zero: the library
/// had not finished its key schedule when the probe fired.
pub fn derive_boringssl(
    event: &MasterSecretBsslEvent,
) -> Result<Option<KeyLogRecord>, DeriveError> {
    let length = event.hash_len as usize;
    if length > event.secret.len() {
        return Err(DeriveError::InvalidLength(length));
    }

    let mut record = KeyLogRecord::new(&event.client_random, event.version);

    match event.version {
        TlsVersion::Tls12 => {
            if is_null_secret(&event.secret[..length]) {
                return Ok(None);
            }
            record.push(KEY_LOG_LABEL_TLS12, &event.secret[..length]);
        }
        TlsVersion::Tls13 | TlsVersion::Other(_) => {
            let secrets = [
                (KEY_LOG_LABEL_CLIENT_HANDSHAKE, &event.client_handshake_secret[..length]),
                (KEY_LOG_LABEL_CLIENT_TRAFFIC, &event.client_traffic_secret_0[..length]),
                (KEY_LOG_LABEL_SERVER_HANDSHAKE, &event.server_handshake_secret[..length]),
                (KEY_LOG_LABEL_SERVER_TRAFFIC, &event.server_traffic_secret_0[..length]),
                (KEY_LOG_LABEL_EXPORTER_SECRET, &event.exporter_secret[..length]),
            ];
            if secrets.iter().all(|(_, secret)| is_null_secret(secret)) {
                return Ok(None);
            }
            for (label, secret) in secrets {
                record.push(label, secret);
            }
        }
    }

    Ok(Some(record))
}

fn is_null_secret(secret: &[u8]) -> bool {
    secret.iter().all(|&b| b == 0)
}
