//! Records produced by the TLS probe.

use bytes::Buf;
use std::fmt;

use super::{c_str, ensure_len, TASK_COMM_LEN};
use crate::error::DecodeError;

pub const MAX_DATA_SIZE_OPENSSL: usize = 1024 * 4;
pub const SSL3_RANDOM_SIZE: usize = 32;
pub const MASTER_SECRET_MAX_LEN: usize = 48;
pub const EVP_MAX_MD_SIZE: usize = 64;

const TLS1_2_VERSION: i32 = 0x0303;
const TLS1_3_VERSION: i32 = 0x0304;

/// Protocol version reported by the traced library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Tls12,
    Tls13,
    Other(i32),
}

impl From<i32> for TlsVersion {
    fn from(raw: i32) -> Self {
        match raw {
            TLS1_2_VERSION => TlsVersion::Tls12,
            TLS1_3_VERSION => TlsVersion::Tls13,
            other => TlsVersion::Other(other),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsVersion::Tls12 => f.write_str("TLS1_2_VERSION"),
            TlsVersion::Tls13 => f.write_str("TLS1_3_VERSION"),
            TlsVersion::Other(v) => write!(f, "TLS_VERSION_UNKNOWN_{v:#x}"),
        }
    }
}

/// Direction of an `SSL_read`/`SSL_write` capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct SslDataEvent {
    pub direction: DataDirection,
    pub timestamp: u64,
    pub pid: u32,
    pub tid: u32,
    pub data: Vec<u8>,
    pub comm: String,
    pub fd: u32,
    pub version: TlsVersion,
}

impl SslDataEvent {
    pub const SIZE: usize = 8 + 8 + 4 + 4 + MAX_DATA_SIZE_OPENSSL + 4 + TASK_COMM_LEN + 4 + 4;

    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        ensure_len("ssl_data", raw, Self::SIZE)?;
        let mut buf = raw;

        let data_type = buf.get_i64_le();
        let timestamp = buf.get_u64_le();
        let pid = buf.get_u32_le();
        let tid = buf.get_u32_le();
        let mut data = vec![0u8; MAX_DATA_SIZE_OPENSSL];
        buf.copy_to_slice(&mut data);
        let data_len = buf.get_i32_le();
        let mut comm = [0u8; TASK_COMM_LEN];
        buf.copy_to_slice(&mut comm);
        let fd = buf.get_u32_le();
        let version = buf.get_i32_le();

        data.truncate(data_len.clamp(0, MAX_DATA_SIZE_OPENSSL as i32) as usize);

        Ok(Self {
            direction: if data_type == 0 {
                DataDirection::Read
            } else {
                DataDirection::Write
            },
            timestamp,
            pid,
            tid,
            data,
            comm: c_str(&comm),
            fd,
            version: version.into(),
        })
    }
}

impl fmt::Display for SslDataEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.direction {
            DataDirection::Read => "Received",
            DataDirection::Write => "Sent",
        };
        write!(
            f,
            "PID:{}, Comm:{}, TID:{}, {}, {} {} bytes:\n{}",
            self.pid,
            self.comm,
            self.tid,
            self.version,
            verb,
            self.data.len(),
            String::from_utf8_lossy(&self.data)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnDataEvent {
    pub pid: u32,
    pub tid: u32,
    pub fd: u32,
    /// Raw `sockaddr` bytes
    pub sa: [u8; 16],
    pub comm: String,
}

impl ConnDataEvent {
    pub const SIZE: usize = 4 + 4 + 4 + 16 + TASK_COMM_LEN;

    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        ensure_len("connect", raw, Self::SIZE)?;
        let mut buf = raw;

        let pid = buf.get_u32_le();
        let tid = buf.get_u32_le();
        let fd = buf.get_u32_le();
        let mut sa = [0u8; 16];
        buf.copy_to_slice(&mut sa);
        let mut comm = [0u8; TASK_COMM_LEN];
        buf.copy_to_slice(&mut comm);

        Ok(Self {
            pid,
            tid,
            fd,
            sa,
            comm: c_str(&comm),
        })
    }
}

/// Master secret captured from an OpenSSL `SSL` object.
#[derive(Debug, Clone)]
pub struct MasterSecretEvent {
    pub version: TlsVersion,
    pub client_random: [u8; SSL3_RANDOM_SIZE],
    pub master_key: [u8; MASTER_SECRET_MAX_LEN],

    // TLS 1.3
    pub cipher_id: u32,
    pub handshake_secret: [u8; EVP_MAX_MD_SIZE],
    pub handshake_traffic_hash: [u8; EVP_MAX_MD_SIZE],
    pub client_app_traffic_secret: [u8; EVP_MAX_MD_SIZE],
    pub server_app_traffic_secret: [u8; EVP_MAX_MD_SIZE],
    pub exporter_master_secret: [u8; EVP_MAX_MD_SIZE],
}

impl MasterSecretEvent {
    pub const SIZE: usize =
        4 + SSL3_RANDOM_SIZE + MASTER_SECRET_MAX_LEN + 4 + 5 * EVP_MAX_MD_SIZE;

    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        ensure_len("master_secret", raw, Self::SIZE)?;
        let mut buf = raw;
        let mut event = Self::default();

        event.version = buf.get_i32_le().into();
        buf.copy_to_slice(&mut event.client_random);
        buf.copy_to_slice(&mut event.master_key);
        event.cipher_id = buf.get_u32_le();
        buf.copy_to_slice(&mut event.handshake_secret);
        buf.copy_to_slice(&mut event.handshake_traffic_hash);
        buf.copy_to_slice(&mut event.client_app_traffic_secret);
        buf.copy_to_slice(&mut event.server_app_traffic_secret);
        buf.copy_to_slice(&mut event.exporter_master_secret);

        Ok(event)
    }
}

impl Default for MasterSecretEvent {
    fn default() -> Self {
        Self {
            version: TlsVersion::Tls12,
            client_random: [0; SSL3_RANDOM_SIZE],
            master_key: [0; MASTER_SECRET_MAX_LEN],
            cipher_id: 0,
            handshake_secret: [0; EVP_MAX_MD_SIZE],
            handshake_traffic_hash: [0; EVP_MAX_MD_SIZE],
            client_app_traffic_secret: [0; EVP_MAX_MD_SIZE],
            server_app_traffic_secret: [0; EVP_MAX_MD_SIZE],
            exporter_master_secret: [0; EVP_MAX_MD_SIZE],
        }
    }
}

/// Secrets captured from a BoringSSL `SSL` object. Every TLS 1.3 traffic
/// secret is already materialized by the library.
#[derive(Debug, Clone)]
pub struct MasterSecretBsslEvent {
    pub version: TlsVersion,
    pub client_random: [u8; SSL3_RANDOM_SIZE],

    /// Valid length of every secret buffer below
    pub hash_len: u8,
    /// TLS 1.2 master secret
    pub secret: [u8; EVP_MAX_MD_SIZE],

    // TLS 1.3
    pub early_traffic_secret: [u8; EVP_MAX_MD_SIZE],
    pub client_handshake_secret: [u8; EVP_MAX_MD_SIZE],
    pub server_handshake_secret: [u8; EVP_MAX_MD_SIZE],
    pub client_traffic_secret_0: [u8; EVP_MAX_MD_SIZE],
    pub server_traffic_secret_0: [u8; EVP_MAX_MD_SIZE],
    pub exporter_secret: [u8; EVP_MAX_MD_SIZE],
}

impl MasterSecretBsslEvent {
    pub const SIZE: usize = 4 + SSL3_RANDOM_SIZE + 1 + 7 * EVP_MAX_MD_SIZE;

    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        ensure_len("master_secret_bssl", raw, Self::SIZE)?;
        let mut buf = raw;
        let mut event = Self::default();

        event.version = buf.get_i32_le().into();
        buf.copy_to_slice(&mut event.client_random);
        event.hash_len = buf.get_u8();
        buf.copy_to_slice(&mut event.secret);
        buf.copy_to_slice(&mut event.early_traffic_secret);
        buf.copy_to_slice(&mut event.client_handshake_secret);
        buf.copy_to_slice(&mut event.server_handshake_secret);
        buf.copy_to_slice(&mut event.client_traffic_secret_0);
        buf.copy_to_slice(&mut event.server_traffic_secret_0);
        buf.copy_to_slice(&mut event.exporter_secret);

        Ok(event)
    }
}

impl Default for MasterSecretBsslEvent {
    fn default() -> Self {
        Self {
            version: TlsVersion::Tls13,
            client_random: [0; SSL3_RANDOM_SIZE],
            hash_len: 0,
            secret: [0; EVP_MAX_MD_SIZE],
            early_traffic_secret: [0; EVP_MAX_MD_SIZE],
            client_handshake_secret: [0; EVP_MAX_MD_SIZE],
            server_handshake_secret: [0; EVP_MAX_MD_SIZE],
            client_traffic_secret_0: [0; EVP_MAX_MD_SIZE],
            server_traffic_secret_0: [0; EVP_MAX_MD_SIZE],
            exporter_secret: [0; EVP_MAX_MD_SIZE],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_tags() {
        assert_eq!(TlsVersion::from(0x0303), TlsVersion::Tls12);
        assert_eq!(TlsVersion::from(0x0304), TlsVersion::Tls13);
        assert_eq!(TlsVersion::from(0x0302), TlsVersion::Other(0x0302));
        assert_eq!(TlsVersion::Tls13.to_string(), "TLS1_3_VERSION");
    }

    #[test]
    fn master_secret_fields_land_in_order() {
        let mut raw = Vec::with_capacity(MasterSecretEvent::SIZE);
        raw.extend_from_slice(&0x0304i32.to_le_bytes());
        raw.extend_from_slice(&[0xaa; SSL3_RANDOM_SIZE]);
        raw.extend_from_slice(&[0xbb; MASTER_SECRET_MAX_LEN]);
        raw.extend_from_slice(&0x0300_1301u32.to_le_bytes());
        for fill in 1..=5u8 {
            raw.extend_from_slice(&[fill; EVP_MAX_MD_SIZE]);
        }

        let event = MasterSecretEvent::decode(&raw).unwrap();
        assert_eq!(event.version, TlsVersion::Tls13);
        assert_eq!(event.client_random, [0xaa; SSL3_RANDOM_SIZE]);
        assert_eq!(event.master_key, [0xbb; MASTER_SECRET_MAX_LEN]);
        assert_eq!(event.cipher_id, 0x0300_1301);
        assert_eq!(event.handshake_secret, [1; EVP_MAX_MD_SIZE]);
        assert_eq!(event.handshake_traffic_hash, [2; EVP_MAX_MD_SIZE]);
        assert_eq!(event.exporter_master_secret, [5; EVP_MAX_MD_SIZE]);
    }

    #[test]
    fn bssl_hash_len_follows_client_random() {
        let mut raw = Vec::with_capacity(MasterSecretBsslEvent::SIZE);
        raw.extend_from_slice(&0x0304i32.to_le_bytes());
        raw.extend_from_slice(&[0x11; SSL3_RANDOM_SIZE]);
        raw.push(48);
        for fill in 1..=7u8 {
            raw.extend_from_slice(&[fill; EVP_MAX_MD_SIZE]);
        }

        let event = MasterSecretBsslEvent::decode(&raw).unwrap();
        assert_eq!(event.hash_len, 48);
        assert_eq!(event.secret, [1; EVP_MAX_MD_SIZE]);
        assert_eq!(event.client_handshake_secret, [3; EVP_MAX_MD_SIZE]);
        assert_eq!(event.exporter_secret, [7; EVP_MAX_MD_SIZE]);
    }

    #[test]
    fn ssl_data_is_cut_to_data_len() {
        let mut raw = vec![0u8; SslDataEvent::SIZE];
        raw[0..8].copy_from_slice(&1i64.to_le_bytes());
        raw[16..20].copy_from_slice(&99u32.to_le_bytes());
        raw[24..29].copy_from_slice(b"hello");
        let len_at = 24 + MAX_DATA_SIZE_OPENSSL;
        raw[len_at..len_at + 4].copy_from_slice(&5i32.to_le_bytes());

        let event = SslDataEvent::decode(&raw).unwrap();
        assert_eq!(event.direction, DataDirection::Write);
        assert_eq!(event.pid, 99);
        assert_eq!(event.data, b"hello");
    }

    #[test]
    fn data_event_display_shows_direction_and_payload() {
        let event = SslDataEvent {
            direction: DataDirection::Read,
            timestamp: 0,
            pid: 7,
            tid: 8,
            data: b"GET / HTTP/1.1".to_vec(),
            comm: "curl".to_string(),
            fd: 3,
            version: TlsVersion::Tls13,
        };
        assert_eq!(
            event.to_string(),
            "PID:7, Comm:curl, TID:8, TLS1_3_VERSION, Received 14 bytes:\nGET / HTTP/1.1"
        );
    }
}
