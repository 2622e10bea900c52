//! Events emitted by the kernel payload.
//!
//! Every kernel data channel carries exactly one record layout. Raw records
//! are decoded into [`Event`] at the registry boundary, so the rest of the
//! agent only ever matches on a closed set of variants.

use std::fmt;

use crate::error::DecodeError;

pub mod bash;
pub mod skb;
pub mod tls;

pub use bash::BashEvent;
pub use skb::TcSkbEvent;
pub use tls::{
    ConnDataEvent, DataDirection, MasterSecretBsslEvent, MasterSecretEvent, SslDataEvent, TlsVersion,
};

/// Length of the kernel `comm` field.
pub const TASK_COMM_LEN: usize = 16;

/// A decoded kernel record.
#[derive(Debug, Clone)]
pub enum Event {
    /// Shell command line and its return value
    Bash(BashEvent),
    /// Plaintext read from or written to an SSL object
    SslData(SslDataEvent),
    /// Socket connect observed by the TLS probe
    Connect(ConnDataEvent),
    /// OpenSSL master secret material
    MasterSecret(MasterSecretEvent),
    /// BoringSSL master secret material
    MasterSecretBssl(MasterSecretBsslEvent),
    /// Link-layer frame mirrored by the traffic-control classifier
    TcSkb(TcSkbEvent),
}

/// The decoder bound to a kernel data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Bash,
    SslData,
    Connect,
    MasterSecret,
    MasterSecretBssl,
    TcSkb,
}

impl EventKind {
    /// Decode one raw record read from a channel bound to this kind.
    pub fn decode(self, raw: &[u8]) -> Result<Event, DecodeError> {
        Ok(match self {
            EventKind::Bash => Event::Bash(BashEvent::decode(raw)?),
            EventKind::SslData => Event::SslData(SslDataEvent::decode(raw)?),
            EventKind::Connect => Event::Connect(ConnDataEvent::decode(raw)?),
            EventKind::MasterSecret => Event::MasterSecret(MasterSecretEvent::decode(raw)?),
            EventKind::MasterSecretBssl => {
                Event::MasterSecretBssl(MasterSecretBsslEvent::decode(raw)?)
            }
            EventKind::TcSkb => Event::TcSkb(TcSkbEvent::decode(raw)?),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Bash => "bash",
            EventKind::SslData => "ssl_data",
            EventKind::Connect => "connect",
            EventKind::MasterSecret => "master_secret",
            EventKind::MasterSecretBssl => "master_secret_bssl",
            EventKind::TcSkb => "tc_skb",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Bash(_) => EventKind::Bash,
            Event::SslData(_) => EventKind::SslData,
            Event::Connect(_) => EventKind::Connect,
            Event::MasterSecret(_) => EventKind::MasterSecret,
            Event::MasterSecretBssl(_) => EventKind::MasterSecretBssl,
            Event::TcSkb(_) => EventKind::TcSkb,
        }
    }

    /// Process that produced the record.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Event::Bash(e) => Some(e.pid),
            Event::SslData(e) => Some(e.pid),
            Event::Connect(e) => Some(e.pid),
            Event::TcSkb(e) => Some(e.pid),
            Event::MasterSecret(_) | Event::MasterSecretBssl(_) => None,
        }
    }
}

/// Fail with [`DecodeError::Truncated`] unless `raw` holds `expected` bytes.
pub(crate) fn ensure_len(
    kind: &'static str,
    raw: &[u8],
    expected: usize,
) -> Result<(), DecodeError> {
    if raw.len() < expected {
        return Err(DecodeError::Truncated {
            kind,
            expected,
            actual: raw.len(),
        });
    }
    Ok(())
}

/// Interpret a NUL padded kernel buffer as text.
pub(crate) fn c_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_str_stops_at_nul() {
        assert_eq!(c_str(b"curl\0\0garbage"), "curl");
        assert_eq!(c_str(b"no-nul"), "no-nul");
    }

    #[test]
    fn truncated_records_are_rejected() {
        let err = EventKind::MasterSecret.decode(&[0u8; 12]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                kind: "master_secret",
                expected: MasterSecretEvent::SIZE,
                actual: 12,
            }
        );
    }

    #[test]
    fn decoded_event_reports_its_kind() {
        let raw = vec![0u8; ConnDataEvent::SIZE];
        let event = EventKind::Connect.decode(&raw).unwrap();
        assert_eq!(event.kind(), EventKind::Connect);
        assert_eq!(event.pid(), Some(0));
    }
}
