//! Frames mirrored by the traffic-control classifiers.

use bytes::Buf;

use super::{c_str, ensure_len, TASK_COMM_LEN};
use crate::error::DecodeError;

#[derive(Debug, Clone, Default)]
pub struct TcSkbEvent {
    /// Kernel monotonic timestamp in nanoseconds
    pub ts: u64,
    pub pid: u32,
    pub comm: String,
    /// Length of the frame on the wire
    pub len: u32,
    pub ifindex: u32,
    pub payload: Vec<u8>,
}

impl TcSkbEvent {
    /// Fixed header preceding the frame bytes.
    pub const HEADER_SIZE: usize = 8 + 4 + TASK_COMM_LEN + 4 + 4;

    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        ensure_len("tc_skb", raw, Self::HEADER_SIZE)?;
        let mut buf = raw;

        let ts = buf.get_u64_le();
        let pid = buf.get_u32_le();
        let mut comm = [0u8; TASK_COMM_LEN];
        buf.copy_to_slice(&mut comm);
        let len = buf.get_u32_le();
        let ifindex = buf.get_u32_le();

        // perf records are padded, the declared length wins
        let take = (len as usize).min(buf.remaining());
        let payload = buf[..take].to_vec();

        Ok(Self {
            ts,
            pid,
            comm: c_str(&comm),
            len,
            ifindex,
            payload,
        })
    }
}
