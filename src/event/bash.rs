//! Shell command events.

use bytes::Buf;
use std::fmt;

use super::{c_str, ensure_len, TASK_COMM_LEN};
use crate::error::DecodeError;

/// Size of the command line buffer captured from `readline`.
pub const MAX_DATA_SIZE_BASH: usize = 256;

#[derive(Debug, Clone)]
pub struct BashEvent {
    pub pid: u32,
    pub uid: u32,
    pub line: String,
    pub retval: u32,
    pub comm: String,
}

impl BashEvent {
    pub const SIZE: usize = 4 + 4 + MAX_DATA_SIZE_BASH + 4 + TASK_COMM_LEN;

    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        ensure_len("bash", raw, Self::SIZE)?;
        let mut buf = raw;

        let pid = buf.get_u32_le();
        let uid = buf.get_u32_le();
        let mut line = [0u8; MAX_DATA_SIZE_BASH];
        buf.copy_to_slice(&mut line);
        let retval = buf.get_u32_le();
        let mut comm = [0u8; TASK_COMM_LEN];
        buf.copy_to_slice(&mut comm);

        Ok(Self {
            pid,
            uid,
            line: c_str(&line),
            retval,
            comm: c_str(&comm),
        })
    }
}

impl fmt::Display for BashEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PID:{}, UID:{}, \tComm:{}, \tRetvalue:{}, \tLine:\n{}",
            self.pid, self.uid, self.comm, self.retval, self.line
        )
    }
}
