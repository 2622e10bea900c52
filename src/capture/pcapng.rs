//! Minimal pcapng writer: one section, one Ethernet interface, decryption
//! secrets blocks carrying the TLS key log, and enhanced packet blocks.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::{CaptureSink, CapturedFrame};

const BLOCK_SHB: u32 = 0x0a0d_0d0a;
const BLOCK_IDB: u32 = 0x0000_0001;
const BLOCK_EPB: u32 = 0x0000_0006;
const BLOCK_DSB: u32 = 0x0000_000a;
const BYTE_ORDER_MAGIC: u32 = 0x1a2b_3c4d;
const SECRETS_TYPE_TLS_KEYLOG: u32 = 0x544c_534b;
const LINKTYPE_ETHERNET: u16 = 1;
const SNAPLEN: u32 = 65535;

/// Pcapng file sink.
pub struct PcapngWriter<W: Write + Send = BufWriter<File>> {
    out: Mutex<W>,
}

impl PcapngWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write + Send> PcapngWriter<W> {
    /// Wrap `out`, writing the section header and interface description.
    pub fn new(mut out: W) -> io::Result<Self> {
        write_block(&mut out, BLOCK_SHB, |body| {
            body.extend_from_slice(&BYTE_ORDER_MAGIC.to_le_bytes());
            body.extend_from_slice(&1u16.to_le_bytes());
            body.extend_from_slice(&0u16.to_le_bytes());
            body.extend_from_slice(&(-1i64).to_le_bytes());
        })?;
        write_block(&mut out, BLOCK_IDB, |body| {
            body.extend_from_slice(&LINKTYPE_ETHERNET.to_le_bytes());
            body.extend_from_slice(&0u16.to_le_bytes());
            body.extend_from_slice(&SNAPLEN.to_le_bytes());
        })?;
        Ok(Self {
            out: Mutex::new(out),
        })
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> CaptureSink for PcapngWriter<W> {
    fn write(&self, frame: &CapturedFrame) -> io::Result<usize> {
        // default if_tsresol: microseconds
        let ts = frame.timestamp_ns / 1_000;
        let mut out = self.out.lock();
        write_block(&mut *out, BLOCK_EPB, |body| {
            body.extend_from_slice(&0u32.to_le_bytes());
            body.extend_from_slice(&((ts >> 32) as u32).to_le_bytes());
            body.extend_from_slice(&(ts as u32).to_le_bytes());
            body.extend_from_slice(&(frame.data.len() as u32).to_le_bytes());
            body.extend_from_slice(&frame.len.max(frame.data.len() as u32).to_le_bytes());
            body.extend_from_slice(&frame.data);
            pad(body);
        })?;
        Ok(frame.data.len())
    }

    fn write_session_key(&self, keylog: &[u8]) -> io::Result<()> {
        let mut out = self.out.lock();
        write_block(&mut *out, BLOCK_DSB, |body| {
            body.extend_from_slice(&SECRETS_TYPE_TLS_KEYLOG.to_le_bytes());
            body.extend_from_slice(&(keylog.len() as u32).to_le_bytes());
            body.extend_from_slice(keylog);
            pad(body);
        })
    }

    fn flush(&self) -> io::Result<()> {
        self.out.lock().flush()
    }
}

fn pad(body: &mut Vec<u8>) {
    while body.len() % 4 != 0 {
        body.push(0);
    }
}

fn write_block<W: Write + ?Sized>(
    out: &mut W,
    block_type: u32,
    fill: impl FnOnce(&mut Vec<u8>),
) -> io::Result<()> {
    let mut body = Vec::new();
    fill(&mut body);
    let total = (12 + body.len()) as u32;

    out.write_all(&block_type.to_le_bytes())?;
    out.write_all(&total.to_le_bytes())?;
    out.write_all(&body)?;
    out.write_all(&total.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn header_blocks() {
        let bytes = PcapngWriter::new(Vec::new()).unwrap().into_inner();
        assert_eq!(read_u32(&bytes, 0), BLOCK_SHB);
        assert_eq!(read_u32(&bytes, 4), 28);
        assert_eq!(read_u32(&bytes, 8), BYTE_ORDER_MAGIC);
        assert_eq!(read_u32(&bytes, 28), BLOCK_IDB);
        assert_eq!(read_u32(&bytes, 32), 20);
        assert_eq!(bytes.len(), 48);
    }

    #[test]
    fn secrets_and_packets_are_padded() {
        let writer = PcapngWriter::new(Vec::new()).unwrap();
        writer.write_session_key(b"CLIENT_RANDOM a b\n").unwrap();
        writer
            .write(&CapturedFrame {
                timestamp_ns: 3_000_000,
                ifindex: 2,
                len: 5,
                data: vec![1, 2, 3, 4, 5],
            })
            .unwrap();
        let bytes = writer.into_inner();

        let dsb = 48;
        assert_eq!(read_u32(&bytes, dsb), BLOCK_DSB);
        // 12 framing + 8 header + 18 secrets padded to 20
        assert_eq!(read_u32(&bytes, dsb + 4), 40);
        assert_eq!(read_u32(&bytes, dsb + 8), SECRETS_TYPE_TLS_KEYLOG);
        assert_eq!(read_u32(&bytes, dsb + 12), 18);

        let epb = dsb + 40;
        assert_eq!(read_u32(&bytes, epb), BLOCK_EPB);
        // 12 framing + 20 header + 5 data padded to 8
        assert_eq!(read_u32(&bytes, epb + 4), 40);
        assert_eq!(read_u32(&bytes, epb + 16), 3_000);
        assert_eq!(read_u32(&bytes, epb + 20), 5);
        assert_eq!(bytes.len(), epb + 40);
    }
}
