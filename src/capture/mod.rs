//! Link-layer capture for the traffic-mirroring mode.
//!
//! Frames mirrored by the TC classifiers and the key-log bytes of accepted
//! sessions are buffered in memory and handed to a [`CaptureSink`] when the
//! probe closes: session keys first, then frames.

use parking_lot::Mutex;
use std::io;

pub mod pcapng;

pub use pcapng::PcapngWriter;

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    /// Wall clock timestamp, nanoseconds since the epoch
    pub timestamp_ns: u64,
    pub ifindex: u32,
    /// Original length on the wire
    pub len: u32,
    pub data: Vec<u8>,
}

/// Destination for captured frames and session key material.
pub trait CaptureSink: Send + Sync {
    /// Write one frame, returning the number of bytes written.
    fn write(&self, frame: &CapturedFrame) -> io::Result<usize>;

    /// Write key-log formatted session keys.
    fn write_session_key(&self, keylog: &[u8]) -> io::Result<()>;

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Frames and session keys waiting to be written.
#[derive(Default)]
pub struct FrameBuffer {
    frames: Mutex<Vec<CapturedFrame>>,
    session_keys: Mutex<Vec<u8>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::with_capacity(1024)),
            session_keys: Mutex::new(Vec::new()),
        }
    }

    pub fn push_frame(&self, frame: CapturedFrame) {
        self.frames.lock().push(frame);
    }

    pub fn push_session_key(&self, keylog: &[u8]) {
        self.session_keys.lock().extend_from_slice(keylog);
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Move everything buffered so far into `sink`. Returns the number of
    /// frames written.
    pub fn flush_into(&self, sink: &dyn CaptureSink) -> io::Result<usize> {
        // take the buffers first so no lock is held while writing
        let keys = std::mem::take(&mut *self.session_keys.lock());
        let frames = std::mem::take(&mut *self.frames.lock());

        if !keys.is_empty() {
            sink.write_session_key(&keys)?;
        }
        for frame in &frames {
            sink.write(frame)?;
        }
        sink.flush()?;
        Ok(frames.len())
    }
}

/// Monotonic clock reading and derived boot time, both in nanoseconds.
///
/// Kernel timestamps are `CLOCK_MONOTONIC`; adding the boot time gives wall
/// clock time. Suspend periods are not accounted for.
#[derive(Debug, Clone, Copy)]
pub struct BootClock {
    pub start_time: u64,
    pub boot_time: u64,
}

impl BootClock {
    pub fn now() -> io::Result<Self> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec.
        if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let start_time = ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64;
        let wall = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .as_nanos() as u64;
        Ok(Self {
            start_time,
            boot_time: wall.saturating_sub(start_time),
        })
    }

    /// Convert a kernel monotonic timestamp into wall clock nanoseconds.
    pub fn wall_time(&self, monotonic_ns: u64) -> u64 {
        self.boot_time + monotonic_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl CaptureSink for Recorder {
        fn write(&self, frame: &CapturedFrame) -> io::Result<usize> {
            self.calls.lock().push(format!("frame:{}", frame.data.len()));
            Ok(frame.data.len())
        }

        fn write_session_key(&self, keylog: &[u8]) -> io::Result<()> {
            self.calls
                .lock()
                .push(format!("keys:{}", String::from_utf8_lossy(keylog).lines().count()));
            Ok(())
        }
    }

    fn frame(n: usize) -> CapturedFrame {
        CapturedFrame {
            timestamp_ns: 1,
            ifindex: 1,
            len: n as u32,
            data: vec![0; n],
        }
    }

    #[test]
    fn session_keys_are_written_before_frames() {
        let buffer = FrameBuffer::new();
        buffer.push_frame(frame(60));
        buffer.push_session_key(b"CLIENT_RANDOM aa bb\n");
        buffer.push_frame(frame(90));
        buffer.push_session_key(b"CLIENT_RANDOM cc dd\n");

        let sink = Recorder::default();
        assert_eq!(buffer.flush_into(&sink).unwrap(), 2);
        assert_eq!(
            *sink.calls.lock(),
            vec!["keys:2".to_string(), "frame:60".to_string(), "frame:90".to_string()]
        );
        assert_eq!(buffer.frame_count(), 0);
    }

    #[test]
    fn empty_buffer_writes_nothing() {
        let sink = Recorder::default();
        assert_eq!(FrameBuffer::new().flush_into(&sink).unwrap(), 0);
        assert!(sink.calls.lock().is_empty());
    }

    #[test]
    fn boot_clock_maps_into_wall_time() {
        let clock = BootClock::now().unwrap();
        let wall = clock.wall_time(clock.start_time);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        assert!(now >= wall);
        assert!(now - wall < 5_000_000_000);
    }
}
