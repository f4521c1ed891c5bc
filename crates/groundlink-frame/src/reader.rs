use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::codec::{decode_frame, Decoded, MAX_PAYLOAD};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * MAX_PAYLOAD;
const READ_CHUNK_SIZE: usize = 64;

/// Counters kept by a [`FrameReader`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaderStats {
    /// Frames delivered with a valid checksum.
    pub frames: u64,
    /// Frame-shaped spans dropped for a checksum mismatch.
    pub corrupt: u64,
    /// Noise bytes skipped while looking for a start marker.
    pub discarded_bytes: u64,
}

/// Reassembles frames from any `Read` stream.
///
/// Bytes are accumulated across reads; leading noise and corrupt frames are
/// dropped silently (and counted), so callers only ever see valid payloads.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    stats: ReaderStats,
}

impl<T> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            stats: ReaderStats::default(),
        }
    }

    /// Append bytes obtained elsewhere to the receive buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame already sitting in the buffer.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            let before = self.buf.len();
            let decoded = decode_frame(&mut self.buf);
            let consumed = before - self.buf.len();
            let framed = decoded.as_ref().map_or(0, Decoded::wire_size);
            let skipped = consumed - framed;
            if skipped > 0 {
                self.stats.discarded_bytes += skipped as u64;
                debug!(skipped, "discarded bytes before start marker");
            }

            match decoded {
                Some(Decoded::Frame(payload)) => {
                    self.stats.frames += 1;
                    return Some(payload);
                }
                Some(Decoded::Corrupt {
                    length,
                    computed,
                    received,
                }) => {
                    self.stats.corrupt += 1;
                    debug!(
                        length,
                        computed = format_args!("0x{computed:04X}"),
                        received = format_args!("0x{received:04X}"),
                        "dropped frame with bad checksum"
                    );
                }
                None => return None,
            }
        }
    }

    /// Bytes buffered but not yet consumed as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read> FrameReader<T> {
    /// Perform at most one read and return the next frame, if any.
    ///
    /// A read that times out (or would block) yields `Ok(None)`. Returns
    /// `Err(FrameError::ConnectionClosed)` when the stream reports EOF.
    pub fn read_frame(&mut self) -> Result<Option<Bytes>> {
        if let Some(frame) = self.next_frame() {
            return Ok(Some(frame));
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let read = loop {
            match self.inner.read(&mut chunk) {
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) =>
                {
                    return Ok(None)
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        };

        if read == 0 {
            return Err(FrameError::ConnectionClosed);
        }

        self.buf.extend_from_slice(&chunk[..read]);
        Ok(self.next_frame())
    }

    /// Read until a frame arrives or the stream closes.
    pub fn read_frame_blocking(&mut self) -> Result<Bytes> {
        loop {
            if let Some(frame) = self.read_frame()? {
                return Ok(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BufMut;

    use super::*;
    use crate::codec::{build_frame, START_MARKER};

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for payload in payloads {
            out.put_slice(&build_frame(payload).unwrap());
        }
        out.to_vec()
    }

    #[test]
    fn read_single_frame() {
        let mut reader = FrameReader::new(Cursor::new(wire(&[b"hello"])));
        assert_eq!(reader.read_frame_blocking().unwrap().as_ref(), b"hello");
        assert_eq!(reader.stats().frames, 1);
    }

    #[test]
    fn read_multiple_frames() {
        let mut reader = FrameReader::new(Cursor::new(wire(&[b"one", b"two", b"three"])));

        assert_eq!(reader.read_frame_blocking().unwrap().as_ref(), b"one");
        assert_eq!(reader.read_frame_blocking().unwrap().as_ref(), b"two");
        assert_eq!(reader.read_frame_blocking().unwrap().as_ref(), b"three");
    }

    #[test]
    fn read_max_size_payload() {
        let payload = vec![0xAB; MAX_PAYLOAD];
        let mut reader = FrameReader::new(Cursor::new(wire(&[&payload])));
        assert_eq!(
            reader.read_frame_blocking().unwrap().as_ref(),
            payload.as_slice()
        );
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&[b"slow"]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);
        assert_eq!(reader.read_frame_blocking().unwrap().as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let full = wire(&[b"only-part-of-this"]);
        let mut reader = FrameReader::new(Cursor::new(full[..8].to_vec()));
        let err = reader.read_frame_blocking().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert_eq!(reader.buffered(), 8);
    }

    #[test]
    fn noise_and_corrupt_frames_are_counted_and_skipped() {
        let mut bytes = vec![0x00, 0x11, 0x22];
        let mut bad = build_frame(b"bad").unwrap().to_vec();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        bytes.extend_from_slice(&bad);
        bytes.extend_from_slice(&build_frame(b"good").unwrap());

        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert_eq!(reader.read_frame_blocking().unwrap().as_ref(), b"good");
        assert_eq!(
            reader.stats(),
            ReaderStats {
                frames: 1,
                corrupt: 1,
                discarded_bytes: 3,
            }
        );
    }

    #[test]
    fn push_feeds_next_frame() {
        let bytes = wire(&[b"abc"]);
        let mut reader = FrameReader::new(());
        reader.push(&bytes[..2]);
        assert!(reader.next_frame().is_none());
        reader.push(&bytes[2..]);
        assert_eq!(reader.next_frame().unwrap().as_ref(), b"abc");
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn push_without_marker_clears_buffer() {
        let mut reader = FrameReader::new(());
        reader.push(&[0x01, 0x02, 0x03]);
        assert!(reader.next_frame().is_none());
        assert_eq!(reader.buffered(), 0);
        assert_eq!(reader.stats().discarded_bytes, 3);

        reader.push(&[START_MARKER]);
        assert!(reader.next_frame().is_none());
        assert_eq!(reader.buffered(), 1);
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut reader = FrameReader::new(cursor);

        let _ = reader.get_ref();
        let _ = reader.get_mut();
        let _inner = reader.into_inner();
    }

    #[test]
    fn timed_out_read_yields_none() {
        let reader = FailOnceThenData {
            kind: ErrorKind::TimedOut,
            failed: false,
            bytes: wire(&[b"ok"]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        assert!(framed.read_frame().unwrap().is_none());
        assert_eq!(framed.read_frame().unwrap().unwrap().as_ref(), b"ok");
    }

    #[test]
    fn would_block_read_yields_none() {
        let reader = FailOnceThenData {
            kind: ErrorKind::WouldBlock,
            failed: false,
            bytes: wire(&[b"ok"]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        assert!(framed.read_frame().unwrap().is_none());
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = FailOnceThenData {
            kind: ErrorKind::Interrupted,
            failed: false,
            bytes: wire(&[b"ok"]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        assert_eq!(framed.read_frame().unwrap().unwrap().as_ref(), b"ok");
    }

    #[test]
    fn other_read_errors_propagate() {
        let reader = FailOnceThenData {
            kind: ErrorKind::BrokenPipe,
            failed: false,
            bytes: Vec::new(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[test]
    fn roundtrip_over_pipe() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send(b"ping").unwrap();
        assert_eq!(reader.read_frame_blocking().unwrap().as_ref(), b"ping");
    }

    #[test]
    fn concurrent_reader_writer_threads() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        let reader_thread = std::thread::spawn(move || {
            for expected in 0..64u16 {
                let frame = reader.read_frame_blocking().unwrap();
                assert_eq!(frame.as_ref(), format!("msg-{expected}").as_bytes());
            }
        });

        for i in 0..64u16 {
            writer.send(format!("msg-{i}").as_bytes()).unwrap();
        }

        reader_thread.join().unwrap();
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct FailOnceThenData {
        kind: ErrorKind,
        failed: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for FailOnceThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(std::io::Error::from(self.kind));
            }
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let n = (self.bytes.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
