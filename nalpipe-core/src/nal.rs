//! # Annex-B NAL Demultiplexer
//!
//! Incremental parser that splits an H.264 Annex-B byte stream into NAL units,
//! no matter how the transport chunked it.
//!
//! ```text
//!  chunk ─► append() ─► scan for 00 00 01 / 00 00 00 01 ─► unit lengths
//!                 │                                          │
//!                 ▼                                          ▼
//!          pending chunks (Bytes) ──────────► remove_next() ─► NalUnit
//! ```
//!
//! Chunks are kept as immutable [`Bytes`] handles. Extracting a unit that lies
//! inside one chunk is a zero-copy `split_to`; units spanning chunks are copied
//! into a fresh buffer of exactly the unit's length.
//!
//! Each emitted unit starts with its own start code, which is what decoders
//! consume. [`NalUnit::payload`] strips it.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::fmt;

// ============================================================================
// NAL Unit Types
// ============================================================================

/// H.264 `nal_unit_type` (ITU-T H.264 Table 7-1), limited to what the
/// pipeline reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalType {
    Slice,
    SlicePartitionA,
    SlicePartitionB,
    SlicePartitionC,
    Idr,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    EndOfSequence,
    EndOfStream,
    Filler,
    Other(u8),
}

impl NalType {
    pub fn from_header(header: u8) -> Self {
        match header & 0x1F {
            1 => Self::Slice,
            2 => Self::SlicePartitionA,
            3 => Self::SlicePartitionB,
            4 => Self::SlicePartitionC,
            5 => Self::Idr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::Filler,
            other => Self::Other(other),
        }
    }

    /// Video coding layer units carry picture data.
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            Self::Slice
                | Self::SlicePartitionA
                | Self::SlicePartitionB
                | Self::SlicePartitionC
                | Self::Idr
        )
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, Self::Sps | Self::Pps)
    }
}

// ============================================================================
// NAL Unit
// ============================================================================

/// One complete NAL unit, including the start code that opened it.
#[derive(Clone, PartialEq, Eq)]
pub struct NalUnit {
    data: Bytes,
    start_code_len: usize,
}

impl NalUnit {
    /// Annex-B framed bytes (start code + header + body).
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Unit contents without the start code.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.start_code_len..]
    }

    /// 3 or 4.
    pub fn start_code_len(&self) -> usize {
        self.start_code_len
    }

    /// Total length including the start code.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// False for a start code immediately followed by another start code.
    pub fn has_payload(&self) -> bool {
        self.data.len() > self.start_code_len
    }

    pub fn header(&self) -> Option<u8> {
        self.payload().first().copied()
    }

    pub fn nal_type(&self) -> Option<NalType> {
        self.header().map(NalType::from_header)
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl fmt::Debug for NalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NalUnit")
            .field("nal_type", &self.nal_type())
            .field("start_code_len", &self.start_code_len)
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

// ============================================================================
// NAL Buffer
// ============================================================================

/// A finalized unit boundary waiting to be extracted.
#[derive(Debug, Clone, Copy)]
struct UnitSpan {
    len: usize,
    /// Zero for the stream prefix preceding the first start code.
    start_code_len: usize,
}

impl UnitSpan {
    fn is_prefix(&self) -> bool {
        self.start_code_len == 0
    }
}

/// Stateful Annex-B splitter. Feed chunks with [`append`](Self::append), pull
/// units with [`remove_next`](Self::remove_next).
#[derive(Debug, Default)]
pub struct NalBuffer {
    /// Appended bytes not yet handed out, oldest first.
    buffers: VecDeque<Bytes>,
    /// Lengths of parsed units not yet handed out.
    spans: VecDeque<UnitSpan>,
    /// Length of the unit currently being scanned, excluding `zeroes`.
    nal_length: usize,
    /// Start code length of the unit currently being scanned.
    start_code_len: usize,
    /// Contiguous zero bytes at the scan position. Only non-zero between
    /// calls when the last chunk ended in a zero run.
    zeroes: usize,
    appended: u64,
    emitted: u64,
    discarded: u64,
}

impl NalBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chunk of raw Annex-B data. The chunk may hold any number of
    /// units and may end anywhere, including inside a start code.
    pub fn append(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }

        for &byte in chunk.iter() {
            if byte == 0x00 {
                self.zeroes += 1;
                continue;
            }

            // 0x01 after two or three zeroes closes a start code
            if byte == 0x01 && (self.zeroes == 2 || self.zeroes == 3) {
                self.spans.push_back(UnitSpan {
                    len: self.nal_length,
                    start_code_len: self.start_code_len,
                });
                self.nal_length = 0;
                self.start_code_len = self.zeroes + 1;
            }

            self.nal_length += self.zeroes + 1;
            self.zeroes = 0;
        }

        self.appended += chunk.len() as u64;
        self.buffers.push_back(chunk);
    }

    /// Copies `data` into a new chunk and appends it.
    pub fn append_slice(&mut self, data: &[u8]) {
        self.append(Bytes::copy_from_slice(data));
    }

    /// Returns the oldest complete unit, or `None` until more data arrives.
    ///
    /// Bytes preceding the first start code are dropped here rather than
    /// returned as a unit.
    pub fn remove_next(&mut self) -> Option<NalUnit> {
        while let Some(span) = self.spans.pop_front() {
            let data = self.take(span.len);

            if span.is_prefix() {
                if !data.is_empty() {
                    tracing::debug!("Discarding {} bytes before first start code", data.len());
                }
                self.discarded += data.len() as u64;
                continue;
            }

            self.emitted += data.len() as u64;
            return Some(NalUnit {
                data,
                start_code_len: span.start_code_len,
            });
        }

        None
    }

    /// Closes the unit currently being scanned so it becomes available to
    /// [`remove_next`](Self::remove_next). Used at end of stream, where no
    /// further start code will arrive to terminate it.
    pub fn finish(&mut self) {
        let len = self.nal_length + self.zeroes;
        if len > 0 {
            self.spans.push_back(UnitSpan {
                len,
                start_code_len: self.start_code_len,
            });
        }

        self.nal_length = 0;
        self.zeroes = 0;
        self.start_code_len = 0;
    }

    /// Number of units ready for extraction. A pending prefix is not counted.
    pub fn queued_units(&self) -> usize {
        self.spans.iter().filter(|span| !span.is_prefix()).count()
    }

    /// Bytes appended but not yet emitted or discarded.
    pub fn buffered_bytes(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }

    pub fn appended_bytes(&self) -> u64 {
        self.appended
    }

    pub fn emitted_bytes(&self) -> u64 {
        self.emitted
    }

    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    /// Removes exactly `len` bytes from the front of the pending chunks.
    fn take(&mut self, len: usize) -> Bytes {
        if let Some(front) = self.buffers.front_mut() {
            if front.len() >= len {
                let out = front.split_to(len);
                if front.is_empty() {
                    self.buffers.pop_front();
                }
                return out;
            }
        }

        let mut out = BytesMut::with_capacity(len);
        let mut remaining = len;

        while remaining > 0 {
            let Some(mut chunk) = self.buffers.pop_front() else {
                break;
            };

            if chunk.len() <= remaining {
                remaining -= chunk.len();
                out.extend_from_slice(&chunk);
            } else {
                // The rest of this chunk belongs to the next unit
                out.extend_from_slice(&chunk.split_to(remaining));
                self.buffers.push_front(chunk);
                remaining = 0;
            }
        }

        debug_assert_eq!(out.len(), len, "unit span exceeds buffered data");
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] = &[
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, 0x9A, // SPS
        0x00, 0x00, 0x01, 0x68, 0xCE, 0x38, 0x80, // PPS
        0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x21, // IDR
        0x00, 0x00, 0x01, 0x41, 0x9A, 0x02, // slice
    ];

    fn drain(buffer: &mut NalBuffer, out: &mut Vec<NalUnit>) {
        while let Some(nal) = buffer.remove_next() {
            out.push(nal);
        }
    }

    fn split_all(chunks: &[&[u8]]) -> Vec<NalUnit> {
        let mut buffer = NalBuffer::new();
        let mut units = Vec::new();
        for chunk in chunks {
            buffer.append_slice(chunk);
            drain(&mut buffer, &mut units);
        }
        buffer.finish();
        drain(&mut buffer, &mut units);
        units
    }

    fn payloads(units: &[NalUnit]) -> Vec<Vec<u8>> {
        units.iter().map(|u| u.payload().to_vec()).collect()
    }

    #[test]
    fn test_single_chunk_two_units() {
        let mut buffer = NalBuffer::new();
        buffer.append_slice(&[0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB, 0x00, 0x00, 0x01, 0xCC]);

        let first = buffer.remove_next().unwrap();
        assert_eq!(first.payload(), &[0xAA, 0xBB]);
        assert_eq!(first.as_bytes(), &[0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB]);
        assert_eq!(first.start_code_len(), 4);

        // Last unit stays open until a start code or end of stream
        assert!(buffer.remove_next().is_none());
        buffer.finish();

        let second = buffer.remove_next().unwrap();
        assert_eq!(second.payload(), &[0xCC]);
        assert_eq!(second.start_code_len(), 3);
        assert!(buffer.remove_next().is_none());
    }

    #[test]
    fn test_split_inside_start_codes() {
        let whole = split_all(&[&[0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB, 0x00, 0x00, 0x01, 0xCC]]);
        let split = split_all(&[
            &[0x00, 0x00],
            &[0x00, 0x01, 0xAA],
            &[0xBB, 0x00, 0x00],
            &[0x01, 0xCC],
        ]);

        assert_eq!(payloads(&split), vec![vec![0xAA, 0xBB], vec![0xCC]]);
        assert_eq!(whole, split);
    }

    #[test]
    fn test_every_two_way_split() {
        let expected = split_all(&[STREAM]);
        assert_eq!(expected.len(), 4);

        for at in 0..=STREAM.len() {
            let (a, b) = STREAM.split_at(at);
            assert_eq!(split_all(&[a, b]), expected, "split at {}", at);
        }
    }

    #[test]
    fn test_byte_at_a_time_with_empty_chunks() {
        let expected = split_all(&[STREAM]);

        let mut chunks: Vec<&[u8]> = Vec::new();
        for i in 0..STREAM.len() {
            chunks.push(&[]);
            chunks.push(&STREAM[i..i + 1]);
        }

        assert_eq!(split_all(&chunks), expected);
    }

    #[test]
    fn test_irregular_chunking() {
        let expected = split_all(&[STREAM]);

        // Repeat the stream so chunks cover several units
        let stream: Vec<u8> = STREAM.iter().copied().cycle().take(STREAM.len() * 7).collect();
        let expected: Vec<NalUnit> = expected.iter().cloned().cycle().take(28).collect();

        let mut state = 0x2545_F491u32;
        for _ in 0..50 {
            let mut chunks = Vec::new();
            let mut pos = 0;
            while pos < stream.len() {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                let size = (state % 9) as usize;
                let end = (pos + size).min(stream.len());
                chunks.push(&stream[pos..end]);
                pos = end;
            }
            assert_eq!(split_all(&chunks), expected);
        }
    }

    #[test]
    fn test_order_and_types() {
        let units = split_all(&[STREAM]);
        let types: Vec<_> = units.iter().map(|u| u.nal_type().unwrap()).collect();

        assert_eq!(
            types,
            vec![NalType::Sps, NalType::Pps, NalType::Idr, NalType::Slice]
        );
        assert_eq!(units[0].payload(), &[0x67, 0x42, 0x00, 0x1E, 0x9A]);
        assert_eq!(units[2].payload(), &[0x65, 0x88, 0x84, 0x21]);
        assert!(types[2].is_vcl());
        assert!(types[0].is_parameter_set());
    }

    #[test]
    fn test_multiple_units_from_one_append() {
        let mut buffer = NalBuffer::new();
        buffer.append_slice(STREAM);

        assert_eq!(buffer.queued_units(), 3);
        assert!(buffer.remove_next().is_some());
        assert!(buffer.remove_next().is_some());
        assert!(buffer.remove_next().is_some());
        assert!(buffer.remove_next().is_none());
    }

    #[test]
    fn test_no_start_code_never_emits() {
        let mut buffer = NalBuffer::new();
        buffer.append_slice(&[0x12, 0x34, 0x00, 0x56]);
        buffer.append_slice(&[0x00, 0x78, 0x9A]);

        assert!(buffer.remove_next().is_none());
        assert_eq!(buffer.buffered_bytes(), 7);

        // A later start code completes the junk as a prefix, which is dropped
        buffer.append_slice(&[0x00, 0x00, 0x01, 0x09, 0xF0]);
        assert!(buffer.remove_next().is_none());
        assert_eq!(buffer.discarded_bytes(), 7);

        buffer.finish();
        let aud = buffer.remove_next().unwrap();
        assert_eq!(aud.nal_type(), Some(NalType::AccessUnitDelimiter));
    }

    #[test]
    fn test_finish_without_start_code_discards() {
        let mut buffer = NalBuffer::new();
        buffer.append_slice(&[0x12, 0x34]);
        buffer.finish();

        assert!(buffer.remove_next().is_none());
        assert_eq!(buffer.discarded_bytes(), 2);
        assert_eq!(buffer.buffered_bytes(), 0);
    }

    #[test]
    fn test_four_zero_run_is_not_a_start_code() {
        let units = split_all(&[&[0x00, 0x00, 0x01, 0x41, 0x00, 0x00, 0x00, 0x00, 0x01, 0x42]]);

        assert_eq!(units.len(), 1);
        assert_eq!(
            units[0].payload(),
            &[0x41, 0x00, 0x00, 0x00, 0x00, 0x01, 0x42]
        );
    }

    #[test]
    fn test_back_to_back_start_codes() {
        let units = split_all(&[&[0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0x41]]);

        assert_eq!(units.len(), 2);
        assert!(!units[0].has_payload());
        assert_eq!(units[0].len(), 3);
        assert_eq!(units[0].nal_type(), None);
        assert_eq!(units[1].payload(), &[0x41]);
    }

    #[test]
    fn test_trailing_zeroes_kept_on_finish() {
        let units = split_all(&[&[0x00, 0x00, 0x01, 0x41, 0x00], &[0x00]]);
        assert_eq!(units[0].payload(), &[0x41, 0x00, 0x00]);
    }

    #[test]
    fn test_byte_accounting() {
        let mut buffer = NalBuffer::new();
        let mut emitted = 0u64;

        let mut junk_then_stream = vec![0xFF, 0xEE];
        junk_then_stream.extend_from_slice(STREAM);

        for chunk in junk_then_stream.chunks(5) {
            buffer.append_slice(chunk);
            while let Some(nal) = buffer.remove_next() {
                emitted += nal.len() as u64;
            }
            assert_eq!(
                buffer.appended_bytes(),
                emitted + buffer.discarded_bytes() + buffer.buffered_bytes() as u64
            );
        }

        buffer.finish();
        while let Some(nal) = buffer.remove_next() {
            emitted += nal.len() as u64;
        }

        assert_eq!(buffer.buffered_bytes(), 0);
        assert_eq!(buffer.discarded_bytes(), 2);
        assert_eq!(emitted, STREAM.len() as u64);
        assert_eq!(buffer.emitted_bytes(), emitted);
    }

    #[test]
    fn test_unit_inside_one_chunk_is_not_copied() {
        let chunk = Bytes::from_static(STREAM);
        let mut buffer = NalBuffer::new();
        buffer.append(chunk.clone());

        let sps = buffer.remove_next().unwrap();
        assert_eq!(sps.as_bytes().as_ptr(), chunk.as_ptr());

        let pps = buffer.remove_next().unwrap();
        assert_eq!(pps.as_bytes().as_ptr(), chunk[9..].as_ptr());
    }
}
