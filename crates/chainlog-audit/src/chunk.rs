//! Chunk framing and reassembly for records larger than one log message.
//!
//! A single-part record is sent as its canonical JSON bytes. An oversized
//! record is split into a chunk group; each chunk is one log message:
//!
//! ```text
//! offset  size  field
//!      0     4  magic "CLK1"
//!      4    16  group id (UUID, big-endian bytes)
//!     20     2  chunk index, 0-based (u16 big-endian)
//!     22     2  chunk count (u16 big-endian)
//!     24     -  data
//! ```
//!
//! JSON records always start with `{`, so the magic never collides with a
//! single-part record.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use chainlog_contracts::record::AttestationRecord;

/// Leading bytes of every chunk frame.
pub const CHUNK_MAGIC: [u8; 4] = *b"CLK1";

/// Bytes of framing in front of each chunk's data.
pub const CHUNK_HEADER_LEN: usize = 24;

/// One fragment of a chunk group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub group_id: Uuid,
    pub index: u16,
    pub total: u16,
    pub data: Vec<u8>,
}

impl Chunk {
    /// The framed message bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CHUNK_HEADER_LEN + self.data.len());
        out.extend_from_slice(&CHUNK_MAGIC);
        out.extend_from_slice(self.group_id.as_bytes());
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(&self.total.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse a chunk frame.
    ///
    /// Returns `None` when `bytes` is not a chunk frame at all, and
    /// `Some(Err(reason))` when it claims to be one but is inconsistent.
    pub fn decode(bytes: &[u8]) -> Option<Result<Chunk, String>> {
        if !bytes.starts_with(&CHUNK_MAGIC) {
            return None;
        }
        if bytes.len() < CHUNK_HEADER_LEN {
            return Some(Err(format!(
                "chunk frame of {} bytes is shorter than its {}-byte header",
                bytes.len(),
                CHUNK_HEADER_LEN
            )));
        }

        let mut id = [0u8; 16];
        id.copy_from_slice(&bytes[4..20]);
        let index = u16::from_be_bytes([bytes[20], bytes[21]]);
        let total = u16::from_be_bytes([bytes[22], bytes[23]]);

        if total == 0 {
            return Some(Err("chunk frame declares a group of zero chunks".to_string()));
        }
        if index >= total {
            return Some(Err(format!("chunk index {index} out of range for a group of {total}")));
        }

        Some(Ok(Chunk {
            group_id: Uuid::from_bytes(id),
            index,
            total,
            data: bytes[CHUNK_HEADER_LEN..].to_vec(),
        }))
    }
}

/// Data bytes that fit in one chunk frame under `max_message_bytes`.
pub fn chunk_capacity(max_message_bytes: usize) -> usize {
    max_message_bytes.saturating_sub(CHUNK_HEADER_LEN).max(1)
}

/// Number of chunks `len` bytes split into under `max_message_bytes`.
pub fn chunk_count(len: usize, max_message_bytes: usize) -> usize {
    len.div_ceil(chunk_capacity(max_message_bytes)).max(1)
}

/// Split `bytes` into an ordered chunk group.
///
/// Deterministic for a given input, so a partially submitted group can be
/// re-split and resumed under the same `group_id`. The caller checks the
/// count against its limits first (see `chunk_count`); counts above
/// `u16::MAX` are not representable in the frame.
pub fn split(group_id: Uuid, bytes: &[u8], max_message_bytes: usize) -> Vec<Chunk> {
    let capacity = chunk_capacity(max_message_bytes);
    let total = chunk_count(bytes.len(), max_message_bytes) as u16;

    if bytes.is_empty() {
        return vec![Chunk {
            group_id,
            index: 0,
            total: 1,
            data: Vec::new(),
        }];
    }

    bytes
        .chunks(capacity)
        .enumerate()
        .map(|(i, data)| Chunk {
            group_id,
            index: i as u16,
            total,
            data: data.to_vec(),
        })
        .collect()
}

/// A message read from the log, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Record(AttestationRecord),
    Chunk(Chunk),
}

/// Classify and parse one log message.
pub fn decode_message(bytes: &[u8]) -> Result<WireMessage, String> {
    if let Some(chunk) = Chunk::decode(bytes) {
        return chunk.map(WireMessage::Chunk);
    }
    decode_record(bytes).map(WireMessage::Record)
}

/// Parse the JSON bytes of a whole record.
pub fn decode_record(bytes: &[u8]) -> Result<AttestationRecord, String> {
    serde_json::from_slice(bytes).map_err(|e| format!("invalid record JSON: {e}"))
}

/// Progress of a chunk group that has not completed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingGroup {
    pub group_id: Uuid,
    pub received: usize,
    pub total: u16,
}

#[derive(Debug)]
struct GroupState {
    total: u16,
    parts: BTreeMap<u16, Vec<u8>>,
}

/// Collects chunks and releases each group's bytes once complete.
///
/// Chunks may arrive in any order and interleaved with other groups.
/// A re-sent identical chunk is ignored.
#[derive(Debug, Default)]
pub struct Reassembler {
    groups: HashMap<Uuid, GroupState>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one chunk. Returns the concatenated bytes when this chunk
    /// completes its group.
    ///
    /// Fails when the chunk contradicts what earlier chunks of the same
    /// group declared (different count, different data at the same index).
    pub fn accept(&mut self, chunk: Chunk) -> Result<Option<Vec<u8>>, String> {
        let group = self.groups.entry(chunk.group_id).or_insert_with(|| GroupState {
            total: chunk.total,
            parts: BTreeMap::new(),
        });

        if group.total != chunk.total {
            return Err(format!(
                "chunk {} of group {} declares {} chunks, earlier chunks declared {}",
                chunk.index, chunk.group_id, chunk.total, group.total
            ));
        }

        if let Some(existing) = group.parts.get(&chunk.index) {
            if *existing == chunk.data {
                return Ok(None);
            }
            return Err(format!(
                "chunk {} of group {} was delivered twice with different content",
                chunk.index, chunk.group_id
            ));
        }

        group.parts.insert(chunk.index, chunk.data);
        if group.parts.len() < usize::from(group.total) {
            return Ok(None);
        }

        let complete = self.groups.remove(&chunk.group_id).map(|group| {
            group.parts.into_values().flatten().collect::<Vec<u8>>()
        });
        Ok(complete)
    }

    /// Groups still waiting for chunks, ordered by group id.
    pub fn pending(&self) -> Vec<PendingGroup> {
        let mut pending: Vec<PendingGroup> = self
            .groups
            .iter()
            .map(|(id, group)| PendingGroup {
                group_id: *id,
                received: group.parts.len(),
                total: group.total,
            })
            .collect();
        pending.sort_by_key(|p| p.group_id);
        pending
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{chunk_count, decode_message, split, Chunk, Reassembler, WireMessage, CHUNK_HEADER_LEN};

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Reassemble after splitting into exactly `n` chunks.
    fn round_trip_with(n: usize) {
        let max_message_bytes = 64;
        let capacity = max_message_bytes - CHUNK_HEADER_LEN;
        let original = payload(capacity * n - capacity / 2);
        let group_id = Uuid::new_v4();

        let chunks = split(group_id, &original, max_message_bytes);
        assert_eq!(chunks.len(), n);
        assert_eq!(chunk_count(original.len(), max_message_bytes), n);

        let mut reassembler = Reassembler::new();
        let mut out = None;
        for chunk in chunks {
            let framed = chunk.encode();
            assert!(framed.len() <= max_message_bytes);
            let decoded = Chunk::decode(&framed).unwrap().unwrap();
            assert_eq!(decoded, chunk);
            if let Some(bytes) = reassembler.accept(decoded).unwrap() {
                assert!(out.is_none(), "group must complete exactly once");
                out = Some(bytes);
            }
        }

        assert_eq!(out.unwrap(), original);
        assert!(reassembler.is_empty());
    }

    #[test]
    fn reassembles_one_chunk() {
        round_trip_with(1);
    }

    #[test]
    fn reassembles_two_chunks() {
        round_trip_with(2);
    }

    #[test]
    fn reassembles_ten_chunks() {
        round_trip_with(10);
    }

    #[test]
    fn out_of_order_and_interleaved_groups() {
        let a = payload(200);
        let b = payload(150);
        let ga = Uuid::new_v4();
        let gb = Uuid::new_v4();
        let mut chunks_a = split(ga, &a, 64);
        let chunks_b = split(gb, &b, 64);
        chunks_a.reverse();

        let mut reassembler = Reassembler::new();
        let mut done = Vec::new();
        for chunk in chunks_a.into_iter().zip(chunks_b).flat_map(|(x, y)| [x, y]) {
            if let Some(bytes) = reassembler.accept(chunk).unwrap() {
                done.push(bytes);
            }
        }
        // a has 5 chunks, b has 4: zip stops after 4 pairs, so a is pending.
        assert_eq!(done, vec![b]);
        let pending = reassembler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].group_id, ga);
        assert_eq!(pending[0].received, 4);
        assert_eq!(pending[0].total, 5);
    }

    #[test]
    fn duplicate_identical_chunk_is_ignored() {
        let group_id = Uuid::new_v4();
        let chunks = split(group_id, &payload(100), 64);
        let mut reassembler = Reassembler::new();
        assert!(reassembler.accept(chunks[0].clone()).unwrap().is_none());
        assert!(reassembler.accept(chunks[0].clone()).unwrap().is_none());
        assert!(reassembler.accept(chunks[1].clone()).unwrap().is_none());
        assert!(reassembler.accept(chunks[2].clone()).unwrap().is_some());
    }

    #[test]
    fn conflicting_chunks_are_rejected() {
        let group_id = Uuid::new_v4();
        let chunks = split(group_id, &payload(100), 64);
        let mut reassembler = Reassembler::new();
        reassembler.accept(chunks[0].clone()).unwrap();

        let mut other_count = chunks[1].clone();
        other_count.total = 9;
        assert!(reassembler.accept(other_count).is_err());

        let mut other_data = chunks[0].clone();
        other_data.data[0] ^= 0xff;
        assert!(reassembler.accept(other_data).is_err());
    }

    #[test]
    fn inconsistent_frames_are_malformed() {
        let mut frame = Chunk {
            group_id: Uuid::new_v4(),
            index: 3,
            total: 2,
            data: vec![1, 2, 3],
        }
        .encode();
        assert!(Chunk::decode(&frame).unwrap().is_err());

        frame.truncate(10);
        assert!(Chunk::decode(&frame).unwrap().is_err());

        assert!(Chunk::decode(b"{\"kind\":\"CUSTOM\"}").is_none());
    }

    #[test]
    fn decode_message_classifies_records_chunks_and_garbage() {
        let chunk = split(Uuid::new_v4(), b"abc", 64).remove(0);
        assert!(matches!(decode_message(&chunk.encode()), Ok(WireMessage::Chunk(_))));
        assert!(decode_message(b"not json at all").is_err());
        assert!(decode_message(b"{\"kind\":\"CUSTOM\"}").is_err());
    }
}
