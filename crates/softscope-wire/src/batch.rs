use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, WireError};

/// Telemetry batch sync marker, little-endian on the wire (0x55 0xAA).
pub const SYNC: u16 = 0xAA55;

/// Batch header: sync (2) + sequence (2) + snapshot count (1) + channel count (1).
pub const BATCH_HEADER_SIZE: usize = 6;

/// Zeroed trailer the device firmware appends after the snapshots.
pub const CRC_PLACEHOLDER_SIZE: usize = 2;

const VALUE_SIZE: usize = 4;
const TIMESTAMP_SIZE: usize = 8;

/// Wire size of one snapshot carrying `channel_count` values.
pub const fn snapshot_size(channel_count: usize) -> usize {
    VALUE_SIZE * channel_count + TIMESTAMP_SIZE
}

/// Fixed header at the start of every telemetry batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    /// Device packet counter. Wraps at `u16::MAX`; not validated.
    pub sequence: u16,
    /// Number of snapshots the device says follow the header.
    pub snapshot_count: u8,
    /// Number of values in each snapshot.
    pub channel_count: u8,
}

impl BatchHeader {
    /// Decode and validate the header at the start of `payload`.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < BATCH_HEADER_SIZE {
            return Err(WireError::TooShort {
                len: payload.len(),
                min: BATCH_HEADER_SIZE,
            });
        }

        let mut src = &payload[..BATCH_HEADER_SIZE];
        let sync = src.get_u16_le();
        if sync != SYNC {
            return Err(WireError::InvalidSync { found: sync });
        }

        Ok(Self {
            sequence: src.get_u16_le(),
            snapshot_count: src.get_u8(),
            channel_count: src.get_u8(),
        })
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16_le(SYNC);
        dst.put_u16_le(self.sequence);
        dst.put_u8(self.snapshot_count);
        dst.put_u8(self.channel_count);
    }
}

/// One timestamped set of values, one per channel, in channel-list order.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub values: Vec<f32>,
    /// Device monotonic clock in microseconds.
    pub timestamp_us: u64,
}

impl Snapshot {
    pub fn new(values: Vec<f32>, timestamp_us: u64) -> Self {
        Self {
            values,
            timestamp_us,
        }
    }

    /// The timestamp in milliseconds, as plotted.
    pub fn timestamp_ms(&self) -> f64 {
        self.timestamp_us as f64 / 1000.0
    }
}

/// A decoded telemetry datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryBatch {
    pub header: BatchHeader,
    /// Complete snapshots in arrival order. May be fewer than
    /// `header.snapshot_count` when the datagram was cut short.
    pub snapshots: Vec<Snapshot>,
}

impl TelemetryBatch {
    /// Build a batch, checking every snapshot has `channel_count` values.
    pub fn new(sequence: u16, channel_count: usize, snapshots: Vec<Snapshot>) -> Result<Self> {
        if channel_count > u8::MAX as usize {
            return Err(WireError::TooManyChannels {
                count: channel_count,
            });
        }
        if snapshots.len() > u8::MAX as usize {
            return Err(WireError::TooManySnapshots {
                count: snapshots.len(),
            });
        }
        if let Some(bad) = snapshots.iter().find(|s| s.values.len() != channel_count) {
            return Err(WireError::ValueCount {
                expected: channel_count,
                found: bad.values.len(),
            });
        }

        Ok(Self {
            header: BatchHeader {
                sequence,
                snapshot_count: snapshots.len() as u8,
                channel_count: channel_count as u8,
            },
            snapshots,
        })
    }

    /// Decode a telemetry batch.
    ///
    /// Wire format:
    /// ```text
    /// ┌──────────┬──────────┬─────────┬─────────┬──────────────────────────────┐
    /// │ Sync     │ Seq      │ Snaps   │ Chans   │ Snaps × [Chans × f32 LE      │
    /// │ (2B LE)  │ (2B LE)  │ (1B)    │ (1B)    │          + timestamp u64 LE] │
    /// │ 0xAA55   │          │         │         │                              │
    /// └──────────┴──────────┴─────────┴─────────┴──────────────────────────────┘
    /// ```
    ///
    /// Snapshots are walked in order. If the remaining bytes cannot hold a
    /// full snapshot, decoding stops there and the remainder is discarded;
    /// partial snapshots are never returned. Check [`is_truncated`](Self::is_truncated).
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let header = BatchHeader::decode(payload)?;
        let channels = header.channel_count as usize;
        let size = snapshot_size(channels);

        let mut src = &payload[BATCH_HEADER_SIZE..];
        let mut snapshots = Vec::with_capacity(header.snapshot_count as usize);

        for _ in 0..header.snapshot_count {
            if src.remaining() < size {
                break;
            }
            let values = (0..channels).map(|_| src.get_f32_le()).collect();
            let timestamp_us = src.get_u64_le();
            snapshots.push(Snapshot {
                values,
                timestamp_us,
            });
        }

        Ok(Self { header, snapshots })
    }

    /// Encode this batch into the wire format.
    ///
    /// The snapshot count written is the number of snapshots held, so a
    /// truncated batch re-encodes as a smaller, consistent one.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let channels = self.header.channel_count as usize;
        if self.snapshots.len() > u8::MAX as usize {
            return Err(WireError::TooManySnapshots {
                count: self.snapshots.len(),
            });
        }
        if let Some(bad) = self.snapshots.iter().find(|s| s.values.len() != channels) {
            return Err(WireError::ValueCount {
                expected: channels,
                found: bad.values.len(),
            });
        }

        dst.reserve(self.wire_size());
        BatchHeader {
            snapshot_count: self.snapshots.len() as u8,
            ..self.header
        }
        .encode(dst);
        for snapshot in &self.snapshots {
            for &value in &snapshot.values {
                dst.put_f32_le(value);
            }
            dst.put_u64_le(snapshot.timestamp_us);
        }
        Ok(())
    }

    /// Wire size of the header and the snapshots held.
    pub fn wire_size(&self) -> usize {
        BATCH_HEADER_SIZE + self.snapshots.len() * snapshot_size(self.header.channel_count as usize)
    }

    /// Whether the datagram held fewer complete snapshots than it declared.
    pub fn is_truncated(&self) -> bool {
        self.snapshots.len() < self.header.snapshot_count as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch(sequence: u16, channels: usize, count: usize) -> TelemetryBatch {
        let snapshots = (0..count)
            .map(|i| {
                let values = (0..channels).map(|c| (i * 10 + c) as f32 * 0.5 - 3.0).collect();
                Snapshot::new(values, 1_000_000 + i as u64 * 1_000)
            })
            .collect();
        TelemetryBatch::new(sequence, channels, snapshots).unwrap()
    }

    #[test]
    fn test_decode_two_snapshots_three_channels() {
        let batch = TelemetryBatch::new(
            7,
            3,
            vec![
                Snapshot::new(vec![1.5, -2.25, f32::MAX], 123_456_789),
                Snapshot::new(vec![f32::MIN_POSITIVE, 0.0, -0.0], u64::MAX),
            ],
        )
        .unwrap();

        let mut buf = BytesMut::new();
        batch.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), BATCH_HEADER_SIZE + 2 * snapshot_size(3));

        let decoded = TelemetryBatch::decode(&buf).unwrap();
        assert_eq!(decoded.header.sequence, 7);
        assert_eq!(decoded.snapshots.len(), 2);
        for (got, want) in decoded.snapshots.iter().zip(&batch.snapshots) {
            assert_eq!(got.values.len(), 3);
            assert_eq!(got.timestamp_us, want.timestamp_us);
            for (g, w) in got.values.iter().zip(&want.values) {
                assert_eq!(g.to_bits(), w.to_bits());
            }
        }
        assert!(!decoded.is_truncated());
    }

    #[test]
    fn test_decode_hand_built_bytes() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0x55, 0xAA, 0x02, 0x01, 1, 1]);
        buf.put_slice(&1.0f32.to_le_bytes());
        buf.put_slice(&2_500u64.to_le_bytes());

        let batch = TelemetryBatch::decode(&buf).unwrap();
        assert_eq!(batch.header.sequence, 0x0102);
        assert_eq!(batch.snapshots, vec![Snapshot::new(vec![1.0], 2_500)]);
        assert_eq!(batch.snapshots[0].timestamp_ms(), 2.5);
    }

    #[test]
    fn test_decode_wrong_sync_rejected() {
        let mut buf = BytesMut::new();
        sample_batch(1, 2, 3).encode(&mut buf).unwrap();
        buf[0] = 0xAA;
        buf[1] = 0x55;

        assert_eq!(
            TelemetryBatch::decode(&buf),
            Err(WireError::InvalidSync { found: 0x55AA })
        );
    }

    #[test]
    fn test_decode_short_header() {
        assert!(matches!(
            TelemetryBatch::decode(&[0x55, 0xAA, 0, 0, 1]),
            Err(WireError::TooShort { len: 5, min: 6 })
        ));
    }

    #[test]
    fn test_decode_truncated_applies_complete_snapshots_only() {
        let full = sample_batch(9, 4, 5);
        let mut buf = BytesMut::new();
        full.encode(&mut buf).unwrap();

        // Room for three snapshots plus half of the fourth.
        buf.truncate(BATCH_HEADER_SIZE + 3 * snapshot_size(4) + snapshot_size(4) / 2);

        let decoded = TelemetryBatch::decode(&buf).unwrap();
        assert_eq!(decoded.header.snapshot_count, 5);
        assert_eq!(decoded.snapshots.len(), 3);
        assert_eq!(decoded.snapshots[..], full.snapshots[..3]);
        assert!(decoded.is_truncated());
    }

    #[test]
    fn test_decode_ignores_crc_placeholder() {
        let batch = sample_batch(3, 10, 50);
        let mut buf = BytesMut::new();
        batch.encode(&mut buf).unwrap();
        buf.put_bytes(0, CRC_PLACEHOLDER_SIZE);

        let decoded = TelemetryBatch::decode(&buf).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_zero_channel_snapshots_are_timestamps_only() {
        let batch = sample_batch(0, 0, 2);
        let mut buf = BytesMut::new();
        batch.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), BATCH_HEADER_SIZE + 2 * 8);

        let decoded = TelemetryBatch::decode(&buf).unwrap();
        assert_eq!(decoded.snapshots.len(), 2);
        assert!(decoded.snapshots[0].values.is_empty());
    }

    #[test]
    fn test_new_rejects_ragged_snapshots() {
        let result = TelemetryBatch::new(
            0,
            2,
            vec![Snapshot::new(vec![1.0, 2.0], 0), Snapshot::new(vec![1.0], 1)],
        );
        assert_eq!(
            result,
            Err(WireError::ValueCount {
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_snapshot_size() {
        assert_eq!(snapshot_size(0), 8);
        assert_eq!(snapshot_size(3), 20);
        assert_eq!(snapshot_size(10), 48);
    }
}
