//! Layout of the region shared between an instrumented process and its fuzzer.
//!
//! ```text
//! +---------------------------+--------------+-------------+
//! | edge counters [MAP_SIZE]  | distance sum | visit count |
//! +---------------------------+--------------+-------------+
//! ```
//!
//! The two trailing slots are as wide as a target pointer: 8 bytes on 64-bit
//! targets, 4 bytes otherwise.

use serde::{Deserialize, Serialize};

/// Log2 of the edge map size
pub const MAP_SIZE_POW2: usize = 16;

/// The map size for the edges map. Must be a power of two.
pub const MAP_SIZE: usize = 1 << MAP_SIZE_POW2;

/// Width in bytes of one telemetry slot for the given target pointer width.
#[must_use]
pub const fn slot_width(pointer_width: u32) -> usize {
    if pointer_width == 64 {
        8
    } else {
        4
    }
}

/// Offset of the distance-sum slot.
#[must_use]
pub const fn distance_slot_offset() -> usize {
    MAP_SIZE
}

/// Offset of the visit-count slot.
#[must_use]
pub const fn count_slot_offset(pointer_width: u32) -> usize {
    MAP_SIZE + slot_width(pointer_width)
}

/// Total size of the region, in bytes.
#[must_use]
pub const fn region_size(pointer_width: u32) -> usize {
    MAP_SIZE + 2 * slot_width(pointer_width)
}

/// An owned shared region, as mapped by the harness before the target runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedRegion {
    bytes: Vec<u8>,
    pointer_width: u32,
}

impl SharedRegion {
    /// Creates a zeroed region for a target with the given pointer width.
    #[must_use]
    pub fn new(pointer_width: u32) -> Self {
        Self {
            bytes: vec![0; region_size(pointer_width)],
            pointer_width,
        }
    }

    /// The target pointer width this region was laid out for
    #[must_use]
    pub fn pointer_width(&self) -> u32 {
        self.pointer_width
    }

    /// The whole region
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// The whole region, mutable
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// The edge counters
    #[must_use]
    pub fn edges(&self) -> &[u8] {
        &self.bytes[..MAP_SIZE]
    }

    /// Number of edge counters that are non-zero
    #[must_use]
    pub fn count_hit_edges(&self) -> usize {
        self.edges().iter().filter(|&&c| c != 0).count()
    }

    /// Reads an unsigned value of `width` bytes at `offset`, native endian.
    #[must_use]
    pub fn read(&self, offset: usize, width: usize) -> Option<u64> {
        let raw = self.bytes.get(offset..offset.checked_add(width)?)?;
        Some(match width {
            1 => u64::from(raw[0]),
            2 => u64::from(u16::from_ne_bytes([raw[0], raw[1]])),
            4 => u64::from(u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]])),
            8 => {
                let mut buf = [0; 8];
                buf.copy_from_slice(raw);
                u64::from_ne_bytes(buf)
            }
            _ => return None,
        })
    }

    /// Writes the low `width` bytes of `value` at `offset`, native endian.
    ///
    /// Returns `false` if the write would not fit.
    pub fn write(&mut self, offset: usize, width: usize, value: u64) -> bool {
        let Some(end) = offset.checked_add(width) else {
            return false;
        };
        let Some(raw) = self.bytes.get_mut(offset..end) else {
            return false;
        };
        match width {
            1 => raw[0] = value as u8,
            2 => raw.copy_from_slice(&(value as u16).to_ne_bytes()),
            4 => raw.copy_from_slice(&(value as u32).to_ne_bytes()),
            8 => raw.copy_from_slice(&value.to_ne_bytes()),
            _ => return false,
        }
        true
    }

    /// Accumulated distance of this run
    #[must_use]
    pub fn distance_sum(&self) -> u64 {
        self.read(distance_slot_offset(), slot_width(self.pointer_width))
            .unwrap_or(0)
    }

    /// Number of distance-instrumented blocks executed in this run
    #[must_use]
    pub fn visit_count(&self) -> u64 {
        self.read(
            count_slot_offset(self.pointer_width),
            slot_width(self.pointer_width),
        )
        .unwrap_or(0)
    }

    /// Mean distance to the targets, `None` if no instrumented block ran.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_distance(&self) -> Option<f64> {
        match self.visit_count() {
            0 => None,
            count => Some(self.distance_sum() as f64 / count as f64),
        }
    }

    /// Zeroes the whole region, ready for the next run.
    pub fn reset(&mut self) {
        self.bytes.fill(0);
    }
}
