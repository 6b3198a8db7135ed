//! Fixed, versioned, little-endian wire types for the exchange paths.

use crate::mesh_error::MeshIntxError;
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn expect_min_len(actual: usize, expected: usize, what: &str) -> Result<(), MeshIntxError> {
    if actual >= expected {
        Ok(())
    } else {
        Err(MeshIntxError::Wire(format!(
            "{what}: expected at least {expected} bytes, got {actual}"
        )))
    }
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Header kind of an encoded tuple list.
pub const KIND_TUPLES: u16 = 1;
/// Header kind of a process bounding box.
pub const KIND_BOX: u16 = 2;

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32,
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }

    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }

    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }

    /// Reads a header from the front of `bytes` and checks version and kind.
    pub fn check(bytes: &[u8], kind: u16) -> Result<Self, MeshIntxError> {
        expect_min_len(bytes.len(), size_of::<WireHdr>(), "header")?;
        let hdr: WireHdr = bytemuck::pod_read_unaligned(&bytes[..size_of::<WireHdr>()]);
        if hdr.version() != WIRE_VERSION {
            return Err(MeshIntxError::Wire(format!(
                "unsupported wire version {}",
                hdr.version()
            )));
        }
        if hdr.kind() != kind {
            return Err(MeshIntxError::Wire(format!(
                "expected record kind {kind}, got {}",
                hdr.kind()
            )));
        }
        Ok(hdr)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }

    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// Column widths and record count of an encoded tuple list.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireTupleShape {
    pub ints_le: u32,
    pub longs_le: u32,
    pub reals_le: u32,
    pub count_le: u32,
}

impl WireTupleShape {
    pub fn new(ints: usize, longs: usize, reals: usize, count: usize) -> Self {
        Self {
            ints_le: (ints as u32).to_le(),
            longs_le: (longs as u32).to_le(),
            reals_le: (reals as u32).to_le(),
            count_le: (count as u32).to_le(),
        }
    }

    /// `(ints, longs, reals, count)`.
    pub fn get(&self) -> (usize, usize, usize, usize) {
        (
            u32::from_le(self.ints_le) as usize,
            u32::from_le(self.longs_le) as usize,
            u32::from_le(self.reals_le) as usize,
            u32::from_le(self.count_le) as usize,
        )
    }
}

/// A process bounding box and the largest cell size on that process.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireBox {
    pub hdr: WireHdr,
    pub bounds_le: [u64; 6],
    pub max_edges_le: u64,
}

impl WireBox {
    pub fn new(bounds: [f64; 6], max_edges: usize) -> Self {
        Self {
            hdr: WireHdr::new(KIND_BOX),
            bounds_le: bounds.map(|b| b.to_bits().to_le()),
            max_edges_le: (max_edges as u64).to_le(),
        }
    }

    pub fn bounds(&self) -> [f64; 6] {
        self.bounds_le.map(|b| f64::from_bits(u64::from_le(b)))
    }

    pub fn max_edges(&self) -> usize {
        u64::from_le(self.max_edges_le) as usize
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MeshIntxError> {
        WireHdr::check(bytes, KIND_BOX)?;
        if bytes.len() != size_of::<WireBox>() {
            return Err(MeshIntxError::Wire(format!(
                "expected {} bytes for a box, got {}",
                size_of::<WireBox>(),
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}

const_assert_eq!(size_of::<WireHdr>(), 8);
const_assert_eq!(size_of::<WireCount>(), 4);
const_assert_eq!(size_of::<WireTupleShape>(), 16);
const_assert_eq!(size_of::<WireBox>(), 64);
