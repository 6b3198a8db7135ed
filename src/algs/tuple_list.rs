//! Record lists with fixed integer/long/real columns, and the crystal
//! router that delivers each record to the rank named in one of its integer
//! columns.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{KIND_TUPLES, WireHdr, WireTupleShape, expect_min_len};
use crate::mesh_error::MeshIntxError;
use bytes::{Buf, BufMut};
use std::mem::size_of;

/// Column-major storage of records with `ints` i64, `longs` u64 and `reals`
/// f64 fields each.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TupleList {
    ints: usize,
    longs: usize,
    reals: usize,
    len: usize,
    vi: Vec<i64>,
    vl: Vec<u64>,
    vr: Vec<f64>,
}

/// Borrowed view of one record.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Tuple<'a> {
    pub ints: &'a [i64],
    pub longs: &'a [u64],
    pub reals: &'a [f64],
}

impl TupleList {
    pub fn new(ints: usize, longs: usize, reals: usize) -> Self {
        Self {
            ints,
            longs,
            reals,
            ..Default::default()
        }
    }

    /// `(ints, longs, reals)` per record.
    #[inline]
    pub fn widths(&self) -> (usize, usize, usize) {
        (self.ints, self.longs, self.reals)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, ints: &[i64], longs: &[u64], reals: &[f64]) -> Result<(), MeshIntxError> {
        if ints.len() != self.ints || longs.len() != self.longs || reals.len() != self.reals {
            return Err(MeshIntxError::Wire(format!(
                "record shape ({}, {}, {}) does not match list shape ({}, {}, {})",
                ints.len(),
                longs.len(),
                reals.len(),
                self.ints,
                self.longs,
                self.reals
            )));
        }
        self.vi.extend_from_slice(ints);
        self.vl.extend_from_slice(longs);
        self.vr.extend_from_slice(reals);
        self.len += 1;
        Ok(())
    }

    pub fn get(&self, i: usize) -> Tuple<'_> {
        Tuple {
            ints: &self.vi[i * self.ints..(i + 1) * self.ints],
            longs: &self.vl[i * self.longs..(i + 1) * self.longs],
            reals: &self.vr[i * self.reals..(i + 1) * self.reals],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Tuple<'_>> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }

    /// Stable sort of the records by integer column `col`.
    pub fn sort_by_int(&mut self, col: usize) {
        let mut order: Vec<usize> = (0..self.len).collect();
        order.sort_by_key(|&i| self.vi[i * self.ints + col]);
        let mut sorted = TupleList::new(self.ints, self.longs, self.reals);
        for i in order {
            let t = self.get(i);
            sorted.vi.extend_from_slice(t.ints);
            sorted.vl.extend_from_slice(t.longs);
            sorted.vr.extend_from_slice(t.reals);
            sorted.len += 1;
        }
        *self = sorted;
    }

    /// Encodes the records at `indices`.
    pub fn encode(&self, indices: &[usize]) -> Vec<u8> {
        let record = self.ints * 8 + self.longs * 8 + self.reals * 8;
        let mut buf = Vec::with_capacity(
            size_of::<WireHdr>() + size_of::<WireTupleShape>() + indices.len() * record,
        );
        buf.put_slice(bytemuck::bytes_of(&WireHdr::new(KIND_TUPLES)));
        buf.put_slice(bytemuck::bytes_of(&WireTupleShape::new(
            self.ints,
            self.longs,
            self.reals,
            indices.len(),
        )));
        for &i in indices {
            let t = self.get(i);
            t.ints.iter().for_each(|v| buf.put_i64_le(*v));
            t.longs.iter().for_each(|v| buf.put_u64_le(*v));
            t.reals.iter().for_each(|v| buf.put_f64_le(*v));
        }
        buf
    }

    /// Appends the records of an encoded buffer; `on_record` may rewrite
    /// each record's integer columns as it is appended.
    pub fn decode_into(
        &mut self,
        bytes: &[u8],
        mut on_record: impl FnMut(&mut [i64]),
    ) -> Result<usize, MeshIntxError> {
        WireHdr::check(bytes, KIND_TUPLES)?;
        let mut rd = &bytes[size_of::<WireHdr>()..];
        expect_min_len(rd.len(), size_of::<WireTupleShape>(), "tuple shape")?;
        let shape: WireTupleShape =
            bytemuck::pod_read_unaligned(&rd[..size_of::<WireTupleShape>()]);
        rd.advance(size_of::<WireTupleShape>());
        let (ni, nl, nr, count) = shape.get();
        if (ni, nl, nr) != self.widths() {
            return Err(MeshIntxError::Wire(format!(
                "incoming tuple shape ({ni}, {nl}, {nr}) does not match ({}, {}, {})",
                self.ints, self.longs, self.reals
            )));
        }
        let record = (ni + nl + nr) * 8;
        if rd.remaining() != count * record {
            return Err(MeshIntxError::Wire(format!(
                "expected {} payload bytes for {count} records, got {}",
                count * record,
                rd.remaining()
            )));
        }
        for _ in 0..count {
            let start = self.vi.len();
            for _ in 0..ni {
                self.vi.push(rd.get_i64_le());
            }
            on_record(&mut self.vi[start..]);
            for _ in 0..nl {
                self.vl.push(rd.get_u64_le());
            }
            for _ in 0..nr {
                self.vr.push(rd.get_f64_le());
            }
            self.len += 1;
        }
        Ok(count)
    }
}

/// Delivers every record to the rank in its integer column `proc_col`.
///
/// Received records arrive grouped by source rank in ascending order, and
/// their `proc_col` is rewritten to the rank that sent them.
pub fn crystal_route<C: Communicator>(
    comm: &C,
    tag: CommTag,
    list: &TupleList,
    proc_col: usize,
) -> Result<TupleList, MeshIntxError> {
    let n = comm.size();
    if proc_col >= list.ints {
        return Err(MeshIntxError::Wire(format!(
            "destination column {proc_col} out of range ({} int columns)",
            list.ints
        )));
    }
    let mut per_rank: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..list.len() {
        let dest = list.get(i).ints[proc_col];
        if dest < 0 || dest as usize >= n {
            return Err(MeshIntxError::Wire(format!(
                "record {i} addressed to rank {dest}, communicator has {n}"
            )));
        }
        per_rank[dest as usize].push(i);
    }
    let outgoing: Vec<Vec<u8>> = per_rank
        .iter()
        .map(|idx| if idx.is_empty() { Vec::new() } else { list.encode(idx) })
        .collect();
    let incoming = comm.all_to_all_bytes(tag, &outgoing)?;

    let (ni, nl, nr) = list.widths();
    let mut received = TupleList::new(ni, nl, nr);
    for (src, bytes) in incoming.iter().enumerate() {
        if bytes.is_empty() {
            continue;
        }
        received.decode_into(bytes, |ints| ints[proc_col] = src as i64)?;
    }
    Ok(received)
}
