//! Thin façade over serial, in-process (threads) or inter-process (MPI)
//! message passing.
//!
//! Messages are contiguous byte slices. Point-to-point handles are waitable;
//! the collective helpers built on top of them ([`Communicator::all_to_all_bytes`],
//! [`Communicator::all_gather_bytes`]) run the usual two-stage protocol: a
//! fixed-size count first, then the payload, and they drain every posted
//! handle before returning, even on error.

use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut};
use crate::mesh_error::MeshIntxError;
use bytemuck::Zeroable;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Message tag; collectives use `tag` for counts and `tag + 1` for payloads.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn offset(self, by: u16) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Non-blocking communication interface.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Sends `outgoing[p]` to every rank `p` and returns what each rank sent
    /// here, indexed by source rank. Empty payloads are not transmitted.
    fn all_to_all_bytes(
        &self,
        tag: CommTag,
        outgoing: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, MeshIntxError> {
        let (me, n) = (self.rank(), self.size());
        if outgoing.len() != n {
            return Err(MeshIntxError::CommError {
                neighbor: me,
                message: format!("{} outgoing buffers for {n} ranks", outgoing.len()),
            });
        }

        // 1) counts
        let mut size_recvs = Vec::with_capacity(n.saturating_sub(1));
        for peer in (0..n).filter(|&p| p != me) {
            let mut cnt = WireCount::zeroed();
            let h = self.irecv(
                peer,
                tag.as_u16(),
                cast_slice_mut(std::slice::from_mut(&mut cnt)),
            );
            size_recvs.push((peer, h));
        }
        let mut pending_sends = Vec::with_capacity(n.saturating_sub(1));
        for peer in (0..n).filter(|&p| p != me) {
            let count = WireCount::new(outgoing[peer].len());
            pending_sends.push(self.isend(
                peer,
                tag.as_u16(),
                cast_slice(std::slice::from_ref(&count)),
            ));
        }
        let mut sizes = vec![0usize; n];
        sizes[me] = outgoing[me].len();
        let mut maybe_err = None;
        for (peer, h) in size_recvs {
            match h.wait() {
                Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                    sizes[peer] = bytemuck::pod_read_unaligned::<WireCount>(&data).get();
                }
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(MeshIntxError::CommError {
                        neighbor: peer,
                        message: format!(
                            "expected {} bytes for size header, got {}",
                            std::mem::size_of::<WireCount>(),
                            data.len()
                        ),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(MeshIntxError::CommError {
                        neighbor: peer,
                        message: format!("failed to receive size from rank {peer}"),
                    });
                }
                _ => {}
            }
        }
        for send in pending_sends {
            let _ = send.wait();
        }
        if let Some(err) = maybe_err {
            return Err(err);
        }

        // 2) payloads
        let data_tag = tag.offset(1).as_u16();
        let mut data_recvs = Vec::new();
        for peer in (0..n).filter(|&p| p != me && sizes[p] > 0) {
            let mut buf = vec![0u8; sizes[peer]];
            data_recvs.push((peer, self.irecv(peer, data_tag, &mut buf)));
        }
        let mut pending_sends = Vec::new();
        for peer in (0..n).filter(|&p| p != me && !outgoing[p].is_empty()) {
            pending_sends.push(self.isend(peer, data_tag, &outgoing[peer]));
        }
        let mut incoming = vec![Vec::new(); n];
        incoming[me] = outgoing[me].clone();
        let mut maybe_err = None;
        for (peer, h) in data_recvs {
            match h.wait() {
                Some(data) if data.len() == sizes[peer] => incoming[peer] = data,
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(MeshIntxError::CommError {
                        neighbor: peer,
                        message: format!("expected {} payload bytes, got {}", sizes[peer], data.len()),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(MeshIntxError::CommError {
                        neighbor: peer,
                        message: format!("failed to receive payload from rank {peer}"),
                    });
                }
                _ => {}
            }
        }
        for send in pending_sends {
            let _ = send.wait();
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(incoming),
        }
    }

    /// Every rank's `local`, indexed by rank.
    fn all_gather_bytes(&self, tag: CommTag, local: &[u8]) -> Result<Vec<Vec<u8>>, MeshIntxError> {
        let outgoing = vec![local.to_vec(); self.size()];
        self.all_to_all_bytes(tag, &outgoing)
    }
}

/// Compile-time no-op comm for serial runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}

    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
}

// --- ThreadComm: intra-process, one rank per thread ---
type Key = (usize, usize, u16); // (src, dst, tag)

type Mailbox = Arc<DashMap<Key, VecDeque<Bytes>>>;

/// Receive handle polling the shared mailbox until a message arrives or the
/// deadline passes.
pub struct LocalHandle {
    mailbox: Mailbox,
    key: Key,
    len: usize,
    deadline: Instant,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    let n = self.len.min(bytes.len());
                    return Some(bytes[..n].to_vec());
                }
            }
            if Instant::now() >= self.deadline {
                log::warn!(
                    "receive from rank {} (tag {}) timed out",
                    self.key.0,
                    self.key.2
                );
                return None;
            }
            std::thread::yield_now();
        }
    }
}

/// Ranks of one in-process "universe" sharing a mailbox; run each on its
/// own thread.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailbox: Mailbox,
    timeout: Duration,
}

impl ThreadComm {
    /// `size` communicators that can talk to each other.
    pub fn universe(size: usize) -> Vec<ThreadComm> {
        let mailbox: Mailbox = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                timeout: Duration::from_secs(60),
            })
            .collect()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.mailbox
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            len: buf.len(),
            deadline: Instant::now() + self.timeout,
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::Count;
    use mpi::datatype::{Partition, PartitionMut};
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// World communicator. Point-to-point calls block; the collectives are
    /// mapped onto MPI's variable-count all-to-all and all-gather.
    pub struct MpiComm {
        _universe: Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        /// `None` if MPI was already initialised.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    pub struct MpiRecv(Option<Vec<u8>>);

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    fn displacements(counts: &[Count]) -> Vec<Count> {
        counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect()
    }

    fn split(buf: Vec<u8>, counts: &[Count]) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(counts.len());
        let mut at = 0usize;
        for &c in counts {
            let c = c as usize;
            out.push(buf[at..at + c].to_vec());
            at += c;
        }
        out
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecv;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecv {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(tag as i32);
            MpiRecv(Some(data))
        }

        fn all_to_all_bytes(
            &self,
            _tag: CommTag,
            outgoing: &[Vec<u8>],
        ) -> Result<Vec<Vec<u8>>, MeshIntxError> {
            if outgoing.len() != self.size {
                return Err(MeshIntxError::CommError {
                    neighbor: self.rank,
                    message: format!("{} outgoing buffers for {} ranks", outgoing.len(), self.size),
                });
            }
            let send_counts: Vec<Count> = outgoing.iter().map(|b| b.len() as Count).collect();
            let mut recv_counts = vec![0 as Count; self.size];
            self.world.all_to_all_into(&send_counts[..], &mut recv_counts[..]);
            let send_displs = displacements(&send_counts);
            let recv_displs = displacements(&recv_counts);
            let send_buf: Vec<u8> = outgoing.concat();
            let total: Count = recv_counts.iter().sum();
            let mut recv_buf = vec![0u8; total as usize];
            {
                let send = Partition::new(&send_buf[..], &send_counts[..], &send_displs[..]);
                let mut recv =
                    PartitionMut::new(&mut recv_buf[..], &recv_counts[..], &recv_displs[..]);
                self.world.all_to_all_varcount_into(&send, &mut recv);
            }
            Ok(split(recv_buf, &recv_counts))
        }

        fn all_gather_bytes(
            &self,
            _tag: CommTag,
            local: &[u8],
        ) -> Result<Vec<Vec<u8>>, MeshIntxError> {
            let mut counts = vec![0 as Count; self.size];
            self.world
                .all_gather_into(&(local.len() as Count), &mut counts[..]);
            let displs = displacements(&counts);
            let total: Count = counts.iter().sum();
            let mut recv_buf = vec![0u8; total as usize];
            {
                let mut recv = PartitionMut::new(&mut recv_buf[..], &counts[..], &displs[..]);
                self.world.all_gather_varcount_into(local, &mut recv);
            }
            Ok(split(recv_buf, &counts))
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_roundtrip_two_ranks() {
        let comms = ThreadComm::universe(2);
        let mut recv_buf = [0u8; 4];
        let recv_handle = comms[1].irecv(0, 7, &mut recv_buf);
        comms[0].isend(1, 7, &[1, 2, 3, 4]);
        let data = recv_handle.wait().expect("message from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn messages_with_one_key_arrive_in_order() {
        let comms = ThreadComm::universe(2);
        comms[0].isend(1, 3, &[1]);
        comms[0].isend(1, 3, &[2]);
        assert_eq!(comms[1].irecv(0, 3, &mut [0u8; 1]).wait(), Some(vec![1]));
        assert_eq!(comms[1].irecv(0, 3, &mut [0u8; 1]).wait(), Some(vec![2]));
    }

    #[test]
    fn missing_message_times_out() {
        let comms = ThreadComm::universe(2);
        let c = comms[1].clone().with_timeout(Duration::from_millis(10));
        assert_eq!(c.irecv(0, 1, &mut [0u8; 4]).wait(), None);
    }

    #[test]
    fn serial_all_to_all_is_identity() {
        let out = NoComm
            .all_to_all_bytes(CommTag::new(10), &[vec![1, 2, 3]])
            .unwrap();
        assert_eq!(out, vec![vec![1, 2, 3]]);
        assert!(NoComm.all_to_all_bytes(CommTag::new(10), &[]).is_err());
    }

    #[test]
    fn threaded_all_to_all_and_gather() {
        let comms = ThreadComm::universe(3);
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let me = c.rank() as u8;
                        // rank r sends [r, p] to every p, except nothing to itself+1
                        let outgoing: Vec<Vec<u8>> = (0..3u8)
                            .map(|p| if p == (me + 1) % 3 { Vec::new() } else { vec![me, p] })
                            .collect();
                        let a2a = c.all_to_all_bytes(CommTag::new(20), &outgoing).unwrap();
                        let gathered = c.all_gather_bytes(CommTag::new(30), &[me * 10]).unwrap();
                        (a2a, gathered)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (rank, (a2a, gathered)) in results.iter().enumerate() {
            for src in 0..3 {
                if rank == (src + 1) % 3 {
                    assert!(a2a[src].is_empty());
                } else {
                    assert_eq!(a2a[src], vec![src as u8, rank as u8]);
                }
            }
            assert_eq!(gathered, &vec![vec![0], vec![10], vec![20]]);
        }
    }
}
