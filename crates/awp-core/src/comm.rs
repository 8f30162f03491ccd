// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Message Passing
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Point-to-point and collective messaging between ranks.
//!
//! [`Communicator`] is the seam an MPI binding would implement. The
//! in-process [`LocalCluster`] runs every rank on its own thread and
//! connects each ordered pair of ranks with a crossbeam channel. Sends
//! never block; receives block until a matching message arrives or the
//! peer hangs up. A receive timeout is opt-in.

use awp_types::error::{AwpError, AwpResult};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, error};

pub type Tag = u16;

/// Tags at and above this value are reserved for collectives.
pub const RESERVED_TAG_BASE: Tag = 0xff00;
const REDUCE_TAG: Tag = RESERVED_TAG_BASE;
const RESULT_TAG: Tag = RESERVED_TAG_BASE + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Min,
    Max,
    Sum,
}

impl ReduceOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Sum => a + b,
        }
    }
}

/// Non-blocking message passing with explicit completion.
///
/// A request must be completed with the matching `wait_*` call before the
/// data it refers to is trusted.
pub trait Communicator: Send {
    type SendRequest: Send;
    type RecvRequest: Send;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, dest: usize, tag: Tag, data: &[f32]) -> AwpResult<Self::SendRequest>;
    fn irecv(&self, source: usize, tag: Tag, len: usize) -> AwpResult<Self::RecvRequest>;
    fn wait_send(&self, request: Self::SendRequest) -> AwpResult<()>;
    /// Complete a receive into `out`, whose length must equal the posted length.
    fn wait_recv(&self, request: Self::RecvRequest, out: &mut [f32]) -> AwpResult<()>;

    fn barrier(&self) -> AwpResult<()>;
    /// Element-wise reduction; every rank gets the result.
    fn all_reduce(&self, values: &[f64], op: ReduceOp) -> AwpResult<Vec<f64>>;
}

// ── Fixed request slots ──────────────────────────────────────────────

/// Outstanding requests for one axis: at most one send and one receive
/// per side. Sides without a neighbour stay empty.
pub struct RequestSlots<C: Communicator> {
    rank: usize,
    sends: [Option<C::SendRequest>; 2],
    recvs: [Option<C::RecvRequest>; 2],
}

impl<C: Communicator> RequestSlots<C> {
    pub fn new(rank: usize) -> Self {
        RequestSlots {
            rank,
            sends: [None, None],
            recvs: [None, None],
        }
    }

    pub fn post_send(&mut self, slot: usize, request: C::SendRequest) -> AwpResult<()> {
        match self.sends.get_mut(slot) {
            Some(entry) if entry.is_none() => {
                *entry = Some(request);
                Ok(())
            }
            _ => Err(AwpError::comm(self.rank, format!("send slot {slot} unavailable"))),
        }
    }

    pub fn post_recv(&mut self, slot: usize, request: C::RecvRequest) -> AwpResult<()> {
        match self.recvs.get_mut(slot) {
            Some(entry) if entry.is_none() => {
                *entry = Some(request);
                Ok(())
            }
            _ => Err(AwpError::comm(self.rank, format!("receive slot {slot} unavailable"))),
        }
    }

    pub fn posted(&self) -> usize {
        self.sends.iter().filter(|s| s.is_some()).count()
            + self.recvs.iter().filter(|r| r.is_some()).count()
    }

    /// Complete every request. The number of populated slots must equal
    /// `expected`; each posted receive lands in `outs[slot]`.
    pub fn wait_all(
        self,
        comm: &C,
        expected: usize,
        mut outs: [Option<&mut [f32]>; 2],
    ) -> AwpResult<()> {
        let posted = self.posted();
        if posted != expected {
            return Err(AwpError::comm(
                self.rank,
                format!("{posted} requests posted, expected {expected}"),
            ));
        }
        for (slot, request) in self.recvs.into_iter().enumerate() {
            if let Some(request) = request {
                let out = outs[slot].take().ok_or_else(|| {
                    AwpError::comm(comm.rank(), format!("no receive buffer for slot {slot}"))
                })?;
                comm.wait_recv(request, out)?;
            }
        }
        for request in self.sends.into_iter().flatten() {
            comm.wait_send(request)?;
        }
        Ok(())
    }
}

// ── In-process cluster ───────────────────────────────────────────────

#[derive(Debug)]
enum Payload {
    Samples(Vec<f32>),
    Scalars(Vec<f64>),
}

#[derive(Debug)]
struct Envelope {
    tag: Tag,
    payload: Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Send,
    Recv,
}

/// Record of a posted point-to-point operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostedOp {
    pub kind: OpKind,
    pub peer: usize,
    pub tag: Tag,
}

#[derive(Debug)]
pub struct ThreadSend {
    pub dest: usize,
    pub tag: Tag,
}

#[derive(Debug)]
pub struct ThreadRecv {
    pub source: usize,
    pub tag: Tag,
    pub len: usize,
}

/// One rank's endpoint in a [`LocalCluster`].
pub struct ThreadComm {
    rank: usize,
    size: usize,
    senders: Vec<Option<Sender<Envelope>>>,
    receivers: Vec<Option<Receiver<Envelope>>>,
    stash: Mutex<HashMap<(usize, Tag), VecDeque<Payload>>>,
    posted: Mutex<Vec<PostedOp>>,
    timeout: Option<Duration>,
}

impl ThreadComm {
    /// Point-to-point operations posted so far, in order.
    pub fn posted_ops(&self) -> Vec<PostedOp> {
        self.posted.lock().clone()
    }

    fn check_peer(&self, peer: usize) -> AwpResult<()> {
        if peer >= self.size || peer == self.rank {
            return Err(AwpError::comm(
                self.rank,
                format!("invalid peer {peer} (size {})", self.size),
            ));
        }
        Ok(())
    }

    fn send_payload(&self, dest: usize, tag: Tag, payload: Payload) -> AwpResult<()> {
        self.check_peer(dest)?;
        let sender = self.senders[dest]
            .as_ref()
            .ok_or_else(|| AwpError::comm(self.rank, format!("no channel to {dest}")))?;
        sender
            .send(Envelope { tag, payload })
            .map_err(|_| AwpError::comm(self.rank, format!("rank {dest} hung up")))
    }

    fn recv_payload(&self, source: usize, tag: Tag) -> AwpResult<Payload> {
        self.check_peer(source)?;
        if let Some(p) = self
            .stash
            .lock()
            .get_mut(&(source, tag))
            .and_then(VecDeque::pop_front)
        {
            return Ok(p);
        }
        let receiver = self.receivers[source]
            .as_ref()
            .ok_or_else(|| AwpError::comm(self.rank, format!("no channel from {source}")))?;
        loop {
            let env = match self.timeout {
                Some(timeout) => receiver.recv_timeout(timeout).map_err(|e| match e {
                    RecvTimeoutError::Timeout => AwpError::comm(
                        self.rank,
                        format!("timed out waiting for tag {tag:#06x} from rank {source}"),
                    ),
                    RecvTimeoutError::Disconnected => {
                        AwpError::comm(self.rank, format!("rank {source} hung up"))
                    }
                })?,
                None => receiver
                    .recv()
                    .map_err(|_| AwpError::comm(self.rank, format!("rank {source} hung up")))?,
            };
            if env.tag == tag {
                return Ok(env.payload);
            }
            self.stash
                .lock()
                .entry((source, env.tag))
                .or_default()
                .push_back(env.payload);
        }
    }

    fn log(&self, kind: OpKind, peer: usize, tag: Tag) {
        self.posted.lock().push(PostedOp { kind, peer, tag });
    }
}

impl Communicator for ThreadComm {
    type SendRequest = ThreadSend;
    type RecvRequest = ThreadRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, dest: usize, tag: Tag, data: &[f32]) -> AwpResult<ThreadSend> {
        self.send_payload(dest, tag, Payload::Samples(data.to_vec()))?;
        self.log(OpKind::Send, dest, tag);
        Ok(ThreadSend { dest, tag })
    }

    fn irecv(&self, source: usize, tag: Tag, len: usize) -> AwpResult<ThreadRecv> {
        self.check_peer(source)?;
        self.log(OpKind::Recv, source, tag);
        Ok(ThreadRecv { source, tag, len })
    }

    fn wait_send(&self, _request: ThreadSend) -> AwpResult<()> {
        Ok(())
    }

    fn wait_recv(&self, request: ThreadRecv, out: &mut [f32]) -> AwpResult<()> {
        if out.len() != request.len {
            return Err(AwpError::comm(
                self.rank,
                format!("receive buffer holds {} values, posted {}", out.len(), request.len),
            ));
        }
        match self.recv_payload(request.source, request.tag)? {
            Payload::Samples(data) if data.len() == out.len() => {
                out.copy_from_slice(&data);
                Ok(())
            }
            Payload::Samples(data) => Err(AwpError::comm(
                self.rank,
                format!(
                    "message from rank {} carries {} values, expected {}",
                    request.source,
                    data.len(),
                    out.len()
                ),
            )),
            Payload::Scalars(_) => Err(AwpError::comm(
                self.rank,
                format!("unexpected collective payload from rank {}", request.source),
            )),
        }
    }

    fn barrier(&self) -> AwpResult<()> {
        self.all_reduce(&[], ReduceOp::Sum).map(|_| ())
    }

    fn all_reduce(&self, values: &[f64], op: ReduceOp) -> AwpResult<Vec<f64>> {
        if self.size == 1 {
            return Ok(values.to_vec());
        }
        if self.rank != 0 {
            self.send_payload(0, REDUCE_TAG, Payload::Scalars(values.to_vec()))?;
            return match self.recv_payload(0, RESULT_TAG)? {
                Payload::Scalars(v) => Ok(v),
                Payload::Samples(_) => Err(AwpError::comm(self.rank, "malformed reduction result")),
            };
        }
        let mut acc = values.to_vec();
        for source in 1..self.size {
            match self.recv_payload(source, REDUCE_TAG)? {
                Payload::Scalars(v) if v.len() == acc.len() => {
                    for (a, b) in acc.iter_mut().zip(v) {
                        *a = op.apply(*a, b);
                    }
                }
                _ => {
                    return Err(AwpError::comm(
                        self.rank,
                        format!("rank {source} contributed a mismatched reduction"),
                    ))
                }
            }
        }
        for dest in 1..self.size {
            self.send_payload(dest, RESULT_TAG, Payload::Scalars(acc.clone()))?;
        }
        Ok(acc)
    }
}

/// Set of ranks living in one process, one thread each.
#[derive(Debug, Clone)]
pub struct LocalCluster {
    size: usize,
    timeout: Option<Duration>,
}

impl LocalCluster {
    pub fn new(size: usize) -> AwpResult<Self> {
        if size == 0 {
            return Err(AwpError::Config("Cluster needs at least one rank".to_string()));
        }
        Ok(LocalCluster { size, timeout: None })
    }

    /// Receives waiting longer than this fail instead of hanging. Without
    /// it a receive waits until the message arrives or the peer exits.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Build connected endpoints, indexed by rank.
    pub fn endpoints(&self) -> Vec<ThreadComm> {
        let n = self.size;
        let mut senders: Vec<Vec<Option<Sender<Envelope>>>> =
            (0..n).map(|_| (0..n).map(|_| None).collect()).collect();
        let mut receivers: Vec<Vec<Option<Receiver<Envelope>>>> =
            (0..n).map(|_| (0..n).map(|_| None).collect()).collect();
        for src in 0..n {
            for dst in 0..n {
                if src == dst {
                    continue;
                }
                let (tx, rx) = channel::unbounded();
                senders[src][dst] = Some(tx);
                receivers[dst][src] = Some(rx);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ThreadComm {
                rank,
                size: n,
                senders,
                receivers,
                stash: Mutex::new(HashMap::new()),
                posted: Mutex::new(Vec::new()),
                timeout: self.timeout,
            })
            .collect()
    }

    /// Run `body` on every rank concurrently and collect the results in
    /// rank order. When ranks fail, the reported error is the first one
    /// that is not a knock-on communication failure.
    pub fn run<T, F>(&self, body: F) -> AwpResult<Vec<T>>
    where
        T: Send,
        F: Fn(ThreadComm) -> AwpResult<T> + Sync,
    {
        let body = &body;
        let results: Vec<AwpResult<T>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .endpoints()
                .into_iter()
                .map(|comm| {
                    let rank = comm.rank;
                    let handle = std::thread::Builder::new()
                        .name(format!("rank-{rank}"))
                        .spawn_scoped(scope, move || body(comm));
                    (rank, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(rank, handle)| match handle {
                    Ok(h) => h
                        .join()
                        .unwrap_or_else(|_| Err(AwpError::comm(rank, "rank thread panicked"))),
                    Err(e) => Err(AwpError::comm(rank, format!("failed to spawn: {e}"))),
                })
                .collect()
        });

        let mut root_cause: Option<AwpError> = None;
        let mut knock_on: Option<AwpError> = None;
        let mut out = Vec::with_capacity(results.len());
        for (rank, r) in results.into_iter().enumerate() {
            match r {
                Ok(v) => out.push(v),
                Err(e) => {
                    error!(rank, "rank failed: {e}");
                    match e {
                        AwpError::Communication { .. } => {
                            knock_on.get_or_insert(e);
                        }
                        _ => {
                            root_cause.get_or_insert(e);
                        }
                    }
                }
            }
        }
        if let Some(e) = root_cause.or(knock_on) {
            return Err(e);
        }
        debug!(ranks = self.size, "local cluster finished");
        Ok(out)
    }
}
