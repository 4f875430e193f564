//! Process abstraction for domain-decomposed runs.
//!
//! A run is split over `size` ranks. Each rank owns a slab of space and talks to
//! the others only through a [`Communicator`]: point-to-point byte messages and
//! a handful of collectives. [`SerialCommunicator`] is the single-process case;
//! [`ThreadedWorld`] runs P ranks as OS threads inside one process.

use crate::error::{Classified, ErrorClass};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;
use thiserror::Error;

/// How long a rank waits for a peer before declaring it lost.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommError {
    #[error("rank {rank} does not exist in a world of {size} ranks")]
    NoSuchRank { rank: usize, size: usize },
    #[error("rank {peer} disconnected")]
    Disconnected { peer: usize },
    #[error("timed out waiting for a message from rank {peer}")]
    Timeout { peer: usize },
    #[error("collective state is poisoned: a rank panicked mid-exchange")]
    Poisoned,
    #[error("malformed message from rank {peer}: {reason}")]
    Malformed { peer: usize, reason: String },
}

impl Classified for CommError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Distributed
    }
}

pub trait Communicator: Send {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Blocks until every rank has reached the barrier.
    fn barrier(&self) -> Result<(), CommError>;

    /// Element-wise sum over all ranks. Shorter inputs are zero-extended to the
    /// longest one, so every rank receives a vector of the global maximum width.
    fn all_reduce_sum(&self, values: &[u32]) -> Result<Vec<u32>, CommError>;

    fn all_reduce_max(&self, value: u32) -> Result<u32, CommError>;

    /// Queues a message for `dest`. Never blocks.
    fn send(&self, dest: usize, payload: Vec<u8>) -> Result<(), CommError>;

    /// Takes the next message sent by `source`, in send order.
    fn receive(&self, source: usize) -> Result<Vec<u8>, CommError>;

    fn is_master(&self) -> bool {
        self.rank() == 0
    }

    fn is_top_most(&self) -> bool {
        self.rank() + 1 == self.size()
    }

    /// Runs `f` on each rank in turn, rank 0 first, with barriers in between.
    fn round_robin<F>(&self, mut f: F) -> Result<(), CommError>
    where
        F: FnMut() -> Result<(), CommError>,
        Self: Sized,
    {
        for turn in 0..self.size() {
            if turn == self.rank() {
                f()?;
            }
            self.barrier()?;
        }
        Ok(())
    }
}

/// The one-rank world.
#[derive(Debug, Default)]
pub struct SerialCommunicator {
    loopback: Mutex<VecDeque<Vec<u8>>>,
}

impl SerialCommunicator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), CommError> {
        Ok(())
    }

    fn all_reduce_sum(&self, values: &[u32]) -> Result<Vec<u32>, CommError> {
        Ok(values.to_vec())
    }

    fn all_reduce_max(&self, value: u32) -> Result<u32, CommError> {
        Ok(value)
    }

    fn send(&self, dest: usize, payload: Vec<u8>) -> Result<(), CommError> {
        if dest != 0 {
            return Err(CommError::NoSuchRank { rank: dest, size: 1 });
        }
        self.loopback.lock().map_err(|_| CommError::Poisoned)?.push_back(payload);
        Ok(())
    }

    fn receive(&self, source: usize) -> Result<Vec<u8>, CommError> {
        if source != 0 {
            return Err(CommError::NoSuchRank { rank: source, size: 1 });
        }
        self.loopback
            .lock()
            .map_err(|_| CommError::Poisoned)?
            .pop_front()
            .ok_or(CommError::Disconnected { peer: 0 })
    }
}

/// State shared by all ranks of a [`ThreadedWorld`].
#[derive(Debug)]
struct SharedState {
    barrier: Barrier,
    /// One contribution per rank for the collective in progress.
    slots: Mutex<Vec<Vec<u32>>>,
}

/// Factory for the ranks of an in-process multi-rank world.
pub struct ThreadedWorld;

impl ThreadedWorld {
    /// Creates `size` connected communicators, one per rank, in rank order.
    pub fn new(size: usize) -> Vec<ThreadCommunicator> {
        let size = size.max(1);
        let shared = Arc::new(SharedState { barrier: Barrier::new(size), slots: Mutex::new(vec![Vec::new(); size]) });

        // channel (src -> dest) for every ordered pair
        let mut senders: Vec<Vec<Option<Sender<Vec<u8>>>>> = (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        let mut receivers: Vec<Vec<Option<Receiver<Vec<u8>>>>> = (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        for src in 0..size {
            for dest in 0..size {
                let (tx, rx) = mpsc::channel();
                senders[src][dest] = Some(tx);
                receivers[dest][src] = Some(rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (outgoing, incoming))| ThreadCommunicator {
                rank,
                size,
                shared: Arc::clone(&shared),
                outgoing: outgoing.into_iter().flatten().collect(),
                incoming: incoming.into_iter().flatten().collect(),
            })
            .collect()
    }

    /// Runs `f` once per rank on scoped threads and returns the results in rank order.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(ThreadCommunicator) -> R + Sync,
        R: Send,
    {
        let comms = Self::new(size);
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms.into_iter().map(|comm| scope.spawn(move || f(comm))).collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

/// One rank of a [`ThreadedWorld`].
pub struct ThreadCommunicator {
    rank: usize,
    size: usize,
    shared: Arc<SharedState>,
    outgoing: Vec<Sender<Vec<u8>>>,
    incoming: Vec<Receiver<Vec<u8>>>,
}

impl ThreadCommunicator {
    /// Every rank deposits `values`; every rank gets all deposits in rank order.
    fn all_gather(&self, values: Vec<u32>) -> Result<Vec<Vec<u32>>, CommError> {
        self.shared.slots.lock().map_err(|_| CommError::Poisoned)?[self.rank] = values;
        self.shared.barrier.wait();
        let gathered = self.shared.slots.lock().map_err(|_| CommError::Poisoned)?.clone();
        // Nobody may start the next collective before all ranks have read this one
        self.shared.barrier.wait();
        Ok(gathered)
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.shared.barrier.wait();
        Ok(())
    }

    fn all_reduce_sum(&self, values: &[u32]) -> Result<Vec<u32>, CommError> {
        let gathered = self.all_gather(values.to_vec())?;
        let width = gathered.iter().map(Vec::len).max().unwrap_or(0);
        let mut total = vec![0u32; width];
        for contribution in &gathered {
            for (t, v) in total.iter_mut().zip(contribution) {
                *t += v;
            }
        }
        Ok(total)
    }

    fn all_reduce_max(&self, value: u32) -> Result<u32, CommError> {
        let gathered = self.all_gather(vec![value])?;
        Ok(gathered.iter().filter_map(|v| v.first().copied()).max().unwrap_or(value))
    }

    fn send(&self, dest: usize, payload: Vec<u8>) -> Result<(), CommError> {
        let channel = self.outgoing.get(dest).ok_or(CommError::NoSuchRank { rank: dest, size: self.size })?;
        channel.send(payload).map_err(|_| CommError::Disconnected { peer: dest })
    }

    fn receive(&self, source: usize) -> Result<Vec<u8>, CommError> {
        let channel = self.incoming.get(source).ok_or(CommError::NoSuchRank { rank: source, size: self.size })?;
        channel.recv_timeout(RECEIVE_TIMEOUT).map_err(|e| match e {
            RecvTimeoutError::Timeout => CommError::Timeout { peer: source },
            RecvTimeoutError::Disconnected => CommError::Disconnected { peer: source },
        })
    }
}

/// Serializes a message body with bincode.
pub fn encode<T: serde::Serialize>(value: &T, peer: usize) -> Result<Vec<u8>, CommError> {
    bincode::serialize(value).map_err(|e| CommError::Malformed { peer, reason: e.to_string() })
}

/// Deserializes a message body produced by [`encode`].
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8], peer: usize) -> Result<T, CommError> {
    bincode::deserialize(bytes).map_err(|e| CommError::Malformed { peer, reason: e.to_string() })
}
