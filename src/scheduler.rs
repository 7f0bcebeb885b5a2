// SPDX-License-Identifier: MIT
//! Ordered chunk decoding, single-threaded or on a worker pool
//!
//! In parallel mode workers decode chunks in whatever order they finish. The
//! coordinator (the calling thread) admits chunks through an [`AdmissionGate`],
//! parks finished chunks in a [`ReorderBuffer`] and writes them to the sink
//! strictly in DOffset order. The gate counts every chunk that has been
//! dispatched but not yet written, so at most `workers * HOLDING_FACTOR`
//! decoded or in-flight chunks exist at any time.

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RacError, Result};
use crate::index::{Chunk, ResolvedRange};
use crate::range::DecodeMode;

/// Outstanding chunks allowed per worker
pub const HOLDING_FACTOR: usize = 4;

/// Turns one chunk into its plain bytes
pub trait ChunkDecoder: Sync {
    fn decode_chunk(&self, chunk: &Chunk) -> Result<Vec<u8>>;
}

/// What a decode run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeSummary {
    pub chunks: usize,
    pub bytes_written: u64,
    pub workers: usize,
}

/// Completed chunks waiting for their turn, keyed by sequence number
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    pending: BTreeMap<usize, Vec<u8>>,
    next: usize,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, seq: usize, plain: Vec<u8>) {
        debug_assert!(seq >= self.next, "chunk {} already emitted", seq);
        self.pending.insert(seq, plain);
    }

    /// Take the next chunk in sequence if it has arrived
    pub fn pop_ready(&mut self) -> Option<(usize, Vec<u8>)> {
        let plain = self.pending.remove(&self.next)?;
        let seq = self.next;
        self.next += 1;
        Some((seq, plain))
    }

    /// Sequence number of the next chunk to emit
    pub fn next_seq(&self) -> usize {
        self.next
    }

    pub fn held(&self) -> usize {
        self.pending.len()
    }
}

/// FIFO admission with a bound on dispatched-but-unemitted chunks
#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    total: usize,
    dispatched: usize,
    emitted: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize, total: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            total,
            dispatched: 0,
            emitted: 0,
        }
    }

    /// Admit the next chunk in sequence, if the bound allows
    pub fn try_admit(&mut self) -> Option<usize> {
        if self.dispatched < self.total && self.outstanding() < self.capacity {
            self.dispatched += 1;
            Some(self.dispatched - 1)
        } else {
            None
        }
    }

    /// Record that the oldest admitted chunk has been emitted
    pub fn release(&mut self) {
        debug_assert!(self.emitted < self.dispatched);
        self.emitted += 1;
    }

    pub fn outstanding(&self) -> usize {
        self.dispatched - self.emitted
    }

    pub fn is_done(&self) -> bool {
        self.emitted == self.total
    }
}

/// Number of workers for a request; zero means one per available core
pub fn effective_workers(requested: usize) -> usize {
    if requested > 0 {
        requested
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

pub struct DecodeScheduler<'a, D: ChunkDecoder + ?Sized> {
    decoder: &'a D,
    mode: DecodeMode,
    cancel: CancellationToken,
}

impl<'a, D: ChunkDecoder + ?Sized> DecodeScheduler<'a, D> {
    pub fn new(decoder: &'a D, mode: DecodeMode, cancel: CancellationToken) -> Self {
        Self {
            decoder,
            mode,
            cancel,
        }
    }

    /// Decode every chunk of `plan` and write the requested bytes to `sink`
    pub fn run<W: Write + ?Sized>(
        &self,
        plan: &ResolvedRange,
        sink: &mut W,
    ) -> Result<DecodeSummary> {
        if self.cancel.is_cancelled() {
            return Err(RacError::Cancelled);
        }

        let workers = match self.mode {
            DecodeMode::SingleThreaded => 1,
            DecodeMode::Parallel { workers } => {
                effective_workers(workers).min(plan.chunks.len()).max(1)
            }
        };
        debug!(
            "Decoding {} chunks for DSpace [{}, {}) with {} worker(s)",
            plan.chunks.len(),
            plan.start,
            plan.end,
            workers
        );

        let summary = if workers == 1 {
            self.run_serial(plan, sink)?
        } else {
            self.run_parallel(plan, sink, workers)?
        };
        sink.flush().map_err(RacError::Sink)?;
        Ok(summary)
    }

    fn run_serial<W: Write + ?Sized>(
        &self,
        plan: &ResolvedRange,
        sink: &mut W,
    ) -> Result<DecodeSummary> {
        let mut summary = DecodeSummary {
            workers: 1,
            ..DecodeSummary::default()
        };
        for chunk in &plan.chunks {
            if self.cancel.is_cancelled() {
                return Err(RacError::Cancelled);
            }
            let plain = self.decoder.decode_chunk(chunk)?;
            emit(sink, plan, chunk, &plain, &mut summary)?;
        }
        Ok(summary)
    }

    fn run_parallel<W: Write + ?Sized>(
        &self,
        plan: &ResolvedRange,
        sink: &mut W,
        workers: usize,
    ) -> Result<DecodeSummary> {
        let capacity = workers * HOLDING_FACTOR;
        let stop = self.cancel.child_token();
        let (job_tx, job_rx) = crossbeam_channel::bounded::<(usize, &Chunk)>(capacity);
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, Result<Vec<u8>>)>();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let stop = stop.clone();
                let decoder = self.decoder;
                scope.spawn(move || {
                    // Every job gets an answer so the coordinator never waits forever
                    for (seq, chunk) in job_rx.iter() {
                        let result = if stop.is_cancelled() {
                            Err(RacError::Cancelled)
                        } else {
                            decoder.decode_chunk(chunk)
                        };
                        if result_tx.send((seq, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            let outcome = self.coordinate(plan, sink, &job_tx, &result_rx, capacity, workers);
            if outcome.is_err() {
                stop.cancel();
            }
            drop(job_tx);
            outcome
        })
    }

    fn coordinate<'p, W: Write + ?Sized>(
        &self,
        plan: &'p ResolvedRange,
        sink: &mut W,
        job_tx: &Sender<(usize, &'p Chunk)>,
        result_rx: &Receiver<(usize, Result<Vec<u8>>)>,
        capacity: usize,
        workers: usize,
    ) -> Result<DecodeSummary> {
        let mut gate = AdmissionGate::new(capacity, plan.chunks.len());
        let mut reorder = ReorderBuffer::new();
        let mut summary = DecodeSummary {
            workers,
            ..DecodeSummary::default()
        };

        while !gate.is_done() {
            if self.cancel.is_cancelled() {
                return Err(RacError::Cancelled);
            }
            // The job channel is as deep as the gate, so these sends never block
            while let Some(seq) = gate.try_admit() {
                job_tx
                    .send((seq, &plan.chunks[seq]))
                    .map_err(|_| pool_gone())?;
            }

            let (seq, result) = result_rx.recv().map_err(|_| pool_gone())?;
            reorder.insert(seq, result?);
            while let Some((seq, plain)) = reorder.pop_ready() {
                emit(sink, plan, &plan.chunks[seq], &plain, &mut summary)?;
                gate.release();
            }
        }
        Ok(summary)
    }
}

fn pool_gone() -> RacError {
    RacError::Io(io::Error::other("decode worker pool shut down unexpectedly"))
}

fn emit<W: Write + ?Sized>(
    sink: &mut W,
    plan: &ResolvedRange,
    chunk: &Chunk,
    plain: &[u8],
    summary: &mut DecodeSummary,
) -> Result<()> {
    let wanted = &plain[plan.trim(chunk)];
    sink.write_all(wanted).map_err(RacError::Sink)?;
    summary.chunks += 1;
    summary.bytes_written += wanted.len() as u64;
    Ok(())
}
