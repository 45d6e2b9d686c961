//! ENTER/EXIT correlation
//!
//! One [`EventCorrelator`] exists per trace kind per run. It remembers the last
//! ENTER seen for each `(pid, tid)` and, when the matching EXIT arrives, turns
//! the pair into a [`Span`]:
//!
//! ```text
//! ENTER (pid, tid) ──► pending[(pid, tid)] = enter        (replaces any earlier ENTER)
//! EXIT  (pid, tid) ──► pending.remove((pid, tid))
//!                        ├─ none            → orphan, dropped
//!                        ├─ validation fail → dropped (failed syscall)
//!                        └─ ok              → Span
//! ```
//!
//! Nothing here is an error: orphans, failed calls and overwritten ENTERs are
//! only counted in [`CorrelatorStats`].

use crate::clock::ClockReconciler;
use crate::line_parser::{CallArgs, CallStatus, RawLogLine};
use crate::span_record::{IoSpan, MemorySpan, MetaSpan, Span, SpanHeader, TraceKind, UNKNOWN_FNAME};
use fnv::FnvHashMap;
use tracing::trace;

/// `(pid, tid)`: at most one call is in flight per thread
pub type CorrelationKey = (u32, u32);

/// An ENTER waiting for its EXIT
#[derive(Debug, Clone)]
struct PendingEnter {
    time_ns: u64,
    proc: String,
    operand: String,
    args: CallArgs,
}

/// Per-correlator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub enters: u64,
    pub exits: u64,
    /// EXITs with no pending ENTER
    pub orphan_exits: u64,
    /// ENTERs replaced by a later ENTER on the same key
    pub overwritten_enters: u64,
    /// Pairs discarded because fd/ret was negative
    pub rejected_pairs: u64,
    /// Pairs discarded because EXIT precedes ENTER
    pub negative_latency: u64,
    pub emitted: u64,
    /// ENTERs never matched by the end of the stream
    pub unmatched_enters: u64,
}

/// Stateful ENTER/EXIT matcher for one trace kind
#[derive(Debug)]
pub struct EventCorrelator {
    kind: TraceKind,
    clock: ClockReconciler,
    pending: FnvHashMap<CorrelationKey, PendingEnter>,
    stats: CorrelatorStats,
}

impl EventCorrelator {
    pub fn new(kind: TraceKind, clock: ClockReconciler) -> Self {
        Self {
            kind,
            clock,
            pending: FnvHashMap::default(),
            stats: CorrelatorStats::default(),
        }
    }

    pub fn kind(&self) -> TraceKind {
        self.kind
    }

    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }

    /// Number of ENTERs currently waiting for an EXIT
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed one parsed line; returns a span when the line completes a valid pair
    pub fn observe(&mut self, line: RawLogLine) -> Option<Span> {
        let key = (line.pid, line.tid);
        let args = CallArgs::from_line(self.kind, &line);

        match line.status {
            CallStatus::Enter => {
                self.stats.enters += 1;
                let enter = PendingEnter {
                    time_ns: line.time_ns,
                    proc: line.proc,
                    operand: line.operand,
                    args,
                };
                if self.pending.insert(key, enter).is_some() {
                    self.stats.overwritten_enters += 1;
                    trace!(kind = %self.kind, pid = key.0, tid = key.1, "ENTER overwrote a pending ENTER");
                }
                None
            }
            CallStatus::Exit => {
                self.stats.exits += 1;
                let Some(enter) = self.pending.remove(&key) else {
                    self.stats.orphan_exits += 1;
                    trace!(kind = %self.kind, pid = key.0, tid = key.1, "orphan EXIT dropped");
                    return None;
                };
                self.complete(key, enter, line.time_ns, args)
            }
        }
    }

    /// Drop ENTERs that never saw an EXIT; call once the input is exhausted
    pub fn finish(&mut self) -> CorrelatorStats {
        self.stats.unmatched_enters += self.pending.len() as u64;
        self.pending.clear();
        self.stats
    }

    fn complete(
        &mut self,
        key: CorrelationKey,
        enter: PendingEnter,
        exit_time_ns: u64,
        exit: CallArgs,
    ) -> Option<Span> {
        let (ret, exit_count) = match exit {
            CallArgs::Exit { ret, count } => (ret, count),
            _ => (-1, None),
        };

        let en_wall_ns = self.clock.wall_ns(enter.time_ns);
        let ex_wall_ns = self.clock.wall_ns(exit_time_ns);
        let latency_ns = ex_wall_ns.saturating_sub(en_wall_ns);
        if latency_ns < 0 {
            self.stats.negative_latency += 1;
            trace!(kind = %self.kind, pid = key.0, tid = key.1, latency_ns, "EXIT precedes ENTER, pair dropped");
            return None;
        }

        let header = SpanHeader {
            id: 0,
            en_timestamp_ns: enter.time_ns,
            en_wall_time: self.clock.wall_time(enter.time_ns),
            ex_timestamp_ns: exit_time_ns,
            ex_wall_time: self.clock.wall_time(exit_time_ns),
            latency_ns,
            pid: key.0,
            tid: key.1,
            proc: enter.proc,
            event_name: enter.operand,
        };

        let span = match (self.kind, enter.args) {
            (TraceKind::Io, CallArgs::Io { fd, count }) if fd >= 0 && ret >= 0 => Some(Span::Io(IoSpan {
                header,
                fd,
                ret,
                countbytes: count.or(exit_count).unwrap_or(0),
                fname: UNKNOWN_FNAME.to_string(),
            })),
            (TraceKind::Meta, CallArgs::Meta { fname }) if ret >= 0 => {
                Some(Span::Meta(MetaSpan { header, fname, ret }))
            }
            (TraceKind::Memory, CallArgs::Memory { fd, len, .. }) if ret >= 0 => {
                Some(Span::Memory(MemorySpan {
                    header,
                    fd,
                    ret,
                    length: len,
                }))
            }
            _ => None,
        };

        match span {
            Some(span) => {
                self.stats.emitted += 1;
                Some(span)
            }
            None => {
                self.stats.rejected_pairs += 1;
                None
            }
        }
    }
}
