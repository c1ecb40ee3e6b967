//! Trace sinks - pluggable implementations of spec.md §6.3's two
//! optional outputs: a textual graph dump and a per-worker signal-trace
//! of timestamped state transitions.
//!
//! Grounded in the original's `VCDDump`/`dot.h`: a per-worker state
//! machine (`idle`/`evaluate`/`blocked`/`local_gc`/`global_gc`) emitted
//! as timestamped events, plus an on-demand adjacency-list dump of the
//! term graph reachable from a labeled root set. SPEC_FULL.md's ambient
//! section keeps these behind one [`TraceSink`] trait rather than
//! hardwired file I/O, so the test suite can substitute
//! [`InMemorySink`] for either output.

use crate::term::TermPtr;
use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-worker state, matching the original VCD dump's state characters
/// (`idle='0'`, `evaluate='1'`, `blocked='z'`, `local_gc='w'`,
/// `global_gc='-'`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Startup,
    Idle,
    Evaluate,
    Blocked,
    LocalGc,
    GlobalGc,
}

impl WorkerState {
    fn code(self) -> char {
        match self {
            WorkerState::Startup => 'X',
            WorkerState::Idle => '0',
            WorkerState::Evaluate => '1',
            WorkerState::Blocked => 'z',
            WorkerState::LocalGc => 'w',
            WorkerState::GlobalGc => '-',
        }
    }
}

/// One labeled node, as seen by the graph-dump sink: enough to render
/// an adjacency list without re-deriving labels from raw addresses.
#[cfg_attr(feature = "trace-json", derive(serde::Serialize))]
pub struct DumpNode {
    pub id: usize,
    pub label: String,
    pub children: Vec<usize>,
}

/// Implemented by anything that wants to observe worker state
/// transitions, memory samples, and on-demand graph dumps. The engine
/// calls these; what happens with the data is up to the sink.
pub trait TraceSink: Send + Sync {
    fn record_transition(&self, worker_id: usize, state: WorkerState, at: Instant);
    fn record_mem_sample(&self, worker_id: usize, bytes: usize, at: Instant);
    fn dump_graph(&self, nodes: &[DumpNode]);
}

/// Discards everything. The default when no tracing is requested.
pub struct NullSink;

impl TraceSink for NullSink {
    fn record_transition(&self, _worker_id: usize, _state: WorkerState, _at: Instant) {}
    fn record_mem_sample(&self, _worker_id: usize, _bytes: usize, _at: Instant) {}
    fn dump_graph(&self, _nodes: &[DumpNode]) {}
}

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub worker_id: usize,
    pub state: WorkerState,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct MemSample {
    pub worker_id: usize,
    pub bytes: usize,
    pub at: Instant,
}

/// Buffers everything in memory - used by tests and as the default
/// sink for programmatic embedding where there's no reason to touch the
/// filesystem.
#[derive(Default)]
pub struct InMemorySink {
    transitions: Mutex<Vec<Transition>>,
    samples: Mutex<Vec<MemSample>>,
    dumps: Mutex<Vec<Vec<DumpNode>>>,
}

impl InMemorySink {
    pub fn new() -> InMemorySink {
        InMemorySink::default()
    }

    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions.lock().unwrap().clone()
    }

    pub fn mem_samples(&self) -> Vec<MemSample> {
        self.samples.lock().unwrap().clone()
    }

    pub fn dump_count(&self) -> usize {
        self.dumps.lock().unwrap().len()
    }
}

impl Clone for Transition {
    fn clone(&self) -> Self {
        *self
    }
}
impl Clone for MemSample {
    fn clone(&self) -> Self {
        *self
    }
}

impl TraceSink for InMemorySink {
    fn record_transition(&self, worker_id: usize, state: WorkerState, at: Instant) {
        self.transitions.lock().unwrap().push(Transition { worker_id, state, at });
    }
    fn record_mem_sample(&self, worker_id: usize, bytes: usize, at: Instant) {
        self.samples.lock().unwrap().push(MemSample { worker_id, bytes, at });
    }
    fn dump_graph(&self, nodes: &[DumpNode]) {
        self.dumps.lock().unwrap().push(
            nodes
                .iter()
                .map(|n| DumpNode {
                    id: n.id,
                    label: n.label.clone(),
                    children: n.children.clone(),
                })
                .collect(),
        );
    }
}

/// One file per worker, `<prefix>_w<id>.trace`: a timestamped line per
/// state transition, plus occasional memory-usage samples, mirroring
/// the original's per-worker VCD file. The adjacency-list graph dump
/// goes to `<prefix>.dot`-style snapshots, one file per call.
pub struct FileSink {
    prefix: String,
    start: Instant,
    files: Mutex<std::collections::HashMap<usize, std::fs::File>>,
    dump_seq: Mutex<u64>,
}

impl FileSink {
    pub fn new(prefix: impl Into<String>) -> FileSink {
        FileSink {
            prefix: prefix.into(),
            start: Instant::now(),
            files: Mutex::new(std::collections::HashMap::new()),
            dump_seq: Mutex::new(0),
        }
    }

    fn millis_since_start(&self, at: Instant) -> u128 {
        at.saturating_duration_since(self.start).as_millis()
    }

    fn with_worker_file<F: FnOnce(&mut std::fs::File)>(&self, worker_id: usize, f: F) {
        let mut files = self.files.lock().unwrap();
        let file = files.entry(worker_id).or_insert_with(|| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(format!("{}_w{}.trace", self.prefix, worker_id))
                .expect("trace sink failed to open per-worker trace file")
        });
        f(file);
    }
}

impl TraceSink for FileSink {
    fn record_transition(&self, worker_id: usize, state: WorkerState, at: Instant) {
        let ts = self.millis_since_start(at);
        self.with_worker_file(worker_id, |f| {
            let _ = writeln!(f, "{} {}", ts, state.code());
        });
    }

    fn record_mem_sample(&self, worker_id: usize, bytes: usize, at: Instant) {
        let ts = self.millis_since_start(at);
        self.with_worker_file(worker_id, |f| {
            let _ = writeln!(f, "{} mem {}", ts, bytes);
        });
    }

    fn dump_graph(&self, nodes: &[DumpNode]) {
        let seq = {
            let mut s = self.dump_seq.lock().unwrap();
            *s += 1;
            *s
        };

        #[cfg(feature = "trace-json")]
        {
            let path = format!("{}_{seq}.json", self.prefix);
            if let Ok(body) = serde_json::to_string_pretty(nodes) {
                let _ = std::fs::write(path, body);
            }
            return;
        }

        #[cfg(not(feature = "trace-json"))]
        {
            let path = format!("{}_{seq}.graph", self.prefix);
            let mut body = String::new();
            for n in nodes {
                let _ = write!(body, "{} \"{}\" ->", n.id, n.label);
                for c in &n.children {
                    let _ = write!(body, " {}", c);
                }
                body.push('\n');
            }
            let _ = std::fs::write(path, body);
        }
    }
}

/// Build a [`DumpNode`] list by walking `roots` breadth-first through
/// [`TermPtr::children`], labeling each node by its declared label or a
/// tag-derived placeholder.
pub fn snapshot_graph(roots: &[TermPtr]) -> Vec<DumpNode> {
    use std::collections::{HashMap, VecDeque};

    let mut id_of: HashMap<usize, usize> = HashMap::new();
    let mut nodes = Vec::new();
    let mut queue: VecDeque<TermPtr> = roots.iter().copied().collect();

    for r in roots {
        id_of.entry(r.addr()).or_insert_with(|| id_of.len());
    }

    while let Some(t) = queue.pop_front() {
        let id = *id_of.entry(t.addr()).or_insert_with(|| id_of.len());
        if nodes.iter().any(|n: &DumpNode| n.id == id) {
            continue;
        }
        let label = t
            .get()
            .label
            .as_deref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("{:?}", t.tag()));
        let mut children = Vec::new();
        for child in t.children() {
            let seen_before = id_of.contains_key(&child.addr());
            let cid = *id_of.entry(child.addr()).or_insert_with(|| id_of.len());
            children.push(cid);
            if !seen_before {
                queue.push_back(child);
            }
        }
        nodes.push(DumpNode { id, label, children });
    }

    nodes
}

/// Worker 0's periodic graph-dump timer cadence, when enabled - kept
/// distinct from the global GC timer interval so the two can be tuned
/// independently.
pub const DEFAULT_DOT_DUMP_INTERVAL: Duration = Duration::from_secs(5);
