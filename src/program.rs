//! Shader program readiness.
//!
//! Programs move `Uncompiled -> Compiling -> Ready`, or end in `Failed` when
//! the backend rejects the source. Work that needs a program registers a
//! continuation against it; continuations wait here until the program is
//! reported ready and are then handed to the engine, in completion order, to
//! run on the next tick.

use std::collections::{HashMap, VecDeque};

use crate::engine::Engine;
use crate::error::BackendError;
use crate::gpu::{ProgramDescriptor, ProgramId};

/// Compile state of a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramState {
    /// Created but not submitted (the context was lost at creation).
    Uncompiled,
    /// Submitted to the backend, completion not reported yet.
    Compiling,
    /// Usable for draws.
    Ready,
    /// The backend rejected the program.
    Failed,
}

/// Deferred work run once a program is ready.
pub(crate) type Continuation = Box<dyn FnOnce(&Engine)>;

struct ProgramEntry {
    descriptor: ProgramDescriptor,
    state: ProgramState,
    pending: Vec<Continuation>,
    error: Option<BackendError>,
}

/// Every live program plus the continuations waiting on them.
///
/// The table never runs continuations itself. Anything it hands back (ready
/// or cancelled) must be dropped or run by the caller after releasing its
/// borrow of the table, since a continuation may own objects whose drop
/// releases programs.
#[derive(Default)]
pub(crate) struct ProgramTable {
    entries: HashMap<ProgramId, ProgramEntry>,
    ready: VecDeque<(ProgramId, Continuation)>,
}

impl ProgramTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ProgramId, descriptor: ProgramDescriptor) {
        self.entries.insert(
            id,
            ProgramEntry {
                descriptor,
                state: ProgramState::Uncompiled,
                pending: Vec::new(),
                error: None,
            },
        );
    }

    pub fn state(&self, id: ProgramId) -> Option<ProgramState> {
        self.entries.get(&id).map(|entry| entry.state)
    }

    pub fn error(&self, id: ProgramId) -> Option<&BackendError> {
        self.entries.get(&id).and_then(|entry| entry.error.as_ref())
    }

    pub fn descriptor(&self, id: ProgramId) -> Option<&ProgramDescriptor> {
        self.entries.get(&id).map(|entry| &entry.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn set_compiling(&mut self, id: ProgramId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.state = ProgramState::Compiling;
            entry.error = None;
        }
    }

    /// Whether continuations of `id` are waiting in the ready queue.
    pub fn has_queued(&self, id: ProgramId) -> bool {
        self.ready.iter().any(|(queued, _)| *queued == id)
    }

    /// Parks a continuation until `id` is ready. Returns it back when the
    /// program is unknown or failed.
    pub fn enqueue(
        &mut self,
        id: ProgramId,
        continuation: Continuation,
    ) -> Result<(), Continuation> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Err(continuation);
        };
        match entry.state {
            ProgramState::Uncompiled | ProgramState::Compiling => {
                entry.pending.push(continuation);
                Ok(())
            }
            // Behind continuations of the same program still queued.
            ProgramState::Ready => {
                self.ready.push_back((id, continuation));
                Ok(())
            }
            ProgramState::Failed => Err(continuation),
        }
    }

    /// Records a successful compile and queues the program's continuations.
    pub fn mark_ready(&mut self, id: ProgramId) -> usize {
        let Some(entry) = self.entries.get_mut(&id) else {
            return 0;
        };
        entry.state = ProgramState::Ready;
        let pending = std::mem::take(&mut entry.pending);
        let count = pending.len();
        self.ready
            .extend(pending.into_iter().map(|continuation| (id, continuation)));
        count
    }

    /// Records a failed compile. Returns the continuations that will never
    /// run.
    pub fn mark_failed(&mut self, id: ProgramId, error: BackendError) -> Vec<Continuation> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Vec::new();
        };
        entry.state = ProgramState::Failed;
        entry.error = Some(error);
        std::mem::take(&mut entry.pending)
    }

    /// Forgets a program. Returns its cancelled continuations.
    pub fn remove(&mut self, id: ProgramId) -> Vec<Continuation> {
        let mut cancelled: Vec<Continuation> = self
            .entries
            .remove(&id)
            .map(|entry| entry.pending)
            .unwrap_or_default();

        let mut kept = VecDeque::with_capacity(self.ready.len());
        for (queued, continuation) in self.ready.drain(..) {
            if queued == id {
                cancelled.push(continuation);
            } else {
                kept.push_back((queued, continuation));
            }
        }
        self.ready = kept;
        cancelled
    }

    pub fn pop_ready(&mut self) -> Option<(ProgramId, Continuation)> {
        self.ready.pop_front()
    }

    pub fn queued_len(&self) -> usize {
        self.ready.len()
    }

    /// Puts every program back to `Compiling` after a context restore.
    ///
    /// Continuations already queued for running go back to their program so
    /// they wait for the recompile. Returns what needs resubmitting.
    pub fn prepare_resubmit(&mut self) -> Vec<(ProgramId, ProgramDescriptor)> {
        let queued: Vec<(ProgramId, Continuation)> = self.ready.drain(..).collect();
        for (id, continuation) in queued {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.pending.push(continuation);
            }
        }

        let mut resubmit: Vec<(ProgramId, ProgramDescriptor)> = self
            .entries
            .iter_mut()
            .filter(|(_, entry)| entry.state != ProgramState::Failed)
            .map(|(id, entry)| {
                entry.state = ProgramState::Compiling;
                (*id, entry.descriptor.clone())
            })
            .collect();
        resubmit.sort_by_key(|(id, _)| *id);
        resubmit
    }
}
