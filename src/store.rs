//! Collection-level CRUD over a pluggable backend, with change notification.
//!
//! [`NoteStore`] never caches: every mutation pulls the whole collection,
//! applies the change in memory, pushes the whole collection back and only
//! then publishes it on [`NoteUpdates`]. Mutations are not serialized
//! against each other. Two overlapping calls read the same snapshot and the
//! later push overwrites the earlier one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::bridge::BridgeError;
use crate::note::Note;
use crate::remote::RemoteError;

#[derive(Debug)]
pub enum BackendError {
    Remote(RemoteError),
    Bridge(BridgeError),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Remote(e) => write!(f, "remote store: {e}"),
            BackendError::Bridge(e) => write!(f, "bridge: {e}"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<RemoteError> for BackendError {
    fn from(error: RemoteError) -> Self {
        BackendError::Remote(error)
    }
}

impl From<BridgeError> for BackendError {
    fn from(error: BridgeError) -> Self {
        BackendError::Bridge(error)
    }
}

#[derive(Debug)]
pub enum StoreError {
    DuplicateId(String),
    NotFound(String),
    Backend(BackendError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateId(id) => write!(f, "note {id} already exists"),
            StoreError::NotFound(id) => {
                write!(f, "note {id} does not exist to be updated, insert it first")
            }
            StoreError::Backend(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<BackendError> for StoreError {
    fn from(error: BackendError) -> Self {
        StoreError::Backend(error)
    }
}

/// Callback for collections delivered out of band (e.g. relayed from
/// another context).
pub type ReceiveCallback = Box<dyn Fn(Vec<Note>) + Send + Sync>;

/// Subscriber to published collections.
pub type NotesCallback = Arc<dyn Fn(&[Note]) + Send + Sync>;

/// Where the full collection lives.
pub trait NoteBackend: Send + Sync {
    fn pull(&self) -> Result<Vec<Note>, BackendError>;

    fn push(&self, notes: &[Note]) -> Result<(), BackendError>;

    /// Register for collections pushed from elsewhere. Backends without an
    /// inbound channel ignore the callback.
    fn receive(&self, callback: ReceiveCallback) {
        let _ = callback;
    }
}

impl<B: NoteBackend + ?Sized> NoteBackend for Arc<B> {
    fn pull(&self) -> Result<Vec<Note>, BackendError> {
        (**self).pull()
    }

    fn push(&self, notes: &[Note]) -> Result<(), BackendError> {
        (**self).push(notes)
    }

    fn receive(&self, callback: ReceiveCallback) {
        (**self).receive(callback)
    }
}

// ---------------------------------------------------------------------------
// Update stream
// ---------------------------------------------------------------------------

struct Subscriber {
    id: u64,
    /// Sequence number of the value current when it subscribed.
    since: u64,
    callback: NotesCallback,
}

enum Delivery {
    Publish { seq: u64, notes: Vec<Note> },
    Replay { id: u64, notes: Vec<Note> },
}

#[derive(Default)]
struct UpdatesInner {
    current: Option<Vec<Note>>,
    seq: u64,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    queue: VecDeque<Delivery>,
    draining: bool,
}

/// Replay-one publish/subscribe hub for the current collection.
///
/// A value structurally equal to the previous one (same notes, same order)
/// is not re-emitted. Values reach every subscriber in the order they were
/// published. Deliveries are queued and handed out by one thread at a time,
/// outside the internal lock: a publish made while another thread is
/// delivering returns at once and its value is delivered by that thread.
/// Callbacks may therefore publish or subscribe themselves.
#[derive(Default)]
pub struct NoteUpdates {
    inner: Mutex<UpdatesInner>,
}

impl NoteUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, UpdatesInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `notes`. Returns `false` when suppressed as a repeat.
    pub fn publish(&self, notes: Vec<Note>) -> bool {
        {
            let mut inner = self.lock();
            if inner.current.as_ref() == Some(&notes) {
                return false;
            }
            inner.seq += 1;
            let seq = inner.seq;
            inner.current = Some(notes.clone());
            inner.queue.push_back(Delivery::Publish { seq, notes });
        }
        self.drain();
        true
    }

    /// Subscribe, receiving the latest value first if there is one.
    /// Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe(self: &Arc<Self>, callback: NotesCallback) -> Subscription {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            let since = inner.seq;
            inner.subscribers.push(Subscriber {
                id,
                since,
                callback,
            });
            if let Some(notes) = inner.current.clone() {
                inner.queue.push_back(Delivery::Replay { id, notes });
            }
            id
        };
        self.drain();
        Subscription {
            updates: Arc::downgrade(self),
            id,
        }
    }

    fn drain(&self) {
        {
            let mut inner = self.lock();
            if inner.draining {
                return;
            }
            inner.draining = true;
        }
        loop {
            let (notes, targets) = {
                let mut inner = self.lock();
                let Some(delivery) = inner.queue.pop_front() else {
                    inner.draining = false;
                    return;
                };
                match delivery {
                    // Subscribers that joined after this value was current
                    // already got it, or a later one, as their replay.
                    Delivery::Publish { seq, notes } => {
                        let targets: Vec<NotesCallback> = inner
                            .subscribers
                            .iter()
                            .filter(|sub| sub.since < seq)
                            .map(|sub| Arc::clone(&sub.callback))
                            .collect();
                        (notes, targets)
                    }
                    Delivery::Replay { id, notes } => {
                        let targets: Vec<NotesCallback> = inner
                            .subscribers
                            .iter()
                            .filter(|sub| sub.id == id)
                            .map(|sub| Arc::clone(&sub.callback))
                            .collect();
                        (notes, targets)
                    }
                }
            };
            for callback in targets {
                callback(&notes);
            }
        }
    }

    pub fn current(&self) -> Option<Vec<Note>> {
        self.lock().current.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().subscribers.retain(|sub| sub.id != id);
    }
}

#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    updates: Weak<NoteUpdates>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(updates) = self.updates.upgrade() {
            updates.unsubscribe(self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct NoteStore<B> {
    backend: B,
    updates: Arc<NoteUpdates>,
}

impl<B: NoteBackend> NoteStore<B> {
    /// Pull once and publish the result as the first value, then listen for
    /// out-of-band updates from the backend.
    pub fn new(backend: B) -> Result<Self, StoreError> {
        let updates = Arc::new(NoteUpdates::new());
        let initial = backend.pull()?;
        updates.publish(initial);

        let sink = Arc::clone(&updates);
        backend.receive(Box::new(move |notes| {
            sink.publish(notes);
        }));

        Ok(Self { backend, updates })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn updates(&self) -> &Arc<NoteUpdates> {
        &self.updates
    }

    pub fn subscribe(&self, callback: impl Fn(&[Note]) + Send + Sync + 'static) -> Subscription {
        self.updates.subscribe(Arc::new(callback))
    }

    /// Fetch the collection. Does not publish.
    pub fn get_all_notes(&self) -> Result<Vec<Note>, StoreError> {
        Ok(self.backend.pull()?)
    }

    pub fn insert(&self, note: Note) -> Result<(), StoreError> {
        let mut notes = self.backend.pull()?;
        if position(&notes, note.id()).is_some() {
            return Err(StoreError::DuplicateId(note.id().to_string()));
        }
        notes.push(note);
        self.persist(notes)
    }

    pub fn update(&self, note: Note) -> Result<(), StoreError> {
        let mut notes = self.backend.pull()?;
        match position(&notes, note.id()) {
            Some(index) => notes[index] = note,
            None => return Err(StoreError::NotFound(note.id().to_string())),
        }
        self.persist(notes)
    }

    pub fn update_or_insert(&self, note: Note) -> Result<(), StoreError> {
        let mut notes = self.backend.pull()?;
        match position(&notes, note.id()) {
            Some(index) => notes[index] = note,
            None => notes.push(note),
        }
        self.persist(notes)
    }

    /// Hard-delete. Deleting an absent id still persists and publishes the
    /// unchanged collection.
    pub fn delete(&self, note: &Note) -> Result<(), StoreError> {
        let mut notes = self.backend.pull()?;
        if let Some(index) = position(&notes, note.id()) {
            notes.remove(index);
        }
        self.persist(notes)
    }

    fn persist(&self, notes: Vec<Note>) -> Result<(), StoreError> {
        self.backend.push(&notes)?;
        self.updates.publish(notes);
        Ok(())
    }
}

fn position(notes: &[Note], id: &str) -> Option<usize> {
    notes.iter().position(|n| n.id() == id)
}

// ---------------------------------------------------------------------------
// In-process backend
// ---------------------------------------------------------------------------

/// Backend keeping the collection in memory. Used for local-only sessions
/// and for exercising the store without a network.
#[derive(Default)]
pub struct MemoryBackend {
    notes: Mutex<Vec<Note>>,
    receiver: Mutex<Option<ReceiveCallback>>,
    pulls: AtomicUsize,
    pushes: Mutex<Vec<Vec<Note>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notes(notes: Vec<Note>) -> Self {
        Self {
            notes: Mutex::new(notes),
            ..Self::default()
        }
    }

    pub fn notes(&self) -> Vec<Note> {
        self.notes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::Relaxed)
    }

    /// Every collection pushed so far, oldest first.
    pub fn pushes(&self) -> Vec<Vec<Note>> {
        self.pushes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Simulate an out-of-band update: replace the collection and hand it to
    /// the registered receiver, if any.
    pub fn deliver(&self, notes: Vec<Note>) {
        *self.notes.lock().unwrap_or_else(PoisonError::into_inner) = notes.clone();
        let receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = receiver.as_ref() {
            callback(notes);
        }
    }
}

impl NoteBackend for MemoryBackend {
    fn pull(&self) -> Result<Vec<Note>, BackendError> {
        self.pulls.fetch_add(1, Ordering::Relaxed);
        Ok(self.notes())
    }

    fn push(&self, notes: &[Note]) -> Result<(), BackendError> {
        *self.notes.lock().unwrap_or_else(PoisonError::into_inner) = notes.to_vec();
        self.pushes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notes.to_vec());
        Ok(())
    }

    fn receive(&self, callback: ReceiveCallback) {
        *self.receiver.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }
}
