//! Relay between UI surfaces and the background context that owns the real
//! backend.
//!
//! Surfaces talk to the host with three JSON messages:
//!
//! ```text
//! {"type":"pull"}                     -> reply: [note, ...]
//! {"type":"push","notes":[...]}       -> no reply
//! {"type":"notesUpdate","notes":[...]}   host -> every surface
//! ```
//!
//! [`BridgeBackend`] plugs a surface's [`NoteStore`](crate::store::NoteStore)
//! into a [`Transport`]; [`BridgeHost`] serves those requests against a real
//! backend and broadcasts every collection it publishes. [`channel`] builds
//! an in-process transport pair.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::nlog;
use crate::note::Note;
use crate::store::{BackendError, NoteBackend, NoteUpdates, ReceiveCallback, Subscription};

/// Broadcast backlog per surface before it starts missing updates.
pub const UPDATE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum BridgeError {
    /// A message did not have the expected shape.
    Protocol(String),
    /// The host answered with an error instead of a collection.
    Host(String),
    Disconnected,
    Serde(serde_json::Error),
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            BridgeError::Host(msg) => write!(f, "host error: {msg}"),
            BridgeError::Disconnected => write!(f, "background context is gone"),
            BridgeError::Serde(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serde(e)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeMessage {
    Pull,
    Push { notes: Vec<Note> },
    NotesUpdate { notes: Vec<Note> },
}

impl BridgeMessage {
    pub fn to_value(&self) -> Result<Value, BridgeError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &Value) -> Result<Self, BridgeError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Protocol("message has no type".to_string()))?;
        match kind {
            "pull" => Ok(BridgeMessage::Pull),
            "push" => Ok(BridgeMessage::Push {
                notes: decode_notes(value.get("notes"))?,
            }),
            "notesUpdate" => Ok(BridgeMessage::NotesUpdate {
                notes: decode_notes(value.get("notes"))?,
            }),
            other => Err(BridgeError::Protocol(format!(
                "unknown message type {other:?}"
            ))),
        }
    }
}

/// Rebuild notes from a relayed array of note-like records.
pub fn decode_notes(value: Option<&Value>) -> Result<Vec<Note>, BridgeError> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| Note::deserialize(item).map_err(BridgeError::from))
            .collect(),
        Some(other) => Err(BridgeError::Protocol(format!(
            "expected an array of notes, got {}",
            kind_of(other)
        ))),
        None => Err(BridgeError::Protocol("missing notes".to_string())),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub type UpdateHandler = Box<dyn Fn(Value) + Send + Sync>;

/// Response to a sent message. Dropping it makes the send fire-and-forget.
pub struct PendingReply {
    rx: oneshot::Receiver<Value>,
}

impl PendingReply {
    pub fn new(rx: oneshot::Receiver<Value>) -> Self {
        Self { rx }
    }

    /// Block until the host answers. Must not be called from async code.
    pub fn wait(self) -> Result<Value, BridgeError> {
        self.rx.blocking_recv().map_err(|_| BridgeError::Disconnected)
    }
}

/// Message channel between one surface and the host.
pub trait Transport: Send + Sync {
    fn send(&self, message: Value) -> Result<PendingReply, BridgeError>;

    /// Register for host broadcasts until the returned [`Listener`] drops.
    fn subscribe(&self, handler: UpdateHandler) -> Listener;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, message: Value) -> Result<PendingReply, BridgeError> {
        (**self).send(message)
    }

    fn subscribe(&self, handler: UpdateHandler) -> Listener {
        (**self).subscribe(handler)
    }
}

/// A broadcast registration. Dropping it stops delivery to its handler.
#[must_use = "dropping a Listener stops its updates"]
pub struct Listener {
    _stop: Option<oneshot::Sender<()>>,
}

impl Listener {
    /// Stop signal for a listener task: it must exit once `stop` is dropped.
    pub fn new(stop: oneshot::Sender<()>) -> Self {
        Self { _stop: Some(stop) }
    }

    /// For transports that never broadcast.
    pub fn inert() -> Self {
        Self { _stop: None }
    }
}

/// A request as seen by the host.
pub struct Inbound {
    pub message: Value,
    reply: oneshot::Sender<Value>,
}

impl Inbound {
    pub fn respond(self, value: Value) {
        // The surface may have stopped waiting; nothing to do then.
        let _ = self.reply.send(value);
    }
}

/// Surface end of an in-process bridge. Clone one per surface.
#[derive(Clone)]
pub struct ChannelTransport {
    requests: mpsc::UnboundedSender<Inbound>,
    updates: broadcast::Sender<Value>,
}

/// Host end of an in-process bridge.
pub struct HostChannel {
    requests: mpsc::UnboundedReceiver<Inbound>,
    updates: broadcast::Sender<Value>,
}

pub fn channel() -> (HostChannel, ChannelTransport) {
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
    (
        HostChannel {
            requests: requests_rx,
            updates: updates_tx.clone(),
        },
        ChannelTransport {
            requests: requests_tx,
            updates: updates_tx,
        },
    )
}

impl Transport for ChannelTransport {
    fn send(&self, message: Value) -> Result<PendingReply, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Inbound { message, reply })
            .map_err(|_| BridgeError::Disconnected)?;
        Ok(PendingReply::new(rx))
    }

    fn subscribe(&self, handler: UpdateHandler) -> Listener {
        let mut rx = self.updates.subscribe();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().build() {
                Ok(runtime) => runtime,
                Err(error) => {
                    nlog!("bridge: cannot start update listener: {error}");
                    return;
                }
            };
            loop {
                // The handler runs outside the runtime so it may block.
                let received = runtime.block_on(async {
                    tokio::select! {
                        _ = &mut stop_rx => None,
                        received = rx.recv() => Some(received),
                    }
                });
                match received {
                    None => break,
                    Some(Ok(message)) => handler(message),
                    Some(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                        nlog!("bridge: surface fell behind, skipped {skipped} update(s)");
                    }
                    Some(Err(broadcast::error::RecvError::Closed)) => break,
                }
            }
        });
        Listener::new(stop_tx)
    }
}

impl ChannelTransport {
    /// Surfaces currently registered for host broadcasts.
    pub fn listener_count(&self) -> usize {
        self.updates.receiver_count()
    }
}

// ---------------------------------------------------------------------------
// Surface side
// ---------------------------------------------------------------------------

/// Backend for surfaces that cannot reach storage or the network themselves.
///
/// Broadcast delivery stops when the backend drops.
pub struct BridgeBackend<T> {
    transport: T,
    listener: Mutex<Option<Listener>>,
}

impl<T: Transport> BridgeBackend<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            listener: Mutex::new(None),
        }
    }
}

impl<T: Transport> NoteBackend for BridgeBackend<T> {
    fn pull(&self) -> Result<Vec<Note>, BackendError> {
        let reply = self.transport.send(BridgeMessage::Pull.to_value()?)?.wait()?;
        if let Some(error) = reply.get("error").and_then(Value::as_str) {
            return Err(BridgeError::Host(error.to_string()).into());
        }
        Ok(decode_notes(Some(&reply))?)
    }

    fn push(&self, notes: &[Note]) -> Result<(), BackendError> {
        let message = BridgeMessage::Push {
            notes: notes.to_vec(),
        }
        .to_value()?;
        self.transport.send(message)?;
        Ok(())
    }

    fn receive(&self, callback: ReceiveCallback) {
        let listener = self.transport.subscribe(Box::new(move |message| {
            match BridgeMessage::from_value(&message) {
                Ok(BridgeMessage::NotesUpdate { notes }) => callback(notes),
                Ok(_) => {}
                Err(error) => nlog!("bridge: bad update from host: {error}"),
            }
        }));
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }
}

// ---------------------------------------------------------------------------
// Host side
// ---------------------------------------------------------------------------

/// The background context: answers surfaces from the real backend and
/// broadcasts every collection it publishes as `notesUpdate`.
pub struct BridgeHost<B> {
    backend: B,
    channel: HostChannel,
    updates: Arc<NoteUpdates>,
    _relay: Subscription,
}

impl<B: NoteBackend> BridgeHost<B> {
    pub fn new(backend: B, channel: HostChannel) -> Self {
        let updates = Arc::new(NoteUpdates::new());

        let tx = channel.updates.clone();
        let relay = updates.subscribe(Arc::new(move |notes: &[Note]| send_update(&tx, notes)));

        let sink = Arc::clone(&updates);
        backend.receive(Box::new(move |notes| {
            sink.publish(notes);
        }));

        Self {
            backend,
            channel,
            updates,
            _relay: relay,
        }
    }

    pub fn updates(&self) -> &Arc<NoteUpdates> {
        &self.updates
    }

    /// Handle requests in arrival order until every surface has dropped its
    /// transport.
    pub fn serve(mut self) {
        while let Some(inbound) = self.channel.requests.blocking_recv() {
            self.handle(inbound);
        }
        nlog!("bridge: all surfaces disconnected");
    }

    pub fn spawn(self) -> JoinHandle<()>
    where
        B: 'static,
    {
        std::thread::spawn(move || self.serve())
    }

    fn handle(&self, inbound: Inbound) {
        let message = match BridgeMessage::from_value(&inbound.message) {
            Ok(message) => message,
            Err(error) => {
                nlog!("bridge: dropping message: {error}");
                return;
            }
        };

        match message {
            BridgeMessage::Pull => {
                let reply = match self.backend.pull() {
                    Ok(notes) => serde_json::to_value(notes).map_err(|e| e.to_string()),
                    Err(error) => Err(error.to_string()),
                };
                match reply {
                    Ok(value) => inbound.respond(value),
                    Err(error) => {
                        nlog!("bridge: pull failed: {error}");
                        inbound.respond(serde_json::json!({ "error": error }));
                    }
                }
            }
            BridgeMessage::Push { notes } => match self.backend.push(&notes) {
                Ok(()) => {
                    // A repeat is still relayed: surfaces may hold older state.
                    if !self.updates.publish(notes.clone()) {
                        send_update(&self.channel.updates, &notes);
                    }
                }
                Err(error) => nlog!("bridge: push of {} note(s) failed: {error}", notes.len()),
            },
            BridgeMessage::NotesUpdate { .. } => {
                nlog!("bridge: ignoring notesUpdate sent to the host");
            }
        }
    }
}

fn send_update(tx: &broadcast::Sender<Value>, notes: &[Note]) {
    let message = BridgeMessage::NotesUpdate {
        notes: notes.to_vec(),
    };
    match message.to_value() {
        // No surface listening yet is fine.
        Ok(value) => {
            let _ = tx.send(value);
        }
        Err(error) => nlog!("bridge: cannot encode update: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_use_extension_wire_names() {
        let note = Note::new("n1", "t", "c", "u").unwrap();
        assert_eq!(BridgeMessage::Pull.to_value().unwrap(), json!({"type": "pull"}));
        assert_eq!(
            BridgeMessage::NotesUpdate { notes: vec![note] }.to_value().unwrap(),
            json!({
                "type": "notesUpdate",
                "notes": [{"id": "n1", "title": "t", "content": "c", "url": "u"}]
            })
        );
    }

    #[test]
    fn from_value_rejects_non_array_notes() {
        let err = BridgeMessage::from_value(&json!({"type": "push", "notes": {"id": "n1"}}))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }

    #[test]
    fn from_value_rejects_unknown_type() {
        let err = BridgeMessage::from_value(&json!({"type": "reset"})).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }

    #[test]
    fn decode_notes_rebuilds_entities() {
        let notes = decode_notes(Some(&json!([
            {"id": "a", "title": "first"},
            {"id": "b", "softDeleted": "2025-10-09T08:53:20Z"}
        ])))
        .unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].title, "first");
        assert_eq!(notes[0].url, "");
        assert!(notes[1].is_soft_deleted());
    }

    #[test]
    fn decode_notes_rejects_invalid_record() {
        let err = decode_notes(Some(&json!([{"title": "no id"}]))).unwrap_err();
        assert!(matches!(err, BridgeError::Serde(_)));
    }

    #[test]
    fn send_after_host_drop_is_disconnected() {
        let (host, transport) = channel();
        drop(host);
        assert!(matches!(
            transport.send(json!({"type": "pull"})),
            Err(BridgeError::Disconnected)
        ));
    }
}
