//! Surfaces and a background host wired through the in-process bridge.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::oneshot;

use pagenotes::bridge::{
    channel, BridgeBackend, BridgeError, BridgeHost, ChannelTransport, Listener, PendingReply,
    Transport, UpdateHandler,
};
use pagenotes::note::Note;
use pagenotes::store::{
    BackendError, MemoryBackend, NoteBackend, NoteStore, StoreError, Subscription,
};

type Surface = NoteStore<BridgeBackend<ChannelTransport>>;
type Seen = Arc<Mutex<Vec<Vec<Note>>>>;

fn note(id: &str) -> Note {
    Note::new(id, "title", "text", "https://www.example.com/").expect("valid note")
}

fn start_host(backend: Arc<MemoryBackend>) -> (ChannelTransport, JoinHandle<()>) {
    let (host_channel, transport) = channel();
    let handle = BridgeHost::new(backend, host_channel).spawn();
    (transport, handle)
}

fn surface(transport: &ChannelTransport) -> Surface {
    NoteStore::new(BridgeBackend::new(transport.clone())).expect("surface pulls")
}

fn record(store: &Surface) -> (Seen, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = store.subscribe(move |notes| sink.lock().unwrap().push(notes.to_vec()));
    (seen, subscription)
}

/// Poll until `check` holds or a couple of seconds pass.
fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

#[test]
fn surface_starts_from_host_collection() {
    let backend = Arc::new(MemoryBackend::with_notes(vec![note("a")]));
    let (transport, _host) = start_host(backend);

    let popup = surface(&transport);

    assert_eq!(popup.updates().current(), Some(vec![note("a")]));
    assert_eq!(popup.get_all_notes().unwrap(), vec![note("a")]);
}

#[test]
fn insert_on_one_surface_reaches_the_other() {
    let backend = Arc::new(MemoryBackend::new());
    let (transport, _host) = start_host(Arc::clone(&backend));
    let popup = surface(&transport);
    let sidepanel = surface(&transport);
    let (seen, _sub) = record(&sidepanel);

    popup.insert(note("a")).unwrap();

    assert!(wait_for(|| seen.lock().unwrap().last() == Some(&vec![note("a")])));
    assert!(wait_for(|| backend.notes() == vec![note("a")]));
}

#[test]
fn originating_surface_is_not_notified_twice() {
    let backend = Arc::new(MemoryBackend::new());
    let (transport, _host) = start_host(Arc::clone(&backend));
    let popup = surface(&transport);
    let sidepanel = surface(&transport);
    let (popup_seen, _popup_sub) = record(&popup);
    let (sidepanel_seen, _sidepanel_sub) = record(&sidepanel);

    popup.insert(note("a")).unwrap();

    assert!(wait_for(|| sidepanel_seen.lock().unwrap().len() == 2));
    // Give the broadcast to the popup time to arrive as well.
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(*popup_seen.lock().unwrap(), vec![vec![], vec![note("a")]]);
}

#[test]
fn host_side_changes_are_broadcast() {
    let backend = Arc::new(MemoryBackend::new());
    let (transport, _host) = start_host(Arc::clone(&backend));
    let popup = surface(&transport);
    let (seen, _sub) = record(&popup);

    backend.deliver(vec![note("from-elsewhere")]);

    assert!(wait_for(|| {
        seen.lock().unwrap().last() == Some(&vec![note("from-elsewhere")])
    }));
}

#[test]
fn host_stops_once_every_surface_is_gone() {
    let backend = Arc::new(MemoryBackend::new());
    let (transport, host) = start_host(backend);
    let popup = surface(&transport);
    popup.insert(note("a")).unwrap();

    drop(popup);
    drop(transport);

    host.join().expect("host thread exits cleanly");
}

#[test]
fn dropped_surfaces_stop_listening() {
    let (transport, _host) = start_host(Arc::new(MemoryBackend::new()));
    let surfaces: Vec<Surface> = (0..5).map(|_| surface(&transport)).collect();
    let hubs: Vec<_> = surfaces.iter().map(|s| Arc::downgrade(s.updates())).collect();
    assert_eq!(transport.listener_count(), 5);

    drop(surfaces);

    assert!(wait_for(|| transport.listener_count() == 0));
    assert!(wait_for(|| hubs.iter().all(|hub| hub.upgrade().is_none())));
}

#[test]
fn unchanged_push_is_still_relayed_to_stale_surfaces() {
    let backend = Arc::new(MemoryBackend::new());
    let (transport, _host) = start_host(Arc::clone(&backend));
    let popup = surface(&transport);
    popup.insert(note("a")).unwrap();
    assert!(wait_for(|| backend.notes() == vec![note("a")]));

    // Storage changes behind the host, so the side panel starts out empty.
    backend.push(&[]).unwrap();
    let sidepanel = surface(&transport);
    backend.push(&[note("a")]).unwrap();
    let (seen, _sub) = record(&sidepanel);

    // Rewrites [a], the same collection the host last broadcast.
    popup.delete(&note("zzz")).unwrap();

    assert!(wait_for(|| seen.lock().unwrap().last() == Some(&vec![note("a")])));
}

#[test]
fn failed_host_pull_is_reported_to_the_surface() {
    struct Offline;

    impl NoteBackend for Offline {
        fn pull(&self) -> Result<Vec<Note>, BackendError> {
            Err(BridgeError::Disconnected.into())
        }

        fn push(&self, _notes: &[Note]) -> Result<(), BackendError> {
            Err(BridgeError::Disconnected.into())
        }
    }

    let (host_channel, transport) = channel();
    let _host = BridgeHost::new(Offline, host_channel).spawn();

    let result = NoteStore::new(BridgeBackend::new(transport));

    assert!(matches!(
        result,
        Err(StoreError::Backend(BackendError::Bridge(BridgeError::Host(_))))
    ));
}

/// Answers every request with the same canned value.
struct CannedTransport {
    reply: Value,
    sent: Mutex<Vec<Value>>,
}

impl Transport for CannedTransport {
    fn send(&self, message: Value) -> Result<PendingReply, BridgeError> {
        self.sent.lock().unwrap().push(message);
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(self.reply.clone());
        Ok(PendingReply::new(rx))
    }

    fn subscribe(&self, _handler: UpdateHandler) -> Listener {
        Listener::inert()
    }
}

#[test]
fn non_array_pull_reply_is_a_protocol_error() {
    let backend = BridgeBackend::new(CannedTransport {
        reply: json!({"id": "a"}),
        sent: Mutex::new(Vec::new()),
    });

    let result = backend.pull();

    assert!(matches!(
        result,
        Err(BackendError::Bridge(BridgeError::Protocol(_)))
    ));
}

#[test]
fn push_sends_the_whole_collection() {
    let transport = Arc::new(CannedTransport {
        reply: Value::Null,
        sent: Mutex::new(Vec::new()),
    });
    let backend = BridgeBackend::new(Arc::clone(&transport));

    backend.push(&[note("a"), note("b")]).unwrap();

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "push");
    assert_eq!(sent[0]["notes"].as_array().map(Vec::len), Some(2));
}
