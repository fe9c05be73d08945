#[cfg(test)]
mod tests {
    use crate::controller::{ChatController, SendOutcome, SendRequest};
    use crate::controls::ControlState;
    use crate::decode::Utf8ChunkDecoder;
    use crate::event_bus::EventBus;
    use crate::generation::{consume_stream, GenerationGuard, GenerationState, StreamOutcome};
    use crate::health::{race_timeout, Connectivity, HealthMonitor};
    use crate::ports::*;
    use crate::store::SessionStore;
    use crate::transfer;
    use chat_types::{
        ChatError, Result,
        config::{ChatSettings, ClientConfig, StorageKeys, DEFAULT_PERSONA},
        event::ChatEvent,
        message::{Message, Role},
        session::{ChatSession, DEFAULT_TITLE, STOPPED_BY_USER},
        wire::ChatWireRequest,
    };
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use futures::{future, stream};
    use futures::executor::block_on;
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, VecDeque};
    use std::rc::Rc;
    use std::task::Poll;

    // ─── Mocks ───────────────────────────────────────────────

    #[derive(Default)]
    struct MockStorage {
        data: RefCell<HashMap<String, String>>,
        fail_reads: Cell<bool>,
        fail_writes: Cell<bool>,
    }

    impl StoragePort for MockStorage {
        fn get(&self, key: &str) -> Result<Option<String>> {
            if self.fail_reads.get() {
                return Err(ChatError::Storage("read refused".to_string()));
            }
            Ok(self.data.borrow().get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if self.fail_writes.get() {
                return Err(ChatError::Storage("quota exceeded".to_string()));
            }
            self.data.borrow_mut().insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.data.borrow_mut().remove(key);
            Ok(())
        }

        fn backend_name(&self) -> &str {
            "mock"
        }
    }

    #[derive(Default)]
    struct MockBackend {
        health: RefCell<VecDeque<Result<u16>>>,
        chunks: RefCell<Vec<Result<Vec<u8>>>>,
        live_stream: RefCell<Option<ByteStream>>,
        requests: RefCell<Vec<ChatWireRequest>>,
    }

    impl MockBackend {
        fn with_chunks(chunks: &[&str]) -> Self {
            let backend = Self::default();
            *backend.chunks.borrow_mut() =
                chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
            backend
        }

        fn last_request(&self) -> ChatWireRequest {
            self.requests.borrow().last().cloned().expect("no request sent")
        }
    }

    #[async_trait(?Send)]
    impl ChatBackendPort for MockBackend {
        async fn health(&self, timeout_ms: u64) -> Result<u16> {
            self.health
                .borrow_mut()
                .pop_front()
                .unwrap_or(Err(ChatError::Timeout(timeout_ms)))
        }

        fn open_chat(&self, req: ChatWireRequest) -> ByteStream {
            self.requests.borrow_mut().push(req);
            if let Some(stream) = self.live_stream.borrow_mut().take() {
                return stream;
            }
            let chunks: Vec<_> = self.chunks.borrow_mut().drain(..).collect();
            Box::pin(futures::stream::iter(chunks))
        }
    }

    fn new_store(storage: &Rc<MockStorage>) -> SessionStore {
        SessionStore::new(storage.clone(), StorageKeys::default(), DEFAULT_PERSONA)
    }

    fn loaded_store(storage: &Rc<MockStorage>) -> SessionStore {
        let mut store = new_store(storage);
        store.load();
        store
    }

    fn session(id: &str, title: &str, pinned: bool) -> ChatSession {
        let mut s = ChatSession::new(id.to_string(), DEFAULT_PERSONA);
        s.title = title.to_string();
        s.pinned = pinned;
        s
    }

    fn seed(storage: &Rc<MockStorage>, sessions: &[ChatSession]) {
        let keys = StorageKeys::default();
        storage.set(&keys.sessions, &serde_json::to_string(sessions).unwrap()).unwrap();
    }

    fn ids(store: &SessionStore) -> Vec<String> {
        store.sessions().iter().map(|s| s.id.clone()).collect()
    }

    fn controller_with(
        storage: Rc<MockStorage>,
        backend: Rc<MockBackend>,
    ) -> ChatController {
        let controller = ChatController::new(
            ClientConfig::default(),
            storage,
            backend,
            EventBus::new(),
        );
        controller.load();
        controller.bus().drain();
        controller
    }

    fn send_request(controller: &ChatController, text: &str) -> SendRequest {
        SendRequest {
            session_id: controller.current_session().unwrap().id,
            text: text.to_string(),
            persona: "You are terse.".to_string(),
            temperature: 0.7,
        }
    }

    async fn yield_now() {
        let mut yielded = false;
        futures::future::poll_fn(|cx| {
            if yielded {
                Poll::Ready(())
            } else {
                yielded = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        })
        .await
    }

    fn deltas(events: &[ChatEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::StreamDelta { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    // ─── EventBus Tests ──────────────────────────────────────

    #[test]
    fn test_event_bus_buffers_without_listener() {
        let bus = EventBus::new();
        assert!(!bus.has_pending());
        bus.emit(ChatEvent::SessionsChanged);
        bus.emit(ChatEvent::ConnectivityChanged { online: false });
        assert!(bus.has_pending());
        assert_eq!(bus.drain().len(), 2);
        assert!(bus.drain().is_empty());
    }

    #[test]
    fn test_event_bus_delivers_to_listener() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        bus.emit(ChatEvent::SessionsChanged);
        assert_eq!(seen.borrow().as_slice(), &[ChatEvent::SessionsChanged]);
        assert!(!bus.has_pending());
    }

    #[test]
    fn test_event_bus_clone_shares_state() {
        let bus1 = EventBus::new();
        let bus2 = bus1.clone();
        bus1.emit(ChatEvent::SessionsChanged);
        assert!(bus2.has_pending());
        assert_eq!(bus2.drain().len(), 1);
        assert!(!bus1.has_pending());
    }

    // ─── SessionStore Tests ──────────────────────────────────

    #[test]
    fn test_load_missing_creates_fresh_session() {
        let storage = Rc::new(MockStorage::default());
        let store = loaded_store(&storage);
        assert_eq!(store.len(), 1);
        let current = store.current().unwrap();
        assert_eq!(current.title, DEFAULT_TITLE);
        assert_eq!(current.persona, DEFAULT_PERSONA);
        assert!(current.messages.is_empty());
    }

    #[test]
    fn test_load_corrupt_blob_is_soft() {
        let storage = Rc::new(MockStorage::default());
        storage.set("chat:sessions", "{not json").unwrap();
        let store = loaded_store(&storage);
        assert_eq!(store.len(), 1);
        assert!(store.current().is_some());
    }

    #[test]
    fn test_load_non_array_blob_is_soft() {
        let storage = Rc::new(MockStorage::default());
        storage.set("chat:sessions", r#"{"id":"a"}"#).unwrap();
        assert_eq!(loaded_store(&storage).len(), 1);
    }

    #[test]
    fn test_load_storage_failure_is_soft() {
        let storage = Rc::new(MockStorage::default());
        storage.fail_reads.set(true);
        let store = loaded_store(&storage);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_load_restores_active_pointer() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "A", false), session("b", "B", false)]);
        storage.set("chat:current", "b").unwrap();
        let store = loaded_store(&storage);
        assert_eq!(store.current_id(), Some("b"));
    }

    #[test]
    fn test_load_unknown_active_pointer_falls_back_to_first() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "A", false), session("b", "B", true)]);
        storage.set("chat:current", "gone").unwrap();
        let store = loaded_store(&storage);
        assert_eq!(ids(&store), vec!["b", "a"]);
        assert_eq!(store.current_id(), Some("b"));
    }

    #[test]
    fn test_load_drops_duplicate_ids() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "first", false), session("a", "second", false)]);
        let store = loaded_store(&storage);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().title, "first");
    }

    #[test]
    fn test_create_lands_after_pinned_and_becomes_current() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("p", "Pinned", true), session("u", "Unpinned", false)]);
        let mut store = loaded_store(&storage);

        let id = store.create();
        assert_eq!(ids(&store), vec!["p".to_string(), id.clone(), "u".to_string()]);
        assert_eq!(store.current_id(), Some(id.as_str()));
        assert_eq!(storage.get("chat:current").unwrap(), Some(id));
    }

    #[test]
    fn test_create_ids_are_unique() {
        let storage = Rc::new(MockStorage::default());
        let mut store = loaded_store(&storage);
        for _ in 0..20 {
            store.create();
        }
        let mut all = ids(&store);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 21);
    }

    #[test]
    fn test_rename() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "A", false)]);
        let mut store = loaded_store(&storage);

        assert!(store.rename("a", "  Trip planning  "));
        assert_eq!(store.get("a").unwrap().title, "Trip planning");
        assert!(!store.rename("a", "   "));
        assert!(!store.rename("a", ""));
        assert_eq!(store.get("a").unwrap().title, "Trip planning");
        assert!(!store.rename("missing", "x"));
    }

    #[test]
    fn test_toggle_pin_resorts() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "A", false), session("b", "B", false), session("c", "C", false)]);
        let mut store = loaded_store(&storage);

        assert!(store.toggle_pin("c"));
        assert_eq!(ids(&store), vec!["c", "a", "b"]);
        assert!(store.toggle_pin("c"));
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
        assert!(!store.toggle_pin("missing"));
    }

    #[test]
    fn test_sort_is_stable_partition() {
        let storage = Rc::new(MockStorage::default());
        seed(
            &storage,
            &[
                session("u1", "", false),
                session("p1", "", true),
                session("u2", "", false),
                session("p2", "", true),
                session("u3", "", false),
            ],
        );
        let store = loaded_store(&storage);
        assert_eq!(ids(&store), vec!["p1", "p2", "u1", "u2", "u3"]);
    }

    #[test]
    fn test_delete_last_session_creates_fresh_one() {
        let storage = Rc::new(MockStorage::default());
        let mut store = loaded_store(&storage);
        let only = store.current_id().unwrap().to_string();

        assert!(store.delete(&only));
        assert_eq!(store.len(), 1);
        assert_ne!(store.current_id(), Some(only.as_str()));
        assert!(store.current().is_some());
    }

    #[test]
    fn test_delete_active_moves_pointer_to_first() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "A", false), session("b", "B", false), session("c", "C", false)]);
        storage.set("chat:current", "b").unwrap();
        let mut store = loaded_store(&storage);

        assert!(store.delete("b"));
        assert_eq!(store.current_id(), Some("a"));
    }

    #[test]
    fn test_delete_inactive_keeps_pointer() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "A", false), session("b", "B", false)]);
        storage.set("chat:current", "b").unwrap();
        let mut store = loaded_store(&storage);

        assert!(store.delete("a"));
        assert_eq!(store.current_id(), Some("b"));
        assert!(!store.delete("a"));
    }

    #[test]
    fn test_collection_never_empty_across_create_delete() {
        let storage = Rc::new(MockStorage::default());
        let mut store = loaded_store(&storage);
        for round in 0..10 {
            if round % 3 == 0 {
                store.create();
            }
            let victim = store.sessions()[0].id.clone();
            store.delete(&victim);
            assert!(!store.is_empty());
            assert!(store.current().is_some());
        }
    }

    #[test]
    fn test_reorder_within_partition() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "", false), session("b", "", false), session("c", "", false)]);
        let mut store = loaded_store(&storage);

        assert!(store.reorder(0, 2));
        assert_eq!(ids(&store), vec!["b", "c", "a"]);
        assert_eq!(store.sessions()[2].id, "a");

        assert!(store.reorder(2, 0));
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reorder_across_pin_boundary_is_rejected() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("p", "", true), session("a", "", false), session("b", "", false)]);
        let mut store = loaded_store(&storage);

        assert!(!store.reorder(0, 2));
        assert!(!store.reorder(2, 0));
        assert_eq!(ids(&store), vec!["p", "a", "b"]);
    }

    #[test]
    fn test_reorder_out_of_range_is_rejected() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "", false), session("b", "", false)]);
        let mut store = loaded_store(&storage);
        assert!(!store.reorder(0, 5));
        assert!(!store.reorder(7, 0));
        assert!(!store.reorder(1, 1));
    }

    #[test]
    fn test_reorder_persists() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "", false), session("b", "", false)]);
        let mut store = loaded_store(&storage);
        store.reorder(1, 0);

        let reloaded = loaded_store(&storage);
        assert_eq!(ids(&reloaded), vec!["b", "a"]);
    }

    #[test]
    fn test_search() {
        let storage = Rc::new(MockStorage::default());
        let mut rust = session("r", "Rust questions", false);
        rust.messages.push(Message::assistant("Use a HashMap"));
        let other = session("o", "Groceries", false);
        seed(&storage, &[rust, other]);
        let store = loaded_store(&storage);

        assert_eq!(store.search("").len(), 2);
        assert_eq!(store.search("   ").len(), 2);
        let hits: Vec<_> = store.search("RUST").iter().map(|s| s.id.clone()).collect();
        assert_eq!(hits, vec!["r"]);
        let hits: Vec<_> = store.search("hashmap").iter().map(|s| s.id.clone()).collect();
        assert_eq!(hits, vec!["r"]);
        assert!(store.search("nothing like this").is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_append_message() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "A", false)]);
        let mut store = loaded_store(&storage);

        assert!(store.append_message("a", Role::User, "hi"));
        assert!(!store.append_message("gone", Role::Assistant, "lost"));
        assert_eq!(store.get("a").unwrap().messages, vec![Message::user("hi")]);
    }

    #[test]
    fn test_set_persona_locked_after_first_message() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "A", false)]);
        let mut store = loaded_store(&storage);

        assert!(store.set_persona("a", "Pirate"));
        assert_eq!(store.get("a").unwrap().persona, "Pirate");
        store.append_message("a", Role::User, "ahoy");
        assert!(!store.set_persona("a", "Butler"));
        assert_eq!(store.get("a").unwrap().persona, "Pirate");
    }

    #[test]
    fn test_storage_write_failure_is_not_fatal() {
        let storage = Rc::new(MockStorage::default());
        let mut store = loaded_store(&storage);
        storage.fail_writes.set(true);
        let id = store.create();
        assert!(store.rename(&id, "Still works"));
        assert_eq!(store.get(&id).unwrap().title, "Still works");
    }

    // ─── Health Tests ────────────────────────────────────────

    #[test]
    fn test_probe_classification() {
        assert_eq!(Connectivity::from_probe(&Ok(200)), Connectivity::Online);
        assert_eq!(Connectivity::from_probe(&Ok(204)), Connectivity::Online);
        assert_eq!(Connectivity::from_probe(&Ok(299)), Connectivity::Online);
        assert_eq!(Connectivity::from_probe(&Ok(300)), Connectivity::Offline);
        assert_eq!(Connectivity::from_probe(&Ok(503)), Connectivity::Offline);
        assert_eq!(Connectivity::from_probe(&Ok(101)), Connectivity::Offline);
        assert_eq!(Connectivity::from_probe(&Err(ChatError::Timeout(3000))), Connectivity::Offline);
        assert_eq!(
            Connectivity::from_probe(&Err(ChatError::Network("refused".to_string()))),
            Connectivity::Offline
        );
    }

    #[test]
    fn test_health_monitor_starts_online_and_debounces() {
        let monitor = HealthMonitor::new(3000);
        assert_eq!(monitor.state(), Connectivity::Online);
        assert!(!monitor.record(Connectivity::Online));
        assert!(monitor.record(Connectivity::Offline));
        assert!(!monitor.mark_offline());
        assert!(monitor.record(Connectivity::Online));
    }

    #[test]
    fn test_health_check_passes_timeout() {
        let monitor = HealthMonitor::new(3000);
        let backend = MockBackend::default();
        // empty queue → mock reports a timeout of the requested length
        assert_eq!(block_on(monitor.check(&backend)), Connectivity::Offline);
        assert_eq!(monitor.timeout_ms(), 3000);
    }

    #[test]
    fn test_race_timeout_fires_when_request_hangs() {
        let hung = future::pending::<Result<u16>>();
        let result = block_on(race_timeout(hung, future::ready(()), 3000));
        assert_eq!(result, Err(ChatError::Timeout(3000)));
        assert_eq!(Connectivity::from_probe(&result), Connectivity::Offline);
    }

    #[test]
    fn test_race_timeout_prefers_settled_request() {
        let ok = block_on(race_timeout(future::ready(Ok(204u16)), future::pending(), 3000));
        assert_eq!(Connectivity::from_probe(&ok), Connectivity::Online);

        let refused = future::ready(Err::<u16, _>(ChatError::Network("refused".to_string())));
        let err = block_on(race_timeout(refused, future::pending(), 3000));
        assert_eq!(err, Err(ChatError::Network("refused".to_string())));
    }

    // ─── Controls Tests ──────────────────────────────────────

    #[test]
    fn test_control_state_derivation() {
        let idle_online = ControlState::derive(Connectivity::Online, false);
        assert!(idle_online.input_enabled && idle_online.send_enabled);
        assert!(!idle_online.stop_enabled);

        let busy_online = ControlState::derive(Connectivity::Online, true);
        assert!(!busy_online.input_enabled && !busy_online.send_enabled);
        assert!(busy_online.stop_enabled);

        let idle_offline = ControlState::derive(Connectivity::Offline, false);
        assert!(!idle_offline.input_enabled && !idle_offline.send_enabled);
        assert!(!idle_offline.stop_enabled);

        let busy_offline = ControlState::derive(Connectivity::Offline, true);
        assert!(!busy_offline.send_enabled);
        assert!(busy_offline.stop_enabled);
    }

    // ─── Decoder Tests ───────────────────────────────────────

    #[test]
    fn test_decoder_split_multibyte() {
        let bytes = "héllo ✓".as_bytes();
        let mut decoder = Utf8ChunkDecoder::new();
        let mut out = String::new();
        // split inside 'é' (2 bytes) and inside '✓' (3 bytes)
        out.push_str(&decoder.decode(&bytes[..2]));
        out.push_str(&decoder.decode(&bytes[2..8]));
        out.push_str(&decoder.decode(&bytes[8..]));
        out.push_str(&decoder.finish());
        assert_eq!(out, "héllo ✓");
    }

    #[test]
    fn test_decoder_holds_back_incomplete_tail() {
        let mut decoder = Utf8ChunkDecoder::new();
        let check = "✓".as_bytes();
        assert_eq!(decoder.decode(&check[..1]), "");
        assert_eq!(decoder.decode(&check[1..]), "✓");
    }

    #[test]
    fn test_decoder_invalid_bytes() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xff, b'b']), "a\u{FFFD}b");
        assert_eq!(decoder.decode(&[0xe2, 0x9c]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    // ─── GenerationGuard Tests ───────────────────────────────

    #[test]
    fn test_generation_guard_single_flight() {
        let guard = GenerationGuard::new();
        assert_eq!(guard.state(), GenerationState::Idle);
        assert!(!guard.cancel());

        let ticket = guard.begin("s1").unwrap();
        assert!(guard.is_generating());
        assert!(matches!(guard.begin("s2"), Err(ChatError::Busy)));
        assert!(guard.cancel());
        assert!(ticket.was_cancelled());

        drop(ticket);
        assert_eq!(guard.state(), GenerationState::Idle);
        let again = guard.begin("s2").unwrap();
        assert!(!again.was_cancelled());
    }

    #[test]
    fn test_ticket_governs_a_single_stream() {
        let guard = GenerationGuard::new();
        let ticket = guard.begin("s1").unwrap();
        let chunks = |parts: &[&str]| -> ByteStream {
            let items: Vec<Result<Vec<u8>>> =
                parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
            Box::pin(stream::iter(items))
        };

        let first = block_on(consume_stream(chunks(&["a", "b"]), &ticket, |_| {}));
        assert_eq!(first, StreamOutcome::Completed("ab".to_string()));

        // a second stream on the same ticket would escape cancellation
        let mut seen = Vec::new();
        let second = block_on(consume_stream(chunks(&["c"]), &ticket, |t| seen.push(t.to_string())));
        assert!(matches!(second, StreamOutcome::Failed(ChatError::Other(_))));
        assert!(seen.is_empty());
        assert!(guard.cancel());
    }

    // ─── Transfer Tests ──────────────────────────────────────

    #[test]
    fn test_export_import_round_trip() {
        let mut a = session("a", "Alpha", true);
        a.messages.push(Message::user("q"));
        a.messages.push(Message::assistant("**a**"));
        a.persona = "Pirate".to_string();
        let sessions = vec![a, session("b", "Beta", false)];

        let json = transfer::export_json(&sessions).unwrap();
        assert_eq!(transfer::parse_import(&json).unwrap(), sessions);
    }

    #[test]
    fn test_import_rejects_bad_documents() {
        for doc in [
            "not json",
            r#"{"id":"a","title":"x"}"#,
            "[]",
            r#"[{"title":"no id"}]"#,
            r#"[1, 2]"#,
            r#"[{"id":"a","title":"x"},{"id":"a","title":"y"}]"#,
        ] {
            let err = transfer::parse_import(doc).unwrap_err();
            assert!(matches!(err, ChatError::Import(_)), "{} → {:?}", doc, err);
        }
    }

    #[test]
    fn test_export_filename() {
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(transfer::export_filename(date), "chat-history-2026-03-09.json");
    }

    // ─── Controller Tests ────────────────────────────────────

    #[test]
    fn test_controller_load_emits_initial_state() {
        let controller = ChatController::new(
            ClientConfig::default(),
            Rc::new(MockStorage::default()),
            Rc::new(MockBackend::default()),
            EventBus::new(),
        );
        controller.load();
        let events = controller.bus().drain();
        assert_eq!(events[0], ChatEvent::SessionsChanged);
        assert!(matches!(events[1], ChatEvent::ActiveSessionChanged { .. }));
    }

    #[test]
    fn test_send_completes_and_persists_concatenation() {
        let storage = Rc::new(MockStorage::default());
        let backend = Rc::new(MockBackend::with_chunks(&["Hel", "lo", ", wor", "ld"]));
        let controller = controller_with(storage.clone(), backend.clone());
        let req = send_request(&controller, "Hi");
        let id = req.session_id.clone();

        let outcome = block_on(controller.send(req)).unwrap();
        assert_eq!(outcome, SendOutcome::Completed { text: "Hello, world".to_string() });

        let session = controller.current_session().unwrap();
        assert_eq!(
            session.messages,
            vec![Message::user("Hi"), Message::assistant("Hello, world")]
        );

        let events = controller.bus().drain();
        assert_eq!(deltas(&events), vec!["Hel", "Hello", "Hello, wor", "Hello, world"]);
        assert!(events.contains(&ChatEvent::GenerationCompleted {
            session_id: id,
            text: "Hello, world".to_string(),
        }));
        assert!(!controller.is_generating());

        // persisted, not just in memory
        let reloaded = loaded_store(&storage);
        assert_eq!(reloaded.current().unwrap().messages.len(), 2);
    }

    #[test]
    fn test_send_first_message_titles_and_locks_persona() {
        let backend = Rc::new(MockBackend::with_chunks(&["Fine"]));
        let controller = controller_with(Rc::new(MockStorage::default()), backend.clone());
        assert_eq!(controller.current_session().unwrap().title, DEFAULT_TITLE);

        let req = send_request(&controller, "Hello there, how are you?");
        block_on(controller.send(req)).unwrap();

        let session = controller.current_session().unwrap();
        assert_eq!(session.title, "Hello there, how are you?");
        assert_eq!(session.persona, "You are terse.");
        assert!(session.is_persona_locked());
        assert!(!controller.set_persona(&session.id, "Other"));
        assert_eq!(backend.last_request().persona, "You are terse.");
    }

    #[test]
    fn test_send_long_first_message_truncates_title() {
        let backend = Rc::new(MockBackend::with_chunks(&["ok"]));
        let controller = controller_with(Rc::new(MockStorage::default()), backend);
        let text = "0123456789".repeat(4);

        block_on(controller.send(send_request(&controller, &text))).unwrap();
        assert_eq!(
            controller.current_session().unwrap().title,
            format!("{}...", &text[..30])
        );
    }

    #[test]
    fn test_send_later_message_keeps_title_and_persona() {
        let backend = Rc::new(MockBackend::with_chunks(&["one"]));
        let controller = controller_with(Rc::new(MockStorage::default()), backend.clone());
        block_on(controller.send(send_request(&controller, "First"))).unwrap();

        backend.chunks.borrow_mut().push(Ok(b"two".to_vec()));
        let mut req = send_request(&controller, "Second");
        req.persona = "Ignored".to_string();
        block_on(controller.send(req)).unwrap();

        let session = controller.current_session().unwrap();
        assert_eq!(session.title, "First");
        assert_eq!(session.persona, "You are terse.");

        let wire = backend.last_request();
        assert_eq!(wire.message, "Second");
        assert_eq!(wire.persona, "You are terse.");
        assert_eq!(wire.temperature, "0.7");
        assert_eq!(
            wire.history,
            vec![Message::user("First"), Message::assistant("one")]
        );
    }

    #[test]
    fn test_send_rejects_empty_and_unknown_session() {
        let controller = controller_with(
            Rc::new(MockStorage::default()),
            Rc::new(MockBackend::default()),
        );
        let req = send_request(&controller, "   ");
        assert_eq!(block_on(controller.send(req)), Err(ChatError::EmptyMessage));

        let mut req = send_request(&controller, "hi");
        req.session_id = "missing".to_string();
        assert!(matches!(
            block_on(controller.send(req)),
            Err(ChatError::SessionNotFound(_))
        ));
        assert!(controller.current_session().unwrap().messages.is_empty());
    }

    #[test]
    fn test_send_is_single_flight() {
        let backend = Rc::new(MockBackend::default());
        let (tx, rx) = mpsc::unbounded::<Result<Vec<u8>>>();
        *backend.live_stream.borrow_mut() = Some(Box::pin(rx));
        let controller = controller_with(Rc::new(MockStorage::default()), backend.clone());
        let req = send_request(&controller, "first");
        let second = send_request(&controller, "second");

        block_on(async {
            let first = controller.send(req);
            let driver = async {
                yield_now().await;
                assert!(controller.is_generating());
                assert!(controller.controls().stop_enabled);
                assert!(!controller.controls().send_enabled);
                assert_eq!(controller.send(second).await, Err(ChatError::Busy));
                tx.unbounded_send(Ok(b"done".to_vec())).unwrap();
                tx.close_channel();
            };
            let (outcome, ()) = futures::join!(first, driver);
            assert_eq!(outcome.unwrap(), SendOutcome::Completed { text: "done".to_string() });
        });

        assert_eq!(backend.requests.borrow().len(), 1);
        assert!(controller.controls().send_enabled);
        let messages = controller.current_session().unwrap().messages;
        assert_eq!(messages, vec![Message::user("first"), Message::assistant("done")]);
    }

    #[test]
    fn test_stop_after_chunks_persists_only_marker() {
        let backend = Rc::new(MockBackend::default());
        let (tx, rx) = mpsc::unbounded::<Result<Vec<u8>>>();
        *backend.live_stream.borrow_mut() = Some(Box::pin(rx));
        let storage = Rc::new(MockStorage::default());
        let controller = controller_with(storage.clone(), backend);
        let req = send_request(&controller, "Tell me a story");
        let id = req.session_id.clone();

        let outcome = block_on(async {
            let send = controller.send(req);
            let driver = async {
                tx.unbounded_send(Ok(b"Once".to_vec())).unwrap();
                yield_now().await;
                tx.unbounded_send(Ok(b" upon".to_vec())).unwrap();
                yield_now().await;
                // queued before the stop and never polled
                tx.unbounded_send(Ok(b" a time".to_vec())).unwrap();
                assert!(controller.stop());
                tx.unbounded_send(Ok(b" later".to_vec())).unwrap();
            };
            let (outcome, ()) = futures::join!(send, driver);
            outcome
        });

        assert_eq!(outcome.unwrap(), SendOutcome::Stopped);
        let events = controller.bus().drain();
        assert_eq!(deltas(&events), vec!["Once", "Once upon"]);
        assert!(events.contains(&ChatEvent::GenerationStopped { session_id: id }));

        let messages = controller.current_session().unwrap().messages;
        assert_eq!(
            messages,
            vec![Message::user("Tell me a story"), Message::assistant(STOPPED_BY_USER)]
        );
        assert!(!controller.is_generating());
        assert_eq!(loaded_store(&storage).current().unwrap().messages.len(), 2);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let controller = controller_with(
            Rc::new(MockStorage::default()),
            Rc::new(MockBackend::default()),
        );
        assert!(!controller.stop());
    }

    #[test]
    fn test_send_failure_marks_offline_and_persists_nothing() {
        let backend = Rc::new(MockBackend::default());
        *backend.chunks.borrow_mut() = vec![
            Ok(b"partial".to_vec()),
            Err(ChatError::Network("connection reset".to_string())),
        ];
        let controller = controller_with(Rc::new(MockStorage::default()), backend);
        assert_eq!(controller.connectivity(), Connectivity::Online);

        let outcome = block_on(controller.send(send_request(&controller, "Hi"))).unwrap();
        assert!(matches!(outcome, SendOutcome::Failed { ref message } if message.contains("connection reset")));
        assert_eq!(controller.connectivity(), Connectivity::Offline);
        assert!(!controller.controls().send_enabled);

        let events = controller.bus().drain();
        assert!(events.contains(&ChatEvent::ConnectivityChanged { online: false }));
        assert!(events.iter().any(|e| matches!(e, ChatEvent::GenerationFailed { .. })));

        let messages = controller.current_session().unwrap().messages;
        assert_eq!(messages, vec![Message::user("Hi")]);
    }

    #[test]
    fn test_send_http_error_is_immediate_failure() {
        let backend = Rc::new(MockBackend::default());
        *backend.chunks.borrow_mut() = vec![Err(ChatError::Http {
            status: 500,
            message: "Internal Server Error".to_string(),
        })];
        let controller = controller_with(Rc::new(MockStorage::default()), backend);
        let outcome = block_on(controller.send(send_request(&controller, "Hi"))).unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Failed { message: "HTTP 500: Internal Server Error".to_string() }
        );
        assert!(deltas(&controller.bus().drain()).is_empty());
    }

    #[test]
    fn test_send_to_deleted_session_drops_reply() {
        let backend = Rc::new(MockBackend::default());
        let (tx, rx) = mpsc::unbounded::<Result<Vec<u8>>>();
        *backend.live_stream.borrow_mut() = Some(Box::pin(rx));
        let controller = controller_with(Rc::new(MockStorage::default()), backend);
        let req = send_request(&controller, "Hi");
        let id = req.session_id.clone();

        block_on(async {
            let send = controller.send(req);
            let driver = async {
                yield_now().await;
                assert!(controller.delete(&id));
                tx.unbounded_send(Ok(b"late".to_vec())).unwrap();
                tx.close_channel();
            };
            let (outcome, ()) = futures::join!(send, driver);
            assert!(matches!(outcome.unwrap(), SendOutcome::Completed { .. }));
        });

        let session = controller.current_session().unwrap();
        assert_ne!(session.id, id);
        assert!(session.messages.is_empty());
    }

    #[test]
    fn test_listener_sees_each_chunk_before_next() {
        let backend = Rc::new(MockBackend::with_chunks(&["a", "b", "c"]));
        let controller = Rc::new(controller_with(Rc::new(MockStorage::default()), backend));
        let renders = Rc::new(RefCell::new(Vec::new()));

        let sink = renders.clone();
        let weak = Rc::downgrade(&controller);
        controller.bus().subscribe(move |event| {
            if let ChatEvent::StreamDelta { text, .. } = event {
                // the view reads the store while the stream is running
                let generating = weak.upgrade().map(|c| c.is_generating()).unwrap_or(false);
                sink.borrow_mut().push((text.clone(), generating));
            }
        });

        block_on(controller.send(send_request(&controller, "go"))).unwrap();
        assert_eq!(
            renders.borrow().as_slice(),
            &[
                ("a".to_string(), true),
                ("ab".to_string(), true),
                ("abc".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_probe_health_transitions() {
        let backend = Rc::new(MockBackend::default());
        backend.health.borrow_mut().extend([
            Ok(200),
            Ok(503),
            Err(ChatError::Timeout(3000)),
            Ok(204),
        ]);
        let controller = controller_with(Rc::new(MockStorage::default()), backend);

        assert_eq!(block_on(controller.probe_health()), Connectivity::Online);
        assert!(controller.bus().drain().is_empty());

        assert_eq!(block_on(controller.probe_health()), Connectivity::Offline);
        assert_eq!(block_on(controller.probe_health()), Connectivity::Offline);
        assert_eq!(
            controller.bus().drain(),
            vec![ChatEvent::ConnectivityChanged { online: false }]
        );

        assert_eq!(block_on(controller.probe_health()), Connectivity::Online);
        assert_eq!(
            controller.bus().drain(),
            vec![ChatEvent::ConnectivityChanged { online: true }]
        );
    }

    #[test]
    fn test_controller_delete_emits_active_change() {
        let controller = controller_with(
            Rc::new(MockStorage::default()),
            Rc::new(MockBackend::default()),
        );
        let first = controller.current_session().unwrap().id;
        let second = controller.new_chat();
        controller.bus().drain();

        assert!(controller.delete(&second));
        let events = controller.bus().drain();
        assert_eq!(
            events,
            vec![
                ChatEvent::SessionsChanged,
                ChatEvent::ActiveSessionChanged { session_id: first },
            ]
        );
    }

    #[test]
    fn test_controller_reorder_by_id() {
        let storage = Rc::new(MockStorage::default());
        seed(&storage, &[session("a", "", false), session("b", "", false), session("p", "", true)]);
        let controller = controller_with(storage, Rc::new(MockBackend::default()));

        assert!(!controller.reorder_by_id("a", "p"));
        assert!(controller.reorder_by_id("b", "a"));
        let order = controller.with_store(|s| ids(s));
        assert_eq!(order, vec!["p", "b", "a"]);
        assert!(!controller.reorder_by_id("a", "missing"));
    }

    #[test]
    fn test_controller_import_replaces_and_switches() {
        let storage = Rc::new(MockStorage::default());
        let controller = controller_with(storage.clone(), Rc::new(MockBackend::default()));
        let original = controller.with_store(|s| ids(s));

        assert!(controller.import_json("[oops").is_err());
        assert_eq!(controller.with_store(|s| ids(s)), original);

        let doc = serde_json::to_string(&vec![session("x", "X", false), session("y", "Y", true)]).unwrap();
        assert_eq!(controller.import_json(&doc).unwrap(), 2);
        assert_eq!(controller.with_store(|s| ids(s)), vec!["y", "x"]);
        assert_eq!(controller.current_session().unwrap().id, "y");
        assert_eq!(storage.get("chat:current").unwrap(), Some("y".to_string()));
    }

    #[test]
    fn test_import_activates_first_listed_session() {
        let storage = Rc::new(MockStorage::default());
        let controller = controller_with(storage.clone(), Rc::new(MockBackend::default()));

        let doc = r#"[
            {"id": "u", "title": "Unpinned", "pinned": false},
            {"id": "p", "title": "Pinned", "pinned": true}
        ]"#;
        assert_eq!(controller.import_json(doc).unwrap(), 2);

        let first_listed = controller.with_store(|s| s.sessions()[0].id.clone());
        assert_eq!(first_listed, "p");
        assert_eq!(controller.current_session().unwrap().id, first_listed);
        assert!(controller.bus().drain().contains(&ChatEvent::ActiveSessionChanged {
            session_id: "p".to_string()
        }));
        assert_eq!(loaded_store(&storage).current_id(), Some("p"));
    }

    #[test]
    fn test_controller_export_import_round_trip() {
        let backend = Rc::new(MockBackend::with_chunks(&["reply"]));
        let controller = controller_with(Rc::new(MockStorage::default()), backend);
        block_on(controller.send(send_request(&controller, "question"))).unwrap();
        controller.new_chat();
        let before = controller.with_store(|s| s.sessions().to_vec());

        let exported = controller.export_json().unwrap();
        controller.import_json(&exported).unwrap();
        assert_eq!(controller.with_store(|s| s.sessions().to_vec()), before);
    }

    #[test]
    fn test_settings_restore_and_update() {
        let storage = Rc::new(MockStorage::default());
        storage.set("chat:settings", r#"{"temperature":1.1,"default_persona":"Pirate"}"#).unwrap();
        let controller = controller_with(storage.clone(), Rc::new(MockBackend::default()));
        assert_eq!(controller.settings().temperature, 1.1);
        assert_eq!(controller.current_session().unwrap().persona, "Pirate");

        controller.update_settings(|s| s.set_temperature(0.2));
        let saved: ChatSettings =
            serde_json::from_str(&storage.get("chat:settings").unwrap().unwrap()).unwrap();
        assert_eq!(saved.temperature, 0.2);
    }
}
