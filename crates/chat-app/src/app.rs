//! The chat page: binds the DOM to the controller and redraws on events.

use std::cell::RefCell;
use std::rc::Rc;

use futures::StreamExt;
use gloo_timers::future::{IntervalStream, TimeoutFuture};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{
    Document, DragEvent, Element, Event, HtmlButtonElement, HtmlElement, HtmlInputElement,
    HtmlTextAreaElement, KeyboardEvent, Window,
};

use chat_core::controller::{ChatController, SendRequest};
use chat_core::event_bus::EventBus;
use chat_core::ports::Highlighter;
use chat_platform::storage::auto_detect_storage;
use chat_platform::{HljsHighlighter, HttpChatBackend};
use chat_types::config::ClientConfig;
use chat_types::event::ChatEvent;
use chat_types::session::ChatSession;
use chat_types::ChatError;
use chat_ui::render::{self, MessageView, SessionListItem};
use chat_ui::state::{Redraw, UiState};

use crate::dom;

const NARROW_VIEWPORT_PX: f64 = 768.0;
const STREAMING_BUBBLE_ID: &str = "streaming-bubble";
const IMPORT_CONFIRM: &str = "This will overwrite your current chats. Continue?";

/// Elements the page is built from, looked up once at startup
struct Elements {
    sidebar: HtmlElement,
    menu_btn: HtmlElement,
    new_chat_btn: HtmlElement,
    search: HtmlInputElement,
    pinned_header: Element,
    pinned_list: Element,
    separator: Element,
    unpinned_list: Element,
    global_menu_btn: HtmlElement,
    global_menu: Element,
    export_btn: HtmlElement,
    import_btn: HtmlElement,
    import_file: HtmlInputElement,
    history: HtmlElement,
    input_form: Element,
    user_input: HtmlTextAreaElement,
    persona_input: HtmlInputElement,
    temp_input: HtmlInputElement,
    send_btn: HtmlButtonElement,
    stop_btn: HtmlButtonElement,
    health_status: Element,
    status_text: Element,
}

impl Elements {
    fn query(document: &Document) -> Result<Self, JsValue> {
        Ok(Self {
            sidebar: dom::by_id(document, "sidebar")?,
            menu_btn: dom::by_id(document, "menu-btn")?,
            new_chat_btn: dom::by_id(document, "new-chat-btn")?,
            search: dom::by_id(document, "chat-search")?,
            pinned_header: dom::by_id(document, "pinned-header")?,
            pinned_list: dom::by_id(document, "pinned-list")?,
            separator: dom::by_id(document, "list-separator")?,
            unpinned_list: dom::by_id(document, "unpinned-list")?,
            global_menu_btn: dom::by_id(document, "global-menu-btn")?,
            global_menu: dom::by_id(document, "global-menu")?,
            export_btn: dom::by_id(document, "export-btn")?,
            import_btn: dom::by_id(document, "import-btn")?,
            import_file: dom::by_id(document, "import-file")?,
            history: dom::by_id(document, "chat-history-container")?,
            input_form: dom::by_id(document, "input-form")?,
            user_input: dom::by_id(document, "user-input")?,
            persona_input: dom::by_id(document, "persona-input")?,
            temp_input: dom::by_id(document, "temp-input")?,
            send_btn: dom::by_id(document, "send-btn")?,
            stop_btn: dom::by_id(document, "stop-btn")?,
            health_status: dom::by_id(document, "health-status")?,
            status_text: dom::by_id(document, "status-text")?,
        })
    }
}

pub struct ChatApp {
    window: Window,
    document: Document,
    el: Elements,
    controller: ChatController,
    highlighter: Rc<dyn Highlighter>,
    ui: RefCell<UiState>,
    /// Session being dragged in the sidebar
    dragged: RefCell<Option<String>>,
}

fn to_js(e: ChatError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

impl ChatApp {
    /// Wire adapters, bind the page, load sessions and start health polling.
    pub fn start(config: ClientConfig) -> Result<Rc<Self>, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window"))?;
        let document = window
            .document()
            .ok_or_else(|| JsValue::from_str("No document"))?;
        let el = Elements::query(&document)?;

        let storage = auto_detect_storage();
        let backend = Rc::new(HttpChatBackend::new(&config));
        let controller = ChatController::new(config, storage, backend, EventBus::new());

        let app = Rc::new(Self {
            window,
            document,
            el,
            controller,
            highlighter: Rc::new(HljsHighlighter::new()),
            ui: RefCell::new(UiState::new()),
            dragged: RefCell::new(None),
        });

        let listener = app.clone();
        app.controller
            .bus()
            .subscribe(move |event| listener.on_event(event));
        app.bind()?;

        app.el
            .temp_input
            .set_value(&app.controller.settings().temperature.to_string());
        app.controller.load();
        app.render_controls();
        app.spawn_health_loop();
        Ok(app)
    }

    // ─── Health ──────────────────────────────────────────────

    /// Probe now, then on every tick. Each probe finishes before the next tick is taken.
    fn spawn_health_loop(self: &Rc<Self>) {
        let app = self.clone();
        let period = self.controller.config().probe_interval_ms;
        spawn_local(async move {
            app.controller.probe_health().await;
            let mut ticks = IntervalStream::new(period);
            while ticks.next().await.is_some() {
                app.controller.probe_health().await;
            }
        });
    }

    // ─── Rendering ───────────────────────────────────────────

    fn on_event(&self, event: &ChatEvent) {
        let redraw = self.ui.borrow_mut().process_event(event);
        if let Err(e) = self.redraw(redraw) {
            log::error!("Render failed: {:?}", e);
        }
    }

    fn redraw(&self, redraw: Redraw) -> Result<(), JsValue> {
        if redraw.sessions {
            self.render_sessions()?;
        }
        if redraw.messages {
            self.render_messages()?;
        } else if redraw.streaming {
            self.render_streaming()?;
        }
        if redraw.controls {
            self.render_controls();
        }
        Ok(())
    }

    fn render_sessions(&self) -> Result<(), JsValue> {
        let (query, open_menu) = {
            let ui = self.ui.borrow();
            (ui.search_query.clone(), ui.open_menu.clone())
        };
        let items = self
            .controller
            .with_store(|store| render::session_list(store, &query));
        let (pinned, unpinned) = render::partition_pinned(items);

        dom::set_class(&self.el.pinned_header, "visible", !pinned.is_empty())?;
        dom::set_class(&self.el.separator, "visible", !pinned.is_empty())?;
        self.fill_list(&self.el.pinned_list, &pinned, open_menu.as_deref())?;
        self.fill_list(&self.el.unpinned_list, &unpinned, open_menu.as_deref())
    }

    fn fill_list(&self, list: &Element, items: &[SessionListItem], open_menu: Option<&str>) -> Result<(), JsValue> {
        list.set_inner_html("");
        for item in items {
            let class = if item.active { "chat-tab active" } else { "chat-tab" };
            let html = render::session_item_html(item, open_menu == Some(item.id.as_str()));
            let li = dom::append_html(&self.document, list, "li", class, &html)?;
            li.set_attribute("data-id", &item.id)?;
            li.set_attribute("draggable", if item.draggable { "true" } else { "false" })?;
        }
        Ok(())
    }

    fn render_messages(&self) -> Result<(), JsValue> {
        let session = self.controller.current_session();
        let (stream, error) = {
            let ui = self.ui.borrow();
            (
                ui.visible_stream().map(String::from),
                ui.visible_error().map(String::from),
            )
        };
        let messages = session.as_ref().map(|s| s.messages.as_slice()).unwrap_or_default();

        let history = &self.el.history;
        history.set_inner_html("");
        if messages.is_empty() && stream.is_none() && error.is_none() {
            history.set_inner_html(render::EMPTY_CHAT_HTML);
        }
        for view in render::render_messages(messages, self.highlighter.as_ref()) {
            self.append_view(&view)?;
        }
        if let Some(message) = error {
            self.append_view(&render::render_error(&message))?;
        }
        if let Some(text) = stream {
            let bubble = self.append_view(&render::render_streaming(&text, self.highlighter.as_ref()))?;
            bubble.set_id(STREAMING_BUBBLE_ID);
        }

        self.sync_persona(session.as_ref());
        dom::scroll_to_bottom(history);
        Ok(())
    }

    /// Update only the in-progress bubble.
    fn render_streaming(&self) -> Result<(), JsValue> {
        let stream = self.ui.borrow().visible_stream().map(String::from);
        match (stream, self.document.get_element_by_id(STREAMING_BUBBLE_ID)) {
            (Some(text), Some(bubble)) => {
                let view = render::render_streaming(&text, self.highlighter.as_ref());
                bubble.set_inner_html(&view.html);
            }
            (Some(_), None) => return self.render_messages(),
            (None, Some(bubble)) => bubble.remove(),
            (None, None) => {}
        }
        dom::scroll_to_bottom(&self.el.history);
        Ok(())
    }

    fn append_view(&self, view: &MessageView) -> Result<Element, JsValue> {
        dom::append_html(&self.document, &self.el.history, "div", view.class, &view.html)
    }

    /// The persona field is editable only until the session's first message.
    fn sync_persona(&self, session: Option<&ChatSession>) {
        let input = &self.el.persona_input;
        match session {
            Some(s) => {
                input.set_value(&s.persona);
                input.set_disabled(s.is_persona_locked());
            }
            None => {
                input.set_value("");
                input.set_disabled(false);
            }
        }
    }

    fn render_controls(&self) {
        let (controls, online, status) = {
            let ui = self.ui.borrow();
            (ui.controls(), ui.connectivity.is_online(), ui.status_text.clone())
        };
        let input = &self.el.user_input;
        input.set_disabled(!controls.input_enabled);
        input.set_placeholder(if online {
            "Type a message..."
        } else {
            "Waiting for connection..."
        });
        self.el.send_btn.set_disabled(!controls.send_enabled);
        self.el.stop_btn.set_disabled(!controls.stop_enabled);
        dom::set_display(&self.el.send_btn, !controls.stop_enabled, "inline-block");
        dom::set_display(&self.el.stop_btn, controls.stop_enabled, "inline-block");

        self.el
            .health_status
            .set_class_name(if online { "status-online" } else { "status-offline" });
        self.el.status_text.set_text_content(Some(&status));
    }

    // ─── Commands ────────────────────────────────────────────

    fn submit(self: &Rc<Self>) {
        if !self.ui.borrow().controls().send_enabled {
            return;
        }
        let text = self.el.user_input.value();
        if text.trim().is_empty() {
            return;
        }
        let Some(session) = self.controller.current_session() else {
            return;
        };
        let settings = self.controller.settings();
        let temperature = self
            .el
            .temp_input
            .value()
            .trim()
            .parse::<f32>()
            .unwrap_or(settings.temperature);
        let persona = match self.el.persona_input.value().trim() {
            "" => settings.default_persona,
            p => p.to_string(),
        };
        let req = SendRequest {
            session_id: session.id,
            text,
            persona,
            temperature,
        };

        self.el.user_input.set_value("");
        dom::autosize(&self.el.user_input);

        let app = self.clone();
        spawn_local(async move {
            match app.controller.send(req).await {
                Ok(outcome) => log::debug!("Send finished: {:?}", outcome),
                Err(e) => log::warn!("Send rejected: {}", e),
            }
        });
    }

    fn on_list_click(&self, event: &Event) -> Result<(), JsValue> {
        let Some(id) = dom::closest(event, "li.chat-tab").and_then(|tab| tab.get_attribute("data-id")) else {
            return Ok(());
        };
        let action = dom::closest(event, "[data-action]").and_then(|el| el.get_attribute("data-action"));
        match action.as_deref() {
            Some("menu") => {
                event.stop_propagation();
                self.ui.borrow_mut().toggle_menu(&id);
                return self.render_sessions();
            }
            Some("rename") => {
                event.stop_propagation();
                self.ui.borrow_mut().close_menu();
                let title = self
                    .controller
                    .with_store(|store| store.get(&id).map(|s| s.title.clone()))
                    .unwrap_or_default();
                if let Some(name) = self
                    .window
                    .prompt_with_message_and_default("Rename chat to:", &title)?
                {
                    self.controller.rename(&id, &name);
                }
            }
            Some("pin") => {
                event.stop_propagation();
                self.ui.borrow_mut().close_menu();
                self.controller.toggle_pin(&id);
            }
            Some("delete") => {
                event.stop_propagation();
                self.ui.borrow_mut().close_menu();
                if self.window.confirm_with_message("Delete this chat?")? {
                    self.controller.delete(&id);
                }
            }
            _ => {
                self.controller.select(&id);
                self.close_sidebar_on_narrow()?;
            }
        }
        self.render_sessions()
    }

    fn on_drag_start(&self, event: &Event) {
        let Some(tab) = dom::closest(event, "li.chat-tab[draggable=\"true\"]") else {
            return;
        };
        let Some(id) = tab.get_attribute("data-id") else {
            return;
        };
        let _ = dom::set_class(&tab, "dragging", true);
        if let Some(transfer) = event.dyn_ref::<DragEvent>().and_then(|e| e.data_transfer()) {
            transfer.set_effect_allowed("move");
            let _ = transfer.set_data("text/plain", &id);
        }
        *self.dragged.borrow_mut() = Some(id);
    }

    fn on_drop(&self, event: &Event) -> Result<(), JsValue> {
        event.prevent_default();
        let dragged = self.dragged.borrow_mut().take();
        let target = dom::closest(event, "li.chat-tab").and_then(|tab| tab.get_attribute("data-id"));
        if let (Some(dragged), Some(target)) = (dragged, target) {
            if self.controller.reorder_by_id(&dragged, &target) {
                return Ok(());
            }
        }
        // rejected drops still need the drag styling cleared
        self.render_sessions()
    }

    fn on_document_click(&self, event: &Event) -> Result<(), JsValue> {
        if dom::closest(event, "#global-menu, #global-menu-btn").is_none() {
            dom::set_class(&self.el.global_menu, "show", false)?;
        }

        let menu_open = self.ui.borrow().open_menu.is_some();
        if menu_open && dom::closest(event, ".dropdown-menu").is_none() {
            self.ui.borrow_mut().close_menu();
            self.render_sessions()?;
        }

        if self.is_narrow_viewport()
            && self.el.sidebar.class_list().contains("open")
            && dom::closest(event, "#sidebar, #menu-btn").is_none()
        {
            dom::set_class(&self.el.sidebar, "open", false)?;
        }
        Ok(())
    }

    fn is_narrow_viewport(&self) -> bool {
        self.window
            .inner_width()
            .ok()
            .and_then(|w| w.as_f64())
            .is_some_and(|w| w <= NARROW_VIEWPORT_PX)
    }

    fn close_sidebar_on_narrow(&self) -> Result<(), JsValue> {
        if self.is_narrow_viewport() {
            dom::set_class(&self.el.sidebar, "open", false)?;
        }
        Ok(())
    }

    fn export(&self) -> Result<(), JsValue> {
        let json = self.controller.export_json().map_err(to_js)?;
        let filename = self.controller.export_filename();
        dom::download(&self.document, &filename, &json, "application/json")?;
        log::info!("Exported sessions to {}", filename);
        Ok(())
    }

    async fn import_selected(&self) -> Result<(), JsValue> {
        let file = self.el.import_file.files().and_then(|files| files.get(0));
        self.el.import_file.set_value("");
        let Some(file) = file else {
            return Ok(());
        };
        let text = JsFuture::from(file.text())
            .await?
            .as_string()
            .unwrap_or_default();

        match self.controller.parse_import(&text) {
            Ok(sessions) => {
                if self.window.confirm_with_message(IMPORT_CONFIRM)? {
                    self.controller.import_sessions(sessions);
                    self.window.alert_with_message("Import successful!")?;
                }
            }
            Err(e) => {
                log::warn!("{}", e);
                self.window.alert_with_message(&e.to_string())?;
            }
        }
        Ok(())
    }

    /// Copy a code block's text and flash the confirmation on its button.
    fn on_history_click(&self, event: &Event) {
        let Some(button) = dom::closest(event, ".copy-btn") else {
            return;
        };
        let text = button
            .closest(".code-block")
            .ok()
            .flatten()
            .and_then(|block| block.query_selector("code").ok().flatten())
            .and_then(|code| code.text_content());
        let Some(text) = text else {
            return;
        };

        let clipboard = self.window.navigator().clipboard();
        spawn_local(async move {
            match JsFuture::from(clipboard.write_text(&text)).await {
                Ok(_) => {
                    button.set_text_content(Some(render::COPIED_LABEL));
                    TimeoutFuture::new(render::COPY_FEEDBACK_MS).await;
                    button.set_text_content(Some(render::COPY_LABEL));
                }
                Err(e) => log::error!("Failed to copy: {:?}", e),
            }
        });
    }

    // ─── Event binding ───────────────────────────────────────

    fn bind(self: &Rc<Self>) -> Result<(), JsValue> {
        let el = &self.el;

        let app = self.clone();
        dom::listen(&el.input_form, "submit", move |event| {
            event.prevent_default();
            app.submit();
        })?;

        let app = self.clone();
        dom::listen(&el.user_input, "keydown", move |event| {
            let Some(key) = event.dyn_ref::<KeyboardEvent>() else {
                return;
            };
            if key.key() == "Enter" && !key.shift_key() {
                event.prevent_default();
                app.submit();
            }
        })?;

        let input = el.user_input.clone();
        dom::listen(&el.user_input, "input", move |_| dom::autosize(&input))?;

        let app = self.clone();
        dom::listen(&el.stop_btn, "click", move |_| {
            app.controller.stop();
        })?;

        let app = self.clone();
        dom::listen(&el.new_chat_btn, "click", move |_| {
            app.el.search.set_value("");
            app.ui.borrow_mut().search_query.clear();
            app.controller.new_chat();
            if let Err(e) = app.close_sidebar_on_narrow() {
                log::error!("{:?}", e);
            }
        })?;

        let app = self.clone();
        dom::listen(&el.search, "input", move |_| {
            app.ui.borrow_mut().search_query = app.el.search.value();
            if let Err(e) = app.render_sessions() {
                log::error!("Render failed: {:?}", e);
            }
        })?;

        let app = self.clone();
        dom::listen(&el.persona_input, "change", move |_| {
            if let Some(session) = app.controller.current_session() {
                app.controller
                    .set_persona(&session.id, &app.el.persona_input.value());
            }
        })?;

        let app = self.clone();
        dom::listen(&el.temp_input, "change", move |_| {
            if let Ok(value) = app.el.temp_input.value().trim().parse::<f32>() {
                app.controller.update_settings(|s| s.set_temperature(value));
            }
            app.el
                .temp_input
                .set_value(&app.controller.settings().temperature.to_string());
        })?;

        for list in [&el.pinned_list, &el.unpinned_list] {
            let app = self.clone();
            dom::listen(list, "click", move |event| {
                if let Err(e) = app.on_list_click(&event) {
                    log::error!("Sidebar action failed: {:?}", e);
                }
            })?;

            let app = self.clone();
            dom::listen(list, "dragstart", move |event| app.on_drag_start(&event))?;

            dom::listen(list, "dragover", move |event| {
                event.prevent_default();
                if let Some(transfer) = event.dyn_ref::<DragEvent>().and_then(|e| e.data_transfer()) {
                    transfer.set_drop_effect("move");
                }
            })?;

            let app = self.clone();
            dom::listen(list, "drop", move |event| {
                if let Err(e) = app.on_drop(&event) {
                    log::error!("Reorder failed: {:?}", e);
                }
            })?;

            let app = self.clone();
            dom::listen(list, "dragend", move |_| {
                if app.dragged.borrow_mut().take().is_some() {
                    let _ = app.render_sessions();
                }
            })?;
        }

        let app = self.clone();
        dom::listen(&el.history, "click", move |event| app.on_history_click(&event))?;

        let app = self.clone();
        dom::listen(&el.global_menu_btn, "click", move |event| {
            event.stop_propagation();
            if let Err(e) = app.el.global_menu.class_list().toggle("show") {
                log::error!("{:?}", e);
            }
        })?;

        let app = self.clone();
        dom::listen(&el.export_btn, "click", move |_| {
            if let Err(e) = app.export() {
                log::error!("Export failed: {:?}", e);
            }
        })?;

        let file = el.import_file.clone();
        dom::listen(&el.import_btn, "click", move |_| file.click())?;

        let app = self.clone();
        dom::listen(&el.import_file, "change", move |_| {
            let app = app.clone();
            spawn_local(async move {
                if let Err(e) = app.import_selected().await {
                    log::error!("Import failed: {:?}", e);
                }
            });
        })?;

        let sidebar = el.sidebar.clone();
        dom::listen(&el.menu_btn, "click", move |event| {
            event.stop_propagation();
            let _ = sidebar.class_list().toggle("open");
        })?;

        let app = self.clone();
        dom::listen(&self.document, "click", move |event| {
            if let Err(e) = app.on_document_click(&event) {
                log::error!("{:?}", e);
            }
        })?;

        Ok(())
    }
}
