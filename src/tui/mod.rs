/// Ratatui-based TUI for marginalia.
///
/// Architecture:
///   one task: crossterm event loop; ask/edit flows are awaited inline with a
///   select that keeps watching the keyboard so Esc can request cancellation
///   (advisory — a reply that resolves after the request is still folded in).
///
/// Layout:
///   ┌──────────────────────────────┬────────────────────┐
///   │  code pane (cursor, ranges)  │  thread pane       │
///   ├──────────────────────────────┴────────────────────┤
///   │  status bar (1 line)                              │
///   ├───────────────────────────────────────────────────┤
///   │  input box (shown in input mode)                  │
///   └───────────────────────────────────────────────────┘
pub mod render;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures_util::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend, style::Style};
use tui_textarea::TextArea;

use crate::backend::{self, Backend, CredentialPrompt, CredentialStore};
use crate::client::Client;
use crate::commands::{self, FlowOutcome};
use crate::config::{ResolvedConfig, UserScopeStore};
use crate::document::{Anchor, LineRange, Workspace};
use crate::prompt::PromptPolicy;
use crate::thread::{DeleteOutcome, ThreadId, ThreadRegistry, TurnId};

type Term = Terminal<CrosstermBackend<io::Stdout>>;

// ── Modal state ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Navigating the code pane.
    Browse,
    /// Navigating the turns of the active thread.
    ThreadFocus,
    /// Typing into the input box.
    Input(InputIntent),
    /// API key overlay.
    KeyPrompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputIntent {
    /// New message for the active thread; the submit chord picks the flow.
    NewMessage { fresh_thread: bool },
    /// Rewriting an existing turn's body.
    EditTurn(TurnId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowKind {
    Ask,
    Doc,
    Rewrite,
}

// ── Status line ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Error,
    Working,
}

pub struct Status {
    pub text: String,
    pub kind: StatusKind,
}

/// A flow that had to wait for the API key overlay.
struct PendingFlow {
    kind: FlowKind,
    text: String,
    thread: ThreadId,
    fresh: bool,
}

// ── App state ─────────────────────────────────────────────────────────────────

pub struct App {
    pub path: PathBuf,
    pub workspace: Workspace,
    pub registry: ThreadRegistry,
    pub backend: Backend<Client>,
    pub store: UserScopeStore,
    pub policy: PromptPolicy,
    pub show_timestamps: bool,
    pub model_label: String,

    pub mode: Mode,
    pub cursor: usize,
    pub select_anchor: Option<usize>,
    pub active_thread: Option<ThreadId>,
    pub selected_turn: usize,
    pub input: TextArea<'static>,
    pub key_input: TextArea<'static>,
    pub key_reason: String,
    pub status: Option<Status>,
    pending: Option<PendingFlow>,
}

impl App {
    fn new(
        path: PathBuf,
        backend: Backend<Client>,
        store: UserScopeStore,
        resolved: ResolvedConfig,
    ) -> Result<Self> {
        let mut workspace = Workspace::default();
        workspace.open(&path)?;
        Ok(Self {
            path,
            workspace,
            registry: ThreadRegistry::default(),
            backend,
            store,
            policy: resolved.prompt_policy,
            show_timestamps: resolved.show_timestamps,
            model_label: resolved.model,
            mode: Mode::Browse,
            cursor: 0,
            select_anchor: None,
            active_thread: None,
            selected_turn: 0,
            input: message_input(),
            key_input: key_input(),
            key_reason: String::new(),
            status: None,
            pending: None,
        })
    }

    fn set_status(&mut self, kind: StatusKind, text: impl Into<String>) {
        self.status = Some(Status { text: text.into(), kind });
    }

    fn line_count(&self) -> usize {
        self.workspace.document(&self.path).map_or(0, |d| d.line_count())
    }

    fn move_cursor(&mut self, delta: isize) {
        let max = self.line_count().saturating_sub(1);
        self.cursor = self.cursor.saturating_add_signed(delta).min(max);
        self.active_thread = self.thread_under_cursor();
    }

    fn clamp_cursor(&mut self) {
        self.cursor = self.cursor.min(self.line_count().saturating_sub(1));
    }

    pub fn selection_range(&self) -> Option<LineRange> {
        self.select_anchor.map(|a| LineRange::new(a, self.cursor))
    }

    fn thread_under_cursor(&self) -> Option<ThreadId> {
        self.registry
            .for_path(&self.path)
            .find(|t| t.anchor.range.contains(self.cursor))
            .map(|t| t.id)
    }

    fn cycle_thread(&mut self, forward: bool) {
        let ids: Vec<ThreadId> = self.registry.for_path(&self.path).map(|t| t.id).collect();
        if ids.is_empty() {
            return;
        }
        let next = match self.active_thread.and_then(|cur| ids.iter().position(|&i| i == cur)) {
            Some(pos) if forward => (pos + 1) % ids.len(),
            Some(pos) => (pos + ids.len() - 1) % ids.len(),
            None => 0,
        };
        self.active_thread = Some(ids[next]);
        if let Some(thread) = self.registry.get(ids[next]) {
            self.cursor = thread.anchor.range.start.min(self.line_count().saturating_sub(1));
        }
        self.selected_turn = 0;
    }

    fn input_text(&self) -> String {
        self.input.lines().join("\n")
    }

    fn reset_input(&mut self) {
        self.input = message_input();
    }

    fn dispose_if_empty(&mut self, id: ThreadId) {
        if self.registry.get(id).is_some_and(|t| t.is_empty()) {
            self.registry.dispose(id);
            if self.active_thread == Some(id) {
                self.active_thread = None;
            }
        }
    }

    fn turn_count(&self, id: ThreadId) -> usize {
        self.registry.get(id).map_or(0, |t| t.turns.len())
    }
}

fn message_input() -> TextArea<'static> {
    let mut ta = TextArea::default();
    ta.set_cursor_line_style(Style::default());
    ta.set_placeholder_text("Ask me anything! Example: \"Explain the above code in plain English\"");
    ta
}

fn key_input() -> TextArea<'static> {
    let mut ta = TextArea::default();
    ta.set_cursor_line_style(Style::default());
    ta.set_mask_char('•');
    ta
}

/// Feeds exactly one candidate into `ensure_ready`, so a failed validation
/// comes straight back to the overlay instead of looping.
struct OneShot(Option<String>);

impl CredentialPrompt for OneShot {
    async fn request_key(&mut self, _reason: &str) -> Option<String> {
        self.0.take()
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

pub async fn run(
    path: PathBuf,
    backend: Backend<Client>,
    store: UserScopeStore,
    resolved: ResolvedConfig,
) -> Result<()> {
    let mut app = App::new(path, backend, store, resolved)?;

    enable_raw_mode()?;
    execute!(io::stdout(), EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    let mut events = EventStream::new();

    let result = event_loop(&mut terminal, &mut events, &mut app).await;

    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

async fn event_loop(terminal: &mut Term, events: &mut EventStream, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| render::draw(f, app))?;
        let Some(ev) = events.next().await else {
            return Ok(());
        };
        match ev? {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                if !handle_key(app, terminal, events, key).await? {
                    return Ok(());
                }
            }
            _ => {}
        }
    }
}

// ── Key dispatch ──────────────────────────────────────────────────────────────

/// Returns false when the app should quit.
async fn handle_key(
    app: &mut App,
    terminal: &mut Term,
    events: &mut EventStream,
    key: KeyEvent,
) -> Result<bool> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Ok(false);
    }

    match app.mode {
        Mode::Browse => handle_browse_key(app, terminal, events, key).await,
        Mode::ThreadFocus => handle_thread_key(app, terminal, events, key).await,
        Mode::Input(intent) => handle_input_key(app, terminal, events, key, intent).await,
        Mode::KeyPrompt => handle_key_prompt_key(app, terminal, events, key).await,
    }
}

async fn handle_browse_key(
    app: &mut App,
    terminal: &mut Term,
    events: &mut EventStream,
    key: KeyEvent,
) -> Result<bool> {
    match key.code {
        KeyCode::Char('q') => return Ok(false),
        KeyCode::Up | KeyCode::Char('k') => app.move_cursor(-1),
        KeyCode::Down | KeyCode::Char('j') => app.move_cursor(1),
        KeyCode::PageUp => app.move_cursor(-20),
        KeyCode::PageDown => app.move_cursor(20),
        KeyCode::Home => {
            app.cursor = 0;
            app.active_thread = app.thread_under_cursor();
        }
        KeyCode::End => {
            app.cursor = app.line_count().saturating_sub(1);
            app.active_thread = app.thread_under_cursor();
        }
        KeyCode::Char('v') => {
            app.select_anchor = match app.select_anchor {
                Some(_) => None,
                None => Some(app.cursor),
            };
        }
        KeyCode::Esc => {
            app.select_anchor = None;
            app.status = None;
        }
        KeyCode::Char('n') => {
            let range = app.selection_range().unwrap_or(LineRange::single(app.cursor));
            let tid = app.registry.create_thread(Anchor::new(&app.path, range));
            app.active_thread = Some(tid);
            app.select_anchor = None;
            app.reset_input();
            app.mode = Mode::Input(InputIntent::NewMessage { fresh_thread: true });
        }
        KeyCode::Char('r') => {
            if app.active_thread.is_some() {
                app.reset_input();
                app.mode = Mode::Input(InputIntent::NewMessage { fresh_thread: false });
            } else {
                app.set_status(StatusKind::Error, "no thread here — press n to start one");
            }
        }
        KeyCode::Char('g') => {
            let (tid, fresh) = match app.active_thread {
                Some(tid) => (tid, false),
                None => {
                    let range = app.selection_range().unwrap_or(LineRange::single(app.cursor));
                    let tid = app.registry.create_thread(Anchor::new(&app.path, range));
                    app.active_thread = Some(tid);
                    app.select_anchor = None;
                    (tid, true)
                }
            };
            dispatch_flow(app, terminal, events, FlowKind::Doc, String::new(), tid, fresh).await?;
        }
        KeyCode::Char(']') => app.cycle_thread(true),
        KeyCode::Char('[') => app.cycle_thread(false),
        KeyCode::Tab => {
            if let Some(tid) = app.active_thread {
                app.selected_turn = app.turn_count(tid).saturating_sub(1);
                app.mode = Mode::ThreadFocus;
            }
        }
        KeyCode::Char('u') => match app.workspace.undo_last_edit() {
            Ok(Some(path)) => {
                app.clamp_cursor();
                app.set_status(StatusKind::Info, format!("↶ undid last rewrite in {}", path.display()));
            }
            Ok(None) => app.set_status(StatusKind::Info, "nothing to undo"),
            Err(e) => app.set_status(StatusKind::Error, format!("undo failed: {e:#}")),
        },
        _ => {}
    }
    Ok(true)
}

async fn handle_thread_key(
    app: &mut App,
    terminal: &mut Term,
    events: &mut EventStream,
    key: KeyEvent,
) -> Result<bool> {
    let Some(tid) = app.active_thread else {
        app.mode = Mode::Browse;
        return Ok(true);
    };
    match key.code {
        KeyCode::Tab | KeyCode::Esc => app.mode = Mode::Browse,
        KeyCode::Up | KeyCode::Char('k') => {
            app.selected_turn = app.selected_turn.saturating_sub(1);
        }
        KeyCode::Down | KeyCode::Char('j') => {
            app.selected_turn = (app.selected_turn + 1).min(app.turn_count(tid).saturating_sub(1));
        }
        KeyCode::Char('e') => {
            let turn = app
                .registry
                .get(tid)
                .and_then(|t| t.turns.get(app.selected_turn))
                .map(|t| (t.id, t.content.clone()));
            if let Some((turn_id, content)) = turn {
                app.registry.edit_turn(turn_id);
                let mut ta = TextArea::from(content.lines().map(str::to_string).collect::<Vec<_>>());
                ta.set_cursor_line_style(Style::default());
                app.input = ta;
                app.mode = Mode::Input(InputIntent::EditTurn(turn_id));
            }
        }
        KeyCode::Char('d') => {
            let turn_id = app
                .registry
                .get(tid)
                .and_then(|t| t.turns.get(app.selected_turn))
                .map(|t| t.id);
            if let Some(turn_id) = turn_id {
                match app.registry.delete_turn(turn_id) {
                    DeleteOutcome::ThreadDisposed => {
                        app.active_thread = None;
                        app.mode = Mode::Browse;
                        app.set_status(StatusKind::Info, "turn deleted — empty thread disposed");
                    }
                    DeleteOutcome::Removed => {
                        app.selected_turn = app.selected_turn.min(app.turn_count(tid).saturating_sub(1));
                        app.set_status(StatusKind::Info, "turn deleted");
                    }
                    DeleteOutcome::NotFound => {}
                }
            }
        }
        KeyCode::Char('D') => {
            app.registry.dispose(tid);
            app.active_thread = None;
            app.mode = Mode::Browse;
            app.set_status(StatusKind::Info, "thread disposed");
        }
        KeyCode::Char('r') => {
            app.reset_input();
            app.mode = Mode::Input(InputIntent::NewMessage { fresh_thread: false });
        }
        KeyCode::Char('g') => {
            dispatch_flow(app, terminal, events, FlowKind::Doc, String::new(), tid, false).await?;
        }
        _ => {}
    }
    Ok(true)
}

async fn handle_input_key(
    app: &mut App,
    terminal: &mut Term,
    events: &mut EventStream,
    key: KeyEvent,
    intent: InputIntent,
) -> Result<bool> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match intent {
        InputIntent::EditTurn(turn_id) => match key.code {
            KeyCode::Char('s') if ctrl => {
                app.registry.set_turn_content(turn_id, app.input_text());
                app.registry.save_turn(turn_id);
                app.reset_input();
                app.mode = Mode::ThreadFocus;
                app.set_status(StatusKind::Info, "turn saved");
            }
            KeyCode::Esc => {
                app.registry.cancel_turn(turn_id);
                app.reset_input();
                app.mode = Mode::ThreadFocus;
                app.set_status(StatusKind::Info, "edit cancelled");
            }
            _ => {
                app.input.input(key);
            }
        },
        InputIntent::NewMessage { fresh_thread } => match key.code {
            KeyCode::Esc => {
                if let Some(tid) = app.active_thread {
                    if fresh_thread {
                        app.dispose_if_empty(tid);
                    }
                }
                app.reset_input();
                app.mode = Mode::Browse;
            }
            KeyCode::Char('a') if ctrl => {
                submit_message(app, terminal, events, FlowKind::Ask, fresh_thread).await?;
            }
            KeyCode::Char('e') if ctrl => {
                submit_message(app, terminal, events, FlowKind::Rewrite, fresh_thread).await?;
            }
            KeyCode::Char('n') if ctrl => {
                let text = app.input_text();
                if text.trim().is_empty() {
                    app.set_status(StatusKind::Error, "nothing to send");
                } else if let Some(tid) = app.active_thread {
                    commands::reply_note(&text, &mut app.registry, tid);
                    app.reset_input();
                    app.selected_turn = app.turn_count(tid).saturating_sub(1);
                    app.mode = Mode::ThreadFocus;
                    app.set_status(StatusKind::Info, "note added");
                }
            }
            _ => {
                app.input.input(key);
            }
        },
    }
    Ok(true)
}

async fn handle_key_prompt_key(
    app: &mut App,
    terminal: &mut Term,
    events: &mut EventStream,
    key: KeyEvent,
) -> Result<bool> {
    match key.code {
        KeyCode::Esc => {
            app.pending = None;
            app.mode = Mode::Browse;
            app.set_status(StatusKind::Error, "an API key is required for AI requests");
        }
        KeyCode::Enter => {
            let candidate = app.key_input.lines().join("").trim().to_string();
            if candidate.is_empty() {
                app.key_reason = backend::REASON_EMPTY.to_string();
                return Ok(true);
            }
            app.set_status(StatusKind::Working, "Validating API key…");
            terminal.draw(|f| render::draw(f, app))?;
            let mut oneshot = OneShot(Some(candidate));
            match app.backend.ensure_ready(&mut app.store, &mut oneshot).await {
                Ok(()) => {
                    app.mode = Mode::Browse;
                    app.set_status(StatusKind::Info, "API key validated");
                    if let Some(pending) = app.pending.take() {
                        run_flow(app, terminal, events, pending.kind, pending.text, pending.thread, pending.fresh)
                            .await?;
                    }
                }
                Err(_) => {
                    app.key_reason = backend::REASON_INVALID.to_string();
                    app.key_input = key_input();
                    app.status = None;
                }
            }
        }
        _ => {
            app.key_input.input(key);
        }
    }
    Ok(true)
}

// ── Flow execution ────────────────────────────────────────────────────────────

async fn submit_message(
    app: &mut App,
    terminal: &mut Term,
    events: &mut EventStream,
    kind: FlowKind,
    fresh: bool,
) -> Result<()> {
    let text = app.input_text();
    if text.trim().is_empty() {
        app.set_status(StatusKind::Error, "nothing to send");
        return Ok(());
    }
    let Some(tid) = app.active_thread else {
        app.mode = Mode::Browse;
        return Ok(());
    };
    dispatch_flow(app, terminal, events, kind, text, tid, fresh).await
}

/// Pre-validates the credential (silently, from the store) and either runs the
/// flow or parks it behind the API key overlay.
async fn dispatch_flow(
    app: &mut App,
    terminal: &mut Term,
    events: &mut EventStream,
    kind: FlowKind,
    text: String,
    thread: ThreadId,
    fresh: bool,
) -> Result<()> {
    if !app.backend.is_ready() {
        app.set_status(StatusKind::Working, "Validating API key…");
        terminal.draw(|f| render::draw(f, app))?;
        if app
            .backend
            .ensure_ready(&mut app.store, &mut backend::NoPrompt)
            .await
            .is_err()
        {
            app.key_reason = if app.store.get().is_some() {
                backend::REASON_INVALID.to_string()
            } else {
                backend::REASON_MISSING.to_string()
            };
            app.key_input = key_input();
            app.pending = Some(PendingFlow { kind, text, thread, fresh });
            app.mode = Mode::KeyPrompt;
            return Ok(());
        }
        app.status = None;
    }
    run_flow(app, terminal, events, kind, text, thread, fresh).await
}

async fn run_flow(
    app: &mut App,
    terminal: &mut Term,
    events: &mut EventStream,
    kind: FlowKind,
    text: String,
    thread: ThreadId,
    fresh: bool,
) -> Result<()> {
    app.set_status(
        StatusKind::Working,
        match kind {
            FlowKind::Rewrite => "Generating AI edit…  (Esc to cancel)",
            _ => "Generating AI response…  (Esc to cancel)",
        },
    );
    app.reset_input();
    app.mode = Mode::Browse;
    terminal.draw(|f| render::draw(f, app))?;

    // Await the flow while still draining the keyboard; Esc only flags the
    // cancel request — the flow's result is applied either way.
    let mut cancelled = false;
    let result = {
        let fut = async {
            match kind {
                FlowKind::Ask => {
                    commands::ask(
                        &text,
                        &mut app.registry,
                        thread,
                        &app.workspace,
                        &mut app.backend,
                        &mut app.store,
                        &mut backend::NoPrompt,
                        app.policy,
                    )
                    .await
                }
                FlowKind::Doc => {
                    commands::doc_request(
                        &mut app.registry,
                        thread,
                        &app.workspace,
                        &mut app.backend,
                        &mut app.store,
                        &mut backend::NoPrompt,
                        app.policy,
                    )
                    .await
                }
                FlowKind::Rewrite => {
                    commands::ai_edit(
                        &text,
                        &app.registry,
                        thread,
                        &mut app.workspace,
                        &mut app.backend,
                        &mut app.store,
                        &mut backend::NoPrompt,
                    )
                    .await
                }
            }
        };
        tokio::pin!(fut);
        loop {
            tokio::select! {
                res = &mut fut => break res,
                ev = events.next() => {
                    if let Some(Ok(Event::Key(k))) = ev {
                        if k.kind != KeyEventKind::Release && k.code == KeyCode::Esc {
                            cancelled = true;
                        }
                    }
                }
            }
        }
    };

    let late = if cancelled { "  (arrived after cancel request)" } else { "" };
    match kind {
        FlowKind::Ask | FlowKind::Doc => match result {
            Ok(FlowOutcome::Done) => {
                app.selected_turn = app.turn_count(thread).saturating_sub(1);
                app.mode = Mode::ThreadFocus;
                app.set_status(StatusKind::Info, format!("reply added{late}"));
            }
            Ok(FlowOutcome::NoDocument) => {
                if fresh {
                    app.dispose_if_empty(thread);
                }
                app.set_status(StatusKind::Error, "no document text under this range");
            }
            Ok(FlowOutcome::EmptyResult) => {
                app.set_status(StatusKind::Error, commands::ERROR_REPLY);
            }
            Err(e) => {
                app.set_status(StatusKind::Error, format!("ask failed: {e:#}"));
            }
        },
        FlowKind::Rewrite => {
            match result {
                Ok(FlowOutcome::Done) => {
                    app.clamp_cursor();
                    let range = app
                        .registry
                        .get(thread)
                        .map(|t| t.anchor.range.to_string())
                        .unwrap_or_default();
                    app.set_status(StatusKind::Info, format!("✓ rewrote {range}{late}"));
                }
                Ok(FlowOutcome::EmptyResult) => {
                    app.set_status(StatusKind::Error, commands::ERROR_REPLY);
                }
                Ok(FlowOutcome::NoDocument) => {
                    app.set_status(StatusKind::Error, "no document text under this range");
                }
                Err(e) => {
                    app.set_status(StatusKind::Error, format!("edit failed: {e:#}"));
                }
            }
            // The rewrite flow never adds turns; a thread created just to
            // anchor it goes away again.
            app.dispose_if_empty(thread);
        }
    }
    Ok(())
}
