/// The user-facing flows: ask, AI edit, note reply.
///
/// Each flow resolves its preconditions (document text, validated credential)
/// before mutating anything, then performs its thread/document mutations
/// around exactly one network call. The human turn is appended before the
/// completion call is awaited — a failed completion leaves the question
/// recorded, and the next successful ask replays it like any other turn.
use anyhow::{Result, bail};

use crate::backend::{Backend, CredentialPrompt, CredentialStore};
use crate::client::ModelApi;
use crate::document::DocumentHost;
use crate::prompt::{self, PromptPolicy};
use crate::thread::{Role, ThreadId, ThreadRegistry, TurnId};

// ── Fixed strings ─────────────────────────────────────────────────────────────

/// Paired reply when the backend returns nothing usable, so every question
/// still gets an answer slot in the thread.
pub const ERROR_REPLY: &str = "An error occured. Please try again...";

/// End-of-turn marker some chat-tuned completion models emit.
const END_MARKER: &str = "<|im_end|>";

/// Canned instruction behind the "generate docs" command.
pub const DOC_REQUEST: &str = "Write an elaborate, high quality docstring for the above function";

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// What a flow did. Content-absence conditions are in-band — only transport
/// and credential-abort failures surface as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Flow ran to completion and applied its mutations.
    Done,
    /// No document text available for the anchor; nothing was mutated.
    NoDocument,
    /// Edit flow only: the backend returned no usable rewrite; the document
    /// was left untouched.
    EmptyResult,
}

// ── Ask ───────────────────────────────────────────────────────────────────────

/// Ask the assistant about the thread's anchored code. On success appends
/// exactly two turns — the trimmed question, then the reply (trimmed, end
/// marker stripped) or the error placeholder. Aborts without mutating the
/// thread when the anchor cannot be resolved or the user abandons the
/// credential prompt.
pub async fn ask<A, D, S, P>(
    question: &str,
    reg: &mut ThreadRegistry,
    thread_id: ThreadId,
    docs: &D,
    backend: &mut Backend<A>,
    store: &mut S,
    prompt_ui: &mut P,
    policy: PromptPolicy,
) -> Result<FlowOutcome>
where
    A: ModelApi,
    D: DocumentHost,
    S: CredentialStore,
    P: CredentialPrompt,
{
    let question = question.trim();

    let Some(thread) = reg.get(thread_id) else {
        bail!("thread was disposed");
    };
    let Some(code) = docs.anchored_text(&thread.anchor) else {
        return Ok(FlowOutcome::NoDocument);
    };
    let assembled = prompt::assemble(question, thread, &code, policy);

    backend.ensure_ready(store, prompt_ui).await?;

    reg.append_turn(thread_id, Role::Human, question);

    // Transport failures propagate from here, leaving the human turn as the
    // sole addition. Content absence is handled in-band below.
    let reply = backend.api.complete(&assembled).await?;

    let body = match reply {
        Some(text) => clean_reply(&text),
        None => ERROR_REPLY.to_string(),
    };
    reg.append_turn(thread_id, Role::Assistant, body);

    Ok(FlowOutcome::Done)
}

/// Ask flow with the canned docstring instruction.
pub async fn doc_request<A, D, S, P>(
    reg: &mut ThreadRegistry,
    thread_id: ThreadId,
    docs: &D,
    backend: &mut Backend<A>,
    store: &mut S,
    prompt_ui: &mut P,
    policy: PromptPolicy,
) -> Result<FlowOutcome>
where
    A: ModelApi,
    D: DocumentHost,
    S: CredentialStore,
    P: CredentialPrompt,
{
    ask(DOC_REQUEST, reg, thread_id, docs, backend, store, prompt_ui, policy).await
}

/// Drop the first end-of-turn marker, then trim what is left.
fn clean_reply(raw: &str) -> String {
    raw.replacen(END_MARKER, "", 1).trim().to_string()
}

// ── AI edit ───────────────────────────────────────────────────────────────────

/// Rewrite the thread's anchored range according to `instruction`. The thread
/// itself is never touched; on any failure the document is left exactly as it
/// was.
pub async fn ai_edit<A, D, S, P>(
    instruction: &str,
    reg: &ThreadRegistry,
    thread_id: ThreadId,
    docs: &mut D,
    backend: &mut Backend<A>,
    store: &mut S,
    prompt_ui: &mut P,
) -> Result<FlowOutcome>
where
    A: ModelApi,
    D: DocumentHost,
    S: CredentialStore,
    P: CredentialPrompt,
{
    let instruction = instruction.trim();

    let Some(thread) = reg.get(thread_id) else {
        bail!("thread was disposed");
    };
    let anchor = thread.anchor.clone();
    let Some(code) = docs.anchored_text(&anchor) else {
        return Ok(FlowOutcome::NoDocument);
    };

    backend.ensure_ready(store, prompt_ui).await?;

    match backend.api.edit(&code, instruction).await? {
        Some(rewritten) => {
            docs.replace_range(&anchor, &rewritten)?;
            Ok(FlowOutcome::Done)
        }
        None => Ok(FlowOutcome::EmptyResult),
    }
}

// ── Note reply ────────────────────────────────────────────────────────────────

/// Append a plain note to the thread. No network call; notes never enter
/// prompt replay.
pub fn reply_note(text: &str, reg: &mut ThreadRegistry, thread_id: ThreadId) -> Option<TurnId> {
    reg.append_turn(thread_id, Role::Note, text)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Anchor, LineRange};
    use std::cell::RefCell;

    // ── Scripted collaborators ───────────────────────────────────────────────

    enum Scripted {
        Text(&'static str),
        Empty,
        Fail,
    }

    struct MockApi {
        script: Scripted,
        prompts_seen: RefCell<Vec<String>>,
        edit_calls: RefCell<u32>,
    }

    impl MockApi {
        fn new(script: Scripted) -> Self {
            Self {
                script,
                prompts_seen: RefCell::new(Vec::new()),
                edit_calls: RefCell::new(0),
            }
        }

        fn scripted(&self) -> Result<Option<String>> {
            match &self.script {
                Scripted::Text(t) => Ok(Some(t.to_string())),
                Scripted::Empty => Ok(None),
                Scripted::Fail => Err(anyhow::anyhow!("connection reset by peer")),
            }
        }
    }

    impl ModelApi for MockApi {
        fn has_key(&self) -> bool {
            true
        }

        fn set_key(&mut self, _key: String) {}

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec!["text-davinci-003".into()])
        }

        async fn complete(&self, prompt: &str) -> Result<Option<String>> {
            self.prompts_seen.borrow_mut().push(prompt.to_string());
            self.scripted()
        }

        async fn edit(&self, _input: &str, _instruction: &str) -> Result<Option<String>> {
            *self.edit_calls.borrow_mut() += 1;
            self.scripted()
        }
    }

    /// Document host with fixed text; records every replace.
    struct MockDocs {
        text: Option<&'static str>,
        replacements: Vec<(Anchor, String)>,
    }

    impl MockDocs {
        fn with_text(text: &'static str) -> Self {
            Self { text: Some(text), replacements: Vec::new() }
        }

        fn unavailable() -> Self {
            Self { text: None, replacements: Vec::new() }
        }
    }

    impl DocumentHost for MockDocs {
        fn anchored_text(&self, _anchor: &Anchor) -> Option<String> {
            self.text.map(str::to_string)
        }

        fn replace_range(&mut self, anchor: &Anchor, text: &str) -> Result<()> {
            self.replacements.push((anchor.clone(), text.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemStore(Option<String>);

    impl CredentialStore for MemStore {
        fn get(&self) -> Option<String> {
            self.0.clone()
        }

        fn set(&mut self, key: &str) -> Result<()> {
            self.0 = Some(key.to_string());
            Ok(())
        }
    }

    fn fixture(script: Scripted) -> (ThreadRegistry, ThreadId, Backend<MockApi>, MemStore) {
        let mut reg = ThreadRegistry::default();
        let tid = reg.create_thread(Anchor::new("src/log.py", LineRange::new(10, 30)));
        (reg, tid, Backend::new(MockApi::new(script)), MemStore::default())
    }

    // ── Ask ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn ask_appends_trimmed_question_and_cleaned_reply() {
        let (mut reg, tid, mut backend, mut store) = fixture(Scripted::Text(" answer text <|im_end|>"));
        let docs = MockDocs::with_text("CODE");

        let outcome = ask(
            "  explain this  ",
            &mut reg,
            tid,
            &docs,
            &mut backend,
            &mut store,
            &mut crate::backend::NoPrompt,
            PromptPolicy::Full,
        )
        .await
        .unwrap();

        assert_eq!(outcome, FlowOutcome::Done);
        let turns = &reg.get(tid).unwrap().turns;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::Human);
        assert_eq!(turns[0].content, "explain this");
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "answer text");
    }

    #[tokio::test]
    async fn ask_sends_the_assembled_prompt_with_code_and_question() {
        let (mut reg, tid, mut backend, mut store) = fixture(Scripted::Text("ok"));
        let docs = MockDocs::with_text("def log(event): ...");

        ask(
            "what does this do",
            &mut reg,
            tid,
            &docs,
            &mut backend,
            &mut store,
            &mut crate::backend::NoPrompt,
            PromptPolicy::Full,
        )
        .await
        .unwrap();

        let prompts = backend.api.prompts_seen.borrow();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("def log(event): ..."));
        assert!(prompts[0].ends_with("Human: what does this do\n\nAI: "));
    }

    #[tokio::test]
    async fn ask_pairs_a_placeholder_reply_on_empty_completion() {
        let (mut reg, tid, mut backend, mut store) = fixture(Scripted::Empty);
        let docs = MockDocs::with_text("CODE");

        let outcome = ask(
            "why",
            &mut reg,
            tid,
            &docs,
            &mut backend,
            &mut store,
            &mut crate::backend::NoPrompt,
            PromptPolicy::Full,
        )
        .await
        .unwrap();

        assert_eq!(outcome, FlowOutcome::Done);
        let turns = &reg.get(tid).unwrap().turns;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "why");
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, ERROR_REPLY);
    }

    #[tokio::test]
    async fn ask_without_a_document_appends_nothing() {
        let (mut reg, tid, mut backend, mut store) = fixture(Scripted::Text("unused"));
        let docs = MockDocs::unavailable();

        let outcome = ask(
            "q",
            &mut reg,
            tid,
            &docs,
            &mut backend,
            &mut store,
            &mut crate::backend::NoPrompt,
            PromptPolicy::Full,
        )
        .await
        .unwrap();

        assert_eq!(outcome, FlowOutcome::NoDocument);
        assert!(reg.get(tid).unwrap().turns.is_empty());
        assert!(backend.api.prompts_seen.borrow().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_leaves_the_dangling_human_turn() {
        let (mut reg, tid, mut backend, mut store) = fixture(Scripted::Fail);
        let docs = MockDocs::with_text("CODE");

        let result = ask(
            "doomed",
            &mut reg,
            tid,
            &docs,
            &mut backend,
            &mut store,
            &mut crate::backend::NoPrompt,
            PromptPolicy::Full,
        )
        .await;

        assert!(result.is_err());
        let turns = &reg.get(tid).unwrap().turns;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::Human);
        assert_eq!(turns[0].content, "doomed");
    }

    #[tokio::test]
    async fn doc_request_asks_with_the_canned_instruction() {
        let (mut reg, tid, mut backend, mut store) = fixture(Scripted::Text("/// Logs an event."));
        let docs = MockDocs::with_text("fn log() {}");

        doc_request(
            &mut reg,
            tid,
            &docs,
            &mut backend,
            &mut store,
            &mut crate::backend::NoPrompt,
            PromptPolicy::Full,
        )
        .await
        .unwrap();

        let turns = &reg.get(tid).unwrap().turns;
        assert_eq!(turns[0].content, DOC_REQUEST);
    }

    // ── AI edit ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn ai_edit_replaces_the_anchored_range_and_skips_the_thread() {
        let (reg, tid, mut backend, mut store) = fixture(Scripted::Text("fn renamed() {}"));
        let mut docs = MockDocs::with_text("fn old() {}");

        let outcome = ai_edit(
            " rename the function ",
            &reg,
            tid,
            &mut docs,
            &mut backend,
            &mut store,
            &mut crate::backend::NoPrompt,
        )
        .await
        .unwrap();

        assert_eq!(outcome, FlowOutcome::Done);
        assert_eq!(docs.replacements.len(), 1);
        let (anchor, text) = &docs.replacements[0];
        assert_eq!(anchor.range, LineRange::new(10, 30));
        assert_eq!(text, "fn renamed() {}");
        assert!(reg.get(tid).unwrap().turns.is_empty());
    }

    #[tokio::test]
    async fn ai_edit_with_empty_result_makes_zero_replacements() {
        let (reg, tid, mut backend, mut store) = fixture(Scripted::Empty);
        let mut docs = MockDocs::with_text("fn old() {}");

        let outcome = ai_edit(
            "rewrite",
            &reg,
            tid,
            &mut docs,
            &mut backend,
            &mut store,
            &mut crate::backend::NoPrompt,
        )
        .await
        .unwrap();

        assert_eq!(outcome, FlowOutcome::EmptyResult);
        assert!(docs.replacements.is_empty());
    }

    #[tokio::test]
    async fn ai_edit_without_a_document_makes_no_backend_call() {
        let (reg, tid, mut backend, mut store) = fixture(Scripted::Text("unused"));
        let mut docs = MockDocs::unavailable();

        let outcome = ai_edit(
            "rewrite",
            &reg,
            tid,
            &mut docs,
            &mut backend,
            &mut store,
            &mut crate::backend::NoPrompt,
        )
        .await
        .unwrap();

        assert_eq!(outcome, FlowOutcome::NoDocument);
        assert_eq!(*backend.api.edit_calls.borrow(), 0);
        assert!(docs.replacements.is_empty());
    }

    // ── Notes ────────────────────────────────────────────────────────────────

    #[test]
    fn reply_note_adds_a_note_turn_without_network_traffic() {
        let (mut reg, tid, backend, _store) = fixture(Scripted::Text("unused"));

        let id = reply_note("remember to refactor", &mut reg, tid).unwrap();

        let turn = reg.find_turn(id).unwrap();
        assert_eq!(turn.role, Role::Note);
        assert_eq!(turn.content, "remember to refactor");
        assert!(backend.api.prompts_seen.borrow().is_empty());
        assert_eq!(*backend.api.edit_calls.borrow(), 0);
    }

    #[test]
    fn clean_reply_strips_marker_then_trims() {
        assert_eq!(clean_reply(" answer text <|im_end|>"), "answer text");
        assert_eq!(clean_reply("plain"), "plain");
        assert_eq!(clean_reply("a <|im_end|> b"), "a  b");
    }
}
