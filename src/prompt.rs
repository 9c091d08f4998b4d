/// Prompt assembly.
///
/// The completion backend is stateless, so every request re-serialises the
/// whole conversation into one linear prompt: a fixed role-play preamble, the
/// anchored code as it reads *right now*, a seed exchange that establishes the
/// assistant's identity, the replayed thread, and the new question ending on
/// an open `AI: ` cue for the model to continue from.
use serde::{Deserialize, Serialize};

use crate::thread::{Role, Thread};

// ── Fixed text ────────────────────────────────────────────────────────────────

const ROLE_PLAY: &str = "I want you to act as a highly intelligent AI chatbot that has deep understanding of any coding language and its API documentations. I will provide you with a code block and your role is to provide a comprehensive answer to any questions or requests that I will ask about the code block. Please answer in as much detail as possible and not be limited to brevity. It is very important that you provide verbose answers.";

/// Always replayed first, before any real turn.
const SEED_EXCHANGE: &str = "Human: Who are you?\n\nAI: I am an intelligent AI chatbot\n\n";

// ── Policy ────────────────────────────────────────────────────────────────────

/// Which replay policy builds the conversation section. Exactly one is active
/// per run, chosen by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptPolicy {
    /// Replay every prior non-note turn. The default.
    #[default]
    Full,
    /// Token-frugal: seed exchange + new question only, prior turns omitted.
    Lean,
}

impl std::str::FromStr for PromptPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "lean" => Ok(Self::Lean),
            other => Err(format!("unknown prompt policy '{other}' (expected 'full' or 'lean')")),
        }
    }
}

// ── Assembly ──────────────────────────────────────────────────────────────────

/// Build the prompt for `question` against `thread`. `anchored_code` must be
/// the text of the thread's anchor range as read from the document at call
/// time — the caller resolves it (and aborts before calling this if no
/// document is available).
pub fn assemble(question: &str, thread: &Thread, anchored_code: &str, policy: PromptPolicy) -> String {
    let mut conversation = String::from(SEED_EXCHANGE);

    if policy == PromptPolicy::Full {
        for turn in &thread.turns {
            match turn.role {
                Role::Human => {
                    conversation.push_str(&format!("Human: {}\n\n", turn.content));
                }
                Role::Assistant => {
                    conversation.push_str(&format!("AI: {}\n\n", turn.content));
                }
                // Notes are annotations for the human reader, never context.
                Role::Note => {}
            }
        }
    }

    conversation.push_str(&format!("Human: {question}\n\nAI: "));

    format!("{ROLE_PLAY}\n{anchored_code}\n\n\n{conversation}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Anchor, LineRange};
    use crate::thread::{Role, ThreadRegistry};

    fn thread_with(turns: &[(Role, &str)]) -> (ThreadRegistry, crate::thread::ThreadId) {
        let mut reg = ThreadRegistry::default();
        let tid = reg.create_thread(Anchor::new("demo.py", LineRange::new(0, 4)));
        for (role, content) in turns {
            reg.append_turn(tid, *role, *content).unwrap();
        }
        (reg, tid)
    }

    #[test]
    fn notes_are_excluded_and_real_turns_replayed_in_order() {
        let (reg, tid) = thread_with(&[
            (Role::Note, "x"),
            (Role::Human, "q1"),
            (Role::Assistant, "a1"),
        ]);
        let prompt = assemble("q2", reg.get(tid).unwrap(), "CODE", PromptPolicy::Full);

        assert!(!prompt.contains('x'), "note leaked into prompt");
        assert!(prompt.contains("Human: q1\n\n"));
        assert!(prompt.contains("AI: a1\n\n"));
        assert!(prompt.contains("Human: q2\n\n"));
        let q1 = prompt.find("Human: q1").unwrap();
        let a1 = prompt.find("AI: a1").unwrap();
        let q2 = prompt.find("Human: q2").unwrap();
        assert!(q1 < a1 && a1 < q2);
    }

    #[test]
    fn prompt_ends_with_open_assistant_cue() {
        let (reg, tid) = thread_with(&[]);
        let prompt = assemble("explain", reg.get(tid).unwrap(), "CODE", PromptPolicy::Full);
        assert!(prompt.ends_with("Human: explain\n\nAI: "));
    }

    #[test]
    fn seed_exchange_is_always_first_in_the_replay() {
        let (reg, tid) = thread_with(&[(Role::Human, "earlier")]);
        let prompt = assemble("now", reg.get(tid).unwrap(), "CODE", PromptPolicy::Full);
        let seed = prompt.find("Human: Who are you?\n\nAI: I am an intelligent AI chatbot").unwrap();
        let earlier = prompt.find("Human: earlier").unwrap();
        assert!(seed < earlier);
    }

    #[test]
    fn layout_is_preamble_code_then_conversation() {
        let (reg, tid) = thread_with(&[]);
        let prompt = assemble("q", reg.get(tid).unwrap(), "fn main() {}", PromptPolicy::Full);
        assert!(prompt.starts_with(ROLE_PLAY));
        // Preamble and code joined by one newline, then the triple break
        // before the conversation.
        assert!(prompt.contains(&format!("{ROLE_PLAY}\nfn main() {{}}\n\n\nHuman: Who are you?")));
    }

    #[test]
    fn lean_policy_drops_prior_turns_but_keeps_seed_and_question() {
        let (reg, tid) = thread_with(&[
            (Role::Human, "old question"),
            (Role::Assistant, "old answer"),
        ]);
        let prompt = assemble("fresh", reg.get(tid).unwrap(), "CODE", PromptPolicy::Lean);
        assert!(!prompt.contains("old question"));
        assert!(!prompt.contains("old answer"));
        assert!(prompt.contains("Who are you?"));
        assert!(prompt.ends_with("Human: fresh\n\nAI: "));
    }

    #[test]
    fn anchored_code_is_taken_verbatim_from_the_caller() {
        let (reg, tid) = thread_with(&[]);
        let code = "  indented\n\twith tabs\n";
        let prompt = assemble("q", reg.get(tid).unwrap(), code, PromptPolicy::Full);
        assert!(prompt.contains(code));
    }
}
