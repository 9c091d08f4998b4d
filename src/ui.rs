/// UI helpers shared between the TUI and plain-stdout modes.
use crate::thread::Role;

// ── Role glyphs & labels ──────────────────────────────────────────────────────

pub fn role_glyph(role: Role) -> &'static str {
    match role {
        Role::Human     => "❯",
        Role::Assistant => "✦",
        Role::Note      => "✎",
    }
}

pub fn role_label(role: Role) -> &'static str {
    match role {
        Role::Human     => "you",
        Role::Assistant => "AI",
        Role::Note      => "note",
    }
}
