/// Ratatui draw functions for marginalia.
/// Thin dispatcher over the panes; all state lives in `App`.
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::{App, InputIntent, Mode, StatusKind};
use crate::thread::{Role, Thread, TurnMode};
use crate::ui::{role_glyph, role_label};

const THREAD_PANE_WIDTH: u16 = 46;

fn role_color(role: Role) -> Color {
    match role {
        Role::Human     => Color::Rgb(160, 140, 255),
        Role::Assistant => Color::Cyan,
        Role::Note      => Color::Yellow,
    }
}

// ── Main draw entry point ─────────────────────────────────────────────────────

pub fn draw(f: &mut Frame, app: &App) {
    let area = f.area();

    let input_height = match app.mode {
        Mode::Input(_) => 5,
        _ => 0,
    };
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),            // title bar
            Constraint::Min(0),               // panes
            Constraint::Length(1),            // status bar
            Constraint::Length(input_height), // input box
        ])
        .split(area);

    draw_title(f, app, rows[0]);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(THREAD_PANE_WIDTH.min(area.width / 2)),
        ])
        .split(rows[1]);
    draw_code(f, app, cols[0]);
    draw_thread(f, app, cols[1]);

    draw_status(f, app, rows[2]);
    if input_height > 0 {
        draw_input(f, app, rows[3]);
    }

    if app.mode == Mode::KeyPrompt {
        draw_key_prompt(f, app, area);
    }
}

// ── Title bar ─────────────────────────────────────────────────────────────────

fn draw_title(f: &mut Frame, app: &App, area: Rect) {
    let threads = app.registry.for_path(&app.path).count();
    let line = Line::from(vec![
        Span::styled("  ✎ marginalia", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled("  ·  ", Style::default().fg(Color::DarkGray)),
        Span::styled(app.path.display().to_string(), Style::default().fg(Color::White)),
        Span::styled("  ·  ", Style::default().fg(Color::DarkGray)),
        Span::styled(app.model_label.clone(), Style::default().fg(Color::DarkGray)),
        Span::styled("  ·  ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!("{threads} thread{}", if threads == 1 { "" } else { "s" }),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

// ── Code pane ─────────────────────────────────────────────────────────────────

fn draw_code(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if app.mode == Mode::Browse {
            Color::Cyan
        } else {
            Color::DarkGray
        }));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(doc) = app.workspace.document(&app.path) else {
        return;
    };
    let total = doc.line_count();
    let height = inner.height as usize;
    let scroll = scroll_for(app.cursor, total, height);

    let selection = app.selection_range();
    let active_anchor = app
        .active_thread
        .and_then(|id| app.registry.get(id))
        .map(|t| t.anchor.range);

    let mut lines: Vec<Line> = Vec::with_capacity(height);
    for (idx, raw) in doc.lines.iter().enumerate().skip(scroll).take(height) {
        // Gutter marker: which thread (if any) covers this line
        let marker = if active_anchor.is_some_and(|r| r.contains(idx)) {
            Span::styled("▎", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        } else if app.registry.for_path(&app.path).any(|t| t.anchor.range.contains(idx)) {
            Span::styled("▎", Style::default().fg(Color::DarkGray))
        } else {
            Span::raw(" ")
        };

        let cursor_here = idx == app.cursor;
        let selected = selection.is_some_and(|r| r.contains(idx));
        let line_style = if cursor_here {
            Style::default().bg(Color::Rgb(40, 40, 60))
        } else if selected {
            Style::default().bg(Color::Rgb(30, 30, 48))
        } else {
            Style::default()
        };

        let number = Span::styled(
            format!("{:>4} ", idx + 1),
            Style::default().fg(if cursor_here { Color::White } else { Color::DarkGray }),
        );
        let body = Span::styled(truncate_to_width(raw, inner.width.saturating_sub(6) as usize), line_style);
        lines.push(Line::from(vec![marker, number, body]).style(line_style));
    }

    f.render_widget(Paragraph::new(lines), inner);
}

/// Keep the cursor roughly centered, clamped to the buffer.
fn scroll_for(cursor: usize, total: usize, height: usize) -> usize {
    if height == 0 || total <= height {
        return 0;
    }
    cursor.saturating_sub(height / 2).min(total - height)
}

// ── Thread pane ───────────────────────────────────────────────────────────────

fn draw_thread(f: &mut Frame, app: &App, area: Rect) {
    let focused = app.mode == Mode::ThreadFocus;
    let thread = app.active_thread.and_then(|id| app.registry.get(id));

    let title = match thread {
        Some(t) => format!(" {} · {} turn{} ", t.anchor.range, t.turns.len(), if t.turns.len() == 1 { "" } else { "s" }),
        None => " thread ".to_string(),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            title,
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(if focused { Color::Cyan } else { Color::DarkGray }));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(thread) = thread else {
        let hint = Paragraph::new(vec![
            Line::raw(""),
            Line::styled("  no thread here", Style::default().fg(Color::DarkGray)),
            Line::raw(""),
            Line::styled("  v  select lines", Style::default().fg(Color::DarkGray)),
            Line::styled("  n  start a thread", Style::default().fg(Color::DarkGray)),
            Line::styled("  ]  next thread", Style::default().fg(Color::DarkGray)),
        ]);
        f.render_widget(hint, inner);
        return;
    };

    let (lines, selected_offset) = thread_lines(app, thread, inner.width.saturating_sub(2) as usize);
    let height = inner.height as usize;
    let scroll = scroll_for(selected_offset, lines.len(), height);
    let visible: Vec<Line> = lines.into_iter().skip(scroll).take(height).collect();
    f.render_widget(Paragraph::new(visible), inner);
}

/// Build the full line list for a thread plus the offset of the selected
/// turn's header (for scrolling).
fn thread_lines(app: &App, thread: &Thread, width: usize) -> (Vec<Line<'static>>, usize) {
    let focused = app.mode == Mode::ThreadFocus;
    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut selected_offset = 0;

    for (i, turn) in thread.turns.iter().enumerate() {
        let selected = focused && i == app.selected_turn;
        if selected {
            selected_offset = lines.len();
        }

        let color = role_color(turn.role);
        let mut header = vec![
            Span::styled(
                format!(" {} {}", role_glyph(turn.role), role_label(turn.role)),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ),
        ];
        if app.show_timestamps {
            header.push(Span::styled(
                format!("  {}", turn.created_at.with_timezone(&chrono::Local).format("%H:%M")),
                Style::default().fg(Color::DarkGray),
            ));
        }
        if turn.mode == TurnMode::Editing {
            header.push(Span::styled("  (editing)", Style::default().fg(Color::Yellow)));
        }
        let header_style = if selected {
            Style::default().bg(Color::Rgb(40, 40, 60))
        } else {
            Style::default()
        };
        lines.push(Line::from(header).style(header_style));

        for chunk in wrap_text(&turn.content, width.saturating_sub(3)) {
            lines.push(Line::from(Span::styled(
                format!("   {chunk}"),
                Style::default().fg(Color::Rgb(220, 220, 230)),
            )));
        }
        if i + 1 < thread.turns.len() {
            lines.push(Line::raw(""));
        }
    }

    (lines, selected_offset)
}

// ── Status bar ────────────────────────────────────────────────────────────────

fn draw_status(f: &mut Frame, app: &App, area: Rect) {
    let (text, color) = match &app.status {
        Some(status) => {
            let color = match status.kind {
                StatusKind::Info    => Color::Green,
                StatusKind::Error   => Color::Red,
                StatusKind::Working => Color::Cyan,
            };
            (status.text.clone(), color)
        }
        None => (String::new(), Color::DarkGray),
    };

    let hints = match app.mode {
        Mode::Browse      => "v select · n thread · r reply · g docs · ] next · ⇥ turns · u undo · q quit",
        Mode::ThreadFocus => "j/k turn · e edit · d delete · D dispose · r reply · ⇥ back",
        Mode::Input(_)    => "^A ask · ^E rewrite · ^N note · Esc discard",
        Mode::KeyPrompt   => "Enter validate · Esc cancel",
    };

    let line = Line::from(vec![
        Span::styled(format!("  {text}"), Style::default().fg(color)),
        Span::raw("  "),
        Span::styled(hints, Style::default().fg(Color::DarkGray)),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

// ── Input box ─────────────────────────────────────────────────────────────────

fn draw_input(f: &mut Frame, app: &App, area: Rect) {
    let title = match app.mode {
        Mode::Input(InputIntent::EditTurn(_)) => " edit turn · ^S save · Esc cancel ",
        _ => " message · ^A ask AI · ^E AI edit · ^N note ",
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(title, Style::default().fg(Color::Cyan)))
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    f.render_widget(block, area);
    f.render_widget(&app.input, inner);
}

// ── API key overlay ───────────────────────────────────────────────────────────

fn draw_key_prompt(f: &mut Frame, app: &App, area: Rect) {
    let width = 62u16.min(area.width.saturating_sub(4));
    let height = 7u16.min(area.height.saturating_sub(2));
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    let popup = Rect { x, y, width, height };

    f.render_widget(Clear, popup);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            " API key ",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(popup);
    f.render_widget(block, popup);

    let reason_area = Rect { height: 2.min(inner.height), ..inner };
    let reason: Vec<Line> = wrap_text(&app.key_reason, inner.width.saturating_sub(2) as usize)
        .into_iter()
        .take(2)
        .map(|l| Line::from(Span::styled(format!(" {l}"), Style::default().fg(Color::Yellow))))
        .collect();
    f.render_widget(Paragraph::new(reason), reason_area);

    if inner.height > 3 {
        let entry_area = Rect {
            y: inner.y + 3,
            height: 1,
            ..inner
        };
        f.render_widget(&app.key_input, entry_area);
    }
}

// ── Text helpers ──────────────────────────────────────────────────────────────

/// Word-wrap to a display width; overlong words are hard-split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(4);
    let mut out = Vec::new();
    for line in text.lines() {
        if line.width() <= width {
            out.push(line.to_string());
            continue;
        }
        let mut cur = String::new();
        let mut cur_w = 0usize;
        for word in line.split_whitespace() {
            let w = word.width();
            if cur_w > 0 && cur_w + 1 + w > width {
                out.push(std::mem::take(&mut cur));
                cur_w = 0;
            }
            if w > width {
                for ch in word.chars() {
                    let cw = ch.width().unwrap_or(1);
                    if cur_w + cw > width {
                        out.push(std::mem::take(&mut cur));
                        cur_w = 0;
                    }
                    cur.push(ch);
                    cur_w += cw;
                }
            } else {
                if cur_w > 0 {
                    cur.push(' ');
                    cur_w += 1;
                }
                cur.push_str(word);
                cur_w += w;
            }
        }
        if !cur.is_empty() {
            out.push(cur);
        }
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}

fn truncate_to_width(s: &str, width: usize) -> String {
    if s.width() <= width {
        return s.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in s.chars() {
        let w = ch.width().unwrap_or(1);
        if used + w > width.saturating_sub(1) {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_respects_width_and_splits_long_words() {
        let wrapped = wrap_text("short and some muchlongerwordthatoverflows here", 10);
        assert!(wrapped.iter().all(|l| l.width() <= 10));
        assert!(wrapped.len() > 2);
    }

    #[test]
    fn wrap_keeps_short_lines_intact() {
        assert_eq!(wrap_text("hello", 40), vec!["hello".to_string()]);
    }

    #[test]
    fn scroll_centers_the_cursor() {
        assert_eq!(scroll_for(0, 100, 20), 0);
        assert_eq!(scroll_for(50, 100, 20), 40);
        assert_eq!(scroll_for(99, 100, 20), 80); // clamped at the bottom
    }
}
