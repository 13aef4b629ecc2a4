//! Formatting utilities (answer post-processing, Markdown → Telegram HTML).

use std::sync::OnceLock;

use chrono::{Local, TimeZone};
use regex::Regex;

use crate::store::ThreadSummary;

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid regex"))
}

/// Rewrite `#`-style headers as bold lines, leaving fenced code untouched.
///
/// Models keep emitting headers even when asked not to; Telegram has no
/// header markup, so they are folded into `**title**`.
pub fn format_answer(text: &str) -> String {
    let mut in_code = false;
    let mut out = Vec::new();

    for line in text.lines() {
        if line.trim().starts_with("```") {
            in_code = !in_code;
            out.push(line.to_string());
            continue;
        }

        if !in_code {
            if let Some(caps) = header_re().captures(line) {
                out.push(format!("**{}**", caps[2].trim()));
                continue;
            }
        }

        out.push(line.to_string());
    }

    out.join("\n")
}

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

struct InlineRules {
    bold_stars: Regex,
    bold_underscores: Regex,
    italic: Regex,
    link: Regex,
    bullet: Regex,
    header: Regex,
}

fn inline_rules() -> &'static InlineRules {
    static RULES: OnceLock<InlineRules> = OnceLock::new();
    RULES.get_or_init(|| InlineRules {
        bold_stars: Regex::new(r"\*\*([^\n]+?)\*\*").expect("valid regex"),
        bold_underscores: Regex::new(r"__([^\n]+?)__").expect("valid regex"),
        italic: Regex::new(r"\*([^*\n]+)\*").expect("valid regex"),
        link: Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").expect("valid regex"),
        bullet: Regex::new(r"(?m)^([ \t]*)[-*][ \t]+").expect("valid regex"),
        header: Regex::new(r"(?m)^#{1,6}[ \t]+(.+)$").expect("valid regex"),
    })
}

/// Convert the Markdown subset models produce into Telegram-compatible HTML.
///
/// Telegram HTML supports only `<b>`, `<i>`, `<code>`, `<pre>`, `<a href>` and a few more.
pub fn convert_markdown_to_html(input: &str) -> String {
    let (text, blocks) = stash_code_blocks(input);
    let (text, inline) = stash_inline_code(&text);

    let rules = inline_rules();
    let mut html = escape_html(&text);
    html = rules.header.replace_all(&html, "<b>$1</b>").into_owned();
    html = rules.bullet.replace_all(&html, "$1• ").into_owned();
    html = rules.bold_stars.replace_all(&html, "<b>$1</b>").into_owned();
    html = rules.bold_underscores.replace_all(&html, "<b>$1</b>").into_owned();
    html = rules.italic.replace_all(&html, "<i>$1</i>").into_owned();
    html = rules.link.replace_all(&html, r#"<a href="$2">$1</a>"#).into_owned();

    for (i, code) in blocks.iter().enumerate() {
        html = html.replace(
            &placeholder('B', i),
            &format!("<pre>{}</pre>", escape_html(code)),
        );
    }
    for (i, code) in inline.iter().enumerate() {
        html = html.replace(
            &placeholder('C', i),
            &format!("<code>{}</code>", escape_html(code)),
        );
    }

    while html.contains("\n\n\n") {
        html = html.replace("\n\n\n", "\n\n");
    }
    html
}

fn placeholder(kind: char, idx: usize) -> String {
    format!("\u{0}{kind}{idx}\u{0}")
}

fn stash_code_blocks(input: &str) -> (String, Vec<String>) {
    let mut blocks = Vec::new();
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("```") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        // Skip the language tag up to the first newline.
        let body_start = match after.find('\n') {
            Some(nl) if after[..nl].chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+' || c == '-') => nl + 1,
            _ => 0,
        };
        let body = &after[body_start..];
        let Some(end) = body.find("```") else {
            // Unclosed fence: keep the remainder verbatim.
            out.push_str(&rest[start..]);
            return (out, blocks);
        };
        out.push_str(&placeholder('B', blocks.len()));
        blocks.push(body[..end].trim_end_matches('\n').to_string());
        rest = &body[end + 3..];
    }

    out.push_str(rest);
    (out, blocks)
}

fn stash_inline_code(input: &str) -> (String, Vec<String>) {
    let mut codes = Vec::new();
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('`') {
        let after = &rest[start + 1..];
        match after.find('`') {
            Some(end) if !after[..end].contains('\n') => {
                out.push_str(&rest[..start]);
                out.push_str(&placeholder('C', codes.len()));
                codes.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            _ => {
                out.push_str(&rest[..=start]);
                rest = after;
            }
        }
    }

    out.push_str(rest);
    (out, codes)
}

/// Split Markdown into chunks of at most `limit` bytes on line boundaries.
///
/// A fenced block cut by a split is closed at the end of one chunk and
/// reopened (with its language tag) at the start of the next.
pub fn split_markdown(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(16);
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut chunk = String::new();
    let mut open_fence: Option<String> = None;

    for line in text.lines() {
        for piece in split_long_line(line, limit - 8) {
            // Room for a closing "\n```" if a fence is open at the split.
            if !chunk.is_empty() && chunk.len() + piece.len() + 1 + 4 > limit {
                if open_fence.is_some() {
                    chunk.push_str("\n```");
                }
                chunks.push(std::mem::take(&mut chunk));
                if let Some(fence) = &open_fence {
                    chunk.push_str(fence);
                }
            }
            if !chunk.is_empty() {
                chunk.push('\n');
            }
            chunk.push_str(piece);
        }

        if line.trim_start().starts_with("```") {
            open_fence = match open_fence {
                Some(_) => None,
                None => Some(line.trim().to_string()),
            };
        }
    }

    if !chunk.trim().is_empty() {
        chunks.push(chunk);
    }
    chunks
}

fn split_long_line(line: &str, max: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = line;
    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    out.push(rest);
    out
}

/// Render a model answer as Telegram HTML messages that fit `safe_limit`.
pub fn render_reply_chunks(markdown: &str, safe_limit: usize) -> Vec<String> {
    // HTML escaping and tags grow the text; leave headroom.
    let md_limit = safe_limit * 3 / 4;
    split_markdown(markdown, md_limit)
        .iter()
        .map(|c| convert_markdown_to_html(c))
        .filter(|c| !c.trim().is_empty())
        .collect()
}

/// Single-line preview of at most `max_chars` characters.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// `dd.mm HH:MM` in local time.
pub fn format_short_date(unix_seconds: i64) -> String {
    Local
        .timestamp_opt(unix_seconds, 0)
        .single()
        .map(|dt| dt.format("%d.%m %H:%M").to_string())
        .unwrap_or_else(|| "--.-- --:--".to_string())
}

/// One HTML line of the thread listing.
pub fn format_thread_line(thread: &ThreadSummary, is_active: bool) -> String {
    let mark = if is_active { "✅" } else { "▫️" };
    let last = thread
        .last_message
        .as_deref()
        .map(|m| preview(m, 40))
        .unwrap_or_else(|| "(empty)".to_string());
    format!(
        "{mark} <b>#{}</b> · {} · {}",
        thread.id,
        format_short_date(thread.updated_at),
        escape_html(&last)
    )
}
