//! Pure text functions behind the streaming assembler: fragment joining,
//! markdown rendering and sanitization.
//!
//! Everything here is deterministic, so rendering the same buffer twice yields
//! the same HTML.

use pulldown_cmark::{html, Options, Parser};
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Characters that attach to the preceding text without a space.
const TIGHT_LEADING: &[char] = &[
    '.', ',', ';', ':', '!', '?', ')', ']', '}', '%', '\'', '\u{2019}',
];

/// Markdown characters whose runs open and close inline spans.
const SPAN_DELIMITERS: &[char] = &['*', '_', '~', '`'];

/// Whether a space has to be inserted between `accumulated` and `fragment`.
pub fn needs_separator(accumulated: &str, fragment: &str) -> bool {
    let (Some(last), Some(first)) = (accumulated.chars().last(), fragment.chars().next()) else {
        return false;
    };
    if last.is_whitespace() || first.is_whitespace() {
        return false;
    }
    if TIGHT_LEADING.contains(&first) {
        return false;
    }
    // A closing delimiter binds to the text before it, an opening one to the
    // text after it.
    if let Some((delimiter, len)) = delimiter_run(fragment.chars()) {
        if is_unclosed(accumulated, delimiter, len) {
            return false;
        }
    }
    if let Some((delimiter, len)) = delimiter_run(accumulated.chars().rev()) {
        if is_unclosed(accumulated, delimiter, len) {
            return false;
        }
    }
    // Numbers split across fragments, and `[label](target)` links.
    if first.is_ascii_digit() && last.is_ascii_digit() {
        return false;
    }
    if first == '(' && last == ']' {
        return false;
    }
    true
}

/// The delimiter run at the start of `chars`, as `(delimiter, length)`.
fn delimiter_run(mut chars: impl Iterator<Item = char>) -> Option<(char, usize)> {
    let first = chars.next().filter(|c| SPAN_DELIMITERS.contains(c))?;
    Some((first, 1 + chars.take_while(|c| *c == first).count()))
}

/// True when `text` holds an odd number of `delimiter` runs of exactly `len`
/// characters, i.e. the last such run opened a span that is still open.
fn is_unclosed(text: &str, delimiter: char, len: usize) -> bool {
    let mut runs = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == delimiter {
            current += 1;
            continue;
        }
        if current == len {
            runs += 1;
        }
        current = 0;
    }
    if current == len {
        runs += 1;
    }
    runs % 2 == 1
}

/// Append `fragment` to `accumulated`, inserting a separating space if needed.
pub fn join_fragment(accumulated: &mut String, fragment: &str) {
    if needs_separator(accumulated, fragment) {
        accumulated.push(' ');
    }
    accumulated.push_str(fragment);
}

/// Render the whole buffer from markdown into sanitized HTML.
pub fn render(buffer: &str) -> String {
    sanitize(&markdown_to_html(buffer))
}

/// Render for the completed answer: suggested questions become clickable
/// spans and absolute links open in a new browsing context.
pub fn render_final(buffer: &str) -> String {
    let html = markdown_to_html(buffer);
    let html = mark_suggested_questions(&html);
    let html = open_external_links_in_new_tab(&html);
    sanitize(&html)
}

fn markdown_to_html(buffer: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(buffer, options);
    let mut out = String::with_capacity(buffer.len() + buffer.len() / 2);
    html::push_html(&mut out, parser);
    out
}

fn question_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*question:\s*(.+?)\s*\}\}").expect("valid question pattern")
    })
}

fn external_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<a href="(https?://[^"]*)""#).expect("valid link pattern")
    })
}

fn mark_suggested_questions(html: &str) -> String {
    question_pattern()
        .replace_all(html, |caps: &Captures| {
            let question = &caps[1];
            format!(
                r#"<span class="suggested-question" data-question="{}">{}</span>"#,
                question.replace('"', "&quot;"),
                question
            )
        })
        .into_owned()
}

fn open_external_links_in_new_tab(html: &str) -> String {
    external_link_pattern()
        .replace_all(html, r#"<a href="$1" target="_blank""#)
        .into_owned()
}

fn sanitize(html: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder
        .add_tag_attributes("a", &["target"])
        .add_tag_attributes("span", &["class", "data-question"]);
    builder.clean(html).to_string()
}
