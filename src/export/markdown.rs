//! HTML payload to Markdown document rendering.

use crate::error::{Error, Result};
use crate::types::{Account, Item, Payload};
use crate::utils::local_time;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

/// Containers holding the article body, tried in order
const CONTENT_SELECTORS: &[&str] = &["#js_article", "#js_content", "article", "body"];

/// Page furniture dropped from the body
const SKIPPED_IDS: &[&str] = &["js_top_ad_area", "js_tags_preview_toast", "content_bottom_area"];

static BLANK_LINES: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n{3,}").ok());

/// Turns a cached payload into an output document
pub trait Renderer: Send + Sync {
    /// Render the document for `item`, or `None` if the payload has no usable body
    fn render(&self, account: &Account, item: &Item, payload: &Payload) -> Result<Option<String>>;
}

/// Markdown with a YAML front-matter header
///
/// ```text
/// ---
/// title: "Escaped \"title\""
/// author: "Account name"
/// date: 2024-01-02 03:04:05
/// url: https://...
/// ---
/// ```
#[derive(Clone, Debug, Default)]
pub struct FrontMatterRenderer {
    utc_offset_minutes: i32,
}

impl FrontMatterRenderer {
    /// Render dates at the given offset from UTC
    pub fn new(utc_offset_minutes: i32) -> Self {
        Self { utc_offset_minutes }
    }

    fn front_matter(&self, account: &Account, item: &Item) -> String {
        let date = local_time(item.create_time, self.utc_offset_minutes);
        format!(
            "---\ntitle: \"{}\"\nauthor: \"{}\"\ndate: {}\nurl: {}\n---\n\n",
            escape_quoted(&item.title),
            escape_quoted(&account.display_name),
            date.format("%Y-%m-%d %H:%M:%S"),
            item.canonical_link,
        )
    }
}

impl Renderer for FrontMatterRenderer {
    fn render(&self, account: &Account, item: &Item, payload: &Payload) -> Result<Option<String>> {
        let Some(markdown) = html_to_markdown(&payload.body)? else {
            return Ok(None);
        };
        Ok(Some(self.front_matter(account, item) + &markdown))
    }
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Convert the article body of an HTML page to Markdown
///
/// Returns `None` when the page has no recognizable content container.
pub fn html_to_markdown(html: &str) -> Result<Option<String>> {
    let document = Html::parse_document(html);

    let mut content = None;
    for css in CONTENT_SELECTORS {
        let selector = Selector::parse(css)
            .map_err(|e| Error::Other(format!("invalid selector {css}: {e}")))?;
        if let Some(found) = document.select(&selector).next() {
            content = Some(found);
            break;
        }
    }
    let Some(content) = content else {
        return Ok(None);
    };

    let mut out = String::new();
    render_children(content, &mut out);

    let collapsed = match BLANK_LINES.as_ref() {
        Some(re) => re.replace_all(&out, "\n\n").into_owned(),
        None => out,
    };
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!("{trimmed}\n")))
}

fn render_children(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            push_text(out, text);
        } else if let Some(child) = ElementRef::wrap(child) {
            render_element(child, out);
        }
    }
}

fn render_element(element: ElementRef<'_>, out: &mut String) {
    let el = element.value();
    if el.id().is_some_and(|id| SKIPPED_IDS.contains(&id)) {
        return;
    }

    match el.name() {
        "script" | "style" | "noscript" | "head" => {}
        "br" => out.push('\n'),
        "hr" => out.push_str("\n\n---\n\n"),
        name @ ("h1" | "h2" | "h3" | "h4" | "h5" | "h6") => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            let text = inline_text(element);
            if !text.is_empty() {
                out.push_str(&format!("\n\n{} {}\n\n", "#".repeat(level), text));
            }
        }
        "p" | "div" | "section" | "ul" | "ol" | "table" | "figure" => {
            out.push_str("\n\n");
            render_children(element, out);
            out.push_str("\n\n");
        }
        "li" => {
            out.push_str("\n- ");
            render_children(element, out);
        }
        "tr" => {
            out.push('\n');
            render_children(element, out);
        }
        "td" | "th" => {
            render_children(element, out);
            out.push(' ');
        }
        "blockquote" => {
            let mut inner = String::new();
            render_children(element, &mut inner);
            out.push_str("\n\n");
            for line in inner.trim().lines() {
                out.push_str("> ");
                out.push_str(line.trim_end());
                out.push('\n');
            }
            out.push('\n');
        }
        "pre" => {
            let code: String = element.text().collect();
            out.push_str("\n\n```\n");
            out.push_str(code.trim_end());
            out.push_str("\n```\n\n");
        }
        "code" => {
            let code: String = element.text().collect();
            out.push('`');
            out.push_str(code.trim());
            out.push('`');
        }
        "img" => {
            let src = el.attr("data-src").or_else(|| el.attr("src"));
            if let Some(src) = src.filter(|s| !s.is_empty()) {
                let alt = el.attr("alt").unwrap_or_default();
                out.push_str(&format!("![{alt}]({src})"));
            }
        }
        "a" => {
            let text = inline_text(element);
            match el.attr("href").filter(|h| !h.is_empty() && !h.starts_with("javascript:")) {
                Some(href) if !text.is_empty() => out.push_str(&format!("[{text}]({href})")),
                _ => out.push_str(&text),
            }
        }
        "strong" | "b" => wrap_inline(element, "**", out),
        "em" | "i" => wrap_inline(element, "_", out),
        _ => render_children(element, out),
    }
}

fn wrap_inline(element: ElementRef<'_>, marker: &str, out: &mut String) {
    let mut inner = String::new();
    render_children(element, &mut inner);
    let inner = inner.trim();
    if !inner.is_empty() {
        out.push_str(marker);
        out.push_str(inner);
        out.push_str(marker);
    }
}

fn inline_text(element: ElementRef<'_>) -> String {
    let mut text = String::new();
    for piece in element.text() {
        push_text(&mut text, piece);
    }
    text.trim().to_string()
}

/// Append text with HTML whitespace collapsing
fn push_text(out: &mut String, text: &str) {
    if text.trim().is_empty() {
        if !text.is_empty() && !out.is_empty() && !out.ends_with(char::is_whitespace) {
            out.push(' ');
        }
        return;
    }
    for (i, word) in text.split_whitespace().enumerate() {
        let starts_fresh = out.is_empty() || out.ends_with(char::is_whitespace);
        if i > 0 || (!starts_fresh && text.starts_with(char::is_whitespace)) {
            out.push(' ');
        }
        out.push_str(word);
    }
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}
