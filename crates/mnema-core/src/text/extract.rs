//! Content extraction: HTML / Markdown → plain text, boilerplate removal
//!
//! HTML goes through a readability-style pass: non-content subtrees are
//! skipped outright and the densest candidate container wins. The result
//! then loses locale boilerplate lines (cookie banners, copyright, nav
//! crumbs, share widgets) in both Japanese and English.

use std::sync::OnceLock;

use pulldown_cmark::{Event, Parser, TagEnd};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// What kind of source a document body is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    Html,
    Markdown,
    #[default]
    Plain,
}

impl SourceKind {
    /// Infer from a file extension or mime type.
    pub fn infer(extension: &str, mime_type: &str) -> Self {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "html" | "htm" | "xhtml" => return SourceKind::Html,
            "md" | "markdown" => return SourceKind::Markdown,
            _ => {}
        }
        match mime_type {
            "text/html" | "application/xhtml+xml" => SourceKind::Html,
            "text/markdown" => SourceKind::Markdown,
            _ => SourceKind::Plain,
        }
    }
}

/// Convert a raw document body to boilerplate-free plain text.
pub fn extract_content(body: &str, kind: SourceKind) -> String {
    let text = match kind {
        SourceKind::Html => html_to_text(body),
        SourceKind::Markdown => markdown_to_text(body),
        SourceKind::Plain => body.to_string(),
    };
    strip_boilerplate(&text)
}

/// Subtrees that never contain article content
const EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "header", "footer", "aside", "form",
    "iframe", "svg", "button", "select",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "li", "br", "tr", "h1", "h2", "h3", "h4", "h5", "h6",
    "blockquote", "pre", "td",
];

/// Readability-style HTML to text.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    // Prefer an explicit content container; fall back to the densest of
    // body's children, then body itself.
    let candidates = ["article", "main", "#content", ".content", "#main"];
    for sel in candidates {
        if let Ok(selector) = Selector::parse(sel) {
            if let Some(el) = doc.select(&selector).next() {
                let text = element_text(el);
                if text.chars().count() > 80 {
                    return squeeze_blank_lines(&text);
                }
            }
        }
    }

    let body = Selector::parse("body").ok().and_then(|s| doc.select(&s).next());
    match body {
        Some(el) => squeeze_blank_lines(&element_text(el)),
        None => String::new(),
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for child in el.children() {
        walk(child, &mut out);
    }
    out
}

fn walk(node: ego_tree::NodeRef<'_, scraper::Node>, out: &mut String) {
    match node.value() {
        scraper::Node::Text(t) => out.push_str(&t.text),
        scraper::Node::Element(el) => {
            let name = el.name();
            if EXCLUDED_TAGS.contains(&name) {
                return;
            }
            let block = BLOCK_TAGS.contains(&name);
            if block && !out.ends_with('\n') {
                out.push('\n');
            }
            for child in node.children() {
                walk(child, out);
            }
            if block && !out.ends_with('\n') {
                out.push('\n');
            }
        }
        _ => {}
    }
}

/// Markdown to plain text, dropping formatting but keeping code spans.
pub fn markdown_to_text(md: &str) -> String {
    let mut out = String::new();
    for event in Parser::new(md) {
        match event {
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::Item
                | TagEnd::CodeBlock
                | TagEnd::BlockQuote(_)
                | TagEnd::Table,
            ) => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
    squeeze_blank_lines(&out)
}

fn boilerplate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?ix)
            cookie | クッキー |
            all \s+ rights \s+ reserved | 無断転載 | 転載禁止 | © | \(c\) \s* \d{4} | copyright |
            privacy \s+ policy | プライバシーポリシー | 個人情報保護 |
            terms \s+ of \s+ (use|service) | 利用規約 |
            share \s+ (this|on) | follow \s+ us | シェアする | ツイートする | この記事を |
            ^ \s* (tweet | facebook | line | はてブ | pocket) \s* $ |
            subscribe \s+ to \s+ our | メルマガ登録 | 関連記事 | 広告 | sponsored | pr:
            ",
        )
        .expect("boilerplate pattern compiles")
    })
}

fn breadcrumb_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // HOME > section > page style nav lines
    RE.get_or_init(|| Regex::new(r"^\s*\S{1,24}(\s*[>›≫»]\s*\S{1,24}){1,}\s*$").expect("breadcrumb pattern compiles"))
}

/// Drop boilerplate lines; long lines survive even when a pattern matches
/// inside them, since real sentences mention cookies too.
pub fn strip_boilerplate(text: &str) -> String {
    let mut kept = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            kept.push("");
            continue;
        }
        let short = trimmed.chars().count() < 80;
        if short && (boilerplate_re().is_match(trimmed) || breadcrumb_re().is_match(trimmed)) {
            continue;
        }
        kept.push(trimmed);
    }
    squeeze_blank_lines(&kept.join("\n"))
}

fn squeeze_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if blank_run > 0 {
                out.push('\n');
            }
        }
        out.push_str(line.trim());
        blank_run = 0;
    }
    out
}
