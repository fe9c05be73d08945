//! Markdown → HTML for assistant messages.
//!
//! Code blocks are cut out of the pulldown-cmark event stream and rendered
//! by hand so they can be highlighted and get a copy button. Raw HTML in
//! the source is emitted as escaped text.

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use chat_core::ports::Highlighter;
use crate::render::COPY_LABEL;

pub fn render_markdown(markdown: &str, highlighter: &dyn Highlighter) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut events = Vec::new();
    let mut block: Option<(Option<String>, String)> = None;

    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                block = Some((language_of(&kind), String::new()));
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((lang, code)) = block.take() {
                    let rendered = render_code_block(&code, lang.as_deref(), highlighter);
                    events.push(Event::Html(CowStr::from(rendered)));
                }
            }
            Event::Text(text) if block.is_some() => {
                if let Some((_, code)) = block.as_mut() {
                    code.push_str(&text);
                }
            }
            Event::Html(raw) | Event::InlineHtml(raw) => events.push(Event::Text(raw)),
            other => events.push(other),
        }
    }

    // unterminated fence while streaming
    if let Some((lang, code)) = block.take() {
        events.push(Event::Html(CowStr::from(render_code_block(&code, lang.as_deref(), highlighter))));
    }

    let mut out = String::new();
    html::push_html(&mut out, events.into_iter());
    out
}

fn language_of(kind: &CodeBlockKind) -> Option<String> {
    match kind {
        CodeBlockKind::Fenced(info) => info
            .split(|c: char| c.is_whitespace() || c == ',')
            .next()
            .map(|lang| lang.trim_start_matches('{').trim_end_matches('}'))
            .filter(|lang| !lang.is_empty())
            .map(String::from),
        CodeBlockKind::Indented => None,
    }
}

/// Highlighted HTML for a code body: exact language, then auto-detection,
/// then plain escaped text.
pub fn highlight_code(code: &str, lang: Option<&str>, highlighter: &dyn Highlighter) -> String {
    if let Some(lang) = lang.filter(|l| highlighter.supports(l)) {
        match highlighter.highlight(code, lang) {
            Ok(html) => return html,
            Err(e) => log::debug!("Highlighting as {} failed: {}", lang, e),
        }
    }
    match highlighter.highlight_auto(code) {
        Ok(html) => html,
        Err(e) => {
            log::debug!("Auto highlighting failed: {}", e);
            escape_html(code)
        }
    }
}

fn render_code_block(code: &str, lang: Option<&str>, highlighter: &dyn Highlighter) -> String {
    let body = highlight_code(code, lang, highlighter);
    let class_lang = lang.map(css_token).filter(|l| !l.is_empty());
    let code_class = match &class_lang {
        Some(l) => format!("hljs language-{}", l),
        None => "hljs".to_string(),
    };
    let label = class_lang.as_deref().unwrap_or("code");
    format!(
        "<div class=\"code-block\"><div class=\"code-header\"><span class=\"code-lang\">{}</span>\
         <button class=\"copy-btn\" type=\"button\">{}</button></div>\
         <pre><code class=\"{}\">{}</code></pre></div>\n",
        label, COPY_LABEL, code_class, body
    )
}

/// Keep only characters safe inside a class attribute.
fn css_token(lang: &str) -> String {
    lang.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '#'))
        .collect()
}

/// Escape HTML to prevent injection
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
