//! Markdown to sanitized HTML for chat messages.
//!
//! Streaming content is incomplete by nature: a reply cut in the middle of a
//! code fence or a bold span would render as raw markup until the closing
//! token arrives. [`close_unbalanced`] appends the missing closers before
//! parsing. Settled content is rendered once and memoized.

use ammonia::Builder;
use log::debug;
use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

pub const CACHE_MAX_ENTRIES: usize = 1000;
const CACHE_EVICT_BATCH: usize = 100;

const ALLOWED_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "br", "strong", "em", "u", "s", "del", "ins", "ul", "ol",
    "li", "dl", "dt", "dd", "blockquote", "code", "pre", "a", "img", "table", "thead", "tbody", "tr",
    "th", "td", "div", "span",
];

const ALLOWED_ATTRIBUTES: &[&str] = &["href", "title", "alt", "src", "class", "id"];

const LINK_PREFIXES: &[&str] = &["http://", "https://", "mailto:", "/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
}

#[derive(Default)]
struct RenderCache {
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl RenderCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, html: String) {
        if self.entries.contains_key(&key) {
            return;
        }
        if self.entries.len() >= CACHE_MAX_ENTRIES {
            for old in self.order.drain(..CACHE_EVICT_BATCH.min(self.order.len())) {
                self.entries.remove(&old);
            }
            debug!("Render cache evicted oldest entries, {} left", self.entries.len());
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, html);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

pub struct MarkdownRenderer {
    sanitizer: Builder<'static>,
    cache: Mutex<RenderCache>,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let mut sanitizer = Builder::default();
        sanitizer
            .tags(ALLOWED_TAGS.iter().copied().collect::<HashSet<_>>())
            .generic_attributes(ALLOWED_ATTRIBUTES.iter().copied().collect::<HashSet<_>>())
            .link_rel(Some("noopener noreferrer"))
            .set_tag_attribute_value("a", "target", "_blank")
            .set_tag_attribute_value("img", "loading", "lazy");

        Self {
            sanitizer,
            cache: Mutex::new(RenderCache::default()),
        }
    }

    /// Renders `content` to HTML that is safe to display. Streaming content
    /// is repaired first and never cached.
    pub fn render(&self, content: &str, is_streaming: bool) -> String {
        if content.is_empty() {
            return String::new();
        }
        if is_streaming {
            return self.sanitize(&to_html(&close_unbalanced(content)));
        }

        if let Some(html) = self.cache().get(content) {
            return html;
        }
        let html = self.sanitize(&to_html(content));
        self.cache().insert(content.to_string(), html.clone());
        html
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            size: self.cache().entries.len(),
            max_size: CACHE_MAX_ENTRIES,
        }
    }

    fn sanitize(&self, html: &str) -> String {
        self.sanitizer.clean(html).to_string()
    }

    fn cache(&self) -> MutexGuard<'_, RenderCache> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Appends whatever closing tokens `content` is missing: a code fence, an
/// inline code span, an italic and a bold marker, in that order.
pub fn close_unbalanced(content: &str) -> String {
    let mut in_fence = false;
    let mut in_code = false;
    let mut bold = 0usize;
    let mut italic = 0usize;

    for line in content.split('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || is_thematic_break(trimmed) {
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        if !in_code {
            let indent = chars.len() - trimmed.chars().count();
            if chars.get(indent) == Some(&'*') && chars.get(indent + 1).is_some_and(|c| c.is_whitespace()) {
                i = indent + 2;
            }
        }

        while i < chars.len() {
            match chars[i] {
                '\\' if !in_code => i += 2,
                '`' => {
                    in_code = !in_code;
                    i += 1;
                }
                '*' if !in_code => {
                    let run = chars[i..].iter().take_while(|&&c| c == '*').count();
                    bold += run / 2;
                    italic += run % 2;
                    i += run;
                }
                _ => i += 1,
            }
        }
    }

    let mut repaired = content.to_string();
    if in_fence {
        repaired.push_str("\n```");
    }
    if in_code {
        repaired.push('`');
    }
    if italic % 2 == 1 {
        repaired.push('*');
    }
    if bold % 2 == 1 {
        repaired.push_str("**");
    }
    repaired
}

fn is_thematic_break(line: &str) -> bool {
    let stars = line.chars().filter(|&c| c == '*').count();
    stars >= 3 && line.chars().all(|c| c == '*' || c.is_whitespace())
}

fn to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut dropping_link = false;
    let events = Parser::new_ext(markdown, options).filter_map(|event| match event {
        Event::SoftBreak => Some(Event::HardBreak),
        Event::Start(Tag::CodeBlock(kind)) => Some(Event::Start(Tag::CodeBlock(with_language(kind)))),
        Event::Start(Tag::Link { ref dest_url, .. }) if !is_allowed_link(dest_url) => {
            dropping_link = true;
            None
        }
        Event::End(TagEnd::Link) if dropping_link => {
            dropping_link = false;
            None
        }
        other => Some(other),
    });

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

fn with_language(kind: CodeBlockKind<'_>) -> CodeBlockKind<'_> {
    match kind {
        CodeBlockKind::Fenced(info) if !info.trim().is_empty() => CodeBlockKind::Fenced(info),
        _ => CodeBlockKind::Fenced(CowStr::Borrowed("plaintext")),
    }
}

fn is_allowed_link(url: &str) -> bool {
    let url = url.trim().to_ascii_lowercase();
    LINK_PREFIXES.iter().any(|prefix| url.starts_with(prefix))
}
