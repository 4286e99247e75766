//! Conversation context window: token accounting and three-phase
//! compression so a bounded-context model never receives more than it
//! can hold.
//!
//! Compression runs in three escalating phases, each checked for "are we
//! back under budget yet" before the next runs: compress consumed tool
//! results, truncate the conversation's middle, then drop the oldest
//! messages into a running summary as a last resort.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

/// First N messages kept at full fidelity regardless of budget pressure.
const HEAD_PRESERVE: usize = 2;
/// Last N messages kept at full fidelity regardless of budget pressure.
const TAIL_PRESERVE: usize = 6;
/// Middle messages longer than this are truncated/compressed.
const MIDDLE_TRUNCATE_CHARS: usize = 400;
/// Running summary is capped at this many absorbed facts.
const MAX_SUMMARY_ITEMS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextRole {
    System,
    User,
    Assistant,
    ToolResult,
}

impl ContextRole {
    fn as_str(self) -> &'static str {
        match self {
            ContextRole::System => "system",
            ContextRole::User => "user",
            ContextRole::Assistant => "assistant",
            ContextRole::ToolResult => "tool_result",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextMessage {
    pub role: ContextRole,
    pub content: String,
    pub tokens: usize,
    pub created_at: Instant,
    pub compressed: bool,
    pub is_summary: bool,
}

/// Health of the context window relative to its budget — used by the
/// agent loop to decide whether to prompt for a continuity summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextHealth {
    Green,
    Yellow,
    Orange,
    Red,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenUsage {
    pub system_tokens: usize,
    pub message_tokens: usize,
    pub total_tokens: usize,
    pub available_tokens: usize,
    pub headroom: usize,
    pub message_count: usize,
    pub compressed_count: usize,
}

impl TokenUsage {
    pub fn fraction_consumed(&self) -> f64 {
        if self.available_tokens == 0 {
            return 1.0;
        }
        (self.total_tokens as f64 / self.available_tokens as f64).min(1.0)
    }

    pub fn health(&self) -> ContextHealth {
        let frac = self.fraction_consumed();
        if frac >= 0.95 {
            ContextHealth::Red
        } else if frac >= 0.85 {
            ContextHealth::Orange
        } else if frac >= 0.70 {
            ContextHealth::Yellow
        } else {
            ContextHealth::Green
        }
    }
}

struct CacheEntry {
    content: String,
    cached_at: Instant,
}

static TOOL_RESULT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[TOOL_RESULT\s+(\w+)\](.*?)\[/TOOL_RESULT\]").unwrap());
static FILE_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)([A-Za-z]:\\[\w\\./-]+|/[\w/.-]+\.\w+)").unwrap());
static TOOL_CALL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)::\s*(?:TOOL\s+)?(\w+)\(").unwrap());

/// Estimate token count with a word-length-bucketed heuristic, biased to
/// over-approximate (a cheap, model-agnostic stand-in for a real
/// tokenizer — see [`crate::trust::ErrorKind::BudgetOverflow`] for what
/// happens if it under-estimates and the budget is still exceeded).
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let mut count = 0usize;
    for word in text.split_whitespace() {
        let len = word.chars().count();
        count += if len <= 4 {
            1
        } else if len <= 10 {
            2
        } else {
            (len / 4).max(2)
        };
    }
    count += text.matches('\n').count();
    count.max(1)
}

/// Conversation context window with bounded token budget.
pub struct ContextManager {
    max_tokens: usize,
    reserved_tokens: usize,
    system_prompt: String,
    system_tokens: usize,
    messages: Vec<ContextMessage>,
    running_summary: Vec<String>,
    file_cache: HashMap<String, CacheEntry>,
}

impl ContextManager {
    pub fn new(max_tokens: usize, reserved_tokens: usize) -> Self {
        Self {
            max_tokens,
            reserved_tokens,
            system_prompt: String::new(),
            system_tokens: 0,
            messages: Vec::new(),
            running_summary: Vec::new(),
            file_cache: HashMap::new(),
        }
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
        self.system_tokens = estimate_tokens(&self.system_prompt);
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn available_tokens(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_tokens).saturating_sub(self.system_tokens)
    }

    fn message_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.tokens).sum()
    }

    /// Append a message, eagerly compress consumed tool results when it's
    /// an assistant turn, then enforce the token budget.
    pub fn add_message(&mut self, role: ContextRole, content: impl Into<String>) {
        let content = content.into();
        let tokens = estimate_tokens(&content);
        self.messages.push(ContextMessage {
            role,
            content,
            tokens,
            created_at: Instant::now(),
            compressed: false,
            is_summary: false,
        });

        if role == ContextRole::Assistant {
            self.compress_tool_results();
        }
        self.enforce_budget();
    }

    pub fn messages(&self) -> &[ContextMessage] {
        &self.messages
    }

    pub fn token_usage(&self) -> TokenUsage {
        let message_tokens = self.message_tokens();
        let total = self.system_tokens + message_tokens;
        let available = self.available_tokens();
        let compressed = self.messages.iter().filter(|m| m.compressed).count();
        TokenUsage {
            system_tokens: self.system_tokens,
            message_tokens,
            total_tokens: total,
            available_tokens: available,
            headroom: available.saturating_sub(total),
            message_count: self.messages.len(),
            compressed_count: compressed,
        }
    }

    pub fn cache_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.file_cache.insert(path.into(), CacheEntry { content: content.into(), cached_at: Instant::now() });
    }

    /// Return cached content if present and fresher than `max_age`,
    /// evicting stale entries as a side effect.
    pub fn get_cached_file(&mut self, path: &str, max_age: Duration) -> Option<String> {
        let fresh = match self.file_cache.get(path) {
            Some(entry) => entry.cached_at.elapsed() <= max_age,
            None => return None,
        };
        if fresh {
            self.file_cache.get(path).map(|e| e.content.clone())
        } else {
            self.file_cache.remove(path);
            None
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.file_cache.clear();
    }

    /// Run all three compression phases unconditionally, then — if still
    /// above 70% of available budget — drop oldest into the summary.
    pub fn compress(&mut self) {
        self.compress_tool_results();
        self.truncate_middle();

        let available = self.available_tokens();
        while self.messages.len() > 4 && (self.message_tokens() as f64) > (available as f64) * 0.7 {
            let dropped = self.messages.remove(0);
            self.absorb_into_summary(&dropped);
        }
        if !self.running_summary.is_empty() {
            self.inject_summary();
        }
    }

    fn enforce_budget(&mut self) {
        let available = self.available_tokens();
        if self.message_tokens() <= available {
            return;
        }

        self.compress_tool_results();
        if self.message_tokens() <= available {
            return;
        }

        self.truncate_middle();
        if self.message_tokens() <= available {
            return;
        }

        while !self.messages.is_empty() && self.message_tokens() > available {
            let dropped = self.messages.remove(0);
            self.absorb_into_summary(&dropped);
        }
        self.inject_summary();
    }

    /// A tool_result is consumed once a later assistant or user message
    /// exists — meaning the model (or the next turn) has already moved
    /// past it.
    fn compress_tool_results(&mut self) {
        let len = self.messages.len();
        for i in 0..len {
            if self.messages[i].role != ContextRole::ToolResult || self.messages[i].compressed {
                continue;
            }
            let consumed = self.messages[i + 1..]
                .iter()
                .any(|m| matches!(m.role, ContextRole::Assistant | ContextRole::User));
            if !consumed {
                continue;
            }
            let compressed = compress_tool_result_content(&self.messages[i].content);
            if compressed.len() < self.messages[i].content.len() {
                let tokens = estimate_tokens(&compressed);
                let msg = &mut self.messages[i];
                msg.content = compressed;
                msg.tokens = tokens;
                msg.compressed = true;
            }
        }
    }

    fn truncate_middle(&mut self) {
        let n = self.messages.len();
        if n <= HEAD_PRESERVE + TAIL_PRESERVE {
            return;
        }
        for i in HEAD_PRESERVE..(n - TAIL_PRESERVE) {
            let msg = &self.messages[i];
            if msg.content.len() <= MIDDLE_TRUNCATE_CHARS || msg.compressed {
                continue;
            }
            let truncated = match msg.role {
                ContextRole::ToolResult => compress_tool_result_content(&msg.content),
                ContextRole::Assistant => {
                    let head: String = msg.content.chars().take(MIDDLE_TRUNCATE_CHARS).collect();
                    format!("{}\n[...truncated...]", head)
                }
                _ => continue,
            };
            let tokens = estimate_tokens(&truncated);
            let msg = &mut self.messages[i];
            msg.content = truncated;
            msg.tokens = tokens;
            msg.compressed = true;
        }
    }

    fn absorb_into_summary(&mut self, msg: &ContextMessage) {
        match msg.role {
            ContextRole::User => {
                let text = msg.content.trim();
                let truncated: String = if text.chars().count() > 200 {
                    format!("{}...", text.chars().take(197).collect::<String>())
                } else {
                    text.to_string()
                };
                self.running_summary.push(format!("User asked: {}", truncated));
            }
            ContextRole::Assistant => {
                self.running_summary.extend(extract_facts(&msg.content));
            }
            ContextRole::ToolResult => {
                if let Some(caps) = TOOL_RESULT_RE.captures(&msg.content) {
                    let tool_name = &caps[1];
                    let body = caps[2].trim();
                    let ok = !body.to_lowercase().chars().take(100).collect::<String>().contains("error");
                    let lines = body.matches('\n').count() + 1;
                    let status = if ok { "ok" } else { "error" };
                    self.running_summary.push(format!("Tool {}: {} ({} lines)", tool_name, status, lines));
                }
            }
            ContextRole::System => {}
        }

        if self.running_summary.len() > MAX_SUMMARY_ITEMS {
            let start = self.running_summary.len() - MAX_SUMMARY_ITEMS;
            self.running_summary.drain(0..start);
        }
    }

    fn inject_summary(&mut self) {
        if self.running_summary.is_empty() {
            return;
        }
        let summary_text = format!("[Context from earlier in session]\n{}", self.running_summary.join("\n"));
        let tokens = estimate_tokens(&summary_text);

        if let Some(first) = self.messages.first_mut() {
            if first.is_summary {
                first.content = summary_text;
                first.tokens = tokens;
                return;
            }
        }
        self.messages.insert(
            0,
            ContextMessage {
                role: ContextRole::User,
                content: summary_text,
                tokens,
                created_at: Instant::now(),
                compressed: true,
                is_summary: true,
            },
        );
    }
}

fn extract_facts(text: &str) -> Vec<String> {
    let mut facts = Vec::new();

    let mut paths: Vec<&str> = FILE_PATH_RE
        .captures_iter(text)
        .map(|c| c.get(1).unwrap().as_str())
        .collect();
    paths.sort_unstable();
    paths.dedup();
    if !paths.is_empty() {
        let shown: Vec<&str> = paths.into_iter().take(5).collect();
        facts.push(format!("Files mentioned: {}", shown.join(", ")));
    }

    let tools: Vec<&str> = TOOL_CALL_RE.captures_iter(text).map(|c| c.get(1).unwrap().as_str()).collect();
    if !tools.is_empty() {
        facts.push(format!("Tools called: {}", tools.join(", ")));
    }

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("::") || line.starts_with("[TOOL") || line.starts_with("```") {
            continue;
        }
        if line.chars().count() > 20 {
            let said = if line.chars().count() > 150 {
                format!("{}...", line.chars().take(147).collect::<String>())
            } else {
                line.to_string()
            };
            facts.push(format!("Said: {}", said));
            break;
        }
    }

    facts
}

/// Compress `[TOOL_RESULT name]...[/TOOL_RESULT]` content down to a line
/// and char count. Non-conforming content is just truncated.
fn compress_tool_result_content(content: &str) -> String {
    match TOOL_RESULT_RE.captures(content) {
        Some(caps) => {
            let tool_name = &caps[1];
            let body = caps[2].trim();
            let line_count = if body.is_empty() { 0 } else { body.matches('\n').count() + 1 };
            let char_count = body.chars().count();
            format!("[TOOL_RESULT {}]({} lines, {} chars)[/TOOL_RESULT]", tool_name, line_count, char_count)
        }
        None => {
            if content.len() > MIDDLE_TRUNCATE_CHARS {
                let head: String = content.chars().take(MIDDLE_TRUNCATE_CHARS).collect();
                format!("{}\n[...truncated...]", head)
            } else {
                content.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_floors_at_one_for_nonempty() {
        assert_eq!(estimate_tokens("hi"), 1);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_tokens_buckets_long_words() {
        let short = estimate_tokens("cat");
        let long = estimate_tokens("supercalifragilisticexpialidocious");
        assert!(long > short);
    }

    #[test]
    fn add_message_tracks_token_usage() {
        let mut cm = ContextManager::new(10_000, 500);
        cm.set_system_prompt("you are an agent");
        cm.add_message(ContextRole::User, "hello there");
        let usage = cm.token_usage();
        assert_eq!(usage.message_count, 1);
        assert!(usage.total_tokens > 0);
    }

    #[test]
    fn consumed_tool_result_gets_compressed() {
        let mut cm = ContextManager::new(100_000, 0);
        cm.add_message(ContextRole::User, "read the file please");
        cm.add_message(
            ContextRole::ToolResult,
            "[TOOL_RESULT read_file]\nline one\nline two\nline three\n[/TOOL_RESULT]",
        );
        cm.add_message(ContextRole::Assistant, "done reading");

        assert!(cm.messages()[1].compressed);
        assert!(cm.messages()[1].content.contains("lines"));
    }

    #[test]
    fn unconsumed_tool_result_stays_uncompressed() {
        let mut cm = ContextManager::new(100_000, 0);
        cm.add_message(ContextRole::User, "read the file please");
        cm.add_message(
            ContextRole::ToolResult,
            "[TOOL_RESULT read_file]\nline one\nline two\n[/TOOL_RESULT]",
        );
        assert!(!cm.messages()[1].compressed);
    }

    #[test]
    fn budget_overflow_drops_oldest_and_injects_summary() {
        let mut cm = ContextManager::new(50, 0);
        for i in 0..20 {
            cm.add_message(ContextRole::User, format!("message number {} with some extra padding text", i));
        }
        let usage = cm.token_usage();
        assert!(usage.message_tokens <= usage.available_tokens || cm.messages().first().map(|m| m.is_summary).unwrap_or(false));
    }

    #[test]
    fn truncate_middle_preserves_head_and_tail() {
        let mut cm = ContextManager::new(1_000_000, 0);
        for i in 0..20 {
            let long_content = format!("assistant reply {} {}", i, "x".repeat(500));
            cm.add_message(ContextRole::User, format!("question {}", i));
            cm.add_message(ContextRole::Assistant, long_content);
        }
        cm.compress();
        let msgs = cm.messages();
        let n = msgs.len();
        for m in &msgs[0..HEAD_PRESERVE.min(n)] {
            assert!(!m.compressed || m.is_summary);
        }
    }

    #[test]
    fn file_cache_evicts_stale_entries() {
        let mut cm = ContextManager::new(10_000, 0);
        cm.cache_file("src/main.rs", "fn main() {}");
        let cached = cm.get_cached_file("src/main.rs", Duration::from_secs(300));
        assert_eq!(cached, Some("fn main() {}".to_string()));
        let missing = cm.get_cached_file("src/main.rs", Duration::from_secs(0));
        assert_eq!(missing, None);
    }

    #[test]
    fn health_thresholds() {
        let usage = TokenUsage {
            system_tokens: 0,
            message_tokens: 96,
            total_tokens: 96,
            available_tokens: 100,
            headroom: 4,
            message_count: 1,
            compressed_count: 0,
        };
        assert_eq!(usage.health(), ContextHealth::Red);
    }

    #[test]
    fn compress_is_idempotent_when_under_budget() {
        let mut cm = ContextManager::new(1_000_000, 0);
        cm.add_message(ContextRole::User, "short message");
        cm.compress();
        cm.compress();
        assert_eq!(cm.messages().len(), 1);
    }

    #[test]
    fn manual_compress_extracts_facts_from_assistant_messages() {
        let mut cm = ContextManager::new(10, 0);
        for i in 0..10 {
            cm.add_message(ContextRole::User, format!("q{}", i));
            cm.add_message(
                ContextRole::Assistant,
                format!("I edited /home/user/project/src/lib{}.rs to fix the bug", i),
            );
        }
        cm.compress();
        assert!(cm.messages().first().map(|m| m.is_summary).unwrap_or(false));
    }
}
