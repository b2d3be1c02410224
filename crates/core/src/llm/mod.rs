// crates/core/src/llm/mod.rs
//! Chunked summarization through an external completion provider.
//!
//! The provider itself is out of scope; callers supply any
//! [`CompletionProvider`]. Oversized input is split on line boundaries,
//! chunks are summarized one at a time under a per-call timeout, and the
//! partial summaries are merged with one final call.

use crate::error::LlmError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// An LLM that turns a prompt into text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Provider name for logging (e.g. "claude-cli", "anthropic-api").
    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct ChunkOptions {
    pub max_chunk_chars: usize,
    pub per_call_timeout: Duration,
    /// Prepended to every chunk prompt.
    pub instruction: String,
    /// Prepended to the merge prompt.
    pub merge_instruction: String,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chunk_chars: 12_000,
            per_call_timeout: Duration::from_secs(30),
            instruction: "Summarize this part of a coding session transcript in a few sentences.".into(),
            merge_instruction: "Combine these partial summaries into one concise summary.".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedSummary {
    pub summary: String,
    pub chunk_count: usize,
    /// Zero-based indices of chunks whose call failed or timed out.
    pub failed_chunks: Vec<usize>,
}

/// Split `text` into chunks of at most `max_chars` characters, breaking on
/// line boundaries. A single line longer than the limit is hard-split.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

async fn complete_with_timeout(
    provider: &dyn CompletionProvider,
    prompt: &str,
    timeout: Duration,
) -> Result<String, LlmError> {
    match tokio::time::timeout(timeout, provider.complete(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(timeout)),
    }
}

/// Summarize `text`, chunking it when it exceeds `opts.max_chunk_chars`.
///
/// Calls run sequentially. A failed chunk is recorded and skipped; the call
/// only errors when every chunk fails. If the merge call fails, the partial
/// summaries are joined instead.
pub async fn summarize_chunked(
    provider: &dyn CompletionProvider,
    text: &str,
    opts: &ChunkOptions,
) -> Result<ChunkedSummary, LlmError> {
    if text.trim().is_empty() {
        return Err(LlmError::EmptyInput);
    }
    let chunks = split_into_chunks(text, opts.max_chunk_chars);
    let mut partials = Vec::with_capacity(chunks.len());
    let mut failed_chunks = Vec::new();
    let mut last_error = None;

    for (i, chunk) in chunks.iter().enumerate() {
        let prompt = format!("{}\n\n{}", opts.instruction, chunk);
        match complete_with_timeout(provider, &prompt, opts.per_call_timeout).await {
            Ok(partial) => partials.push(partial.trim().to_string()),
            Err(e) => {
                warn!(provider = provider.name(), chunk = i, error = %e, "Chunk summary failed");
                failed_chunks.push(i);
                last_error = Some(e);
            }
        }
    }

    if partials.is_empty() {
        return Err(last_error.unwrap_or(LlmError::EmptyInput));
    }

    let summary = if partials.len() == 1 {
        partials.remove(0)
    } else {
        let joined = partials.join("\n\n");
        let prompt = format!("{}\n\n{}", opts.merge_instruction, joined);
        match complete_with_timeout(provider, &prompt, opts.per_call_timeout).await {
            Ok(merged) => merged.trim().to_string(),
            Err(e) => {
                debug!(provider = provider.name(), error = %e, "Merge failed, joining partial summaries");
                joined
            }
        }
    };

    Ok(ChunkedSummary {
        summary,
        chunk_count: chunks.len(),
        failed_chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes a numbered summary; fails or hangs on configured call indices.
    struct ScriptedProvider {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
        hang_on: Vec<usize>,
    }

    impl ScriptedProvider {
        fn new(fail_on: Vec<usize>, hang_on: Vec<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on,
                hang_on,
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_on.contains(&n) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail_on.contains(&n) {
                return Err(LlmError::Provider(format!("call {n} failed")));
            }
            if prompt.starts_with("MERGE") {
                Ok("merged".into())
            } else {
                Ok(format!("part{n}"))
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn opts(max: usize) -> ChunkOptions {
        ChunkOptions {
            max_chunk_chars: max,
            per_call_timeout: Duration::from_millis(50),
            instruction: "SUM".into(),
            merge_instruction: "MERGE".into(),
        }
    }

    #[test]
    fn chunks_break_on_lines() {
        let chunks = split_into_chunks("aaa\nbbb\nccc\n", 8);
        assert_eq!(chunks, vec!["aaa\nbbb\n".to_string(), "ccc\n".to_string()]);
        let long = split_into_chunks("abcdefghij", 4);
        assert_eq!(long, vec!["abcd", "efgh", "ij"]);
        assert!(split_into_chunks("", 10).is_empty());
    }

    #[tokio::test]
    async fn small_input_single_call() {
        let p = ScriptedProvider::new(vec![], vec![]);
        let out = summarize_chunked(&p, "short text", &opts(100)).await.unwrap();
        assert_eq!(out.summary, "part0");
        assert_eq!(out.chunk_count, 1);
        assert!(out.failed_chunks.is_empty());
    }

    #[tokio::test]
    async fn failed_chunk_is_recorded_and_rest_merged() {
        let p = ScriptedProvider::new(vec![1], vec![]);
        let out = summarize_chunked(&p, "aaaa\nbbbb\ncccc\n", &opts(5)).await.unwrap();
        assert_eq!(out.chunk_count, 3);
        assert_eq!(out.failed_chunks, vec![1]);
        assert_eq!(out.summary, "merged");
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_chunk_keeps_partials() {
        // Chunk 0 hangs past the timeout; one partial needs no merge call.
        let p = ScriptedProvider::new(vec![], vec![0]);
        let out = summarize_chunked(&p, "aaaa\nbbbb\n", &opts(5)).await.unwrap();
        assert_eq!(out.failed_chunks, vec![0]);
        assert_eq!(out.summary, "part1");
    }

    #[tokio::test]
    async fn all_failed_is_error() {
        let p = ScriptedProvider::new(vec![0, 1], vec![]);
        let err = summarize_chunked(&p, "aaaa\nbbbb\n", &opts(5)).await.unwrap_err();
        assert!(matches!(err, LlmError::Provider(_)));
        let err = summarize_chunked(&p, "   ", &opts(5)).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyInput));
    }
}
