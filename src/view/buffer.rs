use std::collections::VecDeque;

pub const DEFAULT_BUFFER_LINES: usize = 200;

/// Rolling per-command output shown in the UI. Session-only; never persisted.
#[derive(Debug, Clone)]
pub struct DisplayBuffer {
    chunks: VecDeque<String>,
    cap: usize,
}

impl DisplayBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(cap.min(DEFAULT_BUFFER_LINES)),
            cap: cap.max(1),
        }
    }

    /// Append a chunk, dropping the oldest once the cap is reached.
    pub fn push(&mut self, chunk: impl Into<String>) {
        self.chunks.push_back(chunk.into());
        while self.chunks.len() > self.cap {
            self.chunks.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(String::as_str)
    }

    /// Chunks concatenated as they arrived; chunks carry their own newlines.
    pub fn text(&self) -> String {
        self.chunks.iter().map(String::as_str).collect()
    }
}
