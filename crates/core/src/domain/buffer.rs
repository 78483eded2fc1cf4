// Rolling Text Buffer - bounded accumulation of process output

use serde::{Deserialize, Serialize};

/// Text buffer that drops its oldest content past `capacity` bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingBuffer {
    text: String,
    capacity: usize,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            text: String::new(),
            capacity,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);

        if self.text.len() > self.capacity {
            let mut cut = self.text.len() - self.capacity;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
        }
    }

    /// Append `line` followed by a newline
    pub fn push_line(&mut self, line: &str) {
        self.push(line);
        self.push("\n");
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Display for RollingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
