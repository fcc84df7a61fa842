use std::collections::VecDeque;

/// Line log capped at a fixed length; the oldest line is evicted first.
#[derive(Debug, Clone)]
pub struct BoundedLog {
    lines: VecDeque<String>,
    max_lines: usize,
}

impl BoundedLog {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines: max_lines.max(1),
        }
    }

    pub fn push(&mut self, line: String) {
        while self.lines.len() >= self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// The most recent `max_lines` lines in order; all lines when `max_lines` is zero.
    pub fn tail(&self, max_lines: usize) -> Vec<String> {
        let skip = if max_lines == 0 {
            0
        } else {
            self.lines.len().saturating_sub(max_lines)
        };
        self.lines.iter().skip(skip).cloned().collect()
    }
}
