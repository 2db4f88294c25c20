//! Stop-sequence detection over the growing output

/// Detects configured stop sequences in generated tokens.
///
/// Only the part of the sequence after `start` (the prompt boundary) is
/// considered, and each call only inspects windows ending at positions it
/// has not scanned before.
#[derive(Debug, Clone)]
pub struct StopMatcher {
    sequences: Vec<Vec<u32>>,
    start: usize,
    scanned: usize,
}

impl StopMatcher {
    pub fn new(sequences: Vec<Vec<u32>>, start: usize) -> Self {
        Self {
            sequences: sequences.into_iter().filter(|s| !s.is_empty()).collect(),
            start,
            scanned: start,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Forget scan progress and move the prompt boundary
    pub fn reset(&mut self, start: usize) {
        self.start = start;
        self.scanned = start;
    }

    /// Check the newly appended tail of `tokens`.
    ///
    /// Returns the absolute index where the matched stop sequence begins,
    /// which is where the output must be truncated.
    pub fn check(&mut self, tokens: &[u32]) -> Option<usize> {
        let from = self.scanned.max(self.start);
        for end in (from + 1)..=tokens.len() {
            for sequence in &self.sequences {
                let len = sequence.len();
                if end >= self.start + len && tokens[end - len..end] == sequence[..] {
                    self.scanned = end;
                    return Some(end - len);
                }
            }
        }
        self.scanned = self.scanned.max(tokens.len());
        None
    }
}
