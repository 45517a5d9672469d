//! Supervisor decisions: when to switch models, which model next, and whether
//! regenerated prompt additions are worth keeping.

/// Thresholds for the model-switch heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchPolicy {
    /// Switch only when the inner run used strictly more iterations than this.
    pub min_iterations: u32,
    /// Switch only when strictly more recent error lines than this were seen.
    pub min_error_lines: usize,
}

impl Default for SwitchPolicy {
    fn default() -> Self {
        Self {
            min_iterations: 20,
            min_error_lines: 50,
        }
    }
}

impl SwitchPolicy {
    pub fn should_switch(&self, iterations: u32, error_lines: usize) -> bool {
        iterations > self.min_iterations && error_lines > self.min_error_lines
    }
}

/// Pick the candidate after `current` in `candidates`, wrapping around.
///
/// A current model outside the list selects the first candidate. Returns `None`
/// when there is nothing different to switch to.
pub fn next_candidate<'a>(candidates: &'a [String], current: &str) -> Option<&'a str> {
    if candidates.is_empty() {
        return None;
    }
    let next = match candidates.iter().position(|c| c == current) {
        Some(idx) => &candidates[(idx + 1) % candidates.len()],
        None => &candidates[0],
    };
    (next != current).then_some(next.as_str())
}

/// True if regenerated text is large enough to replace the previous version.
pub fn is_substantial(text: &str, min_bytes: usize) -> bool {
    text.trim().len() > min_bytes
}
