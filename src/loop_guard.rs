use crate::types::ExecutionRecord;

/// Detects a step that keeps repeating the same action without progress.
#[derive(Debug, Clone, Copy)]
pub struct LoopGuard {
    threshold: usize,
}

impl LoopGuard {
    /// `threshold` below 2 would flag every single attempt, so it is clamped.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(2),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// True iff the last `threshold` records for `step_ordinal` share one action signature.
    pub fn is_stalled(&self, history: &[ExecutionRecord], step_ordinal: u32) -> bool {
        let attempts: Vec<&str> = history
            .iter()
            .filter(|r| r.step_ordinal == step_ordinal)
            .map(|r| r.action_taken.as_str())
            .collect();
        if attempts.len() < self.threshold {
            return false;
        }
        let tail = &attempts[attempts.len() - self.threshold..];
        tail.iter().all(|sig| *sig == tail[0])
    }
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(3)
    }
}
