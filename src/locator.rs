use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Target description for one logical UI element.
///
/// A locator is a strategy, not a live handle: it is resolved fresh on every
/// attempt, primary first and then each alternative in list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub primary: String,
    #[serde(default, alias = "alternative_selectors")]
    pub alternatives: Vec<String>,
}

impl Locator {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            alternatives: Vec::new(),
        }
    }

    pub fn with_alternatives<I, S>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternatives = alternatives.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.primary.trim().is_empty() {
            return Err(EngineError::InvalidPlan(
                "locator has no primary strategy".to_string(),
            ));
        }
        Ok(())
    }

    /// Candidates in resolution order. Blank and repeated alternatives are skipped.
    pub fn candidates(&self) -> Vec<Candidate<'_>> {
        let mut out = vec![Candidate {
            selector: self.primary.trim(),
            rank: 0,
        }];
        for alt in &self.alternatives {
            let alt = alt.trim();
            if alt.is_empty() || out.iter().any(|c| c.selector == alt) {
                continue;
            }
            let rank = out.len();
            out.push(Candidate { selector: alt, rank });
        }
        out
    }
}

/// One selector to try, with its position in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub selector: &'a str,
    /// 0 for the primary strategy.
    pub rank: usize,
}

impl Candidate<'_> {
    pub fn is_primary(&self) -> bool {
        self.rank == 0
    }
}
