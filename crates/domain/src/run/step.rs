use serde::{Deserialize, Serialize};

/// Deterministic identity of one step invocation inside a run.
///
/// The ordinal is fixed by the saga definition (0 for singleton steps, the
/// guest index for per-guest steps), so every replay of a run computes the
/// same key for the same piece of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepKey {
    pub name: String,
    pub ordinal: u32,
}

impl StepKey {
    pub fn new(name: impl Into<String>, ordinal: u32) -> Self {
        Self {
            name: name.into(),
            ordinal,
        }
    }

    pub fn singleton(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.ordinal)
    }
}
