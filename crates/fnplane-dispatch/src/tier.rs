// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution tiers and their deadlines.

use std::fmt;
use std::time::Duration;

use fnplane_store::{FunctionMetadata, FunctionType};

use crate::config::ConfigError;

/// Execution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    /// Sandboxed code.
    Code = 1,
    /// Single AI completion.
    Generative = 2,
    /// Multi-step AI agent.
    Agentic = 3,
    /// Human task.
    Human = 4,
}

impl Tier {
    /// All tiers, fastest first.
    pub const ALL: [Tier; 4] = [Tier::Code, Tier::Generative, Tier::Agentic, Tier::Human];

    /// Tier number (1..=4).
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Tier name, also used as the executor type.
    pub fn name(self) -> &'static str {
        match self {
            Tier::Code => "code",
            Tier::Generative => "generative",
            Tier::Agentic => "agentic",
            Tier::Human => "human",
        }
    }

    /// Tier for an executor type name.
    pub fn from_name(name: &str) -> Option<Tier> {
        Tier::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the dispatcher should do with a function type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierSelection {
    /// Run on a single tier.
    Tier(Tier),
    /// Run the steps of a cascade.
    Cascade,
    /// Type not recognized.
    Unknown(String),
}

/// Classify a declared function type.
pub fn select_tier(function_type: &FunctionType) -> TierSelection {
    match function_type {
        FunctionType::Code => TierSelection::Tier(Tier::Code),
        FunctionType::Generative => TierSelection::Tier(Tier::Generative),
        FunctionType::Agentic => TierSelection::Tier(Tier::Agentic),
        FunctionType::Human => TierSelection::Tier(Tier::Human),
        FunctionType::Cascade => TierSelection::Cascade,
        FunctionType::Unknown(other) => TierSelection::Unknown(other.clone()),
    }
}

/// Default deadline per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTimeouts {
    /// Tier 1.
    pub code: Duration,
    /// Tier 2.
    pub generative: Duration,
    /// Tier 3.
    pub agentic: Duration,
    /// Tier 4.
    pub human: Duration,
}

impl Default for TierTimeouts {
    fn default() -> Self {
        Self {
            code: Duration::from_secs(5),
            generative: Duration::from_secs(30),
            agentic: Duration::from_secs(5 * 60),
            human: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl TierTimeouts {
    /// Deadline for a tier.
    pub fn for_tier(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Code => self.code,
            Tier::Generative => self.generative,
            Tier::Agentic => self.agentic,
            Tier::Human => self.human,
        }
    }

    /// Check that deadlines strictly increase from tier 1 to tier 4.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for pair in Tier::ALL.windows(2) {
            let (lower, higher) = (pair[0], pair[1]);
            if self.for_tier(lower) >= self.for_tier(higher) {
                return Err(ConfigError::TimeoutOrder(format!(
                    "tier {} timeout ({}ms) must be shorter than tier {} timeout ({}ms)",
                    lower.number(),
                    self.for_tier(lower).as_millis(),
                    higher.number(),
                    self.for_tier(higher).as_millis()
                )));
            }
        }
        Ok(())
    }
}

/// Deadline for one dispatch: the function's `timeoutMs` when set,
/// otherwise the tier default.
pub fn effective_timeout(metadata: &FunctionMetadata, tier: Tier, timeouts: &TierTimeouts) -> Duration {
    match metadata.timeout_ms {
        Some(ms) if ms > 0 => Duration::from_millis(ms),
        _ => timeouts.for_tier(tier),
    }
}
