//! Verbosity tier resolution and sampling
//!
//! The tier is resolved once per session and stored on the session; payload
//! capture is asked per span hook. Sampling gates INFO/DEBUG tracking only:
//! ERROR-tier sessions keep their single-slot trail whatever the sampling
//! outcome, so failures are always recorded.

use std::collections::HashMap;

use rand::Rng;
use sessiontrace_span::LoggingLevel;

/// Supplies the verbosity tier and payload-capture switch for hook calls.
pub trait LoggingPolicy: Send + Sync {
    /// Tier for a new session of the given chain.
    fn session_level(&self, chain_id: &str) -> LoggingLevel;

    /// Whether message bodies may be captured for this element.
    fn capture_payload(&self, chain_id: &str, chain_element_id: &str) -> bool {
        let _ = (chain_id, chain_element_id);
        true
    }
}

/// One tier for every chain, with optional per-chain overrides.
#[derive(Debug, Clone)]
pub struct StaticPolicy {
    level: LoggingLevel,
    capture_payload: bool,
    chain_levels: HashMap<String, LoggingLevel>,
}

impl StaticPolicy {
    pub fn new(level: LoggingLevel) -> Self {
        Self {
            level,
            capture_payload: true,
            chain_levels: HashMap::new(),
        }
    }

    pub fn with_capture_payload(mut self, capture: bool) -> Self {
        self.capture_payload = capture;
        self
    }

    pub fn with_chain_level(mut self, chain_id: impl Into<String>, level: LoggingLevel) -> Self {
        self.chain_levels.insert(chain_id.into(), level);
        self
    }
}

impl Default for StaticPolicy {
    fn default() -> Self {
        Self::new(LoggingLevel::Info)
    }
}

impl LoggingPolicy for StaticPolicy {
    fn session_level(&self, chain_id: &str) -> LoggingLevel {
        self.chain_levels.get(chain_id).copied().unwrap_or(self.level)
    }

    fn capture_payload(&self, _chain_id: &str, _chain_element_id: &str) -> bool {
        self.capture_payload
    }
}

/// Per-session sampling decision.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    probability: f64,
}

impl Sampler {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }

    pub fn sample(&self) -> bool {
        if self.probability >= 1.0 {
            true
        } else if self.probability <= 0.0 {
            false
        } else {
            rand::thread_rng().gen_bool(self.probability)
        }
    }
}

/// How a session's spans are retained, derived from tier, sampling and
/// whether a failure has already been seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    /// Nothing is cached or persisted.
    Skip,
    /// Only the most recent span is held, persisted only on failure.
    LastOnly,
    /// Every span is cached and persisted.
    Full,
}

impl TrackingMode {
    pub fn resolve(level: LoggingLevel, sampled: bool, failure_seen: bool) -> Self {
        match level {
            LoggingLevel::Off => TrackingMode::Skip,
            LoggingLevel::Error if failure_seen => TrackingMode::Full,
            LoggingLevel::Error => TrackingMode::LastOnly,
            LoggingLevel::Info | LoggingLevel::Debug if sampled => TrackingMode::Full,
            LoggingLevel::Info | LoggingLevel::Debug => TrackingMode::Skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_policy_overrides() {
        let policy = StaticPolicy::new(LoggingLevel::Info)
            .with_chain_level("payments", LoggingLevel::Debug)
            .with_capture_payload(false);

        assert_eq!(policy.session_level("orders"), LoggingLevel::Info);
        assert_eq!(policy.session_level("payments"), LoggingLevel::Debug);
        assert!(!policy.capture_payload("payments", "el-1"));
    }

    #[test]
    fn test_sampler_bounds() {
        let always = Sampler::new(1.0);
        let never = Sampler::new(0.0);
        for _ in 0..100 {
            assert!(always.sample());
            assert!(!never.sample());
        }
        assert!(Sampler::new(7.0).sample());
    }

    #[test]
    fn test_error_tier_ignores_sampling() {
        assert_eq!(
            TrackingMode::resolve(LoggingLevel::Error, false, false),
            TrackingMode::LastOnly
        );
        assert_eq!(
            TrackingMode::resolve(LoggingLevel::Error, true, false),
            TrackingMode::LastOnly
        );
        assert_eq!(
            TrackingMode::resolve(LoggingLevel::Error, false, true),
            TrackingMode::Full
        );
    }

    #[test]
    fn test_info_and_debug_gate_on_sampling() {
        assert_eq!(
            TrackingMode::resolve(LoggingLevel::Info, false, false),
            TrackingMode::Skip
        );
        assert_eq!(
            TrackingMode::resolve(LoggingLevel::Debug, true, false),
            TrackingMode::Full
        );
        assert_eq!(
            TrackingMode::resolve(LoggingLevel::Off, true, true),
            TrackingMode::Skip
        );
    }
}
