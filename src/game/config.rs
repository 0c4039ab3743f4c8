//! Session configuration and the built-in validation profiles.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::effects::EngineConfig;
use super::error::SessionError;
use super::state::PlayerId;
use super::turn::{PhaseConfig, TurnConfig};

pub const STRICT_PROFILE: &str = "strict";
pub const RELAXED_PROFILE: &str = "relaxed";
pub const DEBUG_PROFILE: &str = "debug";

/// How queued effects are resolved after an action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResolutionMode {
    /// Drain the whole chain before `submit_action` returns.
    Immediate,
    /// Leave the chain queued; the host advances it through `tick`.
    Stepped,
}

impl Default for ResolutionMode {
    fn default() -> Self {
        ResolutionMode::Immediate
    }
}

/// Knobs of the validation pipeline, switched as a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationProfile {
    pub name: String,
    /// Actions older than this relative to the game clock are rejected as
    /// stale. Zero disables the check.
    pub max_action_age_ms: u64,
    pub emit_warnings: bool,
    pub enable_caching: bool,
    pub cache_ttl_ms: u64,
    pub cache_capacity: usize,
    /// Runs the state integrity check before custom validators.
    pub enable_dynamic: bool,
    pub verbose: bool,
}

impl Default for ValidationProfile {
    fn default() -> Self {
        PROFILES
            .get(STRICT_PROFILE)
            .cloned()
            .unwrap_or_else(ValidationProfile::strict)
    }
}

impl ValidationProfile {
    pub fn strict() -> Self {
        Self {
            name: STRICT_PROFILE.to_string(),
            max_action_age_ms: 5_000,
            emit_warnings: true,
            enable_caching: true,
            cache_ttl_ms: 1_000,
            cache_capacity: 256,
            enable_dynamic: true,
            verbose: false,
        }
    }

    pub fn relaxed() -> Self {
        Self {
            name: RELAXED_PROFILE.to_string(),
            max_action_age_ms: 30_000,
            emit_warnings: false,
            enable_caching: true,
            cache_ttl_ms: 5_000,
            cache_capacity: 1_024,
            enable_dynamic: false,
            verbose: false,
        }
    }

    pub fn debug() -> Self {
        Self {
            name: DEBUG_PROFILE.to_string(),
            max_action_age_ms: 0,
            emit_warnings: true,
            enable_caching: false,
            cache_ttl_ms: 0,
            cache_capacity: 0,
            enable_dynamic: true,
            verbose: true,
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}

static PROFILES: Lazy<BTreeMap<&'static str, ValidationProfile>> = Lazy::new(|| {
    let mut profiles = BTreeMap::new();
    profiles.insert(STRICT_PROFILE, ValidationProfile::strict());
    profiles.insert(RELAXED_PROFILE, ValidationProfile::relaxed());
    profiles.insert(DEBUG_PROFILE, ValidationProfile::debug());
    profiles
});

/// Looks up a built-in profile by id, case-insensitively.
pub fn profile(id: &str) -> Result<ValidationProfile, SessionError> {
    PROFILES
        .get(id.to_ascii_lowercase().as_str())
        .cloned()
        .ok_or_else(|| SessionError::UnknownProfile(id.to_string()))
}

pub fn profile_ids() -> impl Iterator<Item = &'static str> {
    PROFILES.keys().copied()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub max_effect_chain_length: usize,
    pub effect_timeout_ms: u64,
    pub effect_cooldown_ms: u64,
    /// Pacing delay per effect as a percentage of its declared duration.
    pub pacing_percent: u64,
    pub turn_time_limit_ms: Option<u64>,
    pub phases: Vec<PhaseConfig>,
    pub max_logged_actions: usize,
    pub resolution_mode: ResolutionMode,
    pub validation_profile: String,
    pub seed: Option<u64>,
    /// Skips the opening coin flip.
    pub first_player: Option<PlayerId>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        let turn = TurnConfig::default();
        Self {
            max_effect_chain_length: engine.max_chain_length,
            effect_timeout_ms: engine.effect_timeout_ms,
            effect_cooldown_ms: engine.cooldown_ms,
            pacing_percent: engine.pacing_percent,
            turn_time_limit_ms: turn.turn_time_limit_ms,
            phases: turn.phases,
            max_logged_actions: turn.max_logged_actions,
            resolution_mode: ResolutionMode::Immediate,
            validation_profile: STRICT_PROFILE.to_string(),
            seed: None,
            first_player: None,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_first_player(mut self, player: PlayerId) -> Self {
        self.first_player = Some(player);
        self
    }

    pub fn with_resolution_mode(mut self, mode: ResolutionMode) -> Self {
        self.resolution_mode = mode;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.validation_profile = profile.into();
        self
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            max_chain_length: self.max_effect_chain_length,
            effect_timeout_ms: self.effect_timeout_ms,
            cooldown_ms: self.effect_cooldown_ms,
            pacing_percent: self.pacing_percent,
        }
    }

    pub fn turn(&self) -> TurnConfig {
        TurnConfig {
            phases: self.phases.clone(),
            turn_time_limit_ms: self.turn_time_limit_ms,
            max_logged_actions: self.max_logged_actions,
        }
    }

    /// Rejects phase lists without a Main phase or with repeats, and unknown
    /// profiles.
    pub fn check(&self) -> Result<ValidationProfile, SessionError> {
        let turn = self.turn();
        if !turn.is_well_formed() || !turn.contains(super::turn::Phase::Main) {
            return Err(SessionError::InvalidConfig(
                "phase list must be non-empty, contain Main and not repeat a phase".into(),
            ));
        }
        if self.max_effect_chain_length == 0 {
            return Err(SessionError::InvalidConfig(
                "max effect chain length must be at least 1".into(),
            ));
        }
        profile(&self.validation_profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::turn::Phase;

    #[test]
    fn defaults_match_engine_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.max_effect_chain_length, 20);
        assert_eq!(config.effect_timeout_ms, 5_000);
        assert_eq!(config.effect_cooldown_ms, 100);
        assert_eq!(config.check().map(|profile| profile.name), Ok("strict".to_string()));
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config = SessionConfig::from_json(r#"{"max_effect_chain_length": 4, "validation_profile": "debug"}"#)
            .expect("valid json");
        assert_eq!(config.max_effect_chain_length, 4);
        assert_eq!(config.engine().cooldown_ms, 100);
        assert!(config.check().expect("known profile").verbose);
    }

    #[test]
    fn phase_list_without_main_is_rejected() {
        let config = SessionConfig {
            phases: vec![PhaseConfig::mandatory(Phase::Draw), PhaseConfig::mandatory(Phase::End)],
            ..SessionConfig::default()
        };
        assert!(matches!(config.check(), Err(SessionError::InvalidConfig(_))));
    }

    #[test]
    fn profiles_are_looked_up_case_insensitively() {
        assert_eq!(profile("Relaxed").map(|profile| profile.name), Ok("relaxed".to_string()));
        assert_eq!(
            profile("paranoid"),
            Err(SessionError::UnknownProfile("paranoid".to_string()))
        );
        assert_eq!(profile_ids().count(), 3);
    }
}
