use chrono::Utc;
use tracing::debug;

use crate::config::{EmotionalProfile, ScenarioConfig};

use super::lexicon::{
    self, ADAPTIVE_THRESHOLD, CATEGORY_CAP, EMPATHY_MARKERS, HIGH_SEVERITY_TRIGGERS,
    INVALIDATING_PHRASES, INVALIDATION_PENALTY, QUESTIONING_MARKERS, QUESTION_MARK_POINTS,
    REASSURANCE_MARKERS,
};
use super::types::{EmotionalCategory, EmotionalState, EngineError, ResponseAnalysis, TriggerEvent};

/// Scoring and transition rules of the agitation state machine.
///
/// Stateless: every call takes the current state and scenario and returns a
/// new value. Categories ascend calm < nervous < agitated < aggressive and
/// there is no terminal state.
pub struct EmotionalStateEngine;

impl EmotionalStateEngine {
    /// Starting state for a session of this scenario
    pub fn initialize(scenario: &ScenarioConfig) -> Result<EmotionalState, EngineError> {
        match &scenario.emotion {
            Some(profile) => {
                profile.validate()?;
                Ok(EmotionalState::new(profile.initial, profile.min, profile.max))
            }
            None => Ok(EmotionalState::disabled()),
        }
    }

    /// Score one participant message
    pub fn analyze(text: &str, scenario: &ScenarioConfig) -> Result<ResponseAnalysis, EngineError> {
        if let Some(profile) = &scenario.emotion {
            profile.validate()?;
        }

        let normalized = lexicon::normalize(text);

        let empathy = lexicon::marker_score(&normalized, EMPATHY_MARKERS);

        let mut questioning = lexicon::marker_score(&normalized, QUESTIONING_MARKERS);
        if normalized.contains('?') {
            questioning = (questioning + QUESTION_MARK_POINTS).min(CATEGORY_CAP);
        }

        let reassurance = lexicon::marker_score(&normalized, REASSURANCE_MARKERS);

        let invalidations = INVALIDATING_PHRASES
            .iter()
            .filter(|p| normalized.contains(*p))
            .count();
        let judgment_avoidance = CATEGORY_CAP
            .saturating_sub((invalidations.min(u8::MAX as usize) as u8).saturating_mul(INVALIDATION_PENALTY));

        let total = empathy + questioning + reassurance + judgment_avoidance;
        let is_adaptive = total >= ADAPTIVE_THRESHOLD;

        let mut agitation_change = Self::band_change(total);
        let mut matched_triggers = Vec::new();

        for (phrase, delta) in HIGH_SEVERITY_TRIGGERS {
            if normalized.contains(phrase) {
                agitation_change = agitation_change.saturating_add(*delta);
                matched_triggers.push((*phrase).to_string());
            }
        }

        if let Some(profile) = &scenario.emotion {
            for trigger in &profile.triggers {
                let phrase = lexicon::normalize(&trigger.phrase);
                if normalized.contains(&phrase) && !matched_triggers.contains(&phrase) {
                    agitation_change = agitation_change.saturating_add(trigger.delta);
                    matched_triggers.push(phrase);
                }
            }
        }

        debug!(
            "Analyzed message: total={}, adaptive={}, change={:+}, triggers={:?}",
            total, is_adaptive, agitation_change, matched_triggers
        );

        Ok(ResponseAnalysis {
            empathy,
            questioning,
            reassurance,
            judgment_avoidance,
            total,
            is_adaptive,
            agitation_change,
            matched_triggers,
        })
    }

    /// Base agitation delta for a total score
    fn band_change(total: u8) -> i32 {
        match total {
            75..=u8::MAX => -15,
            50..=74 => -8,
            25..=49 => 5,
            _ => 15,
        }
    }

    /// Apply an analysis to the current state. The level is clamped into the
    /// scenario range and exactly one trigger event is recorded.
    pub fn transition(
        current: &EmotionalState,
        analysis: &ResponseAnalysis,
        scenario: &ScenarioConfig,
    ) -> Result<EmotionalState, EngineError> {
        let profile = Self::profile(scenario)?;

        let previous = current.level.clamp(profile.min, profile.max);
        let level = previous
            .saturating_add(analysis.agitation_change)
            .clamp(profile.min, profile.max);

        let mut next = current.clone();
        next.level = level;
        next.min = profile.min;
        next.max = profile.max;
        next.enabled = true;
        next.last_updated = Utc::now();
        next.record_trigger(TriggerEvent {
            timestamp: next.last_updated,
            cause: analysis.describe(),
            delta: level - previous,
        });

        Ok(next)
    }

    /// Category of a level under the scenario thresholds
    pub fn classify(level: i32, scenario: &ScenarioConfig) -> EmotionalCategory {
        let Some(profile) = &scenario.emotion else {
            return EmotionalCategory::Disabled;
        };

        let t = &profile.thresholds;
        if level >= t.aggressive {
            EmotionalCategory::Aggressive
        } else if level >= t.agitated {
            EmotionalCategory::Agitated
        } else if level >= t.nervous {
            EmotionalCategory::Nervous
        } else {
            EmotionalCategory::Calm
        }
    }

    /// Guidance text for the generator; empty when tracking is disabled
    pub fn behavioral_directives(level: i32, scenario: &ScenarioConfig) -> String {
        let Some(profile) = &scenario.emotion else {
            return String::new();
        };

        let directives = &profile.directives;
        let text = match Self::classify(level, scenario) {
            EmotionalCategory::Calm => &directives.calm,
            EmotionalCategory::Nervous => &directives.nervous,
            EmotionalCategory::Agitated => &directives.agitated,
            EmotionalCategory::Aggressive => &directives.aggressive,
            EmotionalCategory::Disabled => return String::new(),
        };

        format!(
            "ÉTAT ÉMOTIONNEL (agitation {}/{}) :\n{}",
            level, profile.max, text
        )
    }

    /// One-line state description for logs and the turn reply
    pub fn summary(state: &EmotionalState, scenario: &ScenarioConfig) -> Option<String> {
        if !state.enabled || scenario.emotion.is_none() {
            return None;
        }

        let category = Self::classify(state.level, scenario);
        let mut summary = format!("agitation {}/{} ({})", state.level, state.max, category);
        if let Some(last) = state.last_trigger() {
            summary.push_str(&format!(", last change {:+}", last.delta));
        }
        Some(summary)
    }

    fn profile(scenario: &ScenarioConfig) -> Result<&EmotionalProfile, EngineError> {
        let profile = scenario
            .emotion
            .as_ref()
            .ok_or(EngineError::TrackingDisabled(scenario.id))?;
        profile.validate()?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoryThresholds, DirectiveTemplates, TriggerPhrase};
    use crate::services::emotion::TRIGGER_HISTORY_LIMIT;

    fn tracked_scenario() -> ScenarioConfig {
        ScenarioConfig {
            id: 1,
            name: "Hallucinations auditives".to_string(),
            persona: "Vous êtes Marc.".to_string(),
            emotion: Some(EmotionalProfile {
                initial: 40,
                min: 0,
                max: 100,
                thresholds: CategoryThresholds { nervous: 30, agitated: 60, aggressive: 85 },
                directives: DirectiveTemplates::default(),
                triggers: vec![TriggerPhrase { phrase: "Hospitalisation".to_string(), delta: 10 }],
            }),
        }
    }

    #[test]
    fn test_initialize_tracked_and_untracked() {
        let state = EmotionalStateEngine::initialize(&tracked_scenario()).unwrap();
        assert!(state.enabled);
        assert_eq!(state.level, 40);
        assert!(state.triggers.is_empty());

        let disabled = EmotionalStateEngine::initialize(&ScenarioConfig::untracked(9)).unwrap();
        assert!(!disabled.enabled);
        assert_eq!(disabled.level, 0);
    }

    #[test]
    fn test_initialize_rejects_malformed_profile() {
        let mut scenario = tracked_scenario();
        if let Some(p) = scenario.emotion.as_mut() {
            p.min = 100;
            p.max = 0;
        }
        assert!(matches!(
            EmotionalStateEngine::initialize(&scenario),
            Err(EngineError::InvalidScenario(_))
        ));
        assert!(EmotionalStateEngine::analyze("bonjour", &scenario).is_err());
    }

    #[test]
    fn test_empathic_open_question_is_adaptive() {
        let analysis = EmotionalStateEngine::analyze(
            "Je comprends que c'est difficile, entendez-vous des voix actuellement?",
            &tracked_scenario(),
        )
        .unwrap();

        assert!(analysis.empathy > 0);
        assert!(analysis.questioning > 0);
        assert!(analysis.is_adaptive);
        assert!(analysis.agitation_change <= -8);
    }

    #[test]
    fn test_dismissive_message_raises_agitation() {
        let analysis = EmotionalStateEngine::analyze(
            "Calmez-vous, vous imaginez tout ça.",
            &tracked_scenario(),
        )
        .unwrap();

        assert!(analysis.judgment_avoidance < 25);
        assert!(!analysis.is_adaptive);
        assert!(analysis.agitation_change >= 15);
        assert_eq!(analysis.matched_triggers, vec!["calmez-vous", "vous imaginez"]);
    }

    #[test]
    fn test_scores_stay_in_bounds() {
        let samples = [
            "",
            "?",
            "Je comprends, c'est difficile, je vois que vous semblez avoir peur, c'est pénible et effrayant. \
             Pouvez-vous me dire depuis quand ? Est-ce que vous entendez-vous des voix en ce moment ? \
             Prenez votre temps, vous êtes en sécurité, je suis là, on va vous aider.",
            "Calmez-vous, arrêtez, c'est ridicule, n'importe quoi, vous exagérez, ce n'est rien.",
            "vous êtes fou, taisez-vous ou j'appelle la police pour vous enfermer",
        ];

        for text in samples {
            let a = EmotionalStateEngine::analyze(text, &tracked_scenario()).unwrap();
            for sub in [a.empathy, a.questioning, a.reassurance, a.judgment_avoidance] {
                assert!(sub <= 25, "sub-score out of range for {:?}", text);
            }
            assert!(a.total <= 100);
            assert_eq!(a.total, a.empathy + a.questioning + a.reassurance + a.judgment_avoidance);
            assert_eq!(a.is_adaptive, a.total >= 50);
        }
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(EmotionalStateEngine::band_change(100), -15);
        assert_eq!(EmotionalStateEngine::band_change(75), -15);
        assert_eq!(EmotionalStateEngine::band_change(74), -8);
        assert_eq!(EmotionalStateEngine::band_change(50), -8);
        assert_eq!(EmotionalStateEngine::band_change(49), 5);
        assert_eq!(EmotionalStateEngine::band_change(25), 5);
        assert_eq!(EmotionalStateEngine::band_change(24), 15);
        assert_eq!(EmotionalStateEngine::band_change(0), 15);
    }

    #[test]
    fn test_scenario_trigger_adds_delta() {
        let scenario = tracked_scenario();
        let plain = EmotionalStateEngine::analyze("On parle de votre traitement", &scenario).unwrap();
        let triggered =
            EmotionalStateEngine::analyze("On parle de votre hospitalisation", &scenario).unwrap();
        assert_eq!(triggered.agitation_change, plain.agitation_change + 10);
        assert_eq!(triggered.matched_triggers, vec!["hospitalisation"]);
    }

    #[test]
    fn test_huge_trigger_deltas_saturate() {
        let mut scenario = tracked_scenario();
        if let Some(profile) = scenario.emotion.as_mut() {
            profile.triggers = vec![
                TriggerPhrase { phrase: "hospitalisation".to_string(), delta: i32::MAX },
                TriggerPhrase { phrase: "injection".to_string(), delta: i32::MAX },
            ];
        }

        let analysis = EmotionalStateEngine::analyze(
            "vous êtes fou, hospitalisation et injection",
            &scenario,
        )
        .unwrap();
        assert_eq!(analysis.agitation_change, i32::MAX);

        let state = EmotionalStateEngine::initialize(&scenario).unwrap();
        let next = EmotionalStateEngine::transition(&state, &analysis, &scenario).unwrap();
        assert_eq!(next.level, 100);
        assert_eq!(next.last_trigger().unwrap().delta, 60);
    }

    #[test]
    fn test_transition_clamps_and_records_one_event() {
        let scenario = tracked_scenario();
        let mut state = EmotionalStateEngine::initialize(&scenario).unwrap();
        let hostile = EmotionalStateEngine::analyze("vous êtes fou, taisez-vous", &scenario).unwrap();
        let kind = EmotionalStateEngine::analyze(
            "Je comprends, c'est difficile. Pouvez-vous m'en dire plus ? Vous êtes en sécurité, je suis là.",
            &scenario,
        )
        .unwrap();

        for i in 0..30 {
            let analysis = if i % 3 == 0 { &kind } else { &hostile };
            let before = state.triggers.len();
            state = EmotionalStateEngine::transition(&state, analysis, &scenario).unwrap();
            assert!((0..=100).contains(&state.level));
            assert_eq!(state.triggers.len(), (before + 1).min(TRIGGER_HISTORY_LIMIT));
        }
        assert_eq!(state.triggers.len(), TRIGGER_HISTORY_LIMIT);
    }

    #[test]
    fn test_transition_records_effective_delta() {
        let scenario = tracked_scenario();
        let mut state = EmotionalStateEngine::initialize(&scenario).unwrap();
        state.level = 95;
        let hostile = EmotionalStateEngine::analyze("vous êtes fou", &scenario).unwrap();

        let next = EmotionalStateEngine::transition(&state, &hostile, &scenario).unwrap();
        assert_eq!(next.level, 100);
        assert_eq!(next.last_trigger().unwrap().delta, 5);
    }

    #[test]
    fn test_transition_requires_tracking() {
        let scenario = ScenarioConfig::untracked(7);
        let analysis = EmotionalStateEngine::analyze("bonjour", &scenario).unwrap();
        let result = EmotionalStateEngine::transition(&EmotionalState::disabled(), &analysis, &scenario);
        assert_eq!(result, Err(EngineError::TrackingDisabled(7)));
    }

    #[test]
    fn test_classify_thresholds() {
        let scenario = tracked_scenario();
        assert_eq!(EmotionalStateEngine::classify(0, &scenario), EmotionalCategory::Calm);
        assert_eq!(EmotionalStateEngine::classify(29, &scenario), EmotionalCategory::Calm);
        assert_eq!(EmotionalStateEngine::classify(30, &scenario), EmotionalCategory::Nervous);
        assert_eq!(EmotionalStateEngine::classify(60, &scenario), EmotionalCategory::Agitated);
        assert_eq!(EmotionalStateEngine::classify(85, &scenario), EmotionalCategory::Aggressive);
        assert_eq!(
            EmotionalStateEngine::classify(50, &ScenarioConfig::untracked(2)),
            EmotionalCategory::Disabled
        );
    }

    #[test]
    fn test_directives_follow_category() {
        let scenario = tracked_scenario();
        let calm = EmotionalStateEngine::behavioral_directives(10, &scenario);
        let aggressive = EmotionalStateEngine::behavioral_directives(90, &scenario);
        assert!(calm.contains("calme"));
        assert!(aggressive.contains("agressif"));
        assert!(EmotionalStateEngine::behavioral_directives(90, &ScenarioConfig::untracked(2)).is_empty());
    }

    #[test]
    fn test_summary() {
        let scenario = tracked_scenario();
        let state = EmotionalStateEngine::initialize(&scenario).unwrap();
        assert_eq!(
            EmotionalStateEngine::summary(&state, &scenario).unwrap(),
            "agitation 40/100 (nervous)"
        );
        assert!(EmotionalStateEngine::summary(&EmotionalState::disabled(), &ScenarioConfig::untracked(2)).is_none());
    }
}
