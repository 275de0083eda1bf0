//! Fail-fast rule engine for timed, constrained attempts.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::info;

use crate::error::{Error, Result};
use crate::metrics::MetricsSnapshot;

pub const REASON_BACKSPACE: &str = "UNAUTHORIZED_BACKSPACE";
pub const REASON_ACCURACY_BREACH: &str = "ACCURACY_BREACH";
pub const REASON_PRECISION: &str = "PRECISION_BELOW_THRESHOLD";
pub const REASON_SECURITY: &str = "SECURITY_PROTOCOL_VIOLATION";
pub const REASON_SPEED_NOT_MET: &str = "SPEED_REQUIREMENT_NOT_MET";
pub const REASON_PRECISION_NOT_MET: &str = "PRECISION_REQUIREMENT_NOT_MET";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MissionConstraint {
    /// Any backspace fails the mission.
    NoBackspace,
    /// Any mistyped character fails the mission.
    NoErrors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionConfig {
    pub target_wpm: f64,
    pub min_accuracy: f64,
    #[serde(default)]
    pub constraints: BTreeSet<MissionConstraint>,
}

impl MissionConfig {
    pub fn new(target_wpm: f64, min_accuracy: f64) -> Self {
        Self {
            target_wpm,
            min_accuracy,
            constraints: BTreeSet::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: MissionConstraint) -> Self {
        self.constraints.insert(constraint);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Display)]
pub enum MissionState {
    Idle,
    Briefing,
    Operational,
    Succeeded,
    #[strum(to_string = "Failed")]
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct MissionEvaluator {
    state: MissionState,
    config: Option<MissionConfig>,
}

impl Default for MissionEvaluator {
    fn default() -> Self {
        Self {
            state: MissionState::Idle,
            config: None,
        }
    }
}

impl MissionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &MissionState {
        &self.state
    }

    pub fn config(&self) -> Option<&MissionConfig> {
        self.config.as_ref()
    }

    pub fn is_operational(&self) -> bool {
        self.state == MissionState::Operational
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.state {
            MissionState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Loads a mission for briefing. Terminal missions must be reset first.
    pub fn brief(&mut self, config: MissionConfig) -> Result<()> {
        match self.state {
            MissionState::Idle | MissionState::Briefing => {
                self.config = Some(config);
                self.state = MissionState::Briefing;
                Ok(())
            }
            ref other => Err(Error::Mission(format!("cannot brief from {other}"))),
        }
    }

    pub fn deploy(&mut self) -> Result<()> {
        if self.state != MissionState::Briefing {
            return Err(Error::Mission(format!("cannot deploy from {}", self.state)));
        }
        self.state = MissionState::Operational;
        info!("mission operational");
        Ok(())
    }

    /// Puts a finished mission back into operation with its configuration.
    /// Returns false when there is nothing to fly again.
    pub fn redeploy(&mut self) -> bool {
        let finished = matches!(self.state, MissionState::Succeeded | MissionState::Failed(_));
        if !finished || self.config.is_none() {
            return false;
        }
        self.state = MissionState::Operational;
        true
    }

    pub fn reset(&mut self) {
        self.state = MissionState::Idle;
        self.config = None;
    }

    fn forbids(&self, constraint: MissionConstraint) -> bool {
        self.is_operational()
            && self
                .config
                .as_ref()
                .is_some_and(|c| c.constraints.contains(&constraint))
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.is_operational() {
            return;
        }
        let reason = reason.into();
        info!(%reason, "mission failed");
        self.state = MissionState::Failed(reason);
    }

    /// Checked before a backspace is applied. Returns true if the backspace
    /// failed the mission (the edit must then be dropped).
    pub fn check_backspace(&mut self) -> bool {
        if self.forbids(MissionConstraint::NoBackspace) {
            self.fail(REASON_BACKSPACE);
            return true;
        }
        false
    }

    /// Checked right after a character lands. Returns true on failure.
    pub fn check_keystroke(&mut self, correct: bool) -> bool {
        if !correct && self.forbids(MissionConstraint::NoErrors) {
            self.fail(REASON_ACCURACY_BREACH);
            return true;
        }
        false
    }

    /// Threshold rules against an exposed snapshot. Returns true on failure.
    pub fn evaluate_metrics(&mut self, metrics: &MetricsSnapshot) -> bool {
        let Some(min_accuracy) = self.operational_config().map(|c| c.min_accuracy) else {
            return false;
        };
        if metrics.accuracy < min_accuracy {
            self.fail(REASON_PRECISION);
            return true;
        }
        if metrics.is_bot {
            self.fail(format!("{REASON_SECURITY}: {}", metrics.flags_label()));
            return true;
        }
        false
    }

    /// Final pass/fail on session completion.
    pub fn evaluate_completion(&mut self, net_wpm: f64, accuracy: f64) -> &MissionState {
        let Some(config) = self.operational_config().cloned() else {
            return &self.state;
        };
        if net_wpm < config.target_wpm {
            self.fail(format!(
                "{REASON_SPEED_NOT_MET}: {:.0}/{:.0} WPM",
                net_wpm.floor(),
                config.target_wpm
            ));
        } else if accuracy < config.min_accuracy {
            self.fail(format!(
                "{REASON_PRECISION_NOT_MET}: {:.0}/{:.0}%",
                accuracy.floor(),
                config.min_accuracy
            ));
        } else {
            info!(net_wpm, accuracy, "mission succeeded");
            self.state = MissionState::Succeeded;
        }
        &self.state
    }

    fn operational_config(&self) -> Option<&MissionConfig> {
        if self.is_operational() {
            self.config.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn operational(config: MissionConfig) -> MissionEvaluator {
        let mut eval = MissionEvaluator::new();
        eval.brief(config).unwrap();
        eval.deploy().unwrap();
        eval
    }

    #[test]
    fn lifecycle_briefing_to_operational() {
        let mut eval = MissionEvaluator::new();
        assert_eq!(eval.state(), &MissionState::Idle);
        assert!(eval.deploy().is_err());

        eval.brief(MissionConfig::new(40.0, 90.0)).unwrap();
        assert_eq!(eval.state(), &MissionState::Briefing);
        eval.deploy().unwrap();
        assert!(eval.is_operational());
    }

    #[test]
    fn terminal_states_require_reset() {
        let mut eval = operational(MissionConfig::new(40.0, 90.0));
        eval.fail("ABORTED");
        assert_matches!(eval.brief(MissionConfig::new(10.0, 10.0)), Err(Error::Mission(_)));

        eval.reset();
        assert_eq!(eval.state(), &MissionState::Idle);
        assert!(eval.brief(MissionConfig::new(10.0, 10.0)).is_ok());
    }

    #[test]
    fn redeploy_only_from_a_finished_mission() {
        let mut eval = MissionEvaluator::new();
        assert!(!eval.redeploy());

        let mut eval = operational(MissionConfig::new(40.0, 90.0));
        assert!(!eval.redeploy());
        eval.fail("ABORTED");
        assert!(eval.redeploy());
        assert!(eval.is_operational());
        assert_eq!(eval.config().unwrap().target_wpm, 40.0);
    }

    #[test]
    fn backspace_forbidden_fails_immediately() {
        let mut eval =
            operational(MissionConfig::new(0.0, 0.0).with_constraint(MissionConstraint::NoBackspace));
        assert!(eval.check_backspace());
        assert_eq!(eval.failure_reason(), Some(REASON_BACKSPACE));
    }

    #[test]
    fn backspace_allowed_without_constraint() {
        let mut eval = operational(MissionConfig::new(0.0, 0.0));
        assert!(!eval.check_backspace());
        assert!(eval.is_operational());
    }

    #[test]
    fn constraints_ignored_while_briefing() {
        let mut eval = MissionEvaluator::new();
        eval.brief(MissionConfig::new(0.0, 0.0).with_constraint(MissionConstraint::NoBackspace))
            .unwrap();
        assert!(!eval.check_backspace());
        assert_eq!(eval.state(), &MissionState::Briefing);
    }

    #[test]
    fn mistype_fails_perfect_run() {
        let mut eval =
            operational(MissionConfig::new(0.0, 0.0).with_constraint(MissionConstraint::NoErrors));
        assert!(!eval.check_keystroke(true));
        assert!(eval.check_keystroke(false));
        assert_eq!(eval.failure_reason(), Some(REASON_ACCURACY_BREACH));
    }

    #[test]
    fn precision_floor() {
        let mut eval = operational(MissionConfig::new(0.0, 95.0));
        let metrics = MetricsSnapshot {
            accuracy: 94.9,
            ..MetricsSnapshot::default()
        };
        assert!(eval.evaluate_metrics(&metrics));
        assert_eq!(eval.failure_reason(), Some(REASON_PRECISION));
    }

    #[test]
    fn anti_cheat_lists_flags() {
        let mut eval = operational(MissionConfig::new(0.0, 50.0));
        let mut metrics = MetricsSnapshot {
            is_bot: true,
            ..MetricsSnapshot::default()
        };
        metrics.cheat_flags.insert("ULTRASONIC_INPUT".to_string());
        assert!(eval.evaluate_metrics(&metrics));
        assert_eq!(
            eval.failure_reason(),
            Some("SECURITY_PROTOCOL_VIOLATION: ULTRASONIC_INPUT")
        );
    }

    #[test]
    fn speed_requirement_not_met() {
        let mut eval = operational(MissionConfig::new(60.0, 95.0));
        eval.evaluate_completion(52.4, 99.0);
        assert_eq!(
            eval.state(),
            &MissionState::Failed("SPEED_REQUIREMENT_NOT_MET: 52/60 WPM".to_string())
        );
    }

    #[test]
    fn precision_requirement_not_met() {
        let mut eval = operational(MissionConfig::new(30.0, 95.0));
        eval.evaluate_completion(45.0, 91.7);
        assert_eq!(
            eval.failure_reason(),
            Some("PRECISION_REQUIREMENT_NOT_MET: 91/95%")
        );
    }

    #[test]
    fn completion_success() {
        let mut eval = operational(MissionConfig::new(30.0, 90.0));
        assert_eq!(eval.evaluate_completion(31.0, 96.0), &MissionState::Succeeded);
        // terminal: later failures do not overwrite
        eval.fail("LATE");
        assert_eq!(eval.state(), &MissionState::Succeeded);
    }

    #[test]
    fn constraint_names() {
        assert_eq!(MissionConstraint::NoBackspace.to_string(), "no-backspace");
        let parsed: MissionConstraint = serde_json::from_str("\"no-errors\"").unwrap();
        assert_eq!(parsed, MissionConstraint::NoErrors);
    }
}
