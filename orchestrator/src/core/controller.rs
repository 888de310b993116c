//! Iteration state machine: RUN → REVIEW → DECIDE → FIX → RUN, until HALTED.
//!
//! The machine is pure. The session driver performs the work of each stage
//! and feeds the outcome back as an [`Event`]; the machine answers with the
//! next stage. The iteration counter counts RUN passes, starts at 1, and never
//! exceeds `max_iterations`.

use anyhow::{Result, bail};
use serde::Serialize;

use crate::core::types::{Decision, DecisionAction};

/// External advisory collaborator roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reviewer,
    Decision,
    Fixer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Reviewer => "reviewer",
            Role::Decision => "decision",
            Role::Fixer => "fixer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which post-run stages are enabled.
///
/// Construct through [`StagePolicy::new`]: a disabled stage disables every
/// stage after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StagePolicy {
    review: bool,
    decide: bool,
    fix: bool,
}

impl StagePolicy {
    pub fn new(review: bool, decide: bool, fix: bool) -> Self {
        let decide = review && decide;
        let fix = decide && fix;
        Self {
            review,
            decide,
            fix,
        }
    }

    pub fn all() -> Self {
        Self::new(true, true, true)
    }

    pub fn review(&self) -> bool {
        self.review
    }

    pub fn decide(&self) -> bool {
        self.decide
    }

    pub fn fix(&self) -> bool {
        self.fix
    }
}

/// Why the session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltReason {
    /// Automated review is disabled; the session is a single run.
    ReviewDisabled,
    /// Review ran but the decision stage is disabled.
    ReviewOnly,
    /// The decision-maker chose HALT (including forced halts).
    Decided { decision: Decision },
    /// The decision-maker chose RERUN but the run ceiling was reached.
    MaxIterationsReached { max_iterations: u32 },
    CollaboratorFailed { role: Role, message: String },
    /// A RUN pass after a fix could not complete.
    RunFailed { iteration: u32, message: String },
}

impl HaltReason {
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(self, HaltReason::CollaboratorFailed { .. })
    }
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::ReviewDisabled => f.write_str("automated review disabled"),
            HaltReason::ReviewOnly => f.write_str("review-only mode"),
            HaltReason::Decided { decision } => {
                write!(f, "decision agent chose HALT: {}", decision.reasoning)
            }
            HaltReason::MaxIterationsReached { max_iterations } => {
                write!(f, "maximum iterations ({max_iterations}) reached")
            }
            HaltReason::CollaboratorFailed { role, message } => {
                write!(f, "{role} agent failed: {message}")
            }
            HaltReason::RunFailed { iteration, message } => {
                write!(f, "test run {iteration} failed: {message}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Stage {
    Run,
    Review,
    Decide,
    Fix,
    Halted(HaltReason),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Run => "RUN",
            Stage::Review => "REVIEW",
            Stage::Decide => "DECIDE",
            Stage::Fix => "FIX",
            Stage::Halted(_) => "HALTED",
        }
    }
}

/// Outcome of the work done in the current stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    RunCompleted,
    ReviewSucceeded,
    Decided(Decision),
    FixSucceeded,
    CollaboratorFailed { role: Role, message: String },
    RunFailed { message: String },
}

/// Deterministic iteration controller.
#[derive(Debug, Clone)]
pub struct Controller {
    policy: StagePolicy,
    max_iterations: u32,
    iteration: u32,
    stage: Stage,
    rerun_without_fix: bool,
}

impl Controller {
    pub fn new(policy: StagePolicy, max_iterations: u32) -> Result<Self> {
        if max_iterations == 0 {
            bail!("max_iterations must be > 0");
        }
        Ok(Self {
            policy,
            max_iterations,
            iteration: 1,
            stage: Stage::Run,
            rerun_without_fix: false,
        })
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// 1-based number of the current (or last) RUN pass.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn policy(&self) -> StagePolicy {
        self.policy
    }

    /// True when the last transition went DECIDE → RUN without a fix.
    pub fn rerun_without_fix(&self) -> bool {
        self.rerun_without_fix
    }

    pub fn halt_reason(&self) -> Option<&HaltReason> {
        match &self.stage {
            Stage::Halted(reason) => Some(reason),
            _ => None,
        }
    }

    /// Feed the outcome of the current stage and move to the next one.
    ///
    /// Errors when the event does not belong to the current stage.
    pub fn advance(&mut self, event: Event) -> Result<&Stage> {
        self.rerun_without_fix = false;
        let from = self.stage.name();
        let next = match (self.stage.clone(), event) {
            (Stage::Halted(_), event) => bail!("session already halted; got {event:?}"),
            (stage, Event::CollaboratorFailed { role, message })
                if Self::stage_role(&stage) == Some(role) =>
            {
                Stage::Halted(HaltReason::CollaboratorFailed { role, message })
            }
            (Stage::Run, Event::RunCompleted) => {
                if self.policy.review {
                    Stage::Review
                } else {
                    Stage::Halted(HaltReason::ReviewDisabled)
                }
            }
            (Stage::Review, Event::ReviewSucceeded) => {
                if self.policy.decide {
                    Stage::Decide
                } else {
                    Stage::Halted(HaltReason::ReviewOnly)
                }
            }
            (Stage::Decide, Event::Decided(decision)) => self.after_decision(decision),
            (Stage::Run, Event::RunFailed { message }) => Stage::Halted(HaltReason::RunFailed {
                iteration: self.iteration,
                message,
            }),
            (Stage::Fix, Event::FixSucceeded) => {
                self.iteration += 1;
                Stage::Run
            }
            (stage, event) => bail!("event {event:?} is not valid in stage {}", stage.name()),
        };
        tracing::debug!(
            from,
            to = next.name(),
            iteration = self.iteration,
            "stage transition"
        );
        self.stage = next;
        Ok(&self.stage)
    }

    /// Collaborator whose work the stage performs.
    fn stage_role(stage: &Stage) -> Option<Role> {
        match stage {
            Stage::Review => Some(Role::Reviewer),
            Stage::Decide => Some(Role::Decision),
            Stage::Fix => Some(Role::Fixer),
            Stage::Run | Stage::Halted(_) => None,
        }
    }

    fn after_decision(&mut self, decision: Decision) -> Stage {
        match decision.action {
            DecisionAction::Halt => Stage::Halted(HaltReason::Decided { decision }),
            DecisionAction::Rerun if self.iteration >= self.max_iterations => {
                Stage::Halted(HaltReason::MaxIterationsReached {
                    max_iterations: self.max_iterations,
                })
            }
            DecisionAction::Rerun if self.policy.fix => Stage::Fix,
            DecisionAction::Rerun => {
                self.iteration += 1;
                self.rerun_without_fix = true;
                Stage::Run
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rerun() -> Decision {
        Decision {
            action: DecisionAction::Rerun,
            reasoning: "try again".to_string(),
            confidence: "high".to_string(),
            human_tasks: Vec::new(),
        }
    }

    fn failed(role: Role) -> Event {
        Event::CollaboratorFailed {
            role,
            message: "exit status 1".to_string(),
        }
    }

    #[test]
    fn policy_disables_downstream_stages() {
        let policy = StagePolicy::new(false, true, true);
        assert!(!policy.decide());
        assert!(!policy.fix());

        let policy = StagePolicy::new(true, false, true);
        assert!(policy.review());
        assert!(!policy.fix());
    }

    #[test]
    fn full_cycle_returns_to_run_and_counts_iterations() {
        let mut controller = Controller::new(StagePolicy::all(), 5).expect("controller");
        assert_eq!(controller.advance(Event::RunCompleted).expect("run"), &Stage::Review);
        assert_eq!(
            controller.advance(Event::ReviewSucceeded).expect("review"),
            &Stage::Decide
        );
        assert_eq!(
            controller.advance(Event::Decided(rerun())).expect("decide"),
            &Stage::Fix
        );
        assert_eq!(controller.iteration(), 1);
        assert_eq!(controller.advance(Event::FixSucceeded).expect("fix"), &Stage::Run);
        assert_eq!(controller.iteration(), 2);
    }

    #[test]
    fn review_disabled_halts_after_run() {
        let mut controller =
            Controller::new(StagePolicy::new(false, true, true), 5).expect("controller");
        controller.advance(Event::RunCompleted).expect("run");
        assert_eq!(controller.halt_reason(), Some(&HaltReason::ReviewDisabled));
    }

    #[test]
    fn review_only_halts_after_review() {
        let mut controller =
            Controller::new(StagePolicy::new(true, false, false), 5).expect("controller");
        controller.advance(Event::RunCompleted).expect("run");
        controller.advance(Event::ReviewSucceeded).expect("review");
        assert_eq!(controller.halt_reason(), Some(&HaltReason::ReviewOnly));
    }

    #[test]
    fn collaborator_failures_halt() {
        for (role, setup) in [
            (Role::Reviewer, vec![Event::RunCompleted]),
            (
                Role::Decision,
                vec![Event::RunCompleted, Event::ReviewSucceeded],
            ),
            (
                Role::Fixer,
                vec![
                    Event::RunCompleted,
                    Event::ReviewSucceeded,
                    Event::Decided(rerun()),
                ],
            ),
        ] {
            let mut controller = Controller::new(StagePolicy::all(), 5).expect("controller");
            for event in setup {
                controller.advance(event).expect("setup");
            }
            controller.advance(failed(role)).expect("failure");
            let reason = controller.halt_reason().expect("halted");
            assert!(reason.is_collaborator_failure());
            assert!(reason.to_string().starts_with(role.as_str()));
        }
    }

    #[test]
    fn halt_decision_is_terminal() {
        let mut controller = Controller::new(StagePolicy::all(), 5).expect("controller");
        controller.advance(Event::RunCompleted).expect("run");
        controller.advance(Event::ReviewSucceeded).expect("review");
        let decision = Decision::forced_halt("bad payload");
        controller
            .advance(Event::Decided(decision.clone()))
            .expect("decide");
        assert_eq!(
            controller.halt_reason(),
            Some(&HaltReason::Decided { decision })
        );
        assert!(controller.advance(Event::RunCompleted).is_err());
    }

    #[test]
    fn rerun_without_fix_skips_fix_stage() {
        let mut controller =
            Controller::new(StagePolicy::new(true, true, false), 5).expect("controller");
        controller.advance(Event::RunCompleted).expect("run");
        controller.advance(Event::ReviewSucceeded).expect("review");
        assert_eq!(
            controller.advance(Event::Decided(rerun())).expect("decide"),
            &Stage::Run
        );
        assert!(controller.rerun_without_fix());
        assert_eq!(controller.iteration(), 2);
        controller.advance(Event::RunCompleted).expect("run");
        assert!(!controller.rerun_without_fix());
    }

    #[test]
    fn always_rerun_terminates_at_ceiling() {
        for max in 1..=6 {
            let mut controller = Controller::new(StagePolicy::all(), max).expect("controller");
            let mut runs = 0;
            while controller.halt_reason().is_none() {
                let event = match controller.stage() {
                    Stage::Run => {
                        runs += 1;
                        Event::RunCompleted
                    }
                    Stage::Review => Event::ReviewSucceeded,
                    Stage::Decide => Event::Decided(rerun()),
                    Stage::Fix => Event::FixSucceeded,
                    Stage::Halted(_) => unreachable!(),
                };
                controller.advance(event).expect("advance");
                assert!(controller.iteration() <= max);
            }
            assert_eq!(runs, max);
            assert_eq!(
                controller.halt_reason(),
                Some(&HaltReason::MaxIterationsReached {
                    max_iterations: max
                })
            );
        }
    }

    #[test]
    fn mismatched_event_is_rejected() {
        let mut controller = Controller::new(StagePolicy::all(), 5).expect("controller");
        assert!(controller.advance(Event::FixSucceeded).is_err());
        assert!(controller.advance(failed(Role::Reviewer)).is_err());
        assert_eq!(controller.stage(), &Stage::Run);
    }

    #[test]
    fn failure_of_another_role_is_rejected() {
        let mut controller = Controller::new(StagePolicy::all(), 5).expect("controller");
        controller.advance(Event::RunCompleted).expect("run");
        assert!(controller.advance(failed(Role::Fixer)).is_err());
        assert!(controller.advance(failed(Role::Decision)).is_err());
        assert_eq!(controller.stage(), &Stage::Review);

        controller.advance(Event::ReviewSucceeded).expect("review");
        assert!(controller.advance(failed(Role::Reviewer)).is_err());
        controller.advance(failed(Role::Decision)).expect("decision failure");
        assert!(controller.halt_reason().is_some_and(HaltReason::is_collaborator_failure));
    }

    #[test]
    fn failed_run_halts_with_its_iteration() {
        let mut controller = Controller::new(StagePolicy::all(), 5).expect("controller");
        for event in [
            Event::RunCompleted,
            Event::ReviewSucceeded,
            Event::Decided(rerun()),
            Event::FixSucceeded,
        ] {
            controller.advance(event).expect("cycle");
        }
        controller
            .advance(Event::RunFailed {
                message: "read scenarios dir".to_string(),
            })
            .expect("run failure");
        assert_eq!(
            controller.halt_reason(),
            Some(&HaltReason::RunFailed {
                iteration: 2,
                message: "read scenarios dir".to_string(),
            })
        );
    }

    #[test]
    fn zero_max_iterations_is_rejected() {
        assert!(Controller::new(StagePolicy::all(), 0).is_err());
    }
}
