//! Session state machine: `normal` ⇄ `plan_pending`.
//!
//! [`decide`] is pure. It picks the action for a message from the session's
//! current mode and the classified intent; the worker performs the action
//! and only then commits the mode change given by [`Action::next_mode`].

use crate::intent::{Command, Intent, PrCommand};
use crate::session::model::{Session, SessionMode};

/// What the worker should do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Drop the pending plan and acknowledge. No agent run.
    CancelPlan,
    /// Run the agent against the approved plan, then commit and open/update the PR.
    ExecuteApprovedPlan { plan: String },
    /// Re-run the agent in plan-only mode with the revision request.
    RevisePlan { plan: String },
    /// Act on the session's pull request (`merge`, `close`, `status`).
    PullRequest(PrCommand),
    /// Ask the agent for a plan and wait for approval.
    RequestPlan,
    /// Plain execution with full context, then commit and open/update the PR.
    Execute,
}

impl Action {
    /// Mode of the session once this action completes.
    pub fn next_mode(&self, current: SessionMode) -> SessionMode {
        match self {
            Self::CancelPlan | Self::ExecuteApprovedPlan { .. } | Self::Execute => {
                SessionMode::Normal
            }
            Self::RevisePlan { .. } | Self::RequestPlan => SessionMode::PlanPending,
            Self::PullRequest(_) => current,
        }
    }

    /// Whether this action invokes the external agent.
    pub fn invokes_agent(&self) -> bool {
        !matches!(self, Self::CancelPlan | Self::PullRequest(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::CancelPlan => "cancel_plan",
            Self::ExecuteApprovedPlan { .. } => "execute_approved_plan",
            Self::RevisePlan { .. } => "revise_plan",
            Self::PullRequest(_) => "pull_request_command",
            Self::RequestPlan => "request_plan",
            Self::Execute => "execute",
        }
    }
}

/// Pick the action for a message, in precedence order:
///
/// 1. plan pending + cancel → [`Action::CancelPlan`]
/// 2. plan pending + approval → [`Action::ExecuteApprovedPlan`]
/// 3. plan pending + anything else → [`Action::RevisePlan`]
/// 4. normal + merge/close/status → [`Action::PullRequest`]
/// 5. normal + plan request → [`Action::RequestPlan`]
/// 6. otherwise → [`Action::Execute`]
pub fn decide(session: &Session, intent: &Intent) -> Action {
    if session.is_plan_pending() {
        let plan = session.pending_plan.clone().unwrap_or_default();
        if intent.cancel {
            return Action::CancelPlan;
        }
        if intent.approval {
            return Action::ExecuteApprovedPlan { plan };
        }
        return Action::RevisePlan { plan };
    }

    if let Some(command) = intent.command.and_then(Command::pr_command) {
        return Action::PullRequest(command);
    }
    if intent.plan_request {
        return Action::RequestPlan;
    }
    Action::Execute
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::classify;

    fn normal() -> Session {
        Session::new("0123456789ab", "widget")
    }

    fn planning() -> Session {
        let mut session = normal();
        session.set_pending_plan("1. add toggle\n2. persist setting");
        session
    }

    #[test]
    fn cancel_in_plan_mode() {
        let session = planning();
        let action = decide(&session, &classify("[cancel] Re: Add dark mode", ""));
        assert_eq!(action, Action::CancelPlan);
        assert!(!action.invokes_agent());
        assert_eq!(action.next_mode(session.mode), SessionMode::Normal);
    }

    #[test]
    fn cancel_beats_approval() {
        let intent = classify("[cancel] [confirm] Re: Add dark mode", "");
        assert_eq!(decide(&planning(), &intent), Action::CancelPlan);
    }

    #[test]
    fn approval_in_plan_mode_carries_plan() {
        let action = decide(&planning(), &classify("Re: Add dark mode", "looks good"));
        match action {
            Action::ExecuteApprovedPlan { ref plan } => assert!(plan.contains("add toggle")),
            other => panic!("expected approval, got {other:?}"),
        }
        assert_eq!(action.next_mode(SessionMode::PlanPending), SessionMode::Normal);
    }

    #[test]
    fn anything_else_in_plan_mode_revises() {
        let action = decide(&planning(), &classify("Re: Add dark mode", "Looks good but add tests"));
        assert!(matches!(action, Action::RevisePlan { .. }));
        assert_eq!(action.next_mode(SessionMode::PlanPending), SessionMode::PlanPending);

        // Operational commands are not special while a plan is pending.
        let action = decide(&planning(), &classify("[status] Re: Add dark mode", ""));
        assert!(matches!(action, Action::RevisePlan { .. }));
    }

    #[test]
    fn operational_commands_in_normal_mode() {
        for (subject, command) in [
            ("[merge] Re: Add dark mode", PrCommand::Merge),
            ("[close] Re: Add dark mode", PrCommand::Close),
            ("[status] Re: Add dark mode", PrCommand::Status),
        ] {
            let action = decide(&normal(), &classify(subject, ""));
            assert_eq!(action, Action::PullRequest(command));
            assert_eq!(action.next_mode(SessionMode::Normal), SessionMode::Normal);
        }
    }

    #[test]
    fn plan_request_in_normal_mode() {
        assert_eq!(
            decide(&normal(), &classify("[plan] Add dark mode", "")),
            Action::RequestPlan
        );
        assert_eq!(
            decide(&normal(), &classify("Add dark mode", "just plan for now")),
            Action::RequestPlan
        );
    }

    #[test]
    fn approval_words_outside_plan_mode_just_execute() {
        assert_eq!(decide(&normal(), &classify("[confirm] Add dark mode", "")), Action::Execute);
        assert_eq!(decide(&normal(), &classify("[cancel] Add dark mode", "")), Action::Execute);
        assert_eq!(decide(&normal(), &classify("Add dark mode", "go ahead")), Action::Execute);
    }
}
