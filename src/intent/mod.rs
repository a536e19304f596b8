//! Intent classification for inbound emails.
//!
//! Two layers:
//! - `command`: explicit bracketed subject commands, parsed into [`Command`]
//! - `natural`: regex heuristics for plan requests, approvals, revisions
//!   and cancellations
//!
//! [`classify`] runs both and hands the raw signals to the session state
//! machine, which applies them in its own precedence order.

pub mod command;
pub mod natural;

pub use command::{Command, PrCommand, has_command, parse_command, strip_commands};
pub use natural::strip_quoted_text;

/// Everything the classifier knows about one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Intent {
    /// First explicit subject command, if any.
    pub command: Option<Command>,
    /// `[plan]` or a plan-trigger phrase.
    pub plan_request: bool,
    /// `[confirm]`, or an approval phrase with no revision or negation.
    pub approval: bool,
    /// `[cancel]` or a cancellation phrase.
    pub cancel: bool,
}

fn combined(subject: &str, body: &str) -> String {
    format!("{subject}\n{body}")
}

/// Does this message ask for a plan?
pub fn detect_plan_request(subject: &str, body: &str) -> bool {
    has_command(subject, Command::Plan) || natural::mentions_plan_request(&combined(subject, body))
}

/// Does this message approve a pending plan?
///
/// `[confirm]` always approves. Otherwise an approval phrase counts only if
/// no revision or negation phrase is present.
pub fn detect_approval(subject: &str, body: &str) -> bool {
    if has_command(subject, Command::Confirm) {
        return true;
    }
    let text = combined(subject, body);
    if natural::mentions_revision(&text) || natural::mentions_negation(&text) {
        return false;
    }
    natural::mentions_approval(&text)
}

/// Does this message abandon a pending plan?
pub fn detect_cancel(subject: &str, body: &str) -> bool {
    has_command(subject, Command::Cancel) || natural::mentions_cancel(body)
}

/// Classify a message. Quoted reply text is removed from the body first.
pub fn classify(subject: &str, body: &str) -> Intent {
    let body = strip_quoted_text(body);
    Intent {
        command: parse_command(subject),
        plan_request: detect_plan_request(subject, &body),
        approval: detect_approval(subject, &body),
        cancel: detect_cancel(subject, &body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_beats_approval() {
        assert!(!detect_approval("Re: Plan", "Looks good but add tests"));
        assert!(!detect_approval("Re: Plan", "lgtm, can we also add metrics?"));
    }

    #[test]
    fn negation_beats_approval() {
        let subject = "Re: Refactor auth";
        for body in [
            "Please don't do it yet, I need to check with the team.",
            "No, this is not ok",
            "Do not proceed",
            "Looks good, but wait for the release",
            "Hold off, ok?",
        ] {
            assert!(!detect_approval(subject, body), "{body:?} should not approve");
            assert!(!classify(subject, body).approval);
        }
    }

    #[test]
    fn confirm_always_approves() {
        assert!(detect_approval("[confirm] Re: Plan", ""));
        assert!(detect_approval("[Confirm] Re: Plan", "but change the name?"));
        assert!(detect_approval("[confirm] Re: Plan", "Do not add extra tests"));
    }

    #[test]
    fn plain_approval() {
        assert!(detect_approval("Re: Plan", "Looks good"));
        assert!(detect_approval("Re: Plan", "yes"));
        assert!(!detect_approval("Re: Plan", "Please rename the module"));
    }

    #[test]
    fn plan_request_from_command_or_phrase() {
        assert!(detect_plan_request("[plan] Add dark mode", ""));
        assert!(detect_plan_request("Add dark mode", "Before you start, send me the steps"));
        assert!(!detect_plan_request("Add dark mode", "Use the existing palette"));
    }

    #[test]
    fn classify_strips_quoted_reply() {
        let body = "Looks good\n\n> Shall I also add tests?\n";
        let intent = classify("Re: [plan] Add dark mode", body);
        assert!(intent.approval);
        assert_eq!(intent.command, Some(Command::Plan));
        assert!(intent.plan_request);
        assert!(!intent.cancel);
    }

    #[test]
    fn classify_plain_message() {
        let intent = classify("Add dark mode", "Use the existing palette");
        assert_eq!(intent, Intent::default());
    }

    #[test]
    fn classify_cancel() {
        assert!(classify("[cancel] Re: Plan", "").cancel);
        assert!(classify("Re: Plan", "never mind").cancel);
    }
}
