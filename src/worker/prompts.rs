//! Agent prompts and reply texts.

use crate::git::PrStatus;
use crate::intent::strip_commands;
use crate::session::Session;

/// Appended to every reply that carries a plan.
pub const APPROVAL_INSTRUCTIONS: &str = "\
To run this plan, reply with \"looks good\" (or put [confirm] in the subject).
To change it, reply with what should be different.
To drop it, reply with [cancel] in the subject.";

fn with_history(history: &str, body: String) -> String {
    if history.trim().is_empty() {
        body
    } else {
        format!("Conversation so far:\n\n{history}\n\n---\n\n{body}")
    }
}

/// Plain execution. `history` is only passed when the agent is not resuming
/// its own session and would otherwise lack the earlier turns.
pub fn execute_prompt(request: &str, history: &str) -> String {
    with_history(history, request.trim().to_string())
}

pub fn plan_prompt(request: &str, history: &str) -> String {
    with_history(
        history,
        format!(
            "\
Write a step-by-step implementation plan for the request below. Do not modify any files.

Request:
{}",
            request.trim()
        ),
    )
}

pub fn revision_prompt(plan: &str, revision: &str, history: &str) -> String {
    with_history(
        history,
        format!(
            "\
Revise the plan below according to the feedback. Do not modify any files. \
Reply with the complete revised plan.

Current plan:
{}

Feedback:
{}",
            plan.trim(),
            revision.trim()
        ),
    )
}

pub fn approved_plan_prompt(plan: &str, approval: &str) -> String {
    let note = approval.trim();
    let mut prompt = format!(
        "\
The following plan has been approved. Implement it now.

Approved plan:
{}",
        plan.trim()
    );
    if !note.is_empty() {
        prompt.push_str("\n\nApproval message:\n");
        prompt.push_str(note);
    }
    prompt
}

/// Body of the first pull request for a session.
pub fn pr_body(history: &str, summary: &str) -> String {
    format!(
        "\
{}

## Conversation

{}",
        summary.trim(),
        history.trim()
    )
}

/// Pull request title from the thread subject, keeping the author's casing.
pub fn pr_title(subject: &str) -> String {
    let stripped = strip_commands(subject);
    let mut words: Vec<&str> = stripped.split_whitespace().collect();
    while words
        .first()
        .is_some_and(|w| ["re:", "fwd:", "fw:"].iter().any(|p| w.eq_ignore_ascii_case(p)))
    {
        words.remove(0);
    }

    if words.is_empty() {
        "Changes requested by email".to_string()
    } else {
        words.join(" ")
    }
}

pub fn plan_reply(plan: &str) -> String {
    format!("Here is the proposed plan:\n\n{}\n\n---\n{APPROVAL_INSTRUCTIONS}", plan.trim())
}

pub fn revised_plan_reply(plan: &str) -> String {
    format!("Here is the revised plan:\n\n{}\n\n---\n{APPROVAL_INSTRUCTIONS}", plan.trim())
}

pub fn cancel_reply() -> String {
    "The pending plan has been cancelled. Nothing was changed.".to_string()
}

pub fn status_reply(session: &Session, status: &PrStatus) -> String {
    let mut lines = vec![
        format!("Pull request #{}: {}", status.number, status.title),
        format!("State: {}", status.state),
    ];
    if let Some(mergeable) = &status.mergeable {
        lines.push(format!("Mergeable: {mergeable}"));
    }
    lines.push(format!("Link: {}", status.url));
    lines.push(format!("Branch: {}", session.branch_name));
    lines.push(format!("Session mode: {}", session.mode));
    lines.push(format!(
        "Last activity: {}",
        session.last_activity.format("%Y-%m-%d %H:%M UTC")
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_prepended_when_present() {
        assert_eq!(execute_prompt(" fix it ", ""), "fix it");
        let prompt = execute_prompt("fix it", "[User]\nearlier");
        assert!(prompt.starts_with("Conversation so far:"));
        assert!(prompt.ends_with("fix it"));
    }

    #[test]
    fn plan_reply_has_instructions() {
        let reply = plan_reply("1. do a thing");
        assert!(reply.contains("1. do a thing"));
        assert!(reply.contains("[confirm]"));
        assert!(reply.contains("[cancel]"));
    }

    #[test]
    fn approved_prompt_keeps_plan_fixed() {
        let prompt = approved_plan_prompt("1. step", "Looks good");
        assert!(prompt.contains("Approved plan:\n1. step"));
        assert!(prompt.contains("Looks good"));
    }

    #[test]
    fn pr_title_strips_prefixes_and_tokens() {
        assert_eq!(pr_title("Re: Add Dark Mode"), "Add Dark Mode");
        assert_eq!(pr_title("RE: fwd: [Plan] Add  Dark Mode"), "Add Dark Mode");
        assert_eq!(pr_title("[plan]"), "Changes requested by email");
    }
}
