//! Natural-language intent triggers.
//!
//! Regex heuristics over `subject + body`. They are small and lossy: a
//! missed approval just becomes a plan revision, which the sender can
//! correct with an explicit `[confirm]`.

use std::sync::LazyLock;

use regex::Regex;

/// Phrases asking for a plan instead of changes.
static PLAN_TRIGGERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(write|make|draft|give|send|create) (me |us )?an? (implementation )?plan\b",
        r"(?i)\bpropose an? (implementation )?plan\b",
        r"(?i)\bbefore you (start|begin|make any changes|change anything)\b",
        r"(?i)\bjust plan\b",
        r"(?i)\bplan (it|this) out\b",
        r"(?i)\bplan only\b",
        r"(?i)\bdon'?t (make|change|touch) anything yet\b",
        r"(?i)\bwhat would you (do|change)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Phrases approving a pending plan.
static APPROVAL_TRIGGERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\blooks (good|great|fine)\b",
        r"(?i)\blgtm\b",
        r"(?i)\bgo ahead\b",
        r"(?i)\bship it\b",
        r"(?i)\bsounds good\b",
        r"(?i)\b(approved|approve it)\b",
        r"(?i)\b(do it|proceed|make it so)\b",
        // Short affirmation closing the message.
        r"(?i)\b(yes|yep|yeah|yup|ok|okay|sure|approve)\s*[.!]*\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Phrases indicating the sender wants the plan changed.
static REVISION_TRIGGERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bbut\b",
        r"(?i)\binstead\b",
        r"(?i)\bchange\b",
        r"(?i)\balso add\b",
        r"(?i)\bhowever\b",
        r"(?i)\bexcept\b",
        r"(?i)\brather than\b",
        r"\?",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Phrases that hold back or negate an approval.
static NEGATION_TRIGGERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bnot\b",
        r"(?i)\bdon[’']?t\b",
        r"(?i)\b(isn|aren|wasn|shouldn|can)[’']?t\b",
        r"(?im)^\s*no\s*[,.!]*\s*$",
        r"(?i)\bno\s*[,.!]",
        r"(?i)\bwait\b",
        r"(?i)\bhold off\b",
        r"(?i)\bstop\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Phrases abandoning a pending plan.
static CANCEL_TRIGGERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*(cancel|never\s*mind|forget it|scrap (it|that|this))\s*[.!]*\s*$",
        r"(?i)\b(cancel|scrap|drop|abandon) (the|this|that) plan\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

/// Does the text ask for a plan?
pub fn mentions_plan_request(text: &str) -> bool {
    any_match(&PLAN_TRIGGERS, text)
}

/// Does the text contain an approval phrase? Ignores revision phrases.
pub fn mentions_approval(text: &str) -> bool {
    any_match(&APPROVAL_TRIGGERS, text.trim_end())
}

/// Does the text ask for changes?
pub fn mentions_revision(text: &str) -> bool {
    any_match(&REVISION_TRIGGERS, text)
}

/// Does the text negate or hold back what it says?
pub fn mentions_negation(text: &str) -> bool {
    any_match(&NEGATION_TRIGGERS, text)
}

/// Does the body abandon the plan?
pub fn mentions_cancel(body: &str) -> bool {
    any_match(&CANCEL_TRIGGERS, body.trim())
}

/// Strip quoted text from an email body.
///
/// Drops `>` lines and everything after an "On ... wrote:" attribution or
/// an "Original Message" separator, so the previous agent reply does not
/// leak into intent detection.
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }
        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }
        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_triggers() {
        assert!(mentions_plan_request("Can you write me a plan for the auth rewrite"));
        assert!(mentions_plan_request("Before you start, tell me the approach"));
        assert!(mentions_plan_request("just plan, no code"));
        assert!(!mentions_plan_request("Re: Plan"));
        assert!(!mentions_plan_request("Add dark mode to settings"));
    }

    #[test]
    fn approval_phrases() {
        assert!(mentions_approval("Looks good"));
        assert!(mentions_approval("LGTM, thanks"));
        assert!(mentions_approval("go ahead"));
        assert!(mentions_approval("ship it!"));
        assert!(mentions_approval("Thanks, yes"));
        assert!(mentions_approval("ok."));
        assert!(!mentions_approval("ok so what about the tests"));
        assert!(!mentions_approval("Please add more detail"));
    }

    #[test]
    fn revision_phrases() {
        assert!(mentions_revision("Looks good but add tests"));
        assert!(mentions_revision("use postgres instead"));
        assert!(mentions_revision("can you also add logging"));
        assert!(mentions_revision("what about caching?"));
        assert!(!mentions_revision("Looks good, ship it"));
    }

    #[test]
    fn negation_phrases() {
        assert!(mentions_negation("Please don't do it yet"));
        assert!(mentions_negation("Please don’t do it yet"));
        assert!(mentions_negation("Do not proceed"));
        assert!(mentions_negation("No, this is not ok"));
        assert!(mentions_negation("Wait, let me check with the team"));
        assert!(mentions_negation("hold off for now"));
        assert!(mentions_negation("no"));
        assert!(!mentions_negation("Looks good, ship it"));
        assert!(!mentions_negation("Nothing else to add, go ahead"));
        assert!(!mentions_negation("Now do it"));
    }

    #[test]
    fn cancel_phrases() {
        assert!(mentions_cancel("cancel"));
        assert!(mentions_cancel("  Never mind.  "));
        assert!(mentions_cancel("Let's scrap the plan, priorities changed"));
        assert!(!mentions_cancel("Add a cancel button to the dialog"));
    }

    #[test]
    fn strip_quotes_and_attribution() {
        let body = "Looks good\n\nOn Mon, Jan 1, 2026 at 10:00 AM Agent <a@x> wrote:\n> 1. but why?";
        assert_eq!(strip_quoted_text(body), "Looks good");
    }

    #[test]
    fn strip_original_message_separator() {
        let body = "ship it\n--- Original Message ---\nwhat about tests?";
        assert_eq!(strip_quoted_text(body), "ship it");
    }
}
