//! Bracketed subject commands: `[merge]`, `[close]`, `[status]`, `[plan]`,
//! `[confirm]`, `[cancel]`.

use std::fmt;

/// An explicit control command found in a subject line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Merge,
    Close,
    Status,
    Plan,
    Confirm,
    Cancel,
}

impl Command {
    /// All commands in match precedence order.
    pub const ALL: [Command; 6] = [
        Command::Merge,
        Command::Close,
        Command::Status,
        Command::Plan,
        Command::Confirm,
        Command::Cancel,
    ];

    /// The lower-case bracketed token for this command.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Merge => "[merge]",
            Self::Close => "[close]",
            Self::Status => "[status]",
            Self::Plan => "[plan]",
            Self::Confirm => "[confirm]",
            Self::Cancel => "[cancel]",
        }
    }

    /// The pull-request operation this command names, if any.
    pub fn pr_command(self) -> Option<PrCommand> {
        match self {
            Self::Merge => Some(PrCommand::Merge),
            Self::Close => Some(PrCommand::Close),
            Self::Status => Some(PrCommand::Status),
            Self::Plan | Self::Confirm | Self::Cancel => None,
        }
    }

    pub fn name(&self) -> &'static str {
        let token = self.token();
        &token[1..token.len() - 1]
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Commands that act on the session's pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrCommand {
    Merge,
    Close,
    Status,
}

impl PrCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Close => "close",
            Self::Status => "status",
        }
    }
}

/// Whether `subject` carries the bracketed token for `command`.
pub fn has_command(subject: &str, command: Command) -> bool {
    subject.to_lowercase().contains(command.token())
}

/// Find the first explicit command in a subject line.
///
/// Matching is a case-insensitive substring search for the exact bracketed
/// token, so `[ merge ]` or `merge]` never match.
pub fn parse_command(subject: &str) -> Option<Command> {
    let lower = subject.to_lowercase();
    Command::ALL
        .into_iter()
        .find(|command| lower.contains(command.token()))
}

/// Remove every command token from a subject, keeping the rest of the
/// text's casing and collapsing whitespace.
pub fn strip_commands(subject: &str) -> String {
    let mut out = String::with_capacity(subject.len());
    let mut rest = subject;

    'scan: while let Some(ch) = rest.chars().next() {
        for command in Command::ALL {
            let token = command.token();
            if rest
                .get(..token.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(token))
            {
                out.push(' ');
                rest = &rest[token.len()..];
                continue 'scan;
            }
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_command_case_insensitively() {
        assert_eq!(parse_command("[MERGE] Add dark mode"), Some(Command::Merge));
        assert_eq!(parse_command("Re: Add dark mode [Close]"), Some(Command::Close));
        assert_eq!(parse_command("[status]"), Some(Command::Status));
        assert_eq!(parse_command("[Plan] refactor auth"), Some(Command::Plan));
        assert_eq!(parse_command("[confirm] Re: Plan"), Some(Command::Confirm));
        assert_eq!(parse_command("Re: [CANCEL] Plan"), Some(Command::Cancel));
    }

    #[test]
    fn no_command_is_none() {
        assert_eq!(parse_command("Add dark mode"), None);
        assert_eq!(parse_command("Please merge this"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn malformed_brackets_do_not_match() {
        assert_eq!(parse_command("merge] now"), None);
        assert_eq!(parse_command("[merge now"), None);
        assert_eq!(parse_command("[ merge ]"), None);
        assert_eq!(parse_command("[me rge]"), None);
        assert_eq!(parse_command("(merge)"), None);
    }

    #[test]
    fn earlier_command_wins_when_several_present() {
        assert_eq!(parse_command("[plan] [merge]"), Some(Command::Merge));
    }

    #[test]
    fn strip_commands_keeps_casing() {
        assert_eq!(strip_commands("Re: [PLAN] Add Dark Mode"), "Re: Add Dark Mode");
        assert_eq!(strip_commands("[confirm]Re:  Tweak [merge]"), "Re: Tweak");
        assert_eq!(strip_commands("Ünïcode [plan] ok"), "Ünïcode ok");
    }

    #[test]
    fn operational_commands() {
        let ops: Vec<_> = Command::ALL.into_iter().filter_map(Command::pr_command).collect();
        assert_eq!(ops, vec![PrCommand::Merge, PrCommand::Close, PrCommand::Status]);
        assert_eq!(PrCommand::Merge.name(), Command::Merge.name());
        assert_eq!(Command::Confirm.name(), "confirm");
    }
}
