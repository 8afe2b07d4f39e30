//! Bot commands.
//!
//! `CommandParser` turns message text into a [`Command`]; the handler in
//! [`handler`] runs it and builds the reply.

pub mod handler;

pub use handler::CommandHandler;

/// Parses slash commands. Accepts `/cmd@botname` as well as `/cmd`.
pub struct CommandParser;

impl CommandParser {
    /// `None` when the text is not a command at all. Slash-prefixed text
    /// that isn't command syntax (`/ hi`, `/привет`) is ordinary text.
    pub fn parse(text: &str) -> Option<Command> {
        let trimmed = text.trim();
        if !trimmed.starts_with('/') {
            return None;
        }

        let mut parts = trimmed.split_whitespace();
        let head = parts.next()?;
        let name = head.split_once('@').map_or(head, |(name, _bot)| name);
        if !is_command_name(name) {
            return None;
        }
        let name = name.to_lowercase();
        let arg = parts.next();

        Some(match name.as_str() {
            "/start" => Command::Start,
            "/help" => Command::Help,
            "/muted_users" | "/muted" => Command::MutedUsers,
            "/leaderboard" | "/toxic_top" => Command::Leaderboard,
            "/unmute" => parse_unmute(arg),
            "/history" => parse_history(arg),
            _ => Command::Unknown(name),
        })
    }
}

/// Bot API command syntax: `/` then 1-32 ASCII letters, digits or `_`.
fn is_command_name(name: &str) -> bool {
    let Some(body) = name.strip_prefix('/') else {
        return false;
    };
    (1..=32).contains(&body.len())
        && body.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// `/unmute <user_id>`
fn parse_unmute(arg: Option<&str>) -> Command {
    match arg {
        None => Command::Invalid(CommandUsage::Unmute),
        Some(raw) => raw
            .parse::<i64>()
            .map(|user_id| Command::Unmute { user_id })
            .unwrap_or(Command::Invalid(CommandUsage::Unmute)),
    }
}

/// `/history [page]`, page defaults to 1.
fn parse_history(arg: Option<&str>) -> Command {
    match arg {
        None => Command::History { page: 1 },
        Some(raw) => raw
            .parse::<usize>()
            .map(|page| Command::History { page })
            .unwrap_or(Command::Invalid(CommandUsage::History)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    MutedUsers,
    Leaderboard,
    Unmute { user_id: i64 },
    History { page: usize },
    /// Known command with a missing or malformed argument.
    Invalid(CommandUsage),
    /// Some other bot's command, or a typo. Still moderated as text.
    Unknown(String),
}

/// Which command's usage to explain after a bad argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandUsage {
    Unmute,
    History,
}
