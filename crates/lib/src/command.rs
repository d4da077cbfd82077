//! Chat command recognition (`!ask <question>`).

use crate::config::DiscordConfig;

/// A prefixed command such as `!ask`. Matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    prefix: String,
    name: String,
}

impl Command {
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
        }
    }

    pub fn from_config(config: &DiscordConfig) -> Self {
        Self::new(config.command_prefix.clone(), config.command_name.clone())
    }

    /// Returns the trimmed argument text when `text` invokes this command, `None` otherwise.
    /// `!ask` alone yields `Some("")`.
    pub fn parse<'a>(&self, text: &'a str) -> Option<&'a str> {
        let rest = text.strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix(self.name.as_str())?;
        match rest.chars().next() {
            None => Some(""),
            Some(c) if c.is_whitespace() => Some(rest.trim()),
            Some(_) => None,
        }
    }

    /// Hint sent when the command is used without a question.
    pub fn usage(&self) -> String {
        format!("Usage: {}{} <your question>", self.prefix, self.name)
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::from_config(&DiscordConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_question() {
        let cmd = Command::default();
        assert_eq!(cmd.parse("!ask what is a lifetime?"), Some("what is a lifetime?"));
        assert_eq!(cmd.parse("!ask   spaced out  \n"), Some("spaced out"));
        assert_eq!(cmd.parse("!ask\nmulti\nline"), Some("multi\nline"));
    }

    #[test]
    fn bare_command_is_empty_question() {
        assert_eq!(Command::default().parse("!ask"), Some(""));
        assert_eq!(Command::default().parse("!ask   "), Some(""));
    }

    #[test]
    fn other_text_is_ignored() {
        let cmd = Command::default();
        assert_eq!(cmd.parse("hello"), None);
        assert_eq!(cmd.parse("!asking questions"), None);
        assert_eq!(cmd.parse("! ask spaced"), None);
        assert_eq!(cmd.parse("!ASK shout"), None);
        assert_eq!(cmd.parse(" !ask leading space"), None);
    }

    #[test]
    fn custom_prefix_and_name() {
        let cmd = Command::new("?", "q");
        assert_eq!(cmd.parse("?q hi"), Some("hi"));
        assert_eq!(cmd.parse("!ask hi"), None);
        assert_eq!(cmd.usage(), "Usage: ?q <your question>");
    }
}
