//! Console command parsing.

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `exit`: close the stream and stop.
    Exit,
    /// `list`: ask for the federated nickname list.
    List,
    /// `away`: toggle the away auto-reply.
    Away,
    /// `recipient|message`: send a direct message.
    Direct {
        /// Target nickname.
        recipient: String,
        /// Message text, may contain `|`.
        text: String,
    },
    /// Blank line.
    Empty,
    /// Anything else; carries a notice for the user.
    Invalid(String),
}

impl Command {
    /// Parse one input line. Trailing line endings are ignored.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        match line.trim() {
            "" => return Self::Empty,
            "exit" => return Self::Exit,
            "list" => return Self::List,
            "away" => return Self::Away,
            _ => {}
        }

        match line.split_once('|') {
            Some((recipient, _)) if recipient.trim().is_empty() => {
                Self::Invalid("missing recipient before '|'".to_string())
            }
            Some((recipient, text)) => Self::Direct {
                recipient: recipient.trim().to_string(),
                text: text.to_string(),
            },
            None => Self::Invalid(format!(
                "unknown command {line:?}; use recipient|message, list, away or exit"
            )),
        }
    }
}
