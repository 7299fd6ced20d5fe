use speakin_types::UserId;

/// One line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Open(UserId),
    Who,
    Find(String),
    Notifications,
    Clear,
    Quit,
    Say(String),
    Invalid(String),
    Nothing,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Nothing;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Say(line.to_string());
        };

        let (cmd, arg) = match rest.split_once(char::is_whitespace) {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (rest, ""),
        };
        match cmd {
            "open" => match arg.parse() {
                Ok(id) => Self::Open(id),
                Err(_) => Self::Invalid(format!("usage: /open <user id>, got '{}'", arg)),
            },
            "who" => Self::Who,
            "find" => Self::Find(arg.to_string()),
            "notifications" => Self::Notifications,
            "clear" => Self::Clear,
            "quit" | "exit" => Self::Quit,
            other => Self::Invalid(format!("unknown command /{}", other)),
        }
    }
}
