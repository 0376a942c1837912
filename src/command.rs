/// A bot command such as `/add_button@StoreBot Name https://x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    /// Bot username after `@`, when the command was addressed explicitly.
    pub via: Option<String>,
    /// Everything after the command word, trimmed.
    pub arg: Option<String>,
}

impl Command {
    /// Whitespace-separated words of the argument.
    pub fn args(&self) -> Vec<&str> {
        self.arg
            .as_deref()
            .map(|arg| arg.split_whitespace().collect())
            .unwrap_or_default()
    }
}

pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim_start();
    let rest = text.strip_prefix('/')?;
    let (head, arg) = match rest.split_once(char::is_whitespace) {
        Some((head, arg)) => (head, Some(arg.trim())),
        None => (rest, None),
    };
    let (name, via) = match head.split_once('@') {
        Some((name, via)) => (name, Some(via.to_string())),
        None => (head, None),
    };
    if name.is_empty() {
        return None;
    }
    Some(Command {
        name: name.to_lowercase(),
        via,
        arg: arg.filter(|arg| !arg.is_empty()).map(str::to_string),
    })
}
