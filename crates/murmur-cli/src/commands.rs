use anyhow::{Result, anyhow, bail};
use uuid::Uuid;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Global,
    Direct(Uuid),
    Older,
    /// Message references are full ids or a unique prefix of one.
    Edit(String, String),
    Delete(String),
    React(String, String),
    Who,
    /// Announce that we are composing in the current conversation.
    Typing,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  <text>                 send to the current conversation
  /global                switch to the room
  /dm <user-id>          switch to a private conversation
  /older                 load older history
  /edit <id> <text>      edit one of your messages
  /delete <id>           delete one of your messages
  /react <id> <emoji>    toggle a reaction
  /who                   who is online and typing
  /typing                show others you are composing (clears after a pause or on send)
  /quit                  sign out and exit";

/// Parse a line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "global" => Command::Global,
        "dm" => {
            let peer = args
                .parse()
                .map_err(|e| anyhow!("/dm needs a user id: {}", e))?;
            Command::Direct(peer)
        }
        "older" => Command::Older,
        "edit" => {
            let (id, text) = two_args(args, "/edit <id> <text>")?;
            Command::Edit(id, text)
        }
        "delete" => Command::Delete(one_arg(args, "/delete <id>")?),
        "react" => {
            let (id, emoji) = two_args(args, "/react <id> <emoji>")?;
            Command::React(id, emoji)
        }
        "who" => Command::Who,
        "typing" => Command::Typing,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command /{} (try /help)", other),
    };
    Ok(Some(command))
}

fn one_arg(args: &str, usage: &str) -> Result<String> {
    match args.split_whitespace().next() {
        Some(arg) => Ok(arg.to_string()),
        None => bail!("usage: {}", usage),
    }
}

fn two_args(args: &str, usage: &str) -> Result<(String, String)> {
    match args.split_once(char::is_whitespace) {
        Some((first, rest)) if !rest.trim().is_empty() => {
            Ok((first.to_string(), rest.trim().to_string()))
        }
        _ => bail!("usage: {}", usage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_send() {
        assert_eq!(parse("  hi there ").unwrap(), Some(Command::Send("hi there".into())));
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn parses_commands_with_arguments() {
        let peer = Uuid::from_u128(7);
        assert_eq!(parse(&format!("/dm {}", peer)).unwrap(), Some(Command::Direct(peer)));
        assert_eq!(
            parse("/edit 1a2b  fixed   typo").unwrap(),
            Some(Command::Edit("1a2b".into(), "fixed   typo".into()))
        );
        assert_eq!(
            parse("/react 1a2b 👍").unwrap(),
            Some(Command::React("1a2b".into(), "👍".into()))
        );
        assert_eq!(parse("/delete 1a2b").unwrap(), Some(Command::Delete("1a2b".into())));
        assert_eq!(parse("/typing").unwrap(), Some(Command::Typing));
        assert_eq!(parse("/quit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse("/dm not-a-user").is_err());
        assert!(parse("/edit 1a2b").is_err());
        assert!(parse("/delete").is_err());
        assert!(parse("/shout hi").is_err());
    }
}
