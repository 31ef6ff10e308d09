//! Terminal command parsing

use thiserror::Error;

use crate::session::UserAction;

pub const HELP: &str = "\
Commands:
  add <name>        add a name to the wheel
  remove <n>        remove the n-th name
  shuffle           shuffle the names
  clear             remove every name (asks first)
  intensity <1-10>  set spin intensity
  spin              spin the wheel
  create            host a new room
  join <room id>    watch a room
  copy              copy the room id to the clipboard
  status            show the wheel
  quit              leave";

/// One line of terminal input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Action(UserAction),
    /// Needs a yes/no before it becomes an action
    Clear,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("'{command}' needs {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },

    #[error("'{0}' is not a valid number")]
    InvalidNumber(String),
}

/// Parse a line; blank lines give `None`
pub fn parse_line(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "add" => {
            if rest.is_empty() {
                return Err(CommandError::MissingArgument {
                    command: "add",
                    what: "a name",
                });
            }
            Command::Action(UserAction::AddName(rest.to_string()))
        }
        "remove" | "rm" => {
            let position = parse_number::<usize>("remove", "a position", rest)?;
            if position == 0 {
                return Err(CommandError::InvalidNumber(rest.to_string()));
            }
            Command::Action(UserAction::RemoveName(position - 1))
        }
        "shuffle" => Command::Action(UserAction::Shuffle),
        "clear" => Command::Clear,
        "intensity" => {
            let level = parse_number::<u8>("intensity", "a level from 1 to 10", rest)?;
            Command::Action(UserAction::SetIntensity(level))
        }
        "spin" => Command::Action(UserAction::Spin),
        "create" | "host" => Command::Action(UserAction::CreateRoom),
        "join" => {
            if rest.is_empty() {
                return Err(CommandError::MissingArgument {
                    command: "join",
                    what: "a room id",
                });
            }
            Command::Action(UserAction::JoinRoom(rest.to_string()))
        }
        "copy" => Command::Action(UserAction::CopyRoomId),
        "status" | "ls" => Command::Action(UserAction::Status),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Whether an answer to a yes/no prompt means yes
pub fn is_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn parse_number<T: std::str::FromStr>(
    command: &'static str,
    what: &'static str,
    arg: &str,
) -> Result<T, CommandError> {
    if arg.is_empty() {
        return Err(CommandError::MissingArgument { command, what });
    }
    arg.parse()
        .map_err(|_| CommandError::InvalidNumber(arg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(line: &str) -> UserAction {
        match parse_line(line) {
            Ok(Some(Command::Action(action))) => action,
            other => panic!("expected an action for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!(action("add Ann Lee"), UserAction::AddName("Ann Lee".into()));
        assert_eq!(action("  ADD   Bo  "), UserAction::AddName("Bo".into()));
        assert_eq!(action("remove 1"), UserAction::RemoveName(0));
        assert_eq!(action("intensity 7"), UserAction::SetIntensity(7));
        assert_eq!(action("join abc123"), UserAction::JoinRoom("abc123".into()));
        assert_eq!(action("spin"), UserAction::Spin);
        assert_eq!(action("copy"), UserAction::CopyRoomId);
    }

    #[test]
    fn test_parse_control() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("clear"), Ok(Some(Command::Clear)));
        assert_eq!(parse_line("quit"), Ok(Some(Command::Quit)));
        assert_eq!(parse_line("help"), Ok(Some(Command::Help)));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_line("add"),
            Err(CommandError::MissingArgument {
                command: "add",
                what: "a name"
            })
        );
        assert_eq!(
            parse_line("remove 0"),
            Err(CommandError::InvalidNumber("0".into()))
        );
        assert_eq!(
            parse_line("intensity loud"),
            Err(CommandError::InvalidNumber("loud".into()))
        );
        assert_eq!(
            parse_line("intensity 300"),
            Err(CommandError::InvalidNumber("300".into()))
        );
        assert_eq!(
            parse_line("dance"),
            Err(CommandError::Unknown("dance".into()))
        );
    }

    #[test]
    fn test_confirmation() {
        assert!(is_confirmation("y"));
        assert!(is_confirmation(" YES\n"));
        assert!(!is_confirmation(""));
        assert!(!is_confirmation("nope"));
    }
}
