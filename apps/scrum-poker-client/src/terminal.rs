use std::fmt::Write as _;

use scrum_poker_client::{ConnectionState, SessionView, ViewObserver, ViewTransition};
use scrum_poker_core::{options, AverageDisplay, Vote};

pub const HELP: &str = "commands: vote N | name NAME | options 1,2,3 | clear | show | sit | stand | help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Vote(u32),
    Name(String),
    Options(String),
    Clear,
    Show,
    Sit,
    Stand,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let command = match word.to_ascii_lowercase().as_str() {
        "vote" | "v" => {
            let value = rest
                .parse::<u32>()
                .map_err(|_| format!("not a vote value: {rest:?}"))?;
            Command::Vote(value)
        }
        "name" => Command::Name(rest.to_string()),
        "options" | "opts" => Command::Options(rest.to_string()),
        "clear" => Command::Clear,
        "show" | "reveal" => Command::Show,
        "sit" => Command::Sit,
        "stand" => Command::Stand,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command {other:?}; {HELP}")),
    };
    Ok(Some(command))
}

pub fn render(view: &SessionView) -> String {
    let mut out = String::new();
    if !view.synchronized {
        out.push_str("waiting for the session state...\n");
        return out;
    }
    let own_id = view.own.client_id.as_ref();
    let width = view
        .members
        .iter()
        .map(|member| display_name(&member.display_name).chars().count())
        .max()
        .unwrap_or(0)
        .max(8);

    for member in &view.members {
        let is_self = Some(&member.client_id) == own_id;
        let vote = if is_self { view.own.vote } else { member.vote };
        let shown = match vote {
            Vote::NoVote => "No Vote".to_string(),
            Vote::Cast(_) if !view.votes_visible && !is_self => "?".to_string(),
            Vote::Cast(value) => value.to_string(),
        };
        let mut line = format!("  {:width$}  {shown}", display_name(&member.display_name));
        if is_self {
            line.push_str(" (you");
            if view.own.pending {
                line.push_str(", sending");
            }
            line.push(')');
        }
        if !member.active {
            line.push_str(" [not voting]");
        }
        let _ = writeln!(out, "{}", line.trim_end());
    }

    let _ = writeln!(out, "options: {}", options::format(&view.vote_options));
    if view.votes_visible {
        let _ = writeln!(out, "votes revealed, average: {}", AverageDisplay(view.average()));
    } else {
        let active = view.members.iter().filter(|member| member.active).count();
        let _ = writeln!(out, "votes hidden, {}/{} cast", view.votes_cast(), active);
    }
    out
}

pub fn describe_status(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connecting => "connecting...",
        ConnectionState::Open => "connected",
        ConnectionState::Reconnecting => "connection lost, reconnecting...",
        ConnectionState::FatalError => "connection failed",
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "(no name)"
    } else {
        name
    }
}

/// Prints a line when a revealed round agrees.
pub struct Celebration;

impl ViewObserver for Celebration {
    fn on_transition(&mut self, _view: &SessionView, transition: &ViewTransition) {
        if let ViewTransition::Consensus(value) = transition {
            println!("*** everyone agrees on {value} ***");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrum_poker_client::view::OwnState;
    use scrum_poker_core::{ClientId, Member};

    fn member(id: &str, name: &str, vote: Vote, active: bool) -> Member {
        Member {
            client_id: ClientId::from(id),
            display_name: name.into(),
            vote,
            active,
        }
    }

    fn view(visible: bool) -> SessionView {
        SessionView {
            synchronized: true,
            members: vec![
                member("a", "Ann", Vote::Cast(3), true),
                member("b", "Bob", Vote::Cast(5), true),
                member("c", "Cy", Vote::NoVote, true),
            ],
            vote_options: vec![1, 3, 5],
            votes_visible: visible,
            own: OwnState {
                client_id: Some(ClientId::from("a")),
                display_name: Some("Ann".into()),
                vote: Vote::Cast(3),
                pending: false,
                active: true,
            },
        }
    }

    #[test_timeout::timeout]
    fn parses_commands() {
        assert_eq!(parse_command("  vote 5 "), Ok(Some(Command::Vote(5))));
        assert_eq!(
            parse_command("name Ann Lee"),
            Ok(Some(Command::Name("Ann Lee".into())))
        );
        assert_eq!(
            parse_command("options 1, 2, 3"),
            Ok(Some(Command::Options("1, 2, 3".into())))
        );
        assert_eq!(parse_command("SHOW"), Ok(Some(Command::Show)));
        assert_eq!(parse_command(""), Ok(None));
        assert!(parse_command("vote five").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test_timeout::timeout]
    fn hidden_round_masks_other_votes() {
        let out = render(&view(false));
        assert!(out.contains("Ann       3 (you)"), "{out}");
        assert!(out.contains("Bob       ?"), "{out}");
        assert!(out.contains("Cy        No Vote"), "{out}");
        assert!(out.contains("votes hidden, 2/3 cast"), "{out}");
    }

    #[test_timeout::timeout]
    fn revealed_round_shows_values_and_average() {
        let out = render(&view(true));
        assert!(out.contains("Bob       5"), "{out}");
        assert!(out.contains("average: 4"), "{out}");
    }

    #[test_timeout::timeout]
    fn average_without_votes_is_not_available() {
        let mut view = view(true);
        for member in &mut view.members {
            member.vote = Vote::NoVote;
        }
        view.own.vote = Vote::NoVote;
        assert!(render(&view).contains("average: n/a"));
    }
}
