// Slash-command handling.
//
// Commands start with `/` and work in every session state; anything else a
// client sends is either a move token (active players) or chat. Matching
// is case-insensitive. Unknown commands get a single error line and the
// session continues.
//
// `run` gathers whatever it needs under the registry lock, releases it,
// and only then writes to sockets. `/quit` from a seated player is routed
// through the match controller (as a `Quit` input event) so the game ends
// on the controller's single path; everyone else is disconnected directly.

use std::sync::{Arc, Mutex};

use log::debug;

use crate::client::{PlayerEvent, Role};
use crate::lock;
use crate::registry::Registry;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Quit,
    Chat(String),
    Unknown(String),
}

/// Parse a line as a command. `None` means the line is not a command at
/// all (no leading `/`).
pub fn parse(line: &str) -> Option<Command> {
    let trimmed = line.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let (word, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (trimmed, ""),
    };
    Some(match word.to_ascii_lowercase().as_str() {
        "/help" => Command::Help,
        "/status" => Command::Status,
        "/quit" => Command::Quit,
        "/chat" => Command::Chat(rest.to_string()),
        _ => Command::Unknown(word.to_string()),
    })
}

/// What the main loop should do after a command ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandEffect {
    None,
    /// Remove the client now (graceful `/quit` outside a match).
    Disconnect,
}

pub fn run(registry: &Arc<Mutex<Registry>>, id: &str, command: Command) -> CommandEffect {
    match command {
        Command::Help => {
            let found = {
                let reg = lock(registry);
                reg.get(id).map(|c| (c.writer.clone(), c.role))
            };
            if let Some((writer, role)) = found {
                writer.system(help_line(role));
            }
            CommandEffect::None
        }
        Command::Status => {
            let found = {
                let reg = lock(registry);
                reg.get(id)
                    .map(|c| (c.writer.clone(), status_line(&reg, id, c.role)))
            };
            if let Some((writer, status)) = found {
                writer.system(&status);
            }
            CommandEffect::None
        }
        Command::Chat(text) => {
            let found = {
                let reg = lock(registry);
                reg.get(id).map(|c| {
                    (
                        c.writer.clone(),
                        c.role.chat_label(),
                        reg.writers_except(id),
                    )
                })
            };
            let Some((writer, label, recipients)) = found else {
                return CommandEffect::None;
            };
            if text.is_empty() {
                writer.error_line("Nothing to send. Usage: /chat <message>");
                return CommandEffect::None;
            }
            let line = format!("[CHAT] {label} {id}: {text}");
            for recipient in recipients {
                recipient.chat(&line);
            }
            CommandEffect::None
        }
        Command::Quit => {
            let seated = {
                let mut reg = lock(registry);
                let in_match = reg.match_running();
                match reg.get_mut(id) {
                    Some(c) if c.role == Role::ActivePlayer && in_match => {
                        c.quitting = true;
                        Some((c.writer.clone(), c.input_tx.clone(), true))
                    }
                    Some(c) => {
                        c.quitting = true;
                        Some((c.writer.clone(), None, false))
                    }
                    None => None,
                }
            };
            match seated {
                Some((writer, input_tx, in_match)) => {
                    if in_match {
                        writer.system("Goodbye! Your opponent wins by forfeit.");
                        if let Some(tx) = input_tx {
                            // Blocking send is safe here: the controller
                            // drains both channels on every timer slice.
                            if tx.send(PlayerEvent::Quit).is_err() {
                                debug!("{id}: quit raced the end of the match");
                                return CommandEffect::Disconnect;
                            }
                        }
                        CommandEffect::None
                    } else {
                        writer.system("Goodbye!");
                        CommandEffect::Disconnect
                    }
                }
                None => CommandEffect::Disconnect,
            }
        }
        Command::Unknown(word) => {
            let found = {
                let reg = lock(registry);
                reg.get(id).map(|c| c.writer.clone())
            };
            if let Some(writer) = found {
                writer.error_line(&format!("Unknown command '{word}'. Type /help."));
            }
            CommandEffect::None
        }
    }
}

fn help_line(role: Role) -> &'static str {
    match role {
        Role::ActivePlayer => {
            "Commands: /help, /status, /chat <text>, /quit. When prompted, enter a coordinate like B5 (or 'quit' to concede)."
        }
        Role::WaitingPlayer | Role::WaitingSpectator => {
            "Commands: /help, /status, /chat <text>, /quit. Anything else you type is sent as chat while you wait."
        }
        Role::ActiveSpectator => {
            "Commands: /help, /status, /chat <text>, /quit. You're watching the current match; anything else you type is sent as chat."
        }
    }
}

fn status_line(reg: &Registry, id: &str, role: Role) -> String {
    match role {
        Role::ActivePlayer => {
            let opponent = opponent_of(reg, id);
            match opponent {
                Some(op) => format!("You are in a match against {op}."),
                None => "You are in a match.".to_string(),
            }
        }
        Role::ActiveSpectator => match reg.position(id) {
            Some(p) => format!(
                "Watching the current match. Queue position {p} of {}.",
                reg.queue_size()
            ),
            None => "Watching the current match.".to_string(),
        },
        Role::WaitingPlayer | Role::WaitingSpectator => match reg.position(id) {
            Some(p) => format!("Waiting in the queue at position {p} of {}.", reg.queue_size()),
            None => "Waiting in the queue.".to_string(),
        },
    }
}

fn opponent_of<'a>(reg: &'a Registry, id: &str) -> Option<&'a str> {
    reg.active_player_ids()
        .into_iter()
        .find(|other| *other != id)
}
