//! Operator input for the host binary.
//!
//! Lines read from stdin stand in for the game and chat sources a real host
//! would have:
//!
//! ```text
//! /info alice          console command
//! alice: hello there   chat line from alice
//! !shop {"item": 3}    broadcast "shop" with a JSON object body
//! #12 {"x": 1}         packet 12 with a JSON body
//! +alice / -alice      alice joins / leaves
//! ```

use bridge_core::{PacketEvent, PlayerEvent, PlayerSnapshot};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Command(String),
    Chat { sender: String, message: String },
    Broadcast { name: String, data: Map<String, Value> },
    Packet(PacketEvent),
    Join(PlayerEvent),
    Leave(PlayerEvent),
    Empty,
}

pub fn parse_line(line: &str) -> Result<ConsoleInput, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleInput::Empty);
    }

    if let Some(command) = line.strip_prefix('/') {
        let command = command.trim();
        if command.is_empty() {
            return Err("expected a command after '/'".to_string());
        }
        return Ok(ConsoleInput::Command(command.to_string()));
    }

    if let Some(rest) = line.strip_prefix('!') {
        let (name, body) = split_head(rest);
        if name.is_empty() {
            return Err("expected a broadcast name after '!'".to_string());
        }
        let data = match body {
            "" => Map::new(),
            body => match serde_json::from_str::<Value>(body) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err("broadcast body must be a JSON object".to_string()),
                Err(e) => return Err(format!("invalid broadcast body: {}", e)),
            },
        };
        return Ok(ConsoleInput::Broadcast {
            name: name.to_string(),
            data,
        });
    }

    if let Some(rest) = line.strip_prefix('#') {
        let (id, body) = split_head(rest);
        let id = id
            .parse::<u32>()
            .map_err(|_| format!("invalid packet id: {}", id))?;
        let raw = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(body).map_err(|e| format!("invalid packet body: {}", e))?
        };
        return Ok(ConsoleInput::Packet(PacketEvent { id, raw }));
    }

    if let Some(name) = line.strip_prefix('+') {
        return player(name).map(ConsoleInput::Join);
    }
    if let Some(name) = line.strip_prefix('-') {
        return player(name).map(ConsoleInput::Leave);
    }

    match line.split_once(':') {
        Some((sender, message)) if !sender.trim().is_empty() && !sender.contains(' ') => {
            Ok(ConsoleInput::Chat {
                sender: sender.trim().to_string(),
                message: message.trim().to_string(),
            })
        }
        _ => Err(format!(
            "unrecognized input '{}'; try /help, name: text, !name {{json}}",
            line
        )),
    }
}

fn split_head(rest: &str) -> (&str, &str) {
    match rest.trim().split_once(char::is_whitespace) {
        Some((head, body)) => (head, body.trim()),
        None => (rest.trim(), ""),
    }
}

fn player(name: &str) -> Result<PlayerEvent, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("expected a player name".to_string());
    }
    Ok(PlayerEvent {
        player: PlayerSnapshot::named(name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_line("  /info alice ").unwrap(),
            ConsoleInput::Command("info alice".to_string())
        );
        assert!(parse_line("/").is_err());
    }

    #[test]
    fn test_parse_chat() {
        assert_eq!(
            parse_line("alice: hi: there").unwrap(),
            ConsoleInput::Chat {
                sender: "alice".to_string(),
                message: "hi: there".to_string(),
            }
        );
        assert!(parse_line("no sender here").is_err());
    }

    #[test]
    fn test_parse_broadcast() {
        match parse_line(r#"!shop {"item": 3}"#).unwrap() {
            ConsoleInput::Broadcast { name, data } => {
                assert_eq!(name, "shop");
                assert_eq!(data["item"], json!(3));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            parse_line("!ping").unwrap(),
            ConsoleInput::Broadcast {
                name: "ping".to_string(),
                data: Map::new(),
            }
        );
        assert!(parse_line("!shop [1]").is_err());
        assert!(parse_line("!").is_err());
    }

    #[test]
    fn test_parse_packet_and_players() {
        assert_eq!(
            parse_line("#12 {\"x\": 1}").unwrap(),
            ConsoleInput::Packet(PacketEvent {
                id: 12,
                raw: json!({"x": 1}),
            })
        );
        assert!(parse_line("#abc").is_err());
        assert!(matches!(parse_line("+alice").unwrap(), ConsoleInput::Join(e) if e.player.name == "alice"));
        assert!(matches!(parse_line("-bob").unwrap(), ConsoleInput::Leave(e) if e.player.name == "bob"));
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(parse_line("   ").unwrap(), ConsoleInput::Empty);
    }
}
