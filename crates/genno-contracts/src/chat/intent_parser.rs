use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, MULTI_PATH_COMMANDS, NO_ARG_COMMANDS, SINGLE_PATH_COMMANDS, TEXT_ARG_COMMANDS,
};

/// One parsed line of studio input.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub text: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            text: None,
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn arg_list(&self, key: &str) -> Vec<String> {
        self.command_args
            .get(key)
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    parse_path_args(arg).join(" ")
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, TEXT_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("text".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, MULTI_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "paths".to_string(),
                    Value::Array(parse_path_args(arg).into_iter().map(Value::String).collect()),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    // Bare text is a revision instruction when an image exists, otherwise
    // extra scene detail; the caller knows which.
    let mut intent = Intent::new("text", text);
    intent.text = Some(raw_trimmed.to_string());
    intent
}
