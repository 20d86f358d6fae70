use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::command_registry::{
    CommandSpec, DRAW_COMMAND, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, REGION_COMMAND,
    SINGLE_PATH_COMMANDS,
};
use crate::session::MarkerColor;

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.command_args.insert(key.to_string(), value.into());
        self
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.command_args.get(key).and_then(Value::as_f64)
    }

    /// `[x, y]` pairs stored under `points` by `/draw`.
    pub fn points(&self) -> Vec<(f32, f32)> {
        self.command_args
            .get("points")
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .filter_map(|point| {
                        let x = point.get(0).and_then(Value::as_f64)?;
                        let y = point.get(1).and_then(Value::as_f64)?;
                        Some((x as f32, y as f32))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn find_spec(command: &str, specs: &[CommandSpec]) -> Option<CommandSpec> {
    specs.iter().copied().find(|spec| spec.command == command)
}

fn parse_single_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Err(_) => arg.trim().to_string(),
    }
}

fn parse_region(arg: &str, raw: &str) -> Intent {
    let mut parts = arg.splitn(2, char::is_whitespace);
    let color_text = parts.next().unwrap_or_default();
    let text = parts.next().unwrap_or_default().trim();
    if color_text.is_empty() {
        return Intent::new("invalid", raw).with_arg("error", "/region requires a color");
    }
    match color_text.parse::<MarkerColor>() {
        Ok(color) => Intent::new("set_region", raw)
            .with_arg("color", color.label().to_ascii_lowercase())
            .with_arg("text", text),
        Err(err) => Intent::new("invalid", raw).with_arg("error", err),
    }
}

fn parse_point(token: &str) -> Option<Value> {
    let (x, y) = token.split_once(',')?;
    let x = x.trim().parse::<f64>().ok().filter(|value| value.is_finite())?;
    let y = y.trim().parse::<f64>().ok().filter(|value| value.is_finite())?;
    Some(json!([x, y]))
}

fn parse_draw(arg: &str, raw: &str) -> Intent {
    let usage = "/draw requires <color> <radius> <x,y> [x,y ...]";
    let mut tokens = arg.split_whitespace();
    let (Some(color_text), Some(radius_text)) = (tokens.next(), tokens.next()) else {
        return Intent::new("invalid", raw).with_arg("error", usage);
    };
    let color = match color_text.parse::<MarkerColor>() {
        Ok(color) => color,
        Err(err) => return Intent::new("invalid", raw).with_arg("error", err),
    };
    let Some(radius) = radius_text
        .parse::<f64>()
        .ok()
        .filter(|radius| radius.is_finite() && *radius > 0.0)
    else {
        return Intent::new("invalid", raw)
            .with_arg("error", format!("invalid brush radius '{radius_text}'"));
    };
    let mut points = Vec::new();
    for token in tokens {
        match parse_point(token) {
            Some(point) => points.push(point),
            None => {
                return Intent::new("invalid", raw)
                    .with_arg("error", format!("invalid point '{token}', expected x,y"))
            }
        }
    }
    if points.is_empty() {
        return Intent::new("invalid", raw).with_arg("error", usage);
    }
    Intent::new("draw_stroke", raw)
        .with_arg("color", color.label().to_ascii_lowercase())
        .with_arg("radius", radius)
        .with_arg("points", Value::Array(points))
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
            let remainder = &slash_tail[command_len..];
            let arg = remainder.trim();

            if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
                let intent = Intent::new(spec.action, text);
                return match spec.arg_key {
                    Some(key) => intent.with_arg(key, arg),
                    None => intent,
                };
            }

            if let Some(spec) = find_spec(&command, SINGLE_PATH_COMMANDS) {
                return Intent::new(spec.action, text)
                    .with_arg(spec.arg_key.unwrap_or("path"), parse_single_path_arg(arg));
            }

            if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
                return Intent::new(spec.action, text);
            }

            if command == REGION_COMMAND {
                return parse_region(arg, text);
            }

            if command == DRAW_COMMAND {
                return parse_draw(arg, text);
            }

            return Intent::new("unknown", text)
                .with_arg("command", command)
                .with_arg("arg", arg);
        }
    }

    let mut intent = Intent::new("generate", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}
