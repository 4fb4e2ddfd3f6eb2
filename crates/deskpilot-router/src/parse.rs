//! Parsing of model replies into decisions.
//!
//! Two reply shapes are understood:
//!
//! - a single JSON action such as `{"thought": "...", "action": "click", "x": 10, "y": 20}`
//! - a sectioned reply (`## Thought:`, `## Action:`) whose last fenced code
//!   block holds restricted script or a `computer.wait()` /
//!   `computer.terminate(...)` call

use deskpilot_core::projector::Projector;
use deskpilot_core::script;
use deskpilot_core::{AgentAction, ClickKind, Decision, ScrollDirection, Sentinel};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn fence_open() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"^```(?:json)?\s*")
}

fn fence_close() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"\s*```$")
}

fn thought_field() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r#""thought"\s*:\s*".*?",\s*"#)
}

fn action_object() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r#"\{[^{}]*"action"\s*:\s*"[^"]+?"[^{}]*\}"#)
}

fn code_block() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, r"(?is)```(?:code|python)?\s*(.*?)\s*```")
}

fn section(name: &str) -> Option<Regex> {
    Regex::new(&format!(
        r"(?ms)^##\s*{}\s*:?[\n\r]+(.*?)(?:^##|\z)",
        name
    ))
    .ok()
}

/// Remove a surrounding markdown fence.
pub fn strip_fences(text: &str) -> String {
    let mut text = text.trim().to_string();
    if let Some(re) = fence_open() {
        text = re.replace(&text, "").into_owned();
    }
    if let Some(re) = fence_close() {
        text = re.replace(&text, "").into_owned();
    }
    text
}

/// Find the JSON action object in `text`.
///
/// Tries the whole text, then the text without its `thought` field (stray
/// quotes in free text break JSON), then the first `{...}` object that
/// carries an `"action"` key.
pub fn extract_json(text: &str) -> Option<Value> {
    let stripped = thought_field().map(|re| re.replace(text, "").into_owned());
    let candidates = std::iter::once(text.to_string()).chain(stripped);

    for candidate in candidates {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&candidate) {
            return Some(value);
        }
        if let Some(found) = action_object().and_then(|re| re.find(&candidate)) {
            if let Ok(value) = serde_json::from_str::<Value>(found.as_str()) {
                return Some(value);
            }
        }
    }
    None
}

/// Parse a JSON-action reply. Image coordinates are projected to screen
/// pixels with `projector` and the capture `scale`. Anything that cannot be
/// understood becomes a Fail decision.
pub fn parse_json_decision(text: &str, projector: &Projector, scale: f64) -> Decision {
    let body = strip_fences(text);
    let Some(data) = extract_json(&body) else {
        warn!("Failed to parse model JSON: {}", preview(&body));
        return Decision::new(AgentAction::Fail).with_raw_response(text);
    };

    let thought = data.get("thought").and_then(Value::as_str);
    let action = match json_action(&data, projector, scale) {
        Ok(action) => action,
        Err(reason) => {
            warn!("Unusable model action: {}", reason);
            AgentAction::Fail
        }
    };

    let mut decision = Decision::new(action).with_raw_response(text);
    if let Some(thought) = thought.filter(|t| !t.is_empty()) {
        decision = decision.with_thought(thought);
    }
    decision
}

fn json_action(data: &Value, projector: &Projector, scale: f64) -> Result<AgentAction, String> {
    let name = data.get("action").and_then(Value::as_str).unwrap_or("fail");

    let point = |kx: &str, ky: &str| -> Result<Option<(i32, i32)>, String> {
        match (
            data.get(kx).and_then(Value::as_f64),
            data.get(ky).and_then(Value::as_f64),
        ) {
            (Some(x), Some(y)) => projector
                .project(x, y, scale)
                .map(Some)
                .map_err(|e| e.to_string()),
            _ => Ok(None),
        }
    };
    let required = |kx: &str, ky: &str| -> Result<(i32, i32), String> {
        point(kx, ky)?.ok_or_else(|| format!("'{}' needs {} and {}", name, kx, ky))
    };
    let text_field = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let action = match name {
        "click" | "double_click" | "right_click" => {
            let (x, y) = required("x", "y")?;
            let kind = match name {
                "double_click" => ClickKind::Double,
                "right_click" => ClickKind::Right,
                _ => ClickKind::Single,
            };
            AgentAction::Click { x, y, kind }
        }
        "type" => {
            let at = point("x", "y")?;
            AgentAction::Type {
                text: text_field("text"),
                x: at.map(|p| p.0),
                y: at.map(|p| p.1),
            }
        }
        "hotkey" => {
            let keys: Vec<String> = data
                .get("keys")
                .and_then(Value::as_array)
                .map(|keys| {
                    keys.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if keys.is_empty() {
                return Err("hotkey without keys".into());
            }
            AgentAction::Hotkey { keys }
        }
        "press" => {
            let key = text_field("key");
            if key.is_empty() {
                return Err("press without key".into());
            }
            AgentAction::Hotkey { keys: vec![key] }
        }
        "scroll" => AgentAction::Scroll {
            direction: data
                .get("direction")
                .and_then(Value::as_str)
                .map(ScrollDirection::parse)
                .unwrap_or_default(),
            amount: data
                .get("amount")
                .and_then(Value::as_i64)
                .map(|a| a.clamp(i32::MIN as i64, i32::MAX as i64) as i32),
        },
        "drag" => {
            let (from_x, from_y) = required("x", "y")?;
            let (to_x, to_y) = required("to_x", "to_y")?;
            AgentAction::Drag {
                from_x,
                from_y,
                to_x,
                to_y,
            }
        }
        "wait" => AgentAction::Wait,
        "done" => AgentAction::Done,
        "fail" => AgentAction::Fail,
        other => return Err(format!("unknown action '{}'", other)),
    };
    Ok(action)
}

/// Parse a sectioned reply carrying script. Errors describe why the reply
/// is unusable so the caller can ask again.
pub fn parse_script_decision(
    text: &str,
    projector: &Projector,
    scale: f64,
) -> Result<Decision, String> {
    let thought = section("Thought").and_then(|re| capture(&re, text));
    let action = section("Action").and_then(|re| capture(&re, text));

    let code = code_block()
        .and_then(|re| re.captures_iter(text).last())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .ok_or_else(|| "no code blocks found".to_string())?;

    let description = thought.clone().or_else(|| action.clone());
    let decide = |action: AgentAction| {
        let mut decision = Decision::new(action).with_raw_response(text);
        if let Some(d) = &description {
            decision = decision.with_thought(d.clone());
        }
        decision
    };

    let lower = code.to_lowercase();
    if let Some(sentinel) = Sentinel::parse(&code) {
        return Ok(decide(match sentinel {
            Sentinel::Wait => AgentAction::Wait,
            Sentinel::Done => AgentAction::Done,
            Sentinel::Fail => AgentAction::Fail,
        }));
    }
    if lower.contains("computer.wait") {
        return Ok(decide(AgentAction::Wait));
    }
    if lower.contains("computer.terminate") {
        if lower.contains("fail") {
            return Ok(decide(AgentAction::Fail));
        }
        if lower.contains("success") {
            return Ok(decide(AgentAction::Done));
        }
        return Err("terminate without status".into());
    }

    if action.is_none() {
        return Err("missing action section".into());
    }

    let mut program = script::parse(&code).map_err(|e| e.to_string())?;
    let rewritten = projector
        .project_program(&mut program, scale)
        .map_err(|e| e.to_string())?;
    debug!(rewritten, "Projected script coordinates");

    Ok(decide(AgentAction::Script {
        code: program.to_string(),
    }))
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
