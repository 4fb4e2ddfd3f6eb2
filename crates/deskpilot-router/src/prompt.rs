//! Prompt rendering for the decision backends.

use deskpilot_core::HistoryEntry;

/// Longest thought shown per history line, in characters.
const THOUGHT_PREVIEW: usize = 60;

/// System prompt for backends that answer with one JSON action.
pub fn json_system_prompt(screen: (u32, u32), image: (u32, u32)) -> String {
    let (screen_w, screen_h) = screen;
    let (img_w, img_h) = image;
    format!(
        r#"You are a desktop automation agent operating a computer.
The screen resolution is {screen_w}x{screen_h}. The screenshot you see has been scaled to {img_w}x{img_h}.

## How to work
Look at the current screenshot and decide the single next action. Give coordinates in
screenshot pixels (based on {img_w}x{img_h}); they are converted to screen pixels for you.

## Output format (JSON)

### Click
{{"thought": "Click the search button", "action": "click", "x": 800, "y": 450}}

### Double click
{{"thought": "Open the file", "action": "double_click", "x": 800, "y": 450}}

### Right click
{{"thought": "Open the context menu", "action": "right_click", "x": 800, "y": 450}}

### Type text (clicks the field first when x and y are given)
{{"thought": "Type into the search box", "action": "type", "x": 800, "y": 450, "text": "hello"}}

### Keyboard shortcut
{{"thought": "Save the file", "action": "hotkey", "keys": ["ctrl", "s"]}}

### Single key
{{"thought": "Confirm with Enter", "action": "press", "key": "enter"}}

### Scroll
{{"thought": "Scroll down the list", "action": "scroll", "direction": "down", "amount": 3}}

### Drag
{{"thought": "Move the slider", "action": "drag", "x": 100, "y": 200, "to_x": 300, "to_y": 200}}

### Wait
{{"thought": "Wait for the page to load", "action": "wait"}}

### Done
{{"thought": "The task is complete", "action": "done"}}

### Fail
{{"thought": "The task cannot be completed", "action": "fail"}}

## Rules
1. Output exactly one JSON action per reply.
2. Coordinates are in the {img_w}x{img_h} screenshot. Estimate positions directly from the image.
3. If three actions in a row had no effect, try a different approach.
4. Answer done when the task is complete and fail when it cannot be completed.
5. Keep the thought short.
6. Do not click empty areas to get focus. The desktop already has focus; use the keyboard.
7. Prefer the keyboard: Ctrl+A to select, F2 to rename, Enter to confirm, Escape to close menus.
8. Aim clicks at the center of the target."#
    )
}

/// User turn for JSON backends.
pub fn json_user_prompt(
    instruction: &str,
    step: u32,
    history_summary: &str,
    recovery_hint: Option<&str>,
) -> String {
    let history = if history_summary.is_empty() {
        "(first step, no history)"
    } else {
        history_summary
    };
    let mut prompt = format!(
        "# Task: {}\n\n# Step {}\n\n# History:\n{}\n\n",
        instruction, step, history
    );
    if let Some(hint) = recovery_hint {
        prompt.push_str(&format!("# IMPORTANT: {}\n\n", hint));
    }
    prompt.push_str(
        "Based on the screenshot, output the JSON for the next action. \
         Coordinates are in screenshot pixels.",
    );
    prompt
}

/// System prompt for backends that answer with restricted script.
pub const SCRIPT_SYSTEM_PROMPT: &str = r#"You are a GUI agent. You are given a task, a screenshot of the screen and your previous interactions with the computer. Perform one action per step to complete the task. Wait explicitly for installations, page loads or running commands to finish. Do not terminate the task unless you are sure it is finished. If the task cannot be finished exactly as instructed, report failure.

For each step, provide your response in this format:
# Step: {step number}
## Thought:
{thought}
## Action:
{action}
## Code:
{code}

For the Thought section, reflect on whether the previous action worked, assess the progress so far and state why the next action is the right one.

For the Action section, describe the next action in one clear sentence. Name the target element explicitly without coordinates.

For the Code section, output PyAutoGUI code, or one of the following functions, wrapped in a code block:
- computer.wait(): wait 20 seconds for loading or running work
- computer.terminate(status="success" | "failure"): end the task with its outcome

Examples for the code section:
```python
pyautogui.click(x=0.42, y=0.17)
```
```code
computer.terminate(status="success")
```"#;

/// User turn for script backends.
pub fn script_user_prompt(
    instruction: &str,
    step: u32,
    history_summary: &str,
    recovery_hint: Option<&str>,
) -> String {
    let mut prompt = String::new();
    if !history_summary.is_empty() {
        prompt.push_str("# Previous steps:\n");
        prompt.push_str(history_summary);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!("# Step {}:\n# Task Instruction:\n{}", step, instruction));
    if let Some(hint) = recovery_hint {
        prompt.push_str(&format!("\n\nIMPORTANT: {}", hint));
    }
    prompt.push_str(
        "\n\nPlease generate the next move according to the screenshot, \
         task instruction and previous steps (if provided).\n",
    );
    prompt
}

/// One line per recent step: `Step n: <thought> → ✓|✗`.
///
/// A step counts as effective unless the verifier saw no change.
pub fn history_summary(history: &[HistoryEntry], window: usize) -> String {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .map(|entry| {
            let thought: String = entry
                .thought
                .as_deref()
                .unwrap_or("")
                .chars()
                .take(THOUGHT_PREVIEW)
                .collect();
            let mark = if entry.changed.unwrap_or(true) { "✓" } else { "✗" };
            format!("Step {}: {} → {}", entry.step, thought, mark)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
