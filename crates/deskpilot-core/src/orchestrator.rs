//! # Task Orchestrator
//!
//! Owns the step loop of the single active task:
//!
//! ```text
//!         ┌──────────── next step ◄──────────────────────────────┐
//!         ▼                                                       │
//!  timeout? ─► stop? ─► collect ─► recover ─► predict ─► compile ─┤
//!                                                        │        │
//!                                        send? ─► confirm gate    │
//!                                                        ▼        │
//!                                                     execute ─► settle ─► verify
//! ```
//!
//! Stop and confirm requests coming from the API only raise the task's stop
//! flag or resolve its confirmation gate. Every status transition is made
//! here, by the loop that owns the task.

use crate::action::{AgentAction, Decision, Sentinel};
use crate::compiler::ActionCompiler;
use crate::config::CoreConfig;
use crate::context::{ContextSource, Desktop};
use crate::executor::{ExecutionResult, SandboxedExecutor};
use crate::gate::ConfirmOutcome;
use crate::preload::ClipboardPreload;
use crate::recovery::RecoveryManager;
use crate::registry::TaskRegistry;
use crate::router::{DecisionRouter, HistoryEntry};
use crate::send::SendDetector;
use crate::task::{StepRecord, TaskHandle, TaskRequest, TaskSpec, TaskStatus};
use crate::verifier::EffectVerifier;
use crate::{CoreError, Result};
use deskpilot_desktop::Screenshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Instruction used for the rounds that follow a confirmed send.
pub const SEND_VERIFY_INSTRUCTION: &str = "Check whether the message was sent successfully. \
The input box should be empty with no pending content, and the sent content should be visible \
in the conversation. If it was sent, answer done. Otherwise click the send button again.";

/// Pause between a corrective retry and the following capture.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Terminal status and message produced by a task run.
type Outcome = (TaskStatus, String);

/// Drives tasks from submission to a terminal state.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<CoreConfig>,
    desktop: Desktop,
    context: Arc<dyn ContextSource>,
    router: Arc<dyn DecisionRouter>,
    send_detector: Arc<dyn SendDetector>,
    registry: Arc<dyn TaskRegistry>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<CoreConfig>,
        desktop: Desktop,
        context: Arc<dyn ContextSource>,
        router: Arc<dyn DecisionRouter>,
        send_detector: Arc<dyn SendDetector>,
        registry: Arc<dyn TaskRegistry>,
    ) -> Self {
        Self {
            config,
            desktop,
            context,
            router,
            send_detector,
            registry,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Validate and register a task, then start it in the background.
    pub async fn submit(&self, request: TaskRequest) -> Result<Arc<TaskHandle>> {
        let spec = TaskSpec::from_request(request, &self.config.agent)?;
        let task = Arc::new(TaskHandle::new(spec));
        self.registry.insert(task.clone()).await?;

        info!(
            task_id = %task.id(),
            max_steps = task.spec().max_steps,
            "Task created: {}",
            preview(&task.spec().prompt)
        );

        let run = TaskRun::new(self, task.clone());
        let worker = tokio::spawn(run.drive());
        let watched = task.clone();
        tokio::spawn(async move {
            let finished = match worker.await {
                Ok(Ok((status, message))) => watched.finish(status, message),
                Ok(Err(e)) => {
                    error!(task_id = %watched.id(), "Task execution error: {}", e);
                    watched.finish(TaskStatus::Error, e.to_string())
                }
                Err(e) => {
                    error!(task_id = %watched.id(), "Task worker aborted: {}", e);
                    watched.finish(TaskStatus::Error, format!("Unexpected error: {}", e))
                }
            };
            if !finished {
                debug!(task_id = %watched.id(), "Task already finished");
            }
        });

        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<TaskHandle>> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| CoreError::NotFound("Task not found".into()))
    }

    /// Ask a task to stop. A finished task is left alone.
    pub async fn stop(&self, id: Uuid) -> Result<String> {
        let task = self.get(id).await?;
        let status = task.status();
        if !status.is_active() {
            return Ok(format!("Task is not running (status: {})", status));
        }
        info!(task_id = %id, "Stop requested");
        task.request_stop();
        Ok("Task stopped successfully".into())
    }

    /// Answer a pending send confirmation.
    pub async fn confirm(&self, id: Uuid, confirmed: bool) -> Result<String> {
        let task = self.get(id).await?;
        let status = task.status();
        if status != TaskStatus::AwaitingConfirm || !task.gate().resolve(confirmed) {
            return Ok(format!(
                "Task is not awaiting confirmation (status: {})",
                status
            ));
        }
        info!(task_id = %id, confirmed, "Send confirmation answered");
        Ok(if confirmed {
            "Task confirmed successfully".into()
        } else {
            "Task rejected successfully".into()
        })
    }

    /// A fresh capture, independent of any task.
    pub async fn capture(&self) -> Result<Screenshot> {
        self.context.capture().await
    }
}

/// Per-task state of one run of the step loop.
struct TaskRun {
    config: Arc<CoreConfig>,
    desktop: Desktop,
    context: Arc<dyn ContextSource>,
    router: Arc<dyn DecisionRouter>,
    send_detector: Arc<dyn SendDetector>,
    task: Arc<TaskHandle>,
    preload: Arc<ClipboardPreload>,
    compiler: ActionCompiler,
    executor: SandboxedExecutor,
    verifier: EffectVerifier,
    recovery: RecoveryManager,
    history: Vec<HistoryEntry>,
    stop: watch::Receiver<bool>,
}

impl TaskRun {
    fn new(orchestrator: &Orchestrator, task: Arc<TaskHandle>) -> Self {
        let config = orchestrator.config.clone();
        let desktop = orchestrator.desktop.clone();
        let preload = Arc::new(ClipboardPreload::new());
        Self {
            compiler: ActionCompiler::new(&config.sandbox),
            executor: SandboxedExecutor::new(desktop.clone(), preload.clone(), &config.sandbox),
            verifier: EffectVerifier::new(&config.verifier),
            recovery: RecoveryManager::new(desktop.windows.clone()),
            history: Vec::new(),
            stop: task.stop_signal(),
            context: orchestrator.context.clone(),
            router: orchestrator.router.clone(),
            send_detector: orchestrator.send_detector.clone(),
            config,
            desktop,
            preload,
            task,
        }
    }

    async fn drive(mut self) -> Result<Outcome> {
        let id = self.task.id();
        self.router.reset().await;
        self.install_preload().await;
        self.task.set_status(TaskStatus::Running);
        info!(task_id = %id, "Task started");

        let started = Instant::now();
        let timeout = self.task.spec().timeout;
        let max_steps = self.task.spec().max_steps;
        let mut expected_app: Option<String> = None;

        for step in 1..=max_steps {
            if started.elapsed() >= timeout {
                warn!(task_id = %id, step, "Task timed out");
                return Ok((
                    TaskStatus::Timeout,
                    format!("Task timeout after {} seconds", timeout.as_secs()),
                ));
            }
            if self.task.stop_requested() {
                return Ok(stopped());
            }

            info!(task_id = %id, "Step {}/{}", step, max_steps);
            let mut context = self.context.collect().await?;

            let expected = expected_app.take().unwrap_or_else(|| context.app.clone());
            let recovery = self.recovery.check_and_recover(step, &expected).await;
            if let Some(hint) = &recovery.hint {
                info!(task_id = %id, step, needs_recovery = recovery.needs_recovery, "Recovery hint: {}", hint);
            }
            self.recovery.save_checkpoint(step, context.screenshot.clone());
            context.recovery_hint = recovery.hint;
            expected_app = Some(context.app.clone());

            let prompt = self.task.spec().prompt.clone();
            let decision = self
                .router
                .predict(&prompt, &context, &self.history, step)
                .await;
            let script = self.compiler.compile(&decision.action);
            debug!(task_id = %id, step, "Compiled {}: {}", decision.action.kind(), preview(&script));
            self.history.push(history_entry(step, &decision, &script));

            let gated = self.task.spec().confirm_before_send
                && !decision.action.is_sentinel()
                && self.send_detector.is_send(&decision);
            let before = Arc::new(context.screenshot.clone());

            if gated {
                if let Some(outcome) = self.await_confirmation().await {
                    self.record(step, &decision, &script, &before, None, None);
                    return Ok(outcome);
                }
            }

            let result = self.executor.execute(&script).await;
            match result.sentinel() {
                Some(Sentinel::Done) => {
                    self.record(step, &decision, &script, &before, None, None);
                    return Ok((TaskStatus::Completed, "Task completed successfully".into()));
                }
                Some(Sentinel::Wait) => {
                    self.record(step, &decision, &script, &before, None, None);
                    info!(task_id = %id, "Waiting {}s", self.config.agent.wait_delay_secs);
                    self.pause(self.config.agent.wait_delay()).await;
                    continue;
                }
                _ if !result.success => {
                    self.record(step, &decision, &script, &before, None, None);
                    return Ok((TaskStatus::Failed, failure_message(&result)));
                }
                _ => {}
            }

            if self.pause(self.config.agent.settle_delay()).await {
                self.record(step, &decision, &script, &before, None, None);
                continue;
            }

            let changed = self.verify_effect(&before, &decision.action).await;
            if let Some(entry) = self.history.last_mut() {
                entry.changed = changed;
            }
            self.record(step, &decision, &script, &before, None, changed);

            if gated {
                return self.verify_send(step).await;
            }
        }

        warn!(task_id = %id, "Reached maximum steps");
        Ok((
            TaskStatus::Failed,
            format!("Reached maximum steps ({})", max_steps),
        ))
    }

    /// Load the preload payloads for this task into the clipboard.
    async fn install_preload(&self) {
        let spec = self.task.spec();
        self.preload
            .set(spec.clipboard_preload.clone(), spec.file_preload.clone());

        if let Some(text) = &spec.clipboard_preload {
            info!(task_id = %self.task.id(), "Clipboard preloaded ({} chars)", text.chars().count());
            if let Err(e) = self.desktop.clipboard.set_text(text).await {
                warn!("Failed to preload clipboard text: {}", e);
            }
        } else if let Some(path) = &spec.file_preload {
            info!(task_id = %self.task.id(), "Clipboard preloaded with file: {}", path.display());
            if let Err(e) = self.desktop.clipboard.set_file(path).await {
                warn!("Failed to preload clipboard file: {}", e);
            }
        }
    }

    /// Hold a detected send until the user answers. `None` means confirmed.
    async fn await_confirmation(&mut self) -> Option<Outcome> {
        let id = self.task.id();
        let pending = self.task.gate().arm();
        self.task.set_status(TaskStatus::AwaitingConfirm);
        if self.task.stop_requested() {
            return Some(stopped());
        }

        let timeout = self.config.agent.confirm_timeout();
        info!(task_id = %id, "Send action detected, awaiting confirmation");
        match pending.wait(timeout).await {
            ConfirmOutcome::Confirmed => {
                info!(task_id = %id, "Send confirmed");
                self.task.set_status(TaskStatus::Running);
                None
            }
            ConfirmOutcome::Rejected if self.task.stop_requested() => Some(stopped()),
            ConfirmOutcome::Rejected => {
                info!(task_id = %id, "Send rejected");
                Some((TaskStatus::Cancelled, "Send action rejected by user".into()))
            }
            ConfirmOutcome::TimedOut => {
                warn!(task_id = %id, "Confirmation timed out");
                Some((
                    TaskStatus::Timeout,
                    format!("Confirmation timeout ({})", describe_duration(timeout)),
                ))
            }
        }
    }

    /// Ask the model to confirm a send went through, letting it correct
    /// the screen for a bounded number of rounds.
    async fn verify_send(&mut self, send_step: u32) -> Result<Outcome> {
        let id = self.task.id();
        let rounds = self.config.agent.send_verify_rounds;

        for round in 0..rounds {
            if self.pause(self.config.agent.send_verify_delay()).await {
                return Ok(stopped());
            }

            let step = send_step + round + 1;
            info!(task_id = %id, "Send verification round {}/{}", round + 1, rounds);
            let context = self.context.collect().await?;
            let decision = self
                .router
                .predict(SEND_VERIFY_INSTRUCTION, &context, &self.history, step)
                .await;
            let script = self.compiler.compile(&decision.action);
            self.history.push(history_entry(step, &decision, &script));
            let before = Arc::new(context.screenshot);

            match decision.action {
                AgentAction::Done => {
                    self.record(step, &decision, &script, &before, Some(round + 1), None);
                    return Ok((
                        TaskStatus::Completed,
                        "Task completed successfully (send verified)".into(),
                    ));
                }
                AgentAction::Fail => {
                    self.record(step, &decision, &script, &before, Some(round + 1), None);
                    break;
                }
                _ => {
                    let result = self.executor.execute(&script).await;
                    if !result.success {
                        warn!(task_id = %id, "Corrective action failed: {}", failure_message(&result));
                    }
                    self.record(step, &decision, &script, &before, Some(round + 1), None);
                }
            }
        }

        Ok((
            TaskStatus::Failed,
            "Send verification failed after retries".into(),
        ))
    }

    /// Compare the screen before and after an action, retrying once with a
    /// corrected action when nothing changed.
    async fn verify_effect(&mut self, before: &Screenshot, action: &AgentAction) -> Option<bool> {
        if !self.config.verifier.enabled || !action.is_verifiable() {
            return None;
        }

        let after = match self.context.capture().await {
            Ok(shot) => shot,
            Err(e) => {
                warn!("Effect verification skipped: {}", e);
                return None;
            }
        };
        let mut check = self
            .verifier
            .check_effect(&before.image, &after.image, action);

        let mut attempts = 0;
        while !check.changed && attempts < self.verifier.retry_budget() {
            let Some(retry) = self.verifier.retry_action(action, &check.suggestion) else {
                break;
            };
            attempts += 1;
            info!(ratio = check.ratio, "No visible effect, retrying as {:?}", retry);

            let result = self.executor.execute(&self.compiler.compile(&retry)).await;
            if !result.success {
                warn!("Retry failed: {}", failure_message(&result));
                break;
            }
            self.pause(RETRY_DELAY).await;

            match self.context.capture().await {
                Ok(after) => check = self.verifier.check_effect(&before.image, &after.image, &retry),
                Err(e) => {
                    warn!("Effect verification aborted: {}", e);
                    break;
                }
            }
        }

        Some(check.changed)
    }

    /// Sleep for `duration`, waking early on a stop request. Returns whether
    /// a stop was requested.
    async fn pause(&mut self, duration: Duration) -> bool {
        if *self.stop.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = self.stop.wait_for(|stop| *stop) => changed.is_ok(),
        }
    }

    fn record(
        &self,
        step: u32,
        decision: &Decision,
        script: &str,
        before: &Arc<Screenshot>,
        verify_round: Option<u32>,
        changed: Option<bool>,
    ) {
        self.task.push_step(StepRecord {
            step,
            thought: decision.thought.clone(),
            action: script.to_string(),
            response: decision.raw_response.clone(),
            verify_round,
            changed,
            screenshot: Some(before.clone()),
        });
        self.task.set_steps(step);
    }
}

fn history_entry(step: u32, decision: &Decision, script: &str) -> HistoryEntry {
    HistoryEntry {
        step,
        thought: decision.thought.clone(),
        action: script.to_string(),
        raw_response: decision.raw_response.clone(),
        changed: None,
    }
}

fn stopped() -> Outcome {
    (TaskStatus::Stopped, "Task stopped by user".into())
}

fn failure_message(result: &ExecutionResult) -> String {
    match (&result.error, &result.message) {
        (Some(error), Some(detail)) if result.sentinel().is_none() => {
            format!("{}: {}", error, detail)
        }
        (Some(error), _) => error.clone(),
        (None, _) => "Execution failed".into(),
    }
}

fn describe_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} min", secs / 60)
    } else {
        format!("{} s", secs)
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 80;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let head: String = text.chars().take(LIMIT).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ClickKind, ScrollDirection};
    use crate::context::DesktopContextSource;
    use crate::registry::BoundedRegistry;
    use crate::router::mock::ScriptedRouter;
    use crate::send::PatternSendDetector;
    use crate::task::TaskSnapshot;
    use deskpilot_desktop::capture::mock::{solid_frame, MockCapture};
    use deskpilot_desktop::clipboard::mock::{ClipboardContent, MockClipboard};
    use deskpilot_desktop::input::mock::MockSimulator;
    use deskpilot_desktop::windows::mock::MockWindowManager;
    use deskpilot_desktop::CaptureSettings;

    struct Harness {
        orchestrator: Orchestrator,
        router: Arc<ScriptedRouter>,
        input: Arc<MockSimulator>,
        clipboard: Arc<MockClipboard>,
    }

    fn harness_with(decisions: Vec<Decision>, capture: MockCapture) -> Harness {
        let router = Arc::new(ScriptedRouter::new(decisions));
        let input = Arc::new(MockSimulator::new());
        let clipboard = Arc::new(MockClipboard::new());
        let desktop = Desktop {
            capture: Arc::new(capture),
            input: input.clone(),
            clipboard: clipboard.clone(),
            windows: Arc::new(MockWindowManager::new("notepad.exe", "Untitled - Notepad")),
        };
        let config = Arc::new(CoreConfig::default());
        let context = Arc::new(DesktopContextSource::new(
            desktop.clone(),
            CaptureSettings::default(),
        ));
        let orchestrator = Orchestrator::new(
            config.clone(),
            desktop,
            context,
            router.clone(),
            Arc::new(PatternSendDetector::default()),
            Arc::new(BoundedRegistry::new(config.agent.max_tasks)),
        );
        Harness {
            orchestrator,
            router,
            input,
            clipboard,
        }
    }

    fn harness(decisions: Vec<Decision>) -> Harness {
        harness_with(decisions, MockCapture::solid(800, 600, 40))
    }

    fn click(x: i32, y: i32) -> Decision {
        Decision::new(AgentAction::Click {
            x,
            y,
            kind: ClickKind::Single,
        })
    }

    fn send_click() -> Decision {
        click(700, 550).with_thought("Click send to deliver the message")
    }

    async fn wait_for(task: &TaskHandle, status: TaskStatus) {
        for _ in 0..10_000 {
            if task.status() == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("task never reached {}", status);
    }

    async fn finished(task: &TaskHandle) -> TaskSnapshot {
        for _ in 0..10_000 {
            if task.status().is_terminal() {
                return task.snapshot();
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("task never finished");
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_done() {
        let h = harness(vec![
            click(100, 200).with_thought("Open the menu"),
            Decision::new(AgentAction::Done),
        ]);
        let task = h.orchestrator.submit(TaskRequest::new("open the menu")).await.unwrap();
        let snapshot = finished(&task).await;

        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result.as_deref(), Some("Task completed successfully"));
        assert_eq!(snapshot.steps, 2);
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.history[0].action, "pyautogui.click(x=100, y=200)");
        assert_eq!(snapshot.history[1].action, "DONE");
        // Solid frames never change, so the click was retried once
        assert_eq!(snapshot.history[0].changed, Some(false));
        let clicks = h
            .input
            .actions()
            .await
            .into_iter()
            .filter(|a| a.starts_with("click"))
            .count();
        assert_eq!(clicks, 2);
        assert_eq!(
            h.router.calls(),
            vec![("open the menu".to_string(), 1), ("open the menu".to_string(), 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_visible_effect_is_not_retried() {
        let capture = MockCapture::with_frames(vec![
            solid_frame(800, 600, 40),
            solid_frame(800, 600, 200),
        ]);
        let h = harness_with(
            vec![click(10, 10), Decision::new(AgentAction::Done)],
            capture,
        );
        let task = h.orchestrator.submit(TaskRequest::new("click")).await.unwrap();
        let snapshot = finished(&task).await;

        assert_eq!(snapshot.history[0].changed, Some(true));
        assert_eq!(h.input.actions().await.iter().filter(|a| a.starts_with("click")).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_decision() {
        let h = harness(vec![Decision::fail("no backend")]);
        let task = h.orchestrator.submit(TaskRequest::new("do it")).await.unwrap();
        let snapshot = finished(&task).await;

        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("Task failed"));
        assert_eq!(snapshot.result, None);
        assert_eq!(snapshot.history[0].response.as_deref(), Some("no backend"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_budget_exhausted() {
        let h = harness(vec![
            click(1, 1),
            Decision::new(AgentAction::Scroll {
                direction: ScrollDirection::Down,
                amount: None,
            }),
        ]);
        let request = TaskRequest {
            max_steps: Some(2),
            ..TaskRequest::new("keep going")
        };
        let task = h.orchestrator.submit(request).await.unwrap();
        let snapshot = finished(&task).await;

        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("Reached maximum steps (2)"));
        assert_eq!(snapshot.steps, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_active_task() {
        let h = harness(vec![Decision::new(AgentAction::Wait); 5]);
        let first = h.orchestrator.submit(TaskRequest::new("first")).await.unwrap();

        let err = h.orchestrator.submit(TaskRequest::new("second")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        assert_eq!(
            h.orchestrator.stop(first.id()).await.unwrap(),
            "Task stopped successfully"
        );
        let snapshot = finished(&first).await;
        assert_eq!(snapshot.status, TaskStatus::Stopped);
        assert_eq!(snapshot.error.as_deref(), Some("Task stopped by user"));

        assert_eq!(
            h.orchestrator.stop(first.id()).await.unwrap(),
            "Task is not running (status: stopped)"
        );
        h.orchestrator.submit(TaskRequest::new("second")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout() {
        let h = harness(vec![Decision::new(AgentAction::Wait); 10]);
        let request = TaskRequest {
            timeout: Some(30),
            ..TaskRequest::new("wait around")
        };
        let task = h.orchestrator.submit(request).await.unwrap();
        let snapshot = finished(&task).await;

        assert_eq!(snapshot.status, TaskStatus::Timeout);
        assert_eq!(snapshot.error.as_deref(), Some("Task timeout after 30 seconds"));
        // Two 20s waits fit before the check at the top of step 3
        assert_eq!(snapshot.steps, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_send_is_verified() {
        let h = harness(vec![send_click(), Decision::new(AgentAction::Done)]);
        let request = TaskRequest {
            confirm_before_send: true,
            ..TaskRequest::new("send hello")
        };
        let task = h.orchestrator.submit(request).await.unwrap();

        wait_for(&task, TaskStatus::AwaitingConfirm).await;
        assert!(h.input.actions().await.is_empty());
        assert_eq!(
            h.orchestrator.confirm(task.id(), true).await.unwrap(),
            "Task confirmed successfully"
        );

        let snapshot = finished(&task).await;
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(
            snapshot.result.as_deref(),
            Some("Task completed successfully (send verified)")
        );
        assert_eq!(snapshot.steps, 2);
        assert_eq!(snapshot.history[1].verify_round, Some(1));
        assert_eq!(
            h.router.calls()[1],
            (SEND_VERIFY_INSTRUCTION.to_string(), 2)
        );
        assert!(h
            .input
            .actions()
            .await
            .iter()
            .any(|a| a.starts_with("click(700, 550")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unverified_send_fails() {
        let h = harness(vec![send_click(), Decision::fail("still pending")]);
        let request = TaskRequest {
            confirm_before_send: true,
            ..TaskRequest::new("send hello")
        };
        let task = h.orchestrator.submit(request).await.unwrap();
        wait_for(&task, TaskStatus::AwaitingConfirm).await;
        h.orchestrator.confirm(task.id(), true).await.unwrap();

        let snapshot = finished(&task).await;
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(
            snapshot.error.as_deref(),
            Some("Send verification failed after retries")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_send_is_cancelled() {
        let h = harness(vec![send_click()]);
        let request = TaskRequest {
            confirm_before_send: true,
            ..TaskRequest::new("send hello")
        };
        let task = h.orchestrator.submit(request).await.unwrap();
        wait_for(&task, TaskStatus::AwaitingConfirm).await;

        assert_eq!(
            h.orchestrator.confirm(task.id(), false).await.unwrap(),
            "Task rejected successfully"
        );
        let snapshot = finished(&task).await;
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert_eq!(snapshot.error.as_deref(), Some("Send action rejected by user"));
        assert!(h.input.actions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_mentioning_send_skips_gate() {
        let h = harness(vec![
            Decision::new(AgentAction::Done).with_thought("I click send, task done"),
        ]);
        let request = TaskRequest {
            confirm_before_send: true,
            ..TaskRequest::new("send hello")
        };
        let task = h.orchestrator.submit(request).await.unwrap();
        let snapshot = finished(&task).await;

        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result.as_deref(), Some("Task completed successfully"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_confirmation() {
        let h = harness(vec![send_click()]);
        let request = TaskRequest {
            confirm_before_send: true,
            ..TaskRequest::new("send hello")
        };
        let task = h.orchestrator.submit(request).await.unwrap();
        wait_for(&task, TaskStatus::AwaitingConfirm).await;

        h.orchestrator.stop(task.id()).await.unwrap();
        let snapshot = finished(&task).await;
        assert_eq!(snapshot.status, TaskStatus::Stopped);
        assert_eq!(
            h.orchestrator.confirm(task.id(), true).await.unwrap(),
            "Task is not awaiting confirmation (status: stopped)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_times_out() {
        let h = harness(vec![send_click()]);
        let request = TaskRequest {
            confirm_before_send: true,
            ..TaskRequest::new("send hello")
        };
        let task = h.orchestrator.submit(request).await.unwrap();
        let snapshot = finished(&task).await;

        assert_eq!(snapshot.status, TaskStatus::Timeout);
        assert_eq!(snapshot.error.as_deref(), Some("Confirmation timeout (5 min)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_gate_runs_directly() {
        let h = harness(vec![send_click(), Decision::new(AgentAction::Done)]);
        let task = h.orchestrator.submit(TaskRequest::new("send hello")).await.unwrap();
        let snapshot = finished(&task).await;

        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result.as_deref(), Some("Task completed successfully"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clipboard_preload_written_at_start() {
        let h = harness(vec![Decision::new(AgentAction::Done)]);
        let request = TaskRequest {
            clipboard_preload: Some("你好".into()),
            ..TaskRequest::new("paste the greeting")
        };
        let task = h.orchestrator.submit(request).await.unwrap();
        finished(&task).await;

        assert_eq!(
            h.clipboard.history().await,
            vec![ClipboardContent::Text("你好".into())]
        );
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let h = harness(vec![]);
        let id = Uuid::new_v4();
        assert!(matches!(h.orchestrator.get(id).await, Err(CoreError::NotFound(_))));
        assert!(matches!(h.orchestrator.stop(id).await, Err(CoreError::NotFound(_))));
    }

    #[test]
    fn test_duration_wording() {
        assert_eq!(describe_duration(Duration::from_secs(300)), "5 min");
        assert_eq!(describe_duration(Duration::from_secs(45)), "45 s");
    }
}
