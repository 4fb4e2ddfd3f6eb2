//! Decisions travel through projection, compilation and the sandbox to the
//! desktop mocks.

use deskpilot_core::config::SandboxConfig;
use deskpilot_core::preload::ClipboardPreload;
use deskpilot_core::script;
use deskpilot_core::{
    ActionCompiler, AgentAction, CoordinateSpace, Desktop, Platform, Projector, SandboxedExecutor,
};
use deskpilot_desktop::capture::mock::MockCapture;
use deskpilot_desktop::clipboard::mock::{ClipboardContent, MockClipboard};
use deskpilot_desktop::input::mock::MockSimulator;
use deskpilot_desktop::windows::mock::MockWindowManager;
use std::sync::Arc;

struct Pipeline {
    compiler: ActionCompiler,
    executor: SandboxedExecutor,
    input: Arc<MockSimulator>,
    clipboard: Arc<MockClipboard>,
    preload: Arc<ClipboardPreload>,
}

fn pipeline() -> Pipeline {
    let input = Arc::new(MockSimulator::new());
    let clipboard = Arc::new(MockClipboard::new());
    let preload = Arc::new(ClipboardPreload::new());
    let desktop = Desktop {
        capture: Arc::new(MockCapture::solid(1920, 1080, 0)),
        input: input.clone(),
        clipboard: clipboard.clone(),
        windows: Arc::new(MockWindowManager::new("notepad.exe", "Untitled - Notepad")),
    };
    let config = SandboxConfig {
        platform: Platform::Windows,
        ..SandboxConfig::default()
    };
    Pipeline {
        compiler: ActionCompiler::new(&config),
        executor: SandboxedExecutor::new(desktop, preload.clone(), &config),
        input,
        clipboard,
        preload,
    }
}

#[tokio::test]
async fn relative_script_lands_on_screen_pixels() {
    let mut p = pipeline();
    let projector = Projector::new(CoordinateSpace::Relative, 1920, 1080).unwrap();

    let mut program = script::parse("pyautogui.click(x=0.5, y=0.25)").unwrap();
    assert_eq!(projector.project_program(&mut program, 1.0).unwrap(), 1);

    let result = p.executor.execute(&program.to_string()).await;
    assert!(result.success, "{:?}", result);
    assert_eq!(p.input.actions().await, vec!["click(960, 270, Left, 1)"]);
}

#[tokio::test]
async fn compiled_drag_and_typing_reach_the_desktop() {
    let mut p = pipeline();

    let drag = p.compiler.compile(&AgentAction::Drag {
        from_x: 100,
        from_y: 200,
        to_x: 300,
        to_y: 200,
    });
    assert!(p.executor.execute(&drag).await.success);

    let typing = p.compiler.compile(&AgentAction::Type {
        text: "会议纪要".into(),
        x: Some(50),
        y: Some(60),
    });
    assert!(p.executor.execute(&typing).await.success);

    let actions = p.input.actions().await;
    assert_eq!(
        &actions[..4],
        &["move(100, 200)", "mouse_down(Left)", "move(300, 200)", "mouse_up(Left)"]
    );
    assert!(actions.contains(&"click(50, 60, Left, 1)".to_string()));
    assert_eq!(
        p.clipboard.content().await,
        ClipboardContent::Text("会议纪要".into())
    );
}

#[tokio::test]
async fn model_script_with_escape_is_refused() {
    let mut p = pipeline();
    let code = p.compiler.compile(&AgentAction::Script {
        code: "pyautogui.click(x=1, y=1)\n__import__('os').system('calc')".into(),
    });

    let result = p.executor.execute(&code).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("unsafe code"));
    assert!(p.input.actions().await.is_empty());
}

#[tokio::test]
async fn preload_is_spent_only_by_a_step_that_runs() {
    let mut p = pipeline();
    p.preload.set(Some("季度报告已发送".into()), None);
    let typing = AgentAction::Type {
        text: "quarterly report".into(),
        x: None,
        y: None,
    };

    // A compiled step that never runs, as when a send is rejected
    let unused = p.compiler.compile(&typing);
    assert!(p.preload.is_pending());

    let script = p.compiler.compile(&typing);
    assert_eq!(script, unused);
    assert!(p.executor.execute(&script).await.success);
    assert!(p.preload.is_consumed());
    assert_eq!(
        p.clipboard.content().await,
        ClipboardContent::Text("季度报告已发送".into())
    );
}
