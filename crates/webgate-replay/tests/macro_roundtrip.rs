//! Record-and-replay flows against the scriptable engine.

use std::sync::Arc;
use std::time::Duration;
use webgate_driver::mock::{MockDriver, RecordedOp};
use webgate_replay::{MacroPlayer, MacroRecorder, MemoryStorage, PlaybackOptions};
use webgate_security::EvalPolicy;
use webgate_session::{
    ContextPool, ContextPoolConfig, Session, SessionOptions, SessionPool, SessionPoolConfig,
};
use webgate_driver::GotoParams;
use webgate_performance::{PerformanceConfig, PerformanceManager};

struct Fixture {
    pool: Arc<SessionPool>,
    driver: Arc<MockDriver>,
    recorder: MacroRecorder,
    player: MacroPlayer,
}

async fn fixture() -> Fixture {
    let driver = Arc::new(MockDriver::new());
    let context_pool = ContextPool::new(
        ContextPoolConfig {
            enabled: false,
            ..ContextPoolConfig::default()
        },
        driver.clone(),
    );
    let perf = Arc::new(
        PerformanceManager::new(PerformanceConfig {
            temp_dir: Some(std::env::temp_dir().join("webgate-replay-tests")),
            ..PerformanceConfig::default()
        })
        .await
        .unwrap(),
    );
    let pool = SessionPool::new(
        SessionPoolConfig {
            cleanup_interval_ms: 0,
            ..SessionPoolConfig::default()
        },
        context_pool,
        perf,
    );
    let storage = Arc::new(MemoryStorage::new());
    Fixture {
        pool,
        driver,
        recorder: MacroRecorder::new(storage.clone()),
        player: MacroPlayer::new(storage, Arc::new(EvalPolicy::with_defaults())),
    }
}

async fn session(fx: &Fixture) -> Arc<Session> {
    fx.pool
        .create_session(SessionOptions::default(), None)
        .await
        .unwrap()
}

#[tokio::test]
async fn recorded_macro_replays_on_another_session() {
    let fx = fixture().await;
    let recording_session = session(&fx).await;

    let macro_id = fx
        .recorder
        .start(&recording_session, "t1", None)
        .unwrap();

    // Navigation is captured automatically from the page event stream;
    // the rest are the explicit hooks the tool handlers call.
    let page = recording_session.page().unwrap();
    page.goto("https://example.com", GotoParams::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    fx.recorder
        .record_click(recording_session.id(), "h1", None);
    fx.recorder
        .record_eval(recording_session.id(), "document.title");

    let recording = fx.recorder.stop(recording_session.id()).await.unwrap();
    assert_eq!(recording.id, macro_id);
    assert!(recording.actions.len() >= 3);
    assert_eq!(
        recording.metadata.start_url.as_deref(),
        Some("https://example.com")
    );

    let playback_session = session(&fx).await;
    let result = fx
        .player
        .play(playback_session.clone(), &macro_id, PlaybackOptions::default())
        .await
        .unwrap();

    assert!(result.completed);
    assert!(result.errors.is_empty());
    assert_eq!(result.executed_actions, result.total_actions);

    // The playback page saw one operation per recorded action.
    let replay_page = fx.driver.last_page().unwrap();
    let ops = replay_page.ops();
    assert!(ops.contains(&RecordedOp::Goto("https://example.com".into())));
    assert!(ops.contains(&RecordedOp::Click("h1".into())));
    assert!(ops.contains(&RecordedOp::Evaluate("document.title".into())));
    assert_eq!(
        playback_session.page().unwrap().url().await.unwrap(),
        "https://example.com"
    );
}

#[tokio::test]
async fn only_one_recording_per_session() {
    let fx = fixture().await;
    let s = session(&fx).await;
    fx.recorder.start(&s, "first", None).unwrap();
    assert!(fx.recorder.start(&s, "second", None).is_err());
    fx.recorder.stop(s.id()).await.unwrap();
    assert!(fx.recorder.start(&s, "second", None).is_ok());
}

#[tokio::test]
async fn stop_without_recording_fails() {
    let fx = fixture().await;
    let s = session(&fx).await;
    assert!(fx.recorder.stop(s.id()).await.is_err());
}

#[tokio::test]
async fn playback_halts_on_error_by_default() {
    let fx = fixture().await;
    let s = session(&fx).await;

    fx.recorder.start(&s, "errs", None).unwrap();
    fx.recorder.record_click(s.id(), "#missing", None);
    fx.recorder.record_click(s.id(), "#after", None);
    let recording = fx.recorder.stop(s.id()).await.unwrap();

    let target = session(&fx).await;
    fx.driver.last_page().unwrap().remove_selector("#missing");

    let result = fx
        .player
        .play(target.clone(), &recording.id, PlaybackOptions::default())
        .await
        .unwrap();
    assert!(!result.completed);
    assert_eq!(result.executed_actions, 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].selector.as_deref(), Some("#missing"));

    // With continue_on_error the remaining actions still run.
    let target2 = session(&fx).await;
    fx.driver.last_page().unwrap().remove_selector("#missing");
    let result = fx
        .player
        .play(
            target2,
            &recording.id,
            PlaybackOptions {
                continue_on_error: true,
                ..PlaybackOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(result.completed);
    assert_eq!(result.executed_actions, 1);
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test]
async fn step_bounds_limit_playback() {
    let fx = fixture().await;
    let s = session(&fx).await;
    fx.recorder.start(&s, "bounds", None).unwrap();
    fx.recorder.record_click(s.id(), "#a", None);
    fx.recorder.record_click(s.id(), "#b", None);
    fx.recorder.record_click(s.id(), "#c", None);
    let recording = fx.recorder.stop(s.id()).await.unwrap();

    let target = session(&fx).await;
    let result = fx
        .player
        .play(
            target,
            &recording.id,
            PlaybackOptions {
                start_from_step: 1,
                end_at_step: Some(2),
                ..PlaybackOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.total_actions, 1);
    assert_eq!(result.executed_actions, 1);

    let ops = fx.driver.last_page().unwrap().ops();
    assert_eq!(ops, vec![RecordedOp::Click("#b".into())]);
}

#[tokio::test]
async fn stop_interrupts_playback() {
    let fx = fixture().await;
    let s = session(&fx).await;
    fx.recorder.start(&s, "slow", None).unwrap();
    for i in 0..20 {
        fx.recorder.record_wait(s.id(), 50);
        fx.recorder.record_click(s.id(), &format!("#b{i}"), None);
    }
    let recording = fx.recorder.stop(s.id()).await.unwrap();

    let target = session(&fx).await;
    let target_id = target.id().to_string();
    let play = {
        let target = target.clone();
        let macro_id = recording.id.clone();
        let player = &fx.player;
        async move { player.play(target, &macro_id, PlaybackOptions::default()).await }
    };
    let play_task = tokio::join!(play, async {
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(fx.player.stop(&target_id));
    });

    let result = play_task.0.unwrap();
    assert!(!result.completed);
    assert!(result.executed_actions < result.total_actions);
}

#[tokio::test]
async fn eval_actions_respect_policy() {
    let fx = fixture().await;
    let s = session(&fx).await;
    fx.recorder.start(&s, "evil", None).unwrap();
    fx.recorder.record_eval(s.id(), "require('fs')");
    let recording = fx.recorder.stop(s.id()).await.unwrap();

    let target = session(&fx).await;
    let result = fx
        .player
        .play(target, &recording.id, PlaybackOptions::default())
        .await
        .unwrap();
    assert!(!result.completed);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].message.contains("policy"));
}
