//! 会话定时测试：延迟级联、自动模式、关闭时取消定时器。
//! 时间全部由 tokio 暂停时钟驱动。

use std::time::Duration;

use irrigation_pn::irrigation;
use irrigation_pn::net::Stage;
use irrigation_pn::{Engine, EngineConfig, EngineEvent, Session, SessionHandle, StateUpdate};
use tokio::task::JoinHandle;

fn spawn(zones: usize, dry: bool) -> (SessionHandle, JoinHandle<Engine>, EngineConfig) {
    let config = EngineConfig {
        zones,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config.clone()).unwrap();
    engine.update_state(StateUpdate {
        soil_dry: Some(vec![dry; zones]),
        ..StateUpdate::default()
    });
    let (handle, task) = Session::spawn(engine);
    (handle, task, config)
}

async fn tokens(handle: &SessionHandle, place: &str) -> u64 {
    handle.snapshot().await.unwrap().marking[place]
}

#[tokio::test(start_paused = true)]
async fn active_stage_fires_only_after_its_delay() {
    let (handle, _task, config) = spawn(1, true);
    let delay = config.timing.delay_after(Stage::Start).unwrap();

    assert!(handle.fire(irrigation::start_pump(0)).await.unwrap());
    assert_eq!(handle.snapshot().await.unwrap().pending_timers, 1);

    tokio::time::sleep(delay - Duration::from_millis(1)).await;
    assert_eq!(tokens(&handle, &irrigation::watering(0)).await, 0);
    assert_eq!(tokens(&handle, &irrigation::pump_on(0)).await, 1);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(tokens(&handle, &irrigation::watering(0)).await, 1);
    assert_eq!(tokens(&handle, &irrigation::pump_on(0)).await, 0);
}

#[tokio::test(start_paused = true)]
async fn full_cascade_returns_every_zone_to_dry() {
    let (handle, _task, _) = spawn(2, false);
    let mut events = handle.subscribe();

    assert_eq!(handle.start_all_pumps().await.unwrap(), 2);
    // 5 + 5 + 10 个一秒的时间单位
    tokio::time::sleep(Duration::from_secs(21)).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.pending_timers, 0);
    assert_eq!(snapshot.state.soil_dry, vec![true, true]);
    assert_eq!(snapshot.marking[irrigation::RESERVOIR], 30);

    let mut delayed = 0;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Fired { delayed: true, .. } = event {
            delayed += 1;
        }
    }
    assert_eq!(delayed, 2 * 3);
}

#[tokio::test(start_paused = true)]
async fn emergency_stalls_the_chain_at_its_stage() {
    let (handle, _task, _) = spawn(1, true);
    let mut events = handle.subscribe();

    handle.fire(irrigation::start_pump(0)).await.unwrap();
    handle
        .update_state(StateUpdate::emergency(true))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.marking[&irrigation::pump_on(0)], 1);
    assert_eq!(snapshot.marking[&irrigation::watering(0)], 0);
    assert_eq!(snapshot.pending_timers, 0);

    let mut stalled = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Stalled { transition } = event {
            stalled.push(transition);
        }
    }
    assert_eq!(stalled, vec![irrigation::irrigate(0)]);
}

#[tokio::test(start_paused = true)]
async fn auto_mode_fires_enabled_transitions_each_period() {
    let (handle, _task, config) = spawn(1, true);
    handle
        .update_state(StateUpdate::auto_mode(true))
        .await
        .unwrap();
    assert_eq!(tokens(&handle, &irrigation::pump_on(0)).await, 0);

    tokio::time::sleep(config.timing.auto_period() + Duration::from_millis(1)).await;
    assert_eq!(tokens(&handle, &irrigation::pump_on(0)).await, 1);
    assert_eq!(tokens(&handle, irrigation::RESERVOIR).await, 40);
}

#[tokio::test(start_paused = true)]
async fn auto_mode_leaves_the_cascade_to_its_timers() {
    let (handle, _task, _) = spawn(1, true);
    let mut events = handle.subscribe();
    handle
        .update_state(StateUpdate::auto_mode(true))
        .await
        .unwrap();

    // start 约在 1s，irrigate 在 6s，stop 在 11s，drying 要到 21s
    tokio::time::sleep(Duration::from_secs(15)).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.marking[&irrigation::soil_wet(0)], 1);
    assert_eq!(snapshot.marking[irrigation::RESERVOIR], 40);
    assert_eq!(snapshot.pending_timers, 1);

    let mut fired = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::Fired {
                transition,
                delayed,
            } => fired.push((transition, delayed)),
            EngineEvent::Stalled { transition } => panic!("`{transition}` stalled"),
            _ => {}
        }
    }
    assert_eq!(
        fired,
        vec![
            (irrigation::start_pump(0), false),
            (irrigation::irrigate(0), true),
            (irrigation::stop_pump(0), true),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_fires() {
    let (handle, task, _) = spawn(3, true);
    let mut watch = handle.watch();

    assert_eq!(handle.start_all_pumps().await.unwrap(), 3);
    watch.changed().await.unwrap();
    assert_eq!(watch.borrow().pending_timers, 3);

    handle.shutdown().await.unwrap();
    let mut engine = task.await.unwrap();
    assert_eq!(engine.pending_timers(), 0);
    assert!(engine.drain_events().is_empty());

    // 之后也不会再有发生
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(engine.marking_snapshot()[&irrigation::watering(0)], 0);
    assert_eq!(handle.latest().pending_timers, 0);
}
