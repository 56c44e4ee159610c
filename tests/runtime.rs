use airdefsim::events::{EventKind, SpawnIntent};
use airdefsim::models::{EntityType, Position};
use airdefsim::runtime::{spawn_engine, EngineCommand, RuntimeOptions};
use airdefsim::scenario::ScenarioConfig;
use airdefsim::simulation::Engine;

const DEFENDED_BASE: &str = r#"
meta: { version: "1.0", name: runtime }
sim: { duration_ms: 20000 }
bases:
  - id: B1
    name: Alpha
    center: { lat: 35.0, lng: 139.0 }
    units:
      - { id: R1, kind: radar, radius_km: 5.0, frequency: 2GHz }
      - { id: L1, kind: launcher, offset: { x: 5.0, y: 0.0 }, missiles: 2 }
"#;

fn engine() -> Engine {
    Engine::from_scenario(&ScenarioConfig::from_yaml(DEFENDED_BASE).unwrap()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_submitted_threat_is_engaged_by_world_task() {
    let handle = spawn_engine(engine(), RuntimeOptions::default());
    let mut events = handle.subscribe();

    handle
        .submit(SpawnIntent::threat(Position::local("B1", 30.0, 0.0), Position::local("B1", 0.0, 0.0), 0.01).with_id("T9"))
        .await
        .unwrap();

    let mut launched = false;
    loop {
        let event = events.recv().await.unwrap();
        match event.kind {
            EventKind::Launch { threat_id, .. } => {
                assert_eq!(threat_id, "T9");
                launched = true;
            }
            EventKind::Explosion { threat_id, .. } => {
                assert_eq!(threat_id, "T9");
                break;
            }
            _ => {}
        }
    }
    assert!(launched);

    handle.commands.send(EngineCommand::Shutdown).await.unwrap();
    let engine = handle.join().await.unwrap();
    assert_eq!(engine.diagnostics().kills, 1);
    assert!(engine.locks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_track_steps() {
    let mut handle = spawn_engine(engine(), RuntimeOptions::default());

    for _ in 0..3 {
        handle.snapshots.changed().await.unwrap();
    }
    let snapshot = handle.snapshots.borrow_and_update().clone();
    assert!(snapshot.tick >= 3);
    assert_eq!(snapshot.time, snapshot.tick * 30);
    assert_eq!(snapshot.count(EntityType::Launcher), 1);

    handle.shutdown();
    let engine = handle.join().await.unwrap();
    assert!(engine.tick() >= snapshot.tick);
}
