//! # Runtime モジュール
//!
//! エンジンを tokio タスクとして実時間で駆動します。
//!
//! ワールドタスクはエンジンを唯一所有し、各ティックの先頭でコマンドキューを
//! 取り出してから1ステップ進めます。イベントは broadcast チャネルで、
//! ステップ完了時点のスナップショットは watch チャネルで公開します。

use crate::events::{EngineEvent, SpawnIntent};
use crate::projection::ViewProjection;
use crate::simulation::Engine;
use crate::snapshot::WorldSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

/// ワールドタスクへのコマンド
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Spawn(SpawnIntent),
    SetProjection(ViewProjection),
    Shutdown,
}

/// 実行オプション
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// 1ティックあたりの実時間
    pub tick_interval: Duration,
    pub command_capacity: usize,
    pub event_capacity: usize,
    /// 設定された実行時間に達したら自動停止する
    pub stop_at_duration: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(30),
            command_capacity: 256,
            event_capacity: 1024,
            stop_at_duration: false,
        }
    }
}

impl RuntimeOptions {
    /// エンジンのティック周期に合わせたオプション
    pub fn for_engine(engine: &Engine) -> Self {
        Self {
            tick_interval: Duration::from_millis(engine.tick_ms),
            ..Self::default()
        }
    }

    pub fn stop_at_duration(mut self, stop: bool) -> Self {
        self.stop_at_duration = stop;
        self
    }
}

/// 実行中のエンジンへのハンドル
pub struct EngineHandle {
    pub commands: mpsc::Sender<EngineCommand>,
    pub snapshots: watch::Receiver<WorldSnapshot>,
    events: broadcast::Sender<EngineEvent>,
    shutdown: Arc<Notify>,
    task: JoinHandle<Engine>,
}

impl EngineHandle {
    /// イベントの購読を開始
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// 生成要求を送る
    pub async fn submit(&self, intent: SpawnIntent) -> Result<(), mpsc::error::SendError<EngineCommand>> {
        self.commands.send(EngineCommand::Spawn(intent)).await
    }

    /// 停止を要求（次のティックを待たずにループを抜ける）
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// ワールドタスクの終了を待ち、最終状態のエンジンを受け取る
    pub async fn join(self) -> Result<Engine, JoinError> {
        self.task.await
    }
}

/// エンジンをワールドタスクとして起動
///
/// # 引数
///
/// * `engine` - 初期化済みのエンジン
/// * `options` - 実行オプション
///
/// # 戻り値
///
/// コマンド送信・購読・停止用のハンドル
pub fn spawn_engine(engine: Engine, options: RuntimeOptions) -> EngineHandle {
    let (command_tx, command_rx) = mpsc::channel(options.command_capacity.max(1));
    let (event_tx, _) = broadcast::channel(options.event_capacity.max(1));
    let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());
    let shutdown = Arc::new(Notify::new());

    let task = tokio::spawn(world_task(
        engine,
        command_rx,
        event_tx.clone(),
        snapshot_tx,
        shutdown.clone(),
        options,
    ));

    EngineHandle {
        commands: command_tx,
        snapshots: snapshot_rx,
        events: event_tx,
        shutdown,
        task,
    }
}

async fn world_task(
    mut engine: Engine,
    mut command_rx: mpsc::Receiver<EngineCommand>,
    event_tx: broadcast::Sender<EngineEvent>,
    snapshot_tx: watch::Sender<WorldSnapshot>,
    shutdown: Arc<Notify>,
    options: RuntimeOptions,
) -> Engine {
    let mut interval = tokio::time::interval(options.tick_interval);
    info!(tick_ms = engine.tick_ms, "ENGINE_STARTED: ワールドタスクを開始しました");

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                break;
            }
            _ = interval.tick() => {}
        }

        let mut stop = false;
        while let Ok(command) = command_rx.try_recv() {
            match command {
                EngineCommand::Spawn(intent) => engine.submit(intent),
                EngineCommand::SetProjection(projection) => engine.set_projection(projection),
                EngineCommand::Shutdown => stop = true,
            }
        }
        if stop {
            break;
        }

        engine.step();

        // 購読者がいなくてもエンジンは止めない
        for event in engine.drain_events() {
            let _ = event_tx.send(event);
        }
        snapshot_tx.send_replace(engine.snapshot());

        if options.stop_at_duration && engine.now() >= engine.duration_ms {
            debug!(now = engine.now(), "ENGINE_DURATION_REACHED");
            break;
        }
    }

    info!(tick = engine.tick(), now = engine.now(), "ENGINE_STOPPED: ワールドタスクを終了しました");
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::models::{Base, EntityType, GeoPoint, Position};
    use crate::scenario::EngineConfig;

    fn engine(duration_ms: u64) -> Engine {
        let mut engine = Engine::new(EngineConfig::default(), 30, duration_ms);
        engine.add_base("B1", Base::new("Alpha", GeoPoint::new(35.0, 139.0))).unwrap();
        engine
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_duration() {
        let handle = spawn_engine(engine(300), RuntimeOptions::default().stop_at_duration(true));
        let engine = handle.join().await.unwrap();
        assert_eq!(engine.now(), 300);
        assert_eq!(engine.tick(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_command_publishes_event_and_snapshot() {
        let mut handle = spawn_engine(engine(60_000), RuntimeOptions::default());
        let mut events = handle.subscribe();

        handle
            .submit(SpawnIntent::threat(Position::local("B1", 80.0, 0.0), Position::local("B1", 0.0, 0.0), 0.01).with_id("T1"))
            .await
            .unwrap();

        let spawned = loop {
            let event = events.recv().await.unwrap();
            if let EventKind::Spawned { id, .. } = event.kind {
                break id;
            }
        };
        assert_eq!(spawned, "T1");

        handle.snapshots.changed().await.unwrap();
        assert_eq!(handle.snapshots.borrow().count(EntityType::Threat), 1);

        handle.shutdown();
        let engine = handle.join().await.unwrap();
        assert!(engine.registry().contains("T1"));
    }
}
