//! # airdefsim
//!
//! 多層防空の探知・判断・迎撃シミュレーションエンジンです。
//!
//! 固定ティックの時間駆動で、脅威の接近、センサーの探知と中継、
//! 指揮所の脅威評価と迎撃・妨害の割り当て、迎撃体の誘導、
//! 敵性ジャマーによる妨害と周波数ホッピングを模擬します。
//!
//! - [`simulation::Engine`]: 単一書き込み主体のエンジン本体
//! - [`scenario::ScenarioConfig`]: YAML シナリオの読み込みと検証
//! - [`runtime::spawn_engine`]: tokio タスクとしての実時間駆動
//! - [`snapshot::WorldSnapshot`]: 読み取り側へ公開するワールド状態

pub mod models;

pub mod geometry;
pub mod transform;
pub mod registry;
pub mod events;

pub mod guidance;
pub mod motion;
pub mod relay;
pub mod jamming;
pub mod scheduler;

pub mod catalog;
pub mod generator;
pub mod projection;
pub mod telemetry;

pub mod scenario;
pub mod simulation;
pub mod snapshot;
pub mod runtime;

pub mod logging;
