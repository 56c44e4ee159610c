//! # Telemetry モジュール
//!
//! エンジンイベントの外部出力と診断カウンタを提供します。
//!
//! 出力先は [`TelemetrySink`] を実装した任意の型です。出力先の失敗や不在は
//! エンジンの動作に影響しません。

use crate::events::{EngineEvent, EventKind};
use crate::models::common::ms_to_secs;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// イベント出力先
pub trait TelemetrySink: Send {
    /// イベントを出力する（失敗しても呼び出し元には伝えない）
    fn publish(&mut self, event: &EngineEvent);
}

/// tracing へイベントを出力する
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn publish(&mut self, event: &EngineEvent) {
        let t = ms_to_secs(event.at);
        let code = event.kind.code();
        match &event.kind {
            EventKind::RelayInterrupted { .. } => {
                warn!(sim_time = t, code, "{}: {}", code, event.kind);
            }
            EventKind::Launch { degraded: true, .. } => {
                warn!(sim_time = t, code, "{}: {}", code, event.kind);
            }
            _ => {
                info!(sim_time = t, code, "{}: {}", code, event.kind);
            }
        }
    }
}

/// イベントを保持するだけの出力先（テスト・集計用）
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub events: Vec<EngineEvent>,
}

impl TelemetrySink for MemorySink {
    fn publish(&mut self, event: &EngineEvent) {
        self.events.push(event.clone());
    }
}

/// 診断カウンタ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub ticks: u64,
    pub detections: u64,
    pub suppressed_scans: u64,
    /// 中継での重複
    pub relay_duplicates: u64,
    /// 中継ユニット妨害による破棄
    pub relay_suppressed: u64,
    pub relay_interruptions: u64,
    /// 指揮所でのクールダウン中の重複
    pub decision_duplicates: u64,
    pub decisions: u64,
    pub assignment_conflicts: u64,
    pub degraded_intercepts: u64,
    pub launches: u64,
    pub jam_commands: u64,
    pub kills: u64,
    pub impacts: u64,
    pub neutralizations: u64,
    /// 命中せずに退役した迎撃体
    pub wasted_interceptors: u64,
    pub frequency_hops: u64,
    pub lock_timeouts: u64,
    pub geometry_errors: u64,
    pub rejected_intents: u64,
}

impl Diagnostics {
    /// 重複として破棄したイベントの合計
    pub fn stale_duplicates(&self) -> u64 {
        self.relay_duplicates + self.decision_duplicates
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  ティック数: {}", self.ticks)?;
        writeln!(f, "  探知: {} (抑止された走査 {})", self.detections, self.suppressed_scans)?;
        writeln!(
            f,
            "  中継: 重複 {} / 妨害破棄 {} / 途絶 {}",
            self.relay_duplicates, self.relay_suppressed, self.relay_interruptions
        )?;
        writeln!(
            f,
            "  指揮判断: {} (重複 {} / 割り当て競合 {} / ロック期限切れ {})",
            self.decisions, self.decision_duplicates, self.assignment_conflicts, self.lock_timeouts
        )?;
        writeln!(
            f,
            "  発射: {} (暫定解 {}) / 妨害指令: {}",
            self.launches, self.degraded_intercepts, self.jam_commands
        )?;
        writeln!(
            f,
            "  撃破: {} / 無力化: {} / 着弾: {} / 無駄弾: {}",
            self.kills, self.neutralizations, self.impacts, self.wasted_interceptors
        )?;
        write!(
            f,
            "  周波数変更: {} / 座標エラー: {} / 拒否された生成要求: {}",
            self.frequency_hops, self.geometry_errors, self.rejected_intents
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::Position;

    #[test]
    fn test_memory_sink_collects() {
        let mut sink = MemorySink::default();
        let ev = EngineEvent {
            at: 30,
            kind: EventKind::Impact {
                threat_id: "T1".into(),
                position: Position::local("B1", 0.0, 0.0),
            },
        };
        sink.publish(&ev);
        TracingSink.publish(&ev);
        assert_eq!(sink.events, vec![ev]);
    }

    #[test]
    fn test_stale_duplicates_sum() {
        let d = Diagnostics {
            relay_duplicates: 2,
            decision_duplicates: 3,
            ..Diagnostics::default()
        };
        assert_eq!(d.stale_duplicates(), 5);
    }
}
