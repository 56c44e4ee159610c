//! # Events モジュール
//!
//! エンジン内外でやり取りする型付きイベントを定義します。
//!
//! - 入力: [`SpawnIntent`]（脅威・迎撃体の生成要求）
//! - 出力: [`EngineEvent`]（検知・判断・発射・爆発などの通知）
//!
//! 出力イベントはエンジン内部でバッファされ、`drain_events` または
//! 非同期ランタイムのブロードキャストチャネルを通じて配信されます。

use crate::models::common::{EntityId, EntityType, Frequency, Position, SimTime, ThreatCategory, Vec2};
use crate::models::interceptor::InterceptorEndReason;
use crate::models::command_post::{DecisionAction, ThreatSeverity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 生成要求の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnKind {
    Threat,
    Interceptor,
}

/// 外部からの生成要求
///
/// `speed` を省略した場合はカタログ項目の速度を使用します。
/// 迎撃体の要求では `target_id`、なければ `target` に最も近い生存脅威を追尾します。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnIntent {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub kind: SpawnKind,
    pub origin: Position,
    pub target: Position,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub category: ThreatCategory,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub target_id: Option<EntityId>,
}

impl SpawnIntent {
    /// 脅威の生成要求
    pub fn threat(origin: Position, target: Position, speed: f64) -> Self {
        Self {
            id: None,
            kind: SpawnKind::Threat,
            origin,
            target,
            speed: Some(speed),
            category: ThreatCategory::Kinetic,
            catalog: None,
            target_id: None,
        }
    }

    /// 迎撃体の生成要求
    pub fn interceptor(origin: Position, target: Position, speed: f64) -> Self {
        Self {
            kind: SpawnKind::Interceptor,
            ..Self::threat(origin, target, speed)
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_category(mut self, category: ThreatCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_catalog(mut self, name: impl Into<String>) -> Self {
        self.catalog = Some(name.into());
        self
    }

    pub fn with_target_id(mut self, target_id: impl Into<EntityId>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }
}

/// 検知イベント
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    pub threat_id: EntityId,
    pub sensor_id: EntityId,
    pub position: Position,
    pub velocity: Vec2,
    pub timestamp: SimTime,
}

/// 指揮判断イベント
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionEvent {
    pub threat_id: EntityId,
    pub action: DecisionAction,
    pub severity: ThreatSeverity,
    pub unit_id: Option<EntityId>,
}

/// エンジンが発行するイベント
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineEvent {
    /// 発生時刻（ミリ秒）
    pub at: SimTime,
    pub kind: EventKind,
}

/// イベントの内容
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Spawned {
        id: EntityId,
        entity_type: EntityType,
        position: Position,
    },
    Handoff {
        threat_id: EntityId,
        base_id: EntityId,
        position: Position,
    },
    Detection(DetectionEvent),
    Relayed {
        threat_id: EntityId,
        relay_id: EntityId,
        base_id: EntityId,
    },
    RelayInterrupted {
        threat_id: EntityId,
        relay_id: EntityId,
    },
    Decision(DecisionEvent),
    Launch {
        interceptor_id: EntityId,
        launcher_id: EntityId,
        threat_id: EntityId,
        time_to_intercept: f64,
        degraded: bool,
    },
    JamCommand {
        jammer_id: EntityId,
        threat_id: EntityId,
        until: SimTime,
    },
    Jammed {
        sensor_id: EntityId,
        emitter_id: EntityId,
        frequency: Frequency,
        until: SimTime,
    },
    FrequencyHop {
        sensor_id: EntityId,
        from: Frequency,
        to: Frequency,
    },
    Explosion {
        threat_id: EntityId,
        interceptor_id: EntityId,
        position: Position,
    },
    Neutralized {
        threat_id: EntityId,
        jammer_id: EntityId,
    },
    Impact {
        threat_id: EntityId,
        position: Position,
    },
    InterceptorRetired {
        interceptor_id: EntityId,
        reason: InterceptorEndReason,
    },
    LockReleased {
        unit_id: EntityId,
        threat_id: EntityId,
    },
}

impl EventKind {
    /// ログ出力用のイベントコード
    pub fn code(&self) -> &'static str {
        match self {
            EventKind::Spawned { .. } => "ENTITY_SPAWNED",
            EventKind::Handoff { .. } => "THREAT_HANDOFF",
            EventKind::Detection(_) => "THREAT_DETECTED",
            EventKind::Relayed { .. } => "RELAY_DELIVERED",
            EventKind::RelayInterrupted { .. } => "RELAY_INTERRUPTED",
            EventKind::Decision(_) => "DECISION",
            EventKind::Launch { .. } => "INTERCEPTOR_LAUNCH",
            EventKind::JamCommand { .. } => "JAM_COMMAND",
            EventKind::Jammed { .. } => "SENSOR_JAMMED",
            EventKind::FrequencyHop { .. } => "FREQUENCY_HOP",
            EventKind::Explosion { .. } => "THREAT_KILLED",
            EventKind::Neutralized { .. } => "THREAT_NEUTRALIZED",
            EventKind::Impact { .. } => "THREAT_IMPACT",
            EventKind::InterceptorRetired { .. } => "INTERCEPTOR_RETIRED",
            EventKind::LockReleased { .. } => "LOCK_RELEASED",
        }
    }

    /// イベントが参照する脅威ID
    pub fn threat_id(&self) -> Option<&EntityId> {
        match self {
            EventKind::Handoff { threat_id, .. }
            | EventKind::Relayed { threat_id, .. }
            | EventKind::RelayInterrupted { threat_id, .. }
            | EventKind::Launch { threat_id, .. }
            | EventKind::JamCommand { threat_id, .. }
            | EventKind::Explosion { threat_id, .. }
            | EventKind::Neutralized { threat_id, .. }
            | EventKind::Impact { threat_id, .. }
            | EventKind::LockReleased { threat_id, .. } => Some(threat_id),
            EventKind::Detection(d) => Some(&d.threat_id),
            EventKind::Decision(d) => Some(&d.threat_id),
            EventKind::Spawned { .. }
            | EventKind::Jammed { .. }
            | EventKind::FrequencyHop { .. }
            | EventKind::InterceptorRetired { .. } => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Spawned { id, entity_type, position } => {
                write!(f, "{} ({}) を {} に生成", id, entity_type, position)
            }
            EventKind::Handoff { threat_id, base_id, position } => {
                write!(f, "{} が拠点 {} の局所座標系に移行 {}", threat_id, base_id, position)
            }
            EventKind::Detection(d) => {
                write!(f, "センサー {} が {} を探知 {}", d.sensor_id, d.threat_id, d.position)
            }
            EventKind::Relayed { threat_id, relay_id, base_id } => {
                write!(f, "{} の探知報告を {} が拠点 {} へ中継", threat_id, relay_id, base_id)
            }
            EventKind::RelayInterrupted { threat_id, relay_id } => {
                write!(f, "{} の中継が {} で途絶", threat_id, relay_id)
            }
            EventKind::Decision(d) => match &d.unit_id {
                Some(unit) => write!(f, "{} 脅威度 {}: {} ({})", d.threat_id, d.severity, d.action, unit),
                None => write!(f, "{} 脅威度 {}: {}", d.threat_id, d.severity, d.action),
            },
            EventKind::Launch {
                interceptor_id,
                launcher_id,
                threat_id,
                time_to_intercept,
                degraded,
            } => {
                write!(
                    f,
                    "{} が {} を発射 目標 {} 予測会合 {:.1} tick",
                    launcher_id, interceptor_id, threat_id, time_to_intercept
                )?;
                if *degraded {
                    f.write_str(" (解なし・暫定)")?;
                }
                Ok(())
            }
            EventKind::JamCommand { jammer_id, threat_id, until } => {
                write!(f, "{} が {} への妨害を開始 ({}ms まで)", jammer_id, threat_id, until)
            }
            EventKind::Jammed { sensor_id, emitter_id, frequency, until } => {
                write!(f, "{} が {} により {} で妨害 ({}ms まで)", sensor_id, emitter_id, frequency, until)
            }
            EventKind::FrequencyHop { sensor_id, from, to } => {
                write!(f, "{} が周波数を {} から {} へ変更", sensor_id, from, to)
            }
            EventKind::Explosion { threat_id, interceptor_id, position } => {
                write!(f, "{} が {} を撃破 {}", interceptor_id, threat_id, position)
            }
            EventKind::Neutralized { threat_id, jammer_id } => {
                write!(f, "{} が {} を無力化", jammer_id, threat_id)
            }
            EventKind::Impact { threat_id, position } => {
                write!(f, "{} が目標に着弾 {}", threat_id, position)
            }
            EventKind::InterceptorRetired { interceptor_id, reason } => {
                write!(f, "{} を退役 ({})", interceptor_id, reason)
            }
            EventKind::LockReleased { unit_id, threat_id } => {
                write!(f, "{} の {} に対する割り当てを解除", unit_id, threat_id)
            }
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>8}ms] {}: {}", self.at, self.kind.code(), self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_intent_from_yaml_defaults() {
        let yaml = r#"
kind: threat
origin: { mode: geo, lat: 35.2, lng: 139.1 }
target: { mode: geo, lat: 35.0, lng: 139.0 }
catalog: Shahed-136
"#;
        let intent: SpawnIntent = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(intent.kind, SpawnKind::Threat);
        assert_eq!(intent.speed, None);
        assert_eq!(intent.category, ThreatCategory::Kinetic);
        assert_eq!(intent.catalog.as_deref(), Some("Shahed-136"));
    }

    #[test]
    fn test_event_threat_reference() {
        let ev = EventKind::Impact {
            threat_id: "T1".into(),
            position: Position::local("B1", 0.0, 0.0),
        };
        assert_eq!(ev.threat_id(), Some(&"T1".to_string()));
        assert_eq!(ev.code(), "THREAT_IMPACT");

        let hop = EventKind::FrequencyHop {
            sensor_id: "S1".into(),
            from: "2GHz".into(),
            to: "3GHz".into(),
        };
        assert!(hop.threat_id().is_none());
    }
}
