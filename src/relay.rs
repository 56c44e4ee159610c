//! # Relay モジュール
//!
//! センサーから指揮所への探知報告の中継を扱います。
//!
//! 中継ユニット（アンテナ）は報告を受けると拠点ごとの重複排除集合を確認し、
//! 初めての脅威であれば中継遅延後に指揮所へ転送します。転送時に中継ユニットが
//! 失われているか妨害されていれば報告は途絶し、重複排除の記録も取り消されます。

use crate::models::common::{EntityId, Position, SimTime, Vec2};
use std::collections::{HashMap, HashSet};

/// 中継される探知報告
#[derive(Debug, Clone, PartialEq)]
pub struct RelayPacket {
    pub threat_id: EntityId,
    pub position: Position,
    pub velocity: Vec2,
    /// 探知したセンサー
    pub sensor_id: EntityId,
    /// 中継ユニット
    pub relay_id: EntityId,
    /// 宛先の拠点（中継ユニットの所属）
    pub base_id: EntityId,
    pub detected_at: SimTime,
}

/// 中継受付の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayIngress {
    /// 転送を予約した（転送予定時刻）
    Scheduled(SimTime),
    /// 同じ脅威が既に中継済み
    Duplicate,
    /// 中継ユニットが妨害中
    Suppressed,
}

/// 拠点ごとの重複排除集合
#[derive(Debug, Clone, Default)]
pub struct RelayDedup {
    seen: HashMap<EntityId, HashSet<EntityId>>,
}

impl RelayDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// 脅威を記録（新規なら true）
    pub fn insert(&mut self, base_id: &str, threat_id: &str) -> bool {
        self.seen
            .entry(base_id.to_string())
            .or_default()
            .insert(threat_id.to_string())
    }

    pub fn contains(&self, base_id: &str, threat_id: &str) -> bool {
        self.seen
            .get(base_id)
            .is_some_and(|s| s.contains(threat_id))
    }

    pub fn remove(&mut self, base_id: &str, threat_id: &str) -> bool {
        self.seen
            .get_mut(base_id)
            .is_some_and(|s| s.remove(threat_id))
    }

    /// 全拠点から脅威を取り除く
    pub fn forget(&mut self, threat_id: &str) {
        for set in self.seen.values_mut() {
            set.remove(threat_id);
        }
    }

    pub fn len(&self, base_id: &str) -> usize {
        self.seen.get(base_id).map_or(0, |s| s.len())
    }
}

/// 中継ユニットでの受付処理
///
/// # 引数
///
/// * `dedup` - 重複排除集合
/// * `packet` - 中継する報告
/// * `relay_jammed` - 中継ユニットが妨害中か
/// * `now` - 現在時刻
/// * `relay_delay` - 中継遅延（ミリ秒）
pub fn accept(
    dedup: &mut RelayDedup,
    packet: &RelayPacket,
    relay_jammed: bool,
    now: SimTime,
    relay_delay: SimTime,
) -> RelayIngress {
    if relay_jammed {
        return RelayIngress::Suppressed;
    }
    if !dedup.insert(&packet.base_id, &packet.threat_id) {
        return RelayIngress::Duplicate;
    }
    RelayIngress::Scheduled(now + relay_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(threat: &str) -> RelayPacket {
        RelayPacket {
            threat_id: threat.into(),
            position: Position::local("B1", 30.0, 0.0),
            velocity: Vec2::new(-0.05, 0.0),
            sensor_id: "S1".into(),
            relay_id: "A1".into(),
            base_id: "B1".into(),
            detected_at: 1000,
        }
    }

    #[test]
    fn test_accept_schedules_then_deduplicates() {
        let mut dedup = RelayDedup::new();
        assert_eq!(accept(&mut dedup, &packet("T1"), false, 1000, 800), RelayIngress::Scheduled(1800));
        assert_eq!(accept(&mut dedup, &packet("T1"), false, 2000, 800), RelayIngress::Duplicate);
        assert_eq!(accept(&mut dedup, &packet("T2"), false, 2000, 800), RelayIngress::Scheduled(2800));
        assert_eq!(dedup.len("B1"), 2);
    }

    #[test]
    fn test_jammed_relay_drops_without_recording() {
        let mut dedup = RelayDedup::new();
        assert_eq!(accept(&mut dedup, &packet("T1"), true, 1000, 800), RelayIngress::Suppressed);
        assert!(!dedup.contains("B1", "T1"));
    }

    #[test]
    fn test_removed_entry_allows_retry() {
        let mut dedup = RelayDedup::new();
        accept(&mut dedup, &packet("T1"), false, 0, 800);
        assert!(dedup.remove("B1", "T1"));
        assert_eq!(accept(&mut dedup, &packet("T1"), false, 900, 800), RelayIngress::Scheduled(1700));
        dedup.forget("T1");
        assert!(!dedup.contains("B1", "T1"));
    }
}
