use std::collections::{BTreeMap, HashMap};
use std::fmt;
use crate::geometry::GeometryError;
use crate::models::common::{EntityId, EntityType, Position, SimTime, ThreatCategory, Vec2};
use crate::models::Entity;
use crate::registry::{EntityFilter, EntityRegistry};
use crate::transform::FrameTransform;
use serde::Serialize;
use thiserror::Error;

/// 脅威度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatSeverity {
    High,
    Medium,
    Low,
}

impl fmt::Display for ThreatSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatSeverity::High => f.write_str("HIGH"),
            ThreatSeverity::Medium => f.write_str("MEDIUM"),
            ThreatSeverity::Low => f.write_str("LOW"),
        }
    }
}

/// 指揮判断の行動
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Intercept,
    Jam,
    Monitor,
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionAction::Intercept => f.write_str("intercept"),
            DecisionAction::Jam => f.write_str("jam"),
            DecisionAction::Monitor => f.write_str("monitor"),
        }
    }
}

/// 脅威度判定のしきい値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityThresholds {
    /// この距離（km）未満なら HIGH
    pub high_distance_km: f64,
    /// この距離（km）未満なら MEDIUM
    pub medium_distance_km: f64,
    /// この速度（局所単位/tick）を超えると HIGH
    pub high_speed: f64,
}

/// 脅威度を判定
///
/// # 引数
///
/// * `distance_km` - 防護対象拠点の中心までの距離（km）
/// * `speed` - 速度（局所単位/tick）
/// * `thresholds` - 判定しきい値
pub fn classify(distance_km: f64, speed: f64, thresholds: &SeverityThresholds) -> ThreatSeverity {
    if distance_km < thresholds.high_distance_km || speed > thresholds.high_speed {
        ThreatSeverity::High
    } else if distance_km < thresholds.medium_distance_km {
        ThreatSeverity::Medium
    } else {
        ThreatSeverity::Low
    }
}

/// 割り当てロックの競合
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("ユニット {unit} は既に {holding} に割り当て済みです")]
    UnitBusy { unit: EntityId, holding: EntityId },
    #[error("脅威 {threat} は既に {holder} が担当しています")]
    ThreatHeld { threat: EntityId, holder: EntityId },
}

/// 割り当てロック
///
/// ユニットは同時に1つの脅威のみ、脅威は同時に1つのユニットのみが保持できます。
#[derive(Debug, Clone, Default)]
pub struct AssignmentLocks {
    by_unit: HashMap<EntityId, EntityId>,
    by_threat: HashMap<EntityId, EntityId>,
}

impl AssignmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// ユニットを脅威にロック
    pub fn try_lock(&mut self, unit: &str, threat: &str) -> Result<(), LockError> {
        if let Some(holding) = self.by_unit.get(unit) {
            return Err(LockError::UnitBusy {
                unit: unit.to_string(),
                holding: holding.clone(),
            });
        }
        if let Some(holder) = self.by_threat.get(threat) {
            return Err(LockError::ThreatHeld {
                threat: threat.to_string(),
                holder: holder.clone(),
            });
        }
        self.by_unit.insert(unit.to_string(), threat.to_string());
        self.by_threat.insert(threat.to_string(), unit.to_string());
        Ok(())
    }

    /// ユニットのロックを解除
    ///
    /// # 戻り値
    ///
    /// 解除された脅威ID
    pub fn release(&mut self, unit: &str) -> Option<EntityId> {
        let threat = self.by_unit.remove(unit)?;
        self.by_threat.remove(&threat);
        Some(threat)
    }

    /// 脅威を参照するロックを解除
    ///
    /// # 戻り値
    ///
    /// 解除されたユニットID
    pub fn release_threat(&mut self, threat: &str) -> Option<EntityId> {
        let unit = self.by_threat.remove(threat)?;
        self.by_unit.remove(&unit);
        Some(unit)
    }

    /// 指定ユニットが指定脅威を保持している場合のみ解除
    pub fn release_if_held(&mut self, unit: &str, threat: &str) -> bool {
        if self.by_unit.get(unit).is_some_and(|t| t == threat) {
            self.release(unit);
            true
        } else {
            false
        }
    }

    pub fn holder_of(&self, threat: &str) -> Option<&EntityId> {
        self.by_threat.get(threat)
    }

    pub fn threat_of(&self, unit: &str) -> Option<&EntityId> {
        self.by_unit.get(unit)
    }

    pub fn is_unit_locked(&self, unit: &str) -> bool {
        self.by_unit.contains_key(unit)
    }

    pub fn is_threat_locked(&self, threat: &str) -> bool {
        self.by_threat.contains_key(threat)
    }

    pub fn len(&self) -> usize {
        self.by_unit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_unit.is_empty()
    }
}

/// 指揮所が受信した探知報告
#[derive(Debug, Clone, PartialEq)]
pub struct ContactReport {
    pub threat_id: EntityId,
    pub position: Position,
    pub velocity: Vec2,
    pub sensor_id: EntityId,
    /// 中継ユニット（直接報告の場合は None）
    pub relay_id: Option<EntityId>,
    pub received_at: SimTime,
}

/// 指揮判断の結果
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub threat_id: EntityId,
    pub severity: ThreatSeverity,
    pub action: DecisionAction,
    /// 割り当て候補ユニット（Monitor の場合は None）
    pub unit_id: Option<EntityId>,
}

/// 判断処理の結果
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    /// 既にいずれかのユニットが担当中
    Engaged { unit_id: EntityId },
    Decided(Decision),
}

/// 指揮所の統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommandStats {
    pub reports: u64,
    pub stale_duplicates: u64,
    pub decisions: u64,
    pub deferred: u64,
}

/// 指揮所
///
/// 拠点ごとに1つ存在し、中継された探知報告を受けて脅威度を判定し、
/// 配下のランチャーまたはジャマーを割り当てます。
#[derive(Debug, Clone)]
pub struct CommandPost {
    /// 所属拠点ID
    pub base_id: EntityId,
    /// 追跡中の接触（脅威IDの順に再評価する）
    pub contacts: BTreeMap<EntityId, ContactReport>,
    /// 脅威ごとの最終判断時刻
    pub last_decision: HashMap<EntityId, SimTime>,
    pub stats: CommandStats,
}

impl CommandPost {
    pub fn new(base_id: impl Into<EntityId>) -> Self {
        Self {
            base_id: base_id.into(),
            contacts: BTreeMap::new(),
            last_decision: HashMap::new(),
            stats: CommandStats::default(),
        }
    }

    /// 探知報告を受信
    ///
    /// 接触情報は常に更新します。直近 `cooldown` 以内に判断済みの脅威は
    /// 重複として数え、判断を行いません。
    ///
    /// # 戻り値
    ///
    /// ただちに判断すべき場合は true
    pub fn receive(&mut self, report: ContactReport, now: SimTime, cooldown: SimTime) -> bool {
        self.stats.reports += 1;
        let threat_id = report.threat_id.clone();
        self.contacts.insert(threat_id.clone(), report);
        if self.in_cooldown(&threat_id, now, cooldown) {
            self.stats.stale_duplicates += 1;
            return false;
        }
        true
    }

    pub fn in_cooldown(&self, threat_id: &str, now: SimTime, cooldown: SimTime) -> bool {
        self.last_decision
            .get(threat_id)
            .is_some_and(|t| now < t + cooldown)
    }

    pub fn mark_decided(&mut self, threat_id: &str, now: SimTime) {
        self.stats.decisions += 1;
        self.last_decision.insert(threat_id.to_string(), now);
    }

    /// 再評価の対象（担当ユニットがなく、クールダウン中でない接触）
    pub fn pending(&self, now: SimTime, cooldown: SimTime, locks: &AssignmentLocks) -> Vec<EntityId> {
        self.contacts
            .keys()
            .filter(|id| !locks.is_threat_locked(id) && !self.in_cooldown(id, now, cooldown))
            .cloned()
            .collect()
    }

    /// 脅威に関する情報をすべて破棄
    pub fn forget(&mut self, threat_id: &str) {
        self.contacts.remove(threat_id);
        self.last_decision.remove(threat_id);
    }

    /// 脅威に対する判断を行う
    ///
    /// 脅威度は登録簿上の最新状態から判定します。
    /// 割り当て候補の選定のみ行い、ロックと指令は呼び出し側が行います。
    ///
    /// # 引数
    ///
    /// * `threat` - 判断対象の脅威エンティティ
    /// * `registry` - エンティティレジストリ
    /// * `transform` - 座標変換器
    /// * `thresholds` - 脅威度しきい値
    /// * `locks` - 割り当てロック
    ///
    /// # 戻り値
    ///
    /// 判断結果。座標系が解決できない場合はエラー
    pub fn decide(
        &self,
        threat: &Entity,
        registry: &EntityRegistry,
        transform: &FrameTransform,
        thresholds: &SeverityThresholds,
        locks: &AssignmentLocks,
    ) -> Result<DecisionOutcome, GeometryError> {
        if let Some(unit_id) = locks.holder_of(&threat.id) {
            return Ok(DecisionOutcome::Engaged {
                unit_id: unit_id.clone(),
            });
        }

        let center = transform
            .center(&self.base_id)
            .ok_or_else(|| GeometryError::UnknownFrame(self.base_id.clone()))?;
        let distance_km = transform.distance_km(&Position::from(center), &threat.position)?;
        let speed = transform
            .geometry()
            .speed_local_units(threat.velocity, &threat.position);
        let severity = classify(distance_km, speed, thresholds);

        let category = threat
            .as_threat()
            .map(|t| t.category)
            .unwrap_or_default();

        let mut decision = Decision {
            threat_id: threat.id.clone(),
            severity,
            action: DecisionAction::Monitor,
            unit_id: None,
        };

        if category == ThreatCategory::Jamming {
            let jammer = self.nearest_unit(registry, transform, EntityType::Jammer, &threat.position, locks, |e| {
                e.as_jammer().is_some_and(|j| j.is_idle())
            })?;
            // 空きジャマーがなければ監視とし、次の判断周期で再評価する
            if let Some(unit_id) = jammer {
                decision.action = DecisionAction::Jam;
                decision.unit_id = Some(unit_id);
            }
        } else if severity == ThreatSeverity::High {
            let launcher = self.nearest_unit(registry, transform, EntityType::Launcher, &threat.position, locks, |e| {
                e.as_launcher().is_some_and(|l| l.can_launch())
            })?;
            if let Some(unit_id) = launcher {
                decision.action = DecisionAction::Intercept;
                decision.unit_id = Some(unit_id);
            }
        }

        Ok(DecisionOutcome::Decided(decision))
    }

    /// 最寄りの割り当て可能ユニットを探索
    ///
    /// 登録順に線形探索し、脅威位置を各候補の座標系に変換して距離を比較します。
    /// 同距離の場合は先に登録された候補を選びます。
    fn nearest_unit(
        &self,
        registry: &EntityRegistry,
        transform: &FrameTransform,
        entity_type: EntityType,
        threat_position: &Position,
        locks: &AssignmentLocks,
        eligible: impl Fn(&Entity) -> bool,
    ) -> Result<Option<EntityId>, GeometryError> {
        let filter = EntityFilter::of(entity_type).owned_by(self.base_id.clone()).live();
        let mut best: Option<(&EntityId, f64)> = None;

        for candidate in registry.query(&filter) {
            if locks.is_unit_locked(&candidate.id) || !eligible(candidate) {
                continue;
            }
            let seen = transform.express_in(threat_position, &candidate.position.frame())?;
            let distance = transform.geometry().distance_km(&candidate.position, &seen)?;
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((&candidate.id, distance));
            }
        }

        Ok(best.map(|(id, _)| id.clone()))
    }
}
