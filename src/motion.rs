//! # Motion モジュール
//!
//! 1ティック分の移動と衝突判定を計算します。
//!
//! 計算はすべてティック開始時点で確定している状態から行い、結果は
//! [`FrameUpdate`] としてまとめてレジストリに適用します。計算の途中で
//! レジストリが書き換わることはありません。
//!
//! 処理順:
//! 1. 脅威の移動（地理座標の脅威はハンドオフ判定を先に行う）
//! 2. 迎撃体の直接追尾（このバッチで移動した後の脅威位置を追う）と衝突判定
//! 3. 稼働中の味方ジャマーによる無力化

use crate::geometry::GeometryError;
use crate::models::{
    ApproachProfile, Entity, EntityId, EntityKind, InterceptorEndReason, Position, Threat, Vec2,
};
use crate::registry::EntityRegistry;
use crate::transform::FrameTransform;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// 移動計算のパラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionParams {
    pub approach: ApproachProfile,
    /// 命中判定距離（km）
    pub collision_km: f64,
    /// ハンドオフ判定の度数しきい値
    pub handoff_deg: f64,
}

/// 位置・速度の更新
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMove {
    pub id: EntityId,
    pub position: Position,
    pub velocity: Vec2,
}

/// 地理座標から拠点局所座標への移行
#[derive(Debug, Clone, PartialEq)]
pub struct Handoff {
    pub threat_id: EntityId,
    pub base_id: EntityId,
    pub position: Position,
    pub velocity: Vec2,
    pub target: Position,
    pub speed: f64,
}

/// 迎撃体による撃破
#[derive(Debug, Clone, PartialEq)]
pub struct Kill {
    pub threat_id: EntityId,
    pub interceptor_id: EntityId,
    /// 爆発位置（脅威の位置）
    pub position: Position,
}

/// 1ティック分の更新内容
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameUpdate {
    pub handoffs: Vec<Handoff>,
    pub moves: Vec<EntityMove>,
    /// 飛翔ティック数を進める迎撃体
    pub flown: Vec<EntityId>,
    pub impacts: Vec<(EntityId, Position)>,
    pub kills: Vec<Kill>,
    pub retirements: Vec<(EntityId, InterceptorEndReason)>,
    /// (脅威ID, ジャマーID)
    pub neutralizations: Vec<(EntityId, EntityId)>,
    /// 計算できなかったエンティティ
    pub errors: Vec<(EntityId, GeometryError)>,
}

impl FrameUpdate {
    pub fn is_empty(&self) -> bool {
        self.handoffs.is_empty()
            && self.moves.is_empty()
            && self.flown.is_empty()
            && self.impacts.is_empty()
            && self.kills.is_empty()
            && self.retirements.is_empty()
            && self.neutralizations.is_empty()
    }

    /// このバッチで終端した脅威
    pub fn terminated_threats(&self) -> Vec<EntityId> {
        self.impacts
            .iter()
            .map(|(id, _)| id.clone())
            .chain(self.kills.iter().map(|k| k.threat_id.clone()))
            .chain(self.neutralizations.iter().map(|(id, _)| id.clone()))
            .collect()
    }

    /// 更新をレジストリに一括適用
    pub fn apply(&self, registry: &mut EntityRegistry) {
        for h in &self.handoffs {
            if let Some(e) = registry.get_mut(&h.threat_id) {
                e.owner = Some(h.base_id.clone());
                e.position = h.position.clone();
                e.velocity = h.velocity;
                if let Some(t) = e.as_threat_mut() {
                    t.target = h.target.clone();
                    t.speed = h.speed;
                }
            }
        }
        for m in &self.moves {
            if let Some(e) = registry.get_mut(&m.id) {
                e.position = m.position.clone();
                e.velocity = m.velocity;
            }
        }
        for id in &self.flown {
            if let Some(i) = registry.get_mut(id).and_then(|e| e.as_interceptor_mut()) {
                i.flight_ticks += 1;
            }
        }
        for (id, _) in &self.impacts {
            if let Some(e) = registry.get_mut(id) {
                e.reached = true;
                e.explode();
            }
        }
        for kill in &self.kills {
            if let Some(e) = registry.get_mut(&kill.threat_id) {
                e.explode();
            }
            if let Some(e) = registry.get_mut(&kill.interceptor_id) {
                e.explode();
                if let Some(i) = e.as_interceptor_mut() {
                    i.end_reason = Some(InterceptorEndReason::Hit);
                }
            }
        }
        for (id, reason) in &self.retirements {
            if let Some(e) = registry.get_mut(id) {
                e.explode();
                if let Some(i) = e.as_interceptor_mut() {
                    i.end_reason = Some(*reason);
                }
            }
        }
        for (threat_id, _) in &self.neutralizations {
            if let Some(e) = registry.get_mut(threat_id) {
                e.explode();
            }
        }
    }
}

/// 地理座標の脅威を拠点局所座標へ移行した状態を計算
fn handoff(entity: &Entity, threat: &Threat, base_id: &str, transform: &FrameTransform) -> Result<Handoff, GeometryError> {
    let frame = crate::models::Frame::Local(base_id.to_string());
    let position = transform.express_in(&entity.position, &frame)?;
    let target = transform.express_in(&threat.target, &frame)?;
    let velocity = transform.velocity_in(entity.velocity, &entity.position, &frame)?;

    // 速度は目標方向の単位ベクトルを変換した長さで換算する
    let heading = (threat.target.planar() - entity.position.planar()).normalize() * threat.speed;
    let speed = transform.velocity_in(heading, &entity.position, &frame)?.magnitude();

    Ok(Handoff {
        threat_id: entity.id.clone(),
        base_id: base_id.to_string(),
        position,
        velocity,
        target,
        speed,
    })
}

/// 1ティック分の更新を計算
///
/// # 引数
///
/// * `registry` - ティック開始時点のレジストリ
/// * `transform` - 座標変換器
/// * `params` - 移動計算パラメータ
///
/// # 戻り値
///
/// 適用前の更新内容
pub fn compute_frame(registry: &EntityRegistry, transform: &FrameTransform, params: &MotionParams) -> FrameUpdate {
    let geometry = transform.geometry();
    let mut update = FrameUpdate::default();

    // 脅威の移動後位置（このバッチで終端しなかったもの）
    let mut threat_positions: HashMap<EntityId, Position> = HashMap::new();
    let mut dead: HashSet<EntityId> = HashSet::new();

    for entity in registry.iter().filter(|e| e.is_live()) {
        let EntityKind::Threat(threat) = &entity.kind else {
            continue;
        };

        let mut position = entity.position.clone();
        let mut threat = threat.clone();
        if let Some(base_id) = transform.handoff_target(&entity.position, params.handoff_deg) {
            match handoff(entity, &threat, &base_id, transform) {
                Ok(h) => {
                    position = h.position.clone();
                    threat.target = h.target.clone();
                    threat.speed = h.speed;
                    update.handoffs.push(h);
                }
                Err(err) => {
                    update.errors.push((entity.id.clone(), err));
                    continue;
                }
            }
        }

        match threat.advance(&position, geometry, &params.approach) {
            Ok(motion) => {
                trace!(threat_id = %entity.id, position = %motion.position, "THREAT_MOVE");
                if motion.arrived {
                    update.impacts.push((entity.id.clone(), motion.position.clone()));
                    dead.insert(entity.id.clone());
                } else {
                    threat_positions.insert(entity.id.clone(), motion.position.clone());
                }
                update.moves.push(EntityMove {
                    id: entity.id.clone(),
                    position: motion.position,
                    velocity: motion.velocity,
                });
            }
            Err(err) => update.errors.push((entity.id.clone(), err)),
        }
    }

    for entity in registry.iter().filter(|e| e.is_live()) {
        let EntityKind::Interceptor(interceptor) = &entity.kind else {
            continue;
        };
        update.flown.push(entity.id.clone());

        let target = if dead.contains(&interceptor.target_id) {
            None
        } else {
            threat_positions.get(&interceptor.target_id).cloned()
        };
        let Some(target_position) = target else {
            update.retirements.push((entity.id.clone(), InterceptorEndReason::TargetLost));
            continue;
        };

        let pursued = transform
            .express_in(&target_position, &entity.position.frame())
            .and_then(|seen| {
                let (position, velocity) = interceptor.pursue(&entity.position, &seen)?;
                let separation = geometry.distance_km(&position, &seen)?;
                Ok((position, velocity, separation))
            });

        match pursued {
            Ok((position, velocity, separation)) => {
                update.moves.push(EntityMove {
                    id: entity.id.clone(),
                    position,
                    velocity,
                });
                if separation < params.collision_km {
                    dead.insert(interceptor.target_id.clone());
                    threat_positions.remove(&interceptor.target_id);
                    update.kills.push(Kill {
                        threat_id: interceptor.target_id.clone(),
                        interceptor_id: entity.id.clone(),
                        position: target_position,
                    });
                } else if interceptor.flight_ticks + 1 > interceptor.max_flight_ticks {
                    update.retirements.push((entity.id.clone(), InterceptorEndReason::TravelCap));
                }
            }
            Err(err) => update.errors.push((entity.id.clone(), err)),
        }
    }

    for entity in registry.iter().filter(|e| e.is_live() && e.owner.is_some()) {
        let Some(jammer) = entity.as_jammer() else {
            continue;
        };
        let Some(threat_id) = jammer.engaged_threat() else {
            continue;
        };
        let Some(threat_position) = threat_positions.get(threat_id) else {
            continue;
        };
        match transform.distance_km(&entity.position, threat_position) {
            Ok(d) if d < jammer.emitter.radius_km => {
                dead.insert(threat_id.clone());
                threat_positions.remove(threat_id);
                update.neutralizations.push((threat_id.clone(), entity.id.clone()));
            }
            Ok(_) => {}
            Err(err) => update.errors.push((entity.id.clone(), err)),
        }
    }

    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::models::{Emitter, GeoPoint, Interceptor, Jammer, ThreatCategory};

    fn params() -> MotionParams {
        MotionParams {
            approach: ApproachProfile {
                slow_approach_km: 1.0,
                min_factor: 0.25,
                arrival_km: 0.05,
            },
            collision_km: 0.05,
            handoff_deg: 0.02,
        }
    }

    fn transform() -> FrameTransform {
        let mut t = FrameTransform::new(Geometry::new(0.1));
        t.register_base("B1", GeoPoint::new(35.0, 139.0));
        t
    }

    fn threat(id: &str, x: f64, speed: f64) -> Entity {
        Entity::new(
            id,
            Position::local("B1", x, 0.0),
            EntityKind::Threat(Threat::new(Position::local("B1", 0.0, 0.0), speed, ThreatCategory::Kinetic, 0)),
        )
    }

    fn interceptor(id: &str, target: &str, x: f64, speed: f64) -> Entity {
        Entity::new(
            id,
            Position::local("B1", x, 0.0),
            EntityKind::Interceptor(Interceptor::new(target.into(), speed, None, 0, 400)),
        )
    }

    #[test]
    fn test_single_kill_per_threat() {
        let t = transform();
        let mut r = EntityRegistry::new();
        r.insert(threat("T1", 30.0, 0.05)).unwrap();
        r.insert(interceptor("M1", "T1", 29.5, 0.5)).unwrap();
        r.insert(interceptor("M2", "T1", 29.6, 0.5)).unwrap();

        let update = compute_frame(&r, &t, &params());
        assert_eq!(update.kills.len(), 1);
        assert_eq!(update.kills[0].interceptor_id, "M1");
        assert_eq!(update.retirements, vec![("M2".to_string(), InterceptorEndReason::TargetLost)]);

        update.apply(&mut r);
        assert!(r.get("T1").unwrap().exploded);
        assert!(r.get("M1").unwrap().exploded);
        assert_eq!(
            r.get("M2").unwrap().as_interceptor().unwrap().end_reason,
            Some(InterceptorEndReason::TargetLost)
        );
    }

    #[test]
    fn test_missing_target_retires_interceptor() {
        let t = transform();
        let mut r = EntityRegistry::new();
        r.insert(interceptor("M1", "GHOST", 0.0, 0.5)).unwrap();
        let update = compute_frame(&r, &t, &params());
        assert_eq!(update.retirements, vec![("M1".to_string(), InterceptorEndReason::TargetLost)]);
    }

    #[test]
    fn test_threat_impact_at_target() {
        let t = transform();
        let mut r = EntityRegistry::new();
        r.insert(threat("T1", 0.3, 0.5)).unwrap();
        let update = compute_frame(&r, &t, &params());
        assert_eq!(update.impacts.len(), 1);
        update.apply(&mut r);
        let e = r.get("T1").unwrap();
        assert!(e.reached && e.exploded);
    }

    #[test]
    fn test_travel_cap() {
        let t = transform();
        let mut r = EntityRegistry::new();
        r.insert(threat("T1", 100.0, 0.0)).unwrap();
        let mut m = interceptor("M1", "T1", 0.0, 0.1);
        if let Some(i) = m.as_interceptor_mut() {
            i.flight_ticks = 400;
        }
        r.insert(m).unwrap();
        let update = compute_frame(&r, &t, &params());
        assert_eq!(update.retirements, vec![("M1".to_string(), InterceptorEndReason::TravelCap)]);
    }

    #[test]
    fn test_geo_threat_hands_off_once() {
        let t = transform();
        let mut r = EntityRegistry::new();
        let e = Entity::new(
            "T1",
            Position::geo(35.01, 139.0),
            EntityKind::Threat(Threat::new(Position::geo(35.0, 139.0), 0.0001, ThreatCategory::Kinetic, 0)),
        )
        .with_velocity(Vec2::new(0.0, -0.0001));
        r.insert(e).unwrap();

        let update = compute_frame(&r, &t, &params());
        assert_eq!(update.handoffs.len(), 1);
        let h = &update.handoffs[0];
        assert_eq!(h.base_id, "B1");
        assert!((h.speed - 0.0001 * 1113.2).abs() < 1e-6);
        update.apply(&mut r);

        let e = r.get("T1").unwrap();
        assert_eq!(e.owner.as_deref(), Some("B1"));
        assert!(matches!(e.position, Position::Local { .. }));

        // 2回目は局所座標のまま移動する
        let update = compute_frame(&r, &t, &params());
        assert!(update.handoffs.is_empty());
        assert_eq!(update.moves.len(), 1);
    }

    #[test]
    fn test_active_friendly_jammer_neutralizes_engaged_threat() {
        let t = transform();
        let mut r = EntityRegistry::new();
        r.insert(threat("T1", 10.0, 0.01)).unwrap();
        let mut jammer = Jammer::new(Emitter {
            radius_km: 2.0,
            frequency: "2GHz".into(),
        });
        jammer.engage("T1".into(), 0, 3000);
        r.insert(
            Entity::new("J1", Position::local("B1", 0.0, 0.0), EntityKind::Jammer(jammer))
                .with_owner(Some("B1".into())),
        )
        .unwrap();

        let update = compute_frame(&r, &t, &params());
        assert_eq!(update.neutralizations, vec![("T1".to_string(), "J1".to_string())]);
        assert_eq!(update.terminated_threats(), vec!["T1".to_string()]);
    }
}
