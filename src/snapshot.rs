//! # Snapshot モジュール
//!
//! 1ステップ完了時点のワールド状態を、読み取り側へ公開できる形に写し取ります。
//! スナップショットはステップの途中では作成されないため、読み取り側が
//! 適用途中のフレームを観測することはありません。

use crate::models::{Entity, EntityId, EntityKind, EntityType, JammerState, LauncherState, Position, SimTime, Vec2};
use crate::projection::BaseScreenMap;
use crate::simulation::Engine;
use serde::Serialize;

/// エンティティ1件分の公開状態
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub position: Position,
    pub velocity: Vec2,
    pub owner: Option<EntityId>,
    pub state: String,
}

impl EntityView {
    fn from_entity(entity: &Entity, now: SimTime) -> Self {
        Self {
            id: entity.id.clone(),
            entity_type: entity.entity_type(),
            position: entity.position.clone(),
            velocity: entity.velocity,
            owner: entity.owner.clone(),
            state: describe_state(entity, now),
        }
    }
}

fn describe_state(entity: &Entity, now: SimTime) -> String {
    if entity.reached {
        return "reached".to_string();
    }
    if entity.exploded {
        return "exploded".to_string();
    }
    match &entity.kind {
        EntityKind::Threat(t) => format!("inbound:{}", t.category),
        EntityKind::Interceptor(i) => format!("pursuing:{}", i.target_id),
        EntityKind::Sensor(s) if s.is_jammed(now) => format!("jammed:{}", s.frequency),
        EntityKind::Sensor(s) => format!("scanning:{}", s.frequency),
        EntityKind::Launcher(l) => match &l.state {
            LauncherState::Idle => format!("idle:{}", l.current_missiles),
            LauncherState::Busy { threat_id, .. } => format!("busy:{}", threat_id),
        },
        EntityKind::Jammer(j) => match &j.state {
            JammerState::Idle => "idle".to_string(),
            JammerState::Active { engaged: Some(t), .. } => format!("active:{}", t),
            JammerState::Active { engaged: None, .. } => "active".to_string(),
            JammerState::Cooldown { .. } => "cooldown".to_string(),
        },
        EntityKind::Base(b) => b.name.clone(),
    }
}

/// ワールドスナップショット
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub time: SimTime,
    pub entities: Vec<EntityView>,
    pub base_screen_map: BaseScreenMap,
}

impl WorldSnapshot {
    /// エンジンの現在状態を写し取る
    pub fn capture(engine: &Engine) -> Self {
        let now = engine.now();
        Self {
            tick: engine.tick(),
            time: now,
            entities: engine
                .registry()
                .iter()
                .map(|e| EntityView::from_entity(e, now))
                .collect(),
            base_screen_map: engine.screen_map().clone(),
        }
    }

    pub fn entity(&self, id: &str) -> Option<&EntityView> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn count(&self, entity_type: EntityType) -> usize {
        self.entities.iter().filter(|e| e.entity_type == entity_type).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SpawnIntent;
    use crate::models::{Base, GeoPoint, Launcher};
    use crate::scenario::EngineConfig;

    #[test]
    fn test_capture_lists_entities_and_screen_map() {
        let mut engine = Engine::new(EngineConfig::default(), 30, 10_000);
        engine.add_base("B1", Base::new("Alpha", GeoPoint::new(35.0, 139.0))).unwrap();
        engine
            .add_unit(
                "B1",
                Entity::new("L1", Position::local("B1", 1.0, 0.0), EntityKind::Launcher(Launcher::new(3))),
            )
            .unwrap();
        engine
            .spawn(SpawnIntent::threat(Position::local("B1", 50.0, 0.0), Position::local("B1", 0.0, 0.0), 0.02).with_id("T1"))
            .unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.tick, 0);
        assert_eq!(snapshot.count(EntityType::Threat), 1);
        assert_eq!(snapshot.entity("L1").unwrap().state, "idle:3");
        assert_eq!(snapshot.entity("T1").unwrap().state, "inbound:kinetic");
        assert_eq!(snapshot.entity("B1").unwrap().state, "Alpha");
        assert!(snapshot.base_screen_map.get("B1").is_some());

        let yaml = serde_yaml::to_string(&snapshot).unwrap();
        assert!(yaml.contains("type: launcher"));
    }
}
