// 基本的なデータ型と数学ユーティリティ
pub mod common;

// 各エンティティ種別の固有状態
pub mod threat;
pub mod interceptor;
pub mod sensor;
pub mod launcher;
pub mod jammer;
pub mod base;
pub mod command_post;

// 便利な re-export
pub use common::*;
pub use threat::{ApproachProfile, Threat, ThreatMotion, ThreatSalvo};
pub use interceptor::{Interceptor, InterceptorEndReason};
pub use sensor::{DetectionStats, Sensor, SensorRole, ThreatContact};
pub use launcher::{LaunchRecord, LaunchStats, Launcher, LauncherState};
pub use jammer::{Emitter, Jammer, JammerState};
pub use base::{Base, SubSite};
pub use command_post::{AssignmentLocks, CommandPost, DecisionAction, ThreatSeverity};

/// 種別ごとの固有状態
#[derive(Debug, Clone)]
pub enum EntityKind {
    Threat(Threat),
    Interceptor(Interceptor),
    Sensor(Sensor),
    Launcher(Launcher),
    Jammer(Jammer),
    Base(Base),
}

/// シミュレーション上のエンティティ
///
/// 全種別に共通の属性（ID・位置・所属・速度・終端フラグ）と、
/// 種別固有の状態 `kind` を持ちます。
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    /// 所属拠点（None は無所属。ジャマーの場合は敵性）
    pub owner: Option<EntityId>,
    pub position: Position,
    /// 1ティックあたりの移動量（位置と同じ座標系のネイティブ単位）
    pub velocity: Vec2,
    pub exploded: bool,
    pub reached: bool,
    pub kind: EntityKind,
}

macro_rules! kind_accessors {
    ($($variant:ident => $get:ident, $get_mut:ident;)*) => {
        $(
            pub fn $get(&self) -> Option<&$variant> {
                match &self.kind {
                    EntityKind::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            pub fn $get_mut(&mut self) -> Option<&mut $variant> {
                match &mut self.kind {
                    EntityKind::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        )*
    };
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, position: Position, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            owner: None,
            position,
            velocity: Vec2::ZERO,
            exploded: false,
            reached: false,
            kind,
        }
    }

    pub fn with_owner(mut self, owner: Option<EntityId>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_velocity(mut self, velocity: Vec2) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn entity_type(&self) -> EntityType {
        match &self.kind {
            EntityKind::Threat(_) => EntityType::Threat,
            EntityKind::Interceptor(_) => EntityType::Interceptor,
            EntityKind::Sensor(_) => EntityType::Sensor,
            EntityKind::Launcher(_) => EntityType::Launcher,
            EntityKind::Jammer(_) => EntityType::Jammer,
            EntityKind::Base(_) => EntityType::Base,
        }
    }

    /// 爆発済みまたは到達済み
    pub fn is_terminal(&self) -> bool {
        self.exploded || self.reached
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    /// 爆発させる（既に爆発済みなら false）
    pub fn explode(&mut self) -> bool {
        if self.exploded {
            return false;
        }
        self.exploded = true;
        self.velocity = Vec2::ZERO;
        true
    }

    /// 敵性か（脅威、および所属のないジャマー）
    pub fn is_hostile(&self) -> bool {
        match &self.kind {
            EntityKind::Threat(_) => true,
            EntityKind::Jammer(_) => self.owner.is_none(),
            _ => false,
        }
    }

    kind_accessors! {
        Threat => as_threat, as_threat_mut;
        Interceptor => as_interceptor, as_interceptor_mut;
        Sensor => as_sensor, as_sensor_mut;
        Launcher => as_launcher, as_launcher_mut;
        Jammer => as_jammer, as_jammer_mut;
        Base => as_base, as_base_mut;
    }
}
