use crate::geometry::{Geometry, GeometryError};
use crate::models::common::{EntityId, Position, SimTime, ThreatCategory, Vec2};
use crate::models::jammer::Emitter;

/// 脅威エンティティ固有の状態
///
/// 出現位置から目標位置に向かって移動する敵性エンティティです。
/// 拠点に近づくと減速し（終末進入）、到達判定範囲に入ると着弾します。
#[derive(Debug, Clone)]
pub struct Threat {
    /// 目標位置
    pub target: Position,
    /// 移動速度（ネイティブ単位/tick）
    pub speed: f64,
    /// 脅威区分
    pub category: ThreatCategory,
    /// 出現時刻
    pub spawned_at: SimTime,
    /// 妨害電波源（妨害型脅威のみ）
    pub emitter: Option<Emitter>,
    /// 参照カタログ上の名称
    pub catalog_name: Option<String>,
}

/// 終末進入のパラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproachProfile {
    /// 減速を開始する目標までの距離（km）
    pub slow_approach_km: f64,
    /// 減速時の最小速度倍率
    pub min_factor: f64,
    /// 到達判定距離（km）
    pub arrival_km: f64,
}

/// 1ティック分の移動結果
#[derive(Debug, Clone, PartialEq)]
pub struct ThreatMotion {
    pub position: Position,
    pub velocity: Vec2,
    pub arrived: bool,
}

impl Threat {
    pub fn new(target: Position, speed: f64, category: ThreatCategory, spawned_at: SimTime) -> Self {
        Self {
            target,
            speed,
            category,
            spawned_at,
            emitter: None,
            catalog_name: None,
        }
    }

    pub fn with_emitter(mut self, emitter: Option<Emitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_catalog_name(mut self, name: Option<String>) -> Self {
        self.catalog_name = name;
        self
    }

    /// 目標方向への初期速度
    ///
    /// 目標と座標系が異なる場合はゼロベクトル。
    pub fn initial_velocity(&self, position: &Position) -> Vec2 {
        if !position.shares_frame(&self.target) {
            return Vec2::ZERO;
        }
        (self.target.planar() - position.planar()).normalize() * self.speed
    }

    /// 目標に向かって1ティック進める
    ///
    /// 目標までの距離が `slow_approach_km` を下回ると速度を線形に落とし、
    /// 目標を通り過ぎないよう移動量を残距離でクリップします。
    ///
    /// # 引数
    ///
    /// * `position` - 現在位置
    /// * `geometry` - 距離計算器
    /// * `profile` - 終末進入パラメータ
    ///
    /// # 戻り値
    ///
    /// 移動後の位置・速度・到達判定
    pub fn advance(
        &self,
        position: &Position,
        geometry: &Geometry,
        profile: &ApproachProfile,
    ) -> Result<ThreatMotion, GeometryError> {
        let distance_km = geometry.distance_km(position, &self.target)?;
        let to_target = self.target.planar() - position.planar();
        let remaining = to_target.magnitude();

        let ramp = if profile.slow_approach_km > 0.0 {
            (distance_km / profile.slow_approach_km).clamp(profile.min_factor, 1.0)
        } else {
            1.0
        };
        let step = (self.speed * ramp).min(remaining);
        let velocity = to_target.normalize() * step;
        let next = position.with_planar(position.planar() + velocity);
        let arrived = geometry.distance_km(&next, &self.target)? <= profile.arrival_km;

        Ok(ThreatMotion {
            position: next,
            velocity,
            arrived,
        })
    }
}

/// 脅威の一斉出現（リング配置）
///
/// 中心に1機、その外側に同心円状に等角度間隔で配置します。
/// 外側リングでは半角オフセットを指定できます。
#[derive(Debug, Clone)]
pub struct ThreatSalvo {
    pub id: String,
    pub center: Position,
    pub count: u32,
    /// リング間隔（ネイティブ単位）
    pub ring_spacing: f64,
    /// 配置開始角度（度）
    pub start_angle_deg: f64,
    pub ring_half_offset: bool,
}

impl ThreatSalvo {
    /// 各機の配置位置を計算
    pub fn generate_positions(&self) -> Vec<Position> {
        let mut positions = Vec::with_capacity(self.count as usize);
        let mut remaining = self.count as usize;
        let center = self.center.planar();

        if remaining == 0 || self.ring_spacing <= 0.0 {
            return positions;
        }

        positions.push(self.center.clone());
        remaining -= 1;

        let mut ring = 1usize;
        while remaining > 0 {
            let radius = ring as f64 * self.ring_spacing;
            let capacity = ((2.0 * std::f64::consts::PI * radius / self.ring_spacing) as usize).max(1);
            let in_ring = remaining.min(capacity);
            let angle_step = 360.0 / in_ring as f64;
            let offset = if self.ring_half_offset && ring > 1 {
                angle_step / 2.0
            } else {
                0.0
            };

            for i in 0..in_ring {
                let angle = (self.start_angle_deg + i as f64 * angle_step + offset).to_radians();
                let p = center + Vec2::new(radius * angle.cos(), radius * angle.sin());
                positions.push(self.center.with_planar(p));
            }

            remaining -= in_ring;
            ring += 1;
        }

        positions
    }

    /// 各機のIDと配置位置
    pub fn members(&self) -> Vec<(EntityId, Position)> {
        self.generate_positions()
            .into_iter()
            .enumerate()
            .map(|(index, p)| (format!("{}_T{:03}", self.id, index + 1), p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ApproachProfile {
        ApproachProfile {
            slow_approach_km: 1.0,
            min_factor: 0.25,
            arrival_km: 0.05,
        }
    }

    #[test]
    fn test_advance_moves_toward_target_at_speed() {
        let threat = Threat::new(Position::local("B1", 0.0, 0.0), 0.5, ThreatCategory::Kinetic, 0);
        let m = threat
            .advance(&Position::local("B1", 100.0, 0.0), &Geometry::new(0.1), &profile())
            .unwrap();
        assert_eq!(m.position, Position::local("B1", 99.5, 0.0));
        assert_eq!(m.velocity, Vec2::new(-0.5, 0.0));
        assert!(!m.arrived);
    }

    #[test]
    fn test_advance_slows_inside_approach_radius() {
        let threat = Threat::new(Position::local("B1", 0.0, 0.0), 0.4, ThreatCategory::Kinetic, 0);
        // 0.5 km 手前 → 倍率 0.5
        let m = threat
            .advance(&Position::local("B1", 5.0, 0.0), &Geometry::new(0.1), &profile())
            .unwrap();
        assert!((m.velocity.magnitude() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_advance_does_not_overshoot_and_arrives() {
        let threat = Threat::new(Position::local("B1", 0.0, 0.0), 2.0, ThreatCategory::Kinetic, 0);
        let m = threat
            .advance(&Position::local("B1", 0.1, 0.0), &Geometry::new(0.1), &profile())
            .unwrap();
        assert_eq!(m.position, Position::local("B1", 0.0, 0.0));
        assert!(m.arrived);
    }

    #[test]
    fn test_advance_rejects_mixed_frames() {
        let threat = Threat::new(Position::geo(35.0, 139.0), 0.01, ThreatCategory::Kinetic, 0);
        assert!(threat
            .advance(&Position::local("B1", 0.0, 0.0), &Geometry::default(), &profile())
            .is_err());
    }

    #[test]
    fn test_salvo_ring_layout() {
        let salvo = ThreatSalvo {
            id: "W1".to_string(),
            center: Position::local("B1", 100.0, 0.0),
            count: 7,
            ring_spacing: 2.0,
            start_angle_deg: 0.0,
            ring_half_offset: false,
        };
        let members = salvo.members();
        assert_eq!(members.len(), 7);
        assert_eq!(members[0], ("W1_T001".to_string(), Position::local("B1", 100.0, 0.0)));
        // 1周目は半径 2.0、容量 6
        for (_, p) in &members[1..] {
            let d = p.planar().distance(&Vec2::new(100.0, 0.0));
            assert!((d - 2.0).abs() < 1e-9);
        }
    }
}
