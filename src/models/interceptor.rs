use crate::geometry::GeometryError;
use crate::models::common::{EntityId, Position, SimTime, Vec2};
use serde::Serialize;
use std::fmt;

/// 迎撃体の終了理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptorEndReason {
    /// 目標に命中した
    Hit,
    /// 目標が消失した（他の迎撃体による撃破・着弾など）
    TargetLost,
    /// 飛翔時間の上限に達した
    TravelCap,
}

impl fmt::Display for InterceptorEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptorEndReason::Hit => f.write_str("hit"),
            InterceptorEndReason::TargetLost => f.write_str("target_lost"),
            InterceptorEndReason::TravelCap => f.write_str("travel_cap"),
        }
    }
}

/// 迎撃体エンティティ固有の状態
///
/// 特定の脅威を直接追尾で追いかけます。毎ティック、目標の現在位置に
/// 向けて進路を取り直します（比例航法は使用しません）。
#[derive(Debug, Clone)]
pub struct Interceptor {
    /// 追尾対象の脅威ID
    pub target_id: EntityId,
    /// 速度（ネイティブ単位/tick）
    pub speed: f64,
    /// 発射したユニット（外部要求による生成では None）
    pub launched_by: Option<EntityId>,
    pub launched_at: SimTime,
    /// 飛翔ティック数
    pub flight_ticks: u32,
    /// 飛翔ティック数の上限
    pub max_flight_ticks: u32,
    pub end_reason: Option<InterceptorEndReason>,
}

impl Interceptor {
    pub fn new(
        target_id: EntityId,
        speed: f64,
        launched_by: Option<EntityId>,
        launched_at: SimTime,
        max_flight_ticks: u32,
    ) -> Self {
        Self {
            target_id,
            speed,
            launched_by,
            launched_at,
            flight_ticks: 0,
            max_flight_ticks,
            end_reason: None,
        }
    }

    /// 直接追尾で1ティック進める
    ///
    /// 目標を通り過ぎないよう移動量を目標までの距離でクリップします。
    ///
    /// # 引数
    ///
    /// * `position` - 迎撃体の現在位置
    /// * `target` - 目標の現在位置（迎撃体と同じ座標系で表現済みであること）
    ///
    /// # 戻り値
    ///
    /// 移動後の位置と速度
    pub fn pursue(&self, position: &Position, target: &Position) -> Result<(Position, Vec2), GeometryError> {
        if !position.shares_frame(target) {
            return Err(GeometryError::IncompatibleCoordinates {
                left: position.frame(),
                right: target.frame(),
            });
        }
        let to_target = target.planar() - position.planar();
        let step = self.speed.min(to_target.magnitude());
        let velocity = to_target.normalize() * step;
        Ok((position.with_planar(position.planar() + velocity), velocity))
    }

    pub fn travel_cap_reached(&self) -> bool {
        self.flight_ticks >= self.max_flight_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pursue_heads_for_live_target() {
        let m = Interceptor::new("T1".into(), 1.0, None, 0, 100);
        let (p, v) = m
            .pursue(&Position::local("B1", 0.0, 0.0), &Position::local("B1", 0.0, 10.0))
            .unwrap();
        assert_eq!(p, Position::local("B1", 0.0, 1.0));
        assert_eq!(v, Vec2::new(0.0, 1.0));
    }

    #[test]
    fn test_pursue_clamps_final_step() {
        let m = Interceptor::new("T1".into(), 5.0, None, 0, 100);
        let (p, _) = m
            .pursue(&Position::local("B1", 0.0, 0.0), &Position::local("B1", 3.0, 4.0))
            .unwrap();
        assert!(p.planar().distance(&Vec2::new(3.0, 4.0)) < 1e-12);
    }

    #[test]
    fn test_pursue_requires_shared_frame() {
        let m = Interceptor::new("T1".into(), 1.0, None, 0, 100);
        assert!(m
            .pursue(&Position::local("B1", 0.0, 0.0), &Position::geo(35.0, 139.0))
            .is_err());
    }
}
