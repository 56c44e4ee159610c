//! # Guidance モジュール
//!
//! 迎撃体発射時の会合点計算を提供します。
//!
//! ランチャーの座標系で、目標が等速直線運動すると仮定したときに
//! 速度 `s` の迎撃体が最短で会合できる時間 τ を二次方程式から求めます。
//!
//! ```text
//! |r + vτ| = sτ
//! (|v|² − s²)τ² + 2(r·v)τ + |r|² = 0
//! ```
//!
//! 正の実数解がない場合は τ = 1 tick の暫定値を用い、`degraded` として扱います。
//! 暫定値は会合を保証しません（発射後は直接追尾で目標を追います）。

use crate::geometry::GeometryError;
use crate::models::common::{Position, Vec2};
use crate::transform::FrameTransform;
use tracing::warn;

const EPSILON: f64 = 1e-9;

/// 会合解
#[derive(Debug, Clone, PartialEq)]
pub struct InterceptSolution {
    /// 会合までの時間（tick）
    pub time_to_intercept: f64,
    /// 予測会合点（ランチャー座標系）
    pub lead_point: Vec2,
    /// 初期速度ベクトル（ランチャー座標系）
    pub launch_velocity: Vec2,
    /// 正の解が得られず暫定値を用いた
    pub degraded: bool,
}

/// 会合時間を求める
///
/// # 引数
///
/// * `launcher` - 発射位置
/// * `target` - 目標の現在位置（発射位置と同じ座標系）
/// * `target_velocity` - 目標速度（1tickあたり）
/// * `speed` - 迎撃体速度（1tickあたり）
///
/// # 戻り値
///
/// 最小の正の会合時間と、暫定値かどうか
pub fn time_to_intercept(launcher: Vec2, target: Vec2, target_velocity: Vec2, speed: f64) -> (f64, bool) {
    let r = target - launcher;
    let a = target_velocity.magnitude_squared() - speed * speed;
    let b = 2.0 * r.dot(&target_velocity);
    let c = r.magnitude_squared();

    let root = if a.abs() < EPSILON {
        // 速度が等しい場合は一次方程式 bτ + c = 0
        if b.abs() < EPSILON {
            None
        } else {
            Some(-c / b).filter(|t| *t > 0.0)
        }
    } else {
        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 {
            None
        } else {
            let sqrt_d = discriminant.sqrt();
            let t1 = (-b - sqrt_d) / (2.0 * a);
            let t2 = (-b + sqrt_d) / (2.0 * a);
            [t1, t2]
                .into_iter()
                .filter(|t| *t > 0.0)
                .min_by(|x, y| x.total_cmp(y))
        }
    };

    match root {
        Some(t) => (t, false),
        None => (1.0, true),
    }
}

/// 会合解を求める
///
/// 会合点 `target + vτ` に向けた初期速度を併せて返します。
pub fn solve_intercept(launcher: Vec2, target: Vec2, target_velocity: Vec2, speed: f64) -> InterceptSolution {
    let (tau, degraded) = time_to_intercept(launcher, target, target_velocity, speed);
    let lead_point = target + target_velocity * tau;
    InterceptSolution {
        time_to_intercept: tau,
        lead_point,
        launch_velocity: (lead_point - launcher).normalize() * speed,
        degraded,
    }
}

/// 発射計画を立てる
///
/// 目標の位置と速度をランチャーの座標系に変換してから会合解を求めます。
/// 暫定値を用いた場合は警告を出力します。
///
/// # 引数
///
/// * `launcher` - ランチャー位置
/// * `target` - 目標位置（任意の座標系）
/// * `target_velocity` - 目標速度（`target` の座標系）
/// * `speed` - 迎撃体速度（ランチャー座標系の単位/tick）
/// * `transform` - 座標変換器
pub fn plan_launch(
    launcher: &Position,
    target: &Position,
    target_velocity: Vec2,
    speed: f64,
    transform: &FrameTransform,
) -> Result<InterceptSolution, GeometryError> {
    let frame = launcher.frame();
    let target_here = transform.express_in(target, &frame)?;
    let velocity_here = transform.velocity_in(target_velocity, target, &frame)?;

    let solution = solve_intercept(launcher.planar(), target_here.planar(), velocity_here, speed);
    if solution.degraded {
        warn!(
            launcher = %launcher,
            target = %target_here,
            speed,
            "INTERCEPT_DEGRADED: 会合解が得られないため暫定値 τ=1 を使用します"
        );
    }
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stationary_target_tau_is_distance_over_speed() {
        let (tau, degraded) = time_to_intercept(Vec2::ZERO, Vec2::new(3.0, 4.0), Vec2::ZERO, 0.5);
        assert!(!degraded);
        assert!((tau - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_head_on_target() {
        // 目標が 0.5/tick で接近、迎撃体 0.5/tick → 相対 1.0/tick で 10 単位
        let (tau, degraded) = time_to_intercept(Vec2::ZERO, Vec2::new(10.0, 0.0), Vec2::new(-0.5, 0.0), 0.5);
        assert!(!degraded);
        assert!((tau - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_equal_speed_uses_linear_case() {
        // |v| = s、目標は接近中
        let (tau, degraded) = time_to_intercept(Vec2::ZERO, Vec2::new(10.0, 0.0), Vec2::new(-1.0, 0.0), 1.0);
        assert!(!degraded);
        assert!((tau - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_faster_receding_target_falls_back() {
        let (tau, degraded) = time_to_intercept(Vec2::ZERO, Vec2::new(10.0, 0.0), Vec2::new(2.0, 0.0), 1.0);
        assert!(degraded);
        assert_eq!(tau, 1.0);
    }

    #[test]
    fn test_solution_leads_moving_target() {
        let s = solve_intercept(Vec2::ZERO, Vec2::new(10.0, 0.0), Vec2::new(0.0, 0.1), 1.0);
        assert!(!s.degraded);
        assert!(s.lead_point.y > 0.0);
        assert!((s.launch_velocity.magnitude() - 1.0).abs() < 1e-12);
        // 会合点までの距離 = 速度 × τ
        assert!((s.lead_point.magnitude() - s.time_to_intercept).abs() < 1e-9);
    }
}
