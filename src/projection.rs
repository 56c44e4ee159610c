//! # Projection モジュール
//!
//! 表示用の投影（パン・ズーム）と、拠点ごとの画面座標の対応表を提供します。
//!
//! 対応表は投影が変更されるたびに再計算され、エンジンはスナップショットごとに
//! 最新の対応表を公開します。描画側の平滑化は [`ScreenSmoother`] で行い、
//! エンジンからは呼び出しません。

use crate::geometry::KM_PER_DEGREE;
use crate::models::common::{EntityId, GeoPoint, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// 表示投影
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewProjection {
    /// 画面中心の地理座標
    pub center: GeoPoint,
    /// 1km あたりのピクセル数
    pub pixels_per_km: f64,
}

impl Default for ViewProjection {
    fn default() -> Self {
        Self {
            center: GeoPoint::new(0.0, 0.0),
            pixels_per_km: 10.0,
        }
    }
}

impl ViewProjection {
    /// 地理座標を画面座標へ投影（x は右、y は下が正）
    pub fn project(&self, point: GeoPoint) -> Vec2 {
        let east_km = (point.lng - self.center.lng) * self.center.lat.to_radians().cos() * KM_PER_DEGREE;
        let north_km = (point.lat - self.center.lat) * KM_PER_DEGREE;
        Vec2::new(east_km * self.pixels_per_km, -north_km * self.pixels_per_km)
    }
}

/// 拠点IDから画面座標への対応表
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BaseScreenMap {
    pub entries: BTreeMap<EntityId, Vec2>,
}

impl BaseScreenMap {
    /// 投影と拠点中心から対応表を作成
    pub fn compute<'a>(
        projection: &ViewProjection,
        bases: impl IntoIterator<Item = (&'a EntityId, &'a GeoPoint)>,
    ) -> Self {
        let entries = bases
            .into_iter()
            .map(|(id, center)| (id.clone(), projection.project(*center)))
            .collect();
        Self { entries }
    }

    pub fn get(&self, base_id: &str) -> Option<Vec2> {
        self.entries.get(base_id).copied()
    }
}

/// 画面座標の指数平滑化（描画側で使用）
#[derive(Debug, Clone)]
pub struct ScreenSmoother {
    /// 1回の更新で目標に近づく割合（0〜1）
    pub alpha: f64,
    positions: HashMap<EntityId, Vec2>,
}

impl ScreenSmoother {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            positions: HashMap::new(),
        }
    }

    /// 目標位置に向けて平滑化した表示位置を返す
    ///
    /// 初回は目標位置をそのまま返します。
    pub fn update(&mut self, id: &str, target: Vec2) -> Vec2 {
        let next = match self.positions.get(id) {
            Some(current) => *current + (target - *current) * self.alpha,
            None => target,
        };
        self.positions.insert(id.to_string(), next);
        next
    }

    /// 消滅したエンティティの状態を破棄
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.positions.retain(|id, _| keep(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_center_maps_to_origin() {
        let p = ViewProjection {
            center: GeoPoint::new(35.0, 139.0),
            pixels_per_km: 2.0,
        };
        assert_eq!(p.project(GeoPoint::new(35.0, 139.0)), Vec2::ZERO);
        // 北は画面上方向（y が負）
        let north = p.project(GeoPoint::new(35.01, 139.0));
        assert!(north.y < 0.0);
        assert!((north.y + 0.01 * KM_PER_DEGREE * 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_screen_map_recomputed_on_zoom() {
        let bases = vec![("B1".to_string(), GeoPoint::new(35.0, 139.1))];
        let mut projection = ViewProjection {
            center: GeoPoint::new(35.0, 139.0),
            pixels_per_km: 1.0,
        };
        let before = BaseScreenMap::compute(&projection, bases.iter().map(|(i, c)| (i, c)));
        projection.pixels_per_km = 3.0;
        let after = BaseScreenMap::compute(&projection, bases.iter().map(|(i, c)| (i, c)));
        let (b, a) = (before.get("B1").unwrap(), after.get("B1").unwrap());
        assert!((a.x - 3.0 * b.x).abs() < 1e-9);
    }

    #[test]
    fn test_smoother_converges() {
        let mut s = ScreenSmoother::new(0.5);
        assert_eq!(s.update("T1", Vec2::new(10.0, 0.0)), Vec2::new(10.0, 0.0));
        assert_eq!(s.update("T1", Vec2::new(20.0, 0.0)), Vec2::new(15.0, 0.0));
        assert_eq!(s.update("T1", Vec2::new(20.0, 0.0)), Vec2::new(17.5, 0.0));
        s.retain(|_| false);
        assert_eq!(s.update("T1", Vec2::new(0.0, 0.0)), Vec2::ZERO);
    }
}
