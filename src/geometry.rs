//! # Geometry モジュール
//!
//! 2点間の距離計算を提供します。
//!
//! - 地理座標同士: ハバーサイン公式による大円距離（地球半径 6371 km）
//! - 同一拠点の局所平面座標同士: ユークリッド距離 × 局所単位スケール
//!
//! 戻り値はいずれもキロメートルです。エンジン内の距離しきい値はすべて km で
//! 表現されるため、呼び出し側で単位が混在することはありません。
//! 座標系が一致しない組み合わせは `GeometryError` として即座に失敗します
//! （NaN を返して処理を継続することはありません）。

use crate::models::common::{EntityId, Frame, GeoPoint, Position, Vec2};
use thiserror::Error;

/// 地球半径（km）
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// 緯度1度あたりの距離（km、正距円筒近似）
pub const KM_PER_DEGREE: f64 = 111.32;

/// 局所平面1単位あたりの距離（km）の既定値
pub const DEFAULT_LOCAL_UNIT_KM: f64 = 0.1;

/// 座標計算エラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// 座標系の異なる2点間の距離が要求された（呼び出し側の誤り）
    #[error("座標系が一致しません: {left} と {right}")]
    IncompatibleCoordinates { left: Frame, right: Frame },
    /// 局所座標系の基準となる拠点が未登録
    #[error("未登録の局所座標系です: {0}")]
    UnknownFrame(EntityId),
}

/// ハバーサイン公式による大円距離（km）
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// 度単位での平面的な離隔（ハンドオフ判定用）
pub fn degree_separation(a: GeoPoint, b: GeoPoint) -> f64 {
    ((a.lat - b.lat).powi(2) + (a.lng - b.lng).powi(2)).sqrt()
}

/// 距離計算器
///
/// 局所平面の単位スケールを保持し、座標系ごとの距離計算を行います。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// 局所平面1単位あたりの距離（km）
    pub local_unit_km: f64,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            local_unit_km: DEFAULT_LOCAL_UNIT_KM,
        }
    }
}

impl Geometry {
    pub fn new(local_unit_km: f64) -> Self {
        Self { local_unit_km }
    }

    /// 2点間の距離（km）
    ///
    /// # 引数
    ///
    /// * `a` - 始点
    /// * `b` - 終点
    ///
    /// # 戻り値
    ///
    /// 距離（km）。座標系が一致しない場合は `IncompatibleCoordinates`
    pub fn distance_km(&self, a: &Position, b: &Position) -> Result<f64, GeometryError> {
        match (a, b) {
            (Position::Geo { lat: la, lng: ga }, Position::Geo { lat: lb, lng: gb }) => {
                Ok(haversine_km(GeoPoint::new(*la, *ga), GeoPoint::new(*lb, *gb)))
            }
            (
                Position::Local { frame: fa, x: xa, y: ya },
                Position::Local { frame: fb, x: xb, y: yb },
            ) if fa == fb => {
                let d = ((xa - xb).powi(2) + (ya - yb).powi(2)).sqrt();
                Ok(d * self.local_unit_km)
            }
            _ => Err(GeometryError::IncompatibleCoordinates {
                left: a.frame(),
                right: b.frame(),
            }),
        }
    }

    /// 1 km あたりのネイティブ単位数
    ///
    /// 地理座標では緯度方向の度数を基準とします。
    pub fn units_per_km(&self, frame: &Frame) -> f64 {
        match frame {
            Frame::Geo => 1.0 / KM_PER_DEGREE,
            Frame::Local(_) => 1.0 / self.local_unit_km,
        }
    }

    pub fn km_to_native(&self, km: f64, frame: &Frame) -> f64 {
        km * self.units_per_km(frame)
    }

    /// 速度ベクトルを km/tick に換算
    ///
    /// 地理座標の経度成分は地点の緯度で縮尺補正します。
    pub fn velocity_km(&self, velocity: Vec2, at: &Position) -> Vec2 {
        match at {
            Position::Geo { lat, .. } => Vec2::new(
                velocity.x * lat.to_radians().cos() * KM_PER_DEGREE,
                velocity.y * KM_PER_DEGREE,
            ),
            Position::Local { .. } => velocity * self.local_unit_km,
        }
    }

    /// 速度の大きさを局所単位/tick で返す（脅威度判定用）
    pub fn speed_local_units(&self, velocity: Vec2, at: &Position) -> f64 {
        self.velocity_km(velocity, at).magnitude() / self.local_unit_km
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_km(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        // 2πR/360
        assert!((d - 111.194_926_6).abs() < 1e-3);
    }

    #[test]
    fn test_distance_symmetric_and_non_negative() {
        let g = Geometry::default();
        let pairs = [
            (Position::geo(35.68, 139.76), Position::geo(35.70, 139.80)),
            (Position::geo(-10.0, 170.0), Position::geo(12.0, -175.0)),
            (Position::local("B1", 3.0, -4.0), Position::local("B1", -1.0, 2.5)),
        ];
        for (a, b) in &pairs {
            let ab = g.distance_km(a, b).unwrap();
            let ba = g.distance_km(b, a).unwrap();
            assert!(ab > 0.0);
            assert!((ab - ba).abs() < 1e-9);
        }
    }

    #[test]
    fn test_distance_zero_only_for_equal_positions() {
        let g = Geometry::default();
        let p = Position::local("B1", 7.0, 7.0);
        assert_eq!(g.distance_km(&p, &p).unwrap(), 0.0);
        let q = Position::geo(35.0, 139.0);
        assert_eq!(g.distance_km(&q, &q).unwrap(), 0.0);
    }

    #[test]
    fn test_local_distance_is_scaled() {
        let g = Geometry::new(0.1);
        let d = g
            .distance_km(&Position::local("B1", 0.0, 0.0), &Position::local("B1", 30.0, 40.0))
            .unwrap();
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_incompatible_coordinates_fail_loudly() {
        let g = Geometry::default();
        let err = g
            .distance_km(&Position::geo(0.0, 0.0), &Position::local("B1", 0.0, 0.0))
            .unwrap_err();
        assert_eq!(
            err,
            GeometryError::IncompatibleCoordinates {
                left: Frame::Geo,
                right: Frame::Local("B1".to_string()),
            }
        );

        // 異なる拠点の局所座標も比較不可
        assert!(g
            .distance_km(&Position::local("A", 0.0, 0.0), &Position::local("B", 0.0, 0.0))
            .is_err());
    }

    #[test]
    fn test_speed_local_units() {
        let g = Geometry::new(0.1);
        let v = Vec2::new(0.03, 0.04);
        assert!((g.speed_local_units(v, &Position::local("B1", 0.0, 0.0)) - 0.05).abs() < 1e-12);
    }
}
