//! # Transform モジュール
//!
//! 地理座標と拠点局所平面座標の相互変換、およびハンドオフ判定を提供します。
//!
//! 局所平面は拠点中心の正距円筒接平面で、x が東、y が北、単位は局所単位です。
//! 異なる座標系の位置を比較するときは、必ずこのモジュールで一方を他方の
//! 座標系に変換してから [`Geometry`] の厳密な距離計算を呼び出します。

use crate::geometry::{degree_separation, Geometry, GeometryError, KM_PER_DEGREE};
use crate::models::common::{EntityId, Frame, GeoPoint, Position, Vec2};

/// 座標変換器
///
/// 拠点中心を登録順に保持します（最寄り拠点の同距離判定は登録順で先勝ち）。
#[derive(Debug, Clone, Default)]
pub struct FrameTransform {
    centers: Vec<(EntityId, GeoPoint)>,
    geometry: Geometry,
}

impl FrameTransform {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            centers: Vec::new(),
            geometry,
        }
    }

    /// 拠点中心を登録（同じIDは上書き）
    pub fn register_base(&mut self, base_id: impl Into<EntityId>, center: GeoPoint) {
        let base_id = base_id.into();
        match self.centers.iter_mut().find(|(id, _)| *id == base_id) {
            Some(entry) => entry.1 = center,
            None => self.centers.push((base_id, center)),
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn center(&self, base_id: &str) -> Option<GeoPoint> {
        self.centers
            .iter()
            .find(|(id, _)| id == base_id)
            .map(|(_, c)| *c)
    }

    pub fn bases(&self) -> impl Iterator<Item = (&EntityId, &GeoPoint)> {
        self.centers.iter().map(|(id, c)| (id, c))
    }

    fn require_center(&self, base_id: &str) -> Result<GeoPoint, GeometryError> {
        self.center(base_id)
            .ok_or_else(|| GeometryError::UnknownFrame(base_id.to_string()))
    }

    /// 経度1度あたりの局所単位数（拠点中心の緯度で縮尺）
    fn scale(&self, center: GeoPoint) -> Vec2 {
        let per_unit = KM_PER_DEGREE / self.geometry.local_unit_km;
        Vec2::new(center.lat.to_radians().cos() * per_unit, per_unit)
    }

    /// 任意の位置を地理座標に変換
    pub fn to_geo(&self, position: &Position) -> Result<GeoPoint, GeometryError> {
        match position {
            Position::Geo { lat, lng } => Ok(GeoPoint::new(*lat, *lng)),
            Position::Local { frame, x, y } => {
                let c = self.require_center(frame)?;
                let s = self.scale(c);
                Ok(GeoPoint::new(c.lat + y / s.y, c.lng + x / s.x))
            }
        }
    }

    /// 地理座標を拠点の局所座標に変換
    pub fn to_local(&self, point: GeoPoint, base_id: &str) -> Result<Position, GeometryError> {
        let c = self.require_center(base_id)?;
        let s = self.scale(c);
        Ok(Position::local(
            base_id,
            (point.lng - c.lng) * s.x,
            (point.lat - c.lat) * s.y,
        ))
    }

    /// 位置を指定の座標系で表現し直す
    ///
    /// # 引数
    ///
    /// * `position` - 変換元の位置
    /// * `frame` - 変換先の座標系
    ///
    /// # 戻り値
    ///
    /// 変換後の位置。未登録の拠点を参照した場合は `UnknownFrame`
    pub fn express_in(&self, position: &Position, frame: &Frame) -> Result<Position, GeometryError> {
        if position.frame() == *frame {
            return Ok(position.clone());
        }
        let geo = self.to_geo(position)?;
        match frame {
            Frame::Geo => Ok(geo.into()),
            Frame::Local(base_id) => self.to_local(geo, base_id),
        }
    }

    /// 速度ベクトルを指定の座標系で表現し直す
    ///
    /// `at` は速度の現在の座標系での位置です。
    pub fn velocity_in(&self, velocity: Vec2, at: &Position, frame: &Frame) -> Result<Vec2, GeometryError> {
        if at.frame() == *frame {
            return Ok(velocity);
        }
        // 地理座標での (経度/tick, 緯度/tick) を経由する
        let geo_velocity = match at {
            Position::Geo { .. } => velocity,
            Position::Local { frame: base_id, .. } => {
                let s = self.scale(self.require_center(base_id)?);
                Vec2::new(velocity.x / s.x, velocity.y / s.y)
            }
        };
        match frame {
            Frame::Geo => Ok(geo_velocity),
            Frame::Local(base_id) => {
                let s = self.scale(self.require_center(base_id)?);
                Ok(Vec2::new(geo_velocity.x * s.x, geo_velocity.y * s.y))
            }
        }
    }

    /// 座標系の異なる2点間の距離（km）
    ///
    /// `b` を `a` の座標系に変換してから厳密に計算します。
    pub fn distance_km(&self, a: &Position, b: &Position) -> Result<f64, GeometryError> {
        let b = self.express_in(b, &a.frame())?;
        self.geometry.distance_km(a, &b)
    }

    /// 度単位で最も近い拠点
    pub fn nearest_base_by_degrees(&self, point: GeoPoint) -> Option<(&EntityId, f64)> {
        let mut best: Option<(&EntityId, f64)> = None;
        for (id, center) in &self.centers {
            let d = degree_separation(point, *center);
            if best.is_none_or(|(_, b)| d < b) {
                best = Some((id, d));
            }
        }
        best
    }

    /// ハンドオフ先の拠点
    ///
    /// 地理座標の位置が最寄り拠点から `handoff_deg` 未満に入った場合にその拠点を返します。
    /// 局所座標の位置は対象外です。
    pub fn handoff_target(&self, position: &Position, handoff_deg: f64) -> Option<EntityId> {
        let point = position.as_geo()?;
        self.nearest_base_by_degrees(point)
            .filter(|(_, d)| *d < handoff_deg)
            .map(|(id, _)| id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> FrameTransform {
        let mut t = FrameTransform::new(Geometry::new(0.1));
        t.register_base("B1", GeoPoint::new(35.0, 139.0));
        t.register_base("B2", GeoPoint::new(36.0, 140.0));
        t
    }

    #[test]
    fn test_local_geo_roundtrip() {
        let t = transform();
        let local = Position::local("B1", 12.0, -7.5);
        let geo = t.to_geo(&local).unwrap();
        let back = t.to_local(geo, "B1").unwrap();
        assert!(back.planar().distance(&local.planar()) < 1e-9);
    }

    #[test]
    fn test_express_in_other_base_frame_preserves_distance() {
        let t = transform();
        let p = Position::geo(35.01, 139.01);
        let in_b1 = t.express_in(&p, &Frame::Local("B1".into())).unwrap();
        let origin = Position::local("B1", 0.0, 0.0);
        let d_local = t.geometry().distance_km(&origin, &in_b1).unwrap();
        let d_geo = t
            .geometry()
            .distance_km(&Position::geo(35.0, 139.0), &p)
            .unwrap();
        // 近距離では正距円筒近似とハバーサインがほぼ一致する
        assert!((d_local - d_geo).abs() < 0.01);
    }

    #[test]
    fn test_unknown_frame_is_error() {
        let t = transform();
        let err = t.to_geo(&Position::local("ZZ", 0.0, 0.0)).unwrap_err();
        assert_eq!(err, GeometryError::UnknownFrame("ZZ".into()));
    }

    #[test]
    fn test_velocity_conversion_matches_position_delta() {
        let t = transform();
        let at = Position::geo(35.0, 139.0);
        let v = Vec2::new(0.001, 0.002);
        let frame = Frame::Local("B1".into());
        let lv = t.velocity_in(v, &at, &frame).unwrap();
        let p0 = t.express_in(&at, &frame).unwrap();
        let p1 = t.express_in(&at.with_planar(at.planar() + v), &frame).unwrap();
        assert!((p1.planar() - p0.planar()).distance(&lv) < 1e-9);
    }

    #[test]
    fn test_handoff_target_threshold() {
        let t = transform();
        assert_eq!(
            t.handoff_target(&Position::geo(35.01, 139.01), 0.02),
            Some("B1".to_string())
        );
        assert_eq!(t.handoff_target(&Position::geo(35.5, 139.5), 0.02), None);
        assert_eq!(t.handoff_target(&Position::local("B1", 0.0, 0.0), 0.02), None);
    }
}
