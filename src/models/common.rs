use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// エンティティの一意識別子
pub type EntityId = String;

/// シミュレーション時刻（ミリ秒）
///
/// 窓判定（妨害保持時間、クールダウン等）を厳密に行うため整数で保持します。
pub type SimTime = u64;

/// ミリ秒を秒に変換（ログ出力用）
pub fn ms_to_secs(t: SimTime) -> f64 {
    t as f64 / 1000.0
}

/// 平面ベクトル
///
/// 位置の差分・速度（1ティックあたりの移動量）の両方に使用します。
/// 地理座標の場合は (経度, 緯度) の順で格納します。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dot(&self, other: &Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn magnitude_squared(&self) -> f64 {
        self.dot(self)
    }

    /// ベクトルの大きさ
    pub fn magnitude(&self) -> f64 {
        self.magnitude_squared().sqrt()
    }

    /// ベクトルを正規化（ゼロベクトルはそのまま返す）
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag > 0.0 {
            Self::new(self.x / mag, self.y / mag)
        } else {
            *self
        }
    }

    /// 大きさを上限でクリップ
    pub fn clamp_magnitude(&self, max: f64) -> Self {
        let mag = self.magnitude();
        if mag > max {
            *self * (max / mag)
        } else {
            *self
        }
    }

    pub fn distance(&self, other: &Vec2) -> f64 {
        (*other - *self).magnitude()
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar)
    }
}

impl Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y)
    }
}

/// 地理座標（度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// 座標系（フレーム）
///
/// `Geo` は地理座標系、`Local` は拠点中心の局所平面です。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Frame {
    Geo,
    Local(EntityId),
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Geo => write!(f, "geo"),
            Frame::Local(base) => write!(f, "local[{}]", base),
        }
    }
}

/// エンティティの位置
///
/// 地理座標か拠点局所平面座標のどちらか一方のみを保持します。
/// 両者の変換は [`crate::transform::FrameTransform`] で明示的に行います。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Position {
    Geo { lat: f64, lng: f64 },
    Local { frame: EntityId, x: f64, y: f64 },
}

impl Position {
    pub fn geo(lat: f64, lng: f64) -> Self {
        Position::Geo { lat, lng }
    }

    pub fn local(frame: impl Into<EntityId>, x: f64, y: f64) -> Self {
        Position::Local { frame: frame.into(), x, y }
    }

    pub fn frame(&self) -> Frame {
        match self {
            Position::Geo { .. } => Frame::Geo,
            Position::Local { frame, .. } => Frame::Local(frame.clone()),
        }
    }

    /// 平面ベクトルとしての値（地理座標は (経度, 緯度)）
    pub fn planar(&self) -> Vec2 {
        match self {
            Position::Geo { lat, lng } => Vec2::new(*lng, *lat),
            Position::Local { x, y, .. } => Vec2::new(*x, *y),
        }
    }

    /// 同じ座標系のまま平面値だけを差し替えた位置を返す
    pub fn with_planar(&self, p: Vec2) -> Position {
        match self {
            Position::Geo { .. } => Position::Geo { lat: p.y, lng: p.x },
            Position::Local { frame, .. } => Position::Local {
                frame: frame.clone(),
                x: p.x,
                y: p.y,
            },
        }
    }

    pub fn shares_frame(&self, other: &Position) -> bool {
        match (self, other) {
            (Position::Geo { .. }, Position::Geo { .. }) => true,
            (Position::Local { frame: a, .. }, Position::Local { frame: b, .. }) => a == b,
            _ => false,
        }
    }

    pub fn as_geo(&self) -> Option<GeoPoint> {
        match self {
            Position::Geo { lat, lng } => Some(GeoPoint::new(*lat, *lng)),
            Position::Local { .. } => None,
        }
    }
}

impl From<GeoPoint> for Position {
    fn from(p: GeoPoint) -> Self {
        Position::geo(p.lat, p.lng)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Geo { lat, lng } => write!(f, "({:.5}, {:.5})", lat, lng),
            Position::Local { frame, x, y } => write!(f, "{}:({:.2}, {:.2})", frame, x, y),
        }
    }
}

/// 運用周波数
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frequency(pub String);

impl Frequency {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }
}

impl From<&str> for Frequency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// エンティティの種類を表す列挙型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Threat,
    Interceptor,
    Sensor,
    Launcher,
    Jammer,
    Base,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::Threat => "threat",
            EntityType::Interceptor => "interceptor",
            EntityType::Sensor => "sensor",
            EntityType::Launcher => "launcher",
            EntityType::Jammer => "jammer",
            EntityType::Base => "base",
        };
        f.write_str(name)
    }
}

/// 脅威の区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    /// 運動エネルギー弾（ミサイル・ドローン・砲弾）
    #[default]
    Kinetic,
    /// 電波妨害型
    Jamming,
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreatCategory::Kinetic => f.write_str("kinetic"),
            ThreatCategory::Jamming => f.write_str("jamming"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec2_normalize_zero_is_identity() {
        assert_eq!(Vec2::ZERO.normalize(), Vec2::ZERO);
        let n = Vec2::new(3.0, 4.0).normalize();
        assert!((n.magnitude() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_position_with_planar_keeps_frame() {
        let p = Position::local("B1", 1.0, 2.0);
        let q = p.with_planar(Vec2::new(5.0, 6.0));
        assert_eq!(q, Position::local("B1", 5.0, 6.0));

        let g = Position::geo(35.0, 139.0);
        assert_eq!(g.planar(), Vec2::new(139.0, 35.0));
        assert_eq!(g.with_planar(Vec2::new(140.0, 36.0)), Position::geo(36.0, 140.0));
    }

    #[test]
    fn test_shares_frame() {
        assert!(Position::geo(0.0, 0.0).shares_frame(&Position::geo(1.0, 1.0)));
        assert!(Position::local("A", 0.0, 0.0).shares_frame(&Position::local("A", 1.0, 1.0)));
        assert!(!Position::local("A", 0.0, 0.0).shares_frame(&Position::local("B", 0.0, 0.0)));
        assert!(!Position::geo(0.0, 0.0).shares_frame(&Position::local("A", 0.0, 0.0)));
    }

    #[test]
    fn test_position_yaml_tagging() {
        let p: Position = serde_yaml::from_str("mode: local\nframe: B1\nx: 1.5\ny: -2.0\n").unwrap();
        assert_eq!(p, Position::local("B1", 1.5, -2.0));
        let g: Position = serde_yaml::from_str("mode: geo\nlat: 35.0\nlng: 139.5\n").unwrap();
        assert_eq!(g, Position::geo(35.0, 139.5));
    }
}
