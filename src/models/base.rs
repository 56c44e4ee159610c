use crate::models::common::{EntityId, GeoPoint, Position, Vec2};

/// 拠点内の配置地点
#[derive(Debug, Clone, PartialEq)]
pub struct SubSite {
    pub name: String,
    /// 拠点中心からのオフセット（局所単位）
    pub offset: Vec2,
}

/// 拠点エンティティ固有の状態
///
/// 拠点は自身を中心とする局所平面座標系を定義し、配下ユニットを保有します。
#[derive(Debug, Clone)]
pub struct Base {
    pub name: String,
    pub center: GeoPoint,
    pub subsites: Vec<SubSite>,
    /// 保有ユニットID（登録順）
    pub units: Vec<EntityId>,
}

impl Base {
    pub fn new(name: impl Into<String>, center: GeoPoint) -> Self {
        Self {
            name: name.into(),
            center,
            subsites: Vec::new(),
            units: Vec::new(),
        }
    }

    pub fn with_subsites(mut self, subsites: Vec<SubSite>) -> Self {
        self.subsites = subsites;
        self
    }

    pub fn add_unit(&mut self, unit_id: EntityId) {
        if !self.units.contains(&unit_id) {
            self.units.push(unit_id);
        }
    }

    /// 配置地点の局所座標
    ///
    /// # 引数
    ///
    /// * `base_id` - この拠点のID（局所座標系の名前）
    /// * `subsite` - 配置地点名
    pub fn subsite_position(&self, base_id: &str, subsite: &str) -> Option<Position> {
        self.subsites
            .iter()
            .find(|s| s.name == subsite)
            .map(|s| Position::local(base_id, s.offset.x, s.offset.y))
    }
}
