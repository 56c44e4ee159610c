//! # Registry モジュール
//!
//! 全エンティティを保持する単一のレジストリです。
//! 挿入順を保持するため、最寄りユニット探索などの同距離判定は登録順で決まります。
//! 書き込みはエンジンの単一ライターからのみ行われます。

use crate::models::{Entity, EntityId, EntityType};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// レジストリ操作のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("IDが重複しています: {0}")]
    DuplicateId(EntityId),
    #[error("未登録のIDです: {0}")]
    UnknownId(EntityId),
}

/// 問い合わせ条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    pub entity_type: Option<EntityType>,
    pub owner: Option<EntityId>,
    pub live_only: bool,
}

impl EntityFilter {
    pub fn of(entity_type: EntityType) -> Self {
        Self {
            entity_type: Some(entity_type),
            ..Self::default()
        }
    }

    pub fn owned_by(mut self, owner: impl Into<EntityId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn live(mut self) -> Self {
        self.live_only = true;
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.entity_type.is_none_or(|t| entity.entity_type() == t)
            && self
                .owner
                .as_ref()
                .is_none_or(|o| entity.owner.as_ref() == Some(o))
            && (!self.live_only || entity.is_live())
    }
}

/// エンティティレジストリ
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<u64, Entity>,
    index: HashMap<EntityId, u64>,
    next_seq: u64,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// エンティティを登録
    pub fn insert(&mut self, entity: Entity) -> Result<(), RegistryError> {
        if self.index.contains_key(&entity.id) {
            return Err(RegistryError::DuplicateId(entity.id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(entity.id.clone(), seq);
        self.entities.insert(seq, entity);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.index.get(id).and_then(|seq| self.entities.get(seq))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Entity> {
        let seq = self.index.get(id)?;
        self.entities.get_mut(seq)
    }

    /// 存在が前提のエンティティを取得
    pub fn require_mut(&mut self, id: &str) -> Result<&mut Entity, RegistryError> {
        self.get_mut(id)
            .ok_or_else(|| RegistryError::UnknownId(id.to_string()))
    }

    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        let seq = self.index.remove(id)?;
        self.entities.remove(&seq)
    }

    /// 登録順に走査
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    /// 条件に合うエンティティを登録順に走査
    pub fn query<'a>(&'a self, filter: &'a EntityFilter) -> impl Iterator<Item = &'a Entity> + 'a {
        self.entities.values().filter(move |e| filter.matches(e))
    }

    /// 条件に合うエンティティのID
    pub fn ids(&self, filter: &EntityFilter) -> Vec<EntityId> {
        self.query(filter).map(|e| e.id.clone()).collect()
    }

    /// 終端状態（爆発・到達）のエンティティを取り除く
    ///
    /// # 戻り値
    ///
    /// 取り除いたエンティティ
    pub fn purge_terminal(&mut self) -> Vec<Entity> {
        let doomed: Vec<u64> = self
            .entities
            .iter()
            .filter(|(_, e)| e.is_terminal())
            .map(|(seq, _)| *seq)
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for seq in doomed {
            if let Some(entity) = self.entities.remove(&seq) {
                self.index.remove(&entity.id);
                removed.push(entity);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// 種別ごとの件数
    pub fn count(&self, entity_type: EntityType) -> usize {
        self.query(&EntityFilter::of(entity_type)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, Launcher, Position, Threat, ThreatCategory};

    fn threat(id: &str) -> Entity {
        Entity::new(
            id,
            Position::local("B1", 10.0, 0.0),
            EntityKind::Threat(Threat::new(Position::local("B1", 0.0, 0.0), 0.1, ThreatCategory::Kinetic, 0)),
        )
    }

    fn launcher(id: &str, owner: &str) -> Entity {
        Entity::new(id, Position::local(owner, 0.0, 0.0), EntityKind::Launcher(Launcher::new(4)))
            .with_owner(Some(owner.to_string()))
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut r = EntityRegistry::new();
        r.insert(threat("T1")).unwrap();
        assert_eq!(r.insert(threat("T1")), Err(RegistryError::DuplicateId("T1".into())));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let mut r = EntityRegistry::new();
        for id in ["Z", "A", "M"] {
            r.insert(threat(id)).unwrap();
        }
        let ids: Vec<_> = r.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["Z", "A", "M"]);

        // 削除後に同じIDを登録すると末尾に付く
        r.remove("Z");
        r.insert(threat("Z")).unwrap();
        let ids: Vec<_> = r.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "M", "Z"]);
    }

    #[test]
    fn test_query_by_type_owner_and_liveness() {
        let mut r = EntityRegistry::new();
        r.insert(launcher("L1", "B1")).unwrap();
        r.insert(launcher("L2", "B2")).unwrap();
        r.insert(threat("T1")).unwrap();
        r.insert(threat("T2")).unwrap();
        r.get_mut("T2").unwrap().explode();

        assert_eq!(r.ids(&EntityFilter::of(EntityType::Launcher).owned_by("B2")), vec!["L2"]);
        assert_eq!(r.ids(&EntityFilter::of(EntityType::Threat).live()), vec!["T1"]);
        assert_eq!(r.count(EntityType::Threat), 2);
    }

    #[test]
    fn test_purge_terminal() {
        let mut r = EntityRegistry::new();
        r.insert(threat("T1")).unwrap();
        r.insert(threat("T2")).unwrap();
        r.get_mut("T1").unwrap().reached = true;

        let removed = r.purge_terminal();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "T1");
        assert!(!r.contains("T1"));
        assert!(r.require_mut("T1").is_err());
        assert!(r.get("T2").is_some());
    }
}
