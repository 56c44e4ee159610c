//! # Generator モジュール
//!
//! シード付き乱数による脅威の自動生成です。
//! 周期ジョブとして呼び出され、ランダムに選んだ拠点の周囲、ランダムな方位から
//! 拠点中心に向かう脅威の生成要求を作ります。同じシードからは常に同じ系列が得られます。

use crate::catalog::{ReferenceCatalog, ThreatSpec};
use crate::events::SpawnIntent;
use crate::models::common::{EntityId, GeoPoint, Position, ThreatCategory};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// 自動生成の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    #[serde(default)]
    pub enabled: bool,
    /// 生成周期（ミリ秒）
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// 拠点中心からの出現距離（度）
    #[serde(default = "default_spawn_radius_deg")]
    pub spawn_radius_deg: f64,
    /// 妨害型を選ぶ確率（0〜1）
    #[serde(default)]
    pub jamming_share: f64,
    /// 同時に存在できる生成脅威の上限
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    /// カタログが空のときの速度（局所単位/tick）
    #[serde(default = "default_speed")]
    pub default_speed: f64,
}

fn default_period_ms() -> u64 {
    5000
}

fn default_spawn_radius_deg() -> f64 {
    0.1
}

fn default_max_active() -> usize {
    20
}

fn default_speed() -> f64 {
    0.02
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            period_ms: default_period_ms(),
            spawn_radius_deg: default_spawn_radius_deg(),
            jamming_share: 0.0,
            max_active: default_max_active(),
            default_speed: default_speed(),
        }
    }
}

/// 脅威の自動生成器
#[derive(Debug, Clone)]
pub struct ThreatGenerator {
    pub settings: GeneratorSettings,
    rng: ChaCha8Rng,
    counter: u32,
}

impl ThreatGenerator {
    pub fn new(settings: GeneratorSettings, seed: u64) -> Self {
        Self {
            settings,
            rng: ChaCha8Rng::seed_from_u64(seed),
            counter: 0,
        }
    }

    pub fn generated(&self) -> u32 {
        self.counter
    }

    /// 次の生成要求を作る
    ///
    /// # 引数
    ///
    /// * `bases` - 拠点IDと中心座標（登録順）
    /// * `catalog` - 参照カタログ
    ///
    /// # 戻り値
    ///
    /// 生成要求。拠点がない場合は None
    pub fn next_intent(&mut self, bases: &[(EntityId, GeoPoint)], catalog: &ReferenceCatalog) -> Option<SpawnIntent> {
        if bases.is_empty() {
            return None;
        }
        let (_, center) = &bases[self.rng.gen_range(0..bases.len())];
        let bearing = self.rng.gen_range(0.0..360.0_f64).to_radians();
        let r = self.settings.spawn_radius_deg;
        let origin = Position::geo(center.lat + r * bearing.cos(), center.lng + r * bearing.sin());

        let want_jamming = self.settings.jamming_share > 0.0
            && self.rng.gen_bool(self.settings.jamming_share.clamp(0.0, 1.0));
        let spec = self.pick_spec(catalog, want_jamming);

        self.counter += 1;
        let id = format!("GEN_T{:04}", self.counter);
        let mut intent = SpawnIntent::threat(origin, Position::from(*center), self.settings.default_speed).with_id(id);
        if let Some(spec) = spec {
            intent = intent.with_catalog(spec.name.clone()).with_category(spec.category);
            intent.speed = None;
        }
        Some(intent)
    }

    fn pick_spec<'a>(&mut self, catalog: &'a ReferenceCatalog, want_jamming: bool) -> Option<&'a ThreatSpec> {
        let wanted = if want_jamming {
            ThreatCategory::Jamming
        } else {
            ThreatCategory::Kinetic
        };
        let mut pool: Vec<&ThreatSpec> = catalog.threats.iter().filter(|s| s.category == wanted).collect();
        if pool.is_empty() {
            pool = catalog.threats.iter().collect();
        }
        if pool.is_empty() {
            return None;
        }
        Some(pool[self.rng.gen_range(0..pool.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::degree_separation;

    fn bases() -> Vec<(EntityId, GeoPoint)> {
        vec![
            ("B1".to_string(), GeoPoint::new(35.0, 139.0)),
            ("B2".to_string(), GeoPoint::new(36.0, 140.0)),
        ]
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let settings = GeneratorSettings {
            enabled: true,
            ..GeneratorSettings::default()
        };
        let catalog = ReferenceCatalog::default();
        let mut a = ThreatGenerator::new(settings.clone(), 42);
        let mut b = ThreatGenerator::new(settings, 42);
        for _ in 0..5 {
            assert_eq!(a.next_intent(&bases(), &catalog), b.next_intent(&bases(), &catalog));
        }
        assert_eq!(a.generated(), 5);
    }

    #[test]
    fn test_spawns_on_ring_around_a_base() {
        let mut g = ThreatGenerator::new(GeneratorSettings::default(), 7);
        let intent = g.next_intent(&bases(), &ReferenceCatalog::default()).unwrap();
        let origin = intent.origin.as_geo().unwrap();
        let target = intent.target.as_geo().unwrap();
        assert!((degree_separation(origin, target) - 0.1).abs() < 1e-9);
        assert_eq!(intent.id.as_deref(), Some("GEN_T0001"));
        assert_eq!(intent.speed, Some(0.02));
    }

    #[test]
    fn test_jamming_share_selects_jamming_entries() {
        let catalog = ReferenceCatalog::from_yaml(
            "threats:\n  - { name: K, speed: 0.02 }\n  - { name: J, speed: 0.01, category: jamming, emitter: { radius_km: 2.0, frequency: 2GHz } }\n",
        )
        .unwrap();
        let settings = GeneratorSettings {
            jamming_share: 1.0,
            ..GeneratorSettings::default()
        };
        let mut g = ThreatGenerator::new(settings, 1);
        let intent = g.next_intent(&bases(), &catalog).unwrap();
        assert_eq!(intent.catalog.as_deref(), Some("J"));
        assert_eq!(intent.category, ThreatCategory::Jamming);
        assert_eq!(intent.speed, None);

        assert!(g.next_intent(&[], &catalog).is_none());
    }
}
