use crate::catalog::ReferenceCatalog;
use crate::generator::GeneratorSettings;
use crate::models::common::{EntityId, Frequency, GeoPoint, Position, SimTime, ThreatCategory, Vec2};
use crate::projection::ViewProjection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// ティック周期（ミリ秒）
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// 実行時間（ミリ秒）
    pub duration_ms: u64,
    #[serde(default)]
    pub seed: u64,
}

fn default_tick_ms() -> u64 {
    30
}

/// 周期・遅延の設定（すべてミリ秒）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    pub scan_period_ms: u64,
    pub relay_delay_ms: u64,
    pub decision_cooldown_ms: u64,
    pub lock_timeout_ms: u64,
    pub jam_hold_ms: u64,
    pub jammer_broadcast_ms: u64,
    pub jammer_keepalive_ms: u64,
    pub jam_duration_ms: u64,
    pub jam_cooldown_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            scan_period_ms: 1000,
            relay_delay_ms: 800,
            decision_cooldown_ms: 1000,
            lock_timeout_ms: 5000,
            jam_hold_ms: 1000,
            jammer_broadcast_ms: 200,
            jammer_keepalive_ms: 500,
            jam_duration_ms: 3000,
            jam_cooldown_ms: 2000,
        }
    }
}

/// 判定しきい値（距離はすべて km）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub high_distance_km: f64,
    pub medium_distance_km: f64,
    /// 局所単位/tick
    pub high_speed: f64,
    pub handoff_deg: f64,
    pub collision_km: f64,
    pub arrival_km: f64,
    pub slow_approach_km: f64,
    pub min_approach_factor: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            high_distance_km: 3.5,
            medium_distance_km: 5.0,
            high_speed: 0.03,
            handoff_deg: 0.02,
            collision_km: 0.05,
            arrival_km: 0.05,
            slow_approach_km: 1.0,
            min_approach_factor: 0.25,
        }
    }
}

/// 迎撃体の性能
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// 速度（局所単位/tick）
    pub speed: f64,
    pub max_flight_ticks: u32,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            speed: 0.5,
            max_flight_ticks: 400,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// 局所平面1単位あたりの距離（km）
    pub local_unit_km: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            local_unit_km: crate::geometry::DEFAULT_LOCAL_UNIT_KM,
        }
    }
}

/// 周波数の設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// センサーが使用可能な周波数（優先順）
    pub available: Vec<Frequency>,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            available: vec!["2GHz".into(), "3GHz".into(), "5GHz".into()],
        }
    }
}

/// エンジン設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timing: TimingConfig,
    pub thresholds: ThresholdConfig,
    pub interceptor: InterceptorConfig,
    pub geometry: GeometryConfig,
    pub spectrum: SpectrumConfig,
}

/// 配置地点の設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubSiteConfig {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

/// 配下ユニットの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Radar,
    Antenna,
    Launcher,
    Jammer,
}

/// 配下ユニットの設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnitConfig {
    pub id: EntityId,
    pub kind: UnitKind,
    /// 配置地点名（offset より優先）
    #[serde(default)]
    pub subsite: Option<String>,
    /// 拠点中心からのオフセット（局所単位）
    #[serde(default)]
    pub offset: Option<Vec2>,
    /// 探知半径または妨害半径（km）
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    /// 上位中継ユニット（センサーのみ）
    #[serde(default)]
    pub relay: Option<EntityId>,
    /// 装備数（ランチャーのみ）
    #[serde(default)]
    pub missiles: Option<u32>,
    /// カタログ上のジャマー名（ジャマーのみ）
    #[serde(default)]
    pub catalog: Option<String>,
}

/// 拠点の設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BaseConfig {
    pub id: EntityId,
    pub name: String,
    pub center: GeoPoint,
    #[serde(default)]
    pub subsites: Vec<SubSiteConfig>,
    #[serde(default)]
    pub units: Vec<UnitConfig>,
}

/// 敵性ジャマーの設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostileJammerConfig {
    pub id: EntityId,
    pub position: Position,
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub catalog: Option<String>,
}

/// 予定された脅威の出現
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThreatConfig {
    pub id: EntityId,
    #[serde(default)]
    pub spawn_ms: SimTime,
    pub origin: Position,
    pub target: Position,
    /// 速度（局所単位/tick、省略時はカタログ値）
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub category: ThreatCategory,
    #[serde(default)]
    pub catalog: Option<String>,
}

/// 一斉出現（リング配置）の設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SalvoConfig {
    pub id: String,
    #[serde(default)]
    pub spawn_ms: SimTime,
    pub center: Position,
    pub target: Position,
    pub count: u32,
    /// リング間隔（中心の座標系のネイティブ単位）
    pub ring_spacing: f64,
    #[serde(default)]
    pub start_angle_deg: f64,
    #[serde(default)]
    pub ring_half_offset: bool,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub category: ThreatCategory,
    #[serde(default)]
    pub catalog: Option<String>,
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub view: Option<ViewProjection>,
    pub bases: Vec<BaseConfig>,
    #[serde(default)]
    pub hostile_jammers: Vec<HostileJammerConfig>,
    #[serde(default)]
    pub threats: Vec<ThreatConfig>,
    #[serde(default)]
    pub salvos: Vec<SalvoConfig>,
    #[serde(default)]
    pub generator: GeneratorSettings,
    #[serde(default)]
    pub catalog: ReferenceCatalog,
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),
    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),
    #[error("設定検証エラー: {0}")]
    ValidationError(String),
}

fn invalid(msg: impl Into<String>) -> ScenarioError {
    ScenarioError::ValidationError(msg.into())
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み、検証する
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// YAMLファイルを解析のみ行って読み込む
    ///
    /// 外部カタログを差し替えてから検証したい場合に使用します。
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        // ファイル存在チェック
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        serde_yaml::from_str(&contents).map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))
    }

    /// YAML文字列からシナリオ設定を読み込み
    pub fn from_yaml(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig = serde_yaml::from_str(contents)
            .map_err(|e| ScenarioError::ParseError(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        // 時間設定の検証
        if self.sim.tick_ms == 0 {
            return Err(invalid("tick_ms must be positive"));
        }
        if self.sim.duration_ms == 0 {
            return Err(invalid("duration_ms must be positive"));
        }

        self.validate_engine()?;

        self.catalog
            .validate()
            .map_err(|e| invalid(e.to_string()))?;

        // ID の重複検証
        let all_ids = self
            .bases
            .iter()
            .flat_map(|b| std::iter::once(&b.id).chain(b.units.iter().map(|u| &u.id)))
            .chain(self.hostile_jammers.iter().map(|j| &j.id))
            .chain(self.threats.iter().map(|t| &t.id))
            .chain(self.salvos.iter().map(|s| &s.id));
        let mut ids: HashSet<&str> = HashSet::new();
        for id in all_ids {
            if !ids.insert(id.as_str()) {
                return Err(invalid(format!("duplicate id: {}", id)));
            }
        }

        let antennas: HashSet<&str> = self
            .bases
            .iter()
            .flat_map(|b| b.units.iter())
            .filter(|u| u.kind == UnitKind::Antenna)
            .map(|u| u.id.as_str())
            .collect();

        for base in &self.bases {
            for unit in &base.units {
                self.validate_unit(base, unit, &antennas)?;
            }
        }

        for jammer in &self.hostile_jammers {
            if let Some(name) = &jammer.catalog {
                if self.catalog.jammer(name).is_none() {
                    return Err(invalid(format!("{}: unknown jammer catalog entry {}", jammer.id, name)));
                }
            } else if jammer.radius_km.is_none_or(|r| r <= 0.0) || jammer.frequency.is_none() {
                return Err(invalid(format!("{}: radius_km and frequency are required", jammer.id)));
            }
        }

        // 出現時刻と速度の検証
        for threat in &self.threats {
            self.validate_spawn(&threat.id, threat.spawn_ms, threat.speed, threat.catalog.as_deref())?;
        }
        for salvo in &self.salvos {
            self.validate_spawn(&salvo.id, salvo.spawn_ms, salvo.speed, salvo.catalog.as_deref())?;
            if salvo.count == 0 || salvo.ring_spacing <= 0.0 {
                return Err(invalid(format!("{}: count and ring_spacing must be positive", salvo.id)));
            }
        }

        if self.generator.enabled && self.generator.period_ms == 0 {
            return Err(invalid("generator.period_ms must be positive"));
        }

        Ok(())
    }

    fn validate_engine(&self) -> Result<(), ScenarioError> {
        let th = &self.engine.thresholds;
        let positive = [
            ("high_distance_km", th.high_distance_km),
            ("medium_distance_km", th.medium_distance_km),
            ("high_speed", th.high_speed),
            ("handoff_deg", th.handoff_deg),
            ("collision_km", th.collision_km),
            ("arrival_km", th.arrival_km),
            ("slow_approach_km", th.slow_approach_km),
            ("interceptor.speed", self.engine.interceptor.speed),
            ("local_unit_km", self.engine.geometry.local_unit_km),
        ];
        for (name, value) in positive {
            if value <= 0.0 {
                return Err(invalid(format!("{} must be positive", name)));
            }
        }
        if !(0.0..=1.0).contains(&th.min_approach_factor) {
            return Err(invalid("min_approach_factor must be within 0..=1"));
        }

        let timing = &self.engine.timing;
        let periods = [
            ("scan_period_ms", timing.scan_period_ms),
            ("decision_cooldown_ms", timing.decision_cooldown_ms),
            ("jammer_broadcast_ms", timing.jammer_broadcast_ms),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(invalid(format!("{} must be positive", name)));
            }
        }
        if self.engine.spectrum.available.is_empty() {
            return Err(invalid("spectrum.available must not be empty"));
        }
        Ok(())
    }

    fn validate_unit(&self, base: &BaseConfig, unit: &UnitConfig, antennas: &HashSet<&str>) -> Result<(), ScenarioError> {
        if let Some(subsite) = &unit.subsite {
            if !base.subsites.iter().any(|s| &s.name == subsite) {
                return Err(invalid(format!("{}: unknown subsite {} in base {}", unit.id, subsite, base.id)));
            }
        }

        match unit.kind {
            UnitKind::Radar | UnitKind::Antenna => {
                if unit.radius_km.is_none_or(|r| r <= 0.0) {
                    return Err(invalid(format!("{}: radius_km must be positive", unit.id)));
                }
                let frequency = unit
                    .frequency
                    .as_ref()
                    .ok_or_else(|| invalid(format!("{}: frequency is required", unit.id)))?;
                if !self.engine.spectrum.available.contains(frequency) {
                    return Err(invalid(format!("{}: frequency {} is not in the available list", unit.id, frequency)));
                }
                if let Some(relay) = &unit.relay {
                    if !antennas.contains(relay.as_str()) {
                        return Err(invalid(format!("{}: unknown relay {}", unit.id, relay)));
                    }
                    if relay == &unit.id {
                        return Err(invalid(format!("{}: a unit cannot relay to itself", unit.id)));
                    }
                }
            }
            UnitKind::Launcher => {
                if unit.missiles.is_none() {
                    return Err(invalid(format!("{}: missiles is required", unit.id)));
                }
            }
            UnitKind::Jammer => {
                if let Some(name) = &unit.catalog {
                    if self.catalog.jammer(name).is_none() {
                        return Err(invalid(format!("{}: unknown jammer catalog entry {}", unit.id, name)));
                    }
                } else if unit.radius_km.is_none_or(|r| r <= 0.0) || unit.frequency.is_none() {
                    return Err(invalid(format!("{}: radius_km and frequency are required", unit.id)));
                }
            }
        }
        Ok(())
    }

    fn validate_spawn(&self, id: &str, spawn_ms: SimTime, speed: Option<f64>, catalog: Option<&str>) -> Result<(), ScenarioError> {
        if spawn_ms >= self.sim.duration_ms {
            return Err(invalid(format!(
                "{} spawn time {} >= simulation time {}",
                id, spawn_ms, self.sim.duration_ms
            )));
        }
        match (speed, catalog) {
            (Some(s), _) if s <= 0.0 => Err(invalid(format!("{}: speed must be positive", id))),
            (_, Some(name)) if self.catalog.threat(name).is_none() => {
                Err(invalid(format!("{}: unknown threat catalog entry {}", id, name)))
            }
            (None, None) => Err(invalid(format!("{}: speed or catalog is required", id))),
            _ => Ok(()),
        }
    }

    /// 拠点ユニットの局所座標
    pub fn unit_position(base: &BaseConfig, unit: &UnitConfig) -> Position {
        let offset = unit
            .subsite
            .as_ref()
            .and_then(|name| base.subsites.iter().find(|s| &s.name == name))
            .map(|s| Vec2::new(s.x, s.y))
            .or(unit.offset)
            .unwrap_or(Vec2::ZERO);
        Position::local(base.id.clone(), offset.x, offset.y)
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("ティック周期: {}ms", self.sim.tick_ms);
        println!(
            "実行時間: {:.1}秒 ({:.1}分)",
            self.sim.duration_ms as f64 / 1000.0,
            self.sim.duration_ms as f64 / 60000.0
        );
        println!("シード値: {}", self.sim.seed);
        println!(
            "使用可能周波数: {}",
            self.engine
                .spectrum
                .available
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!();

        println!("=== 防衛拠点 ===");
        for base in &self.bases {
            let count = |kind: UnitKind| base.units.iter().filter(|u| u.kind == kind).count();
            let missiles: u32 = base.units.iter().filter_map(|u| u.missiles).sum();
            println!(
                "  {} ({}): レーダー {}基 / アンテナ {}基 / ランチャー {}基 (総弾数 {}発) / ジャマー {}基",
                base.id,
                base.name,
                count(UnitKind::Radar),
                count(UnitKind::Antenna),
                count(UnitKind::Launcher),
                missiles,
                count(UnitKind::Jammer)
            );
        }
        println!();

        println!("=== 脅威 ===");
        println!("個別出現: {}機", self.threats.len());
        for threat in &self.threats {
            println!("  {}: {} (出現時刻: {:.1}秒)", threat.id, threat.category, threat.spawn_ms as f64 / 1000.0);
        }
        let salvo_total: u32 = self.salvos.iter().map(|s| s.count).sum();
        println!("一斉出現: {}群 {}機", self.salvos.len(), salvo_total);
        println!("敵性ジャマー: {}基", self.hostile_jammers.len());
        if self.generator.enabled {
            println!(
                "自動生成: {}ms 周期 (妨害型比率 {:.0}%)",
                self.generator.period_ms,
                self.generator.jamming_share * 100.0
            );
        }
        if !self.catalog.is_empty() {
            println!(
                "カタログ: 脅威 {}種 / ジャマー {}種",
                self.catalog.threats.len(),
                self.catalog.jammers.len()
            );
        }
    }
}
