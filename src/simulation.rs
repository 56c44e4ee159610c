//! # Simulation モジュール
//!
//! 探知・判断・迎撃エンジンの中核を提供します。
//!
//! エンジンは単一の書き込み主体として、エンティティ台帳・割り当てロック・
//! 中継重複集合・指揮所・周波数監視・スケジューラをすべて所有します。
//! 状態の変更は [`Engine::step`] の中でのみ行われ、外部からの要求は
//! [`Engine::submit`] で受け付けて次のステップの先頭で反映します。
//!
//! ## ステップ内の処理順序
//!
//! 1. **生成要求の反映**: 予定出現と外部からの生成要求
//! 2. **運動バッチ**: 脅威・迎撃体の移動、衝突・着弾・無力化判定を一括適用
//! 3. **終端処理**: 終端した脅威に関するロック・タイマー・記録の一括解除
//! 4. **妨害電波の放送**: 電波源ごとの放送と各センサーへの妨害判定
//! 5. **センサー走査**: 周波数選択、探知、中継への受け渡し
//! 6. **タイマー処理**: 中継転送、ロック期限、ジャマー状態遷移
//! 7. **指揮サイクル**: 未対処の追跡目標の再判断
//! 8. **自動生成**: 乱数による脅威生成
//! 9. **除去**: 終端したエンティティの削除
//! 10. **時刻前進**
//!
//! ## 使用例
//!
//! ```no_run
//! use airdefsim::scenario::ScenarioConfig;
//! use airdefsim::simulation::Engine;
//!
//! let config = ScenarioConfig::from_file("scenarios/layered_defense.yaml")?;
//! let mut engine = Engine::from_scenario(&config)?;
//! engine.run();
//! engine.print_summary();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::catalog::ReferenceCatalog;
use crate::events::{DecisionEvent, DetectionEvent, EngineEvent, EventKind, SpawnIntent, SpawnKind};
use crate::generator::ThreatGenerator;
use crate::geometry::{Geometry, GeometryError};
use crate::guidance::plan_launch;
use crate::jamming::{select_frequency, BroadcastTracker, FrequencyDecision, JammingBroadcast, SpectrumMonitor};
use crate::models::command_post::{ContactReport, DecisionOutcome, SeverityThresholds};
use crate::models::*;
use crate::motion::{compute_frame, MotionParams};
use crate::projection::{BaseScreenMap, ViewProjection};
use crate::registry::{EntityFilter, EntityRegistry, RegistryError};
use crate::relay::{self, RelayDedup, RelayIngress, RelayPacket};
use crate::scenario::{EngineConfig, ScenarioConfig, UnitKind};
use crate::scheduler::{JobKind, Scheduler, TimerKind};
use crate::snapshot::WorldSnapshot;
use crate::telemetry::{Diagnostics, TelemetrySink};
use crate::transform::FrameTransform;
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// 自動生成された脅威のID接頭辞
const GENERATED_PREFIX: &str = "GEN_";

/// エンジンエラー
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("未登録の拠点です: {0}")]
    UnknownBase(EntityId),
    #[error("カタログに存在しない項目です: {0}")]
    UnknownCatalogEntry(String),
    #[error("生成要求が不正です: {0}")]
    InvalidSpawn(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

pub struct Engine {
    pub config: EngineConfig,
    pub tick_ms: SimTime,
    pub duration_ms: SimTime,
    pub verbose_level: u8,

    now: SimTime,
    tick: u64,

    registry: EntityRegistry,
    transform: FrameTransform,
    locks: AssignmentLocks,
    dedup: RelayDedup,
    posts: BTreeMap<EntityId, CommandPost>,
    spectrum: SpectrumMonitor,
    broadcasts: BroadcastTracker,
    scheduler: Scheduler,

    generator: ThreatGenerator,
    catalog: ReferenceCatalog,
    intents: VecDeque<SpawnIntent>,
    scheduled_spawns: Vec<(SimTime, SpawnIntent)>,
    spawn_counter: u32,

    diagnostics: Diagnostics,
    events: Vec<EngineEvent>,
    sink: Option<Box<dyn TelemetrySink>>,

    projection: ViewProjection,
    screen_map: BaseScreenMap,
}

impl Engine {
    pub fn new(config: EngineConfig, tick_ms: SimTime, duration_ms: SimTime) -> Self {
        let transform = FrameTransform::new(Geometry::new(config.geometry.local_unit_km));
        let mut scheduler = Scheduler::new();
        scheduler.add_job(JobKind::Motion, tick_ms, 0);

        Self {
            config,
            tick_ms: tick_ms.max(1),
            duration_ms,
            verbose_level: 0,
            now: 0,
            tick: 0,
            registry: EntityRegistry::new(),
            transform,
            locks: AssignmentLocks::new(),
            dedup: RelayDedup::new(),
            posts: BTreeMap::new(),
            spectrum: SpectrumMonitor::new(),
            broadcasts: BroadcastTracker::new(),
            scheduler,
            generator: ThreatGenerator::new(Default::default(), 0),
            catalog: ReferenceCatalog::default(),
            intents: VecDeque::new(),
            scheduled_spawns: Vec::new(),
            spawn_counter: 0,
            diagnostics: Diagnostics::default(),
            events: Vec::new(),
            sink: None,
            projection: ViewProjection::default(),
            screen_map: BaseScreenMap::default(),
        }
    }

    /// シナリオからエンジンを構築
    pub fn from_scenario(scenario: &ScenarioConfig) -> Result<Self, EngineError> {
        let mut engine = Engine::new(scenario.engine.clone(), scenario.sim.tick_ms, scenario.sim.duration_ms);
        engine.catalog = scenario.catalog.clone();
        engine.generator = ThreatGenerator::new(scenario.generator.clone(), scenario.sim.seed);
        if scenario.generator.enabled {
            let period = scenario.generator.period_ms;
            engine.scheduler.add_job(JobKind::Generator, period, period);
        }

        engine.initialize_bases(scenario)?;
        engine.initialize_hostile_jammers(scenario)?;
        engine.initialize_threats(scenario);
        engine.initialize_salvos(scenario);

        let projection = scenario.view.unwrap_or_else(|| ViewProjection {
            center: scenario.bases.first().map_or(GeoPoint::new(0.0, 0.0), |b| b.center),
            ..ViewProjection::default()
        });
        engine.set_projection(projection);

        info!(
            bases = engine.posts.len(),
            sensors = engine.registry.count(EntityType::Sensor),
            launchers = engine.registry.count(EntityType::Launcher),
            jammers = engine.registry.count(EntityType::Jammer),
            scheduled_threats = engine.scheduled_spawns.len(),
            "ENGINE_INITIALIZED: エンジンを初期化しました"
        );
        Ok(engine)
    }

    fn initialize_bases(&mut self, scenario: &ScenarioConfig) -> Result<(), EngineError> {
        for base_config in &scenario.bases {
            let subsites = base_config
                .subsites
                .iter()
                .map(|s| SubSite {
                    name: s.name.clone(),
                    offset: Vec2::new(s.x, s.y),
                })
                .collect();
            let base = Base::new(base_config.name.clone(), base_config.center).with_subsites(subsites);
            self.add_base(&base_config.id, base)?;

            for unit in &base_config.units {
                let position = ScenarioConfig::unit_position(base_config, unit);
                let kind = match unit.kind {
                    UnitKind::Radar | UnitKind::Antenna => {
                        let role = if unit.kind == UnitKind::Antenna {
                            SensorRole::Antenna
                        } else {
                            SensorRole::Radar
                        };
                        let frequency = unit
                            .frequency
                            .clone()
                            .ok_or_else(|| EngineError::InvalidSpawn(format!("{}: frequency is required", unit.id)))?;
                        let sensor = Sensor::new(role, unit.radius_km.unwrap_or_default(), frequency)
                            .with_relay(unit.relay.clone());
                        EntityKind::Sensor(sensor)
                    }
                    UnitKind::Launcher => EntityKind::Launcher(Launcher::new(unit.missiles.unwrap_or_default())),
                    UnitKind::Jammer => {
                        let emitter = self.resolve_emitter(&unit.id, unit.catalog.as_deref(), unit.radius_km, unit.frequency.as_ref())?;
                        EntityKind::Jammer(Jammer::new(emitter))
                    }
                };
                self.add_unit(&base_config.id, Entity::new(unit.id.clone(), position, kind))?;

                debug!(base_id = %base_config.id, unit_id = %unit.id, kind = ?unit.kind, "UNIT_INITIALIZED: ユニットを配置しました");
            }
        }
        Ok(())
    }

    fn initialize_hostile_jammers(&mut self, scenario: &ScenarioConfig) -> Result<(), EngineError> {
        for config in &scenario.hostile_jammers {
            let emitter = self.resolve_emitter(&config.id, config.catalog.as_deref(), config.radius_km, config.frequency.as_ref())?;
            let entity = Entity::new(config.id.clone(), config.position.clone(), EntityKind::Jammer(Jammer::hostile(emitter)));
            self.add_emitter(entity)?;
        }
        Ok(())
    }

    fn initialize_threats(&mut self, scenario: &ScenarioConfig) {
        for threat in &scenario.threats {
            let mut intent = SpawnIntent::threat(threat.origin.clone(), threat.target.clone(), 0.0)
                .with_id(threat.id.clone())
                .with_category(threat.category);
            intent.speed = threat.speed;
            intent.catalog = threat.catalog.clone();
            self.schedule_spawn(threat.spawn_ms, intent);
        }
    }

    fn initialize_salvos(&mut self, scenario: &ScenarioConfig) {
        for config in &scenario.salvos {
            let salvo = ThreatSalvo {
                id: config.id.clone(),
                center: config.center.clone(),
                count: config.count,
                ring_spacing: config.ring_spacing,
                start_angle_deg: config.start_angle_deg,
                ring_half_offset: config.ring_half_offset,
            };
            for (id, origin) in salvo.members() {
                let mut intent = SpawnIntent::threat(origin, config.target.clone(), 0.0)
                    .with_id(id)
                    .with_category(config.category);
                intent.speed = config.speed;
                intent.catalog = config.catalog.clone();
                self.schedule_spawn(config.spawn_ms, intent);
            }
            debug!(salvo_id = %config.id, count = config.count, spawn_ms = config.spawn_ms, "SALVO_INITIALIZED: 一斉出現を登録しました");
        }
    }

    fn resolve_emitter(
        &self,
        id: &str,
        catalog: Option<&str>,
        radius_km: Option<f64>,
        frequency: Option<&Frequency>,
    ) -> Result<Emitter, EngineError> {
        if let Some(name) = catalog {
            return self
                .catalog
                .jammer(name)
                .map(|spec| spec.emitter())
                .ok_or_else(|| EngineError::UnknownCatalogEntry(name.to_string()));
        }
        match (radius_km, frequency) {
            (Some(radius_km), Some(frequency)) => Ok(Emitter {
                radius_km,
                frequency: frequency.clone(),
            }),
            _ => Err(EngineError::InvalidSpawn(format!("{}: radius_km and frequency are required", id))),
        }
    }

    /// 拠点を登録
    ///
    /// 局所座標系の中心・指揮所・指揮サイクルを合わせて登録します。
    pub fn add_base(&mut self, base_id: &str, base: Base) -> Result<(), EngineError> {
        let center = base.center;
        let entity = Entity::new(base_id, Position::from(center), EntityKind::Base(base));
        self.registry.insert(entity)?;
        self.transform.register_base(base_id, center);
        self.posts.insert(base_id.to_string(), CommandPost::new(base_id));
        self.scheduler.add_job(
            JobKind::CommandCycle(base_id.to_string()),
            self.config.timing.decision_cooldown_ms,
            self.config.timing.decision_cooldown_ms,
        );
        self.refresh_screen_map();
        Ok(())
    }

    /// 拠点配下のユニットを登録
    pub fn add_unit(&mut self, base_id: &str, entity: Entity) -> Result<(), EngineError> {
        if !self.posts.contains_key(base_id) {
            return Err(EngineError::UnknownBase(base_id.to_string()));
        }
        let unit_id = entity.id.clone();
        let entity_type = entity.entity_type();
        self.registry.insert(entity.with_owner(Some(base_id.to_string())))?;
        if let Some(base) = self.registry.get_mut(base_id).and_then(|e| e.as_base_mut()) {
            base.add_unit(unit_id.clone());
        }
        match entity_type {
            EntityType::Sensor => {
                self.scheduler
                    .add_job(JobKind::SensorScan(unit_id), self.config.timing.scan_period_ms, 0);
            }
            EntityType::Jammer => {
                self.scheduler
                    .add_job(JobKind::Broadcast(unit_id), self.config.timing.jammer_broadcast_ms, 0);
            }
            _ => {}
        }
        Ok(())
    }

    fn add_emitter(&mut self, entity: Entity) -> Result<(), EngineError> {
        let id = entity.id.clone();
        self.registry.insert(entity)?;
        self.scheduler
            .add_job(JobKind::Broadcast(id), self.config.timing.jammer_broadcast_ms, self.now);
        Ok(())
    }

    /// 予定時刻に反映する生成要求を登録
    pub fn schedule_spawn(&mut self, at: SimTime, intent: SpawnIntent) {
        let index = self.scheduled_spawns.partition_point(|(t, _)| *t <= at);
        self.scheduled_spawns.insert(index, (at, intent));
    }

    /// 生成要求を受け付け、次のステップの先頭で反映する
    pub fn submit(&mut self, intent: SpawnIntent) {
        self.intents.push_back(intent);
    }

    pub fn set_sink(&mut self, sink: Box<dyn TelemetrySink>) {
        self.sink = Some(sink);
    }

    /// 参照カタログを差し替え
    pub fn set_catalog(&mut self, catalog: ReferenceCatalog) {
        self.catalog = catalog;
    }

    /// 表示投影を変更し、拠点の画面座標を再計算
    pub fn set_projection(&mut self, projection: ViewProjection) {
        self.projection = projection;
        self.refresh_screen_map();
    }

    fn refresh_screen_map(&mut self) {
        self.screen_map = BaseScreenMap::compute(&self.projection, self.transform.bases());
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn transform(&self) -> &FrameTransform {
        &self.transform
    }

    pub fn locks(&self) -> &AssignmentLocks {
        &self.locks
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn command_post(&self, base_id: &str) -> Option<&CommandPost> {
        self.posts.get(base_id)
    }

    pub fn catalog(&self) -> &ReferenceCatalog {
        &self.catalog
    }

    pub fn projection(&self) -> &ViewProjection {
        &self.projection
    }

    pub fn screen_map(&self) -> &BaseScreenMap {
        &self.screen_map
    }

    pub fn generated(&self) -> u32 {
        self.generator.generated()
    }

    /// 蓄積したイベントを取り出す
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// 現在状態のスナップショット
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot::capture(self)
    }

    fn emit(&mut self, kind: EventKind) {
        let event = EngineEvent { at: self.now, kind };
        if let Some(sink) = self.sink.as_mut() {
            sink.publish(&event);
        }
        self.events.push(event);
    }

    /// 設定された実行時間までシミュレーションを進める
    pub fn run(&mut self) {
        info!("=== シミュレーション実行開始 ===");

        while self.now < self.duration_ms {
            self.step();

            if self.verbose_level > 2 {
                trace!("時刻: {:.2}秒 (ステップ: {})", ms_to_secs(self.now), self.tick);
            }

            if self.tick % 100 == 0 && self.verbose_level > 0 {
                let progress = self.now as f64 / self.duration_ms as f64 * 100.0;
                info!(
                    "進行状況: {:.1}% ({:.1}/{:.1}秒)",
                    progress,
                    ms_to_secs(self.now),
                    ms_to_secs(self.duration_ms)
                );
            }
        }

        info!("=== シミュレーション完了 ===");
        info!("実行時間: {:.1}秒", ms_to_secs(self.now));
        info!("総ステップ数: {}", self.tick);
    }

    /// 指定時間だけシミュレーションを進める
    pub fn run_for(&mut self, duration: SimTime) {
        let end = self.now + duration;
        while self.now < end {
            self.step();
        }
    }

    /// 1ティック進める
    pub fn step(&mut self) {
        let now = self.now;
        trace!(tick = self.tick, now, "TICK");
        self.spectrum.expire(now);

        self.apply_intents();

        if !self.scheduler.due_jobs_where(now, |k| *k == JobKind::Motion).is_empty() {
            self.process_motion();
        }

        for job in self.scheduler.due_jobs_where(now, |k| matches!(k, JobKind::Broadcast(_))) {
            if let JobKind::Broadcast(emitter_id) = job {
                self.process_broadcast(&emitter_id);
            }
        }

        let scans = self.scheduler.due_jobs_where(now, |k| matches!(k, JobKind::SensorScan(_)));
        if !scans.is_empty() {
            let contacts = self.threat_contacts();
            for job in scans {
                if let JobKind::SensorScan(sensor_id) = job {
                    self.process_scan(&sensor_id, &contacts);
                }
            }
        }

        self.process_timers();

        for job in self.scheduler.due_jobs_where(now, |k| matches!(k, JobKind::CommandCycle(_))) {
            if let JobKind::CommandCycle(base_id) = job {
                self.process_command_cycle(&base_id);
            }
        }

        if !self.scheduler.due_jobs_where(now, |k| *k == JobKind::Generator).is_empty() {
            self.process_generator();
        }

        for entity in self.registry.purge_terminal() {
            trace!(entity_id = %entity.id, "ENTITY_PURGED");
        }

        self.now += self.tick_ms;
        self.tick += 1;
        self.diagnostics.ticks += 1;
    }

    // ---- 生成 ----

    fn apply_intents(&mut self) {
        let due = self.scheduled_spawns.partition_point(|(t, _)| *t <= self.now);
        let mut intents: Vec<SpawnIntent> = self.scheduled_spawns.drain(..due).map(|(_, i)| i).collect();
        intents.extend(self.intents.drain(..));

        for intent in intents {
            if let Err(err) = self.spawn(intent) {
                self.diagnostics.rejected_intents += 1;
                warn!(error = %err, "SPAWN_REJECTED: 生成要求を拒否しました");
            }
        }
    }

    /// 生成要求を即座に反映
    ///
    /// # 戻り値
    ///
    /// 生成したエンティティのID
    pub fn spawn(&mut self, intent: SpawnIntent) -> Result<EntityId, EngineError> {
        match intent.kind {
            SpawnKind::Threat => self.spawn_threat(intent),
            SpawnKind::Interceptor => self.spawn_interceptor(intent),
        }
    }

    fn next_spawn_id(&mut self, prefix: &str) -> EntityId {
        loop {
            self.spawn_counter += 1;
            let id = format!("{}{:04}", prefix, self.spawn_counter);
            if !self.registry.contains(&id) {
                return id;
            }
        }
    }

    /// 局所単位/tick の速度を生成位置の座標系のネイティブ単位に換算
    fn native_speed(&self, local_speed: f64, at: &Position) -> f64 {
        let geometry = self.transform.geometry();
        geometry.km_to_native(local_speed * geometry.local_unit_km, &at.frame())
    }

    fn spawn_threat(&mut self, intent: SpawnIntent) -> Result<EntityId, EngineError> {
        let spec = match &intent.catalog {
            Some(name) => Some(
                self.catalog
                    .threat(name)
                    .cloned()
                    .ok_or_else(|| EngineError::UnknownCatalogEntry(name.clone()))?,
            ),
            None => None,
        };
        let speed = intent
            .speed
            .or(spec.as_ref().map(|s| s.speed))
            .ok_or_else(|| EngineError::InvalidSpawn("speed is required without a catalog entry".to_string()))?;
        if speed <= 0.0 {
            return Err(EngineError::InvalidSpawn(format!("speed must be positive: {}", speed)));
        }
        let category = spec.as_ref().map_or(intent.category, |s| s.category);
        let emitter = spec.as_ref().and_then(|s| s.emitter.clone());

        let origin = intent.origin;
        // 生成位置と目標が解決できることを確認
        self.transform.to_geo(&origin)?;
        let target = self.transform.express_in(&intent.target, &origin.frame())?;

        let id = match intent.id {
            Some(id) => id,
            None => self.next_spawn_id("T"),
        };
        let threat = Threat::new(target, self.native_speed(speed, &origin), category, self.now)
            .with_emitter(emitter)
            .with_catalog_name(spec.map(|s| s.name));
        let velocity = threat.initial_velocity(&origin);
        let has_emitter = threat.emitter.is_some();
        let owner = match &origin {
            Position::Local { frame, .. } => Some(frame.clone()),
            Position::Geo { .. } => None,
        };

        let entity = Entity::new(id.clone(), origin.clone(), EntityKind::Threat(threat))
            .with_owner(owner)
            .with_velocity(velocity);
        if has_emitter {
            self.add_emitter(entity)?;
        } else {
            self.registry.insert(entity)?;
        }

        info!(threat_id = %id, category = %category, position = %origin, "THREAT_SPAWNED: 脅威が出現しました");
        self.emit(EventKind::Spawned {
            id: id.clone(),
            entity_type: EntityType::Threat,
            position: origin,
        });
        Ok(id)
    }

    fn spawn_interceptor(&mut self, intent: SpawnIntent) -> Result<EntityId, EngineError> {
        let target_id = match &intent.target_id {
            Some(target_id) => {
                let live = self
                    .registry
                    .get(target_id)
                    .is_some_and(|e| e.entity_type() == EntityType::Threat && e.is_live());
                if !live {
                    return Err(EngineError::InvalidSpawn(format!("target {} is not a live threat", target_id)));
                }
                target_id.clone()
            }
            None => self
                .nearest_live_threat(&intent.target)?
                .ok_or_else(|| EngineError::InvalidSpawn("no live threat near the requested target".to_string()))?,
        };

        let origin = intent.origin;
        self.transform.to_geo(&origin)?;
        let speed = intent.speed.unwrap_or(self.config.interceptor.speed);
        if speed <= 0.0 {
            return Err(EngineError::InvalidSpawn(format!("speed must be positive: {}", speed)));
        }

        let id = match intent.id {
            Some(id) => id,
            None => self.next_spawn_id("I"),
        };
        let interceptor = Interceptor::new(
            target_id.clone(),
            self.native_speed(speed, &origin),
            None,
            self.now,
            self.config.interceptor.max_flight_ticks,
        );
        let owner = match &origin {
            Position::Local { frame, .. } => Some(frame.clone()),
            Position::Geo { .. } => None,
        };
        self.registry
            .insert(Entity::new(id.clone(), origin.clone(), EntityKind::Interceptor(interceptor)).with_owner(owner))?;

        info!(interceptor_id = %id, target_id = %target_id, "INTERCEPTOR_SPAWNED: 迎撃体を生成しました");
        self.emit(EventKind::Spawned {
            id: id.clone(),
            entity_type: EntityType::Interceptor,
            position: origin,
        });
        Ok(id)
    }

    fn nearest_live_threat(&self, near: &Position) -> Result<Option<EntityId>, GeometryError> {
        let filter = EntityFilter::of(EntityType::Threat).live();
        let mut best: Option<(&EntityId, f64)> = None;
        for threat in self.registry.query(&filter) {
            let distance = self.transform.distance_km(near, &threat.position)?;
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((&threat.id, distance));
            }
        }
        Ok(best.map(|(id, _)| id.clone()))
    }

    // ---- 運動 ----

    fn motion_params(&self) -> MotionParams {
        let th = &self.config.thresholds;
        MotionParams {
            approach: ApproachProfile {
                slow_approach_km: th.slow_approach_km,
                min_factor: th.min_approach_factor,
                arrival_km: th.arrival_km,
            },
            collision_km: th.collision_km,
            handoff_deg: th.handoff_deg,
        }
    }

    fn process_motion(&mut self) {
        let update = compute_frame(&self.registry, &self.transform, &self.motion_params());
        if update.is_empty() && update.errors.is_empty() {
            return;
        }
        update.apply(&mut self.registry);

        for (entity_id, err) in &update.errors {
            self.diagnostics.geometry_errors += 1;
            warn!(entity_id = %entity_id, error = %err, "GEOMETRY_ERROR: 運動計算をスキップしました");
        }
        for h in &update.handoffs {
            self.emit(EventKind::Handoff {
                threat_id: h.threat_id.clone(),
                base_id: h.base_id.clone(),
                position: h.position.clone(),
            });
        }
        for kill in &update.kills {
            self.diagnostics.kills += 1;
            self.emit(EventKind::Explosion {
                threat_id: kill.threat_id.clone(),
                interceptor_id: kill.interceptor_id.clone(),
                position: kill.position.clone(),
            });
        }
        for (threat_id, position) in &update.impacts {
            self.diagnostics.impacts += 1;
            self.emit(EventKind::Impact {
                threat_id: threat_id.clone(),
                position: position.clone(),
            });
        }
        for (threat_id, jammer_id) in &update.neutralizations {
            self.diagnostics.neutralizations += 1;
            self.emit(EventKind::Neutralized {
                threat_id: threat_id.clone(),
                jammer_id: jammer_id.clone(),
            });
        }
        for (interceptor_id, reason) in &update.retirements {
            self.retire_interceptor(interceptor_id, *reason);
        }
        for threat_id in update.terminated_threats() {
            self.on_threat_terminated(&threat_id);
        }
    }

    fn retire_interceptor(&mut self, interceptor_id: &str, reason: InterceptorEndReason) {
        let Some(interceptor) = self.registry.get(interceptor_id).and_then(|e| e.as_interceptor()) else {
            return;
        };
        let launched_by = interceptor.launched_by.clone();
        let target_id = interceptor.target_id.clone();

        self.diagnostics.wasted_interceptors += 1;
        info!(
            interceptor_id,
            target_id = %target_id,
            reason = %reason,
            "INTERCEPTOR_RETIRED: 迎撃体を退役させました"
        );
        self.emit(EventKind::InterceptorRetired {
            interceptor_id: interceptor_id.to_string(),
            reason,
        });

        if let Some(launcher_id) = launched_by {
            if self.locks.release_if_held(&launcher_id, &target_id) {
                self.finish_assignment(&launcher_id, &target_id);
            }
        }
    }

    /// 終端した脅威に関する状態をすべて解除
    fn on_threat_terminated(&mut self, threat_id: &str) {
        if let Some(unit_id) = self.locks.release_threat(threat_id) {
            self.finish_assignment(&unit_id, threat_id);
        }
        self.scheduler.cancel_subject(threat_id);
        self.dedup.forget(threat_id);
        for post in self.posts.values_mut() {
            post.forget(threat_id);
        }
        for entity in self.registry.iter_mut() {
            if let Some(sensor) = entity.as_sensor_mut() {
                sensor.forget(threat_id);
            }
        }
        if self.scheduler.remove_job(&JobKind::Broadcast(threat_id.to_string())) {
            self.broadcasts.forget(threat_id);
        }
        debug!(threat_id, "THREAT_TERMINATED: 関連する割り当てと記録を解除しました");
    }

    /// ロック解除後にユニットを待機状態へ戻す
    fn finish_assignment(&mut self, unit_id: &str, threat_id: &str) {
        if let Some(launcher) = self.registry.get_mut(unit_id).and_then(|e| e.as_launcher_mut()) {
            if launcher.busy_with().is_some_and(|t| t == threat_id) {
                launcher.release();
            }
        }
        self.scheduler
            .cancel_where(|t| matches!(&t.kind, TimerKind::LockRelease { unit, .. } if unit == unit_id));
        self.emit(EventKind::LockReleased {
            unit_id: unit_id.to_string(),
            threat_id: threat_id.to_string(),
        });
    }

    // ---- 妨害 ----

    fn process_broadcast(&mut self, emitter_id: &str) {
        let now = self.now;
        let Some(entity) = self.registry.get(emitter_id).filter(|e| e.is_live()) else {
            self.scheduler.remove_job(&JobKind::Broadcast(emitter_id.to_string()));
            self.broadcasts.forget(emitter_id);
            return;
        };

        let broadcast = match &entity.kind {
            EntityKind::Jammer(jammer) => JammingBroadcast {
                emitter_id: entity.id.clone(),
                position: entity.position.clone(),
                radius_km: jammer.emitter.radius_km,
                frequency: jammer.emitter.frequency.clone(),
                hostile: entity.is_hostile(),
                active: jammer.is_active(),
                at: now,
            },
            EntityKind::Threat(Threat {
                emitter: Some(emitter), ..
            }) => JammingBroadcast {
                emitter_id: entity.id.clone(),
                position: entity.position.clone(),
                radius_km: emitter.radius_km,
                frequency: emitter.frequency.clone(),
                hostile: true,
                active: true,
                at: now,
            },
            _ => return,
        };

        if !self
            .broadcasts
            .should_broadcast(&broadcast, self.config.timing.jammer_keepalive_ms)
        {
            return;
        }
        debug!(
            emitter_id,
            frequency = %broadcast.frequency,
            hostile = broadcast.hostile,
            active = broadcast.active,
            "JAMMER_BROADCAST: 妨害電波を放送しました"
        );
        if !broadcast.hostile || !broadcast.active {
            return;
        }

        let sensors: Vec<(EntityId, Position, Frequency)> = self
            .registry
            .query(&EntityFilter::of(EntityType::Sensor).live())
            .filter_map(|e| e.as_sensor().map(|s| (e.id.clone(), e.position.clone(), s.frequency.clone())))
            .collect();

        for (sensor_id, position, frequency) in sensors {
            match broadcast.exposes(&position, &frequency, &self.transform) {
                Ok(true) => {
                    let hold = self.config.timing.jam_hold_ms;
                    let Some(sensor) = self.registry.get_mut(&sensor_id).and_then(|e| e.as_sensor_mut()) else {
                        continue;
                    };
                    let was_jammed = sensor.is_jammed(now);
                    let until = sensor.jam(now, hold);
                    self.spectrum.report(&frequency, until);
                    if !was_jammed {
                        self.emit(EventKind::Jammed {
                            sensor_id,
                            emitter_id: emitter_id.to_string(),
                            frequency,
                            until,
                        });
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    self.diagnostics.geometry_errors += 1;
                    warn!(sensor_id = %sensor_id, emitter_id, error = %err, "GEOMETRY_ERROR: 妨害判定をスキップしました");
                }
            }
        }
    }

    // ---- 探知・中継 ----

    fn threat_contacts(&self) -> Vec<ThreatContact> {
        self.registry
            .query(&EntityFilter::of(EntityType::Threat).live())
            .map(|e| ThreatContact {
                id: e.id.clone(),
                position: e.position.clone(),
                velocity: e.velocity,
            })
            .collect()
    }

    fn process_scan(&mut self, sensor_id: &str, contacts: &[ThreatContact]) {
        let now = self.now;
        let spectrum = &self.spectrum;
        let Some(entity) = self.registry.get_mut(sensor_id) else {
            self.scheduler.remove_job(&JobKind::SensorScan(sensor_id.to_string()));
            return;
        };
        let position = entity.position.clone();
        let owner = entity.owner.clone();
        let Some(sensor) = entity.as_sensor_mut() else {
            return;
        };

        // 周波数選択は走査の前に行う
        let hop = match select_frequency(&sensor.frequency, &self.config.spectrum.available, |f| {
            spectrum.is_contested(f, now)
        }) {
            FrequencyDecision::Hop(to) => Some((sensor.hop(to.clone()), to)),
            FrequencyDecision::Hold => {
                debug!(sensor_id, frequency = %sensor.frequency, "FREQUENCY_HOLD: 全周波数が妨害下のため現周波数を維持します");
                None
            }
            FrequencyDecision::Stay => None,
        };
        let jammed = sensor.is_jammed(now);
        let relay = sensor.relay.clone();
        let scanned = sensor.scan(sensor_id, &position, contacts, &self.transform, now);

        if let Some((from, to)) = hop {
            self.diagnostics.frequency_hops += 1;
            info!(sensor_id, from = %from, to = %to, "FREQUENCY_HOP: 周波数を変更しました");
            self.emit(EventKind::FrequencyHop {
                sensor_id: sensor_id.to_string(),
                from,
                to,
            });
        }
        if jammed {
            self.diagnostics.suppressed_scans += 1;
            trace!(sensor_id, "SCAN_SUPPRESSED: 妨害中のため走査を抑止しました");
        }

        match scanned {
            Ok(detections) => {
                for detection in detections {
                    self.diagnostics.detections += 1;
                    self.emit(EventKind::Detection(detection.clone()));
                    self.route_detection(detection, relay.as_deref(), owner.as_deref());
                }
            }
            Err(err) => {
                self.diagnostics.geometry_errors += 1;
                warn!(sensor_id, error = %err, "GEOMETRY_ERROR: 走査をスキップしました");
            }
        }
    }

    fn route_detection(&mut self, detection: DetectionEvent, relay: Option<&str>, owner: Option<&str>) {
        let now = self.now;
        let Some(relay_id) = relay else {
            // 中継なしのセンサーは自拠点の指揮所へ直接報告
            if let Some(base_id) = owner {
                let report = ContactReport {
                    threat_id: detection.threat_id,
                    position: detection.position,
                    velocity: detection.velocity,
                    sensor_id: detection.sensor_id,
                    relay_id: None,
                    received_at: now,
                };
                self.deliver(base_id, report);
            }
            return;
        };

        let relay_state = self
            .registry
            .get(relay_id)
            .and_then(|e| Some((e.owner.clone()?, e.as_sensor()?.is_jammed(now))));
        let Some((base_id, relay_jammed)) = relay_state else {
            self.interrupt_relay(&detection.threat_id, relay_id, None);
            return;
        };

        let packet = RelayPacket {
            threat_id: detection.threat_id,
            position: detection.position,
            velocity: detection.velocity,
            sensor_id: detection.sensor_id,
            relay_id: relay_id.to_string(),
            base_id,
            detected_at: detection.timestamp,
        };
        match relay::accept(&mut self.dedup, &packet, relay_jammed, now, self.config.timing.relay_delay_ms) {
            RelayIngress::Scheduled(due) => {
                debug!(threat_id = %packet.threat_id, relay_id, due, "RELAY_QUEUED: 中継転送を予約しました");
                let subject = Some(packet.threat_id.clone());
                self.scheduler.schedule(due, subject, TimerKind::RelayForward(packet));
            }
            RelayIngress::Duplicate => {
                self.diagnostics.relay_duplicates += 1;
                trace!(threat_id = %packet.threat_id, relay_id, "RELAY_DUPLICATE");
            }
            RelayIngress::Suppressed => {
                self.diagnostics.relay_suppressed += 1;
                debug!(threat_id = %packet.threat_id, relay_id, "RELAY_SUPPRESSED: 中継ユニットが妨害中のため破棄しました");
            }
        }
    }

    /// 中継を中断する
    ///
    /// 重複除去の記録は消すが、センサーの探知済み記録は残す（同じセンサーは再報告しない）
    fn interrupt_relay(&mut self, threat_id: &str, relay_id: &str, base_id: Option<&str>) {
        self.diagnostics.relay_interruptions += 1;
        if let Some(base_id) = base_id {
            self.dedup.remove(base_id, threat_id);
        }
        self.emit(EventKind::RelayInterrupted {
            threat_id: threat_id.to_string(),
            relay_id: relay_id.to_string(),
        });
    }

    fn forward_relay(&mut self, packet: RelayPacket) {
        let now = self.now;
        let relay_ok = self
            .registry
            .get(&packet.relay_id)
            .and_then(|e| e.as_sensor())
            .is_some_and(|s| !s.is_jammed(now));
        if !relay_ok {
            self.interrupt_relay(&packet.threat_id, &packet.relay_id, Some(&packet.base_id));
            return;
        }

        self.emit(EventKind::Relayed {
            threat_id: packet.threat_id.clone(),
            relay_id: packet.relay_id.clone(),
            base_id: packet.base_id.clone(),
        });
        let report = ContactReport {
            threat_id: packet.threat_id,
            position: packet.position,
            velocity: packet.velocity,
            sensor_id: packet.sensor_id,
            relay_id: Some(packet.relay_id),
            received_at: now,
        };
        self.deliver(&packet.base_id, report);
    }

    // ---- 指揮判断 ----

    fn deliver(&mut self, base_id: &str, report: ContactReport) {
        let now = self.now;
        let cooldown = self.config.timing.decision_cooldown_ms;
        let threat_id = report.threat_id.clone();
        let Some(post) = self.posts.get_mut(base_id) else {
            warn!(base_id, threat_id = %threat_id, "UNKNOWN_BASE: 報告先の指揮所がありません");
            return;
        };
        if !post.receive(report, now, cooldown) {
            self.diagnostics.decision_duplicates += 1;
            trace!(base_id, threat_id = %threat_id, "DECISION_COOLDOWN");
            return;
        }
        self.decide_threat(base_id, &threat_id);
    }

    fn process_command_cycle(&mut self, base_id: &str) {
        let cooldown = self.config.timing.decision_cooldown_ms;
        let Some(post) = self.posts.get(base_id) else {
            return;
        };
        for threat_id in post.pending(self.now, cooldown, &self.locks) {
            self.decide_threat(base_id, &threat_id);
        }
    }

    fn severity_thresholds(&self) -> SeverityThresholds {
        let th = &self.config.thresholds;
        SeverityThresholds {
            high_distance_km: th.high_distance_km,
            medium_distance_km: th.medium_distance_km,
            high_speed: th.high_speed,
        }
    }

    fn decide_threat(&mut self, base_id: &str, threat_id: &str) {
        let thresholds = self.severity_thresholds();
        let Some(post) = self.posts.get(base_id) else {
            return;
        };
        let Some(threat) = self.registry.get(threat_id).filter(|e| e.is_live()) else {
            return;
        };

        let outcome = match post.decide(threat, &self.registry, &self.transform, &thresholds, &self.locks) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.diagnostics.geometry_errors += 1;
                warn!(base_id, threat_id, error = %err, "GEOMETRY_ERROR: 判断をスキップしました");
                return;
            }
        };
        let decision = match outcome {
            DecisionOutcome::Engaged { unit_id } => {
                trace!(base_id, threat_id, unit_id = %unit_id, "THREAT_ENGAGED");
                return;
            }
            DecisionOutcome::Decided(decision) => decision,
        };

        if let Some(unit_id) = &decision.unit_id {
            if let Err(err) = self.locks.try_lock(unit_id, threat_id) {
                self.diagnostics.assignment_conflicts += 1;
                if let Some(post) = self.posts.get_mut(base_id) {
                    post.stats.deferred += 1;
                }
                debug!(base_id, threat_id, error = %err, "ASSIGNMENT_DEFERRED: 割り当てを次のサイクルへ延期します");
                return;
            }
        }

        if let Some(post) = self.posts.get_mut(base_id) {
            post.mark_decided(threat_id, self.now);
        }
        self.diagnostics.decisions += 1;
        self.emit(EventKind::Decision(DecisionEvent {
            threat_id: threat_id.to_string(),
            action: decision.action,
            severity: decision.severity,
            unit_id: decision.unit_id.clone(),
        }));

        match (decision.action, decision.unit_id) {
            (DecisionAction::Intercept, Some(unit_id)) => self.dispatch_intercept(&unit_id, threat_id),
            (DecisionAction::Jam, Some(unit_id)) => self.dispatch_jam(&unit_id, threat_id),
            _ => {}
        }
    }

    fn dispatch_intercept(&mut self, launcher_id: &str, threat_id: &str) {
        let now = self.now;
        let Some((target_position, target_velocity)) = self
            .registry
            .get(threat_id)
            .map(|e| (e.position.clone(), e.velocity))
        else {
            self.locks.release(launcher_id);
            return;
        };
        let Some((position, owner)) = self
            .registry
            .get(launcher_id)
            .map(|e| (e.position.clone(), e.owner.clone()))
        else {
            self.locks.release(launcher_id);
            return;
        };
        let speed = self.native_speed(self.config.interceptor.speed, &position);

        let solution = match plan_launch(&position, &target_position, target_velocity, speed, &self.transform) {
            Ok(solution) => solution,
            Err(err) => {
                self.locks.release(launcher_id);
                self.diagnostics.geometry_errors += 1;
                warn!(launcher_id, threat_id, error = %err, "GEOMETRY_ERROR: 会合解を計算できません");
                return;
            }
        };

        let fired = self
            .registry
            .get_mut(launcher_id)
            .and_then(|e| e.as_launcher_mut())
            .and_then(|launcher| {
                if !launcher.assign(threat_id.to_string(), now) {
                    return None;
                }
                let fired = launcher.fire(launcher_id, &position, now, solution.degraded);
                if fired.is_none() {
                    launcher.release();
                }
                fired
            });
        let Some(interceptor_id) = fired else {
            self.locks.release(launcher_id);
            warn!(launcher_id, threat_id, "LAUNCH_ABORTED: 発射できる状態にありません");
            return;
        };

        let interceptor = Interceptor::new(
            threat_id.to_string(),
            speed,
            Some(launcher_id.to_string()),
            now,
            self.config.interceptor.max_flight_ticks,
        );
        let entity = Entity::new(interceptor_id.clone(), position, EntityKind::Interceptor(interceptor))
            .with_owner(owner)
            .with_velocity(solution.launch_velocity);
        if let Err(err) = self.registry.insert(entity) {
            warn!(interceptor_id = %interceptor_id, error = %err, "LAUNCH_ABORTED: 迎撃体を登録できません");
            self.locks.release(launcher_id);
            self.finish_assignment(launcher_id, threat_id);
            return;
        }

        self.diagnostics.launches += 1;
        if solution.degraded {
            self.diagnostics.degraded_intercepts += 1;
        }
        self.emit(EventKind::Launch {
            interceptor_id,
            launcher_id: launcher_id.to_string(),
            threat_id: threat_id.to_string(),
            time_to_intercept: solution.time_to_intercept,
            degraded: solution.degraded,
        });
        self.scheduler.schedule(
            now + self.config.timing.lock_timeout_ms,
            Some(threat_id.to_string()),
            TimerKind::LockRelease {
                unit: launcher_id.to_string(),
                threat: threat_id.to_string(),
            },
        );
    }

    fn dispatch_jam(&mut self, jammer_id: &str, threat_id: &str) {
        let now = self.now;
        let duration = self.config.timing.jam_duration_ms;
        let until = self
            .registry
            .get_mut(jammer_id)
            .and_then(|e| e.as_jammer_mut())
            .and_then(|jammer| jammer.engage(threat_id.to_string(), now, duration));
        let Some(until) = until else {
            self.locks.release(jammer_id);
            warn!(jammer_id, threat_id, "JAM_ABORTED: ジャマーが待機状態にありません");
            return;
        };

        self.diagnostics.jam_commands += 1;
        self.emit(EventKind::JamCommand {
            jammer_id: jammer_id.to_string(),
            threat_id: threat_id.to_string(),
            until,
        });
        self.scheduler.schedule(
            until,
            None,
            TimerKind::JammerPhase {
                jammer: jammer_id.to_string(),
            },
        );
        self.scheduler.schedule(
            now + self.config.timing.lock_timeout_ms,
            Some(threat_id.to_string()),
            TimerKind::LockRelease {
                unit: jammer_id.to_string(),
                threat: threat_id.to_string(),
            },
        );
    }

    // ---- タイマー ----

    fn process_timers(&mut self) {
        for timer in self.scheduler.pop_due(self.now) {
            trace!(timer = timer.kind.name(), timer_id = timer.id, "TIMER_FIRED");
            match timer.kind {
                TimerKind::RelayForward(packet) => self.forward_relay(packet),
                TimerKind::LockRelease { unit, threat } => {
                    if self.locks.release_if_held(&unit, &threat) {
                        self.diagnostics.lock_timeouts += 1;
                        warn!(unit_id = %unit, threat_id = %threat, "LOCK_TIMEOUT: 割り当てロックが期限切れになりました");
                        self.finish_assignment(&unit, &threat);
                    }
                }
                TimerKind::JammerPhase { jammer } => self.advance_jammer(&jammer),
            }
        }
    }

    fn advance_jammer(&mut self, jammer_id: &str) {
        let now = self.now;
        let cooldown = self.config.timing.jam_cooldown_ms;
        let Some(jammer) = self.registry.get_mut(jammer_id).and_then(|e| e.as_jammer_mut()) else {
            return;
        };
        let engaged = jammer.engaged_threat().cloned();
        let next = jammer.advance_phase(now, cooldown);
        let standing_down = matches!(jammer.state, JammerState::Cooldown { .. });
        debug!(jammer_id, state = ?jammer.state, "JAMMER_PHASE: ジャマーの状態が遷移しました");

        if let Some(due) = next {
            self.scheduler.schedule(
                due,
                None,
                TimerKind::JammerPhase {
                    jammer: jammer_id.to_string(),
                },
            );
        }
        if standing_down {
            if let Some(threat_id) = engaged {
                if self.locks.release_if_held(jammer_id, &threat_id) {
                    self.finish_assignment(jammer_id, &threat_id);
                }
            }
        }
    }

    // ---- 自動生成 ----

    fn process_generator(&mut self) {
        let live = self
            .registry
            .query(&EntityFilter::of(EntityType::Threat).live())
            .filter(|e| e.id.starts_with(GENERATED_PREFIX))
            .count();
        if live >= self.generator.settings.max_active {
            trace!(live, "GENERATOR_SATURATED");
            return;
        }
        let bases: Vec<(EntityId, GeoPoint)> = self.transform.bases().map(|(id, c)| (id.clone(), *c)).collect();
        let Some(intent) = self.generator.next_intent(&bases, &self.catalog) else {
            return;
        };
        if let Err(err) = self.spawn(intent) {
            self.diagnostics.rejected_intents += 1;
            warn!(error = %err, "SPAWN_REJECTED: 自動生成した脅威を登録できません");
        }
    }

    // ---- 集計 ----

    /// 交戦結果の概要を表示
    pub fn print_summary(&self) {
        println!("=== 交戦結果 ===");
        println!("経過時間: {:.1}秒 ({}ステップ)", ms_to_secs(self.now), self.tick);
        println!("{}", self.diagnostics);
        if self.generator.generated() > 0 {
            println!("  自動生成した脅威: {}機", self.generator.generated());
        }
        println!();

        println!("=== ランチャー ===");
        for entity in self.registry.query(&EntityFilter::of(EntityType::Launcher)) {
            if let Some(launcher) = entity.as_launcher() {
                let stats = launcher.stats();
                println!(
                    "  {}: 発射 {}回 (暫定解 {}) / 残弾 {}発",
                    entity.id, stats.total_launches, stats.degraded_launches, stats.missiles_remaining
                );
            }
        }

        println!("=== センサー ===");
        for entity in self.registry.query(&EntityFilter::of(EntityType::Sensor)) {
            if let Some(sensor) = entity.as_sensor() {
                println!(
                    "  {} [{}]: 探知 {} / 抑止 {} / 被妨害 {} / 周波数変更 {}",
                    entity.id,
                    sensor.frequency,
                    sensor.stats.detections,
                    sensor.stats.suppressed_scans,
                    sensor.stats.jam_events,
                    sensor.stats.frequency_hops
                );
            }
        }

        println!("=== 指揮所 ===");
        for (base_id, post) in &self.posts {
            println!(
                "  {}: 受信 {} / 判断 {} / 重複 {} / 延期 {}",
                base_id, post.stats.reports, post.stats.decisions, post.stats.stale_duplicates, post.stats.deferred
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;

    const SCENARIO: &str = r#"
meta: { version: "1.0", name: engine-unit }
sim: { tick_ms: 30, duration_ms: 60000, seed: 3 }
bases:
  - id: B1
    name: Alpha
    center: { lat: 35.0, lng: 139.0 }
    units:
      - { id: R1, kind: radar, radius_km: 6.0, frequency: 2GHz }
      - { id: L1, kind: launcher, offset: { x: 5.0, y: 0.0 }, missiles: 2 }
"#;

    fn engine() -> Engine {
        let config = ScenarioConfig::from_yaml(SCENARIO).unwrap();
        Engine::from_scenario(&config).unwrap()
    }

    #[test]
    fn test_from_scenario_registers_units_and_jobs() {
        let e = engine();
        assert_eq!(e.registry().count(EntityType::Base), 1);
        assert_eq!(e.registry().count(EntityType::Sensor), 1);
        assert!(e.scheduler().has_job(&JobKind::SensorScan("R1".into())));
        assert!(e.scheduler().has_job(&JobKind::CommandCycle("B1".into())));
        assert!(e.scheduler().has_job(&JobKind::Motion));
        assert_eq!(e.registry().get("L1").unwrap().owner.as_deref(), Some("B1"));
        assert!(e.screen_map().get("B1").is_some());
    }

    #[test]
    fn test_submitted_intent_applies_on_next_step() {
        let mut e = engine();
        e.submit(SpawnIntent::threat(
            Position::local("B1", 100.0, 0.0),
            Position::local("B1", 0.0, 0.0),
            0.02,
        ));
        assert_eq!(e.registry().count(EntityType::Threat), 0);
        e.step();
        assert_eq!(e.registry().count(EntityType::Threat), 1);
        let events = e.drain_events();
        assert!(events.iter().any(|ev| ev.kind.code() == "THREAT_SPAWNED"));
        assert!(e.drain_events().is_empty());
    }

    #[test]
    fn test_rejected_intent_is_counted() {
        let mut e = engine();
        e.submit(SpawnIntent::threat(
            Position::local("B9", 0.0, 0.0),
            Position::local("B1", 0.0, 0.0),
            0.02,
        ));
        e.submit(SpawnIntent::interceptor(
            Position::local("B1", 0.0, 0.0),
            Position::local("B1", 1.0, 1.0),
            0.5,
        ));
        e.step();
        assert_eq!(e.diagnostics().rejected_intents, 2);
    }

    #[test]
    fn test_unknown_catalog_entry_rejected() {
        let mut e = engine();
        let intent = SpawnIntent::threat(Position::local("B1", 10.0, 0.0), Position::local("B1", 0.0, 0.0), 0.02)
            .with_catalog("nope");
        assert!(matches!(e.spawn(intent), Err(EngineError::UnknownCatalogEntry(_))));
    }

    #[test]
    fn test_interceptor_intent_resolves_nearest_threat() {
        let mut e = engine();
        e.spawn(
            SpawnIntent::threat(Position::local("B1", 100.0, 0.0), Position::local("B1", 0.0, 0.0), 0.01)
                .with_id("FAR"),
        )
        .unwrap();
        e.spawn(
            SpawnIntent::threat(Position::local("B1", 20.0, 0.0), Position::local("B1", 0.0, 0.0), 0.01)
                .with_id("NEAR"),
        )
        .unwrap();
        let id = e
            .spawn(SpawnIntent::interceptor(
                Position::local("B1", 0.0, 0.0),
                Position::local("B1", 25.0, 0.0),
                0.5,
            ))
            .unwrap();
        let interceptor = e.registry().get(&id).unwrap().as_interceptor().unwrap();
        assert_eq!(interceptor.target_id, "NEAR");
    }

    #[test]
    fn test_sink_receives_events() {
        let mut e = engine();
        e.set_sink(Box::new(MemorySink::default()));
        e.spawn(SpawnIntent::threat(
            Position::local("B1", 100.0, 0.0),
            Position::local("B1", 0.0, 0.0),
            0.02,
        ))
        .unwrap();
        assert_eq!(e.drain_events().len(), 1);
    }

    #[test]
    fn test_run_stops_at_duration() {
        let config = ScenarioConfig::from_yaml(&SCENARIO.replace("duration_ms: 60000", "duration_ms: 300")).unwrap();
        let mut e = Engine::from_scenario(&config).unwrap();
        e.run();
        assert_eq!(e.tick(), 10);
        assert_eq!(e.now(), 300);
        assert_eq!(e.diagnostics().ticks, 10);
    }

    /// 記録したログメッセージを共有する購読レイヤー
    #[derive(Clone, Default)]
    struct MessageLog(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

    struct MessageVisitor<'a>(&'a mut String);

    impl tracing::field::Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                *self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for MessageLog {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.0.lock().unwrap().push(message);
        }
    }

    #[test]
    fn test_initialization_logs_do_not_depend_on_verbosity() {
        use tracing_subscriber::layer::SubscriberExt;

        let log = MessageLog::default();
        let subscriber = tracing_subscriber::registry().with(log.clone());
        tracing::subscriber::with_default(subscriber, || {
            let e = engine();
            assert_eq!(e.verbose_level, 0);
        });

        let messages = log.0.lock().unwrap();
        let units = messages.iter().filter(|m| m.starts_with("UNIT_INITIALIZED")).count();
        assert_eq!(units, 2);
    }
}
