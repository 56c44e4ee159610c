use std::collections::HashSet;
use crate::events::DetectionEvent;
use crate::geometry::GeometryError;
use crate::models::common::{EntityId, Frequency, Position, SimTime, Vec2};
use crate::transform::FrameTransform;
use serde::{Deserialize, Serialize};

/// センサーの役割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorRole {
    /// 探知レーダー
    #[default]
    Radar,
    /// 中継アンテナ
    Antenna,
}

/// 走査対象となる脅威の状態
///
/// 走査は確定済み状態のスナップショットに対して行います。
#[derive(Debug, Clone, PartialEq)]
pub struct ThreatContact {
    pub id: EntityId,
    pub position: Position,
    pub velocity: Vec2,
}

/// センサーの探知統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectionStats {
    /// 探知イベント数
    pub detections: u64,
    /// 妨害により抑止された走査回数
    pub suppressed_scans: u64,
    /// 妨害を受けた回数（窓の延長を含む）
    pub jam_events: u64,
    /// 周波数変更回数
    pub frequency_hops: u64,
}

/// センサーエンティティ固有の状態
///
/// 円形の探知範囲を持ち、範囲内に入った脅威をセンサーごとに一度だけ報告します。
/// `now < jammed_until` の間は探知・中継ともに停止します。
#[derive(Debug, Clone)]
pub struct Sensor {
    pub role: SensorRole,
    /// 探知半径（km）
    pub detection_radius_km: f64,
    /// 運用周波数
    pub frequency: Frequency,
    /// 妨害解除時刻
    pub jammed_until: SimTime,
    /// 上位中継ユニット（None の場合は指揮所へ直接報告）
    pub relay: Option<EntityId>,
    /// 探知済み脅威ID
    pub detected: HashSet<EntityId>,
    pub stats: DetectionStats,
}

impl Sensor {
    /// 新しいセンサーを作成します
    ///
    /// # 引数
    ///
    /// * `role` - レーダーまたは中継アンテナ
    /// * `detection_radius_km` - 探知半径（km）
    /// * `frequency` - 初期運用周波数
    pub fn new(role: SensorRole, detection_radius_km: f64, frequency: Frequency) -> Self {
        Self {
            role,
            detection_radius_km,
            frequency,
            jammed_until: 0,
            relay: None,
            detected: HashSet::new(),
            stats: DetectionStats::default(),
        }
    }

    pub fn with_relay(mut self, relay: Option<EntityId>) -> Self {
        self.relay = relay;
        self
    }

    pub fn is_relay(&self) -> bool {
        self.role == SensorRole::Antenna
    }

    pub fn is_jammed(&self, now: SimTime) -> bool {
        now < self.jammed_until
    }

    /// 妨害を受ける（スライディング窓）
    ///
    /// # 戻り値
    ///
    /// 更新後の妨害解除時刻
    pub fn jam(&mut self, now: SimTime, hold: SimTime) -> SimTime {
        self.jammed_until = self.jammed_until.max(now + hold);
        self.stats.jam_events += 1;
        self.jammed_until
    }

    /// 周波数を変更する
    ///
    /// 旧周波数に対する妨害は新周波数には及ばないため、妨害状態も解除します。
    ///
    /// # 戻り値
    ///
    /// 変更前の周波数
    pub fn hop(&mut self, to: Frequency) -> Frequency {
        self.jammed_until = 0;
        self.stats.frequency_hops += 1;
        std::mem::replace(&mut self.frequency, to)
    }

    /// 探知範囲内の未探知脅威を走査
    ///
    /// 各脅威の位置をセンサーの座標系に変換してから距離を判定します。
    /// 妨害中は何も探知せず、抑止回数だけを数えます。
    ///
    /// # 引数
    ///
    /// * `sensor_id` - このセンサーのID
    /// * `position` - このセンサーの位置
    /// * `contacts` - 走査対象の脅威
    /// * `transform` - 座標変換器
    /// * `now` - 現在時刻
    ///
    /// # 戻り値
    ///
    /// 新たに発生した探知イベント
    pub fn scan(
        &mut self,
        sensor_id: &str,
        position: &Position,
        contacts: &[ThreatContact],
        transform: &FrameTransform,
        now: SimTime,
    ) -> Result<Vec<DetectionEvent>, GeometryError> {
        if self.is_jammed(now) {
            self.stats.suppressed_scans += 1;
            return Ok(Vec::new());
        }

        let frame = position.frame();
        let mut events = Vec::new();
        for contact in contacts {
            if self.detected.contains(&contact.id) {
                continue;
            }
            let seen_at = transform.express_in(&contact.position, &frame)?;
            let distance = transform.geometry().distance_km(position, &seen_at)?;
            if distance <= self.detection_radius_km {
                self.detected.insert(contact.id.clone());
                self.stats.detections += 1;
                events.push(DetectionEvent {
                    threat_id: contact.id.clone(),
                    sensor_id: sensor_id.to_string(),
                    position: contact.position.clone(),
                    velocity: contact.velocity,
                    timestamp: now,
                });
            }
        }
        Ok(events)
    }

    pub fn forget(&mut self, threat_id: &str) {
        self.detected.remove(threat_id);
    }
}
