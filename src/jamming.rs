//! # Jamming モジュール
//!
//! 妨害電波の放射・被妨害判定・コグニティブ無線による周波数選択を扱います。
//!
//! 放射源（稼働中のジャマー、妨害電波源を持つ生存中の妨害型脅威）は周期的に
//! 放射状態を通知します。状態（位置・半径・周波数・稼働）が変化したとき、
//! またはキープアライブ間隔が経過したときだけ通知するため、静止した放射源でも
//! センサー側のスライディング窓が途切れません。

use crate::geometry::GeometryError;
use crate::models::common::{EntityId, Frequency, Position, SimTime};
use crate::transform::FrameTransform;
use std::collections::HashMap;

/// 妨害電波の放射通知
#[derive(Debug, Clone, PartialEq)]
pub struct JammingBroadcast {
    pub emitter_id: EntityId,
    pub position: Position,
    pub radius_km: f64,
    pub frequency: Frequency,
    /// 敵性の放射源か（味方ジャマーの放射はセンサーに影響しない）
    pub hostile: bool,
    pub active: bool,
    pub at: SimTime,
}

impl JammingBroadcast {
    fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            position: self.position.clone(),
            radius_km: self.radius_km,
            frequency: self.frequency.clone(),
            active: self.active,
        }
    }

    /// センサーがこの放射の影響を受けるか
    ///
    /// 敵性・稼働中・同一周波数で、かつ距離が半径未満の場合に影響を受けます。
    pub fn exposes(
        &self,
        sensor_position: &Position,
        sensor_frequency: &Frequency,
        transform: &FrameTransform,
    ) -> Result<bool, GeometryError> {
        if !self.hostile || !self.active || self.frequency != *sensor_frequency {
            return Ok(false);
        }
        let distance = transform.distance_km(sensor_position, &self.position)?;
        Ok(distance < self.radius_km)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Fingerprint {
    position: Position,
    radius_km: f64,
    frequency: Frequency,
    active: bool,
}

/// 放射源ごとの最終通知を追跡
#[derive(Debug, Clone, Default)]
pub struct BroadcastTracker {
    last: HashMap<EntityId, (Fingerprint, SimTime)>,
}

impl BroadcastTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 通知すべきか判定し、通知する場合は記録する
    ///
    /// # 引数
    ///
    /// * `broadcast` - 候補となる放射通知
    /// * `keepalive` - キープアライブ間隔（ミリ秒）
    pub fn should_broadcast(&mut self, broadcast: &JammingBroadcast, keepalive: SimTime) -> bool {
        let fingerprint = broadcast.fingerprint();
        let due = match self.last.get(&broadcast.emitter_id) {
            Some((prev, at)) => *prev != fingerprint || broadcast.at >= at + keepalive,
            None => true,
        };
        if due {
            self.last
                .insert(broadcast.emitter_id.clone(), (fingerprint, broadcast.at));
        }
        due
    }

    pub fn forget(&mut self, emitter_id: &str) {
        self.last.remove(emitter_id);
    }
}

/// 周波数ごとの被妨害状況
///
/// センサーが妨害を受けると、その周波数を同じ時刻まで「妨害中」として報告します。
#[derive(Debug, Clone, Default)]
pub struct SpectrumMonitor {
    contested: HashMap<Frequency, SimTime>,
}

impl SpectrumMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 周波数を `until` まで妨害中として記録（延長のみ）
    pub fn report(&mut self, frequency: &Frequency, until: SimTime) {
        let entry = self.contested.entry(frequency.clone()).or_insert(until);
        *entry = (*entry).max(until);
    }

    pub fn is_contested(&self, frequency: &Frequency, now: SimTime) -> bool {
        self.contested.get(frequency).is_some_and(|until| now < *until)
    }

    /// 期限切れの記録を削除
    pub fn expire(&mut self, now: SimTime) {
        self.contested.retain(|_, until| now < *until);
    }

    /// 現在妨害中の周波数
    pub fn contested_at(&self, now: SimTime) -> Vec<Frequency> {
        let mut list: Vec<_> = self
            .contested
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(f, _)| f.clone())
            .collect();
        list.sort();
        list
    }
}

/// 周波数選択の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrequencyDecision {
    /// 現在の周波数を維持
    Stay,
    /// 指定の周波数へ変更
    Hop(Frequency),
    /// 全周波数が妨害中のため維持
    Hold,
}

/// コグニティブ無線の周波数選択
///
/// # 引数
///
/// * `current` - 現在の周波数
/// * `available` - 使用可能な周波数（優先順）
/// * `is_contested` - 周波数が妨害中かの判定
///
/// # 戻り値
///
/// 現在の周波数が健全なら `Stay`、妨害中で健全な周波数があれば最初のものへ `Hop`、
/// すべて妨害中なら `Hold`
pub fn select_frequency(
    current: &Frequency,
    available: &[Frequency],
    is_contested: impl Fn(&Frequency) -> bool,
) -> FrequencyDecision {
    if !is_contested(current) {
        return FrequencyDecision::Stay;
    }
    available
        .iter()
        .find(|f| *f != current && !is_contested(f))
        .map_or(FrequencyDecision::Hold, |f| FrequencyDecision::Hop(f.clone()))
}
