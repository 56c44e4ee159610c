use crate::models::common::{EntityId, Frequency, SimTime};
use serde::{Deserialize, Serialize};

/// 妨害電波源のパラメータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emitter {
    /// 有効半径（km）
    pub radius_km: f64,
    /// 妨害周波数
    pub frequency: Frequency,
}

/// ジャマーの状態
#[derive(Debug, Clone, PartialEq)]
pub enum JammerState {
    /// 待機中（指揮所からの割り当て可能）
    Idle,
    /// 妨害中
    ///
    /// 敵性ジャマーは `engaged` / `until` ともに None で常時妨害します。
    Active {
        engaged: Option<EntityId>,
        until: Option<SimTime>,
    },
    /// 冷却中
    Cooldown { until: SimTime },
}

/// ジャマーエンティティ固有の状態
#[derive(Debug, Clone)]
pub struct Jammer {
    pub emitter: Emitter,
    pub state: JammerState,
}

impl Jammer {
    /// 味方ジャマー（待機状態で生成）
    pub fn new(emitter: Emitter) -> Self {
        Self {
            emitter,
            state: JammerState::Idle,
        }
    }

    /// 敵性ジャマー（常時妨害）
    pub fn hostile(emitter: Emitter) -> Self {
        Self {
            emitter,
            state: JammerState::Active {
                engaged: None,
                until: None,
            },
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == JammerState::Idle
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, JammerState::Active { .. })
    }

    pub fn engaged_threat(&self) -> Option<&EntityId> {
        match &self.state {
            JammerState::Active { engaged, .. } => engaged.as_ref(),
            _ => None,
        }
    }

    /// 脅威に対する妨害を開始
    ///
    /// # 戻り値
    ///
    /// 妨害終了時刻。待機中でなければ None
    pub fn engage(&mut self, threat_id: EntityId, now: SimTime, duration: SimTime) -> Option<SimTime> {
        if !self.is_idle() {
            return None;
        }
        let until = now + duration;
        self.state = JammerState::Active {
            engaged: Some(threat_id),
            until: Some(until),
        };
        Some(until)
    }

    /// 妨害を終了して冷却に入る
    ///
    /// # 戻り値
    ///
    /// 冷却終了時刻。妨害中でなければ None
    pub fn stand_down(&mut self, now: SimTime, cooldown: SimTime) -> Option<SimTime> {
        if !self.is_active() {
            return None;
        }
        let until = now + cooldown;
        self.state = JammerState::Cooldown { until };
        Some(until)
    }

    /// 時刻に応じて状態を進める
    ///
    /// # 戻り値
    ///
    /// 次の遷移時刻（さらにタイマーが必要な場合）
    pub fn advance_phase(&mut self, now: SimTime, cooldown: SimTime) -> Option<SimTime> {
        match self.state {
            JammerState::Active {
                until: Some(until), ..
            } if now >= until => self.stand_down(now, cooldown),
            JammerState::Cooldown { until } if now >= until => {
                self.state = JammerState::Idle;
                None
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter() -> Emitter {
        Emitter {
            radius_km: 2.0,
            frequency: Frequency::new("2GHz"),
        }
    }

    #[test]
    fn test_jammer_lifecycle() {
        let mut j = Jammer::new(emitter());
        assert!(j.is_idle());
        assert_eq!(j.engage("T1".into(), 1000, 3000), Some(4000));
        assert_eq!(j.engaged_threat(), Some(&"T1".to_string()));
        assert!(j.engage("T2".into(), 1100, 3000).is_none());

        // 期限前は遷移しない
        assert_eq!(j.advance_phase(3999, 2000), None);
        assert!(j.is_active());

        assert_eq!(j.advance_phase(4000, 2000), Some(6000));
        assert_eq!(j.state, JammerState::Cooldown { until: 6000 });
        assert_eq!(j.advance_phase(6000, 2000), None);
        assert!(j.is_idle());
    }

    #[test]
    fn test_hostile_jammer_never_expires() {
        let mut j = Jammer::hostile(emitter());
        assert!(j.is_active());
        assert_eq!(j.advance_phase(u64::MAX / 2, 2000), None);
        assert!(j.is_active());
        assert!(j.engaged_threat().is_none());
    }
}
