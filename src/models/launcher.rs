use crate::models::common::{EntityId, Position, SimTime};
use serde::Serialize;

/// 発射記録
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchRecord {
    pub timestamp: SimTime,
    pub interceptor_id: EntityId,
    pub threat_id: EntityId,
    pub launch_position: Position,
    /// 会合解が得られず暫定値で発射した
    pub degraded: bool,
}

/// ランチャーの状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LauncherState {
    Idle,
    /// 割り当てを遂行中
    Busy { threat_id: EntityId, since: SimTime },
}

/// ランチャーエンティティ固有の状態
#[derive(Debug, Clone)]
pub struct Launcher {
    pub state: LauncherState,
    pub max_missiles: u32,           // 最大装備数
    pub current_missiles: u32,       // 現在の装備数
    pub missile_counter: u32,        // 迎撃体ID生成用カウンタ
    pub launch_history: Vec<LaunchRecord>,
}

/// 発射統計情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchStats {
    pub total_launches: usize,
    pub missiles_remaining: u32,
    pub missiles_fired: u32,
    pub degraded_launches: usize,
    pub is_ready: bool,
}

impl Launcher {
    pub fn new(missiles: u32) -> Self {
        Self {
            state: LauncherState::Idle,
            max_missiles: missiles,
            current_missiles: missiles,
            missile_counter: 0,
            launch_history: Vec::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == LauncherState::Idle
    }

    /// 待機中かつ残弾あり
    pub fn can_launch(&self) -> bool {
        self.is_idle() && self.current_missiles > 0
    }

    pub fn busy_with(&self) -> Option<&EntityId> {
        match &self.state {
            LauncherState::Busy { threat_id, .. } => Some(threat_id),
            LauncherState::Idle => None,
        }
    }

    /// 脅威への割り当て（待機中のみ）
    pub fn assign(&mut self, threat_id: EntityId, now: SimTime) -> bool {
        if !self.can_launch() {
            return false;
        }
        self.state = LauncherState::Busy { threat_id, since: now };
        true
    }

    /// 迎撃体を発射
    ///
    /// 割り当て済みの脅威に対してのみ発射できます。残弾を1減らし、発射を記録します。
    ///
    /// # 引数
    ///
    /// * `launcher_id` - このランチャーのID（迎撃体ID `<launcher>_M<nnn>` の生成に使用）
    /// * `position` - 発射位置
    /// * `now` - 現在時刻
    /// * `degraded` - 暫定解での発射か
    ///
    /// # 戻り値
    ///
    /// 迎撃体ID。割り当てがない・残弾がない場合は None
    pub fn fire(&mut self, launcher_id: &str, position: &Position, now: SimTime, degraded: bool) -> Option<EntityId> {
        let threat_id = self.busy_with()?.clone();
        if self.current_missiles == 0 {
            return None;
        }

        self.missile_counter += 1;
        self.current_missiles -= 1;
        let interceptor_id = format!("{}_M{:03}", launcher_id, self.missile_counter);

        self.launch_history.push(LaunchRecord {
            timestamp: now,
            interceptor_id: interceptor_id.clone(),
            threat_id,
            launch_position: position.clone(),
            degraded,
        });

        Some(interceptor_id)
    }

    /// 割り当てを解除して待機に戻す
    ///
    /// # 戻り値
    ///
    /// 解除前に遂行していた脅威ID
    pub fn release(&mut self) -> Option<EntityId> {
        match std::mem::replace(&mut self.state, LauncherState::Idle) {
            LauncherState::Busy { threat_id, .. } => Some(threat_id),
            LauncherState::Idle => None,
        }
    }

    /// 再装填（最大装備数まで）
    pub fn reload(&mut self, count: u32) {
        self.current_missiles = (self.current_missiles + count).min(self.max_missiles);
    }

    pub fn stats(&self) -> LaunchStats {
        LaunchStats {
            total_launches: self.launch_history.len(),
            missiles_remaining: self.current_missiles,
            missiles_fired: self.max_missiles.saturating_sub(self.current_missiles),
            degraded_launches: self.launch_history.iter().filter(|r| r.degraded).count(),
            is_ready: self.can_launch(),
        }
    }
}
