//! # Scheduler モジュール
//!
//! 名前付きの周期ジョブと、取り消し可能な単発タイマーを管理します。
//!
//! - 周期ジョブは周期の整数倍で次回予定時刻を進めるため、処理時刻がずれても累積しません。
//! - 単発タイマーは `(予定時刻, 連番)` をキーに保持し、参照する脅威ID（subject）で
//!   まとめて取り消せます。
//!
//! 時刻はすべてシミュレーション時刻（ミリ秒）です。

use crate::models::common::{EntityId, SimTime};
use crate::relay::RelayPacket;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// 周期ジョブの種類
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKind {
    Motion,
    SensorScan(EntityId),
    CommandCycle(EntityId),
    Broadcast(EntityId),
    Generator,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Motion => f.write_str("motion"),
            JobKind::SensorScan(id) => write!(f, "scan:{}", id),
            JobKind::CommandCycle(id) => write!(f, "command:{}", id),
            JobKind::Broadcast(id) => write!(f, "broadcast:{}", id),
            JobKind::Generator => f.write_str("generator"),
        }
    }
}

/// 周期ジョブ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicJob {
    pub kind: JobKind,
    pub period: SimTime,
    pub next_due: SimTime,
}

/// 単発タイマーの種類
#[derive(Debug, Clone, PartialEq)]
pub enum TimerKind {
    /// 中継遅延後に指揮所へ転送
    RelayForward(RelayPacket),
    /// 割り当てロックのタイムアウト
    LockRelease { unit: EntityId, threat: EntityId },
    /// ジャマーの状態遷移（妨害終了・冷却終了）
    JammerPhase { jammer: EntityId },
}

impl TimerKind {
    pub fn name(&self) -> &'static str {
        match self {
            TimerKind::RelayForward(_) => "relay_forward",
            TimerKind::LockRelease { .. } => "lock_release",
            TimerKind::JammerPhase { .. } => "jammer_phase",
        }
    }
}

/// 単発タイマーの識別子
pub type TimerId = u64;

/// 単発タイマー
#[derive(Debug, Clone, PartialEq)]
pub struct Timer {
    pub id: TimerId,
    pub due: SimTime,
    /// 参照する脅威ID（脅威の終端時に取り消す）
    pub subject: Option<EntityId>,
    pub kind: TimerKind,
}

/// スケジューラ
#[derive(Debug, Default)]
pub struct Scheduler {
    jobs: Vec<PeriodicJob>,
    timers: BTreeMap<(SimTime, TimerId), Timer>,
    by_subject: HashMap<EntityId, Vec<(SimTime, TimerId)>>,
    next_timer: TimerId,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 周期ジョブを登録（同名のジョブがあれば置き換え）
    ///
    /// # 引数
    ///
    /// * `kind` - ジョブの種類
    /// * `period` - 周期（ミリ秒、0 は 1 として扱う）
    /// * `first_due` - 初回予定時刻
    pub fn add_job(&mut self, kind: JobKind, period: SimTime, first_due: SimTime) {
        self.remove_job(&kind);
        debug!(job = %kind, period, first_due, "JOB_ADDED: 周期ジョブを登録しました");
        self.jobs.push(PeriodicJob {
            kind,
            period: period.max(1),
            next_due: first_due,
        });
    }

    pub fn remove_job(&mut self, kind: &JobKind) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.kind != *kind);
        before != self.jobs.len()
    }

    pub fn has_job(&self, kind: &JobKind) -> bool {
        self.jobs.iter().any(|j| j.kind == *kind)
    }

    pub fn jobs(&self) -> &[PeriodicJob] {
        &self.jobs
    }

    /// 予定時刻に達したジョブを取り出し、次回予定時刻を進める
    ///
    /// 1回の呼び出しでジョブは最大1回だけ返されます（遅延分はまとめて読み飛ばす）。
    /// 戻り値は登録順です。
    pub fn due_jobs(&mut self, now: SimTime) -> Vec<JobKind> {
        let mut due = Vec::new();
        for job in &mut self.jobs {
            if job.next_due <= now {
                let missed = (now - job.next_due) / job.period;
                job.next_due += (missed + 1) * job.period;
                due.push(job.kind.clone());
            }
        }
        due
    }

    /// 種類を絞って予定時刻に達したジョブを取り出す
    pub fn due_jobs_where(&mut self, now: SimTime, mut select: impl FnMut(&JobKind) -> bool) -> Vec<JobKind> {
        let mut due = Vec::new();
        for job in &mut self.jobs {
            if job.next_due <= now && select(&job.kind) {
                let missed = (now - job.next_due) / job.period;
                job.next_due += (missed + 1) * job.period;
                due.push(job.kind.clone());
            }
        }
        due
    }

    /// 単発タイマーを登録
    ///
    /// # 戻り値
    ///
    /// タイマーID
    pub fn schedule(&mut self, due: SimTime, subject: Option<EntityId>, kind: TimerKind) -> TimerId {
        let id = self.next_timer;
        self.next_timer += 1;
        debug!(timer = kind.name(), timer_id = id, due, subject = ?subject, "TIMER_SCHEDULED");
        if let Some(s) = &subject {
            self.by_subject.entry(s.clone()).or_default().push((due, id));
        }
        self.timers.insert((due, id), Timer { id, due, subject, kind });
        id
    }

    /// 予定時刻に達したタイマーを予定時刻順に取り出す
    pub fn pop_due(&mut self, now: SimTime) -> Vec<Timer> {
        let mut fired = Vec::new();
        while let Some(entry) = self.timers.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let timer = entry.remove();
            if let Some(s) = &timer.subject {
                self.detach_subject(s, (timer.due, timer.id));
            }
            fired.push(timer);
        }
        fired
    }

    fn detach_subject(&mut self, subject: &str, key: (SimTime, TimerId)) {
        if let Some(keys) = self.by_subject.get_mut(subject) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.by_subject.remove(subject);
            }
        }
    }

    /// 脅威を参照するタイマーをすべて取り消す
    ///
    /// # 戻り値
    ///
    /// 取り消したタイマー
    pub fn cancel_subject(&mut self, subject: &str) -> Vec<Timer> {
        let keys = self.by_subject.remove(subject).unwrap_or_default();
        let cancelled: Vec<Timer> = keys.into_iter().filter_map(|k| self.timers.remove(&k)).collect();
        if !cancelled.is_empty() {
            debug!(subject, count = cancelled.len(), "TIMERS_CANCELLED: 関連タイマーを取り消しました");
        }
        cancelled
    }

    /// 条件に合うタイマーを取り消す
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&Timer) -> bool) -> Vec<Timer> {
        let keys: Vec<_> = self
            .timers
            .iter()
            .filter(|(_, t)| pred(t))
            .map(|(k, _)| *k)
            .collect();
        let mut cancelled = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(timer) = self.timers.remove(&key) {
                if let Some(s) = &timer.subject {
                    self.detach_subject(s, key);
                }
                cancelled.push(timer);
            }
        }
        cancelled
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// 指定の脅威を参照する未発火タイマー
    pub fn timers_for(&self, subject: &str) -> impl Iterator<Item = &Timer> {
        self.timers
            .values()
            .filter(move |t| t.subject.as_deref() == Some(subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_names() {
        assert_eq!(JobKind::SensorScan("S1".into()).to_string(), "scan:S1");
        assert_eq!(JobKind::CommandCycle("B1".into()).to_string(), "command:B1");
        assert_eq!(JobKind::Broadcast("J1".into()).to_string(), "broadcast:J1");
    }

    #[test]
    fn test_periodic_jobs_do_not_drift() {
        let mut s = Scheduler::new();
        s.add_job(JobKind::SensorScan("S1".into()), 1000, 0);

        assert_eq!(s.due_jobs(0).len(), 1);
        assert!(s.due_jobs(990).is_empty());
        // 1020ms に処理されても次回は 2000ms
        assert_eq!(s.due_jobs(1020).len(), 1);
        assert!(s.due_jobs(1990).is_empty());
        assert_eq!(s.due_jobs(2010).len(), 1);

        // 大きく遅れても1回だけ発火し、次の周期境界に揃う
        assert_eq!(s.due_jobs(5500).len(), 1);
        assert_eq!(s.jobs()[0].next_due, 6000);
    }

    #[test]
    fn test_timers_fire_in_due_order() {
        let mut s = Scheduler::new();
        s.schedule(800, Some("T1".into()), TimerKind::JammerPhase { jammer: "J2".into() });
        s.schedule(300, None, TimerKind::JammerPhase { jammer: "J1".into() });

        assert!(s.pop_due(299).is_empty());
        let fired = s.pop_due(1000);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].due, 300);
        assert_eq!(fired[1].due, 800);
        assert_eq!(s.pending_timers(), 0);
        assert!(s.cancel_subject("T1").is_empty());
    }

    #[test]
    fn test_cancel_subject_removes_all_referencing_timers() {
        let mut s = Scheduler::new();
        s.schedule(
            5000,
            Some("T1".into()),
            TimerKind::LockRelease { unit: "L1".into(), threat: "T1".into() },
        );
        s.schedule(900, Some("T1".into()), TimerKind::JammerPhase { jammer: "J1".into() });
        s.schedule(900, Some("T2".into()), TimerKind::JammerPhase { jammer: "J2".into() });

        assert_eq!(s.timers_for("T1").count(), 2);
        let cancelled = s.cancel_subject("T1");
        assert_eq!(cancelled.len(), 2);
        assert_eq!(s.pending_timers(), 1);
        assert_eq!(s.pop_due(10_000)[0].subject.as_deref(), Some("T2"));
    }
}
