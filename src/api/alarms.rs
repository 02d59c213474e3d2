//! `chrome.alarms` on tokio timers.
//!
//! Each alarm owns one spawned task that sleeps until the scheduled time and
//! delivers `alarms.onAlarm` to the context that created it. One-shot alarms
//! remove themselves after firing; periodic ones re-arm. Dropping the list
//! (unloading the extension) aborts every task.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::AbortHandle;

use crate::contents::ContentsId;
use crate::events::EventBus;
use crate::ipc::types::AlarmCreateInfo;
use crate::sync::lock;

const MINUTE_MS: f64 = 60_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub name: String,
    /// Milliseconds since the epoch.
    pub scheduled_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_in_minutes: Option<f64>,
}

struct AlarmEntry {
    alarm: Alarm,
    task: AbortHandle,
}

type Entries = Mutex<Vec<AlarmEntry>>;

/// Alarms created by one extension.
#[derive(Default)]
pub struct AlarmList {
    entries: Arc<Entries>,
}

impl AlarmList {
    pub fn get(&self, name: &str) -> Option<Alarm> {
        lock(&self.entries)
            .iter()
            .find(|entry| entry.alarm.name == name)
            .map(|entry| entry.alarm.clone())
    }

    pub fn all(&self) -> Vec<Alarm> {
        lock(&self.entries).iter().map(|entry| entry.alarm.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.entries).iter().any(|entry| entry.alarm.name == name)
    }

    pub fn clear(&self, name: &str) -> bool {
        let mut entries = lock(&self.entries);
        let Some(index) = entries.iter().position(|entry| entry.alarm.name == name) else {
            return false;
        };
        entries.remove(index).task.abort();
        true
    }

    pub fn clear_all(&self) -> usize {
        let mut entries = lock(&self.entries);
        let count = entries.len();
        for entry in entries.drain(..) {
            entry.task.abort();
        }
        count
    }
}

impl Drop for AlarmList {
    fn drop(&mut self) {
        self.clear_all();
    }
}

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as f64)
        .unwrap_or(0.0)
}

fn until(scheduled_time: f64) -> Duration {
    Duration::from_millis((scheduled_time - now_ms()).max(0.0) as u64)
}

pub struct AlarmsApi {
    bus: Arc<EventBus>,
}

impl AlarmsApi {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Schedule an alarm that fires on `owner`.
    ///
    /// A name already in use is ignored. `delayInMinutes` below one minute is
    /// refused. Must be called from within a tokio runtime.
    pub fn create(
        &self,
        alarms: &AlarmList,
        owner: ContentsId,
        name: &str,
        info: &AlarmCreateInfo,
    ) -> Option<Alarm> {
        if alarms.contains(name) {
            tracing::debug!(alarm = name, "alarm already exists, ignoring create");
            return None;
        }

        let period = info.period_in_minutes.filter(|period| *period > 0.0);
        let mut scheduled_time = info.when;

        if let Some(delay) = info.delay_in_minutes {
            if delay < 1.0 {
                tracing::error!(
                    alarm = name,
                    delay_in_minutes = delay,
                    "alarm delay is less than the minimum of 1 minute"
                );
                return None;
            }
            scheduled_time = Some(now_ms() + delay * MINUTE_MS);
        }

        let scheduled_time = match (scheduled_time, period) {
            (Some(time), _) => time,
            (None, Some(period)) => now_ms() + period * MINUTE_MS,
            (None, None) => now_ms(),
        };

        let alarm = Alarm {
            name: name.to_string(),
            scheduled_time,
            period_in_minutes: period,
        };

        let task = tokio::spawn(run_alarm(
            Arc::clone(&self.bus),
            Arc::downgrade(&alarms.entries),
            owner,
            alarm.clone(),
        ));

        lock(&alarms.entries).push(AlarmEntry {
            alarm: alarm.clone(),
            task: task.abort_handle(),
        });

        tracing::debug!(alarm = name, contents_id = owner, scheduled_time, "alarm scheduled");
        Some(alarm)
    }
}

async fn run_alarm(bus: Arc<EventBus>, entries: Weak<Entries>, owner: ContentsId, mut alarm: Alarm) {
    let mut wait = until(alarm.scheduled_time);
    loop {
        tokio::time::sleep(wait).await;

        let Some(entries) = entries.upgrade() else {
            return;
        };

        if !bus.emit_to(owner, "alarms.onAlarm", vec![json!(alarm)]) && bus.contents(owner).is_none() {
            tracing::debug!(alarm = %alarm.name, contents_id = owner, "alarm owner is gone, dropping alarm");
            lock(&entries).retain(|entry| entry.alarm.name != alarm.name);
            return;
        }

        let Some(period) = alarm.period_in_minutes else {
            lock(&entries).retain(|entry| entry.alarm.name != alarm.name);
            return;
        };

        wait = Duration::from_millis((period * MINUTE_MS) as u64);
        alarm.scheduled_time += period * MINUTE_MS;
        let mut guard = lock(&entries);
        if let Some(entry) = guard.iter_mut().find(|entry| entry.alarm.name == alarm.name) {
            entry.alarm.scheduled_time = alarm.scheduled_time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contents::ContentsKind;
    use crate::testing::FakeContents;

    fn owner(bus: &EventBus) -> Arc<FakeContents> {
        let contents = FakeContents::new(9, ContentsKind::BackgroundPage, "bg");
        bus.attach(1, contents.clone());
        contents
    }

    #[tokio::test]
    async fn test_duplicate_and_short_delay_are_ignored() {
        let bus = Arc::new(EventBus::new());
        let api = AlarmsApi::new(bus.clone());
        let list = AlarmList::default();

        let info = AlarmCreateInfo {
            delay_in_minutes: Some(5.0),
            ..Default::default()
        };
        assert!(api.create(&list, 9, "a", &info).is_some());
        assert!(api.create(&list, 9, "a", &info).is_none());

        let short = AlarmCreateInfo {
            delay_in_minutes: Some(0.5),
            ..Default::default()
        };
        assert!(api.create(&list, 9, "b", &short).is_none());
        assert_eq!(list.all().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_alarm_fires_once_and_is_removed() {
        let bus = Arc::new(EventBus::new());
        let contents = owner(&bus);
        let api = AlarmsApi::new(bus.clone());
        let list = AlarmList::default();

        let info = AlarmCreateInfo {
            delay_in_minutes: Some(1.0),
            ..Default::default()
        };
        api.create(&list, 9, "once", &info).unwrap();
        assert!(list.get("once").is_some());

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        let fired = contents.sent_on("api-emit-event-alarms-onAlarm");
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0][0]["name"], "once");
        assert!(list.get("once").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_alarm_rearms() {
        let bus = Arc::new(EventBus::new());
        let contents = owner(&bus);
        let api = AlarmsApi::new(bus.clone());
        let list = AlarmList::default();

        let info = AlarmCreateInfo {
            delay_in_minutes: Some(1.0),
            period_in_minutes: Some(1.0),
            ..Default::default()
        };
        api.create(&list, 9, "tick", &info).unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        assert_eq!(contents.sent_on("api-emit-event-alarms-onAlarm").len(), 2);
        assert!(list.get("tick").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_alarm_stops_when_owner_is_destroyed() {
        let bus = Arc::new(EventBus::new());
        let contents = owner(&bus);
        let api = AlarmsApi::new(bus.clone());
        let list = AlarmList::default();

        let info = AlarmCreateInfo {
            delay_in_minutes: Some(1.0),
            period_in_minutes: Some(1.0),
            ..Default::default()
        };
        api.create(&list, 9, "tick", &info).unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert_eq!(contents.sent_on("api-emit-event-alarms-onAlarm").len(), 1);

        contents.destroy();
        tokio::time::sleep(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        assert!(list.get("tick").is_none());
        assert!(list.all().is_empty());
        assert_eq!(contents.sent_on("api-emit-event-alarms-onAlarm").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_stops_alarm() {
        let bus = Arc::new(EventBus::new());
        let contents = owner(&bus);
        let api = AlarmsApi::new(bus.clone());
        let list = AlarmList::default();

        let info = AlarmCreateInfo {
            delay_in_minutes: Some(1.0),
            ..Default::default()
        };
        api.create(&list, 9, "a", &info).unwrap();
        api.create(&list, 9, "b", &info).unwrap();

        assert!(list.clear("a"));
        assert!(!list.clear("a"));
        assert_eq!(list.all().len(), 1);
        assert_eq!(list.clear_all(), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert!(contents.sent().is_empty());
    }
}
