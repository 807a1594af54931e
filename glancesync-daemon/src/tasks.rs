//! Tracking of API-triggered region syncs.
//!
//! A region has at most one `syncing` task; asking again returns it.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use glancesync_core::RegionId;
use glancesync_sync::RegionReport;

use crate::error::DaemonError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Syncing,
    Synced,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub task_id: String,
    pub region: String,
    pub status: TaskStatus,
    pub created_at_unix: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at_unix: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RegionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct TaskTracker {
    tasks: HashMap<String, Task>,
    syncing: HashMap<RegionId, String>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a task for `region`, or return the one already syncing.
    ///
    /// The flag is true when a new task was created.
    pub fn start(&mut self, region: &RegionId) -> (Task, bool) {
        if let Some(task) = self
            .syncing
            .get(region)
            .and_then(|task_id| self.tasks.get(task_id))
        {
            return (task.clone(), false);
        }

        let task = Task {
            task_id: uuid::Uuid::new_v4().to_string(),
            region: region.to_string(),
            status: TaskStatus::Syncing,
            created_at_unix: unix_seconds_now(),
            finished_at_unix: None,
            report: None,
            error: None,
        };
        self.syncing.insert(region.clone(), task.task_id.clone());
        self.tasks.insert(task.task_id.clone(), task.clone());
        (task, true)
    }

    /// Record the end of a task.
    pub fn finish(&mut self, task_id: &str, outcome: Result<RegionReport, String>) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            tracing::warn!(task_id, "finished task is no longer tracked");
            return;
        };
        task.finished_at_unix = Some(unix_seconds_now());
        match outcome {
            Ok(report) => {
                task.status = TaskStatus::Synced;
                task.report = Some(report);
            }
            Err(error) => {
                task.status = TaskStatus::Failed;
                task.error = Some(error);
            }
        }
        self.syncing.retain(|_, id| id != task_id);
    }

    pub fn get(&self, task_id: &str) -> Result<&Task, DaemonError> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| DaemonError::UnknownTask(task_id.to_string()))
    }

    /// Drop a finished task. Syncing tasks cannot be forgotten.
    pub fn forget(&mut self, task_id: &str) -> Result<Task, DaemonError> {
        match self.tasks.get(task_id) {
            None => Err(DaemonError::UnknownTask(task_id.to_string())),
            Some(task) if task.status == TaskStatus::Syncing => {
                Err(DaemonError::TaskBusy(task_id.to_string()))
            }
            Some(_) => self
                .tasks
                .remove(task_id)
                .ok_or_else(|| DaemonError::UnknownTask(task_id.to_string())),
        }
    }

    /// Every task, oldest first.
    pub fn list(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by(|a, b| {
            a.created_at_unix
                .cmp(&b.created_at_unix)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        tasks
    }

    pub fn syncing_count(&self) -> usize {
        self.syncing.len()
    }
}

pub(crate) fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trento() -> RegionId {
        RegionId::new("master", "Trento")
    }

    #[test]
    fn one_syncing_task_per_region() {
        let mut tracker = TaskTracker::new();
        let (first, created) = tracker.start(&trento());
        assert!(created);
        let (again, created) = tracker.start(&trento());
        assert!(!created);
        assert_eq!(again.task_id, first.task_id);

        let (other, created) = tracker.start(&RegionId::new("master", "Lannion"));
        assert!(created);
        assert_ne!(other.task_id, first.task_id);
        assert_eq!(tracker.syncing_count(), 2);
    }

    #[test]
    fn finished_region_gets_a_new_task() {
        let mut tracker = TaskTracker::new();
        let (first, _) = tracker.start(&trento());
        tracker.finish(&first.task_id, Err("boom".into()));

        let failed = tracker.get(&first.task_id).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let (second, created) = tracker.start(&trento());
        assert!(created);
        assert_ne!(second.task_id, first.task_id);
    }

    #[test]
    fn forget_is_rejected_while_syncing() {
        let mut tracker = TaskTracker::new();
        let (task, _) = tracker.start(&trento());
        assert!(matches!(
            tracker.forget(&task.task_id),
            Err(DaemonError::TaskBusy(_))
        ));

        tracker.finish(&task.task_id, Err("x".into()));
        tracker.forget(&task.task_id).expect("finished task forgotten");
        assert!(matches!(
            tracker.get(&task.task_id),
            Err(DaemonError::UnknownTask(_))
        ));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(TaskStatus::Syncing).unwrap(),
            serde_json::json!("syncing")
        );
    }
}
