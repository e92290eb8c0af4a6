use std::sync::Arc;

use crate::database::{Database, models::Monitor};
use crate::monitoring::checker::{CheckError, Checker};
use crate::monitoring::types::{Heartbeat, MonitorStatus};

/// Derives a group's status from its children's latest heartbeats.
///
/// DOWN wins over PENDING, which wins over UP. Inactive children are
/// ignored; an active child without any heartbeat counts as pending.
pub struct GroupChecker {
    database: Arc<dyn Database>,
}

impl GroupChecker {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }
}

#[async_trait::async_trait]
impl Checker for GroupChecker {
    async fn check(&self, monitor: &Monitor, heartbeat: &mut Heartbeat) -> Result<(), CheckError> {
        let children = self.database.find_children(monitor.id).await.map_err(|error| {
            CheckError::Internal(format!("Unable to load child monitors: {error:#}"))
        })?;

        if children.is_empty() {
            heartbeat.status = MonitorStatus::Pending;
            heartbeat.msg = "Group empty".into();
            return Ok(());
        }

        let mut down = Vec::new();
        let mut pending = Vec::new();

        for child in children.iter().filter(|child| child.active) {
            let last = self.database.find_last_heartbeat(child.id).await.map_err(|error| {
                CheckError::Internal(format!("Unable to load heartbeat of {}: {error:#}", child.label()))
            })?;

            match last.map(|beat| beat.status) {
                Some(MonitorStatus::Up) | Some(MonitorStatus::Maintenance) => {}
                Some(MonitorStatus::Down) => down.push(child.label()),
                Some(MonitorStatus::Pending) | None => pending.push(child.label()),
            }
        }

        if !down.is_empty() {
            let mut message = format!("Child monitors down: {}", down.join(", "));
            if !pending.is_empty() {
                message.push_str(&format!("; pending: {}", pending.join(", ")));
            }
            return Err(CheckError::Assertion(message));
        }

        if pending.is_empty() {
            heartbeat.status = MonitorStatus::Up;
            heartbeat.msg = "All children up and running".into();
        } else {
            heartbeat.status = MonitorStatus::Pending;
            heartbeat.msg = format!("Pending child monitors: {}", pending.join(", "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use chrono::Utc;

    struct Fixture {
        database: Arc<MemoryDatabase>,
        group: Monitor,
    }

    impl Fixture {
        async fn new() -> Self {
            let database = Arc::new(MemoryDatabase::new());
            let mut group = Monitor::new("services", "group");
            group.id = database.save_monitor(&group).await.unwrap();
            Self { database, group }
        }

        async fn child(&self, name: &str, last: Option<MonitorStatus>) -> i64 {
            let mut child = Monitor::new(name, "http");
            child.parent = Some(self.group.id);
            child.id = self.database.save_monitor(&child).await.unwrap();
            if let Some(status) = last {
                let mut beat = Heartbeat::draft(&child, Utc::now(), None);
                beat.status = status;
                self.database.append_heartbeat(&beat).await.unwrap();
            }
            child.id
        }

        async fn check(&self) -> (Result<(), CheckError>, Heartbeat) {
            let checker = GroupChecker::new(self.database.clone());
            let mut beat = Heartbeat::draft(&self.group, Utc::now(), None);
            let result = checker.check(&self.group, &mut beat).await;
            (result, beat)
        }
    }

    #[tokio::test]
    async fn empty_group_is_pending() {
        let fixture = Fixture::new().await;
        let (result, beat) = fixture.check().await;
        assert!(result.is_ok());
        assert_eq!(beat.status, MonitorStatus::Pending);
        assert_eq!(beat.msg, "Group empty");
    }

    #[tokio::test]
    async fn all_up() {
        let fixture = Fixture::new().await;
        fixture.child("a", Some(MonitorStatus::Up)).await;
        fixture.child("b", Some(MonitorStatus::Up)).await;

        let (result, beat) = fixture.check().await;
        assert!(result.is_ok());
        assert_eq!(beat.status, MonitorStatus::Up);
        assert_eq!(beat.msg, "All children up and running");
    }

    #[tokio::test]
    async fn down_takes_precedence_over_pending() {
        let fixture = Fixture::new().await;
        fixture.child("a", Some(MonitorStatus::Up)).await;
        fixture.child("b", Some(MonitorStatus::Down)).await;
        fixture.child("c", Some(MonitorStatus::Pending)).await;

        let (result, _) = fixture.check().await;
        assert_eq!(result.unwrap_err().to_string(), "Child monitors down: b; pending: c");
    }

    #[tokio::test]
    async fn pending_and_unbeaten_children() {
        let fixture = Fixture::new().await;
        fixture.child("a", Some(MonitorStatus::Up)).await;
        fixture.child("b", None).await;
        fixture.child("", Some(MonitorStatus::Pending)).await;

        let (result, beat) = fixture.check().await;
        assert!(result.is_ok());
        assert_eq!(beat.status, MonitorStatus::Pending);
        assert_eq!(beat.msg, "Pending child monitors: b, #4");
    }

    #[tokio::test]
    async fn single_pending_child() {
        let fixture = Fixture::new().await;
        fixture.child("only", None).await;

        let (_, beat) = fixture.check().await;
        assert_eq!(beat.status, MonitorStatus::Pending);
        assert_eq!(beat.msg, "Pending child monitors: only");
    }

    #[tokio::test]
    async fn inactive_children_are_ignored() {
        let fixture = Fixture::new().await;
        fixture.child("a", Some(MonitorStatus::Up)).await;
        let paused = fixture.child("b", Some(MonitorStatus::Down)).await;

        let mut monitor = fixture.database.get_monitor(paused).await.unwrap().unwrap();
        monitor.active = false;
        fixture.database.save_monitor(&monitor).await.unwrap();

        let (result, beat) = fixture.check().await;
        assert!(result.is_ok());
        assert_eq!(beat.status, MonitorStatus::Up);
    }
}
