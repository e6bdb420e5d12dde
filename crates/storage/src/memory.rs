//! In-process store, used by tests and single-shot CLI runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use aegis_common::{AegisError, AegisResult, ScanRecord, ScanStore, Schedule, ScheduleStore};

/// Keeps records and schedules in memory. Insertion order breaks ties between
/// equal creation times so listings are stable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    scans: RwLock<HashMap<String, (u64, ScanRecord)>>,
    schedules: RwLock<HashMap<Uuid, (u64, Schedule)>>,
    seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn create_scan(&self, record: &ScanRecord) -> AegisResult<()> {
        let mut scans = self.scans.write().await;
        if scans.contains_key(&record.scan_id) {
            return Err(AegisError::Storage(format!(
                "scan {} already exists",
                record.scan_id
            )));
        }
        scans.insert(record.scan_id.clone(), (self.next_seq(), record.clone()));
        Ok(())
    }

    async fn get_scan(&self, scan_id: &str) -> AegisResult<Option<ScanRecord>> {
        Ok(self.scans.read().await.get(scan_id).map(|(_, r)| r.clone()))
    }

    async fn update_scan(&self, record: &ScanRecord) -> AegisResult<()> {
        let mut scans = self.scans.write().await;
        match scans.get_mut(&record.scan_id) {
            Some((_, stored)) => {
                stored.status = record.status;
                stored.findings = record.findings.clone();
                stored.updated_at = record.updated_at;
                Ok(())
            }
            None => Err(AegisError::NotFound(format!("scan {}", record.scan_id))),
        }
    }

    async fn list_scans(&self) -> AegisResult<Vec<ScanRecord>> {
        let scans = self.scans.read().await;
        let mut entries: Vec<_> = scans.values().collect();
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then_with(|| seq_b.cmp(seq_a))
        });
        Ok(entries.into_iter().map(|(_, r)| r.clone()).collect())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn create_schedule(&self, schedule: &Schedule) -> AegisResult<()> {
        let mut schedules = self.schedules.write().await;
        if schedules.contains_key(&schedule.id) {
            return Err(AegisError::Storage(format!(
                "schedule {} already exists",
                schedule.id
            )));
        }
        schedules.insert(schedule.id, (self.next_seq(), schedule.clone()));
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> AegisResult<Option<Schedule>> {
        Ok(self.schedules.read().await.get(&id).map(|(_, s)| s.clone()))
    }

    async fn delete_schedule(&self, id: Uuid) -> AegisResult<bool> {
        Ok(self.schedules.write().await.remove(&id).is_some())
    }

    async fn list_schedules(&self) -> AegisResult<Vec<Schedule>> {
        let schedules = self.schedules.read().await;
        let mut entries: Vec<_> = schedules.values().collect();
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, s)| s.clone()).collect())
    }

    async fn record_schedule_run(
        &self,
        id: Uuid,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> AegisResult<()> {
        if let Some((_, schedule)) = self.schedules.write().await.get_mut(&id) {
            if last_run.is_some() {
                schedule.last_run = last_run;
            }
            schedule.next_run = next_run;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_common::{Finding, ScanKind, ScanStatus, Severity};
    use chrono::Duration;

    #[tokio::test]
    async fn create_get_update() {
        let store = MemoryStore::new();
        let mut record = ScanRecord::queued("s1", "example.com", None, Vec::new());
        store.create_scan(&record).await.unwrap();
        assert!(store.create_scan(&record).await.is_err());

        record.status = ScanStatus::Running;
        record.findings = vec![Finding::new(ScanKind::Web, Severity::Low, "x")];
        store.update_scan(&record).await.unwrap();

        let stored = store.get_scan("s1").await.unwrap().unwrap();
        assert_eq!(stored.status, ScanStatus::Running);
        assert_eq!(stored.findings.len(), 1);
        assert!(store.get_scan("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = MemoryStore::new();
        let record = ScanRecord::queued("ghost", "example.com", None, Vec::new());
        let err = store.update_scan(&record).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_is_most_recent_first() {
        let store = MemoryStore::new();
        let mut older = ScanRecord::queued("old", "a", None, Vec::new());
        older.created_at -= Duration::seconds(10);
        let tie_a = ScanRecord::queued("tie-a", "b", None, Vec::new());
        let mut tie_b = ScanRecord::queued("tie-b", "c", None, Vec::new());
        tie_b.created_at = tie_a.created_at;

        store.create_scan(&older).await.unwrap();
        store.create_scan(&tie_a).await.unwrap();
        store.create_scan(&tie_b).await.unwrap();

        let ids: Vec<_> = store
            .list_scans()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.scan_id)
            .collect();
        assert_eq!(ids, vec!["tie-b", "tie-a", "old"]);
    }

    #[tokio::test]
    async fn schedule_crud() {
        let store = MemoryStore::new();
        let schedule = Schedule::new("host1", "@daily").with_kind(Some(ScanKind::Cloud));
        store.create_schedule(&schedule).await.unwrap();
        let listed = store.list_schedules().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, Some(ScanKind::Cloud));

        let now = aegis_common::now_millis();
        store
            .record_schedule_run(schedule.id, Some(now), None)
            .await
            .unwrap();
        let stored = store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.last_run, Some(now));

        assert!(store.delete_schedule(schedule.id).await.unwrap());
        assert!(!store.delete_schedule(schedule.id).await.unwrap());
        assert!(store.list_schedules().await.unwrap().is_empty());
    }
}
