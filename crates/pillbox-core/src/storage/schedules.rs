//! JSON file of active schedules.
//!
//! Stands in for the medication record store: hosts replay its contents
//! into [`AlarmScheduler::restore`](crate::alarm::AlarmScheduler::restore)
//! on start-up. Stored at `~/.config/pillbox/schedules.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::Result;
use crate::schedule::{MedicineId, Schedule};

#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    /// Store in the default data directory.
    pub fn open() -> Result<Self> {
        Ok(Self::at(data_dir()?.join("schedules.json")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored schedules ordered by medicine ID. A missing file is empty.
    pub fn load(&self) -> Result<Vec<Schedule>> {
        Ok(self.read()?.into_values().collect())
    }

    pub fn get(&self, medicine_id: &MedicineId) -> Result<Option<Schedule>> {
        Ok(self.read()?.remove(medicine_id))
    }

    /// Insert or replace the schedule for its medicine.
    pub fn upsert(&self, schedule: Schedule) -> Result<()> {
        let mut all = self.read()?;
        all.insert(schedule.medicine_id.clone(), schedule);
        self.write(&all)
    }

    /// Returns whether a schedule was removed.
    pub fn remove(&self, medicine_id: &MedicineId) -> Result<bool> {
        let mut all = self.read()?;
        let removed = all.remove(medicine_id).is_some();
        if removed {
            self.write(&all)?;
        }
        Ok(removed)
    }

    fn read(&self) -> Result<BTreeMap<MedicineId, Schedule>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let schedules: Vec<Schedule> = serde_json::from_str(&content)?;
        Ok(schedules
            .into_iter()
            .map(|s| (s.medicine_id.clone(), s))
            .collect())
    }

    /// Write to a sibling temp file, then rename over the store.
    fn write(&self, all: &BTreeMap<MedicineId, Schedule>) -> Result<()> {
        let schedules: Vec<&Schedule> = all.values().collect();
        let content = serde_json::to_string_pretty(&schedules)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), count = schedules.len(), "Schedules saved");
        Ok(())
    }
}
