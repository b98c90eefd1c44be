use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Months, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::json_file::{init_folder, read_json, write_json, FileLock, StoreError};
use crate::logging;
use crate::metrics::Metrics;

const SCHEDULE_FILE: &str = "schedule_campaigns.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    #[serde(rename = "")]
    Empty,
}

impl Frequency {
    /// Unknown labels mean "run once".
    pub fn from_label(label: &str) -> Self {
        match label {
            "Hourly" => Frequency::Hourly,
            "Daily" => Frequency::Daily,
            "Weekly" => Frequency::Weekly,
            "Monthly" => Frequency::Monthly,
            _ => Frequency::Empty,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Frequency::Hourly => "Hourly",
            Frequency::Daily => "Daily",
            Frequency::Weekly => "Weekly",
            Frequency::Monthly => "Monthly",
            Frequency::Empty => "",
        }
    }

    pub fn next_after(self, date: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Frequency::Hourly => date.checked_add_signed(Duration::hours(1)),
            Frequency::Daily => date.checked_add_signed(Duration::days(1)),
            Frequency::Weekly => date.checked_add_signed(Duration::weeks(1)),
            Frequency::Monthly => date.checked_add_months(Months::new(1)),
            Frequency::Empty => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodicScheduledCampaign {
    #[serde(default)]
    pub id: Option<i64>,
    pub campaigns_id: Vec<i64>,
    #[serde(default)]
    pub campaigns_title: Vec<String>,
    #[serde(rename = "schedulingDate")]
    pub next_execution_date: NaiveDateTime,
    #[serde(default = "once")]
    pub frequency: Frequency,
}

fn once() -> Frequency {
    Frequency::Empty
}

impl PeriodicScheduledCampaign {
    pub fn new(
        campaigns: Vec<(i64, String)>,
        next_execution_date: NaiveDateTime,
        frequency: Frequency,
    ) -> Self {
        let (campaigns_id, campaigns_title) = campaigns.into_iter().unzip();
        Self {
            id: None,
            campaigns_id,
            campaigns_title,
            next_execution_date,
            frequency,
        }
    }
}

#[derive(Debug)]
pub struct ScheduleStore {
    path: PathBuf,
    metrics: Arc<Metrics>,
}

impl ScheduleStore {
    pub fn open(folder: impl Into<PathBuf>, metrics: Arc<Metrics>) -> Result<Self, StoreError> {
        let folder = folder.into();
        init_folder(&folder)?;
        Ok(Self {
            path: folder.join(SCHEDULE_FILE),
            metrics,
        })
    }

    fn read(&self) -> Result<BTreeMap<i64, PeriodicScheduledCampaign>, StoreError> {
        Ok(read_json(&self.path, &self.metrics)?.unwrap_or_default())
    }

    /// Stored schedules, in id order.
    pub fn get_all(&self) -> Result<Vec<PeriodicScheduledCampaign>, StoreError> {
        Ok(self.read()?.into_values().collect())
    }

    /// Stored schedules, earliest next execution first.
    pub fn scheduled_campaigns(&self) -> Result<Vec<PeriodicScheduledCampaign>, StoreError> {
        let mut all = self.get_all()?;
        all.sort_by_key(|sc| sc.next_execution_date);
        Ok(all)
    }

    pub fn due(&self, now: NaiveDateTime) -> Result<Vec<PeriodicScheduledCampaign>, StoreError> {
        Ok(self
            .scheduled_campaigns()?
            .into_iter()
            .filter(|sc| sc.next_execution_date <= now)
            .collect())
    }

    /// Stores `campaign` under a fresh id, ignoring any id it carries.
    pub fn add(
        &self,
        campaign: PeriodicScheduledCampaign,
    ) -> Result<PeriodicScheduledCampaign, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut all = self.read()?;
        let id = match all.keys().next_back() {
            None => 1,
            Some(max) => max.checked_add(1).ok_or_else(|| StoreError::IdsExhausted {
                path: self.path.clone(),
            })?,
        };
        let stored = PeriodicScheduledCampaign {
            id: Some(id),
            ..campaign
        };
        all.insert(id, stored.clone());
        write_json(&self.path, &all, &self.metrics)?;
        logging::info(format!(
            "scheduled campaigns {:?} at {} frequency={:?}",
            stored.campaigns_id, stored.next_execution_date, stored.frequency
        ));
        Ok(stored)
    }

    pub fn remove_by_id(&self, id: i64) -> Result<(), StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut all = self.read()?;
        if all.remove(&id).is_some() {
            write_json(&self.path, &all, &self.metrics)?;
            logging::info(format!("removed campaign schedule {}", id));
        }
        Ok(())
    }

    /// Moves a schedule to its following occurrence, or drops it when it
    /// does not repeat. Returns the rescheduled entry, if any.
    pub fn mark_executed(&self, id: i64) -> Result<Option<PeriodicScheduledCampaign>, StoreError> {
        let _lock = FileLock::acquire(&self.path)?;
        let mut all = self.read()?;
        let Some(current) = all.remove(&id) else {
            return Ok(None);
        };

        let next = current
            .frequency
            .next_after(current.next_execution_date)
            .map(|date| PeriodicScheduledCampaign {
                next_execution_date: date,
                ..current
            });
        if let Some(next) = &next {
            all.insert(id, next.clone());
        }
        write_json(&self.path, &all, &self.metrics)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::json_file::fixture_dir;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .expect("valid date")
    }

    fn store(label: &str) -> ScheduleStore {
        ScheduleStore::open(fixture_dir(label), Arc::new(Metrics::new())).expect("open")
    }

    #[test]
    fn listing_is_sorted_by_next_execution() {
        let store = store("schedule-sorted");
        store
            .add(PeriodicScheduledCampaign::new(vec![(1, "late".into())], at(20, 8), Frequency::Daily))
            .expect("add");
        store
            .add(PeriodicScheduledCampaign::new(vec![(2, "early".into())], at(3, 8), Frequency::Empty))
            .expect("add");
        store
            .add(PeriodicScheduledCampaign::new(vec![(3, "mid".into())], at(10, 8), Frequency::Weekly))
            .expect("add");

        let titles: Vec<_> = store
            .scheduled_campaigns()
            .expect("list")
            .into_iter()
            .map(|sc| sc.campaigns_title[0].clone())
            .collect();
        assert_eq!(titles, vec!["early", "mid", "late"]);
    }

    #[test]
    fn add_assigns_increasing_ids() {
        let store = store("schedule-ids");
        let mut input = PeriodicScheduledCampaign::new(vec![(1, "c".into())], at(1, 0), Frequency::Hourly);
        input.id = Some(99);

        let first = store.add(input.clone()).expect("add");
        let second = store.add(input).expect("add");
        assert_eq!(first.id, Some(1));
        assert_eq!(second.id, Some(2));
    }

    #[test]
    fn add_fails_when_ids_are_exhausted() {
        let store = store("schedule-ids-exhausted");
        let mut seeded = BTreeMap::new();
        seeded.insert(
            i64::MAX,
            PeriodicScheduledCampaign {
                id: Some(i64::MAX),
                ..PeriodicScheduledCampaign::new(vec![(1, "c".into())], at(1, 0), Frequency::Daily)
            },
        );
        write_json(&store.path, &seeded, &Metrics::new()).expect("seed");

        let err = store
            .add(PeriodicScheduledCampaign::new(vec![(2, "d".into())], at(2, 0), Frequency::Empty))
            .expect_err("should fail");
        assert!(matches!(err, StoreError::IdsExhausted { .. }));
        assert_eq!(store.get_all().expect("list").len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let store = store("schedule-remove");
        let added = store
            .add(PeriodicScheduledCampaign::new(vec![(1, "c".into())], at(1, 0), Frequency::Daily))
            .expect("add");
        let id = added.id.expect("id");

        store.remove_by_id(id).expect("remove");
        store.remove_by_id(id).expect("remove again");
        assert!(store.get_all().expect("list").is_empty());
    }

    #[test]
    fn frequency_labels() {
        assert_eq!(Frequency::from_label("Weekly"), Frequency::Weekly);
        assert_eq!(Frequency::from_label("weekly"), Frequency::Empty);
        assert_eq!(Frequency::from_label(""), Frequency::Empty);
        assert_eq!(Frequency::Monthly.label(), "Monthly");
    }

    #[test]
    fn next_occurrence_per_frequency() {
        let start = at(31, 9);
        assert_eq!(Frequency::Hourly.next_after(start), Some(at(31, 10)));
        assert_eq!(Frequency::Empty.next_after(start), None);
        assert_eq!(
            Frequency::Monthly.next_after(start),
            NaiveDate::from_ymd_opt(2024, 2, 29).and_then(|d| d.and_hms_opt(9, 0, 0))
        );
        assert_eq!(Frequency::Weekly.next_after(at(1, 9)), Some(at(8, 9)));
    }

    #[test]
    fn executed_schedule_moves_forward_or_disappears() {
        let store = store("schedule-executed");
        let daily = store
            .add(PeriodicScheduledCampaign::new(vec![(1, "d".into())], at(1, 6), Frequency::Daily))
            .expect("add");
        let once = store
            .add(PeriodicScheduledCampaign::new(vec![(2, "o".into())], at(1, 7), Frequency::Empty))
            .expect("add");

        assert_eq!(store.due(at(1, 12)).expect("due").len(), 2);

        let moved = store
            .mark_executed(daily.id.expect("id"))
            .expect("mark")
            .expect("still scheduled");
        assert_eq!(moved.next_execution_date, at(2, 6));
        assert!(store.mark_executed(once.id.expect("id")).expect("mark").is_none());

        assert!(store.due(at(1, 12)).expect("due").is_empty());
        assert_eq!(store.get_all().expect("list"), vec![moved]);
    }

    #[test]
    fn stored_file_uses_scheduling_date_and_labels() {
        let store = store("schedule-format");
        store
            .add(PeriodicScheduledCampaign::new(vec![(4, "nightly".into())], at(5, 2), Frequency::Empty))
            .expect("add");

        let raw = std::fs::read_to_string(&store.path).expect("raw");
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(
            parsed,
            serde_json::json!({
                "1": {
                    "id": 1,
                    "campaignsId": [4],
                    "campaignsTitle": ["nightly"],
                    "schedulingDate": "2024-01-05T02:00:00",
                    "frequency": ""
                }
            })
        );
    }
}
