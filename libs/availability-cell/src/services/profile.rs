// libs/availability-cell/src/services/profile.rs
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::notification::Channel;

use crate::models::{
    AvailabilityError, AvailabilityRule, AvailabilityRuleSet, BlackoutPeriod, TherapistSchedule,
};

/// Read-only view of therapist working hours and patient contact preferences.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `None` when the therapist is unknown.
    async fn therapist_schedule(
        &self,
        therapist_id: Uuid,
    ) -> Result<Option<TherapistSchedule>, AvailabilityError>;

    async fn contact_preference(&self, patient_id: Uuid) -> Result<Channel, AvailabilityError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryProfileStore {
    schedules: RwLock<HashMap<Uuid, TherapistSchedule>>,
    contact_preferences: RwLock<HashMap<Uuid, Channel>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_therapist(&self, therapist_id: Uuid) {
        self.schedules
            .write()
            .await
            .entry(therapist_id)
            .or_insert_with(|| TherapistSchedule::new(therapist_id));
    }

    /// Adds a new rule-set version. Earlier versions are kept untouched.
    pub async fn publish_rule_set(
        &self,
        therapist_id: Uuid,
        effective_from: NaiveDate,
        timezone: Tz,
        rules: Vec<AvailabilityRule>,
    ) -> Result<u32, AvailabilityError> {
        if let Some(foreign) = rules.iter().find(|rule| rule.therapist_id != therapist_id) {
            return Err(AvailabilityError::InvalidRule(format!(
                "rule {} belongs to therapist {}",
                foreign.id, foreign.therapist_id
            )));
        }

        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .entry(therapist_id)
            .or_insert_with(|| TherapistSchedule::new(therapist_id));

        let version = schedule.latest_version() + 1;
        schedule.rule_sets.push(AvailabilityRuleSet {
            therapist_id,
            version,
            effective_from,
            timezone,
            rules,
        });

        info!(
            "Published availability rule set v{} for therapist {} effective {}",
            version, therapist_id, effective_from
        );
        Ok(version)
    }

    pub async fn add_blackout(
        &self,
        therapist_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<BlackoutPeriod, AvailabilityError> {
        if start >= end {
            return Err(AvailabilityError::InvalidRule(
                "Blackout start must be before its end".to_string(),
            ));
        }

        let blackout = BlackoutPeriod {
            id: Uuid::new_v4(),
            therapist_id,
            start,
            end,
            reason,
        };

        let mut schedules = self.schedules.write().await;
        schedules
            .get_mut(&therapist_id)
            .ok_or(AvailabilityError::TherapistNotFound(therapist_id))?
            .blackouts
            .push(blackout.clone());

        Ok(blackout)
    }

    pub async fn set_contact_preference(&self, patient_id: Uuid, channel: Channel) {
        self.contact_preferences.write().await.insert(patient_id, channel);
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn therapist_schedule(
        &self,
        therapist_id: Uuid,
    ) -> Result<Option<TherapistSchedule>, AvailabilityError> {
        Ok(self.schedules.read().await.get(&therapist_id).cloned())
    }

    async fn contact_preference(&self, patient_id: Uuid) -> Result<Channel, AvailabilityError> {
        Ok(self
            .contact_preferences
            .read()
            .await
            .get(&patient_id)
            .copied()
            .unwrap_or_default())
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

#[derive(Debug, Deserialize)]
struct TherapistRow {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct RuleRow {
    id: Uuid,
    therapist_id: Uuid,
    version: u32,
    effective_from: NaiveDate,
    timezone: String,
    day_of_week: u8,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

#[derive(Debug, Deserialize)]
struct PatientRow {
    contact_preference: Option<Channel>,
}

/// Profile store backed by the Supabase REST API. Read-only.
pub struct SupabaseProfileStore {
    supabase: SupabaseClient,
}

impl SupabaseProfileStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub fn with_client(supabase: SupabaseClient) -> Self {
        Self { supabase }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        query: String,
    ) -> Result<Vec<T>, AvailabilityError> {
        self.supabase.select(table, &query).await.map_err(|e| {
            warn!("Profile store read from {} failed: {:#}", table, e);
            AvailabilityError::Unavailable(e.to_string())
        })
    }

    fn group_rule_sets(rows: Vec<RuleRow>) -> Result<Vec<AvailabilityRuleSet>, AvailabilityError> {
        let mut sets: BTreeMap<u32, AvailabilityRuleSet> = BTreeMap::new();

        for row in rows {
            let timezone: Tz = row.timezone.parse().map_err(|_| {
                AvailabilityError::InvalidRule(format!("unknown timezone '{}'", row.timezone))
            })?;

            let mut rule = AvailabilityRule::new(row.therapist_id, row.day_of_week, row.start_time, row.end_time)?;
            rule.id = row.id;

            sets.entry(row.version)
                .or_insert_with(|| AvailabilityRuleSet {
                    therapist_id: row.therapist_id,
                    version: row.version,
                    effective_from: row.effective_from,
                    timezone,
                    rules: Vec::new(),
                })
                .rules
                .push(rule);
        }

        Ok(sets.into_values().collect())
    }
}

#[async_trait]
impl ProfileStore for SupabaseProfileStore {
    async fn therapist_schedule(
        &self,
        therapist_id: Uuid,
    ) -> Result<Option<TherapistSchedule>, AvailabilityError> {
        debug!("Fetching schedule for therapist {}", therapist_id);

        let therapists: Vec<TherapistRow> = self
            .fetch("therapists", format!("id=eq.{}&select=id", therapist_id))
            .await?;
        if !therapists.iter().any(|row| row.id == therapist_id) {
            return Ok(None);
        }

        let rules: Vec<RuleRow> = self
            .fetch(
                "therapist_availability_rules",
                format!(
                    "therapist_id=eq.{}&order=version.asc,day_of_week.asc,start_time.asc",
                    therapist_id
                ),
            )
            .await?;

        let blackouts: Vec<BlackoutPeriod> = self
            .fetch(
                "therapist_blackouts",
                format!("therapist_id=eq.{}&order=start.asc", therapist_id),
            )
            .await?;

        Ok(Some(TherapistSchedule {
            therapist_id,
            rule_sets: Self::group_rule_sets(rules)?,
            blackouts,
        }))
    }

    async fn contact_preference(&self, patient_id: Uuid) -> Result<Channel, AvailabilityError> {
        let rows: Vec<PatientRow> = self
            .fetch(
                "patients",
                format!("id=eq.{}&select=contact_preference", patient_id),
            )
            .await?;

        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.contact_preference)
            .unwrap_or_default())
    }
}
