use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::json;
use tokio_test::assert_ok;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use availability_cell::{
    AvailabilityError, AvailabilityRule, InMemoryProfileStore, ProfileStore, SupabaseProfileStore,
};
use shared_database::SupabaseClient;
use shared_models::notification::Channel;

fn supabase_store(server: &MockServer, timeout: Duration) -> SupabaseProfileStore {
    SupabaseProfileStore::with_client(SupabaseClient::with_timeout(&server.uri(), "test-anon-key", timeout))
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[tokio::test]
async fn test_in_memory_versions_accumulate() {
    let store = InMemoryProfileStore::new();
    let therapist = Uuid::new_v4();
    let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
    let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();

    let v1 = store
        .publish_rule_set(
            therapist,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            chrono_tz::Tz::UTC,
            vec![AvailabilityRule::new(therapist, 1, nine, noon).unwrap()],
        )
        .await
        .unwrap();
    let v2 = store
        .publish_rule_set(
            therapist,
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            chrono_tz::Europe::Berlin,
            vec![AvailabilityRule::new(therapist, 2, nine, noon).unwrap()],
        )
        .await
        .unwrap();
    assert_eq!((v1, v2), (1, 2));

    let schedule = assert_ok!(store.therapist_schedule(therapist).await).unwrap();
    assert_eq!(schedule.rule_sets.len(), 2);
    assert_eq!(schedule.timezone(), chrono_tz::Europe::Berlin);
}

#[tokio::test]
async fn test_in_memory_rejects_foreign_rules_and_unknown_blackouts() {
    let store = InMemoryProfileStore::new();
    let therapist = Uuid::new_v4();
    let other = Uuid::new_v4();
    let rule = AvailabilityRule::new(
        other,
        1,
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
    )
    .unwrap();

    let result = store
        .publish_rule_set(therapist, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), chrono_tz::Tz::UTC, vec![rule])
        .await;
    assert_matches!(result, Err(AvailabilityError::InvalidRule(_)));

    let start = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
    let blackout = store
        .add_blackout(Uuid::new_v4(), start, start + chrono::Duration::hours(1), None)
        .await;
    assert_matches!(blackout, Err(AvailabilityError::TherapistNotFound(_)));
}

#[tokio::test]
async fn test_in_memory_contact_preference_defaults_to_in_app() {
    let store = InMemoryProfileStore::new();
    let patient = Uuid::new_v4();
    assert_eq!(store.contact_preference(patient).await.unwrap(), Channel::InApp);

    store.set_contact_preference(patient, Channel::Sms).await;
    assert_eq!(store.contact_preference(patient).await.unwrap(), Channel::Sms);
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

#[tokio::test]
async fn test_supabase_groups_rows_into_rule_sets() {
    let server = MockServer::start().await;
    let therapist = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/therapists"))
        .and(query_param("id", format!("eq.{}", therapist)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": therapist }])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/therapist_availability_rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": Uuid::new_v4(),
                "therapist_id": therapist,
                "version": 1,
                "effective_from": "2025-01-01",
                "timezone": "Europe/London",
                "day_of_week": 1,
                "start_time": "09:00:00",
                "end_time": "12:00:00"
            },
            {
                "id": Uuid::new_v4(),
                "therapist_id": therapist,
                "version": 1,
                "effective_from": "2025-01-01",
                "timezone": "Europe/London",
                "day_of_week": 3,
                "start_time": "13:00:00",
                "end_time": "17:00:00"
            },
            {
                "id": Uuid::new_v4(),
                "therapist_id": therapist,
                "version": 2,
                "effective_from": "2025-04-01",
                "timezone": "Europe/London",
                "day_of_week": 1,
                "start_time": "10:00:00",
                "end_time": "12:00:00"
            }
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/therapist_blackouts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": Uuid::new_v4(),
                "therapist_id": therapist,
                "start": "2025-03-03T09:00:00Z",
                "end": "2025-03-03T10:00:00Z",
                "reason": "training"
            }
        ])))
        .mount(&server)
        .await;

    let store = supabase_store(&server, Duration::from_secs(2));
    let schedule = store.therapist_schedule(therapist).await.unwrap().unwrap();

    assert_eq!(schedule.rule_sets.len(), 2);
    assert_eq!(schedule.rule_sets[0].rules.len(), 2);
    assert_eq!(schedule.rule_sets[1].version, 2);
    assert_eq!(schedule.blackouts.len(), 1);
    assert_eq!(schedule.timezone(), chrono_tz::Europe::London);
}

#[tokio::test]
async fn test_supabase_unknown_therapist_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/therapists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = supabase_store(&server, Duration::from_secs(2));
    assert!(store.therapist_schedule(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_supabase_timeout_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let store = supabase_store(&server, Duration::from_millis(50));
    let result = store.therapist_schedule(Uuid::new_v4()).await;
    assert_matches!(result, Err(AvailabilityError::Unavailable(_)));
}

#[tokio::test]
async fn test_supabase_contact_preference() {
    let server = MockServer::start().await;
    let patient = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .and(query_param("id", format!("eq.{}", patient)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "contact_preference": "email" }])))
        .mount(&server)
        .await;

    let store = supabase_store(&server, Duration::from_secs(2));
    assert_eq!(store.contact_preference(patient).await.unwrap(), Channel::Email);
}
