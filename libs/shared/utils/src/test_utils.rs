use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::{AppConfig, SchedulerConfig};
use shared_models::auth::{Role, User};
use shared_models::notification::{DispatchError, NotificationDispatcher, NotificationRequest, Template};

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub scheduler: SchedulerConfig,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            notification_webhook_url: String::new(),
            server_port: 0,
            scheduler: self.scheduler.clone(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Caller identity for handler and middleware tests.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl TestUser {
    pub fn with_id(id: Uuid, role: Role) -> Self {
        Self {
            id,
            email: format!("{}-{}@example.com", role, id.simple()),
            role,
        }
    }

    fn fresh(email: &str, role: Role) -> Self {
        Self {
            email: email.to_string(),
            ..Self::with_id(Uuid::new_v4(), role)
        }
    }

    pub fn therapist(email: &str) -> Self {
        Self::fresh(email, Role::Therapist)
    }

    pub fn patient(email: &str) -> Self {
        Self::fresh(email, Role::Patient)
    }

    pub fn admin(email: &str) -> Self {
        Self::fresh(email, Role::Admin)
    }

    pub fn uuid(&self) -> Uuid {
        self.id
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.to_string(),
            email: Some(self.email.clone()),
            role: Some(self.role.to_string()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

/// Mints HS256 bearer tokens shaped like the identity provider's.
pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let issued = Utc::now();
        let claims = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "aud": "authenticated",
            "iat": issued.timestamp(),
            "exp": (issued + Duration::hours(exp_hours.unwrap_or(24))).timestamp(),
        });
        Self::sign(&claims, secret)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    fn sign(claims: &serde_json::Value, secret: &str) -> String {
        let encode = |part: String| general_purpose::URL_SAFE_NO_PAD.encode(part);
        let signing_input = format!(
            "{}.{}",
            encode(json!({ "alg": "HS256", "typ": "JWT" }).to_string()),
            encode(claims.to_string())
        );

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(signing_input.as_bytes());
        let signature = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}", signing_input, signature)
    }
}

/// Dispatcher that records every request and can be switched into failure
/// mode or made slow.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<NotificationRequest>>,
    failing: Mutex<bool>,
    delay: Mutex<Option<StdDuration>>,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn set_delay(&self, delay: StdDuration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn sent(&self) -> Vec<NotificationRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_with(&self, template: Template) -> Vec<NotificationRequest> {
        self.sent()
            .into_iter()
            .filter(|request| request.template == template)
            .collect()
    }

    /// Waits up to a second for `count` requests with `template`, for
    /// notices sent from detached tasks.
    pub async fn wait_for(&self, template: Template, count: usize) -> Vec<NotificationRequest> {
        for _ in 0..200 {
            if self.sent_with(template).len() >= count {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        self.sent_with(template)
    }

    /// Reminder labels delivered for one appointment, in dispatch order.
    pub fn reminder_labels_for(&self, appointment_id: Uuid) -> Vec<String> {
        self.sent_with(Template::AppointmentReminder)
            .into_iter()
            .filter(|request| request.payload["appointment_id"] == json!(appointment_id))
            .filter_map(|request| request.payload["offset"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(&self, request: &NotificationRequest) -> Result<(), DispatchError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.failing.lock().unwrap() {
            return Err(DispatchError::Failed("recording dispatcher set to fail".to_string()));
        }
        self.sent.lock().unwrap().push(request.clone());
        Ok(())
    }
}
