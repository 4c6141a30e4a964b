use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Upper bound on how far ahead an availability search may look.
pub const MAX_SEARCH_DAYS: i64 = 90;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub notification_webhook_url: String,
    pub server_port: u16,
    pub scheduler: SchedulerConfig,
}

/// Tunables for booking, availability search and the background sweeps.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub sweep_interval_secs: u64,
    pub reminder_grace_secs: u64,
    pub reminder_offsets: Vec<ReminderOffset>,
    pub slot_granularity_minutes: i64,
    pub max_search_days: i64,
    pub store_timeout_ms: u64,
    pub dispatch_timeout_ms: u64,
    pub no_show_sweep_enabled: bool,
    /// How long after its end an active appointment is left for the
    /// therapist to close before the no-show sweep takes it.
    pub no_show_grace_minutes: i64,
}

/// Lead time before an appointment at which a reminder fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderOffset {
    pub label: String,
    pub lead_minutes: i64,
}

impl ReminderOffset {
    pub fn new(label: impl Into<String>, lead_minutes: i64) -> Self {
        Self { label: label.into(), lead_minutes }
    }

    pub fn lead(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lead_minutes)
    }
}

impl FromStr for ReminderOffset {
    type Err = String;

    /// Parses labels such as `24h`, `90m` or `2d`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim();
        if label.len() < 2 {
            return Err(format!("invalid reminder offset '{}'", s));
        }

        let (amount, unit) = label.split_at(label.len() - 1);
        let amount: i64 = amount
            .parse()
            .map_err(|_| format!("invalid reminder offset '{}'", s))?;
        if amount <= 0 {
            return Err(format!("reminder offset must be positive: '{}'", s));
        }

        let lead_minutes = match unit {
            "m" => amount,
            "h" => amount * 60,
            "d" => amount * 60 * 24,
            _ => return Err(format!("unknown unit in reminder offset '{}'", s)),
        };

        Ok(Self::new(label, lead_minutes))
    }
}

pub fn parse_reminder_offsets(raw: &str) -> Result<Vec<ReminderOffset>, String> {
    let mut offsets = raw
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(ReminderOffset::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    // Longest lead first, so a sweep dispatches in the order patients expect
    offsets.sort_by(|a, b| b.lead_minutes.cmp(&a.lead_minutes));
    offsets.dedup_by(|a, b| a.lead_minutes == b.lead_minutes);
    Ok(offsets)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            reminder_grace_secs: 300,
            reminder_offsets: vec![
                ReminderOffset::new("24h", 24 * 60),
                ReminderOffset::new("1h", 60),
                ReminderOffset::new("15m", 15),
            ],
            slot_granularity_minutes: 15,
            max_search_days: MAX_SEARCH_DAYS,
            store_timeout_ms: 2_000,
            dispatch_timeout_ms: 5_000,
            no_show_sweep_enabled: true,
            no_show_grace_minutes: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let reminder_offsets = match env::var("REMINDER_OFFSETS") {
            Ok(raw) => parse_reminder_offsets(&raw).unwrap_or_else(|e| {
                warn!("REMINDER_OFFSETS invalid ({}), using defaults", e);
                defaults.reminder_offsets.clone()
            }),
            Err(_) => defaults.reminder_offsets.clone(),
        };

        Self {
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            reminder_grace_secs: env_or("REMINDER_GRACE_SECS", defaults.reminder_grace_secs),
            reminder_offsets,
            slot_granularity_minutes: env_or(
                "SLOT_GRANULARITY_MINUTES",
                defaults.slot_granularity_minutes,
            ),
            max_search_days: env_or("MAX_SEARCH_DAYS", defaults.max_search_days),
            store_timeout_ms: env_or("STORE_TIMEOUT_MS", defaults.store_timeout_ms),
            dispatch_timeout_ms: env_or("DISPATCH_TIMEOUT_MS", defaults.dispatch_timeout_ms),
            no_show_sweep_enabled: env_or("NO_SHOW_SWEEP_ENABLED", defaults.no_show_sweep_enabled),
            no_show_grace_minutes: env_or("NO_SHOW_GRACE_MINUTES", defaults.no_show_grace_minutes),
        }
        .validated()
    }

    /// Replaces values the scheduler cannot run with by their defaults.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if self.sweep_interval_secs == 0 {
            warn!("SWEEP_INTERVAL_SECS must be positive, using {}", defaults.sweep_interval_secs);
            self.sweep_interval_secs = defaults.sweep_interval_secs;
        }
        // A grace shorter than the interval leaves reminders between two sweeps
        if self.reminder_grace_secs < self.sweep_interval_secs {
            warn!(
                "REMINDER_GRACE_SECS ({}) is shorter than the sweep interval ({}), raising it",
                self.reminder_grace_secs, self.sweep_interval_secs
            );
            self.reminder_grace_secs = self.sweep_interval_secs.max(defaults.reminder_grace_secs);
        }
        if self.slot_granularity_minutes <= 0 {
            warn!(
                "SLOT_GRANULARITY_MINUTES must be positive, using {}",
                defaults.slot_granularity_minutes
            );
            self.slot_granularity_minutes = defaults.slot_granularity_minutes;
        }
        if !(1..=MAX_SEARCH_DAYS).contains(&self.max_search_days) {
            warn!(
                "MAX_SEARCH_DAYS must be between 1 and {}, using {}",
                MAX_SEARCH_DAYS, defaults.max_search_days
            );
            self.max_search_days = defaults.max_search_days;
        }
        if self.store_timeout_ms == 0 {
            warn!("STORE_TIMEOUT_MS must be positive, using {}", defaults.store_timeout_ms);
            self.store_timeout_ms = defaults.store_timeout_ms;
        }
        if self.dispatch_timeout_ms == 0 {
            warn!("DISPATCH_TIMEOUT_MS must be positive, using {}", defaults.dispatch_timeout_ms);
            self.dispatch_timeout_ms = defaults.dispatch_timeout_ms;
        }
        if self.no_show_grace_minutes < 0 {
            warn!(
                "NO_SHOW_GRACE_MINUTES cannot be negative, using {}",
                defaults.no_show_grace_minutes
            );
            self.no_show_grace_minutes = defaults.no_show_grace_minutes;
        }

        self
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn reminder_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reminder_grace_secs as i64)
    }

    pub fn no_show_grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.no_show_grace_minutes)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            notification_webhook_url: env::var("NOTIFICATION_WEBHOOK_URL")
                .unwrap_or_else(|_| {
                    warn!("NOTIFICATION_WEBHOOK_URL not set, notifications will only be logged");
                    String::new()
                }),
            server_port: env_or("SERVER_PORT", 3000),
            scheduler: SchedulerConfig::from_env(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_notification_webhook_configured(&self) -> bool {
        !self.notification_webhook_url.is_empty()
    }
}
