use std::env;
use std::str::FromStr;

use chrono::{FixedOffset, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where scheduling records are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process-local stores, lost on restart. Used for development and tests.
    Memory,
    /// PostgREST tables behind `SUPABASE_URL`.
    Supabase,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(Self::Memory),
            "supabase" | "postgrest" => Ok(Self::Supabase),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

/// Whether a laborant chosen at lab-request creation blocks other laborants
/// from claiming the request while it is still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreAssignmentPolicy {
    #[default]
    Advisory,
    Binding,
}

impl FromStr for PreAssignmentPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(Self::Advisory),
            "binding" => Ok(Self::Binding),
            other => Err(format!("unknown pre-assignment policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub storage_backend: StorageBackend,
    pub clinic_utc_offset_minutes: i32,
    pub lab_pre_assignment_policy: PreAssignmentPolicy,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let supabase_url = env::var("SUPABASE_URL").unwrap_or_else(|_| {
            warn!("SUPABASE_URL not set, using empty value");
            String::new()
        });
        let supabase_anon_key = env::var("SUPABASE_ANON_PUBLIC_KEY").unwrap_or_else(|_| {
            warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
            String::new()
        });
        let supabase_jwt_secret = env::var("SUPABASE_JWT_SECRET").unwrap_or_else(|_| {
            warn!("SUPABASE_JWT_SECRET not set, using empty value");
            String::new()
        });

        let supabase_ready = !supabase_url.is_empty() && !supabase_anon_key.is_empty();
        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!("{}, falling back to in-memory storage", e);
                StorageBackend::Memory
            }),
            Err(_) if supabase_ready => StorageBackend::Supabase,
            Err(_) => {
                warn!("STORAGE_BACKEND not set and Supabase not configured, using in-memory storage");
                StorageBackend::Memory
            }
        };

        let clinic_utc_offset_minutes = parse_or_default("CLINIC_UTC_OFFSET_MINUTES", 0);
        let lab_pre_assignment_policy = match env::var("LAB_PRE_ASSIGNMENT_POLICY") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!("{}, using advisory", e);
                PreAssignmentPolicy::Advisory
            }),
            Err(_) => PreAssignmentPolicy::default(),
        };
        let port = parse_or_default("PORT", 3000);

        let config = Self {
            supabase_url,
            supabase_anon_key,
            supabase_jwt_secret,
            storage_backend,
            clinic_utc_offset_minutes,
            lab_pre_assignment_policy,
            port,
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        let auth_ready = !self.supabase_jwt_secret.is_empty();
        match self.storage_backend {
            StorageBackend::Memory => auth_ready,
            StorageBackend::Supabase => {
                auth_ready && !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
            }
        }
    }

    /// Fixed offset of the clinic's wall clock. Out-of-range values fall back to UTC.
    pub fn clinic_offset(&self) -> FixedOffset {
        self.clinic_utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                warn!(
                    "CLINIC_UTC_OFFSET_MINUTES={} is out of range, using UTC",
                    self.clinic_utc_offset_minutes
                );
                Utc.fix()
            })
    }

    /// Current wall-clock time at the clinic.
    pub fn clinic_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.clinic_offset()).naive_local()
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{}='{}' is not valid, using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
