use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub nats_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub allowed_origins: Vec<String>,
    pub store_backend: StoreBackend,
    pub dispatch: DispatchConfig,
}

/// Where durable rows live. `Memory` is for local runs without Postgres/NATS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Tunables for matching, presence, location and the broker.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Resolution of the hexagonal index used to bucket tasks and helpers.
    pub spatial_resolution: u8,
    /// K_MAX: largest ring radius the matching engine will expand to.
    pub match_max_ring: u32,
    pub match_top_k: usize,
    pub allow_unskilled_fallback: bool,
    pub assumed_speed_kmh: f64,
    pub dispatch_workers: usize,
    pub dispatch_queue_capacity: usize,
    /// No default: the stale-task sweep is disabled unless this is set.
    pub task_dispatch_timeout: Option<Duration>,
    pub presence_offline_timeout: Duration,
    pub presence_sweep_interval: Duration,
    pub location_min_interval: Duration,
    pub location_exact_threshold_km: f64,
    pub location_arrival_threshold_km: f64,
    pub location_arrival_cooldown: Duration,
    pub location_sample_ttl: Duration,
    /// Coarser resolution whose cell centers obfuscated positions snap to.
    pub obfuscation_resolution: u8,
    pub broker_max_deliver: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            spatial_resolution: 8,
            match_max_ring: 10,
            match_top_k: 5,
            allow_unskilled_fallback: true,
            assumed_speed_kmh: 20.0,
            dispatch_workers: 8,
            dispatch_queue_capacity: 1024,
            task_dispatch_timeout: None,
            presence_offline_timeout: Duration::from_secs(90),
            presence_sweep_interval: Duration::from_secs(30),
            location_min_interval: Duration::from_millis(2000),
            location_exact_threshold_km: 2.0,
            location_arrival_threshold_km: 0.2,
            location_arrival_cooldown: Duration::from_secs(300),
            location_sample_ttl: Duration::from_secs(300),
            obfuscation_resolution: 7,
            broker_max_deliver: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            Ok("postgres") | Err(_) => StoreBackend::Postgres,
            Ok(other) => anyhow::bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{}'", other),
        };

        let database_url = match store_backend {
            StoreBackend::Postgres => env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            StoreBackend::Memory => env::var("DATABASE_URL").unwrap_or_default(),
        };

        Ok(Self {
            database_url,
            nats_url: env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            port: parse_var("PORT", 8080)?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "dispatch".to_string()),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            store_backend,
            dispatch: DispatchConfig::from_env()?,
        })
    }
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let spatial_resolution: u8 = parse_var("SPATIAL_RESOLUTION", defaults.spatial_resolution)?;
        let obfuscation_resolution: u8 =
            parse_var("OBFUSCATION_RESOLUTION", defaults.obfuscation_resolution)?;
        anyhow::ensure!(
            spatial_resolution <= 15 && obfuscation_resolution <= 15,
            "SPATIAL_RESOLUTION and OBFUSCATION_RESOLUTION must be between 0 and 15"
        );

        let task_dispatch_timeout = match env::var("TASK_DISPATCH_TIMEOUT_SECS") {
            Ok(raw) => Some(Duration::from_secs(
                raw.parse()
                    .context("TASK_DISPATCH_TIMEOUT_SECS must be a valid number")?,
            )),
            Err(_) => None,
        };

        Ok(Self {
            spatial_resolution,
            match_max_ring: parse_var("MATCH_MAX_RING", defaults.match_max_ring)?,
            match_top_k: parse_var("MATCH_TOP_K", defaults.match_top_k)?,
            allow_unskilled_fallback: parse_var(
                "MATCH_ALLOW_UNSKILLED_FALLBACK",
                defaults.allow_unskilled_fallback,
            )?,
            assumed_speed_kmh: parse_var("ASSUMED_SPEED_KMH", defaults.assumed_speed_kmh)?,
            dispatch_workers: parse_var("DISPATCH_WORKERS", defaults.dispatch_workers)?,
            dispatch_queue_capacity: parse_var(
                "DISPATCH_QUEUE_CAPACITY",
                defaults.dispatch_queue_capacity,
            )?,
            task_dispatch_timeout,
            presence_offline_timeout: Duration::from_secs(parse_var(
                "PRESENCE_OFFLINE_TIMEOUT_SECS",
                defaults.presence_offline_timeout.as_secs(),
            )?),
            presence_sweep_interval: Duration::from_secs(parse_var(
                "PRESENCE_SWEEP_INTERVAL_SECS",
                defaults.presence_sweep_interval.as_secs(),
            )?),
            location_min_interval: Duration::from_millis(parse_var(
                "LOCATION_MIN_INTERVAL_MS",
                defaults.location_min_interval.as_millis() as u64,
            )?),
            location_exact_threshold_km: parse_var(
                "LOCATION_EXACT_THRESHOLD_KM",
                defaults.location_exact_threshold_km,
            )?,
            location_arrival_threshold_km: parse_var(
                "LOCATION_ARRIVAL_THRESHOLD_KM",
                defaults.location_arrival_threshold_km,
            )?,
            location_arrival_cooldown: Duration::from_secs(parse_var(
                "LOCATION_ARRIVAL_COOLDOWN_SECS",
                defaults.location_arrival_cooldown.as_secs(),
            )?),
            location_sample_ttl: Duration::from_secs(parse_var(
                "LOCATION_SAMPLE_TTL_SECS",
                defaults.location_sample_ttl.as_secs(),
            )?),
            obfuscation_resolution,
            broker_max_deliver: parse_var("BROKER_MAX_DELIVER", defaults.broker_max_deliver)?,
        })
    }
}

/// Read `name` from the environment, falling back to `default` when unset.
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid value, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}
