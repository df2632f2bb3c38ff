use std::{env, sync::OnceLock};

use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct AppConfig {
    /// If the application should be run in debug mode and print additional info to stdout
    pub app_debug: bool,

    /// The service name to be used on the tracing spans
    pub tracer_service_name: String,

    /// Postgres connection URI
    pub db_url: String,

    /// HTTP port for the operational endpoints (task execution, broadcast
    /// and segment control, click / open tracking)
    pub http_port: u16,

    /// amount of concurrent executor loops claiming and advancing tasks
    pub executor_count: u16,

    /// seconds between polls of the task queue by each executor loop
    pub executor_poll_seconds: u64,

    /// maximum tasks claimed by a single ExecutePending call
    pub task_claim_limit: u64,

    /// recipients fetched and dispatched per orchestrator batch
    pub send_batch_size: u64,

    /// membership rows staged per segment build page
    pub segment_page_size: u64,

    /// `running` tasks whose last_run_at is older than this many seconds are
    /// considered leaked claims and reverted to `paused` by the sweeper
    pub stale_claim_seconds: i64,

    /// consecutive dispatch failures that trip a circuit breaker open
    pub breaker_failure_threshold: i32,

    /// seconds a open circuit breaker waits before allowing a probe send
    pub breaker_cooldown_seconds: u64,

    /// timeout for a single webhook delivery attempt
    pub webhook_timeout_seconds: u64,

    /// webhook delivery attempts before giving up on a event
    pub webhook_max_attempts: u32,

    /// public base url used to build tracked links and open pixels
    pub public_url: String,
}

impl AppConfig {
    pub fn from_env() -> AppConfig {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let base_path = env::var("CARGO_MANIFEST_DIR").unwrap_or_default();

        let yaml_config_file = File::with_name(&format!("{base_path}/env/{run_mode}.yaml"))
            .format(config::FileFormat::Yaml)
            .required(false);

        Config::builder()
            .add_source(yaml_config_file)
            .add_source(Environment::default())
            .build()
            .unwrap_or_else(|error| panic!("[CFG] error loading config, {:#?}", error))
            .try_deserialize::<AppConfig>()
            .unwrap_or_else(|error| panic!("[CFG] error deserializing config, {:#?}", error))
    }
}

/// returns a global read only reference to the app configuration
pub fn app_config() -> &'static AppConfig {
    static INSTANCE: OnceLock<AppConfig> = OnceLock::new();
    INSTANCE.get_or_init(AppConfig::from_env)
}
