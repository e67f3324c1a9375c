// # multinetd - multinet batch runner
//
// Thin integration layer: all selection and DNS logic lives in
// multinet-core. One invocation runs one batch and exits, so scheduling is
// left to cron or a systemd timer.
//
// The runner is responsible for:
// 1. Reading its settings from environment variables
// 2. Loading the YAML configuration
// 3. Registering record store providers
// 4. Building the adapters and running the Controller once
//
// ## Environment
//
// - `MULTINET_CONFIG`: Path to the YAML configuration (default `config/config.yml`)
// - `MULTINET_LOG_LEVEL`: trace, debug, info, warn or error (default `info`)
// - `MULTINET_MODE`: `dry-run` makes the DNS provider log instead of write
//
// ## Example
//
// ```bash
// export GIST_TOKEN=ghp_...
// export CF_API_TOKEN=...
// export MULTINET_CONFIG=/etc/multinet/config.yml
//
// multinetd
// ```

use anyhow::{Context, Result};
use multinet_core::config::MultinetConfig;
use multinet_core::{Controller, ProviderRegistry, RunReport};
use multinet_source_gist::GistClient;
use std::env;
use std::process::ExitCode;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG_PATH: &str = "config/config.yml";

/// Exit codes for different termination scenarios
///
/// - 0: Run completed (including "nothing selected")
/// - 1: Configuration or startup error
/// - 2: Runtime error (fetch, DNS update, publication, state)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MultinetExitCode {
    /// Run completed
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error
    RuntimeError = 2,
}

impl From<MultinetExitCode> for ExitCode {
    fn from(code: MultinetExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Runner settings taken from the environment
#[derive(Debug)]
struct Settings {
    config_path: String,
    log_level: String,
    dry_run: bool,
}

impl Settings {
    /// Load settings from environment variables
    fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            config_path: lookup("MULTINET_CONFIG")
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
            log_level: lookup("MULTINET_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            dry_run: lookup("MULTINET_MODE")
                .map(|mode| mode.eq_ignore_ascii_case("dry-run"))
                .unwrap_or(false),
        }
    }

    fn validate(&self) -> Result<()> {
        self.level()?;
        Ok(())
    }

    fn level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "MULTINET_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }
}

fn main() -> ExitCode {
    let settings = Settings::from_env();

    if let Err(e) = settings.validate() {
        eprintln!("Configuration validation error: {}", e);
        return MultinetExitCode::ConfigError.into();
    }

    let log_level = settings.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return MultinetExitCode::ConfigError.into();
    }

    info!("Starting multinetd (config: {})", settings.config_path);
    if settings.dry_run {
        warn!("MULTINET_MODE=dry-run: DNS changes will only be logged");
    }

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return MultinetExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        let controller = match build_controller(&settings).await {
            Ok(controller) => controller,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return MultinetExitCode::ConfigError;
            }
        };

        match run_batch(controller).await {
            Ok(report) => {
                log_report(&report);
                MultinetExitCode::Success
            }
            Err(e) => {
                error!("Run failed: {:#}", e);
                MultinetExitCode::RuntimeError
            }
        }
    });

    code.into()
}

/// Load the configuration and wire the adapters into a Controller
async fn build_controller(
    settings: &Settings,
) -> Result<(Controller, tokio::sync::mpsc::Receiver<multinet_core::ControllerEvent>)> {
    let config = MultinetConfig::load(&settings.config_path)
        .await
        .with_context(|| format!("Failed to load {}", settings.config_path))?;

    info!(
        "Configuration loaded: {} line(s), {} device gist(s)",
        config.dns.lines.len(),
        config.gist.device_gists.len()
    );

    let registry = ProviderRegistry::new();

    #[cfg(feature = "cloudflare")]
    {
        debug!("Registering Cloudflare provider");
        multinet_provider_cloudflare::register(&registry);
    }

    let record_store = if config.dns.enabled {
        info!("DNS provider: {}", config.dns.provider.type_name());
        Some(
            registry
                .create_record_store(&config.dns.provider)
                .context("Failed to create DNS record store")?,
        )
    } else {
        info!("DNS updates disabled");
        None
    };

    let source = GistClient::from_config(&config.gist, &config.dns)
        .context("Failed to create Gist source")?;
    let artifacts = GistClient::from_config(&config.gist, &config.dns)
        .context("Failed to create Gist artifact store")?;

    let state_store = multinet_core::state::open(&config.state_store)
        .await
        .context("Failed to open state store")?;

    let controller = Controller::new(
        Box::new(source),
        record_store,
        Box::new(artifacts),
        state_store,
        &config,
    )?;

    Ok(controller)
}

/// Run one batch and drain the events it emitted
async fn run_batch(
    (controller, mut events): (
        Controller,
        tokio::sync::mpsc::Receiver<multinet_core::ControllerEvent>,
    ),
) -> Result<RunReport> {
    let result = controller.run_once(chrono::Utc::now()).await;

    while let Ok(event) = events.try_recv() {
        debug!("event: {:?}", event);
    }

    Ok(result?)
}

fn log_report(report: &RunReport) {
    if report.nothing_selected {
        warn!(
            "Run finished: {} measurement(s), nothing selected",
            report.measurements
        );
        return;
    }

    info!(
        "Run finished: {} measurement(s), {} line(s) selected, {} record set(s) updated, artifact {}",
        report.measurements,
        report.lines_selected,
        report.updated,
        report.artifact_id.as_deref().unwrap_or("-")
    );
}
