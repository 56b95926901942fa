//! `accentd` command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use accentd_core::config::Config;
use accentd_core::config::ConfigOverrides;
use accentd_core::controller::AccentSyncController;
use accentd_core::install::InstallPipeline;
use accentd_core::install::LogProgressReporter;
use accentd_core::notifications::CommandNotifier;
use accentd_core::notifications::Notifier;
use accentd_core::notifications::NullNotifier;
use accentd_core::settings::FileSettings;
use accentd_core::settings::SettingsPort;
use accentd_core::settings::keys;
use accentd_core::theme::AccentColor;
use accentd_core::theme::Ownership;
use accentd_core::theme::ThemeId;
use accentd_core::theme::ThemeResolver;
use accentd_core::updates::VersionChecker;
use anyhow::Context;
use anyhow::anyhow;
use clap::Parser;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

#[derive(Debug, Parser)]
#[command(
    name = "accentd",
    version,
    about = "Keeps the icon theme in sync with the desktop accent color"
)]
struct Cli {
    #[clap(flatten)]
    overrides: OverrideFlags,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Parser)]
struct OverrideFlags {
    /// State directory holding config.toml, settings.toml and version.json.
    #[arg(long, value_name = "DIR")]
    home: Option<PathBuf>,

    /// Archive to download icon themes from.
    #[arg(long, value_name = "URL")]
    archive_url: Option<String>,

    /// Release endpoint consulted for update checks.
    #[arg(long, value_name = "URL")]
    release_url: Option<String>,

    /// Seconds between periodic update checks.
    #[arg(long, value_name = "SECS")]
    check_interval_secs: Option<u64>,

    /// User-writable icon root that installs go into.
    #[arg(long, value_name = "DIR")]
    icon_root: Option<PathBuf>,
}

impl OverrideFlags {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            archive_url: self.archive_url,
            release_url: self.release_url,
            check_interval: self.check_interval_secs.map(Duration::from_secs),
            user_icon_root: self.icon_root,
            accentd_home: self.home,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the sync daemon until interrupted.
    Run,

    /// One-shot sync of the current accent color, installing if needed.
    Sync,

    /// Report where (and whether) the theme for a color is installed.
    Resolve { color: String },

    /// Download and install the icon theme for a color.
    Install { color: String },

    /// Check upstream for a newer icon theme release.
    CheckUpdates,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load_with_overrides(cli.overrides.into_overrides())
        .context("failed to load configuration")?;
    std::fs::create_dir_all(&config.accentd_home)
        .with_context(|| format!("failed to create {}", config.accentd_home.display()))?;

    match cli.command {
        Command::Run => run_daemon(config).await,
        Command::Sync => sync_once(config).await,
        Command::Resolve { color } => resolve(&config, &color),
        Command::Install { color } => install(config, &color).await,
        Command::CheckUpdates => check_updates(config).await,
    }
}

fn parse_color(raw: &str) -> anyhow::Result<AccentColor> {
    AccentColor::new(raw).ok_or_else(|| anyhow!("accent color must not be empty"))
}

fn open_settings(config: &Config) -> anyhow::Result<Arc<FileSettings>> {
    let settings = FileSettings::open(config.settings_file())
        .with_context(|| format!("failed to open {}", config.settings_file().display()))?;
    Ok(Arc::new(settings))
}

fn build_notifier(config: &Config) -> Arc<dyn Notifier> {
    match &config.notify_command {
        Some(argv) if !argv.is_empty() => Arc::new(CommandNotifier::new(argv.clone())),
        _ => Arc::new(NullNotifier),
    }
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let settings = open_settings(&config)?;
    let notifier = build_notifier(&config);
    let controller = AccentSyncController::spawn(config, settings, notifier)
        .context("failed to start the sync controller")?;
    info!("accentd running; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    controller.shutdown().await;
    Ok(())
}

async fn sync_once(config: Config) -> anyhow::Result<()> {
    let settings = open_settings(&config)?;
    let raw = settings
        .get(keys::ACCENT_COLOR)
        .ok_or_else(|| anyhow!("no accent color is set; nothing to sync"))?;
    let color = parse_color(&raw)?;

    let resolver = ThemeResolver::new(config.icon_roots());
    let mut resolution = resolver.resolve(&color);
    if !resolution.found {
        info!("{} is not installed; installing", resolution.theme);
        run_install(&config, &color).await?;
        resolution = resolver.resolve(&color);
        if !resolution.found {
            return Err(anyhow!(
                "install finished but {} is still missing",
                resolution.theme
            ));
        }
    }
    settings.set(keys::ICON_THEME, resolution.theme.as_str())?;
    println!("applied {}", resolution.theme);
    Ok(())
}

fn resolve(config: &Config, color: &str) -> anyhow::Result<()> {
    let color = parse_color(color)?;
    let resolver = ThemeResolver::new(config.icon_roots());
    let resolution = resolver.resolve(&color);
    if !resolution.found {
        println!("{}: not installed", resolution.theme);
        return Ok(());
    }
    match &resolution.root {
        Some(root) => {
            let ownership = match root.ownership {
                Ownership::System => "system",
                Ownership::User => "user",
            };
            println!(
                "{}: installed in {} ({ownership})",
                resolution.theme,
                root.path.display()
            );
        }
        None => println!("{}: default theme, always available", resolution.theme),
    }
    Ok(())
}

async fn install(config: Config, color: &str) -> anyhow::Result<()> {
    let color = parse_color(color)?;
    run_install(&config, &color).await?;
    stamp_installed_version(&config).await;
    println!("installed {}", ThemeId::from_accent(&color));
    Ok(())
}

async fn run_install(config: &Config, color: &AccentColor) -> anyhow::Result<()> {
    let theme = ThemeId::from_accent(color);
    let pipeline = InstallPipeline::new(config).context("failed to build the install pipeline")?;
    let mut reporter = LogProgressReporter;
    pipeline
        .install(&theme, &mut reporter, &CancellationToken::new())
        .await
        .with_context(|| format!("failed to install {theme}"))?;
    Ok(())
}

/// Records the version that was just installed so later update checks compare
/// against it. Best effort: the install itself already succeeded.
async fn stamp_installed_version(config: &Config) {
    let checker = match VersionChecker::new(config) {
        Ok(checker) => checker,
        Err(err) => {
            warn!("skipping version stamp: {err}");
            return;
        }
    };
    let cached = checker.last_check().map(|info| info.latest_version);
    match checker.check_once(cached.as_deref()).await {
        Ok(check) => match open_settings(config) {
            Ok(settings) => {
                if let Err(err) = settings.set(keys::CURRENT_VERSION, &check.latest) {
                    warn!("failed to record installed version: {err}");
                }
            }
            Err(err) => warn!("failed to record installed version: {err}"),
        },
        Err(err) => warn!("could not determine the installed version: {err}"),
    }
}

async fn check_updates(config: Config) -> anyhow::Result<()> {
    let settings = open_settings(&config)?;
    let cached = settings.get(keys::CURRENT_VERSION);
    let checker = VersionChecker::new(&config).context("failed to build the version checker")?;
    let check = checker
        .check_once(cached.as_deref())
        .await
        .context("update check failed")?;
    if check.update_available {
        match check.cached {
            Some(cached) if !cached.is_empty() => {
                println!("update available: {cached} -> {}", check.latest);
            }
            _ => println!("update available: {} (no installed version recorded)", check.latest),
        }
    } else {
        println!("up to date at {}", check.latest);
    }
    Ok(())
}
