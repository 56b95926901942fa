//! The accent-sync controller: a single logical actor owning the whole
//! lifecycle. It subscribes to accent-color changes, resolves themes,
//! triggers installs when resolution fails, and drives the periodic version
//! check. Every settings mutation happens on the actor task, preserving the
//! single-writer invariant; downloads, extraction, and version fetches are
//! the only suspension points and run off the actor, reporting back through
//! an internal channel before any state changes.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::install::InstallError;
use crate::install::InstallPipeline;
use crate::install::LogProgressReporter;
use crate::notifications::NotificationAction;
use crate::notifications::NotificationRequest;
use crate::notifications::Notifier;
use crate::settings::SettingsPort;
use crate::settings::SettingsSubscription;
use crate::settings::keys;
use crate::theme::AccentColor;
use crate::theme::BASE_THEME;
use crate::theme::Resolution;
use crate::theme::ThemeId;
use crate::theme::ThemeResolver;
use crate::updates::UpdateError;
use crate::updates::VersionCheck;
use crate::updates::VersionChecker;

#[derive(Debug, Error)]
pub enum AccentSyncError {
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error(transparent)]
    Update(#[from] UpdateError),
}

/// Seam between the controller and the install pipeline so tests can script
/// installer timing and outcomes.
#[async_trait]
pub trait ThemeInstaller: Send + Sync {
    async fn install(
        &self,
        theme: &ThemeId,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError>;
}

#[async_trait]
impl ThemeInstaller for InstallPipeline {
    async fn install(
        &self,
        theme: &ThemeId,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        let mut reporter = LogProgressReporter;
        InstallPipeline::install(self, theme, &mut reporter, cancel).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Idle,
    Syncing,
    Installing,
    Resolved,
    Failed,
}

/// Messages posted back onto the actor by off-actor work. Each carries the
/// accent color it was computed for so stale results can be discarded.
enum Event {
    ResolutionReady {
        color: AccentColor,
        resolution: Resolution,
    },
    InstallFinished {
        color: AccentColor,
        result: Result<(), InstallError>,
    },
    VersionCheckFinished(Result<VersionCheck, UpdateError>),
}

/// Handle to a running controller. Dropping it requests shutdown; use
/// [`AccentSyncController::shutdown`] to also wait for teardown to finish.
#[derive(Debug)]
pub struct AccentSyncController {
    shutdown: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl AccentSyncController {
    /// Starts the controller with the real install pipeline.
    pub fn spawn(
        config: Config,
        settings: Arc<dyn SettingsPort>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AccentSyncError> {
        let pipeline = Arc::new(InstallPipeline::new(&config)?);
        Self::spawn_with_installer(config, settings, notifier, pipeline)
    }

    /// Starts the controller with an injected installer.
    pub fn spawn_with_installer(
        config: Config,
        settings: Arc<dyn SettingsPort>,
        notifier: Arc<dyn Notifier>,
        installer: Arc<dyn ThemeInstaller>,
    ) -> Result<Self, AccentSyncError> {
        let checker = Arc::new(VersionChecker::new(&config)?);
        let resolver = ThemeResolver::new(config.icon_roots());
        // Subscribe last: nothing above may fail afterwards, so the
        // subscription can never leak from a failed enable path.
        let accent_sub = settings.subscribe(keys::ACCENT_COLOR);
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let actor = Actor {
            config,
            settings,
            notifier,
            resolver,
            installer,
            checker,
            tx,
            state: SyncState::Idle,
            current_accent: None,
            active_install: None,
            version_check_running: false,
        };
        let handle = tokio::spawn(actor.run(accent_sub, rx, shutdown.clone()));
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Requests teardown and waits for it to complete. Afterwards the applied
    /// icon theme is back to the default and no callbacks fire.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for AccentSyncController {
    fn drop(&mut self) {
        // Best-effort: lets the actor run its teardown even if the owner
        // never called shutdown().
        self.shutdown.cancel();
    }
}

struct ActiveInstall {
    color: AccentColor,
    cancel: CancellationToken,
}

struct Actor {
    config: Config,
    settings: Arc<dyn SettingsPort>,
    notifier: Arc<dyn Notifier>,
    resolver: ThemeResolver,
    installer: Arc<dyn ThemeInstaller>,
    checker: Arc<VersionChecker>,
    tx: mpsc::UnboundedSender<Event>,
    state: SyncState,
    current_accent: Option<AccentColor>,
    active_install: Option<ActiveInstall>,
    version_check_running: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut accent_sub: SettingsSubscription,
        mut rx: mpsc::UnboundedReceiver<Event>,
        shutdown: CancellationToken,
    ) {
        // Initial startup read counts as a change.
        if let Some(raw) = self.settings.get(keys::ACCENT_COLOR) {
            self.on_accent_value(&raw);
        }
        let mut ticker = tokio::time::interval(self.config.check_interval);
        // A tick that fires while a check is in flight is skipped, never
        // stacked; missed ticks are dropped the same way.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = accent_sub.changed() => match changed {
                    Some(raw) => self.on_accent_value(&raw),
                    None => {
                        debug!("settings store closed; stopping controller");
                        break;
                    }
                },
                Some(event) = rx.recv() => self.on_event(event),
                _ = ticker.tick() => self.start_version_check(),
            }
        }
        self.teardown();
    }

    /// Accent changes are processed in arrival order on the actor; resolution
    /// itself runs off-actor and is re-checked for staleness on completion.
    fn on_accent_value(&mut self, raw: &str) {
        let Some(color) = AccentColor::new(raw) else {
            debug!("accent color unset; nothing to sync");
            return;
        };
        // A job for a different color is superseded the moment the
        // preference moves on; its result would be discarded anyway.
        if let Some(active) = &self.active_install
            && active.color != color
        {
            active.cancel.cancel();
        }
        info!("accent color changed to {color}");
        self.current_accent = Some(color.clone());
        self.set_state(SyncState::Syncing);

        let resolver = self.resolver.clone();
        let tx = self.tx.clone();
        tokio::task::spawn_blocking(move || {
            let resolution = resolver.resolve(&color);
            let _ = tx.send(Event::ResolutionReady { color, resolution });
        });
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::ResolutionReady { color, resolution } => {
                self.on_resolution(color, resolution);
            }
            Event::InstallFinished { color, result } => self.on_install_finished(color, result),
            Event::VersionCheckFinished(result) => self.on_version_check_finished(result),
        }
    }

    fn on_resolution(&mut self, color: AccentColor, resolution: Resolution) {
        if self.current_accent.as_ref() != Some(&color) {
            debug!("discarding stale resolution for {color}");
            return;
        }
        if resolution.found {
            self.apply_theme(&resolution.theme);
            self.set_state(SyncState::Resolved);
            return;
        }
        // Fall back to the default theme first so the desktop never
        // references a missing theme while the install runs.
        self.apply_theme(&ThemeId::base());
        match &self.active_install {
            Some(active) if active.color == color => {
                debug!("install for {color} already in flight; coalescing");
            }
            _ => self.start_install(color, resolution.theme),
        }
        self.set_state(SyncState::Installing);
    }

    fn start_install(&mut self, color: AccentColor, theme: ThemeId) {
        let cancel = CancellationToken::new();
        self.active_install = Some(ActiveInstall {
            color: color.clone(),
            cancel: cancel.clone(),
        });
        self.notifier.notify(
            &NotificationRequest::new(
                "Icon theme not installed",
                format!("The {theme} icon theme is missing and is being installed. Open preferences to manage icon themes."),
            )
            .with_action(NotificationAction::OpenPreferences),
        );

        let installer = Arc::clone(&self.installer);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = installer.install(&theme, &cancel).await;
            let _ = tx.send(Event::InstallFinished { color, result });
        });
    }

    fn on_install_finished(&mut self, color: AccentColor, result: Result<(), InstallError>) {
        if self
            .active_install
            .as_ref()
            .is_some_and(|active| active.color == color)
        {
            self.active_install = None;
        }
        if self.current_accent.as_ref() != Some(&color) {
            debug!("discarding stale install outcome for {color}");
            return;
        }
        match result {
            Ok(()) => {
                let resolution = self.resolver.resolve(&color);
                if resolution.found {
                    self.apply_theme(&resolution.theme);
                    self.set_state(SyncState::Resolved);
                } else {
                    warn!("install reported success but {} is still missing", resolution.theme);
                    self.set_state(SyncState::Failed);
                }
            }
            Err(InstallError::Cancelled) => {
                debug!("install for {color} cancelled");
            }
            Err(err) => {
                self.set_state(SyncState::Failed);
                let theme = ThemeId::from_accent(&color);
                self.notifier.notify(&NotificationRequest::new(
                    "Icon theme install failed",
                    format!("Could not install {theme}: {err}"),
                ));
            }
        }
    }

    fn start_version_check(&mut self) {
        if self.version_check_running {
            debug!("version check still in flight; skipping tick");
            return;
        }
        self.version_check_running = true;
        let checker = Arc::clone(&self.checker);
        let cached = self.settings.get(keys::CURRENT_VERSION);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = checker.check_once(cached.as_deref()).await;
            let _ = tx.send(Event::VersionCheckFinished(result));
        });
    }

    fn on_version_check_finished(&mut self, result: Result<VersionCheck, UpdateError>) {
        self.version_check_running = false;
        match result {
            Ok(check) if check.update_available => {
                let gate = self
                    .settings
                    .get_bool(keys::NOTIFY_ABOUT_RELEASES, self.config.notify_about_releases);
                if gate {
                    self.notifier.notify(
                        &NotificationRequest::new(
                            "Icon theme update available",
                            format!(
                                "Version {} of the accent icon themes is available upstream.",
                                check.latest
                            ),
                        )
                        .with_action(NotificationAction::OpenPreferences),
                    );
                } else {
                    debug!("update {} available but notifications are disabled", check.latest);
                }
            }
            Ok(check) => debug!("icon themes up to date at {}", check.latest),
            // Transient network trouble is log-only; the next tick retries.
            Err(err) => warn!("version check failed: {err}"),
        }
    }

    fn set_state(&mut self, next: SyncState) {
        if self.state != next {
            debug!("sync state {:?} -> {next:?}", self.state);
            self.state = next;
        }
    }

    fn apply_theme(&self, theme: &ThemeId) {
        if let Err(err) = self.settings.set(keys::ICON_THEME, theme.as_str()) {
            warn!("failed to apply icon theme {theme}: {err}");
        }
    }

    /// Cancels in-flight work and resets the applied theme so the visual
    /// state never outlives the controller.
    fn teardown(&mut self) {
        if let Some(active) = self.active_install.take() {
            active.cancel.cancel();
        }
        if let Err(err) = self.settings.set(keys::ICON_THEME, BASE_THEME) {
            warn!("failed to reset icon theme on shutdown: {err}");
        }
        self.set_state(SyncState::Idle);
        info!("accent sync controller stopped");
    }
}
