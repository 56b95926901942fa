//! Core library for accentd: keeps the applied icon theme in sync with the
//! desktop's accent-color preference.
//!
//! The moving parts are [`controller::AccentSyncController`] (the lifecycle
//! owner), [`theme::ThemeResolver`] (local presence checks),
//! [`install::InstallPipeline`] (download → extract → place → verify), and
//! [`updates::VersionChecker`] (periodic upstream comparison). External
//! collaborators are abstracted behind [`settings::SettingsPort`] and
//! [`notifications::Notifier`].

pub mod config;
pub mod controller;
pub mod install;
pub mod notifications;
pub mod settings;
pub mod theme;
pub mod updates;

pub use config::Config;
pub use config::ConfigOverrides;
pub use controller::AccentSyncController;
pub use controller::AccentSyncError;
pub use controller::ThemeInstaller;
pub use install::InstallError;
pub use install::InstallPipeline;
pub use notifications::NotificationRequest;
pub use notifications::Notifier;
pub use settings::SettingsPort;
pub use theme::AccentColor;
pub use theme::ThemeId;
pub use theme::ThemeResolver;
pub use updates::VersionChecker;
