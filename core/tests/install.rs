#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end install pipeline tests against a mock HTTP server and real
//! temp-directory icon roots.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use accentd_core::config::Config;
use accentd_core::config::ConfigOverrides;
use accentd_core::install::InstallError;
use accentd_core::install::InstallEvent;
use accentd_core::install::InstallPipeline;
use accentd_core::install::ProgressReporter;
use accentd_core::install::Stage;
use accentd_core::theme::AccentColor;
use accentd_core::theme::Ownership;
use accentd_core::theme::ThemeId;
use accentd_core::theme::ThemeResolver;
use tokio_util::sync::CancellationToken;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

/// Builds a zip archive shaped like the upstream repository snapshot: one
/// top-level directory whose children are the theme packages.
fn build_theme_archive(themes: &[&str]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    writer
        .add_directory("Adwaita-colors-main", options)
        .unwrap();
    for theme in themes {
        writer
            .add_directory(format!("Adwaita-colors-main/{theme}"), options)
            .unwrap();
        writer
            .start_file(format!("Adwaita-colors-main/{theme}/index.theme"), options)
            .unwrap();
        writer
            .write_all(format!("[Icon Theme]\nName={theme}\n").as_bytes())
            .unwrap();
    }
    writer.finish().unwrap().into_inner()
}

struct Fixture {
    config: Config,
    _home: tempfile::TempDir,
    icons: tempfile::TempDir,
}

async fn fixture(server: &MockServer) -> Fixture {
    let home = tempfile::tempdir().unwrap();
    let icons = tempfile::tempdir().unwrap();
    let config = Config::load_with_overrides(ConfigOverrides {
        accentd_home: Some(home.path().to_path_buf()),
        archive_url: Some(format!("{}/archive.zip", server.uri())),
        user_icon_root: Some(icons.path().join("icons")),
        ..Default::default()
    })
    .unwrap();
    Fixture {
        config,
        _home: home,
        icons,
    }
}

async fn mount_archive(server: &MockServer, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path("/archive.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/zip"))
        .mount(server)
        .await;
}

#[derive(Default)]
struct CollectingReporter {
    stages: Vec<Stage>,
    saw_bytes: bool,
}

impl ProgressReporter for CollectingReporter {
    fn on_event(&mut self, event: &InstallEvent) {
        match event {
            InstallEvent::Stage(stage) => self.stages.push(*stage),
            InstallEvent::Downloaded { .. } => self.saw_bytes = true,
        }
    }
}

fn scratch_dirs_in_temp() -> BTreeSet<PathBuf> {
    std::fs::read_dir(std::env::temp_dir())
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("accentd-install-"))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn install_round_trip_makes_theme_resolvable_in_user_root() {
    let server = MockServer::start().await;
    mount_archive(&server, build_theme_archive(&["Adwaita-red", "Adwaita-teal"])).await;
    let fx = fixture(&server).await;

    let pipeline = InstallPipeline::new(&fx.config).unwrap();
    let theme = ThemeId::from_accent(&AccentColor::new("red").unwrap());
    let mut reporter = CollectingReporter::default();

    pipeline
        .install(&theme, &mut reporter, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        reporter.stages,
        vec![
            Stage::Pending,
            Stage::Downloading,
            Stage::Extracting,
            Stage::Placing,
            Stage::Done,
        ]
    );
    assert!(reporter.saw_bytes);

    let resolver = ThemeResolver::new(fx.config.icon_roots());
    let resolution = resolver.resolve(&AccentColor::new("red").unwrap());
    assert!(resolution.found);
    assert_eq!(resolution.ownership(), Some(Ownership::User));
}

#[tokio::test]
async fn install_merges_with_existing_contents_last_writer_wins() {
    let server = MockServer::start().await;
    mount_archive(&server, build_theme_archive(&["Adwaita-red"])).await;
    let fx = fixture(&server).await;

    // Pre-existing stale copy of the theme plus an unrelated neighbor.
    let root = fx.config.user_icon_root.clone();
    std::fs::create_dir_all(root.join("Adwaita-red/stale")).unwrap();
    std::fs::create_dir_all(root.join("SomeOtherTheme")).unwrap();

    let pipeline = InstallPipeline::new(&fx.config).unwrap();
    let theme = ThemeId::from_accent(&AccentColor::new("red").unwrap());
    pipeline
        .install(
            &theme,
            &mut CollectingReporter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(root.join("Adwaita-red/index.theme").exists());
    assert!(!root.join("Adwaita-red/stale").exists());
    assert!(root.join("SomeOtherTheme").exists());
}

#[tokio::test]
async fn missing_requested_theme_in_archive_is_a_failure() {
    let server = MockServer::start().await;
    mount_archive(&server, build_theme_archive(&["Adwaita-teal"])).await;
    let fx = fixture(&server).await;

    let pipeline = InstallPipeline::new(&fx.config).unwrap();
    let theme = ThemeId::from_accent(&AccentColor::new("red").unwrap());
    let err = pipeline
        .install(
            &theme,
            &mut CollectingReporter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::MissingTheme(name) if name == "Adwaita-red"));
}

#[tokio::test]
async fn corrupt_archive_is_reported_not_crashed() {
    let server = MockServer::start().await;
    mount_archive(&server, b"this is not a zip file".to_vec()).await;
    let fx = fixture(&server).await;

    let pipeline = InstallPipeline::new(&fx.config).unwrap();
    let theme = ThemeId::from_accent(&AccentColor::new("red").unwrap());
    let err = pipeline
        .install(
            &theme,
            &mut CollectingReporter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::CorruptArchive(_)));
    // Nothing was placed into the destination root.
    assert!(!fx.config.user_icon_root.join("Adwaita-red").exists());
}

#[tokio::test]
async fn http_error_status_is_a_distinct_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/archive.zip"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let fx = fixture(&server).await;

    let pipeline = InstallPipeline::new(&fx.config).unwrap();
    let theme = ThemeId::from_accent(&AccentColor::new("red").unwrap());
    let err = pipeline
        .install(
            &theme,
            &mut CollectingReporter::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::HttpStatus(404)));
}

#[tokio::test]
async fn cancellation_mid_download_cleans_up_scratch_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/archive.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(build_theme_archive(&["Adwaita-red"]), "application/zip")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let fx = fixture(&server).await;
    let before = scratch_dirs_in_temp();

    let pipeline = InstallPipeline::new(&fx.config).unwrap();
    let theme = ThemeId::from_accent(&AccentColor::new("red").unwrap());
    let cancel = CancellationToken::new();

    let job = {
        let cancel = cancel.clone();
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .install(&theme, &mut CollectingReporter::default(), &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let err = job.await.unwrap().unwrap_err();
    assert!(matches!(err, InstallError::Cancelled));
    // No scratch directory or partial archive survives the cancellation.
    let leftover: Vec<_> = scratch_dirs_in_temp().difference(&before).cloned().collect();
    assert!(leftover.is_empty(), "leftover scratch dirs: {leftover:?}");
    assert!(!fx.icons.path().join("icons/Adwaita-red").exists());
}
