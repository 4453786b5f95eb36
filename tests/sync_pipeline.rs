use std::sync::Arc;
use std::time::{Duration, Instant};

use ficsync::catalog::Catalog;
use ficsync::cli::DownloadArgs;
use ficsync::collect::CollectError;
use ficsync::config::ConfigError;
use ficsync::origin::Origin;
use ficsync::session::Session;

mod support;

use support::{ARCHIVE, FakeCatalog, FakeConverter, FakeProvider, Workspace, success};

const NEWER: &str = "File(/tmp/w/10.epub) Updated(2026-10-18 10:00:00) more recently than Story(2026-01-01 00:00:00) - Skipping";

fn work(id: u32) -> String {
    format!("{ARCHIVE}/works/{id}")
}

fn today() -> String {
    chrono::Local::now().date_naive().format("%d.%m.%Y").to_string()
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_file_and_bookmarks_dedupe_to_two_works() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    std::fs::write(ws.retry_file(), format!("{}\n", work(10)))?;

    let provider = Arc::new(FakeProvider::default().urls(
        Origin::Bookmarks,
        &[&format!("{}/chapters/2", work(10)), &work(20)],
    ));
    let converter = Arc::new(FakeConverter::default());
    let settings = ws.settings(&["file", "bookmarks"], DownloadArgs::default());

    let report = Session::new(settings, provider, converter.clone(), None)
        .run(&mut std::io::empty())
        .await?;

    assert_eq!(report.collected, 2);
    assert_eq!(report.synced, 2);
    assert!(report.failed.is_empty());

    let targets: Vec<String> = converter
        .runs
        .lock()
        .unwrap()
        .iter()
        .map(|(target, _)| target.clone())
        .collect();
    assert_eq!(targets, vec![work(10), work(20)]);

    assert!(ws.output_dir().join("10.epub").is_file());
    assert!(ws.output_dir().join("20.epub").is_file());
    assert!(ws.retry_lines()?.is_empty());

    let watermarks: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(ws.last_update_file())?)?;
    assert_eq!(watermarks["sources"]["bookmarks"], today());
    assert_eq!(watermarks["sources"]["file"], today());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_origin_flushes_urls_and_keeps_watermarks() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let stored = r#"{"sources": {"later": "01.02.2025"}}"#;
    std::fs::write(ws.last_update_file(), stored)?;

    let provider = Arc::new(
        FakeProvider::default()
            .urls(Origin::Later, &[&work(1), &work(2), &work(3)])
            .failing(Origin::Gifts, "login expired"),
    );
    let converter = Arc::new(FakeConverter::default());
    let settings = ws.settings(&["later", "gifts"], DownloadArgs::default());

    let err = Session::new(settings, provider, converter.clone(), None)
        .run(&mut std::io::empty())
        .await
        .unwrap_err();

    let collect_err = err
        .downcast_ref::<CollectError>()
        .expect("collection error");
    assert_eq!(collect_err.origin, Origin::Gifts);
    assert_eq!(ws.retry_lines()?, vec![work(1), work(2), work(3)]);
    assert_eq!(std::fs::read_to_string(ws.last_update_file())?, stored);
    assert!(converter.runs.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn newer_local_copy_is_forced_without_force_flag() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    std::fs::write(ws.retry_file(), format!("{}\n", work(10)))?;

    let provider = Arc::new(FakeProvider::default());
    let converter = Arc::new(FakeConverter::default().reply("10.epub", &[NEWER, &success("Ten")]));
    let catalog = Arc::new(FakeCatalog::default().with_entry(5, &work(10)));
    let settings = ws.settings(
        &["file"],
        DownloadArgs {
            library: Some("library".to_owned()),
            ..DownloadArgs::default()
        },
    );

    let report = Session::new(
        settings,
        provider,
        converter.clone(),
        Some(catalog.clone() as Arc<dyn Catalog>),
    )
    .run(&mut std::io::empty())
    .await?;

    assert_eq!(report.synced, 1);
    assert_eq!(converter.forced_runs(), vec![false, true]);
    assert_eq!(catalog.ids_for(&work(10)), vec![6]);
    assert_eq!(
        catalog.calls(),
        vec![
            "prepare".to_owned(),
            format!("search {}", work(10)),
            "export 5".to_owned(),
            "add".to_owned(),
            format!("search {}", work(10)),
            "set_metadata 6".to_owned(),
            "remove 5".to_owned(),
        ]
    );

    let entries = catalog.entries.lock().unwrap();
    assert_eq!(entries[0].fields.get("#words").map(String::as_str), Some("1000"));
    assert_eq!(entries[0].fields.get("#fandoms").map(String::as_str), Some("Fandom"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_remove_never_loses_the_new_entry() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    std::fs::write(ws.retry_file(), format!("{}\n", work(10)))?;

    let catalog = Arc::new(
        FakeCatalog::default()
            .failing_remove()
            .with_entry(5, &work(10)),
    );
    let settings = ws.settings(
        &["file"],
        DownloadArgs {
            library: Some("library".to_owned()),
            ..DownloadArgs::default()
        },
    );

    let report = Session::new(
        settings,
        Arc::new(FakeProvider::default()),
        Arc::new(FakeConverter::default()),
        Some(catalog.clone() as Arc<dyn Catalog>),
    )
    .run(&mut std::io::empty())
    .await?;

    assert_eq!(report.failed, vec![work(10)]);
    assert_eq!(catalog.ids_for(&work(10)), vec![5, 6]);
    assert_eq!(ws.retry_lines()?, vec![work(10)]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_add_keeps_the_old_entry() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    std::fs::write(ws.retry_file(), format!("{}\n", work(10)))?;

    let catalog = Arc::new(
        FakeCatalog::default()
            .failing_add()
            .with_entry(5, &work(10)),
    );
    let settings = ws.settings(
        &["file"],
        DownloadArgs {
            library: Some("library".to_owned()),
            ..DownloadArgs::default()
        },
    );

    let report = Session::new(
        settings,
        Arc::new(FakeProvider::default()),
        Arc::new(FakeConverter::default()),
        Some(catalog.clone() as Arc<dyn Catalog>),
    )
    .run(&mut std::io::empty())
    .await?;

    assert_eq!(report.failed, vec![work(10)]);
    assert_eq!(catalog.ids_for(&work(10)), vec![5]);
    assert!(!catalog.calls().iter().any(|call| call.starts_with("remove")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn per_work_failures_are_isolated() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let provider = Arc::new(
        FakeProvider::default().urls(Origin::Later, &[&work(1), &work(2), &work(3), &work(4)]),
    );
    let converter = Arc::new(
        FakeConverter::default()
            .reply("works/1", &["Story does not exist: https://example.org/works/1"])
            .reply("works/2", &["HTTP Error 429: Too Many Requests"])
            .reply("works/3", &["works/3 already contains 7 chapters."]),
    );
    let settings = ws.settings(&["later"], DownloadArgs::default());

    let report = Session::new(settings, provider, converter, None)
        .run(&mut std::io::empty())
        .await?;

    assert_eq!(report.synced, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, vec![work(1), work(2)]);
    assert_eq!(ws.retry_lines()?, vec![work(1), work(2)]);
    assert!(ws.output_dir().join("4.epub").is_file());
    assert!(ws.last_update_file().is_file());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn force_updates_works_that_are_up_to_date() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let provider = Arc::new(FakeProvider::default().urls(Origin::Later, &[&work(3)]));
    let converter = Arc::new(
        FakeConverter::default().reply("works/3", &["works/3 already contains 7 chapters.", "Done"]),
    );
    let settings = ws.settings(
        &["later"],
        DownloadArgs {
            force: true,
            ..DownloadArgs::default()
        },
    );

    let report = Session::new(settings, provider, converter.clone(), None)
        .run(&mut std::io::empty())
        .await?;

    assert_eq!(report.synced, 1);
    assert_eq!(converter.forced_runs(), vec![false, true]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn dry_run_lists_without_side_effects() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    std::fs::write(ws.retry_file(), format!("{}\n", work(10)))?;
    let provider = Arc::new(FakeProvider::default().urls(Origin::Bookmarks, &[&work(20)]));
    let converter = Arc::new(FakeConverter::default());
    let catalog = Arc::new(FakeCatalog::default());
    let settings = ws.settings(
        &["file", "bookmarks"],
        DownloadArgs {
            dry_run: true,
            library: Some("library".to_owned()),
            ..DownloadArgs::default()
        },
    );

    let report = Session::new(
        settings,
        provider,
        converter.clone(),
        Some(catalog.clone() as Arc<dyn Catalog>),
    )
    .run(&mut std::io::empty())
    .await?;

    assert!(report.dry_run);
    assert_eq!(report.collected, 2);
    assert!(converter.runs.lock().unwrap().is_empty());
    assert!(catalog.calls().is_empty());
    assert_eq!(ws.retry_lines()?, vec![work(10)]);
    assert!(!ws.last_update_file().exists());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_piped_url_is_kept_for_retry() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let converter = Arc::new(FakeConverter::default());
    let settings = ws.settings(&["stdin"], DownloadArgs::default());

    let mut stdin = std::io::Cursor::new(format!(
        "{ARCHIVE}/series/77\n{}/chapters/9#main\n",
        work(5)
    ));
    let report = Session::new(settings, Arc::new(FakeProvider::default()), converter, None)
        .run(&mut stdin)
        .await?;

    assert_eq!(report.collected, 2);
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, vec![format!("{ARCHIVE}/series/77")]);
    assert!(ws.output_dir().join("5.epub").is_file());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_workers_keep_one_entry_per_work() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let urls: Vec<String> = (1..=6).map(work).collect();
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    let provider = Arc::new(FakeProvider::default().urls(Origin::Later, &url_refs));
    let mut catalog = FakeCatalog::default();
    for (id, url) in urls.iter().enumerate().take(3) {
        catalog = catalog.with_entry(id as u64 + 1, url);
    }
    let catalog = Arc::new(catalog);
    let settings = ws.settings(
        &["later"],
        DownloadArgs {
            library: Some("library".to_owned()),
            workers: Some(3),
            ..DownloadArgs::default()
        },
    );

    let report = Session::new(
        settings,
        provider,
        Arc::new(FakeConverter::default()),
        Some(catalog.clone() as Arc<dyn Catalog>),
    )
    .run(&mut std::io::empty())
    .await?;

    assert_eq!(report.synced, 6);
    for url in &urls {
        assert_eq!(catalog.ids_for(url).len(), 1, "{url}");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_last_update_file_stops_before_collecting() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    std::fs::write(ws.last_update_file(), "{not json")?;
    let provider = Arc::new(FakeProvider::default().urls(Origin::Later, &[&work(1)]));
    let settings = ws.settings(&["later"], DownloadArgs::default());

    let err = Session::new(
        settings,
        provider.clone(),
        Arc::new(FakeConverter::default()),
        None,
    )
    .run(&mut std::io::empty())
    .await
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::InvalidWatermarkFile { .. })
    ));
    assert!(provider.requests.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limited_work_pauses_before_the_next_one() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let provider = Arc::new(FakeProvider::default().urls(Origin::Later, &[&work(1), &work(2)]));
    let converter = Arc::new(
        FakeConverter::default().reply("works/1", &["HTTP Error 429: Too Many Requests"]),
    );
    let settings = ws.settings(
        &["later"],
        DownloadArgs {
            cooldown_secs: Some(1),
            ..DownloadArgs::default()
        },
    );

    let started = Instant::now();
    let report = Session::new(settings, provider, converter, None)
        .run(&mut std::io::empty())
        .await?;

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(report.failed, vec![work(1)]);
    assert_eq!(report.synced, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn work_dirs_are_removed_however_a_work_ends() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let library = || DownloadArgs {
        library: Some("library".to_owned()),
        ..DownloadArgs::default()
    };

    // Work 1 syncs, work 2 is reported deleted by the archive.
    let converter = Arc::new(
        FakeConverter::default()
            .reply("works/2", &["Story does not exist: https://example.org/works/2"]),
    );
    let report = Session::new(
        ws.settings(&["later"], library()),
        Arc::new(FakeProvider::default().urls(Origin::Later, &[&work(1), &work(2)])),
        converter.clone(),
        Some(Arc::new(FakeCatalog::default()) as Arc<dyn Catalog>),
    )
    .run(&mut std::io::empty())
    .await?;
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, vec![work(2)]);

    // Work 3 converts but the catalog refuses it.
    let report = Session::new(
        ws.settings(&["later"], library()),
        Arc::new(FakeProvider::default().urls(Origin::Later, &[&work(3)])),
        converter.clone(),
        Some(Arc::new(FakeCatalog::default().failing_add()) as Arc<dyn Catalog>),
    )
    .run(&mut std::io::empty())
    .await?;
    assert_eq!(report.failed, vec![work(3)]);

    let work_dirs = converter.work_dirs();
    assert_eq!(work_dirs.len(), 3);
    for dir in &work_dirs {
        assert!(!dir.exists(), "{} was left behind", dir.display());
    }
    Ok(())
}
