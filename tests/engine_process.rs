//! Drives the engine, the session and the headless runner against small
//! shell scripts that stand in for yt-dlp.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;

use playlist_downloader::config::Quality;
use playlist_downloader::engine::{Engine, EngineOutput};
use playlist_downloader::error::EngineError;
use playlist_downloader::headless;
use playlist_downloader::model::{BatchStatus, Phase};
use playlist_downloader::session::{DownloadRequest, Session};

const URL: &str = "https://www.youtube.com/playlist?list=PLfixture";

const PLAYLIST_JSON: &str =
    r#"{"_type":"playlist","title":"Fixture","entries":[{"id":"v1","title":"One"},{"id":"v2","title":"Two"}]}"#;

// a script written while another test forks can fail with ETXTBSY
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

struct Fixture {
    dir: PathBuf,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("playlist-downloader-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        Self { dir }
    }

    /// Answers `-J` with a two-entry playlist and runs `body` for downloads.
    fn engine(&self, body: &str) -> Engine {
        let path = self.dir.join("yt-dlp");
        let script = format!(
            "#!/bin/sh\nif [ \"$1\" = \"-J\" ]; then\n  printf '%s\\n' '{PLAYLIST_JSON}'\n  exit 0\nfi\n{body}\n"
        );
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        Engine::new(path)
    }

    fn request(&self, ignore_errors: bool) -> DownloadRequest {
        DownloadRequest {
            url: URL.to_owned(),
            output_dir: self.dir.join("out"),
            quality: Quality::default(),
            ignore_errors,
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

async fn download(engine: &Engine, fixture: &Fixture, ignore_errors: bool) -> (Result<(), EngineError>, Vec<EngineOutput>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        move |output: EngineOutput| seen.lock().unwrap().push(output)
    };
    let options = engine.options(Quality::default(), &fixture.dir, ignore_errors);
    let result = engine.download(URL, &options, sink).await;
    let seen = seen.lock().unwrap().clone();
    (result, seen)
}

#[tokio::test]
async fn clean_exit_forwards_both_streams() {
    let _serial = serial();
    let fixture = Fixture::new("clean-exit");
    let engine = fixture.engine(
        "echo 'PLDL|downloading|v1| 50.0%|5|10|NA|1.00KiB/s'\n\
         echo 'ERROR: [youtube] v2: Private video' >&2\n\
         exit 0",
    );

    let (result, seen) = download(&engine, &fixture, true).await;
    result.unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().any(|o| matches!(o, EngineOutput::Progress(e) if e.item_id.as_deref() == Some("v1"))));
    assert!(seen.iter().any(
        |o| matches!(o, EngineOutput::ItemError(e) if e.item_id.as_deref() == Some("v2") && e.message == "Private video")
    ));
}

#[tokio::test]
async fn exit_one_is_success_only_when_ignoring_errors() {
    let _serial = serial();
    let fixture = Fixture::new("exit-one");
    let engine = fixture.engine("echo 'ERROR: [youtube] v2: Private video' >&2\nexit 1");

    let (result, _) = download(&engine, &fixture, true).await;
    result.unwrap();

    let (result, _) = download(&engine, &fixture, false).await;
    match result {
        Err(EngineError::ExitStatus { code, message }) => {
            assert_eq!(code, "1");
            assert_eq!(message, "[youtube] v2: Private video");
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn other_exit_codes_carry_last_error_line() {
    let _serial = serial();
    let fixture = Fixture::new("exit-two");
    let engine = fixture.engine(
        "echo 'ERROR: [youtube] v1: Sign in to confirm your age' >&2\n\
         echo 'ERROR: [generic] network down' >&2\n\
         echo 'cleaning up' >&2\n\
         exit 2",
    );

    let (result, _) = download(&engine, &fixture, true).await;
    match result {
        Err(EngineError::ExitStatus { code, message }) => {
            assert_eq!(code, "2");
            assert_eq!(message, "[generic] network down");
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test]
async fn headless_run_completes_with_failed_entry() {
    let _serial = serial();
    let fixture = Fixture::new("headless-ok");
    let engine = fixture.engine(
        "echo 'PLDL|downloading|v1| 10.0%|1|10|NA|1.00KiB/s'\n\
         echo 'PLDL|downloading|v1|100.0%|10|10|NA|1.00KiB/s'\n\
         echo 'ERROR: [youtube] v2: Video unavailable' >&2\n\
         exit 1",
    );
    let mut session = Session::new(Handle::current(), engine);

    let status = tokio::time::timeout(Duration::from_secs(20), headless::run(&mut session, fixture.request(true)))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(status, BatchStatus::Completed);
    let tracker = session.tracker();
    assert_eq!(tracker.title(), Some("Fixture"));
    assert_eq!(tracker.item("v1").unwrap().phase, Phase::Done);
    assert_eq!(tracker.item("v2").unwrap().phase, Phase::Failed);
    assert!(fixture.dir.join("out").is_dir());
}

#[tokio::test]
async fn headless_run_reports_engine_failure() {
    let _serial = serial();
    let fixture = Fixture::new("headless-fail");
    let engine = fixture.engine("echo 'ERROR: [generic] network down' >&2\nexit 2");
    let mut session = Session::new(Handle::current(), engine);

    let status = tokio::time::timeout(Duration::from_secs(20), headless::run(&mut session, fixture.request(true)))
        .await
        .unwrap()
        .unwrap();

    match status {
        BatchStatus::Failed(message) => assert_eq!(message, "yt-dlp exited with 2: [generic] network down"),
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test]
async fn item_error_after_next_item_started_still_fails_it() {
    let _serial = serial();
    let fixture = Fixture::new("late-error");
    // the error goes to stderr, so it may be read after v2's progress
    let engine = fixture.engine(
        "echo 'PLDL|downloading|v1| 20.0%|2|10|NA|1.00KiB/s'\n\
         echo 'ERROR: [youtube] v1: Video unavailable' >&2\n\
         echo 'PLDL|downloading|v2|100.0%|10|10|NA|1.00KiB/s'\n\
         exit 1",
    );

    for _ in 0..5 {
        let mut session = Session::new(Handle::current(), engine.clone());
        let status = tokio::time::timeout(Duration::from_secs(20), headless::run(&mut session, fixture.request(true)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(status, BatchStatus::Completed);
        let v1 = session.tracker().item("v1").unwrap();
        assert_eq!(v1.phase, Phase::Failed);
        assert_eq!(v1.error.as_deref(), Some("Video unavailable"));
        assert_eq!(session.tracker().item("v2").unwrap().phase, Phase::Done);
    }
}

#[tokio::test]
async fn dropping_session_kills_engine() {
    let _serial = serial();
    let fixture = Fixture::new("drop-kills");
    let marker = fixture.dir.join("survived");
    let engine = fixture.engine(&format!(
        "echo 'PLDL|downloading|v1| 10.0%|1|10|NA|1.00KiB/s'\nsleep 2\ntouch '{}'",
        marker.display()
    ));
    let mut session = Session::new(Handle::current(), engine);
    session.start(fixture.request(true)).unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while session.tracker().item("v1").map(|item| item.phase) != Some(Phase::Downloading) {
            session.pump();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    drop(session);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!marker.exists(), "engine kept running after the session was dropped");
}
