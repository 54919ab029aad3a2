//! Lifecycle tests over the supervisor's public handle: baseline
//! start/stop, crash backoff, crash-loop cut-off, file-change restarts,
//! and snapshot restore.

mod common;

use std::time::Duration;

use common::{data_str, data_u64, start_request, wait_until, Sandbox, CRASH_SCRIPT, LOOP_SCRIPT};
use procvisor::control::Request;
use procvisor::events::EventKind;

#[tokio::test]
async fn baseline_lifecycle_start_then_stop() {
    let sandbox = Sandbox::new();
    let sup = sandbox.supervisor();
    let script = sandbox.script("t1.sh", LOOP_SCRIPT);

    let reply = sup
        .dispatch(start_request(&script, sandbox.sh_options("t1")))
        .await;
    assert!(reply.success, "start failed: {}", reply.message);
    let id = data_str(&reply, "id").expect("entry id in data").to_string();
    assert_eq!(id.len(), 10);
    assert_eq!(data_str(&reply, "state"), Some("running"));
    assert!(data_u64(&reply, "osPid").unwrap() > 0);
    assert_eq!(data_u64(&reply, "restartCount"), Some(0));

    let status = sup.dispatch(Request::new("status")).await;
    assert_eq!(status.data.unwrap().as_array().unwrap().len(), 1);

    let stopped = sup.dispatch(Request::new("stop").with_target("t1")).await;
    assert!(stopped.success, "stop failed: {}", stopped.message);

    // The entry is gone; a second stop cannot find it.
    let again = sup.dispatch(Request::new("stop").with_target("t1")).await;
    assert!(!again.success);
    assert!(again.message.contains("not found"), "{}", again.message);
}

#[tokio::test]
async fn crash_backoff_delays_double_per_attempt() {
    let sandbox = Sandbox::new();
    let mut events = sandbox.bus.subscribe();
    let sup = sandbox.supervisor();
    let script = sandbox.script("crash.sh", CRASH_SCRIPT);

    let mut options = sandbox.sh_options("crasher");
    options.restart_delay = Some(50);
    let reply = sup.dispatch(start_request(&script, options)).await;
    assert!(reply.success, "{}", reply.message);

    let mut delays = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while delays.len() < 3 {
        let ev = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("backoff events within deadline")
            .expect("bus open");
        if ev.kind == EventKind::BackoffScheduled {
            delays.push(ev.delay.expect("delay on backoff event"));
        }
    }
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(50),
            Duration::from_millis(100),
            Duration::from_millis(200),
        ]
    );

    sup.dispatch(Request::new("delete").with_target("crasher"))
        .await;
}

#[tokio::test]
async fn crash_loop_denies_further_restarts() {
    let sandbox = Sandbox::new();
    let mut events = sandbox.bus.subscribe();
    let sup = sandbox.supervisor();
    let script = sandbox.script("crash.sh", CRASH_SCRIPT);

    let mut options = sandbox.sh_options("crasher");
    options.restart_delay = Some(10);
    let reply = sup.dispatch(start_request(&script, options)).await;
    assert!(reply.success, "{}", reply.message);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let ev = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("crash-loop event within deadline")
            .expect("bus open");
        if ev.kind == EventKind::CrashLoop {
            break;
        }
    }

    // The entry stays errored and retained for inspection.
    let status = sup
        .dispatch(Request::new("status").with_target("crasher"))
        .await;
    assert!(status.success);
    assert_eq!(data_str(&status, "state"), Some("errored"));
    assert_eq!(data_u64(&status, "osPid"), Some(0));

    // No respawn follows: state remains errored after a quiet period.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let status = sup
        .dispatch(Request::new("status").with_target("crasher"))
        .await;
    assert_eq!(data_str(&status, "state"), Some("errored"));
}

#[tokio::test]
async fn crashes_are_journaled_before_restarts() {
    let sandbox = Sandbox::new();
    let sup = sandbox.supervisor();
    let script = sandbox.script("crash.sh", CRASH_SCRIPT);

    let mut options = sandbox.sh_options("crasher");
    options.restart_delay = Some(10);
    let reply = sup.dispatch(start_request(&script, options)).await;
    let id = data_str(&reply, "id").unwrap().to_string();

    let crash_file = sandbox.cfg.crash_file(&id);
    let records = wait_until(Duration::from_secs(10), || {
        let path = crash_file.clone();
        async move {
            let raw = tokio::fs::read(&path).await.ok()?;
            let records: Vec<serde_json::Value> = serde_json::from_slice(&raw).ok()?;
            (!records.is_empty()).then_some(records)
        }
    })
    .await
    .expect("crash journal written");

    assert_eq!(records[0]["exitCode"], 1);
    assert_eq!(records[0]["name"], "crasher");

    sup.dispatch(Request::new("delete").with_target(&id)).await;
}

#[tokio::test]
async fn file_change_restarts_once_with_reason() {
    let sandbox = Sandbox::new();
    let sup = sandbox.supervisor();
    // The watcher observes the script's directory; give it its own.
    let app_dir = sandbox.dir.path().join("app");
    std::fs::create_dir_all(&app_dir).unwrap();
    let script = app_dir.join("watched.sh");
    std::fs::write(&script, LOOP_SCRIPT).unwrap();

    let mut options = sandbox.sh_options("watched");
    options.watch = Some(true);
    let reply = sup.dispatch(start_request(&script, options)).await;
    assert!(reply.success, "{}", reply.message);

    // Let the watcher take its baseline before touching anything.
    tokio::time::sleep(Duration::from_millis(300)).await;
    std::fs::write(&script, format!("{LOOP_SCRIPT}# touched\n")).unwrap();

    let sup_ref = &sup;
    let restarted = wait_until(Duration::from_secs(10), || async move {
        let status = sup_ref
            .dispatch(Request::new("status").with_target("watched"))
            .await;
        (data_u64(&status, "restartCount") == Some(1)
            && data_str(&status, "state") == Some("running"))
        .then_some(status)
    })
    .await
    .expect("entry restarted after the file change");

    assert_eq!(data_str(&restarted, "lastRestartReason"), Some("file-change"));

    // One change, one restart: the count stays at 1 after a quiet period.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let status = sup
        .dispatch(Request::new("status").with_target("watched"))
        .await;
    assert_eq!(data_u64(&status, "restartCount"), Some(1));

    sup.dispatch(Request::new("stop").with_target("watched"))
        .await;
}

#[tokio::test]
async fn memory_threshold_restarts_with_reason() {
    let sandbox = Sandbox::new();
    let sup = sandbox.supervisor();
    let script = sandbox.script("hog.sh", LOOP_SCRIPT);

    // Any real process exceeds a one-byte budget; three consecutive
    // samples trip the hysteresis counter.
    let mut options = sandbox.sh_options("hog");
    options.memory_limit = Some("1b".to_string());
    let reply = sup.dispatch(start_request(&script, options)).await;
    assert!(reply.success, "{}", reply.message);

    let sup_ref = &sup;
    let status = wait_until(Duration::from_secs(10), || async move {
        let status = sup_ref
            .dispatch(Request::new("status").with_target("hog"))
            .await;
        (data_u64(&status, "restartCount") >= Some(1)).then_some(status)
    })
    .await
    .expect("threshold restart within the deadline");

    assert_eq!(data_str(&status, "lastRestartReason"), Some("memory"));

    sup.dispatch(Request::new("delete").with_target("hog")).await;
}

#[tokio::test]
async fn snapshot_restore_respawns_running_entries() {
    let sandbox = Sandbox::new();
    let sup = sandbox.supervisor();
    let script = sandbox.script("keep.sh", LOOP_SCRIPT);

    let first = sup
        .dispatch(start_request(&script, sandbox.sh_options("one")))
        .await;
    let second = sup
        .dispatch(start_request(&script, sandbox.sh_options("two")))
        .await;
    assert!(first.success && second.success);
    let id_one = data_str(&first, "id").unwrap().to_string();

    // Flush and tear the first daemon generation down.
    sup.shutdown().await;

    let snapshot = procvisor::persist::load_snapshot(&sandbox.cfg.state_file()).await;
    assert_eq!(snapshot.entries.len(), 2);

    let sup2 = sandbox.supervisor_with(snapshot.entries);
    let sup_ref = &sup2;
    let status = wait_until(Duration::from_secs(10), || async move {
        let status = sup_ref.dispatch(Request::new("status")).await;
        let all_running = {
            let entries = status.data.as_ref()?.as_array()?;
            entries.len() == 2
                && entries
                    .iter()
                    .all(|e| e.get("state").and_then(|s| s.as_str()) == Some("running"))
        };
        all_running.then_some(status)
    })
    .await
    .expect("both entries respawned");

    // Ids and specs survive the restart.
    let entries = status.data.unwrap();
    let ids: Vec<&str> = entries
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&id_one.as_str()));

    sup2.dispatch(Request::new("stop").with_target("all")).await;
}

#[tokio::test]
async fn captured_output_is_framed_and_tailed() {
    let sandbox = Sandbox::new();
    let sup = sandbox.supervisor();
    let script = sandbox.script(
        "chatty.sh",
        "echo hello-stdout\necho hello-stderr 1>&2\nwhile true; do sleep 0.2; done\n",
    );

    let reply = sup
        .dispatch(start_request(&script, sandbox.sh_options("chatty")))
        .await;
    assert!(reply.success, "{}", reply.message);

    let sup_ref = &sup;
    let logs = wait_until(Duration::from_secs(5), || async move {
        let reply = sup_ref
            .dispatch(
                Request::new("logs")
                    .with_target("chatty")
                    .with_options(procvisor::control::RequestOptions {
                        lines: Some(10),
                        ..Default::default()
                    }),
            )
            .await;
        let lines = reply.data.as_ref()?.get("lines")?.as_array()?.clone();
        (lines.len() >= 2).then_some(lines)
    })
    .await
    .expect("captured output shows up in the tail");

    let joined = logs
        .iter()
        .filter_map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(joined.contains("[INFO] [chatty] hello-stdout"), "{joined}");
    assert!(joined.contains("[ERROR] [chatty] hello-stderr"), "{joined}");

    sup.dispatch(Request::new("stop").with_target("chatty")).await;
}

#[tokio::test]
async fn spawn_failure_leaves_no_entry_behind() {
    let sandbox = Sandbox::new();
    let sup = sandbox.supervisor();
    let script = sandbox.script("plain.sh", LOOP_SCRIPT);

    let mut options = sandbox.sh_options("ghost");
    options.interpreter = Some("/nonexistent/interpreter".to_string());
    let reply = sup.dispatch(start_request(&script, options)).await;
    assert!(!reply.success);
    assert!(reply.message.contains("spawn"), "{}", reply.message);

    let status = sup.dispatch(Request::new("status")).await;
    assert_eq!(status.data.unwrap().as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn duplicate_names_are_refused_while_live() {
    let sandbox = Sandbox::new();
    let sup = sandbox.supervisor();
    let script = sandbox.script("keep.sh", LOOP_SCRIPT);

    let first = sup
        .dispatch(start_request(&script, sandbox.sh_options("api")))
        .await;
    assert!(first.success);

    let second = sup
        .dispatch(start_request(&script, sandbox.sh_options("api")))
        .await;
    assert!(!second.success);
    assert!(second.message.contains("already"), "{}", second.message);

    sup.dispatch(Request::new("stop").with_target("api")).await;
}
