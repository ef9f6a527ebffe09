// tests/session_runtime.rs

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{drain, events_until, finished, init_tracing, options, settle, start, with_timeout};

use suitelink::connection::{ConnectionError, Credential};
use suitelink::observer::SessionEvent;
use suitelink::queue::DISCARDED_BY_RESET;
use suitelink::session::{QueueState, SuiteFilter};
use suitelink::task::{Task, TaskKind, TaskResult, TaskStatus};
use suitelink::types::{Activity, ConnectState, NodeState};
use suitelink::wire::{FileKind, News, Request, ServerReply};
use suitelink_test_utils::builders::{DefsBuilder, sample_defs, state_change, structural_change};
use suitelink_test_utils::fake_backend::{FakeBackend, default_reply};

fn args(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn startup_resets_then_loads_suite_list() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    let mut s = start(options("main"), backend).await;

    let snapshot = with_timeout(settle(&s.handle)).await;
    assert_eq!(snapshot.connect_state, ConnectState::Normal);
    assert_eq!(snapshot.activity, Activity::NoActivity);
    assert_eq!(snapshot.mirrored_suites, vec!["s1", "s2"]);
    assert_eq!(snapshot.suite_filter.loaded, vec!["s1", "s2"]);
    assert_eq!(snapshot.node_state, NodeState::Active);
    assert_eq!(record.request_names(), vec!["reset", "suite_list"]);

    let seen = drain(&mut s.events);
    let scan_begin = seen
        .iter()
        .position(|e| matches!(e, SessionEvent::ServerScanBegin(_)))
        .expect("scan begin");
    let scan_end = seen
        .iter()
        .position(|e| matches!(e, SessionEvent::ServerScanEnd))
        .expect("scan end");
    assert!(scan_begin < scan_end);
    assert!(seen.contains(&SessionEvent::ConnectStateChanged {
        state: ConnectState::Normal,
        error: None,
    }));

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn only_one_request_is_in_flight_and_commands_keep_their_order() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    let s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;

    record.close_gate();
    let mut tasks = Vec::new();
    for i in 0..5 {
        let task = s
            .handle
            .run_command(args(&["--alter", &format!("v{i}")]))
            .await
            .unwrap()
            .expect("connected session creates a task");
        tasks.push(task);
    }
    assert_eq!(s.handle.snapshot().await.unwrap().queue_state, QueueState::Dispatching);

    record.open_gate();
    with_timeout(settle(&s.handle)).await;

    assert_eq!(record.max_in_flight(), 1);
    for task in tasks.iter() {
        assert_eq!(task.status(), TaskStatus::Finished);
    }

    let sent: Vec<String> = record
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            Request::Command { args } => Some(args[1].clone()),
            _ => None,
        })
        .collect();
    assert_eq!(sent, vec!["v0", "v1", "v2", "v3", "v4"]);
    // Every command is followed up by a news poll.
    assert!(record.count("news") >= 1);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn commands_during_reset_are_rejected() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    record.close_gate();
    let s = start(options("main"), backend).await;
    with_timeout(record.wait_for_requests(1)).await;

    let task = s
        .handle
        .run_command(args(&["--ping"]))
        .await
        .unwrap()
        .expect("task created");
    assert_eq!(task.status(), TaskStatus::Rejected);
    assert_eq!(s.handle.snapshot().await.unwrap().queue_state, QueueState::ResetState);

    record.open_gate();
    with_timeout(settle(&s.handle)).await;
    assert_eq!(record.count("command"), 0);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn reset_discards_pending_tasks_and_lets_in_flight_finish() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    let s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;
    let before = record.requests().len();

    record.close_gate();
    let in_flight = s.handle.run_command(args(&["--ping"])).await.unwrap().unwrap();
    with_timeout(record.wait_for_requests(before + 1)).await;
    let pending = s.handle.run_command(args(&["--begin"])).await.unwrap().unwrap();

    s.handle.reset().await.unwrap();
    let snapshot = s.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.queue_state, QueueState::ResetState);
    assert_eq!(snapshot.activity, Activity::LoadActivity);
    assert!(snapshot.mirrored_suites.is_empty());

    assert_eq!(pending.status(), TaskStatus::Aborted);
    assert_eq!(pending.error_message().as_deref(), Some(DISCARDED_BY_RESET));

    record.open_gate();
    let snapshot = with_timeout(settle(&s.handle)).await;
    assert_eq!(in_flight.status(), TaskStatus::Finished);
    assert_eq!(snapshot.mirrored_suites, vec!["s1", "s2"]);

    let tail: Vec<_> = record.request_names().into_iter().skip(before).collect();
    // The superseded command triggers no news follow-up.
    assert_eq!(tail, vec!["command", "reset", "suite_list"]);
    assert_eq!(record.max_in_flight(), 1);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn news_triggers_sync_and_node_change_notifications() {
    init_tracing();
    let defs = sample_defs();
    let mut news_sent = false;
    let (backend, record) = FakeBackend::new(Box::new(move |request| {
        Ok(match request {
            Request::News if !news_sent => {
                news_sent = true;
                ServerReply::news(News::News)
            }
            Request::Sync => ServerReply::changes(vec![state_change("/s1/t2", NodeState::Complete)]),
            other => default_reply(&defs, other),
        })
    }));
    let mut s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;
    drain(&mut s.events);

    s.handle.refresh().await.unwrap();
    let seen = with_timeout(events_until(&mut s.events, |e| {
        matches!(e, SessionEvent::NodeChangeEnd { .. })
    }))
    .await;

    let begin = seen.iter().find_map(|e| match e {
        SessionEvent::NodeChangeBegin { path, change, .. } => Some((path.clone(), *change)),
        _ => None,
    });
    let (path, change) = begin.expect("begin precedes end");
    assert_eq!(path, "/s1/t2");
    assert!(!change.ignore);

    with_timeout(settle(&s.handle)).await;
    let mut all = seen;
    all.extend(drain(&mut s.events));
    assert!(!all.iter().any(|e| matches!(
        e,
        SessionEvent::ServerClearBegin | SessionEvent::ServerScanBegin(_)
    )));

    let names = record.request_names();
    let sync_at = names.iter().position(|n| *n == "sync").expect("sync sent");
    assert_eq!(names[sync_at - 1], "news");
    assert_eq!(names[sync_at + 1], "suite_list");

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn structural_change_clears_and_rebuilds_the_mirror() {
    init_tracing();
    let defs = sample_defs();
    let mut news_sent = false;
    let (backend, _record) = FakeBackend::new(Box::new(move |request| {
        Ok(match request {
            Request::News if !news_sent => {
                news_sent = true;
                ServerReply::news(News::News)
            }
            Request::Sync => ServerReply::changes(vec![structural_change("/s1/new")]),
            other => default_reply(&defs, other),
        })
    }));
    let mut s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;
    drain(&mut s.events);

    s.handle.refresh().await.unwrap();
    let seen = with_timeout(events_until(&mut s.events, |e| {
        matches!(e, SessionEvent::ServerScanEnd)
    }))
    .await;

    let clear = seen
        .iter()
        .position(|e| matches!(e, SessionEvent::ServerClearEnd))
        .expect("mirror cleared");
    let rescan = seen
        .iter()
        .position(|e| matches!(e, SessionEvent::ServerScanBegin(_)))
        .expect("mirror rescanned");
    assert!(clear < rescan);
    assert!(seen.contains(&SessionEvent::ActivityChanged(Activity::RescanActivity)));

    let snapshot = with_timeout(settle(&s.handle)).await;
    assert_eq!(snapshot.mirrored_suites, vec!["s1", "s2"]);
    assert_eq!(snapshot.activity, Activity::NoActivity);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn full_sync_reply_replaces_the_definition_without_a_reset() {
    init_tracing();
    let defs = sample_defs();
    let grown = DefsBuilder::new()
        .with_task("/s1/f1/t1")
        .with_task("/s1/t2")
        .with_task("/s2/t3")
        .with_task("/s3/t4")
        .build();
    let mut news_sent = false;
    let (backend, record) = FakeBackend::new(Box::new(move |request| {
        Ok(match request {
            Request::News if !news_sent => {
                news_sent = true;
                ServerReply::news(News::News)
            }
            Request::Sync => ServerReply::defs(grown.clone()).with_full_sync(true),
            other => default_reply(&defs, other),
        })
    }));
    let mut s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;
    drain(&mut s.events);

    s.handle.refresh().await.unwrap();
    let seen = with_timeout(events_until(&mut s.events, |e| {
        matches!(e, SessionEvent::ServerScanEnd)
    }))
    .await;
    assert!(seen.contains(&SessionEvent::ServerClearEnd));
    assert!(seen.contains(&SessionEvent::ActivityChanged(Activity::RescanActivity)));
    assert!(!seen.contains(&SessionEvent::ActivityChanged(Activity::LoadActivity)));

    let snapshot = with_timeout(settle(&s.handle)).await;
    assert_eq!(snapshot.mirrored_suites, vec!["s1", "s2", "s3"]);
    assert_eq!(snapshot.mirrored_nodes, 8);
    assert_eq!(snapshot.connect_state, ConnectState::Normal);
    assert_eq!(record.count("reset"), 1);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn full_sync_news_resets_the_session() {
    init_tracing();
    let defs = sample_defs();
    let mut news_sent = false;
    let (backend, record) = FakeBackend::new(Box::new(move |request| {
        Ok(match request {
            Request::News if !news_sent => {
                news_sent = true;
                ServerReply::news(News::DoFullSync)
            }
            other => default_reply(&defs, other),
        })
    }));
    let s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;

    s.handle.refresh().await.unwrap();
    with_timeout(async {
        while record.count("reset") < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    let snapshot = with_timeout(settle(&s.handle)).await;
    assert_eq!(snapshot.connect_state, ConnectState::Normal);
    assert_eq!(snapshot.mirrored_suites, vec!["s1", "s2"]);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_reset_reports_lost_connection() {
    init_tracing();
    let (backend, record) =
        FakeBackend::failing(ConnectionError::unreachable("connection refused"));
    let mut s = start(options("main"), backend).await;

    let snapshot = with_timeout(settle(&s.handle)).await;
    assert_eq!(snapshot.connect_state, ConnectState::Lost);
    assert!(snapshot.connect_error.unwrap().contains("connection refused"));
    assert_eq!(snapshot.activity, Activity::NoActivity);
    assert!(snapshot.mirrored_suites.is_empty());
    assert_eq!(record.request_names(), vec!["reset"]);

    let seen = drain(&mut s.events);
    assert!(seen.iter().any(|e| matches!(
        e,
        SessionEvent::ConnectStateChanged { state: ConnectState::Lost, error: Some(_) }
    )));

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_news_poll_loses_and_next_poll_regains_connection() {
    init_tracing();
    let defs = sample_defs();
    let down = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&down);
    let (backend, _record) = FakeBackend::new(Box::new(move |request| match request {
        Request::News if flag.load(Ordering::SeqCst) => {
            Err(ConnectionError::timeout("no answer within 30s"))
        }
        other => Ok(default_reply(&defs, other)),
    }));
    let s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;

    down.store(true, Ordering::SeqCst);
    s.handle.refresh().await.unwrap();
    let snapshot = with_timeout(settle(&s.handle)).await;
    assert_eq!(snapshot.connect_state, ConnectState::Lost);
    assert_eq!(snapshot.node_state, NodeState::Unknown);
    // The mirror survives a lost connection.
    assert_eq!(snapshot.mirrored_suites, vec!["s1", "s2"]);

    down.store(false, Ordering::SeqCst);
    s.handle.refresh().await.unwrap();
    let snapshot = with_timeout(settle(&s.handle)).await;
    assert_eq!(snapshot.connect_state, ConnectState::Normal);
    assert_eq!(snapshot.connect_error, None);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn disconnected_session_sends_nothing_until_reconnected() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    let s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;
    let before = record.requests().len();

    s.handle.disconnect().await.unwrap();
    assert!(s.handle.run_command(args(&["--ping"])).await.unwrap().is_none());
    let fetch = Task::for_node(TaskKind::History, "/s1");
    s.handle.run(fetch.clone()).await.unwrap();
    assert_eq!(fetch.wait().await, TaskStatus::Rejected);

    let snapshot = s.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connect_state, ConnectState::Disconnected);
    assert_eq!(snapshot.queue_state, QueueState::Disabled);
    assert_eq!(record.requests().len(), before);

    s.handle.connect().await.unwrap();
    let snapshot = with_timeout(settle(&s.handle)).await;
    assert_eq!(snapshot.connect_state, ConnectState::Normal);
    // The mirror is kept, so reconnecting only polls for news.
    let tail: Vec<_> = record.request_names().into_iter().skip(before).collect();
    assert_eq!(tail, vec!["news"]);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn data_fetches_are_routed_with_their_file_kind() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    let s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;

    let script = Task::for_node(TaskKind::Output, "/s1/t2");
    s.handle.run(script.clone()).await.unwrap();
    assert_eq!(finished(&script).await, TaskStatus::Finished);
    assert_eq!(script.text(), "jobout of /s1/t2");
    assert!(record.requests().contains(&Request::File {
        path: "/s1/t2".into(),
        kind: FileKind::Jobout,
    }));

    let messages = Task::for_node(TaskKind::Message, "/s1/t2");
    s.handle.run(messages.clone()).await.unwrap();
    assert_eq!(finished(&messages).await, TaskStatus::Finished);
    assert!(matches!(messages.result(), TaskResult::Lines(lines) if lines.len() == 2));

    let stats = Task::new(TaskKind::Stats);
    s.handle.run(stats.clone()).await.unwrap();
    assert_eq!(finished(&stats).await, TaskStatus::Finished);
    assert!(stats.text().contains("version: 5.0.0"));

    // Internal kinds cannot be routed by callers.
    let news = Task::new(TaskKind::News);
    s.handle.run(news.clone()).await.unwrap();
    assert_eq!(finished(&news).await, TaskStatus::Rejected);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn script_submit_is_followed_by_news() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    let s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;
    let before = record.requests().len();

    let submit = Task::script_submit("/s1/t2", args(&["echo hi"]), false);
    s.handle.run(submit.clone()).await.unwrap();
    assert_eq!(finished(&submit).await, TaskStatus::Finished);
    with_timeout(settle(&s.handle)).await;

    let tail: Vec<_> = record.request_names().into_iter().skip(before).collect();
    assert_eq!(tail, vec!["script_submit", "news"]);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn credential_change_waits_for_the_in_flight_request() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    let s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;
    let before = record.requests().len();

    record.close_gate();
    let task = s.handle.run_command(args(&["--ping"])).await.unwrap().unwrap();
    with_timeout(record.wait_for_requests(before + 1)).await;

    s.handle.set_credential(Credential::token("fresh")).await.unwrap();
    s.handle.snapshot().await.unwrap();
    assert!(record.credentials().is_empty());

    record.open_gate();
    assert_eq!(finished(&task).await, TaskStatus::Finished);
    with_timeout(settle(&s.handle)).await;
    assert_eq!(record.credentials(), vec![Credential::token("fresh")]);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn suite_filter_limits_the_mirror_and_auto_add_only_registers() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    let opts = options("main").with_suite_filter(SuiteFilter::with_suites(["s1"]));
    let s = start(opts, backend).await;

    let snapshot = with_timeout(settle(&s.handle)).await;
    assert_eq!(snapshot.mirrored_suites, vec!["s1"]);
    assert_eq!(
        record.requests()[0],
        Request::Reset {
            suites: vec!["s1".into()],
            auto_add_new: false,
        }
    );

    let mut filter = snapshot.suite_filter.clone();
    filter.auto_add_new = true;
    s.handle.update_suite_filter(filter.clone()).await.unwrap();
    with_timeout(settle(&s.handle)).await;
    assert_eq!(record.count("suite_auto_register"), 1);
    assert_eq!(record.count("reset"), 1);

    filter.suites.insert("s2".into());
    s.handle.update_suite_filter(filter).await.unwrap();
    let snapshot = with_timeout(settle(&s.handle)).await;
    assert_eq!(record.count("reset"), 2);
    assert_eq!(snapshot.mirrored_suites, vec!["s1", "s2"]);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn refresh_timer_polls_for_news() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    let opts = options("main").with_refresh_interval(Some(Duration::from_millis(20)));
    let s = start(opts, backend).await;

    with_timeout(async {
        while record.count("news") < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(s.handle.snapshot().await.unwrap().timer_running);

    s.handle.disconnect().await.unwrap();
    assert!(!s.handle.snapshot().await.unwrap().timer_running);

    s.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_task_then_releases_the_backend() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    let mut s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;
    let before = record.requests().len();

    record.close_gate();
    let in_flight = s.handle.run_command(args(&["--ping"])).await.unwrap().unwrap();
    with_timeout(record.wait_for_requests(before + 1)).await;
    let pending = s.handle.run_command(args(&["--begin"])).await.unwrap().unwrap();

    let handle = s.handle.clone();
    let shutdown = tokio::spawn(async move { handle.shutdown().await });

    assert_eq!(finished(&pending).await, TaskStatus::Aborted);
    assert!(!record.is_dropped());

    record.open_gate();
    with_timeout(shutdown).await.unwrap().unwrap();
    with_timeout(&mut s.join).await.unwrap().unwrap();

    assert!(record.is_dropped());
    assert_eq!(in_flight.status(), TaskStatus::Finished);
    assert_eq!(record.max_in_flight(), 1);

    let seen = drain(&mut s.events);
    assert_eq!(seen.last(), Some(&SessionEvent::ServerDeleted));
    assert!(s.handle.snapshot().await.is_err());
}

#[tokio::test]
async fn dropping_every_handle_shuts_the_session_down() {
    init_tracing();
    let (backend, record) = FakeBackend::healthy();
    let s = start(options("main"), backend).await;
    with_timeout(settle(&s.handle)).await;

    drop(s.handle);
    with_timeout(s.join).await.unwrap().unwrap();
    assert!(record.is_dropped());
}
