//! Integration Tests - End-to-end Exporter Component Testing
//!
//! Tests the interaction between usecases, ports, and mock adapters.
//! Uses mockall for trait mocking and tokio::test for async tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use mockall::mock;
use serde_json::json;

use metric_bridge::adapters::metrics::{HttpServer, ProcessMetrics, RegistryManager};
use metric_bridge::adapters::sources::DatabaseCollector;
use metric_bridge::config::jobs::{JobBuilder, ServiceCatalog};
use metric_bridge::domain::error::{CollectError, JobSourceError, PushError, SchedulerError};
use metric_bridge::domain::job::{Category, CategoryParams, JobOrigin, JobSpec};
use metric_bridge::domain::metric::{Labels, MetricSample, MetricSet};
use metric_bridge::domain::outcome::{ExecutionOutcome, FailureKind, JobEvent, MissReason, RunStatus};
use metric_bridge::ports::collector::{AdapterTable, SourceAdapter};
use metric_bridge::ports::events::JobListener;
use metric_bridge::ports::job_source::{JobDefinition, JobSource};
use metric_bridge::ports::push::{GroupingKey, PushDestination, PushMode};
use metric_bridge::ports::registry::MetricStore;
use metric_bridge::ports::sources::{QueryResult, SqlConnector, SqlSession, SqlValue};
use metric_bridge::usecases::control::ControlApi;
use metric_bridge::usecases::dispatcher::PushDispatcher;
use metric_bridge::usecases::reconciler::Reconciler;
use metric_bridge::usecases::scheduler::{JobScheduler, SchedulerConfig};
use metric_bridge::usecases::supervisor::{DeadlinePolicy, ExecutionSupervisor};

// ---- Mock Definitions ----

mock! {
    pub Connector {}

    #[async_trait::async_trait]
    impl SqlConnector for Connector {
        async fn connect(&self, service: &str) -> Result<Box<dyn SqlSession>, CollectError>;
    }
}

mock! {
    pub Adapter {}

    #[async_trait::async_trait]
    impl SourceAdapter for Adapter {
        fn category(&self) -> Category;
        async fn collect(&self, job: &JobSpec) -> Result<MetricSet, CollectError>;
    }
}

mock! {
    pub Definitions {}

    #[async_trait::async_trait]
    impl JobSource for Definitions {
        async fn fetch(&self) -> Result<Vec<JobDefinition>, JobSourceError>;
    }
}

// ---- Hand-written doubles ----

struct SeededSession;

#[async_trait]
impl SqlSession for SeededSession {
    async fn query(&mut self, _statement: &str) -> Result<QueryResult, CollectError> {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        Ok(QueryResult {
            columns: vec!["metric".into(), "label1".into(), "label2".into(), "ts".into()],
            rows: vec![vec![
                SqlValue::Int(42),
                SqlValue::Text("a".to_string()),
                SqlValue::Text("b".to_string()),
                SqlValue::Timestamp(ts),
            ]],
        })
    }
}

/// Adapter that sleeps before returning an empty set.
struct SlowAdapter(Duration);

#[async_trait]
impl SourceAdapter for SlowAdapter {
    fn category(&self) -> Category {
        Category::Database
    }

    async fn collect(&self, _job: &JobSpec) -> Result<MetricSet, CollectError> {
        tokio::time::sleep(self.0).await;
        Ok(MetricSet::new())
    }
}

/// Adapter that sleeps per call (the last delay repeats), tracks how
/// many collections overlap and labels its sample with the statement.
struct TrackingAdapter {
    delays: Vec<Duration>,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl TrackingAdapter {
    fn new(delays: &[Duration]) -> Arc<Self> {
        Arc::new(Self {
            delays: delays.to_vec(),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for TrackingAdapter {
    fn category(&self) -> Category {
        Category::Database
    }

    async fn collect(&self, job: &JobSpec) -> Result<MetricSet, CollectError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .delays
            .get(call)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default();

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        let statement = match &job.params {
            CategoryParams::Database { statement, .. } => statement.clone(),
            _ => String::new(),
        };
        let mut set = MetricSet::new();
        set.insert(MetricSample::new(
            "warehouse.metric",
            labels(&[("statement", &statement)]),
            (call + 1) as f64,
            chrono::Utc::now(),
        ));
        Ok(set)
    }
}

/// Push destination that records calls and optionally fails.
struct Recorder {
    name: String,
    fail: bool,
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    fn new(name: &str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn result(&self) -> Result<(), PushError> {
        if self.fail {
            Err(PushError::Rejected {
                destination: self.name.clone(),
                status: 500,
                body: "down".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PushDestination for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> PushMode {
        PushMode::Gateway
    }

    async fn push(&self, key: &GroupingKey, metrics: &MetricSet) -> Result<(), PushError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("push {key} series={}", metrics.series_count()));
        self.result()
    }

    async fn delete(&self, key: &GroupingKey) -> Result<(), PushError> {
        self.calls.lock().unwrap().push(format!("delete {key}"));
        self.result()
    }
}

#[derive(Default)]
struct EventLog(Mutex<Vec<JobEvent>>);

impl EventLog {
    fn missed(&self) -> Vec<(String, MissReason)> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                JobEvent::Missed { job_id, reason } => Some((job_id.clone(), *reason)),
                _ => None,
            })
            .collect()
    }

    fn executed(&self) -> usize {
        self.outcomes().len()
    }

    fn outcomes(&self) -> Vec<ExecutionOutcome> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                JobEvent::Executed(outcome) => Some(outcome.clone()),
                _ => None,
            })
            .collect()
    }

    fn executed_jobs(&self) -> Vec<String> {
        self.outcomes().into_iter().map(|o| o.job_id).collect()
    }
}

impl JobListener for EventLog {
    fn on_event(&self, event: &JobEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

// ---- Helpers ----

fn builder() -> JobBuilder {
    let catalog = ServiceCatalog::default()
        .with_source("Warehouse", Category::Database, chrono_tz::Tz::UTC)
        .with_push("gw");
    JobBuilder::new(catalog, BTreeMap::new())
}

fn db_definition(id: &str, statement: &str, push: &[&str]) -> JobDefinition {
    JobDefinition {
        id: id.to_string(),
        body: json!({
            "services": {"source": ["Warehouse"], "push": push},
            "interval_minutes": 5,
            "statement": statement,
            "value_columns": ["metric"],
            "timestamp_column": "ts",
        }),
    }
}

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn no_deadlines() -> DeadlinePolicy {
    DeadlinePolicy {
        enabled: false,
        ..DeadlinePolicy::default()
    }
}

fn scheduler_with(
    adapter: Arc<dyn SourceAdapter>,
    destinations: Vec<Arc<dyn PushDestination>>,
    policy: DeadlinePolicy,
) -> (JobScheduler, Arc<dyn MetricStore>) {
    scheduler_with_config(adapter, destinations, policy, SchedulerConfig::default())
}

fn scheduler_with_config(
    adapter: Arc<dyn SourceAdapter>,
    destinations: Vec<Arc<dyn PushDestination>>,
    policy: DeadlinePolicy,
    config: SchedulerConfig,
) -> (JobScheduler, Arc<dyn MetricStore>) {
    let store: Arc<dyn MetricStore> = Arc::new(RegistryManager::new());
    let supervisor = ExecutionSupervisor::new(
        AdapterTable::new().with(adapter),
        Arc::clone(&store),
        PushDispatcher::new(destinations),
        policy,
    );
    let scheduler = JobScheduler::new(config, supervisor, Arc::clone(&store));
    (scheduler, store)
}

// ---- Integration Tests ----

#[tokio::test]
async fn test_db_query_end_to_end() {
    let mut connector = MockConnector::new();
    connector
        .expect_connect()
        .times(1)
        .returning(|_| Ok(Box::new(SeededSession) as Box<dyn SqlSession>));

    let recorder = Recorder::new("gw", false);
    let store: Arc<dyn MetricStore> = Arc::new(RegistryManager::new());
    let supervisor = ExecutionSupervisor::new(
        AdapterTable::new().with(Arc::new(DatabaseCollector::new(Arc::new(connector)))),
        Arc::clone(&store),
        PushDispatcher::new([recorder.clone() as Arc<dyn PushDestination>]),
        DeadlinePolicy::default(),
    );

    let spec = builder()
        .build(
            &db_definition("db_query", "SELECT value AS metric, label1, label2, ts FROM metrics", &["gw"]),
            JobOrigin::Local,
        )
        .unwrap();
    store.register(&spec.id);

    let outcome = supervisor.execute(&Arc::new(spec), None).await;
    assert_eq!(outcome.status, RunStatus::Completed { series: 1 });
    assert!(outcome.push_failures.is_empty());

    let snapshot = store.snapshot("db_query").unwrap();
    let sample = snapshot
        .get("warehouse.metric", &labels(&[("label1", "a"), ("label2", "b")]))
        .unwrap();
    assert!((sample.value - 42.0).abs() < f64::EPSILON);
    assert_eq!(sample.timestamp.to_rfc3339(), "2024-01-02T03:04:05+00:00");

    let text = store.render_job("db_query").unwrap();
    assert!(text.contains(r#"warehouse_metric{label1="a",label2="b"} 42"#));

    assert_eq!(recorder.calls(), vec!["push job=db_query series=1".to_string()]);
}

#[tokio::test]
async fn test_failed_run_keeps_previous_snapshot() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut adapter = MockAdapter::new();
    adapter.expect_category().return_const(Category::Database);
    adapter.expect_collect().returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            let mut set = MetricSet::new();
            set.insert(MetricSample::new("warehouse.metric", Labels::new(), 7.0, chrono::Utc::now()));
            Ok(set)
        } else {
            Err(CollectError::SourceConnection {
                service: "Warehouse".to_string(),
                message: "refused".to_string(),
            })
        }
    });

    let store: Arc<dyn MetricStore> = Arc::new(RegistryManager::new());
    let supervisor = ExecutionSupervisor::new(
        AdapterTable::new().with(Arc::new(adapter)),
        Arc::clone(&store),
        PushDispatcher::default(),
        DeadlinePolicy::default(),
    );
    let spec = Arc::new(builder().build(&db_definition("db_query", "SELECT 1", &[]), JobOrigin::Local).unwrap());
    store.register(&spec.id);

    assert!(supervisor.execute(&spec, None).await.is_success());

    let failed = supervisor.execute(&spec, None).await;
    assert_eq!(failed.status.failure_kind(), Some(FailureKind::SourceConnection));

    let snapshot = store.snapshot("db_query").unwrap();
    assert_eq!(snapshot.series_count(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_past_deadline_is_aborted() {
    let adapter = TrackingAdapter::new(&[Duration::ZERO, Duration::from_secs(3600)]);
    let (scheduler, store) = scheduler_with(adapter.clone(), Vec::new(), DeadlinePolicy::default());
    let process = Arc::new(ProcessMetrics::new().unwrap());
    let events = Arc::new(EventLog::default());
    scheduler.add_listener(process.clone());
    scheduler.add_listener(events.clone());

    let spec = builder().build(&db_definition("slow", "SELECT 1", &[]), JobOrigin::Local).unwrap();
    scheduler.add(spec).unwrap();

    // First run succeeds and seeds the snapshot.
    scheduler.run_now("slow").unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let seeded = store.snapshot("slow").unwrap();
    assert_eq!(seeded.series_count(), 1);

    // Next firing is one interval (5 min) out, so the deadline is 295s.
    scheduler.run_now("slow").unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;

    let outcomes = events.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[1].status, RunStatus::TimedOut { .. }));
    assert_eq!(outcomes[1].status.failure_kind(), Some(FailureKind::Timeout));
    assert!(Arc::ptr_eq(&seeded, &store.snapshot("slow").unwrap()));
    assert_eq!(
        process
            .job_failures
            .with_label_values(&["slow", "database", "timeout"])
            .get(),
        1
    );
    assert_eq!(adapter.calls(), 2);
    assert!(!scheduler.get_job("slow").unwrap().running);
}

#[tokio::test(start_paused = true)]
async fn test_runs_of_one_job_never_overlap() {
    let (scheduler, _store) = scheduler_with(
        Arc::new(SlowAdapter(Duration::from_secs(600))),
        Vec::new(),
        no_deadlines(),
    );
    let events = Arc::new(EventLog::default());
    scheduler.add_listener(events.clone());

    let spec = builder().build(&db_definition("db_query", "SELECT 1", &[]), JobOrigin::Local).unwrap();
    scheduler.add(spec).unwrap();
    scheduler.resume_all();

    let first = scheduler.run_now("db_query").unwrap();
    assert!(first.running);

    let second = scheduler.run_now("db_query");
    assert_eq!(second.unwrap_err(), SchedulerError::AlreadyRunning("db_query".to_string()));
    assert_eq!(
        events.missed(),
        vec![("db_query".to_string(), MissReason::AlreadyRunning)]
    );

    tokio::time::sleep(Duration::from_secs(601)).await;
    assert!(!scheduler.get_job("db_query").unwrap().running);
    assert_eq!(events.executed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_readded_job_waits_for_inflight_run() {
    let adapter = TrackingAdapter::new(&[Duration::from_secs(600)]);
    let config = SchedulerConfig {
        heavy_workers: 4,
        ..SchedulerConfig::default()
    };
    let (scheduler, store) = scheduler_with_config(adapter.clone(), Vec::new(), no_deadlines(), config);
    let spec = builder().build(&db_definition("db_query", "SELECT 1", &[]), JobOrigin::Local).unwrap();

    scheduler.add(spec.clone()).unwrap();
    scheduler.run_now("db_query").unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    scheduler.remove("db_query").unwrap();
    let readded = scheduler.add(spec).unwrap();
    assert!(readded.running);
    assert_eq!(
        scheduler.run_now("db_query").unwrap_err(),
        SchedulerError::AlreadyRunning("db_query".to_string())
    );

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(adapter.calls(), 1);
    assert!(!scheduler.get_job("db_query").unwrap().running);
    // The removed job's run published nothing into the new registry.
    assert!(store.snapshot("db_query").unwrap().is_empty());

    scheduler.run_now("db_query").unwrap();
    tokio::time::sleep(Duration::from_secs(601)).await;
    assert_eq!(adapter.calls(), 2);
    assert_eq!(adapter.peak(), 1);
    assert_eq!(store.snapshot("db_query").unwrap().series_count(), 1);
}

#[tokio::test]
async fn test_scheduler_job_lifecycle() {
    let (scheduler, store) = scheduler_with(
        Arc::new(SlowAdapter(Duration::ZERO)),
        Vec::new(),
        no_deadlines(),
    );
    let spec = builder().build(&db_definition("db_query", "SELECT 1", &[]), JobOrigin::Local).unwrap();

    scheduler.add(spec.clone()).unwrap();
    assert!(store.contains("db_query"));
    assert_eq!(
        scheduler.add(spec).unwrap_err(),
        SchedulerError::Duplicate("db_query".to_string())
    );

    let paused = scheduler.pause("db_query").unwrap();
    assert!(paused.paused);
    assert!(paused.next_run_time.is_none());

    let resumed = scheduler.resume("db_query").unwrap();
    assert!(!resumed.paused);
    assert!(resumed.next_run_time.is_some());

    scheduler.remove("db_query").unwrap();
    assert!(!store.contains("db_query"));
    assert_eq!(
        scheduler.get_job("db_query").unwrap_err(),
        SchedulerError::NotFound("db_query".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconciliation_applies_minimal_changes() {
    let current: Arc<Mutex<Vec<JobDefinition>>> = Arc::new(Mutex::new(vec![
        db_definition("ext_a", "SELECT 1", &["gw"]),
        db_definition("ext_b", "SELECT 2", &["gw"]),
        db_definition("ext_c", "SELECT 3", &["gw"]),
    ]));
    let served = Arc::clone(&current);
    let mut source = MockDefinitions::new();
    source
        .expect_fetch()
        .returning(move || Ok(served.lock().unwrap().clone()));

    let mut adapter = MockAdapter::new();
    adapter.expect_category().return_const(Category::Database);
    adapter.expect_collect().returning(|_| Ok(MetricSet::new()));

    let recorder = Recorder::new("gw", false);
    let (scheduler, store) = scheduler_with(
        Arc::new(adapter),
        vec![recorder.clone() as Arc<dyn PushDestination>],
        no_deadlines(),
    );
    let events = Arc::new(EventLog::default());
    scheduler.add_listener(events.clone());
    let local = builder()
        .build(&db_definition("local_job", "SELECT 0", &[]), JobOrigin::Local)
        .unwrap();
    scheduler.add(local).unwrap();

    let mut reconciler = Reconciler::new(
        Arc::new(source),
        builder(),
        scheduler.clone(),
        Arc::clone(&store),
        Duration::from_secs(3600),
    );

    // First tick schedules everything.
    let report = reconciler.tick().await.unwrap();
    assert_eq!(
        report.added,
        vec!["ext_a".to_string(), "ext_b".to_string(), "ext_c".to_string()]
    );
    assert_eq!(scheduler.info().job_count, 4);

    // Identical definitions leave the scheduler alone.
    let report = reconciler.tick().await.unwrap();
    assert!(!report.has_changes());
    assert_eq!(report.unchanged, 3);

    let mut set = MetricSet::new();
    set.insert(MetricSample::new("warehouse.metric", Labels::new(), 3.0, chrono::Utc::now()));
    let seeded = store.set_metrics("ext_c", set).unwrap();
    let before = scheduler.get_job("ext_c").unwrap();

    // Change one, drop one, keep one, collide with the local job.
    *current.lock().unwrap() = vec![
        db_definition("ext_a", "SELECT 10", &["gw"]),
        db_definition("ext_c", "SELECT 3", &["gw"]),
        db_definition("local_job", "SELECT 99", &[]),
    ];
    let report = reconciler.tick().await.unwrap();
    assert_eq!(report.updated, vec!["ext_a".to_string()]);
    assert_eq!(report.removed, vec!["ext_b".to_string()]);
    assert_eq!(report.rejected, vec!["local_job".to_string()]);
    assert_eq!(report.unchanged, 1);
    assert!(scheduler.get_job("ext_b").is_err());
    assert!(!scheduler.spec("local_job").unwrap().is_external());

    // The unchanged job keeps its trigger and its snapshot.
    let after = scheduler.get_job("ext_c").unwrap();
    let drift = after.next_run_time.unwrap() - before.next_run_time.unwrap();
    assert!(drift.num_milliseconds().abs() < 1000);
    assert!(Arc::ptr_eq(&seeded, &store.snapshot("ext_c").unwrap()));

    // Only the changed job runs, right away.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(events.executed_jobs(), vec!["ext_a".to_string()]);

    let deletes: Vec<String> = recorder
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("delete"))
        .collect();
    assert_eq!(
        deletes,
        vec!["delete job=ext_b".to_string(), "delete job=ext_a".to_string()]
    );

    // A definition that no longer builds is treated as absent.
    *current.lock().unwrap() = vec![
        JobDefinition {
            id: "ext_a".to_string(),
            body: json!({"services": {"source": ["Nowhere"]}, "interval_minutes": 5}),
        },
        db_definition("ext_c", "SELECT 3", &["gw"]),
    ];
    let report = reconciler.tick().await.unwrap();
    assert_eq!(report.rejected, vec!["ext_a".to_string()]);
    assert_eq!(report.removed, vec!["ext_a".to_string()]);
    assert_eq!(reconciler.known_jobs(), vec!["ext_c".to_string()]);
    assert_eq!(scheduler.info().job_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_redefined_job_runs_once_inflight_run_ends() {
    let current: Arc<Mutex<Vec<JobDefinition>>> =
        Arc::new(Mutex::new(vec![db_definition("ext_a", "SELECT 1", &["gw"])]));
    let served = Arc::clone(&current);
    let mut source = MockDefinitions::new();
    source
        .expect_fetch()
        .returning(move || Ok(served.lock().unwrap().clone()));

    let adapter = TrackingAdapter::new(&[Duration::from_secs(600)]);
    let recorder = Recorder::new("gw", false);
    let config = SchedulerConfig {
        heavy_workers: 4,
        ..SchedulerConfig::default()
    };
    let (scheduler, store) = scheduler_with_config(
        adapter.clone(),
        vec![recorder.clone() as Arc<dyn PushDestination>],
        no_deadlines(),
        config,
    );
    let mut reconciler = Reconciler::new(
        Arc::new(source),
        builder(),
        scheduler.clone(),
        Arc::clone(&store),
        Duration::from_secs(3600),
    );

    reconciler.tick().await.unwrap();
    scheduler.run_now("ext_a").unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    *current.lock().unwrap() = vec![db_definition("ext_a", "SELECT 10", &["gw"])];
    let report = reconciler.tick().await.unwrap();
    assert_eq!(report.updated, vec!["ext_a".to_string()]);
    assert_eq!(adapter.calls(), 1);

    // The old run ends at t=600 and is discarded; the owed run starts.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(adapter.calls(), 2);
    assert!(store.snapshot("ext_a").unwrap().is_empty());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(adapter.peak(), 1);
    let snapshot = store.snapshot("ext_a").unwrap();
    assert_eq!(snapshot.series_count(), 1);
    assert!(snapshot
        .get("warehouse.metric", &labels(&[("statement", "SELECT 10")]))
        .is_some());
    assert_eq!(
        recorder.calls(),
        vec![
            "delete job=ext_a".to_string(),
            "push job=ext_a series=1".to_string()
        ]
    );
}

#[tokio::test]
async fn test_reconciliation_fetch_failure_is_reported() {
    let mut source = MockDefinitions::new();
    source
        .expect_fetch()
        .returning(|| Err(JobSourceError::Unreachable("connection refused".to_string())));

    let (scheduler, store) = scheduler_with(Arc::new(SlowAdapter(Duration::ZERO)), Vec::new(), no_deadlines());
    let mut reconciler = Reconciler::new(
        Arc::new(source),
        builder(),
        scheduler,
        store,
        Duration::from_secs(60),
    );

    assert!(reconciler.tick().await.is_err());
    assert!(reconciler.known_jobs().is_empty());
}

#[tokio::test]
async fn test_push_failure_does_not_block_other_destinations() {
    let good = Recorder::new("good", false);
    let bad = Recorder::new("bad", true);
    let dispatcher = PushDispatcher::new([
        good.clone() as Arc<dyn PushDestination>,
        bad.clone() as Arc<dyn PushDestination>,
    ]);

    let mut set = MetricSet::new();
    set.insert(MetricSample::new("warehouse.metric", Labels::new(), 1.0, chrono::Utc::now()));

    let names = vec!["bad".to_string(), "good".to_string(), "missing".to_string()];
    let report = dispatcher.dispatch("db_query", &set, "east", &names).await;

    assert_eq!(report.delivered, vec!["good".to_string()]);
    assert_eq!(report.failed_names(), vec!["bad".to_string(), "missing".to_string()]);
    assert_eq!(good.calls(), vec!["push job=db_query,instance=east series=1".to_string()]);
    assert_eq!(bad.calls().len(), 1);
}

#[tokio::test]
async fn test_http_surface() {
    let (scheduler, store) = scheduler_with(Arc::new(SlowAdapter(Duration::ZERO)), Vec::new(), no_deadlines());
    let spec = builder().build(&db_definition("db_query", "SELECT 1", &[]), JobOrigin::Local).unwrap();
    scheduler.add(spec).unwrap();

    let mut set = MetricSet::new();
    set.insert(MetricSample::new("warehouse.metric", Labels::new(), 3.0, chrono::Utc::now()));
    store.set_metrics("db_query", set).unwrap();

    let app = HttpServer::router(ControlApi::new(scheduler.clone(), Arc::clone(&store)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let ready = client.get(format!("{base}/ready")).send().await.unwrap();
    assert_eq!(ready.status().as_u16(), 503);
    scheduler.resume_all();
    let ready = client.get(format!("{base}/ready")).send().await.unwrap();
    assert_eq!(ready.status().as_u16(), 200);

    let job = client.get(format!("{base}/metrics/db_query")).send().await.unwrap();
    assert_eq!(job.status().as_u16(), 200);
    assert!(job.text().await.unwrap().contains("warehouse_metric 3"));

    let missing = client.get(format!("{base}/metrics/nope")).send().await.unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    let info: serde_json::Value = client
        .get(format!("{base}/scheduler"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["state"], "running");
    assert_eq!(info["job_count"], 1);

    let paused: serde_json::Value = client
        .get(format!("{base}/scheduler/jobs/db_query/pause"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(paused["id"], "db_query");
    assert_eq!(paused["paused"], true);
}
