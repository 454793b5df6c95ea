//! In-memory test harness for integration testing.
//!
//! Every test gets its own stores, broker and request service. Nothing
//! leaves the process: agents are scripted on the [`TestBroker`] and health
//! checks are answered by the [`MockHttpClient`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use arena_core::common::ContestId;
use arena_core::domains::contests::{ContestState, ContestSupervisor, MemoryContestStore};
use arena_core::kernel::jobs::MemoryJobStore;
use arena_core::kernel::{ArenaDeps, MockHttpClient, TestBroker, TestDependencies};
use tempfile::TempDir;
use test_context::AsyncTestContext;
use tokio_util::sync::CancellationToken;

/// How long a contest may take before a test gives up on it.
pub const CONTEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Test harness that wires the orchestrator against in-memory services.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let fixture = seed_contest(&ctx.contests, ContestSetup::players(2)).await.unwrap();
///     // ... test code
/// }
/// ```
pub struct TestHarness {
    pub deps: Arc<ArenaDeps>,
    pub broker: Arc<TestBroker>,
    pub http: Arc<MockHttpClient>,
    pub contests: Arc<MemoryContestStore>,
    pub jobs: Arc<MemoryJobStore>,
    pub supervisor: ContestSupervisor,
    shutdown: CancellationToken,
    _payloads: TempDir,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.shutdown.cancel();
    }
}

impl TestHarness {
    /// Harness whose participants all pass their health checks.
    pub async fn new() -> Result<Self> {
        Self::with_http(MockHttpClient::new().healthy()).await
    }

    /// Harness with a custom HTTP transport.
    pub async fn with_http(http: MockHttpClient) -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let payloads = tempfile::tempdir().context("Failed to create payload archive dir")?;
        let test_deps = TestDependencies::new()
            .mock_http(http)
            .malformed_payload_dir(payloads.path());

        let broker = test_deps.broker.clone();
        let http = test_deps.http.clone();
        let contests = test_deps.contests.clone();
        let jobs = test_deps.jobs.clone();
        let deps = test_deps.into_deps();

        let shutdown = CancellationToken::new();
        let requests = Arc::new(deps.request_service());
        tokio::spawn(requests.run(shutdown.clone()));

        Ok(Self {
            supervisor: ContestSupervisor::new(deps.clone()),
            deps,
            broker,
            http,
            contests,
            jobs,
            shutdown,
            _payloads: payloads,
        })
    }

    /// Start a contest and wait for its machine to stop.
    pub async fn run_contest(&self, contest_id: ContestId) -> Result<ContestState> {
        self.supervisor.start(contest_id).await?;
        self.finish(contest_id).await
    }

    /// Wait for an already started contest to stop.
    pub async fn finish(&self, contest_id: ContestId) -> Result<ContestState> {
        let handle = self
            .supervisor
            .take(contest_id)
            .ok_or_else(|| anyhow!("contest {} is not running", contest_id))?;
        tokio::time::timeout(CONTEST_TIMEOUT, handle.join())
            .await
            .context("contest did not finish in time")?
    }

    /// Wait until a running contest reaches `state`.
    pub async fn wait_for_state(&self, contest_id: ContestId, state: ContestState) -> Result<()> {
        let deadline = tokio::time::Instant::now() + CONTEST_TIMEOUT;
        while self.supervisor.state(contest_id) != Some(state) {
            if tokio::time::Instant::now() > deadline {
                return Err(anyhow!(
                    "contest {} never reached {} (at {:?})",
                    contest_id,
                    state,
                    self.supervisor.state(contest_id)
                ));
            }
            self.settle().await;
        }
        Ok(())
    }

    /// Give background tasks a moment to run.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
