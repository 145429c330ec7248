//! Pipeline orchestration: stage handlers, chaining, and the worker pool.
//!
//! The pipeline owns explicitly constructed collaborators (queue, stores,
//! gates, fetcher, renderer) and hands them to stage handlers; there are
//! no process-wide singletons. Stage completions are routed through a
//! static adjacency table, and scan-wide triggers compare persisted page
//! counts so they survive restarts.

mod handlers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::budget::BudgetTracker;
use crate::config::ScanSettings;
use crate::discovery::DiscoveryEngine;
use crate::evidence::EvidenceRecorder;
use crate::fetcher::Fetcher;
use crate::models::{Scan, ScanStatus};
use crate::politeness::{PolitenessGate, RobotsTxt};
use crate::queue::{EnqueueOptions, FailOutcome, JobPayload, JobQueue, Stage, StageJob, StagePolicies};
use crate::render::Renderer;
use crate::repository::{
    ClusterRepository, EvidenceRepository, PageRepository, ScanRepository,
};

/// Static stage adjacency: which stage a completed stage feeds.
///
/// The fetch handler's render decision picks between the Fetch row's
/// target and the render detour; everything else follows the table as-is.
const STAGE_ADJACENCY: &[(Stage, Stage)] = &[
    (Stage::Discovery, Stage::Fetch),
    (Stage::Fetch, Stage::Extract),
    (Stage::Render, Stage::Extract),
    (Stage::Extract, Stage::ClusterBuild),
    (Stage::ClusterBuild, Stage::CheckRunner),
];

/// Look up the stage a completed stage chains into.
pub fn next_stage(stage: Stage) -> Option<Stage> {
    STAGE_ADJACENCY
        .iter()
        .find(|(from, _)| *from == stage)
        .map(|(_, to)| *to)
}

/// Seam to the external scoring/check engine, invoked once per scan after
/// the cluster build. The default implementation only finalizes status;
/// issue scope stays site-level.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    async fn run(&self, scan_id: &str) -> anyhow::Result<()>;
}

/// Default check runner: no scoring in this crate.
pub struct NoopCheckRunner;

#[async_trait]
impl CheckRunner for NoopCheckRunner {
    async fn run(&self, _scan_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The scan pipeline with all collaborators injected.
pub struct Pipeline {
    pub(crate) settings: ScanSettings,
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) scans: Arc<ScanRepository>,
    pub(crate) pages: Arc<PageRepository>,
    pub(crate) clusters: Arc<ClusterRepository>,
    pub(crate) budget: Arc<BudgetTracker>,
    pub(crate) politeness: Arc<PolitenessGate>,
    pub(crate) fetcher: Arc<Fetcher>,
    pub(crate) renderer: Arc<Mutex<Renderer>>,
    pub(crate) evidence: Arc<EvidenceRecorder>,
    pub(crate) discovery: Arc<DiscoveryEngine>,
    pub(crate) check_runner: Arc<dyn CheckRunner>,
    pub(crate) robots_client: reqwest::Client,
    /// robots.txt fetched once per scan.
    pub(crate) robots: RwLock<HashMap<String, Arc<RobotsTxt>>>,
}

impl Pipeline {
    /// Construct the pipeline and every collaborator from settings.
    pub fn new(settings: ScanSettings) -> anyhow::Result<Arc<Self>> {
        Self::with_check_runner(settings, Arc::new(NoopCheckRunner))
    }

    /// Construct with a custom check-runner seam.
    pub fn with_check_runner(
        settings: ScanSettings,
        check_runner: Arc<dyn CheckRunner>,
    ) -> anyhow::Result<Arc<Self>> {
        let db_path = settings.db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let policies = StagePolicies::defaults().with_overrides(&settings.retry);
        let queue = Arc::new(JobQueue::new(&db_path, policies)?);
        let scans = Arc::new(ScanRepository::new(&db_path)?);
        let pages = Arc::new(PageRepository::new(&db_path)?);
        let clusters = Arc::new(ClusterRepository::new(&db_path)?);
        let evidence_repo = Arc::new(EvidenceRepository::new(&db_path)?);

        let budget = Arc::new(BudgetTracker::new(scans.clone(), settings.budget.clone()));
        let politeness = Arc::new(PolitenessGate::new(settings.politeness.clone()));
        let fetcher = Arc::new(Fetcher::new(
            &settings.user_agent,
            settings.fetch.clone(),
            politeness.clone(),
        ));
        let renderer = Arc::new(Mutex::new(Renderer::new(
            settings.render.clone(),
            settings.user_agent.clone(),
        )));
        let evidence = Arc::new(EvidenceRecorder::new(
            evidence_repo,
            settings.evidence.clone(),
        ));
        let discovery = Arc::new(DiscoveryEngine::new(settings.clone()));

        let robots_client = reqwest::Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.discovery.robots_timeout_secs))
            .build()?;

        Ok(Arc::new(Self {
            settings,
            queue,
            scans,
            pages,
            clusters,
            budget,
            politeness,
            fetcher,
            renderer,
            evidence,
            discovery,
            check_runner,
            robots_client,
            robots: RwLock::new(HashMap::new()),
        }))
    }

    /// Scan store, also read by external collaborators (UI/reporting).
    pub fn scans(&self) -> &Arc<ScanRepository> {
        &self.scans
    }

    /// Page store, read by the scoring engine and LLM sampler.
    pub fn pages(&self) -> &Arc<PageRepository> {
        &self.pages
    }

    /// Cluster store, read by the scoring engine.
    pub fn cluster_store(&self) -> &Arc<ClusterRepository> {
        &self.clusters
    }

    /// Job queue handle.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Budget tracker, consulted by the LLM caller before every call.
    pub fn budget(&self) -> &Arc<BudgetTracker> {
        &self.budget
    }

    /// Create a scan for a domain and enqueue its discovery job.
    pub fn start_scan(&self, domain: &str) -> anyhow::Result<Scan> {
        let scan = Scan::new(domain.to_string());
        self.scans.create(&scan)?;
        self.queue.enqueue(
            &JobPayload::Discovery {
                scan_id: scan.id.clone(),
                domain: domain.to_string(),
            },
            EnqueueOptions::default(),
        )?;
        info!("Scan {} created for {}", scan.id, domain);
        Ok(scan)
    }

    /// Per-stage worker counts.
    fn concurrency(&self, stage: Stage) -> usize {
        let workers = &self.settings.workers;
        match stage {
            Stage::Discovery => workers.discovery_concurrency,
            Stage::Fetch => workers.fetch_concurrency,
            Stage::Render => workers.render_concurrency,
            Stage::Extract => workers.fetch_concurrency,
            Stage::ClusterBuild | Stage::CheckRunner => workers.singleton_concurrency,
        }
        .max(1)
    }

    /// Run worker tasks until the scan reaches a terminal state and the
    /// queue drains, then return the final scan record.
    pub async fn run_until_complete(self: Arc<Self>, scan_id: &str) -> anyhow::Result<Scan> {
        let mut handles = Vec::new();
        for stage in Stage::ALL {
            for _ in 0..self.concurrency(stage) {
                let pipeline = self.clone();
                let scan_id = scan_id.to_string();
                handles.push(tokio::spawn(async move {
                    pipeline.worker_loop(stage, &scan_id).await;
                }));
            }
        }
        for handle in handles {
            let _ = handle.await;
        }

        let scan = self
            .scans
            .get(scan_id)?
            .ok_or_else(|| anyhow::anyhow!("scan {} disappeared", scan_id))?;
        Ok(scan)
    }

    /// One worker: claim jobs for a stage until the scan winds down.
    async fn worker_loop(&self, stage: Stage, scan_id: &str) {
        loop {
            match self.queue.claim(stage) {
                Ok(Some(job)) => {
                    self.process(job).await;
                }
                Ok(None) => {
                    let live = self.queue.live_count(scan_id).unwrap_or(0);
                    if live == 0 {
                        break;
                    }
                    let failed = self
                        .scans
                        .get(scan_id)
                        .ok()
                        .flatten()
                        .map(|s| s.status == ScanStatus::Failed)
                        .unwrap_or(false);
                    if failed {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(150)).await;
                }
                Err(e) => {
                    warn!("Queue claim failed for {:?}: {}", stage, e);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    /// Run one claimed job through its handler and report the outcome.
    async fn process(&self, job: StageJob) {
        let stage = job.payload.stage();
        let scan_id = job.payload.scan_id().to_string();

        let result = match &job.payload {
            JobPayload::Discovery { scan_id, domain } => {
                self.handle_discovery(scan_id, domain).await
            }
            JobPayload::Fetch { scan_id, url } => self.handle_fetch(scan_id, url).await,
            JobPayload::Render { scan_id, url } => self.handle_render(scan_id, url).await,
            JobPayload::Extract { scan_id, url } => self.handle_extract(scan_id, url).await,
            JobPayload::ClusterBuild { scan_id } => self.handle_cluster_build(scan_id).await,
            JobPayload::CheckRunner { scan_id } => self.handle_check_runner(scan_id).await,
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.complete(job.id) {
                    warn!("Failed to mark job {} complete: {}", job.id, e);
                }
            }
            Err(e) => {
                error!("{:?} handler failed for scan {}: {}", stage, scan_id, e);
                match self.queue.fail(&job, &e.to_string()) {
                    Ok(FailOutcome::DeadLettered) => {
                        self.on_dead_letter(&job, &e.to_string()).await;
                    }
                    Ok(FailOutcome::Rescheduled { next_attempt }) => {
                        info!(
                            "{:?} job for scan {} rescheduled (attempt {})",
                            stage, scan_id, next_attempt
                        );
                    }
                    Err(qe) => warn!("Failed to record job failure: {}", qe),
                }
            }
        }
    }

    /// Dead-letter handling: page-level failures mark the page and keep
    /// the scan alive; orchestration-stage failures fail the scan.
    async fn on_dead_letter(&self, job: &StageJob, error: &str) {
        let scan_id = job.payload.scan_id();
        match &job.payload {
            JobPayload::Fetch { url, .. }
            | JobPayload::Render { url, .. }
            | JobPayload::Extract { url, .. } => {
                self.fail_page(scan_id, url, error).await;
            }
            JobPayload::Discovery { .. }
            | JobPayload::ClusterBuild { .. }
            | JobPayload::CheckRunner { .. } => {
                if let Err(e) = self.scans.mark_failed(scan_id, error) {
                    warn!("Failed to mark scan {} failed: {}", scan_id, e);
                }
            }
        }
    }
}
