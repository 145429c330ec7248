//! Stage handlers: the work behind each queued job.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;

use crate::budget::Admission;
use crate::cluster::ClusterEngine;
use crate::discovery::base_url_for;
use crate::extract::extract_page;
use crate::fetcher::REASON_TOO_MANY_REDIRECTS;
use crate::models::{BudgetResource, Confidence, EvidenceKind, Page, PageLifecycle};
use crate::politeness::{fetch_robots, skip_reason, PolitenessGate, RobotsTxt};
use crate::queue::{EnqueueOptions, JobPayload, Stage};
use crate::render::{render_needed, RenderSignals};

use super::{next_stage, Pipeline};

impl Pipeline {
    /// Record evidence, deliberately discarding storage errors: an audit
    /// snippet never fails the pipeline.
    fn note(
        &self,
        scan_id: &str,
        page_url: &str,
        kind: EvidenceKind,
        success: bool,
        confidence: Confidence,
        content: &str,
    ) {
        let _ = self
            .evidence
            .record(scan_id, page_url, kind, success, confidence, content);
    }

    /// robots.txt for a scan, fetched once and cached.
    async fn robots_for(&self, scan_id: &str, domain: &str) -> Arc<RobotsTxt> {
        if let Some(robots) = self.robots.read().await.get(scan_id) {
            return robots.clone();
        }

        let base_url = base_url_for(domain);
        let robots = Arc::new(
            fetch_robots(
                &self.robots_client,
                &base_url,
                std::time::Duration::from_secs(self.settings.discovery.robots_timeout_secs),
            )
            .await,
        );

        // Honor a declared Crawl-delay for the scan's host.
        if let (Some(host), Some(delay)) = (
            PolitenessGate::host_of(&base_url),
            robots.crawl_delay(&self.settings.user_agent),
        ) {
            self.politeness.set_crawl_delay(&host, delay).await;
        }

        self.robots
            .write()
            .await
            .insert(scan_id.to_string(), robots.clone());
        robots
    }

    /// Enqueue the stage that follows `from` in the adjacency table.
    fn enqueue_next(
        &self,
        from: Stage,
        scan_id: &str,
        url: Option<&str>,
    ) -> anyhow::Result<()> {
        let Some(next) = next_stage(from) else {
            return Ok(());
        };
        let payload = match next {
            Stage::Fetch => JobPayload::Fetch {
                scan_id: scan_id.to_string(),
                url: url
                    .ok_or_else(|| anyhow::anyhow!("fetch stage requires a page URL"))?
                    .to_string(),
            },
            Stage::Extract => JobPayload::Extract {
                scan_id: scan_id.to_string(),
                url: url
                    .ok_or_else(|| anyhow::anyhow!("extract stage requires a page URL"))?
                    .to_string(),
            },
            Stage::ClusterBuild => JobPayload::ClusterBuild {
                scan_id: scan_id.to_string(),
            },
            Stage::CheckRunner => JobPayload::CheckRunner {
                scan_id: scan_id.to_string(),
            },
            Stage::Discovery | Stage::Render => {
                return Err(anyhow::anyhow!("{:?} is never a chained target", next))
            }
        };
        self.queue.enqueue(&payload, EnqueueOptions::default())?;
        Ok(())
    }

    /// When every page has reached a terminal lifecycle state, fire the
    /// scan-wide cluster build (exactly once; the idempotency key absorbs
    /// the race between the last few page handlers).
    fn maybe_trigger_cluster_build(&self, scan_id: &str) -> anyhow::Result<()> {
        let counts = self.pages.counts(scan_id)?;
        if counts.all_terminal() {
            debug!(
                "All {} pages terminal for scan {}; triggering cluster build",
                counts.total, scan_id
            );
            self.enqueue_next(Stage::Extract, scan_id, None)?;
        }
        Ok(())
    }

    async fn mark_page_failed(&self, scan_id: &str, url: &str, error: &str) {
        if let Ok(Some(mut page)) = self.pages.get(scan_id, url) {
            page.advance_lifecycle(PageLifecycle::Failed);
            if let Err(e) = self.pages.update(&page) {
                warn!("Failed to persist failure for {}: {}", url, e);
            }
        }
        debug!("Page {} failed permanently: {}", url, error);
        let _ = self.maybe_trigger_cluster_build(scan_id);
    }

    /// Discovery: resolve the URL set, persist pages, admit fetch jobs.
    pub(super) async fn handle_discovery(
        &self,
        scan_id: &str,
        domain: &str,
    ) -> anyhow::Result<()> {
        self.scans.mark_running(scan_id)?;
        let robots = self.robots_for(scan_id, domain).await;

        let result = self
            .discovery
            .discover(domain, &robots, &self.politeness)
            .await?;

        let root_url = base_url_for(domain);
        self.note(
            scan_id,
            &root_url,
            EvidenceKind::DiscoveryOutcome,
            true,
            Confidence::High,
            &format!(
                "discovered {} URLs (fallback_crawl: {}, robots_blocked: {})",
                result.pages.len(),
                result.used_fallback,
                result.robots_blocked
            ),
        );

        for (order, discovered) in result.pages.iter().enumerate() {
            let page = Page::new(
                scan_id.to_string(),
                discovered.url.clone(),
                discovered.method,
                discovered.depth,
                order as u32,
            );
            let inserted = self.pages.insert(&page)?;
            if !inserted {
                // Re-run after a partial failure: the admission decision
                // already happened, so only make sure the fetch job exists.
                if let Some(existing) = self.pages.get(scan_id, &discovered.url)? {
                    if existing.lifecycle == PageLifecycle::Discovered {
                        self.enqueue_next(Stage::Discovery, scan_id, Some(&discovered.url))?;
                    }
                }
                continue;
            }

            match self
                .budget
                .try_consume(scan_id, BudgetResource::PagesFetched, 1)
            {
                Admission::Granted => {
                    self.enqueue_next(Stage::Discovery, scan_id, Some(&discovered.url))?;
                }
                Admission::GrantedDegraded => {
                    self.note(
                        scan_id,
                        &discovered.url,
                        EvidenceKind::BudgetDegraded,
                        false,
                        Confidence::Low,
                        "budget store unreachable; fetch admitted fail-open",
                    );
                    self.enqueue_next(Stage::Discovery, scan_id, Some(&discovered.url))?;
                }
                Admission::Denied => {
                    self.note(
                        scan_id,
                        &discovered.url,
                        EvidenceKind::BudgetDegraded,
                        true,
                        Confidence::High,
                        "pages budget exhausted; fetch not admitted",
                    );
                    let mut page = page;
                    page.advance_lifecycle(PageLifecycle::Skipped);
                    self.pages.update(&page)?;
                }
            }
        }

        info!(
            "Discovery for scan {} admitted {} pages ({} via {})",
            scan_id,
            result.pages.len(),
            domain,
            if result.used_fallback {
                "crawl fallback"
            } else {
                "sitemap"
            }
        );
        // A scan can be all-skipped when the budget is tiny.
        self.maybe_trigger_cluster_build(scan_id)?;
        Ok(())
    }

    /// Fetch: manual-redirect GET with policy short-circuits.
    pub(super) async fn handle_fetch(&self, scan_id: &str, url: &str) -> anyhow::Result<()> {
        let Some(mut page) = self.pages.get(scan_id, url)? else {
            return Err(anyhow::anyhow!("page {} missing for scan {}", url, scan_id));
        };
        if page.lifecycle.is_terminal() {
            return Ok(());
        }

        // Policy gates, re-checked at fetch time: skip patterns first,
        // then robots (covering jobs enqueued outside discovery).
        if let Some(pattern) = skip_reason(url) {
            self.note(
                scan_id,
                url,
                EvidenceKind::RobotsVerdict,
                true,
                Confidence::High,
                &format!("skip pattern matched: {}", pattern),
            );
            page.advance_lifecycle(PageLifecycle::Skipped);
            self.pages.update(&page)?;
            self.maybe_trigger_cluster_build(scan_id)?;
            return Ok(());
        }

        let domain = self
            .scans
            .get(scan_id)?
            .map(|s| s.domain)
            .unwrap_or_else(|| url.to_string());
        let robots = self.robots_for(scan_id, &domain).await;
        let path = Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string());
        let verdict = robots.is_allowed(&self.settings.user_agent, &path);
        self.note(
            scan_id,
            url,
            EvidenceKind::RobotsVerdict,
            verdict.allowed,
            verdict.confidence,
            &format!(
                "{} {} (rule: {})",
                if verdict.allowed { "allow" } else { "deny" },
                path,
                verdict.matched_rule.as_deref().unwrap_or("none")
            ),
        );
        if !verdict.allowed {
            page.advance_lifecycle(PageLifecycle::Skipped);
            self.pages.update(&page)?;
            self.maybe_trigger_cluster_build(scan_id)?;
            return Ok(());
        }

        let result = self.fetcher.fetch(url).await;

        if result.chain.len() > 1 || !result.success {
            self.note(
                scan_id,
                url,
                EvidenceKind::RedirectChain,
                result.success,
                Confidence::High,
                &result.chain_summary(),
            );
        }
        if !result.headers.is_empty() {
            self.note(
                scan_id,
                url,
                EvidenceKind::FetchHeaders,
                result.success,
                Confidence::High,
                &result.headers_summary(),
            );
        }

        page.final_url = Some(result.final_url.clone());
        page.http_status = result.status;
        page.load_time_ms = Some(result.load_time_ms);
        page.fetched_at = Some(Utc::now());

        if !result.success {
            let reason = result.error.clone().unwrap_or_else(|| "fetch failed".into());
            let transient =
                result.status.is_none() && reason != REASON_TOO_MANY_REDIRECTS;
            if transient {
                // Network-level failure: persist what we saw and let the
                // queue's backoff retry the job.
                self.pages.update(&page)?;
                return Err(anyhow::anyhow!("transient fetch failure: {}", reason));
            }
            page.advance_lifecycle(PageLifecycle::Failed);
            self.pages.update(&page)?;
            self.maybe_trigger_cluster_build(scan_id)?;
            return Ok(());
        }

        let body = result.body.unwrap_or_default();
        let signals = RenderSignals::from_html(&body);
        page.html = Some(body);
        page.advance_lifecycle(PageLifecycle::Fetched);
        self.pages.update(&page)?;

        // Render detour: only when the heuristic demands it, rendering is
        // enabled, and the render budget admits it.
        if render_needed(&signals) && self.settings.render.enabled {
            match self
                .budget
                .try_consume(scan_id, BudgetResource::PagesRendered, 1)
            {
                Admission::Granted | Admission::GrantedDegraded => {
                    self.queue.enqueue(
                        &JobPayload::Render {
                            scan_id: scan_id.to_string(),
                            url: url.to_string(),
                        },
                        EnqueueOptions::default(),
                    )?;
                    return Ok(());
                }
                Admission::Denied => {
                    self.note(
                        scan_id,
                        url,
                        EvidenceKind::BudgetDegraded,
                        true,
                        Confidence::High,
                        "render budget exhausted; extracting raw HTML",
                    );
                }
            }
        }

        self.enqueue_next(Stage::Fetch, scan_id, Some(url))
    }

    /// Render fallback: headless pass for JS-heavy pages; failures fall
    /// back to the already-persisted raw HTML.
    pub(super) async fn handle_render(&self, scan_id: &str, url: &str) -> anyhow::Result<()> {
        let Some(mut page) = self.pages.get(scan_id, url)? else {
            return Err(anyhow::anyhow!("page {} missing for scan {}", url, scan_id));
        };

        let target = page.final_url.clone().unwrap_or_else(|| url.to_string());

        // The render's own navigation respects the same host slot/delay
        // as any other fetch.
        let outcome = match self.politeness.acquire(&target).await {
            Ok(_permit) => {
                let mut renderer = self.renderer.lock().await;
                renderer.render(&target).await
            }
            Err(e) => return Err(anyhow::anyhow!("politeness denied render: {}", e)),
        };

        match outcome {
            Ok(rendered) => {
                self.note(
                    scan_id,
                    url,
                    EvidenceKind::RenderOutcome,
                    true,
                    Confidence::High,
                    &format!("rendered {} ({} bytes)", target, rendered.html.len()),
                );
                if let Some(final_url) = rendered.final_url {
                    page.final_url = Some(final_url);
                }
                page.html = Some(rendered.html);
                page.rendered = true;
                self.pages.update(&page)?;
            }
            Err(e) => {
                // No automatic retry; the raw HTML path carries on.
                self.note(
                    scan_id,
                    url,
                    EvidenceKind::RenderOutcome,
                    false,
                    Confidence::Low,
                    &format!("render failed for {}: {}", target, e),
                );
                warn!("Render failed for {}: {}", target, e);
            }
        }

        self.enqueue_next(Stage::Render, scan_id, Some(url))
    }

    /// Extraction: HTML to typed signals.
    pub(super) async fn handle_extract(&self, scan_id: &str, url: &str) -> anyhow::Result<()> {
        let Some(mut page) = self.pages.get(scan_id, url)? else {
            return Err(anyhow::anyhow!("page {} missing for scan {}", url, scan_id));
        };
        if page.lifecycle == PageLifecycle::Extracted {
            return Ok(());
        }

        match page.html.as_deref() {
            Some(html) => {
                let page_url = page.final_url.clone().unwrap_or_else(|| url.to_string());
                page.extract = Some(extract_page(html, &page_url));
                page.advance_lifecycle(PageLifecycle::Extracted);
            }
            None => {
                page.advance_lifecycle(PageLifecycle::Failed);
            }
        }
        self.pages.update(&page)?;

        self.maybe_trigger_cluster_build(scan_id)?;
        Ok(())
    }

    /// Scan-wide cluster build over extracted pages.
    pub(super) async fn handle_cluster_build(&self, scan_id: &str) -> anyhow::Result<()> {
        let pages = self.pages.extracted_for_scan(scan_id)?;
        let engine = ClusterEngine::new(self.settings.cluster.clone());
        let (clusters, mappings) = engine.build(scan_id, &pages);
        self.clusters.replace_for_scan(scan_id, &clusters, &mappings)?;

        info!(
            "Scan {}: {} clusters over {} pages",
            scan_id,
            clusters.len(),
            pages.len()
        );
        self.enqueue_next(Stage::ClusterBuild, scan_id, None)
    }

    /// Check-runner seam, then the terminal status transition.
    pub(super) async fn handle_check_runner(&self, scan_id: &str) -> anyhow::Result<()> {
        self.check_runner.run(scan_id).await?;

        let Some(scan) = self.scans.get(scan_id)? else {
            return Err(anyhow::anyhow!("scan {} missing", scan_id));
        };
        let status = scan.terminal_status();
        self.scans.finish(scan_id, status)?;
        info!("Scan {} finished: {}", scan_id, status.as_str());
        Ok(())
    }

    /// Dead-letter path for page-level stages (see `on_dead_letter`).
    pub(super) async fn fail_page(&self, scan_id: &str, url: &str, error: &str) {
        self.mark_page_failed(scan_id, url, error).await;
    }
}
