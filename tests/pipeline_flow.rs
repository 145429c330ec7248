//! Pipeline flow tests over the real queue and stores, no network.
//!
//! Pages are seeded as already fetched (HTML in place), then the worker
//! pool drives extract -> cluster build -> check runner to a terminal
//! scan status.

use aeoscan::config::ScanSettings;
use aeoscan::models::{DiscoveryMethod, Page, PageLifecycle, RepresentativeRole, Scan, ScanStatus};
use aeoscan::pipeline::Pipeline;
use aeoscan::queue::{EnqueueOptions, JobPayload};

use tempfile::TempDir;

fn blog_html(title: &str, words: usize) -> String {
    let body = "insight ".repeat(words);
    format!(
        "<html><head><title>{title}</title>\
         <meta name=\"description\" content=\"a post\">\
         <script type=\"application/ld+json\">{{\"@type\":\"BlogPosting\"}}</script>\
         </head><body><h1>{title}</h1><h2>Details</h2><p>{body}</p>\
         <a href=\"/blog/other\">other</a></body></html>"
    )
}

fn seeded_pipeline() -> (std::sync::Arc<Pipeline>, Scan, TempDir) {
    let dir = TempDir::new().unwrap();
    let settings = ScanSettings {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let pipeline = Pipeline::new(settings).unwrap();

    let scan = Scan::new("example.com".to_string());
    pipeline.scans().create(&scan).unwrap();
    (pipeline, scan, dir)
}

fn seed_fetched_page(pipeline: &Pipeline, scan_id: &str, url: &str, order: u32, html: String) {
    let mut page = Page::new(
        scan_id.to_string(),
        url.to_string(),
        DiscoveryMethod::Sitemap,
        0,
        order,
    );
    pipeline.pages().insert(&page).unwrap();
    page.http_status = Some(200);
    page.html = Some(html);
    page.advance_lifecycle(PageLifecycle::Fetched);
    pipeline.pages().update(&page).unwrap();

    pipeline
        .queue()
        .enqueue(
            &JobPayload::Extract {
                scan_id: scan_id.to_string(),
                url: url.to_string(),
            },
            EnqueueOptions::default(),
        )
        .unwrap();
}

#[tokio::test]
async fn extraction_drives_scan_to_completion() {
    let (pipeline, scan, _dir) = seeded_pipeline();

    for (i, slug) in ["alpha", "beta", "gamma"].iter().enumerate() {
        seed_fetched_page(
            &pipeline,
            &scan.id,
            &format!("https://example.com/blog/{}", slug),
            i as u32,
            blog_html(slug, 200),
        );
    }

    let finished = pipeline.clone().run_until_complete(&scan.id).await.unwrap();
    assert_eq!(finished.status, ScanStatus::Completed);

    let counts = pipeline.pages().counts(&scan.id).unwrap();
    assert_eq!(counts.extracted, 3);
    assert!(counts.all_terminal());

    // The three posts share one template cluster.
    let clusters = pipeline.cluster_store().list_for_scan(&scan.id).unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].member_count, 3);
    assert_eq!(clusters[0].name, "Blog posts");

    let mappings = pipeline
        .cluster_store()
        .pages_for_cluster(&scan.id, &clusters[0].key)
        .unwrap();
    assert!(mappings
        .iter()
        .any(|m| m.role == RepresentativeRole::Best));
    assert!(mappings
        .iter()
        .any(|m| m.role == RepresentativeRole::Worst));

    // The queue drained completely.
    assert_eq!(pipeline.queue().live_count(&scan.id).unwrap(), 0);
}

#[tokio::test]
async fn page_without_html_fails_but_scan_completes() {
    let (pipeline, scan, _dir) = seeded_pipeline();

    seed_fetched_page(
        &pipeline,
        &scan.id,
        "https://example.com/good",
        0,
        blog_html("good", 150),
    );

    // A page that reached the extract stage with no stored HTML.
    let mut broken = Page::new(
        scan.id.clone(),
        "https://example.com/broken".to_string(),
        DiscoveryMethod::Sitemap,
        0,
        1,
    );
    pipeline.pages().insert(&broken).unwrap();
    broken.advance_lifecycle(PageLifecycle::Fetched);
    pipeline.pages().update(&broken).unwrap();
    pipeline
        .queue()
        .enqueue(
            &JobPayload::Extract {
                scan_id: scan.id.clone(),
                url: "https://example.com/broken".to_string(),
            },
            EnqueueOptions::default(),
        )
        .unwrap();

    let finished = pipeline.clone().run_until_complete(&scan.id).await.unwrap();

    // Page-level failure never fails the scan.
    assert_eq!(finished.status, ScanStatus::Completed);
    let counts = pipeline.pages().counts(&scan.id).unwrap();
    assert_eq!(counts.extracted, 1);
    assert_eq!(counts.failed, 1);
}

#[tokio::test]
async fn duplicate_extract_jobs_collapse() {
    let (pipeline, scan, _dir) = seeded_pipeline();

    seed_fetched_page(
        &pipeline,
        &scan.id,
        "https://example.com/solo",
        0,
        blog_html("solo", 120),
    );

    // Second enqueue with the same idempotency key is a no-op.
    let enqueued = pipeline
        .queue()
        .enqueue(
            &JobPayload::Extract {
                scan_id: scan.id.clone(),
                url: "https://example.com/solo".to_string(),
            },
            EnqueueOptions::default(),
        )
        .unwrap();
    assert!(!enqueued);
    assert_eq!(pipeline.queue().live_count(&scan.id).unwrap(), 1);

    let finished = pipeline.clone().run_until_complete(&scan.id).await.unwrap();
    assert_eq!(finished.status, ScanStatus::Completed);
}
