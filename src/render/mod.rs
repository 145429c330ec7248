//! Headless render fallback for JS-heavy pages.
//!
//! A narrow escape hatch, not a browser farm: low concurrency, a hard
//! navigation timeout, media assets blocked at launch, and a fixed
//! viewport. When the `browser` feature is off or no Chromium binary is
//! found, rendering reports unavailable and the pipeline falls back to
//! the raw HTML path.

mod heuristic;

pub use heuristic::{render_needed, RenderSignals};

use thiserror::Error;

use crate::config::RenderSettings;

/// Errors from the render fallback.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer unavailable: {0}")]
    Unavailable(String),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("render timed out after {0}s")]
    Timeout(u64),
}

/// Output of a successful render.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub html: String,
    pub final_url: Option<String>,
}

#[cfg(feature = "browser")]
pub use imp::Renderer;

#[cfg(feature = "browser")]
mod imp {
    use std::sync::Arc;
    use std::time::Duration;

    use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tracing::{debug, info, warn};

    use super::{RenderError, RenderOutcome, RenderSettings};

    /// Common Chromium executable paths to check before consulting PATH.
    const CHROME_PATHS: &[&str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    /// JavaScript that resolves once the document is interactive, used as
    /// the network-idle approximation after navigation returns.
    const WAIT_FOR_READY_SCRIPT: &str = r#"
        new Promise((resolve) => {
            if (document.readyState === 'complete' || document.readyState === 'interactive') {
                resolve(document.readyState);
            } else {
                document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
                setTimeout(() => resolve('timeout'), 10000);
            }
        })
    "#;

    /// Headless renderer holding one lazily-launched browser.
    pub struct Renderer {
        config: RenderSettings,
        user_agent: String,
        browser: Option<Arc<Mutex<Browser>>>,
    }

    impl Renderer {
        pub fn new(config: RenderSettings, user_agent: String) -> Self {
            Self {
                config,
                user_agent,
                browser: None,
            }
        }

        fn find_chrome() -> Result<std::path::PathBuf, RenderError> {
            for path in CHROME_PATHS {
                let p = std::path::Path::new(path);
                if p.exists() {
                    return Ok(p.to_path_buf());
                }
            }
            for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
                if let Ok(path) = which::which(cmd) {
                    return Ok(path);
                }
            }
            Err(RenderError::Unavailable(
                "no Chrome/Chromium binary found".to_string(),
            ))
        }

        async fn ensure_browser(&mut self) -> Result<(), RenderError> {
            if self.browser.is_some() {
                return Ok(());
            }
            if !self.config.enabled {
                return Err(RenderError::Unavailable("rendering disabled".to_string()));
            }

            let chrome_path = Self::find_chrome()?;
            info!("Launching headless browser: {}", chrome_path.display());

            let config = BrowserConfig::builder()
                .chrome_executable(chrome_path)
                // Media assets are never needed for structural signals.
                .arg("--mute-audio")
                .arg("--autoplay-policy=document-user-activation-required")
                .arg("--blink-settings=imagesEnabled=false")
                .arg("--disable-remote-fonts")
                .arg("--disable-background-networking")
                .arg("--disable-sync")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--no-sandbox")
                .arg("--disable-gpu")
                .arg(format!(
                    "--window-size={},{}",
                    self.config.viewport_width, self.config.viewport_height
                ))
                .arg(format!("--user-agent={}", self.user_agent))
                .build()
                .map_err(|e| RenderError::Launch(format!("invalid browser config: {}", e)))?;

            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| RenderError::Launch(e.to_string()))?;

            tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            self.browser = Some(Arc::new(Mutex::new(browser)));
            Ok(())
        }

        /// Render one URL under the hard timeout.
        pub async fn render(&mut self, url: &str) -> Result<RenderOutcome, RenderError> {
            self.ensure_browser().await?;

            let browser = self
                .browser
                .as_ref()
                .ok_or_else(|| RenderError::Unavailable("browser not initialized".to_string()))?
                .lock()
                .await;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| RenderError::Navigation(e.to_string()))?;

            let result = self.render_inner(&page, url).await;
            let _ = page.close().await;
            result
        }

        async fn render_inner(
            &self,
            page: &Page,
            url: &str,
        ) -> Result<RenderOutcome, RenderError> {
            debug!("Rendering {}", url);
            let nav = NavigateParams::builder()
                .url(url)
                .build()
                .map_err(|e| RenderError::Navigation(format!("invalid URL: {}", e)))?;

            let timeout = Duration::from_secs(self.config.timeout_secs);
            tokio::time::timeout(timeout, page.execute(nav))
                .await
                .map_err(|_| RenderError::Timeout(self.config.timeout_secs))?
                .map_err(|e| RenderError::Navigation(e.to_string()))?;

            // Wait for the document to settle, bounded by the same timeout.
            match tokio::time::timeout(timeout, page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()))
                .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!("Ready-state check failed for {}: {}", url, e),
                Err(_) => warn!("Timed out waiting for ready state on {}", url),
            }

            if self.config.settle_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
            }

            let final_url = page.url().await.ok().flatten().map(|u| u.to_string());
            let html = page
                .content()
                .await
                .map_err(|e| RenderError::Navigation(e.to_string()))?;

            Ok(RenderOutcome { html, final_url })
        }

        /// Drop the browser; it relaunches on the next render.
        pub async fn close(&mut self) {
            self.browser = None;
        }
    }
}

// Stub when the browser feature is disabled: rendering is unavailable and
// callers fall back to the unrendered HTML path.
#[cfg(not(feature = "browser"))]
pub struct Renderer {
    _config: RenderSettings,
}

#[cfg(not(feature = "browser"))]
impl Renderer {
    pub fn new(config: RenderSettings, _user_agent: String) -> Self {
        Self { _config: config }
    }

    pub async fn render(&mut self, _url: &str) -> Result<RenderOutcome, RenderError> {
        Err(RenderError::Unavailable(
            "browser support not compiled; rebuild with --features browser".to_string(),
        ))
    }

    pub async fn close(&mut self) {}
}
