//! robots.txt parsing and path-rule evaluation.
//!
//! Rules are plain path prefixes. When several rules match a path, the
//! longest one wins regardless of whether it is an Allow or Disallow and
//! regardless of file order; an exact length tie resolves to Allow.

use std::time::Duration;

use tracing::debug;

use crate::models::Confidence;

/// How the robots.txt was obtained; drives decision confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsOrigin {
    /// Fetched and parsed.
    Fetched,
    /// Server answered 404/410: no policy exists.
    NotFound,
    /// Network or parse failure: default to allow, low confidence.
    Unavailable,
}

/// One Allow/Disallow rule.
#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    path: String,
}

/// Rules for one or more user agents.
#[derive(Debug, Clone)]
struct RuleGroup {
    agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<f64>,
}

/// The allow/deny decision for one path.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotsVerdict {
    pub allowed: bool,
    /// The winning rule, rendered as e.g. `Disallow: /admin`.
    pub matched_rule: Option<String>,
    pub confidence: Confidence,
}

/// A parsed robots.txt file.
#[derive(Debug, Clone)]
pub struct RobotsTxt {
    groups: Vec<RuleGroup>,
    /// `Sitemap:` directives, surfaced for discovery.
    pub sitemaps: Vec<String>,
    pub origin: RobotsOrigin,
}

impl RobotsTxt {
    /// Parse robots.txt text into per-user-agent rule groups.
    pub fn parse(text: &str) -> Self {
        let mut groups: Vec<RuleGroup> = Vec::new();
        let mut sitemaps = Vec::new();
        // Consecutive User-agent lines share the group that follows them.
        let mut open_group = false;

        for raw_line in text.lines() {
            let line = match raw_line.find('#') {
                Some(idx) => &raw_line[..idx],
                None => raw_line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    if !open_group || groups.is_empty() {
                        groups.push(RuleGroup {
                            agents: Vec::new(),
                            rules: Vec::new(),
                            crawl_delay: None,
                        });
                        open_group = true;
                    }
                    if let Some(group) = groups.last_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    open_group = false;
                    if value.is_empty() {
                        // "Disallow:" with no path permits everything;
                        // it contributes no rule.
                        continue;
                    }
                    if let Some(group) = groups.last_mut() {
                        group.rules.push(Rule {
                            allow: field == "allow",
                            path: value.to_string(),
                        });
                    }
                }
                "crawl-delay" => {
                    open_group = false;
                    if let (Some(group), Ok(secs)) =
                        (groups.last_mut(), value.parse::<f64>())
                    {
                        group.crawl_delay = Some(secs);
                    }
                }
                "sitemap" => {
                    sitemaps.push(value.to_string());
                }
                _ => {}
            }
        }

        Self {
            groups,
            sitemaps,
            origin: RobotsOrigin::Fetched,
        }
    }

    /// The "no robots.txt exists" policy: everything allowed.
    pub fn not_found() -> Self {
        Self {
            groups: Vec::new(),
            sitemaps: Vec::new(),
            origin: RobotsOrigin::NotFound,
        }
    }

    /// The "could not fetch or parse" policy: default allow, low confidence.
    pub fn unavailable() -> Self {
        Self {
            groups: Vec::new(),
            sitemaps: Vec::new(),
            origin: RobotsOrigin::Unavailable,
        }
    }

    /// Select the most specific group for a user agent: the group whose
    /// agent token is the longest substring of the UA, falling back to `*`.
    fn select_group(&self, user_agent: &str) -> Option<&RuleGroup> {
        let ua = user_agent.to_ascii_lowercase();
        let mut best: Option<(&RuleGroup, usize)> = None;

        for group in &self.groups {
            for agent in &group.agents {
                let specificity = if agent == "*" {
                    Some(0)
                } else if ua.contains(agent.as_str()) {
                    Some(agent.len())
                } else {
                    None
                };
                if let Some(rank) = specificity {
                    let better = match best {
                        Some((_, best_rank)) => rank > best_rank,
                        None => true,
                    };
                    if better {
                        best = Some((group, rank));
                    }
                }
            }
        }

        best.map(|(group, _)| group)
    }

    /// Evaluate a path against the rules for `user_agent`.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> RobotsVerdict {
        match self.origin {
            RobotsOrigin::NotFound => {
                return RobotsVerdict {
                    allowed: true,
                    matched_rule: None,
                    confidence: Confidence::Medium,
                }
            }
            RobotsOrigin::Unavailable => {
                return RobotsVerdict {
                    allowed: true,
                    matched_rule: None,
                    confidence: Confidence::Low,
                }
            }
            RobotsOrigin::Fetched => {}
        }

        let Some(group) = self.select_group(user_agent) else {
            return RobotsVerdict {
                allowed: true,
                matched_rule: None,
                confidence: Confidence::Medium,
            };
        };

        // Longest matching prefix wins; Allow wins an exact-length tie.
        let mut winner: Option<&Rule> = None;
        for rule in &group.rules {
            if !path.starts_with(&rule.path) {
                continue;
            }
            let better = match winner {
                Some(current) => {
                    rule.path.len() > current.path.len()
                        || (rule.path.len() == current.path.len() && rule.allow)
                }
                None => true,
            };
            if better {
                winner = Some(rule);
            }
        }

        match winner {
            Some(rule) => {
                debug!(
                    "robots: {} {} via {}: {}",
                    if rule.allow { "allow" } else { "deny" },
                    path,
                    if rule.allow { "Allow" } else { "Disallow" },
                    rule.path
                );
                RobotsVerdict {
                    allowed: rule.allow,
                    matched_rule: Some(format!(
                        "{}: {}",
                        if rule.allow { "Allow" } else { "Disallow" },
                        rule.path
                    )),
                    confidence: Confidence::High,
                }
            }
            None => RobotsVerdict {
                allowed: true,
                matched_rule: None,
                confidence: Confidence::Medium,
            },
        }
    }

    /// Crawl-delay for a user agent, if declared.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.select_group(user_agent)
            .and_then(|g| g.crawl_delay)
            .filter(|secs| *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Fetch and parse a site's robots.txt once (per scan).
pub async fn fetch_robots(
    client: &reqwest::Client,
    base_url: &str,
    timeout: Duration,
) -> RobotsTxt {
    let robots_url = format!("{}/robots.txt", base_url.trim_end_matches('/'));
    debug!("Fetching robots.txt from {}", robots_url);

    let response = match client.get(&robots_url).timeout(timeout).send().await {
        Ok(r) => r,
        Err(e) => {
            debug!("robots.txt fetch failed: {}", e);
            return RobotsTxt::unavailable();
        }
    };

    if response.status() == reqwest::StatusCode::NOT_FOUND
        || response.status() == reqwest::StatusCode::GONE
    {
        return RobotsTxt::not_found();
    }
    if !response.status().is_success() {
        return RobotsTxt::unavailable();
    }

    match response.text().await {
        Ok(text) => RobotsTxt::parse(&text),
        Err(_) => RobotsTxt::unavailable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UA: &str = "Mozilla/5.0 (compatible; aeoscan/0.3)";

    #[test]
    fn longest_match_wins_regardless_of_order() {
        // Disallow first, longer Allow afterwards: Allow wins on /private/pub.
        let robots = RobotsTxt::parse(
            "User-agent: *\nDisallow: /private\nAllow: /private/pub\n",
        );
        let verdict = robots.is_allowed(UA, "/private/pub/page");
        assert!(verdict.allowed);
        assert_eq!(verdict.confidence, Confidence::High);

        let verdict = robots.is_allowed(UA, "/private/other");
        assert!(!verdict.allowed);
        assert_eq!(verdict.matched_rule.as_deref(), Some("Disallow: /private"));

        // Same rules, opposite file order: identical outcome.
        let robots = RobotsTxt::parse(
            "User-agent: *\nAllow: /private/pub\nDisallow: /private\n",
        );
        assert!(robots.is_allowed(UA, "/private/pub/page").allowed);
        assert!(!robots.is_allowed(UA, "/private/other").allowed);
    }

    #[test]
    fn specific_agent_group_overrides_wildcard() {
        let robots = RobotsTxt::parse(
            "User-agent: *\nDisallow: /\n\nUser-agent: aeoscan\nAllow: /\n",
        );
        assert!(robots.is_allowed(UA, "/anything").allowed);
        assert!(!robots.is_allowed("SomeOtherBot/1.0", "/anything").allowed);
    }

    #[test]
    fn stacked_user_agent_lines_share_rules() {
        let robots = RobotsTxt::parse(
            "User-agent: botone\nUser-agent: bottwo\nDisallow: /secret\n",
        );
        assert!(!robots.is_allowed("botone/2.1", "/secret/x").allowed);
        assert!(!robots.is_allowed("bottwo/1.0", "/secret/x").allowed);
    }

    #[test]
    fn missing_robots_allows_with_medium_confidence() {
        let robots = RobotsTxt::not_found();
        let verdict = robots.is_allowed(UA, "/anywhere");
        assert!(verdict.allowed);
        assert_eq!(verdict.confidence, Confidence::Medium);
    }

    #[test]
    fn unavailable_robots_allows_with_low_confidence() {
        let robots = RobotsTxt::unavailable();
        let verdict = robots.is_allowed(UA, "/anywhere");
        assert!(verdict.allowed);
        assert_eq!(verdict.confidence, Confidence::Low);
    }

    #[test]
    fn empty_disallow_permits_everything() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow:\n");
        assert!(robots.is_allowed(UA, "/x").allowed);
    }

    #[test]
    fn crawl_delay_and_sitemaps_are_surfaced() {
        let robots = RobotsTxt::parse(
            "User-agent: *\nCrawl-delay: 2.5\nDisallow: /admin\n\nSitemap: https://example.com/sitemap.xml\n",
        );
        assert_eq!(
            robots.crawl_delay(UA),
            Some(Duration::from_secs_f64(2.5))
        );
        assert_eq!(robots.sitemaps, vec!["https://example.com/sitemap.xml"]);
    }

    #[test]
    fn comments_are_stripped() {
        let robots = RobotsTxt::parse(
            "# global policy\nUser-agent: * # everyone\nDisallow: /tmp # scratch\n",
        );
        assert!(!robots.is_allowed(UA, "/tmp/file").allowed);
    }

    #[test]
    fn allow_wins_exact_length_tie() {
        let robots = RobotsTxt::parse(
            "User-agent: *\nDisallow: /a/b\nAllow: /a/c\n",
        );
        // Different prefixes of equal length, only one matches each path.
        assert!(!robots.is_allowed(UA, "/a/b/x").allowed);
        assert!(robots.is_allowed(UA, "/a/c/x").allowed);

        // Identical path declared both ways: Allow wins the tie.
        let robots = RobotsTxt::parse(
            "User-agent: *\nDisallow: /dup\nAllow: /dup\n",
        );
        assert!(robots.is_allowed(UA, "/dup/x").allowed);
    }
}
