//! Stage jobs: the unit of queued pipeline work.

use serde::{Deserialize, Serialize};

/// Pipeline stages, in flow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Fetch,
    Render,
    Extract,
    ClusterBuild,
    CheckRunner,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Fetch => "fetch",
            Self::Render => "render",
            Self::Extract => "extract",
            Self::ClusterBuild => "cluster_build",
            Self::CheckRunner => "check_runner",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discovery" => Some(Self::Discovery),
            "fetch" => Some(Self::Fetch),
            "render" => Some(Self::Render),
            "extract" => Some(Self::Extract),
            "cluster_build" => Some(Self::ClusterBuild),
            "check_runner" => Some(Self::CheckRunner),
            _ => None,
        }
    }

    /// Stages that run once per scan rather than once per page.
    pub fn is_singleton(&self) -> bool {
        matches!(self, Self::Discovery | Self::ClusterBuild | Self::CheckRunner)
    }

    pub const ALL: [Stage; 6] = [
        Stage::Discovery,
        Stage::Fetch,
        Stage::Render,
        Stage::Extract,
        Stage::ClusterBuild,
        Stage::CheckRunner,
    ];
}

/// Typed job payload, one variant per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum JobPayload {
    Discovery { scan_id: String, domain: String },
    Fetch { scan_id: String, url: String },
    Render { scan_id: String, url: String },
    Extract { scan_id: String, url: String },
    ClusterBuild { scan_id: String },
    CheckRunner { scan_id: String },
}

impl JobPayload {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Discovery { .. } => Stage::Discovery,
            Self::Fetch { .. } => Stage::Fetch,
            Self::Render { .. } => Stage::Render,
            Self::Extract { .. } => Stage::Extract,
            Self::ClusterBuild { .. } => Stage::ClusterBuild,
            Self::CheckRunner { .. } => Stage::CheckRunner,
        }
    }

    pub fn scan_id(&self) -> &str {
        match self {
            Self::Discovery { scan_id, .. }
            | Self::Fetch { scan_id, .. }
            | Self::Render { scan_id, .. }
            | Self::Extract { scan_id, .. }
            | Self::ClusterBuild { scan_id }
            | Self::CheckRunner { scan_id } => scan_id,
        }
    }

    /// Deterministic key collapsing duplicate submissions:
    /// `scanId:url` for page-level stages, `scanId:stage` for singletons.
    pub fn idempotency_key(&self) -> String {
        match self {
            Self::Discovery { scan_id, .. } => format!("{}:discovery", scan_id),
            Self::Fetch { scan_id, url } => format!("{}:fetch:{}", scan_id, url),
            Self::Render { scan_id, url } => format!("{}:render:{}", scan_id, url),
            Self::Extract { scan_id, url } => format!("{}:extract:{}", scan_id, url),
            Self::ClusterBuild { scan_id } => format!("{}:cluster_build", scan_id),
            Self::CheckRunner { scan_id } => format!("{}:check_runner", scan_id),
        }
    }
}

/// Queue-side status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    /// Exhausted retries; held for manual handling, never re-processed.
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// A claimed job as handed to a stage handler.
#[derive(Debug, Clone)]
pub struct StageJob {
    pub id: i64,
    pub payload: JobPayload,
    pub priority: i32,
    /// 1-based attempt number of the current execution.
    pub attempt: u32,
    pub max_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_keys_are_scan_scoped() {
        let fetch = JobPayload::Fetch {
            scan_id: "s1".to_string(),
            url: "https://example.com/a".to_string(),
        };
        assert_eq!(fetch.idempotency_key(), "s1:fetch:https://example.com/a");

        let cluster = JobPayload::ClusterBuild {
            scan_id: "s1".to_string(),
        };
        assert_eq!(cluster.idempotency_key(), "s1:cluster_build");
    }

    #[test]
    fn payload_round_trips_through_json() {
        let payload = JobPayload::Render {
            scan_id: "s1".to_string(),
            url: "https://example.com/app".to_string(),
        };
        let raw = serde_json::to_string(&payload).unwrap();
        let back: JobPayload = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.stage(), Stage::Render);
    }
}
