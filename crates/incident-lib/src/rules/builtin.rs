//! Built-in classification rules for supported cluster versions

use super::table::{RuleBook, RuleSpec, RuleTable};
use crate::error::Result;
use crate::models::{EventSourceKind, NormalizedEvent};

use EventSourceKind::{Event, Pod};

/// Minor versions shipped with a rule table
pub const SUPPORTED_VERSIONS: &[&str] = &["1.27", "1.28", "1.29", "1.30", "1.31"];

/// First minor version whose registry errors report pull rate limiting
const RATE_LIMIT_SINCE_MINOR: u32 = 30;

pub const OUT_OF_MEMORY: &str = "The application ran out of memory";
pub const CRASH_LOOPING: &str = "The application is crash looping";
pub const EXITED_WITH_ERROR: &str = "The application exited with an error";
pub const IMAGE_MISSING: &str = "The container image does not exist";
pub const IMAGE_UNAUTHORIZED: &str = "The image registry rejected the credentials";
pub const IMAGE_RATE_LIMITED: &str = "The image registry is rate limiting pulls";
pub const IMAGE_PULL_FAILED: &str = "The container image could not be pulled";
pub const SECRET_MISSING: &str = "A referenced secret is missing";
pub const CONFIG_MAP_MISSING: &str = "A referenced config map is missing";
pub const CONFIG_INVALID: &str = "The container configuration is invalid";
pub const LIVENESS_FAILING: &str = "The liveness probe is failing";
pub const READINESS_FAILING: &str = "The readiness probe is failing";
pub const STARTUP_FAILING: &str = "The startup probe is failing";
pub const INSUFFICIENT_RESOURCES: &str = "The cluster does not have enough resources";
pub const UNSCHEDULABLE: &str = "The pod could not be scheduled";
pub const VOLUME_MOUNT_FAILED: &str = "A volume could not be mounted";
pub const EVICTED: &str = "The pod was evicted";
pub const LIVENESS_RESTART: &str = "The container was restarted by its liveness probe";
pub const SANDBOX_FAILED: &str = "The pod sandbox could not be created";

fn pod_name(event: &NormalizedEvent) -> String {
    format!("{}/{}", event.pod_namespace, event.pod_name)
}

fn oom_detail(event: &NormalizedEvent) -> String {
    format!(
        "A container in pod {} was killed after exceeding its memory limit (exit code {})",
        pod_name(event),
        event.exit_code.unwrap_or(137)
    )
}

fn exit_detail(event: &NormalizedEvent) -> String {
    match event.exit_code {
        Some(code) => format!(
            "A container in pod {} terminated with exit code {}",
            pod_name(event),
            code
        ),
        None => format!("A container in pod {} terminated with an error", pod_name(event)),
    }
}

fn message_detail(event: &NormalizedEvent) -> String {
    if event.message.is_empty() {
        format!("Pod {} reported {}", pod_name(event), event.reason)
    } else {
        format!("Pod {}: {}", pod_name(event), event.message)
    }
}

const fn pod_rule(
    reason: &'static str,
    pattern: &'static str,
    summary: &'static str,
    detail: fn(&NormalizedEvent) -> String,
) -> RuleSpec {
    RuleSpec {
        source: Pod,
        reason,
        pattern,
        summary,
        detail,
        primary: true,
    }
}

const fn event_rule(
    reason: &'static str,
    pattern: &'static str,
    summary: &'static str,
    primary: bool,
) -> RuleSpec {
    RuleSpec {
        source: Event,
        reason,
        pattern,
        summary,
        detail: message_detail,
        primary,
    }
}

const MISSING_IMAGE: &str = r"(?i)not found|manifest unknown|does not exist";
const UNAUTHORIZED: &str = r"(?i)unauthorized|denied|authentication required";
const RATE_LIMITED: &str = r"(?i)toomanyrequests|rate limit";

/// Rules preceding the image-pull catch-alls
const HEAD: &[RuleSpec] = &[
    pod_rule("OOMKilled", ".*", OUT_OF_MEMORY, oom_detail),
    pod_rule("CrashLoopBackOff", ".*", CRASH_LOOPING, message_detail),
    pod_rule("Error", ".*", EXITED_WITH_ERROR, exit_detail),
    pod_rule("ErrImagePull", MISSING_IMAGE, IMAGE_MISSING, message_detail),
    pod_rule("ImagePullBackOff", MISSING_IMAGE, IMAGE_MISSING, message_detail),
    pod_rule("ErrImagePull", UNAUTHORIZED, IMAGE_UNAUTHORIZED, message_detail),
    pod_rule("ImagePullBackOff", UNAUTHORIZED, IMAGE_UNAUTHORIZED, message_detail),
];

const RATE_LIMIT: &[RuleSpec] = &[
    pod_rule("ErrImagePull", RATE_LIMITED, IMAGE_RATE_LIMITED, message_detail),
    pod_rule("ImagePullBackOff", RATE_LIMITED, IMAGE_RATE_LIMITED, message_detail),
];

const TAIL: &[RuleSpec] = &[
    pod_rule("ErrImagePull", ".*", IMAGE_PULL_FAILED, message_detail),
    pod_rule("ImagePullBackOff", ".*", IMAGE_PULL_FAILED, message_detail),
    pod_rule("CreateContainerConfigError", r"(?i)secret .* not found", SECRET_MISSING, message_detail),
    pod_rule("CreateContainerConfigError", r"(?i)configmap .* not found", CONFIG_MAP_MISSING, message_detail),
    pod_rule("CreateContainerConfigError", ".*", CONFIG_INVALID, message_detail),
    event_rule("BackOff", "^Back-off restarting failed container", CRASH_LOOPING, true),
    event_rule("BackOff", "^Back-off pulling image", IMAGE_PULL_FAILED, true),
    event_rule("Unhealthy", "^Liveness probe failed", LIVENESS_FAILING, true),
    event_rule("Unhealthy", "^Readiness probe failed", READINESS_FAILING, false),
    event_rule("Unhealthy", "^Startup probe failed", STARTUP_FAILING, true),
    event_rule("FailedScheduling", r"Insufficient (cpu|memory)", INSUFFICIENT_RESOURCES, true),
    event_rule("FailedScheduling", ".*", UNSCHEDULABLE, true),
    event_rule("FailedMount", ".*", VOLUME_MOUNT_FAILED, true),
    event_rule("FailedAttachVolume", ".*", VOLUME_MOUNT_FAILED, true),
    event_rule("Evicted", ".*", EVICTED, true),
    event_rule("Killing", r"(?i)failed liveness probe", LIVENESS_RESTART, false),
    event_rule("FailedCreatePodSandBox", ".*", SANDBOX_FAILED, false),
];

/// Ordered rule declarations for one minor version
pub fn rule_specs(version: &str) -> Vec<RuleSpec> {
    let minor = version
        .split('.')
        .nth(1)
        .and_then(|m| m.parse::<u32>().ok())
        .unwrap_or(0);

    let mut specs = HEAD.to_vec();
    if minor >= RATE_LIMIT_SINCE_MINOR {
        specs.extend_from_slice(RATE_LIMIT);
    }
    specs.extend_from_slice(TAIL);
    specs
}

impl RuleBook {
    /// Compile the built-in tables for every supported version
    pub fn builtin() -> Result<Self> {
        let mut book = RuleBook::new();
        for version in SUPPORTED_VERSIONS {
            book.insert(RuleTable::new(*version, &rule_specs(version))?);
        }
        Ok(book)
    }
}
