//! Kubernetes-aware API version ordering.
//!
//! Versions shaped like `v<major>[alpha|beta<minor>]` order GA above beta
//! above alpha, then by major, then by minor. Anything else sorts below every
//! Kubernetes-shaped version.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stability {
    Alpha,
    Beta,
    Ga,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct KubeVersion {
    stability: Stability,
    major: u64,
    minor: u64,
}

fn parse(version: &str) -> Option<KubeVersion> {
    let rest = version.strip_prefix('v')?;
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let major = rest[..digits].parse().ok()?;
    let suffix = &rest[digits..];
    if suffix.is_empty() {
        return Some(KubeVersion { stability: Stability::Ga, major, minor: 0 });
    }
    let (stability, minor) = if let Some(minor) = suffix.strip_prefix("alpha") {
        (Stability::Alpha, minor)
    } else if let Some(minor) = suffix.strip_prefix("beta") {
        (Stability::Beta, minor)
    } else {
        return None;
    };
    if minor.is_empty() || !minor.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(KubeVersion { stability, major, minor: minor.parse().ok()? })
}

/// Orders two version strings, greater meaning newer/more stable.
pub fn compare_kube_aware(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => b.cmp(a),
    }
}

/// Picks the newest version from an underscore-delimited list such as
/// `v1alpha1_v1beta1_v1`.
pub fn latest_compatible(versions: &str) -> Option<&str> {
    versions
        .split('_')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .max_by(|a, b| compare_kube_aware(a, b))
}
