//! Utility functions for replikv

use crate::common::Version;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Property names reserved for object metadata
const RESERVED_PROPERTIES: &[&str] = &["_additional", "_id", "id"];

/// Parse duration string (e.g., "30s", "5m", "1h", "7d")
pub fn parse_duration(s: &str) -> crate::Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else {
        s.split_at(s.len() - s.chars().last().map_or(0, char::len_utf8))
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let duration = match unit {
        "ms" => std::time::Duration::from_millis(num),
        "s" => std::time::Duration::from_secs(num),
        "m" => std::time::Duration::from_secs(num * 60),
        "h" => std::time::Duration::from_secs(num * 3600),
        "d" => std::time::Duration::from_secs(num * 86400),
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    Ok(duration)
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Issues write versions: wall-clock milliseconds, bumped so that two
/// versions from the same clock are never equal.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Version {
        let now = timestamp_now_millis();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Validate a class name: starts with an uppercase letter, then
/// alphanumerics or underscores, at most 256 chars
pub fn validate_class_name(class: &str) -> crate::Result<()> {
    let mut chars = class.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && class.len() <= 256;
    if !valid {
        return Err(crate::Error::ValidationFailed(format!(
            "invalid class name: {:?}",
            class
        )));
    }
    Ok(())
}

/// Validate a property name: not reserved, starts with a letter or
/// underscore, then alphanumerics or underscores
pub fn validate_property_name(property: &str) -> crate::Result<()> {
    if RESERVED_PROPERTIES.contains(&property) {
        return Err(crate::Error::ValidationFailed(format!(
            "property name {:?} is reserved",
            property
        )));
    }
    let mut chars = property.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && property.len() <= 231;
    if !valid {
        return Err(crate::Error::ValidationFailed(format!(
            "invalid property name: {:?}",
            property
        )));
    }
    Ok(())
}

/// Validate a tenant name (must be non-empty, reasonable length)
pub fn validate_tenant(tenant: &str) -> crate::Result<()> {
    if tenant.is_empty() || tenant.len() > 64 {
        return Err(crate::Error::ValidationFailed(
            "tenant name must be 1-64 characters".into(),
        ));
    }

    if !tenant
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(crate::Error::ValidationFailed(format!(
            "tenant name contains invalid characters: {:?}",
            tenant
        )));
    }

    Ok(())
}
