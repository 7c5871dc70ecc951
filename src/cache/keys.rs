//! Typed parsing of hierarchical object-store keys.
//!
//! Artifacts are addressed as `module/platform/subscriber/filename`; the
//! cache is keyed by the three-segment prefix `module/platform/subscriber`.
//! All key parsing in the crate goes through these types so the webhook
//! handler and the read path can never disagree about key shape.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fully-qualified key of one stored artifact: exactly four non-empty
/// segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub module: String,
    pub platform: String,
    pub subscriber: String,
    pub filename: String,
}

impl ArtifactKey {
    /// Parse a raw storage key. Returns `None` for anything that is not
    /// exactly four non-empty `/`-separated segments.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut segments = raw.split('/');
        let module = segments.next().filter(|s| !s.is_empty())?;
        let platform = segments.next().filter(|s| !s.is_empty())?;
        let subscriber = segments.next().filter(|s| !s.is_empty())?;
        let filename = segments.next().filter(|s| !s.is_empty())?;
        if segments.next().is_some() {
            return None;
        }
        Some(Self {
            module: module.to_string(),
            platform: platform.to_string(),
            subscriber: subscriber.to_string(),
            filename: filename.to_string(),
        })
    }

    /// The cache prefix this artifact belongs to.
    pub fn prefix(&self) -> CachePrefix {
        CachePrefix {
            module: self.module.clone(),
            platform: self.platform.clone(),
            subscriber: self.subscriber.clone(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.module, self.platform, self.subscriber, self.filename
        )
    }
}

/// Cache key: the `module/platform/subscriber` prefix an artifact set lives
/// under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CachePrefix {
    module: String,
    platform: String,
    subscriber: String,
}

impl CachePrefix {
    pub fn new(
        module: impl Into<String>,
        platform: impl Into<String>,
        subscriber: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            platform: platform.into(),
            subscriber: subscriber.into(),
        }
    }

    /// Parse a raw prefix. Returns `None` unless the input is exactly three
    /// non-empty segments.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut segments = raw.split('/');
        let module = segments.next().filter(|s| !s.is_empty())?;
        let platform = segments.next().filter(|s| !s.is_empty())?;
        let subscriber = segments.next().filter(|s| !s.is_empty())?;
        if segments.next().is_some() {
            return None;
        }
        Some(Self::new(module, platform, subscriber))
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }
}

impl fmt::Display for CachePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.module, self.platform, self.subscriber)
    }
}

impl From<CachePrefix> for String {
    fn from(prefix: CachePrefix) -> Self {
        prefix.to_string()
    }
}

impl TryFrom<String> for CachePrefix {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        CachePrefix::parse(&raw).ok_or_else(|| format!("invalid cache prefix `{raw}`"))
    }
}
