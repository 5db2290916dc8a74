//! Turns repository references into downloadable archive locations.
//!
//! Resolution is pure: no network or file system access happens here, so the
//! same reference and branch always resolve to the same [`ArchiveLocation`].
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{consts, error::ResolutionError};

/// The archive flavour requested from the hosting service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    #[default]
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// File extension used by the hosting service for this format.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Zip => f.write_str("zip"),
            ArchiveFormat::TarGz => f.write_str("tar-gz"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown archive format `{0}`, expected `zip` or `tar-gz`")]
pub struct ParseArchiveFormatError(String);

impl FromStr for ArchiveFormat {
    type Err = ParseArchiveFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar-gz" | "tar.gz" | "tgz" => Ok(ArchiveFormat::TarGz),
            other => Err(ParseArchiveFormatError(other.to_string())),
        }
    }
}

/// A validated reference to a hosted repository.
///
/// The stored URL has any version-control suffix, trailing slash, query and
/// fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryReference {
    url: Url,
    host: String,
    owner: String,
    name: String,
}

impl RepositoryReference {
    /// Validates `reference` against the host identified by `host_marker`.
    pub fn parse(reference: &str, host_marker: &str) -> Result<Self, ResolutionError> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(ResolutionError::Empty);
        }

        // The suffix is matched case-sensitively, `.GIT` is left alone.
        let stripped = trimmed
            .strip_suffix(consts::GIT_SUFFIX)
            .unwrap_or(trimmed)
            .trim_end_matches('/');

        if host_marker.is_empty() || !stripped.contains(host_marker) {
            return Err(ResolutionError::UnsupportedHost {
                reference: trimmed.to_string(),
                host: host_marker.to_string(),
            });
        }

        let malformed = |reason: String| ResolutionError::Malformed {
            reference: trimmed.to_string(),
            reason,
        };

        let mut url = Url::parse(stripped).map_err(|err| malformed(err.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(malformed("not a hierarchical URL".to_string()));
        }
        let host = match url.host_str() {
            Some(host) => host.to_string(),
            // Local mirrors have no host.
            None if url.scheme() == "file" => String::new(),
            None => return Err(malformed("missing host".to_string())),
        };
        url.set_query(None);
        url.set_fragment(None);

        let segments: Vec<String> = url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let [.., owner, name] = segments.as_slice() else {
            return Err(ResolutionError::MissingRepository {
                reference: trimmed.to_string(),
            });
        };
        let (owner, name) = (owner.clone(), name.clone());

        Ok(Self {
            url,
            host,
            owner,
            name,
        })
    }

    /// The normalized repository URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the folder the repository contents are placed in when the
    /// caller only picks a parent directory.
    pub fn content_folder_name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A fetchable archive of one branch of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveLocation {
    repository: RepositoryReference,
    reference_name: String,
    format: ArchiveFormat,
    url: Url,
}

impl ArchiveLocation {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn repository(&self) -> &RepositoryReference {
        &self.repository
    }

    /// The branch this archive snapshots.
    pub fn reference_name(&self) -> &str {
        &self.reference_name
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// The folder the hosting service wraps the archive contents in.
    ///
    /// Only informational, extraction does not rely on the name.
    pub fn wrapper_folder_name(&self) -> String {
        format!("{}-{}", self.repository.name, self.reference_name)
    }
}

impl fmt::Display for ArchiveLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Resolves repository references for a single hosting service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveUrlResolver {
    host_marker: String,
    default_ref: String,
    format: ArchiveFormat,
}

impl Default for ArchiveUrlResolver {
    fn default() -> Self {
        Self {
            host_marker: consts::DEFAULT_HOST_MARKER.to_string(),
            default_ref: consts::DEFAULT_REF.to_string(),
            format: ArchiveFormat::default(),
        }
    }
}

impl ArchiveUrlResolver {
    /// Accept references containing `host_marker` instead of the default host.
    #[must_use]
    pub fn with_host_marker(mut self, host_marker: impl Into<String>) -> Self {
        self.host_marker = host_marker.into();
        self
    }

    /// Branch used when [`Self::resolve`] is called without one.
    #[must_use]
    pub fn with_default_ref(mut self, default_ref: impl Into<String>) -> Self {
        self.default_ref = default_ref.into();
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: ArchiveFormat) -> Self {
        self.format = format;
        self
    }

    pub fn host_marker(&self) -> &str {
        &self.host_marker
    }

    pub fn default_ref(&self) -> &str {
        &self.default_ref
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Validates a reference without resolving an archive for it.
    pub fn parse_reference(&self, reference: &str) -> Result<RepositoryReference, ResolutionError> {
        RepositoryReference::parse(reference, &self.host_marker)
    }

    /// Resolves `reference` to the archive of `reference_name`, or of the
    /// default branch when no branch is given. No other branch is tried.
    pub fn resolve(
        &self,
        reference: &str,
        reference_name: Option<&str>,
    ) -> Result<ArchiveLocation, ResolutionError> {
        let repository = self.parse_reference(reference)?;
        let reference_name = reference_name.unwrap_or(&self.default_ref);
        validate_ref(reference_name)?;

        let archive = format!(
            "{}/{}/{}.{}",
            repository.url.as_str().trim_end_matches('/'),
            consts::ARCHIVE_PATH,
            reference_name,
            self.format.extension()
        );
        let url = Url::parse(&archive).map_err(|err| ResolutionError::Malformed {
            reference: archive.clone(),
            reason: err.to_string(),
        })?;

        Ok(ArchiveLocation {
            repository,
            reference_name: reference_name.to_string(),
            format: self.format,
            url,
        })
    }
}

/// Resolves `reference` against the default host, branch and format.
pub fn resolve(
    reference: &str,
    reference_name: Option<&str>,
) -> Result<ArchiveLocation, ResolutionError> {
    ArchiveUrlResolver::default().resolve(reference, reference_name)
}

fn validate_ref(reference_name: &str) -> Result<(), ResolutionError> {
    let invalid = reference_name.is_empty()
        || reference_name.starts_with('/')
        || reference_name.ends_with('/')
        || reference_name.contains("..")
        || reference_name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '?' | '#' | '\\'));
    if invalid {
        Err(ResolutionError::InvalidRef(reference_name.to_string()))
    } else {
        Ok(())
    }
}
