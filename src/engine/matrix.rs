//! Region/Scope Matrix Expander
//!
//! Works out which scopes a table is enumerated in:
//!
//! 1. The client region picks the partition (commercial, GovCloud, China, ISO).
//! 2. Global tables get one synthetic `global` scope, served from the
//!    partition's default region.
//! 3. Regional tables get every enabled region matching the configured
//!    patterns (`us-*`, `eu-west-?`), narrowed to the regions the service is
//!    actually offered in. Unsupported regions are never called.
//! 4. Equality qualifiers on the `region` column narrow the result further.
//!
//! Failing to discover enabled regions fails the query: a partial region list
//! would silently hide resources.

use super::classify::glob_match;
use super::qualifier::{equality_candidates, Qualifier};
use crate::error::{Result, ScanError};
use crate::provider::Provider;
use crate::resource::{ResourceTable, ScopeKind, REGION_COLUMN};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the synthetic scope used by global tables
pub const GLOBAL_SCOPE: &str = "global";

/// AWS partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Partition {
    Aws,
    AwsUsGov,
    AwsCn,
    AwsIso,
    AwsIsoB,
}

impl Partition {
    /// Guess the partition from a region name
    pub fn from_region(region: &str) -> Self {
        if region.starts_with("us-gov") {
            Partition::AwsUsGov
        } else if region.starts_with("cn-") {
            Partition::AwsCn
        } else if region.starts_with("us-isob") {
            Partition::AwsIsoB
        } else if region.starts_with("us-iso") {
            Partition::AwsIso
        } else {
            Partition::Aws
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Aws => "aws",
            Partition::AwsUsGov => "aws-us-gov",
            Partition::AwsCn => "aws-cn",
            Partition::AwsIso => "aws-iso",
            Partition::AwsIsoB => "aws-iso-b",
        }
    }

    /// Region serving the partition's global endpoints (IAM, S3 listing, ...)
    pub fn default_region(self) -> &'static str {
        match self {
            Partition::Aws => "us-east-1",
            Partition::AwsUsGov => "us-gov-west-1",
            Partition::AwsCn => "cn-northwest-1",
            Partition::AwsIso => "us-iso-east-1",
            Partition::AwsIsoB => "us-isob-east-1",
        }
    }

    /// Hard-coded region list, for providers that cannot list regions
    pub fn known_regions(self) -> &'static [&'static str] {
        match self {
            Partition::Aws => &[
                "af-south-1",
                "ap-east-1",
                "ap-northeast-1",
                "ap-northeast-2",
                "ap-northeast-3",
                "ap-south-1",
                "ap-south-2",
                "ap-southeast-1",
                "ap-southeast-2",
                "ap-southeast-3",
                "ca-central-1",
                "eu-central-1",
                "eu-central-2",
                "eu-north-1",
                "eu-south-1",
                "eu-south-2",
                "eu-west-1",
                "eu-west-2",
                "eu-west-3",
                "me-central-1",
                "me-south-1",
                "sa-east-1",
                "us-east-1",
                "us-east-2",
                "us-west-1",
                "us-west-2",
            ],
            Partition::AwsUsGov => &["us-gov-east-1", "us-gov-west-1"],
            Partition::AwsCn => &["cn-north-1", "cn-northwest-1"],
            Partition::AwsIso => &["us-iso-east-1", "us-iso-west-1"],
            Partition::AwsIsoB => &["us-isob-east-1"],
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One place a table is enumerated in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Region(String),
    Global { endpoint_region: String },
}

impl Scope {
    /// Name shown in the `region` column
    pub fn name(&self) -> &str {
        match self {
            Scope::Region(region) => region,
            Scope::Global { .. } => GLOBAL_SCOPE,
        }
    }

    /// Region whose endpoint serves API calls for this scope
    pub fn endpoint_region(&self) -> &str {
        match self {
            Scope::Region(region) => region,
            Scope::Global { endpoint_region } => endpoint_region,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Scope::Global { .. })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Regions known to the account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionData {
    /// Every region the partition offers
    pub all: Vec<String>,
    /// Regions enabled (opted in) for the account
    pub enabled: Vec<String>,
}

impl RegionData {
    /// Fallback when the provider cannot list regions: everything in the partition
    pub fn from_partition(partition: Partition) -> Self {
        let regions: Vec<String> = partition
            .known_regions()
            .iter()
            .map(|r| r.to_string())
            .collect();
        Self {
            all: regions.clone(),
            enabled: regions,
        }
    }
}

/// Connection-level region configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSettings {
    /// Region patterns to query; empty means the client region only
    pub patterns: Vec<String>,
    /// Region used for partition detection and as the default scope
    pub client_region: String,
}

impl RegionSettings {
    pub fn new(patterns: Vec<String>, client_region: impl Into<String>) -> Self {
        Self {
            patterns,
            client_region: client_region.into(),
        }
    }

    pub fn partition(&self) -> Partition {
        Partition::from_region(&self.client_region)
    }
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self::new(Vec::new(), Partition::Aws.default_region())
    }
}

/// Expand a table into the scopes to enumerate
pub async fn expand_scopes(
    table: &ResourceTable,
    provider: &dyn Provider,
    settings: &RegionSettings,
    quals: &[Qualifier],
) -> Result<Vec<Scope>> {
    let partition = settings.partition();
    let global = Scope::Global {
        endpoint_region: partition.default_region().to_string(),
    };

    let mut scopes = match table.def.scope {
        ScopeKind::Global => vec![global],
        ScopeKind::Regional => regional_scopes(table, provider, settings).await?,
        ScopeKind::RegionalAndGlobal => {
            let mut scopes = vec![global];
            scopes.extend(regional_scopes(table, provider, settings).await?);
            scopes
        },
    };

    if let Some(wanted) = equality_candidates(quals, REGION_COLUMN) {
        scopes.retain(|scope| wanted.iter().any(|w| w.as_str() == Some(scope.name())));
    }

    tracing::debug!(
        "expand_scopes: table={}, partition={}, scopes={:?}",
        table.name,
        partition,
        scopes.iter().map(Scope::name).collect::<Vec<_>>()
    );

    Ok(scopes)
}

async fn regional_scopes(
    table: &ResourceTable,
    provider: &dyn Provider,
    settings: &RegionSettings,
) -> Result<Vec<Scope>> {
    let data = provider
        .enabled_regions(settings.partition())
        .await
        .map_err(ScanError::ScopeDiscovery)?;

    let mut regions = match_regions(&data, settings)?;

    let supported = match &table.def.supported_regions {
        Some(list) => Some(list.clone()),
        None => provider
            .service_regions(&table.def.service)
            .await
            .map_err(ScanError::ScopeDiscovery)?,
    };
    if let Some(supported) = supported {
        let before = regions.len();
        regions.retain(|r| supported.contains(r));
        if regions.len() != before {
            tracing::debug!(
                "{}: skipping {} region(s) where {} is not offered",
                table.name,
                before - regions.len(),
                table.def.service
            );
        }
    }

    Ok(regions.into_iter().map(Scope::Region).collect())
}

/// Match configured patterns against the enabled regions.
/// Literal region names that are not enabled make the configuration invalid.
pub fn match_regions(data: &RegionData, settings: &RegionSettings) -> Result<Vec<String>> {
    let patterns: Vec<&str> = if settings.patterns.is_empty() {
        vec![settings.client_region.as_str()]
    } else {
        settings.patterns.iter().map(|p| p.as_str()).collect()
    };

    for pattern in &patterns {
        let literal = !pattern.contains(&['*', '?'][..]);
        if literal && !data.enabled.iter().any(|r| r == *pattern) {
            let reason = if data.all.iter().any(|r| r == *pattern) {
                "is not enabled for this account"
            } else {
                "is not a region of this partition"
            };
            return Err(ScanError::Config(format!("region {} {}", pattern, reason)));
        }
    }

    Ok(data
        .enabled
        .iter()
        .filter(|region| patterns.iter().any(|p| glob_match(p, region)))
        .cloned()
        .collect())
}
