use std::path::PathBuf;

use rusoto_core::Region;
use serde::{Deserialize, Serialize};

use crate::s3::UploadError;

/// Where and how to reach the object store. Anything left unset falls back
/// to the AWS environment (`AWS_DEFAULT_REGION`, `AWS_PROFILE`, etc.).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// AWS region name, e.g. "eu-west-1".
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3 compatible stores (MinIO, LocalStack, ...)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Named profile from the shared credentials file.
    #[serde(default)]
    pub profile: Option<String>,
}

impl StoreConfig {
    pub fn from_path(path: PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        match ron::from_str::<StoreConfig>(&contents) {
            Ok(config) => Ok(config),
            Err(e) => Err(anyhow::Error::msg(e.to_string())),
        }
    }

    /// Values set in `other` win over values set in `self`.
    pub fn merge(self, other: StoreConfig) -> Self {
        StoreConfig {
            region: other.region.or(self.region),
            endpoint: other.endpoint.or(self.endpoint),
            profile: other.profile.or(self.profile),
        }
    }

    pub fn region(&self) -> Result<Region, UploadError> {
        match (&self.region, &self.endpoint) {
            (region, Some(endpoint)) => Ok(Region::Custom {
                name: region.clone().unwrap_or_else(|| Region::default().name().to_string()),
                endpoint: endpoint.clone(),
            }),
            (Some(region), None) => region
                .parse::<Region>()
                .map_err(|e| UploadError::RegionError(e.to_string())),
            (None, None) => Ok(Region::default()),
        }
    }
}
