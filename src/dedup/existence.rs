/// Read-only existence checks for backup clients
use crate::{
    access::{AccessOracle, Actor, Permission},
    asset::AssetStore,
    blob_store::Checksum,
    error::MediaResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Lookups are split into batches of this many bound checksums
const LOOKUP_BATCH: usize = 500;

/// One entry of a bulk upload check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkUploadCheckItem {
    /// Client-local identifier echoed back in the result
    pub id: String,
    /// Hex or base64 encoded checksum
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkCheckStatus {
    Matched,
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUploadCheckResult {
    pub id: String,
    pub status: BulkCheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Answers "which of these files are already on the server" for the
/// actor's own library only
#[derive(Clone)]
pub struct BulkExistenceChecker {
    oracle: AccessOracle,
    assets: Arc<dyn AssetStore>,
}

impl BulkExistenceChecker {
    pub fn new(oracle: AccessOracle, assets: Arc<dyn AssetStore>) -> Self {
        Self { oracle, assets }
    }

    /// Map each checksum to the id of the actor's matching asset, if any
    pub async fn check_existing(
        &self,
        actor: &Actor,
        checksums: &[Checksum],
    ) -> MediaResult<HashMap<Checksum, Option<String>>> {
        self.oracle
            .require_permission(actor, Permission::LibraryRead, &actor.user_id)
            .await?;

        let mut found: HashMap<Checksum, Option<String>> =
            checksums.iter().map(|c| (*c, None)).collect();
        for batch in checksums.chunks(LOOKUP_BATCH) {
            for asset in self.assets.find_by_checksums(&actor.user_id, batch).await? {
                found.insert(asset.checksum, Some(asset.id));
            }
        }
        Ok(found)
    }

    /// Classify each item; malformed checksums are reported, not fatal
    pub async fn bulk_upload_check(
        &self,
        actor: &Actor,
        items: &[BulkUploadCheckItem],
    ) -> MediaResult<Vec<BulkUploadCheckResult>> {
        let parsed: Vec<Option<Checksum>> = items
            .iter()
            .map(|item| Checksum::parse(&item.checksum).ok())
            .collect();
        let valid: Vec<Checksum> = parsed.iter().flatten().copied().collect();

        let existing = self.check_existing(actor, &valid).await?;

        Ok(items
            .iter()
            .zip(parsed)
            .map(|(item, checksum)| match checksum {
                None => BulkUploadCheckResult {
                    id: item.id.clone(),
                    status: BulkCheckStatus::Unmatched,
                    asset_id: None,
                    reason: Some("invalid-checksum".to_string()),
                },
                Some(checksum) => match existing.get(&checksum).cloned().flatten() {
                    Some(asset_id) => BulkUploadCheckResult {
                        id: item.id.clone(),
                        status: BulkCheckStatus::Matched,
                        asset_id: Some(asset_id),
                        reason: Some("duplicate".to_string()),
                    },
                    None => BulkUploadCheckResult {
                        id: item.id.clone(),
                        status: BulkCheckStatus::Unmatched,
                        asset_id: None,
                        reason: None,
                    },
                },
            })
            .collect())
    }

    /// Device asset ids already backed up from `device_id`
    pub async fn check_existing_device_assets(
        &self,
        actor: &Actor,
        device_id: &str,
        device_asset_ids: &[String],
    ) -> MediaResult<Vec<String>> {
        self.oracle
            .require_permission(actor, Permission::LibraryRead, &actor.user_id)
            .await?;

        let mut existing = Vec::new();
        for batch in device_asset_ids.chunks(LOOKUP_BATCH) {
            existing.extend(
                self.assets
                    .existing_device_assets(&actor.user_id, device_id, batch)
                    .await?,
            );
        }
        Ok(existing)
    }
}
