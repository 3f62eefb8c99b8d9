use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{info, warn};

use crate::catalog::{CatalogClient, CatalogTransport, Endpoint, is_truthy};
use crate::domain::{AssetRef, CatalogItem};
use crate::error::ForgeError;
use crate::fs_util::{ensure_dir, file_size, find_in_path, remove_file_if_exists};
use crate::raster::RasterEngine;

/// Downloads smaller than this are never valid rasters.
pub const MIN_RASTER_BYTES: u64 = 1024;

pub const REQUESTER_PAYS_FIELD: &str = "storage:requester_pays";

/// Picks the asset to download from an item.
///
/// Order: `preferred` key, `visual`, `image`, first asset with a `visual` role, first asset
/// with a `data` or `analytic` role, first asset.
pub fn pick_asset<'a>(assets: &'a [AssetRef], preferred: Option<&str>) -> Option<&'a AssetRef> {
    let by_key = |key: &str| assets.iter().find(|asset| asset.key == key);
    if let Some(asset) = preferred.filter(|key| !key.is_empty()).and_then(by_key) {
        return Some(asset);
    }
    by_key("visual")
        .or_else(|| by_key("image"))
        .or_else(|| assets.iter().find(|asset| asset.has_role("visual")))
        .or_else(|| {
            assets
                .iter()
                .find(|asset| asset.has_role("data") || asset.has_role("analytic"))
        })
        .or_else(|| assets.first())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectAccess {
    pub requester_pays: bool,
    pub signed: bool,
}

pub trait AssetFetcher {
    fn fetch(
        &self,
        asset: &AssetRef,
        access: ObjectAccess,
        destination: &Path,
    ) -> Result<(), ForgeError>;
}

/// Fetches `s3://` hrefs with the `aws` tool and everything else over HTTP.
#[derive(Clone)]
pub struct SystemFetcher {
    client: Client,
    aws: Option<PathBuf>,
}

impl SystemFetcher {
    pub fn new() -> Result<Self, ForgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("scenery-forge/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ForgeError::Download(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| ForgeError::Download(err.to_string()))?;
        Ok(Self {
            client,
            aws: find_in_path("aws"),
        })
    }

    fn copy_object(
        &self,
        href: &str,
        access: ObjectAccess,
        destination: &Path,
    ) -> Result<(), ForgeError> {
        let aws = self
            .aws
            .as_ref()
            .ok_or_else(|| ForgeError::ToolMissing("aws".to_string()))?;
        let output = Command::new(aws)
            .args(aws_cp_args(href, access, destination))
            .output()
            .map_err(|err| ForgeError::Download(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ForgeError::Download(if stderr.is_empty() {
            format!("aws s3 cp failed for {href}")
        } else {
            stderr
        }))
    }

    fn download_http(&self, href: &str, destination: &Path) -> Result<(), ForgeError> {
        let mut response = self
            .client
            .get(href)
            .send()
            .map_err(|err| ForgeError::Download(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ForgeError::Download(format!(
                "{href} returned status {}",
                response.status().as_u16()
            )));
        }
        let parent = destination
            .parent()
            .ok_or_else(|| ForgeError::Filesystem("invalid destination path".to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".download")
            .tempfile_in(parent)
            .map_err(|err| ForgeError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| ForgeError::Download(err.to_string()))?;
        temp.persist(destination)
            .map_err(|err| ForgeError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// `aws s3 cp` arguments. Requests are unsigned unless the bucket bills the requester or
/// signing was asked for.
pub fn aws_cp_args(href: &str, access: ObjectAccess, destination: &Path) -> Vec<String> {
    let mut args = vec!["s3".to_string(), "cp".to_string()];
    if !access.requester_pays && !access.signed {
        args.push("--no-sign-request".to_string());
    }
    if access.requester_pays {
        args.extend(["--request-payer".to_string(), "requester".to_string()]);
    }
    args.push(href.to_string());
    args.push(destination.to_string_lossy().to_string());
    args
}

impl AssetFetcher for SystemFetcher {
    fn fetch(
        &self,
        asset: &AssetRef,
        access: ObjectAccess,
        destination: &Path,
    ) -> Result<(), ForgeError> {
        if let Some(parent) = destination.parent() {
            ensure_dir(parent)?;
        }
        info!(href = %asset.href, "downloading asset");
        if asset.is_object_storage() {
            self.copy_object(&asset.href, access, destination)
        } else {
            self.download_http(&asset.href, destination)
        }
    }
}

/// Size check plus an open probe through the raster engine.
pub fn is_valid_raster<E: RasterEngine>(engine: &E, path: &Path) -> bool {
    match file_size(path) {
        Some(size) if size >= MIN_RASTER_BYTES => engine.probe(path),
        _ => false,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolverSettings {
    pub collection: String,
    pub preferred_key: Option<String>,
    /// Endpoint the full item is fetched from before picking an asset. `None` uses the
    /// assets of the search result as is.
    pub asset_endpoint: Option<Endpoint>,
    /// Endpoint used for the single corrective attempt after an invalid download.
    pub secondary_endpoint: Option<Endpoint>,
    pub signed_requests: bool,
}

pub struct AssetResolver<'a, T: CatalogTransport, F: AssetFetcher, E: RasterEngine> {
    catalog: &'a CatalogClient<T>,
    fetcher: &'a F,
    engine: &'a E,
    settings: ResolverSettings,
}

impl<'a, T: CatalogTransport, F: AssetFetcher, E: RasterEngine> AssetResolver<'a, T, F, E> {
    pub fn new(
        catalog: &'a CatalogClient<T>,
        fetcher: &'a F,
        engine: &'a E,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            engine,
            settings,
        }
    }

    /// Picks the asset of `item` according to [`pick_asset`].
    pub fn resolve<'i>(&self, item: &'i CatalogItem) -> Option<&'i AssetRef> {
        pick_asset(&item.assets, self.settings.preferred_key.as_deref())
    }

    /// Downloads every item into `dir` named by `file_name`, dropping items that never
    /// yield a valid raster.
    pub fn download_all<N>(
        &self,
        items: &[CatalogItem],
        dir: &Path,
        file_name: N,
    ) -> Result<Vec<PathBuf>, ForgeError>
    where
        N: Fn(&CatalogItem) -> String,
    {
        ensure_dir(dir)?;
        let mut rasters = Vec::new();
        for item in items {
            let destination = dir.join(file_name(item));
            if let Some(path) = self.download_and_validate(item, &destination)? {
                rasters.push(path);
            }
        }
        Ok(rasters)
    }

    /// Returns `Ok(None)` when the item is skipped. Only fatal conditions are errors.
    pub fn download_and_validate(
        &self,
        item: &CatalogItem,
        destination: &Path,
    ) -> Result<Option<PathBuf>, ForgeError> {
        if destination.exists() {
            info!(item = %item.id, path = %destination.display(), "already exists");
            if is_valid_raster(self.engine, destination) {
                return Ok(Some(destination.to_path_buf()));
            }
            warn!(item = %item.id, "existing download is not a valid raster; skipping");
            return Ok(None);
        }

        let full = match &self.settings.asset_endpoint {
            Some(endpoint) => match self.fetch_full(endpoint, &item.id) {
                Some(full) => full,
                None => return Ok(None),
            },
            None => item.clone(),
        };

        let Some(asset) = self.resolve(&full) else {
            warn!(item = %item.id, "no suitable asset; skipping");
            return Ok(None);
        };
        if asset.href.is_empty() {
            warn!(item = %item.id, asset = %asset.key, "asset has no href; skipping");
            return Ok(None);
        }
        let access = self.access_for(&full, asset);

        info!(item = %item.id, asset = %asset.key, "downloading item");
        if self.try_fetch(item, asset, access, destination)? {
            return Ok(Some(destination.to_path_buf()));
        }

        if let Some(secondary) = &self.settings.secondary_endpoint {
            warn!(
                item = %item.id,
                endpoint = %secondary.name,
                "invalid download; retrying with secondary catalog href"
            );
            if let Some(alternate) = self.fetch_full(secondary, &item.id) {
                if let Some(asset) = self.resolve(&alternate).filter(|a| !a.href.is_empty()) {
                    remove_file_if_exists(destination)?;
                    let access = self.access_for(&alternate, asset);
                    if self.try_fetch(item, asset, access, destination)? {
                        return Ok(Some(destination.to_path_buf()));
                    }
                }
            }
        }

        warn!(item = %item.id, "invalid raster download; skipping");
        remove_file_if_exists(destination)?;
        Ok(None)
    }

    fn fetch_full(&self, endpoint: &Endpoint, id: &str) -> Option<CatalogItem> {
        match self
            .catalog
            .fetch_item(endpoint, &self.settings.collection, id)
        {
            Ok(full) => Some(full),
            Err(err) => {
                warn!(item = %id, endpoint = %endpoint.name, error = %err, "item lookup failed");
                None
            }
        }
    }

    fn access_for(&self, item: &CatalogItem, asset: &AssetRef) -> ObjectAccess {
        let item_flag = item
            .properties
            .get(REQUESTER_PAYS_FIELD)
            .map(is_truthy)
            .unwrap_or(false);
        ObjectAccess {
            requester_pays: item_flag || asset.requester_pays,
            signed: self.settings.signed_requests,
        }
    }

    /// Downloads and validates. A missing transport tool stays fatal, other download errors
    /// count as an invalid result.
    fn try_fetch(
        &self,
        item: &CatalogItem,
        asset: &AssetRef,
        access: ObjectAccess,
        destination: &Path,
    ) -> Result<bool, ForgeError> {
        match self.fetcher.fetch(asset, access, destination) {
            Ok(()) => Ok(is_valid_raster(self.engine, destination)),
            Err(err @ ForgeError::ToolMissing(_)) => Err(err),
            Err(err) => {
                warn!(item = %item.id, error = %err, "download failed");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HREF: &str = "s3://sentinel-cogs/tiles/10/S/EG/TCI.tif";

    fn args(requester_pays: bool, signed: bool) -> Vec<String> {
        aws_cp_args(
            HREF,
            ObjectAccess {
                requester_pays,
                signed,
            },
            Path::new("out/TCI.tif"),
        )
    }

    #[test]
    fn public_buckets_are_read_unsigned() {
        assert_eq!(
            args(false, false),
            vec!["s3", "cp", "--no-sign-request", HREF, "out/TCI.tif"]
        );
    }

    #[test]
    fn requester_pays_is_signed_and_billed() {
        assert_eq!(
            args(true, false),
            vec!["s3", "cp", "--request-payer", "requester", HREF, "out/TCI.tif"]
        );
    }

    #[test]
    fn signed_requests_drop_the_unsigned_flag() {
        assert_eq!(args(false, true), vec!["s3", "cp", HREF, "out/TCI.tif"]);
        assert_eq!(
            args(true, true),
            vec!["s3", "cp", "--request-payer", "requester", HREF, "out/TCI.tif"]
        );
    }
}
