use camino::{Utf8Path, Utf8PathBuf};

use crate::error::ForgeError;
use crate::fs_util::ensure_dir;
use crate::manifest::{ALBEDO_LAYER, HEIGHT_LAYER, MANIFEST_FILE};
use crate::preview::{ALBEDO_TEXTURE_REL, HEIGHT_PREVIEW_REL, TERRAIN_PREVIEW_FILE};

/// On-disk layout of one scenery build under `<out_root>/<name>`.
#[derive(Debug, Clone)]
pub struct SceneryLayout {
    root: Utf8PathBuf,
}

impl SceneryLayout {
    pub fn new(out_root: &Utf8Path, name: &str) -> Self {
        Self {
            root: out_root.join(name),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn imagery_dir(&self) -> Utf8PathBuf {
        self.root.join("imagery")
    }

    pub fn heights_dir(&self) -> Utf8PathBuf {
        self.root.join("heights")
    }

    pub fn tmp_dir(&self) -> Utf8PathBuf {
        self.root.join("_tmp")
    }

    pub fn imagery_downloads(&self) -> Utf8PathBuf {
        self.imagery_dir().join("s2_visual")
    }

    pub fn dem_downloads(&self) -> Utf8PathBuf {
        self.heights_dir().join("dem_tiles")
    }

    pub fn albedo_utm(&self) -> Utf8PathBuf {
        self.imagery_dir().join("albedo_utm.tif")
    }

    pub fn dem_utm(&self) -> Utf8PathBuf {
        self.heights_dir().join("dem_utm.tif")
    }

    pub fn dem_uint16(&self) -> Utf8PathBuf {
        self.heights_dir().join("dem_utm_uint16.tif")
    }

    pub fn dem_meta(&self) -> Utf8PathBuf {
        self.heights_dir().join("dem_meta.json")
    }

    pub fn albedo_tiles(&self) -> Utf8PathBuf {
        self.imagery_dir().join("tiles").join(ALBEDO_LAYER)
    }

    pub fn height_tiles(&self) -> Utf8PathBuf {
        self.heights_dir().join("tiles").join(HEIGHT_LAYER)
    }

    pub fn manifest(&self) -> Utf8PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn albedo_texture(&self) -> Utf8PathBuf {
        self.root.join(ALBEDO_TEXTURE_REL)
    }

    pub fn albedo_preview(&self) -> Utf8PathBuf {
        self.imagery_dir().join("albedo_preview.jpg")
    }

    pub fn height_preview(&self) -> Utf8PathBuf {
        self.root.join(HEIGHT_PREVIEW_REL)
    }

    pub fn terrain_preview(&self) -> Utf8PathBuf {
        self.root.join(TERRAIN_PREVIEW_FILE)
    }

    pub fn ensure(&self) -> Result<(), ForgeError> {
        for dir in [self.imagery_dir(), self.heights_dir(), self.tmp_dir()] {
            ensure_dir(dir.as_std_path())?;
        }
        Ok(())
    }
}
