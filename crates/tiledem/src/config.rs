//! YAML configuration for an elevation model.
//!
//! ```yaml
//! family: srtm3-hgt
//! install_dir: ./dem_data
//! downloadable: true
//! hot_tiles: 60
//! resampling: bilinear
//! geoid_offset_m: -17.5
//! ```

use crate::entry::{ConstantOffset, NoCorrection, SampleCorrection};
use crate::model::DEFAULT_HOT_TILES;
use crate::resampling::ResamplingMethod;
use crate::{DemFamily, ElevationModel, ElevationModelBuilder, GridDescriptor, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn default_install_dir() -> PathBuf {
    PathBuf::from("dem_data")
}

fn default_true() -> bool {
    true
}

fn default_hot_tiles() -> usize {
    DEFAULT_HOT_TILES
}

/// Elevation model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemConfig {
    /// Which DEM to read.
    #[serde(default)]
    pub family: DemFamily,
    /// Directory holding tile files and archives.
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
    /// Fetch missing tiles from the remote archive.
    #[serde(default = "default_true")]
    pub downloadable: bool,
    /// Overrides the family's download endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_base_url: Option<String>,
    /// Tiles whose rows stay in memory.
    #[serde(default = "default_hot_tiles")]
    pub hot_tiles: usize,
    #[serde(default)]
    pub resampling: ResamplingMethod,
    /// Constant added to every valid sample, e.g. a local geoid undulation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geoid_offset_m: Option<f32>,
}

impl Default for DemConfig {
    fn default() -> Self {
        Self {
            family: DemFamily::default(),
            install_dir: default_install_dir(),
            downloadable: true,
            remote_base_url: None,
            hot_tiles: DEFAULT_HOT_TILES,
            resampling: ResamplingMethod::default(),
            geoid_offset_m: None,
        }
    }
}

impl DemConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The grid described by this configuration.
    pub fn descriptor(&self) -> Result<GridDescriptor> {
        let mut descriptor = GridDescriptor::for_family(self.family, &self.install_dir)?
            .with_downloadable(self.downloadable);
        if let Some(url) = &self.remote_base_url {
            descriptor = descriptor.with_remote_base_url(url.clone());
        }
        Ok(descriptor)
    }

    /// A model builder with every configured option applied.
    ///
    /// Callers can still swap the transport or reader before building.
    pub fn model_builder(&self) -> Result<ElevationModelBuilder> {
        let correction: Arc<dyn SampleCorrection> = match self.geoid_offset_m {
            Some(offset) => Arc::new(ConstantOffset(offset)),
            None => Arc::new(NoCorrection),
        };
        Ok(ElevationModel::builder(self.descriptor()?)
            .resampling(self.resampling.create())
            .hot_capacity(self.hot_tiles)
            .correction(correction))
    }

    /// Build the configured model.
    pub fn build_model(&self) -> Result<ElevationModel> {
        self.model_builder()?.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DemError;

    #[test]
    fn test_defaults_from_empty_mapping() {
        let config = DemConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, DemConfig::default());
        assert_eq!(config.family, DemFamily::Srtm3Hgt);
        assert_eq!(config.hot_tiles, 60);
        assert!(config.downloadable);
        assert_eq!(config.resampling, ResamplingMethod::Bilinear);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
family: srtm3-geotiff
install_dir: /var/lib/dem
downloadable: false
remote_base_url: https://mirror.example.com/srtm/
hot_tiles: 8
resampling: nearest-neighbour
geoid_offset_m: -17.5
"#;
        let config = DemConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.family, DemFamily::Srtm3GeoTiff);
        assert_eq!(config.install_dir, PathBuf::from("/var/lib/dem"));
        assert!(!config.downloadable);
        assert_eq!(config.hot_tiles, 8);
        assert_eq!(config.resampling, ResamplingMethod::NearestNeighbour);
        assert_eq!(config.geoid_offset_m, Some(-17.5));

        let descriptor = config.descriptor().unwrap();
        assert!(!descriptor.is_downloadable());
        assert_eq!(descriptor.remote_base_url(), Some("https://mirror.example.com/srtm/"));
        assert_eq!(descriptor.tile_width_pixels(), 6000);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = DemConfig::from_yaml_str("hot_tile: 4\n");
        assert!(matches!(result, Err(DemError::Config(_))));
    }

    #[test]
    fn test_unknown_family_rejected() {
        assert!(DemConfig::from_yaml_str("family: aster\n").is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = DemConfig {
            geoid_offset_m: Some(2.0),
            hot_tiles: 3,
            ..DemConfig::default()
        };
        let parsed = DemConfig::from_yaml_str(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.yaml");
        std::fs::write(&path, "family: srtm1-hgt\nhot_tiles: 4\n").unwrap();

        let config = DemConfig::load(&path).unwrap();
        assert_eq!(config.family, DemFamily::Srtm1Hgt);
        assert_eq!(config.hot_tiles, 4);
        assert!(DemConfig::load(dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_build_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = DemConfig {
            install_dir: dir.path().to_path_buf(),
            downloadable: false,
            hot_tiles: 5,
            resampling: ResamplingMethod::NearestNeighbour,
            ..DemConfig::default()
        };
        let model = config.build_model().unwrap();
        assert_eq!(model.hot_capacity(), 5);
        assert_eq!(model.resampling_name(), "nearest-neighbour");
        assert_eq!(model.descriptor().install_dir(), dir.path());
    }
}
