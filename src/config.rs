use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_yaml_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks the decoder depends on. Thresholds are left to the caller.
    pub fn validate(&self) -> Result<()> {
        let m = &self.model;

        if m.train_width == 0 || m.train_height == 0 {
            bail!("train_width/train_height must be non-zero");
        }
        if m.num_row == 0 || m.num_col == 0 || m.num_lanes == 0 {
            bail!("num_row, num_col and num_lanes must be non-zero");
        }
        if m.num_cell_row < 2 || m.num_cell_col < 2 {
            bail!("num_cell_row/num_cell_col must be at least 2");
        }
        if !(m.crop_ratio > 0.0 && m.crop_ratio <= 1.0) {
            bail!("crop_ratio must be in (0, 1], got {}", m.crop_ratio);
        }

        let d = &self.decoder;
        for &idx in d.row_lane_idx.iter().chain(d.col_lane_idx.iter()) {
            if idx >= m.num_lanes {
                bail!("lane index {} out of range for num_lanes={}", idx, m.num_lanes);
            }
        }
        if let Some(idx) = d.row_lane_idx.iter().find(|i| d.col_lane_idx.contains(i)) {
            bail!("lane slot {} assigned to both row and column branch", idx);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
model:
  path: "weights/culane_res18.onnx"
  train_width: 1600
  train_height: 320
  num_row: 72
  num_col: 81
  num_lanes: 4
  crop_ratio: 0.6
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.model.num_cell_row, 200);
        assert_eq!(config.model.num_cell_col, 100);
        assert_eq!(config.inference.num_threads, 4);
        assert_eq!(config.decoder.row_lane_idx, vec![1, 2]);
        assert_eq!(config.decoder.col_lane_idx, vec![0, 3]);
        assert!(config.classifier.enabled);
        assert!(!config.classifier.hysteresis);
        assert_eq!(config.classifier.style.min_gap_pix, 6);
        assert_eq!(config.classifier.snap_base_scale, 1.0);
        assert!(config.model.ori_size.is_none());
    }

    #[test]
    fn test_flattened_classifier_fields() {
        let yaml = format!(
            "{}\nclassifier:\n  min_gap_pix: 9\n  hysteresis: true\n",
            MINIMAL
        );
        let config = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.classifier.style.min_gap_pix, 9);
        assert!(config.classifier.hysteresis);
    }

    #[test]
    fn test_overlapping_branches_rejected() {
        let yaml = format!(
            "{}\ndecoder:\n  row_lane_idx: [1, 2]\n  col_lane_idx: [2, 3]\n",
            MINIMAL
        );
        assert!(Config::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_lane_index_out_of_range_rejected() {
        let yaml = format!("{}\ndecoder:\n  col_lane_idx: [0, 4]\n", MINIMAL);
        assert!(Config::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_bad_crop_ratio_rejected() {
        let yaml = MINIMAL.replace("crop_ratio: 0.6", "crop_ratio: 1.5");
        assert!(Config::from_yaml_str(&yaml).is_err());
    }
}
