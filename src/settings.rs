use crate::error::{PipelineError, Result};
use crate::pipeline::{Stage, StageSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const PARAM_EPSILON: f32 = 1e-6;

/// Tunable stroke parameters. Lengths and widths are in world units.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StreamlineParams {
    /// Curvature probe step, in multiples of the voxel spacing.
    pub curvature_scale: f32,
    /// Total streamline length when not scaled by curvature.
    pub length: f32,
    pub min_length: f32,
    pub max_length: f32,
    /// Stroke half-width when not scaled by curvature.
    pub width: f32,
    pub min_width: f32,
    pub max_width: f32,
    /// Minimum distance between seed points.
    pub sampling_radius: f32,
    /// Fade the width to zero towards both ends.
    pub taper: bool,
    /// Remap length and width from the seed curvature.
    pub scale_by_curvature: bool,
    /// Override for the sampler's candidate slots per cell.
    pub max_points_per_cell: Option<u32>,
}

impl Default for StreamlineParams {
    fn default() -> Self {
        Self {
            curvature_scale: 1.0,
            length: 0.5,
            min_length: 0.2,
            max_length: 0.8,
            width: 0.01,
            min_width: 0.004,
            max_width: 0.02,
            sampling_radius: 0.1,
            taper: true,
            scale_by_curvature: false,
            max_points_per_cell: None,
        }
    }
}

impl StreamlineParams {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("curvature_scale", self.curvature_scale),
            ("sampling_radius", self.sampling_radius),
        ];
        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(PipelineError::InvalidParams(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        let non_negative = [
            ("length", self.length),
            ("min_length", self.min_length),
            ("max_length", self.max_length),
            ("width", self.width),
            ("min_width", self.min_width),
            ("max_width", self.max_width),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(PipelineError::InvalidParams(format!(
                    "{} must be non-negative, got {}",
                    name, value
                )));
            }
        }

        if self.min_length > self.max_length {
            return Err(PipelineError::InvalidParams(format!(
                "min_length {} exceeds max_length {}",
                self.min_length, self.max_length
            )));
        }
        if self.min_width > self.max_width {
            return Err(PipelineError::InvalidParams(format!(
                "min_width {} exceeds max_width {}",
                self.min_width, self.max_width
            )));
        }
        if self.max_points_per_cell == Some(0) {
            return Err(PipelineError::InvalidParams(
                "max_points_per_cell must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Stages whose inputs differ between `previous` and `self`.
    /// Downstream dependents are not included.
    pub fn dirty_stages(&self, previous: &StreamlineParams) -> StageSet {
        let mut stages = StageSet::empty();

        if changed(self.sampling_radius, previous.sampling_radius)
            || self.max_points_per_cell != previous.max_points_per_cell
        {
            stages.insert(Stage::Poisson);
        }
        if changed(self.curvature_scale, previous.curvature_scale) {
            stages.insert(Stage::Curvature);
        }

        let stroke_changed = changed(self.length, previous.length)
            || changed(self.min_length, previous.min_length)
            || changed(self.max_length, previous.max_length)
            || changed(self.width, previous.width)
            || changed(self.min_width, previous.min_width)
            || changed(self.max_width, previous.max_width)
            || self.taper != previous.taper
            || self.scale_by_curvature != previous.scale_by_curvature;
        if stroke_changed {
            stages.insert(Stage::Streamlines);
        }

        stages
    }
}

fn changed(a: f32, b: f32) -> bool {
    (a - b).abs() > PARAM_EPSILON
}

pub fn load_params(path: &Path) -> Result<StreamlineParams> {
    let content = fs::read_to_string(path)?;
    let params: StreamlineParams = serde_json::from_str(&content)?;
    params.validate()?;
    Ok(params)
}

pub fn save_params(path: &Path, params: &StreamlineParams) -> Result<()> {
    let content = serde_json::to_string_pretty(params)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        StreamlineParams::default().validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let params = StreamlineParams {
            min_width: 0.5,
            max_width: 0.1,
            ..StreamlineParams::default()
        };
        assert!(matches!(params.validate(), Err(PipelineError::InvalidParams(_))));

        let params = StreamlineParams {
            sampling_radius: 0.0,
            ..StreamlineParams::default()
        };
        assert!(params.validate().is_err());

        let params = StreamlineParams {
            length: f32::NAN,
            ..StreamlineParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_dirty_stages_by_parameter() {
        let base = StreamlineParams::default();
        assert!(base.dirty_stages(&base).is_empty());

        let radius = StreamlineParams {
            sampling_radius: 0.2,
            ..base.clone()
        };
        assert_eq!(radius.dirty_stages(&base), StageSet::from_stages(&[Stage::Poisson]));

        let scale = StreamlineParams {
            curvature_scale: 2.0,
            ..base.clone()
        };
        assert_eq!(scale.dirty_stages(&base), StageSet::from_stages(&[Stage::Curvature]));

        let taper = StreamlineParams {
            taper: false,
            ..base.clone()
        };
        assert_eq!(taper.dirty_stages(&base), StageSet::from_stages(&[Stage::Streamlines]));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: StreamlineParams =
            serde_json::from_str(r#"{ "sampling_radius": 0.25, "taper": false }"#).unwrap();
        assert_eq!(params.sampling_radius, 0.25);
        assert!(!params.taper);
        assert_eq!(params.length, StreamlineParams::default().length);
    }

    #[test]
    fn test_save_and_load() {
        let name = format!("sdf-streamlines-params-{}.json", std::process::id());
        let path = std::env::temp_dir().join(name);
        let params = StreamlineParams {
            scale_by_curvature: true,
            max_points_per_cell: Some(32),
            ..StreamlineParams::default()
        };
        save_params(&path, &params).unwrap();
        let loaded = load_params(&path).unwrap();
        assert_eq!(loaded, params);
        fs::remove_file(&path).ok();
    }
}
