// Calibration domain model - per-channel correction from raw to corrected temperature
use super::reading::ChannelId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FACTOR_DECIMALS: i32 = 4;
pub const SLOPE_DECIMALS: i32 = 6;
pub const OFFSET_DECIMALS: i32 = 4;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("invalid calibration for channel {channel}: {reason}")]
    InvalidCalibration { channel: ChannelId, reason: String },

    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("failed to persist calibration: {0:#}")]
    Persist(anyhow::Error),
}

/// Raw/actual pairs a two-point calibration was fitted from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoints {
    pub ice_raw: f64,
    pub boil_raw: f64,
    pub ice_actual: f64,
    pub boil_actual: f64,
}

/// Correction rule for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Correction {
    #[default]
    None,
    Simple {
        factor: f64,
    },
    TwoPoint {
        slope: f64,
        offset: f64,
        reference: ReferencePoints,
    },
}

impl Correction {
    pub fn apply(&self, raw: f64) -> f64 {
        match self {
            Correction::None => raw,
            Correction::Simple { factor } => raw * factor,
            Correction::TwoPoint { slope, offset, .. } => raw * slope + offset,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Correction::None => "none",
            Correction::Simple { .. } => "simple",
            Correction::TwoPoint { .. } => "two_point",
        }
    }

    /// Builds a simple factor correction, rounded for storage.
    pub fn simple(channel: ChannelId, factor: f64) -> Result<Self, CalibrationError> {
        if !factor.is_finite() {
            return Err(CalibrationError::InvalidCalibration {
                channel,
                reason: format!("factor must be finite, got {}", factor),
            });
        }
        Ok(Correction::Simple {
            factor: round_to(factor, FACTOR_DECIMALS),
        })
    }

    /// Fits a linear correction through the ice and boil reference points.
    pub fn two_point(channel: ChannelId, reference: ReferencePoints) -> Result<(Self, TwoPointFit), CalibrationError> {
        let ReferencePoints {
            ice_raw,
            boil_raw,
            ice_actual,
            boil_actual,
        } = reference;

        if [ice_raw, boil_raw, ice_actual, boil_actual].iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::InvalidCalibration {
                channel,
                reason: "reference points must be finite".to_string(),
            });
        }
        if boil_raw == ice_raw {
            return Err(CalibrationError::InvalidCalibration {
                channel,
                reason: format!("boil raw reading equals ice raw reading ({})", ice_raw),
            });
        }

        let slope = (boil_actual - ice_actual) / (boil_raw - ice_raw);
        let offset = ice_actual - slope * ice_raw;

        let fit = TwoPointFit {
            slope: round_to(slope, SLOPE_DECIMALS),
            offset: round_to(offset, OFFSET_DECIMALS),
            factor: round_to(slope, FACTOR_DECIMALS),
        };
        let correction = Correction::TwoPoint {
            slope: fit.slope,
            offset: fit.offset,
            reference,
        };
        Ok((correction, fit))
    }
}

/// Result of a two-point fit; `factor` is the slope at factor precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwoPointFit {
    pub slope: f64,
    pub offset: f64,
    pub factor: f64,
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn reference(ice_raw: f64, boil_raw: f64) -> ReferencePoints {
        ReferencePoints {
            ice_raw,
            boil_raw,
            ice_actual: 0.0,
            boil_actual: 100.0,
        }
    }

    #[test]
    fn test_none_is_identity() {
        for x in [-40.0, 0.0, 21.37, 1250.5] {
            assert_eq!(Correction::None.apply(x), x);
        }
    }

    #[test]
    fn test_simple_factor() {
        let c = Correction::simple(1, 1.023456).unwrap();
        assert_eq!(c, Correction::Simple { factor: 1.0235 });
        assert_abs_diff_eq!(c.apply(100.0), 102.35, epsilon = 1e-9);
    }

    #[test]
    fn test_two_point_hits_reference_points() {
        let (c, fit) = Correction::two_point(1, reference(2.0, 98.0)).unwrap();
        assert_abs_diff_eq!(c.apply(2.0), 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(c.apply(98.0), 100.0, epsilon = 1e-3);
        assert_eq!(fit.slope, 1.041667);
        assert_eq!(fit.offset, -2.0833);
        assert_eq!(fit.factor, 1.0417);
    }

    #[test]
    fn test_two_point_rejects_equal_raw_points() {
        let err = Correction::two_point(4, reference(50.0, 50.0)).unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidCalibration { channel: 4, .. }));
    }

    #[test]
    fn test_serialized_shape() {
        let (c, _) = Correction::two_point(1, reference(0.0, 100.0)).unwrap();
        let json = serde_json::to_value(c).unwrap();
        assert_eq!(json["method"], "two_point");
        assert_eq!(json["slope"], 1.0);

        let none: Correction = serde_json::from_str(r#"{"method":"none"}"#).unwrap();
        assert_eq!(none, Correction::None);
    }
}
