//! Sampling parameters bound to an LLM client.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 1.0);
pub const TOP_K_RANGE: (u32, u32) = (1, 100);
pub const TOP_P_RANGE: (f32, f32) = (0.0, 1.0);

/// Validated sampling parameters.
///
/// The only way to obtain a value is through [`LlmParameters::new`] (or
/// `Default`), so an out-of-range tuple can never reach a model client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LlmParameters {
    temperature: f32,
    top_k: u32,
    top_p: f32,
}

impl LlmParameters {
    /// Validate and build a parameter set. Values are rejected, never clamped.
    pub fn new(temperature: f32, top_k: u32, top_p: f32) -> Result<Self, ValidationError> {
        check_unit("temperature", temperature, TEMPERATURE_RANGE)?;
        if !(TOP_K_RANGE.0..=TOP_K_RANGE.1).contains(&top_k) {
            return Err(ValidationError::OutOfRange {
                name: "top_k",
                value: top_k as f64,
                min: TOP_K_RANGE.0 as f64,
                max: TOP_K_RANGE.1 as f64,
            });
        }
        check_unit("top_p", top_p, TOP_P_RANGE)?;
        Ok(Self {
            temperature,
            top_k,
            top_p,
        })
    }

    /// Like [`LlmParameters::new`], but accepts a signed/float `top_k` as it
    /// arrives from sliders and JSON bodies.
    pub fn from_raw(temperature: f64, top_k: f64, top_p: f64) -> Result<Self, ValidationError> {
        if !top_k.is_finite() {
            return Err(ValidationError::NotFinite { name: "top_k" });
        }
        if top_k.fract() != 0.0 || top_k < TOP_K_RANGE.0 as f64 || top_k > TOP_K_RANGE.1 as f64 {
            return Err(ValidationError::OutOfRange {
                name: "top_k",
                value: top_k,
                min: TOP_K_RANGE.0 as f64,
                max: TOP_K_RANGE.1 as f64,
            });
        }
        Self::new(temperature as f32, top_k as u32, top_p as f32)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn top_k(&self) -> u32 {
        self.top_k
    }

    pub fn top_p(&self) -> f32 {
        self.top_p
    }
}

impl Default for LlmParameters {
    /// The initial slider positions of a new session.
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: 10,
            top_p: 0.9,
        }
    }
}

impl<'de> Deserialize<'de> for LlmParameters {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            temperature: f64,
            top_k: f64,
            top_p: f64,
        }

        let raw = Raw::deserialize(deserializer)?;
        LlmParameters::from_raw(raw.temperature, raw.top_k, raw.top_p)
            .map_err(serde::de::Error::custom)
    }
}

fn check_unit(name: &'static str, value: f32, (min, max): (f32, f32)) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { name });
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            name,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_range_boundaries() {
        assert!(LlmParameters::new(0.0, 1, 0.0).is_ok());
        assert!(LlmParameters::new(1.0, 100, 1.0).is_ok());
        assert!(LlmParameters::new(0.5, 40, 0.85).is_ok());
    }

    #[test]
    fn rejects_negative_temperature() {
        let err = LlmParameters::new(-1.0, 5, 0.85).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange { name: "temperature", .. }
        ));
    }

    #[test]
    fn rejects_out_of_range_top_k_and_top_p() {
        assert!(LlmParameters::new(0.5, 0, 0.5).is_err());
        assert!(LlmParameters::new(0.5, 101, 0.5).is_err());
        assert!(LlmParameters::new(0.5, 10, 1.01).is_err());
        assert!(LlmParameters::new(0.5, 10, -0.1).is_err());
    }

    #[test]
    fn rejects_nan() {
        let err = LlmParameters::new(f32::NAN, 10, 0.5).unwrap_err();
        assert_eq!(err, ValidationError::NotFinite { name: "temperature" });
    }

    #[test]
    fn raw_top_k_must_be_integral() {
        assert!(LlmParameters::from_raw(0.5, 10.0, 0.5).is_ok());
        assert!(LlmParameters::from_raw(0.5, 10.5, 0.5).is_err());
        assert!(LlmParameters::from_raw(0.5, -3.0, 0.5).is_err());
    }

    #[test]
    fn default_matches_initial_sliders() {
        let p = LlmParameters::default();
        assert_eq!(p.top_k(), 10);
        assert!((p.temperature() - 1.0).abs() < f32::EPSILON);
        assert!((p.top_p() - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn deserialization_validates() {
        let ok: LlmParameters =
            serde_json::from_str(r#"{"temperature":0.2,"top_k":7,"top_p":0.5}"#).unwrap();
        assert_eq!(ok.top_k(), 7);

        let bad = serde_json::from_str::<LlmParameters>(r#"{"temperature":3,"top_k":7,"top_p":0.5}"#);
        assert!(bad.is_err());
    }
}
