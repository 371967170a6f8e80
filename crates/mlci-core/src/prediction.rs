//! Prediction service contract: request features and response validation.

use serde::{Deserialize, Serialize};

use crate::error::{MlciError, Result};

/// Probability above which a prediction is labelled `HIGH` risk.
pub const RISK_THRESHOLD: f64 = 0.5;

/// Feature vector accepted by `/predict` and the training-time pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartPatient {
    pub age: f64,
    pub sex: i64,
    pub cp: i64,
    pub trestbps: f64,
    pub chol: f64,
    pub fbs: i64,
    pub restecg: i64,
    pub thalach: f64,
    pub exang: i64,
    pub oldpeak: f64,
    pub slope: i64,
    pub ca: f64,
    pub thal: i64,
}

impl HeartPatient {
    /// Column order the model was trained with.
    pub const COLUMNS: [&'static str; 13] = [
        "age", "sex", "cp", "trestbps", "chol", "fbs", "restecg", "thalach", "exang", "oldpeak",
        "slope", "ca", "thal",
    ];

    /// Fixed reference vector used by integration validation.
    pub fn reference() -> Self {
        Self {
            age: 63.0,
            sex: 1,
            cp: 3,
            trestbps: 145.0,
            chol: 233.0,
            fbs: 1,
            restecg: 0,
            thalach: 150.0,
            exang: 0,
            oldpeak: 2.3,
            slope: 0,
            ca: 0.0,
            thal: 1,
        }
    }
}

/// Risk band derived from the probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    High,
    Low,
}

impl RiskLevel {
    pub fn for_probability(probability: f64) -> Self {
        if probability > RISK_THRESHOLD {
            RiskLevel::High
        } else {
            RiskLevel::Low
        }
    }
}

/// Response of one inference call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: i64,
    pub probability: f64,
    /// Optional; when present it must agree with `probability`.
    #[serde(default)]
    pub risk: Option<RiskLevel>,
}

impl PredictionResponse {
    /// Check the response against the prediction contract.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.prediction, 0 | 1) {
            return Err(MlciError::Contract(format!(
                "prediction must be 0 or 1, got {}",
                self.prediction
            )));
        }
        if !self.probability.is_finite() || !(0.0..=1.0).contains(&self.probability) {
            return Err(MlciError::Contract(format!(
                "probability must be within [0, 1], got {}",
                self.probability
            )));
        }
        if let Some(risk) = self.risk {
            let expected = RiskLevel::for_probability(self.probability);
            if risk != expected {
                return Err(MlciError::Contract(format!(
                    "risk {:?} does not match probability {} (expected {:?})",
                    risk, self.probability, expected
                )));
            }
        }
        Ok(())
    }

    /// Risk as reported, or derived from the probability.
    pub fn risk_level(&self) -> RiskLevel {
        self.risk
            .unwrap_or_else(|| RiskLevel::for_probability(self.probability))
    }
}
