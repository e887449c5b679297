use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

/// A univariate series of finite observations, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Series(Vec<f64>);

impl Series {
    pub fn new(values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(ForgeError::Validation("series is empty".to_string()));
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(ForgeError::Validation(format!(
                "observation {} is not a finite number",
                index + 1
            )));
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> f64 {
        self.0[self.0.len() - 1]
    }

    /// Check the observation count against an inclusive range.
    pub fn check_bounds(&self, min: usize, max: usize) -> Result<()> {
        if self.len() < min || self.len() > max {
            return Err(ForgeError::Validation(format!(
                "series must have between {} and {} observations, got {}",
                min,
                max,
                self.len()
            )));
        }
        Ok(())
    }

    /// Encode as the queue payload (a JSON array of numbers).
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let values: Vec<f64> = serde_json::from_slice(payload)
            .map_err(|e| ForgeError::InvalidPayload(e.to_string()))?;
        Self::new(values).map_err(|e| ForgeError::InvalidPayload(e.to_string()))
    }

    /// Parse either a JSON array or numbers separated by whitespace/commas.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.starts_with('[') {
            let values: Vec<f64> = serde_json::from_str(trimmed)?;
            return Self::new(values);
        }

        let values = trimmed
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .map(|token| {
                token.parse::<f64>().map_err(|_| {
                    ForgeError::Validation(format!("'{}' is not a number", token))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        Self::new(values)
    }

    pub async fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }
}
