//! Cache fingerprints for normalized model inputs

use crate::normalizer::FeatureVector;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest identifying one (input window, model version, horizon)
/// inference request. Two requests with equal fingerprints are guaranteed
/// to produce the same result while the models stay loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Digest a normalized input together with everything else that can
    /// change the inference output.
    pub fn of(vector: &FeatureVector, version_tag: &str, horizon: usize) -> Self {
        let (lookback, channels) = vector.shape();
        let mut hasher = Sha256::new();
        hasher.update((lookback as u64).to_le_bytes());
        hasher.update((channels as u64).to_le_bytes());
        for value in vector.as_slice() {
            hasher.update(value.to_le_bytes());
        }
        hasher.update((version_tag.len() as u64).to_le_bytes());
        hasher.update(version_tag.as_bytes());
        hasher.update((horizon as u64).to_le_bytes());
        Self(hasher.finalize().into())
    }

    /// Truncated hex form for log fields.
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizationConfig;
    use crate::normalizer::FeatureNormalizer;
    use crate::types::{Reading, POLLUTANT_CHANNELS};

    fn vector(base: f64) -> FeatureVector {
        let norm = FeatureNormalizer::new(2, &NormalizationConfig::default()).unwrap();
        let window: Vec<Reading> = (0..2)
            .map(|t| {
                let mut reading = Reading::new("Bangalore");
                for channel in POLLUTANT_CHANNELS {
                    reading.set_pollutant(channel, Some(base + t as f64));
                }
                reading
            })
            .collect();
        norm.normalize(&window).unwrap()
    }

    #[test]
    fn test_equal_inputs_equal_fingerprints() {
        let a = Fingerprint::of(&vector(40.0), "f=lstm-v1;c=gbt-v1", 6);
        let b = Fingerprint::of(&vector(40.0), "f=lstm-v1;c=gbt-v1", 6);
        assert_eq!(a, b);
    }

    #[test]
    fn test_input_change_changes_fingerprint() {
        let a = Fingerprint::of(&vector(40.0), "f=lstm-v1;c=gbt-v1", 6);
        let b = Fingerprint::of(&vector(40.5), "f=lstm-v1;c=gbt-v1", 6);
        assert_ne!(a, b);
    }

    #[test]
    fn test_version_bump_changes_fingerprint() {
        let input = vector(40.0);
        let a = Fingerprint::of(&input, "f=lstm-v1;c=gbt-v1", 6);
        let b = Fingerprint::of(&input, "f=lstm-v2;c=gbt-v1", 6);
        assert_ne!(a, b);
    }

    #[test]
    fn test_horizon_changes_fingerprint() {
        let input = vector(40.0);
        let a = Fingerprint::of(&input, "f=lstm-v1;c=gbt-v1", 6);
        let b = Fingerprint::of(&input, "f=lstm-v1;c=gbt-v1", 12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_is_hex() {
        let fp = Fingerprint::of(&vector(40.0), "f=lstm-v1;c=gbt-v1", 1);
        let hex = fp.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(hex.starts_with(&fp.short()));
    }
}
