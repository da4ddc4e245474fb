use serde::{Deserialize, Serialize};

/// Bounding box for a detected face or card, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Coarse key identifying "the same place in the frame" across ticks.
    pub fn position_key(&self) -> PositionKey {
        PositionKey {
            left: self.x.round() as i32,
            top: self.y.round() as i32,
            right: self.right().round() as i32,
            bottom: self.bottom().round() as i32,
        }
    }
}

/// Integer box corners used to recognise an unknown face that has not moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionKey {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}:{}", self.left, self.top, self.right, self.bottom)
    }
}

/// Face embedding vector produced by an external embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding, if the embedder reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Vectors of different length come from different models and are
    /// never comparable, so they are infinitely far apart.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub embeddings: Vec<Embedding>,
    #[serde(default)]
    pub card_reference_text: String,
    #[serde(default)]
    pub card_embeddings: Vec<Embedding>,
}

/// One detected face in the current frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub bounding_box: BoundingBox,
    pub embedding: Embedding,
}

/// What a visible ID card told us: OCR text and, optionally, the card photo's embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialEvidence {
    pub recognized_text: String,
    #[serde(default)]
    pub card_embedding: Option<Embedding>,
}

/// A sighting together with whatever card evidence was found next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub sighting: Sighting,
    #[serde(default)]
    pub evidence: Option<CredentialEvidence>,
}

/// Result of matching a probe embedding against the identity store.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched identity, if the closest one was within threshold.
    pub identity_id: Option<String>,
    /// Closest distance found; `INFINITY` when nothing was compared.
    pub distance: f32,
}

impl MatchResult {
    pub fn no_match(distance: f32) -> Self {
        Self {
            identity_id: None,
            distance,
        }
    }
}

/// Per-factor access outcome for one sighting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub identity_id: Option<String>,
    pub face_ok: bool,
    pub card_ok: bool,
    pub photo_ok: bool,
    pub granted: bool,
}

impl Verdict {
    pub fn denied() -> Self {
        Self::default()
    }
}

/// A verdict tied back to where its face was in the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SightingVerdict {
    pub bounding_box: BoundingBox,
    pub verdict: Verdict,
}

/// Outcome recorded in the access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Granted,
    Denied,
    Unknown,
}

impl AttemptResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptResult::Granted => "granted",
            AttemptResult::Denied => "denied",
            AttemptResult::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for AttemptResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "granted" => Ok(AttemptResult::Granted),
            "denied" => Ok(AttemptResult::Denied),
            "unknown" => Ok(AttemptResult::Unknown),
            other => Err(format!("unknown attempt result: {other}")),
        }
    }
}

/// One row of the access log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessAttempt {
    pub identity_id: Option<String>,
    pub display_name: Option<String>,
    pub result: AttemptResult,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical() {
        let a = Embedding::new(vec![0.3, 0.4]);
        assert_eq!(a.distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_distance_pythagorean() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_length_mismatch_is_infinite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.distance(&b), f32::INFINITY);
    }

    #[test]
    fn test_position_key_rounds_corners() {
        let bbox = BoundingBox { x: 10.4, y: 20.6, width: 50.0, height: 60.0 };
        let key = bbox.position_key();
        assert_eq!(key, PositionKey { left: 10, top: 21, right: 60, bottom: 81 });
        assert_eq!(key.to_string(), "10:21:60:81");
    }

    #[test]
    fn test_attempt_result_parse() {
        for r in [AttemptResult::Granted, AttemptResult::Denied, AttemptResult::Unknown] {
            assert_eq!(r.as_str().parse::<AttemptResult>().unwrap(), r);
        }
        assert!("maybe".parse::<AttemptResult>().is_err());
    }
}
