//! Contracts for the sensing collaborators and the per-frame perception step.
//!
//! Frame capture, face detection/embedding, card detection, OCR and card
//! photo embedding are supplied from outside the core. [`CameraPerception`]
//! wires them together into one [`Observation`] per detected face.

use crate::types::{BoundingBox, CredentialEvidence, Embedding, Observation, Sighting};
use thiserror::Error;

/// How far below the face the card search region extends, in pixels.
const CARD_SEARCH_DEPTH: u32 = 300;
/// Horizontal margin added on each side of the face for the card search.
const CARD_SEARCH_MARGIN: u32 = 50;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
    #[error("frame read failed: {0}")]
    ReadFailed(String),
    #[error("end of stream")]
    EndOfStream,
}

/// A captured grayscale frame or a crop of one.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
}

impl Frame {
    /// Copy out a rectangular region, clipped to the frame. `None` if the clip is empty.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Option<Frame> {
        let x0 = x.min(self.width);
        let y0 = y.min(self.height);
        let x1 = x.saturating_add(width).min(self.width);
        let y1 = y.saturating_add(height).min(self.height);
        if x1 <= x0 || y1 <= y0 || self.data.len() < (self.width * self.height) as usize {
            return None;
        }

        let w = (x1 - x0) as usize;
        let mut data = Vec::with_capacity(w * (y1 - y0) as usize);
        for row in y0..y1 {
            let start = (row * self.width + x0) as usize;
            data.extend_from_slice(&self.data[start..start + w]);
        }
        Some(Frame {
            data,
            width: x1 - x0,
            height: y1 - y0,
            sequence: self.sequence,
        })
    }
}

pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, SensorError>;
}

/// Face detection plus embedding. Returns an empty list when no face is visible.
pub trait FaceDetector {
    fn detect(&mut self, frame: &Frame) -> Vec<Sighting>;
}

/// Finds a card-shaped region; returns the crop and its box within `region`.
pub trait CardDetector {
    fn detect_card(&mut self, region: &Frame) -> Option<(Frame, BoundingBox)>;
}

/// Best-effort OCR; may return empty or garbled text.
pub trait TextRecognizer {
    fn recognize_text(&mut self, image: &Frame) -> String;
}

/// Embeds the photo printed on a card, if a face is found on it.
pub trait CardEmbedder {
    fn embed_face(&mut self, image: &Frame) -> Option<Embedding>;
}

/// Anything that yields one frame's worth of observations per call.
pub trait Perception {
    fn observe(&mut self) -> Result<Vec<Observation>, SensorError>;
}

/// Perception built from a frame source and the four detection collaborators.
pub struct CameraPerception<S, F, C, T, E> {
    pub source: S,
    pub faces: F,
    pub cards: C,
    pub ocr: T,
    pub card_embedder: E,
}

impl<S, F, C, T, E> CameraPerception<S, F, C, T, E>
where
    S: FrameSource,
    F: FaceDetector,
    C: CardDetector,
    T: TextRecognizer,
    E: CardEmbedder,
{
    /// Look for an ID card in the area below a face.
    fn evidence_for(&mut self, frame: &Frame, face: &BoundingBox) -> Option<CredentialEvidence> {
        let (x, y, w, h) = card_search_region(face);
        let region = frame.crop(x, y, w, h)?;
        let (card, _bbox) = self.cards.detect_card(&region)?;
        let recognized_text = self.ocr.recognize_text(&card);
        let card_embedding = self.card_embedder.embed_face(&card);
        tracing::debug!(
            text_len = recognized_text.len(),
            has_photo = card_embedding.is_some(),
            "card evidence extracted"
        );
        Some(CredentialEvidence {
            recognized_text,
            card_embedding,
        })
    }
}

impl<S, F, C, T, E> Perception for CameraPerception<S, F, C, T, E>
where
    S: FrameSource,
    F: FaceDetector,
    C: CardDetector,
    T: TextRecognizer,
    E: CardEmbedder,
{
    fn observe(&mut self) -> Result<Vec<Observation>, SensorError> {
        let frame = self.source.next_frame()?;
        let sightings = self.faces.detect(&frame);
        let mut observations = Vec::with_capacity(sightings.len());
        for sighting in sightings {
            let evidence = self.evidence_for(&frame, &sighting.bounding_box);
            observations.push(Observation { sighting, evidence });
        }
        Ok(observations)
    }
}

/// `(x, y, width, height)` of the card search area for a face: from the
/// face's bottom edge downwards, widened on both sides. Clipping to the
/// frame happens in [`Frame::crop`].
pub fn card_search_region(face: &BoundingBox) -> (u32, u32, u32, u32) {
    let left = face.x.max(0.0) as u32;
    let right = face.right().max(0.0) as u32;
    let bottom = face.bottom().max(0.0) as u32;
    let x = left.saturating_sub(CARD_SEARCH_MARGIN);
    let width = right.saturating_add(CARD_SEARCH_MARGIN).saturating_sub(x);
    (x, bottom, width, CARD_SEARCH_DEPTH)
}
