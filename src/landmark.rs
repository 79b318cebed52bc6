//! Detection results.
//!
//! A [`DetectionResult`] is an ordered list of [`Hand`]s, each of which is an ordered list of
//! [`Landmark`]s. Landmark order is fixed by the model
//! (see [`crate::hand::landmark::LandmarkIdx`]).
//!
//! Serialized, a result is just the nested landmark lists:
//! `[[{"x": .., "y": .., "z": ..}, ...], ...]`. Handedness and scores stay on the Rust side.

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};

/// A single landmark, normalized to the image size.
///
/// X and Y are in `0.0..=1.0` for points inside the image. Z is relative depth, scaled like X.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    #[inline]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Whether a detected hand is a left or right hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

/// A detected hand.
#[derive(Debug, Clone, PartialEq)]
pub struct Hand {
    landmarks: Vec<Landmark>,
    handedness: Handedness,
    score: f32,
}

impl Hand {
    pub fn new(landmarks: Vec<Landmark>, handedness: Handedness, score: f32) -> Self {
        Self {
            landmarks,
            handedness,
            score,
        }
    }

    /// Returns the hand's landmarks, in model order.
    #[inline]
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    #[inline]
    pub fn handedness(&self) -> Handedness {
        self.handedness
    }

    /// Returns the landmark network's confidence that this is actually a hand.
    #[inline]
    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn into_landmarks(self) -> Vec<Landmark> {
        self.landmarks
    }
}

impl Serialize for Hand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.landmarks.len()))?;
        for lm in &self.landmarks {
            seq.serialize_element(lm)?;
        }
        seq.end()
    }
}

/// The hands found in one image, in the order the model produced them.
///
/// An empty result means that no hands were found; it is not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DetectionResult {
    hands: Vec<Hand>,
}

impl DetectionResult {
    pub fn new(hands: Vec<Hand>) -> Self {
        Self { hands }
    }

    #[inline]
    pub fn hands(&self) -> &[Hand] {
        &self.hands
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.hands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }

    /// Strips everything but the landmark coordinates, keeping hand and landmark order.
    pub fn into_landmark_lists(self) -> Vec<Vec<Landmark>> {
        self.hands.into_iter().map(Hand::into_landmarks).collect()
    }
}

impl FromIterator<Hand> for DetectionResult {
    fn from_iter<T: IntoIterator<Item = Hand>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_nested_lists() {
        let result = DetectionResult::new(vec![
            Hand::new(
                vec![Landmark::new(0.5, 0.25, 0.0), Landmark::new(1.0, 0.0, -0.5)],
                Handedness::Left,
                0.9,
            ),
            Hand::new(vec![], Handedness::Right, 0.8),
        ]);
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(
            json,
            r#"[[{"x":0.5,"y":0.25,"z":0.0},{"x":1.0,"y":0.0,"z":-0.5}],[]]"#
        );

        assert_eq!(serde_json::to_string(&DetectionResult::default()).unwrap(), "[]");
    }

    #[test]
    fn landmark_lists_keep_order() {
        let a = Landmark::new(0.1, 0.2, 0.3);
        let b = Landmark::new(0.4, 0.5, 0.6);
        let result: DetectionResult = [
            Hand::new(vec![a, b], Handedness::Right, 1.0),
            Hand::new(vec![b], Handedness::Left, 1.0),
        ]
        .into_iter()
        .collect();

        assert_eq!(result.len(), 2);
        assert_eq!(result.into_landmark_lists(), vec![vec![a, b], vec![b]]);
    }
}
