//! Per-tick hand observations consumed by the motion state machines.
//!
//! The tracker's classifier runs outside this crate; what arrives here is
//! one `GestureSample` per hand per tick, or nothing when the hand is not
//! tracked.  Raw labels and confidence strings are parsed leniently: any
//! malformed field turns the sample into a `NoDetection` observation.

use tracing::debug;

// ── Hand enum ──────────────────────────────────────────────

/// Which hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

// ── Gesture labels ─────────────────────────────────────────

/// Classified gesture labels reported by the hand tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureKind {
    /// Hand is present but no gesture was recognized.
    NoDetection,
    /// Index finger extended, others curled.
    Point,
    /// All fingers curled.
    Fist,
    /// Thumb and index forming a ring.
    Ok,
    /// Thumb up.
    Like,
    /// Open palm, all five fingers extended.
    Five,
    /// Index and middle fingers extended in a V.
    Victory,
}

impl GestureKind {
    /// String representation for logs and config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoDetection => "none",
            Self::Point => "point",
            Self::Fist => "fist",
            Self::Ok => "ok",
            Self::Like => "like",
            Self::Five => "five",
            Self::Victory => "victory",
        }
    }

    /// Parse a gesture label.  Returns `None` for unknown labels.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" | "unknown" => Some(Self::NoDetection),
            "point" => Some(Self::Point),
            "fist" => Some(Self::Fist),
            "ok" => Some(Self::Ok),
            "like" => Some(Self::Like),
            "five" => Some(Self::Five),
            "victory" => Some(Self::Victory),
            _ => None,
        }
    }
}

// ── Position ───────────────────────────────────────────────

/// 3D vector in tracker space (meters) or command space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f32; 3]> for Vec3 {
    fn from(p: [f32; 3]) -> Self {
        Self::new(p[0], p[1], p[2])
    }
}

// ── Sample ─────────────────────────────────────────────────

/// One tick of classifier output for a tracked hand.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureSample {
    /// Which hand produced the sample.
    pub hand: Hand,
    /// Classified gesture.
    pub gesture: GestureKind,
    /// Hand position in tracker space.
    pub position: Vec3,
    /// Classifier confidence (0.0-1.0).  Informational only.
    pub confidence: Option<f32>,
}

impl GestureSample {
    pub fn new(hand: Hand, gesture: GestureKind, position: Vec3) -> Self {
        Self {
            hand,
            gesture,
            position,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Build a sample from raw feed fields.
    ///
    /// An unknown label, a confidence that does not parse or falls outside
    /// `[0, 1]`, or a non-finite position all produce a `NoDetection`
    /// sample for this tick.
    pub fn from_raw(hand: Hand, label: &str, position: Vec3, confidence: Option<&str>) -> Self {
        let mut sample = Self::new(hand, GestureKind::NoDetection, position);

        let confidence = match confidence.map(parse_confidence) {
            Some(Some(c)) => Some(c),
            Some(None) => {
                debug!(hand = hand.as_str(), label, "malformed confidence, treating as no detection");
                return sample;
            }
            None => None,
        };

        if !position.is_finite() {
            debug!(hand = hand.as_str(), label, "non-finite hand position, treating as no detection");
            return sample;
        }

        match GestureKind::from_str(label) {
            Some(gesture) => {
                sample.gesture = gesture;
                sample.confidence = confidence;
            }
            None => {
                debug!(hand = hand.as_str(), label, "unknown gesture label, treating as no detection");
            }
        }
        sample
    }
}

fn parse_confidence(raw: &str) -> Option<f32> {
    let value: f32 = raw.trim().parse().ok()?;
    if (0.0..=1.0).contains(&value) {
        Some(value)
    } else {
        None
    }
}

// ── Tests ──────────────────────────────────────────────────
