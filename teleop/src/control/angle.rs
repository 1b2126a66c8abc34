//! Head orientation to signed pan/tilt angles.
//!
//! The tracker reports orientation modulo 360.  Folding it into a signed
//! range naively produces a jump exactly where the operator tends to look
//! (straight behind, ~180 degrees).  `AngleNormalizer` remembers which
//! quadrant the previous sample landed in and keeps samples near the 180
//! seam in the representation they entered with.

use tracing::debug;

use super::command::PanTilt;
use super::config::HeadConfig;

// ── Region ─────────────────────────────────────────────────

/// Quadrant bookkeeping for the previous sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AngleRegion {
    /// Upper right, `[0, 90]`.
    UR,
    /// Lower right, `(90, 180]`, positive representation.
    LR,
    /// Lower left, `[180, 270)`, negative representation.
    LL,
    /// Upper left, `[270, 360)`, negative representation.
    UL,
    /// No sample seen yet.
    #[default]
    None,
}

impl AngleRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UR => "ur",
            Self::LR => "lr",
            Self::LL => "ll",
            Self::UL => "ul",
            Self::None => "none",
        }
    }
}

/// Fold a raw `[0, 360)` angle into a signed whole-degree value.
///
/// Rules, in order:
/// - `[0, 90]` passes through, region UR.
/// - `[270, 360]` has 360 subtracted, region UL.
/// - `[180, 270)` has 360 subtracted, region LL, unless the previous
///   region is LR.
/// - `(90, 180]` passes through, region LR, unless the previous region
///   is LL.
///
/// A sample suppressed by the last two rules stays in the representation
/// of the sticky region (positive for LR, negative for LL) and the region
/// is not changed.  The result is truncated toward zero.
pub fn normalize(raw_deg: f32, region: AngleRegion) -> (i32, AngleRegion) {
    let a = raw_deg;
    let (folded, next) = if (0.0..=90.0).contains(&a) {
        (a, AngleRegion::UR)
    } else if (270.0..=360.0).contains(&a) {
        (a - 360.0, AngleRegion::UL)
    } else if (180.0..270.0).contains(&a) && region != AngleRegion::LR {
        (a - 360.0, AngleRegion::LL)
    } else if a > 90.0 && a <= 180.0 && region != AngleRegion::LL {
        (a, AngleRegion::LR)
    } else if region == AngleRegion::LL {
        (a - 360.0, region)
    } else {
        (a, region)
    };
    (folded.trunc() as i32, next)
}

// ── Stateful normalizer ────────────────────────────────────

/// Carries the region between samples for one axis.
#[derive(Debug, Clone, Default)]
pub struct AngleNormalizer {
    region: AngleRegion,
    last: Option<i32>,
}

impl AngleNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one raw sample.
    ///
    /// Samples outside `[0, 360)` are wrapped first.  A non-finite sample
    /// keeps the previous output (0 before any sample) and leaves the
    /// region untouched.
    pub fn normalize(&mut self, raw_deg: f32) -> i32 {
        if !raw_deg.is_finite() {
            debug!(raw_deg, "non-finite orientation sample ignored");
            return self.last.unwrap_or(0);
        }
        let wrapped = raw_deg.rem_euclid(360.0);
        let (angle, region) = normalize(wrapped, self.region);
        self.region = region;
        self.last = Some(angle);
        angle
    }

    pub fn region(&self) -> AngleRegion {
        self.region
    }
}

// ── Head tracker ───────────────────────────────────────────

/// Raw head orientation, degrees in `[0, 360)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HeadOrientation {
    /// Rotation about the vertical axis.
    pub yaw_deg: f32,
    /// Rotation about the lateral axis.
    pub pitch_deg: f32,
}

/// Pan/tilt pipeline for head orientation samples.
pub struct HeadTracker {
    config: HeadConfig,
    pan: AngleNormalizer,
    tilt: AngleNormalizer,
    last_published: Option<PanTilt>,
}

impl HeadTracker {
    pub fn new(config: HeadConfig) -> Self {
        Self {
            config,
            pan: AngleNormalizer::new(),
            tilt: AngleNormalizer::new(),
            last_published: None,
        }
    }

    /// Feed one orientation sample.  Returns a pan/tilt command only when
    /// the quantized pair differs from the last one returned.
    pub fn update(&mut self, orientation: HeadOrientation) -> Option<PanTilt> {
        if !self.config.enabled {
            return None;
        }
        let pan = self.pan.normalize(orientation.yaw_deg);
        let tilt = self.tilt.normalize(orientation.pitch_deg);
        let target = PanTilt {
            pan_deg: pan.clamp(-self.config.pan_limit_deg, self.config.pan_limit_deg),
            tilt_deg: tilt.clamp(-self.config.tilt_limit_deg, self.config.tilt_limit_deg),
        };
        if self.last_published == Some(target) {
            return None;
        }
        self.last_published = Some(target);
        Some(target)
    }

    pub fn last_published(&self) -> Option<PanTilt> {
        self.last_published
    }

    pub fn status_sexp(&self) -> String {
        let (pan, tilt) = match self.last_published {
            Some(pt) => (pt.pan_deg.to_string(), pt.tilt_deg.to_string()),
            None => ("nil".to_string(), "nil".to_string()),
        };
        format!(
            "(:enabled {} :pan {} :pan-region :{} :tilt {} :tilt-region :{})",
            if self.config.enabled { "t" } else { "nil" },
            pan,
            self.pan.region().as_str(),
            tilt,
            self.tilt.region().as_str(),
        )
    }
}

// ── Tests ──────────────────────────────────────────────────
