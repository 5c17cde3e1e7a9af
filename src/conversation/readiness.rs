//! Readiness scoring
//!
//! Sub-scores only grow. `overall` is derived, never stored independently:
//! deserialization recomputes it from the sub-scores.

use serde::{Deserialize, Serialize};

const SCHEMA_WEIGHT: u32 = 40;
const UI_WEIGHT: u32 = 40;
const WORKFLOW_WEIGHT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "ReadinessParts")]
pub struct Readiness {
    schema: u8,
    ui: u8,
    workflow: u8,
    overall: u8,
}

/// Wire shape accepted on decode; any stored `overall` is ignored
#[derive(Deserialize)]
struct ReadinessParts {
    #[serde(default)]
    schema: u8,
    #[serde(default)]
    ui: u8,
    #[serde(default)]
    workflow: u8,
}

impl From<ReadinessParts> for Readiness {
    fn from(parts: ReadinessParts) -> Self {
        Readiness::new(parts.schema, parts.ui, parts.workflow)
    }
}

impl Readiness {
    pub fn new(schema: u8, ui: u8, workflow: u8) -> Self {
        let (schema, ui, workflow) = (schema.min(100), ui.min(100), workflow.min(100));
        Self {
            schema,
            ui,
            workflow,
            overall: overall_of(schema, ui, workflow),
        }
    }

    pub fn schema(&self) -> u8 {
        self.schema
    }

    pub fn ui(&self) -> u8 {
        self.ui
    }

    pub fn workflow(&self) -> u8 {
        self.workflow
    }

    pub fn overall(&self) -> u8 {
        self.overall
    }

    /// Raise sub-scores by `delta`, clamped to 100
    #[must_use]
    pub fn apply(self, delta: ReadinessDelta) -> Self {
        Self::new(
            self.schema.saturating_add(delta.schema),
            self.ui.saturating_add(delta.ui),
            self.workflow.saturating_add(delta.workflow),
        )
    }
}

/// Weighted 40/40/20 combination, rounded half up
pub fn overall_of(schema: u8, ui: u8, workflow: u8) -> u8 {
    let weighted = SCHEMA_WEIGHT * u32::from(schema)
        + UI_WEIGHT * u32::from(ui)
        + WORKFLOW_WEIGHT * u32::from(workflow);
    // Max is 100 * 100 + 50, so the quotient always fits
    u8::try_from((weighted + 50) / 100).unwrap_or(100)
}

/// Non-negative increment; a delta can never lower a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadinessDelta {
    pub schema: u8,
    pub ui: u8,
    pub workflow: u8,
}

impl ReadinessDelta {
    pub const fn new(schema: u8, ui: u8, workflow: u8) -> Self {
        Self {
            schema,
            ui,
            workflow,
        }
    }

    pub const fn schema(points: u8) -> Self {
        Self::new(points, 0, 0)
    }

    pub const fn ui(points: u8) -> Self {
        Self::new(0, points, 0)
    }

    pub const fn workflow(points: u8) -> Self {
        Self::new(0, 0, points)
    }

    pub fn is_zero(&self) -> bool {
        self.schema == 0 && self.ui == 0 && self.workflow == 0
    }

    #[must_use]
    pub fn plus(self, other: ReadinessDelta) -> Self {
        Self::new(
            self.schema.saturating_add(other.schema),
            self.ui.saturating_add(other.ui),
            self.workflow.saturating_add(other.workflow),
        )
    }
}
