//! Driving actions and the action space they must fit

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

/// The decision object returned to the control loop.
///
/// Required fields are optional at the type level because model output is
/// partial more often than one would hope; the orchestrator decides whether a
/// partial action becomes a flagged fallback. Fields the model invents beyond
/// the known set are preserved in `extra` and merged through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrivingAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub steering_angle: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<String>,

    /// Set when the action was synthesized from safe defaults
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Any other fields the model chose to include
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DrivingAction {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Both required fields are present (zero counts as present here; the
    /// fallback policy treats it separately).
    pub fn is_complete(&self) -> bool {
        self.speed.is_some() && self.steering_angle.is_some()
    }

    /// A required field is missing or zero. A zero speed would stall the
    /// control loop, so it gets the same treatment as an absent field.
    pub fn needs_fallback(&self) -> bool {
        !usable(self.speed) || !usable(self.steering_angle)
    }

    /// Substitute safe defaults for the missing or zero fields, keeping
    /// whatever usable values and explanatory fields the model did produce.
    pub fn with_fallback_defaults(mut self, message: &str) -> Self {
        if !usable(self.speed) {
            self.speed = Some(1.0);
        }
        if !usable(self.steering_angle) {
            self.steering_angle = Some(0.0);
        }
        self.fallback = true;
        self.error = Some(message.to_string());
        self
    }
}

fn usable(value: Option<f64>) -> bool {
    matches!(value, Some(v) if v != 0.0 && v.is_finite())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionSpaceType {
    Discrete,
    Continuous,
}

impl fmt::Display for ActionSpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionSpaceType::Discrete => write!(f, "discrete"),
            ActionSpaceType::Continuous => write!(f, "continuous"),
        }
    }
}

/// One entry of a discrete action space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscreteAction {
    pub steering_angle: f64,
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContinuousRange {
    pub low: f64,
    pub high: f64,
}

impl ContinuousRange {
    fn clamp(&self, value: f64) -> f64 {
        value.max(self.low).min(self.high)
    }

    fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContinuousActionSpace {
    pub speed: ContinuousRange,
    pub steering_angle: ContinuousRange,
}

/// The set of actions the vehicle accepts, either an explicit list or a pair
/// of continuous ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionSpace {
    Discrete(Vec<DiscreteAction>),
    Continuous(ContinuousActionSpace),
}

impl ActionSpace {
    pub fn space_type(&self) -> ActionSpaceType {
        match self {
            ActionSpace::Discrete(_) => ActionSpaceType::Discrete,
            ActionSpace::Continuous(_) => ActionSpaceType::Continuous,
        }
    }

    /// Fit an action into this space: clamp continuous values to their
    /// ranges, snap discrete ones to the nearest listed entry. Explanatory
    /// fields ride along unchanged.
    pub fn normalize(&self, mut action: DrivingAction) -> DrivingAction {
        let steering_angle = action.steering_angle.unwrap_or(0.0);
        let speed = action.speed.unwrap_or(1.0);

        match self {
            ActionSpace::Continuous(space) => {
                if !space.steering_angle.contains(steering_angle) {
                    warn!(
                        "steering angle {} exceeds valid range [{}, {}]",
                        steering_angle, space.steering_angle.low, space.steering_angle.high
                    );
                }
                if !space.speed.contains(speed) {
                    warn!(
                        "speed {} exceeds valid range [{}, {}]",
                        speed, space.speed.low, space.speed.high
                    );
                }
                action.steering_angle = Some(space.steering_angle.clamp(steering_angle));
                action.speed = Some(space.speed.clamp(speed));
                action
            }
            ActionSpace::Discrete(actions) => {
                match closest_discrete(actions, steering_angle, speed) {
                    Some(closest) => {
                        if closest.steering_angle != steering_angle || closest.speed != speed {
                            warn!(
                                "action ({}, {}) is not in the discrete action space, \
                                 snapping to closest match",
                                steering_angle, speed
                            );
                        }
                        action.steering_angle = Some(closest.steering_angle);
                        action.speed = Some(closest.speed);
                        action
                    }
                    None => action,
                }
            }
        }
    }
}

/// Nearest discrete entry by Euclidean distance in the action plane.
fn closest_discrete(
    actions: &[DiscreteAction],
    steering_angle: f64,
    speed: f64,
) -> Option<DiscreteAction> {
    actions.iter().copied().min_by(|a, b| {
        let da = distance(a, steering_angle, speed);
        let db = distance(b, steering_angle, speed);
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    })
}

fn distance(action: &DiscreteAction, steering_angle: f64, speed: f64) -> f64 {
    let ds = action.steering_angle - steering_angle;
    let dv = action.speed - speed;
    (ds * ds + dv * dv).sqrt()
}
