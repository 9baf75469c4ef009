//! Input sampler for the two on-screen joysticks
//!
//! Gestures arrive as `(angle, distance)` pairs relative to the joystick
//! origin. The sampler keeps the latest sample per axis and is ticked at a
//! fixed rate by the coordinator; every tick emits one `joystick` message per
//! active axis. Releasing an axis emits its zero vector right away instead of
//! waiting for the next tick.

use crate::protocol::{Axis, ControlMessage};
use std::f64::consts::FRAC_PI_4;
use std::fmt;
use tracing::debug;

/// Drag distance (pixels) that maps to full deflection
pub const DEFAULT_RADIUS: f64 = 50.0;

/// Magnitudes below this classify as STOP
const STOP_THRESHOLD: f64 = 0.1;

/// Last known gesture geometry for one joystick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GestureSample {
    /// Radians, counter-clockwise from the positive x axis
    pub angle: f64,
    /// Pixels from the gesture origin
    pub distance: f64,
}

/// Normalized joystick deflection, magnitude at most 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoystickVector {
    pub axis: Axis,
    pub x: f64,
    pub y: f64,
}

impl JoystickVector {
    pub fn zero(axis: Axis) -> Self {
        Self { axis, x: 0.0, y: 0.0 }
    }

    /// Scale the sample onto the unit disc. Overshoot past `radius` is capped
    /// at magnitude 1 by scaling both components, never per axis. Negative or
    /// NaN distances and non-finite angles give the zero vector.
    pub fn from_gesture(axis: Axis, sample: GestureSample, radius: f64) -> Self {
        if !(sample.distance >= 0.0) || !sample.angle.is_finite() || !(radius > 0.0) {
            return Self::zero(axis);
        }
        let magnitude = (sample.distance / radius).min(1.0);
        Self {
            axis,
            x: sample.angle.cos() * magnitude,
            y: sample.angle.sin() * magnitude,
        }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn to_message(&self) -> ControlMessage {
        ControlMessage::joystick(self.axis, self.x, self.y)
    }

    pub fn direction(&self) -> Direction {
        classify(self.x, self.y)
    }

    /// Magnitude as a whole percentage, for the HUD
    pub fn speed_percent(&self) -> u32 {
        (self.magnitude().min(1.0) * 100.0).round() as u32
    }
}

/// HUD direction label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    #[default]
    Stop,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "FORWARD",
            Self::Backward => "BACKWARD",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Stop => "STOP",
        }
    }

    /// Parse the remote controller's lowercase direction names.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "forward" => Some(Self::Forward),
            "backward" => Some(Self::Backward),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a deflection into a HUD label.
pub fn classify(x: f64, y: f64) -> Direction {
    if !((x * x + y * y).sqrt() >= STOP_THRESHOLD) {
        return Direction::Stop;
    }
    classify_angle(y.atan2(x))
}

/// Quadrant edges: `[-π/4, π/4]` RIGHT, `(π/4, 3π/4]` FORWARD,
/// `[-3π/4, -π/4)` BACKWARD, everything else LEFT.
pub fn classify_angle(a: f64) -> Direction {
    let three_quarters = 3.0 * FRAC_PI_4;
    if (-FRAC_PI_4..=FRAC_PI_4).contains(&a) {
        Direction::Right
    } else if a > FRAC_PI_4 && a <= three_quarters {
        Direction::Forward
    } else if a >= -three_quarters && a < -FRAC_PI_4 {
        Direction::Backward
    } else {
        Direction::Left
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AxisState {
    active: bool,
    sample: GestureSample,
}

/// Fixed-rate sampler over the movement and camera joysticks
#[derive(Debug)]
pub struct InputSampler {
    radius: f64,
    movement: AxisState,
    camera: AxisState,
}

impl InputSampler {
    pub fn new(radius: f64) -> Self {
        Self {
            radius,
            movement: AxisState::default(),
            camera: AxisState::default(),
        }
    }

    fn axis_mut(&mut self, axis: Axis) -> &mut AxisState {
        match axis {
            Axis::Movement => &mut self.movement,
            Axis::Camera => &mut self.camera,
        }
    }

    fn axis(&self, axis: Axis) -> &AxisState {
        match axis {
            Axis::Movement => &self.movement,
            Axis::Camera => &self.camera,
        }
    }

    pub fn is_active(&self, axis: Axis) -> bool {
        self.axis(axis).active
    }

    pub fn on_gesture_start(&mut self, axis: Axis) {
        debug!("{} joystick engaged", axis.as_str());
        *self.axis_mut(axis) = AxisState {
            active: true,
            sample: GestureSample::default(),
        };
    }

    /// Record the latest drag geometry and return the resulting vector.
    pub fn on_gesture_move(&mut self, axis: Axis, angle: f64, distance: f64) -> JoystickVector {
        let state = self.axis_mut(axis);
        state.active = true;
        state.sample = GestureSample { angle, distance };
        self.vector(axis)
    }

    /// Reset the axis to neutral and return the zero message, which must be
    /// sent before anything else for this axis.
    pub fn on_gesture_end(&mut self, axis: Axis) -> ControlMessage {
        debug!("{} joystick released", axis.as_str());
        *self.axis_mut(axis) = AxisState::default();
        JoystickVector::zero(axis).to_message()
    }

    /// Current vector for `axis`; zero when idle.
    pub fn vector(&self, axis: Axis) -> JoystickVector {
        let state = self.axis(axis);
        if !state.active {
            return JoystickVector::zero(axis);
        }
        JoystickVector::from_gesture(axis, state.sample, self.radius)
    }

    /// One sample per active axis, movement first.
    pub fn tick(&self) -> Vec<ControlMessage> {
        Axis::ALL
            .iter()
            .filter(|axis| self.is_active(**axis))
            .map(|axis| self.vector(*axis).to_message())
            .collect()
    }
}

impl Default for InputSampler {
    fn default() -> Self {
        Self::new(DEFAULT_RADIUS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JoystickPayload;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn payload(msg: &ControlMessage) -> JoystickPayload {
        match msg {
            ControlMessage::Joystick(p) => *p,
            other => panic!("expected joystick message, got {:?}", other),
        }
    }

    #[test]
    fn magnitude_tracks_distance_up_to_radius() {
        for d in [0.0, 5.0, 25.0, 49.0, 50.0, 75.0, 1_000.0] {
            let v = JoystickVector::from_gesture(
                Axis::Movement,
                GestureSample { angle: 0.7, distance: d },
                DEFAULT_RADIUS,
            );
            let expected = (d / DEFAULT_RADIUS).min(1.0);
            assert!((v.magnitude() - expected).abs() < 1e-12, "d={}", d);
        }
        let half = JoystickVector::from_gesture(
            Axis::Camera,
            GestureSample { angle: 0.0, distance: 25.0 },
            DEFAULT_RADIUS,
        );
        assert!((half.magnitude() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn malformed_gestures_collapse_to_zero() {
        for (angle, distance) in [(0.3, -4.0), (0.3, f64::NAN), (f64::NAN, 20.0), (f64::INFINITY, 20.0)] {
            let v = JoystickVector::from_gesture(
                Axis::Movement,
                GestureSample { angle, distance },
                DEFAULT_RADIUS,
            );
            assert_eq!(v, JoystickVector::zero(Axis::Movement));
        }
    }

    #[test]
    fn direction_labels() {
        assert_eq!(classify(1.0, 0.0), Direction::Right);
        assert_eq!(classify(0.0, 1.0), Direction::Forward);
        assert_eq!(classify(-1.0, 0.0), Direction::Left);
        assert_eq!(classify(0.0, -1.0), Direction::Backward);
        assert_eq!(classify(0.05, 0.05), Direction::Stop);
        assert_eq!(classify(-0.07, 0.0), Direction::Stop);
    }

    #[test]
    fn quadrant_edges_are_deterministic() {
        assert_eq!(classify_angle(FRAC_PI_4), Direction::Right);
        assert_eq!(classify_angle(-FRAC_PI_4), Direction::Right);
        assert_eq!(classify_angle(3.0 * FRAC_PI_4), Direction::Forward);
        assert_eq!(classify_angle(-3.0 * FRAC_PI_4), Direction::Backward);
        assert_eq!(classify_angle(FRAC_PI_2), Direction::Forward);
        assert_eq!(classify_angle(PI), Direction::Left);
        assert_eq!(classify_angle(-PI), Direction::Left);
    }

    #[test]
    fn full_right_deflection() {
        let mut sampler = InputSampler::default();
        sampler.on_gesture_start(Axis::Movement);
        let v = sampler.on_gesture_move(Axis::Movement, 0.0, 100.0);
        assert_eq!(v.direction(), Direction::Right);
        assert_eq!(v.speed_percent(), 100);

        let ticks = sampler.tick();
        assert_eq!(ticks.len(), 1);
        let p = payload(&ticks[0]);
        assert_eq!((p.axis, p.x, p.y), (Axis::Movement, 1.0, 0.0));
    }

    #[test]
    fn release_emits_zero_and_silences_axis() {
        let mut sampler = InputSampler::default();
        sampler.on_gesture_start(Axis::Movement);
        sampler.on_gesture_start(Axis::Camera);
        sampler.on_gesture_move(Axis::Movement, FRAC_PI_2, 40.0);
        sampler.on_gesture_move(Axis::Camera, PI, 10.0);
        assert_eq!(sampler.tick().len(), 2);

        let p = payload(&sampler.on_gesture_end(Axis::Movement));
        assert_eq!((p.axis, p.x, p.y), (Axis::Movement, 0.0, 0.0));

        let ticks = sampler.tick();
        assert_eq!(ticks.len(), 1);
        assert_eq!(payload(&ticks[0]).axis, Axis::Camera);
        assert_eq!(sampler.vector(Axis::Movement), JoystickVector::zero(Axis::Movement));
    }

    #[test]
    fn idle_sampler_is_silent() {
        let sampler = InputSampler::default();
        assert!(sampler.tick().is_empty());
    }

    #[test]
    fn engaged_axis_without_movement_ticks_neutral() {
        let mut sampler = InputSampler::default();
        sampler.on_gesture_start(Axis::Camera);
        let p = payload(&sampler.tick()[0]);
        assert_eq!((p.x, p.y), (0.0, 0.0));
    }
}
