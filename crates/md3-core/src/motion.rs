use crate::value::Value;
use std::time::Duration;

pub const MOTOR_STEPS: u32 = 8;
pub const ROTATION_AXIS: &str = "Omega";
pub const STATE_MOVING: &str = "Moving";
pub const STATE_READY: &str = "Ready";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timings {
    pub motor_steps: u32,
    pub motor_travel: Duration,
    pub beamstop_travel: Duration,
    pub phase_change: Duration,
    pub phase_task_margin: Duration,
    pub raster_scan: Duration,
    pub scan: Duration,
    pub scan_4d: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            motor_steps: MOTOR_STEPS,
            motor_travel: Duration::from_secs(2),
            beamstop_travel: Duration::from_millis(2_600),
            phase_change: Duration::from_millis(3_100),
            phase_task_margin: Duration::from_millis(100),
            raster_scan: Duration::from_millis(5_200),
            scan: Duration::from_millis(3_200),
            scan_4d: Duration::from_millis(3_200),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineStep {
    pub delay: Duration,
    pub writes: Vec<(String, Value)>,
}

/// Attribute writes to replay in the background, each step after its delay.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub label: String,
    pub steps: Vec<TimelineStep>,
}

impl Timeline {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, delay: Duration, writes: Vec<(String, Value)>) -> Self {
        self.steps.push(TimelineStep { delay, writes });
        self
    }

    pub fn write_count(&self) -> usize {
        self.steps.iter().map(|step| step.writes.len()).sum()
    }

    pub fn total_delay(&self) -> Duration {
        self.steps.iter().map(|step| step.delay).sum()
    }
}

pub fn position_attribute(motor: &str) -> String {
    format!("{motor}Position")
}

pub fn state_attribute(motor: &str) -> String {
    format!("{motor}State")
}

pub fn motor_move(motor: &str, start: f64, target: f64, timings: &Timings) -> Timeline {
    let steps = timings.motor_steps.max(1);
    let pause = timings.motor_travel / steps;
    let delta = (target - start) / f64::from(steps);
    let position_attr = position_attribute(motor);
    let state_attr = state_attribute(motor);

    let mut timeline = Timeline::new(format!("move {motor}"));
    let mut writes = vec![(state_attr.clone(), Value::str(STATE_MOVING))];
    for n in 1..=steps {
        let mut position = if n == steps {
            target
        } else {
            start + f64::from(n) * delta
        };
        if motor == ROTATION_AXIS {
            position = position.rem_euclid(360.0);
        }
        writes.push((position_attr.clone(), Value::Double(position)));
        let delay = if n == 1 { Duration::ZERO } else { pause };
        timeline = timeline.then(delay, std::mem::take(&mut writes));
    }
    timeline.then(pause, vec![(state_attr, Value::str(STATE_READY))])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(timeline: &Timeline) -> Vec<f64> {
        timeline
            .steps
            .iter()
            .flat_map(|step| step.writes.iter())
            .filter(|(name, _)| name.ends_with("Position"))
            .filter_map(|(_, value)| value.as_f64())
            .collect()
    }

    #[test]
    fn linear_move_brackets_positions_with_state_markers() {
        let timings = Timings::default();
        let timeline = motor_move("AlignmentX", 0.0, 4.0, &timings);

        assert_eq!(timeline.steps.len(), 9);
        assert_eq!(
            timeline.steps[0].writes[0],
            ("AlignmentXState".to_string(), Value::str("Moving"))
        );
        assert_eq!(
            timeline.steps[8].writes,
            vec![("AlignmentXState".to_string(), Value::str("Ready"))]
        );
        assert_eq!(
            positions(&timeline),
            vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0]
        );
        assert_eq!(timeline.steps[0].delay, Duration::ZERO);
        assert_eq!(timeline.total_delay(), Duration::from_secs(2));
        assert_eq!(timeline.write_count(), 10);
    }

    #[test]
    fn rotation_axis_wraps_into_full_turn() {
        let timeline = motor_move("Omega", 359.999979169585, 10.0, &Timings::default());
        let positions = positions(&timeline);

        assert_eq!(positions.len(), MOTOR_STEPS as usize);
        assert!(positions.iter().all(|p| (0.0..360.0).contains(p)));
        assert_eq!(positions.last().copied(), Some(10.0));
    }

    #[test]
    fn negative_rotation_targets_are_wrapped_too() {
        let timeline = motor_move("Omega", 0.0, -90.0, &Timings::default());
        assert_eq!(positions(&timeline).last().copied(), Some(270.0));

        let linear = motor_move("CentringX", 0.0, -1.0, &Timings::default());
        assert_eq!(positions(&linear).last().copied(), Some(-1.0));
    }

    #[test]
    fn zero_steps_still_reaches_target() {
        let timings = Timings {
            motor_steps: 0,
            ..Timings::default()
        };
        let timeline = motor_move("AlignmentY", 1.0, 2.0, &timings);
        assert_eq!(positions(&timeline), vec![2.0]);
        assert_eq!(timeline.steps.len(), 2);
    }
}
