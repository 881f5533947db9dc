use crate::device::{
    Diffractometer, BEAMSTOP_BEAM, BEAMSTOP_MOVING, BEAMSTOP_POSITIONS, PHASES, PHASE_DATA_COLLECTION,
    PHASE_UNKNOWN,
};
use crate::error::DeviceError;
use crate::motion::Timeline;
use crate::value::Value;

const DYNAMIC_LIMITS: (f64, f64) = (-2.97366048458438, 2.970646846947152);

pub type Handler = fn(&mut Diffractometer, &[String]) -> Result<CommandOutcome, DeviceError>;

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub value: Value,
    pub background: Option<Timeline>,
}

impl CommandOutcome {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            background: None,
        }
    }

    pub fn void() -> Self {
        Self {
            value: Value::Null,
            background: None,
        }
    }

    fn with_background(mut self, timeline: Timeline) -> Self {
        self.background = Some(timeline);
        self
    }
}

#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub returns: &'static str,
    pub args: &'static str,
    pub handler: Handler,
}

impl CommandSpec {
    pub fn signature(&self) -> String {
        format!("{} {}({})", self.returns, self.name, self.args)
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Registered commands in registration order; `LIST` reports them in this order.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    commands: Vec<CommandSpec>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn md3() -> Self {
        let mut table = Self::new();
        table.register("getMotorLimits", "double[]", "String", get_motor_limits);
        table.register("startSetPhase", "int", "Phase", start_set_phase);
        table.register(
            "startRasterScan",
            "int",
            "double, double, int, int, boolean, boolean, boolean",
            start_raster_scan,
        );
        table.register(
            "startScanEx",
            "int",
            "int, double, double, double, int",
            start_scan_ex,
        );
        table.register(
            "startScan4DEx",
            "int",
            "double, double, double, double, double, double, double, double, double, double, double",
            start_scan_4d_ex,
        );
        table.register("isTaskRunning", "boolean", "int", is_task_running);
        table.register("getTaskInfo", "String[]", "int", get_task_info);
        table.register("saveCentringPositions", "void", "", no_op);
        table.register(
            "getMotorDynamicLimits",
            "double[]",
            "String",
            get_motor_dynamic_limits,
        );
        table.register("abort", "void", "", no_op);
        table.register("getBeamstopPosition", "Position", "", get_beamstop_position);
        table.register(
            "setBeamstopPosition",
            "Position",
            "Position",
            set_beamstop_position,
        );
        table
    }

    pub fn register(
        &mut self,
        name: &'static str,
        returns: &'static str,
        args: &'static str,
        handler: Handler,
    ) {
        self.commands.retain(|existing| existing.name != name);
        self.commands.push(CommandSpec {
            name,
            returns,
            args,
            handler,
        });
    }

    pub fn get(&self, name: &str) -> Result<&CommandSpec, DeviceError> {
        self.commands
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| DeviceError::UnknownCommand(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn list(&self) -> String {
        self.commands
            .iter()
            .map(CommandSpec::signature)
            .collect::<Vec<_>>()
            .join("\t")
    }
}

fn required<'a>(args: &'a [String], command: &str) -> Result<&'a str, DeviceError> {
    args.first()
        .map(String::as_str)
        .ok_or_else(|| DeviceError::bad_signature(command))
}

fn task_id(args: &[String], command: &str) -> Result<u64, DeviceError> {
    let id = required(args, command)?
        .trim()
        .parse::<i64>()
        .map_err(|_| DeviceError::bad_signature(command))?;
    u64::try_from(id).map_err(|_| DeviceError::invalid_task(id))
}

fn limits_value((low, high): (f64, f64)) -> Value {
    Value::List(vec![Value::Double(low), Value::Double(high)])
}

fn get_motor_limits(
    device: &mut Diffractometer,
    args: &[String],
) -> Result<CommandOutcome, DeviceError> {
    let motor = required(args, "getMotorLimits")?;
    let limits = device
        .motor_limits(motor)
        .ok_or_else(|| DeviceError::Command(format!("Invalid motor: {motor}")))?;
    Ok(CommandOutcome::value(limits_value(limits)))
}

fn get_motor_dynamic_limits(
    _device: &mut Diffractometer,
    _args: &[String],
) -> Result<CommandOutcome, DeviceError> {
    Ok(CommandOutcome::value(limits_value(DYNAMIC_LIMITS)))
}

fn start_set_phase(
    device: &mut Diffractometer,
    args: &[String],
) -> Result<CommandOutcome, DeviceError> {
    let phase = required(args, "startSetPhase")?;
    if !PHASES.contains(&phase) {
        return Err(DeviceError::bad_signature("startSetPhase"));
    }

    device.write("CurrentPhase", Value::str(PHASE_UNKNOWN))?;

    let timings = *device.timings();
    let mut writes = vec![("CurrentPhase".to_string(), Value::str(phase))];
    if phase == PHASE_DATA_COLLECTION {
        writes.push(("BeamstopPosition".to_string(), Value::str(BEAMSTOP_BEAM)));
    }
    let timeline = Timeline::new(format!("phase {phase}")).then(timings.phase_change, writes);

    let id = device.tasks_mut().create(
        &format!("Set {} PHASE", phase.to_uppercase()),
        timings.phase_change + timings.phase_task_margin,
    );
    Ok(CommandOutcome::value(task_value(id)).with_background(timeline))
}

fn task_value(id: u64) -> Value {
    Value::Int(i64::try_from(id).unwrap_or(i64::MAX))
}

fn start_raster_scan(
    device: &mut Diffractometer,
    _args: &[String],
) -> Result<CommandOutcome, DeviceError> {
    let duration = device.timings().raster_scan;
    let id = device.tasks_mut().create("Start RASTER SCAN", duration);
    Ok(CommandOutcome::value(task_value(id)))
}

fn start_scan_ex(
    device: &mut Diffractometer,
    _args: &[String],
) -> Result<CommandOutcome, DeviceError> {
    let duration = device.timings().scan;
    let id = device.tasks_mut().create("Start SCAN", duration);
    Ok(CommandOutcome::value(task_value(id)))
}

fn start_scan_4d_ex(
    device: &mut Diffractometer,
    _args: &[String],
) -> Result<CommandOutcome, DeviceError> {
    let duration = device.timings().scan_4d;
    let id = device.tasks_mut().create("Start 4D-SCAN", duration);
    Ok(CommandOutcome::value(task_value(id)))
}

fn is_task_running(
    device: &mut Diffractometer,
    args: &[String],
) -> Result<CommandOutcome, DeviceError> {
    let id = task_id(args, "isTaskRunning")?;
    let running = device.tasks().is_running(id)?;
    Ok(CommandOutcome::value(running))
}

fn get_task_info(
    device: &mut Diffractometer,
    args: &[String],
) -> Result<CommandOutcome, DeviceError> {
    let id = task_id(args, "getTaskInfo")?;
    let status = device.tasks().status(id)?;
    Ok(CommandOutcome::value(status.into_value()))
}

fn no_op(_device: &mut Diffractometer, _args: &[String]) -> Result<CommandOutcome, DeviceError> {
    Ok(CommandOutcome::void())
}

fn get_beamstop_position(
    device: &mut Diffractometer,
    _args: &[String],
) -> Result<CommandOutcome, DeviceError> {
    let position = device.read("BeamstopPosition")?.clone();
    Ok(CommandOutcome::value(position))
}

fn set_beamstop_position(
    device: &mut Diffractometer,
    args: &[String],
) -> Result<CommandOutcome, DeviceError> {
    device.check_beamstop_move()?;

    let position = required(args, "setBeamstopPosition")?;
    if !BEAMSTOP_POSITIONS.contains(&position) {
        return Err(DeviceError::bad_signature("setBeamstopPosition"));
    }

    let current = device.read("BeamstopPosition")?.as_str().unwrap_or_default();
    if current == BEAMSTOP_MOVING {
        return Err(DeviceError::Command(
            "Cannot execute command: motor is moving".to_string(),
        ));
    }
    if current == position {
        return Ok(CommandOutcome::void());
    }

    device.write("BeamstopPosition", Value::str(BEAMSTOP_MOVING))?;
    let travel = device.timings().beamstop_travel;
    let timeline = Timeline::new(format!("beamstop {position}")).then(
        travel,
        vec![("BeamstopPosition".to_string(), Value::str(position))],
    );
    Ok(CommandOutcome::void().with_background(timeline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::Timings;
    use std::time::Duration;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn list_reports_registration_order() {
        let table = CommandTable::md3();
        assert_eq!(table.len(), 12);
        let listing = table.list();
        let entries = listing.split('\t').collect::<Vec<_>>();
        assert_eq!(entries[0], "double[] getMotorLimits(String)");
        assert_eq!(entries[1], "int startSetPhase(Phase)");
        assert_eq!(entries[7], "void saveCentringPositions()");
        assert_eq!(entries[11], "Position setBeamstopPosition(Position)");
    }

    #[test]
    fn unknown_command_names_the_method() {
        let table = CommandTable::md3();
        assert_eq!(
            table.get("fly").map(|spec| spec.name),
            Err(DeviceError::UnknownCommand("fly".to_string()))
        );
    }

    #[test]
    fn motor_limits_come_from_the_static_table() {
        let mut device = Diffractometer::default();
        let outcome = get_motor_limits(&mut device, &args(&["Omega"])).expect("omega");
        assert_eq!(outcome.value.encode(), "\u{1f}-Infinity\u{1f}Infinity\u{1f}");

        let outcome = get_motor_limits(&mut device, &args(&["CentringY"])).expect("centring");
        assert_eq!(
            outcome.value,
            Value::List(vec![Value::Double(-3.05), Value::Double(3.5)])
        );

        assert_eq!(
            get_motor_limits(&mut device, &args(&["Kappa"])),
            Err(DeviceError::Command("Invalid motor: Kappa".to_string()))
        );
        assert_eq!(
            get_motor_limits(&mut device, &[]),
            Err(DeviceError::bad_signature("getMotorLimits"))
        );

        let dynamic = get_motor_dynamic_limits(&mut device, &args(&["Kappa"])).expect("dynamic");
        assert_eq!(dynamic.value, limits_value(DYNAMIC_LIMITS));
    }

    #[test]
    fn scans_register_tasks_with_fixed_names() {
        let mut device = Diffractometer::default();
        let raster = start_raster_scan(&mut device, &args(&["0.1", "0.2", "3", "4"]))
            .expect("raster");
        let scan = start_scan_ex(&mut device, &[]).expect("scan");
        let scan_4d = start_scan_4d_ex(&mut device, &[]).expect("4d");

        assert_eq!(raster.value, Value::Int(1));
        assert_eq!(scan.value, Value::Int(2));
        assert_eq!(scan_4d.value, Value::Int(3));
        assert!(raster.background.is_none());
        assert_eq!(
            device.tasks().get(1).map(|task| task.name.as_str()),
            Ok("Start RASTER SCAN")
        );
        assert_eq!(
            device.tasks().get(3).map(|task| task.name.as_str()),
            Ok("Start 4D-SCAN")
        );

        let running = is_task_running(&mut device, &args(&["1"])).expect("running");
        assert_eq!(running.value, Value::Bool(true));
    }

    #[test]
    fn task_queries_reject_bad_ids() {
        let mut device = Diffractometer::default();
        assert_eq!(
            get_task_info(&mut device, &args(&["7"])),
            Err(DeviceError::Command("Invalid task: 7".to_string()))
        );
        assert_eq!(
            get_task_info(&mut device, &args(&["-1"])),
            Err(DeviceError::Command("Invalid task: -1".to_string()))
        );
        assert_eq!(
            is_task_running(&mut device, &args(&["0"])),
            Err(DeviceError::Command("Invalid task: 0".to_string()))
        );
        assert_eq!(
            is_task_running(&mut device, &args(&["seven"])),
            Err(DeviceError::bad_signature("isTaskRunning"))
        );
    }

    #[test]
    fn set_phase_marks_unknown_and_schedules_the_transition() {
        let mut device = Diffractometer::default();
        let outcome = start_set_phase(&mut device, &args(&["DataCollection"])).expect("phase");

        assert_eq!(outcome.value, Value::Int(1));
        assert_eq!(device.read("CurrentPhase"), Ok(&Value::str("Unknown")));
        let timeline = outcome.background.expect("phase timeline");
        assert_eq!(timeline.steps.len(), 1);
        assert_eq!(timeline.steps[0].delay, Timings::default().phase_change);
        assert_eq!(
            timeline.steps[0].writes,
            vec![
                ("CurrentPhase".to_string(), Value::str("DataCollection")),
                ("BeamstopPosition".to_string(), Value::str("BEAM")),
            ]
        );

        let task = device.tasks().get(1).expect("phase task");
        assert_eq!(task.name, "Set DATACOLLECTION PHASE");
        assert_eq!(
            (task.end_time - task.start_time).num_milliseconds(),
            3_200
        );
    }

    #[test]
    fn bogus_phase_creates_no_task() {
        let mut device = Diffractometer::default();
        assert_eq!(
            start_set_phase(&mut device, &args(&["Bogus"])),
            Err(DeviceError::bad_signature("startSetPhase"))
        );
        assert!(device.tasks().is_empty());
        assert_eq!(device.read("CurrentPhase"), Ok(&Value::str("Transfer")));
    }

    #[test]
    fn beamstop_moves_through_unknown() {
        let mut device = Diffractometer::default();

        let noop = set_beamstop_position(&mut device, &args(&["PARK"])).expect("park");
        assert_eq!(noop, CommandOutcome::void());

        let outcome = set_beamstop_position(&mut device, &args(&["BEAM"])).expect("beam");
        assert_eq!(outcome.value, Value::Null);
        assert_eq!(device.read("BeamstopPosition"), Ok(&Value::str("UNKNOWN")));
        let timeline = outcome.background.expect("beamstop timeline");
        assert_eq!(timeline.total_delay(), Duration::from_millis(2_600));
        assert_eq!(
            timeline.steps[0].writes,
            vec![("BeamstopPosition".to_string(), Value::str("BEAM"))]
        );

        assert_eq!(
            set_beamstop_position(&mut device, &args(&["PARK"])),
            Err(DeviceError::Command(
                "Cannot execute command: motor is moving".to_string()
            ))
        );
        assert_eq!(
            set_beamstop_position(&mut device, &args(&["SIDEWAYS"])),
            Err(DeviceError::bad_signature("setBeamstopPosition"))
        );
    }

    #[test]
    fn beamstop_interlock_is_checked_first() {
        let mut device = Diffractometer::default();
        device
            .write("BeamstopPosition", Value::str("BEAM"))
            .expect("beamstop in beam");
        device
            .write("FastShutterIsOpen", Value::Bool(true))
            .expect("open shutter");

        assert_eq!(
            set_beamstop_position(&mut device, &args(&["SIDEWAYS"])),
            Err(DeviceError::DisallowedState("Invalid value".to_string()))
        );
        assert_eq!(device.read("BeamstopPosition"), Ok(&Value::str("BEAM")));
    }
}
