use crate::commands::{CommandOutcome, CommandTable};
use crate::error::{Access, DeviceError};
use crate::motion::{self, Timeline, Timings};
use crate::protocol::Event;
use crate::store::{Attribute, AttributeStore, ChangeListener, DerivedRule, ListenerId};
use crate::tasks::TaskRegistry;
use crate::value::{ArrayKind, CodecError, TypeTag, Value};
use chrono::Utc;
use std::sync::Arc;

pub const PHASES: [&str; 4] = ["Centring", "BeamLocation", "DataCollection", "Transfer"];
pub const PHASE_DATA_COLLECTION: &str = "DataCollection";
pub const PHASE_UNKNOWN: &str = "Unknown";

pub const BEAMSTOP_POSITIONS: [&str; 4] = ["PARK", "BEAM", "TRANSFER", "OFF"];
pub const BEAMSTOP_BEAM: &str = "BEAM";
pub const BEAMSTOP_MOVING: &str = "UNKNOWN";

const STATE: TypeTag = TypeTag::State;
const DOUBLE: TypeTag = TypeTag::Double;
const STRING: TypeTag = TypeTag::String;
const INTEGER: TypeTag = TypeTag::Integer;
const BOOLEAN: TypeTag = TypeTag::Boolean;

const ALIGNMENT_TABLE_POSITION: TypeTag =
    TypeTag::Enumeration("org.embl.md.dev.AlignmentTable$Position");
const APERTURE_POSITION: TypeTag = TypeTag::Enumeration("org.embl.md.dev.Aperture$Position");
const BEAMSTOP_POSITION: TypeTag = TypeTag::Enumeration("org.embl.md.dev.Beamstop$Position");
const CAPILLARY_POSITION: TypeTag = TypeTag::Enumeration("org.embl.md.dev.Capillary$Position");
const SCINTILLATOR_POSITION: TypeTag =
    TypeTag::Enumeration("org.embl.md.dev.Scintillator$Position");
const PHASE: TypeTag = TypeTag::Enumeration("org.embl.md.RemoteInterface$Phase");
const HEAD_TYPE: TypeTag = TypeTag::Enumeration("org.embl.md.RemoteInterface$HeadType");
const TRANSFER_MODE: TypeTag = TypeTag::Enumeration("org.embl.md.RemoteInterface$TransferMode");
const PLATE_LOCATION: TypeTag = TypeTag::Enumeration("org.embl.md.dev.PlateLocation");

const MOTORS: [(&str, f64, f64); 7] = [
    ("AlignmentX", -5.6, 6.1),
    ("AlignmentY", -77.0, 2.0),
    ("AlignmentZ", -3.399, 6.1),
    ("Omega", f64::NEG_INFINITY, f64::INFINITY),
    ("CentringX", -3.05, 3.05),
    ("CentringY", -3.05, 3.5),
    ("CentringTableFocus", -3.19668, 3.19871),
];

const ZOOM_ATTRIBUTE: &str = "CoaxialCameraZoomValue";

/// Camera pixel scale (same for X and Y) per zoom level, level 1 first.
const COAX_CAM_SCALES: [f64; 7] = [
    0.0018851562499999997,
    0.0015743281249999996,
    0.0012289635416666664,
    0.000950012567708333,
    0.00023299124062499998,
    0.00018080156250000008,
    0.00011700000000000001,
];

const INITIAL_EVENT_AXES: [&str; 16] = [
    "Omega",
    "AlignmentX",
    "AlignmentY",
    "AlignmentZ",
    "CentringX",
    "CentringY",
    "CapillaryVertical",
    "CapillaryHorizontal",
    "ApertureVertical",
    "ApertureHorizontal",
    "ScintillatorHorizontal",
    "ScintillatorVertical",
    "BeamstopX",
    "BeamstopY",
    "BeamstopZ",
    "Zoom",
];

fn attribute_table() -> Vec<Attribute> {
    let last_task_info = Value::List(
        [
            "Hot Start",
            "0",
            "2023-08-04 10:41:57.125",
            "2023-08-04 10:41:57.325",
            "true",
            "null",
            "1",
        ]
        .into_iter()
        .map(Value::str)
        .collect(),
    );
    let aperture_diameters = Value::List(
        [5, 10, 15, 20, 50, 600]
            .into_iter()
            .map(Value::Int)
            .collect(),
    );

    vec![
        Attribute::new("AlignmentTablePosition", "TRANSFER", ALIGNMENT_TABLE_POSITION),
        Attribute::new("AlignmentXPosition", 6.582e-06, DOUBLE),
        Attribute::new("AlignmentXState", "Ready", STATE),
        Attribute::new("AlignmentYPosition", 9.362e-06, DOUBLE),
        Attribute::new("AlignmentYState", "Ready", STATE),
        Attribute::new("AlignmentZPosition", 5.712e-05, DOUBLE),
        Attribute::new("AlignmentZState", "Ready", STATE),
        Attribute::new(
            "ApertureDiameters",
            aperture_diameters,
            TypeTag::Array(ArrayKind::Integer),
        ),
        Attribute::new("ApertureHorizontalPosition", 0.3077, DOUBLE),
        Attribute::new("ApertureHorizontalState", "Ready", STATE),
        Attribute::new("AperturePosition", "BEAM", APERTURE_POSITION),
        Attribute::new("ApertureVerticalPosition", -4.778, DOUBLE),
        Attribute::new("ApertureVerticalState", "Ready", STATE),
        Attribute::new("BackLightFactor", 1.6, DOUBLE),
        Attribute::new("BackLightIsOn", false, BOOLEAN),
        Attribute::new("BeamstopDistancePosition", 6.863187356482003, DOUBLE),
        Attribute::new("BeamstopPosition", "PARK", BEAMSTOP_POSITION)
            .with_validator(move_beamstop_check),
        Attribute::new("BeamstopXPosition", 6.93, DOUBLE),
        Attribute::new("BeamstopXState", "Ready", STATE),
        Attribute::new("BeamstopYPosition", 4.75, DOUBLE),
        Attribute::new("BeamstopYState", "Ready", STATE),
        Attribute::new("BeamstopZPosition", -94.3, DOUBLE),
        Attribute::new("BeamstopZState", "Ready", STATE),
        Attribute::new("CameraExposure", 40000.0, DOUBLE),
        Attribute::new("CapillaryHorizontalPosition", -2.1114864865e-6, DOUBLE),
        Attribute::new("CapillaryHorizontalState", "Ready", STATE),
        Attribute::new("CapillaryPosition", "PARK", CAPILLARY_POSITION),
        Attribute::new("CapillaryVerticalPosition", -93.49539792171772, DOUBLE),
        Attribute::new("CapillaryVerticalState", "Ready", STATE),
        Attribute::new("CentringTableFocusPosition", 0.42, DOUBLE),
        Attribute::new("CentringTableFocusState", "Ready", STATE),
        Attribute::new("CentringTableVerticalPosition", -1.174697170195887e-05, DOUBLE),
        Attribute::new("CentringXPosition", 1.746e-06, DOUBLE),
        Attribute::new("CentringXState", "Ready", STATE),
        Attribute::new("CentringYPosition", 1.174e-05, DOUBLE),
        Attribute::new("CentringYState", "Ready", STATE),
        Attribute::new("CoaxCamScaleX", COAX_CAM_SCALES[0], DOUBLE),
        Attribute::new("CoaxCamScaleY", COAX_CAM_SCALES[0], DOUBLE),
        Attribute::new(ZOOM_ATTRIBUTE, 1i64, INTEGER).with_validator(zoom_level_check),
        Attribute::new("CurrentApertureDiameterIndex", 2i64, INTEGER),
        Attribute::new("CurrentPhase", "Transfer", PHASE),
        Attribute::new("DetectorDistance", 700.0, DOUBLE),
        Attribute::new("DetectorState", "Ready", STATE),
        Attribute::new("DirectBeamEnabled", false, BOOLEAN),
        Attribute::new("FastShutterIsOpen", false, BOOLEAN).with_validator(fast_shutter_check),
        Attribute::new("FrontLightFactor", 0.9, DOUBLE),
        Attribute::new("FrontLightIsOn", false, BOOLEAN),
        Attribute::new("HeadType", "SmartMagnet", HEAD_TYPE),
        Attribute::new(
            "LastTaskInfo",
            last_task_info,
            TypeTag::Array(ArrayKind::String),
        ),
        Attribute::new("OmegaPosition", 359.999979169585, DOUBLE),
        Attribute::new("OmegaState", "Ready", STATE),
        Attribute::new("PlateLocation", "null", PLATE_LOCATION),
        Attribute::new("SampleHolderLength", 22.0, DOUBLE),
        Attribute::new("SampleIsLoaded", false, BOOLEAN),
        Attribute::new("ScanExposureTime", 0.663, DOUBLE),
        Attribute::new("ScanNumberOfFrames", 1i64, INTEGER),
        Attribute::new("ScanRange", 6.0, DOUBLE),
        Attribute::new("ScanStartAngle", 246.798, DOUBLE),
        Attribute::new("ScintillatorHorizontalPosition", -89.99992208163434, DOUBLE),
        Attribute::new("ScintillatorHorizontalState", "Ready", STATE),
        Attribute::new("ScintillatorPosition", "UNKNOWN", SCINTILLATOR_POSITION),
        Attribute::new("ScintillatorVerticalPosition", -89.99992208163434, DOUBLE),
        Attribute::new("ScintillatorVerticalState", "Ready", STATE),
        Attribute::new("State", "Ready", STATE),
        Attribute::new("Status", "Ready", STRING),
        Attribute::new("TransferMode", "SAMPLE_CHANGER", TRANSFER_MODE),
        Attribute::new("ZoomPosition", 0.0, DOUBLE),
        Attribute::new("ZoomState", "Ready", STATE),
    ]
}

fn flag(store: &AttributeStore, name: &str) -> bool {
    store
        .read(name)
        .ok()
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

// Opening the fast shutter with the beamstop out of the beam would expose the detector.
fn fast_shutter_check(store: &AttributeStore, value: Value) -> Result<Value, DeviceError> {
    let opening = value.as_bool().unwrap_or(false);
    let beamstop_in_beam = store
        .read("BeamstopPosition")
        .ok()
        .and_then(Value::as_str)
        == Some(BEAMSTOP_BEAM);
    if !flag(store, "DirectBeamEnabled") && opening && !beamstop_in_beam {
        return Err(DeviceError::DisallowedState(
            "Cannot change value to: true".to_string(),
        ));
    }
    Ok(value)
}

fn beamstop_interlock(store: &AttributeStore) -> Result<(), DeviceError> {
    if !flag(store, "DirectBeamEnabled") && flag(store, "FastShutterIsOpen") {
        return Err(DeviceError::DisallowedState("Invalid value".to_string()));
    }
    Ok(())
}

fn move_beamstop_check(store: &AttributeStore, value: Value) -> Result<Value, DeviceError> {
    beamstop_interlock(store)?;
    Ok(value)
}

fn zoom_level_check(_store: &AttributeStore, value: Value) -> Result<Value, DeviceError> {
    match value.as_i64() {
        Some(level) if (1..=COAX_CAM_SCALES.len() as i64).contains(&level) => Ok(value),
        _ => Err(DeviceError::DisallowedState(format!(
            "Cannot change value to: {value}"
        ))),
    }
}

fn zoom_scales(level: &Value) -> Option<Vec<Value>> {
    let index = usize::try_from(level.as_i64()?).ok()?.checked_sub(1)?;
    let scale = *COAX_CAM_SCALES.get(index)?;
    Some(vec![Value::Double(scale), Value::Double(scale)])
}

const ZOOM_RULE: DerivedRule = DerivedRule {
    trigger: ZOOM_ATTRIBUTE,
    targets: &["CoaxCamScaleX", "CoaxCamScaleY"],
    derive: zoom_scales,
};

/// The emulated diffractometer: attributes, tasks and commands, with the interlocks between them.
pub struct Diffractometer {
    store: AttributeStore,
    tasks: TaskRegistry,
    commands: CommandTable,
    timings: Timings,
}

impl Default for Diffractometer {
    fn default() -> Self {
        Self::new(Timings::default())
    }
}

impl Diffractometer {
    pub fn new(timings: Timings) -> Self {
        let mut store = AttributeStore::new();
        for attribute in attribute_table() {
            store.register(attribute);
        }
        store.add_rule(ZOOM_RULE);
        Self {
            store,
            tasks: TaskRegistry::new(),
            commands: CommandTable::md3(),
            timings,
        }
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut TaskRegistry {
        &mut self.tasks
    }

    pub fn attribute(&self, name: &str) -> Result<&Attribute, DeviceError> {
        self.store.attribute(name)
    }

    pub fn read(&self, name: &str) -> Result<&Value, DeviceError> {
        self.store.read(name)
    }

    pub fn write(&mut self, name: &str, value: Value) -> Result<(), DeviceError> {
        self.store.write(name, value, None)
    }

    /// Applies a `WRTE` request. Motor positions are not written here: the returned timeline
    /// drives the motor there step by step.
    pub fn write_from_wire(&mut self, name: &str, raw: &str) -> Result<Option<Timeline>, DeviceError> {
        let tag = match self.store.attribute(name) {
            Ok(attribute) => attribute.tag(),
            Err(_) => return Err(DeviceError::unknown_attribute(name, Access::Set)),
        };
        let value = tag.decode(raw)?;

        if let Some(motor) = self.motor_name(name) {
            let target = value
                .as_f64()
                .ok_or_else(|| CodecError::InvalidDouble(raw.to_string()))?;
            let start = self.store.read(name)?.as_f64().unwrap_or(target);
            return Ok(Some(motion::motor_move(motor, start, target, &self.timings)));
        }

        self.store.write(name, value, None)?;
        Ok(None)
    }

    pub fn exec(&mut self, command: &str, args: &[String]) -> Result<CommandOutcome, DeviceError> {
        let handler = self.commands.get(command)?.handler;
        handler(self, args)
    }

    pub fn list_commands(&self) -> String {
        self.commands.list()
    }

    /// `OmegaPosition` -> `Omega`; `None` unless the attribute is a registered motor's position.
    pub fn motor_name<'a>(&self, attribute: &'a str) -> Option<&'a str> {
        let motor = attribute.strip_suffix("Position")?;
        MOTORS
            .iter()
            .any(|(name, _, _)| *name == motor)
            .then_some(motor)
    }

    pub fn motor_limits(&self, motor: &str) -> Option<(f64, f64)> {
        MOTORS
            .iter()
            .find(|(name, _, _)| *name == motor)
            .map(|(_, low, high)| (*low, *high))
    }

    pub fn check_beamstop_move(&self) -> Result<(), DeviceError> {
        beamstop_interlock(&self.store)
    }

    pub fn subscribe(&mut self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.store.subscribe(listener)
    }

    /// Snapshot sent to a client right after it connects. The real device labels each axis
    /// position (and the detector distance) with the state attribute's name; `fix_labels`
    /// uses the attributes' own names instead.
    pub fn initial_events(&self, fix_labels: bool) -> Vec<Event> {
        let timestamp = Utc::now().timestamp();
        let mut labelled = vec![
            ("State".to_string(), "State".to_string()),
            ("Status".to_string(), "Status".to_string()),
        ];
        for axis in INITIAL_EVENT_AXES {
            let state = motion::state_attribute(axis);
            let position = motion::position_attribute(axis);
            let position_label = if fix_labels {
                position.clone()
            } else {
                state.clone()
            };
            labelled.push((state.clone(), state));
            labelled.push((position, position_label));
        }
        labelled.push(("DetectorState".to_string(), "DetectorState".to_string()));
        labelled.push((
            "DetectorDistance".to_string(),
            if fix_labels {
                "DetectorDistance"
            } else {
                "DetectorState"
            }
            .to_string(),
        ));
        for _ in 0..2 {
            labelled.push((
                "CurrentApertureDiameterIndex".to_string(),
                "CurrentApertureDiameterIndex".to_string(),
            ));
        }

        labelled
            .into_iter()
            .filter_map(|(attribute, label)| {
                let attribute = self.store.attribute(&attribute).ok()?;
                Some(Event {
                    name: label,
                    value: attribute.value().clone(),
                    timestamp,
                    type_tag: attribute.tag(),
                })
            })
            .collect()
    }
}
