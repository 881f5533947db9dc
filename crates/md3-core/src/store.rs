use crate::error::{Access, DeviceError};
use crate::value::{TypeTag, Value};
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Accepts (possibly transforming) a proposed value, or rejects it. Receives the store so
/// interlocks can consult related attributes; it must not mutate anything.
pub type Validator = fn(&AttributeStore, Value) -> Result<Value, DeviceError>;

#[derive(Clone)]
pub struct Attribute {
    name: String,
    value: Value,
    tag: TypeTag,
    validator: Option<Validator>,
}

impl Attribute {
    pub fn new(name: &str, value: impl Into<Value>, tag: TypeTag) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            tag,
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("tag", &self.tag)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttributeChange<'a> {
    pub name: &'a str,
    pub value: &'a Value,
    pub tag: TypeTag,
    pub timestamp: i64,
}

pub trait ChangeListener: Send + Sync {
    fn attribute_changed(&self, change: &AttributeChange<'_>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Writes `targets` whenever `trigger` changes. Targets may never be triggers themselves,
/// which the store enforces when a rule is added.
#[derive(Clone, Copy)]
pub struct DerivedRule {
    pub trigger: &'static str,
    pub targets: &'static [&'static str],
    pub derive: fn(&Value) -> Option<Vec<Value>>,
}

#[derive(Default)]
pub struct AttributeStore {
    attrs: HashMap<String, Attribute>,
    rules: Vec<DerivedRule>,
    listeners: Vec<(ListenerId, Arc<dyn ChangeListener>)>,
    next_listener: u64,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, attribute: Attribute) {
        self.attrs.insert(attribute.name.clone(), attribute);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn attribute(&self, name: &str) -> Result<&Attribute, DeviceError> {
        self.attrs
            .get(name)
            .ok_or_else(|| DeviceError::unknown_attribute(name, Access::Get))
    }

    pub fn read(&self, name: &str) -> Result<&Value, DeviceError> {
        self.attribute(name).map(Attribute::value)
    }

    pub fn add_rule(&mut self, rule: DerivedRule) -> bool {
        let loops_back = self.rules.iter().chain(std::iter::once(&rule)).any(|existing| {
            rule.targets.contains(&existing.trigger) || existing.targets.contains(&rule.trigger)
        });
        if loops_back {
            return false;
        }
        self.rules.push(rule);
        true
    }

    pub fn subscribe(&mut self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn write(
        &mut self,
        name: &str,
        value: Value,
        timestamp: Option<i64>,
    ) -> Result<(), DeviceError> {
        let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp());
        let (tag, validator) = match self.attrs.get(name) {
            Some(attr) => (attr.tag, attr.validator),
            None => return Err(DeviceError::unknown_attribute(name, Access::Set)),
        };
        tag.check(&value)?;
        let accepted = match validator {
            Some(validate) => validate(self, value)?,
            None => value,
        };
        tag.check(&accepted)?;

        let Some(attr) = self.attrs.get_mut(name) else {
            return Err(DeviceError::unknown_attribute(name, Access::Set));
        };
        attr.value = accepted;

        let change = AttributeChange {
            name: &attr.name,
            value: &attr.value,
            tag: attr.tag,
            timestamp,
        };
        for (_, listener) in &self.listeners {
            listener.attribute_changed(&change);
        }

        let derived = self
            .rules
            .iter()
            .filter(|rule| rule.trigger == name)
            .filter_map(|rule| {
                let values = (rule.derive)(change.value)?;
                Some(rule.targets.iter().copied().zip(values).collect::<Vec<_>>())
            })
            .flatten()
            .collect::<Vec<_>>();
        for (target, value) in derived {
            self.write(target, value, Some(timestamp))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Value, i64)>>,
    }

    impl Recorder {
        fn names(&self) -> Vec<String> {
            self.seen
                .lock()
                .expect("recorder lock")
                .iter()
                .map(|(name, _, _)| name.clone())
                .collect()
        }
    }

    impl ChangeListener for Recorder {
        fn attribute_changed(&self, change: &AttributeChange<'_>) {
            self.seen.lock().expect("recorder lock").push((
                change.name.to_string(),
                change.value.clone(),
                change.timestamp,
            ));
        }
    }

    fn only_positive(_: &AttributeStore, value: Value) -> Result<Value, DeviceError> {
        match value.as_i64() {
            Some(v) if v > 0 => Ok(value),
            _ => Err(DeviceError::DisallowedState("Invalid value".to_string())),
        }
    }

    fn double_it(value: &Value) -> Option<Vec<Value>> {
        let v = value.as_i64()?;
        Some(vec![Value::Int(v * 2)])
    }

    fn store() -> AttributeStore {
        let mut store = AttributeStore::new();
        store.register(Attribute::new("Level", 1i64, TypeTag::Integer).with_validator(only_positive));
        store.register(Attribute::new("Double", 2i64, TypeTag::Integer));
        store.register(Attribute::new("Label", "a", TypeTag::String));
        store
    }

    #[test]
    fn unknown_names_fail_on_read_and_write() {
        let mut store = store();
        assert_eq!(
            store.read("Foo"),
            Err(DeviceError::unknown_attribute("Foo", Access::Get))
        );
        assert_eq!(
            store.write("Foo", Value::Int(1), None),
            Err(DeviceError::unknown_attribute("Foo", Access::Set))
        );
    }

    #[test]
    fn accepted_write_is_visible_and_notified() {
        let mut store = store();
        let recorder = Arc::new(Recorder::default());
        store.subscribe(recorder.clone());

        store
            .write("Label", Value::str("b"), Some(42))
            .expect("write label");
        assert_eq!(store.read("Label"), Ok(&Value::str("b")));
        let seen = recorder.seen.lock().expect("recorder lock").clone();
        assert_eq!(seen, vec![("Label".to_string(), Value::str("b"), 42)]);
    }

    #[test]
    fn rejected_write_leaves_store_untouched_and_silent() {
        let mut store = store();
        let recorder = Arc::new(Recorder::default());
        store.subscribe(recorder.clone());

        let result = store.write("Level", Value::Int(-3), None);
        assert_eq!(
            result,
            Err(DeviceError::DisallowedState("Invalid value".to_string()))
        );
        assert_eq!(store.read("Level"), Ok(&Value::Int(1)));
        assert!(recorder.names().is_empty());
    }

    #[test]
    fn type_tag_is_fixed() {
        let mut store = store();
        let result = store.write("Label", Value::Int(5), None);
        assert!(matches!(result, Err(DeviceError::Codec(_))));
        assert_eq!(store.attribute("Label").map(Attribute::tag), Ok(TypeTag::String));
    }

    #[test]
    fn derived_rule_writes_targets_after_trigger() {
        let mut store = store();
        assert!(store.add_rule(DerivedRule {
            trigger: "Level",
            targets: &["Double"],
            derive: double_it,
        }));
        let recorder = Arc::new(Recorder::default());
        store.subscribe(recorder.clone());

        store.write("Level", Value::Int(4), Some(7)).expect("write level");
        assert_eq!(store.read("Double"), Ok(&Value::Int(8)));
        assert_eq!(recorder.names(), vec!["Level", "Double"]);
        let seen = recorder.seen.lock().expect("recorder lock").clone();
        assert!(seen.iter().all(|(_, _, ts)| *ts == 7));

        store.write("Double", Value::Int(1), None).expect("write double");
        assert_eq!(store.read("Level"), Ok(&Value::Int(4)));
    }

    #[test]
    fn rules_that_could_feed_back_are_refused() {
        let mut store = store();
        assert!(!store.add_rule(DerivedRule {
            trigger: "Level",
            targets: &["Level"],
            derive: double_it,
        }));
        assert!(store.add_rule(DerivedRule {
            trigger: "Level",
            targets: &["Double"],
            derive: double_it,
        }));
        assert!(!store.add_rule(DerivedRule {
            trigger: "Double",
            targets: &["Label"],
            derive: double_it,
        }));
    }

    #[test]
    fn unsubscribed_listener_stops_receiving() {
        let mut store = store();
        let recorder = Arc::new(Recorder::default());
        let id = store.subscribe(recorder.clone());
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));

        store.write("Label", Value::str("c"), None).expect("write label");
        assert!(recorder.names().is_empty());
    }
}
