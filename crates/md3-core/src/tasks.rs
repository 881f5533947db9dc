use crate::error::DeviceError;
use crate::value::Value;
use chrono::{DateTime, Local, TimeDelta};
use std::collections::BTreeMap;
use std::time::Duration;

const TASK_STATUS_CODE: &str = "8";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: u64,
    pub name: String,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
}

impl Task {
    pub fn is_running_at(&self, now: DateTime<Local>) -> bool {
        now < self.end_time
    }

    pub fn is_running(&self) -> bool {
        self.is_running_at(Local::now())
    }

    pub fn status_at(&self, now: DateTime<Local>) -> TaskStatus {
        let finished = !self.is_running_at(now);
        let when_finished = |text: &str| {
            if finished {
                text.to_string()
            } else {
                String::new()
            }
        };
        TaskStatus {
            name: self.name.clone(),
            code: TASK_STATUS_CODE.to_string(),
            start: format_time(self.start_time),
            end: if finished {
                format_time(self.end_time)
            } else {
                String::new()
            },
            result: when_finished("true"),
            exception: when_finished("null"),
            result_id: when_finished("1"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub name: String,
    pub code: String,
    pub start: String,
    pub end: String,
    pub result: String,
    pub exception: String,
    pub result_id: String,
}

impl TaskStatus {
    pub fn into_value(self) -> Value {
        Value::List(
            [
                self.name,
                self.code,
                self.start,
                self.end,
                self.result,
                self.exception,
                self.result_id,
            ]
            .into_iter()
            .map(Value::Str)
            .collect(),
        )
    }
}

pub fn format_time(time: DateTime<Local>) -> String {
    time.format(TIME_FORMAT).to_string()
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<u64, Task>,
    last_id: u64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: &str, duration: Duration) -> u64 {
        self.create_at(name, Local::now(), duration)
    }

    pub fn create_at(&mut self, name: &str, start: DateTime<Local>, duration: Duration) -> u64 {
        self.last_id += 1;
        let id = self.last_id;
        let span = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        let end = start.checked_add_signed(span).unwrap_or(start);
        self.tasks.insert(
            id,
            Task {
                id,
                name: name.to_string(),
                start_time: start,
                end_time: end,
            },
        );
        id
    }

    pub fn next_id(&self) -> u64 {
        self.last_id + 1
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: u64) -> Result<&Task, DeviceError> {
        self.tasks
            .get(&id)
            .ok_or_else(|| DeviceError::invalid_task(id))
    }

    pub fn is_running(&self, id: u64) -> Result<bool, DeviceError> {
        self.get(id).map(Task::is_running)
    }

    pub fn status(&self, id: u64) -> Result<TaskStatus, DeviceError> {
        self.get(id).map(|task| task.status_at(Local::now()))
    }
}
