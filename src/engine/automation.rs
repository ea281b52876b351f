//! Gain automation timelines
//!
//! A [`GainParam`] is a list of forward-scheduled value changes evaluated
//! against the hardware clock. The control thread and the render path each
//! hold a copy of every timeline and apply the same events in the same order,
//! so the control thread can read the value the render path will produce at
//! any instant without ever asking it.

/// One scheduled change of a gain parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutomationEvent {
    /// Jump to `value` at `time`
    SetValue { value: f32, time: f64 },
    /// Ramp linearly from the previous event's value, reaching `value` at `time`
    LinearRamp { value: f32, time: f64 },
}

impl AutomationEvent {
    #[inline]
    pub fn time(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { time, .. } | AutomationEvent::LinearRamp { time, .. } => {
                time
            }
        }
    }

    #[inline]
    pub fn value(&self) -> f32 {
        match *self {
            AutomationEvent::SetValue { value, .. }
            | AutomationEvent::LinearRamp { value, .. } => value,
        }
    }
}

/// A gain parameter driven by scheduled automation
#[derive(Debug, Clone)]
pub struct GainParam {
    default_value: f32,
    /// Sorted by time; events sharing a time keep insertion order
    events: Vec<AutomationEvent>,
}

impl GainParam {
    pub fn new(default_value: f32) -> Self {
        Self {
            default_value,
            events: Vec::new(),
        }
    }

    /// Insert an event after every event at or before its time
    pub fn schedule(&mut self, event: AutomationEvent) {
        let index = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(index, event);
    }

    /// Drop every event scheduled at or after `from`
    pub fn cancel_scheduled_values(&mut self, from: f64) {
        self.events.retain(|e| e.time() < from);
    }

    /// Cancel everything at or after `at` and pin the value the curve would
    /// have reached there, so a new ramp can start from it without a jump.
    ///
    /// Returns the held value.
    pub fn cancel_and_hold(&mut self, at: f64) -> f32 {
        let held = self.value_at(at);
        self.cancel_scheduled_values(at);
        self.schedule(AutomationEvent::SetValue {
            value: held,
            time: at,
        });
        held
    }

    /// Evaluate the timeline at `time`
    pub fn value_at(&self, time: f64) -> f32 {
        let index = self.events.partition_point(|e| e.time() <= time);
        if index == 0 {
            return self.default_value;
        }

        let previous = self.events[index - 1];
        match self.events.get(index) {
            Some(&AutomationEvent::LinearRamp { value, time: end }) => {
                let start = previous.time();
                if end <= start {
                    return value;
                }
                let progress = ((time - start) / (end - start)) as f32;
                previous.value() + (value - previous.value()) * progress
            }
            _ => previous.value(),
        }
    }

    /// Forget events that can no longer influence values at or after `time`
    pub fn prune_before(&mut self, time: f64) {
        let index = self.events.partition_point(|e| e.time() <= time);
        if index > 1 {
            self.events.drain(..index - 1);
        }
        if let Some(first) = self.events.first() {
            self.default_value = first.value();
        }
    }

    /// Time of the last scheduled event, if any
    pub fn last_event_time(&self) -> Option<f64> {
        self.events.last().map(|e| e.time())
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}
