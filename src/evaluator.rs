//! Threshold evaluation of readings.
//!
//! Conditions are static: each binds one [`Measurement`] to an inclusive
//! warning and critical cutoff. Evaluation is pure and reports every
//! condition a reading breaches, at the highest severity reached.

use crate::models::{NewAlert, Reading, Severity};
use crate::normalizer::Measurement;

// ---

/// A named threshold rule over one measurement field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertCondition {
    /// Stable identity used for deduplication, e.g. `flow_rate`.
    pub key: &'static str,
    /// Display label, e.g. "Flow rate".
    pub label: &'static str,
    pub field: Measurement,
    pub unit: &'static str,
    pub warning: f64,
    pub critical: f64,
}

impl AlertCondition {
    // ---
    /// Classify `value`; critical is checked first so it is never reported twice.
    pub fn classify(&self, value: f64) -> Option<Severity> {
        // ---
        if value >= self.critical {
            Some(Severity::Critical)
        } else if value >= self.warning {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    /// Title stored on alerts raised by this condition, e.g. "Flow rate: Critical".
    pub fn title(&self, severity: Severity) -> String {
        format!("{}: {}", self.label, severity.label())
    }
}

/// Flow rate in L/s.
pub const FLOW_RATE: AlertCondition = AlertCondition {
    key: "flow_rate",
    label: "Flow rate",
    field: Measurement::FlowRate,
    unit: "L/s",
    warning: 5.1,
    critical: 5.8,
};

/// Precipitation rate in mm/h.
pub const PRECIPITATION_RATE: AlertCondition = AlertCondition {
    key: "precipitation_rate",
    label: "Precipitation rate",
    field: Measurement::PrecipitationRate,
    unit: "mm/h",
    warning: 730.0,
    critical: 1000.0,
};

pub const DEFAULT_CONDITIONS: [AlertCondition; 2] = [FLOW_RATE, PRECIPITATION_RATE];

/// One condition breached by a reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triggered {
    pub condition: AlertCondition,
    pub severity: Severity,
    pub value: f64,
}

impl Triggered {
    // ---
    /// Build the alert record this trigger would create for `station_id`.
    pub fn to_new_alert(&self, station_id: i32) -> NewAlert {
        // ---
        let c = &self.condition;
        NewAlert {
            station_id,
            condition_key: c.key.to_string(),
            condition_title: c.title(self.severity),
            severity: self.severity,
            description: format!("{} of {} {} recorded.", c.label, self.value, c.unit),
        }
    }
}

/// Evaluates readings against a fixed set of conditions.
#[derive(Debug, Clone)]
pub struct Evaluator {
    conditions: Vec<AlertCondition>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(DEFAULT_CONDITIONS.to_vec())
    }
}

impl Evaluator {
    // ---
    pub fn new(conditions: Vec<AlertCondition>) -> Self {
        Self { conditions }
    }

    pub fn conditions(&self) -> &[AlertCondition] {
        &self.conditions
    }

    /// All conditions breached by `reading`, in configuration order.
    ///
    /// Returns an empty vector when nothing is breached.
    pub fn evaluate(&self, reading: &Reading) -> Vec<Triggered> {
        // ---
        self.conditions
            .iter()
            .filter_map(|condition| {
                let value = condition.field.value_of(reading);
                condition.classify(value).map(|severity| Triggered {
                    condition: *condition,
                    severity,
                    value,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::Utc;

    fn create_test_reading(flow_rate: f64, precipitation_rate: f64) -> Reading {
        // ---
        Reading {
            station_id: 1,
            temperature: 22.0,
            humidity: 60.0,
            precipitation_rate,
            flow_rate,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_flow_rate_warning_boundary_is_inclusive() {
        // ---
        let triggered = Evaluator::default().evaluate(&create_test_reading(5.1, 0.0));

        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].condition.key, "flow_rate");
        assert_eq!(triggered[0].severity, Severity::Warning);
    }

    #[test]
    fn test_flow_rate_just_below_warning() {
        // ---
        let triggered = Evaluator::default().evaluate(&create_test_reading(5.099, 0.0));
        assert!(triggered.is_empty());
    }

    #[test]
    fn test_flow_rate_critical_only_once() {
        // ---
        let triggered = Evaluator::default().evaluate(&create_test_reading(5.8, 0.0));

        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].severity, Severity::Critical);
    }

    #[test]
    fn test_precipitation_boundaries() {
        // ---
        let evaluator = Evaluator::default();

        assert!(evaluator.evaluate(&create_test_reading(0.0, 729.99)).is_empty());

        let warning = evaluator.evaluate(&create_test_reading(0.0, 730.0));
        assert_eq!(warning.len(), 1);
        assert_eq!(warning[0].condition.key, "precipitation_rate");
        assert_eq!(warning[0].severity, Severity::Warning);

        let critical = evaluator.evaluate(&create_test_reading(0.0, 1000.0));
        assert_eq!(critical[0].severity, Severity::Critical);
    }

    #[test]
    fn test_multiple_conditions_all_reported() {
        // ---
        let triggered = Evaluator::default().evaluate(&create_test_reading(6.0, 1500.0));

        assert_eq!(triggered.len(), 2);
        assert!(triggered.iter().all(|t| t.severity == Severity::Critical));
        let keys: Vec<&str> = triggered.iter().map(|t| t.condition.key).collect();
        assert_eq!(keys, vec!["flow_rate", "precipitation_rate"]);
    }

    #[test]
    fn test_mixed_severities_in_one_reading() {
        // ---
        let triggered = Evaluator::default().evaluate(&create_test_reading(5.5, 1200.0));

        assert_eq!(triggered.len(), 2);
        assert_eq!(triggered[0].severity, Severity::Warning);
        assert_eq!(triggered[1].severity, Severity::Critical);
    }

    #[test]
    fn test_zero_reading_triggers_nothing() {
        // ---
        let triggered = Evaluator::default().evaluate(&create_test_reading(0.0, 0.0));
        assert!(triggered.is_empty());
    }

    #[test]
    fn test_custom_condition_on_temperature() {
        // ---
        let heat = AlertCondition {
            key: "temperature",
            label: "Temperature",
            field: Measurement::Temperature,
            unit: "C",
            warning: 20.0,
            critical: 40.0,
        };
        let evaluator = Evaluator::new(vec![heat]);

        let triggered = evaluator.evaluate(&create_test_reading(9.0, 9000.0));
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].condition.key, "temperature");
        assert_eq!(triggered[0].value, 22.0);
    }

    #[test]
    fn test_new_alert_text() {
        // ---
        let triggered = Evaluator::default().evaluate(&create_test_reading(6.5, 0.0));
        let alert = triggered[0].to_new_alert(4);

        assert_eq!(alert.station_id, 4);
        assert_eq!(alert.condition_key, "flow_rate");
        assert_eq!(alert.condition_title, "Flow rate: Critical");
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.description, "Flow rate of 6.5 L/s recorded.");
    }
}
