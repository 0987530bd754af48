//! Quality-control flags.
//!
//! Every sample written to a variable with a flag companion gets one flag
//! from [`QC_FLAGS`]. Callers plug domain checks in per key through
//! [`QcEvaluator`]; without one the engine only separates missing values
//! from unchecked ones.

use std::collections::HashMap;

use crate::format::{ArrayData, Scalar};
use crate::insert::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum QcFlag {
    NoQcPerformed = 0,
    GoodData = 1,
    ProbablyGoodData = 2,
    BadDataPotentiallyCorrectable = 3,
    BadData = 4,
    ValueChanged = 5,
    InterpolatedValue = 8,
    MissingValue = 9,
}

impl QcFlag {
    pub const fn value(self) -> i8 {
        self as i8
    }
}

impl From<QcFlag> for i8 {
    fn from(flag: QcFlag) -> Self {
        flag.value()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagDef {
    pub name: &'static str,
    pub value: i8,
    pub description: &'static str,
}

/// Immutable flag table shared by the materializer and the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagVocabulary {
    flags: &'static [FlagDef],
}

pub const QC_FLAGS: FlagVocabulary = FlagVocabulary {
    flags: &[
        FlagDef {
            name: "no_qc_performed",
            value: 0,
            description: "no quality control has been applied",
        },
        FlagDef {
            name: "good_data",
            value: 1,
            description: "passed all checks",
        },
        FlagDef {
            name: "probably_good_data",
            value: 2,
            description: "passed the checks that could be run",
        },
        FlagDef {
            name: "bad_data_potentially_correctable",
            value: 3,
            description: "failed a check but may be recovered",
        },
        FlagDef {
            name: "bad_data",
            value: 4,
            description: "failed a check",
        },
        FlagDef {
            name: "value_changed",
            value: 5,
            description: "value was altered",
        },
        FlagDef {
            name: "not_used",
            value: 6,
            description: "reserved",
        },
        FlagDef {
            name: "not_used",
            value: 7,
            description: "reserved",
        },
        FlagDef {
            name: "interpolated_value",
            value: 8,
            description: "value was interpolated",
        },
        FlagDef {
            name: "missing_value",
            value: 9,
            description: "no value present",
        },
    ],
};

impl FlagVocabulary {
    pub fn flags(&self) -> &'static [FlagDef] {
        self.flags
    }

    /// Space separated flag names in value order (`flag_meanings`).
    pub fn meanings(&self) -> String {
        self.flags
            .iter()
            .map(|f| f.name)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Every flag value (`flag_values`).
    pub fn values(&self) -> Vec<i8> {
        self.flags.iter().map(|f| f.value).collect()
    }

    pub fn min(&self) -> i8 {
        self.flags.iter().map(|f| f.value).min().unwrap_or(0)
    }

    pub fn max(&self) -> i8 {
        self.flags.iter().map(|f| f.value).max().unwrap_or(0)
    }

    pub fn value_of(&self, name: &str) -> Option<i8> {
        self.flags.iter().find(|f| f.name == name).map(|f| f.value)
    }
}

/// Per-key flag assignment supplied by the caller.
pub trait QcEvaluator {
    /// Whether [`evaluate`](Self::evaluate) needs the variable's stored series.
    fn wants_series(&self) -> bool {
        false
    }

    /// Flag for `value`. `series` is the variable's stored data, including
    /// the value just written, when [`wants_series`](Self::wants_series) is set.
    fn evaluate(&self, value: &Sample, series: Option<&ArrayData>) -> i8;
}

impl<F> QcEvaluator for F
where
    F: Fn(&Sample) -> i8,
{
    fn evaluate(&self, value: &Sample, _series: Option<&ArrayData>) -> i8 {
        self(value)
    }
}

/// Adapts a closure that inspects the stored series.
pub struct SeriesEvaluator<F>(pub F);

impl<F> QcEvaluator for SeriesEvaluator<F>
where
    F: Fn(&Sample, &ArrayData) -> i8,
{
    fn wants_series(&self) -> bool {
        true
    }

    fn evaluate(&self, value: &Sample, series: Option<&ArrayData>) -> i8 {
        match series {
            Some(series) => (self.0)(value, series),
            None => QcFlag::NoQcPerformed.value(),
        }
    }
}

pub struct QcEngine {
    vocabulary: FlagVocabulary,
    evaluators: HashMap<String, Box<dyn QcEvaluator>>,
}

impl Default for QcEngine {
    fn default() -> Self {
        Self::new(QC_FLAGS)
    }
}

impl std::fmt::Debug for QcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QcEngine")
            .field("evaluators", &self.evaluators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl QcEngine {
    pub fn new(vocabulary: FlagVocabulary) -> Self {
        Self {
            vocabulary,
            evaluators: HashMap::new(),
        }
    }

    pub fn vocabulary(&self) -> &FlagVocabulary {
        &self.vocabulary
    }

    pub fn set_evaluator(&mut self, key: impl Into<String>, evaluator: impl QcEvaluator + 'static) {
        self.evaluators.insert(key.into(), Box::new(evaluator));
    }

    pub fn wants_series(&self, key: &str) -> bool {
        self.evaluators
            .get(key)
            .map(|e| e.wants_series())
            .unwrap_or(false)
    }

    /// Flag for `value` written under `key`. A registered evaluator's answer
    /// is used verbatim; otherwise missing values get 9 and everything else 0.
    pub fn evaluate(&self, key: &str, value: &Sample, fill: Scalar, series: Option<&ArrayData>) -> i8 {
        if let Some(evaluator) = self.evaluators.get(key) {
            return evaluator.evaluate(value, series);
        }
        if value.is_missing(fill) {
            QcFlag::MissingValue.value()
        } else {
            QcFlag::NoQcPerformed.value()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DataType;

    #[test]
    fn vocabulary_matches_flag_values() {
        assert_eq!(QC_FLAGS.values(), (0..=9).collect::<Vec<i8>>());
        assert_eq!(QC_FLAGS.min(), 0);
        assert_eq!(QC_FLAGS.max(), 9);
        assert_eq!(QC_FLAGS.value_of("missing_value"), Some(9));
        assert_eq!(
            QC_FLAGS.meanings(),
            "no_qc_performed good_data probably_good_data bad_data_potentially_correctable \
             bad_data value_changed not_used not_used interpolated_value missing_value"
        );
    }

    #[test]
    fn default_policy_flags_missing_values() {
        let engine = QcEngine::default();
        let fill = DataType::Double.default_fill();
        assert_eq!(engine.evaluate("depth", &Sample::Number(fill.to_f64()), fill, None), 9);
        assert_eq!(engine.evaluate("depth", &Sample::Number(f64::NAN), fill, None), 9);
        assert_eq!(engine.evaluate("depth", &Sample::Number(12.5), fill, None), 0);
        assert_eq!(
            engine.evaluate("depth", &Sample::Number(9999.0), Scalar::Double(9999.0), None),
            9
        );
    }

    #[test]
    fn evaluator_result_is_used_verbatim() {
        let mut engine = QcEngine::default();
        engine.set_evaluator("depth", |value: &Sample| match value.as_f64() {
            Some(v) if v > 1000.0 => 4,
            _ => 42,
        });
        let fill = DataType::Double.default_fill();
        assert_eq!(engine.evaluate("depth", &Sample::Number(2000.0), fill, None), 4);
        assert_eq!(engine.evaluate("depth", &Sample::Number(fill.to_f64()), fill, None), 42);
        assert_eq!(engine.evaluate("pressure", &Sample::Number(1.0), fill, None), 0);
    }

    #[test]
    fn series_evaluator_sees_history() {
        let mut engine = QcEngine::default();
        engine.set_evaluator(
            "depth",
            SeriesEvaluator(|_: &Sample, series: &ArrayData| series.len() as i8),
        );
        assert!(engine.wants_series("depth"));
        let series = ArrayData::Double(vec![1.0, 2.0, 3.0]);
        let fill = DataType::Double.default_fill();
        assert_eq!(engine.evaluate("depth", &Sample::Number(3.0), fill, Some(&series)), 3);
    }
}
