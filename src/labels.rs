//! Worker labels, step placement requirements, and the affinity scorer.

use serde::{Deserialize, Serialize};

/// A label value is either an integer or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Int(i64),
    Str(String),
}

/// A key/value label a worker advertises about itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerLabel {
    pub key: String,
    pub value: LabelValue,
}

/// Comparators other than `Equal`/`NotEqual` are defined only for integer
/// values; applying them to string values is treated as a failed comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelComparator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

/// A step's placement requirement against a worker label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredLabel {
    pub key: String,
    pub comparator: LabelComparator,
    pub value: LabelValue,
    pub weight: i32,
    pub required: bool,
}

/// Outcome of scoring a worker against a step's desired labels.
///
/// `Ineligible` means the worker must be excluded from the ranking entirely;
/// it is distinct from a legitimately low or zero score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffinityWeight {
    Ineligible,
    Score(i32),
}

/// Compute the compatibility weight between a step's desired labels and a
/// worker's actual labels.
///
/// For each desired label: a missing or failed `required` label makes the
/// worker ineligible immediately; a missing or failed optional label
/// contributes nothing; a successful comparison adds the label's weight.
pub fn compute_affinity_weight(desired: &[DesiredLabel], actual: &[WorkerLabel]) -> AffinityWeight {
    let mut total: i32 = 0;

    for want in desired {
        let found = actual.iter().find(|l| l.key == want.key);
        match found {
            None if want.required => return AffinityWeight::Ineligible,
            None => continue,
            Some(label) => {
                if comparison_holds(want.comparator, &want.value, &label.value) {
                    total += want.weight;
                } else if want.required {
                    return AffinityWeight::Ineligible;
                }
            }
        }
    }

    AffinityWeight::Score(total)
}

fn comparison_holds(cmp: LabelComparator, desired: &LabelValue, actual: &LabelValue) -> bool {
    match cmp {
        LabelComparator::Equal => actual == desired,
        LabelComparator::NotEqual => actual != desired,
        _ => match (desired, actual) {
            (LabelValue::Int(want), LabelValue::Int(have)) => match cmp {
                LabelComparator::GreaterThan => have > want,
                LabelComparator::GreaterThanOrEqual => have >= want,
                LabelComparator::LessThan => have < want,
                LabelComparator::LessThanOrEqual => have <= want,
                _ => unreachable!(),
            },
            // Ordering comparators are only defined for integers
            _ => false,
        },
    }
}
