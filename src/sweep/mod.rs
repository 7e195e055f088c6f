//! Sweep expansion engine.
//!
//! Converts a declarative parameter sweep into a lazy, re-entrant sequence
//! of simulations. A sweep definition is `(callback, values)`; a builder
//! holds an ordered list of definitions and iterates their cross product in
//! lexicographic order (last definition varies fastest); an arm is a
//! builder with a `pair` combination option (zip, equal lengths required);
//! templated simulations concatenate builders over one base task.
//!
//! All shape validation happens at build time: iteration never raises
//! signature or arity errors. Value sequences are captured eagerly so
//! `len()` and repeated traversal agree.

use crate::entities::task::Task;
use crate::entities::Simulation;
use crate::ids::{TagMap, TagValue};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Callback for a single-parameter sweep: `(simulation, value) → tags`.
pub type SingleCallback = Arc<dyn Fn(&mut Simulation, &TagValue) -> Result<TagMap> + Send + Sync>;

/// Callback for a multi-parameter sweep: `(simulation, bound values) → tags`.
///
/// The bound map contains exactly the parameters declared at construction.
pub type MultiCallback =
    Arc<dyn Fn(&mut Simulation, &BTreeMap<String, TagValue>) -> Result<TagMap> + Send + Sync>;

/// Values accepted by a single-parameter sweep definition.
///
/// Scalars lift to a one-element sequence; strings are atoms, not
/// character sequences.
pub trait IntoSweepValues {
    fn into_sweep_values(self) -> Vec<TagValue>;
}

macro_rules! scalar_sweep_values {
    ($($ty:ty),+) => {
        $(impl IntoSweepValues for $ty {
            fn into_sweep_values(self) -> Vec<TagValue> {
                vec![self.into()]
            }
        })+
    };
}

scalar_sweep_values!(i64, i32, f64, bool, &str, String, TagValue);

impl<T: Into<TagValue>> IntoSweepValues for Vec<T> {
    fn into_sweep_values(self) -> Vec<TagValue> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<TagValue> + Clone, const N: usize> IntoSweepValues for [T; N] {
    fn into_sweep_values(self) -> Vec<TagValue> {
        self.into_iter().map(Into::into).collect()
    }
}

impl IntoSweepValues for std::ops::Range<i64> {
    fn into_sweep_values(self) -> Vec<TagValue> {
        self.map(TagValue::Int).collect()
    }
}

/// One unit of parametric variation.
pub enum SweepDefinition {
    /// A callback with exactly one free parameter.
    Single {
        param: String,
        callback: SingleCallback,
        values: Vec<TagValue>,
    },
    /// A callback whose free parameters are exactly the mapping keys.
    Multi {
        params: Vec<String>,
        callback: MultiCallback,
        /// Per-parameter value lists, in declared parameter order.
        values: Vec<(String, Vec<TagValue>)>,
    },
}

impl fmt::Debug for SweepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepDefinition::Single { param, values, .. } => f
                .debug_struct("Single")
                .field("param", param)
                .field("cardinality", &values.len())
                .finish(),
            SweepDefinition::Multi { params, .. } => f
                .debug_struct("Multi")
                .field("params", params)
                .field("cardinality", &self.cardinality())
                .finish(),
        }
    }
}

impl SweepDefinition {
    /// Build a single-parameter definition.
    ///
    /// The parameter name is recorded for diagnostics; a blank name is an
    /// invalid callback signature.
    pub fn single(
        param: impl Into<String>,
        callback: SingleCallback,
        values: impl IntoSweepValues,
    ) -> Result<Self> {
        let param = param.into();
        if param.trim().is_empty() {
            return Err(Error::InvalidCallbackSignature(
                "single-parameter sweep requires a parameter name".to_string(),
            ));
        }
        Ok(Self::Single {
            param,
            callback,
            values: values.into_sweep_values(),
        })
    }

    /// Build a multi-parameter definition from declared parameters and a
    /// value mapping.
    ///
    /// The mapping keys must be exactly the declared parameter set: unknown
    /// keys fail with [`Error::UnknownSweepParameter`], missing keys with
    /// [`Error::ParameterArityMismatch`]. Validation happens here, never at
    /// iteration time.
    pub fn multi(
        params: &[&str],
        callback: MultiCallback,
        mapping: Vec<(&str, Vec<TagValue>)>,
    ) -> Result<Self> {
        if params.is_empty() {
            return Err(Error::InvalidCallbackSignature(
                "multi-parameter sweep requires at least one parameter".to_string(),
            ));
        }
        for (key, _) in &mapping {
            if !params.contains(key) {
                return Err(Error::UnknownSweepParameter((*key).to_string()));
            }
        }
        let mut values = Vec::with_capacity(params.len());
        for param in params {
            let found = mapping
                .iter()
                .find(|(key, _)| key == param)
                .map(|(_, vals)| vals.clone());
            match found {
                Some(vals) => values.push(((*param).to_string(), vals)),
                None => {
                    return Err(Error::ParameterArityMismatch(format!(
                        "callback expects parameter '{}' but the mapping does not supply it",
                        param
                    )))
                }
            }
        }
        Ok(Self::Multi {
            params: params.iter().map(|p| (*p).to_string()).collect(),
            callback,
            values,
        })
    }

    /// Number of simulations this definition contributes on its own.
    pub fn cardinality(&self) -> usize {
        match self {
            SweepDefinition::Single { values, .. } => values.len(),
            SweepDefinition::Multi { values, .. } => {
                values.iter().map(|(_, v)| v.len()).product()
            }
        }
    }

    /// Apply the assignment at `index` (0-based, lexicographic over this
    /// definition's own value space) to a simulation.
    fn apply(&self, simulation: &mut Simulation, index: usize) -> Result<()> {
        match self {
            SweepDefinition::Single {
                callback, values, ..
            } => {
                let tags = callback(simulation, &values[index])?;
                simulation.merge_tags(tags);
            }
            SweepDefinition::Multi {
                callback, values, ..
            } => {
                // Decode the flat index into one value per parameter, last
                // parameter varying fastest.
                let mut bound = BTreeMap::new();
                let mut remainder = index;
                for (param, vals) in values.iter().rev() {
                    let pick = remainder % vals.len();
                    remainder /= vals.len();
                    bound.insert(param.clone(), vals[pick].clone());
                }
                let tags = callback(simulation, &bound)?;
                simulation.merge_tags(tags);
            }
        }
        Ok(())
    }
}

/// How definitions within one builder combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Combination {
    /// Cartesian product across definitions (cardinalities multiply).
    #[default]
    Cross,
    /// Zip across definitions (all must share one length).
    Pair,
}

/// An ordered list of sweep definitions combined by cross or pair.
///
/// `SimulationBuilder::new()` gives the plain cross-product builder; an arm
/// is the same structure with an explicit [`Combination`].
pub struct SimulationBuilder {
    definitions: Vec<SweepDefinition>,
    combination: Combination,
}

impl fmt::Debug for SimulationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationBuilder")
            .field("definitions", &self.definitions)
            .field("combination", &self.combination)
            .finish()
    }
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationBuilder {
    /// A cross-product builder.
    pub fn new() -> Self {
        Self {
            definitions: Vec::new(),
            combination: Combination::Cross,
        }
    }

    /// An arm with an explicit combination setting.
    pub fn arm(combination: Combination) -> Self {
        Self {
            definitions: Vec::new(),
            combination,
        }
    }

    /// Append a definition.
    ///
    /// For pair arms the new definition must match the cardinality of the
    /// ones already present; a mismatch fails with
    /// [`Error::ArmShapeMismatch`] at build time.
    pub fn add_sweep_definition(&mut self, definition: SweepDefinition) -> Result<&mut Self> {
        if self.combination == Combination::Pair {
            if let Some(first) = self.definitions.first() {
                if first.cardinality() != definition.cardinality() {
                    return Err(Error::ArmShapeMismatch(format!(
                        "existing definitions have length {}, new definition has length {}",
                        first.cardinality(),
                        definition.cardinality()
                    )));
                }
            }
        }
        self.definitions.push(definition);
        Ok(self)
    }

    /// Convenience: sweep one parameter with a callback.
    pub fn add_sweep(
        &mut self,
        param: impl Into<String>,
        callback: SingleCallback,
        values: impl IntoSweepValues,
    ) -> Result<&mut Self> {
        self.add_sweep_definition(SweepDefinition::single(param, callback, values)?)
    }

    /// Number of simulations this builder yields.
    ///
    /// Cross: product of definition cardinalities. Pair: the common length.
    /// An empty builder yields nothing.
    pub fn len(&self) -> usize {
        if self.definitions.is_empty() {
            return 0;
        }
        match self.combination {
            Combination::Cross => self.definitions.iter().map(|d| d.cardinality()).product(),
            Combination::Pair => self
                .definitions
                .first()
                .map(|d| d.cardinality())
                .unwrap_or(0),
        }
    }

    /// True when the builder yields no simulations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply the `n`-th combination (lexicographic, last definition varies
    /// fastest) to a simulation.
    fn apply_combination(&self, simulation: &mut Simulation, n: usize) -> Result<()> {
        match self.combination {
            Combination::Cross => {
                let mut remainder = n;
                let mut picks = vec![0usize; self.definitions.len()];
                for (slot, definition) in self.definitions.iter().enumerate().rev() {
                    let card = definition.cardinality();
                    picks[slot] = remainder % card;
                    remainder /= card;
                }
                for (definition, pick) in self.definitions.iter().zip(picks) {
                    definition.apply(simulation, pick)?;
                }
            }
            Combination::Pair => {
                for definition in &self.definitions {
                    definition.apply(simulation, n)?;
                }
            }
        }
        Ok(())
    }
}

/// A base task plus an ordered list of builders.
///
/// The iterator concatenates the builders' sequences: builders add,
/// definitions within a builder multiply (or zip, for pair arms). Each
/// yielded simulation deep-copies the base task before callbacks run.
pub struct TemplatedSimulations {
    base_task: Task,
    builders: Vec<SimulationBuilder>,
}

impl fmt::Debug for TemplatedSimulations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplatedSimulations")
            .field("builders", &self.builders)
            .field("len", &self.len())
            .finish()
    }
}

impl TemplatedSimulations {
    /// Template simulations over one base task.
    pub fn new(base_task: Task) -> Self {
        Self {
            base_task,
            builders: Vec::new(),
        }
    }

    /// Append a builder; its sequence concatenates after earlier builders.
    pub fn add_builder(&mut self, builder: SimulationBuilder) -> &mut Self {
        self.builders.push(builder);
        self
    }

    /// Total number of simulations across all builders.
    ///
    /// Known in advance; callers rely on it to pre-allocate batches.
    pub fn len(&self) -> usize {
        self.builders.iter().map(|b| b.len()).sum()
    }

    /// True when no builder yields simulations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The base task simulations are copied from.
    pub fn base_task(&self) -> &Task {
        &self.base_task
    }

    /// A fresh iterator over the expansion.
    ///
    /// Iterating twice yields the same sequence: value lists were captured
    /// eagerly at definition build time, and each call starts from index 0.
    pub fn iter(&self) -> TemplatedIter<'_> {
        TemplatedIter {
            templated: self,
            builder_index: 0,
            combo_index: 0,
        }
    }
}

/// Lazy iterator over templated simulations.
pub struct TemplatedIter<'a> {
    templated: &'a TemplatedSimulations,
    builder_index: usize,
    combo_index: usize,
}

impl<'a> Iterator for TemplatedIter<'a> {
    type Item = Result<Simulation>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let builder = self.templated.builders.get(self.builder_index)?;
            if self.combo_index >= builder.len() {
                self.builder_index += 1;
                self.combo_index = 0;
                continue;
            }
            let n = self.combo_index;
            self.combo_index += 1;

            let mut simulation = Simulation::new(self.templated.base_task.clone());
            return Some(builder.apply_combination(&mut simulation, n).map(|_| simulation));
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining: usize = self
            .templated
            .builders
            .iter()
            .enumerate()
            .map(|(i, b)| {
                if i < self.builder_index {
                    0
                } else if i == self.builder_index {
                    b.len().saturating_sub(self.combo_index)
                } else {
                    b.len()
                }
            })
            .sum();
        (remaining, Some(remaining))
    }
}

/// Standard callback: set a JSON task parameter and tag the simulation with
/// the same name and value.
pub fn json_parameter(name: &str) -> SingleCallback {
    let name = name.to_string();
    Arc::new(move |simulation: &mut Simulation, value: &TagValue| {
        match simulation.task.as_json_configured_mut() {
            Some(task) => Ok(task.set_parameter(name.clone(), value.clone())),
            None => {
                // Command tasks have no structured parameters; record the
                // assignment as a tag only.
                let mut tags = TagMap::new();
                tags.insert(name.clone(), value.clone());
                Ok(tags)
            }
        }
    })
}

/// Standard callback: tag the simulation without touching the task.
pub fn tag_only(name: &str) -> SingleCallback {
    let name = name.to_string();
    Arc::new(move |_simulation: &mut Simulation, value: &TagValue| {
        let mut tags = TagMap::new();
        tags.insert(name.clone(), value.clone());
        Ok(tags)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::task::{CommandTask, JsonConfiguredTask};

    fn base_task() -> Task {
        Task::JsonConfigured(JsonConfiguredTask::new("model1.py"))
    }

    fn expand(ts: &TemplatedSimulations) -> Vec<Simulation> {
        ts.iter().collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_scalar_lifts_to_one_simulation() {
        let mut builder = SimulationBuilder::new();
        builder.add_sweep("a", json_parameter("a"), 10i64).unwrap();
        assert_eq!(builder.len(), 1);

        let mut ts = TemplatedSimulations::new(base_task());
        ts.add_builder(builder);
        let sims = expand(&ts);
        assert_eq!(sims.len(), 1);
        assert_eq!(sims[0].tags.get("a"), Some(&TagValue::Int(10)));
    }

    #[test]
    fn test_length_one_list_equals_scalar() {
        let mut builder = SimulationBuilder::new();
        builder
            .add_sweep("a", json_parameter("a"), vec![10i64])
            .unwrap();
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_range_sweep_tags() {
        // Base task `python model1.py`, sweep a over 0..5: five simulations
        // tagged {"a":0}..{"a":4}.
        let mut builder = SimulationBuilder::new();
        builder.add_sweep("a", json_parameter("a"), 0i64..5).unwrap();
        assert_eq!(builder.len(), 5);

        let mut ts = TemplatedSimulations::new(base_task());
        ts.add_builder(builder);
        let sims = expand(&ts);
        assert_eq!(sims.len(), 5);
        for (i, sim) in sims.iter().enumerate() {
            assert_eq!(sim.tags.get("a"), Some(&TagValue::Int(i as i64)));
            let params = sim.task.parameters().unwrap();
            assert_eq!(params.get("a"), Some(&TagValue::Int(i as i64)));
        }
    }

    #[test]
    fn test_tuple_of_three() {
        let mut builder = SimulationBuilder::new();
        builder
            .add_sweep("a", json_parameter("a"), [4i64, 5, 6])
            .unwrap();
        assert_eq!(builder.len(), 3);
    }

    #[test]
    fn test_cross_product_order_and_cardinality() {
        let mut builder = SimulationBuilder::new();
        builder
            .add_sweep("a", json_parameter("a"), vec![1i64, 2, 3])
            .unwrap();
        builder
            .add_sweep("b", json_parameter("b"), vec!["x", "y"])
            .unwrap();
        assert_eq!(builder.len(), 6);

        let mut ts = TemplatedSimulations::new(base_task());
        ts.add_builder(builder);
        let sims = expand(&ts);
        let tuples: Vec<(String, String)> = sims
            .iter()
            .map(|s| {
                (
                    s.tags.get("a").unwrap().coerced(),
                    s.tags.get("b").unwrap().coerced(),
                )
            })
            .collect();
        let expected: Vec<(String, String)> = [
            ("1", "x"),
            ("1", "y"),
            ("2", "x"),
            ("2", "y"),
            ("3", "x"),
            ("3", "y"),
        ]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
        assert_eq!(tuples, expected);
    }

    #[test]
    fn test_iteration_is_reentrant() {
        let mut builder = SimulationBuilder::new();
        builder
            .add_sweep("a", json_parameter("a"), vec![1i64, 2, 3])
            .unwrap();
        builder
            .add_sweep("b", json_parameter("b"), vec!["x", "y"])
            .unwrap();
        let mut ts = TemplatedSimulations::new(base_task());
        ts.add_builder(builder);

        let first: Vec<TagMap> = expand(&ts).into_iter().map(|s| s.tags).collect();
        let second: Vec<TagMap> = expand(&ts).into_iter().map(|s| s.tags).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn test_pair_arm_zips() {
        let mut arm = SimulationBuilder::arm(Combination::Pair);
        arm.add_sweep("a", json_parameter("a"), vec![1i64, 2, 3])
            .unwrap();
        arm.add_sweep("b", json_parameter("b"), vec!["x", "y", "z"])
            .unwrap();
        assert_eq!(arm.len(), 3);

        let mut ts = TemplatedSimulations::new(base_task());
        ts.add_builder(arm);
        let sims = expand(&ts);
        let tuples: Vec<(String, String)> = sims
            .iter()
            .map(|s| {
                (
                    s.tags.get("a").unwrap().coerced(),
                    s.tags.get("b").unwrap().coerced(),
                )
            })
            .collect();
        assert_eq!(
            tuples,
            vec![
                ("1".to_string(), "x".to_string()),
                ("2".to_string(), "y".to_string()),
                ("3".to_string(), "z".to_string()),
            ]
        );
    }

    #[test]
    fn test_pair_arm_shape_mismatch() {
        // a=[1,2,3], b=[1,2] must fail at build time.
        let mut arm = SimulationBuilder::arm(Combination::Pair);
        arm.add_sweep("a", json_parameter("a"), vec![1i64, 2, 3])
            .unwrap();
        let err = arm
            .add_sweep("b", json_parameter("b"), vec![1i64, 2])
            .unwrap_err();
        assert!(matches!(err, Error::ArmShapeMismatch(_)));
    }

    #[test]
    fn test_builders_concatenate() {
        let mut b1 = SimulationBuilder::new();
        b1.add_sweep("a", json_parameter("a"), vec![1i64, 2]).unwrap();
        let mut b2 = SimulationBuilder::new();
        b2.add_sweep("a", json_parameter("a"), vec![9i64]).unwrap();

        let mut ts = TemplatedSimulations::new(base_task());
        ts.add_builder(b1).add_builder(b2);
        assert_eq!(ts.len(), 3);

        let sims = expand(&ts);
        let values: Vec<String> = sims
            .iter()
            .map(|s| s.tags.get("a").unwrap().coerced())
            .collect();
        assert_eq!(values, vec!["1", "2", "9"]);
    }

    #[test]
    fn test_multi_parameter_cross() {
        // Callback (sim, a, b, c) with {a:[T,F], b:[1..5], c:["test"]}:
        // ten simulations, every assignment exactly once.
        let callback: MultiCallback = Arc::new(|sim, bound| {
            let mut tags = TagMap::new();
            for (k, v) in bound {
                if let Some(task) = sim.task.as_json_configured_mut() {
                    task.set_parameter(k.clone(), v.clone());
                }
                tags.insert(k.clone(), v.clone());
            }
            Ok(tags)
        });
        let def = SweepDefinition::multi(
            &["a", "b", "c"],
            callback,
            vec![
                ("a", vec![TagValue::Bool(true), TagValue::Bool(false)]),
                (
                    "b",
                    (1i64..6).map(TagValue::Int).collect::<Vec<_>>(),
                ),
                ("c", vec![TagValue::String("test".to_string())]),
            ],
        )
        .unwrap();
        assert_eq!(def.cardinality(), 10);

        let mut builder = SimulationBuilder::new();
        builder.add_sweep_definition(def).unwrap();
        let mut ts = TemplatedSimulations::new(base_task());
        ts.add_builder(builder);

        let sims = expand(&ts);
        assert_eq!(sims.len(), 10);
        let mut seen: Vec<(String, String, String)> = sims
            .iter()
            .map(|s| {
                (
                    s.tags.get("a").unwrap().coerced(),
                    s.tags.get("b").unwrap().coerced(),
                    s.tags.get("c").unwrap().coerced(),
                )
            })
            .collect();
        let distinct = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), distinct, "every assignment appears exactly once");
    }

    #[test]
    fn test_multi_unknown_parameter() {
        let callback: MultiCallback = Arc::new(|_, _| Ok(TagMap::new()));
        let err = SweepDefinition::multi(
            &["a"],
            callback,
            vec![
                ("a", vec![TagValue::Int(1)]),
                ("zz", vec![TagValue::Int(2)]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownSweepParameter(_)));
    }

    #[test]
    fn test_multi_missing_parameter() {
        let callback: MultiCallback = Arc::new(|_, _| Ok(TagMap::new()));
        let err = SweepDefinition::multi(
            &["a", "b"],
            callback,
            vec![("a", vec![TagValue::Int(1)])],
        )
        .unwrap_err();
        assert!(matches!(err, Error::ParameterArityMismatch(_)));
    }

    #[test]
    fn test_invalid_signature_rejected_at_build_time() {
        let single_err =
            SweepDefinition::single("  ", json_parameter("a"), vec![1i64]).unwrap_err();
        assert!(matches!(single_err, Error::InvalidCallbackSignature(_)));

        let callback: MultiCallback = Arc::new(|_, _| Ok(TagMap::new()));
        let multi_err = SweepDefinition::multi(&[], callback, vec![]).unwrap_err();
        assert!(matches!(multi_err, Error::InvalidCallbackSignature(_)));
    }

    #[test]
    fn test_later_callback_overwrites_tag() {
        let mut builder = SimulationBuilder::new();
        builder.add_sweep("a", tag_only("shared"), vec![1i64]).unwrap();
        builder
            .add_sweep("b", tag_only("shared"), vec!["winner"])
            .unwrap();

        let mut ts = TemplatedSimulations::new(base_task());
        ts.add_builder(builder);
        let sims = expand(&ts);
        assert_eq!(sims.len(), 1);
        assert_eq!(sims[0].tags.get("shared").unwrap().coerced(), "winner");
    }

    #[test]
    fn test_command_task_sweep_is_tag_only() {
        let task = Task::Command(CommandTask::new("python", vec!["model1.py".to_string()]));
        let mut builder = SimulationBuilder::new();
        builder.add_sweep("a", json_parameter("a"), 0i64..3).unwrap();
        let mut ts = TemplatedSimulations::new(task);
        ts.add_builder(builder);
        let sims = expand(&ts);
        assert_eq!(sims.len(), 3);
        assert!(sims[0].task.parameters().is_none());
        assert_eq!(sims[2].tags.get("a"), Some(&TagValue::Int(2)));
    }

    #[test]
    fn test_len_matches_iteration_count() {
        let mut b1 = SimulationBuilder::new();
        b1.add_sweep("a", json_parameter("a"), vec![1i64, 2, 3])
            .unwrap();
        b1.add_sweep("b", json_parameter("b"), vec![1i64, 2]).unwrap();
        let mut b2 = SimulationBuilder::arm(Combination::Pair);
        b2.add_sweep("c", json_parameter("c"), vec![1i64, 2]).unwrap();
        b2.add_sweep("d", json_parameter("d"), vec![3i64, 4]).unwrap();

        let mut ts = TemplatedSimulations::new(base_task());
        ts.add_builder(b1).add_builder(b2);
        assert_eq!(ts.len(), 6 + 2);
        assert_eq!(expand(&ts).len(), ts.len());
    }
}
