//! Interfaces to the external amplitude evaluator.
//!
//! The evaluator owns two layers of state. The process-level context is
//! configured once per run from an explicitly constructed
//! [`EvaluatorConfig`] (decay channels, form-factor schemes, units) and
//! outlives every event. The event-level context is opened per event,
//! fed one decay tree, and discarded regardless of outcome; dropping
//! the [`EventContext`] closes the scope on every exit path.
//!
//! [`TemplateEvaluator`] is the shipped implementation: it performs
//! real channel matching on submitted trees and composes scheme weight
//! ratios, with per-model factors that default to unity. A binding to a
//! full amplitude library replaces it behind the same pair of traits.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::data::Particle;
use crate::{FfwError, FfwResult};

/// An opaque process identifier returned by process submission.
///
/// Zero means the submitted tree matched no configured decay channel;
/// such events are skipped, not treated as errors.
pub type ProcessId = u32;

/// The measurement-unit convention declared to the evaluator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    /// Four-momenta in MeV
    MeV,
    /// Four-momenta in GeV
    GeV,
}

impl Display for Units {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Units::MeV => write!(f, "MeV"),
            Units::GeV => write!(f, "GeV"),
        }
    }
}

/// A named form-factor scheme: a label plus (decay vertex, model name)
/// pairs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeDef {
    /// The scheme label used for weight retrieval
    pub label: String,
    /// (decay vertex, model name) pairs
    pub models: Vec<(String, String)>,
}

impl SchemeDef {
    /// Create a scheme from its label and (vertex, model) pairs.
    pub fn new<S: Into<String>, I: IntoIterator<Item = (S, S)>>(label: S, models: I) -> Self {
        Self {
            label: label.into(),
            models: models
                .into_iter()
                .map(|(v, m)| (v.into(), m.into()))
                .collect(),
        }
    }
}

/// Process-level evaluator configuration, built once per run and passed
/// in explicitly rather than held as process-global state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Decay-model name lists declaring the reweighted channels, one
    /// list per channel (full chain plus sequential sub-decays)
    pub channels: Vec<Vec<String>>,
    /// Target form-factor schemes, retrievable by label
    pub schemes: Vec<SchemeDef>,
    /// The input scheme the sample was generated with, as (vertex,
    /// model) pairs
    pub input_models: Vec<(String, String)>,
    /// The unit convention of submitted four-momenta
    pub units: Units,
}

impl EvaluatorConfig {
    /// The run-1 semitauonic configuration: reweight the
    /// $`B \to D^* \tau \nu`$ vertex from ISGW2 to CLN.
    pub fn semitauonic() -> Self {
        Self {
            channels: vec![vec!["BD*TauNu".to_string(), "TauEllNuNu".to_string()]],
            schemes: vec![SchemeDef::new("SemiTauonic", [("BD*", "CLN")])],
            input_models: vec![("BD*".to_string(), "ISGW2".to_string())],
            units: Units::MeV,
        }
    }
}

/// The process-level half of the evaluator interface.
pub trait Evaluator {
    /// Close configuration for a run: declare channels, schemes, and
    /// units. Must be called exactly once before the first event.
    fn init_run(&mut self, config: &EvaluatorConfig) -> FfwResult<()>;

    /// Open an event-scoped context. Contexts are strictly nested
    /// within one event's processing and never overlap; the borrow on
    /// the evaluator enforces this.
    fn begin_event(&mut self) -> FfwResult<Box<dyn EventContext + '_>>;
}

/// The event-level half of the evaluator interface. Dropping the
/// context discards the event scope regardless of outcome.
pub trait EventContext {
    /// Register a particle, returning its evaluator-local index.
    fn add_particle(&mut self, particle: Particle) -> usize;

    /// Link registered particles into a decay vertex.
    fn add_vertex(&mut self, parent: usize, children: &[usize]) -> FfwResult<()>;

    /// Submit the assembled process. Returns zero if no configured
    /// channel matches.
    fn submit_process(&mut self) -> FfwResult<ProcessId>;

    /// Evaluate the submitted process.
    fn process_event(&mut self) -> FfwResult<()>;

    /// Retrieve the weight for a scheme by label.
    fn weight(&self, scheme: &str) -> FfwResult<f64>;
}

/// A structural signature of a decay channel: per vertex, the absolute
/// type code of the incoming particle and the sorted absolute codes of
/// the outgoing particles. Charge-conjugate processes share a
/// signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSignature {
    vertices: Vec<(u32, Vec<u32>)>,
}

impl ChannelSignature {
    /// Build a signature from (parent code, child codes) tuples; signs
    /// and ordering are normalised away.
    pub fn new<P, C>(vertices: P) -> Self
    where
        P: IntoIterator<Item = (i32, C)>,
        C: IntoIterator<Item = i32>,
    {
        let mut normalised: Vec<(u32, Vec<u32>)> = vertices
            .into_iter()
            .map(|(parent, children)| {
                let mut children: Vec<u32> =
                    children.into_iter().map(|c| c.unsigned_abs()).collect();
                children.sort_unstable();
                (parent.unsigned_abs(), children)
            })
            .collect();
        normalised.sort();
        Self {
            vertices: normalised,
        }
    }

    /// The semitauonic chain: $`B^0 \to D^{*} \tau \nu_\tau`$,
    /// $`\tau \to \mu \nu_\tau \bar{\nu}_\mu`$, $`D^* \to D^0 \pi`$,
    /// $`D^0 \to K \pi`$.
    pub fn semitauonic() -> Self {
        Self::new([
            (511, vec![413, 15, 16]),
            (15, vec![13, 14, 16]),
            (413, vec![421, 211]),
            (421, vec![321, 211]),
        ])
    }

    fn from_event(particles: &[Particle], vertices: &[(usize, Vec<usize>)]) -> Self {
        Self::new(vertices.iter().map(|(parent, children)| {
            (
                particles[*parent].pid,
                children
                    .iter()
                    .map(|c| particles[*c].pid)
                    .collect::<Vec<i32>>(),
            )
        }))
    }
}

/// The shipped evaluator: channel matching against configured
/// signatures plus scheme-ratio composition with per-model factors
/// (unity by default, so a scheme pair configured identically always
/// yields a weight of exactly 1).
#[derive(Clone, Debug, Default)]
pub struct TemplateEvaluator {
    channels: Vec<ChannelSignature>,
    model_factors: IndexMap<String, f64>,
    config: Option<EvaluatorConfig>,
}

impl TemplateEvaluator {
    /// Create an evaluator recognising the given channel signatures.
    pub fn new(channels: Vec<ChannelSignature>) -> Self {
        Self {
            channels,
            model_factors: IndexMap::new(),
            config: None,
        }
    }

    /// Override the weight factor contributed by one model name.
    pub fn set_model_factor<S: Into<String>>(&mut self, model: S, factor: f64) {
        self.model_factors.insert(model.into(), factor);
    }

    fn scheme_factor(&self, models: &[(String, String)]) -> f64 {
        models
            .iter()
            .map(|(_, model)| self.model_factors.get(model).copied().unwrap_or(1.0))
            .product()
    }
}

impl Evaluator for TemplateEvaluator {
    fn init_run(&mut self, config: &EvaluatorConfig) -> FfwResult<()> {
        if config.schemes.is_empty() {
            return Err(FfwError::EvaluatorError(
                "no target form-factor scheme configured".to_string(),
            ));
        }
        if self.config.is_some() {
            return Err(FfwError::EvaluatorError(
                "run already initialised".to_string(),
            ));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn begin_event(&mut self) -> FfwResult<Box<dyn EventContext + '_>> {
        if self.config.is_none() {
            return Err(FfwError::EvaluatorError(
                "begin_event called before init_run".to_string(),
            ));
        }
        Ok(Box::new(TemplateEventContext {
            evaluator: self,
            particles: Vec::new(),
            vertices: Vec::new(),
            process: None,
            processed: false,
        }))
    }
}

struct TemplateEventContext<'a> {
    evaluator: &'a TemplateEvaluator,
    particles: Vec<Particle>,
    vertices: Vec<(usize, Vec<usize>)>,
    process: Option<ProcessId>,
    processed: bool,
}

impl EventContext for TemplateEventContext<'_> {
    fn add_particle(&mut self, particle: Particle) -> usize {
        self.particles.push(particle);
        self.particles.len() - 1
    }

    fn add_vertex(&mut self, parent: usize, children: &[usize]) -> FfwResult<()> {
        let n = self.particles.len();
        if parent >= n || children.iter().any(|c| *c >= n) {
            return Err(FfwError::EvaluatorError(format!(
                "vertex references an unregistered particle index (have {n})"
            )));
        }
        self.vertices.push((parent, children.to_vec()));
        Ok(())
    }

    fn submit_process(&mut self) -> FfwResult<ProcessId> {
        if self.process.is_some() {
            return Err(FfwError::EvaluatorError(
                "process already submitted for this event".to_string(),
            ));
        }
        let signature = ChannelSignature::from_event(&self.particles, &self.vertices);
        let id = self
            .evaluator
            .channels
            .iter()
            .position(|c| *c == signature)
            .map(|i| i as ProcessId + 1)
            .unwrap_or(0);
        self.process = Some(id);
        Ok(id)
    }

    fn process_event(&mut self) -> FfwResult<()> {
        match self.process {
            Some(id) if id != 0 => {
                self.processed = true;
                Ok(())
            }
            Some(_) => Err(FfwError::EvaluatorError(
                "process_event called on an unmatched process".to_string(),
            )),
            None => Err(FfwError::EvaluatorError(
                "process_event called before submit_process".to_string(),
            )),
        }
    }

    fn weight(&self, scheme: &str) -> FfwResult<f64> {
        if !self.processed {
            return Err(FfwError::EvaluatorError(
                "weight requested before process_event".to_string(),
            ));
        }
        let config = self
            .evaluator
            .config
            .as_ref()
            .ok_or_else(|| FfwError::EvaluatorError("run not initialised".to_string()))?;
        let target = config
            .schemes
            .iter()
            .find(|s| s.label == scheme)
            .ok_or_else(|| {
                FfwError::EvaluatorError(format!("no scheme registered with label \"{scheme}\""))
            })?;
        Ok(self.evaluator.scheme_factor(&target.models)
            / self.evaluator.scheme_factor(&config.input_models))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EventRecord;
    use crate::topology::{DecayTree, TopologySpec};
    use crate::utils::vectors::Vec4;

    fn semitauonic_record() -> EventRecord {
        let pids = [
            ("b", 511),
            ("dst", -413),
            ("tau", -15),
            ("anu_tau", 16),
            ("mu", -13),
            ("nu_tau", -16),
            ("anu_mu", 14),
            ("d0", -421),
            ("spi", -211),
            ("k", 321),
            ("pi", -211),
        ];
        let mut record = EventRecord::new(10, 1);
        for (i, (role, pid)) in pids.iter().enumerate() {
            record.insert(
                *role,
                Particle::new(*pid, Vec4::new(0.0, 0.0, 10.0 * i as f64, 1000.0)),
            );
        }
        record
    }

    fn submit_tree(ctx: &mut Box<dyn EventContext + '_>, tree: &DecayTree) -> ProcessId {
        for particle in &tree.particles {
            ctx.add_particle(*particle);
        }
        for (parent, children) in &tree.vertices {
            ctx.add_vertex(*parent, children).unwrap();
        }
        ctx.submit_process().unwrap()
    }

    #[test]
    fn test_matching_tree_gets_nonzero_process_id() {
        let spec = TopologySpec::semitauonic();
        let tree = DecayTree::build(&spec, &semitauonic_record()).unwrap();
        let mut evaluator = TemplateEvaluator::new(vec![ChannelSignature::semitauonic()]);
        evaluator.init_run(&EvaluatorConfig::semitauonic()).unwrap();
        let mut ctx = evaluator.begin_event().unwrap();
        assert_ne!(submit_tree(&mut ctx, &tree), 0);
    }

    #[test]
    fn test_unmatched_tree_gets_zero_process_id() {
        let spec = TopologySpec::semitauonic();
        let mut record = semitauonic_record();
        // Swap the charm meson for something no channel declares.
        record.insert("d0", Particle::new(443, Vec4::new(0.0, 0.0, 0.0, 3096.9)));
        let tree = DecayTree::build(&spec, &record).unwrap();
        let mut evaluator = TemplateEvaluator::new(vec![ChannelSignature::semitauonic()]);
        evaluator.init_run(&EvaluatorConfig::semitauonic()).unwrap();
        let mut ctx = evaluator.begin_event().unwrap();
        assert_eq!(submit_tree(&mut ctx, &tree), 0);
        assert!(ctx.process_event().is_err());
    }

    #[test]
    fn test_identical_schemes_give_unit_weight() {
        let spec = TopologySpec::semitauonic();
        let tree = DecayTree::build(&spec, &semitauonic_record()).unwrap();
        let config = EvaluatorConfig {
            channels: vec![vec!["BD*TauNu".to_string(), "TauEllNuNu".to_string()]],
            schemes: vec![SchemeDef::new("SemiTauonic", [("BD*", "ISGW2")])],
            input_models: vec![("BD*".to_string(), "ISGW2".to_string())],
            units: Units::MeV,
        };
        let mut evaluator = TemplateEvaluator::new(vec![ChannelSignature::semitauonic()]);
        // A non-unit model factor must cancel exactly when target and
        // input schemes agree.
        evaluator.set_model_factor("ISGW2", 3.7);
        evaluator.init_run(&config).unwrap();
        let mut ctx = evaluator.begin_event().unwrap();
        assert_ne!(submit_tree(&mut ctx, &tree), 0);
        ctx.process_event().unwrap();
        assert_eq!(ctx.weight("SemiTauonic").unwrap(), 1.0);
    }

    #[test]
    fn test_model_factor_ratio() {
        let spec = TopologySpec::semitauonic();
        let tree = DecayTree::build(&spec, &semitauonic_record()).unwrap();
        let mut evaluator = TemplateEvaluator::new(vec![ChannelSignature::semitauonic()]);
        evaluator.set_model_factor("CLN", 1.2);
        evaluator.set_model_factor("ISGW2", 0.8);
        evaluator.init_run(&EvaluatorConfig::semitauonic()).unwrap();
        let mut ctx = evaluator.begin_event().unwrap();
        assert_ne!(submit_tree(&mut ctx, &tree), 0);
        ctx.process_event().unwrap();
        assert_eq!(ctx.weight("SemiTauonic").unwrap(), 1.2 / 0.8);
        assert!(ctx.weight("NoSuchScheme").is_err());
    }

    #[test]
    fn test_event_ordering_is_enforced() {
        let mut evaluator = TemplateEvaluator::new(vec![ChannelSignature::semitauonic()]);
        assert!(evaluator.begin_event().is_err());
        evaluator.init_run(&EvaluatorConfig::semitauonic()).unwrap();
        let ctx = evaluator.begin_event().unwrap();
        assert!(ctx.weight("SemiTauonic").is_err());
    }

    #[test]
    fn test_signature_is_order_and_sign_invariant() {
        let a = ChannelSignature::new([(511, vec![413, 15, 16]), (15, vec![13, 14, 16])]);
        let b = ChannelSignature::new([(-15, vec![16, -13, 14]), (-511, vec![16, -413, -15])]);
        assert_eq!(a, b);
    }
}
