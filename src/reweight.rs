//! The per-event reweighting pipeline.
//!
//! Events are processed strictly one at a time in input order; the only
//! cross-event state is the evaluator's process-level context, which is
//! initialised once at construction and outlives every per-event
//! context. Expected per-event skip conditions (incomplete record,
//! degenerate kinematics, unmatched topology) are counted and never
//! produce output rows; anything else aborts the run.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::{RecordReader, RecordRow, WeightRow, WeightTable};
use crate::evaluator::{Evaluator, EvaluatorConfig};
use crate::kinematics;
use crate::topology::{DecayTree, TopologySpec};
use crate::utils::vectors::Vec4;
use crate::{FfwError, FfwResult};

/// Weights above this are flagged as anomalous (diagnostic only; the
/// row is still written with the weight intact).
pub const ANOMALOUS_WEIGHT: f64 = 10.0;

/// Names the roles feeding the derived observables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoleBindings {
    /// The decaying parent (q² and rest-frame boosts)
    pub parent: String,
    /// The visible hadronic system recoiling against the lepton pair
    pub resonance: String,
    /// The charged lepton whose rest-frame energy is recorded
    pub lepton: String,
    /// The undetectable roles summed for the missing-mass squared
    pub invisible: Vec<String>,
}

/// Everything a [`Reweighter`] needs for one run: the decay topology,
/// the evaluator configuration, and the observable role bindings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReweightConfig {
    /// The decay-graph description
    pub topology: TopologySpec,
    /// The process-level evaluator configuration
    pub evaluator: EvaluatorConfig,
    /// Roles feeding q², mm², and El
    pub bindings: RoleBindings,
}

impl ReweightConfig {
    /// The run-1 semitauonic configuration matching the production
    /// samples.
    pub fn semitauonic() -> Self {
        Self {
            topology: TopologySpec::semitauonic(),
            evaluator: EvaluatorConfig::semitauonic(),
            bindings: RoleBindings {
                parent: "b".to_string(),
                resonance: "dst".to_string(),
                lepton: "mu".to_string(),
                invisible: vec![
                    "nu_tau".to_string(),
                    "anu_tau".to_string(),
                    "anu_mu".to_string(),
                ],
            },
        }
    }

    fn validate(&self) -> FfwResult<()> {
        let roles = self.topology.roles();
        let check = |role: &str| -> FfwResult<()> {
            if roles.iter().any(|r| *r == role) {
                Ok(())
            } else {
                Err(FfwError::TopologyError(format!(
                    "binding role \"{role}\" is not part of topology \"{}\"",
                    self.topology.name()
                )))
            }
        };
        check(&self.bindings.parent)?;
        check(&self.bindings.resonance)?;
        check(&self.bindings.lepton)?;
        if self.bindings.invisible.is_empty() {
            return Err(FfwError::TopologyError(
                "no invisible roles bound for the missing-mass computation".to_string(),
            ));
        }
        for role in &self.bindings.invisible {
            check(role)?;
        }
        if self.evaluator.schemes.is_empty() {
            return Err(FfwError::EvaluatorError(
                "no target form-factor scheme configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-run counters, exposed so skip behavior is observable rather
/// than silent.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Rows read from the input table
    pub events_read: usize,
    /// Rows written to the output table
    pub rows_written: usize,
    /// Records skipped because a particle field was absent
    pub skipped_incomplete: usize,
    /// Records skipped for degenerate kinematics (zero parent energy)
    pub skipped_malformed: usize,
    /// Records whose tree matched no configured decay channel
    pub skipped_unmatched: usize,
}

/// Drives the sequential reweighting loop over one input stream.
pub struct Reweighter<E: Evaluator> {
    config: ReweightConfig,
    evaluator: E,
}

impl<E: Evaluator> Reweighter<E> {
    /// Validate the configuration and initialise the evaluator's
    /// process-level context.
    pub fn new(config: ReweightConfig, mut evaluator: E) -> FfwResult<Self> {
        config.validate()?;
        evaluator.init_run(&config.evaluator)?;
        Ok(Self { config, evaluator })
    }

    /// The configuration this reweighter was built with.
    pub fn config(&self) -> &ReweightConfig {
        &self.config
    }

    /// Consume the input stream and produce the output table plus run
    /// counters. Rows are appended in input order; the caller commits
    /// the table once afterwards.
    pub fn run(&mut self, reader: RecordReader) -> FfwResult<(WeightTable, RunSummary)> {
        let scheme = self.config.evaluator.schemes[0].label.clone();
        let mut table = WeightTable::new();
        let mut summary = RunSummary::default();

        for row in reader {
            summary.events_read += 1;
            let record = match row? {
                RecordRow::Complete(record) => record,
                RecordRow::Incomplete => {
                    summary.skipped_incomplete += 1;
                    continue;
                }
            };

            let bindings = &self.config.bindings;
            let missing_role = |role: &str| {
                FfwError::TopologyError(format!(
                    "event {} has no particle in role \"{role}\"",
                    record.event_number
                ))
            };
            let parent = record
                .p4(&bindings.parent)
                .ok_or_else(|| missing_role(&bindings.parent))?;
            if parent.e() <= 0.0 {
                // A zero-energy parent would divide by zero in the
                // rest-frame boost; reject before any derivation.
                summary.skipped_malformed += 1;
                continue;
            }
            let resonance = record
                .p4(&bindings.resonance)
                .ok_or_else(|| missing_role(&bindings.resonance))?;
            let lepton = record
                .p4(&bindings.lepton)
                .ok_or_else(|| missing_role(&bindings.lepton))?;
            let invisible = bindings
                .invisible
                .iter()
                .map(|role| record.p4(role).ok_or_else(|| missing_role(role)))
                .collect::<FfwResult<Vec<Vec4>>>()?;

            let q2_true = kinematics::momentum_transfer_squared(&parent, &resonance);
            let el_true = kinematics::lepton_rest_frame_energy(&parent, &lepton);
            let mm2_true = kinematics::invisible_mass_squared(&invisible);

            let tree = DecayTree::build(&self.config.topology, &record)?;
            let mut context = self.evaluator.begin_event()?;
            for particle in &tree.particles {
                context.add_particle(*particle);
            }
            for (parent_index, child_indices) in &tree.vertices {
                context.add_vertex(*parent_index, child_indices)?;
            }
            if context.submit_process()? == 0 {
                summary.skipped_unmatched += 1;
                continue;
            }
            context.process_event()?;
            let w_ff = context.weight(&scheme)?;
            drop(context);

            if w_ff > ANOMALOUS_WEIGHT {
                warn!(
                    event_number = record.event_number,
                    weight = w_ff,
                    "anomalous form-factor weight"
                );
            }

            table.push(WeightRow {
                event_number: record.event_number,
                run_number: record.run_number,
                w_ff,
                q2_true,
                mm2_true,
                el_true,
            });
            summary.rows_written += 1;
        }

        info!(
            events_read = summary.events_read,
            rows_written = summary.rows_written,
            skipped_incomplete = summary.skipped_incomplete,
            skipped_malformed = summary.skipped_malformed,
            skipped_unmatched = summary.skipped_unmatched,
            "reweighting run complete"
        );
        Ok((table, summary))
    }
}
