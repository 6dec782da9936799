//! Declarative decay-graph descriptions and per-event decay-tree
//! construction.
//!
//! A decay channel is described by a [`TopologySpec`]: a list of vertex
//! specifications (parent role, ordered child roles) consumed
//! generically, so supporting an additional topology means writing a
//! new spec, not a new code path. Roles are positional names ("the muon
//! slot"); particle-type codes travel with the event record.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::data::{EventRecord, Particle};
use crate::{FfwError, FfwResult};

/// One decay vertex: a parent role and its ordered child roles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VertexSpec {
    /// Role name of the incoming particle
    pub parent: String,
    /// Role names of the outgoing particles, in declaration order
    pub children: Vec<String>,
}

impl VertexSpec {
    /// Create a vertex spec from a parent role and its child roles.
    pub fn new<S: Into<String>, I: IntoIterator<Item = S>>(parent: S, children: I) -> Self {
        Self {
            parent: parent.into(),
            children: children.into_iter().map(Into::into).collect(),
        }
    }
}

/// A validated decay-graph description.
///
/// Invariants enforced by [`TopologySpec::new`]: every vertex has at
/// least one child, every role except the root is exactly one vertex's
/// child, every role is at most one vertex's parent, every vertex
/// parent is reachable from the root, and the root is never a child.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TopologySpec {
    name: String,
    root: String,
    vertices: Vec<VertexSpec>,
    oscillation_reference: Option<String>,
}

impl TopologySpec {
    /// Build and validate a topology from its root role and vertex
    /// specs.
    pub fn new<S: Into<String>>(name: S, root: S, vertices: Vec<VertexSpec>) -> FfwResult<Self> {
        let spec = Self {
            name: name.into(),
            root: root.into(),
            vertices,
            oscillation_reference: None,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Declare the role whose particle-type code is compared against
    /// the root's for the wrong-sign correction (see
    /// [`DecayTree::build`]).
    pub fn with_oscillation_reference<S: Into<String>>(mut self, role: S) -> FfwResult<Self> {
        let role = role.into();
        if !self.roles().iter().any(|r| *r == role) {
            return Err(FfwError::TopologyError(format!(
                "oscillation reference \"{role}\" is not a role of topology \"{}\"",
                self.name
            )));
        }
        self.oscillation_reference = Some(role);
        Ok(self)
    }

    /// The fixed four-vertex semitauonic chain
    /// $`B^0 \to D^{*-} \tau^+ \nu_\tau`$ with
    /// $`\tau \to \mu \nu \bar{\nu}`$, $`D^* \to D^0 \pi`$,
    /// $`D^0 \to K \pi`$.
    pub fn semitauonic() -> Self {
        let spec = Self::new(
            "mc_dst_tau",
            "b",
            vec![
                VertexSpec::new("b", ["dst", "tau", "anu_tau"]),
                VertexSpec::new("tau", ["mu", "nu_tau", "anu_mu"]),
                VertexSpec::new("dst", ["d0", "spi"]),
                VertexSpec::new("d0", ["k", "pi"]),
            ],
        )
        .and_then(|s| s.with_oscillation_reference("dst"));
        spec.expect("the built-in semitauonic topology is valid")
    }

    /// The topology name (used as the decay-channel label).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The root role.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The vertex specs in declaration order.
    pub fn vertices(&self) -> &[VertexSpec] {
        &self.vertices
    }

    /// The oscillation-reference role, if declared.
    pub fn oscillation_reference(&self) -> Option<&str> {
        self.oscillation_reference.as_deref()
    }

    /// All roles in deterministic registration order: the root first,
    /// then each vertex's children in declaration order.
    pub fn roles(&self) -> Vec<&str> {
        let mut roles: IndexSet<&str> = IndexSet::new();
        roles.insert(self.root.as_str());
        for vertex in &self.vertices {
            for child in &vertex.children {
                roles.insert(child.as_str());
            }
        }
        roles.into_iter().collect()
    }

    fn validate(&self) -> FfwResult<()> {
        if self.vertices.is_empty() {
            return Err(FfwError::TopologyError(format!(
                "topology \"{}\" has no vertices",
                self.name
            )));
        }
        let mut children_seen: IndexSet<&str> = IndexSet::new();
        let mut parents_seen: IndexSet<&str> = IndexSet::new();
        for vertex in &self.vertices {
            if vertex.children.is_empty() {
                return Err(FfwError::TopologyError(format!(
                    "vertex for \"{}\" has no outgoing particles",
                    vertex.parent
                )));
            }
            if !parents_seen.insert(vertex.parent.as_str()) {
                return Err(FfwError::TopologyError(format!(
                    "role \"{}\" is the incoming particle of more than one vertex",
                    vertex.parent
                )));
            }
            for child in &vertex.children {
                if child == &self.root {
                    return Err(FfwError::TopologyError(format!(
                        "root role \"{}\" appears as an outgoing particle",
                        self.root
                    )));
                }
                if !children_seen.insert(child.as_str()) {
                    return Err(FfwError::TopologyError(format!(
                        "role \"{child}\" is an outgoing particle of more than one vertex"
                    )));
                }
            }
        }
        // Walk from the root; a vertex whose parent is never reached
        // belongs to a disconnected subgraph or a detached cycle.
        let mut reachable: IndexSet<&str> = IndexSet::new();
        reachable.insert(self.root.as_str());
        let mut frontier = vec![self.root.as_str()];
        while let Some(role) = frontier.pop() {
            if let Some(vertex) = self.vertices.iter().find(|v| v.parent == role) {
                for child in &vertex.children {
                    if reachable.insert(child.as_str()) {
                        frontier.push(child.as_str());
                    }
                }
            }
        }
        for vertex in &self.vertices {
            if !reachable.contains(vertex.parent.as_str()) {
                return Err(FfwError::TopologyError(format!(
                    "role \"{}\" decays but is not reachable from the root",
                    vertex.parent
                )));
            }
        }
        if !parents_seen.contains(self.root.as_str()) {
            return Err(FfwError::TopologyError(format!(
                "root role \"{}\" has no decay vertex",
                self.root
            )));
        }
        Ok(())
    }
}

/// A per-event decay tree: particles in registration order plus the
/// vertices expressed through local indices, ready for submission to an
/// amplitude evaluator.
#[derive(Clone, Debug)]
pub struct DecayTree {
    /// Role names parallel to `particles`
    pub roles: Vec<String>,
    /// Particles in registration order (root first)
    pub particles: Vec<Particle>,
    /// Vertices as (parent index, child indices)
    pub vertices: Vec<(usize, Vec<usize>)>,
}

impl DecayTree {
    /// Construct the decay tree for one event record.
    ///
    /// Applies the wrong-sign correction first: generators record the
    /// pre-oscillation type code for neutral parents that oscillated
    /// before decaying, so a root code sharing the sign of the
    /// oscillation-reference code is negated. All other codes pass
    /// through as recorded. The same record always yields the same tree
    /// and index assignment.
    pub fn build(spec: &TopologySpec, record: &EventRecord) -> FfwResult<Self> {
        let roles = spec.roles();
        let mut particles = Vec::with_capacity(roles.len());
        for role in &roles {
            let particle = record.particle(role).ok_or_else(|| {
                FfwError::TopologyError(format!(
                    "event {} has no particle in role \"{role}\"",
                    record.event_number
                ))
            })?;
            particles.push(*particle);
        }

        if let Some(reference) = spec.oscillation_reference() {
            let ref_pid = record
                .particle(reference)
                .map(|p| p.pid)
                .unwrap_or_default();
            let root = &mut particles[0];
            if root.pid as i64 * ref_pid as i64 > 0 {
                root.pid = -root.pid;
            }
        }

        let index_of = |role: &str| -> FfwResult<usize> {
            roles
                .iter()
                .position(|r| *r == role)
                .ok_or_else(|| FfwError::TopologyError(format!("unknown role \"{role}\"")))
        };
        let mut vertices = Vec::with_capacity(spec.vertices().len());
        for vertex in spec.vertices() {
            let parent = index_of(&vertex.parent)?;
            let children = vertex
                .children
                .iter()
                .map(|c| index_of(c))
                .collect::<FfwResult<Vec<usize>>>()?;
            vertices.push((parent, children));
        }

        Ok(Self {
            roles: roles.into_iter().map(String::from).collect(),
            particles,
            vertices,
        })
    }
}
