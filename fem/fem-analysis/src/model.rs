//! Degree-of-freedom numbering and assembly.
//!
//! The [`AnalysisModel`] maps every node DOF onto the equations of the
//! linear system:
//!
//! - DOFs fixed by a single-freedom constraint get no equation; their value
//!   is written by [`Domain::apply_load`].
//! - DOFs constrained by a multi-freedom constraint are eliminated by
//!   transformation: `u_c = C·u_r`, so their row of the transformation `T`
//!   holds the coefficients of the retained node's free equations.
//! - Every other DOF owns one equation, numbered in node order
//!   ([`Numberer::Plain`]) or in reverse Cuthill-McKee order over the node
//!   graph ([`Numberer::ReverseCuthillMcKee`]).
//!
//! The tangent is assembled as `Tᵀ·K·T` and the unbalance as `Tᵀ·(P - F)`.
//!
//! The model records the domain change stamp it was numbered at.
//! [`AnalysisModel::refresh`] renumbers when the domain reports a newer
//! stamp.

use std::collections::{BTreeMap, VecDeque};

use hashbrown::{HashMap, HashSet};
use nalgebra::DVector;
use smallvec::SmallVec;
use tracing::{debug, warn};

use fem_constraint::FreedomCoupling;
use fem_domain::{Domain, Element, Graph};
use fem_types::{FemError, LocalControl, NodeTag, Numberer};

use crate::linear_system::LinearSystem;

/// Row of the transformation `T`: `(equation, coefficient)` pairs.
type DofRow = SmallVec<[(usize, f64); 4]>;

/// DOF eliminated through a multi-freedom constraint.
#[derive(Debug, Clone)]
struct ConstrainedDof {
    node: NodeTag,
    dof: usize,
    retained: NodeTag,
    /// `(retained dof, coefficient)` pairs.
    terms: SmallVec<[(usize, f64); 4]>,
}

/// Equation numbering and assembly for one domain topology.
#[derive(Debug, Clone, Default)]
pub struct AnalysisModel {
    numberer: Numberer,
    stamp: u64,
    num_eqn: usize,
    rows: HashMap<(NodeTag, usize), DofRow>,
    /// `(node, dof)` owning each equation.
    owners: Vec<(NodeTag, usize)>,
    constrained: Vec<ConstrainedDof>,
}

impl AnalysisModel {
    /// Number the equations of `domain`.
    ///
    /// Consumes a pending domain change, so the model is current with the
    /// stamp it returns. Constraints on missing nodes are logged and
    /// skipped. Fails if a DOF is both fixed and constrained, constrained
    /// twice, or retained by a chain of multi-freedom constraints.
    pub fn build(domain: &mut Domain, numberer: Numberer) -> fem_types::Result<Self> {
        let stamp = domain.has_domain_changed();
        let fixed = fixed_dofs(domain);
        let couplings = coupled_dofs(domain, &fixed)?;

        let order = match numberer {
            Numberer::Plain => domain.mesh().node_tags(),
            Numberer::ReverseCuthillMcKee => {
                let mut order: Vec<NodeTag> = reverse_cuthill_mckee(domain.node_graph())
                    .into_iter()
                    .map(NodeTag)
                    .collect();
                let seen: HashSet<NodeTag> = order.iter().copied().collect();
                order.extend(
                    domain
                        .mesh()
                        .node_tags()
                        .into_iter()
                        .filter(|t| !seen.contains(t)),
                );
                order
            }
        };

        let mut rows: HashMap<(NodeTag, usize), DofRow> = HashMap::new();
        let mut owners = Vec::new();
        for tag in order {
            let Some(node) = domain.node(tag) else {
                continue;
            };
            for dof in 0..node.ndf() {
                if fixed.contains(&(tag, dof)) || couplings.contains_key(&(tag, dof)) {
                    continue;
                }
                let mut row = DofRow::new();
                row.push((owners.len(), 1.0));
                rows.insert((tag, dof), row);
                owners.push((tag, dof));
            }
        }

        let mut constrained = Vec::with_capacity(couplings.len());
        for ((node, dof), (retained, terms)) in couplings {
            let mut row = DofRow::new();
            for &(rdof, coeff) in &terms {
                if coeff == 0.0 {
                    continue;
                }
                if let Some(retained_row) = rows.get(&(retained, rdof)) {
                    row.extend(retained_row.iter().map(|&(eq, c)| (eq, c * coeff)));
                }
            }
            rows.insert((node, dof), row);
            constrained.push(ConstrainedDof {
                node,
                dof,
                retained,
                terms,
            });
        }

        debug!(
            stamp,
            num_eqn = owners.len(),
            constrained = constrained.len(),
            ?numberer,
            "equations numbered"
        );
        Ok(Self {
            numberer,
            stamp,
            num_eqn: owners.len(),
            rows,
            owners,
            constrained,
        })
    }

    /// Renumber if the domain changed since the model was built. Returns
    /// whether renumbering happened.
    pub fn refresh(&mut self, domain: &mut Domain) -> fem_types::Result<bool> {
        if domain.has_domain_changed() == self.stamp {
            return Ok(false);
        }
        *self = Self::build(domain, self.numberer)?;
        Ok(true)
    }

    /// Domain change stamp the numbering belongs to.
    #[must_use]
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Number of equations.
    #[must_use]
    pub fn num_eqn(&self) -> usize {
        self.num_eqn
    }

    /// Equation owned by `(node, dof)`, if the DOF is free.
    #[must_use]
    pub fn equation(&self, node: NodeTag, dof: usize) -> Option<usize> {
        let &(eq, _) = self.rows.get(&(node, dof))?.first()?;
        (self.owners.get(eq) == Some(&(node, dof))).then_some(eq)
    }

    /// `(node, dof)` that owns equation `eq`.
    #[must_use]
    pub fn owner(&self, eq: usize) -> Option<(NodeTag, usize)> {
        self.owners.get(eq).copied()
    }

    /// Equations measured by the local arc-length rule.
    pub fn local_equations(
        &self,
        domain: &Domain,
        control: &LocalControl,
    ) -> fem_types::Result<Vec<usize>> {
        let dofs: Vec<(NodeTag, usize)> = match control {
            LocalControl::Dofs(dofs) => dofs.clone(),
            LocalControl::Element(tag) => {
                let element = domain.element(*tag).ok_or_else(|| {
                    FemError::not_found(fem_types::Registry::Element, tag.raw())
                })?;
                element
                    .connected_nodes()
                    .iter()
                    .filter_map(|n| domain.node(*n))
                    .flat_map(|n| (0..n.ndf()).map(move |d| (n.tag(), d)))
                    .filter(|(n, d)| self.equation(*n, *d).is_some())
                    .collect()
            }
        };
        let mut eqs = Vec::with_capacity(dofs.len());
        for (node, dof) in dofs {
            let eq = self.equation(node, dof).ok_or_else(|| {
                FemError::invalid_config(format!(
                    "local control dof {dof} of {node} has no free equation"
                ))
            })?;
            eqs.push(eq);
        }
        if eqs.is_empty() {
            return Err(FemError::invalid_config("local control has no free dofs"));
        }
        Ok(eqs)
    }

    // ========================================================================
    // Assembly
    // ========================================================================

    fn node_rows(&self, domain: &Domain, nodes: &[NodeTag]) -> fem_types::Result<Vec<Option<&DofRow>>> {
        let mut local = Vec::new();
        for &tag in nodes {
            let node = domain.node(tag).ok_or(FemError::NodeNotFound(tag))?;
            local.extend((0..node.ndf()).map(|dof| self.rows.get(&(tag, dof))));
        }
        Ok(local)
    }

    /// Assemble `Tᵀ·K·T` into `system`.
    pub fn form_tangent(
        &self,
        domain: &Domain,
        system: &mut dyn LinearSystem,
    ) -> fem_types::Result<()> {
        if system.size() != self.num_eqn {
            system.resize(self.num_eqn);
        }
        system.zero_a();
        for element in domain.mesh().elements() {
            let k = element.tangent_stiff();
            let local = self.node_rows(domain, element.connected_nodes())?;
            if local.len() != k.nrows() {
                return Err(FemError::DimensionMismatch {
                    context: "element tangent",
                    expected: local.len(),
                    actual: k.nrows(),
                });
            }
            for (a, row_a) in local.iter().enumerate() {
                let Some(row_a) = row_a else { continue };
                for (b, row_b) in local.iter().enumerate() {
                    let Some(row_b) = row_b else { continue };
                    let kab = k[(a, b)];
                    if kab == 0.0 {
                        continue;
                    }
                    for &(ea, ca) in row_a.iter() {
                        for &(eb, cb) in row_b.iter() {
                            system.add_a(ea, eb, ca * cb * kab);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Unbalance `Tᵀ·(P - F)` of the current trial state.
    pub fn unbalance(&self, domain: &Domain) -> fem_types::Result<DVector<f64>> {
        let mut r = DVector::zeros(self.num_eqn);
        for node in domain.mesh().nodes() {
            for (dof, p) in node.unbalanced_load().iter().enumerate() {
                if let Some(row) = self.rows.get(&(node.tag(), dof)) {
                    for &(eq, c) in row {
                        r[eq] += c * p;
                    }
                }
            }
        }
        for element in domain.mesh().elements() {
            let f = element.resisting_force();
            let local = self.node_rows(domain, element.connected_nodes())?;
            if local.len() != f.len() {
                return Err(FemError::DimensionMismatch {
                    context: "element resisting force",
                    expected: local.len(),
                    actual: f.len(),
                });
            }
            for (a, row) in local.iter().enumerate() {
                let Some(row) = row else { continue };
                for &(eq, c) in row.iter() {
                    r[eq] -= c * f[a];
                }
            }
        }
        Ok(r)
    }

    /// Write the unbalance into the right-hand side of `system`.
    pub fn form_unbalance(
        &self,
        domain: &Domain,
        system: &mut dyn LinearSystem,
    ) -> fem_types::Result<()> {
        if system.size() != self.num_eqn {
            system.resize(self.num_eqn);
        }
        let r = self.unbalance(domain)?;
        system.set_b(&r)
    }

    /// Add the equation increment `du` to the node trial displacements,
    /// re-impose `u_c = C·u_r` on constrained DOFs and update the elements.
    pub fn incr_disp(&self, domain: &mut Domain, du: &DVector<f64>) -> fem_types::Result<()> {
        if du.len() != self.num_eqn {
            return Err(FemError::DimensionMismatch {
                context: "displacement increment",
                expected: self.num_eqn,
                actual: du.len(),
            });
        }
        let mut per_node: BTreeMap<NodeTag, Vec<(usize, f64)>> = BTreeMap::new();
        for (eq, &(node, dof)) in self.owners.iter().enumerate() {
            per_node.entry(node).or_default().push((dof, du[eq]));
        }
        for (tag, values) in per_node {
            let node = domain.node_mut(tag).ok_or(FemError::NodeNotFound(tag))?;
            let mut delta = DVector::zeros(node.ndf());
            for (dof, v) in values {
                delta[dof] = v;
            }
            node.incr_trial_disp(&delta)?;
        }
        self.impose_constrained(domain)?;
        domain.update()
    }

    fn impose_constrained(&self, domain: &mut Domain) -> fem_types::Result<()> {
        for c in &self.constrained {
            let retained = domain
                .node(c.retained)
                .ok_or(FemError::NodeNotFound(c.retained))?
                .trial_disp();
            let value: f64 = c
                .terms
                .iter()
                .map(|&(rdof, coeff)| coeff * retained.get(rdof).copied().unwrap_or(0.0))
                .sum();
            domain
                .node_mut(c.node)
                .ok_or(FemError::NodeNotFound(c.node))?
                .set_trial_disp_dof(c.dof, value)?;
        }
        Ok(())
    }

    /// Gather the trial displacement of every equation.
    #[must_use]
    pub fn trial_disp(&self, domain: &Domain) -> DVector<f64> {
        DVector::from_iterator(
            self.num_eqn,
            self.owners.iter().map(|&(node, dof)| {
                domain
                    .node(node)
                    .map_or(0.0, |n| n.trial_disp().get(dof).copied().unwrap_or(0.0))
            }),
        )
    }
}

/// `(node, dof)` pairs carrying a single-freedom constraint.
fn fixed_dofs(domain: &Domain) -> HashSet<(NodeTag, usize)> {
    let mut fixed = HashSet::new();
    for sp in domain.constraints().sp_constraints() {
        match domain.node(sp.node()) {
            Some(node) if sp.dof() < node.ndf() => {
                fixed.insert((sp.node(), sp.dof()));
            }
            _ => warn!(
                constraint = sp.tag().raw(),
                node = sp.node().raw(),
                "constraint references a missing dof, skipped"
            ),
        }
    }
    fixed
}

type Coupling = (NodeTag, SmallVec<[(usize, f64); 4]>);

/// Constrained `(node, dof)` pairs with their retained node and row of `C`.
fn coupled_dofs(
    domain: &Domain,
    fixed: &HashSet<(NodeTag, usize)>,
) -> fem_types::Result<BTreeMap<(NodeTag, usize), Coupling>> {
    let mut couplings = BTreeMap::new();
    for mp in domain.constraints().mp_constraints() {
        let (c_node, r_node) = (mp.constrained_node(), mp.retained_node());
        if domain.node(c_node).is_none() || domain.node(r_node).is_none() {
            warn!(constraint = mp.tag().raw(), "constraint references a missing node, skipped");
            continue;
        }
        for (row, &dof) in mp.constrained_dofs().iter().enumerate() {
            if fixed.contains(&(c_node, dof)) {
                return Err(FemError::invalid_config(format!(
                    "dof {dof} of {c_node} is both fixed and constrained by {}",
                    mp.tag()
                )));
            }
            let terms: SmallVec<[(usize, f64); 4]> = mp
                .retained_dofs()
                .iter()
                .enumerate()
                .filter_map(|(col, &rdof)| mp.coefficient(row, col).map(|c| (rdof, c)))
                .collect();
            if couplings.insert((c_node, dof), (r_node, terms)).is_some() {
                return Err(FemError::invalid_config(format!(
                    "dof {dof} of {c_node} is constrained twice"
                )));
            }
        }
    }
    for (c_node, c_dof) in couplings.keys() {
        for (retained, terms) in couplings.values() {
            if retained == c_node && terms.iter().any(|(rdof, _)| rdof == c_dof) {
                return Err(FemError::invalid_config(format!(
                    "dof {c_dof} of {c_node} is retained by one constraint and constrained by another"
                )));
            }
        }
    }
    Ok(couplings)
}

/// Reverse Cuthill-McKee ordering of the graph's vertex tags.
///
/// Each component starts from its lowest-degree vertex (lowest id on ties);
/// neighbours are visited in ascending degree.
fn reverse_cuthill_mckee(graph: &Graph) -> Vec<i32> {
    let n = graph.num_vertices();
    let degree = |id: usize| graph.vertex(id).map_or(0, fem_domain::Vertex::degree);
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);

    let mut by_degree: Vec<usize> = (0..n).map(|i| i + fem_domain::START_VERTEX_NUM).collect();
    by_degree.sort_by_key(|&id| (degree(id), id));

    for &start in &by_degree {
        let slot = start - fem_domain::START_VERTEX_NUM;
        if visited[slot] {
            continue;
        }
        visited[slot] = true;
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            let Some(vertex) = graph.vertex(id) else {
                continue;
            };
            let mut next: Vec<usize> = vertex
                .adjacency()
                .filter(|&a| !visited[a - fem_domain::START_VERTEX_NUM])
                .collect();
            next.sort_by_key(|&a| (degree(a), a));
            for a in next {
                visited[a - fem_domain::START_VERTEX_NUM] = true;
                queue.push_back(a);
            }
        }
    }
    order
        .into_iter()
        .rev()
        .filter_map(|id| graph.vertex(id).map(fem_domain::Vertex::tag))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::linear_system::DenseSystem;
    use approx::assert_relative_eq;
    use fem_constraint::{MultiFreedomConstraint, SingleFreedomConstraint};
    use fem_domain::{Node, Truss};
    use fem_types::{ConstraintTag, ElementTag};
    use nalgebra::DMatrix;
    use proptest::prelude::*;

    /// Bar of `n` unit-length 1D trusses, node 1 fixed.
    fn chain(n: i32) -> Domain {
        let mut domain = Domain::new();
        for i in 1..=n + 1 {
            domain
                .add_node(Node::new(NodeTag(i), &[f64::from(i - 1)], 1).unwrap())
                .unwrap();
        }
        for i in 1..=n {
            domain
                .add_element(Truss::new(ElementTag(i), [NodeTag(i), NodeTag(i + 1)], 1.0, 10.0).unwrap())
                .unwrap();
        }
        domain
            .add_sp(SingleFreedomConstraint::fixed(ConstraintTag(1), NodeTag(1), 0))
            .unwrap();
        domain
    }

    #[test]
    fn test_fixed_dofs_get_no_equation() {
        let mut domain = chain(3);
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        assert_eq!(model.num_eqn(), 3);
        assert_eq!(model.equation(NodeTag(1), 0), None);
        assert_eq!(model.equation(NodeTag(2), 0), Some(0));
        assert_eq!(model.owner(2), Some((NodeTag(4), 0)));
        assert!(!domain.is_change_pending());
    }

    #[test]
    fn test_tangent_assembly() {
        let mut domain = chain(2);
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        let mut system = DenseSystem::default();
        model.form_tangent(&domain, &mut system).unwrap();
        let expected = DMatrix::from_row_slice(2, 2, &[20.0, -10.0, -10.0, 10.0]);
        assert_relative_eq!(*system.a(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_equal_dof_is_eliminated() {
        let mut domain = chain(1);
        domain
            .add_node(Node::new(NodeTag(3), &[5.0], 1).unwrap())
            .unwrap();
        domain
            .add_mp(MultiFreedomConstraint::equal_dof(ConstraintTag(2), NodeTag(2), NodeTag(3), vec![0]).unwrap())
            .unwrap();
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        assert_eq!(model.num_eqn(), 1);
        assert_eq!(model.equation(NodeTag(3), 0), None);

        model
            .incr_disp(&mut domain, &DVector::from_vec(vec![0.25]))
            .unwrap();
        assert_eq!(domain.node(NodeTag(3)).unwrap().trial_disp()[0], 0.25);
        assert_eq!(model.trial_disp(&domain)[0], 0.25);
    }

    #[test]
    fn test_fixed_and_constrained_rejected() {
        let mut domain = chain(1);
        domain
            .add_mp(MultiFreedomConstraint::equal_dof(ConstraintTag(2), NodeTag(2), NodeTag(1), vec![0]).unwrap())
            .unwrap();
        let err = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_refresh_follows_stamp() {
        let mut domain = chain(2);
        let mut model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        assert!(!model.refresh(&mut domain).unwrap());

        domain
            .add_sp(SingleFreedomConstraint::fixed(ConstraintTag(5), NodeTag(3), 0))
            .unwrap();
        assert!(model.refresh(&mut domain).unwrap());
        assert_eq!(model.num_eqn(), 1);
        assert_eq!(model.stamp(), domain.stamp());
    }

    /// Chain whose node tags along its length are `tags`.
    fn shuffled_chain(tags: &[i32]) -> Domain {
        let mut domain = Domain::new();
        for (i, &tag) in tags.iter().enumerate() {
            domain
                .add_node(Node::new(NodeTag(tag), &[i as f64], 1).unwrap())
                .unwrap();
        }
        for (i, pair) in tags.windows(2).enumerate() {
            domain
                .add_element(
                    Truss::new(ElementTag(i as i32 + 1), [NodeTag(pair[0]), NodeTag(pair[1])], 1.0, 1.0)
                        .unwrap(),
                )
                .unwrap();
        }
        domain
    }

    fn chain_bandwidth(model: &AnalysisModel, tags: &[i32]) -> usize {
        tags.windows(2)
            .map(|p| {
                let a = model.equation(NodeTag(p[0]), 0).unwrap();
                let b = model.equation(NodeTag(p[1]), 0).unwrap();
                a.abs_diff(b)
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_rcm_keeps_band_narrow() {
        let tags = [1, 5, 2, 4, 3];
        let mut domain = shuffled_chain(&tags);
        let plain = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        assert_eq!(chain_bandwidth(&plain, &tags), 4);

        let model = AnalysisModel::build(&mut domain, Numberer::ReverseCuthillMcKee).unwrap();
        assert_eq!(model.num_eqn(), 5);
        assert_eq!(chain_bandwidth(&model, &tags), 1);
    }

    proptest! {
        #[test]
        fn prop_rcm_numbers_chain_as_band(
            tags in Just((1..=12).collect::<Vec<i32>>()).prop_shuffle(),
            len in 2usize..=12,
        ) {
            let tags = &tags[..len];
            let mut domain = shuffled_chain(tags);
            let model = AnalysisModel::build(&mut domain, Numberer::ReverseCuthillMcKee).unwrap();
            prop_assert_eq!(model.num_eqn(), len);
            let mut seen: Vec<usize> = tags
                .iter()
                .map(|&t| model.equation(NodeTag(t), 0).unwrap())
                .collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..len).collect::<Vec<_>>());
            prop_assert_eq!(chain_bandwidth(&model, tags), 1);
        }
    }

    #[test]
    fn test_local_equations() {
        let mut domain = chain(2);
        let model = AnalysisModel::build(&mut domain, Numberer::Plain).unwrap();
        let eqs = model
            .local_equations(&domain, &LocalControl::Element(ElementTag(1)))
            .unwrap();
        assert_eq!(eqs, vec![0]);
        let err = model
            .local_equations(&domain, &LocalControl::Dofs(vec![(NodeTag(1), 0)]))
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
