//! Zero-length spring element.
//!
//! Independent linear springs acting on selected DOFs between two nodes.
//! Spring `i` on DOF `d` carries `F = k · (u₂[d] - u₁[d])`.

use nalgebra::{DMatrix, DVector};
use smallvec::SmallVec;

use fem_types::{ElementTag, FemError, NodeTag};

use crate::element::{Element, ElementContext, ElementLoadKind};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One spring of a [`ZeroLength`] element.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spring {
    /// DOF the spring acts on (same index on both nodes).
    pub dof: usize,
    /// Spring stiffness.
    pub stiffness: f64,
}

/// Uncoupled springs between two nodes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ZeroLength {
    tag: ElementTag,
    nodes: [NodeTag; 2],
    springs: SmallVec<[Spring; 3]>,
    ndf: [usize; 2],
    centroid: [f64; 3],
    trial_deformation: SmallVec<[f64; 3]>,
    committed_deformation: SmallVec<[f64; 3]>,
}

impl ZeroLength {
    /// Create springs between `nodes`.
    pub fn new(
        tag: ElementTag,
        nodes: [NodeTag; 2],
        springs: &[Spring],
    ) -> fem_types::Result<Self> {
        if springs.is_empty() {
            return Err(FemError::invalid_config(format!("{tag} has no springs")));
        }
        for (i, s) in springs.iter().enumerate() {
            if !s.stiffness.is_finite() {
                return Err(FemError::NonFinite {
                    context: "spring stiffness",
                });
            }
            if springs[..i].iter().any(|o| o.dof == s.dof) {
                return Err(FemError::invalid_config(format!(
                    "{tag} has two springs on dof {}",
                    s.dof
                )));
            }
        }
        Ok(Self {
            tag,
            nodes,
            springs: SmallVec::from_slice(springs),
            ndf: [0, 0],
            centroid: [0.0; 3],
            trial_deformation: SmallVec::from_elem(0.0, springs.len()),
            committed_deformation: SmallVec::from_elem(0.0, springs.len()),
        })
    }

    /// Spring definitions.
    #[must_use]
    pub fn springs(&self) -> &[Spring] {
        &self.springs
    }

    /// Spring forces at the trial state, one per spring.
    #[must_use]
    pub fn spring_forces(&self) -> SmallVec<[f64; 3]> {
        self.springs
            .iter()
            .zip(&self.trial_deformation)
            .map(|(s, d)| s.stiffness * d)
            .collect()
    }
}

impl Element for ZeroLength {
    fn tag(&self) -> ElementTag {
        self.tag
    }

    fn connected_nodes(&self) -> &[NodeTag] {
        &self.nodes
    }

    fn num_dof(&self) -> usize {
        self.ndf[0] + self.ndf[1]
    }

    fn attach(&mut self, ctx: &ElementContext<'_>) -> fem_types::Result<()> {
        let a = ctx.node(self.nodes[0])?;
        let b = ctx.node(self.nodes[1])?;
        let max_dof = self.springs.iter().map(|s| s.dof).max().unwrap_or(0);
        for node in [a, b] {
            if max_dof >= node.ndf() {
                return Err(FemError::InvalidDof {
                    node: node.tag(),
                    dof: max_dof,
                    ndf: node.ndf(),
                });
            }
        }
        self.ndf = [a.ndf(), b.ndf()];
        self.centroid = a.point();
        Ok(())
    }

    fn update(&mut self, ctx: &mut ElementContext<'_>) -> fem_types::Result<()> {
        let dims = self.springs.iter().map(|s| s.dof + 1).max().unwrap_or(0);
        let du = ctx.relative_trial_disp(self.nodes[0], self.nodes[1], dims)?;
        for (d, s) in self.trial_deformation.iter_mut().zip(&self.springs) {
            *d = du[s.dof];
        }
        Ok(())
    }

    fn tangent_stiff(&self) -> DMatrix<f64> {
        let n = self.num_dof();
        let offset = self.ndf[0];
        let mut k = DMatrix::zeros(n, n);
        for s in &self.springs {
            let (i, j) = (s.dof, offset + s.dof);
            k[(i, i)] += s.stiffness;
            k[(j, j)] += s.stiffness;
            k[(i, j)] -= s.stiffness;
            k[(j, i)] -= s.stiffness;
        }
        k
    }

    fn resisting_force(&self) -> DVector<f64> {
        let mut f = DVector::zeros(self.num_dof());
        let offset = self.ndf[0];
        for (s, force) in self.springs.iter().zip(self.spring_forces()) {
            f[s.dof] -= force;
            f[offset + s.dof] += force;
        }
        f
    }

    fn commit_state(&mut self) {
        self.committed_deformation.clone_from(&self.trial_deformation);
    }

    fn revert_to_last_commit(&mut self) {
        self.trial_deformation.clone_from(&self.committed_deformation);
    }

    fn revert_to_start(&mut self) {
        self.trial_deformation.iter_mut().for_each(|d| *d = 0.0);
        self.committed_deformation.iter_mut().for_each(|d| *d = 0.0);
    }

    fn zero_load(&mut self) {}

    fn add_load(&mut self, _load: &ElementLoadKind, _factor: f64) -> fem_types::Result<()> {
        Err(FemError::invalid_config(format!(
            "{} does not accept element loads",
            self.tag
        )))
    }

    fn centroid(&self) -> [f64; 3] {
        self.centroid
    }
}
