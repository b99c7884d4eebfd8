//! Mesh nodes.
//!
//! A [`Node`] owns its coordinates and the response quantities attached to
//! its degrees of freedom: trial and committed displacement, the applied
//! (unbalanced) load accumulated by load patterns, and the reaction
//! accumulator used by reaction recovery.

use nalgebra::DVector;
use smallvec::SmallVec;

use fem_types::{FemError, NodeTag};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A point of the mesh carrying `ndf` degrees of freedom.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Node {
    tag: NodeTag,
    coords: SmallVec<[f64; 3]>,
    ndf: usize,
    trial_disp: DVector<f64>,
    committed_disp: DVector<f64>,
    load: DVector<f64>,
    reaction: DVector<f64>,
}

impl Node {
    /// Create a node at `coords` (1 to 3 coordinates) with `ndf` DOFs.
    pub fn new(tag: NodeTag, coords: &[f64], ndf: usize) -> fem_types::Result<Self> {
        if coords.is_empty() || coords.len() > 3 {
            return Err(FemError::invalid_config(format!(
                "{tag} needs 1 to 3 coordinates, got {}",
                coords.len()
            )));
        }
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(FemError::NonFinite {
                context: "node coordinates",
            });
        }
        if ndf == 0 {
            return Err(FemError::invalid_config(format!("{tag} has no dofs")));
        }
        Ok(Self {
            tag,
            coords: SmallVec::from_slice(coords),
            ndf,
            trial_disp: DVector::zeros(ndf),
            committed_disp: DVector::zeros(ndf),
            load: DVector::zeros(ndf),
            reaction: DVector::zeros(ndf),
        })
    }

    /// Node tag.
    #[must_use]
    pub fn tag(&self) -> NodeTag {
        self.tag
    }

    /// Reference coordinates.
    #[must_use]
    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    /// Coordinates padded to three dimensions.
    #[must_use]
    pub fn point(&self) -> [f64; 3] {
        let mut p = [0.0; 3];
        p[..self.coords.len()].copy_from_slice(&self.coords);
        p
    }

    /// Number of degrees of freedom.
    #[must_use]
    pub fn ndf(&self) -> usize {
        self.ndf
    }

    /// Trial displacement.
    #[must_use]
    pub fn trial_disp(&self) -> &DVector<f64> {
        &self.trial_disp
    }

    /// Last committed displacement.
    #[must_use]
    pub fn committed_disp(&self) -> &DVector<f64> {
        &self.committed_disp
    }

    /// Displacement increment since the last commit.
    #[must_use]
    pub fn incr_disp(&self) -> DVector<f64> {
        &self.trial_disp - &self.committed_disp
    }

    fn check_dof(&self, dof: usize) -> fem_types::Result<()> {
        if dof >= self.ndf {
            return Err(FemError::InvalidDof {
                node: self.tag,
                dof,
                ndf: self.ndf,
            });
        }
        Ok(())
    }

    fn check_len(&self, context: &'static str, len: usize) -> fem_types::Result<()> {
        if len != self.ndf {
            return Err(FemError::DimensionMismatch {
                context,
                expected: self.ndf,
                actual: len,
            });
        }
        Ok(())
    }

    /// Overwrite one component of the trial displacement.
    pub fn set_trial_disp_dof(&mut self, dof: usize, value: f64) -> fem_types::Result<()> {
        self.check_dof(dof)?;
        self.trial_disp[dof] = value;
        Ok(())
    }

    /// Overwrite the whole trial displacement.
    pub fn set_trial_disp(&mut self, disp: &DVector<f64>) -> fem_types::Result<()> {
        self.check_len("trial displacement", disp.len())?;
        self.trial_disp.copy_from(disp);
        Ok(())
    }

    /// Add `delta` to the trial displacement.
    pub fn incr_trial_disp(&mut self, delta: &DVector<f64>) -> fem_types::Result<()> {
        self.check_len("displacement increment", delta.len())?;
        self.trial_disp += delta;
        Ok(())
    }

    /// Overwrite the committed displacement. Used when restoring state.
    pub(crate) fn set_committed_disp(&mut self, disp: &DVector<f64>) -> fem_types::Result<()> {
        self.check_len("committed displacement", disp.len())?;
        self.committed_disp.copy_from(disp);
        Ok(())
    }

    /// Accept the trial state.
    pub fn commit_state(&mut self) {
        self.committed_disp.copy_from(&self.trial_disp);
    }

    /// Discard the trial state.
    pub fn revert_to_last_commit(&mut self) {
        self.trial_disp.copy_from(&self.committed_disp);
    }

    /// Return to the undeformed state.
    pub fn revert_to_start(&mut self) {
        self.trial_disp.fill(0.0);
        self.committed_disp.fill(0.0);
        self.load.fill(0.0);
        self.reaction.fill(0.0);
    }

    /// Applied load accumulated since the last [`Self::zero_unbalanced_load`].
    #[must_use]
    pub fn unbalanced_load(&self) -> &DVector<f64> {
        &self.load
    }

    /// Clear the applied load.
    pub fn zero_unbalanced_load(&mut self) {
        self.load.fill(0.0);
    }

    /// Accumulate `factor * load` into the applied load.
    pub fn add_unbalanced_load(&mut self, load: &DVector<f64>, factor: f64) -> fem_types::Result<()> {
        self.check_len("nodal load", load.len())?;
        self.load.axpy(factor, load, 1.0);
        Ok(())
    }

    /// Reaction computed by the last reaction recovery.
    #[must_use]
    pub fn reaction(&self) -> &DVector<f64> {
        &self.reaction
    }

    /// Start reaction recovery: the reaction is set to minus the applied load.
    pub fn reset_reaction(&mut self) {
        self.reaction.copy_from(&self.load);
        self.reaction.neg_mut();
    }

    /// Accumulate into the reaction.
    pub fn add_reaction(&mut self, force: &DVector<f64>) -> fem_types::Result<()> {
        self.check_len("reaction", force.len())?;
        self.reaction += force;
        Ok(())
    }

    /// Accumulate into one component of the reaction.
    pub fn add_reaction_dof(&mut self, dof: usize, value: f64) -> fem_types::Result<()> {
        self.check_dof(dof)?;
        self.reaction[dof] += value;
        Ok(())
    }
}
