//! Two-node elastic truss elements.
//!
//! - [`Truss`]: small-displacement bar; axial strain is the projection of
//!   the relative displacement on the reference axis.
//! - [`CorotTruss`]: corotational bar; strain and direction follow the
//!   deformed chord, so the element captures snap-through and other
//!   geometric nonlinearity.
//!
//! Both carry axial force `N = E·A·(ε - ε₀)` where `ε₀` is the accumulated
//! initial strain load.

use nalgebra::{DMatrix, DVector};
use smallvec::SmallVec;

use fem_types::{ElementTag, FemError, NodeTag};

use crate::element::{Element, ElementContext, ElementLoadKind, TwoNodeLayout};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

fn check_section(tag: ElementTag, area: f64, modulus: f64) -> fem_types::Result<()> {
    if !(area > 0.0 && area.is_finite()) {
        return Err(FemError::invalid_config(format!(
            "{tag} area must be positive, got {area}"
        )));
    }
    if !(modulus > 0.0 && modulus.is_finite()) {
        return Err(FemError::invalid_config(format!(
            "{tag} modulus must be positive, got {modulus}"
        )));
    }
    Ok(())
}

fn chord(ndm: usize, a: &[f64; 3], b: &[f64; 3]) -> SmallVec<[f64; 3]> {
    (0..ndm).map(|i| b[i] - a[i]).collect()
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn midpoint(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        0.5 * (a[0] + b[0]),
        0.5 * (a[1] + b[1]),
        0.5 * (a[2] + b[2]),
    ]
}

/// Element loads accumulated on a bar.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct BarLoads {
    axial: f64,
    initial_strain: f64,
}

impl BarLoads {
    fn add(&mut self, load: &ElementLoadKind, factor: f64) {
        match *load {
            ElementLoadKind::UniformAxial(w) => self.axial += factor * w,
            ElementLoadKind::InitialStrain(eps) => self.initial_strain += factor * eps,
        }
    }
}

// ============================================================================
// Truss
// ============================================================================

/// Small-displacement elastic truss.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Truss {
    tag: ElementTag,
    nodes: [NodeTag; 2],
    area: f64,
    modulus: f64,
    layout: TwoNodeLayout,
    length: f64,
    cosines: SmallVec<[f64; 3]>,
    centroid: [f64; 3],
    trial_strain: f64,
    committed_strain: f64,
    loads: BarLoads,
}

impl Truss {
    /// Create a truss between two nodes with cross-section area and modulus.
    pub fn new(
        tag: ElementTag,
        nodes: [NodeTag; 2],
        area: f64,
        modulus: f64,
    ) -> fem_types::Result<Self> {
        check_section(tag, area, modulus)?;
        if nodes[0] == nodes[1] {
            return Err(FemError::invalid_config(format!(
                "{tag} connects {} to itself",
                nodes[0]
            )));
        }
        Ok(Self {
            tag,
            nodes,
            area,
            modulus,
            layout: TwoNodeLayout::default(),
            length: 0.0,
            cosines: SmallVec::new(),
            centroid: [0.0; 3],
            trial_strain: 0.0,
            committed_strain: 0.0,
            loads: BarLoads::default(),
        })
    }

    /// Reference length. Zero before attachment.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Axial force at the trial state (tension positive).
    #[must_use]
    pub fn axial_force(&self) -> f64 {
        self.modulus * self.area * (self.trial_strain - self.loads.initial_strain)
    }
}

impl Element for Truss {
    fn tag(&self) -> ElementTag {
        self.tag
    }

    fn connected_nodes(&self) -> &[NodeTag] {
        &self.nodes
    }

    fn num_dof(&self) -> usize {
        self.layout.size()
    }

    fn attach(&mut self, ctx: &ElementContext<'_>) -> fem_types::Result<()> {
        let (layout, a, b) = TwoNodeLayout::resolve(self.tag, self.nodes, ctx)?;
        let d = chord(layout.ndm, &a, &b);
        let length = norm(&d);
        if length <= f64::EPSILON {
            return Err(FemError::invalid_config(format!("{} has zero length", self.tag)));
        }
        self.cosines = d.iter().map(|x| x / length).collect();
        self.length = length;
        self.layout = layout;
        self.centroid = midpoint(&a, &b);
        Ok(())
    }

    fn update(&mut self, ctx: &mut ElementContext<'_>) -> fem_types::Result<()> {
        let du = ctx.relative_trial_disp(self.nodes[0], self.nodes[1], self.layout.ndm)?;
        let elongation: f64 = du.iter().zip(&self.cosines).map(|(u, c)| u * c).sum();
        self.trial_strain = elongation / self.length;
        Ok(())
    }

    fn tangent_stiff(&self) -> DMatrix<f64> {
        let ndm = self.layout.ndm;
        let c = DVector::from_column_slice(&self.cosines);
        let k = (c.clone() * c.transpose()) * (self.modulus * self.area / self.length);
        debug_assert_eq!(k.nrows(), ndm);
        self.layout.block_stiffness(&k)
    }

    fn resisting_force(&self) -> DVector<f64> {
        let n = self.axial_force();
        let internal: SmallVec<[f64; 3]> = self.cosines.iter().map(|c| n * c).collect();
        let half = 0.5 * self.loads.axial * self.length;
        let equivalent: SmallVec<[f64; 3]> = self.cosines.iter().map(|c| half * c).collect();
        self.layout.antisymmetric(&internal) - self.layout.symmetric(&equivalent)
    }

    fn commit_state(&mut self) {
        self.committed_strain = self.trial_strain;
    }

    fn revert_to_last_commit(&mut self) {
        self.trial_strain = self.committed_strain;
    }

    fn revert_to_start(&mut self) {
        self.trial_strain = 0.0;
        self.committed_strain = 0.0;
        self.loads = BarLoads::default();
    }

    fn zero_load(&mut self) {
        self.loads = BarLoads::default();
    }

    fn add_load(&mut self, load: &ElementLoadKind, factor: f64) -> fem_types::Result<()> {
        self.loads.add(load, factor);
        Ok(())
    }

    fn centroid(&self) -> [f64; 3] {
        self.centroid
    }
}

// ============================================================================
// CorotTruss
// ============================================================================

/// Corotational elastic truss with engineering strain `(l - l₀) / l₀`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CorotTruss {
    tag: ElementTag,
    nodes: [NodeTag; 2],
    area: f64,
    modulus: f64,
    layout: TwoNodeLayout,
    initial_length: f64,
    reference_chord: SmallVec<[f64; 3]>,
    centroid: [f64; 3],
    trial_chord: SmallVec<[f64; 3]>,
    committed_chord: SmallVec<[f64; 3]>,
    loads: BarLoads,
}

impl CorotTruss {
    /// Create a corotational truss between two nodes.
    pub fn new(
        tag: ElementTag,
        nodes: [NodeTag; 2],
        area: f64,
        modulus: f64,
    ) -> fem_types::Result<Self> {
        check_section(tag, area, modulus)?;
        if nodes[0] == nodes[1] {
            return Err(FemError::invalid_config(format!(
                "{tag} connects {} to itself",
                nodes[0]
            )));
        }
        Ok(Self {
            tag,
            nodes,
            area,
            modulus,
            layout: TwoNodeLayout::default(),
            initial_length: 0.0,
            reference_chord: SmallVec::new(),
            centroid: [0.0; 3],
            trial_chord: SmallVec::new(),
            committed_chord: SmallVec::new(),
            loads: BarLoads::default(),
        })
    }

    /// Current chord length.
    #[must_use]
    pub fn current_length(&self) -> f64 {
        norm(&self.trial_chord)
    }

    /// Axial force at the trial state (tension positive).
    #[must_use]
    pub fn axial_force(&self) -> f64 {
        let strain = (self.current_length() - self.initial_length) / self.initial_length;
        self.modulus * self.area * (strain - self.loads.initial_strain)
    }

    fn direction(&self) -> SmallVec<[f64; 3]> {
        let l = self.current_length();
        self.trial_chord.iter().map(|x| x / l).collect()
    }
}

impl Element for CorotTruss {
    fn tag(&self) -> ElementTag {
        self.tag
    }

    fn connected_nodes(&self) -> &[NodeTag] {
        &self.nodes
    }

    fn num_dof(&self) -> usize {
        self.layout.size()
    }

    fn attach(&mut self, ctx: &ElementContext<'_>) -> fem_types::Result<()> {
        let (layout, a, b) = TwoNodeLayout::resolve(self.tag, self.nodes, ctx)?;
        let d = chord(layout.ndm, &a, &b);
        let length = norm(&d);
        if length <= f64::EPSILON {
            return Err(FemError::invalid_config(format!("{} has zero length", self.tag)));
        }
        self.initial_length = length;
        self.trial_chord = d.clone();
        self.committed_chord = d.clone();
        self.reference_chord = d;
        self.layout = layout;
        self.centroid = midpoint(&a, &b);
        Ok(())
    }

    fn update(&mut self, ctx: &mut ElementContext<'_>) -> fem_types::Result<()> {
        let du = ctx.relative_trial_disp(self.nodes[0], self.nodes[1], self.layout.ndm)?;
        let current: SmallVec<[f64; 3]> = self
            .reference_chord
            .iter()
            .zip(du)
            .map(|(x, u)| x + u)
            .collect();
        if norm(&current) <= f64::EPSILON * self.initial_length {
            return Err(FemError::NonFinite {
                context: "corotational truss collapsed to zero length",
            });
        }
        self.trial_chord = current;
        Ok(())
    }

    fn tangent_stiff(&self) -> DMatrix<f64> {
        let ndm = self.layout.ndm;
        let l = self.current_length();
        let n = DVector::from_column_slice(&self.direction());
        let nn = n.clone() * n.transpose();
        let material = &nn * (self.modulus * self.area / self.initial_length);
        let geometric = (DMatrix::identity(ndm, ndm) - nn) * (self.axial_force() / l);
        self.layout.block_stiffness(&(material + geometric))
    }

    fn resisting_force(&self) -> DVector<f64> {
        let n = self.direction();
        let force = self.axial_force();
        let internal: SmallVec<[f64; 3]> = n.iter().map(|c| force * c).collect();
        let half = 0.5 * self.loads.axial * self.initial_length;
        let equivalent: SmallVec<[f64; 3]> = n.iter().map(|c| half * c).collect();
        self.layout.antisymmetric(&internal) - self.layout.symmetric(&equivalent)
    }

    fn commit_state(&mut self) {
        self.committed_chord.clone_from(&self.trial_chord);
    }

    fn revert_to_last_commit(&mut self) {
        self.trial_chord.clone_from(&self.committed_chord);
    }

    fn revert_to_start(&mut self) {
        self.trial_chord.clone_from(&self.reference_chord);
        self.committed_chord.clone_from(&self.reference_chord);
        self.loads = BarLoads::default();
    }

    fn zero_load(&mut self) {
        self.loads = BarLoads::default();
    }

    fn add_load(&mut self, load: &ElementLoadKind, factor: f64) -> fem_types::Result<()> {
        self.loads.add(load, factor);
        Ok(())
    }

    fn centroid(&self) -> [f64; 3] {
        self.centroid
    }
}
