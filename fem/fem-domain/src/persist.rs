//! Domain persistence over a [`Channel`].
//!
//! Every transfer starts with a metadata payload:
//!
//! ```text
//! [version, stamp, commit tag, has topology, nodes, eigenvalues, modal factors]
//! ```
//!
//! followed by the topology document (only when `has topology` is 1), the
//! state vector and the eigen vector. The sender includes the topology
//! whenever its change stamp moved since its last send. The receiver
//! compares the stamp with the one it last received: a different stamp
//! triggers a full topology resynchronization, an equal stamp a state-only
//! update.

use fem_types::channel::{Channel, FORMAT_VERSION, Payload, check_version, slot};
use fem_types::FemError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::container::ConstraintContainer;
use crate::domain::Domain;
use crate::element::ElementKind;
use crate::mesh::Mesh;
use crate::node::Node;

/// Everything a receiver needs to rebuild the model.
#[derive(Debug, Serialize, Deserialize)]
struct Topology {
    nodes: Vec<Node>,
    elements: Vec<ElementKind>,
    constraints: ConstraintContainer,
}

fn to_usize(value: i64) -> fem_types::Result<usize> {
    usize::try_from(value).map_err(|_| FemError::serialization(format!("count {value} out of range")))
}

impl Domain {
    fn topology(&self) -> Topology {
        let nodes = self
            .mesh
            .node_tags()
            .into_iter()
            .filter_map(|t| self.mesh.node(t).cloned())
            .collect();
        let elements = self
            .mesh
            .element_tags()
            .into_iter()
            .filter_map(|t| self.mesh.element(t).cloned())
            .collect();
        Topology {
            nodes,
            elements,
            constraints: self.constraints.clone(),
        }
    }

    /// Write the domain to `channel` under `(db_tag, commit_tag)`.
    ///
    /// Pending topology changes are folded into the stamp first. The
    /// topology document is sent when the stamp moved or loads were edited
    /// since the last send.
    pub fn send_self(
        &mut self,
        db_tag: i32,
        commit_tag: i32,
        channel: &mut dyn Channel,
    ) -> fem_types::Result<()> {
        self.has_domain_changed();
        let with_topology = self.last_sent_stamp != Some(self.stamp) || self.loads_edited;
        let meta = vec![
            FORMAT_VERSION,
            i64::try_from(self.stamp).map_err(|_| FemError::serialization("stamp overflow"))?,
            i64::from(self.commit_tag),
            i64::from(with_topology),
            self.mesh.num_nodes() as i64,
            self.eigenvalues.len() as i64,
            self.modal_participation.len() as i64,
        ];
        channel.send(db_tag, commit_tag, &Payload::Id(meta))?;

        if with_topology {
            channel.send(db_tag, commit_tag, &Payload::document(&self.topology())?)?;
        }

        let mut state = vec![self.current_time, self.committed_time];
        for tag in self.mesh.node_tags() {
            if let Some(node) = self.mesh.node(tag) {
                state.extend(node.trial_disp().iter());
                state.extend(node.committed_disp().iter());
            }
        }
        channel.send(db_tag, commit_tag, &Payload::Vector(state))?;

        let eigen = self
            .eigenvalues
            .iter()
            .chain(&self.modal_participation)
            .copied()
            .collect();
        channel.send(db_tag, commit_tag, &Payload::Vector(eigen))?;

        self.last_sent_stamp = Some(self.stamp);
        self.loads_edited = false;
        debug!(db_tag, commit_tag, with_topology, "domain sent");
        Ok(())
    }

    /// Read a domain written by [`Self::send_self`].
    ///
    /// A payload from an incompatible format version is logged and the
    /// domain is left untouched.
    pub fn recv_self(
        &mut self,
        db_tag: i32,
        commit_tag: i32,
        channel: &mut dyn Channel,
    ) -> fem_types::Result<()> {
        let meta = channel.recv(db_tag, commit_tag)?.into_id()?;
        if let Err(err) = check_version(&meta) {
            warn!(db_tag, commit_tag, %err, "domain payload skipped");
            return Err(err);
        }
        let stamp = u64::try_from(slot(&meta, 1)?)
            .map_err(|_| FemError::serialization("negative stamp"))?;
        let sent_commit_tag = i32::try_from(slot(&meta, 2)?)
            .map_err(|_| FemError::serialization("commit tag out of range"))?;
        let with_topology = slot(&meta, 3)? != 0;
        let num_nodes = to_usize(slot(&meta, 4)?)?;
        let num_eigen = to_usize(slot(&meta, 5)?)?;
        let num_modal = to_usize(slot(&meta, 6)?)?;

        let topology: Option<Topology> = if with_topology {
            Some(channel.recv(db_tag, commit_tag)?.into_document()?)
        } else {
            None
        };
        let state = channel.recv(db_tag, commit_tag)?.into_vector()?;
        let eigen = channel.recv(db_tag, commit_tag)?.into_vector()?;
        if eigen.len() != num_eigen + num_modal {
            return Err(FemError::serialization("eigen payload has the wrong length"));
        }

        match topology {
            Some(topology) => {
                self.resync_topology(topology)?;
                self.last_received_stamp = Some(stamp);
                debug!(stamp, "domain topology resynchronized");
            }
            None if self.last_received_stamp != Some(stamp) => {
                warn!(stamp, "stamp changed but no topology was sent");
                return Err(FemError::serialization("topology missing for new stamp"));
            }
            None => {}
        }

        if self.mesh.num_nodes() != num_nodes {
            return Err(FemError::serialization(format!(
                "sender has {num_nodes} nodes, receiver {}",
                self.mesh.num_nodes()
            )));
        }
        self.apply_state(&state)?;
        self.commit_tag = sent_commit_tag;
        self.eigenvalues = eigen[..num_eigen].to_vec();
        self.modal_participation = eigen[num_eigen..].to_vec();
        Ok(())
    }

    fn resync_topology(&mut self, topology: Topology) -> fem_types::Result<()> {
        let mut mesh = Mesh::new();
        for node in topology.nodes {
            mesh.add_node(node)?;
        }
        for element in topology.elements {
            mesh.add_element(element)?;
        }
        self.mesh = mesh;
        self.constraints = topology.constraints;
        self.domain_change();
        Ok(())
    }

    /// Restore times and node displacements, then bring element trial and
    /// committed state in line with them.
    fn apply_state(&mut self, state: &[f64]) -> fem_types::Result<()> {
        let tags = self.mesh.node_tags();
        let expected = 2 + tags
            .iter()
            .filter_map(|t| self.mesh.node(*t))
            .map(|n| 2 * n.ndf())
            .sum::<usize>();
        if state.len() != expected {
            return Err(FemError::DimensionMismatch {
                context: "domain state payload",
                expected,
                actual: state.len(),
            });
        }
        self.current_time = state[0];
        self.committed_time = state[1];

        let mut trial = Vec::with_capacity(tags.len());
        let mut offset = 2;
        for tag in &tags {
            let node = self.mesh.node_mut(*tag).ok_or(FemError::NodeNotFound(*tag))?;
            let ndf = node.ndf();
            let t = nalgebra::DVector::from_column_slice(&state[offset..offset + ndf]);
            let c = nalgebra::DVector::from_column_slice(&state[offset + ndf..offset + 2 * ndf]);
            node.set_committed_disp(&c)?;
            node.set_trial_disp(&c)?;
            trial.push(t);
            offset += 2 * ndf;
        }

        // Committed element state from committed displacements
        self.mesh.update()?;
        self.mesh.commit();

        for (tag, t) in tags.iter().zip(&trial) {
            if let Some(node) = self.mesh.node_mut(*tag) {
                node.set_trial_disp(t)?;
            }
        }
        self.mesh.update()
    }
}
