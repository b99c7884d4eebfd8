//! Model builders shared by the integration tests.

use fem_constraint::SingleFreedomConstraint;
use fem_domain::{CorotTruss, Domain, LoadPattern, NodalLoad, Node, TimeSeries, Truss};
use fem_types::{ConstraintTag, ElementTag, LoadTag, NodeTag, PatternTag};

/// Fix every listed `(node, dof)` with consecutive constraint tags starting
/// at `first_tag`.
pub fn fix(domain: &mut Domain, first_tag: i32, dofs: &[(i32, usize)]) {
    for (i, &(node, dof)) in dofs.iter().enumerate() {
        domain
            .add_sp(SingleFreedomConstraint::fixed(
                ConstraintTag(first_tag + i as i32),
                NodeTag(node),
                dof,
            ))
            .unwrap();
    }
}

/// Add pattern 1 (linear series) with one nodal load.
pub fn load(domain: &mut Domain, node: i32, values: Vec<f64>) {
    domain
        .add_load_pattern(LoadPattern::new(PatternTag(1), TimeSeries::default()))
        .unwrap();
    domain
        .add_nodal_load(PatternTag(1), NodalLoad::new(LoadTag(1), NodeTag(node), values))
        .unwrap();
}

/// Horizontal 2D bar from node 1 at the origin to node 2 at `(2, 0)`,
/// axial stiffness `EA/L = 4`. Node 1 fully fixed, node 2 on a roller.
pub fn fixed_end_bar(axial_load: f64) -> Domain {
    let mut domain = Domain::new();
    domain.add_node(Node::new(NodeTag(1), &[0.0, 0.0], 2).unwrap()).unwrap();
    domain.add_node(Node::new(NodeTag(2), &[2.0, 0.0], 2).unwrap()).unwrap();
    domain
        .add_element(Truss::new(ElementTag(1), [NodeTag(1), NodeTag(2)], 1.0, 8.0).unwrap())
        .unwrap();
    fix(&mut domain, 1, &[(1, 0), (1, 1), (2, 1)]);
    load(&mut domain, 2, vec![axial_load, 0.0]);
    domain
}

/// Shallow two-bar (von Mises) truss: supports at `(0, 0)` and `(2, 0)`,
/// apex node 2 at `(1, rise)` pushed down by a unit reference load. The
/// apex moves vertically only.
pub fn von_mises_truss(rise: f64, axial_rigidity: f64) -> Domain {
    let mut domain = Domain::new();
    domain.add_node(Node::new(NodeTag(1), &[0.0, 0.0], 2).unwrap()).unwrap();
    domain.add_node(Node::new(NodeTag(2), &[1.0, rise], 2).unwrap()).unwrap();
    domain.add_node(Node::new(NodeTag(3), &[2.0, 0.0], 2).unwrap()).unwrap();
    for (tag, nodes) in [(1, [1, 2]), (2, [2, 3])] {
        domain
            .add_element(
                CorotTruss::new(
                    ElementTag(tag),
                    [NodeTag(nodes[0]), NodeTag(nodes[1])],
                    1.0,
                    axial_rigidity,
                )
                .unwrap(),
            )
            .unwrap();
    }
    fix(&mut domain, 1, &[(1, 0), (1, 1), (3, 0), (3, 1), (2, 0)]);
    load(&mut domain, 2, vec![0.0, -1.0]);
    domain
}

/// Vertical load equilibrating the von Mises truss at apex deflection `w`
/// (positive downwards).
pub fn von_mises_load(rise: f64, axial_rigidity: f64, w: f64) -> f64 {
    let l0 = (1.0 + rise * rise).sqrt();
    let height = rise - w;
    let l = (1.0 + height * height).sqrt();
    let force = axial_rigidity * (l - l0) / l0;
    -2.0 * force * height / l
}
