//! Benchmarks for equation numbering, assembly and one static step.
//!
//! Run with: cargo bench -p fem-analysis
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p fem-analysis -- --save-baseline main
//! 2. After changes: cargo bench -p fem-analysis -- --baseline main

#![allow(clippy::unwrap_used, clippy::expect_used)]

use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};
use fem_analysis::{AnalysisModel, ArcLength, DenseSystem, LoadControl, StaticAnalysis};
use fem_constraint::SingleFreedomConstraint;
use fem_domain::{CorotTruss, Domain, LoadPattern, NodalLoad, Node, TimeSeries};
use fem_types::{
    AnalysisConfig, ArcLengthConfig, ArcLengthStrategy, ConstraintTag, ElementTag,
    LoadControlConfig, LoadTag, NodeTag, Numberer, PatternTag,
};

const BAYS: [i32; 3] = [8, 32, 96];

// =============================================================================
// Test Model Generation
// =============================================================================

/// Simply supported plane truss with `bays` panels: bottom chord nodes
/// `1..=bays+1`, top chord nodes after them, one diagonal per panel and a
/// unit downward load on every top node.
fn pratt_truss(bays: i32) -> Domain {
    let mut domain = Domain::new();
    let top = |i: i32| NodeTag(bays + 2 + i);
    for i in 0..=bays {
        let x = f64::from(i);
        domain.add_node(Node::new(NodeTag(i + 1), &[x, 0.0], 2).unwrap()).unwrap();
        domain.add_node(Node::new(top(i), &[x, 1.0], 2).unwrap()).unwrap();
    }

    let mut tag = 0;
    let mut bar = |domain: &mut Domain, a: NodeTag, b: NodeTag| {
        tag += 1;
        domain
            .add_element(CorotTruss::new(ElementTag(tag), [a, b], 1.0, 1.0e4).unwrap())
            .unwrap();
    };
    for i in 0..=bays {
        bar(&mut domain, NodeTag(i + 1), top(i));
        if i < bays {
            bar(&mut domain, NodeTag(i + 1), NodeTag(i + 2));
            bar(&mut domain, top(i), top(i + 1));
            bar(&mut domain, NodeTag(i + 1), top(i + 1));
        }
    }

    for (i, (node, dof)) in [(NodeTag(1), 0), (NodeTag(1), 1), (NodeTag(bays + 1), 1)]
        .into_iter()
        .enumerate()
    {
        domain
            .add_sp(SingleFreedomConstraint::fixed(ConstraintTag(i as i32 + 1), node, dof))
            .unwrap();
    }

    domain
        .add_load_pattern(LoadPattern::new(PatternTag(1), TimeSeries::default()))
        .unwrap();
    for i in 0..=bays {
        domain
            .add_nodal_load(PatternTag(1), NodalLoad::new(LoadTag(i + 1), top(i), vec![0.0, -1.0]))
            .unwrap();
    }
    domain
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_numbering(c: &mut Criterion) {
    let mut group = c.benchmark_group("Numbering");
    for bays in BAYS {
        let domain = pratt_truss(bays);
        group.throughput(Throughput::Elements(domain.mesh().num_nodes() as u64));
        for numberer in [Numberer::Plain, Numberer::ReverseCuthillMcKee] {
            group.bench_with_input(
                BenchmarkId::new(format!("{numberer:?}"), bays),
                &domain,
                |b, domain| {
                    b.iter_batched(
                        || domain.clone(),
                        |mut domain| AnalysisModel::build(&mut domain, black_box(numberer)),
                        BatchSize::SmallInput,
                    );
                },
            );
        }
    }
    group.finish();
}

fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("Assembly");
    for bays in BAYS {
        let mut domain = pratt_truss(bays);
        let model = AnalysisModel::build(&mut domain, Numberer::ReverseCuthillMcKee).unwrap();
        let mut system = DenseSystem::new(model.num_eqn());
        group.throughput(Throughput::Elements(domain.mesh().num_elements() as u64));
        group.bench_function(BenchmarkId::new("tangent", bays), |b| {
            b.iter(|| model.form_tangent(black_box(&domain), &mut system));
        });
        group.bench_function(BenchmarkId::new("unbalance", bays), |b| {
            b.iter(|| model.unbalance(black_box(&domain)));
        });
    }
    group.finish();
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("Step");
    group.sample_size(20);
    let config = AnalysisConfig::default().with_numberer(Numberer::ReverseCuthillMcKee);
    for bays in BAYS {
        let domain = pratt_truss(bays);
        group.bench_with_input(BenchmarkId::new("load_control", bays), &domain, |b, domain| {
            b.iter_batched(
                || {
                    let integrator = LoadControl::new(LoadControlConfig::fixed(0.1)).unwrap();
                    let analysis = StaticAnalysis::new(config.clone(), integrator).unwrap();
                    (domain.clone(), analysis)
                },
                |(mut domain, mut analysis)| analysis.step(&mut domain).unwrap(),
                BatchSize::SmallInput,
            );
        });
        group.bench_with_input(BenchmarkId::new("arc_length", bays), &domain, |b, domain| {
            b.iter_batched(
                || {
                    let arc = ArcLengthConfig::new(0.05, ArcLengthStrategy::Cylindrical);
                    let analysis =
                        StaticAnalysis::new(config.clone(), ArcLength::new(arc).unwrap()).unwrap();
                    (domain.clone(), analysis)
                },
                |(mut domain, mut analysis)| analysis.step(&mut domain).unwrap(),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_numbering, bench_assembly, bench_step);
criterion_main!(benches);
