//! On/off structure of switching and expansion models under DCP.

mod common;

use gridopt_algo::program::Constraint;
use gridopt_algo::{build_ots, build_tnep, instantiate_model, Formulation, GenericModel, VarIndex};
use gridopt_core::{Branch, BranchArc};

/// Rows of branch `l` whose name carries `tag` (`on_off` or `ne`).
fn switched_rows<'a>(model: &'a GenericModel, tag: &str, l: usize) -> Vec<&'a Constraint> {
    let suffix = format!("[{l}]");
    model
        .program()
        .constraints()
        .iter()
        .filter(|c| c.name.contains(&format!("_{tag}")) && c.name.ends_with(&suffix))
        .collect()
}

fn worst(rows: &[&Constraint], values: &[f64]) -> f64 {
    rows.iter().map(|c| c.violation(values)).fold(0.0, f64::max)
}

/// Assignment for branch 1 (bus 1 to bus 2, k = 10) of the three-bus case.
fn ots_point(model: &GenericModel, delta: f64, p: f64, z: f64) -> Vec<f64> {
    let mut values = vec![0.0; model.program().num_variables()];
    values[model.var("va", VarIndex::Bus(2)).unwrap().0] = -delta;
    values[model.var("p", VarIndex::Arc(BranchArc::new(1, 1, 2))).unwrap().0] = p;
    values[model.var("p", VarIndex::Arc(BranchArc::new(1, 2, 1))).unwrap().0] = -p;
    values[model.var("z_branch", VarIndex::Branch(1)).unwrap().0] = z;
    values
}

#[test]
fn ots_switches_are_binary_and_gate_flow() {
    common::init_tracing();
    let model = instantiate_model(&common::three_bus(), Formulation::dcp(), build_ots).unwrap();
    for l in [1, 2] {
        let z = model.var("z_branch", VarIndex::Branch(l)).unwrap();
        assert!(model.program().variable(z).binary, "branch {l}");
    }

    let rows = switched_rows(&model, "on_off", 1);
    // ohms from (2), ohms to, angle difference (2), thermal (2)
    assert_eq!(rows.len(), 7, "{:?}", rows.iter().map(|c| &c.name).collect::<Vec<_>>());

    let on = ots_point(&model, 0.05, 0.5, 1.0);
    assert!(worst(&rows, &on) < 1e-9);
    let off_ohms = ots_point(&model, 0.05, 0.3, 1.0);
    assert!(worst(&rows, &off_ohms) > 0.1);

    let reference = model.reference();
    for delta in [reference.off_angmin, 0.0, reference.off_angmax] {
        let off = ots_point(&model, delta, 0.0, 0.0);
        assert!(worst(&rows, &off) < 1e-9, "delta {delta}");
    }
    // a wide angle is only admissible while the branch is open
    let wide = ots_point(&model, reference.off_angmax, 0.0, 1.0);
    assert!(worst(&rows, &wide) > 0.1);
    let leaking = ots_point(&model, 0.0, 0.3, 0.0);
    assert!(worst(&rows, &leaking) > 0.1);
}

fn expansion_case() -> gridopt_core::NetworkData {
    common::three_bus().with_ne_branch(Branch {
        index: 1,
        f_bus: 2,
        t_bus: 3,
        br_x: 0.1,
        rate_a: Some(1.0),
        construction_cost: Some(50.0),
        ..Branch::default()
    })
}

/// Assignment for candidate 1 (bus 2 to bus 3, k = 10).
fn ne_point(model: &GenericModel, delta: f64, p: f64, built: f64) -> Vec<f64> {
    let mut values = vec![0.0; model.program().num_variables()];
    values[model.var("va", VarIndex::Bus(3)).unwrap().0] = -delta;
    values[model.var("p_ne", VarIndex::NeArc(BranchArc::new(1, 2, 3))).unwrap().0] = p;
    values[model.var("p_ne", VarIndex::NeArc(BranchArc::new(1, 3, 2))).unwrap().0] = -p;
    values[model.var("built", VarIndex::NeBranch(1)).unwrap().0] = built;
    values
}

#[test]
fn tnep_candidates_are_binary_and_priced() {
    common::init_tracing();
    let model = instantiate_model(&expansion_case(), Formulation::dcp(), build_tnep).unwrap();
    let built = model.var("built", VarIndex::NeBranch(1)).unwrap();
    assert!(model.program().variable(built).binary);
    assert_eq!(model.program().objective().expr.linear.get(&built), Some(&50.0));
    // existing branches are always on
    assert!(model.var("z_branch", VarIndex::Branch(1)).is_err());

    let rows = switched_rows(&model, "ne", 1);
    assert_eq!(rows.len(), 7, "{:?}", rows.iter().map(|c| &c.name).collect::<Vec<_>>());

    assert!(worst(&rows, &ne_point(&model, 0.02, 0.2, 1.0)) < 1e-9);
    assert!(worst(&rows, &ne_point(&model, 0.02, 0.0, 1.0)) > 0.1);
    assert!(worst(&rows, &ne_point(&model, 0.5, 0.0, 0.0)) < 1e-9);
    assert!(worst(&rows, &ne_point(&model, 0.0, 0.2, 0.0)) > 0.1);
}

/// Two parallel lines into a 0.5 p.u. load; the second is rated 0.1, so
/// the load is only servable with that line open.
#[cfg(feature = "solver-highs")]
fn congested_pair() -> gridopt_core::NetworkData {
    use gridopt_core::{BusType, Gen, Load, NetworkData};

    NetworkData::new("pair")
        .with_bus(common::bus(1, BusType::Reference))
        .with_bus(common::bus(2, BusType::Pq))
        .with_gen(
            Gen {
                index: 1,
                gen_bus: 1,
                pmax: 2.0,
                ..Gen::default()
            }
            .with_polynomial_cost(&[0.0, 2000.0, 0.0]),
        )
        .with_branch(common::branch(1, 1, 2, 1.0))
        .with_branch(common::branch(2, 1, 2, 0.1))
        .with_load(Load {
            index: 1,
            load_bus: 2,
            pd: 0.5,
            ..Load::default()
        })
}

#[cfg(feature = "solver-highs")]
#[test]
fn ots_opens_the_congested_line() {
    use gridopt_algo::{build_opf, run_model, GoodLpOracle, Settings};

    common::init_tracing();
    let data = congested_pair();
    let settings = Settings::default();
    let oracle = GoodLpOracle::new();

    let fixed = run_model(&data, Formulation::dcp(), build_opf, &oracle, &settings).unwrap();
    assert!(!fixed.is_success(), "status {}", fixed.status);

    let result = run_model(&data, Formulation::dcp(), build_ots, &oracle, &settings).unwrap();
    assert!(result.is_success(), "status {}", result.status);
    assert!((result.objective - 1000.0).abs() < 1e-4);
    let status = |id: &str| result.solution.get("branch", id, "br_status").unwrap();
    assert!((status("1") - 1.0).abs() < 1e-6);
    assert!(status("2").abs() < 1e-6);
}
