//! Template dispatch through the builder registry, including formulations
//! registered at runtime.

mod common;

use std::sync::Arc;

use gridopt_algo::forms::names;
use gridopt_algo::model::Extension;
use gridopt_algo::program::{Expr, Sense};
use gridopt_algo::{
    build_opf, build_ots, instantiate_model, templates, BuilderRegistry, DispatchKey, Entry,
    Family, Formulation, GenericModel, Target, VarIndex,
};
use gridopt_core::{build_ref, GridError};

#[test]
fn dc_reactive_templates_are_recorded_noops() {
    let data = common::three_bus();
    let model = instantiate_model(&data, Formulation::dcp(), build_opf).unwrap();
    let reactive = model
        .applied()
        .iter()
        .find(|e| e.name == names::REACTIVE_GENERATION)
        .unwrap();
    assert_eq!(reactive.extension, Extension::Variable);
    assert!(reactive.noop.is_some());
    assert!(!model.has_var_group("qg"));
    assert!(model.has_var_group("pg"));
}

#[test]
fn same_problem_differs_by_formulation() {
    let data = common::three_bus();
    let dc = instantiate_model(&data, Formulation::dcp(), build_opf).unwrap();
    let nfa = instantiate_model(&data, Formulation::nfa(), build_opf).unwrap();
    let soc = instantiate_model(&data, Formulation::socwr(), build_opf).unwrap();

    assert!(dc.has_var_group("va"));
    assert!(!nfa.has_var_group("va"));
    assert!(soc.has_var_group("w") && soc.has_var_group("wr"));
    assert!(nfa.program().num_constraints() < dc.program().num_constraints());
}

#[test]
fn unsupported_template_names_formulation() {
    let data = common::three_bus();
    let err = instantiate_model(&data, Formulation::socwr(), build_ots).unwrap_err();
    match err {
        GridError::UnsupportedFormulation { formulation, .. } => assert_eq!(formulation, "SOCWR"),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn runtime_formulation_overrides_by_tag_and_inherits_family() {
    let data = common::three_bus();
    let mut registry = BuilderRegistry::with_defaults();
    registry.register_tag(
        Extension::Constraint,
        names::OHMS_YT_FROM,
        "DCX",
        Entry::build(|model: &mut GenericModel, target: Target| {
            let Target::Branch(l) = target else {
                return Ok(());
            };
            let (arc, _) = model
                .reference()
                .branch_arcs(l)
                .ok_or_else(|| GridError::data("branch", l, "no arcs"))?;
            let p = model.var("p", VarIndex::Arc(arc))?;
            model.add_row(format!("flow_cap[{l}]"), Expr::var(p), Sense::LessEqual, 0.8);
            Ok(())
        }),
    );
    registry.register_tag(
        Extension::Constraint,
        "pair_spread",
        "DCX",
        Entry::build(|model: &mut GenericModel, target: Target| {
            let Target::BusPair((i, j)) = target else {
                return Ok(());
            };
            let vi = model.var("va", VarIndex::Bus(i))?;
            let vj = model.var("va", VarIndex::Bus(j))?;
            model.add_row(
                format!("pair_spread[{i},{j}]"),
                Expr::var(vi).with_term(-1.0, vj),
                Sense::LessEqual,
                0.1,
            );
            Ok(())
        }),
    );

    let reference = Arc::new(build_ref(&data).unwrap());
    let formulation = Formulation::new("DCX", Family::Dc);
    let mut model = GenericModel::new(reference, formulation, Arc::new(registry));
    build_opf(&mut model).unwrap();
    templates::constraint_buspair(&mut model, "pair_spread", (1, 2)).unwrap();

    let matched = |name: &str| {
        model
            .applied()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.matched.clone())
            .unwrap()
    };
    assert_eq!(matched(names::OHMS_YT_FROM), DispatchKey::Tag("DCX".into()));
    assert_eq!(matched(names::OHMS_YT_TO), DispatchKey::Family(Family::Dc));
    assert_eq!(matched("pair_spread"), DispatchKey::Tag("DCX".into()));

    let rows: Vec<&str> = model
        .program()
        .constraints()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert!(rows.contains(&"flow_cap[1]"));
    assert!(rows.contains(&"flow_cap[2]"));
    assert!(rows.contains(&"pair_spread[1,2]"));

    // the stock formulation is unaffected
    let stock = instantiate_model(&data, Formulation::dcp(), build_opf).unwrap();
    assert!(stock
        .program()
        .constraints()
        .iter()
        .all(|c| !c.name.starts_with("flow_cap")));
}

#[test]
fn missing_custom_name_is_unsupported() {
    let data = common::three_bus();
    let mut model = GenericModel::from_data(&data, Formulation::dcp()).unwrap();
    templates::variable_voltage(&mut model).unwrap();
    let err = templates::constraint_buspair(&mut model, "pair_spread", (1, 2)).unwrap_err();
    assert!(matches!(err, GridError::UnsupportedFormulation { .. }));
}
