//! Reference-model builder.
//!
//! [`build_ref`] turns a [`NetworkData`] dictionary into a [`ReferenceModel`]:
//! active components re-keyed by numeric index, directed arc lists, bus
//! adjacency maps and bus-pair aggregates. Problem specifications and
//! formulation builders only ever read the reference model; nothing here
//! writes back to the dictionary.
//!
//! ## Activity rules
//!
//! | Component        | Active when                                        |
//! |------------------|----------------------------------------------------|
//! | bus              | `bus_type != 4`                                    |
//! | gen/load/shunt   | status set and owning bus active                   |
//! | branch/dcline    | status set and both endpoints active               |
//! | ne_branch        | both endpoints active (status is the build choice) |
//!
//! ## Arcs
//!
//! Every active branch `l = (i, j)` yields `(l, i, j)` in `arcs_from` and
//! `(l, j, i)` in `arcs_to`; `arcs` is their concatenation and `bus_arcs`
//! groups all of them by their first bus.
//!
//! ## Bus pairs
//!
//! Parallel branches are merged per unordered pair `(lo, hi)` with
//! `lo < hi`. The pair's angle interval bounds `va[lo] - va[hi]`; branches
//! oriented `hi -> lo` contribute their interval negated.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::data::{Branch, Bus, BusType, DcLine, Gen, Load, NetworkData, Shunt, DEFAULT_ANGLE_DIFF};
use crate::error::{GridError, GridResult};
use crate::graph_utils;

/// Directed `(branch, from_bus, to_bus)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BranchArc {
    pub branch: usize,
    pub from: usize,
    pub to: usize,
}

impl BranchArc {
    pub fn new(branch: usize, from: usize, to: usize) -> Self {
        Self { branch, from, to }
    }

    /// The same branch seen from the other end.
    pub fn reversed(&self) -> Self {
        Self {
            branch: self.branch,
            from: self.to,
            to: self.from,
        }
    }
}

/// Unordered bus pair, stored as `(lo, hi)`.
pub type BusPairKey = (usize, usize);

/// Canonical key for a pair of buses.
pub fn pair_key(i: usize, j: usize) -> BusPairKey {
    if i <= j {
        (i, j)
    } else {
        (j, i)
    }
}

/// Aggregate over all parallel branches joining one bus pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusPair {
    pub key: BusPairKey,
    /// Member branch indices, ascending.
    pub branches: Vec<usize>,
    /// Tightest bounds on `va[lo] - va[hi]`.
    pub angmin: f64,
    pub angmax: f64,
    /// Sum of member ratings; `None` if any member is unlimited.
    pub rate_a: Option<f64>,
    pub vm_fr_min: f64,
    pub vm_fr_max: f64,
    pub vm_to_min: f64,
    pub vm_to_max: f64,
}

/// Directed arcs plus their bus adjacency for one branch-like class.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArcSet {
    pub from: Vec<BranchArc>,
    pub to: Vec<BranchArc>,
    pub all: Vec<BranchArc>,
    /// Every active bus has an entry, possibly empty.
    pub bus_arcs: BTreeMap<usize, Vec<BranchArc>>,
}

impl ArcSet {
    fn build(
        endpoints: impl Iterator<Item = (usize, usize, usize)>,
        active_buses: &BTreeMap<usize, Bus>,
    ) -> Self {
        let mut set = ArcSet {
            bus_arcs: active_buses.keys().map(|i| (*i, Vec::new())).collect(),
            ..ArcSet::default()
        };
        for (l, f, t) in endpoints {
            set.from.push(BranchArc::new(l, f, t));
            set.to.push(BranchArc::new(l, t, f));
        }
        set.all = set.from.iter().chain(set.to.iter()).copied().collect();
        for arc in &set.all {
            set.bus_arcs.entry(arc.from).or_default().push(*arc);
        }
        set
    }
}

/// String ids of the records behind each numeric index, for writing
/// solutions back in dictionary shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentKeys {
    pub bus: BTreeMap<usize, String>,
    pub gen: BTreeMap<usize, String>,
    pub branch: BTreeMap<usize, String>,
    pub load: BTreeMap<usize, String>,
    pub shunt: BTreeMap<usize, String>,
    pub dcline: BTreeMap<usize, String>,
    pub ne_branch: BTreeMap<usize, String>,
}

/// Network-expansion candidates, kept apart from the base topology.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpansionRef {
    pub branch: BTreeMap<usize, Branch>,
    pub arcs: ArcSet,
    pub buspairs: BTreeMap<BusPairKey, BusPair>,
}

/// Filtered, cross-indexed view of a [`NetworkData`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceModel {
    pub name: String,
    pub base_mva: f64,
    pub bus: BTreeMap<usize, Bus>,
    pub gen: BTreeMap<usize, Gen>,
    pub load: BTreeMap<usize, Load>,
    pub shunt: BTreeMap<usize, Shunt>,
    pub branch: BTreeMap<usize, Branch>,
    pub dcline: BTreeMap<usize, DcLine>,
    pub keys: ComponentKeys,
    pub ref_buses: Vec<usize>,
    pub arcs_from: Vec<BranchArc>,
    pub arcs_to: Vec<BranchArc>,
    pub arcs: Vec<BranchArc>,
    pub bus_arcs: BTreeMap<usize, Vec<BranchArc>>,
    pub arcs_from_dc: Vec<BranchArc>,
    pub arcs_to_dc: Vec<BranchArc>,
    pub arcs_dc: Vec<BranchArc>,
    pub bus_arcs_dc: BTreeMap<usize, Vec<BranchArc>>,
    pub bus_gens: BTreeMap<usize, Vec<usize>>,
    pub bus_loads: BTreeMap<usize, Vec<usize>>,
    pub bus_shunts: BTreeMap<usize, Vec<usize>>,
    pub buspairs: BTreeMap<BusPairKey, BusPair>,
    /// Loosest angle-difference bounds between any two buses, used when a
    /// switched-off branch decouples its endpoints.
    pub off_angmin: f64,
    pub off_angmax: f64,
    pub ne: Option<ExpansionRef>,
}

impl ReferenceModel {
    pub fn bus_count(&self) -> usize {
        self.bus.len()
    }

    pub fn branch_count(&self) -> usize {
        self.branch.len()
    }

    /// The two arcs of an active branch, `(from, to)`.
    pub fn branch_arcs(&self, branch: usize) -> Option<(BranchArc, BranchArc)> {
        let b = self.branch.get(&branch)?;
        let fwd = BranchArc::new(branch, b.f_bus, b.t_bus);
        Some((fwd, fwd.reversed()))
    }
}

fn index_components<T: Clone>(
    class: &str,
    records: &BTreeMap<String, T>,
    index_of: impl Fn(&T) -> usize,
    keys: &mut BTreeMap<usize, String>,
) -> GridResult<BTreeMap<usize, T>> {
    let mut out = BTreeMap::new();
    for (id, record) in records {
        let index = index_of(record);
        if let Some(previous) = keys.insert(index, id.clone()) {
            return Err(GridError::data(
                class,
                id,
                format!("index {index} already used by '{previous}'"),
            ));
        }
        out.insert(index, record.clone());
    }
    Ok(out)
}

fn require_bus(
    all_buses: &BTreeSet<usize>,
    class: &str,
    id: usize,
    role: &str,
    bus: usize,
) -> GridResult<()> {
    if all_buses.contains(&bus) {
        Ok(())
    } else {
        Err(GridError::data(
            class,
            id,
            format!("{role} {bus} is not in the bus table"),
        ))
    }
}

/// Clamp angle bounds into the trigonometric relaxation window.
fn sanitize_angles(class: &str, mut branch: Branch) -> GridResult<Branch> {
    let half_pi = std::f64::consts::FRAC_PI_2;
    if branch.angmin <= -half_pi {
        warn!(
            class,
            branch = branch.index,
            angmin = branch.angmin,
            "angmin at or below -pi/2, using -pi/3"
        );
        branch.angmin = -DEFAULT_ANGLE_DIFF;
    }
    if branch.angmax >= half_pi {
        warn!(
            class,
            branch = branch.index,
            angmax = branch.angmax,
            "angmax at or above pi/2, using pi/3"
        );
        branch.angmax = DEFAULT_ANGLE_DIFF;
    }
    if branch.angmin > branch.angmax {
        return Err(GridError::data(
            class,
            branch.index,
            format!(
                "angmin {} exceeds angmax {}",
                branch.angmin, branch.angmax
            ),
        ));
    }
    Ok(branch)
}

/// Merge parallel branches into bus-pair aggregates.
pub fn buspair_parameters(
    class: &str,
    branches: &BTreeMap<usize, Branch>,
    buses: &BTreeMap<usize, Bus>,
) -> GridResult<BTreeMap<BusPairKey, BusPair>> {
    let mut pairs: BTreeMap<BusPairKey, BusPair> = BTreeMap::new();
    for (l, branch) in branches {
        let key = pair_key(branch.f_bus, branch.t_bus);
        let (lo, hi) = if branch.f_bus <= branch.t_bus {
            (branch.angmin, branch.angmax)
        } else {
            (-branch.angmax, -branch.angmin)
        };
        let (Some(bus_lo), Some(bus_hi)) = (buses.get(&key.0), buses.get(&key.1)) else {
            return Err(GridError::data(class, l, "endpoint bus is not active"));
        };
        let entry = pairs.entry(key).or_insert_with(|| BusPair {
            key,
            branches: Vec::new(),
            angmin: f64::NEG_INFINITY,
            angmax: f64::INFINITY,
            rate_a: Some(0.0),
            vm_fr_min: bus_lo.vmin,
            vm_fr_max: bus_lo.vmax,
            vm_to_min: bus_hi.vmin,
            vm_to_max: bus_hi.vmax,
        });
        entry.branches.push(*l);
        entry.angmin = entry.angmin.max(lo);
        entry.angmax = entry.angmax.min(hi);
        entry.rate_a = match (entry.rate_a, branch.rate_a) {
            (Some(total), Some(rate)) => Some(total + rate),
            _ => None,
        };
    }
    for pair in pairs.values() {
        if pair.angmin > pair.angmax {
            return Err(GridError::data(
                class,
                pair.branches.first().copied().unwrap_or_default(),
                format!(
                    "parallel branches between buses {} and {} have disjoint angle limits",
                    pair.key.0, pair.key.1
                ),
            ));
        }
    }
    Ok(pairs)
}

/// Loosest angle-difference range between any two buses: the sum of the
/// `bus_count - 1` most extreme branch limits in each direction.
pub fn calc_theta_delta_bounds(
    branches: &BTreeMap<usize, Branch>,
    bus_count: usize,
) -> (f64, f64) {
    let mut mins: Vec<f64> = branches.values().map(|b| b.angmin).collect();
    let mut maxs: Vec<f64> = branches.values().map(|b| b.angmax).collect();
    mins.sort_by(f64::total_cmp);
    maxs.sort_by(|a, b| b.total_cmp(a));
    let take = bus_count.saturating_sub(1);
    let off_min: f64 = mins.iter().take(take).sum();
    let off_max: f64 = maxs.iter().take(take).sum();
    (off_min, off_max)
}

/// Build the reference model for `data`.
///
/// Pure: `data` is only read, and two calls on equal input produce equal
/// output.
pub fn build_ref(data: &NetworkData) -> GridResult<ReferenceModel> {
    let mut keys = ComponentKeys::default();

    let all_bus = index_components("bus", &data.bus, |b| b.index, &mut keys.bus)?;
    let all_bus_ids: BTreeSet<usize> = all_bus.keys().copied().collect();
    let bus: BTreeMap<usize, Bus> = all_bus
        .into_iter()
        .filter(|(_, b)| b.bus_type != BusType::Inactive)
        .collect();
    keys.bus.retain(|i, _| bus.contains_key(i));

    let mut gen = BTreeMap::new();
    for (i, g) in index_components("gen", &data.gen, |g| g.index, &mut keys.gen)? {
        require_bus(&all_bus_ids, "gen", i, "gen_bus", g.gen_bus)?;
        if g.is_active() && bus.contains_key(&g.gen_bus) {
            gen.insert(i, g);
        }
    }
    keys.gen.retain(|i, _| gen.contains_key(i));

    let mut load = BTreeMap::new();
    for (i, d) in index_components("load", &data.load, |d| d.index, &mut keys.load)? {
        require_bus(&all_bus_ids, "load", i, "load_bus", d.load_bus)?;
        if d.status != 0 && bus.contains_key(&d.load_bus) {
            load.insert(i, d);
        }
    }
    keys.load.retain(|i, _| load.contains_key(i));

    let mut shunt = BTreeMap::new();
    for (i, s) in index_components("shunt", &data.shunt, |s| s.index, &mut keys.shunt)? {
        require_bus(&all_bus_ids, "shunt", i, "shunt_bus", s.shunt_bus)?;
        if s.status != 0 && bus.contains_key(&s.shunt_bus) {
            shunt.insert(i, s);
        }
    }
    keys.shunt.retain(|i, _| shunt.contains_key(i));

    let mut branch = BTreeMap::new();
    for (i, br) in index_components("branch", &data.branch, |b| b.index, &mut keys.branch)? {
        require_bus(&all_bus_ids, "branch", i, "f_bus", br.f_bus)?;
        require_bus(&all_bus_ids, "branch", i, "t_bus", br.t_bus)?;
        if br.f_bus == br.t_bus {
            return Err(GridError::data("branch", i, "f_bus equals t_bus"));
        }
        if br.is_active() && bus.contains_key(&br.f_bus) && bus.contains_key(&br.t_bus) {
            branch.insert(i, sanitize_angles("branch", br)?);
        }
    }
    keys.branch.retain(|i, _| branch.contains_key(i));

    let mut dcline = BTreeMap::new();
    for (i, dc) in index_components("dcline", &data.dcline, |d| d.index, &mut keys.dcline)? {
        require_bus(&all_bus_ids, "dcline", i, "f_bus", dc.f_bus)?;
        require_bus(&all_bus_ids, "dcline", i, "t_bus", dc.t_bus)?;
        if dc.is_active() && bus.contains_key(&dc.f_bus) && bus.contains_key(&dc.t_bus) {
            dcline.insert(i, dc);
        }
    }
    keys.dcline.retain(|i, _| dcline.contains_key(i));

    let ref_buses: Vec<usize> = bus
        .iter()
        .filter(|(_, b)| b.bus_type == BusType::Reference)
        .map(|(i, _)| *i)
        .collect();
    if ref_buses.is_empty() {
        return Err(GridError::data(
            "network",
            &data.name,
            "no active reference bus (bus_type 3)",
        ));
    }

    let arcs = ArcSet::build(branch.values().map(|b| (b.index, b.f_bus, b.t_bus)), &bus);
    let arcs_dc = ArcSet::build(dcline.values().map(|d| (d.index, d.f_bus, d.t_bus)), &bus);

    let mut bus_gens: BTreeMap<usize, Vec<usize>> = bus.keys().map(|i| (*i, Vec::new())).collect();
    for (i, g) in &gen {
        bus_gens.entry(g.gen_bus).or_default().push(*i);
    }
    let mut bus_loads: BTreeMap<usize, Vec<usize>> = bus.keys().map(|i| (*i, Vec::new())).collect();
    for (i, d) in &load {
        bus_loads.entry(d.load_bus).or_default().push(*i);
    }
    let mut bus_shunts: BTreeMap<usize, Vec<usize>> = bus.keys().map(|i| (*i, Vec::new())).collect();
    for (i, s) in &shunt {
        bus_shunts.entry(s.shunt_bus).or_default().push(*i);
    }

    let buspairs = buspair_parameters("branch", &branch, &bus)?;
    let (off_angmin, off_angmax) = calc_theta_delta_bounds(&branch, bus.len());

    let ne = match &data.ne_branch {
        Some(records) => Some(build_expansion(records, &all_bus_ids, &bus, &mut keys)?),
        None => None,
    };

    let reference = ReferenceModel {
        name: data.name.clone(),
        base_mva: data.base_mva,
        bus,
        gen,
        load,
        shunt,
        branch,
        dcline,
        keys,
        ref_buses,
        arcs_from: arcs.from,
        arcs_to: arcs.to,
        arcs: arcs.all,
        bus_arcs: arcs.bus_arcs,
        arcs_from_dc: arcs_dc.from,
        arcs_to_dc: arcs_dc.to,
        arcs_dc: arcs_dc.all,
        bus_arcs_dc: arcs_dc.bus_arcs,
        bus_gens,
        bus_loads,
        bus_shunts,
        buspairs,
        off_angmin,
        off_angmax,
        ne,
    };

    graph_utils::check_reference_buses(&reference);
    debug!(
        name = %reference.name,
        buses = reference.bus.len(),
        branches = reference.branch.len(),
        arcs = reference.arcs.len(),
        buspairs = reference.buspairs.len(),
        "built reference model"
    );
    Ok(reference)
}

fn build_expansion(
    records: &BTreeMap<String, Branch>,
    all_bus_ids: &BTreeSet<usize>,
    bus: &BTreeMap<usize, Bus>,
    keys: &mut ComponentKeys,
) -> GridResult<ExpansionRef> {
    let mut branch = BTreeMap::new();
    for (i, br) in index_components("ne_branch", records, |b| b.index, &mut keys.ne_branch)? {
        require_bus(all_bus_ids, "ne_branch", i, "f_bus", br.f_bus)?;
        require_bus(all_bus_ids, "ne_branch", i, "t_bus", br.t_bus)?;
        if bus.contains_key(&br.f_bus) && bus.contains_key(&br.t_bus) {
            branch.insert(i, sanitize_angles("ne_branch", br)?);
        }
    }
    keys.ne_branch.retain(|i, _| branch.contains_key(i));
    let arcs = ArcSet::build(branch.values().map(|b| (b.index, b.f_bus, b.t_bus)), bus);
    let buspairs = buspair_parameters("ne_branch", &branch, bus)?;
    Ok(ExpansionRef {
        branch,
        arcs,
        buspairs,
    })
}
