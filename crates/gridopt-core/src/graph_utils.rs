//! Island analysis over the active AC topology.

use std::collections::BTreeSet;

use petgraph::algo::connected_components;
use petgraph::graphmap::UnGraphMap;
use petgraph::visit::Bfs;
use tracing::warn;

use crate::reference::ReferenceModel;

/// One connected component of active buses joined by active branches.
#[derive(Debug, Clone, PartialEq)]
pub struct Island {
    pub island_id: usize,
    pub buses: BTreeSet<usize>,
    pub ref_buses: Vec<usize>,
}

fn topology(reference: &ReferenceModel) -> UnGraphMap<usize, usize> {
    let mut graph = UnGraphMap::new();
    for bus in reference.bus.keys() {
        graph.add_node(*bus);
    }
    for (l, branch) in &reference.branch {
        graph.add_edge(branch.f_bus, branch.t_bus, *l);
    }
    graph
}

/// Number of connected components in the active topology.
pub fn island_count(reference: &ReferenceModel) -> usize {
    connected_components(&topology(reference))
}

/// Labels connected components (breadth-first search), ordered by their
/// smallest bus index.
pub fn islands(reference: &ReferenceModel) -> Vec<Island> {
    let graph = topology(reference);
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for start in reference.bus.keys() {
        if seen.contains(start) {
            continue;
        }
        let mut buses = BTreeSet::new();
        let mut bfs = Bfs::new(&graph, *start);
        while let Some(node) = bfs.next(&graph) {
            buses.insert(node);
        }
        seen.extend(buses.iter().copied());
        let ref_buses = reference
            .ref_buses
            .iter()
            .copied()
            .filter(|b| buses.contains(b))
            .collect();
        out.push(Island {
            island_id: out.len(),
            buses,
            ref_buses,
        });
    }
    out
}

/// Warn about islands without exactly one reference bus.
pub fn check_reference_buses(reference: &ReferenceModel) {
    for island in islands(reference) {
        match island.ref_buses.len() {
            1 => {}
            0 => warn!(
                island = island.island_id,
                buses = island.buses.len(),
                "island has no reference bus; its angles are unanchored"
            ),
            n => warn!(
                island = island.island_id,
                ref_buses = n,
                "island has more than one reference bus"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Branch, Bus, BusType, NetworkData};
    use crate::reference::build_ref;

    fn bus(index: usize, bus_type: BusType) -> Bus {
        Bus {
            index,
            bus_type,
            ..Bus::default()
        }
    }

    #[test]
    fn test_two_islands() {
        let data = NetworkData::new("split")
            .with_bus(bus(1, BusType::Reference))
            .with_bus(bus(2, BusType::Pq))
            .with_bus(bus(3, BusType::Reference))
            .with_bus(bus(4, BusType::Pq))
            .with_branch(Branch {
                index: 1,
                f_bus: 1,
                t_bus: 2,
                ..Branch::default()
            })
            .with_branch(Branch {
                index: 2,
                f_bus: 3,
                t_bus: 4,
                ..Branch::default()
            });
        let reference = build_ref(&data).unwrap();
        let found = islands(&reference);
        assert_eq!(found.len(), 2);
        assert_eq!(island_count(&reference), 2);
        assert_eq!(found[0].ref_buses, vec![1]);
        assert_eq!(found[1].buses, BTreeSet::from([3, 4]));
    }

    #[test]
    fn test_isolated_bus_is_its_own_island() {
        let data = NetworkData::new("lonely")
            .with_bus(bus(1, BusType::Reference))
            .with_bus(bus(2, BusType::Pq));
        let reference = build_ref(&data).unwrap();
        let found = islands(&reference);
        assert_eq!(found.len(), 2);
        assert!(found[1].ref_buses.is_empty());
    }
}
