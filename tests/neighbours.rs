use proptest::prelude::*;
use std::collections::BTreeSet;
use tissue_common::Vec2;
use tissue_engine::grid::{create_ordered_pair, BoxCollection};
use tissue_engine::mesh::{NodesOnlyMesh, SpatialRepresentation};
use tissue_engine::parallel::{Communicator, ThreadedWorld};

fn brute_force_pairs(points: &[(usize, Vec2)], cutoff: f64) -> BTreeSet<(usize, usize)> {
    let mut pairs = BTreeSet::new();
    for (i, (a, pa)) in points.iter().enumerate() {
        for (b, pb) in &points[i + 1..] {
            if pa.distance(pb) <= cutoff {
                pairs.insert(create_ordered_pair(*a, *b));
            }
        }
    }
    pairs
}

fn points_strategy() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((0.0..10.0f64, 0.0..10.0f64), 0..60)
}

proptest! {
    #[test]
    fn candidate_pairs_never_miss_a_close_pair(raw in points_strategy(), cutoff in 0.3..3.0f64) {
        let points: Vec<(usize, Vec2)> = raw.iter().enumerate().map(|(i, &(x, y))| (i, Vec2::new([x, y]))).collect();
        let mut boxes = BoxCollection::new(cutoff, [0.0, 0.0], [10.0, 10.0]).unwrap();
        boxes.rebuild(&points).unwrap();

        let candidates: BTreeSet<(usize, usize)> = boxes.candidate_pairs().pairs.into_iter().collect();
        for pair in brute_force_pairs(&points, cutoff) {
            prop_assert!(candidates.contains(&pair), "missing pair {:?}", pair);
        }
    }

    #[test]
    fn mesh_neighbours_match_brute_force(raw in points_strategy(), cutoff in 0.3..3.0f64) {
        let locations: Vec<Vec2> = raw.iter().map(|&(x, y)| Vec2::new([x, y])).collect();
        let mesh = NodesOnlyMesh::from_points(&locations, cutoff, 1.0).unwrap();
        let points = mesh.node_positions();

        let expected = brute_force_pairs(&points, cutoff);
        let pairs: BTreeSet<(usize, usize)> = mesh.calculate_node_pairs().pairs.into_iter().collect();
        prop_assert_eq!(&pairs, &expected);

        for (index, _) in &points {
            let neighbours = mesh.neighbouring_locations(*index).unwrap();
            for other in neighbours {
                prop_assert!(expected.contains(&create_ordered_pair(*index, other)));
            }
        }
    }
}

#[test]
fn halo_nodes_complete_the_pairs_across_ranks() {
    let locations: Vec<Vec2> = (0..80).map(|i| Vec2::new([(i % 8) as f64 * 0.9, (i / 8) as f64 * 0.9 + 0.05 * (i % 3) as f64])).collect();
    let cutoff = 1.0;

    let per_rank = ThreadedWorld::run(3, |comm| {
        let mut mesh = NodesOnlyMesh::construct_from_nodes(&locations, cutoff, 1.0, comm.rank(), comm.size()).unwrap();
        mesh.update_halo_nodes(&comm).unwrap();
        let pairs: Vec<(usize, usize)> = mesh.calculate_node_pairs().pairs;
        (mesh.node_positions(), pairs)
    });

    let mut all_points = Vec::new();
    let mut found = BTreeSet::new();
    for (points, pairs) in per_rank {
        all_points.extend(points);
        found.extend(pairs);
    }
    assert_eq!(all_points.len(), locations.len());
    assert_eq!(found, brute_force_pairs(&all_points, cutoff));
}
