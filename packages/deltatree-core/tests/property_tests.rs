use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use deltatree_core::{Delta, DeltaKind, Mirror, NodeId, VersionedItem};

const TREE: &[(u64, Option<u64>)] = &[
    (0, None),
    (1, Some(0)),
    (2, Some(1)),
    (3, Some(1)),
    (4, Some(2)),
    (5, Some(0)),
    (6, Some(4)),
];

fn arb_delta() -> impl Strategy<Value = Delta> {
    (0u8..4, 1u64..=5, 0u64..=5, 1u64..=10).prop_map(|(kind, id, parent, version)| {
        let (id, parent) = (NodeId(id), NodeId(parent));
        match kind {
            0 => Delta::create(id, Some(parent), version),
            1 => Delta::move_to(id, parent, version),
            2 => Delta::delete(id, version),
            _ => Delta::full(id, Some(parent), version).with_attribute("v", version.to_string()),
        }
    })
}

fn arb_snapshot() -> impl Strategy<Value = Vec<VersionedItem>> {
    prop::collection::vec((any::<bool>(), 0u64..=5, 1u64..=10), 5).prop_map(|slots| {
        std::iter::once(VersionedItem::new(NodeId(0), None, 1))
            .chain(
                slots
                    .into_iter()
                    .zip(1u64..)
                    .filter(|((present, _, _), _)| *present)
                    .map(|((_, parent, version), id)| {
                        VersionedItem::new(NodeId(id), Some(NodeId(parent)), version)
                    }),
            )
            .collect()
    })
}

#[derive(Clone, Debug)]
enum Step {
    Delta(Delta),
    Snapshot(Vec<VersionedItem>),
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => arb_delta().prop_map(Step::Delta),
        1 => arb_snapshot().prop_map(Step::Snapshot),
    ]
}

/// Every stored item hangs under the parent its record names, unless it heads a loop.
fn tracks_store(mirror: &Mirror) -> Result<(), TestCaseError> {
    mirror
        .validate_invariants()
        .map_err(|err| TestCaseError::fail(err.to_string()))?;
    let reader = mirror.reader();
    for item in mirror.store().iter() {
        let view = reader.node(item.id).unwrap();
        if view.is_detached {
            prop_assert_eq!(view.parent_id, None);
        } else {
            prop_assert_eq!(view.parent_id, item.parent_id);
        }
    }
    Ok(())
}

type Shape = Vec<(NodeId, Option<NodeId>, bool, Vec<NodeId>)>;

fn shape(mirror: &Mirror) -> Shape {
    let index = mirror.index();
    (0..=6)
        .map(NodeId)
        .filter(|id| index.contains(*id))
        .map(|id| {
            let mut children = index.children(id).to_vec();
            children.sort();
            (id, index.parent(id), index.is_detached(id), children)
        })
        .collect()
}

fn base_mirror() -> Mirror {
    let mut mirror = Mirror::new(NodeId(0));
    mirror.load_snapshot(
        [(0, None), (1, Some(0)), (2, Some(1)), (3, Some(1)), (4, Some(2)), (5, Some(3))]
            .into_iter()
            .map(|(id, parent): (u64, Option<u64>)| {
                VersionedItem::new(NodeId(id), parent.map(NodeId), 1)
            })
            .collect(),
    );
    mirror
}

proptest! {
    #[test]
    fn creates_in_any_order_build_the_same_tree(order in Just(TREE.to_vec()).prop_shuffle()) {
        let mut mirror = Mirror::new(NodeId(0));
        for (id, parent) in &order {
            mirror
                .apply_delta(&Delta::create(NodeId(*id), parent.map(NodeId), 1))
                .unwrap();
        }

        mirror.validate_invariants().unwrap();
        prop_assert!(mirror.index().pending().is_empty());
        for (id, parent) in TREE {
            prop_assert_eq!(mirror.index().parent(NodeId(*id)), parent.map(NodeId));
        }
        let mut children: Vec<NodeId> = mirror.index().children(NodeId(1)).to_vec();
        children.sort();
        prop_assert_eq!(children, vec![NodeId(2), NodeId(3)]);
        prop_assert_eq!(mirror.reader().subtree(NodeId(0)).len(), TREE.len());
    }

    #[test]
    fn stored_version_never_decreases(versions in prop::collection::vec(1u64..20, 1..16)) {
        let mut mirror = Mirror::new(NodeId(0));
        mirror.apply_delta(&Delta::create(NodeId(1), Some(NodeId(0)), 0)).unwrap();

        let mut high = 0;
        for version in versions {
            let accepted = mirror.apply_delta(&Delta::update(NodeId(1), version)).is_ok();
            prop_assert_eq!(accepted, version > high);
            high = high.max(version);
            prop_assert_eq!(mirror.store().get(NodeId(1)).unwrap().version, high);
        }
    }

    #[test]
    fn arbitrary_delta_streams_keep_the_tree_consistent(
        deltas in prop::collection::vec(arb_delta(), 1..40)
    ) {
        let mut mirror = Mirror::new(NodeId(0));
        for delta in &deltas {
            let before = mirror.store().get(delta.id).map(|item| item.version);
            let result = mirror.apply_delta(delta);
            if result.is_ok() && matches!(delta.kind, DeltaKind::Update | DeltaKind::Delete) {
                prop_assert!(before.is_some_and(|v| v < delta.version));
            }
            tracks_store(&mirror)?;
        }
    }

    #[test]
    fn snapshots_mixed_with_deltas_keep_tree_and_store_in_step(
        steps in prop::collection::vec(arb_step(), 1..30)
    ) {
        let mut mirror = Mirror::new(NodeId(0));
        for step in steps {
            match step {
                Step::Delta(delta) => {
                    let _ = mirror.apply_delta(&delta);
                }
                Step::Snapshot(items) => {
                    mirror.load_snapshot(items);
                }
            }
            tracks_store(&mirror)?;
        }
    }

    #[test]
    fn move_streams_converge_in_any_order(
        (moves, shuffled) in prop::collection::vec((1u64..=5, 0u64..=5), 1..8)
            .prop_map(|targets| {
                // Distinct versions so the newest move per item is the same in every order.
                targets
                    .into_iter()
                    .zip(2u64..)
                    .map(|((id, parent), version)| Delta::move_to(NodeId(id), NodeId(parent), version))
                    .collect::<Vec<_>>()
            })
            .prop_flat_map(|moves| (Just(moves.clone()), Just(moves).prop_shuffle()))
    ) {
        let mut in_order = base_mirror();
        for delta in &moves {
            in_order.apply_delta(delta).unwrap();
        }
        let mut reordered = base_mirror();
        for delta in &shuffled {
            let _ = reordered.apply_delta(delta);
        }

        tracks_store(&in_order)?;
        tracks_store(&reordered)?;
        prop_assert_eq!(shape(&in_order), shape(&reordered));
    }
}
