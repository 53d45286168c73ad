use crate::{config::ConfigErrors, topology::Topology};
use itertools::Itertools;

#[test]
pub fn partition_rejects_zero_files() {
    assert!(matches!(
        Topology::partition(4, 0),
        Err(ConfigErrors::InvalidFileCount { ranks: 4, files: 0 })
    ));
}

#[test]
pub fn partition_rejects_more_files_than_ranks() {
    assert!(matches!(
        Topology::partition(3, 4),
        Err(ConfigErrors::InvalidFileCount { ranks: 3, files: 4 })
    ));
}

#[test]
pub fn round_robin_slots() {
    let topology = Topology::partition(7, 3).unwrap();

    assert_eq!(
        (0..7).map(|rank| topology.slot_of(rank)).collect_vec(),
        vec![0, 1, 2, 0, 1, 2, 0]
    );
    assert_eq!(topology.sets(), 3);
    assert_eq!(topology.members(0).collect_vec(), vec![0, 3, 6]);
    assert_eq!(topology.members(2).collect_vec(), vec![2, 5]);
}

#[test]
pub fn lowest_member_is_first_writer() {
    let topology = Topology::partition(7, 3).unwrap();

    for slot in 0..3 {
        let first = topology.members(slot).next().unwrap();

        assert!(topology.is_first_writer(first));
        assert!(topology
            .members(slot)
            .skip(1)
            .all(|rank| !topology.is_first_writer(rank)));
    }

    assert_eq!(topology.first_writers().collect_vec(), vec![0, 1, 2]);
    assert_eq!(topology.queued().collect_vec(), vec![3, 4, 5, 6]);
}

#[test]
pub fn membership_is_balanced() {
    for ranks in 1..40 {
        for files in 1..=ranks {
            let topology = Topology::partition(ranks, files).unwrap();
            let sizes = (0..files)
                .map(|slot| topology.members(slot).count())
                .collect_vec();

            let (min, max) = sizes.iter().minmax().into_option().unwrap();
            assert!(max - min <= 1, "ranks {ranks} files {files}: {sizes:?}");
            assert_eq!(sizes.iter().sum::<usize>(), ranks);
            assert_eq!(*max, topology.sets());
        }
    }
}

#[test]
pub fn decider_is_highest_rank() {
    let topology = Topology::partition(5, 2).unwrap();

    assert_eq!(topology.decider(), 4);
    assert!(!topology.is_first_writer(topology.decider()));

    // with one file per rank the decider also writes first
    let topology = Topology::partition(5, 5).unwrap();
    assert!(topology.is_first_writer(topology.decider()));
    assert_eq!(topology.queued().count(), 0);
}
