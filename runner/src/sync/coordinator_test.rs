use crate::{
    message::{Message, Tag},
    round::RoundError,
    sync::{
        backoff::BackoffConfig,
        coordinator::{Grant, GrantPolicy, TokenCoordinator},
    },
    topology::{SlotId, Topology},
    transport::{
        local::{LocalCluster, LocalTransport},
        Endpoint, Source, Transport, TransportError,
    },
};
use itertools::Itertools;
use std::{sync::mpsc, thread, time::Duration};

/// wait for a grant and hand the slot straight back
fn queued_writer(transport: &LocalTransport) -> SlotId {
    let endpoint = Endpoint::new(transport, 0);

    match endpoint.recv(Tag::Grant, Source::Any).unwrap() {
        Message::WriteGrant { sender, slot } => {
            endpoint
                .send(
                    sender,
                    Message::WriteDone {
                        sender: transport.rank(),
                        slot,
                    },
                )
                .unwrap();
            slot
        }
        message => panic!("expected a grant, got {message:?}"),
    }
}

fn first_writer_done(transport: &LocalTransport, coordinator: usize) {
    Endpoint::new(transport, 0)
        .send(
            coordinator,
            Message::WriteDone {
                sender: transport.rank(),
                slot: transport.rank(),
            },
        )
        .unwrap();
}

fn run_coordinator(
    ranks: usize,
    files: usize,
    policy: GrantPolicy,
) -> (Vec<Grant>, Vec<(usize, SlotId)>) {
    let topology = Topology::partition(ranks, files).unwrap();
    let cluster = LocalCluster::new(ranks);
    let transports = cluster.transports();

    let (grants, received) = thread::scope(|scope| {
        let writers = transports[files..]
            .iter()
            .map(|transport| scope.spawn(move || (transport.rank(), queued_writer(transport))))
            .collect_vec();

        for transport in transports[1..files].iter() {
            first_writer_done(transport, 0);
        }

        let endpoint = Endpoint::new(&transports[0], 0);
        let grants = TokenCoordinator::new(&endpoint, &topology, policy, 0, BackoffConfig::default())
            .run()
            .unwrap();

        let received = writers
            .into_iter()
            .map(|writer| writer.join().unwrap())
            .collect_vec();

        (grants, received)
    });

    assert_eq!(cluster.pending(), 0);

    (grants, received)
}

#[test]
pub fn spread_grants_queued_ranks_in_order() {
    let (grants, received) = run_coordinator(5, 2, GrantPolicy::Spread);

    assert_eq!(grants.iter().map(|grant| grant.rank).collect_vec(), vec![2, 3, 4]);
    // the coordinator's own slot is free first
    assert_eq!(grants[0], Grant { rank: 2, slot: 0 });
    assert!(grants.iter().all(|grant| grant.slot < 2));

    for (rank, slot) in received {
        assert!(grants.contains(&Grant { rank, slot }));
    }
}

#[test]
pub fn grouped_grants_keep_topology_slots() {
    let (grants, received) = run_coordinator(6, 2, GrantPolicy::Grouped);

    assert_eq!(grants.len(), 4);
    assert!(grants.iter().all(|grant| grant.slot == grant.rank % 2));
    assert_eq!(
        grants
            .iter()
            .filter(|grant| grant.slot == 0)
            .map(|grant| grant.rank)
            .collect_vec(),
        vec![2, 4]
    );
    assert_eq!(
        grants
            .iter()
            .filter(|grant| grant.slot == 1)
            .map(|grant| grant.rank)
            .collect_vec(),
        vec![3, 5]
    );
    assert!(received.iter().all(|(rank, slot)| *slot == rank % 2));
}

#[test]
pub fn single_file_is_granted_one_rank_at_a_time() {
    let (grants, _) = run_coordinator(4, 1, GrantPolicy::Spread);

    assert_eq!(
        grants,
        vec![
            Grant { rank: 1, slot: 0 },
            Grant { rank: 2, slot: 0 },
            Grant { rank: 3, slot: 0 },
        ]
    );
}

#[test]
pub fn no_queued_ranks_means_no_grants() {
    let (grants, received) = run_coordinator(3, 3, GrantPolicy::Spread);

    assert!(grants.is_empty());
    assert!(received.is_empty());
}

#[test]
pub fn release_of_a_free_slot_fails() {
    let topology = Topology::partition(2, 2).unwrap();
    let cluster = LocalCluster::new(2);
    let transports = cluster.transports();

    // rank 1 holds slot 1, slot 0 belongs to the coordinator
    Endpoint::new(&transports[1], 0)
        .send(0, Message::WriteDone { sender: 1, slot: 0 })
        .unwrap();

    let endpoint = Endpoint::new(&transports[0], 0);
    let coordinator = TokenCoordinator::new(
        &endpoint,
        &topology,
        GrantPolicy::Spread,
        0,
        BackoffConfig::default(),
    );
    assert_eq!(coordinator.remaining(), 1);

    assert!(matches!(
        coordinator.run(),
        Err(RoundError::UnheldRelease { slot: 0, rank: 1 })
    ));
}

#[test]
pub fn release_of_unknown_slot_fails() {
    let topology = Topology::partition(2, 2).unwrap();
    let cluster = LocalCluster::new(2);
    let transports = cluster.transports();

    Endpoint::new(&transports[1], 0)
        .send(0, Message::WriteDone { sender: 1, slot: 9 })
        .unwrap();

    let endpoint = Endpoint::new(&transports[0], 0);
    assert!(matches!(
        TokenCoordinator::new(&endpoint, &topology, GrantPolicy::Grouped, 0, BackoffConfig::default()).run(),
        Err(RoundError::SlotOutOfRange { slot: 9, rank: 1 })
    ));
}

#[test]
pub fn spread_fills_every_file_to_its_share() {
    let topology = Topology::partition(6, 2).unwrap();
    let cluster = LocalCluster::new(6);
    let transports = cluster.transports();
    let (finished, written) = mpsc::channel();

    let grants = thread::scope(|scope| {
        for transport in transports[2..].iter() {
            let finished = finished.clone();
            scope.spawn(move || finished.send(queued_writer(transport)).unwrap());
        }

        let coordinator = scope.spawn(|| {
            let endpoint = Endpoint::new(&transports[0], 0);
            TokenCoordinator::new(&endpoint, &topology, GrantPolicy::Spread, 0, BackoffConfig::default())
                .run()
        });

        // rank 1 keeps slot 1 until slot 0 took all the writers it can
        assert_eq!(written.iter().take(2).collect_vec(), vec![0, 0]);
        first_writer_done(&transports[1], 0);
        assert_eq!(written.iter().take(2).collect_vec(), vec![1, 1]);

        coordinator.join().unwrap().unwrap()
    });

    assert_eq!(
        grants.iter().map(|grant| grant.rank).collect_vec(),
        vec![2, 3, 4, 5]
    );
    assert_eq!(
        grants.iter().map(|grant| grant.slot).collect_vec(),
        vec![0, 0, 1, 1]
    );
    assert_eq!(cluster.pending(), 0);
}

#[test]
pub fn abort_stops_the_grant_loop() {
    let topology = Topology::partition(2, 2).unwrap();
    let cluster = LocalCluster::new(2);
    let transports = cluster.transports();

    let outcome = thread::scope(|scope| {
        let coordinator = scope.spawn(|| {
            let endpoint = Endpoint::new(&transports[0], 0);
            TokenCoordinator::new(&endpoint, &topology, GrantPolicy::Spread, 0, BackoffConfig::default())
                .run()
        });

        thread::sleep(Duration::from_millis(20));
        transports[1].abort("open failed");

        coordinator.join().unwrap()
    });

    assert!(matches!(
        outcome,
        Err(RoundError::Transport(TransportError::Aborted { rank: 1, .. }))
    ));
}
