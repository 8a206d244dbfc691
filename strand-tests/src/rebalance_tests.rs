//! Rebalance integration tests.
//!
//! A partition moving between consumers must neither lose a record nor
//! reprocess one that a commit declared complete.

use strand_core::{
    EngineConfig, InvalidMetadataPolicy, Offset, PolledRecord, ProcessingOrder, TopicPartition,
};
use strand_state::{
    AssignedPartition, CommitData, EpochAndRecords, ResultOutcome, StateError, WorkManager,
};

fn tp() -> TopicPartition {
    TopicPartition::new("orders", 0)
}

fn consumer(policy: InvalidMetadataPolicy) -> WorkManager {
    let config = EngineConfig::for_testing()
        .with_ordering(ProcessingOrder::Unordered)
        .with_invalid_metadata_policy(policy);
    WorkManager::new(config, 0).unwrap()
}

fn assign(wm: &WorkManager, committed: u64, metadata: Option<&str>) {
    let mut assignment = AssignedPartition::new(tp(), Offset::new(committed));
    if let Some(metadata) = metadata {
        assignment = assignment.with_metadata(metadata);
    }
    wm.on_partitions_assigned(&[assignment]).unwrap();
}

fn poll(wm: &WorkManager, offsets: std::ops::Range<u64>) -> usize {
    wm.register_work(EpochAndRecords {
        tp: tp(),
        epoch: wm.epoch_of(&tp()),
        records: offsets
            .map(|o| PolledRecord::new(tp(), o, format!("v-{o}")))
            .collect(),
    })
}

/// Processes every available record, succeeding those in `succeed`.
fn process(wm: &WorkManager, succeed: &[u64]) -> Vec<u64> {
    let mut handed_out = Vec::new();
    for mut wc in wm.get_work(100, 0) {
        handed_out.push(wc.offset().get());
        if succeed.contains(&wc.offset().get()) {
            wc.on_user_function_success(0);
        } else {
            wc.on_user_function_failure(0);
        }
        wm.handle_result(wc);
    }
    handed_out.sort_unstable();
    handed_out
}

fn commit(wm: &WorkManager) -> CommitData {
    let mut data = wm.collect_commit_data();
    assert_eq!(data.len(), 1);
    wm.on_offset_commit_success(&data);
    data.remove(0).1
}

#[test]
fn test_revoke_makes_in_flight_work_stale() {
    let wm = consumer(InvalidMetadataPolicy::Fail);
    assign(&wm, 0, None);
    poll(&wm, 0..5);
    let work = wm.get_work(5, 0);
    assert_eq!(work.len(), 5);
    let polled_epoch = wm.epoch_of(&tp());

    wm.on_partitions_revoked(&[tp()]);
    assert_ne!(wm.epoch_of(&tp()), polled_epoch);
    assert_eq!(wm.commit_point(&tp()), None);

    for mut wc in work {
        wc.on_user_function_success(0);
        assert_eq!(wm.handle_result(wc), ResultOutcome::Stale);
    }
    assert_eq!(wm.number_records_out_for_processing(), 0);
    assert!(wm.collect_commit_data().is_empty());

    // Reassigned from the last commit, everything comes back.
    assign(&wm, 0, None);
    assert_eq!(poll(&wm, 0..5), 5);
    assert_eq!(process(&wm, &[0, 1, 2, 3, 4]), vec![0, 1, 2, 3, 4]);
    assert_eq!(commit(&wm).offset, Offset::new(5));
}

#[test]
fn test_reassign_restores_incompletes_from_metadata() {
    let first = consumer(InvalidMetadataPolicy::Fail);
    assign(&first, 0, None);
    poll(&first, 0..5);
    assert_eq!(process(&first, &[0, 2, 4]), vec![0, 1, 2, 3, 4]);
    let data = commit(&first);
    assert_eq!(data.offset, Offset::new(1));
    let metadata = data.metadata.expect("incompletes are encoded");

    // Another consumer picks the partition up from the commit.
    let second = consumer(InvalidMetadataPolicy::Fail);
    assign(&second, 1, Some(&metadata));
    assert_eq!(second.total_incomplete(), 2);
    assert_eq!(second.commit_point(&tp()), Some(Offset::new(1)));

    // Records 2 and 4 are known complete and skipped on replay.
    assert_eq!(poll(&second, 1..5), 2);
    assert_eq!(process(&second, &[1, 3]), vec![1, 3]);
    assert_eq!(commit(&second).offset, Offset::new(5));

    // New records past the restored range are processed as usual.
    assert_eq!(poll(&second, 5..7), 2);
    assert_eq!(process(&second, &[5, 6]), vec![5, 6]);
    let data = commit(&second);
    assert_eq!(data.offset, Offset::new(7));
    assert_eq!(data.metadata, None);
}

#[test]
fn test_lost_partition_reprocesses_from_last_commit() {
    let wm = consumer(InvalidMetadataPolicy::Fail);
    assign(&wm, 0, None);
    poll(&wm, 0..3);
    process(&wm, &[0, 1, 2]);
    assert_eq!(commit(&wm).offset, Offset::new(3));

    // 3 and 4 complete, but the partition is lost before the next commit.
    poll(&wm, 3..5);
    process(&wm, &[3, 4]);
    assert_eq!(wm.commit_point(&tp()), Some(Offset::new(5)));
    wm.on_partitions_lost(&[tp()]);
    assert!(wm.collect_commit_data().is_empty());

    assign(&wm, 3, None);
    assert_eq!(poll(&wm, 3..5), 2);
    assert_eq!(process(&wm, &[3, 4]), vec![3, 4]);
    assert_eq!(commit(&wm).offset, Offset::new(5));
}

#[test]
fn test_foreign_metadata_fails_restore() {
    let wm = consumer(InvalidMetadataPolicy::Fail);
    let assignment = AssignedPartition::new(tp(), Offset::new(10)).with_metadata("not-ours!");
    let err = wm.on_partitions_assigned(&[assignment]).unwrap_err();
    assert!(matches!(err, StateError::Restore { tp: ref failed, .. } if *failed == tp()));
    // Nothing was touched.
    assert_eq!(wm.epoch_of(&tp()).get(), 0);
    assert_eq!(wm.commit_point(&tp()), None);
}

#[test]
fn test_foreign_metadata_ignored_restarts_from_committed() {
    let wm = consumer(InvalidMetadataPolicy::Ignore);
    assign(&wm, 10, Some("not-ours!"));
    assert_eq!(wm.total_incomplete(), 0);
    assert_eq!(poll(&wm, 10..13), 3);
    assert_eq!(process(&wm, &[10, 11, 12]), vec![10, 11, 12]);
    assert_eq!(commit(&wm).offset, Offset::new(13));
}

#[test]
fn test_failed_record_survives_reassignment() {
    let first = consumer(InvalidMetadataPolicy::Fail);
    assign(&first, 0, None);
    poll(&first, 0..4);
    // 1 keeps failing; everything else succeeds.
    process(&first, &[0, 2, 3]);
    let data = commit(&first);
    assert_eq!(data.offset, Offset::new(1));

    let second = consumer(InvalidMetadataPolicy::Fail);
    assign(&second, 1, data.metadata.as_deref());
    assert_eq!(poll(&second, 1..4), 1);
    assert_eq!(process(&second, &[1]), vec![1]);
    assert_eq!(commit(&second).offset, Offset::new(4));
}
