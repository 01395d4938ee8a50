//! Retention sweeper integration tests

mod common;

use common::{channel, MemoryConnector, MemoryStore, BACKUP_DIR, SOURCE_HOST};
use recon_converter::convert::ChannelProfile;
use recon_converter::sweeper::RetentionSweeper;
use recon_converter::PipelineError;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

fn sweeper(source: &Arc<MemoryStore>) -> (RetentionSweeper, Arc<MemoryConnector>) {
    let connector = MemoryConnector::new(source.clone(), MemoryStore::new());
    // Retention of one hour
    let sweeper = RetentionSweeper::new(&channel("OVO", ChannelProfile::Ovo), connector.clone());
    (sweeper, connector)
}

#[test]
fn test_only_entries_older_than_threshold_are_removed() {
    let now = SystemTime::now();
    let source = MemoryStore::new();
    source.put_at(BACKUP_DIR, "recent.xlsx", b"a".to_vec(), now - 10 * MINUTE);
    source.put_at(BACKUP_DIR, "old.xlsx", b"b".to_vec(), now - 2 * HOUR);

    let (sweeper, _) = sweeper(&source);
    let report = sweeper.sweep_at(now).unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.removed, vec!["old.xlsx"]);
    assert!(source.exists(BACKUP_DIR, "recent.xlsx"));
    assert!(!source.exists(BACKUP_DIR, "old.xlsx"));
    assert_eq!(source.open_sessions(), 0);
}

#[test]
fn test_entry_exactly_at_threshold_is_kept() {
    let now = SystemTime::now();
    let source = MemoryStore::new();
    source.put_at(BACKUP_DIR, "edge.xlsx", b"a".to_vec(), now - HOUR);

    let (sweeper, _) = sweeper(&source);
    let report = sweeper.sweep_at(now).unwrap();

    assert!(report.removed.is_empty());
    assert!(source.exists(BACKUP_DIR, "edge.xlsx"));
}

#[test]
fn test_directories_are_never_removed() {
    let now = SystemTime::now();
    let source = MemoryStore::new();
    source.mkdir(BACKUP_DIR, "2023");

    let (sweeper, _) = sweeper(&source);
    let report = sweeper.sweep_at(now + 24 * HOUR).unwrap();

    assert_eq!(report.examined, 0);
    assert!(report.removed.is_empty());
}

#[test]
fn test_removal_failure_does_not_stop_the_sweep() {
    let now = SystemTime::now();
    let source = MemoryStore::new();
    source.put_at(BACKUP_DIR, "a.xlsx", b"a".to_vec(), now - 3 * HOUR);
    source.put_at(BACKUP_DIR, "b.xlsx", b"b".to_vec(), now - 3 * HOUR);
    source.fail_remove(BACKUP_DIR, "a.xlsx");

    let (sweeper, _) = sweeper(&source);
    let report = sweeper.sweep_at(now).unwrap();

    assert_eq!(report.removed, vec!["b.xlsx"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "a.xlsx");
    assert!(source.exists(BACKUP_DIR, "a.xlsx"));
}

#[test]
fn test_listing_failure_aborts_the_sweep() {
    let source = MemoryStore::new();
    source.fail_list();

    let (sweeper, _) = sweeper(&source);
    assert!(matches!(sweeper.sweep(), Err(PipelineError::Listing { .. })));
    assert_eq!(source.open_sessions(), 0);
}

#[test]
fn test_connect_failure_aborts_the_sweep() {
    let source = MemoryStore::new();
    let (sweeper, connector) = sweeper(&source);
    connector.refuse(SOURCE_HOST);

    assert!(matches!(sweeper.sweep(), Err(PipelineError::Session { .. })));
}
