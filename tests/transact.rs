use std::panic::{self, AssertUnwindSafe};

use ixstore::IxError;
use ixstore::datatype::{Observation, SeriesKey};
use ixstore::filter::{Filters, TsFilters};
use ixstore::platform::Platform;
use ixstore::scenario::Scenario;
use ixstore::timeseries::{RunState, Transaction, Transactional, VersionSpec};

fn setup() -> Scenario {
    let platform = Platform::in_memory().expect("sqlite platform");
    let mut scen = Scenario::new(&platform, "model", "transact", VersionSpec::New).unwrap();
    scen.init_set("i", &[], None).unwrap();
    scen.add_set("i", ["a"]).unwrap();
    scen.commit("initial").unwrap();
    scen
}

fn labels(scen: &Scenario) -> Vec<String> {
    scen.set("i", &Filters::new()).unwrap().labels()
}

#[test]
fn commits_when_the_body_succeeds() {
    let mut scen = setup();
    let added = scen
        .transact(Transaction::new("add b"), |s| {
            s.add_set("i", ["b"])?;
            Ok(1)
        })
        .unwrap();
    assert_eq!(added, 1);
    assert_eq!(scen.state(), RunState::Committed);
    assert_eq!(labels(&scen), vec!["a", "b"]);
    assert_eq!(scen.log().unwrap().last().unwrap().comment, "add b");
}

#[test]
fn discards_when_the_body_fails() {
    let mut scen = setup();
    let err = scen
        .transact(Transaction::new("doomed"), |s| {
            s.add_set("i", ["b"])?;
            s.add_set("nonexistent", ["c"])
        })
        .unwrap_err();
    assert!(matches!(err, IxError::NotFound(_)));
    assert_eq!(scen.state(), RunState::Committed);
    assert_eq!(labels(&scen), vec!["a"]);
}

#[test]
fn commit_on_error_keeps_partial_work() {
    let mut scen = setup();
    let err = scen
        .transact(Transaction::new("partial").commit_on_error(), |s| {
            s.add_set("i", ["b"])?;
            Err::<(), _>(IxError::TypeError("stop".to_string()))
        })
        .unwrap_err();
    assert!(matches!(err, IxError::TypeError(_)));
    assert!(!scen.is_checked_out());
    assert_eq!(labels(&scen), vec!["a", "b"]);
}

#[test]
fn discards_when_the_body_panics() {
    let mut scen = setup();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        scen.transact(Transaction::new("panics"), |s| -> ixstore::Result<()> {
            s.add_set("i", ["b"])?;
            panic!("solver crashed");
        })
    }));
    assert!(outcome.is_err());
    assert!(!scen.is_checked_out());
    assert_eq!(labels(&scen), vec!["a"]);
    // the run is free for the next check-out
    scen.check_out(false).unwrap();
    scen.discard_changes().unwrap();
}

#[test]
fn time_series_transactions_leave_items_alone() {
    let mut scen = setup();
    scen.platform().add_unit("EJ/yr", "").unwrap();
    let err = scen
        .transact(Transaction::new("ts").timeseries_only(), |s| {
            s.add_timeseries(&[Observation::new(
                SeriesKey::new("World", "Primary Energy", "EJ/yr"),
                2020,
                1.0,
            )])?;
            s.add_set("i", ["b"])
        })
        .unwrap_err();
    assert!(matches!(err, IxError::IllegalState(_)));
    assert!(scen.timeseries(&TsFilters::new()).unwrap().is_empty());

    scen.transact(Transaction::new("ts").timeseries_only(), |s| {
        s.add_timeseries(&[Observation::new(
            SeriesKey::new("World", "Primary Energy", "EJ/yr"),
            2020,
            1.0,
        )])
    })
    .unwrap();
    assert_eq!(scen.timeseries(&TsFilters::new()).unwrap().len(), 1);
}

#[test]
fn false_condition_runs_the_body_alone() {
    let mut scen = setup();
    let err = scen
        .transact(Transaction::new("skipped").condition(false), |s| {
            s.add_set("i", ["b"])
        })
        .unwrap_err();
    // nothing checked the run out
    assert!(matches!(err, IxError::IllegalState(_)));
    assert_eq!(scen.log().unwrap().len(), 1);
}

#[test]
fn new_runs_are_committed_without_a_check_out() {
    let platform = Platform::in_memory().unwrap();
    let mut scen = Scenario::new(&platform, "model", "fresh", VersionSpec::New).unwrap();
    scen.transact(Transaction::new("first"), |s| s.init_set("i", &[], None))
        .unwrap();
    assert_eq!(scen.version(), Some(1));
}

#[test]
fn the_body_error_survives_a_lost_lock() {
    for commit_on_error in [true, false] {
        let mut scen = setup();
        let mut transaction = Transaction::new("lost lock");
        if commit_on_error {
            transaction = transaction.commit_on_error();
        }
        let err = scen
            .transact(transaction, |s| {
                s.add_set("i", ["b"])?;
                s.platform().break_lock(s.run_id())?;
                Err::<(), _>(IxError::TypeError("body failed".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, IxError::TypeError(message) if message == "body failed"));
        assert!(!scen.is_checked_out());
        assert_eq!(labels(&scen), vec!["a"]);
    }
}
