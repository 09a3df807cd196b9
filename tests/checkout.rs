use std::sync::Arc;
use std::thread;

use ixstore::IxError;
use ixstore::datatype::{Observation, SeriesKey};
use ixstore::filter::{Filters, TsFilters};
use ixstore::memory::MemoryBackend;
use ixstore::persist::{PersistenceMode, SqliteBackend};
use ixstore::platform::Platform;
use ixstore::scenario::Scenario;
use ixstore::timeseries::{RunState, VersionSpec};

fn setup() -> Vec<Platform> {
    vec![
        Platform::in_memory().expect("sqlite platform"),
        Platform::new(Arc::new(MemoryBackend::new())),
    ]
}

fn committed(platform: &Platform) -> Scenario {
    let mut scen = Scenario::new(platform, "model", "lock", VersionSpec::New).unwrap();
    scen.init_set("i", &[], None).unwrap();
    scen.add_set("i", ["a", "b"]).unwrap();
    scen.commit("initial").unwrap();
    scen
}

#[test]
fn only_one_of_two_concurrent_check_outs_wins() {
    for platform in setup() {
        committed(&platform);
        let mut first = Scenario::new(&platform, "model", "lock", 1i64).unwrap();
        let mut second = Scenario::new(&platform, "model", "lock", 1i64).unwrap();

        let (a, b) = thread::scope(|s| {
            let a = s.spawn(|| first.check_out(false));
            let b = s.spawn(|| second.check_out(false));
            (a.join().unwrap(), b.join().unwrap())
        });
        assert!(a.is_ok() != b.is_ok());
        assert_eq!(first.is_checked_out(), a.is_ok());
        assert_eq!(second.is_checked_out(), b.is_ok());
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(IxError::IllegalState(_))));
    }
}

#[test]
fn check_out_twice_on_one_handle_fails() {
    for platform in setup() {
        let mut scen = committed(&platform);
        scen.check_out(false).unwrap();
        assert!(matches!(
            scen.check_out(false).unwrap_err(),
            IxError::IllegalState(_)
        ));
        scen.commit("nothing").unwrap();
        assert_eq!(scen.version(), Some(1));
    }
}

#[test]
fn separate_connections_share_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.sqlite");
    let one = Platform::new(Arc::new(
        SqliteBackend::new(PersistenceMode::File(path.clone())).unwrap(),
    ));
    let two = Platform::new(Arc::new(
        SqliteBackend::new(PersistenceMode::File(path)).unwrap(),
    ));

    let mut mine = committed(&one);
    mine.check_out(false).unwrap();
    mine.add_set("i", ["c"]).unwrap();

    let mut theirs = Scenario::new(&two, "model", "lock", 1i64).unwrap();
    assert!(theirs.info().unwrap().is_locked);
    assert!(matches!(
        theirs.check_out(false).unwrap_err(),
        IxError::IllegalState(_)
    ));
    assert!(matches!(theirs.delete().unwrap_err(), IxError::IllegalState(_)));

    assert_eq!(mine.commit("c").unwrap(), 1);
    theirs.check_out(false).unwrap();
    assert_eq!(
        theirs.set("i", &Filters::new()).unwrap().labels(),
        vec!["a", "b", "c"]
    );
    theirs.discard_changes().unwrap();
    assert_eq!(theirs.state(), RunState::Committed);
}

#[test]
fn breaking_a_lock_drops_pending_changes() {
    for platform in setup() {
        let mut scen = committed(&platform);
        scen.check_out(false).unwrap();
        scen.add_set("i", ["lost"]).unwrap();

        assert!(platform.break_lock(scen.run_id()).unwrap());
        assert!(!platform.break_lock(scen.run_id()).unwrap());

        let err = scen.commit("too late").unwrap_err();
        assert!(matches!(err, IxError::CommitConflict { .. }));
        assert!(!scen.is_checked_out());
        assert_eq!(
            scen.set("i", &Filters::new()).unwrap().labels(),
            vec!["a", "b"]
        );

        // the run can be checked out again
        scen.check_out(false).unwrap();
        scen.commit("again").unwrap();
    }
}

#[test]
fn a_displaced_holder_cannot_write_into_the_new_check_out() {
    for platform in setup() {
        platform.add_unit("EJ/yr", "").unwrap();
        let mut old = committed(&platform);
        old.check_out(false).unwrap();
        assert!(platform.break_lock(old.run_id()).unwrap());

        let mut new = Scenario::new(&platform, "model", "lock", 1i64).unwrap();
        new.check_out(false).unwrap();
        new.add_set("i", ["c"]).unwrap();

        assert!(matches!(
            old.add_set("i", ["from_old_holder"]).unwrap_err(),
            IxError::CommitConflict { .. }
        ));
        assert!(matches!(
            old.init_set("k", &[], None).unwrap_err(),
            IxError::CommitConflict { .. }
        ));
        let key = SeriesKey::new("World", "Primary Energy", "EJ/yr");
        assert!(matches!(
            old.add_timeseries(&[Observation::new(key, 2020, 1.0)])
                .unwrap_err(),
            IxError::CommitConflict { .. }
        ));
        // nor does it see what the new holder is doing
        assert_eq!(
            old.set("i", &Filters::new()).unwrap().labels(),
            vec!["a", "b"]
        );

        new.commit("new holder").unwrap();
        assert_eq!(
            new.set("i", &Filters::new()).unwrap().labels(),
            vec!["a", "b", "c"]
        );
        assert!(new.timeseries(&TsFilters::new()).unwrap().is_empty());
        assert!(new.set_list().unwrap().iter().all(|name| name != "k"));
    }
}

#[test]
fn uncommitted_changes_stay_private_to_the_holder() {
    for platform in setup() {
        let mut writer = committed(&platform);
        writer.check_out(false).unwrap();
        writer.add_set("i", ["uncommitted"]).unwrap();

        let reader = Scenario::new(&platform, "model", "lock", 1i64).unwrap();
        assert_eq!(
            reader.set("i", &Filters::new()).unwrap().labels(),
            vec!["a", "b"]
        );
        writer.discard_changes().unwrap();
        assert_eq!(
            reader.set("i", &Filters::new()).unwrap().labels(),
            vec!["a", "b"]
        );
    }
}

#[test]
fn time_series_check_out_leaves_items_alone() {
    for platform in setup() {
        platform.add_unit("EJ/yr", "").unwrap();
        let mut scen = committed(&platform);
        scen.check_out(true).unwrap();
        assert!(matches!(
            scen.add_set("i", ["c"]).unwrap_err(),
            IxError::IllegalState(_)
        ));
        let key = SeriesKey::new("World", "Primary Energy", "EJ/yr");
        scen.add_timeseries(&[Observation::new(key, 2020, 500.0)])
            .unwrap();
        scen.commit("time series").unwrap();

        assert_eq!(scen.timeseries(&TsFilters::new()).unwrap().len(), 1);
        assert_eq!(scen.set("i", &Filters::new()).unwrap().len(), 2);
    }
}

#[test]
fn discarding_a_new_run_keeps_it_checked_out_and_empty() {
    for platform in setup() {
        let mut scen = Scenario::new(&platform, "model", "fresh", VersionSpec::New).unwrap();
        scen.init_set("i", &[], None).unwrap();
        scen.discard_changes().unwrap();
        assert_eq!(scen.state(), RunState::New);
        assert!(scen.set_list().unwrap().is_empty());

        scen.init_set("j", &[], None).unwrap();
        assert_eq!(scen.commit("first").unwrap(), 1);
        assert_eq!(scen.set_list().unwrap(), vec!["j"]);
    }
}

#[test]
fn commit_requires_a_check_out() {
    for platform in setup() {
        let mut scen = committed(&platform);
        assert!(matches!(
            scen.commit("again").unwrap_err(),
            IxError::IllegalState(_)
        ));
        assert!(matches!(
            scen.discard_changes().unwrap_err(),
            IxError::IllegalState(_)
        ));
    }
}
