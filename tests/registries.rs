use std::sync::Arc;

use ixstore::IxError;
use ixstore::memory::MemoryBackend;
use ixstore::platform::Platform;
use ixstore::registry::{Region, Timeslice, Unit};
use ixstore::scenario::Scenario;
use ixstore::timeseries::VersionSpec;

fn setup() -> Vec<Platform> {
    vec![
        Platform::in_memory().expect("sqlite platform"),
        Platform::new(Arc::new(MemoryBackend::new())),
    ]
}

#[test]
fn registries_start_seeded() {
    for platform in setup() {
        assert_eq!(platform.units().unwrap().names(), vec!["-"]);
        assert_eq!(platform.regions().unwrap().names(), vec!["World"]);
        let year = platform.get::<Timeslice>("Year").unwrap();
        assert_eq!(year.category, "Common");
        assert_eq!(year.duration, 1.0);
        assert!(platform.models().unwrap().is_empty());
    }
}

#[test]
fn adding_twice_is_a_no_op() {
    for platform in setup() {
        assert!(platform.add_unit("cases", "number of cases").unwrap());
        assert!(!platform.add_unit("cases", "number of cases").unwrap());
        assert_eq!(platform.units().unwrap().len(), 2);

        let err = platform.add_unit("cases", "something else").unwrap_err();
        assert!(matches!(err, IxError::AlreadyExists(_)));
        assert_eq!(
            platform.get::<Unit>("cases").unwrap().comment,
            "number of cases"
        );
    }
}

#[test]
fn regions_keep_their_hierarchy() {
    for platform in setup() {
        platform.add_region("Europe", "continent", Some("World")).unwrap();
        platform.add(&Region::new("Norway", "country").with_parent("Europe")).unwrap();
        let regions = platform.regions().unwrap();
        assert_eq!(regions.names(), vec!["World", "Europe", "Norway"]);
        let norway = regions.get("Norway").unwrap();
        assert_eq!(norway.hierarchy, "country");
        assert_eq!(norway.parent.as_deref(), Some("Europe"));
        assert!(matches!(
            platform.add_region("Norway", "nation", None).unwrap_err(),
            IxError::AlreadyExists(_)
        ));
    }
}

#[test]
fn timeslices() {
    for platform in setup() {
        platform.add_timeslice("Summer", "Season", 0.25).unwrap();
        let names: Vec<String> = platform
            .timeslices()
            .unwrap()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["Year", "Summer"]);
        assert_eq!(platform.get::<Timeslice>("Summer").unwrap().duration, 0.25);
    }
}

#[test]
fn models_and_scenarios_appear_with_runs() {
    for platform in setup() {
        Scenario::new(&platform, "MESSAGE", "baseline", VersionSpec::New).unwrap();
        Scenario::new(&platform, "MESSAGE", "policy", VersionSpec::New).unwrap();
        assert_eq!(platform.models().unwrap().names(), vec!["MESSAGE"]);
        assert_eq!(
            platform.scenarios().unwrap().names(),
            vec!["baseline", "policy"]
        );
    }
}

#[test]
fn listings_can_be_iterated_again() {
    for platform in setup() {
        platform.add_unit("km", "").unwrap();
        let units = platform.units().unwrap();
        let first: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
        let second: Vec<&str> = (&units).into_iter().map(|u| u.name.as_str()).collect();
        assert_eq!(first, second);
        assert_eq!(units.to_string(), "[-, km]");

        // a snapshot does not change under later additions
        platform.add_unit("m", "").unwrap();
        assert_eq!(units.len(), 2);
        assert!(platform.units().unwrap().contains("m"));
    }
}

#[test]
fn unknown_names_are_not_found() {
    for platform in setup() {
        assert!(matches!(
            platform.get::<Unit>("parsec").unwrap_err(),
            IxError::NotFound(_)
        ));
        assert!(matches!(
            platform.units().unwrap().get("parsec").unwrap_err(),
            IxError::NotFound(_)
        ));
    }
}
