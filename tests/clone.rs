use std::sync::Arc;

use ixstore::backend::Backend;
use ixstore::datatype::{Element, Observation, SeriesKey};
use ixstore::filter::{Filters, RunFilter, TsFilters};
use ixstore::memory::MemoryBackend;
use ixstore::platform::Platform;
use ixstore::scenario::{CloneOptions, Scenario, Solution};
use ixstore::timeseries::{RunState, VersionSpec};

fn setup() -> (Platform, Scenario) {
    let platform = Platform::in_memory().expect("sqlite platform");
    platform.add_unit("cases", "").unwrap();
    platform.add_unit("EJ/yr", "exajoule per year").unwrap();
    platform.add_region("Norway", "country", Some("World")).unwrap();

    let mut scen = Scenario::new(&platform, "transport", "standard", VersionSpec::New).unwrap();
    scen.init_set("i", &[], None).unwrap();
    scen.add_set("i", ["seattle", "san-diego"]).unwrap();
    scen.init_par("a", &["i"], None).unwrap();
    scen.add_par("a", [("seattle", 350.0, "cases"), ("san-diego", 600.0, "cases")])
        .unwrap();
    scen.init_var("z", &[], None).unwrap();
    scen.write_solution(&Solution::new().with("z", vec![Element::solution(
        ixstore::datatype::Key::scalar(),
        153.675,
        0.0,
    )]))
    .unwrap();

    let energy = SeriesKey::new("Norway", "Primary Energy", "EJ/yr");
    scen.add_timeseries(&[
        Observation::new(energy.clone(), 2010, 1.0),
        Observation::new(energy.clone(), 2020, 2.0),
        Observation::new(energy.clone(), 2030, 3.0),
        Observation::new(SeriesKey::new("World", "Population", "-"), 2030, 8.5).as_meta(),
    ])
    .unwrap();
    scen.commit("solved").unwrap();
    (platform, scen)
}

#[test]
fn clones_keep_everything_by_default() {
    let (platform, scen) = setup();
    let copy = scen.clone_with(CloneOptions::new().scenario("copy")).unwrap();
    assert_ne!(copy.run_id(), scen.run_id());
    assert_eq!(copy.model(), "transport");
    assert_eq!(copy.scenario(), "copy");
    assert_eq!(copy.version(), Some(1));
    assert_eq!(copy.state(), RunState::Committed);

    assert_eq!(
        copy.par("a", &Filters::new()).unwrap(),
        scen.par("a", &Filters::new()).unwrap()
    );
    assert_eq!(
        copy.var("z", &Filters::new()).unwrap().level(ixstore::datatype::Key::scalar()),
        Some((153.675, 0.0))
    );
    assert_eq!(copy.timeseries(&TsFilters::new()).unwrap().len(), 4);
    assert!(copy.log().unwrap()[0].comment.starts_with("clone of transport/standard"));
    assert_eq!(platform.scenario_list(&RunFilter::new()).unwrap().len(), 2);
}

#[test]
fn dropping_the_solution_keeps_declarations() {
    let (_, scen) = setup();
    let copy = scen
        .clone_with(CloneOptions::new().scenario("no solution").keep_solution(false))
        .unwrap();
    assert!(copy.has_var("z").unwrap());
    assert!(copy.var("z", &Filters::new()).unwrap().is_empty());
    assert!(!copy.has_solution().unwrap());
    assert_eq!(
        copy.par("a", &Filters::new()).unwrap().value("seattle"),
        Some((350.0, "cases"))
    );
    // only meta rows survive without a first model year
    let rows = copy.timeseries(&TsFilters::new()).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].meta);

    // the source is untouched
    assert!(scen.has_solution().unwrap());
}

#[test]
fn shifting_the_first_model_year() {
    let (_, scen) = setup();
    let copy = scen
        .clone_with(CloneOptions::new().scenario("shifted").shift_first_model_year(2020))
        .unwrap();
    assert!(!copy.has_solution().unwrap());
    let years: Vec<(i32, bool)> = copy
        .timeseries(&TsFilters::new())
        .unwrap()
        .iter()
        .map(|r| (r.year, r.meta))
        .collect();
    assert_eq!(years.len(), 2);
    assert!(years.contains(&(2010, false)));
    assert!(years.contains(&(2030, true)));
}

#[test]
fn clones_cross_platforms() {
    let (_, scen) = setup();
    let memory = Platform::new(Arc::new(MemoryBackend::new()));
    assert!(!memory.units().unwrap().contains("cases"));

    let copy = scen
        .clone_with(CloneOptions::new().model("moved").to_platform(&memory))
        .unwrap();
    assert!(copy.platform().same_as(&memory));
    assert!(memory.units().unwrap().contains("cases"));
    assert!(memory.units().unwrap().contains("EJ/yr"));
    assert_eq!(
        memory.regions().unwrap().get("Norway").unwrap().parent.as_deref(),
        Some("World")
    );

    let loaded = Scenario::new(&memory, "moved", "standard", 1i64).unwrap();
    assert_eq!(
        loaded.set("i", &Filters::new()).unwrap().labels(),
        vec!["seattle", "san-diego"]
    );
    assert_eq!(loaded.par("a", &Filters::new()).unwrap().len(), 2);
    assert_eq!(
        loaded
            .timeseries(&TsFilters::new().regions(["Norway"]))
            .unwrap()
            .len(),
        3
    );
}

#[test]
fn cloning_a_cloned_default_is_independent() {
    let (_, scen) = setup();
    let mut copy = scen.clone_with(CloneOptions::new().scenario("edit")).unwrap();
    copy.check_out(false).unwrap();
    copy.add_set("i", ["portland"]).unwrap();
    copy.commit("edited").unwrap();
    assert_eq!(copy.set("i", &Filters::new()).unwrap().len(), 3);
    assert_eq!(scen.set("i", &Filters::new()).unwrap().len(), 2);
}

#[test]
fn a_failed_cross_platform_clone_leaves_nothing_behind() {
    let (_, mut scen) = setup();
    scen.check_out(true).unwrap();
    let capital = SeriesKey::new("Norway", "Capital", "-");
    scen.add_geodata(&[Observation::new(capital, 2020, "Oslo".to_string())])
        .unwrap();
    scen.commit("geodata").unwrap();

    let memory = Platform::new(Arc::new(MemoryBackend::new()));
    let err = scen
        .clone_with(CloneOptions::new().model("moved").to_platform(&memory))
        .err()
        .expect("memory engine keeps no geodata");
    assert!(err.is_not_implemented());
    assert!(memory.backend().list_runs().unwrap().is_empty());
}
