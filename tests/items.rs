use std::sync::Arc;

use ixstore::IxError;
use ixstore::construct::ItemKind;
use ixstore::datatype::{Element, Key};
use ixstore::filter::Filters;
use ixstore::memory::MemoryBackend;
use ixstore::platform::Platform;
use ixstore::scenario::{Scenario, Solution};
use ixstore::timeseries::VersionSpec;

fn setup() -> Vec<Scenario> {
    let platforms = [
        Platform::in_memory().expect("sqlite platform"),
        Platform::new(Arc::new(MemoryBackend::new())),
    ];
    platforms
        .iter()
        .map(|platform| {
            platform.add_unit("km", "kilometre").unwrap();
            platform.add_unit("USD/km", "").unwrap();
            let mut scen = Scenario::new(platform, "transport", "items", VersionSpec::New).unwrap();
            scen.init_set("i", &[], None).unwrap();
            scen.add_set("i", ["seattle", "san-diego"]).unwrap();
            scen.init_set("j", &[], None).unwrap();
            scen.add_set("j", ["new-york", "chicago", "topeka"]).unwrap();
            scen
        })
        .collect()
}

#[test]
fn names_are_unique_across_kinds() {
    for mut scen in setup() {
        scen.init_par("d", &["i", "j"], None).unwrap();
        for kind in ItemKind::ALL {
            let err = scen.init_item(kind, "d", &["i"], None).unwrap_err();
            assert!(matches!(
                err,
                IxError::ItemExists { kind: ItemKind::Parameter, .. }
            ));
        }
        assert!(scen.has_par("d").unwrap());
        assert!(!scen.has_set("d").unwrap());
        assert!(!scen.has_item("nothing").unwrap());
    }
}

#[test]
fn declarations_check_their_index_sets() {
    for mut scen in setup() {
        let err = scen.init_par("p", &["k"], None).unwrap_err();
        assert!(matches!(err, IxError::InvalidDimensions { .. }));

        let err = scen.init_par("p", &["i", "i"], None).unwrap_err();
        assert!(matches!(err, IxError::InvalidDimensions { .. }));

        let err = scen.init_par("p", &["i", "j"], Some(&["from"])).unwrap_err();
        assert!(matches!(err, IxError::InvalidDimensions { .. }));

        let err = scen.init_set("s", &["s"], None).unwrap_err();
        assert!(matches!(err, IxError::InvalidDimensions { .. }));

        scen.init_par("q", &["i"], None).unwrap();
        let err = scen.init_par("p", &["q"], None).unwrap_err();
        assert!(matches!(err, IxError::InvalidDimensions { .. }));

        scen.init_set("ij", &["i", "j"], None).unwrap();
        let err = scen.init_par("p", &["ij"], None).unwrap_err();
        assert!(matches!(err, IxError::InvalidDimensions { .. }));

        // nothing half-declared is left behind
        assert!(!scen.has_item("p").unwrap());
    }
}

#[test]
fn parameters_validate_keys_and_units() {
    for mut scen in setup() {
        scen.init_par("d", &["i", "j"], None).unwrap();
        scen.add_par("d", [(["seattle", "new-york"], 2.5, "km")]).unwrap();

        let err = scen.add_par("d", [("seattle", 1.0, "km")]).unwrap_err();
        assert!(matches!(err, IxError::InvalidDimensions { .. }));

        let err = scen
            .add_par("d", [(["portland", "new-york"], 1.0, "km")])
            .unwrap_err();
        assert!(matches!(err, IxError::NotFound(_)));

        let err = scen
            .add_par("d", [(["seattle", "chicago"], 1.7, "miles")])
            .unwrap_err();
        assert!(matches!(err, IxError::UnknownUnit(u) if u == "miles"));

        // existing keys are overwritten
        scen.add_par("d", [(["seattle", "new-york"], 2.6, "km")]).unwrap();
        let d = scen.par("d", &Filters::new()).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d.value(["seattle", "new-york"]), Some((2.6, "km")));
    }
}

#[test]
fn batches_mix_overwrites_inserts_and_deletes() {
    for mut scen in setup() {
        scen.init_par("d", &["i", "j"], None).unwrap();
        scen.add_par(
            "d",
            [
                (["seattle", "new-york"], 1.0, "km"),
                (["seattle", "chicago"], 2.0, "km"),
            ],
        )
        .unwrap();
        scen.add_par(
            "d",
            [
                (["san-diego", "topeka"], 3.0, "km"),
                (["seattle", "new-york"], 4.0, "km"),
                (["san-diego", "topeka"], 5.0, "km"),
            ],
        )
        .unwrap();
        let d = scen.par("d", &Filters::new()).unwrap();
        let keys: Vec<&Key> = d.keys().collect();
        assert_eq!(
            keys,
            vec![
                &Key::from(["seattle", "new-york"]),
                &Key::from(["seattle", "chicago"]),
                &Key::from(["san-diego", "topeka"]),
            ]
        );
        assert_eq!(d.value(["seattle", "new-york"]), Some((4.0, "km")));
        assert_eq!(d.value(["san-diego", "topeka"]), Some((5.0, "km")));

        let doomed = [
            Key::from(["seattle", "chicago"]),
            Key::from(["san-diego", "topeka"]),
            Key::from(["seattle", "chicago"]),
        ];
        scen.remove_par("d", Some(&doomed)).unwrap();
        let d = scen.par("d", &Filters::new()).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d.value(["seattle", "new-york"]), Some((4.0, "km")));
    }
}

#[test]
fn named_dimensions_filter_and_index() {
    for mut scen in setup() {
        scen.init_par("dist", &["j", "j"], Some(&["from", "to"]))
            .unwrap();
        assert_eq!(scen.idx_sets("dist").unwrap(), vec!["j", "j"]);
        assert_eq!(scen.idx_names("dist").unwrap(), vec!["from", "to"]);
        scen.add_par(
            "dist",
            [
                (["new-york", "chicago"], 1145.0, "km"),
                (["new-york", "topeka"], 1900.0, "km"),
                (["chicago", "topeka"], 800.0, "km"),
            ],
        )
        .unwrap();

        let to_topeka = scen
            .par("dist", &Filters::new().with("to", ["topeka"]))
            .unwrap();
        assert_eq!(to_topeka.len(), 2);
        assert!(to_topeka.elements.iter().all(|e| e.key[1] == "topeka"));

        let err = scen
            .par("dist", &Filters::new().with("j", ["topeka"]))
            .unwrap_err();
        assert!(matches!(err, IxError::InvalidDimensions { .. }));

        assert_eq!(
            scen.item_index("dist", "from").unwrap(),
            vec!["new-york", "chicago"]
        );
        assert!(scen.item_index("dist", "via").is_err());
    }
}

#[test]
fn solution_items_are_written_by_the_solver_only() {
    for mut scen in setup() {
        scen.init_var("x", &["i", "j"], None).unwrap();
        scen.init_equ("supply", &["i"], None).unwrap();

        let err = scen
            .add_elements("x", vec![Element::solution(["seattle", "topeka"], 1.0, 0.0)])
            .unwrap_err();
        assert!(matches!(err, IxError::TypeError(_)));
        let err = scen
            .add_elements("i", vec![Element::parameter("portland", 1.0, "km")])
            .unwrap_err();
        assert!(matches!(err, IxError::TypeError(_)));

        assert!(!scen.has_solution().unwrap());
        let solution = Solution::new()
            .with("x", vec![Element::solution(["seattle", "topeka"], 50.0, 0.0)])
            .with("supply", vec![Element::solution("seattle", 350.0, 0.25)]);
        scen.write_solution(&solution).unwrap();
        assert!(scen.has_solution().unwrap());
        assert_eq!(
            scen.var("x", &Filters::new()).unwrap().level(["seattle", "topeka"]),
            Some((50.0, 0.0))
        );

        // a second solution replaces the first
        let solution = Solution::new()
            .with("x", vec![Element::solution(["san-diego", "chicago"], 20.0, 0.0)]);
        scen.write_solution(&solution).unwrap();
        let x = scen.var("x", &Filters::new()).unwrap();
        assert_eq!(x.len(), 1);
        assert!(x.level(["seattle", "topeka"]).is_none());

        let err = scen
            .remove_elements("x", Some(&[Key::from(["san-diego", "chicago"])]))
            .unwrap_err();
        assert!(matches!(err, IxError::TypeError(_)));

        scen.remove_solution(None).unwrap();
        assert!(!scen.has_solution().unwrap());
        assert!(scen.has_var("x").unwrap());
    }
}

#[test]
fn index_sets_cannot_be_removed_while_used() {
    for mut scen in setup() {
        scen.init_par("b", &["j"], None).unwrap();
        let err = scen.remove_set("j", None).unwrap_err();
        assert!(matches!(err, IxError::InvalidDimensions { .. }));

        scen.remove_set("j", Some(&[Key::from("topeka")])).unwrap();
        assert_eq!(
            scen.set("j", &Filters::new()).unwrap().labels(),
            vec!["new-york", "chicago"]
        );

        scen.remove_par("b", None).unwrap();
        scen.remove_set("j", None).unwrap();
        assert_eq!(scen.set_list().unwrap(), vec!["i"]);
    }
}

#[test]
fn scalars() {
    for mut scen in setup() {
        scen.init_scalar("f", 90.0, "USD/km").unwrap();
        assert_eq!(scen.scalar("f").unwrap(), (90.0, "USD/km".to_string()));
        scen.change_scalar("f", 100.0, "USD/km").unwrap();
        assert_eq!(scen.scalar("f").unwrap().0, 100.0);

        let err = scen.init_scalar("g", 1.0, "furlong").unwrap_err();
        assert!(matches!(err, IxError::UnknownUnit(_)));
        scen.init_par("b", &["j"], None).unwrap();
        assert!(matches!(
            scen.scalar("b").unwrap_err(),
            IxError::InvalidDimensions { .. }
        ));
        assert!(matches!(scen.scalar("i").unwrap_err(), IxError::TypeError(_)));
        assert_eq!(scen.par_list().unwrap(), vec!["f", "b"]);
    }
}

#[test]
fn committed_scenarios_refuse_writes() {
    for mut scen in setup() {
        scen.init_par("b", &["j"], None).unwrap();
        scen.commit("sets").unwrap();

        let err = scen.add_set("i", ["portland"]).unwrap_err();
        assert!(matches!(err, IxError::IllegalState(_)));
        let err = scen.init_set("k", &[], None).unwrap_err();
        assert!(matches!(err, IxError::IllegalState(_)));

        scen.check_out(false).unwrap();
        scen.add_set("i", ["portland"]).unwrap();
        scen.commit("more").unwrap();
        assert_eq!(scen.set("i", &Filters::new()).unwrap().len(), 3);
    }
}

#[test]
fn reads_see_the_working_copy_while_checked_out() {
    for mut scen in setup() {
        scen.commit("sets").unwrap();
        scen.check_out(false).unwrap();
        scen.add_set("i", ["portland"]).unwrap();
        assert_eq!(scen.set("i", &Filters::new()).unwrap().len(), 3);

        // any other handle keeps reading the committed labels
        let other = Scenario::new(scen.platform(), "transport", "items", 1i64).unwrap();
        assert_eq!(
            other.set("i", &Filters::new()).unwrap().labels(),
            vec!["seattle", "san-diego"]
        );
        assert_eq!(other.set_list().unwrap(), vec!["i", "j"]);

        scen.discard_changes().unwrap();
        assert_eq!(scen.set("i", &Filters::new()).unwrap().len(), 2);
        assert_eq!(other.set("i", &Filters::new()).unwrap().len(), 2);
    }
}
