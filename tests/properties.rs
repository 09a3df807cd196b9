use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use ixstore::cache::CachingBackend;
use ixstore::construct::{ItemData, ItemInfo, ItemKind};
use ixstore::datatype::{Element, Key};
use ixstore::filter::Filters;
use ixstore::memory::MemoryBackend;
use ixstore::platform::Platform;
use ixstore::scenario::Scenario;
use ixstore::timeseries::VersionSpec;

const LABELS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

fn setup(platform: &Platform) -> Scenario {
    platform.add_unit("t", "").unwrap();
    let mut scen = Scenario::new(platform, "model", "prop", VersionSpec::New).unwrap();
    scen.init_set("i", &[], None).unwrap();
    scen.add_set("i", LABELS).unwrap();
    scen.init_par("p", &["i", "i"], Some(&["from", "to"]))
        .unwrap();
    scen
}

fn pair() -> impl Strategy<Value = (usize, usize)> {
    (0..LABELS.len(), 0..LABELS.len())
}

#[derive(Clone, Debug)]
enum Op {
    Set(usize, usize, f64),
    Remove(usize, usize),
    Commit,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (pair(), -1e6..1e6f64).prop_map(|((f, t), v)| Op::Set(f, t, v)),
        1 => pair().prop_map(|(f, t)| Op::Remove(f, t)),
        1 => Just(Op::Commit),
    ]
}

fn key(from: usize, to: usize) -> Key {
    Key::from([LABELS[from], LABELS[to]])
}

proptest! {
    #[test]
    fn parameters_read_back_what_was_written(
        values in prop::collection::btree_map(pair(), -1e9..1e9f64, 0..20)
    ) {
        for platform in [
            Platform::in_memory().unwrap(),
            Platform::new(Arc::new(MemoryBackend::new())),
        ] {
            let mut scen = setup(&platform);
            scen.add_par(
                "p",
                values.iter().map(|((f, t), v)| (key(*f, *t), *v, "t")),
            )
            .unwrap();
            scen.commit("values").unwrap();
            let read = scen.par("p", &Filters::new()).unwrap();
            prop_assert_eq!(read.len(), values.len());
            for ((f, t), v) in &values {
                prop_assert_eq!(read.value(key(*f, *t)), Some((*v, "t")));
            }
        }
    }

    #[test]
    fn filtering_twice_changes_nothing(
        keys in prop::collection::vec(pair(), 0..30),
        wanted in prop::collection::vec(0..LABELS.len(), 0..4)
    ) {
        let mut data = ItemData::new(ItemInfo {
            name: "p".to_string(),
            kind: ItemKind::Set,
            idx_sets: vec!["i".to_string(), "i".to_string()],
            idx_names: vec!["from".to_string(), "to".to_string()],
        });
        data.elements = keys.iter().map(|(f, t)| Element::member(key(*f, *t))).collect();
        let filters = Filters::new().with("to", wanted.iter().map(|w| LABELS[*w]));
        let once = data.filtered(&filters);
        prop_assert_eq!(once.filtered(&filters), once.clone());
        prop_assert!(once.len() <= data.len());
        if wanted.is_empty() {
            prop_assert!(once.is_empty());
        } else {
            prop_assert!(once.elements.iter().all(|e| wanted.iter().any(|w| e.key[1] == LABELS[*w])));
        }
    }

    #[test]
    fn cached_reads_match_the_engine(ops in prop::collection::vec(op(), 1..25)) {
        let plain = Platform::new(Arc::new(MemoryBackend::new()));
        let cached = Platform::new(Arc::new(CachingBackend::new(Arc::new(MemoryBackend::new()))));
        let mut scenarios = [setup(&plain), setup(&cached)];
        let mut expected: BTreeMap<Key, f64> = BTreeMap::new();
        for op in &ops {
            for scen in scenarios.iter_mut() {
                match op {
                    Op::Set(f, t, v) => scen.add_par("p", [(key(*f, *t), *v, "t")]).unwrap(),
                    Op::Remove(f, t) => scen.remove_par("p", Some(&[key(*f, *t)])).unwrap(),
                    Op::Commit => {
                        scen.commit("step").unwrap();
                        scen.check_out(false).unwrap();
                    }
                }
            }
            match op {
                Op::Set(f, t, v) => {
                    expected.insert(key(*f, *t), *v);
                }
                Op::Remove(f, t) => {
                    expected.remove(&key(*f, *t));
                }
                Op::Commit => {}
            }
            let [left, right] = &scenarios;
            let left = left.par("p", &Filters::new()).unwrap();
            let right = right.par("p", &Filters::new()).unwrap();
            prop_assert_eq!(&left, &right);
            prop_assert_eq!(right.len(), expected.len());
            for (k, v) in &expected {
                prop_assert_eq!(right.value(k.clone()), Some((*v, "t")));
            }
        }
    }
}
