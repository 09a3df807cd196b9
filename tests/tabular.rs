use ixstore::IxError;
use ixstore::construct::ItemKind;
use ixstore::datatype::{Element, Key};
use ixstore::filter::Filters;
use ixstore::platform::Platform;
use ixstore::scenario::{ReadOptions, Scenario, Solution};
use ixstore::tabular::{Cell, TYPE_MAPPING, Table};
use ixstore::timeseries::VersionSpec;

fn setup() -> Scenario {
    let platform = Platform::in_memory().expect("sqlite platform");
    platform.add_unit("cases", "").unwrap();
    platform.add_unit("km", "").unwrap();
    let mut scen = Scenario::new(&platform, "transport", "tables", VersionSpec::New).unwrap();
    scen.init_set("i", &[], None).unwrap();
    scen.add_set("i", ["seattle", "san-diego"]).unwrap();
    scen.init_set("j", &[], None).unwrap();
    scen.add_set("j", ["new-york", "chicago"]).unwrap();
    scen.init_par("a", &["i"], None).unwrap();
    scen.add_par("a", [("seattle", 350.0, "cases"), ("san-diego", 600.0, "cases")])
        .unwrap();
    scen.init_par("d", &["i", "j"], None).unwrap();
    scen.add_par("d", [(["seattle", "chicago"], 1.7, "km")]).unwrap();
    scen.init_scalar("f", 90.0, "-").unwrap();
    scen.init_var("z", &[], None).unwrap();
    scen.init_var("x", &["i", "j"], None).unwrap();
    scen.write_solution(
        &Solution::new()
            .with("z", vec![Element::solution(Key::scalar(), 153.675, 0.0)])
            .with("x", vec![Element::solution(["seattle", "chicago"], 300.0, 0.0)]),
    )
    .unwrap();
    scen
}

fn numbered(rows: usize) -> Table {
    let mut table = Table::new("k", ["k"]);
    for n in 0..rows {
        table.push_row(vec![Cell::from(format!("k{}", n))]);
    }
    table
}

#[test]
fn long_tables_split_into_numbered_parts() {
    let table = numbered(5);
    let parts = table.split(2);
    let names: Vec<&str> = parts.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["k", "k(2)", "k(3)"]);
    assert_eq!(parts[2].len(), 1);
    assert_eq!(table.split(5).len(), 1);
    assert_eq!(Table::new("empty", ["x"]).split(2).len(), 1);

    assert_eq!(Table::base_name("k(3)"), "k");
    assert_eq!(Table::base_name("k"), "k");
    assert_eq!(Table::base_name("cost(total)"), "cost(total)");
    assert_eq!(Table::base_name("k()"), "k()");

    let merged = Table::merge(&parts).unwrap();
    assert_eq!(merged, vec![table]);
}

#[test]
fn parts_must_agree_on_columns() {
    let mut parts = numbered(4).split(2);
    parts[1].columns = vec!["other".to_string()];
    assert!(matches!(
        Table::merge(&parts).unwrap_err(),
        IxError::InvalidDimensions { .. }
    ));
}

#[test]
fn cells_convert() {
    assert_eq!(Cell::from("2.5").as_number().unwrap(), 2.5);
    assert!(matches!(
        Cell::from("many").as_number().unwrap_err(),
        IxError::TypeError(_)
    ));
    assert_eq!(Cell::from(3.0).as_text(), "3");
    assert_eq!(Cell::from("seattle").to_string(), "seattle");
}

#[test]
fn tables_carry_items_and_kinds() {
    let scen = setup();
    let tables = scen.to_tables().unwrap();
    assert_eq!(tables[0].name, TYPE_MAPPING);
    let kinds = tables[0].read_type_mapping().unwrap();
    assert_eq!(kinds["a"], ItemKind::Parameter);
    assert_eq!(kinds["x"], ItemKind::Variable);
    assert_eq!(kinds.len(), 7);

    let d = tables.iter().find(|t| t.name == "d").unwrap();
    assert_eq!(d.columns, vec!["i", "j", "value", "unit"]);
    assert_eq!(
        d.rows,
        vec![vec![
            Cell::from("seattle"),
            Cell::from("chicago"),
            Cell::Number(1.7),
            Cell::from("km"),
        ]]
    );
    let x = tables.iter().find(|t| t.name == "x").unwrap();
    assert_eq!(x.columns, vec!["i", "j", "lvl", "mrg"]);
}

#[test]
fn tables_read_back_into_a_new_scenario() {
    let scen = setup();
    let tables = scen.to_tables().unwrap();

    let mut copy = Scenario::new(scen.platform(), "transport", "read", VersionSpec::New).unwrap();
    copy.read_tables(&tables, &ReadOptions::default()).unwrap();
    copy.commit("read").unwrap();

    assert_eq!(copy.set_list().unwrap(), vec!["i", "j"]);
    assert_eq!(copy.idx_sets("d").unwrap(), vec!["i", "j"]);
    assert_eq!(
        copy.par("a", &Filters::new()).unwrap(),
        scen.par("a", &Filters::new()).unwrap()
    );
    assert_eq!(copy.scalar("f").unwrap(), (90.0, "-".to_string()));
    assert_eq!(
        copy.var("z", &Filters::new()).unwrap().level(Key::scalar()),
        Some((153.675, 0.0))
    );
    assert_eq!(
        copy.var("x", &Filters::new()).unwrap().level(["seattle", "chicago"]),
        Some((300.0, 0.0))
    );
}

#[test]
fn units_are_registered_on_request() {
    let scen = setup();
    let tables = scen.to_tables().unwrap();
    let elsewhere = Platform::in_memory().unwrap();

    let mut strict = Scenario::new(&elsewhere, "transport", "strict", VersionSpec::New).unwrap();
    assert!(matches!(
        strict.read_tables(&tables, &ReadOptions::default()).unwrap_err(),
        IxError::UnknownUnit(_)
    ));

    let mut lenient = Scenario::new(&elsewhere, "transport", "lenient", VersionSpec::New).unwrap();
    lenient
        .read_tables(
            &tables,
            &ReadOptions {
                add_units: true,
                ..ReadOptions::default()
            },
        )
        .unwrap();
    assert!(elsewhere.units().unwrap().contains("cases"));
    assert_eq!(lenient.par("d", &Filters::new()).unwrap().len(), 1);
}

#[test]
fn repeated_index_sets_need_a_declaration() {
    let platform = Platform::in_memory().unwrap();
    platform.add_unit("km", "").unwrap();
    let mut scen = Scenario::new(&platform, "transport", "dist", VersionSpec::New).unwrap();
    scen.init_set("j", &[], None).unwrap();
    scen.add_set("j", ["new-york", "chicago"]).unwrap();
    scen.init_par("dist", &["j", "j"], Some(&["from", "to"]))
        .unwrap();
    scen.add_par("dist", [(["new-york", "chicago"], 1145.0, "km")])
        .unwrap();
    let tables = scen.to_tables().unwrap();

    let mut undeclared = Scenario::new(&platform, "transport", "bare", VersionSpec::New).unwrap();
    assert!(matches!(
        undeclared.read_tables(&tables, &ReadOptions::default()).unwrap_err(),
        IxError::InvalidDimensions { .. }
    ));

    let mut declared = Scenario::new(&platform, "transport", "declared", VersionSpec::New).unwrap();
    declared.init_set("j", &[], None).unwrap();
    declared
        .init_par("dist", &["j", "j"], Some(&["from", "to"]))
        .unwrap();
    declared
        .read_tables(&tables, &ReadOptions::default())
        .unwrap();
    assert_eq!(
        declared
            .par("dist", &Filters::new().with("to", ["chicago"]))
            .unwrap()
            .value(["new-york", "chicago"]),
        Some((1145.0, "km"))
    );
}

#[test]
fn tables_without_a_kind_are_refused() {
    let mut scen = Scenario::new(
        &Platform::in_memory().unwrap(),
        "transport",
        "kinds",
        VersionSpec::New,
    )
    .unwrap();
    let mut table = Table::new("mystery", ["mystery"]);
    table.push_row(vec![Cell::from("?")]);
    assert!(matches!(
        scen.read_tables(&[table], &ReadOptions::default()).unwrap_err(),
        IxError::TypeError(_)
    ));
}
