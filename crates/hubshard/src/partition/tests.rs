use super::*;
use proptest::prelude::*;

fn spec(regex: &str, name: &str) -> PartitionSpec {
    PartitionSpec {
        partition_regex: regex.to_string(),
        name: name.to_string(),
        endpoint: format!("sb://{name}.example.net"),
    }
}

fn four_way() -> Vec<PartitionSpec> {
    vec![
        spec("^[0-3]", "nh1"),
        spec("^[4-7]", "nh2"),
        spec("^[8-b]", "nh3"),
        spec("^[c-f]", "nh4"),
    ]
}

fn id(raw: &str) -> InstallationId {
    InstallationId::parse(raw).unwrap()
}

#[test]
fn routes_by_leading_digit() {
    let table = PartitionTable::new(&four_way()).unwrap();
    assert_eq!(table.route(&id("0abc")).unwrap().name, "nh1");
    assert_eq!(table.route(&id("3fff")).unwrap().name, "nh1");
    assert_eq!(table.route(&id("4000")).unwrap().name, "nh2");
    assert_eq!(table.route(&id("a123")).unwrap().name, "nh3");
    assert_eq!(table.route(&id("F123")).unwrap().name, "nh4");
}

#[test]
fn accepts_two_digit_predicates() {
    let table = PartitionTable::new(&[
        spec("^0[0-7]", "low-zero"),
        spec("^0[89a-f]", "high-zero"),
        spec("^[1-9a-f]", "rest"),
    ])
    .unwrap();
    assert_eq!(table.route(&id("07ff")).unwrap().name, "low-zero");
    assert_eq!(table.route(&id("08ff")).unwrap().name, "high-zero");
    assert_eq!(table.route(&id("10")).unwrap().name, "rest");
}

#[test]
fn rejects_empty_table() {
    assert_eq!(
        PartitionTable::new(&[]).unwrap_err(),
        ConfigError::EmptyPartitionTable
    );
}

#[test]
fn rejects_unanchored_predicate() {
    let mut specs = four_way();
    specs[2] = spec("[8-b]", "nh3");
    assert!(matches!(
        PartitionTable::new(&specs),
        Err(ConfigError::UnanchoredPartition { name, .. }) if name == "nh3"
    ));
}

#[test]
fn rejects_invalid_regex() {
    let mut specs = four_way();
    specs[0] = spec("^[0-3", "nh1");
    assert!(matches!(
        PartitionTable::new(&specs),
        Err(ConfigError::InvalidRegex { .. })
    ));
}

#[test]
fn rejects_overlap() {
    let mut specs = four_way();
    specs[1] = spec("^[3-7]", "nh2");
    assert_eq!(
        PartitionTable::new(&specs).unwrap_err(),
        ConfigError::OverlappingPartitions {
            first: "nh1".to_string(),
            second: "nh2".to_string(),
            prefix: "30".to_string(),
        }
    );
}

#[test]
fn rejects_gap() {
    let mut specs = four_way();
    specs[3] = spec("^[c-e]", "nh4");
    assert_eq!(
        PartitionTable::new(&specs).unwrap_err(),
        ConfigError::UncoveredPrefix {
            prefix: "f0".to_string()
        }
    );
}

#[test]
fn rejects_gap_in_second_digit() {
    let specs = vec![spec("^0[0-7]", "a"), spec("^[1-9a-f]", "b")];
    assert_eq!(
        PartitionTable::new(&specs).unwrap_err(),
        ConfigError::UncoveredPrefix {
            prefix: "08".to_string()
        }
    );
}

#[test]
fn unanchored_alternative_is_caught_as_overlap() {
    let specs = vec![spec("^[0-7]|a$", "nh1"), spec("^[8-f]", "nh2")];
    assert_eq!(
        PartitionTable::new(&specs).unwrap_err(),
        ConfigError::OverlappingPartitions {
            first: "nh1".to_string(),
            second: "nh2".to_string(),
            prefix: "8a".to_string(),
        }
    );
}

#[test]
fn digits_past_the_prefix_never_affect_routing() {
    let table = PartitionTable::new(&four_way()).unwrap();
    let nh1 = &table.partitions()[0];
    assert!(nh1.matches("0"));
    assert!(nh1.matches("0fffffff"));

    // `$` after two digits only ever sees the prefix.
    let table = PartitionTable::new(&[spec("^[0-7][0-9a-f]$", "a"), spec("^[8-f]", "b")]).unwrap();
    assert_eq!(table.route(&id("7f123456")).unwrap().name, "a");
}

#[test]
fn rejects_predicates_on_the_third_digit() {
    let specs = vec![
        spec("^00[0-3]", "low"),
        spec("^00[c-f]", "high"),
        spec("^(0[1-9a-f]|[1-9a-f])", "rest"),
    ];
    assert_eq!(
        PartitionTable::new(&specs).unwrap_err(),
        ConfigError::UncoveredPrefix {
            prefix: "00".to_string()
        }
    );
}

#[test]
fn rejects_partition_owning_no_prefix() {
    let mut specs = four_way();
    specs.push(spec("^0[0-7]0", "dead"));
    assert!(matches!(
        PartitionTable::new(&specs),
        Err(ConfigError::UnreachablePartition { name, .. }) if name == "dead"
    ));
}

#[test]
fn rejects_overlap_on_short_ids() {
    let specs = vec![
        spec("^0[0-9a-f]?$", "zero"),
        spec("^[0-9a-f]$", "short"),
        spec("^[1-9a-f][0-9a-f]", "rest"),
    ];
    assert_eq!(
        PartitionTable::new(&specs).unwrap_err(),
        ConfigError::OverlappingPartitions {
            first: "zero".to_string(),
            second: "short".to_string(),
            prefix: "0".to_string(),
        }
    );
}

#[test]
fn short_id_under_two_digit_split_is_unroutable() {
    let table = PartitionTable::new(&[
        spec("^0[0-7]", "low-zero"),
        spec("^0[89a-f]", "high-zero"),
        spec("^[1-9a-f]", "rest"),
    ])
    .unwrap();
    assert!(table.route(&id("0")).is_err());
    assert_eq!(table.route(&id("1")).unwrap().name, "rest");
}

#[test]
fn rejects_duplicate_backend_names() {
    let mut specs = four_way();
    specs[3].name = "nh1".to_string();
    assert_eq!(
        PartitionTable::new(&specs).unwrap_err(),
        ConfigError::DuplicateBackend {
            name: "nh1".to_string()
        }
    );
}

#[test]
fn rejects_blank_endpoint() {
    let mut specs = four_way();
    specs[0].endpoint = "  ".to_string();
    assert!(matches!(
        PartitionTable::new(&specs),
        Err(ConfigError::InvalidBackend { .. })
    ));
}

proptest! {
    #[test]
    fn exactly_one_partition_matches(raw in "[0-9a-fA-F]{1,64}") {
        let table = PartitionTable::new(&four_way()).unwrap();
        let installation = id(&raw);
        let matching = table
            .partitions()
            .iter()
            .filter(|p| p.matches(installation.as_str()))
            .count();
        prop_assert_eq!(matching, 1);
        prop_assert!(table.route(&installation).is_ok());
    }

    #[test]
    fn routing_ignores_digits_past_the_prefix(
        head in "[0-9a-f]{2}",
        a in "[0-9a-f]{0,62}",
        b in "[0-9a-f]{0,62}",
    ) {
        let table = PartitionTable::new(&[
            spec("^0[0-7]", "low-zero"),
            spec("^0[89a-f]", "high-zero"),
            spec("^[1-9a-f]", "rest"),
        ])
        .unwrap();
        let left = id(&format!("{head}{a}"));
        let right = id(&format!("{head}{b}"));
        prop_assert_eq!(table.route(&left).unwrap(), table.route(&right).unwrap());
    }

    #[test]
    fn routing_is_deterministic(raw in "[0-9a-f]{64}") {
        let table = PartitionTable::new(&four_way()).unwrap();
        let installation = id(&raw);
        prop_assert_eq!(table.route(&installation), table.route(&installation));
    }
}
