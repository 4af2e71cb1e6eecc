use std::collections::HashSet;

use proptest::prelude::*;

use crate::openid::{AliasAffinity, AliasManager};

#[derive(Debug, Clone)]
enum Op {
    GetOrAssign(String),
    Set(String, String),
    AssignAll(Vec<String>),
}

fn op() -> impl Strategy<Value = Op> {
    let uri = "urn:ext:[a-d]";
    let alias = prop_oneof!["[a-c]", Just("sreg".to_owned()), Just("alias1".to_owned()), Just("alias2".to_owned())];
    prop_oneof![
        uri.prop_map(Op::GetOrAssign),
        (alias, uri).prop_map(|(a, u)| Op::Set(a, u)),
        proptest::collection::vec(uri, 0..4).prop_map(Op::AssignAll),
    ]
}

fn assert_bijection(aliases: &AliasManager) -> Result<(), TestCaseError> {
    let mut seen_uris = HashSet::new();
    for (alias, uri) in aliases.iter() {
        prop_assert_eq!(aliases.alias_of(uri), Some(alias));
        prop_assert_eq!(aliases.try_resolve_alias(alias), Some(uri));
        prop_assert!(seen_uris.insert(uri.to_owned()), "type URI {} mapped twice", uri);
    }
    prop_assert_eq!(seen_uris.len(), aliases.len());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn test_maps_stay_mutual_inverses(ops in proptest::collection::vec(op(), 0..24)) {
        let preferred = AliasAffinity::empty().with("urn:ext:a", "sreg").with("urn:ext:b", "a");
        let mut aliases = AliasManager::new();
        for op in ops {
            let before = aliases.clone();
            match op {
                Op::GetOrAssign(uri) => {
                    let alias = aliases.get_or_assign_alias(&uri).unwrap();
                    prop_assert_eq!(aliases.try_resolve_alias(&alias), Some(uri.as_str()));
                    if let Some(previous) = before.alias_of(&uri) {
                        prop_assert_eq!(previous, alias.as_str());
                    }
                }
                Op::Set(alias, uri) => {
                    let taken = before.is_alias_used(&alias) || before.is_alias_assigned_to(&uri);
                    let result = aliases.set_alias(&alias, &uri);
                    prop_assert_eq!(result.is_err(), taken);
                    if taken {
                        prop_assert_eq!(&aliases, &before);
                    }
                }
                Op::AssignAll(uris) => {
                    aliases.assign_aliases(&uris, &preferred).unwrap();
                    for uri in &uris {
                        prop_assert!(aliases.is_alias_assigned_to(uri));
                    }
                    for (alias, uri) in before.iter() {
                        prop_assert_eq!(aliases.try_resolve_alias(alias), Some(uri));
                    }
                }
            }
            assert_bijection(&aliases)?;
        }
    }
}
