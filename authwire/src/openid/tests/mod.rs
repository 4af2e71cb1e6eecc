use super::*;
use crate::error::ProtocolError;

mod proptest_alias;

fn fields(pairs: &[(&str, &str)]) -> Fields {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
}

#[test]
fn test_sequential_default_aliases() {
    let mut aliases = AliasManager::new();
    assert_eq!(aliases.get_or_assign_alias("urn:a").unwrap(), "alias1");
    assert_eq!(aliases.get_or_assign_alias("urn:b").unwrap(), "alias2");
    assert_eq!(aliases.get_or_assign_alias("urn:a").unwrap(), "alias1");
    assert_eq!(aliases.resolve_alias("alias2").unwrap(), "urn:b");
    assert_eq!(aliases.aliases().collect::<Vec<_>>(), ["alias1", "alias2"]);
}

#[test]
fn test_default_alias_skips_claimed_names() {
    let mut aliases = AliasManager::new();
    aliases.set_alias("alias2", "urn:claimed").unwrap();
    assert_eq!(aliases.get_or_assign_alias("urn:new").unwrap(), "alias3");
}

#[test]
fn test_set_alias_rejects_either_side_taken() {
    let mut aliases = AliasManager::new();
    aliases.set_alias("sreg", "urn:ext:sreg").unwrap();
    let before = aliases.clone();

    assert!(matches!(
        aliases.set_alias("sreg", "urn:other"),
        Err(ProtocolError::AliasConflict { alias, .. }) if alias == "sreg"
    ));
    assert!(matches!(
        aliases.set_alias("other", "urn:ext:sreg"),
        Err(ProtocolError::AliasConflict { type_uri, .. }) if type_uri == "urn:ext:sreg"
    ));
    assert_eq!(aliases, before);
}

#[test]
fn test_empty_alias_or_type_uri_is_invalid() {
    let mut aliases = AliasManager::new();
    assert!(matches!(aliases.set_alias("", "urn:a"), Err(ProtocolError::InvalidInput(_))));
    assert!(matches!(aliases.set_alias("a", ""), Err(ProtocolError::InvalidInput(_))));
    assert!(matches!(aliases.get_or_assign_alias(""), Err(ProtocolError::InvalidInput(_))));
    assert!(aliases.is_empty());
}

#[test]
fn test_unknown_alias() {
    let aliases = AliasManager::new();
    assert!(matches!(aliases.resolve_alias("nope"), Err(ProtocolError::UnknownAlias(a)) if a == "nope"));
    assert_eq!(aliases.try_resolve_alias("nope"), None);
}

#[test]
fn test_preferred_aliases_win_when_free() {
    let mut aliases = AliasManager::new();
    aliases
        .assign_aliases(&["urn:x", SREG_TYPE_URI, PAPE_TYPE_URI], &AliasAffinity::default())
        .unwrap();
    assert_eq!(aliases.alias_of(SREG_TYPE_URI), Some("sreg"));
    assert_eq!(aliases.alias_of(PAPE_TYPE_URI), Some("pape"));
    assert_eq!(aliases.alias_of("urn:x"), Some("alias3"));
}

#[test]
fn test_taken_preference_falls_back_to_numbering() {
    let mut aliases = AliasManager::new();
    aliases.set_alias("sreg", "urn:someone-else").unwrap();
    aliases.assign_aliases(&[SREG_TYPE_URI, "urn:x"], &AliasAffinity::default()).unwrap();
    assert_eq!(aliases.alias_of("urn:someone-else"), Some("sreg"));
    assert_eq!(aliases.alias_of(SREG_TYPE_URI), Some("alias2"));
    assert_eq!(aliases.alias_of("urn:x"), Some("alias3"));
}

#[test]
fn test_shared_preference_goes_to_first_requester() {
    let preferred = AliasAffinity::empty().with("urn:a", "x").with("urn:b", "x");
    let mut aliases = AliasManager::new();
    aliases.assign_aliases(&["urn:b", "urn:a"], &preferred).unwrap();
    assert_eq!(aliases.alias_of("urn:b"), Some("x"));
    assert_eq!(aliases.alias_of("urn:a"), Some("alias2"));
}

#[test]
fn test_existing_assignment_is_kept() {
    let mut aliases = AliasManager::new();
    aliases.set_alias("mine", SREG_TYPE_URI).unwrap();
    aliases.assign_aliases(&[SREG_TYPE_URI], &AliasAffinity::default()).unwrap();
    assert_eq!(aliases.alias_of(SREG_TYPE_URI), Some("mine"));
    assert!(!aliases.is_alias_used("sreg"));
}

#[test]
fn test_detect_version() {
    assert_eq!(detect_version(&Fields::new()).unwrap(), V11);
    assert_eq!(detect_version(&fields(&[("openid.ns", V20_NAMESPACE)])).unwrap(), V20);
    assert_eq!(
        detect_version(&fields(&[("openid.ns", "http://openid.net/signon/1.0")])).unwrap(),
        V10
    );
    assert!(matches!(
        detect_version(&fields(&[("openid.ns", "urn:nonsense")])),
        Err(ProtocolError::MalformedField { .. })
    ));
}

#[test]
fn test_incoming_extensions_grouped_by_type_uri() {
    let manager = ExtensionArgumentsManager::from_incoming(&fields(&[
        ("arg1", "val1"),
        ("openid.qq.k1", "v1"),
        ("openid.ns.qq", "QQExtTypeUri"),
        ("openid.ns.ss", "SSExtTypeUri"),
        ("openid.ss.k2", "v2"),
        ("openid.ns.mt", "MTExtTypeUri"),
        ("openid.mode", "id_res"),
    ]))
    .unwrap();

    assert!(manager.contains_extension("QQExtTypeUri"));
    assert!(manager.contains_extension("SSExtTypeUri"));
    assert!(!manager.contains_extension("MTExtTypeUri"));
    assert_eq!(manager.extension_arguments("MTExtTypeUri"), None);
    assert_eq!(manager.extension_arguments("QQExtTypeUri"), Some(&fields(&[("k1", "v1")])));
    assert_eq!(manager.extension_arguments("SSExtTypeUri"), Some(&fields(&[("k2", "v2")])));
    assert_eq!(manager.extension_type_uris().collect::<Vec<_>>(), ["QQExtTypeUri", "SSExtTypeUri"]);
}

#[test]
fn test_legacy_shorthand_resolved_below_2_0() {
    let legacy = ExtensionArgumentsManager::from_incoming(&fields(&[
        ("openid.mode", "id_res"),
        ("openid.sreg.nickname", "bob"),
        ("openid.pape", "bare"),
    ]))
    .unwrap();
    assert_eq!(legacy.version(), V11);
    assert_eq!(legacy.extension_arguments(SREG_TYPE_URI), Some(&fields(&[("nickname", "bob")])));
    assert_eq!(legacy.extension_arguments(PAPE_TYPE_URI), Some(&fields(&[("", "bare")])));

    let modern = ExtensionArgumentsManager::from_incoming(&fields(&[
        ("openid.ns", V20_NAMESPACE),
        ("openid.sreg.nickname", "bob"),
    ]))
    .unwrap();
    assert_eq!(modern.version(), V20);
    assert!(!modern.contains_extension(SREG_TYPE_URI));
    assert!(modern.aliases().is_empty());
}

#[test]
fn test_peer_claimed_shorthand_is_not_overridden() {
    let manager = ExtensionArgumentsManager::from_incoming(&fields(&[
        ("openid.ns.sreg", "urn:custom"),
        ("openid.sreg.x", "1"),
    ]))
    .unwrap();
    assert_eq!(manager.extension_arguments("urn:custom"), Some(&fields(&[("x", "1")])));
    assert!(!manager.contains_extension(SREG_TYPE_URI));
    assert_eq!(manager.aliases().alias_of(PAPE_TYPE_URI), Some("pape"));
}

#[test]
fn test_incoming_declaration_errors() {
    assert!(matches!(
        ExtensionArgumentsManager::from_incoming(&fields(&[("openid.ns.a", "urn:x"), ("openid.ns.b", "urn:x")])),
        Err(ProtocolError::AliasConflict { .. })
    ));
    assert!(matches!(
        ExtensionArgumentsManager::from_incoming(&fields(&[("openid.ns.a", "")])),
        Err(ProtocolError::MalformedMessage(_))
    ));
}

#[test]
fn test_repeated_extension_argument_is_malformed() {
    let error = ExtensionArgumentsManager::from_incoming(&fields(&[
        ("openid.ns", V20_NAMESPACE),
        ("openid.ns.ext", "urn:ext"),
        ("openid.ext", "bare"),
        ("openid.ext.", "trailing"),
    ]))
    .unwrap_err();
    assert!(matches!(error, ProtocolError::MalformedMessage(ref m) if m.contains("urn:ext")));

    let distinct = ExtensionArgumentsManager::from_incoming(&fields(&[
        ("openid.ns.ext", "urn:ext"),
        ("openid.ext.a", "1"),
        ("openid.ext.b", "2"),
    ]))
    .unwrap();
    assert_eq!(distinct.extension_arguments("urn:ext").map(Fields::len), Some(2));
}

#[test]
fn test_outgoing_with_preferred_alias() {
    let mut manager = ExtensionArgumentsManager::for_outgoing_with(
        V20,
        AliasAffinity::empty().with("urn:ext:sreg", "sreg"),
    );
    manager.add_extension_arguments("urn:ext:sreg", fields(&[("nickname", "bob")])).unwrap();

    assert_eq!(
        manager.arguments_to_send(true).unwrap(),
        fields(&[("openid.ns.sreg", "urn:ext:sreg"), ("openid.sreg.nickname", "bob")])
    );
    assert_eq!(
        manager.arguments_to_send(false).unwrap(),
        fields(&[("ns.sreg", "urn:ext:sreg"), ("sreg.nickname", "bob")])
    );
}

#[test]
fn test_outgoing_numbering_and_bare_key() {
    let mut manager = ExtensionArgumentsManager::for_outgoing(V20);
    manager.add_extension_arguments("urn:a", fields(&[("", "flag")])).unwrap();
    manager.add_extension_arguments(PAPE_TYPE_URI, fields(&[("max_auth_age", "60")])).unwrap();

    let sent = manager.arguments_to_send(true).unwrap();
    assert_eq!(sent.get("openid.ns.alias2").map(String::as_str), Some("urn:a"));
    assert_eq!(sent.get("openid.alias2").map(String::as_str), Some("flag"));
    assert_eq!(sent.get("openid.ns.pape").map(String::as_str), Some(PAPE_TYPE_URI));
    assert_eq!(sent.get("openid.pape.max_auth_age").map(String::as_str), Some("60"));
}

#[test]
fn test_extension_added_once() {
    let mut manager = ExtensionArgumentsManager::for_outgoing(V20);
    manager.add_extension_arguments("urn:a", Fields::new()).unwrap();
    manager.add_extension_arguments("urn:a", fields(&[("k", "v")])).unwrap();
    assert!(matches!(
        manager.add_extension_arguments("urn:a", fields(&[("k2", "v2")])),
        Err(ProtocolError::DuplicateExtension(uri)) if uri == "urn:a"
    ));
    assert!(matches!(
        manager.add_extension_arguments("", fields(&[("k", "v")])),
        Err(ProtocolError::InvalidInput(_))
    ));
}

#[test]
fn test_empty_arguments_are_not_sent() {
    let mut manager = ExtensionArgumentsManager::for_outgoing(V20);
    manager.add_extension_arguments("urn:a", Fields::new()).unwrap();
    assert!(manager.arguments_to_send(true).unwrap().is_empty());
    assert!(manager.aliases().is_empty());
}

#[test]
fn test_written_arguments_read_back() {
    let mut writer = ExtensionArgumentsManager::for_outgoing(V20);
    writer.add_extension_arguments(SREG_TYPE_URI, fields(&[("nickname", "bob"), ("email", "b@ex")])).unwrap();
    writer.add_extension_arguments("urn:ext:ax", fields(&[("mode", "fetch_request")])).unwrap();

    let mut wire = fields(&[("openid.ns", V20_NAMESPACE), ("openid.mode", "checkid_setup")]);
    wire.extend(writer.arguments_to_send(true).unwrap());

    let reader = ExtensionArgumentsManager::from_incoming(&wire).unwrap();
    assert_eq!(
        reader.extension_arguments(SREG_TYPE_URI),
        Some(&fields(&[("nickname", "bob"), ("email", "b@ex")]))
    );
    assert_eq!(reader.extension_arguments("urn:ext:ax"), Some(&fields(&[("mode", "fetch_request")])));
}
