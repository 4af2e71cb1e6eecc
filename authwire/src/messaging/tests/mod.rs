//! Shared fixtures for messaging tests.

use std::any::Any;

use chrono::{DateTime, Utc};

use crate::{
    message_parts,
    messaging::{
        DescriptionCache, Fields, MessageDictionary, MessageProtections, MessageTransport,
        ProtocolMessage, ProtocolVersion, part,
    },
    ProtocolError,
};

mod proptest_dictionary;

pub(super) const SAMPLE_V1: ProtocolVersion = ProtocolVersion::new(1, 0, 0);
pub(super) const SAMPLE_V2: ProtocolVersion = ProtocolVersion::new(2, 0, 0);

/// Message exercising every slot kind.
#[derive(Debug, Default)]
pub(super) struct Sample {
    pub(super) version: Option<ProtocolVersion>,
    pub(super) handle: String,
    pub(super) mode: String,
    pub(super) issued: Option<DateTime<Utc>>,
    pub(super) retries: Option<u32>,
    pub(super) legacy: Option<String>,
    pub(super) extra: Fields,
}

message_parts!(Sample {
    handle => part("sample.handle").required(),
    mode => part("sample.mode").required().allow_empty(),
    issued => part("sample.issued"),
    retries => part("sample.retries"),
    legacy => part("sample.legacy").until(SAMPLE_V1),
} constants {
    part("sample.kind").required().constant("sample"),
});

impl ProtocolMessage for Sample {
    fn type_name(&self) -> &'static str {
        "Sample"
    }

    fn version(&self) -> ProtocolVersion {
        self.version.unwrap_or(SAMPLE_V2)
    }

    fn transport(&self) -> MessageTransport {
        MessageTransport::Direct
    }

    fn required_protection(&self) -> MessageProtections {
        MessageProtections::NONE
    }

    fn extra_data(&self) -> &Fields {
        &self.extra
    }

    fn extra_data_mut(&mut self) -> &mut Fields {
        &mut self.extra
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

pub(super) fn fields(pairs: &[(&str, &str)]) -> Fields {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
}

#[test]
fn test_missing_required_fields_reported_together() {
    let cache = DescriptionCache::new();
    let mut sample = Sample::default();
    let mut dictionary = MessageDictionary::new(&mut sample, &cache).unwrap();
    let error = dictionary.from_map(&fields(&[("sample.retries", "2")])).unwrap_err();
    match error {
        ProtocolError::RequiredFieldsMissing { message_type, fields } => {
            assert_eq!(message_type, "Sample");
            assert_eq!(fields, vec!["sample.handle", "sample.mode", "sample.kind"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_empty_required_field_rejected_unless_allowed() {
    let cache = DescriptionCache::new();
    let mut sample = Sample::default();
    let mut dictionary = MessageDictionary::new(&mut sample, &cache).unwrap();
    let error = dictionary
        .from_map(&fields(&[("sample.handle", ""), ("sample.mode", ""), ("sample.kind", "sample")]))
        .unwrap_err();
    assert!(
        matches!(error, ProtocolError::EmptyFields { ref fields, .. } if fields == &vec!["sample.handle".to_owned()])
    );
}

#[test]
fn test_constant_mismatch_detected() {
    let cache = DescriptionCache::new();
    let mut sample = Sample::default();
    let mut dictionary = MessageDictionary::new(&mut sample, &cache).unwrap();
    let error = dictionary
        .from_map(&fields(&[("sample.handle", "h"), ("sample.mode", "m"), ("sample.kind", "other")]))
        .unwrap_err();
    assert!(matches!(error, ProtocolError::ConstantMismatch { ref field, .. } if field == "sample.kind"));
}

#[test]
fn test_undecodable_value_names_field() {
    let cache = DescriptionCache::new();
    let mut sample = Sample::default();
    let mut dictionary = MessageDictionary::new(&mut sample, &cache).unwrap();
    let error = dictionary
        .from_map(&fields(&[
            ("sample.handle", "h"),
            ("sample.mode", "m"),
            ("sample.kind", "sample"),
            ("sample.retries", "many"),
        ]))
        .unwrap_err();
    assert!(matches!(error, ProtocolError::MalformedField { ref field, .. } if field == "sample.retries"));
}

#[test]
fn test_get_set_route_to_parts_and_extra_data() {
    let cache = DescriptionCache::new();
    let mut sample = Sample::default();
    {
        let mut dictionary = MessageDictionary::new(&mut sample, &cache).unwrap();
        dictionary.set("sample.handle", Some("h-1")).unwrap();
        dictionary.set("sample.retries", Some("3")).unwrap();
        dictionary.set("custom", Some("x")).unwrap();
        assert_eq!(dictionary.get("sample.kind").as_deref(), Some("sample"));
        assert_eq!(dictionary.get("custom").as_deref(), Some("x"));
    }
    assert_eq!(sample.handle, "h-1");
    assert_eq!(sample.retries, Some(3));
    assert_eq!(sample.extra.get("custom").map(String::as_str), Some("x"));
}

#[test]
fn test_clearing_extra_data_removes_key() {
    let cache = DescriptionCache::new();
    let mut sample = Sample::default();
    let mut dictionary = MessageDictionary::new(&mut sample, &cache).unwrap();
    dictionary.set("custom", Some("x")).unwrap();
    dictionary.set("custom", None).unwrap();
    assert!(!dictionary.contains_key("custom"));
    assert!(!dictionary.to_map().contains_key("custom"));
}

#[test]
fn test_add_refuses_duplicate_values() {
    let cache = DescriptionCache::new();
    let mut sample = Sample::default();
    let mut dictionary = MessageDictionary::new(&mut sample, &cache).unwrap();
    dictionary.add("sample.handle", "h").unwrap();
    assert!(dictionary.add("sample.handle", "again").is_err());
    dictionary.add("custom", "x").unwrap();
    assert!(dictionary.add("custom", "y").is_err());
    assert_eq!(dictionary.get("sample.handle").as_deref(), Some("h"));
}

#[test]
fn test_remove_reports_presence() {
    let cache = DescriptionCache::new();
    let mut sample = Sample::default();
    let mut dictionary = MessageDictionary::new(&mut sample, &cache).unwrap();
    dictionary.set("sample.retries", Some("1")).unwrap();
    assert!(dictionary.remove("sample.retries").unwrap());
    assert!(!dictionary.remove("sample.retries").unwrap());
    assert!(!dictionary.remove("nothing").unwrap());
    assert!(dictionary.remove("sample.kind").is_err());
}

#[test]
fn test_serialize_skips_unset_optional_parts() {
    let cache = DescriptionCache::new();
    let mut sample = Sample { handle: "h".to_owned(), ..Sample::default() };
    let dictionary = MessageDictionary::new(&mut sample, &cache).unwrap();
    let map = dictionary.to_map();
    assert_eq!(map.get("sample.handle").map(String::as_str), Some("h"));
    assert_eq!(map.get("sample.kind").map(String::as_str), Some("sample"));
    assert!(!map.contains_key("sample.retries"));
    assert!(!map.contains_key("sample.issued"));
}

#[test]
fn test_descriptions_differ_by_version() {
    let cache = DescriptionCache::new();
    let v1 = Sample { version: Some(SAMPLE_V1), ..Sample::default() };
    let v2 = Sample::default();
    let d1 = cache.describe(&v1).unwrap();
    let d2 = cache.describe(&v2).unwrap();
    assert!(d1.part("sample.legacy").is_some());
    assert!(d2.part("sample.legacy").is_none());
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_legacy_field_is_extra_data_in_newer_version() {
    let cache = DescriptionCache::new();
    let mut sample = Sample::default();
    let mut dictionary = MessageDictionary::new(&mut sample, &cache).unwrap();
    dictionary
        .from_map(&fields(&[
            ("sample.handle", "h"),
            ("sample.mode", ""),
            ("sample.kind", "sample"),
            ("sample.legacy", "old"),
        ]))
        .unwrap();
    assert_eq!(dictionary.additional_keys(), vec!["sample.legacy".to_owned()]);
}

#[test]
fn test_concurrent_first_use_registers_once() {
    let cache = DescriptionCache::new();
    let descriptions: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..16)
            .map(|_| scope.spawn(|| cache.describe(&Sample::default()).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(cache.len(), 1);
    assert!(descriptions.windows(2).all(|w| std::sync::Arc::ptr_eq(&w[0], &w[1])));
}

#[test]
fn test_optional_scalar_part_is_rejected() {
    #[derive(Debug, Default)]
    struct Broken {
        flag: bool,
        extra: Fields,
    }
    message_parts!(Broken { flag => part("flag") });
    impl ProtocolMessage for Broken {
        fn type_name(&self) -> &'static str {
            "Broken"
        }
        fn version(&self) -> ProtocolVersion {
            SAMPLE_V1
        }
        fn transport(&self) -> MessageTransport {
            MessageTransport::Direct
        }
        fn required_protection(&self) -> MessageProtections {
            MessageProtections::NONE
        }
        fn extra_data(&self) -> &Fields {
            &self.extra
        }
        fn extra_data_mut(&mut self) -> &mut Fields {
            &mut self.extra
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
        fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
            self
        }
    }

    let error = DescriptionCache::new().describe(&Broken::default()).unwrap_err();
    assert!(error.to_string().contains("Broken.flag"));
}

#[test]
fn test_downcast_helpers() {
    let boxed: Box<dyn ProtocolMessage> = Box::new(Sample { handle: "h".to_owned(), ..Sample::default() });
    assert!(boxed.is::<Sample>());
    assert_eq!(boxed.downcast_ref::<Sample>().map(|p| p.handle.as_str()), Some("h"));
    let sample = boxed.downcast::<Sample>().unwrap();
    assert_eq!(sample.handle, "h");
}

#[test]
fn test_protections_verified_before_each_element() {
    let tamper = MessageProtections::TAMPER_PROTECTION;
    let expiration = MessageProtections::EXPIRATION;
    let replay = MessageProtections::REPLAY_PROTECTION;

    assert_eq!(tamper.verified_before(), MessageProtections::NONE);
    assert_eq!(expiration.verified_before(), tamper);
    assert_eq!(replay.verified_before(), tamper | expiration);
    assert_eq!((expiration | replay).verified_before(), tamper);
    assert_eq!(MessageProtections::NONE.verified_before(), MessageProtections::ALL);
}
