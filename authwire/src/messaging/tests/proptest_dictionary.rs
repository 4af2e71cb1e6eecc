use proptest::prelude::*;

use super::{Sample, fields};
use crate::messaging::{DescriptionCache, MessageDictionary};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn test_from_map_to_map_roundtrip(
        handle in "[a-zA-Z0-9._-]{1,32}",
        mode in "[a-z]{0,8}",
        retries in proptest::option::of(any::<u32>()),
        extra in proptest::collection::vec(("x-[a-z]{1,8}", ".{0,16}"), 0..6),
    ) {
        let mut wire = fields(&[("sample.handle", handle.as_str()), ("sample.mode", mode.as_str()), ("sample.kind", "sample")]);
        if let Some(retries) = retries {
            wire.insert("sample.retries".to_owned(), retries.to_string());
        }
        for (key, value) in &extra {
            wire.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let cache = DescriptionCache::new();
        let mut sample = Sample::default();
        let mut dictionary = MessageDictionary::new(&mut sample, &cache).unwrap();
        dictionary.from_map(&wire).unwrap();
        let serialized = dictionary.to_map();

        // An empty allow-empty string is indistinguishable from absence.
        let mut expected = wire.clone();
        if mode.is_empty() {
            expected.shift_remove("sample.mode");
        }
        prop_assert_eq!(&serialized, &expected);

        let extra_keys: Vec<String> = wire.keys().filter(|k| k.starts_with("x-")).cloned().collect();
        prop_assert_eq!(dictionary.additional_keys(), extra_keys);
    }
}
