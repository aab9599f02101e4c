//! Invariants of the built-in collection catalogue

use easm_collector::collector::ResponseStyle;
use easm_collector::registry::CollectionRegistry;
use std::collections::HashSet;

#[test]
fn every_entry_is_valid_and_uniquely_keyed() {
    let registry = CollectionRegistry::load_embedded().unwrap();
    let mut keys = HashSet::new();
    for entry in registry.list_all() {
        entry.validate().unwrap();
        assert!(entry.resource_path.starts_with('/'), "{}", entry.name);
        assert!(entry.sourcetype.starts_with("defender:easm:"), "{}", entry.name);
        assert!(keys.insert(entry.checkpoint_key.clone()), "{}", entry.name);
    }
}

#[test]
fn incremental_entries_have_timestamp_fields() {
    let registry = CollectionRegistry::load_embedded().unwrap();
    for entry in registry.list_all().into_iter().filter(|e| e.is_incremental()) {
        assert!(!entry.timestamp_fields.is_empty(), "{}", entry.name);
        assert!(entry
            .filter_template
            .as_deref()
            .is_some_and(|t| t.contains("{watermark}")));
    }
}

#[test]
fn asset_kind_collections_filter_the_assets_listing() {
    let registry = CollectionRegistry::load_embedded().unwrap();
    let dns = registry.require("dns_records").unwrap();
    assert_eq!(dns.resource_path, "/assets");
    assert_eq!(dns.page_size, Some(200));
    assert!(dns.extra_params.values().any(|v| v.contains("DnsRecord")));

    let license = registry.require("license").unwrap();
    assert_eq!(license.response_style, ResponseStyle::SingleObject);
}
