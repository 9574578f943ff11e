//! Property-based test generators using proptest.
//!
//! Provides strategies for generating items, field values and actions.

use crate::fixtures::{article_ref, START};
use contentsync_engine::LocalItem;
use contentsync_protocol::{ItemRef, PropertyMap, SyncAction, Value};
use proptest::prelude::*;

/// Strategy for generating uuid-like identifiers.
pub fn uuid_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9a-f]{8}-[0-9a-f]{4}").expect("Invalid regex")
}

/// Strategy for generating item references of a few known types.
pub fn item_ref_strategy() -> impl Strategy<Value = ItemRef> {
    (
        prop::sample::select(vec![
            ("node", "article"),
            ("node", "page"),
            ("taxonomy_term", "tags"),
            ("media", "image"),
        ]),
        uuid_strategy(),
    )
        .prop_map(|((entity_type, bundle), uuid)| ItemRef::new(entity_type, bundle, uuid))
}

/// Strategy for generating scalar JSON field values.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        prop::string::string_regex("[a-zA-Z0-9 ]{0,24}")
            .expect("Invalid regex")
            .prop_map(Value::from),
    ]
}

/// Strategy for generating small property maps.
pub fn property_map_strategy() -> impl Strategy<Value = PropertyMap> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z_]{1,12}").expect("Invalid regex"),
        field_value_strategy(),
        0..6,
    )
}

/// Strategy for generating sync actions.
pub fn action_strategy() -> impl Strategy<Value = SyncAction> {
    prop_oneof![
        Just(SyncAction::Create),
        Just(SyncAction::Update),
        Just(SyncAction::Delete),
    ]
}

/// Strategy for generating published articles with random title and body.
pub fn article_strategy() -> impl Strategy<Value = LocalItem> {
    (
        uuid_strategy(),
        prop::string::string_regex("[A-Za-z ]{1,32}").expect("Invalid regex"),
        prop::option::of(prop::string::string_regex("[A-Za-z .]{0,64}").expect("Invalid regex")),
        0i64..10_000,
    )
        .prop_map(|(uuid, title, body, age)| {
            let mut item = LocalItem::new(article_ref(&uuid), START - age)
                .with_field("title", Value::from(title))
                .with_field("status", Value::from(true));
            if let Some(body) = body {
                item = item.with_field("body", Value::from(body));
            }
            item
        })
}
