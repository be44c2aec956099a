//! Filters, ordering and pagination against the in-memory store.

mod common;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use rethink_core::query::{Access, Comparison, IndexedAccess, Predicate, compile};
use rethink_core::value::document_from_json;
use rethink_core::{
    AdapterError, FieldSchema, FieldType, Filter, ModelSchema, QueryDescriptor, SchemaRegistry,
    Value,
};

use common::{ids, migrated};

fn product_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.define(
        ModelSchema::new("Product")
            .with_field(FieldSchema::new("color", FieldType::String))
            .with_field(FieldSchema::new("price", FieldType::Number))
            .with_field(FieldSchema::new("sku", FieldType::String).indexed()),
    );
    registry
}

async fn seed_products(gateway: &rethink_core::Gateway<rethink_core::MemoryTransport>) {
    let rows = [
        json!({"id": "p1", "color": "red", "price": 10, "sku": "A"}),
        json!({"id": "p2", "color": "blue", "price": 20, "sku": "B"}),
        json!({"id": "p3", "color": "red", "price": 30, "sku": "C"}),
        json!({"id": "p4", "color": "green", "price": 40, "sku": "A"}),
        json!({"id": "p5", "color": "blue", "price": 50, "sku": "D"}),
        json!({"id": "p6", "color": "black", "price": 60, "sku": "E"}),
    ];
    for row in rows {
        gateway.create("Product", document_from_json(row)).await.unwrap();
    }
}

#[tokio::test]
async fn membership_filters_match_exactly() {
    let (_, gateway) = migrated(product_registry()).await;
    seed_products(&gateway).await;

    // "red" and "blue" overlap the data; "purple" does not.
    let wanted = ["red", "blue", "purple"];

    let inside = gateway
        .all("Product", &QueryDescriptor::new().filter(Filter::new().is_in("color", wanted)))
        .await
        .unwrap();
    assert_eq!(ids(&inside), vec!["p1", "p2", "p3", "p5"]);

    let outside = gateway
        .all("Product", &QueryDescriptor::new().filter(Filter::new().not_in("color", wanted)))
        .await
        .unwrap();
    assert_eq!(ids(&outside), vec!["p4", "p6"]);

    let none = gateway
        .all("Product", &QueryDescriptor::new().filter(Filter::new().is_in("color", ["purple"])))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn membership_combines_with_indexed_access() {
    let (_, gateway) = migrated(product_registry()).await;
    seed_products(&gateway).await;

    let filter = Filter::new().eq("sku", "A").not_in("color", ["green"]);
    let rows = gateway
        .all("Product", &QueryDescriptor::new().filter(filter))
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec!["p1"]);
}

#[tokio::test]
async fn pagination_is_deterministic() {
    let (_, gateway) = migrated(product_registry()).await;
    seed_products(&gateway).await;

    let base = QueryDescriptor::new()
        .filter(Filter::new().gt("price", 10))
        .order("price DESC");

    let first = gateway.all("Product", &base).await.unwrap();
    let second = gateway.all("Product", &base).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(ids(&first), vec!["p6", "p5", "p4", "p3", "p2"]);

    for k in 0..=5 {
        let skipped = gateway
            .all("Product", &base.clone().skip(k))
            .await
            .unwrap();
        assert_eq!(skipped, first[k as usize..].to_vec(), "skip {k}");
    }

    let page = gateway
        .all("Product", &base.clone().skip(1).limit(2))
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["p5", "p4"]);
}

#[tokio::test]
async fn multi_key_order_applies_in_priority() {
    let (_, gateway) = migrated(product_registry()).await;
    seed_products(&gateway).await;

    let rows = gateway
        .all("Product", &QueryDescriptor::new().order("color, price DESC"))
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec!["p6", "p5", "p2", "p4", "p3", "p1"]);
}

#[tokio::test]
async fn filtered_count_and_remove() {
    let (transport, gateway) = migrated(product_registry()).await;
    seed_products(&gateway).await;

    let blue = Filter::new().eq("color", "blue");
    assert_eq!(gateway.count("Product", &blue).await.unwrap(), 2);

    let removed = gateway
        .remove(
            "Product",
            &QueryDescriptor::new().filter(Filter::new().gte("price", 30)).order("price").limit(2),
        )
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(ids(&transport.rows("test", "Product")), vec!["p1", "p2", "p5", "p6"]);

    assert_eq!(gateway.destroy_all("Product", &blue).await.unwrap(), 2);
    assert_eq!(gateway.count("Product", &Filter::new()).await.unwrap(), 2);
}

#[tokio::test]
async fn unknown_field_is_rejected_before_io() {
    let (transport, gateway) = migrated(product_registry()).await;
    let before = transport.stats();

    let err = gateway
        .all("Product", &QueryDescriptor::new().filter(Filter::new().eq("weight", 3)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AdapterError::SchemaMismatch {
            model: "Product".into(),
            field: "weight".into()
        }
    );
    assert_eq!(transport.stats().queries, before.queries);
}

#[tokio::test]
async fn filter_from_json_descriptor() {
    let (_, gateway) = migrated(product_registry()).await;
    seed_products(&gateway).await;

    let filter = Filter::from_json(&json!({
        "color": "red",
        "price": {"between": [15, 35]},
    }))
    .unwrap();
    let rows = gateway
        .all("Product", &QueryDescriptor::new().filter(filter))
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec!["p3"]);

    let err = Filter::from_json(&json!({"price": {"like": 3}})).unwrap_err();
    assert_eq!(err.kind(), "unsupported_operator");
}

fn user_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.define(
        ModelSchema::new("User")
            .with_field(FieldSchema::new("id", FieldType::String).indexed())
            .with_field(FieldSchema::new("age", FieldType::Number))
            .with_field(FieldSchema::new("createdAt", FieldType::Date).indexed()),
    );
    registry
}

#[tokio::test]
async fn user_scenario_uses_created_at_index() {
    let (_, gateway) = migrated(user_registry()).await;

    let launch = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let later = Utc.timestamp_opt(1_700_086_400, 0).unwrap();
    let fixture = [
        ("u01", 17, launch),
        ("u02", 18, launch),
        ("u03", 30, launch),
        ("u04", 65, launch),
        ("u05", 66, launch),
        ("u06", 40, later),
        ("u07", 18, later),
        ("u08", 50, launch),
        ("u09", 12, later),
        ("u10", 64, launch),
    ];
    for (id, age, created) in fixture {
        let mut doc = document_from_json(json!({"id": id, "age": age}));
        doc.insert("createdAt".into(), Value::Date(created));
        gateway.create("User", doc).await.unwrap();
    }

    let filter = Filter::new()
        .gte("age", 18)
        .lte("age", 65)
        .eq("createdAt", launch);

    let schema = gateway.registry().get("User").unwrap();
    let compiled = compile(schema, &filter).unwrap();
    assert_eq!(
        compiled.indexed,
        Some(IndexedAccess::GetAll {
            index: "createdAt".into(),
            value: Value::Number(1_700_000_000.0),
        })
    );
    assert_eq!(
        compiled.residual,
        Some(Predicate::And(vec![
            Predicate::compare("age", Comparison::Ge, Value::from(18)),
            Predicate::compare("age", Comparison::Le, Value::from(65)),
        ]))
    );

    let planned = QueryDescriptor::new().filter(filter.clone()).plan(schema).unwrap();
    assert!(matches!(planned.access, Access::Index(_)));

    let rows = gateway
        .all("User", &QueryDescriptor::new().filter(filter))
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec!["u02", "u03", "u04", "u08", "u10"]);
    for row in &rows {
        assert_eq!(row.get("createdAt"), Some(&Value::Date(launch)));
    }
}

#[tokio::test]
async fn dates_round_trip_at_second_precision() {
    let (_, gateway) = migrated(user_registry()).await;

    let samples = [0i64, 1, 59, 951_782_400, 1_700_000_000, i32::MAX as i64];
    for (i, secs) in samples.into_iter().enumerate() {
        let written = Utc.timestamp_opt(secs, 123_456_789).unwrap();
        let id = format!("d{i}");
        let mut doc = document_from_json(json!({"id": id, "age": 1}));
        doc.insert("createdAt".into(), Value::Date(written));
        gateway.create("User", doc).await.unwrap();

        let back = gateway.find_by_id("User", id.as_str()).await.unwrap().unwrap();
        let Some(Value::Date(read)) = back.get("createdAt") else {
            panic!("createdAt not read back as a date: {back:?}");
        };
        assert_eq!(read.timestamp(), written.timestamp());
    }
}

#[tokio::test]
async fn date_range_filter_coerces_operands() {
    let (_, gateway) = migrated(user_registry()).await;
    for (id, secs) in [("a", 100), ("b", 200), ("c", 300)] {
        let mut doc = document_from_json(json!({"id": id, "age": 20}));
        doc.insert("createdAt".into(), Value::Date(Utc.timestamp_opt(secs, 0).unwrap()));
        gateway.create("User", doc).await.unwrap();
    }

    let between = Filter::new().between(
        "createdAt",
        Utc.timestamp_opt(150, 0).unwrap(),
        Utc.timestamp_opt(300, 0).unwrap(),
    );
    let rows = gateway
        .all("User", &QueryDescriptor::new().filter(between))
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec!["b", "c"]);
}
