/// Property-based tests using proptest
/// Invariants of the feature encoder that must hold for all inputs
use credit_score_api::encoder::{
    FeatureEncoder, NumericKind, CATEGORICAL_FEATURES, FEATURE_COUNT, NUMERIC_FEATURES,
};
use credit_score_api::errors::AppError;
use credit_score_api::models::AttributeMap;
use proptest::prelude::*;
use serde_json::{json, Value};

fn category_value() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(vec![
            "high_spent_large_value_payments",
            "low_spent_small_value_payments",
            "other",
            "bad",
            "good",
            "standard",
            "yes",
            "no",
        ])
        .prop_map(str::to_string),
        "[a-zA-Z_]{0,12}",
    ]
}

fn profile(ints: &[i32], floats: &[f64], categories: &[String]) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    let (mut i, mut f) = (0, 0);
    for (name, _) in NUMERIC_FEATURES.iter() {
        // Alternate int- and float-valued JSON numbers over all positions.
        let value = if (i + f) % 2 == 0 {
            i += 1;
            json!(ints[i - 1])
        } else {
            f += 1;
            json!(floats[f - 1])
        };
        attrs.insert(name.to_string(), value);
    }
    for ((name, _), value) in CATEGORICAL_FEATURES.iter().zip(categories.iter()) {
        attrs.insert(name.to_string(), Value::String(value.clone()));
    }
    attrs
}

proptest! {
    #[test]
    fn encoded_vector_has_fixed_width_and_valid_blocks(
        ints in prop::collection::vec(-1000i32..100_000, 8),
        floats in prop::collection::vec(-1.0e6f64..1.0e6, 8),
        categories in prop::collection::vec(category_value(), 3),
    ) {
        let attrs = profile(&ints, &floats, &categories);
        let vector = FeatureEncoder::new().encode(&attrs).unwrap();
        let v = vector.as_slice();

        prop_assert_eq!(v.len(), FEATURE_COUNT);

        let mut offset = NUMERIC_FEATURES.len();
        for ((_, block), raw) in CATEGORICAL_FEATURES.iter().zip(categories.iter()) {
            let slice = &v[offset..offset + block.len()];
            let ones = slice.iter().filter(|x| **x == 1.0).count();
            prop_assert!(slice.iter().all(|x| *x == 0.0 || *x == 1.0));

            match block.iter().position(|c| *c == raw.as_str()) {
                Some(idx) => {
                    prop_assert_eq!(ones, 1);
                    prop_assert_eq!(slice[idx], 1.0);
                }
                None => prop_assert_eq!(ones, 0),
            }
            offset += block.len();
        }
    }

    #[test]
    fn numeric_prefix_follows_attribute_order(
        ints in prop::collection::vec(0i32..1000, 8),
        floats in prop::collection::vec(0.0f64..1000.0, 8),
    ) {
        let categories = vec!["good".to_string(), "good".to_string(), "yes".to_string()];
        let attrs = profile(&ints, &floats, &categories);
        let vector = FeatureEncoder::new().encode(&attrs).unwrap();

        for (idx, (name, kind)) in NUMERIC_FEATURES.iter().enumerate() {
            let raw = attrs[*name].as_f64().unwrap();
            let expected = match kind {
                NumericKind::Int => raw.trunc(),
                NumericKind::Float => raw,
            };
            prop_assert_eq!(vector.as_slice()[idx], expected);
        }
    }

    #[test]
    fn missing_key_is_reported_by_name(drop in 0usize..19) {
        let categories = vec!["other".to_string(), "bad".to_string(), "no".to_string()];
        let mut attrs = profile(&[1; 8], &[1.5; 8], &categories);
        let name = attrs.keys().nth(drop).cloned().unwrap();
        attrs.remove(&name);

        match FeatureEncoder::new().encode(&attrs) {
            Err(AppError::MissingAttribute(missing)) => prop_assert_eq!(missing, name),
            other => prop_assert!(false, "expected MissingAttribute, got {:?}", other),
        }
    }

    #[test]
    fn encoding_never_panics(value in "\\PC*") {
        let categories = vec!["no".to_string(), "no".to_string(), "no".to_string()];
        let mut attrs = profile(&[1; 8], &[1.5; 8], &categories);
        attrs.insert("age".to_string(), Value::String(value));
        let _ = FeatureEncoder::new().encode(&attrs);
    }
}
