//! Locale sync against the backend's translation records.
//!
//! The changeset computation is a pure function of the remote records and
//! the local target map, so syncing is deterministic and idempotent:
//! running it twice with the same target produces an empty diff the
//! second time.

use crate::client::BackendClient;
use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

/// One locale key/value pair as stored in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub id: String,
    pub key: String,
    pub value: String,
    pub language: String,
}

/// A record to create during sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTranslation {
    pub key: String,
    pub value: String,
    pub language: String,
}

/// A value change for an existing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationUpdate {
    pub id: String,
    pub value: String,
}

/// The create/update/delete changeset computed by [`diff`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationDiff {
    #[serde(default)]
    pub create: Vec<NewTranslation>,
    #[serde(default)]
    pub update: Vec<TranslationUpdate>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl TranslationDiff {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

/// Compute the changeset that turns `current` into `target` for `locale`.
///
/// Buckets are disjoint: a key lands in create (absent remotely), update
/// (present with a different value) or remove (absent from the target),
/// never more than one. Output order follows the sorted key order, so the
/// result depends only on set membership.
pub fn diff(
    current: &[TranslationRecord],
    target: &BTreeMap<String, String>,
    locale: &str,
) -> TranslationDiff {
    // Last record wins if the backend holds duplicate keys.
    let by_key: BTreeMap<&str, &TranslationRecord> =
        current.iter().map(|t| (t.key.as_str(), t)).collect();

    let mut changeset = TranslationDiff::default();

    for (key, value) in target {
        match by_key.get(key.as_str()) {
            None => changeset.create.push(NewTranslation {
                key: key.clone(),
                value: value.clone(),
                language: locale.to_string(),
            }),
            Some(record) if record.value != *value => changeset.update.push(TranslationUpdate {
                id: record.id.clone(),
                value: value.clone(),
            }),
            Some(_) => {}
        }
    }

    for (key, record) in &by_key {
        if !target.contains_key(*key) {
            changeset.remove.push(record.id.clone());
        }
    }

    changeset
}

/// Filter matching a locale exactly, optionally narrowed to keys under a
/// prefix.
pub fn locale_filter(locale: &str, prefix: Option<&str>) -> Value {
    match prefix {
        Some(prefix) => json!({
            "_and": [
                { "language": { "_eq": locale } },
                { "key": { "_starts_with": prefix } },
            ]
        }),
        None => json!({ "language": { "_eq": locale } }),
    }
}

/// Filter matching a locale exactly or any of its regional variants
/// (`en` also matches `en-US`).
pub fn locale_variants_filter(locale: &str) -> Value {
    json!({
        "_or": [
            { "language": { "_eq": locale } },
            { "language": { "_starts_with": format!("{locale}-") } },
        ]
    })
}

/// Fetch all translation records for a locale, optionally narrowed by a
/// key prefix.
pub async fn fetch_translations(
    client: &BackendClient,
    locale: &str,
    prefix: Option<&str>,
) -> Result<Vec<TranslationRecord>, ClientError> {
    client
        .read_translations(Some(&locale_filter(locale, prefix)))
        .await
}

/// Collapse records into the key→value map the locale loader serves.
pub fn translations_to_map(records: &[TranslationRecord]) -> BTreeMap<String, String> {
    records
        .iter()
        .map(|r| (r.key.clone(), r.value.clone()))
        .collect()
}

/// Flatten a locale JSON document into the key→value map the sync
/// expects. Nested objects become dotted keys; non-string leaves are
/// rendered as JSON.
pub fn flatten_locale_json(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    flatten_into("", value, &mut out);
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(&key, child, out);
            }
        }
        Value::String(s) if !prefix.is_empty() => {
            out.insert(prefix.to_string(), s.clone());
        }
        other if !prefix.is_empty() => {
            out.insert(prefix.to_string(), other.to_string());
        }
        _ => {}
    }
}

/// Reconcile the backend with `target` for a locale. Applies the computed
/// changeset as one batched request only when something differs; returns
/// whether any change was made.
pub async fn sync_translations(
    client: &BackendClient,
    locale: &str,
    prefix: Option<&str>,
    target: &BTreeMap<String, String>,
) -> Result<bool, ClientError> {
    let current = fetch_translations(client, locale, prefix).await?;
    let changeset = diff(&current, target, locale);

    if changeset.is_empty() {
        return Ok(false);
    }

    info!(
        locale,
        create = changeset.create.len(),
        update = changeset.update.len(),
        remove = changeset.remove.len(),
        "syncing translations"
    );

    client.apply_translation_batch(&changeset).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(id: &str, key: &str, value: &str) -> TranslationRecord {
        TranslationRecord {
            id: id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            language: "en".to_string(),
        }
    }

    fn target(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // ==================== Diff Bucket Tests ====================

    #[test]
    fn test_diff_empty_on_identical_sets() {
        let current = vec![record("1", "greeting", "Hello")];
        let changeset = diff(&current, &target(&[("greeting", "Hello")]), "en");
        assert!(changeset.is_empty());
    }

    #[test]
    fn test_diff_creates_missing_keys() {
        let changeset = diff(&[], &target(&[("greeting", "Hello")]), "en");
        assert_eq!(changeset.create.len(), 1);
        assert_eq!(changeset.create[0].key, "greeting");
        assert_eq!(changeset.create[0].language, "en");
        assert!(changeset.update.is_empty());
        assert!(changeset.remove.is_empty());
    }

    #[test]
    fn test_diff_updates_changed_values() {
        let current = vec![record("1", "greeting", "Hello")];
        let changeset = diff(&current, &target(&[("greeting", "Hi")]), "en");
        assert!(changeset.create.is_empty());
        assert_eq!(changeset.update.len(), 1);
        assert_eq!(changeset.update[0].id, "1");
        assert_eq!(changeset.update[0].value, "Hi");
        assert!(changeset.remove.is_empty());
    }

    #[test]
    fn test_diff_removes_stale_keys() {
        let current = vec![record("1", "obsolete", "x")];
        let changeset = diff(&current, &BTreeMap::new(), "en");
        assert_eq!(changeset.remove, vec!["1".to_string()]);
        assert!(changeset.create.is_empty());
        assert!(changeset.update.is_empty());
    }

    #[test]
    fn test_diff_all_three_buckets() {
        let current = vec![
            record("1", "keep", "same"),
            record("2", "change", "old"),
            record("3", "drop", "gone"),
        ];
        let changeset = diff(
            &current,
            &target(&[("keep", "same"), ("change", "new"), ("add", "fresh")]),
            "en",
        );

        assert_eq!(changeset.create.len(), 1);
        assert_eq!(changeset.create[0].key, "add");
        assert_eq!(changeset.update.len(), 1);
        assert_eq!(changeset.update[0].id, "2");
        assert_eq!(changeset.remove, vec!["3".to_string()]);
    }

    #[test]
    fn test_diff_empty_string_value_is_kept() {
        // An empty target value is still a value, not a deletion.
        let current = vec![record("1", "note", "text")];
        let changeset = diff(&current, &target(&[("note", "")]), "en");
        assert!(changeset.remove.is_empty());
        assert_eq!(changeset.update.len(), 1);
        assert_eq!(changeset.update[0].value, "");
    }

    #[test]
    fn test_diff_is_deterministic() {
        let current = vec![
            record("2", "b", "old"),
            record("1", "a", "old"),
            record("3", "c", "old"),
        ];
        let t = target(&[("a", "new"), ("d", "new")]);

        let first = diff(&current, &t, "en");
        let second = diff(&current, &t, "en");
        assert_eq!(first, second);
        // Sorted by key regardless of input order.
        assert_eq!(first.remove, vec!["2".to_string(), "3".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_each_key_in_at_most_one_bucket(
            current in proptest::collection::vec(("[a-c]{1,3}", "[a-z]{0,4}"), 0..8),
            target_pairs in proptest::collection::vec(("[a-c]{1,3}", "[a-z]{0,4}"), 0..8),
        ) {
            let current: Vec<TranslationRecord> = current
                .into_iter()
                .enumerate()
                .map(|(i, (key, value))| TranslationRecord {
                    id: format!("id-{i}"),
                    key,
                    value,
                    language: "en".to_string(),
                })
                .collect();
            let target: BTreeMap<String, String> = target_pairs.into_iter().collect();

            let changeset = diff(&current, &target, "en");

            let by_id: BTreeMap<&str, &str> = current
                .iter()
                .map(|r| (r.id.as_str(), r.key.as_str()))
                .collect();

            let mut seen = std::collections::BTreeSet::new();
            for created in &changeset.create {
                prop_assert!(seen.insert(created.key.clone()));
            }
            for updated in &changeset.update {
                let key = by_id[updated.id.as_str()].to_string();
                prop_assert!(seen.insert(key));
            }
            for removed in &changeset.remove {
                let key = by_id[removed.as_str()].to_string();
                prop_assert!(seen.insert(key));
            }
        }

        #[test]
        fn prop_applying_diff_is_idempotent(
            current in proptest::collection::vec(("[a-c]{1,3}", "[a-z]{0,4}"), 0..8),
            target_pairs in proptest::collection::vec(("[a-c]{1,3}", "[a-z]{0,4}"), 0..8),
        ) {
            // Deduplicate current by key the way diff does (last wins).
            let mut by_key: BTreeMap<String, (String, String)> = BTreeMap::new();
            for (i, (key, value)) in current.into_iter().enumerate() {
                by_key.insert(key, (format!("id-{i}"), value));
            }
            let current: Vec<TranslationRecord> = by_key
                .into_iter()
                .map(|(key, (id, value))| TranslationRecord {
                    id,
                    key,
                    value,
                    language: "en".to_string(),
                })
                .collect();
            let target: BTreeMap<String, String> = target_pairs.into_iter().collect();

            let changeset = diff(&current, &target, "en");

            // Apply the changeset to the remote set.
            let mut applied: Vec<TranslationRecord> = current
                .into_iter()
                .filter(|r| !changeset.remove.contains(&r.id))
                .map(|mut r| {
                    if let Some(update) = changeset.update.iter().find(|u| u.id == r.id) {
                        r.value = update.value.clone();
                    }
                    r
                })
                .collect();
            for (i, created) in changeset.create.iter().enumerate() {
                applied.push(TranslationRecord {
                    id: format!("new-{i}"),
                    key: created.key.clone(),
                    value: created.value.clone(),
                    language: created.language.clone(),
                });
            }

            // A second diff against the applied state is empty.
            prop_assert!(diff(&applied, &target, "en").is_empty());
        }
    }

    // ==================== Filter Tests ====================

    #[test]
    fn test_locale_filter_without_prefix() {
        let filter = locale_filter("de", None);
        assert_eq!(filter, json!({ "language": { "_eq": "de" } }));
    }

    #[test]
    fn test_locale_filter_with_prefix() {
        let filter = locale_filter("de", Some("app."));
        assert_eq!(filter["_and"][0], json!({ "language": { "_eq": "de" } }));
        assert_eq!(filter["_and"][1], json!({ "key": { "_starts_with": "app." } }));
    }

    #[test]
    fn test_locale_variants_filter() {
        let filter = locale_variants_filter("en");
        assert_eq!(filter["_or"][0], json!({ "language": { "_eq": "en" } }));
        assert_eq!(
            filter["_or"][1],
            json!({ "language": { "_starts_with": "en-" } })
        );
    }

    #[test]
    fn test_translations_to_map() {
        let records = vec![record("1", "a", "A"), record("2", "b", "B")];
        let map = translations_to_map(&records);
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], "A");
        assert_eq!(map["b"], "B");
    }

    #[test]
    fn test_flatten_locale_json_nested() {
        let doc = json!({
            "nav": { "home": "Home", "about": "About" },
            "title": "Site",
            "count": 3
        });

        let map = flatten_locale_json(&doc);
        assert_eq!(map["nav.home"], "Home");
        assert_eq!(map["nav.about"], "About");
        assert_eq!(map["title"], "Site");
        assert_eq!(map["count"], "3");
    }

    #[test]
    fn test_flatten_locale_json_ignores_bare_scalar() {
        assert!(flatten_locale_json(&json!("just a string")).is_empty());
    }

    #[test]
    fn test_diff_serde_roundtrip() {
        let changeset = TranslationDiff {
            create: vec![NewTranslation {
                key: "k".to_string(),
                value: "v".to_string(),
                language: "en".to_string(),
            }],
            update: vec![],
            remove: vec!["7".to_string()],
        };

        let json = serde_json::to_string(&changeset).unwrap();
        let restored: TranslationDiff = serde_json::from_str(&json).unwrap();
        assert_eq!(changeset, restored);
    }

    #[test]
    fn test_diff_deserializes_partial_body() {
        let body: TranslationDiff = serde_json::from_str(r#"{ "create": [] }"#).unwrap();
        assert!(body.is_empty());
    }
}
