use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One item of a page, keyed by field name.
pub type Record = serde_json::Map<String, Value>;

/// One response to a paginated request.
///
/// Mirrors the `{cursor, hasMore, deletedIds, items}` object returned under
/// the collection's field. `items` and `deletedIds` may be absent or null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<Record>,
    #[serde(default)]
    pub cursor: Option<String>,
    pub has_more: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub deleted_ids: Vec<Value>,
}

/// Row counts from applying one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageOutcome {
    pub upserted: u64,
    pub deleted: u64,
    pub cursor_advanced: bool,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_from_response() {
        let page: Page = serde_json::from_value(json!({
            "cursor": "c1",
            "hasMore": true,
            "deletedIds": [3],
            "items": [{"id": 1, "name": "a"}]
        }))
        .unwrap();

        assert_eq!(page.cursor.as_deref(), Some("c1"));
        assert!(page.has_more);
        assert_eq!(page.deleted_ids, vec![json!(3)]);
        assert_eq!(page.items[0]["name"], json!("a"));
    }

    #[test]
    fn test_null_lists_are_empty() {
        let page: Page = serde_json::from_value(json!({
            "cursor": null,
            "hasMore": false,
            "deletedIds": null,
            "items": null
        }))
        .unwrap();

        assert!(page.items.is_empty());
        assert!(page.deleted_ids.is_empty());
        assert!(page.cursor.is_none());
    }

    #[test]
    fn test_has_more_is_required() {
        let result: Result<Page, _> = serde_json::from_value(json!({"items": []}));
        assert!(result.is_err());
    }
}
