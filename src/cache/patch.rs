//! JSON merge patch (RFC 7396)

use serde_json::Value;

/// Apply `patch` onto `target` in place.
///
/// Objects merge recursively, `null` removes a member, anything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_obj) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }

    if let Value::Object(target_obj) = target {
        for (key, value) in patch_obj {
            if value.is_null() {
                target_obj.remove(key);
            } else {
                merge_patch(
                    target_obj.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}
