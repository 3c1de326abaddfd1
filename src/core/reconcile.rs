//! Segment reply reconciliation.
//!
//! A translation unit is an ordered id -> text mapping sent to the model
//! as embedded JSON. The model is supposed to return every id exactly
//! once; in practice it omits ids, invents ids, echoes the source text
//! back, or wraps the payload in markdown fences. Reconciliation turns
//! whatever came back into one of three verdicts:
//!
//! - a complete translated map (every original id present),
//! - an invalid-reply verdict (retry from scratch),
//! - a partial verdict carrying a best-effort merged map, with originals
//!   substituted for missing ids and an instruction telling the model
//!   where to resume.
//!
//! The merged map's domain always equals the original id set, so callers
//! never observe a partially-keyed result. Across retries the merge is
//! cumulative: a retry reply only has to deliver the ids earlier attempts
//! did not, and reconciliation reports completion as soon as the union
//! covers every source id.

use std::sync::LazyLock;

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::core::executor::Handled;

/// Ordered id -> text mapping for one translation unit.
pub type SegmentMap = IndexMap<String, String>;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?(.*?)```").expect("static pattern compiles"));

/// Strip a markdown code fence wrapper, if any.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    CODE_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or(raw, |m| m.as_str())
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn key_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a model reply into a segment map.
///
/// Accepts the array form `[{"id": "0", "t": "text"}, ...]` and the
/// legacy object form `{"0": "text", ...}`. Ids and values may arrive as
/// JSON numbers; both are coerced to strings. Minor wrappers (fences,
/// prose before/after the JSON) are tolerated by slicing to the outermost
/// bracket pair when a direct parse fails.
#[must_use]
pub fn parse_reply(raw: &str) -> Option<SegmentMap> {
    let stripped = strip_code_fence(raw).trim();
    if stripped.is_empty() {
        return Some(SegmentMap::new());
    }

    let value = serde_json::from_str::<Value>(stripped)
        .ok()
        .or_else(|| {
            let start = stripped.find(['[', '{'])?;
            let end = stripped.rfind([']', '}'])?;
            serde_json::from_str::<Value>(stripped.get(start..=end)?).ok()
        })?;

    match value {
        Value::Array(records) => {
            let mut map = SegmentMap::new();
            for record in records {
                let obj = record.as_object()?;
                let id = key_to_id(obj.get("id")?)?;
                let text = value_to_text(obj.get("t")?);
                map.insert(id, text);
            }
            Some(map)
        }
        Value::Object(entries) => Some(
            entries
                .iter()
                .map(|(id, text)| (id.clone(), value_to_text(text)))
                .collect(),
        ),
        _ => None,
    }
}

/// The numerically largest id in `ids`, when any id parses as a number.
fn last_numeric_id<'a>(ids: impl Iterator<Item = &'a String>) -> Option<u64> {
    ids.filter_map(|id| id.trim().parse::<u64>().ok()).max()
}

/// Instruction appended to the retry prompt after a partial reply,
/// naming the id the model should resume from. Best-effort: `None` when
/// no returned id is numeric.
#[must_use]
pub fn continuation_hint(returned: &SegmentMap) -> Option<String> {
    let next = last_numeric_id(returned.keys())? + 1;
    Some(format!(
        "\n\n[Your previous reply stopped before completing every segment. \
         Resume from segment id {next} and make sure every id from the input \
         appears exactly once in the output.]"
    ))
}

/// Reconcile a raw model reply against the original segment map.
///
/// `previous` is the merged map from earlier attempts of the same
/// request, when one exists. An id counts as covered when the new reply
/// names it or an earlier attempt already translated it, so retries only
/// need to deliver the segments still outstanding.
pub fn reconcile(
    original: &SegmentMap,
    raw_reply: &str,
    previous: Option<&SegmentMap>,
) -> Handled<SegmentMap> {
    let Some(reply) = parse_reply(raw_reply) else {
        return Handled::Invalid("reply is not a segment map or segment array".to_string());
    };

    if reply.is_empty() {
        if original.is_empty() {
            return Handled::Done(SegmentMap::new());
        }
        return Handled::Invalid("empty reply for non-empty input".to_string());
    }

    if reply == *original {
        // Echoing the source back means the model declined to translate.
        return Handled::Invalid("reply is identical to the source segments".to_string());
    }

    let original_ids: IndexSet<&String> = original.keys().collect();
    let reply_ids: IndexSet<&String> = reply.keys().collect();
    let extra: Vec<&String> = reply_ids.difference(&original_ids).copied().collect();
    if !extra.is_empty() {
        warn!(ids = ?extra, "dropping ids not present in the source segments");
    }

    // A previous value equal to the source carries no information: it was
    // a substitution, not a translation.
    let carried = |id: &String, source: &String| {
        previous
            .and_then(|p| p.get(id))
            .filter(|text| *text != source)
    };

    // Merged in original order: new reply first, then earlier attempts,
    // then the source text for anything still missing.
    let merged: SegmentMap = original
        .iter()
        .map(|(id, source)| {
            let text = reply
                .get(id)
                .or_else(|| carried(id, source))
                .cloned()
                .unwrap_or_else(|| source.clone());
            (id.clone(), text)
        })
        .collect();

    let missing: Vec<&String> = original
        .iter()
        .filter(|&(id, source)| !reply.contains_key(id) && carried(id, source).is_none())
        .map(|(id, _)| id)
        .collect();

    if missing.is_empty() {
        return Handled::Done(merged);
    }

    warn!(ids = ?missing, "reply omitted segment ids, keeping partial result");
    Handled::Partial {
        partial: merged,
        reason: format!("{} segment id(s) missing from reply", missing.len()),
        append_prompt: continuation_hint(&reply),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(pairs: &[(&str, &str)]) -> SegmentMap {
        pairs.iter().map(|&(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_array_form() {
        let reply = r#"[{"id": "0", "t": "A"}, {"id": "1", "t": "B"}]"#;
        assert_eq!(parse_reply(reply), Some(segments(&[("0", "A"), ("1", "B")])));
    }

    #[test]
    fn parses_legacy_object_form() {
        let reply = r#"{"0": "A", "1": "B"}"#;
        assert_eq!(parse_reply(reply), Some(segments(&[("0", "A"), ("1", "B")])));
    }

    #[test]
    fn tolerates_fences_and_numeric_ids() {
        let reply = "```json\n[{\"id\": 0, \"t\": \"A\"}]\n```";
        assert_eq!(parse_reply(reply), Some(segments(&[("0", "A")])));
    }

    #[test]
    fn tolerates_prose_around_json() {
        let reply = "Here is the translation:\n{\"0\": \"A\"}\nDone.";
        assert_eq!(parse_reply(reply), Some(segments(&[("0", "A")])));
    }

    #[test]
    fn rejects_scalar_payloads() {
        assert_eq!(parse_reply("\"just a string\""), None);
    }

    #[test]
    fn complete_reply_is_done() {
        let original = segments(&[("0", "a"), ("1", "b")]);
        let verdict = reconcile(&original, r#"[{"id":"0","t":"A"},{"id":"1","t":"B"}]"#, None);
        assert!(matches!(verdict, Handled::Done(map) if map == segments(&[("0", "A"), ("1", "B")])));
    }

    /// A reply omitting id 1: the merged map carries the original
    /// text for the gap and an appended continuation instruction.
    #[test]
    fn partial_reply_merges_and_hints_continuation() {
        let original = segments(&[("0", "a"), ("1", "b"), ("2", "c")]);
        let verdict = reconcile(&original, r#"[{"id":"0","t":"A"},{"id":"2","t":"C"}]"#, None);

        match verdict {
            Handled::Partial { partial, append_prompt, .. } => {
                assert_eq!(partial, segments(&[("0", "A"), ("1", "b"), ("2", "C")]));
                let hint = append_prompt.expect("numeric ids produce a hint");
                assert!(hint.contains("id 3"));
            }
            other => panic!("expected partial verdict, got {other:?}"),
        }
    }

    /// A retry reply carrying only the missing id combines with the
    /// previous partial into a complete map.
    #[test]
    fn retry_reply_combines_with_previous_partial() {
        let original = segments(&[("0", "a"), ("1", "b"), ("2", "c")]);
        let partial =
            match reconcile(&original, r#"[{"id":"0","t":"A"},{"id":"2","t":"C"}]"#, None) {
                Handled::Partial { partial, .. } => partial,
                other => panic!("expected partial verdict, got {other:?}"),
            };

        let verdict = reconcile(&original, r#"[{"id":"1","t":"B"}]"#, Some(&partial));
        assert!(matches!(
            verdict,
            Handled::Done(map) if map == segments(&[("0", "A"), ("1", "B"), ("2", "C")])
        ));
    }

    /// An echo of the source map is a soft failure.
    #[test]
    fn identical_reply_is_invalid() {
        let original = segments(&[("0", "a"), ("1", "b"), ("2", "c")]);
        let reply = r#"{"0": "a", "1": "b", "2": "c"}"#;
        assert!(matches!(reconcile(&original, reply, None), Handled::Invalid(_)));
    }

    #[test]
    fn extra_ids_are_dropped() {
        let original = segments(&[("0", "a")]);
        let verdict = reconcile(&original, r#"[{"id":"0","t":"A"},{"id":"9","t":"X"}]"#, None);
        assert!(matches!(verdict, Handled::Done(map) if map == segments(&[("0", "A")])));
    }

    #[test]
    fn empty_reply_for_non_empty_input_is_invalid() {
        let original = segments(&[("0", "a")]);
        assert!(matches!(reconcile(&original, "", None), Handled::Invalid(_)));
        assert!(matches!(reconcile(&original, "```json\n\n```", None), Handled::Invalid(_)));
    }

    #[test]
    fn empty_input_accepts_empty_reply() {
        let original = SegmentMap::new();
        assert!(matches!(reconcile(&original, "", None), Handled::Done(map) if map.is_empty()));
    }

    #[test]
    fn unparsable_reply_is_invalid() {
        let original = segments(&[("0", "a")]);
        assert!(matches!(reconcile(&original, "not json at all", None), Handled::Invalid(_)));
    }

    /// Reconciliation completeness: the merged domain equals the original
    /// id set for arbitrary returned subsets.
    #[test]
    fn merged_domain_always_matches_original() {
        let original = segments(&[("0", "a"), ("1", "b"), ("2", "c"), ("3", "d")]);
        let subsets = [
            r#"[{"id":"0","t":"A"}]"#,
            r#"[{"id":"1","t":"B"},{"id":"3","t":"D"}]"#,
            r#"[{"id":"0","t":"A"},{"id":"1","t":"B"},{"id":"2","t":"C"}]"#,
        ];
        for reply in subsets {
            let map = match reconcile(&original, reply, None) {
                Handled::Done(map) | Handled::Partial { partial: map, .. } => map,
                Handled::Invalid(reason) => panic!("unexpected invalid verdict: {reason}"),
            };
            let ids: Vec<_> = map.keys().cloned().collect();
            let expected: Vec<_> = original.keys().cloned().collect();
            assert_eq!(ids, expected, "domain mismatch for reply {reply}");
        }
    }

    #[test]
    fn continuation_hint_requires_numeric_ids() {
        let returned = segments(&[("intro", "x"), ("body", "y")]);
        assert!(continuation_hint(&returned).is_none());

        let returned = segments(&[("4", "x"), ("7", "y"), ("5", "z")]);
        let hint = continuation_hint(&returned).expect("numeric ids");
        assert!(hint.contains("id 8"));
    }
}
