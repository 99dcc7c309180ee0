//! Turns a model's free-text reply into an [`AnalysisResult`].
//!
//! Models wrap their JSON in markdown fences, add commentary around it, or
//! emit comments and trailing commas. Each repair is its own stage so the
//! stages can be tested in isolation:
//!
//! 1. [`extract_fenced_block`] / [`slice_json_object`]
//! 2. [`strip_comments`], [`strip_trailing_commas`], [`collapse_whitespace`]
//! 3. `serde_json` parse
//! 4. [`validate`] with defaults

use serde_json::{Map, Value};

use crate::error::ParsingError;
use crate::models::{Analysis, AnalysisResult, Finding, Peptide};

pub const MIN_PEPTIDES: usize = 4;
pub const DEFAULT_CATEGORY: &str = "wellness";
pub const DEFAULT_USAGE: &str = "Consult a professional for guidance";
pub const DEFAULT_DISCLAIMER: &str = "This analysis is for informational purposes only and is not medical advice. \
Consult a qualified healthcare professional before starting any peptide or supplement protocol.";

pub fn normalize_reply(raw: &str) -> Result<AnalysisResult, ParsingError> {
    let trimmed = raw.trim();

    let candidate = match extract_fenced_block(trimmed) {
        Some(inner) => inner,
        None => slice_json_object(trimmed)?,
    };

    let repaired = repair_json(candidate);
    let value: Value =
        serde_json::from_str(&repaired).map_err(|e| ParsingError::MalformedJson(e.to_string()))?;

    validate(&value)
}

/// Inner content of the first ``` fence, with an optional `json` tag removed.
pub fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_open = &text[start + 3..];
    let end = after_open.find("```")?;
    let inner = &after_open[..end];

    let inner = match inner.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &inner[4..],
        _ => inner,
    };
    Some(inner.trim())
}

/// The span from the first `{` to the last `}`, inclusive.
pub fn slice_json_object(text: &str) -> Result<&str, ParsingError> {
    let start = text.find('{').ok_or(ParsingError::NoJsonFound)?;
    let end = text.rfind('}').ok_or(ParsingError::NoJsonFound)?;
    if end < start {
        return Err(ParsingError::NoJsonFound);
    }
    Ok(&text[start..=end])
}

pub fn repair_json(text: &str) -> String {
    collapse_whitespace(&strip_trailing_commas(&strip_comments(text)))
}

/// Removes `//` and `#` comments running to end of line. String literals are left alone.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        let starts_comment = c == '#' || (c == '/' && chars.peek() == Some(&'/'));
        if starts_comment {
            while let Some(&next) = chars.peek() {
                if next == '\n' {
                    break;
                }
                chars.next();
            }
            continue;
        }

        if c == '"' {
            in_string = true;
        }
        out.push(c);
    }

    out
}

/// Drops commas that directly precede `}` or `]`, ignoring whitespace between them.
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }

        if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }

        if c == '"' {
            in_string = true;
        }
        out.push(c);
    }

    out
}

/// Every whitespace run, including raw newlines inside strings, becomes one space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn validate(value: &Value) -> Result<AnalysisResult, ParsingError> {
    let root = value
        .as_object()
        .ok_or_else(|| ParsingError::schema("root", "expected a JSON object"))?;

    let analysis = root
        .get("analysis")
        .and_then(Value::as_object)
        .ok_or_else(|| ParsingError::schema("analysis", "missing or not an object"))?;

    let peptides = root
        .get("peptides")
        .and_then(Value::as_array)
        .ok_or_else(|| ParsingError::schema("peptides", "missing or not an array"))?;

    if peptides.len() < MIN_PEPTIDES {
        return Err(ParsingError::schema(
            "peptides",
            format!("expected at least {} entries, found {}", MIN_PEPTIDES, peptides.len()),
        ));
    }

    Ok(AnalysisResult {
        analysis: Analysis {
            main_issues: findings(analysis.get("mainIssues")),
            already_achieved: findings(analysis.get("alreadyAchieved")),
        },
        peptides: peptides
            .iter()
            .enumerate()
            .map(|(i, p)| normalize_peptide(i, p))
            .collect(),
        disclaimer: text_field(root.get("disclaimer"))
            .unwrap_or_else(|| DEFAULT_DISCLAIMER.to_string()),
    })
}

/// Missing, null, non-string and blank values all count as absent.
fn text_field(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn findings(value: Option<&Value>) -> Vec<Finding> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(Finding {
                title: text_field(map.get("title")).unwrap_or_default(),
                detail: text_field(map.get("detail")).unwrap_or_default(),
            }),
            Value::String(s) if !s.trim().is_empty() => Some(Finding {
                title: s.trim().to_string(),
                detail: String::new(),
            }),
            _ => None,
        })
        .collect()
}

fn normalize_peptide(index: usize, value: &Value) -> Peptide {
    let empty = Map::new();
    let entry = value.as_object().unwrap_or(&empty);

    let benefits = match entry.get("benefits") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|b| match b {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    };

    let peptide = Peptide {
        name: text_field(entry.get("name")).unwrap_or_else(|| format!("Peptide {}", index + 1)),
        category: text_field(entry.get("category")).unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        description: text_field(entry.get("description")).unwrap_or_default(),
        benefits,
        usage: text_field(entry.get("usage")).unwrap_or_else(|| DEFAULT_USAGE.to_string()),
    };

    // Kept verbatim; the category list only guides the prompt.
    if !peptide.has_known_category() {
        log::debug!("🔖 {} has unrecognized category: {}", peptide.name, peptide.category);
    }
    peptide
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_json(peptide_count: usize) -> String {
        let peptides: Vec<String> = (0..peptide_count)
            .map(|i| {
                format!(
                    r#"{{"name": "P{}", "category": "recovery", "description": "d{}", "benefits": ["a", "b"], "usage": "Daily"}}"#,
                    i, i
                )
            })
            .collect();
        format!(
            r#"{{"analysis": {{"mainIssues": [{{"title": "Puffy eyes", "detail": "Visible under-eye swelling"}}], "alreadyAchieved": []}}, "peptides": [{}], "disclaimer": "Not medical advice."}}"#,
            peptides.join(", ")
        )
    }

    #[test]
    fn test_unknown_category_is_kept_verbatim() {
        let reply = reply_json(4).replacen(r#""category": "recovery""#, r#""category": "nootropic""#, 1);
        let result = normalize_reply(&reply).unwrap();

        assert_eq!(result.peptides[0].category, "nootropic");
        assert!(!result.peptides[0].has_known_category());
        assert!(result.peptides[1].has_known_category());
    }

    #[test]
    fn test_fenced_block_extraction() {
        assert_eq!(extract_fenced_block("```json\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
        assert_eq!(extract_fenced_block("Here:\n```JSON\n{}\n```\nbye"), Some("{}"));
        assert_eq!(extract_fenced_block("```\n{\"b\": 2}\n```"), Some("{\"b\": 2}"));
        assert_eq!(extract_fenced_block("{\"a\": 1}"), None);
        assert_eq!(extract_fenced_block("```json\n{\"a\": 1}"), None);
    }

    #[test]
    fn test_slice_json_object() {
        assert_eq!(slice_json_object("Sure! {\"a\": {\"b\": 1}} Hope this helps.").unwrap(), "{\"a\": {\"b\": 1}}");
        assert_eq!(slice_json_object("no json here"), Err(ParsingError::NoJsonFound));
        assert_eq!(slice_json_object("} backwards {"), Err(ParsingError::NoJsonFound));
    }

    #[test]
    fn test_strip_comments() {
        let input = "{\n  \"a\": 1, // the answer\n  # shell style\n  \"url\": \"https://x.io/#top\"\n}";
        let stripped = strip_comments(input);

        assert!(!stripped.contains("the answer"));
        assert!(!stripped.contains("shell style"));
        assert!(stripped.contains("\"https://x.io/#top\""));
    }

    #[test]
    fn test_strip_comments_respects_escaped_quotes() {
        let input = r#"{"a": "say \"hi\" // not a comment"}"#;
        assert_eq!(strip_comments(input), input);
    }

    #[test]
    fn test_strip_trailing_commas() {
        assert_eq!(strip_trailing_commas("{\"a\": [1, 2, ], }"), "{\"a\": [1, 2 ] }");
        assert_eq!(strip_trailing_commas("{\"a\": \", }\"}"), "{\"a\": \", }\"}");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("{\n\t\"a\":   \"x\ny\"\n}"), "{ \"a\": \"x y\" }");
    }

    #[test]
    fn test_fenced_and_bare_parse_identically() {
        let bare = reply_json(4);
        let fenced = format!("```json\n{}\n```", bare);

        assert_eq!(normalize_reply(&fenced).unwrap(), normalize_reply(&bare).unwrap());
    }

    #[test]
    fn test_surrounding_prose_is_ignored() {
        let reply = format!("Here is your analysis:\n{}\nLet me know if you need more.", reply_json(5));
        let result = normalize_reply(&reply).unwrap();

        assert_eq!(result.peptides.len(), 5);
        assert_eq!(result.analysis.main_issues[0].title, "Puffy eyes");
    }

    #[test]
    fn test_trailing_comma_is_repaired() {
        let reply = reply_json(4).replace("\"Not medical advice.\"}", "\"Not medical advice.\",}");
        assert!(reply.contains(",}"));

        let result = normalize_reply(&reply).unwrap();
        assert_eq!(result.disclaimer, "Not medical advice.");
    }

    #[test]
    fn test_too_few_peptides() {
        let err = normalize_reply(&reply_json(3)).unwrap_err();
        assert!(matches!(err, ParsingError::SchemaViolation { ref field, .. } if field == "peptides"));
    }

    #[test]
    fn test_missing_sections() {
        assert_eq!(
            normalize_reply("[1, 2, 3]"),
            Err(ParsingError::NoJsonFound)
        );
        assert!(matches!(
            normalize_reply(r#"{"peptides": [{}, {}, {}, {}]}"#),
            Err(ParsingError::SchemaViolation { ref field, .. }) if field == "analysis"
        ));
        assert!(matches!(
            normalize_reply(r#"{"analysis": {}, "peptides": "none"}"#),
            Err(ParsingError::SchemaViolation { ref field, .. }) if field == "peptides"
        ));
    }

    #[test]
    fn test_malformed_json() {
        let err = normalize_reply("{\"analysis\": {\"mainIssues\": [}").unwrap_err();
        assert!(matches!(err, ParsingError::MalformedJson(_)));
    }

    #[test]
    fn test_missing_usage_gets_default() {
        let reply = reply_json(4).replacen(", \"usage\": \"Daily\"", "", 1);
        let result = normalize_reply(&reply).unwrap();

        let first = &result.peptides[0];
        assert_eq!(first.usage, DEFAULT_USAGE);
        assert_eq!(first.name, "P0");
        assert_eq!(first.category, "recovery");
        assert_eq!(first.description, "d0");
        assert_eq!(first.benefits, vec!["a", "b"]);
        assert_eq!(result.peptides[1].usage, "Daily");
    }

    #[test]
    fn test_defaults_fill_sparse_reply() {
        let reply = r#"{"analysis": {}, "peptides": [{}, {"name": ""}, {"benefits": "lots"}, "BPC-157"]}"#;
        let result = normalize_reply(reply).unwrap();

        assert!(result.analysis.main_issues.is_empty());
        assert!(result.analysis.already_achieved.is_empty());
        assert_eq!(result.disclaimer, DEFAULT_DISCLAIMER);

        let names: Vec<&str> = result.peptides.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Peptide 1", "Peptide 2", "Peptide 3", "Peptide 4"]);
        for peptide in &result.peptides {
            assert_eq!(peptide.category, DEFAULT_CATEGORY);
            assert_eq!(peptide.description, "");
            assert!(peptide.benefits.is_empty());
            assert_eq!(peptide.usage, DEFAULT_USAGE);
        }
    }

    #[test]
    fn test_llm_style_reply_with_everything_wrong() {
        let reply = "Sure, here you go:\n```json\n{\n  // analysis first\n  \"analysis\": {\n    \"mainIssues\": [\"Dry skin\",],\n  },\n  \"peptides\": [\n    {\"name\": \"GHK-Cu\", \"benefits\": [\"Collagen\", 2,]},\n    {\"name\": \"BPC-157\"},\n    {\"name\": \"TB-500\"},\n    {\"name\": \"Epitalon\"}, # longevity\n  ],\n}\n```\nStay healthy!";
        let result = normalize_reply(reply).unwrap();

        assert_eq!(result.analysis.main_issues, vec![Finding { title: "Dry skin".to_string(), detail: String::new() }]);
        assert_eq!(result.peptides[0].benefits, vec!["Collagen", "2"]);
        assert_eq!(result.peptides[3].name, "Epitalon");
    }
}
