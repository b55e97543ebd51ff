// Property-based tests for the markup sanitizer and truncation

use common::markup::{self, tokenize, Token};
use proptest::prelude::*;

const ALLOWED: [&str; 7] = ["b", "i", "u", "s", "code", "pre", "a"];

fn fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z]{1,6}",
        Just(" ".to_string()),
        Just("\n".to_string()),
        Just("\t".to_string()),
        Just("&".to_string()),
        Just("&amp;".to_string()),
        Just("&nbsp;".to_string()),
        Just("<".to_string()),
        Just(">".to_string()),
        Just("<b>".to_string()),
        Just("</b>".to_string()),
        Just("<strong>".to_string()),
        Just("</strong>".to_string()),
        Just("<em>".to_string()),
        Just("</i>".to_string()),
        Just("<code>".to_string()),
        Just("</code>".to_string()),
        Just("<pre>".to_string()),
        Just("</pre>".to_string()),
        Just("<span class=\"x\">".to_string()),
        Just("</span>".to_string()),
        Just("<a href=\"https://example.com/a b?x=1&y=2\">".to_string()),
        Just("<a href=\"javascript:alert(1)\">".to_string()),
        Just("</a>".to_string()),
        Just("<p>".to_string()),
        Just("</p>".to_string()),
        Just("<br>".to_string()),
        Just("<h2>".to_string()),
        Just("</h2>".to_string()),
        Just("<ul>".to_string()),
        Just("<ol>".to_string()),
        Just("<li>".to_string()),
        Just("</li>".to_string()),
        Just("</ul>".to_string()),
        Just("<div>".to_string()),
        Just("</div>".to_string()),
        Just("<!-- note -->".to_string()),
    ]
}

fn rich_text() -> impl Strategy<Value = String> {
    prop::collection::vec(fragment(), 0..40).prop_map(|parts| parts.concat())
}

/// Tags open and close in LIFO order and only whitelisted names appear
fn assert_well_formed(markup: &str) -> Result<(), TestCaseError> {
    let mut stack: Vec<String> = Vec::new();
    for token in tokenize(markup) {
        match token {
            Token::Open(tag) => {
                prop_assert!(ALLOWED.contains(&tag.name.as_str()), "tag {} leaked", tag.name);
                prop_assert!(!tag.self_closing);
                if tag.name == "a" {
                    prop_assert_eq!(tag.attrs.len(), 1);
                    prop_assert_eq!(tag.attrs[0].0.as_str(), "href");
                } else {
                    prop_assert!(tag.attrs.is_empty());
                }
                stack.push(tag.name);
            }
            Token::Close(name) => {
                prop_assert_eq!(stack.pop(), Some(name));
            }
            Token::Text(text) => {
                prop_assert!(!text.contains('<'));
                prop_assert!(!text.contains('>'));
            }
        }
    }
    prop_assert!(stack.is_empty(), "unclosed tags: {:?}", stack);
    Ok(())
}

#[test]
fn property_sanitized_output_is_balanced_and_whitelisted() {
    proptest!(|(input in rich_text())| {
        let output = markup::sanitize(&input);
        assert_well_formed(&output)?;
        prop_assert!(!output.contains("javascript:"));
    });
}

#[test]
fn property_sanitize_is_idempotent() {
    proptest!(|(input in rich_text())| {
        let once = markup::sanitize(&input);
        let twice = markup::sanitize(&once);
        prop_assert_eq!(twice, once);
    });
}

#[test]
fn property_sanitized_output_has_normalized_whitespace() {
    proptest!(|(input in rich_text())| {
        let output = markup::sanitize(&input);
        prop_assert!(!output.contains("  "));
        prop_assert!(!output.contains('\t'));
        prop_assert!(!output.contains('\r'));
        prop_assert!(!output.contains("\n\n\n"));
        prop_assert!(!output.starts_with('\n'));
        prop_assert!(!output.ends_with('\n'));
    });
}

#[test]
fn property_truncate_respects_limit_and_stays_balanced() {
    proptest!(|(input in rich_text(), limit in 0usize..60)| {
        let sanitized = markup::sanitize(&input);
        let result = markup::truncate(&sanitized, limit);

        prop_assert!(markup::visible_len(&result.text) <= limit);
        assert_well_formed(&result.text)?;
        if markup::visible_len(&sanitized) <= limit {
            prop_assert!(!result.truncated);
            prop_assert_eq!(result.text, sanitized);
        } else {
            prop_assert!(result.truncated);
        }
    });
}

#[test]
fn property_truncate_plain_counts_characters() {
    proptest!(|(input in "\\PC{0,80}", limit in 0usize..40)| {
        let result = markup::truncate_plain(&input, limit);
        prop_assert!(result.text.chars().count() <= limit);
        prop_assert_eq!(result.truncated, input.chars().count() > limit);
    });
}
