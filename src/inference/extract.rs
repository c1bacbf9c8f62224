//! Code block extraction
//!
//! Best-effort post-processing of model output: when the text carries a
//! fenced code block, the first block becomes the primary payload and the
//! surrounding prose becomes the explanation. Pure functions, independent of
//! generation, so they can be tested without a model.

use once_cell::sync::Lazy;
use regex::Regex;

static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+.#-]*)[ \t]*\r?\n(.*?)```").expect("fence regex is valid")
});

/// Contents of the first fenced code block in a model response
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCode {
    /// Language tag from the fence info string, when present
    pub language: Option<String>,
    /// The code between the fences, without the trailing newline
    pub code: String,
}

/// A model response split for the boundary contract
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseParts {
    /// Fenced block contents, or the raw text when no fence was found
    pub code: String,
    /// Prose outside the fenced block; empty without a fence
    pub explanation: String,
    pub language: Option<String>,
}

/// Find the first fenced code block in `text`.
///
/// Returns `None` when the text has no complete fence; an opening fence
/// without a closing one does not count.
pub fn extract_code_block(text: &str) -> Option<ExtractedCode> {
    let captures = FENCE.captures(text)?;
    let language = captures
        .get(1)
        .map(|m| m.as_str())
        .filter(|tag| !tag.is_empty())
        .map(|tag| tag.to_string());
    let code = captures
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .trim_end_matches('\n')
        .to_string();

    Some(ExtractedCode { language, code })
}

/// Split a model response into `{code, explanation, language}`.
///
/// Without a fence the raw text is returned verbatim as the code and the
/// explanation is empty; the split never fails.
pub fn split_response(text: &str) -> ResponseParts {
    let Some(found) = FENCE.find(text) else {
        return ResponseParts {
            code: text.to_string(),
            explanation: String::new(),
            language: None,
        };
    };

    let extracted = match extract_code_block(text) {
        Some(extracted) => extracted,
        None => {
            return ResponseParts {
                code: text.to_string(),
                explanation: String::new(),
                language: None,
            }
        }
    };

    let before = text[..found.start()].trim();
    let after = text[found.end()..].trim();
    let explanation = match (before.is_empty(), after.is_empty()) {
        (true, true) => String::new(),
        (false, true) => before.to_string(),
        (true, false) => after.to_string(),
        (false, false) => format!("{before}\n\n{after}"),
    };

    ResponseParts {
        code: extracted.code,
        explanation,
        language: extracted.language,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_with_language() {
        let text = "Here you go:\n```rust\nfn main() {}\n```\nEnjoy.";
        let extracted = extract_code_block(text).expect("fence found");
        assert_eq!(extracted.language.as_deref(), Some("rust"));
        assert_eq!(extracted.code, "fn main() {}");
    }

    #[test]
    fn test_fence_without_language() {
        let text = "```\nprint('hi')\n```";
        let extracted = extract_code_block(text).expect("fence found");
        assert!(extracted.language.is_none());
        assert_eq!(extracted.code, "print('hi')");
    }

    #[test]
    fn test_no_fence() {
        assert!(extract_code_block("just prose, no code").is_none());
    }

    #[test]
    fn test_unterminated_fence() {
        assert!(extract_code_block("```rust\nfn main() {}").is_none());
    }

    #[test]
    fn test_first_of_multiple_fences() {
        let text = "```js\nfirst()\n```\nand then\n```py\nsecond()\n```";
        let extracted = extract_code_block(text).expect("fence found");
        assert_eq!(extracted.language.as_deref(), Some("js"));
        assert_eq!(extracted.code, "first()");
    }

    #[test]
    fn test_split_keeps_surrounding_prose() {
        let text = "Intro line.\n```html\n<p>hi</p>\n```\nCloser line.";
        let parts = split_response(text);
        assert_eq!(parts.code, "<p>hi</p>");
        assert_eq!(parts.language.as_deref(), Some("html"));
        assert_eq!(parts.explanation, "Intro line.\n\nCloser line.");
    }

    #[test]
    fn test_split_without_fence_is_verbatim() {
        let parts = split_response("plain answer");
        assert_eq!(parts.code, "plain answer");
        assert!(parts.explanation.is_empty());
        assert!(parts.language.is_none());
    }

    #[test]
    fn test_split_code_only() {
        let parts = split_response("```c\nint x;\n```");
        assert_eq!(parts.code, "int x;");
        assert!(parts.explanation.is_empty());
        assert_eq!(parts.language.as_deref(), Some("c"));
    }

    #[test]
    fn test_multiline_block() {
        let text = "```python\ndef f():\n    return 1\n\nprint(f())\n```";
        let extracted = extract_code_block(text).expect("fence found");
        assert_eq!(extracted.code, "def f():\n    return 1\n\nprint(f())");
    }
}
