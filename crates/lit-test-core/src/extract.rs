//! Test extraction from document text.
//!
//! Finds successive (expression, expected) pairs using the spec's prompt
//! grammar. Line numbers are tracked incrementally by counting newlines
//! between match boundaries, so large documents never get split into a
//! full line array.

use crate::options::{TestOptions, decode_options};
use crate::spec::DocumentSpec;
use thiserror::Error;

/// A grammar violation found while extracting tests. Fatal for the file.
#[derive(Error, Debug)]
pub enum MalformedDocument {
    #[error("{filename}:{line}: inconsistent leading whitespace in test")]
    Indent { filename: String, line: usize },
    #[error("{filename}:{line}: space missing after prompt")]
    PromptSeparator { filename: String, line: usize },
}

/// One extracted test: a prompt-stripped expression and its expected
/// output block. Created once by extraction and never mutated.
#[derive(Debug, Clone)]
pub struct Test {
    pub expr: String,
    pub expected: String,
    pub filename: String,
    /// 1-based line of the PS1 line in the source document.
    pub line: usize,
    /// Options decoded from the expression's inline annotations.
    pub options: TestOptions,
}

/// Parse all tests from normalized document text, in source order.
///
/// # Errors
/// Returns `MalformedDocument` on inconsistent indentation or a missing
/// separator space after a prompt; extraction for the file stops there.
pub fn parse_tests(
    content: &str,
    spec: &DocumentSpec,
    filename: &str,
) -> Result<Vec<Test>, MalformedDocument> {
    let mut tests = Vec::new();
    let mut charpos = 0;
    let mut linepos = 0;
    // charpos always sits at a line boundary, so the pattern's `^` anchors
    // stay valid when matching against the remaining slice.
    while charpos < content.len() {
        let rest = &content[charpos..];
        let Some(caps) = spec.expr_pattern.captures(rest) else {
            break;
        };
        let Some(mat) = caps.get(0) else { break };
        let indent = caps.name("indent").map_or(0, |m| m.as_str().len());
        linepos += count_newlines(&rest[..mat.start()]);

        let expr_block = mat.as_str();
        let (expected_block, block_end) = collect_expected(content, charpos + mat.end(), spec);

        tests.push(build_test(
            expr_block,
            &expected_block,
            indent,
            linepos,
            spec,
            filename,
        )?);

        linepos += count_newlines(&content[charpos + mat.start()..block_end]);
        charpos = block_end;
    }
    Ok(tests)
}

fn count_newlines(s: &str) -> usize {
    s.bytes().filter(|b| *b == b'\n').count()
}

/// Collect the expected block following an expression: consecutive lines
/// that are neither blank nor the start of another PS1 line. Returns the
/// raw block and the byte offset just past it.
fn collect_expected(content: &str, expr_end: usize, spec: &DocumentSpec) -> (String, usize) {
    let mut pos = expr_end;
    if content[pos..].starts_with('\n') {
        pos += 1;
    }
    let start = pos;
    while pos < content.len() {
        let line_end = content[pos..]
            .find('\n')
            .map_or(content.len(), |i| pos + i + 1);
        let line = content[pos..line_end].trim_end_matches('\n');
        let unindented = line.trim_start_matches(' ');
        if unindented.is_empty() || unindented.starts_with(&spec.ps1) {
            break;
        }
        pos = line_end;
    }
    (content[start..pos].to_string(), pos)
}

fn build_test(
    expr_block: &str,
    expected_block: &str,
    indent: usize,
    linepos: usize,
    spec: &DocumentSpec,
    filename: &str,
) -> Result<Test, MalformedDocument> {
    let expr_lines = dedented_lines(expr_block, indent, linepos, filename)?;
    let expr = strip_prompts(&expr_lines, spec, linepos, filename)?.join("\n");

    let expr_line_count = count_newlines(expr_block) + 1;
    let expected_lines =
        dedented_lines(expected_block, indent, linepos + expr_line_count, filename)?;
    let expected = expected_lines.join("\n");

    let options = parse_inline_options(&expr, spec);
    Ok(Test {
        expr,
        expected,
        filename: filename.to_string(),
        line: linepos + 1,
        options,
    })
}

/// Dedent a block by the captured indent, dropping a single trailing
/// fully-blank line first. Every non-empty line must carry the indent.
fn dedented_lines(
    block: &str,
    indent: usize,
    linepos: usize,
    filename: &str,
) -> Result<Vec<String>, MalformedDocument> {
    let mut lines: Vec<&str> = block.split('\n').collect();
    if lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let prefix = " ".repeat(indent);
    let mut dedented = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if !line.is_empty() && !line.starts_with(&prefix) {
            return Err(MalformedDocument::Indent {
                filename: filename.to_string(),
                line: linepos + i + 1,
            });
        }
        dedented.push(line.get(indent..).unwrap_or("").to_string());
    }
    Ok(dedented)
}

fn strip_prompts(
    lines: &[String],
    spec: &DocumentSpec,
    linepos: usize,
    filename: &str,
) -> Result<Vec<String>, MalformedDocument> {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let prompt = if i == 0 { &spec.ps1 } else { &spec.ps2 };
            strip_prompt(line, prompt, linepos + i, filename)
        })
        .collect()
}

fn strip_prompt(
    line: &str,
    prompt: &str,
    linepos: usize,
    filename: &str,
) -> Result<String, MalformedDocument> {
    // The block pattern admits continuation lines indented deeper than
    // the opening prompt; those reach here still carrying spaces.
    let Some(rest) = line.strip_prefix(prompt) else {
        return Err(MalformedDocument::Indent {
            filename: filename.to_string(),
            line: linepos + 1,
        });
    };
    if rest.is_empty() {
        return Ok(String::new());
    }
    let Some(stripped) = rest.strip_prefix(' ') else {
        return Err(MalformedDocument::PromptSeparator {
            filename: filename.to_string(),
            line: linepos + 1,
        });
    };
    Ok(stripped.to_string())
}

/// Decode inline option annotations from a formatted expression. Later
/// candidates override earlier ones key by key.
fn parse_inline_options(expr: &str, spec: &DocumentSpec) -> TestOptions {
    let mut options = TestOptions::new();
    for candidate in spec.option_candidates.candidates(expr) {
        options.extend(decode_options(&candidate));
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionValue;
    use crate::spec::{SpecError, python_spec};

    type TestError = Box<dyn std::error::Error>;

    fn parse(content: &str) -> Result<Vec<Test>, TestError> {
        Ok(parse_tests(content, &python_spec()?, "test.md")?)
    }

    #[test]
    fn test_single_pair() -> Result<(), TestError> {
        let tests = parse(">>> 1 + 1\n2\n")?;
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].expr, "1 + 1");
        assert_eq!(tests[0].expected, "2");
        assert_eq!(tests[0].line, 1);
        Ok(())
    }

    #[test]
    fn test_round_trip_line_numbers() -> Result<(), TestError> {
        let content = "Intro text.\n\n>>> 'a'\n'a'\n\nMore prose here.\n\n>>> 'b'\n'b'\n";
        let tests = parse(content)?;
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].line, 3);
        assert_eq!(tests[1].line, 8);
        assert_eq!(tests[0].expr, "'a'");
        assert_eq!(tests[1].expected, "'b'");
        Ok(())
    }

    #[test]
    fn test_indented_block_dedented() -> Result<(), TestError> {
        let content = "    >>> print('hi')\n    hi\n";
        let tests = parse(content)?;
        assert_eq!(tests[0].expr, "print('hi')");
        assert_eq!(tests[0].expected, "hi");
        Ok(())
    }

    #[test]
    fn test_continuation_lines() -> Result<(), TestError> {
        let content = ">>> def f():\n...     return 3\n>>> f()\n3\n";
        let tests = parse(content)?;
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].expr, "def f():\n    return 3");
        assert_eq!(tests[0].expected, "");
        assert_eq!(tests[1].line, 3);
        assert_eq!(tests[1].expected, "3");
        Ok(())
    }

    #[test]
    fn test_multi_line_expected() -> Result<(), TestError> {
        let tests = parse(">>> print('a\\nb')\na\nb\n")?;
        assert_eq!(tests[0].expected, "a\nb");
        Ok(())
    }

    #[test]
    fn test_expected_stops_at_blank_line() -> Result<(), TestError> {
        let tests = parse(">>> print('x')\nx\n\nnot expected\n")?;
        assert_eq!(tests[0].expected, "x");
        Ok(())
    }

    #[test]
    fn test_bare_prompt_line() -> Result<(), TestError> {
        let tests = parse(">>>\n")?;
        assert_eq!(tests[0].expr, "");
        Ok(())
    }

    #[test]
    fn test_missing_separator_space_is_fatal() -> Result<(), SpecError> {
        let err = parse_tests(">>>1 + 1\n2\n", &python_spec()?, "bad.md");
        assert!(matches!(
            err,
            Err(MalformedDocument::PromptSeparator { line: 1, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_inconsistent_indent_is_fatal() -> Result<(), SpecError> {
        let content = "    >>> print('a\\nb')\n    a\n  b\n";
        let err = parse_tests(content, &python_spec()?, "bad.md");
        assert!(matches!(err, Err(MalformedDocument::Indent { line: 3, .. })));
        Ok(())
    }

    #[test]
    fn test_overindented_continuation_is_fatal() -> Result<(), SpecError> {
        let err = parse_tests(">>> if True:\n  ...     pass\n", &python_spec()?, "bad.md");
        assert!(matches!(err, Err(MalformedDocument::Indent { line: 2, .. })));
        Ok(())
    }

    #[test]
    fn test_inline_options_from_comments() -> Result<(), TestError> {
        let tests = parse(">>> 1 + 1  # +skip -case\n2\n")?;
        assert_eq!(tests[0].options.get("skip"), Some(&OptionValue::Bool(true)));
        assert_eq!(tests[0].options.get("case"), Some(&OptionValue::Bool(false)));
        Ok(())
    }

    #[test]
    fn test_later_option_candidate_wins() -> Result<(), TestError> {
        let tests = parse(">>> f(  # +case\n...  )  # -case\nok\n")?;
        assert_eq!(tests[0].options.get("case"), Some(&OptionValue::Bool(false)));
        Ok(())
    }

    #[test]
    fn test_synthesized_document_round_trip() -> Result<(), TestError> {
        let pairs: Vec<(String, String)> = (0..4)
            .map(|i| (format!("value({i})"), format!("result-{i}")))
            .collect();
        let mut content = String::new();
        let mut authored_lines = Vec::new();
        for (expr, expected) in &pairs {
            content.push_str("prose\n\n");
            authored_lines.push(content.bytes().filter(|b| *b == b'\n').count() + 1);
            content.push_str(&format!("  >>> {expr}\n  {expected}\n\n"));
        }
        let tests = parse(&content)?;
        assert_eq!(tests.len(), pairs.len());
        for ((test, (expr, expected)), line) in tests.iter().zip(&pairs).zip(&authored_lines) {
            assert_eq!(&test.expr, expr);
            assert_eq!(&test.expected, expected);
            assert_eq!(test.line, *line);
        }
        Ok(())
    }

    #[test]
    fn test_line_numbers_strictly_increase() -> Result<(), TestError> {
        let tests = parse(">>> 1\n1\n>>> 2\n2\n>>> 3\n3\n")?;
        let lines: Vec<_> = tests.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 3, 5]);
        Ok(())
    }
}
