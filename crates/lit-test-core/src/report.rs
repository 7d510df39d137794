//! Failure and summary rendering.
//!
//! Report output is written into per-file string buffers so concurrent
//! runs can print whole files in enumeration order.

use crate::extract::Test;
use crate::matching::TestMatch;
use crate::options::{OptionValue, TestOptions, keys, option_truthy};
use crate::session::TestResult;
use crate::spec::DocumentSpec;
use std::path::Path;

/// The blankline marker in effect, if any. The `blankline` option can
/// disable the marker or replace it with a custom token.
#[must_use]
pub fn blankline_marker<'a>(options: &'a TestOptions, spec: &'a DocumentSpec) -> Option<&'a str> {
    match options.get(keys::BLANKLINE) {
        None | Some(OptionValue::Bool(true)) => Some(&spec.blankline),
        Some(OptionValue::Str(s)) => Some(s),
        Some(_) => None,
    }
}

/// Empty out lines consisting of the marker plus trailing whitespace.
#[must_use]
pub fn remove_blankline_markers(s: &str, marker: &str) -> String {
    map_lines(s, |line| {
        let is_marker = line
            .strip_prefix(marker)
            .is_some_and(|rest| rest.trim().is_empty());
        if is_marker { String::new() } else { line.to_string() }
    })
}

/// Replace space-only lines (other than an unterminated final line)
/// with the marker, mirroring how blank output lines are displayed.
#[must_use]
pub fn insert_blankline_markers(s: &str, marker: &str) -> String {
    let mut lines: Vec<String> = s.split('\n').map(str::to_string).collect();
    let last = lines.len().saturating_sub(1);
    for line in &mut lines[..last] {
        if line.chars().all(|c| c == ' ') {
            *line = marker.to_string();
        }
    }
    lines.join("\n")
}

/// Empty out lines that contain only non-newline whitespace.
#[must_use]
pub fn truncate_empty_line_spaces(s: &str) -> String {
    map_lines(s, |line| {
        if !line.is_empty() && line.chars().all(char::is_whitespace) {
            String::new()
        } else {
            line.to_string()
        }
    })
}

fn map_lines(s: &str, f: impl Fn(&str) -> String) -> String {
    s.split('\n').map(f).collect::<Vec<_>>().join("\n")
}

fn strip_trailing_lf(s: &str) -> &str {
    s.strip_suffix('\n').unwrap_or(s)
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

/// Write the separator that precedes a failure block. The `sep` option
/// can suppress it or substitute custom text.
pub fn print_failed_test_sep(out: &mut String, options: &TestOptions) {
    match options.get(keys::SEP) {
        None | Some(OptionValue::Bool(true)) => push_line(out, &"*".repeat(70)),
        Some(OptionValue::Str(s)) => push_line(out, s),
        Some(other) if other.is_truthy() => push_line(out, &"*".repeat(70)),
        Some(_) => {}
    }
}

/// Write a full failure block for a mismatched test.
pub fn print_failed_test(
    out: &mut String,
    test: &Test,
    test_match: &TestMatch,
    result: &TestResult,
    options: &TestOptions,
    spec: &DocumentSpec,
) {
    push_line(out, &format!("File \"{}\", line {}", test.filename, test.line));
    push_line(out, "Failed example:");
    print_test_expr(out, &test.expr);
    if !test.expected.is_empty() && option_truthy(options, keys::DIFF, false) {
        print_result_diff(out, test, result, options, spec);
    } else {
        print_expected(out, test);
        print_result_output(out, result, options, spec);
    }
    if let Some(reason) = &test_match.reason {
        push_line(out, "Reason:");
        push_line(out, &format!("    {reason}"));
    }
}

/// Write the failure block for a `fails`-marked test that passed.
pub fn print_unexpected_pass(out: &mut String, test: &Test) {
    push_line(out, &format!("File \"{}\", line {}", test.filename, test.line));
    push_line(out, "Failed example:");
    print_test_expr(out, &test.expr);
    push_line(out, "Expected test to fail but passed");
}

fn print_test_expr(out: &mut String, expr: &str) {
    for line in expr.trim().split('\n') {
        push_line(out, &format!("    {line}"));
    }
}

fn print_expected(out: &mut String, test: &Test) {
    if test.expected.is_empty() {
        push_line(out, "Expected nothing");
        return;
    }
    push_line(out, "Expected:");
    for line in test.expected.trim().split('\n') {
        push_line(out, &format!("    {line}"));
    }
}

fn print_result_output(
    out: &mut String,
    result: &TestResult,
    options: &TestOptions,
    spec: &DocumentSpec,
) {
    if result.output.is_empty() {
        push_line(out, "Got nothing");
        return;
    }
    push_line(out, "Got:");
    let output = format_displayed_output(&result.output, options, spec);
    for line in output.split('\n') {
        push_line(out, &format!("    {line}"));
    }
}

fn format_displayed_output(output: &str, options: &TestOptions, spec: &DocumentSpec) -> String {
    let output = match blankline_marker(options, spec) {
        Some(marker) => insert_blankline_markers(output, marker),
        None => output.to_string(),
    };
    strip_trailing_lf(&output).to_string()
}

fn print_result_diff(
    out: &mut String,
    test: &Test,
    result: &TestResult,
    options: &TestOptions,
    spec: &DocumentSpec,
) {
    let expected: Vec<&str> = test.expected.split('\n').collect();
    let output = format_displayed_output(&result.output, options, spec);
    let output_lines: Vec<&str> = output.split('\n').collect();
    push_line(out, "Differences between expected and actual:");
    for line in unified_diff(&expected, &output_lines, 2) {
        push_line(out, &format!("   {}", line.trim_end()));
    }
}

/// Aggregate outcome across all scheduled files.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub failed: Vec<(String, usize)>,
    pub tested: Vec<(String, usize)>,
    pub skipped: Vec<(String, usize)>,
}

impl RunSummary {
    /// Overall exit code: 0 all passed, 1 some failed, 2 nothing tested.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.tested.is_empty() {
            2
        } else if self.failed.is_empty() {
            0
        } else {
            1
        }
    }
}

/// Render the run summary footer.
#[must_use]
pub fn format_summary(summary: &RunSummary, show_skipped: bool) -> String {
    let mut out = String::new();
    push_line(&mut out, &"-".repeat(70));
    if summary.tested.is_empty() {
        push_line(&mut out, "Nothing tested 😴");
        return out;
    }
    let tested = summary.tested.len();
    push_line(&mut out, &format!("{tested} {} run", plural_tests(tested)));
    if !summary.skipped.is_empty() {
        let skipped = summary.skipped.len();
        let hint = if show_skipped { "" } else { " (use --show-skipped to view)" };
        push_line(&mut out, &format!("{skipped} {} skipped{hint}", plural_tests(skipped)));
        if show_skipped {
            for (filename, line) in &summary.skipped {
                push_line(&mut out, &format!(" - {}:{line}", relative_to_cwd(filename)));
            }
        }
    }
    if summary.failed.is_empty() {
        push_line(&mut out, "All tests passed 🎉");
    } else {
        let failed = summary.failed.len();
        push_line(
            &mut out,
            &format!("{failed} {} failed 💥 (see above for details)", plural_tests(failed)),
        );
        for (filename, line) in &summary.failed {
            push_line(&mut out, &format!(" - {}:{line}", relative_to_cwd(filename)));
        }
    }
    out
}

const fn plural_tests(n: usize) -> &'static str {
    if n == 1 { "test" } else { "tests" }
}

/// Display a path relative to the working directory when possible.
#[must_use]
pub fn relative_to_cwd(path: &str) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| Path::new(path).strip_prefix(&cwd).ok().map(Path::to_path_buf))
        .map_or_else(|| path.to_string(), |p| p.display().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpTag {
    Equal,
    Replace,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy)]
struct Opcode {
    tag: OpTag,
    a0: usize,
    a1: usize,
    b0: usize,
    b1: usize,
}

/// Produce the body of a unified diff (no file header lines) with
/// `context` lines of context around each change.
#[must_use]
pub fn unified_diff(a: &[&str], b: &[&str], context: usize) -> Vec<String> {
    let mut out = Vec::new();
    for group in grouped_opcodes(&opcodes(a, b), context) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        out.push(format!(
            "@@ -{} +{} @@",
            format_range(first.a0, last.a1),
            format_range(first.b0, last.b1),
        ));
        for op in &group {
            match op.tag {
                OpTag::Equal => {
                    for line in &a[op.a0..op.a1] {
                        out.push(format!(" {line}"));
                    }
                }
                OpTag::Replace | OpTag::Delete => {
                    for line in &a[op.a0..op.a1] {
                        out.push(format!("-{line}"));
                    }
                }
                OpTag::Insert => {}
            }
            if matches!(op.tag, OpTag::Replace | OpTag::Insert) {
                for line in &b[op.b0..op.b1] {
                    out.push(format!("+{line}"));
                }
            }
        }
    }
    out
}

fn format_range(start: usize, stop: usize) -> String {
    let length = stop - start;
    if length == 1 {
        return format!("{}", start + 1);
    }
    let beginning = if length == 0 { start } else { start + 1 };
    format!("{beginning},{length}")
}

/// Matching-block opcodes from a longest-common-subsequence table.
fn opcodes(a: &[&str], b: &[&str]) -> Vec<Opcode> {
    // LCS lengths; inputs here are short expected/actual output blocks.
    let (n, m) = (a.len(), b.len());
    let mut lcs = vec![vec![0_usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }
    // Matching blocks first, then gaps between them become edits.
    let mut blocks: Vec<(usize, usize, usize)> = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            let (i0, j0) = (i, j);
            while i < n && j < m && a[i] == b[j] {
                i += 1;
                j += 1;
            }
            blocks.push((i0, j0, i - i0));
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    blocks.push((n, m, 0));
    let mut ops = Vec::new();
    let (mut ai, mut bj) = (0, 0);
    for (i0, j0, len) in blocks {
        let tag = match (ai < i0, bj < j0) {
            (true, true) => Some(OpTag::Replace),
            (true, false) => Some(OpTag::Delete),
            (false, true) => Some(OpTag::Insert),
            (false, false) => None,
        };
        if let Some(tag) = tag {
            ops.push(Opcode { tag, a0: ai, a1: i0, b0: bj, b1: j0 });
        }
        if len > 0 {
            ops.push(Opcode { tag: OpTag::Equal, a0: i0, a1: i0 + len, b0: j0, b1: j0 + len });
        }
        ai = i0 + len;
        bj = j0 + len;
    }
    ops
}

/// Split opcodes into change groups bounded by `n` lines of context.
fn grouped_opcodes(ops: &[Opcode], n: usize) -> Vec<Vec<Opcode>> {
    if ops.is_empty() {
        return Vec::new();
    }
    let mut codes: Vec<Opcode> = ops.to_vec();
    if let Some(first) = codes.first_mut()
        && first.tag == OpTag::Equal
    {
        first.a0 = first.a1.saturating_sub(n).max(first.a0);
        first.b0 = first.b1.saturating_sub(n).max(first.b0);
    }
    if let Some(last) = codes.last_mut()
        && last.tag == OpTag::Equal
    {
        last.a1 = last.a1.min(last.a0 + n);
        last.b1 = last.b1.min(last.b0 + n);
    }
    let mut groups = Vec::new();
    let mut group: Vec<Opcode> = Vec::new();
    for op in codes {
        if op.tag == OpTag::Equal && op.a1 - op.a0 > 2 * n {
            group.push(Opcode {
                tag: OpTag::Equal,
                a0: op.a0,
                a1: (op.a0 + n).min(op.a1),
                b0: op.b0,
                b1: (op.b0 + n).min(op.b1),
            });
            groups.push(std::mem::take(&mut group));
            group.push(Opcode {
                tag: OpTag::Equal,
                a0: op.a1.saturating_sub(n).max(op.a0),
                a1: op.a1,
                b0: op.b1.saturating_sub(n).max(op.b0),
                b1: op.b1,
            });
        } else {
            group.push(op);
        }
    }
    if group.iter().any(|op| op.tag != OpTag::Equal) {
        groups.push(group);
    }
    groups
}
