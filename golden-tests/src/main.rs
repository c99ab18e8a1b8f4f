use anyhow::{Context, bail};
use std::path::{Path, PathBuf};
use std::process::Command;

const TESTS_ROOT: &str = "golden-tests/tests";
const ARGS_FILE: &str = "args";
const EXPECTED_STDOUT_FILE: &str = "expected-stdout";
const EXPECTED_RECORD_FILE: &str = "expected-record";
const ACTUAL_RECORD_FILE: &str = "actual-record";
/// When set, expectation files are (re)written from the actual output instead of compared
const BLESS_ENV_VAR: &str = "GOLDEN_BLESS";

struct TestCase {
    dir: PathBuf,
    name: String,
    args: String,
}

/// One output of a run, checked against the file it is expected to match
struct Output {
    expected_file: &'static str,
    actual: String,
}

fn main() -> anyhow::Result<()> {
    let bless = std::env::var_os(BLESS_ENV_VAR).is_some();
    let mut test_cases = Vec::new();
    let test_dirs =
        std::fs::read_dir(TESTS_ROOT).context("golden tests root directory not found")?;
    for entry in test_dirs {
        let path = entry?.path();
        if !path.is_dir() {
            println!("skipping `{}` because it's not a directory", path.display());
            continue;
        }

        let args_path = path.join(ARGS_FILE);
        let args = std::fs::read_to_string(&args_path)
            .with_context(|| format!("no `{ARGS_FILE}` file found at `{}`", args_path.display()))?;
        test_cases.push(TestCase {
            name: path.display().to_string(),
            dir: path,
            args,
        });
    }
    test_cases.sort_by(|a, b| a.name.cmp(&b.name));

    let mut failed = 0;
    for test_case in &test_cases {
        match run_test_case(test_case, bless) {
            Ok(diffs) if diffs.is_empty() => println!("{}: ✅", test_case.name),
            Ok(diffs) => {
                println!("Golden test `{}` differs from expectations", test_case.name);
                for (file, diff) in diffs {
                    println!("`{file}` differs from the actual output:\n{diff}\n");
                }
                failed += 1;
            }
            Err(e) => {
                println!("Error running golden test `{}`", test_case.name);
                println!("{e:?}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} golden test(s) failed");
    }

    Ok(())
}

/// Runs `tcp-eval` for a test case, returning a diff per output that doesn't match
fn run_test_case(test_case: &TestCase, bless: bool) -> anyhow::Result<Vec<(&'static str, String)>> {
    // The binary appends to its output file
    let record_path = test_case.dir.join(ACTUAL_RECORD_FILE);
    if record_path.exists() {
        std::fs::remove_file(&record_path)
            .with_context(|| format!("failed to remove `{}`", record_path.display()))?;
    }

    let output = Command::new("cargo")
        .args(["run", "--release", "--bin", "tcp-eval", "--"])
        .arg("--file-name")
        .arg(&record_path)
        .args(test_case.args.split_whitespace())
        .output()
        .context("tcp-eval process crashed")?;

    if !output.status.success() {
        bail!(
            "tcp-eval exited with {}:\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let record = std::fs::read_to_string(&record_path)
        .with_context(|| format!("failed to read `{}`", record_path.display()))?;
    let outputs = [
        Output {
            expected_file: EXPECTED_STDOUT_FILE,
            actual: String::from_utf8_lossy(&output.stdout).into_owned(),
        },
        Output {
            expected_file: EXPECTED_RECORD_FILE,
            actual: record,
        },
    ];

    let mut diffs = Vec::new();
    for output in outputs {
        if let Some(diff) = compare_or_bless(&test_case.dir, &output, bless)? {
            diffs.push((output.expected_file, diff));
        }
    }

    Ok(diffs)
}

fn compare_or_bless(dir: &Path, output: &Output, bless: bool) -> anyhow::Result<Option<String>> {
    let path = dir.join(output.expected_file);
    if bless {
        std::fs::write(&path, output.actual.as_bytes())
            .with_context(|| format!("failed to persist `{}`", path.display()))?;
        return Ok(None);
    }

    if !path.is_file() {
        bail!(
            "`{}` is missing (rerun with {BLESS_ENV_VAR}=1 to create it)",
            path.display()
        );
    }

    let expected = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read `{}`", path.display()))?;
    if expected == output.actual {
        Ok(None)
    } else {
        Ok(Some(diff::render(&expected, &output.actual)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn case_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("golden-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn stdout(actual: &str) -> Output {
        Output {
            expected_file: EXPECTED_STDOUT_FILE,
            actual: actual.to_string(),
        }
    }

    #[test]
    fn test_missing_expectation_fails() {
        let dir = case_dir("missing");

        assert!(compare_or_bless(&dir, &stdout("hello\n"), false).is_err());
        assert!(!dir.join(EXPECTED_STDOUT_FILE).exists());
    }

    #[test]
    fn test_bless_writes_expectation() {
        let dir = case_dir("bless");

        let diff = compare_or_bless(&dir, &stdout("hello\n"), true).unwrap();
        assert!(diff.is_none());
        assert_eq!(
            std::fs::read_to_string(dir.join(EXPECTED_STDOUT_FILE)).unwrap(),
            "hello\n"
        );

        assert!(compare_or_bless(&dir, &stdout("hello\n"), false).unwrap().is_none());
        assert!(compare_or_bless(&dir, &stdout("goodbye\n"), false).unwrap().is_some());
    }
}

mod diff {
    use console::{Style, style};
    use similar::{ChangeTag, TextDiff};
    use std::fmt::Write;

    const CONTEXT_LINES: usize = 3;

    fn line_number(index: Option<usize>) -> String {
        index.map(|i| format!("{:<4}", i + 1)).unwrap_or_else(|| " ".repeat(4))
    }

    pub fn render(expected: &str, actual: &str) -> String {
        let mut output = String::new();
        let diff = TextDiff::from_lines(expected, actual);

        for (i, group) in diff.grouped_ops(CONTEXT_LINES).iter().enumerate() {
            if i > 0 {
                _ = writeln!(output, "{}", "-".repeat(80));
            }

            for change in group.iter().flat_map(|op| diff.iter_inline_changes(op)) {
                let (sign, line_style) = match change.tag() {
                    ChangeTag::Delete => ("-", Style::new().red()),
                    ChangeTag::Insert => ("+", Style::new().green()),
                    ChangeTag::Equal => (" ", Style::new().dim()),
                };

                _ = write!(
                    output,
                    "{}{} |{}",
                    style(line_number(change.old_index())).dim(),
                    style(line_number(change.new_index())).dim(),
                    line_style.apply_to(sign).bold(),
                );
                for (emphasized, value) in change.iter_strings_lossy() {
                    let value = line_style.apply_to(value);
                    if emphasized {
                        _ = write!(output, "{}", value.underlined().on_black());
                    } else {
                        _ = write!(output, "{value}");
                    }
                }
                if change.missing_newline() {
                    _ = writeln!(output);
                }
            }
        }

        output
    }
}
