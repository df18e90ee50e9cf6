use anyhow::Result;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

const TEST_CONFIG: &str = r#"
default_models = ["test"]

[models.test]
provider = "test"
model = "test-model"
include_path_commands = false
include_history_context = false
"#;

const KEYLESS_CONFIG: &str = r#"
default_models = ["gpt4"]

[models.gpt4]
provider = "openai"
model = "gpt-4o"
"#;

/// Helper to run aiterm against a config in `dir`, feeding `stdin`.
fn run_aiterm(dir: &Path, args: &[&str], stdin: &str) -> Result<Output> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_aiterm"))
        .args(args)
        .env("AITERM_CONFIG", dir.join("config.toml"))
        .env_remove("OPENAI_API_KEY")
        .env_remove("ANTHROPIC_API_KEY")
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut input) = child.stdin.take() {
        input.write_all(stdin.as_bytes())?;
    }
    Ok(child.wait_with_output()?)
}

fn config_dir(config: &str) -> Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("config.toml"), config)?;
    Ok(dir)
}

#[test]
fn test_quit_lists_suggestions_and_exits_zero() -> Result<()> {
    let dir = config_dir(TEST_CONFIG)?;

    let output = run_aiterm(dir.path(), &["list", "files"], "q\n")?;

    assert!(output.status.success(), "Quitting should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[1] echo 'Test command 1' - First test command"));
    assert!(stdout.contains("[3] date"));

    Ok(())
}

#[test]
fn test_selecting_allowed_command_runs_it() -> Result<()> {
    let dir = config_dir(TEST_CONFIG)?;

    let output = run_aiterm(dir.path(), &["say", "something"], "1\n")?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.lines().any(|line| line == "Test command 1"),
        "echo output should appear on its own line:\n{stdout}"
    );

    Ok(())
}

#[test]
fn test_follow_up_refines_suggestions() -> Result<()> {
    let dir = config_dir(TEST_CONFIG)?;

    let output = run_aiterm(dir.path(), &["-m", "test", "show", "files"], "find python files\nq\n")?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("find . -name '*.py' -type f"));

    Ok(())
}

#[test]
fn test_missing_description_exits_one() -> Result<()> {
    let dir = config_dir(TEST_CONFIG)?;

    let output = run_aiterm(dir.path(), &[], "")?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No description provided"));

    Ok(())
}

#[test]
fn test_exhausted_candidates_report_failures() -> Result<()> {
    let dir = config_dir(KEYLESS_CONFIG)?;

    let output = run_aiterm(dir.path(), &["-m", "nonexistent", "list", "files"], "")?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No working model found"));
    assert!(stderr.contains("nonexistent: model is not configured"));
    assert!(stderr.contains("gpt4: no API key found"));
    assert!(stderr.contains("OPENAI_API_KEY"));

    Ok(())
}

#[test]
fn test_config_flag_shows_location() -> Result<()> {
    let dir = config_dir(TEST_CONFIG)?;

    let output = run_aiterm(dir.path(), &["--config"], "")?;

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Configuration file:"));
    assert!(stdout.contains("Status: Found"));
    assert!(stdout.contains("test -> test/test-model"));

    Ok(())
}

#[test]
fn test_default_config_written_when_missing() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let output = run_aiterm(dir.path(), &["-m", "nope", "hello"], "")?;

    // No keys and (normally) no local Ollama: the run may fail, but the
    // default file must exist afterwards.
    assert!(dir.path().join("config.toml").exists());
    let written = std::fs::read_to_string(dir.path().join("config.toml"))?;
    assert!(written.contains("[models.gpt4]"));
    assert!(output.status.code().is_some());

    Ok(())
}

#[test]
fn test_build_ignore_set_writes_filter() -> Result<()> {
    let dir = config_dir(TEST_CONFIG)?;
    let source = dir.path().join("noise.txt");
    std::fs::write(&source, "2to3\nx86_64-linux-gnu-gcc\n")?;

    let output = run_aiterm(dir.path(), &["--build-ignore-set", source.to_str().unwrap()], "")?;

    assert!(output.status.success());
    let bloom = dir.path().join("ignore_commands.bloom");
    let set = aiterm::ignore_set::IgnoreSet::load(&bloom)?;
    assert!(set.contains("2to3"));
    assert!(set.contains("x86_64-linux-gnu-gcc"));

    Ok(())
}
