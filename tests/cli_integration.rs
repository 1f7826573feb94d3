//! Integration tests for the `langserver-shim` command line.

use std::path::Path;
use std::process::{Command, Output};

use anyhow::Result;
use tempfile::{TempDir, tempdir};

const SOURCE: &str = "package main\n\nfunc helper() {}\n\nfunc main() {\n\thelper()\n}\n";

/// Runs the binary in `dir` with the user config directory pointed at `dir`,
/// so only built-in defaults and the given flags apply.
fn shim(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_langserver-shim"))
        .args(args)
        .current_dir(dir)
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"))
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run langserver-shim")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn workspace() -> Result<TempDir> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("main.go"), SOURCE)?;
    Ok(dir)
}

#[test]
fn test_servers_lists_builtin_table() -> Result<()> {
    let dir = tempdir()?;
    let output = shim(dir.path(), &["servers", "--nocolor"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 7, "header plus six mappings: {text}");
    assert!(lines[0].starts_with("NAME"));

    for (name, transport) in [
        ("langserver-sample", "stdio: langserver-sample"),
        ("langserver-go", "stdio: langserver-go"),
        ("langserver-ctags", "stdio: langserver-ctags"),
        ("tcp lang server (port 2089)", "tcp: 127.0.0.1:2089"),
        ("tcp lang server (port 2088)", "tcp: 127.0.0.1:2088"),
        ("tcp lang server (port 2087)", "tcp: 127.0.0.1:2087"),
    ] {
        assert!(
            lines.iter().any(|l| l.starts_with(name) && l.contains(transport)),
            "missing {name} / {transport} in:\n{text}"
        );
    }
    Ok(())
}

#[test]
fn test_command_line_mappings_replace_builtins() -> Result<()> {
    let dir = tempdir()?;
    let output = shim(
        dir.path(),
        &[
            "--server",
            "go=gopls serve",
            "--tcp",
            "python,cython=3000",
            "servers",
            "--nocolor",
        ],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let text = stdout(&output);
    assert_eq!(text.lines().count(), 3, "{text}");
    assert!(text.contains("stdio: gopls serve"));
    assert!(text.contains("tcp: 127.0.0.1:3000"));
    assert!(text.contains("python, cython"));
    assert!(!text.contains("langserver-go"));
    Ok(())
}

#[test]
fn test_config_file_mappings() -> Result<()> {
    let dir = tempdir()?;
    let config = dir.path().join("shim.toml");
    std::fs::write(
        &config,
        "[[server]]\nname = \"pyls\"\nport = 2090\nlanguages = [\"python\"]\n",
    )?;

    let output = shim(
        dir.path(),
        &["--config", &config.to_string_lossy(), "route", "app.py"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(
        stdout(&output).trim(),
        "app.py: python -> pyls (tcp: 127.0.0.1:2090)"
    );
    Ok(())
}

#[test]
fn test_invalid_mapping_is_rejected() -> Result<()> {
    let dir = tempdir()?;

    let output = shim(dir.path(), &["--tcp", "python=http", "servers"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("port must be a number"));

    let output = shim(dir.path(), &["--tcp", "python=0", "servers"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("port 0"));
    Ok(())
}

#[test]
fn test_route_uses_builtin_table() -> Result<()> {
    let dir = tempdir()?;
    for (path, expected) in [
        ("main.go", "main.go: go -> langserver-go (stdio: langserver-go)"),
        ("index.php", "index.php: php -> langserver-ctags (stdio: langserver-ctags)"),
        (
            "App.tsx",
            "App.tsx: typescriptreact -> tcp lang server (port 2089) (tcp: 127.0.0.1:2089)",
        ),
        (
            "Main.java",
            "Main.java: java -> tcp lang server (port 2088) (tcp: 127.0.0.1:2088)",
        ),
        (
            "notes.txt",
            "notes.txt: plaintext -> langserver-sample (stdio: langserver-sample)",
        ),
        ("lib.rs", "lib.rs: rust -> no server"),
    ] {
        let output = shim(dir.path(), &["route", path]);
        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert_eq!(stdout(&output).trim(), expected);
    }
    Ok(())
}

#[test]
fn test_doctor_reports_ready_and_missing() -> Result<()> {
    let dir = tempdir()?;
    let mockls = format!("go={}", env!("CARGO_BIN_EXE_mockls"));
    let output = shim(
        dir.path(),
        &[
            "--server",
            &mockls,
            "--server",
            "php=langserver-shim-no-such-binary",
            "doctor",
            "--nocolor",
        ],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let text = stdout(&output);
    assert!(text.contains("✓ ready"), "{text}");
    assert!(text.contains("hover definition references symbol"), "{text}");
    assert!(text.contains("✗ command not found"), "{text}");
    Ok(())
}

#[test]
fn test_query_hover_and_symbol() -> Result<()> {
    let dir = workspace()?;
    let root = dir.path().to_string_lossy().into_owned();
    let mockls = env!("CARGO_BIN_EXE_mockls");

    let output = shim(
        dir.path(),
        &["--root", &root, "query", "--cmd", mockls, "hover", "main.go", "5", "2"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let hover: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(hover["contents"]["value"], "mockls: helper");

    let output = shim(
        dir.path(),
        &["--root", &root, "query", "--cmd", mockls, "references", "main.go", "2", "6"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let references: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(references.as_array().map(Vec::len), Some(2));

    // Symbols are only known for opened documents, so nothing matches here.
    let output = shim(
        dir.path(),
        &["--root", &root, "query", "--cmd", mockls, "symbol", "helper"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let symbols: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(symbols, serde_json::json!([]));
    Ok(())
}

#[test]
fn test_query_rejects_bad_input() -> Result<()> {
    let dir = workspace()?;
    let root = dir.path().to_string_lossy().into_owned();
    let mockls = env!("CARGO_BIN_EXE_mockls");
    let absolute = dir.path().join("main.go").to_string_lossy().into_owned();

    let output = shim(
        dir.path(),
        &["--root", &root, "query", "--cmd", mockls, "hover", &absolute, "0", "0"],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("relative to the workspace root"));

    let output = shim(dir.path(), &["query", "--cmd", mockls, "symbol", "x"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("--root"));

    let output = shim(
        dir.path(),
        &["--root", &root, "query", "--cmd", mockls, "--addr", "127.0.0.1:1", "symbol", "x"],
    );
    assert!(!output.status.success());
    Ok(())
}

#[test]
fn test_version_flag() {
    let dir = tempdir().expect("tempdir");
    let output = shim(dir.path(), &["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("langserver-shim "));
}
