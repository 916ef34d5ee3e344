//! CLI smoke tests: argument parsing and exit codes of the `editx` binary.

use assert_cmd::Command;
use assert_fs::prelude::*;
use clap::Parser;
use editx::cli::{BackupSubcommand, Cli, Commands};
use predicates::prelude::*;
use serde_json::Value;

fn editx() -> Command
{
    let mut cmd = Command::cargo_bin("editx").expect("editx binary");
    cmd.env_remove("EDITX_LOG")
        .env_remove("RUST_LOG");
    cmd
}

/// Workspace plus a response file kept outside it
fn fixture(response: &str) -> assert_fs::TempDir
{
    let tmp = assert_fs::TempDir::new().unwrap();
    tmp.child("ws/.keep")
        .touch()
        .unwrap();
    tmp.child("resp.md")
        .write_str(response)
        .unwrap();
    tmp
}

fn xml(
    path: &str,
    op: &str,
    code: &str,
) -> String
{
    format!(
        "<code_changes><changed_file><file_path>{path}</file_path>\
         <file_summary>test</file_summary><file_operation>{op}</file_operation>\
         <file_code><![CDATA[{code}]]></file_code></changed_file></code_changes>"
    )
}

#[test]
fn apply_flags_parse()
{
    let cli = Cli::parse_from([
        "editx",
        "--root",
        "/work",
        "apply",
        "resp.md",
        "--original",
        "a.rs",
        "--original",
        "b.rs",
        "--force",
    ]);
    assert_eq!(cli.root, std::path::PathBuf::from("/work"));
    match cli.command
    {
        Commands::Apply(args) =>
        {
            assert!(args.force);
            assert_eq!(args.input.originals, ["a.rs", "b.rs"]);
            assert!(
                args.input
                    .input
                    .is_some()
            );
        }
        _ => panic!("expected Apply command"),
    }

    let cli = Cli::parse_from(["editx", "backup", "prune", "--keep", "3"]);
    match cli.command
    {
        Commands::Backup(b) => match b.command
        {
            BackupSubcommand::Prune(p) => assert_eq!(p.keep, 3),
            _ => panic!("expected prune"),
        },
        _ => panic!("expected Backup command"),
    }
}

#[test]
fn apply_writes_files_and_reports_backup()
{
    let tmp = fixture("**hello.txt**\n```\nhello, world\n```\n");
    tmp.child("ws/hello.txt")
        .write_str("hi\n")
        .unwrap();

    editx()
        .arg("--root")
        .arg(
            tmp.child("ws")
                .path(),
        )
        .arg("apply")
        .arg(
            tmp.child("resp.md")
                .path(),
        )
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup: "));

    tmp.child("ws/hello.txt")
        .assert("hello, world\n");

    let out = editx()
        .arg("--root")
        .arg(
            tmp.child("ws")
                .path(),
        )
        .args(["backup", "list", "--json"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let v: Value = serde_json::from_slice(&out.stdout).expect("valid json");
    assert_eq!(
        v.as_array()
            .map(Vec::len),
        Some(1)
    );
}

#[test]
fn stdin_response_is_parsed()
{
    let tmp = fixture("");
    editx()
        .arg("--root")
        .arg(
            tmp.child("ws")
                .path(),
        )
        .args(["parse", "--json"])
        .write_stdin(xml("src/new.rs", "CREATE", "fn new() {}\n"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"path\": \"src/new.rs\""));
}

#[test]
fn unsafe_path_exits_with_invalid_input()
{
    let tmp = fixture(&xml("../escape.txt", "CREATE", "x"));
    editx()
        .arg("--root")
        .arg(
            tmp.child("ws")
                .path(),
        )
        .arg("apply")
        .arg(
            tmp.child("resp.md")
                .path(),
        )
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid path"));
    tmp.child("escape.txt")
        .assert(predicate::path::missing());
}

#[test]
fn conflicts_exit_two_unless_forced()
{
    let tmp = fixture(&xml("taken.txt", "CREATE", "new"));
    tmp.child("ws/taken.txt")
        .write_str("old")
        .unwrap();
    let run = |force: bool| {
        let mut cmd = editx();
        cmd.arg("--root")
            .arg(
                tmp.child("ws")
                    .path(),
            )
            .arg("apply")
            .arg(
                tmp.child("resp.md")
                    .path(),
            );
        if force
        {
            cmd.arg("--force");
        }
        cmd.assert()
    };

    run(false)
        .code(2)
        .stderr(predicate::str::contains("already exists"));
    tmp.child("ws/taken.txt")
        .assert("old");

    run(true).success();
    tmp.child("ws/taken.txt")
        .assert("new");
}

#[test]
fn diff_prints_unified_lines()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    tmp.child("a.txt")
        .write_str("keep\nold\n")
        .unwrap();
    tmp.child("b.txt")
        .write_str("keep\nnew\n")
        .unwrap();

    editx()
        .args(["--no-color", "diff", "--label", "x.txt"])
        .arg(
            tmp.child("a.txt")
                .path(),
        )
        .arg(
            tmp.child("b.txt")
                .path(),
        )
        .assert()
        .success()
        .stdout("--- a/x.txt\n+++ b/x.txt\n keep\n-old\n+new\n");
}

#[test]
fn init_writes_default_config()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    editx()
        .args(["--quiet", "init"])
        .arg(tmp.path())
        .assert()
        .success();
    tmp.child("editx.toml")
        .assert(predicate::str::contains("merge_window_ms = 2000"));
}

#[test]
fn unknown_backup_is_invalid_input()
{
    let tmp = fixture("");
    editx()
        .arg("--root")
        .arg(
            tmp.child("ws")
                .path(),
        )
        .args(["backup", "restore", "20250101-000000-deadbeef"])
        .assert()
        .code(3);
}
