//! CLI smoke tests for planex.
//!
//! These tests run the binary against small package sets in temporary
//! directories and check exit codes and output.

use std::path::Path;
use std::process::Command as StdCommand;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Get a Command for the planex binary.
fn planex_cmd() -> Command {
  cargo_bin_cmd!("planex")
}

/// Create a temp directory holding the given files.
fn temp_tree(files: &[(&str, &str)]) -> TempDir {
  let temp = TempDir::new().unwrap();
  for (name, content) in files {
    let path = temp.path().join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
  }
  temp
}

const FOO_SPEC: &str = "Name: foo
Version: 1.2
Release: 1
Source0: https://example.com/foo/archive/v1.2.tar.gz#/foo-1.2.tar.gz
BuildRequires: devel-lib

%description
foo
";

const BAR_SPEC: &str = "Name: bar
Version: 0.5
Release: 3

%package devel
Provides: devel-lib

%description devel
bar headers
";

const FOO_RULES: &str = "\
SRPMS/bar-0.5-3.src.rpm : SPECS/bar.spec
RPMS/x86_64/bar-0.5-3.x86_64.rpm : SRPMS/bar-0.5-3.src.rpm
RPMS/x86_64/bar-devel-0.5-3.x86_64.rpm : SRPMS/bar-0.5-3.src.rpm
SRPMS/foo-1.2-1.src.rpm : SPECS/foo.spec
SRPMS/foo-1.2-1.src.rpm : SOURCES/foo-1.2.tar.gz
SOURCES/foo-1.2.tar.gz : SPECS/foo.spec
RPMS/x86_64/foo-1.2-1.x86_64.rpm : SRPMS/foo-1.2-1.src.rpm
RPMS/x86_64/foo-1.2-1.x86_64.rpm : RPMS/x86_64/bar-devel-0.5-3.x86_64.rpm
";

fn packages() -> TempDir {
  temp_tree(&[("SPECS/foo.spec", FOO_SPEC), ("SPECS/bar.spec", BAR_SPEC)])
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  planex_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  planex_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("planex"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["depend", "parse", "describe", "archive", "tags", "patches", "mounts"] {
    planex_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// depend
// =============================================================================

#[test]
fn depend_prints_rules() {
  let temp = packages();

  planex_cmd()
    .current_dir(temp.path())
    .args(["depend", "--arch", "x86_64", "SPECS"])
    .assert()
    .success()
    .stdout(FOO_RULES);
}

#[test]
fn depend_writes_rules_file() {
  let temp = packages();

  planex_cmd()
    .current_dir(temp.path())
    .args(["depend", "--arch", "x86_64", "-o", "deps", "SPECS/foo.spec", "SPECS/bar.spec"])
    .assert()
    .success()
    .stdout("");

  let written = std::fs::read_to_string(temp.path().join("deps")).unwrap();
  assert!(written.ends_with("RPMS/x86_64/foo-1.2-1.x86_64.rpm : RPMS/x86_64/bar-devel-0.5-3.x86_64.rpm\n"));
}

#[test]
fn depend_applies_dist_and_defines() {
  let temp = temp_tree(&[("SPECS/foo.spec", "Name: foo\nVersion: 1\nRelease: 2%{?dist}\n")]);

  planex_cmd()
    .current_dir(temp.path())
    .args(["depend", "--arch", "x86_64", "--dist", ".el7", "--topdir", "_build"])
    .args(["-D", "_srcrpmdir=%{_topdir}/SRPMS/%{name}", "SPECS"])
    .assert()
    .success()
    .stdout(predicate::str::starts_with(
      "_build/SRPMS/foo/foo-1-2.el7.src.rpm : SPECS/foo.spec\n",
    ));
}

#[test]
fn depend_reads_config_file() {
  let temp = packages();
  std::fs::write(
    temp.path().join("planex.toml"),
    "topdir = \"_build\"\narch = \"noarch\"\n",
  )
  .unwrap();

  planex_cmd()
    .current_dir(temp.path())
    .args(["--config", "planex.toml", "depend", "SPECS"])
    .assert()
    .success()
    .stdout(predicate::str::contains(
      "_build/RPMS/noarch/foo-1.2-1.noarch.rpm : _build/SRPMS/foo-1.2-1.src.rpm",
    ));
}

#[test]
fn depend_refuses_incomplete_inputs() {
  let temp = temp_tree(&[
    ("SPECS/foo.spec", FOO_SPEC),
    ("SPECS/bar.spec", BAR_SPEC),
    ("SPECS/broken.spec", "Name: broken\nRelease: 1\n"),
  ]);

  planex_cmd()
    .current_dir(temp.path())
    .args(["depend", "--arch", "x86_64", "SPECS"])
    .assert()
    .failure()
    .stdout("")
    .stderr(predicate::str::contains("broken.spec"))
    .stderr(predicate::str::contains("--keep-going"));

  planex_cmd()
    .current_dir(temp.path())
    .args(["depend", "--arch", "x86_64", "--keep-going", "SPECS"])
    .assert()
    .success()
    .stdout(FOO_RULES)
    .stderr(predicate::str::contains("broken.spec"));
}

#[test]
fn depend_reports_cycle() {
  let temp = temp_tree(&[
    ("a.spec", "Name: a\nVersion: 1\nRelease: 1\nBuildRequires: b\n"),
    ("b.spec", "Name: b\nVersion: 1\nRelease: 1\nBuildRequires: a\n"),
  ]);

  planex_cmd()
    .current_dir(temp.path())
    .args(["depend", "a.spec", "b.spec"])
    .assert()
    .failure()
    .stdout("")
    .stderr(predicate::str::contains("dependency cycle"));
}

#[test]
fn depend_reports_duplicate_provides() {
  let temp = temp_tree(&[
    ("a.spec", "Name: a\nVersion: 1\nRelease: 1\nProvides: shared\n"),
    ("b.spec", "Name: b\nVersion: 1\nRelease: 1\nProvides: shared\n"),
  ]);

  planex_cmd()
    .current_dir(temp.path())
    .args(["depend", "a.spec", "b.spec"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("'shared' is provided by both 'a' and 'b'"));
}

// =============================================================================
// parse
// =============================================================================

#[test]
fn parse_rewrites_spec_source() {
  let temp = temp_tree(&[("foo.spec", FOO_SPEC)]);

  planex_cmd()
    .current_dir(temp.path())
    .args(["parse", "foo.spec", "out/foo.spec"])
    .assert()
    .success();

  let written = std::fs::read_to_string(temp.path().join("out/foo.spec")).unwrap();
  assert_eq!(written.lines().count(), FOO_SPEC.lines().count());
  assert!(written.contains(
    "Source0: https://code.citrite.net/rest/archive/latest/projects/XS/repos/%{name}/archive?at=v%{version}&format=tar.gz#/foo-1.2.tar.gz\n"
  ));
}

#[test]
fn parse_rewrites_link() {
  let temp = temp_tree(&[("xen-api.lnk", r#"{"repo": "xen-api", "branch": "dev"}"#)]);

  planex_cmd()
    .current_dir(temp.path())
    .args(["parse", "xen-api.lnk", "out.lnk", "--branch", "feature"])
    .assert()
    .success();

  let written = std::fs::read_to_string(temp.path().join("out.lnk")).unwrap();
  assert!(written.contains("\"URL\": \"https://code.citrite.net/rest/archive/latest/projects/XS/repos/xen-api/archive?at=feature&format=tar.gz\""));
  assert!(!written.contains("branch"));
}

#[test]
fn parse_rejects_unknown_file_type() {
  let temp = temp_tree(&[("notes.txt", "")]);

  planex_cmd()
    .current_dir(temp.path())
    .args(["parse", "notes.txt", "out.txt"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Unsupported file type"));
}

// =============================================================================
// describe / archive
// =============================================================================

#[test]
fn describe_rejects_plain_directory() {
  let temp = TempDir::new().unwrap();

  planex_cmd()
    .arg("describe")
    .arg(temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("not a version-controlled path"));
}

fn git(dir: &Path, args: &[&str]) -> bool {
  StdCommand::new("git")
    .arg("-C")
    .arg(dir)
    .args(["-c", "user.name=Planex Test", "-c", "user.email=test@example.com"])
    .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
    .args(args)
    .output()
    .map(|o| o.status.success())
    .unwrap_or(false)
}

/// A repository with `commits` commits under `<temp>/widget`, or `None` if
/// git is unavailable.
fn git_repo(commits: usize) -> Option<TempDir> {
  let temp = TempDir::new().unwrap();
  let repo = temp.path().join("widget");
  std::fs::create_dir_all(&repo).unwrap();
  if !git(&repo, &["init", "-q"]) {
    return None;
  }
  for i in 0..commits {
    std::fs::write(repo.join("README"), format!("{i}\n")).unwrap();
    assert!(git(&repo, &["add", "README"]));
    assert!(git(&repo, &["commit", "-q", "-m", "change"]));
  }
  Some(temp)
}

#[test]
#[serial]
fn describe_counts_untagged_commits() {
  let Some(temp) = git_repo(7) else {
    return;
  };

  planex_cmd()
    .arg("describe")
    .arg(temp.path().join("widget"))
    .assert()
    .success()
    .stdout("7\n");
}

#[test]
#[serial]
fn archive_names_tarball_after_repo_and_version() {
  let Some(temp) = git_repo(2) else {
    return;
  };
  assert!(git(&temp.path().join("widget"), &["tag", "v1.4"]));

  planex_cmd()
    .current_dir(temp.path())
    .args(["archive", "widget", "--topdir", "build"])
    .assert()
    .success()
    .stdout("build/SOURCES/widget-1.4.tar.gz\n");

  assert!(temp.path().join("build/SOURCES/widget-1.4.tar.gz").is_file());
}

// =============================================================================
// mounts
// =============================================================================

#[test]
fn mounts_prints_volumes() {
  let temp = temp_tree(&[("SPECS/foo.spec", FOO_SPEC)]);

  planex_cmd()
    .current_dir(temp.path())
    .args(["mounts", "SPECS"])
    .assert()
    .success()
    .stdout("myrepos/foo:/build/rpmbuild/BUILD/foo-1.2\n")
    .stderr(predicate::str::contains("checkout not found"));
}
