use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

#[test]
fn cli_search() {
    Command::cargo_bin("vre")
        .unwrap()
        .arg("search")
        .arg("foo")
        .arg("src/tests/testdata/sample.txt")
        .assert()
        .success()
        .stdout(
            "src/tests/testdata/sample.txt:1:1:foo bar\n\
             src/tests/testdata/sample.txt:3:1:foo foo\n",
        );
}

#[test]
fn cli_search_all() {
    Command::cargo_bin("vre")
        .unwrap()
        .arg("search")
        .arg("--all")
        .arg("foo")
        .arg("src/tests/testdata/sample.txt")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "src/tests/testdata/sample.txt:3:5:foo foo",
        ));
}

#[test]
fn cli_search_no_match() {
    Command::cargo_bin("vre")
        .unwrap()
        .arg("search")
        .arg(r"\<qu\>")
        .arg("src/tests/testdata/sample.txt")
        .assert()
        .success()
        .stdout("");
}

#[test]
fn cli_search_ignore_case() {
    Command::cargo_bin("vre")
        .unwrap()
        .arg("search")
        .arg("-i")
        .arg("QUICK")
        .arg("src/tests/testdata/sample.txt")
        .assert()
        .success()
        .stdout("src/tests/testdata/sample.txt:2:5:the quick brown fox\n");
}

#[test]
fn cli_search_magic() {
    Command::cargo_bin("vre")
        .unwrap()
        .arg("search")
        .arg("--magic=all")
        .arg("(brown|red) fox$")
        .arg("src/tests/testdata/sample.txt")
        .assert()
        .success()
        .stdout("src/tests/testdata/sample.txt:2:11:the quick brown fox\n");
}

#[test]
fn cli_search_multiline() {
    Command::cargo_bin("vre")
        .unwrap()
        .arg("search")
        .arg("--multiline")
        .arg(r"bar\nthe")
        .arg("src/tests/testdata/sample.txt")
        .assert()
        .success()
        .stdout("src/tests/testdata/sample.txt:1:5-2:4:foo bar\n");
}

#[test]
fn cli_search_invalid_pattern() {
    Command::cargo_bin("vre")
        .unwrap()
        .arg("search")
        .arg(r"a\(")
        .arg("src/tests/testdata/sample.txt")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(
            r"error: invalid pattern `a\(`: unmatched \(",
        ));
}

#[test]
fn cli_search_missing_file() {
    Command::cargo_bin("vre")
        .unwrap()
        .arg("search")
        .arg("foo")
        .arg("src/tests/testdata/missing.txt")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "error: can not read `src/tests/testdata/missing.txt`",
        ));
}

#[test]
fn cli_debug() {
    Command::cargo_bin("vre")
        .unwrap()
        .arg("debug")
        .arg("abc")
        .assert()
        .success()
        .stdout(
            r#"00000: BRANCH -> 0000b
00003: EXACTLY "abc" -> 0000b
0000b: END

anchored: false
start char: 'a'
must literal: none
capture groups: 0
"#,
        );
}

#[test]
fn cli_debug_hints() {
    Command::cargo_bin("vre")
        .unwrap()
        .arg("debug")
        .arg(r"^\(x\)\<foo")
        .assert()
        .success()
        .stdout(predicate::str::contains("anchored: true"))
        .stdout(predicate::str::contains("capture groups: 1"));
}

#[test]
fn cli_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.child("config.toml");

    config_file.write_str("[search]\nignore_case = true\n").unwrap();

    Command::cargo_bin("vre")
        .unwrap()
        .arg("--config")
        .arg(config_file.path())
        .arg("search")
        .arg("FOX")
        .arg("src/tests/testdata/sample.txt")
        .assert()
        .success()
        .stdout("src/tests/testdata/sample.txt:2:17:the quick brown fox\n");

    // With smart case an upper-case letter in the pattern disables
    // ignore_case.
    config_file
        .write_str("[search]\nignore_case = true\nsmart_case = true\n")
        .unwrap();

    Command::cargo_bin("vre")
        .unwrap()
        .arg("--config")
        .arg(config_file.path())
        .arg("search")
        .arg("FOX")
        .arg("src/tests/testdata/sample.txt")
        .assert()
        .success()
        .stdout("");
}

#[test]
fn cli_config_file_unknown_field() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.child("config.toml");

    config_file.write_str("[search]\nfoo = 1\n").unwrap();

    Command::cargo_bin("vre")
        .unwrap()
        .arg("--config")
        .arg(config_file.path())
        .arg("search")
        .arg("foo")
        .arg("src/tests/testdata/sample.txt")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error: invalid config file"));
}
