//! End-to-end tests for the waypoint binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn waypoint(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("waypoint").unwrap();
    cmd.arg("--data-dir").arg(data_dir).env_remove("RUST_LOG");
    cmd
}

const SNAPSHOT: &str = r#"{
  "documents": [
    { "path": "users/alice/cities/c1", "fields": { "name": "Lisbon", "country": "PT" } },
    { "path": "users/bob/cities/c2", "fields": { "name": "Porto" } },
    { "path": "users/alice/cities/c1/locations/l1", "fields": { "name": "Time Out Market" } },
    { "path": "users/alice/cities/c1/locations/l2", "fields": { "name": "Belem Tower" } }
  ],
  "profiles": [
    { "userId": "bob", "displayName": "Bob B." }
  ]
}"#;

fn seeded() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("remote.json"), SNAPSHOT).unwrap();
    waypoint(dir.path()).arg("init").assert().success();
    dir
}

#[test]
fn init_twice_fails() {
    let dir = tempdir().unwrap();
    waypoint(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized"));
    waypoint(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Already initialized"));
}

#[test]
fn sync_then_count() {
    let dir = seeded();

    waypoint(dir.path())
        .args(["sync", "cities"])
        .assert()
        .success()
        .stdout(predicate::str::contains("loading"))
        .stdout(predicate::str::contains("synced 2 record(s)"));

    waypoint(dir.path())
        .args(["count", "cities"])
        .assert()
        .success()
        .stdout("2\n");
}

#[test]
fn second_sync_starts_from_cache() {
    let dir = seeded();
    waypoint(dir.path()).args(["sync", "cities"]).assert().success();

    waypoint(dir.path())
        .args(["sync", "cities"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cached 2 record(s) (refreshing)"));
}

#[test]
fn parent_scoped_sync() {
    let dir = seeded();

    waypoint(dir.path())
        .args(["refresh", "locations", "--owner", "alice", "--parent", "c1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("synced 2 record(s)"))
        .stdout(predicate::str::contains("Belem Tower"));
}

#[test]
fn offline_sync_serves_stale_cache() {
    let dir = seeded();
    waypoint(dir.path()).args(["sync", "cities"]).assert().success();

    waypoint(dir.path())
        .args(["--offline", "sync", "cities"])
        .assert()
        .success()
        .stdout(predicate::str::contains("error:"))
        .stdout(predicate::str::contains("(2 cached)"));

    waypoint(dir.path())
        .args(["count", "cities"])
        .assert()
        .success()
        .stdout("2\n");
}

#[test]
fn invalidate_clears_kind() {
    let dir = seeded();
    waypoint(dir.path()).args(["sync", "cities"]).assert().success();

    waypoint(dir.path())
        .args(["invalidate", "cities"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 2 cached cities"));
    waypoint(dir.path())
        .args(["count", "cities"])
        .assert()
        .success()
        .stdout("0\n");
}

#[test]
fn unknown_kind_rejected() {
    let dir = seeded();
    waypoint(dir.path())
        .args(["sync", "planets"])
        .assert()
        .failure();
}

#[test]
fn chat_id_is_order_independent() {
    let dir = tempdir().unwrap();
    waypoint(dir.path())
        .args(["chat", "id", "bob", "alice"])
        .assert()
        .success()
        .stdout("alice_bob\n");
}

#[test]
fn chat_round_trip() {
    let dir = seeded();

    waypoint(dir.path())
        .args(["chat", "open", "alice", "bob"])
        .assert()
        .success()
        .stdout("alice_bob\n");
    waypoint(dir.path())
        .args(["chat", "send", "alice_bob", "alice", "Dinner at 8?"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Sent "));

    waypoint(dir.path())
        .args(["chat", "messages", "alice_bob"])
        .assert()
        .success()
        .stdout(predicate::str::contains("alice: Dinner at 8?"));

    waypoint(dir.path())
        .args(["chat", "list", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("alice_bob  Bob B.  Dinner at 8?"));

    waypoint(dir.path())
        .args(["chat", "list", "bob"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[1 unread]"));
}

#[test]
fn chat_with_self_rejected() {
    let dir = seeded();
    waypoint(dir.path())
        .args(["chat", "open", "alice", "alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("yourself"));
}

#[test]
fn outsider_cannot_send() {
    let dir = seeded();
    waypoint(dir.path())
        .args(["chat", "open", "alice", "bob"])
        .assert()
        .success();
    waypoint(dir.path())
        .args(["chat", "send", "alice_bob", "carol", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a participant"));
}
