use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

fn sfs() -> assert_cmd::Command {
    cargo_bin_cmd!("sfs").into()
}

fn arg(p: &Path) -> &str {
    p.to_str().unwrap()
}

/// A small host tree to pack: two files at the root, one nested, one empty.
fn sample_tree(dir: &Path) -> PathBuf {
    let tree = dir.join("tree");
    fs::create_dir_all(tree.join("docs")).unwrap();
    fs::write(tree.join("hello.txt"), b"hello from sfs\n").unwrap();
    fs::write(tree.join("docs/nested.bin"), vec![0xC3u8; 1500]).unwrap();
    fs::write(tree.join("docs/empty"), b"").unwrap();
    tree
}

#[test]
fn help_works() {
    sfs()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Single-file SFS volume toolkit"));
}

#[test]
fn create_list_cat_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let tree = sample_tree(dir.path());
    let image = dir.path().join("tree.sfs");

    sfs()
        .args(["create", arg(&image), arg(&tree)])
        .assert()
        .success();
    assert!(image.exists());

    sfs()
        .args(["list", arg(&image)])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Volume: SFS_VOLUME")
                .and(predicate::str::contains("hello.txt"))
                .and(predicate::str::contains("docs/nested.bin"))
                .and(predicate::str::contains("1500")),
        );

    sfs()
        .args(["cat", arg(&image), "hello.txt"])
        .assert()
        .success()
        .stdout(predicate::eq("hello from sfs\n"));

    sfs()
        .args(["cat", arg(&image), "docs/empty"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn create_honors_ignore() {
    let dir = tempfile::tempdir().unwrap();
    let tree = sample_tree(dir.path());
    fs::create_dir(tree.join("scratch")).unwrap();
    fs::write(tree.join("scratch/junk"), b"junk").unwrap();
    let image = dir.path().join("tree.sfs");

    sfs()
        .args(["create", arg(&image), arg(&tree), "--ignore", "scratch"])
        .assert()
        .success();

    sfs()
        .args(["list", arg(&image)])
        .assert()
        .success()
        .stdout(predicate::str::contains("scratch").not());
}

#[test]
fn add_stores_file_under_its_base_name() {
    let dir = tempfile::tempdir().unwrap();
    let tree = sample_tree(dir.path());
    let image = dir.path().join("tree.sfs");
    sfs()
        .args(["create", arg(&image), arg(&tree)])
        .assert()
        .success();

    let extra = dir.path().join("extra.dat");
    fs::write(&extra, b"late addition").unwrap();
    sfs()
        .args(["add", arg(&image), arg(&extra)])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added extra.dat"));

    sfs()
        .args(["cat", arg(&image), "extra.dat"])
        .assert()
        .success()
        .stdout(predicate::eq("late addition"));
}

#[test]
fn cat_missing_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    let tree = sample_tree(dir.path());
    let image = dir.path().join("tree.sfs");
    sfs()
        .args(["create", arg(&image), arg(&tree)])
        .assert()
        .success();

    sfs()
        .args(["cat", arg(&image), "ghost.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no such file or directory"));
}

#[test]
fn non_volume_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let noise = dir.path().join("noise.bin");
    fs::write(&noise, vec![0x42u8; 128 * 1024]).unwrap();

    sfs()
        .args(["list", arg(&noise)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not an SFS volume"));
}

#[test]
fn resize_shrink_defrag_keep_content_readable() {
    let dir = tempfile::tempdir().unwrap();
    let tree = sample_tree(dir.path());
    let image = dir.path().join("tree.sfs");
    sfs()
        .args(["create", arg(&image), arg(&tree)])
        .assert()
        .success();

    sfs()
        .args(["resize", arg(&image), "1M"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Resized to 2048 blocks"));
    assert_eq!(fs::metadata(&image).unwrap().len(), 1024 * 1024);

    sfs().args(["defrag", arg(&image)]).assert().success();

    sfs()
        .args(["shrink", arg(&image)])
        .assert()
        .success()
        .stdout(predicate::str::contains("Shrunk to"));
    assert!(fs::metadata(&image).unwrap().len() < 1024 * 1024);

    sfs()
        .args(["cat", arg(&image), "docs/nested.bin"])
        .assert()
        .success()
        .stdout(vec![0xC3u8; 1500]);
}

#[test]
fn resize_refuses_to_shrink() {
    let dir = tempfile::tempdir().unwrap();
    let tree = sample_tree(dir.path());
    let image = dir.path().join("tree.sfs");
    sfs()
        .args(["create", arg(&image), arg(&tree)])
        .assert()
        .success();

    sfs()
        .args(["resize", arg(&image), "16K"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid size"));
}
