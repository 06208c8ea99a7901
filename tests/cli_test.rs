use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*;
use std::path::PathBuf;
use std::process::Command; // Run programs
use tempfile;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

// Build a deterministic test file mixing compressible text with a stretch
// of pseudo random bytes, so both encoder paths get exercised.
fn make_test_file(temp_dir: &tempfile::TempDir) -> Result<PathBuf,Box<dyn std::error::Error>> {
    let mut data = Vec::new();
    data.extend_from_slice("What a piece of work is a man, How noble in reason, how infinite in faculty.\n".repeat(300).as_bytes());
    let mut seed = 0x6a09e667f3bcc908u64;
    for _i in 0..2000 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        data.extend_from_slice(&seed.to_le_bytes());
    }
    data.extend_from_slice("In action how like an Angel, In apprehension how like a god.\n".repeat(300).as_bytes());
    let path = temp_dir.path().join("original.txt");
    match std::fs::write(&path,data) {
        Ok(_) => Ok(path),
        Err(e) => Err(Box::new(e))
    }
}

#[test]
fn round_trip_through_cli() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = make_test_file(&temp_dir)?;
    let packed_path = temp_dir.path().join("original.sfl");
    let out_path = temp_dir.path().join("expanded.txt");

    let mut cmd = Command::cargo_bin("streamflate")?;
    cmd.arg("compress")
        .arg("-i").arg(&in_path)
        .arg("-o").arg(&packed_path)
        .assert()
        .success()
        .stderr(predicate::str::contains("compressed"));

    let mut cmd = Command::cargo_bin("streamflate")?;
    cmd.arg("expand")
        .arg("-i").arg(&packed_path)
        .arg("-o").arg(&out_path)
        .assert()
        .success()
        .stderr(predicate::str::contains("expanded"));

    match (std::fs::read(in_path),std::fs::read(out_path)) {
        (Ok(v1),Ok(v2)) => {
            assert_eq!(v1,v2);
        },
        _ => panic!("unable to compare output with original")
    }
    Ok(())
}

#[test]
fn text_actually_compresses() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = temp_dir.path().join("verse.txt");
    std::fs::write(&in_path,"To be, or not to be, that is the question.\n".repeat(500))?;
    let packed_path = temp_dir.path().join("verse.sfl");

    let mut cmd = Command::cargo_bin("streamflate")?;
    cmd.arg("compress")
        .arg("-i").arg(&in_path)
        .arg("-o").arg(&packed_path)
        .assert()
        .success();

    let packed = std::fs::metadata(packed_path)?.len();
    let original = std::fs::metadata(in_path)?.len();
    assert!(packed < original / 4);
    Ok(())
}

#[test]
fn expanding_garbage_fails() -> STDRESULT {
    let temp_dir = tempfile::tempdir()?;
    let in_path = temp_dir.path().join("garbage.sfl");
    // final stored block whose length check is wrong
    std::fs::write(&in_path,[0x01u8,0x05,0x00,0x00,0x00])?;
    let out_path = temp_dir.path().join("garbage.txt");

    let mut cmd = Command::cargo_bin("streamflate")?;
    cmd.arg("expand")
        .arg("-i").arg(&in_path)
        .arg("-o").arg(&out_path)
        .assert()
        .failure();
    Ok(())
}
