use std::fs;
use std::process::Command;

use survextrap::KnotSet;
use survextrap::fit::{FittedHazard, ModelSpec};
use tempfile::tempdir;

fn exe() -> &'static str {
    env!("CARGO_BIN_EXE_survextrap")
}

fn parse_tsv(stdout: &[u8]) -> Vec<Vec<String>> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| line.split('\t').map(str::to_string).collect())
        .collect()
}

#[test]
fn evaluate_prints_hazard_survival_and_rmst() {
    let tmp = tempdir().expect("temporary directory");
    let model_path = tmp.path().join("model.toml");
    // Flat coefficients on two equal spans with degree 1 give a constant
    // hazard of exp(alpha) / 4 = 0.25.
    let hazard = FittedHazard {
        knots: KnotSet::new(vec![0.0, 2.0, 4.0]).expect("knots"),
        degree: 1,
        alpha: 0.0,
        coefs: vec![0.25, 0.5, 0.25],
        pcure: None,
    };
    hazard.save(model_path.to_str().expect("path str")).expect("save model");

    let output = Command::new(exe())
        .args([
            "evaluate",
            model_path.to_str().expect("path str"),
            "--times",
            "1,2,8",
            "--rmst",
        ])
        .output()
        .expect("run survextrap cli");
    assert!(output.status.success(), "CLI exited with {:?}", output.status);

    let rows = parse_tsv(&output.stdout);
    assert_eq!(rows[0], vec!["time", "hazard", "survival", "rmst"]);
    assert_eq!(rows.len(), 4);
    for row in &rows[1..] {
        let t: f64 = row[0].parse().expect("time");
        let h: f64 = row[1].parse().expect("hazard");
        let s: f64 = row[2].parse().expect("survival");
        let r: f64 = row[3].parse().expect("rmst");
        assert!((h - 0.25).abs() < 1e-10);
        assert!((s - (-0.25 * t).exp()).abs() < 1e-10);
        assert!((r - (1.0 - (-0.25 * t).exp()) / 0.25).abs() < 1e-7);
    }
}

#[test]
fn fit_then_evaluate_round_trips_through_model_toml() {
    let tmp = tempdir().expect("temporary directory");
    let spec_path = tmp.path().join("spec.toml");
    let data_path = tmp.path().join("data.tsv");
    let model_path = tmp.path().join("fitted.toml");

    let spec = ModelSpec {
        knots: Some(KnotSet::new(vec![0.0, 1.0, 3.0]).expect("knots")),
        ..ModelSpec::default()
    };
    spec.save(spec_path.to_str().expect("path str")).expect("save spec");

    let mut data = String::from("time\tstatus\n");
    for i in 1..=60 {
        let t = -(1.0 - (i as f64 - 0.5) / 60.0).ln();
        if t < 3.0 {
            data.push_str(&format!("{t}\t1\n"));
        } else {
            data.push_str("3\t0\n");
        }
    }
    fs::write(&data_path, data).expect("write data");

    let status = Command::new(exe())
        .current_dir(tmp.path())
        .args([
            "fit",
            spec_path.to_str().expect("path str"),
            "--data",
            data_path.to_str().expect("path str"),
            "--output",
            model_path.to_str().expect("path str"),
        ])
        .output()
        .expect("run survextrap fit");
    assert!(status.status.success(), "fit exited with {:?}", status.status);
    let modes = parse_tsv(&status.stdout);
    assert_eq!(modes[0], vec!["parameter", "mode"]);
    assert_eq!(modes[1][0], "alpha0");
    assert!(model_path.exists(), "fitted model missing");

    let output = Command::new(exe())
        .args(["evaluate", model_path.to_str().expect("path str"), "--times", "0.5,2"])
        .output()
        .expect("run survextrap evaluate");
    assert!(output.status.success());
    let rows = parse_tsv(&output.stdout);
    for row in &rows[1..] {
        let s: f64 = row[2].parse().expect("survival");
        assert!(s > 0.0 && s < 1.0);
    }
}

#[test]
fn summarize_reads_draws_and_rejects_mismatched_headers() {
    let tmp = tempdir().expect("temporary directory");
    let spec_path = tmp.path().join("spec.toml");
    let draws_path = tmp.path().join("draws.csv");
    ModelSpec {
        degree: 1,
        ..ModelSpec::default()
    }
    .save(spec_path.to_str().expect("path str"))
    .expect("save spec");

    // Degree 1 with one internal knot has three terms, so two shape deviations.
    fs::write(
        &draws_path,
        "alpha0,shape_err[1],shape_err[2]\n0.0,0.0,0.0\n0.1,0.0,0.0\n-0.1,0.0,0.0\n",
    )
    .expect("write draws");
    let output = Command::new(exe())
        .args([
            "summarize",
            spec_path.to_str().expect("path str"),
            "--draws",
            draws_path.to_str().expect("path str"),
            "--knots",
            "0,2,4",
            "--times",
            "1,3",
        ])
        .output()
        .expect("run survextrap summarize");
    assert!(output.status.success(), "summarize exited with {:?}", output.status);
    let rows = parse_tsv(&output.stdout);
    assert_eq!(rows[0][0], "quantity");
    assert_eq!(rows.len(), 1 + 2 + 2);
    let hazard_median: f64 = rows[1][2].parse().expect("median");
    assert!((hazard_median - 0.25).abs() < 1e-10);

    fs::write(&draws_path, "alpha0,shape[1],shape[2]\n0.0,0.0,0.0\n").expect("write draws");
    let output = Command::new(exe())
        .args([
            "summarize",
            spec_path.to_str().expect("path str"),
            "--draws",
            draws_path.to_str().expect("path str"),
            "--knots",
            "0,2,4",
            "--times",
            "1",
        ])
        .output()
        .expect("run survextrap summarize");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}
