use mfbin_core::codec::{BudgetHeader, RecordWriter, SnapshotHeader, TermName};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const OUTPUT_CONTROL: &str = "\
0 0 30 40
1 0 0 5
0 0 0 0
0 0 0 0
1 0 0 0
0 0 0 0
0 0 0 0
1 0 0 5
0 0 0 0
0 0 0 0
";

fn budget_header(term: &str, period: i32, layer_flag: i32) -> BudgetHeader {
    BudgetHeader {
        time_step: 1,
        stress_period: period,
        term_name: TermName::new(term).expect("term should build"),
        cols: 2,
        rows: 2,
        layer_flag,
    }
}

/// Two layers of a 2x2 grid; periods 1 and 3 saved.
fn write_budget(path: &Path) {
    let mut writer = RecordWriter::new(Vec::new());
    for period in [1, 3] {
        let storage: Vec<f32> = (0..8).map(|cell| period as f32 * 10.0 + cell as f32).collect();
        writer
            .write_full_budget(&budget_header("STORAGE", period, 2), &storage)
            .expect("storage record should be written");
        for layer in 1..=2 {
            writer
                .write_compact_layer(
                    &budget_header("FLOW RIGHT FACE", period, -2),
                    period as f32,
                    layer,
                    &[-2.0; 4],
                )
                .expect("right face record should be written");
            writer
                .write_compact_layer(
                    &budget_header("FLOW FRONT FACE", period, -2),
                    period as f32,
                    layer,
                    &[0.0; 4],
                )
                .expect("front face record should be written");
        }
    }
    fs::write(path, writer.into_inner()).expect("budget file should be written");
}

fn write_heads(path: &Path) {
    let mut writer = RecordWriter::new(Vec::new());
    for period in 1..=3 {
        for layer in 1..=2 {
            let header = SnapshotHeader {
                time_step: 1,
                stress_period: period,
                partial_time: 1.0,
                total_time: period as f32,
                term_name: TermName::new("HEAD").expect("term should build"),
                cols: 2,
                rows: 2,
                layer,
            };
            writer
                .write_snapshot(&header, &[f32::NAN, 5.0, 6.0, 7.0])
                .expect("head record should be written");
        }
    }
    fs::write(path, writer.into_inner()).expect("head file should be written");
}

/// Name file, DIS, LPF and OC around `model.cbc` and `model.hds`.
fn write_model(dir: &Path) {
    fs::write(
        dir.join("model.nam"),
        "LIST 2 model.lst\nDIS 11 model.dis\nLPF 12 model.lpf\nOC 14 model.oc\nDATA(BINARY) 50 model.cbc\nDATA(BINARY) 51 model.hds\n",
    )
    .expect("name file should be written");
    fs::write(dir.join("model.dis"), "2 2 2 3 4 2\n0 0\nCONSTANT 100.0\nCONSTANT 100.0\n")
        .expect("dis file should be written");
    fs::write(dir.join("model.lpf"), "50 -1.0E30 0\n").expect("lpf file should be written");
    fs::write(dir.join("model.oc"), OUTPUT_CONTROL).expect("oc file should be written");
    write_budget(&dir.join("model.cbc"));
    write_heads(&dir.join("model.hds"));
}

fn run_mfbin(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mfbin"))
        .arg("--quiet")
        .args(args)
        .output()
        .expect("mfbin should run")
}

fn json_lines(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line should be json"))
        .collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn budget_command_reports_unsaved_periods() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_model(temp.path());
    let nam = path_arg(&temp.path().join("model.nam"));

    let output = run_mfbin(&["budget", "--nam", &nam, "--terms", "STORAGE", "--layers", "1"]);
    assert!(
        output.status.success(),
        "budget should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let lines = json_lines(&output);
    let (report, slices) = lines.split_last().expect("output should not be empty");
    assert_eq!(report["kind"], "report");
    assert_eq!(report["command"], "budget");
    assert_eq!(report["missing_periods"], serde_json::json!([2]));
    assert_eq!(report["outcome"], "end_of_stream");

    let labels: Vec<&str> = slices
        .iter()
        .map(|line| line["label"].as_str().expect("label should be a string"))
        .collect();
    assert_eq!(labels, vec!["STORAGE_1_00001_1", "STORAGE_1_00003_1"]);
    assert_eq!(slices[1]["summary"]["min"], 30.0);
}

#[test]
fn grid_flags_stand_in_for_a_name_file() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_model(temp.path());
    let cbc = path_arg(&temp.path().join("model.cbc"));
    let oc = path_arg(&temp.path().join("model.oc"));

    let output = run_mfbin(&[
        "budget", "--grid", "2,2,2,3", "--file", &cbc, "--oc", &oc, "--terms", "FACE",
        "--periods", "3",
    ]);
    assert!(output.status.success());

    let lines = json_lines(&output);
    let slices: Vec<&Value> = lines.iter().filter(|line| line["kind"] == "slice").collect();
    assert_eq!(slices.len(), 4);
    assert!(slices.iter().all(|line| line["period"] == 3));
    let report = lines.last().expect("report line should be written");
    assert_eq!(report["seeks"], 1);
}

#[test]
fn vectors_command_emits_resampled_fields() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_model(temp.path());
    let nam = path_arg(&temp.path().join("model.nam"));

    let output = run_mfbin(&["vectors", "--nam", &nam, "--resample", "2", "--periods", "1"]);
    assert!(output.status.success());

    let lines = json_lines(&output);
    let vectors: Vec<&Value> = lines.iter().filter(|line| line["kind"] == "vector").collect();
    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0]["direction_label"], "LAY01DIRX_00001");
    assert_eq!(vectors[0]["magnitude"]["max"], 8.0);
    assert_eq!(vectors[0]["direction"]["max"], 180.0);
    assert_eq!(vectors[1]["layer"], 2);
}

#[test]
fn heads_command_applies_sentinels() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_model(temp.path());
    let nam = path_arg(&temp.path().join("model.nam"));
    let hds = path_arg(&temp.path().join("model.hds"));

    let output = run_mfbin(&["heads", "--nam", &nam, "--file", &hds, "--periods", "2-3", "--layers", "2"]);
    assert!(output.status.success());

    let lines = json_lines(&output);
    let slices: Vec<&Value> = lines.iter().filter(|line| line["kind"] == "slice").collect();
    let labels: Vec<&str> = slices
        .iter()
        .map(|line| line["label"].as_str().expect("label should be a string"))
        .collect();
    assert_eq!(labels, vec!["HEAD_00002_2", "HEAD_00003_2"]);
    assert_eq!(slices[0]["summary"]["min"], -998.0);
}

#[test]
fn conc_command_without_times_emits_every_record() {
    let temp = TempDir::new().expect("tempdir should be created");
    let ucn = temp.path().join("model.ucn");
    let mut writer = RecordWriter::new(Vec::new());
    for (period, time) in [(1, 10.0_f32), (2, 20.0), (3, 30.0)] {
        for layer in 1..=2 {
            let header = SnapshotHeader {
                time_step: 1,
                stress_period: period,
                partial_time: time,
                total_time: time,
                term_name: TermName::new("CONCENTRATION").expect("term should build"),
                cols: 2,
                rows: 2,
                layer,
            };
            writer
                .write_snapshot(&header, &[time; 4])
                .expect("concentration record should be written");
        }
    }
    fs::write(&ucn, writer.into_inner()).expect("concentration file should be written");
    let ucn = path_arg(&ucn);

    let output = run_mfbin(&["conc", "--grid", "2,2,2,3", "--file", &ucn]);
    assert!(output.status.success());

    let lines = json_lines(&output);
    let (report, slices) = lines.split_last().expect("output should not be empty");
    assert_eq!(slices.len(), 6);
    assert_eq!(slices[0]["label"], "CONC_00010_1");
    assert_eq!(slices[5]["label"], "CONC_00030_2");
    assert_eq!(report["outcome"], "end_of_stream");
}

#[test]
fn terms_command_lists_first_period_terms() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_model(temp.path());
    let nam = path_arg(&temp.path().join("model.nam"));

    let output = run_mfbin(&["terms", "--nam", &nam]);
    assert!(output.status.success());

    let lines = json_lines(&output);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["framing"], "stream");
    assert_eq!(
        lines[0]["terms"],
        serde_json::json!(["STORAGE", "FLOW_RIGHT_FACE", "FLOW_FRONT_FACE"])
    );
}

#[test]
fn malformed_range_exits_with_input_code() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_model(temp.path());
    let nam = path_arg(&temp.path().join("model.nam"));

    let output = run_mfbin(&["budget", "--nam", &nam, "--periods", "1-x"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("INPUT.RANGE_SYNTAX"), "stderr: {stderr}");
    assert!(stderr.contains("FATAL EXIT CODE: 2"));
}

#[test]
fn truncated_budget_exits_with_decode_code() {
    let temp = TempDir::new().expect("tempdir should be created");
    let cbc = temp.path().join("short.cbc");
    fs::write(&cbc, [0_u8; 10]).expect("short file should be written");
    let cbc = path_arg(&cbc);

    let output = run_mfbin(&["terms", "--grid", "1,2,2,1", "--file", &cbc]);
    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stderr).contains("FATAL EXIT CODE: 4"));
}

#[test]
fn missing_geometry_is_a_usage_error() {
    let output = run_mfbin(&["terms", "--file", "anything.cbc"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("INPUT.CLI_USAGE"));
}
