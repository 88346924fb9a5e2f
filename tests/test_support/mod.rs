#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_bulletind");
    let mut child = Command::new(exe)
        .env_remove("BULLETIND_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn bulletind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Sends a request expected to fail and returns its `error` object.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

pub fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

/// A workspace with one school and one subject (period max 20).
pub struct SchoolSetup {
    pub school_id: String,
    pub subject_id: String,
}

pub fn open_school(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> SchoolSetup {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = request_ok(
        stdin,
        reader,
        "school",
        "schools.create",
        json!({ "name": "Institut Umoja" }),
    );
    let school_id = str_field(&school, "schoolId");
    let subject = request_ok(
        stdin,
        reader,
        "subject",
        "subjects.create",
        json!({ "schoolId": school_id, "name": "Mathématiques", "code": "MATH", "periodMax": 20 }),
    );
    SchoolSetup {
        school_id,
        subject_id: str_field(&subject, "subjectId"),
    }
}

/// Creates a class teaching the setup's subject.
pub fn create_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    setup: &SchoolSetup,
    name: &str,
    year: &str,
    next: Option<&str>,
    terminal: bool,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        &format!("class-{}-{}", name, year),
        "classes.create",
        json!({
            "schoolId": setup.school_id,
            "name": name,
            "academicYear": year,
            "nextClassName": next,
            "isTerminal": terminal
        }),
    );
    let class_id = str_field(&created, "classId");
    request_ok(
        stdin,
        reader,
        &format!("cs-{}", class_id),
        "classSubjects.upsert",
        json!({ "classId": class_id, "subjectId": setup.subject_id }),
    );
    class_id
}

pub fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    setup: &SchoolSetup,
    first: &str,
    last: &str,
    class_id: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        &format!("student-{}", first),
        "students.create",
        json!({
            "schoolId": setup.school_id,
            "firstName": first,
            "lastName": last,
            "matricule": format!("MAT-{}", first),
            "classId": class_id
        }),
    );
    str_field(&created, "studentId")
}

/// Writes all six marks for the setup's subject.
pub fn grade(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    setup: &SchoolSetup,
    student_id: &str,
    class_id: &str,
    year: &str,
    marks: [f64; 6],
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        &format!("grade-{}", student_id),
        "bulletins.upsert",
        json!({
            "studentId": student_id,
            "subjectId": setup.subject_id,
            "classId": class_id,
            "academicYear": year,
            "scores": {
                "s1_p1": marks[0],
                "s1_p2": marks[1],
                "s1_exam": marks[2],
                "s2_p3": marks[3],
                "s2_p4": marks[4],
                "s2_exam": marks[5]
            }
        }),
    )
}
