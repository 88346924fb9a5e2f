mod test_support;

use serde_json::json;
use test_support::{
    create_class, create_student, grade, open_school, request_err, request_ok, spawn_sidecar,
    temp_dir,
};

#[test]
fn history_follows_promotion_with_rank() {
    let workspace = temp_dir("bulletind-history");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let setup = open_school(&mut stdin, &mut reader, &workspace);
    let c1 = create_class(&mut stdin, &mut reader, &setup, "3ème A", "2025-2026", Some("4ème A"), false);
    let next = create_class(&mut stdin, &mut reader, &setup, "4ème A", "2026-2027", None, false);
    let amani = create_student(&mut stdin, &mut reader, &setup, "Amani", "Kasongo", &c1);
    let baraka = create_student(&mut stdin, &mut reader, &setup, "Baraka", "Mulumba", &c1);
    grade(&mut stdin, &mut reader, &setup, &amani, &c1, "2025-2026", [15.0, 18.0, 30.0, 10.0, 12.0, 20.0]);
    grade(&mut stdin, &mut reader, &setup, &baraka, &c1, "2025-2026", [20.0, 20.0, 40.0, 20.0, 20.0, 40.0]);
    request_ok(&mut stdin, &mut reader, "run", "promotion.run", json!({ "classId": c1 }));

    let h = request_ok(&mut stdin, &mut reader, "h", "students.history", json!({ "studentId": amani }));
    let rows = h["history"].as_array().expect("history");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["classId"].as_str(), Some(c1.as_str()));
    assert_eq!(rows[0]["className"], "3ème A");
    assert_eq!(rows[0]["status"], "promoted");
    assert!(rows[0]["leftAt"].as_str().is_some());
    assert_eq!(rows[0]["rank"].as_u64(), Some(2));
    assert_eq!(rows[0]["classSize"].as_u64(), Some(2));
    assert_eq!(rows[0]["percentage"].as_f64(), Some(65.62));
    assert_eq!(rows[1]["classId"].as_str(), Some(next.as_str()));
    assert_eq!(rows[1]["academicYear"], "2026-2027");
    assert_eq!(rows[1]["status"], "active");
    assert!(rows[1]["leftAt"].is_null());
}

#[test]
fn withdraw_then_list_and_repair() {
    let workspace = temp_dir("bulletind-enrollments");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let setup = open_school(&mut stdin, &mut reader, &workspace);
    let c1 = create_class(&mut stdin, &mut reader, &setup, "3ème A", "2025-2026", None, false);
    let c2 = create_class(&mut stdin, &mut reader, &setup, "3ème B", "2025-2026", None, false);
    let amani = create_student(&mut stdin, &mut reader, &setup, "Amani", "Kasongo", &c1);
    let baraka = create_student(&mut stdin, &mut reader, &setup, "Baraka", "Mulumba", &c2);
    // Graded in 3ème A without ever being enrolled there.
    grade(&mut stdin, &mut reader, &setup, &baraka, &c1, "2025-2026", [10.0, 10.0, 20.0, 10.0, 10.0, 20.0]);

    let withdrawn = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "enrollments.withdraw",
        json!({ "studentId": amani, "classId": c1 }),
    );
    assert_eq!(withdrawn["enrollment"]["status"], "withdrawn");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "w2",
        "enrollments.withdraw",
        json!({ "studentId": amani, "classId": c2 }),
    );
    assert_eq!(error["code"], "not_found");

    let dry = request_ok(&mut stdin, &mut reader, "d", "enrollments.repair", json!({ "dryRun": true }));
    assert_eq!(dry["dryRun"], true);
    assert_eq!(dry["created"].as_u64(), Some(0));
    let entries = dry["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["studentId"].as_str(), Some(baraka.as_str()));
    assert_eq!(entries[0]["status"], "promoted");

    let applied = request_ok(&mut stdin, &mut reader, "a", "enrollments.repair", json!({}));
    assert_eq!(applied["created"].as_u64(), Some(1));

    let listed = request_ok(&mut stdin, &mut reader, "l", "enrollments.list", json!({ "classId": c1 }));
    let rows = listed["enrollments"].as_array().expect("enrollments");
    assert_eq!(rows.len(), 2);
    let statuses: Vec<&str> = rows.iter().filter_map(|r| r["status"].as_str()).collect();
    assert!(statuses.contains(&"withdrawn"));
    assert!(statuses.contains(&"promoted"));
}
