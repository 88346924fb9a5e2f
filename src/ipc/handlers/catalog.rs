use rusqlite::Connection;
use serde_json::{json, Value};

use crate::ipc::helpers::{
    get_optional_bool, get_optional_i64, get_optional_str, get_required_str, to_result, with_db,
    DbHandler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::catalog::{self, NewClass, NewStudent, NewSubject};

fn schools_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let school_id = catalog::create_school(conn, &name)?;
    Ok(json!({ "schoolId": school_id }))
}

fn subjects_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let subject = NewSubject {
        school_id: get_required_str(params, "schoolId")?,
        name: get_required_str(params, "name")?,
        code: get_required_str(params, "code")?,
        period_max: get_optional_i64(params, "periodMax")?.unwrap_or(20),
    };
    let subject_id = catalog::create_subject(conn, &subject)?;
    Ok(json!({ "subjectId": subject_id }))
}

fn classes_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class = NewClass {
        school_id: get_required_str(params, "schoolId")?,
        name: get_required_str(params, "name")?,
        academic_year: get_required_str(params, "academicYear")?,
        next_class_name: get_optional_str(params, "nextClassName")?,
        is_terminal: get_optional_bool(params, "isTerminal")?.unwrap_or(false),
    };
    let class_id = catalog::create_class(conn, &class)?;
    Ok(json!({ "classId": class_id }))
}

fn classes_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let school_id = get_optional_str(params, "schoolId")?;
    let classes = catalog::list_classes(conn, school_id.as_deref())?;
    Ok(json!({ "classes": to_result(&classes)? }))
}

fn class_subjects_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let period_max = get_optional_i64(params, "periodMax")?;
    let teacher_name = get_optional_str(params, "teacherName")?;
    let id = catalog::upsert_class_subject(
        conn,
        &class_id,
        &subject_id,
        period_max,
        teacher_name.as_deref(),
    )?;
    let resolved = catalog::resolver(conn).period_max(Some(&class_id), &subject_id)?;
    Ok(json!({ "classSubjectId": id, "periodMax": resolved }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student = NewStudent {
        school_id: get_required_str(params, "schoolId")?,
        first_name: get_optional_str(params, "firstName")?.unwrap_or_default(),
        last_name: get_optional_str(params, "lastName")?.unwrap_or_default(),
        matricule: get_optional_str(params, "matricule")?,
        class_id: get_optional_str(params, "classId")?,
    };
    let student_id = catalog::create_student(conn, &student)?;
    Ok(json!({ "studentId": student_id }))
}

fn config_period_max(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let class_id = get_optional_str(params, "classId")?;
    let period_max = catalog::resolver(conn).period_max(class_id.as_deref(), &subject_id)?;
    Ok(json!({ "periodMax": period_max }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: DbHandler = match req.method.as_str() {
        "schools.create" => schools_create,
        "subjects.create" => subjects_create,
        "classes.create" => classes_create,
        "classes.list" => classes_list,
        "classSubjects.upsert" => class_subjects_upsert,
        "students.create" => students_create,
        "config.periodMax" => config_period_max,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
