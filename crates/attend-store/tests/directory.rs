use attend_core::{AccountDirectory, SubjectId};
use attend_store::{export_csv, AccountDetails, NewAccount, Store};

fn account(username: &str, subject: Option<u32>) -> NewAccount {
    NewAccount {
        username: username.into(),
        password: "pw".into(),
        details: AccountDetails {
            subject: subject.map(SubjectId),
            ..AccountDetails::default()
        },
    }
}

#[test]
fn test_initialize_is_idempotent_and_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("data/attendance.db");
    {
        let store = Store::open(&db).unwrap();
        store.initialize().unwrap();
        store.initialize().unwrap();
        store.create_account(&account("ada", Some(7))).unwrap();
        store.set_face_name(SubjectId(7), "Ada Lovelace").unwrap();
    }
    let store = Store::open(&db).unwrap();
    store.initialize().unwrap();
    assert_eq!(store.list_accounts().unwrap().len(), 1);
    assert_eq!(store.face_name(SubjectId(7)).unwrap().as_deref(), Some("Ada Lovelace"));
}

#[test]
fn test_store_as_account_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("attendance.db"))
        .unwrap()
        .with_attendance_dir(dir.path().join("attendance"));
    store.initialize().unwrap();
    store.create_account(&account("ada", Some(7))).unwrap();
    store.create_account(&account("bob", None)).unwrap();
    store.set_face_name(SubjectId(7), "Ada").unwrap();

    let directory: &dyn AccountDirectory<Error = attend_store::StoreError> = &store;
    assert_eq!(directory.subject_for_account("ada").unwrap(), Some(SubjectId(7)));
    assert_eq!(directory.subject_for_account("bob").unwrap(), None);
    assert_eq!(directory.subject_for_account("nobody").unwrap(), None);
    assert_eq!(directory.display_name(SubjectId(7)).unwrap().as_deref(), Some("Ada"));
    assert_eq!(directory.display_name(SubjectId(8)).unwrap(), None);

    directory.record_attendance(SubjectId(7), "Ada").unwrap();
    let rows = store.read_attendance(None).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].subject, SubjectId(7));

    let csv_file = dir
        .path()
        .join("attendance")
        .join(format!("{}.csv", rows[0].date.format("%Y-%m-%d")));
    assert!(csv_file.exists());

    let mut out = Vec::new();
    export_csv(&rows, &mut out).unwrap();
    assert!(String::from_utf8(out).unwrap().starts_with("id,subject,name,timestamp,date"));
}
