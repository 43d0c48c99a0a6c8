#![cfg(unix)]

mod test_support;

use mockito::Matcher;
use reconcile_module::{Reconciler, ReferenceBuilder};
use std::error::Error;
use sync_module::adapters::{GmailThreadSource, TaskwarriorStore};
use sync_module::google_auth::StaticToken;
use sync_module::{Driver, RunMode};
use tempfile::TempDir;
use test_support::{start_mockito_server, task_log, write_fake_task, NEW_TASK_UUID};

const LABEL: &str = "gtd/next-action";

/// x2 is completed and already linked to t2; x3 has lost its thread.
const EXPORT: &str = r#"[
  {"id":0,"uuid":"x2","description":"Done item","status":"completed","tags":["gmail"],
   "annotations":[{"entry":"20240101T000000Z","description":"https://mail.google.com/mail/u/0/#inbox/m2"}]},
  {"id":3,"uuid":"x3","description":"Old","status":"pending","tags":["gmail"]}
]"#;

fn mock_mailbox(server: &mut mockito::ServerGuard) -> Vec<mockito::Mock> {
    let json = |mock: mockito::Mock| {
        mock.with_status(200)
            .with_header("content-type", "application/json")
    };
    vec![
        json(server.mock("GET", "/gmail/v1/users/me/labels"))
            .with_body(r#"{"labels":[{"id":"Label_1","name":"gtd/next-action"}]}"#)
            .create(),
        json(server.mock("GET", "/gmail/v1/users/me/threads"))
            .match_query(Matcher::UrlEncoded("labelIds".to_string(), "Label_1".to_string()))
            .with_body(r#"{"threads":[{"id":"t1"},{"id":"t2"}]}"#)
            .create(),
        json(server.mock("GET", "/gmail/v1/users/me/threads/t1"))
            .match_query(Matcher::Any)
            .with_body(
                r#"{"id":"t1","messages":[{"id":"m1","payload":{"headers":[{"name":"Subject","value":"Fix bug"}]}}]}"#,
            )
            .create(),
        json(server.mock("GET", "/gmail/v1/users/me/threads/t2"))
            .match_query(Matcher::Any)
            .with_body(
                r#"{"id":"t2","messages":[{"id":"m2","payload":{"headers":[{"name":"Subject","value":"Done item"}]}}]}"#,
            )
            .create(),
    ]
}

fn created_json() -> String {
    format!(
        r#"[{{"id":4,"uuid":"{}","description":"Fix bug","status":"pending","tags":["gmail"]}}]"#,
        NEW_TASK_UUID
    )
}

#[test]
fn one_pass_creates_closes_and_unlabels() -> Result<(), Box<dyn Error>> {
    let Some(mut server) = start_mockito_server("one_pass_creates_closes_and_unlabels") else {
        return Ok(());
    };
    let temp = TempDir::new()?;
    let task_bin = write_fake_task(temp.path(), EXPORT, &created_json())?;
    let _mailbox = mock_mailbox(&mut server);
    let unlabel = server
        .mock("POST", "/gmail/v1/users/me/threads/t2/modify")
        .match_body(Matcher::PartialJson(
            serde_json::json!({"removeLabelIds": ["Label_1"]}),
        ))
        .with_status(200)
        .with_body(r#"{"id":"t2"}"#)
        .expect(1)
        .create();

    let driver = Driver::new(
        GmailThreadSource::new(Box::new(StaticToken::new("tok")), server.url()),
        TaskwarriorStore::new(task_bin),
        Reconciler::new("gmail", ReferenceBuilder::default()),
        LABEL,
    );

    let report = driver.run(RunMode::Apply)?;

    unlabel.assert();
    assert_eq!(report.created, 1);
    assert_eq!(report.annotated, 1);
    assert_eq!(report.labels_removed, 1);
    assert_eq!(report.marked_done, 1);
    assert!(!report.has_failures(), "{report}");

    let log = task_log(temp.path());
    let commands: Vec<&str> = log
        .iter()
        .map(|line| line.trim_start_matches("rc.confirmation=off rc.json.array=on "))
        .collect();
    assert_eq!(
        commands,
        vec![
            "rc.verbose=nothing +gmail export".to_string(),
            "rc.verbose=new-uuid add +gmail -- Fix bug".to_string(),
            format!("rc.verbose=nothing {} export", NEW_TASK_UUID),
            format!(
                "{} annotate -- https://mail.google.com/mail/u/0/#inbox/m1",
                NEW_TASK_UUID
            ),
            "x3 done".to_string(),
        ]
    );
    Ok(())
}

#[test]
fn dry_run_only_reads() -> Result<(), Box<dyn Error>> {
    let Some(mut server) = start_mockito_server("dry_run_only_reads") else {
        return Ok(());
    };
    let temp = TempDir::new()?;
    let task_bin = write_fake_task(temp.path(), EXPORT, &created_json())?;
    let _mailbox = mock_mailbox(&mut server);
    let unlabel = server
        .mock("POST", Matcher::Regex(r"^/gmail/v1/users/me/threads/.*/modify$".to_string()))
        .expect(0)
        .create();

    let driver = Driver::new(
        GmailThreadSource::new(Box::new(StaticToken::new("tok")), server.url()),
        TaskwarriorStore::new(task_bin),
        Reconciler::new("gmail", ReferenceBuilder::default()),
        LABEL,
    );

    let report = driver.run(RunMode::DryRun)?;

    unlabel.assert();
    assert_eq!(report.planned.len(), 4);
    assert_eq!(task_log(temp.path()).len(), 1);
    Ok(())
}
