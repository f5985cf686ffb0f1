use serde::Deserialize;

use super::*;
use crate::args;
use crate::driver::{BindStyle, Rows};
use crate::stub::{Statement, StubDriver};

#[derive(Debug, Deserialize, PartialEq)]
struct Record {
    id: i64,
    key: String,
}

fn two_rows() -> Rows {
    Rows::from_vecs(
        &["id", "key"],
        vec![
            vec![SqlValue::Int(1), SqlValue::from("v")],
            vec![SqlValue::Int(2), SqlValue::from("v")],
        ],
    )
}

fn handler(driver: &StubDriver) -> TxHandler<StubDriver> {
    TxHandler::new(driver.clone())
}

#[tokio::test]
async fn test_select_decodes_rows_and_rebinds() {
    let driver = StubDriver::new().with_rows(two_rows());
    let handler = handler(&driver);
    let mut scope = handler.scope();

    let records: Vec<Record> = handler
        .select(&mut scope, "select * from t where k = ?", &args!["v"])
        .await
        .unwrap();

    assert_eq!(
        records,
        vec![
            Record { id: 1, key: "v".to_string() },
            Record { id: 2, key: "v".to_string() },
        ]
    );
    assert_eq!(
        driver.queries(),
        vec![Statement {
            sql: "select * from t where k = $1".to_string(),
            args: args!["v"],
        }]
    );
    assert!(scope.is_active());
}

#[tokio::test]
async fn test_question_style_driver_gets_query_verbatim() {
    let driver = StubDriver::new()
        .with_bind_style(BindStyle::Question)
        .with_rows(two_rows());
    let handler = handler(&driver);
    let mut scope = handler.scope();

    let _: Vec<Record> = handler
        .select(&mut scope, "select * from t where k = ?", &args!["v"])
        .await
        .unwrap();
    assert_eq!(driver.queries()[0].sql, "select * from t where k = ?");
}

#[tokio::test]
async fn test_begin_happens_once_per_scope() {
    let driver = StubDriver::new();
    let handler = handler(&driver);
    let mut scope = handler.scope();

    let first = handler.get_or_begin(&mut scope).await.unwrap().id();
    let second = handler.get_or_begin(&mut scope).await.unwrap().id();
    handler.execute(&mut scope, "delete from t", &[]).await.unwrap();
    let _: Vec<Record> = handler.select(&mut scope, "select * from t", &[]).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(driver.begins(), 1);
}

#[tokio::test]
async fn test_separate_scopes_get_separate_transactions() {
    let driver = StubDriver::new();
    let handler = handler(&driver);
    let mut a = handler.scope();
    let mut b = handler.scope();

    let id_a = handler.get_or_begin(&mut a).await.unwrap().id();
    let id_b = handler.get_or_begin(&mut b).await.unwrap().id();

    assert_ne!(id_a, id_b);
    assert_eq!(driver.begins(), 2);
}

#[tokio::test]
async fn test_begin_failure_leaves_scope_unstarted() {
    let driver = StubDriver::new();
    driver.fail_begin("too many connections");
    let handler = handler(&driver);
    let mut scope = handler.scope();

    let err = handler.execute(&mut scope, "delete from t", &[]).await.unwrap_err();
    assert!(matches!(err, TxError::BeginError(_)));
    assert_eq!(scope.state(), TxState::Unstarted);
    assert_eq!(driver.rollbacks(), 0);
}

#[tokio::test]
async fn test_execute_binds_each_argument() {
    let driver = StubDriver::new();
    let handler = handler(&driver);
    let mut scope = handler.scope();

    handler
        .execute(
            &mut scope,
            "update users set email = ? where name = ?",
            &args!["d@x", "david"],
        )
        .await
        .unwrap();

    let execs = driver.execs();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].sql, "update users set email = $1 where name = $2");
    assert_eq!(execs[0].args, args!["d@x", "david"]);
}

#[tokio::test]
async fn test_execute_in_expands_list() {
    let driver = StubDriver::new();
    let handler = handler(&driver);
    let mut scope = handler.scope();

    handler
        .execute_in(&mut scope, "delete from t where id in (?)", &args![1, 2, 3])
        .await
        .unwrap();

    let execs = driver.execs();
    assert_eq!(execs[0].sql, "delete from t where id in ($1, $2, $3)");
    assert_eq!(execs[0].args, args![1, 2, 3]);
}

#[tokio::test]
async fn test_select_in_with_no_args_rolls_back() {
    let driver = StubDriver::new();
    let handler = handler(&driver);
    let mut scope = handler.scope();
    handler.get_or_begin(&mut scope).await.unwrap();

    let err = handler
        .select_in::<Vec<Record>>(&mut scope, "select * from t where id in (?)", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, TxError::MissingArgsError));
    assert!(scope.is_rolled_back());
    assert_eq!(driver.rollbacks(), 1);
    assert!(driver.queries().is_empty());
}

#[tokio::test]
async fn test_execute_in_with_no_args_rolls_back() {
    let driver = StubDriver::new();
    let handler = handler(&driver);
    let mut scope = handler.scope();
    handler.get_or_begin(&mut scope).await.unwrap();

    let err = handler
        .execute_in(&mut scope, "delete from t where id in (?)", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, TxError::MissingArgsError));
    assert!(scope.is_rolled_back());
    assert_eq!(driver.rollbacks(), 1);
    assert!(driver.execs().is_empty());
}

#[tokio::test]
async fn test_execute_in_failed_exec_rolls_back() {
    let driver = StubDriver::new();
    driver.fail_exec("foreign key violation");
    let handler = handler(&driver);
    let mut scope = handler.scope();

    let err = handler
        .execute_in(&mut scope, "delete from t where id in (?)", &args![1, 2])
        .await
        .unwrap_err();

    assert!(matches!(err, TxError::ExecError(_)));
    assert_eq!(err.to_string(), "Exec error: foreign key violation");
    assert!(scope.is_rolled_back());
    assert_eq!(driver.rollbacks(), 1);
    assert_eq!(driver.execs()[0].sql, "delete from t where id in ($1, $2)");

    let again = handler
        .execute_in(&mut scope, "delete from t where id in (?)", &args![3])
        .await
        .unwrap_err();
    assert!(matches!(again, TxError::TransactionStateError(TxState::RolledBack)));
    assert_eq!(driver.execs().len(), 1);
}

#[tokio::test]
async fn test_failed_query_rolls_back_and_kills_scope() {
    let driver = StubDriver::new();
    driver.fail_query("relation \"t\" does not exist");
    let handler = handler(&driver);
    let mut scope = handler.scope();

    let err = handler
        .select::<Vec<Record>>(&mut scope, "select * from t", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, TxError::QueryError(_)));
    assert!(scope.is_rolled_back());
    assert_eq!(driver.rollbacks(), 1);

    let calls = driver.total_calls();
    let results = vec![
        handler.execute(&mut scope, "delete from t", &[]).await.map(|_| ()),
        handler.execute_in(&mut scope, "delete from t where id in (?)", &args![1]).await.map(|_| ()),
        handler.select::<Vec<Record>>(&mut scope, "select 1", &[]).await.map(|_| ()),
        handler.select_in::<Vec<Record>>(&mut scope, "select ?", &args![1]).await.map(|_| ()),
        handler.get_or_begin(&mut scope).await.map(|_| ()),
        handler.commit(&mut scope).await,
        handler.rollback(&mut scope).await,
    ];
    for result in results {
        assert!(matches!(
            result,
            Err(TxError::TransactionStateError(TxState::RolledBack))
        ));
    }
    assert_eq!(driver.total_calls(), calls);
}

#[tokio::test]
async fn test_failed_exec_rolls_back() {
    let driver = StubDriver::new();
    driver.fail_exec("duplicate key value");
    let handler = handler(&driver);
    let mut scope = handler.scope();

    let err = handler
        .execute(&mut scope, "insert into t values (?)", &args![1])
        .await
        .unwrap_err();
    assert!(matches!(err, TxError::ExecError(_)));
    assert_eq!(err.to_string(), "Exec error: duplicate key value");
    assert!(scope.is_rolled_back());
}

#[tokio::test]
async fn test_decode_failure_rolls_back() {
    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Wrong {
        id: String,
    }

    let driver = StubDriver::new().with_rows(two_rows());
    let handler = handler(&driver);
    let mut scope = handler.scope();

    let err = handler
        .select::<Vec<Wrong>>(&mut scope, "select * from t", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, TxError::DecodeError(_)));
    assert!(scope.is_rolled_back());
    assert_eq!(driver.rollbacks(), 1);
}

#[tokio::test]
async fn test_failed_rollback_reports_both_errors() {
    let driver = StubDriver::new();
    driver.fail_exec("deadlock detected");
    driver.fail_rollback("connection reset");
    let handler = handler(&driver);
    let mut scope = handler.scope();

    let err = handler
        .execute(&mut scope, "update t set x = 1", &[])
        .await
        .unwrap_err();

    match &err {
        TxError::RollbackFailed { cause, rollback } => {
            assert!(matches!(**cause, TxError::ExecError(_)));
            assert!(matches!(**rollback, TxError::RollbackError(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        err.to_string(),
        "Exec error: deadlock detected; rollback also failed: connection reset"
    );
    assert!(scope.is_rolled_back());
}

#[tokio::test]
async fn test_commit_once_then_scope_is_finished() {
    let driver = StubDriver::new();
    let handler = handler(&driver);
    let mut scope = handler.scope();

    handler.execute(&mut scope, "delete from t", &[]).await.unwrap();
    handler.commit(&mut scope).await.unwrap();
    assert_eq!(driver.commits(), 1);
    assert_eq!(scope.state(), TxState::Committed);

    let err = handler.commit(&mut scope).await.unwrap_err();
    assert!(matches!(
        err,
        TxError::TransactionStateError(TxState::Committed)
    ));
    assert_eq!(driver.commits(), 1);
}

#[tokio::test]
async fn test_commit_error_is_returned_verbatim() {
    let driver = StubDriver::new();
    driver.fail_commit("could not serialize access");
    let handler = handler(&driver);
    let mut scope = handler.scope();

    handler.execute(&mut scope, "delete from t", &[]).await.unwrap();
    let err = handler.commit(&mut scope).await.unwrap_err();

    assert!(matches!(err, TxError::CommitError(_)));
    assert_eq!(err.to_string(), "could not serialize access");
    assert_eq!(driver.commits(), 1);
    assert_eq!(driver.rollbacks(), 0);
    assert!(scope.is_active());

    handler.rollback(&mut scope).await.unwrap();
    assert_eq!(driver.rollbacks(), 1);
}

#[tokio::test]
async fn test_commit_on_unstarted_scope_is_noop() {
    let driver = StubDriver::new();
    let handler = handler(&driver);
    let mut scope = handler.scope();

    handler.commit(&mut scope).await.unwrap();
    assert_eq!(scope.state(), TxState::Committed);
    assert_eq!(driver.total_calls(), 0);
}

#[tokio::test]
async fn test_rollback_on_unstarted_scope_marks_it_dead() {
    let driver = StubDriver::new();
    let handler = handler(&driver);
    let mut scope = handler.scope();

    handler.rollback(&mut scope).await.unwrap();
    assert!(scope.is_rolled_back());
    assert_eq!(driver.total_calls(), 0);
}

#[tokio::test]
async fn test_explicit_rollback_failure_still_kills_scope() {
    let driver = StubDriver::new();
    driver.fail_rollback("connection reset");
    let handler = handler(&driver);
    let mut scope = handler.scope();

    handler.get_or_begin(&mut scope).await.unwrap();
    let err = handler.rollback(&mut scope).await.unwrap_err();
    assert_eq!(err.to_string(), "connection reset");
    assert!(scope.is_rolled_back());
}
