mod test_support;

use std::sync::Arc;
use std::thread;

use sqlflow_core::{CoreError, Decision, DecisionOutcome, OrderProgress, SqlKind};
use test_support::*;

#[test]
fn unanimity_approves_exactly_once_after_last_pass() {
    let (flow, instance) = flow_with(Arc::new(ScriptedExecutor::default()));
    let order = flow.submit(new_order(instance, "UPDATE t SET a=1; UPDATE t SET b=2", SqlKind::Dml, &["ann", "ben", "cid"]))
                    .unwrap();

    for voter in ["cid", "ann"] {
        let res = flow.decide(order.id, voter, Decision::Pass, "").unwrap();
        assert!(matches!(res.outcome, DecisionOutcome::Recorded { .. }));
        assert_eq!(res.order.progress, OrderProgress::Pending);
        assert!(flow.list_tasks(order.id).unwrap().is_empty());
    }
    let res = flow.decide(order.id, "ben", Decision::Pass, "lgtm").unwrap();
    assert_eq!(res.outcome, DecisionOutcome::Approved);
    assert_eq!(res.tasks_created, 2);
    assert_eq!(flow.list_tasks(order.id).unwrap().len(), 2);

    let again = flow.decide(order.id, "ben", Decision::Pass, "");
    assert!(matches!(again, Err(CoreError::InvalidState(_))));
    assert_eq!(flow.list_tasks(order.id).unwrap().len(), 2);
}

#[test]
fn one_reject_vetoes_and_closes_voting() {
    let (flow, instance) = flow_with(Arc::new(ScriptedExecutor::default()));
    let order = flow.submit(new_order(instance, "UPDATE t SET a=1", SqlKind::Dml, &["ann", "ben", "cid"])).unwrap();
    flow.decide(order.id, "ann", Decision::Pass, "").unwrap();
    flow.decide(order.id, "ben", Decision::Pass, "").unwrap();
    let res = flow.decide(order.id, "cid", Decision::Reject, "too risky").unwrap();
    assert_eq!(res.outcome, DecisionOutcome::Rejected);
    assert_eq!(flow.get_order(order.id).unwrap().progress, OrderProgress::Rejected);
    assert!(matches!(flow.decide(order.id, "ann", Decision::Pass, ""), Err(CoreError::InvalidState(_))));
    assert!(flow.list_tasks(order.id).unwrap().is_empty());

    let logs = flow.list_logs(order.id).unwrap();
    assert!(logs.iter().any(|l| l.username == "cid" && l.msg.contains("too risky")));
}

#[test]
fn admin_approves_empty_approver_list_in_one_call() {
    let (flow, instance) = flow_with(Arc::new(ScriptedExecutor::default()));
    let order = flow.submit(new_order(instance, "UPDATE t SET a=1", SqlKind::Dml, &[])).unwrap();
    assert!(matches!(flow.decide(order.id, APPLICANT, Decision::Pass, ""), Err(CoreError::Forbidden(_))));
    let res = flow.decide(order.id, ADMIN, Decision::Pass, "").unwrap();
    assert_eq!(res.outcome, DecisionOutcome::Approved);
}

#[test]
fn alter_plus_update_rejected_as_dml_and_split_in_two_as_ddl() {
    let (flow, instance) = flow_with(Arc::new(ScriptedExecutor::default()));
    let content = "ALTER TABLE t ADD COLUMN x INT; UPDATE t SET x=1";
    let tagged_dml = flow.submit(new_order(instance, content, SqlKind::Dml, &[]));
    assert!(matches!(tagged_dml, Err(CoreError::Validation(_))));

    let order = flow.submit(new_order(instance, content, SqlKind::Ddl, &[])).unwrap();
    let res = flow.decide(order.id, ADMIN, Decision::Pass, "").unwrap();
    assert_eq!(res.tasks_created, 2);
    let tasks = flow.list_tasks(order.id).unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].sql, "ALTER TABLE t ADD COLUMN x INT");
    assert_eq!(tasks[1].sql, "UPDATE t SET x=1");
}

#[test]
fn concurrent_votes_approve_once_and_split_once() {
    let (flow, instance) = flow_with(Arc::new(ScriptedExecutor::default()));
    let voters = ["v1", "v2", "v3", "v4", "v5", "v6"];
    let order = flow.submit(new_order(instance, "UPDATE a SET x=1; UPDATE b SET x=1; UPDATE c SET x=1", SqlKind::Dml, &voters))
                    .unwrap();
    let flow = Arc::new(flow);
    let handles: Vec<_> = voters.iter()
                                .map(|v| {
                                    let flow = flow.clone();
                                    let v = v.to_string();
                                    thread::spawn(move || flow.orders().decide(order.id, &v, Decision::Pass, "").unwrap())
                                })
                                .collect();
    let approvals = handles.into_iter()
                           .map(|h| h.join().unwrap())
                           .filter(|r| r.outcome == DecisionOutcome::Approved)
                           .count();
    assert_eq!(approvals, 1);
    assert_eq!(flow.list_tasks(order.id).unwrap().len(), 3);
}

#[test]
fn audit_findings_block_submission() {
    use sqlflow_core::{AuditFinding, AuditParams, SqlAuditor};

    struct NoWhere;
    impl SqlAuditor for NoWhere {
        fn check(&self, sql: &str, _kind: SqlKind, _params: &AuditParams) -> Vec<AuditFinding> {
            if sql.to_lowercase().contains("where") {
                vec![]
            } else {
                vec![AuditFinding::error("UPDATE without WHERE", "add a WHERE clause")]
            }
        }
    }

    let (catalog, instance) = catalog();
    let flow = sqlflow_core::SqlFlow::builder(Arc::new(sqlflow_core::InMemoryOrderStore::new()),
                                              Arc::new(ScriptedExecutor::default()),
                                              catalog).auditor(Arc::new(NoWhere))
                                                      .build();
    match flow.submit(new_order(instance, "UPDATE t SET a=1", SqlKind::Dml, &[])) {
        Err(CoreError::AuditRejected(findings)) => assert_eq!(findings[0].fix_suggestion, "add a WHERE clause"),
        other => panic!("expected audit rejection, got {other:?}"),
    }
    assert!(flow.submit(new_order(instance, "UPDATE t SET a=1 WHERE id=1", SqlKind::Dml, &[])).is_ok());
    // las exportaciones no pasan por la auditoría
    assert!(flow.submit(new_order(instance, "SELECT * FROM t", SqlKind::Export, &[])).is_ok());
}

#[test]
fn close_is_limited_to_owner_or_admin_and_is_final() {
    let (flow, instance) = flow_with(Arc::new(ScriptedExecutor::default()));
    let order = flow.submit(new_order(instance, "UPDATE t SET a=1 WHERE id=1", SqlKind::Dml, &["ann"])).unwrap();
    assert!(matches!(flow.close(order.id, "mallory", "nope"), Err(CoreError::Forbidden(_))));

    let closed = flow.close(order.id, APPLICANT, "duplicate").unwrap();
    assert_eq!(closed.progress, OrderProgress::Closed);
    assert!(matches!(flow.close(order.id, ADMIN, ""), Err(CoreError::InvalidState(_))));
    assert!(matches!(flow.decide(order.id, "ann", Decision::Pass, ""), Err(CoreError::InvalidState(_))));
    assert!(matches!(flow.update_progress(order.id, ADMIN, OrderProgress::Approved), Err(CoreError::InvalidState(_))));
    assert!(flow.list_logs(order.id).unwrap().iter().any(|l| l.msg == "closed: duplicate"));
}
