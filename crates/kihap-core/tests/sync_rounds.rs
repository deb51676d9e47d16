//! End-to-end sync rounds over an in-memory local store and remote store.

use std::time::Duration;

use kihap_core::remote::{RemoteFault, RemoteOperation};
use kihap_core::sync::{ChangePuller, Reconciler};
use kihap_core::{
    CancelToken, DatabaseService, Error, ErrorKind, FailurePolicy, MemoryRemoteStore,
    SyncOptions, SyncRecord, SyncService, SyncTable, TableStatus, Watermark,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn record(table: SyncTable, row: Value) -> SyncRecord {
    SyncRecord::from_json(table, row).unwrap()
}

fn lead(id: &str, status: &str, updated_at: &str) -> SyncRecord {
    record(
        SyncTable::Leads,
        json!({ "id": id, "name": "Lead", "status": status, "updated_at": updated_at }),
    )
}

fn at(raw: &str) -> Watermark {
    Watermark::parse(raw).unwrap()
}

async fn service() -> SyncService<MemoryRemoteStore> {
    service_with(SyncOptions::default()).await
}

async fn service_with(options: SyncOptions) -> SyncService<MemoryRemoteStore> {
    let local = DatabaseService::open_in_memory().await.unwrap();
    SyncService::new(local, MemoryRemoteStore::new(), options)
}

async fn snapshot(
    service: &SyncService<MemoryRemoteStore>,
    table: SyncTable,
    ids: &[&str],
) -> (Vec<Option<SyncRecord>>, Vec<SyncRecord>) {
    let mut local = Vec::new();
    for id in ids {
        local.push(service.local().get_record(table, id).await.unwrap());
    }
    (local, service.remote().records(table).await)
}

#[tokio::test(flavor = "multi_thread")]
async fn reconcile_is_idempotent() {
    let service = service().await;
    let options = SyncOptions::default();
    let reconciler = Reconciler::new(service.local(), service.remote(), &options);

    let remote_changes = vec![
        lead("R1", "novo", "2024-01-02T00:00:00Z"),
        lead("R2", "contato", "2024-01-02T06:00:00Z"),
    ];
    let local_changes = vec![lead("L1", "matriculado", "2024-01-03T00:00:00Z")];
    for row in &local_changes {
        service.local().upsert_record(row).await.unwrap();
    }
    let round_start = at("2024-01-04T00:00:00Z");

    reconciler
        .reconcile(
            SyncTable::Leads,
            round_start,
            &remote_changes,
            &local_changes,
            &CancelToken::never(),
        )
        .await
        .unwrap();
    let once = snapshot(&service, SyncTable::Leads, &["R1", "R2", "L1"]).await;

    reconciler
        .reconcile(
            SyncTable::Leads,
            round_start,
            &remote_changes,
            &local_changes,
            &CancelToken::never(),
        )
        .await
        .unwrap();
    let twice = snapshot(&service, SyncTable::Leads, &["R1", "R2", "L1"]).await;

    assert_eq!(once, twice);
    assert_eq!(
        service.local().watermark(SyncTable::Leads).await.unwrap(),
        round_start
    );
    // Nothing was rejected, so nothing is logged as a conflict
    assert!(service.local().list_conflicts(10).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn newer_remote_row_replaces_local_row() {
    let service = service().await;
    service
        .local()
        .upsert_record(&lead("L1", "novo", "2024-01-01T00:00:00Z"))
        .await
        .unwrap();
    let incoming = lead("L1", "contato", "2024-01-02T00:00:00Z");

    let applied = service
        .local()
        .apply_remote_batch(SyncTable::Leads, std::slice::from_ref(&incoming))
        .await
        .unwrap();

    assert_eq!(applied.applied, 1);
    assert_eq!(
        service.local().get_record(SyncTable::Leads, "L1").await.unwrap(),
        Some(incoming)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn older_or_equal_remote_rows_leave_local_row_untouched() {
    let service = service().await;
    let current = lead("L1", "matriculado", "2024-01-05T00:00:00Z");
    service.local().upsert_record(&current).await.unwrap();

    let applied = service
        .local()
        .apply_remote_batch(
            SyncTable::Leads,
            &[
                lead("L1", "perdido", "2024-01-04T00:00:00Z"),
                lead("L1", "perdido", "2024-01-05T00:00:00Z"),
                lead("L2", "novo", "2024-01-04T00:00:00Z"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(applied.applied, 1);
    assert_eq!(applied.skipped, 2);
    assert_eq!(
        service.local().get_record(SyncTable::Leads, "L1").await.unwrap(),
        Some(current)
    );
    assert!(service
        .local()
        .get_record(SyncTable::Leads, "L2")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn watermark_moves_forward_only_on_success() {
    let service = service().await;
    let before_round = Watermark::now();

    service
        .sync_table(SyncTable::Units, &CancelToken::never())
        .await
        .unwrap();
    let after_first = service.local().watermark(SyncTable::Units).await.unwrap();
    assert!(after_first >= before_round);

    // An older value never replaces a newer one
    service
        .local()
        .set_watermark(SyncTable::Units, at("2020-01-01T00:00:00Z"))
        .await
        .unwrap();
    assert_eq!(
        service.local().watermark(SyncTable::Units).await.unwrap(),
        after_first
    );

    service.remote().fail_table(SyncTable::Units, "HTTP 500").await;
    let error = service
        .sync_table(SyncTable::Units, &CancelToken::never())
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::RemoteUnavailable);
    assert_eq!(
        service.local().watermark(SyncTable::Units).await.unwrap(),
        after_first
    );

    service.remote().clear_faults().await;
    service
        .sync_table(SyncTable::Units, &CancelToken::never())
        .await
        .unwrap();
    assert!(service.local().watermark(SyncTable::Units).await.unwrap() >= after_first);
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_rows_newer_than_watermark_are_always_pulled() {
    let service = service().await;
    let options = SyncOptions::default();
    service
        .remote()
        .insert(lead("L1", "novo", "2024-01-02T00:00:00.250Z"))
        .await;
    let puller = ChangePuller::new(service.local(), service.remote(), &options);

    for since in [
        Watermark::EPOCH,
        at("2024-01-01T23:59:59Z"),
        at("2024-01-02T00:00:00.249Z"),
    ] {
        let pulled = puller
            .pull_remote(SyncTable::Leads, since, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(pulled.len(), 1, "since {since}");
    }

    let pulled = puller
        .pull_remote(
            SyncTable::Leads,
            at("2024-01-02T00:00:00.250Z"),
            &CancelToken::never(),
        )
        .await
        .unwrap();
    assert!(pulled.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn delta_larger_than_a_remote_page_is_pulled_completely() {
    let local = DatabaseService::open_in_memory().await.unwrap();
    let remote = MemoryRemoteStore::new().with_page_size(3);
    for minute in 0..10 {
        remote
            .insert(lead(
                &format!("L{minute}"),
                "novo",
                &format!("2024-01-02T00:{minute:02}:00Z"),
            ))
            .await;
    }
    let service = SyncService::new(local, remote, SyncOptions::default());

    let result = service
        .sync_table(SyncTable::Leads, &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(result.remote_applied, 10);
    for minute in 0..10 {
        assert!(service
            .local()
            .get_record(SyncTable::Leads, &format!("L{minute}"))
            .await
            .unwrap()
            .is_some());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_watermark_reads_as_epoch() {
    let service = service().await;
    let watermark = service.local().watermark(SyncTable::Leads).await.unwrap();
    assert_eq!(watermark.to_string(), "1970-01-01T00:00:00Z");
}

#[tokio::test(flavor = "multi_thread")]
async fn new_remote_lead_is_copied_locally() {
    let service = service().await;
    let remote_lead = lead("L1", "novo", "2024-01-02T00:00:00Z");
    service.remote().insert(remote_lead.clone()).await;
    let before_round = Watermark::now();

    let result = service
        .sync_table(SyncTable::Leads, &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(result.remote_applied, 1);
    assert_eq!(
        service.local().get_record(SyncTable::Leads, "L1").await.unwrap(),
        Some(remote_lead)
    );
    let watermark = service.local().watermark(SyncTable::Leads).await.unwrap();
    assert!(watermark >= before_round);
    assert!(watermark <= Watermark::now());
}

#[tokio::test(flavor = "multi_thread")]
async fn local_change_is_pushed_to_remote() {
    let service = service().await;
    service
        .local()
        .set_watermark(SyncTable::Leads, at("2024-01-02T00:00:00Z"))
        .await
        .unwrap();
    service
        .remote()
        .insert(lead("L1", "novo", "2024-01-01T00:00:00Z"))
        .await;
    service
        .local()
        .upsert_record(&lead("L1", "contato", "2024-01-03T00:00:00Z"))
        .await
        .unwrap();

    let result = service
        .sync_table(SyncTable::Leads, &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(result.local_applied, 1);
    let pushed = service.remote().get(SyncTable::Leads, "L1").await.unwrap();
    assert_eq!(pushed.get("status"), Some(&json!("contato")));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_table_fails_without_touching_watermarks() {
    let service = service().await;
    let error = service
        .sync_table_by_name("unknown_table", &CancelToken::never())
        .await
        .unwrap_err();

    assert!(matches!(error, Error::UnsupportedTable(_)));
    for (_, watermark) in service.local().watermarks().await.unwrap() {
        assert_eq!(watermark, Watermark::EPOCH);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_table_does_not_stop_the_pass() {
    let service = service().await;
    service
        .remote()
        .fail_table(SyncTable::Students, "connection refused")
        .await;

    let report = service.sync_all(&CancelToken::never()).await;

    let tables: Vec<SyncTable> = report.outcomes.iter().map(|outcome| outcome.table).collect();
    assert_eq!(tables, SyncTable::ALL.to_vec());
    for outcome in &report.outcomes {
        if outcome.table == SyncTable::Students {
            assert!(matches!(
                outcome.status,
                TableStatus::Failed {
                    kind: ErrorKind::RemoteUnavailable,
                    ..
                }
            ));
        } else {
            assert!(matches!(outcome.status, TableStatus::Synced(_)));
        }
    }
    assert_eq!(
        service.local().watermark(SyncTable::Students).await.unwrap(),
        Watermark::EPOCH
    );
    assert!(service.local().watermark(SyncTable::Units).await.unwrap() > Watermark::EPOCH);
}

#[tokio::test(flavor = "multi_thread")]
async fn fail_fast_leaves_later_tables_unattempted() {
    let service = service_with(SyncOptions {
        failure_policy: FailurePolicy::FailFast,
        ..SyncOptions::default()
    })
    .await;
    service
        .remote()
        .fail_table(SyncTable::Students, "connection refused")
        .await;

    let report = service.sync_all(&CancelToken::never()).await;

    assert_eq!(
        report.outcome(SyncTable::Users).unwrap().status,
        TableStatus::NotAttempted
    );
    assert_eq!(
        report.outcome(SyncTable::Units).unwrap().status,
        TableStatus::NotAttempted
    );
    assert!(service
        .remote()
        .calls()
        .await
        .iter()
        .all(|(_, table)| !matches!(table, SyncTable::Users | SyncTable::Units)));
}

#[tokio::test(flavor = "multi_thread")]
async fn hung_remote_call_times_out_and_pass_continues() {
    let service = service_with(SyncOptions {
        request_timeout: Duration::from_millis(50),
        ..SyncOptions::default()
    })
    .await;
    service
        .remote()
        .inject_fault(SyncTable::KihapEvents, RemoteOperation::Select, RemoteFault::Hang)
        .await;

    let report = service.sync_all(&CancelToken::never()).await;

    assert!(matches!(
        report.outcome(SyncTable::KihapEvents).unwrap().status,
        TableStatus::Failed {
            kind: ErrorKind::Timeout,
            ..
        }
    ));
    assert!(matches!(
        report.outcome(SyncTable::EventCheckins).unwrap().status,
        TableStatus::Synced(_)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn two_devices_converge_through_the_remote_store() {
    let remote = MemoryRemoteStore::new();
    let front_desk = SyncService::new(
        DatabaseService::open_in_memory().await.unwrap(),
        remote.clone(),
        SyncOptions::default(),
    );
    let dojo_tablet = SyncService::new(
        DatabaseService::open_in_memory().await.unwrap(),
        remote.clone(),
        SyncOptions::default(),
    );

    let student = record(
        SyncTable::Students,
        json!({
            "id": "S1",
            "name": "Camila",
            "belt": "branca",
            "updated_at": "2024-03-01T10:00:00Z"
        }),
    );
    front_desk.local().upsert_record(&student).await.unwrap();
    front_desk
        .sync_table(SyncTable::Students, &CancelToken::never())
        .await
        .unwrap();
    dojo_tablet
        .sync_table(SyncTable::Students, &CancelToken::never())
        .await
        .unwrap();

    // Both sides edit; the later edit wins everywhere
    let mut renamed = student.clone();
    renamed.set("name", json!("Camila S.")).unwrap();
    renamed
        .set("updated_at", json!(Watermark::now().to_iso_string()))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let mut promoted = student.clone();
    promoted.set("belt", json!("amarela")).unwrap();
    promoted
        .set("updated_at", json!(Watermark::now().to_iso_string()))
        .unwrap();

    dojo_tablet.local().upsert_record(&promoted).await.unwrap();
    front_desk.local().upsert_record(&renamed).await.unwrap();

    dojo_tablet
        .sync_table(SyncTable::Students, &CancelToken::never())
        .await
        .unwrap();
    let result = front_desk
        .sync_table(SyncTable::Students, &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(result.remote_applied, 1);
    assert_eq!(result.local_skipped, 1);
    assert_eq!(remote.get(SyncTable::Students, "S1").await, Some(promoted.clone()));
    assert_eq!(
        front_desk
            .local()
            .get_record(SyncTable::Students, "S1")
            .await
            .unwrap(),
        Some(promoted)
    );
}
