// ==========================================
// 批次生命周期测试
// ==========================================
// 测试目标: 批次 ID 生成/登记、并发分配、批次内去重、级联删除
// ==========================================


use chrono::{Duration, Local};
use settlement_recon::domain::{Batch, CanonicalField, CanonicalRecord, FieldValue};
use settlement_recon::engine::{BatchRegistry, NewBatch, PersistenceGateway, StampContext};
use settlement_recon::importer::ImportError;
use settlement_recon::logging;
use settlement_recon::repository::{
    BatchRepository, BatchStore, CalculationRepository, SaleCalculation, SettlementRepository,
    SettlementStore, SettlementTable,
};
use settlement_recon::BatchAllocation;
use std::sync::Arc;
use std::thread;
use test_helpers::create_test_db;

fn new_batch(merchant_id: i64) -> NewBatch {
    NewBatch {
        merchant_id,
        client_id: Some(1),
        description: Some("测试批次".to_string()),
        created_by: Some("ana".to_string()),
    }
}

fn sale(nsu: &str, amount: f64) -> CanonicalRecord {
    let mut r = CanonicalRecord::new(0);
    r.set(CanonicalField::Nsu, FieldValue::Text(nsu.to_string()));
    r.set(CanonicalField::Brand, FieldValue::Text("VISA".to_string()));
    r.set(CanonicalField::SaleAmount, FieldValue::Decimal(amount));
    r
}

fn stamp(batch_id: &str, operator: &str) -> StampContext {
    StampContext {
        batch_id: batch_id.to_string(),
        merchant_id: 7,
        client_id: Some(1),
        source_file: Some("vendas.csv".to_string()),
        processed_at: Local::now().naive_local(),
        processed_by: operator.to_string(),
    }
}

#[test]
fn test_fourth_batch_gets_sequence_four() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();
    let registry = BatchRegistry::new(Arc::new(BatchRepository::new(&db_path).unwrap()));

    for _ in 0..3 {
        registry
            .allocate(BatchAllocation::Sequential, &new_batch(7))
            .unwrap();
    }
    let fourth = registry
        .allocate(BatchAllocation::Sequential, &new_batch(7))
        .unwrap();
    let other = registry
        .allocate(BatchAllocation::Sequential, &new_batch(8))
        .unwrap();

    assert!(fourth.batch_id.starts_with("7_0004 - "), "{}", fourth.batch_id);
    assert_eq!(fourth.sequence, 4);
    assert!(other.batch_id.starts_with("8_0001 - "), "{}", other.batch_id);
    assert_eq!(registry.list_batches(Some(7)).unwrap().len(), 4);
}

#[test]
fn test_duplicate_batch_id_is_collision() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let registry = BatchRegistry::new(Arc::new(BatchRepository::new(&db_path).unwrap()));

    let batch = registry
        .allocate(BatchAllocation::Sequential, &new_batch(7))
        .unwrap();
    let copy = Batch {
        batch_uid: "other-uid".to_string(),
        ..batch.clone()
    };

    let err = registry.register_batch(&copy).unwrap_err();
    assert!(matches!(err, ImportError::BatchIdCollision(id) if id == batch.batch_id));
}

#[test]
fn test_atomic_collision_reports_attempted_batch_id() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let repo = Arc::new(BatchRepository::new(&db_path).unwrap());
    let registry = BatchRegistry::new(repo.clone());

    // 其他商户占用了接下来几秒内商户 7 的首个批次 ID
    let now = Local::now().naive_local();
    for offset in 0..6 {
        let at = now + Duration::seconds(offset);
        repo.insert(&Batch {
            batch_id: BatchRegistry::format_batch_id(7, 1, at),
            batch_uid: format!("uid-{}", offset),
            merchant_id: 99,
            client_id: None,
            sequence: offset + 1,
            description: None,
            created_at: at,
            created_by: None,
        })
        .unwrap();
    }

    let err = registry
        .allocate(BatchAllocation::Atomic, &new_batch(7))
        .unwrap_err();
    match err {
        ImportError::BatchIdCollision(id) => assert!(id.starts_with("7_0001 - "), "{}", id),
        other => panic!("期望 BatchIdCollision，实际 {:?}", other),
    }
    assert_eq!(repo.count_for_merchant(7).unwrap(), 0);
}

#[test]
fn test_atomic_allocation_under_concurrency() {
    logging::init_test();
    let (_tmp, db_path) = create_test_db().unwrap();

    // 各线程独立连接，模拟多个导入进程
    let registries: Vec<BatchRegistry> = (0..6)
        .map(|_| BatchRegistry::new(Arc::new(BatchRepository::new(&db_path).unwrap())))
        .collect();

    let handles: Vec<_> = registries
        .into_iter()
        .map(|registry| {
            thread::spawn(move || {
                registry
                    .allocate(BatchAllocation::Atomic, &new_batch(7))
                    .unwrap()
            })
        })
        .collect();

    let mut sequences: Vec<i64> = handles
        .into_iter()
        .map(|h| h.join().unwrap().sequence)
        .collect();
    sequences.sort();

    assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
    let repo = BatchRepository::new(&db_path).unwrap();
    assert_eq!(repo.count_for_merchant(7).unwrap(), 6);
}

#[test]
fn test_dedupe_is_idempotent_and_scoped_to_batch() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let gateway = PersistenceGateway::new(Arc::new(SettlementRepository::new(&db_path).unwrap()));

    let mut batch_a = vec![sale("1", 10.0), sale("1", 10.0), sale("1", 10.0), sale("2", 5.0)];
    let mut batch_b = vec![sale("1", 10.0), sale("1", 10.0)];
    gateway
        .bulk_append(SettlementTable::Accepted, &mut batch_a, &stamp("A", "ana"))
        .unwrap();
    // 审计字段不同不影响重复判定
    let mut late = vec![sale("2", 5.0)];
    gateway
        .bulk_append(SettlementTable::Accepted, &mut late, &stamp("A", "bruno"))
        .unwrap();
    gateway
        .bulk_append(SettlementTable::Accepted, &mut batch_b, &stamp("B", "ana"))
        .unwrap();

    let removed = gateway
        .remove_intra_batch_duplicates(SettlementTable::Accepted, "A")
        .unwrap();
    assert_eq!(removed, 3);
    assert_eq!(gateway.count_by_batch(SettlementTable::Accepted, "A").unwrap(), 2);

    let again = gateway
        .remove_intra_batch_duplicates(SettlementTable::Accepted, "A")
        .unwrap();
    assert_eq!(again, 0);

    // 批次 B 不受影响
    assert_eq!(gateway.count_by_batch(SettlementTable::Accepted, "B").unwrap(), 2);
}

#[test]
fn test_dedupe_keeps_rows_with_calculations() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let settlements = Arc::new(SettlementRepository::new(&db_path).unwrap());
    let gateway = PersistenceGateway::new(settlements.clone());
    let calcs = CalculationRepository::new(&db_path).unwrap();

    let mut rows = vec![sale("1", 10.0), sale("1", 10.0), sale("1", 10.0)];
    gateway
        .bulk_append(SettlementTable::Accepted, &mut rows, &stamp("A", "ana"))
        .unwrap();
    let ids = settlements.row_ids(SettlementTable::Accepted, "A").unwrap();
    assert_eq!(ids.len(), 3);

    // 最后一行已挂接计算结果
    calcs
        .batch_insert(&[SaleCalculation {
            sale_id: ids[2],
            calc_id: "C1".to_string(),
            fee_registered: Some(0.2),
            ..Default::default()
        }])
        .unwrap();

    let removed = gateway
        .remove_intra_batch_duplicates(SettlementTable::Accepted, "A")
        .unwrap();
    assert_eq!(removed, 1);

    let remaining = settlements.row_ids(SettlementTable::Accepted, "A").unwrap();
    assert_eq!(remaining, vec![ids[0], ids[2]]);
    assert_eq!(
        gateway
            .remove_intra_batch_duplicates(SettlementTable::Accepted, "A")
            .unwrap(),
        0
    );
}

#[test]
fn test_cascade_delete_removes_everything() {
    let (_tmp, db_path) = create_test_db().unwrap();
    let settlements = Arc::new(SettlementRepository::new(&db_path).unwrap());
    let gateway = PersistenceGateway::new(settlements.clone());
    let registry = BatchRegistry::new(Arc::new(BatchRepository::new(&db_path).unwrap()));
    let calcs = CalculationRepository::new(&db_path).unwrap();

    let batch = registry
        .allocate(BatchAllocation::Sequential, &new_batch(7))
        .unwrap();
    let ctx = stamp(&batch.batch_id, "ana");

    let mut accepted = vec![sale("1", 10.0), sale("2", 20.0)];
    let mut filtered = vec![sale("3", 30.0)];
    gateway
        .bulk_append(SettlementTable::Accepted, &mut accepted, &ctx)
        .unwrap();
    gateway
        .bulk_append(SettlementTable::Filtered, &mut filtered, &ctx)
        .unwrap();
    let ids = settlements
        .row_ids(SettlementTable::Accepted, &batch.batch_id)
        .unwrap();
    calcs
        .batch_insert(&[SaleCalculation {
            sale_id: ids[0],
            calc_id: "C1".to_string(),
            ..Default::default()
        }])
        .unwrap();

    let report = registry.cascade_delete(&batch.batch_id).unwrap();
    assert_eq!(report.calculations_deleted, 1);
    assert_eq!(report.accepted_deleted, 2);
    assert_eq!(report.filtered_deleted, 1);
    assert_eq!(report.total_rows(), 4);

    assert_eq!(
        settlements
            .count_by_batch(SettlementTable::Accepted, &batch.batch_id)
            .unwrap(),
        0
    );
    assert_eq!(
        settlements
            .count_by_batch(SettlementTable::Filtered, &batch.batch_id)
            .unwrap(),
        0
    );
    assert_eq!(calcs.count_by_batch(&batch.batch_id).unwrap(), 0);
    assert!(registry.list_batches(Some(7)).unwrap().is_empty());

    let err = registry.cascade_delete(&batch.batch_id).unwrap_err();
    assert!(matches!(err, ImportError::BatchNotFound(_)));
}
