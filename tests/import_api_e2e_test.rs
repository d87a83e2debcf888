// ==========================================
// 导入 API 端到端测试
// ==========================================
// 模拟命令行调用后端的完整流程


use chrono::{Duration, Local};
use settlement_recon::api::{ApiError, ImportApi, ImportFileRequest};
use settlement_recon::config::{config_keys, ConfigManager};
use settlement_recon::domain::{Batch, BatchMode, CanonicalField, MappingQuery, NewColumnMapping, OriginType};
use settlement_recon::engine::BatchRegistry;
use settlement_recon::logging;
use settlement_recon::repository::{BatchRepository, BatchStore};
use test_helpers::*;

const MERCHANT: i64 = 7;

fn setup_api() -> (tempfile::NamedTempFile, String, ImportApi) {
    logging::init_test();
    let (tmp, db_path) = create_test_db().expect("创建测试数据库失败");
    seed_sales_mappings(&db_path).expect("写入映射失败");

    let api = ImportApi::new(&db_path).expect("创建 ImportApi 失败");
    api.save_brands(
        MERCHANT,
        &[
            ("VISA".to_string(), true),
            ("MASTERCARD".to_string(), true),
            ("DINERS".to_string(), false),
        ],
    )
    .unwrap();
    api.add_term(MERCHANT, "Estorno").unwrap();

    (tmp, db_path, api)
}

fn import_request(path: &str) -> ImportFileRequest {
    ImportFileRequest {
        file_path: path.to_string(),
        merchant_id: MERCHANT,
        client_id: Some(3),
        context: TEST_CONTEXT.to_string(),
        origin_type: OriginType::Sales,
        operator: "ana".to_string(),
        ..Default::default()
    }
}

/// 测试导入 API 完整流程
#[test]
fn test_import_api_full_flow() {
    let (_tmp, _db_path, api) = setup_api();
    let file = write_csv(&sales_file(&standard_sales_rows()));
    let path = file.path().to_str().unwrap();

    // 步骤 1: 预览
    let preview = api
        .preview_file(path, None, TEST_CONTEXT, OriginType::Sales)
        .unwrap();
    assert_eq!(preview.header_index, 2);
    assert_eq!(preview.columns.len(), 14);
    assert_eq!(preview.data_rows, 4);
    assert!(preview.collisions.is_empty());
    assert_eq!(
        preview.substitutions.get("Bandeira").map(String::as_str),
        Some("brand")
    );

    // 步骤 2: 导入
    let response = api.import_file(&import_request(path)).unwrap();
    assert_eq!(response.attempts, 1);
    assert_eq!(response.summary.accepted_count, 2);
    assert_eq!(response.summary.filtered_count, 2);
    assert!(response.summary.batch_id.starts_with("7_0001 - "));
    assert!(response.coercions.is_empty());

    // 步骤 3: 批次列表
    let batches = api.list_batches(Some(MERCHANT)).unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].accepted_rows, 2);
    assert_eq!(batches[0].filtered_rows, 2);
    assert_eq!(batches[0].batch.created_by.as_deref(), Some("ana"));

    // 步骤 4: 删除批次
    let report = api.delete_batch(&response.summary.batch_id).unwrap();
    assert_eq!(report.total_rows(), 4);
    assert!(api.list_batches(Some(MERCHANT)).unwrap().is_empty());

    let err = api.delete_batch(&response.summary.batch_id).unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[test]
fn test_reimport_into_existing_batch_removes_duplicates() {
    let (_tmp, _db_path, api) = setup_api();
    let file = write_csv(&sales_file(&standard_sales_rows()));
    let path = file.path().to_str().unwrap();

    let first = api.import_file(&import_request(path)).unwrap();

    let mut again = import_request(path);
    again.batch_mode = BatchMode::Existing(first.summary.batch_id.clone());
    let second = api.import_file(&again).unwrap();

    assert_eq!(second.summary.batch_id, first.summary.batch_id);
    assert_eq!(second.summary.duplicates_removed, 4);

    let batches = api.list_batches(Some(MERCHANT)).unwrap();
    assert_eq!(batches[0].accepted_rows, 2);
    assert_eq!(batches[0].filtered_rows, 2);
}

#[test]
fn test_dedupe_can_be_disabled() {
    let (_tmp, _db_path, api) = setup_api();
    let rows = vec![
        sales_row("15/01/2024", "VISA", "Venda", "10,00", "1"),
        sales_row("15/01/2024", "VISA", "Venda", "10,00", "1"),
    ];
    let file = write_csv(&sales_file(&rows));
    let path = file.path().to_str().unwrap();

    let mut request = import_request(path);
    request.dedupe = Some(false);
    let kept = api.import_file(&request).unwrap();
    assert_eq!(kept.summary.duplicates_removed, 0);

    let deduped = api.import_file(&import_request(path)).unwrap();
    assert_eq!(deduped.summary.duplicates_removed, 1);

    let batches = api.list_batches(Some(MERCHANT)).unwrap();
    let rows_of = |id: &str| {
        batches
            .iter()
            .find(|o| o.batch.batch_id == id)
            .map(|o| o.accepted_rows)
    };
    assert_eq!(rows_of(&kept.summary.batch_id), Some(2));
    assert_eq!(rows_of(&deduped.summary.batch_id), Some(1));
}

#[test]
fn test_batch_id_collision_exhausts_retries_without_writing() {
    let (_tmp, db_path, api) = setup_api();
    let config = ConfigManager::new(&db_path).unwrap();
    config
        .set_global_config_value(config_keys::BATCH_ID_RETRY_LIMIT, "1")
        .unwrap();

    // 其他商户占用了接下来几秒内商户 7 的首个批次 ID
    let batches = BatchRepository::new(&db_path).unwrap();
    let now = Local::now().naive_local();
    for offset in 0..6 {
        let at = now + Duration::seconds(offset);
        batches
            .insert(&Batch {
                batch_id: BatchRegistry::format_batch_id(MERCHANT, 1, at),
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

    let file = write_csv(&sales_file(&standard_sales_rows()));
    let err = api
        .import_file(&import_request(file.path().to_str().unwrap()))
        .unwrap_err();

    assert!(matches!(err, ApiError::BatchIdCollision(_)), "{:?}", err);
    assert!(api.list_batches(Some(MERCHANT)).unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_imports_with_atomic_allocation() {
    let (_tmp, db_path, api) = setup_api();
    api.config()
        .set_global_config_value(config_keys::BATCH_ALLOCATION, "ATOMIC")
        .unwrap();

    let files: Vec<_> = (0..3)
        .map(|_| write_csv(&sales_file(&standard_sales_rows())))
        .collect();

    let handles: Vec<_> = files
        .iter()
        .map(|f| {
            let db_path = db_path.clone();
            let request = import_request(f.path().to_str().unwrap());
            tokio::task::spawn_blocking(move || {
                ImportApi::new(&db_path).and_then(|api| api.import_file(&request))
            })
        })
        .collect();

    let mut batch_ids = Vec::new();
    for result in futures::future::join_all(handles).await {
        let response = result.unwrap().unwrap();
        assert_eq!(response.summary.total, 4);
        batch_ids.push(response.summary.batch_id);
    }

    batch_ids.sort();
    assert!(batch_ids[0].starts_with("7_0001 - "));
    assert!(batch_ids[1].starts_with("7_0002 - "));
    assert!(batch_ids[2].starts_with("7_0003 - "));
}

#[test]
fn test_mapping_maintenance() {
    let (_tmp, _db_path, api) = setup_api();

    let mapping = NewColumnMapping::new("Valor Venda", CanonicalField::SaleAmount, "CIELO")
        .with_origin(OriginType::Sales);
    let id = api.save_mapping(&mapping, true).unwrap();

    // 严格模式下重复三元组报错，非严格模式更新原记录
    let err = api.save_mapping(&mapping, true).unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));
    let retargeted = NewColumnMapping::new("Valor Venda", CanonicalField::NetAmount, "CIELO");
    assert_eq!(api.save_mapping(&retargeted, false).unwrap(), id);

    let listed = api
        .list_mappings(&MappingQuery {
            context: Some("CIELO".to_string()),
            origin_type: Some(OriginType::Sales),
            active_only: true,
        })
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].canonical_name, CanonicalField::NetAmount);

    let contexts = api.list_contexts().unwrap();
    assert_eq!(contexts, vec!["CIELO".to_string(), TEST_CONTEXT.to_string()]);

    let handling = NewColumnMapping::new("Tratativa", CanonicalField::Handling, "CIELO");
    assert!(matches!(
        api.save_mapping(&handling, false).unwrap_err(),
        ApiError::InvalidInput(_)
    ));
    assert!(!api.list_mappable_fields().contains(&CanonicalField::Handling));

    api.delete_mapping(id).unwrap();
    assert!(matches!(api.delete_mapping(id).unwrap_err(), ApiError::NotFound(_)));
}

#[test]
fn test_merchant_rule_passthrough() {
    let (_tmp, _db_path, api) = setup_api();

    assert_eq!(api.list_terms(MERCHANT).unwrap(), vec!["estorno".to_string()]);
    assert!(!api.add_term(MERCHANT, "ESTORNO").unwrap());
    assert!(matches!(
        api.add_term(MERCHANT, "  ").unwrap_err(),
        ApiError::InvalidInput(_)
    ));
    assert!(api.remove_term(MERCHANT, "estorno").unwrap());

    let brands = api.brands(MERCHANT).unwrap();
    assert_eq!(
        brands,
        vec![
            ("DINERS".to_string(), false),
            ("MASTERCARD".to_string(), true),
            ("VISA".to_string(), true),
        ]
    );
}

#[test]
fn test_missing_file_is_not_found() {
    let (_tmp, _db_path, api) = setup_api();
    let err = api
        .import_file(&import_request("/nonexistent/vendas.csv"))
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}
