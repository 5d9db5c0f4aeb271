//! 测试辅助：用 wiremock 模拟的内存版远端表

#![allow(dead_code)]

use amr_records::config::StoreConfig;
use amr_records::record::PatientRecord;
use amr_records::RecordGateway;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const BASE_ID: &str = "appTEST";
pub const TABLE: &str = "Patient_Records";
pub const API_KEY: &str = "keyTEST";
pub const COLLECTION_PATH: &str = "/v0/appTEST/Patient_Records";

/// 指向模拟服务器的存储配置
pub fn store_config(server: &MockServer) -> StoreConfig {
    StoreConfig {
        root: format!("{}/v0", server.uri()),
        base_id: BASE_ID.to_string(),
        table_name: TABLE.to_string(),
        api_key: API_KEY.to_string(),
        timeout_secs: 5,
    }
}

pub fn gateway(server: &MockServer) -> RecordGateway {
    RecordGateway::new(&store_config(server)).expect("网关创建失败")
}

/// 18 个字段全部填写的记录
pub fn full_record() -> PatientRecord {
    PatientRecord {
        age: Some(65),
        gender: Some("Male".into()),
        species: Some("E. coli".into()),
        rectal_cpe_pos: Some("0".into()),
        setting: Some("ICU".into()),
        acquisition: Some("Hospital".into()),
        bsi_source: Some("Lung".into()),
        chf: Some("0".into()),
        ckd: Some("1".into()),
        tumor: Some("0".into()),
        diabetes: Some("1".into()),
        immunosuppressed: Some("0".into()),
        cr: Some("0".into()),
        blbli_r: Some("1".into()),
        fqr: Some("0".into()),
        gc3_r: Some("1".into()),
        notes: Some("admitted via ED".into()),
        created_at: NaiveDate::from_ymd_opt(2024, 5, 17),
        extra: Default::default(),
    }
}

#[derive(Default)]
struct TableState {
    records: Vec<(String, Map<String, Value>)>,
    next_id: usize,
}

/// 内存表，按 Airtable 的方式响应四种请求
#[derive(Clone, Default)]
pub struct FakeTable {
    state: Arc<Mutex<TableState>>,
}

#[derive(Clone, Copy)]
enum Operation {
    Create,
    List,
    Update,
    Delete,
}

struct Handler {
    table: FakeTable,
    operation: Operation,
}

impl FakeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在服务器上挂载四个端点，全部要求正确的 Bearer 凭据
    pub async fn mount(&self, server: &MockServer) {
        let auth = format!("Bearer {API_KEY}");
        let routes = [
            (Operation::Create, "POST"),
            (Operation::List, "GET"),
            (Operation::Update, "PATCH"),
        ];
        for (operation, verb) in routes {
            Mock::given(method(verb))
                .and(path(COLLECTION_PATH))
                .and(header("Authorization", auth.as_str()))
                .respond_with(self.handler(operation))
                .mount(server)
                .await;
        }

        Mock::given(method("DELETE"))
            .and(path_regex(format!("^{COLLECTION_PATH}/[^/]+$")))
            .and(header("Authorization", auth.as_str()))
            .respond_with(self.handler(Operation::Delete))
            .mount(server)
            .await;
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// 直接写入一条记录，返回其 ID
    pub fn seed(&self, fields: Value) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("rec{:03}", state.next_id);
        let fields = fields.as_object().cloned().unwrap_or_default();
        state.records.push((id.clone(), fields));
        id
    }

    fn handler(&self, operation: Operation) -> Handler {
        Handler {
            table: self.clone(),
            operation,
        }
    }
}

fn record_json(id: &str, fields: &Map<String, Value>) -> Value {
    json!({"id": id, "fields": fields, "createdTime": "2024-05-17T08:00:00.000Z"})
}

fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({"error": "NOT_FOUND"}))
}

impl Respond for Handler {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        match self.operation {
            Operation::Create => {
                let body: Value = match request.body_json() {
                    Ok(body) => body,
                    Err(_) => return ResponseTemplate::new(422),
                };
                let fields = body["records"][0]["fields"].clone();
                let id = self.table.seed(fields);
                let state = self.table.state.lock();
                let (_, stored) = state.records.last().unwrap();
                ResponseTemplate::new(200).set_body_json(json!({
                    "records": [record_json(&id, stored)]
                }))
            }
            Operation::List => {
                let state = self.table.state.lock();
                let records: Vec<Value> = state
                    .records
                    .iter()
                    .map(|(id, fields)| record_json(id, fields))
                    .collect();
                ResponseTemplate::new(200).set_body_json(json!({ "records": records }))
            }
            Operation::Update => {
                let body: Value = match request.body_json() {
                    Ok(body) => body,
                    Err(_) => return ResponseTemplate::new(422),
                };
                let patch = &body["records"][0];
                let id = patch["id"].as_str().unwrap_or_default();
                let mut state = self.table.state.lock();
                let Some((_, fields)) = state.records.iter_mut().find(|(rid, _)| rid == id) else {
                    return not_found();
                };
                if let Some(changes) = patch["fields"].as_object() {
                    for (key, value) in changes {
                        fields.insert(key.clone(), value.clone());
                    }
                }
                ResponseTemplate::new(200).set_body_json(json!({
                    "records": [record_json(id, fields)]
                }))
            }
            Operation::Delete => {
                let id = request
                    .url
                    .path_segments()
                    .and_then(|segments| segments.last())
                    .unwrap_or_default()
                    .to_string();
                let mut state = self.table.state.lock();
                let before = state.records.len();
                state.records.retain(|(rid, _)| *rid != id);
                if state.records.len() == before {
                    return not_found();
                }
                ResponseTemplate::new(200).set_body_json(json!({"deleted": true, "id": id}))
            }
        }
    }
}
