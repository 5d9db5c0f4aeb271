//! 远端表的请求/响应结构以及扁平化规则
//!
//! 远端把字段嵌套在 `fields` 下，标识符放在同级的 `id` 上；
//! 本地统一使用扁平映射，标识符写入保留键 [`RECORD_ID_KEY`]。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 扁平记录中存放远端标识符的保留键
pub const RECORD_ID_KEY: &str = "airtable_id";

/// 扁平化后的记录：字段名 -> 值
pub type FlatRecord = Map<String, Value>;

/// 远端原生的记录结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// `{"records": [...]}` 信封，创建和更新请求以及创建响应共用
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordsEnvelope<T> {
    pub records: Vec<T>,
}

impl<T> RecordsEnvelope<T> {
    /// 只包含一条记录的批量请求
    pub fn single(record: T) -> Self {
        Self {
            records: vec![record],
        }
    }
}

/// 创建请求中的一条记录（尚无标识符）
#[derive(Debug, Serialize)]
pub struct NewRecord<'a, F> {
    pub fields: &'a F,
}

/// 部分更新请求中的一条记录
#[derive(Debug, Serialize)]
pub struct RecordPatch<'a, F> {
    pub id: &'a str,
    pub fields: &'a F,
}

/// 列表响应；`offset` 存在说明结果被远端截断
#[derive(Debug, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub records: Vec<RemoteRecord>,
    #[serde(default)]
    pub offset: Option<String>,
}

/// 把远端记录展开为扁平映射，并注入标识符
pub fn flatten(record: RemoteRecord) -> FlatRecord {
    let mut flat = record.fields;
    flat.insert(RECORD_ID_KEY.to_string(), Value::String(record.id));
    flat
}

/// [`flatten`] 的逆操作；缺少字符串标识符时返回 `None`
pub fn nest(mut flat: FlatRecord) -> Option<RemoteRecord> {
    let id = match flat.remove(RECORD_ID_KEY)? {
        Value::String(id) => id,
        _ => return None,
    };
    Some(RemoteRecord { id, fields: flat })
}
