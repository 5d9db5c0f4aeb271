//! 记录模型
//!
//! 一条记录对应一次患者观察，字段集合固定为 18 个。
//! 远端的无类型映射只在网关边界处与 [`PatientRecord`] 相互转换。

pub mod choices;
pub mod wire;

pub use choices::{Acquisition, BsiSource, Flag, Gender, Setting, Species};
pub use wire::{flatten, nest, FlatRecord, RemoteRecord, RECORD_ID_KEY};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// 远端表中的字段名，按表单顺序排列
pub const FIELD_NAMES: [&str; 18] = [
    "Age",
    "Gender",
    "Species",
    "Rectal_CPE_Pos",
    "Setting",
    "Acquisition",
    "BSI_Source",
    "CHF",
    "CKD",
    "Tumor",
    "Diabetes",
    "Immunosuppressed",
    "CR",
    "BLBLI_R",
    "FQR",
    "GC3_R",
    "Notes",
    "Created_At",
];

/// 耐药结果字段
pub const RESISTANCE_FIELDS: [&str; 4] = ["CR", "BLBLI_R", "FQR", "GC3_R"];

/// `Created_At` 的日期格式
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// 字段赋值错误
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FieldError {
    #[error("未知字段: {0}")]
    UnknownField(String),

    #[error("字段 {field} 的值无效: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 远端分配的记录标识符
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 患者记录
///
/// 每个字段都是可选的：`None` 不会出现在请求体中，
/// 因此同一类型既表示完整记录，也表示部分更新。
/// 分类字段和 0/1 指示字段按远端的字符串原样保存，校验交给远端。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    #[serde(rename = "Age", default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(rename = "Gender", default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(rename = "Species", default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    #[serde(rename = "Rectal_CPE_Pos", default, skip_serializing_if = "Option::is_none")]
    pub rectal_cpe_pos: Option<String>,
    #[serde(rename = "Setting", default, skip_serializing_if = "Option::is_none")]
    pub setting: Option<String>,
    #[serde(rename = "Acquisition", default, skip_serializing_if = "Option::is_none")]
    pub acquisition: Option<String>,
    #[serde(rename = "BSI_Source", default, skip_serializing_if = "Option::is_none")]
    pub bsi_source: Option<String>,
    #[serde(rename = "CHF", default, skip_serializing_if = "Option::is_none")]
    pub chf: Option<String>,
    #[serde(rename = "CKD", default, skip_serializing_if = "Option::is_none")]
    pub ckd: Option<String>,
    #[serde(rename = "Tumor", default, skip_serializing_if = "Option::is_none")]
    pub tumor: Option<String>,
    #[serde(rename = "Diabetes", default, skip_serializing_if = "Option::is_none")]
    pub diabetes: Option<String>,
    #[serde(rename = "Immunosuppressed", default, skip_serializing_if = "Option::is_none")]
    pub immunosuppressed: Option<String>,
    #[serde(rename = "CR", default, skip_serializing_if = "Option::is_none")]
    pub cr: Option<String>,
    #[serde(rename = "BLBLI_R", default, skip_serializing_if = "Option::is_none")]
    pub blbli_r: Option<String>,
    #[serde(rename = "FQR", default, skip_serializing_if = "Option::is_none")]
    pub fqr: Option<String>,
    #[serde(rename = "GC3_R", default, skip_serializing_if = "Option::is_none")]
    pub gc3_r: Option<String>,
    #[serde(rename = "Notes", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "Created_At", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDate>,
    /// 表中存在但不属于固定字段的列，原样保留
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PatientRecord {
    /// 按字段名和原始文本赋值，供命令行的部分更新使用
    pub fn assign(&mut self, field: &str, raw: &str) -> Result<(), FieldError> {
        let text = Some(raw.to_string());
        match field {
            "Age" => {
                let age = raw.trim().parse::<u32>().map_err(|e| FieldError::InvalidValue {
                    field: field.to_string(),
                    reason: e.to_string(),
                })?;
                self.age = Some(age);
            }
            "Created_At" => {
                let date = NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|e| {
                    FieldError::InvalidValue {
                        field: field.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                self.created_at = Some(date);
            }
            "Gender" => self.gender = text,
            "Species" => self.species = text,
            "Rectal_CPE_Pos" => self.rectal_cpe_pos = text,
            "Setting" => self.setting = text,
            "Acquisition" => self.acquisition = text,
            "BSI_Source" => self.bsi_source = text,
            "CHF" => self.chf = text,
            "CKD" => self.ckd = text,
            "Tumor" => self.tumor = text,
            "Diabetes" => self.diabetes = text,
            "Immunosuppressed" => self.immunosuppressed = text,
            "CR" => self.cr = text,
            "BLBLI_R" => self.blbli_r = text,
            "FQR" => self.fqr = text,
            "GC3_R" => self.gc3_r = text,
            "Notes" => self.notes = text,
            other => return Err(FieldError::UnknownField(other.to_string())),
        }
        Ok(())
    }

    /// 四个耐药结果字段及其取值
    pub fn resistance_outcomes(&self) -> [(&'static str, Option<&str>); 4] {
        [
            (RESISTANCE_FIELDS[0], self.cr.as_deref()),
            (RESISTANCE_FIELDS[1], self.blbli_r.as_deref()),
            (RESISTANCE_FIELDS[2], self.fqr.as_deref()),
            (RESISTANCE_FIELDS[3], self.gc3_r.as_deref()),
        ]
    }

    /// 没有任何字段被设置
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 从扁平映射转换；这是无类型数据进入类型系统的唯一入口
    pub fn from_flat(flat: FlatRecord) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(flat))
    }

    /// 宽松转换：类型不符的固定字段原样移入 `extra`，不会丢弃整条记录
    ///
    /// 返回记录以及被移入 `extra` 的字段名（按表单顺序）。
    pub fn from_flat_lenient(mut flat: FlatRecord) -> (Self, Vec<String>) {
        let rejected: Vec<String> = FIELD_NAMES
            .iter()
            .filter(|name| {
                flat.get(**name).is_some_and(|value| {
                    let mut single = Map::new();
                    single.insert(name.to_string(), value.clone());
                    Self::from_flat(single).is_err()
                })
            })
            .map(|name| name.to_string())
            .collect();

        let moved: Vec<(String, Value)> = rejected
            .iter()
            .filter_map(|name| flat.remove(name).map(|value| (name.clone(), value)))
            .collect();

        let mut record = match Self::from_flat(flat.clone()) {
            Ok(record) => record,
            Err(_) => Self {
                extra: flat.into_iter().collect(),
                ..Default::default()
            },
        };
        record.extra.extend(moved);
        (record, rejected)
    }
}

/// 已持久化的记录：标识符 + 字段
///
/// 序列化结果就是扁平化后的映射，标识符位于 [`RECORD_ID_KEY`]。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(rename = "airtable_id")]
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: PatientRecord,
}

impl StoredRecord {
    /// 从扁平映射转换，要求包含 [`RECORD_ID_KEY`]
    pub fn from_flat(flat: FlatRecord) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(flat))
    }

    /// 宽松转换，字段处理见 [`PatientRecord::from_flat_lenient`]
    ///
    /// 只有缺少字符串标识符时才失败。
    pub fn from_flat_lenient(
        mut flat: FlatRecord,
    ) -> Result<(Self, Vec<String>), serde_json::Error> {
        let id: RecordId =
            serde_json::from_value(flat.remove(RECORD_ID_KEY).unwrap_or(Value::Null))?;
        let (fields, rejected) = PatientRecord::from_flat_lenient(flat);
        Ok((Self { id, fields }, rejected))
    }

    /// 转回扁平映射
    pub fn to_flat(&self) -> Result<FlatRecord, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}
