//! AMR Records - 耐药菌患者记录
//!
//! 通过 Airtable REST API 录入、查看、更新和删除患者记录

pub mod config;
pub mod diagnostics;
pub mod gateway;
pub mod record;
pub mod report;

pub use anyhow::Result;
pub use gateway::{GatewayError, RecordGateway};
pub use record::{PatientRecord, RecordId, StoredRecord};
