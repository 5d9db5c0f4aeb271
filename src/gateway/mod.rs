//! 记录网关
//!
//! 应用与远端表之间的唯一通道：构造请求、解释状态码、
//! 在远端的嵌套结构和本地扁平结构之间转换。
//!
//! 每个操作提供两种形式：
//! - `try_*` 返回 [`GatewayResult`]，保留具体错误；
//! - 同名的统一接口只返回成功值或统一的失败信号（`None`、空列表、`false`），
//!   失败原因写入 [`Diagnostics`]，错误不会越过网关边界。

pub mod error;

pub use error::{GatewayError, GatewayResult};

use crate::config::StoreConfig;
use crate::diagnostics::Diagnostics;
use crate::record::wire::{ListPage, NewRecord, RecordPatch, RecordsEnvelope, RemoteRecord};
use crate::record::{flatten, PatientRecord, RecordId, StoredRecord};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// 记录网关
pub struct RecordGateway {
    client: Client,
    collection: Url,
    diagnostics: Diagnostics,
}

impl RecordGateway {
    /// 使用存储配置创建网关；配置只读，凭据在此处写入默认请求头
    pub fn new(config: &StoreConfig) -> GatewayResult<Self> {
        let collection = collection_url(config)?;
        let client = build_client(config)?;

        tracing::debug!("记录网关已创建: {}", collection);
        Ok(Self {
            client,
            collection,
            diagnostics: Diagnostics::new(),
        })
    }

    /// 集合地址 `<root>/<base-id>/<table-name>`
    pub fn collection(&self) -> &Url {
        &self.collection
    }

    /// 失败原因的旁路通道
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// 单条记录地址 `<collection>/<record-id>`
    pub fn record_url(&self, id: &str) -> GatewayResult<Url> {
        let mut url = self.collection.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidEndpoint(self.collection.to_string()))?
            .push(id);
        Ok(url)
    }

    // 统一接口

    /// 创建记录，成功时返回远端分配的标识符
    pub async fn create(&self, fields: &PatientRecord) -> Option<RecordId> {
        match self.try_create(fields).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!("创建记录失败: {}", e);
                self.diagnostics.error("create", e.to_string());
                None
            }
        }
    }

    /// 读取全部记录（仅第一页）；失败时返回空列表
    pub async fn list(&self) -> Vec<StoredRecord> {
        match self.try_list().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("读取记录失败: {}", e);
                self.diagnostics.error("list", e.to_string());
                Vec::new()
            }
        }
    }

    /// 部分更新记录，只发送 `fields` 中已设置的字段
    pub async fn update(&self, id: &RecordId, fields: &PatientRecord) -> bool {
        match self.try_update(id, fields).await {
            Ok(()) => true,
            Err(e) => {
                self.note_write_failure("update", id, &e);
                false
            }
        }
    }

    /// 删除记录
    pub async fn delete(&self, id: &RecordId) -> bool {
        match self.try_delete(id).await {
            Ok(()) => true,
            Err(e) => {
                self.note_write_failure("delete", id, &e);
                false
            }
        }
    }

    /// 连接测试：读取一次列表并返回记录数
    pub async fn check_connection(&self) -> GatewayResult<usize> {
        let records = self.try_list().await?;
        tracing::info!("连接正常，共 {} 条记录", records.len());
        Ok(records.len())
    }

    // 带错误类型的接口

    pub async fn try_create(&self, fields: &PatientRecord) -> GatewayResult<RecordId> {
        let body = RecordsEnvelope::single(NewRecord { fields });

        tracing::debug!("POST {}", self.collection);
        let response = self
            .client
            .post(self.collection.clone())
            .json(&body)
            .send()
            .await?;

        let created: RecordsEnvelope<RemoteRecord> = decode(ensure_success(response).await?).await?;
        let id = created
            .records
            .into_iter()
            .next()
            .map(|record| RecordId::from(record.id))
            .ok_or(GatewayError::EmptyResponse)?;

        tracing::info!("记录已创建: {}", id);
        Ok(id)
    }

    pub async fn try_list(&self) -> GatewayResult<Vec<StoredRecord>> {
        tracing::debug!("GET {}", self.collection);
        let response = self.client.get(self.collection.clone()).send().await?;
        let page: ListPage = decode(ensure_success(response).await?).await?;

        if page.offset.is_some() {
            let message = format!(
                "远端结果被截断，仅读取了第一页的 {} 条记录",
                page.records.len()
            );
            tracing::warn!("{}", message);
            self.diagnostics.warn("list", message);
        }

        let mut records = Vec::with_capacity(page.records.len());
        for remote in page.records {
            let (record, rejected) = StoredRecord::from_flat_lenient(flatten(remote))?;
            if !rejected.is_empty() {
                let message = format!(
                    "记录 {} 的字段类型不符，已原样保留: {}",
                    record.id,
                    rejected.join(", ")
                );
                tracing::warn!("{}", message);
                self.diagnostics.warn("list", message);
            }
            records.push(record);
        }

        tracing::debug!("读取到 {} 条记录", records.len());
        Ok(records)
    }

    pub async fn try_update(&self, id: &RecordId, fields: &PatientRecord) -> GatewayResult<()> {
        let body = RecordsEnvelope::single(RecordPatch {
            id: id.as_str(),
            fields,
        });

        tracing::debug!("PATCH {} ({})", self.collection, id);
        let response = self
            .client
            .patch(self.collection.clone())
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;

        tracing::info!("记录已更新: {}", id);
        Ok(())
    }

    pub async fn try_delete(&self, id: &RecordId) -> GatewayResult<()> {
        let url = self.record_url(id.as_str())?;

        tracing::debug!("DELETE {}", url);
        let response = self.client.delete(url).send().await?;
        ensure_success(response).await?;

        tracing::info!("记录已删除: {}", id);
        Ok(())
    }

    /// 写操作失败只返回布尔值；网络层失败额外记入诊断
    fn note_write_failure(&self, operation: &str, id: &RecordId, error: &GatewayError) {
        if error.is_transport() {
            tracing::error!("{} {} 失败: {}", operation, id, error);
            self.diagnostics.error(operation, error.to_string());
        } else {
            tracing::warn!("{} {} 失败: {}", operation, id, error);
        }
    }
}

/// 构造集合地址，路径段会被百分号编码
pub fn collection_url(config: &StoreConfig) -> GatewayResult<Url> {
    let mut url = Url::parse(&config.root)
        .map_err(|e| GatewayError::InvalidEndpoint(format!("{}: {}", config.root, e)))?;
    url.path_segments_mut()
        .map_err(|_| GatewayError::InvalidEndpoint(config.root.clone()))?
        .pop_if_empty()
        .push(&config.base_id)
        .push(&config.table_name);
    Ok(url)
}

fn build_client(config: &StoreConfig) -> GatewayResult<Client> {
    let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
        .map_err(|_| GatewayError::InvalidCredential)?;
    auth.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, auth);

    // 不保留空闲连接，每次操作都是独立的请求/响应
    let client = Client::builder()
        .default_headers(headers)
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(config.timeout_secs))
        .pool_max_idle_per_host(0)
        .build()?;
    Ok(client)
}

async fn ensure_success(response: Response) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body = if body.is_empty() {
        status.canonical_reason().unwrap_or("").to_string()
    } else {
        body
    };
    Err(GatewayError::Rejected {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
