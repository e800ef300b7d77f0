// ==========================================
// 结算数据仓库 - 流水线配置
// ==========================================
// 解析顺序: 默认值 → JSON 配置文件 → 环境变量
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};

use crate::domain::types::{format_ts, parse_ts};
use crate::engine::error::{PipelineError, PipelineResult};
use crate::engine::task::TaskId;

// ==========================================
// 环境变量键
// ==========================================
pub mod env_keys {
    pub const DB_PATH: &str = "DWH_DB_PATH";
    pub const SOURCE_DIR: &str = "DWH_SOURCE_DIR";
    pub const MAX_DEPENDENCY_RETRIES: &str = "DWH_MAX_DEPENDENCY_RETRIES";
}

const DEFAULT_DB_FILE: &str = "dwh.db";
const APP_DIR: &str = "settlements-dwh";

// ==========================================
// BatchLimits - 单批次读取上限
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    pub restaurants: usize,
    pub users: usize,
    pub orders: usize,
    pub events: usize,
    pub ranks: usize,
    pub couriers: usize,
    pub deliveries: usize,
    pub dds: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            restaurants: 50,
            users: 100,
            orders: 5000,
            events: 10000,
            ranks: 100,
            couriers: 50,
            deliveries: 5000,
            dds: 5000,
        }
    }
}

impl BatchLimits {
    pub fn for_task(&self, task: TaskId) -> usize {
        let limit = match task {
            TaskId::StgOrdersystemRestaurants | TaskId::StgDeliverysystemRestaurants => self.restaurants,
            TaskId::StgOrdersystemUsers => self.users,
            TaskId::StgOrdersystemOrders => self.orders,
            TaskId::StgBonussystemEvents => self.events,
            TaskId::StgBonussystemRanks => self.ranks,
            TaskId::StgDeliverysystemCouriers => self.couriers,
            TaskId::StgDeliverysystemDeliveries => self.deliveries,
            // 集市按周期整体重算，不分批
            TaskId::SettlementReport | TaskId::CourierLedger => usize::MAX,
            _ => self.dds,
        };
        limit.max(1)
    }
}

// ==========================================
// PipelineConfig
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub db_path: PathBuf,
    pub source_dir: Option<PathBuf>,
    #[serde(with = "opt_ts")]
    pub initial_load_from: Option<NaiveDateTime>,
    pub batch_limits: BatchLimits,
    pub max_dependency_retries: u32,
    pub drain: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            source_dir: None,
            initial_load_from: None,
            batch_limits: BatchLimits::default(),
            max_dependency_retries: 2,
            drain: true,
        }
    }
}

/// 默认数据库路径: <用户数据目录>/settlements-dwh/dwh.db
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_DIR).join(DEFAULT_DB_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
}

impl PipelineConfig {
    /// 加载配置（文件可选）并应用环境变量覆写
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("读取配置文件失败 {}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| PipelineError::Config(format!("配置文件格式错误 {}: {}", path.display(), e)))
    }

    /// 环境变量覆写（取值函数可注入，便于测试）
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> PipelineResult<()> {
        if let Some(v) = lookup(env_keys::DB_PATH).filter(|v| !v.trim().is_empty()) {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(env_keys::SOURCE_DIR).filter(|v| !v.trim().is_empty()) {
            self.source_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(env_keys::MAX_DEPENDENCY_RETRIES) {
            self.max_dependency_retries = v.trim().parse().map_err(|_| {
                PipelineError::Config(format!("{} 不是非负整数: {}", env_keys::MAX_DEPENDENCY_RETRIES, v))
            })?;
        }
        Ok(())
    }

    pub fn db_path_str(&self) -> PipelineResult<&str> {
        self.db_path
            .to_str()
            .ok_or_else(|| PipelineError::Config(format!("数据库路径不是合法 UTF-8: {}", self.db_path.display())))
    }
}

// 时间戳以 "YYYY-MM-DD HH:MM:SS" 文本存储
mod opt_ts {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => s.serialize_some(&format_ts(ts)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(text) => parse_ts(&text)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("无效时间戳: {}", text))),
        }
    }
}
