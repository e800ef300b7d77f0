// ==========================================
// 结算数据仓库 - 引擎错误类型
// ==========================================
// 分类: 约束违反 (致命) / 维度缺失 (可重试) / 检查点偏离 (致命)
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

use crate::repository::error::RepositoryError;
use crate::source::error::SourceError;

#[derive(Error, Debug)]
pub enum PipelineError {
    // ===== 数据质量 / 顺序错误 =====
    #[error("约束违反 [{workflow}]: {message}")]
    ConstraintViolation { workflow: String, message: String },

    #[error("维度缺失 [{workflow}]: {dimension} 中不存在 {natural_key}")]
    MissingDimension {
        workflow: String,
        dimension: String,
        natural_key: String,
    },

    #[error("检查点偏离 [{workflow}]: 游标 {watermark} 超出已落地数据 {landed}")]
    CheckpointDivergence {
        workflow: String,
        watermark: String,
        landed: String,
    },

    #[error("载荷解析失败 [{workflow}] {key}: {message}")]
    Payload {
        workflow: String,
        key: String,
        message: String,
    },

    // ===== 下层错误 =====
    #[error("数据源错误: {0}")]
    Source(#[from] SourceError),

    #[error("仓储错误: {0}")]
    Repository(RepositoryError),

    // ===== 编排 / 配置错误 =====
    #[error("配置错误: {0}")]
    Config(String),

    #[error("任务图错误: {0}")]
    Graph(String),

    #[error("任务异常终止: {0}")]
    TaskPanicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// 约束类仓储错误统一提升为 ConstraintViolation（工作流名待补）
impl From<RepositoryError> for PipelineError {
    fn from(err: RepositoryError) -> Self {
        if err.is_constraint_violation() {
            PipelineError::ConstraintViolation {
                workflow: String::new(),
                message: err.to_string(),
            }
        } else {
            PipelineError::Repository(err)
        }
    }
}

impl PipelineError {
    /// 依赖完成后可重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::MissingDimension { .. })
    }

    /// 需要人工处理，必须中止并告警
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::ConstraintViolation { .. } | PipelineError::CheckpointDivergence { .. }
        )
    }

    /// 补全工作流名
    pub fn in_workflow(self, workflow_key: &str) -> Self {
        match self {
            PipelineError::ConstraintViolation { workflow, message } if workflow.is_empty() => {
                PipelineError::ConstraintViolation {
                    workflow: workflow_key.to_string(),
                    message,
                }
            }
            PipelineError::MissingDimension {
                workflow,
                dimension,
                natural_key,
            } if workflow.is_empty() => PipelineError::MissingDimension {
                workflow: workflow_key.to_string(),
                dimension,
                natural_key,
            },
            other => other,
        }
    }

    pub fn payload(workflow: &str, key: &str, err: impl std::fmt::Display) -> Self {
        PipelineError::Payload {
            workflow: workflow.to_string(),
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_errors_are_promoted_and_fatal() {
        let err: PipelineError =
            RepositoryError::UniqueConstraintViolation("dm_users.user_id".into()).into();
        let err = err.in_workflow("users_stg_to_dds_workflow");
        match &err {
            PipelineError::ConstraintViolation { workflow, .. } => {
                assert_eq!(workflow, "users_stg_to_dds_workflow")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_missing_dimension_is_retryable() {
        let err = PipelineError::MissingDimension {
            workflow: "orders_stg_to_dds_workflow".into(),
            dimension: "dm_users".into(),
            natural_key: "U9".into(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_query_errors_stay_repository_errors() {
        let err: PipelineError = RepositoryError::DatabaseQueryError("boom".into()).into();
        assert!(matches!(err, PipelineError::Repository(_)));
        assert!(!err.is_fatal());
    }
}
