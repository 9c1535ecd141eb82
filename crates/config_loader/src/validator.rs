//! 配置验证模块
//!
//! 在解析之后、创建 Dispatcher 之前执行，只检查结构性约束。
//! sink 专属属性 (path、db_url 等) 由各自的工厂在创建时校验。

use std::collections::HashSet;

use contracts::{ContractError, PipelineBlueprint, SinkConfig};

/// 验证配置
pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    validate_pipeline(blueprint)?;
    validate_sinks_not_empty(blueprint)?;
    validate_unique_sink_names(blueprint)?;
    for sink in &blueprint.sinks {
        validate_sink(sink)?;
    }
    Ok(())
}

/// pipeline 段: 名称非空，输入通道容量大于 0
fn validate_pipeline(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    if blueprint.pipeline.name.trim().is_empty() {
        return Err(ContractError::config_validation(
            "pipeline.name",
            "pipeline name cannot be empty",
        ));
    }
    if blueprint.pipeline.input_capacity == 0 {
        return Err(ContractError::config_validation(
            "pipeline.input_capacity",
            "input_capacity must be greater than 0",
        ));
    }
    Ok(())
}

/// 至少配置一个 sink
fn validate_sinks_not_empty(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    if blueprint.sinks.is_empty() {
        return Err(ContractError::config_validation(
            "sinks",
            "at least one sink is required",
        ));
    }
    Ok(())
}

/// sink 名称唯一
fn validate_unique_sink_names(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for sink in &blueprint.sinks {
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                "sinks.name",
                format!("duplicate sink name '{}'", sink.name),
            ));
        }
    }
    Ok(())
}

fn validate_sink(sink: &SinkConfig) -> Result<(), ContractError> {
    if sink.name.trim().is_empty() {
        return Err(ContractError::config_validation(
            "sinks.name",
            "sink name cannot be empty",
        ));
    }
    let field = |name: &str| format!("sinks[{}].{name}", sink.name);

    if sink.sink_type.trim().is_empty() {
        return Err(ContractError::config_validation(
            field("sink_type"),
            "sink_type cannot be empty",
        ));
    }
    if sink.queue_capacity == 0 {
        return Err(ContractError::config_validation(
            field("queue_capacity"),
            "queue_capacity must be greater than 0",
        ));
    }
    // 退避时间: 初始值不能超过上限
    if sink.backoff_initial_ms > sink.backoff_max_ms {
        return Err(ContractError::config_validation(
            field("backoff_initial_ms"),
            format!(
                "backoff_initial_ms ({}) exceeds backoff_max_ms ({})",
                sink.backoff_initial_ms, sink.backoff_max_ms
            ),
        ));
    }
    Ok(())
}
