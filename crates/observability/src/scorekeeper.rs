//! Scorekeeper - 指标注册句柄
//!
//! 由进程入口创建，通过 registry 交给各 sink 工厂，用于注册指标描述。
//! 工厂默认不注册任何指标。

use std::sync::Mutex;

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// 指标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// 指标注册句柄
#[derive(Debug, Default)]
pub struct Scorekeeper {
    registered: Mutex<Vec<(MetricKind, String)>>,
}

impl Scorekeeper {
    /// 创建空句柄
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册指标描述
    pub fn register(&self, kind: MetricKind, name: &'static str, help: &'static str) {
        match kind {
            MetricKind::Counter => describe_counter!(name, help),
            MetricKind::Gauge => describe_gauge!(name, help),
            MetricKind::Histogram => describe_histogram!(name, help),
        }
        if let Ok(mut registered) = self.registered.lock() {
            registered.push((kind, name.to_string()));
        }
    }

    /// 已注册的指标名
    pub fn registered(&self) -> Vec<(MetricKind, String)> {
        self.registered
            .lock()
            .map(|registered| registered.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_records_names() {
        let keeper = Scorekeeper::new();
        keeper.register(MetricKind::Counter, "logport_test_total", "test counter");
        keeper.register(MetricKind::Gauge, "logport_test_depth", "test gauge");

        let registered = keeper.registered();
        assert_eq!(registered.len(), 2);
        assert_eq!(
            registered[0],
            (MetricKind::Counter, "logport_test_total".to_string())
        );
    }
}
