use std::collections::HashMap;

use crate::runtime::{MONITOR_LABEL, MonitoredContainer};

/// Decides whether a container should be monitored.
///
/// An explicit `monitor=true|false` label always wins. Without it, an empty
/// allow-list monitors everything and a non-empty one restricts monitoring to
/// the named containers.
pub fn should_monitor(name: &str, labels: &HashMap<String, String>, allow_list: &[String]) -> bool {
    match labels.get(MONITOR_LABEL).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "true" => true,
        Some(v) if v == "false" => false,
        _ => allow_list.is_empty() || allow_list.iter().any(|allowed| allowed == name),
    }
}

impl MonitoredContainer {
    pub fn should_monitor(&self, allow_list: &[String]) -> bool {
        should_monitor(&self.name, &self.labels, allow_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(value: &str) -> HashMap<String, String> {
        HashMap::from([(MONITOR_LABEL.to_string(), value.to_string())])
    }

    fn allow(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_label_false_overrides_allow_list() {
        assert!(!should_monitor("web-1", &labels("false"), &allow(&["web-1"])));
    }

    #[test]
    fn test_label_true_overrides_allow_list() {
        assert!(should_monitor("db", &labels("true"), &allow(&["web-1"])));
    }

    #[test]
    fn test_empty_allow_list_monitors_everything() {
        assert!(should_monitor("anything", &HashMap::new(), &[]));
    }

    #[test]
    fn test_allow_list_restricts() {
        let list = allow(&["web-1", "worker"]);
        assert!(should_monitor("worker", &HashMap::new(), &list));
        assert!(!should_monitor("db", &HashMap::new(), &list));
    }

    #[test]
    fn test_unrecognised_label_falls_back_to_allow_list() {
        let list = allow(&["web-1"]);
        assert!(!should_monitor("db", &labels("maybe"), &list));
        assert!(should_monitor("db", &labels("maybe"), &[]));
    }

    #[test]
    fn test_container_method() {
        let container = MonitoredContainer::new("abc", "db").with_label(MONITOR_LABEL, "TRUE");
        assert!(container.should_monitor(&allow(&["web-1"])));
    }
}
