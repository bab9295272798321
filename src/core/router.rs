//! Component D: Router.
//!
//! Produces an ordered candidate list of endpoints for a request, per the
//! configured strategy. Never returns an empty list if any endpoint exists.

use std::sync::Arc;

use crate::config::StrategyType;
use crate::core::endpoint::Endpoint;
use crate::core::group::GroupManager;

pub struct Router {
    pub strategy: StrategyType,
}

impl Router {
    pub fn new(strategy: StrategyType) -> Self {
        Self { strategy }
    }

    /// Returns an ordered candidate list: groups in active-first order,
    /// then within each group per the configured strategy.
    pub fn candidates(
        &self,
        endpoints: &[Arc<Endpoint>],
        groups: &GroupManager,
    ) -> Vec<Arc<Endpoint>> {
        let all_groups = groups.get_all_groups();
        let mut ordered_group_names: Vec<String> = all_groups
            .iter()
            .filter(|g| g.is_active)
            .map(|g| g.name.clone())
            .collect();
        let mut rest: Vec<String> = all_groups
            .iter()
            .filter(|g| !g.is_active)
            .map(|g| g.name.clone())
            .collect();
        ordered_group_names.append(&mut rest);

        let mut result = Vec::with_capacity(endpoints.len());
        for group_name in ordered_group_names {
            let mut members: Vec<Arc<Endpoint>> = endpoints
                .iter()
                .filter(|e| e.group == group_name)
                .cloned()
                .collect();
            self.order_within_group(&mut members);
            result.extend(members);
        }
        result
    }

    fn order_within_group(&self, members: &mut Vec<Arc<Endpoint>>) {
        match self.strategy {
            StrategyType::Priority => {
                members.sort_by(|a, b| {
                    let a_healthy = a.is_healthy();
                    let b_healthy = b.is_healthy();
                    b_healthy
                        .cmp(&a_healthy)
                        .then_with(|| a.priority.cmp(&b.priority))
                        .then_with(|| a.name.cmp(&b.name))
                });
            }
            StrategyType::Fastest => {
                members.sort_by(|a, b| {
                    let a_healthy = a.is_healthy();
                    let b_healthy = b.is_healthy();
                    match (a_healthy, b_healthy) {
                        (true, true) => a
                            .response_time()
                            .cmp(&b.response_time())
                            .then_with(|| a.name.cmp(&b.name)),
                        (false, false) => a
                            .priority
                            .cmp(&b.priority)
                            .then_with(|| a.name.cmp(&b.name)),
                        (true, false) => std::cmp::Ordering::Less,
                        (false, true) => std::cmp::Ordering::Greater,
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use std::collections::HashMap;
    use std::time::Duration;

    fn ep(name: &str, priority: u32) -> Arc<Endpoint> {
        Arc::new(Endpoint::from_config(&EndpointConfig {
            name: name.into(),
            url: "http://localhost:1".into(),
            priority,
            group: "Default".into(),
            group_priority: 1,
            timeout_secs: 1,
            headers: HashMap::new(),
        }))
    }

    #[test]
    fn fastest_orders_healthy_endpoints_by_response_time() {
        let e1 = ep("e1", 1);
        let e2 = ep("e2", 1);
        let e3 = ep("e3", 1);
        e1.mark_success(Duration::from_millis(10));
        e2.mark_success(Duration::from_millis(20));
        e3.mark_success(Duration::from_millis(30));
        let endpoints = vec![e3.clone(), e1.clone(), e2.clone()];
        let groups = GroupManager::from_endpoints(&endpoints);
        let router = Router::new(StrategyType::Fastest);
        let candidates = router.candidates(&endpoints, &groups);
        let names: Vec<&str> = candidates.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn priority_ties_break_by_name_and_are_stable() {
        let e_b = ep("b", 1);
        let e_a = ep("a", 1);
        let endpoints = vec![e_b.clone(), e_a.clone()];
        let groups = GroupManager::from_endpoints(&endpoints);
        let router = Router::new(StrategyType::Priority);
        let first = router.candidates(&endpoints, &groups);
        let second = router.candidates(&endpoints, &groups);
        let names: Vec<&str> = first.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        let names2: Vec<&str> = second.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, names2);
    }

    #[test]
    fn never_empty_when_endpoints_exist_even_if_all_unhealthy() {
        let e1 = ep("e1", 1);
        for _ in 0..5 {
            e1.mark_failure(3);
        }
        let endpoints = vec![e1];
        let groups = GroupManager::from_endpoints(&endpoints);
        let router = Router::new(StrategyType::Priority);
        assert_eq!(router.candidates(&endpoints, &groups).len(), 1);
    }
}
