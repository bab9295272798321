//! Component B: Group Manager.
//!
//! Owns the `{group name -> GroupInfo}` map behind a single lock. Endpoint
//! membership and per-group priority are derived from configuration at
//! construction/reload time; only `cooldown_until` and `is_active` mutate
//! afterwards.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::endpoint::Endpoint;

#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub name: String,
    pub priority: u32,
    pub is_active: bool,
    pub cooldown_until: Option<Instant>,
}

pub struct GroupManager {
    groups: RwLock<HashMap<String, GroupInfo>>,
}

impl GroupManager {
    /// Derives the group map from the current endpoint set. A group's
    /// priority is the minimum `group_priority` across its member
    /// endpoints (see DESIGN.md, Open Question 1).
    pub fn from_endpoints(endpoints: &[Arc<Endpoint>]) -> Self {
        let mut groups: HashMap<String, GroupInfo> = HashMap::new();
        for ep in endpoints {
            groups
                .entry(ep.group.clone())
                .and_modify(|g| g.priority = g.priority.min(ep.group_priority))
                .or_insert_with(|| GroupInfo {
                    name: ep.group.clone(),
                    priority: ep.group_priority,
                    is_active: false,
                    cooldown_until: None,
                });
        }
        let manager = Self {
            groups: RwLock::new(groups),
        };
        manager.recompute_active(endpoints);
        manager
    }

    /// Returns all groups ordered by priority ascending, stable by name.
    pub fn get_all_groups(&self) -> Vec<GroupInfo> {
        let mut groups: Vec<GroupInfo> = self.groups.read().values().cloned().collect();
        groups.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        groups
    }

    /// Returns groups not currently in cooldown, same ordering as
    /// `get_all_groups`.
    pub fn get_active_groups(&self) -> Vec<GroupInfo> {
        self.get_all_groups()
            .into_iter()
            .filter(|g| !self.is_in_cooldown(&g.name))
            .collect()
    }

    pub fn is_in_cooldown(&self, name: &str) -> bool {
        match self.groups.read().get(name).and_then(|g| g.cooldown_until) {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }

    pub fn cooldown_remaining(&self, name: &str) -> Option<Duration> {
        let until = self.groups.read().get(name)?.cooldown_until?;
        let now = Instant::now();
        if until > now {
            Some(until - now)
        } else {
            None
        }
    }

    pub fn enter_cooldown(&self, name: &str, duration: Duration) {
        if let Some(g) = self.groups.write().get_mut(name) {
            g.cooldown_until = Some(Instant::now() + duration);
        }
    }

    pub fn clear_cooldown(&self, name: &str) {
        if let Some(g) = self.groups.write().get_mut(name) {
            g.cooldown_until = None;
        }
    }

    /// Recomputes which group is "active": the highest-priority (lowest
    /// numeric priority) group not in cooldown with at least one healthy
    /// endpoint; ties broken alphabetically by group name.
    pub fn recompute_active(&self, endpoints: &[Arc<Endpoint>]) {
        let mut has_healthy: HashMap<&str, bool> = HashMap::new();
        for ep in endpoints {
            let entry = has_healthy.entry(ep.group.as_str()).or_insert(false);
            *entry = *entry || ep.is_healthy();
        }

        let mut groups = self.groups.write();
        let mut ordered: Vec<(String, u32)> = groups
            .values()
            .map(|g| (g.name.clone(), g.priority))
            .collect();
        ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let active_name = ordered.into_iter().find_map(|(name, _)| {
            let in_cooldown = groups
                .get(&name)
                .and_then(|g| g.cooldown_until)
                .map(|until| Instant::now() < until)
                .unwrap_or(false);
            let healthy = has_healthy.get(name.as_str()).copied().unwrap_or(false);
            if !in_cooldown && healthy {
                Some(name)
            } else {
                None
            }
        });

        for g in groups.values_mut() {
            g.is_active = Some(&g.name) == active_name.as_ref();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use std::collections::HashMap as Map;

    fn ep(name: &str, group: &str, group_priority: u32) -> Arc<Endpoint> {
        Arc::new(Endpoint::from_config(&EndpointConfig {
            name: name.into(),
            url: "http://localhost:1".into(),
            priority: 1,
            group: group.into(),
            group_priority,
            timeout_secs: 1,
            headers: Map::new(),
        }))
    }

    #[test]
    fn group_priority_is_the_minimum_across_members() {
        let endpoints = vec![ep("a", "g1", 5), ep("b", "g1", 2)];
        let mgr = GroupManager::from_endpoints(&endpoints);
        let groups = mgr.get_all_groups();
        let g1 = groups.iter().find(|g| g.name == "g1").unwrap();
        assert_eq!(g1.priority, 2);
    }

    #[test]
    fn cooldown_excludes_group_from_active_list() {
        let endpoints = vec![ep("a", "g1", 1)];
        let mgr = GroupManager::from_endpoints(&endpoints);
        assert!(!mgr.is_in_cooldown("g1"));
        mgr.enter_cooldown("g1", Duration::from_secs(30));
        assert!(mgr.is_in_cooldown("g1"));
        assert!(mgr.get_active_groups().is_empty());
    }
}
