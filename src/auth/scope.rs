//! Per-host accumulation of authorization scopes, merged and rendered the
//! way a Bearer token request's `scope` query parameter expects.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Action {
    Delete,
    Pull,
    Push,
    Wildcard,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Delete => "delete",
            Action::Pull => "pull",
            Action::Push => "push",
            Action::Wildcard => "*",
        }
    }
}

impl std::str::FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "delete" => Ok(Action::Delete),
            "pull" => Ok(Action::Pull),
            "push" => Ok(Action::Push),
            "*" => Ok(Action::Wildcard),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub resource_type: String,
    pub resource_name: String,
    pub actions: BTreeSet<Action>,
}

impl Scope {
    pub fn new(
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
        actions: impl IntoIterator<Item = Action>,
    ) -> Self {
        let mut actions: BTreeSet<Action> = actions.into_iter().collect();
        collapse_wildcard(&mut actions);
        Self {
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
            actions,
        }
    }

    /// `resourceType:resourceName:action1,action2,...`, actions sorted
    /// alphabetically (a lone wildcard renders as `*`).
    pub fn render(&self) -> String {
        let actions = self
            .actions
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(",");
        format!("{}:{}:{}", self.resource_type, self.resource_name, actions)
    }
}

fn collapse_wildcard(actions: &mut BTreeSet<Action>) {
    if actions.contains(&Action::Wildcard) {
        actions.retain(|a| *a == Action::Wildcard);
    }
}

/// Parse `repository:name:pull,push` style scope strings, as received from
/// a server's `WWW-Authenticate` `scope` parameter.
pub fn parse_scope(s: &str) -> Option<Scope> {
    let mut parts = s.splitn(3, ':');
    let resource_type = parts.next()?;
    let resource_name = parts.next()?;
    let actions = parts.next()?;
    let actions = actions
        .split(',')
        .filter(|a| !a.is_empty())
        .filter_map(|a| a.parse::<Action>().ok());
    Some(Scope::new(resource_type, resource_name, actions))
}

/// Per-host ordered set of scopes, merged by `(resourceType, resourceName)`.
/// Ordering is lexicographic by that key, giving deterministic rendered
/// scope strings.
#[derive(Default)]
pub struct ScopeManager {
    by_host: Mutex<BTreeMap<String, BTreeMap<(String, String), BTreeSet<Action>>>>,
}

impl ScopeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, host: &str, scope: Scope) {
        let mut guard = self.by_host.lock().await;
        let entries = guard.entry(host.to_string()).or_default();
        let key = (scope.resource_type, scope.resource_name);
        let merged = entries.entry(key).or_default();
        merged.extend(scope.actions);
        collapse_wildcard(merged);
    }

    pub async fn add_from_str(&self, host: &str, scope_str: &str) {
        if let Some(scope) = parse_scope(scope_str) {
            self.add(host, scope).await;
        }
    }

    /// Render every scope known for `host` into a single space-separated
    /// scope string, in deterministic (resourceType, resourceName) order.
    pub async fn scope_string(&self, host: &str) -> String {
        let guard = self.by_host.lock().await;
        let Some(entries) = guard.get(host) else {
            return String::new();
        };
        entries
            .iter()
            .map(|((resource_type, resource_name), actions)| {
                Scope {
                    resource_type: resource_type.clone(),
                    resource_name: resource_name.clone(),
                    actions: actions.clone(),
                }
                .render()
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
