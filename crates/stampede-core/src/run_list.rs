//! Run-list parsing and expansion
//!
//! A run list is an ordered list of recipe and role references. Entries
//! arrive as text as `recipe[name]` (optionally `recipe[name@1.2.3]`),
//! `role[name]`, or a bare recipe token, and
//! expansion resolves role references into their constituent recipes,
//! depth-first, splicing each role's contribution in at the role's
//! position. A role is applied at most once per expansion, which is what
//! keeps cyclic role references from recursing forever.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// The environment name that always resolves to a role's default run list.
pub const DEFAULT_ENVIRONMENT: &str = "_default";

/// Kind of a run-list entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Recipe,
    Role,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Recipe => f.write_str("recipe"),
            ItemKind::Role => f.write_str("role"),
        }
    }
}

/// One parsed run-list entry, immutable once parsed.
///
/// A version is only meaningful for recipes and is compared as an opaque
/// token, never semver-interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunListItem {
    /// Recipe or role name
    pub name: String,
    /// Whether this entry references a recipe or a role
    pub kind: ItemKind,
    /// Optional pinned version (recipes only)
    pub version: Option<String>,
}

impl RunListItem {
    /// A recipe reference, optionally version-pinned.
    pub fn recipe(name: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            name: name.into(),
            kind: ItemKind::Recipe,
            version: version.map(str::to_string),
        }
    }

    /// A role reference.
    pub fn role(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ItemKind::Role,
            version: None,
        }
    }

    /// Canonical bracketed form, e.g. `recipe[apt@1.2.0]` or `role[base]`.
    pub fn canonical(&self) -> String {
        match &self.version {
            Some(version) => format!("{}[{}@{}]", self.kind, self.name, version),
            None => format!("{}[{}]", self.kind, self.name),
        }
    }

    /// Bare recipe identifier (`name` or `name@version`) as it appears in
    /// an expanded run list.
    pub fn recipe_spec(&self) -> String {
        match &self.version {
            Some(version) => format!("{}@{}", self.name, version),
            None => self.name.clone(),
        }
    }
}

/// Result of parsing one textual run-list entry.
///
/// Unrecognized entries are preserved rather than silently dropped so the
/// caller can decide whether to warn, fail, or ignore them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEntry {
    /// The entry matched one of the recognized forms
    Item(RunListItem),
    /// The entry matched nothing; the raw text is kept for diagnostics
    Unrecognized(String),
}

/// An ordered run list. Order is significant: expansion preserves source
/// order, with role contents spliced in depth-first at the role's position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunList(Vec<RunListItem>);

impl RunList {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the run list has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, RunListItem> {
        self.0.iter()
    }

    /// Canonical string forms of every entry, in order.
    pub fn to_string_vec(&self) -> Vec<String> {
        self.0.iter().map(RunListItem::canonical).collect()
    }

    /// Expand into the flat ordered recipe list, resolving role references
    /// through `roles`. A role lookup failure aborts the expansion.
    pub async fn expand(&self, environment: &str, roles: &dyn RoleSource) -> Result<Vec<String>> {
        let mut recipes = Vec::new();
        let mut applied = HashSet::new();
        expand_into(self, environment, roles, &mut recipes, &mut applied).await?;
        Ok(recipes)
    }

    /// Like [`expand`](Self::expand), but a role that fails to resolve is
    /// logged and contributes nothing; the rest of the list still expands.
    pub async fn expand_lenient(&self, environment: &str, roles: &dyn RoleSource) -> Vec<String> {
        // LenientRoles never returns an error, so expansion cannot fail here.
        self.expand(environment, &LenientRoles(roles))
            .await
            .unwrap_or_default()
    }
}

impl From<Vec<RunListItem>> for RunList {
    fn from(items: Vec<RunListItem>) -> Self {
        Self(items)
    }
}

impl<'a> IntoIterator for &'a RunList {
    type Item = &'a RunListItem;
    type IntoIter = std::slice::Iter<'a, RunListItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Resolves the run list a role contributes under a given environment.
///
/// The production implementation queries the management server; tests use
/// in-memory maps.
#[async_trait]
pub trait RoleSource: Send + Sync {
    /// Fetch and resolve the role's run list for `environment`.
    async fn role_run_list(&self, role: &str, environment: &str) -> Result<RunList>;
}

/// Wrapper that downgrades role resolution failures to a warning.
struct LenientRoles<'a>(&'a dyn RoleSource);

#[async_trait]
impl RoleSource for LenientRoles<'_> {
    async fn role_run_list(&self, role: &str, environment: &str) -> Result<RunList> {
        match self.0.role_run_list(role, environment).await {
            Ok(list) => Ok(list),
            Err(err) => {
                tracing::warn!(role, environment, error = %err, "Skipping role that failed to resolve");
                Ok(RunList::default())
            }
        }
    }
}

fn expand_into<'a>(
    list: &'a RunList,
    environment: &'a str,
    roles: &'a dyn RoleSource,
    recipes: &'a mut Vec<String>,
    applied: &'a mut HashSet<String>,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        for item in list {
            match item.kind {
                ItemKind::Recipe => recipes.push(item.recipe_spec()),
                ItemKind::Role => {
                    // Each role contributes at most once per expansion.
                    if applied.insert(item.name.clone()) {
                        let role_list = roles.role_run_list(&item.name, environment).await?;
                        expand_into(&role_list, environment, roles, recipes, applied).await?;
                    }
                }
            }
        }
        Ok(())
    })
}

/// A role document as served by the management server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Role {
    /// Role name
    pub name: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Default run list
    #[serde(default)]
    pub run_list: Vec<String>,

    /// Per-environment run-list overrides
    #[serde(default)]
    pub env_run_lists: HashMap<String, Vec<String>>,

    /// Default attribute tree
    #[serde(default)]
    pub default_attributes: serde_json::Map<String, serde_json::Value>,

    /// Override attribute tree
    #[serde(default)]
    pub override_attributes: serde_json::Map<String, serde_json::Value>,
}

impl Role {
    /// The run list this role contributes under `environment`.
    ///
    /// An environment-specific override wins unless the environment is
    /// [`DEFAULT_ENVIRONMENT`], which always uses the default run list.
    pub fn run_list_for(&self, environment: &str) -> RunList {
        if environment != DEFAULT_ENVIRONMENT {
            if let Some(entries) = self.env_run_lists.get(environment) {
                return parse(entries);
            }
        }
        parse(&self.run_list)
    }
}

/// Parse textual entries into tagged results, preserving unmatched text.
///
/// Patterns are tried in priority order: qualified recipe, qualified role,
/// bare recipe. First match wins.
pub fn parse_entries(entries: &[String]) -> Vec<ParsedEntry> {
    let qualified_recipe = Regex::new(r"^recipe\[([^\]@]+)(@([0-9]+(\.[0-9]+){1,2}))?\]$")
        .expect("invalid qualified recipe pattern");
    let qualified_role =
        Regex::new(r"^role\[([^\]]+)\]$").expect("invalid qualified role pattern");
    let bare_recipe = Regex::new(r"^([^@]+)(@([0-9]+(\.[0-9]+){1,2}))?$")
        .expect("invalid bare recipe pattern");

    entries
        .iter()
        .map(|entry| {
            if let Some(caps) = qualified_recipe.captures(entry) {
                return ParsedEntry::Item(RunListItem::recipe(
                    &caps[1],
                    caps.get(3).map(|m| m.as_str()),
                ));
            }
            if let Some(caps) = qualified_role.captures(entry) {
                return ParsedEntry::Item(RunListItem::role(&caps[1]));
            }
            if let Some(caps) = bare_recipe.captures(entry) {
                return ParsedEntry::Item(RunListItem::recipe(
                    &caps[1],
                    caps.get(3).map(|m| m.as_str()),
                ));
            }
            ParsedEntry::Unrecognized(entry.clone())
        })
        .collect()
}

/// Lenient parse: unrecognized entries are dropped.
pub fn parse(entries: &[String]) -> RunList {
    parse_entries(entries)
        .into_iter()
        .filter_map(|entry| match entry {
            ParsedEntry::Item(item) => Some(item),
            ParsedEntry::Unrecognized(_) => None,
        })
        .collect::<Vec<_>>()
        .into()
}

/// Strict parse: the first unrecognized entry fails the whole list.
pub fn parse_strict(entries: &[String]) -> Result<RunList> {
    let mut items = Vec::with_capacity(entries.len());
    for entry in parse_entries(entries) {
        match entry {
            ParsedEntry::Item(item) => items.push(item),
            ParsedEntry::Unrecognized(raw) => return Err(CoreError::UnrecognizedEntry(raw)),
        }
    }
    Ok(items.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// In-memory role source for expansion tests.
    struct StaticRoles(HashMap<String, Role>);

    impl StaticRoles {
        fn new(roles: Vec<Role>) -> Self {
            Self(roles.into_iter().map(|r| (r.name.clone(), r)).collect())
        }
    }

    #[async_trait]
    impl RoleSource for StaticRoles {
        async fn role_run_list(&self, role: &str, environment: &str) -> Result<RunList> {
            match self.0.get(role) {
                Some(found) => Ok(found.run_list_for(environment)),
                None => Err(CoreError::RoleFetch {
                    role: role.to_string(),
                    message: "not found".to_string(),
                }),
            }
        }
    }

    fn role(name: &str, run_list: &[&str]) -> Role {
        Role {
            name: name.to_string(),
            run_list: entries(run_list),
            ..Role::default()
        }
    }

    #[test]
    fn parses_qualified_recipes() {
        let list = parse(&entries(&["recipe[apt]", "recipe[ntp@3.1.4]"]));
        assert_eq!(
            list,
            vec![
                RunListItem::recipe("apt", None),
                RunListItem::recipe("ntp", Some("3.1.4")),
            ]
            .into()
        );
    }

    #[test]
    fn parses_roles_and_bare_recipes() {
        let list = parse(&entries(&["role[base]", "nginx", "nginx@1.0.0"]));
        assert_eq!(
            list,
            vec![
                RunListItem::role("base"),
                RunListItem::recipe("nginx", None),
                RunListItem::recipe("nginx", Some("1.0.0")),
            ]
            .into()
        );
    }

    #[test]
    fn lenient_parse_drops_unrecognized_entries() {
        // A two-part version is the shortest pinned form; a bare "@" entry
        // matches nothing.
        let list = parse(&entries(&["recipe[apt]", "@", "recipe[bad@1]"]));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn strict_parse_surfaces_unrecognized_entries() {
        let err = parse_strict(&entries(&["recipe[apt]", "@"])).unwrap_err();
        assert!(matches!(err, CoreError::UnrecognizedEntry(raw) if raw == "@"));
    }

    #[test]
    fn parse_round_trips_through_canonical_form() {
        let source = entries(&["recipe[apt]", "role[base]", "ntp@3.1.4"]);
        let parsed = parse(&source);
        let reparsed = parse(&parsed.to_string_vec());
        assert_eq!(parsed, reparsed);
    }

    #[tokio::test]
    async fn expansion_preserves_order_around_roles() {
        let roles = StaticRoles::new(vec![role("r", &["recipe[x]", "recipe[y]"])]);
        let list = parse(&entries(&["recipe[a]", "role[r]", "recipe[b]"]));

        let expanded = list.expand(DEFAULT_ENVIRONMENT, &roles).await.unwrap();
        assert_eq!(expanded, vec!["a", "x", "y", "b"]);
    }

    #[tokio::test]
    async fn self_referencing_role_expands_once() {
        let roles = StaticRoles::new(vec![role("b", &["recipe[c]", "role[b]"])]);
        let list = parse(&entries(&["recipe[a]", "role[b]"]));

        let expanded = list.expand(DEFAULT_ENVIRONMENT, &roles).await.unwrap();
        assert_eq!(expanded, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn mutually_recursive_roles_terminate() {
        let roles = StaticRoles::new(vec![
            role("left", &["recipe[l]", "role[right]"]),
            role("right", &["recipe[r]", "role[left]"]),
        ]);
        let list = parse(&entries(&["role[left]"]));

        let expanded = list.expand(DEFAULT_ENVIRONMENT, &roles).await.unwrap();
        assert_eq!(expanded, vec!["l", "r"]);
    }

    #[tokio::test]
    async fn environment_override_wins_outside_default() {
        let mut prod_role = role("web", &["recipe[apache]"]);
        prod_role
            .env_run_lists
            .insert("prod".to_string(), entries(&["recipe[nginx]"]));
        let roles = StaticRoles::new(vec![prod_role]);
        let list = parse(&entries(&["role[web]"]));

        let prod = list.expand("prod", &roles).await.unwrap();
        assert_eq!(prod, vec!["nginx"]);

        let default = list.expand(DEFAULT_ENVIRONMENT, &roles).await.unwrap();
        assert_eq!(default, vec!["apache"]);
    }

    #[tokio::test]
    async fn expansion_is_deterministic() {
        let roles = StaticRoles::new(vec![
            role("base", &["recipe[users]", "role[audit]"]),
            role("audit", &["recipe[auditd@2.0.0]"]),
        ]);
        let list = parse(&entries(&["role[base]", "recipe[app]"]));

        let first = list.expand(DEFAULT_ENVIRONMENT, &roles).await.unwrap();
        let second = list.expand(DEFAULT_ENVIRONMENT, &roles).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec!["users", "auditd@2.0.0", "app"]);
    }

    #[tokio::test]
    async fn strict_expansion_propagates_role_failures() {
        let roles = StaticRoles::new(vec![]);
        let list = parse(&entries(&["recipe[a]", "role[missing]"]));

        let err = list.expand(DEFAULT_ENVIRONMENT, &roles).await.unwrap_err();
        assert!(matches!(err, CoreError::RoleFetch { role, .. } if role == "missing"));
    }

    #[tokio::test]
    async fn lenient_expansion_skips_failed_roles() {
        let roles = StaticRoles::new(vec![]);
        let list = parse(&entries(&["recipe[a]", "role[missing]", "recipe[b]"]));

        let expanded = list.expand_lenient(DEFAULT_ENVIRONMENT, &roles).await;
        assert_eq!(expanded, vec!["a", "b"]);
    }
}
