//! Destination identity and the frozen navigation graph.
//!
//! A `Route` names a destination the pipeline can be asked to show; a `Node`
//! is the graph's unit of metadata for one destination (appearance, screen
//! timeout, access requirements, menu children). The graph is assembled once
//! through `GraphBuilder` and immutable afterwards; every downstream
//! component shares it behind an `Arc` and performs O(1) lookups by
//! `RouteKey`.
//!
//! Identity model: a `RouteKey` is a small integer assigned by the
//! application at graph-definition time (one per destination). Two routes
//! with the same key address the same node even when their `RouteArgs`
//! differ; args travel with the route and are opaque to lookup. This keeps
//! key comparison and hashing trivial on the hot dispatch path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod graph;
pub use graph::{Graph, GraphBuilder, GraphError};

/// Stable integer identity of a destination. Unique within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(pub u32);

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route#{}", self.0)
    }
}

/// Ordered argument pairs carried by a route instance. Structural equality
/// participates in debounce equivalence and redirect-chain dedup, so the
/// representation stays a plain ordered list rather than a hash map.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteArgs(Vec<(String, String)>);

impl RouteArgs {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// First value registered under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A destination request: key identity plus optional opaque arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    key: RouteKey,
    args: Option<RouteArgs>,
}

impl Route {
    pub fn new(key: RouteKey) -> Self {
        Self { key, args: None }
    }

    pub fn with_args(key: RouteKey, args: RouteArgs) -> Self {
        let args = if args.is_empty() { None } else { Some(args) };
        Self { key, args }
    }

    pub fn key(&self) -> RouteKey {
        self.key
    }

    pub fn args(&self) -> Option<&RouteArgs> {
        self.args.as_ref()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.args {
            Some(args) => write!(f, "{}(+{} args)", self.key, args.0.len()),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Opaque access-requirement tag attached to a node. The graph never
/// interprets these; validators match them against whatever grant state the
/// application maintains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Requirement(String);

impl Requirement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn tag(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Presentation metadata. Opaque to the pipeline; carried through so the
/// view layer can title screens and pick icons without a second lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Appearance {
    pub title: String,
    pub icon: Option<String>,
}

impl Appearance {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            icon: None,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

/// Closure producing a fresh route instance for a node, used where a
/// destination's default arguments are computed at navigation time.
pub type AutoRoute = Box<dyn Fn() -> Route + Send + Sync>;

/// Graph unit: one destination's metadata.
///
/// `screen_timeout` semantics: `None` inherits the configured default;
/// `Some(Duration::MAX)` disables the inactivity timeout for this screen;
/// any other value is the per-screen timeout.
pub struct Node {
    route_key: RouteKey,
    name: String,
    appearance: Appearance,
    screen_timeout: Option<Duration>,
    requirements: Vec<Requirement>,
    menu_children: Vec<Arc<Node>>,
    auto_route: Option<AutoRoute>,
}

impl Node {
    pub fn new(route_key: RouteKey, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            route_key,
            appearance: Appearance::titled(name.clone()),
            name,
            screen_timeout: None,
            requirements: Vec::new(),
            menu_children: Vec::new(),
            auto_route: None,
        }
    }

    pub fn with_appearance(mut self, appearance: Appearance) -> Self {
        self.appearance = appearance;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.screen_timeout = Some(timeout);
        self
    }

    /// Shorthand for `with_timeout(Duration::MAX)`.
    pub fn without_timeout(mut self) -> Self {
        self.screen_timeout = Some(Duration::MAX);
        self
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn with_menu_children(mut self, children: Vec<Arc<Node>>) -> Self {
        self.menu_children = children;
        self
    }

    pub fn with_auto_route(mut self, auto: AutoRoute) -> Self {
        self.auto_route = Some(auto);
        self
    }

    pub fn route_key(&self) -> RouteKey {
        self.route_key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn appearance(&self) -> &Appearance {
        &self.appearance
    }

    pub fn screen_timeout(&self) -> Option<Duration> {
        self.screen_timeout
    }

    /// Resolve the timeout the inactivity timer should arm for this screen.
    /// `None` means "never fire".
    pub fn effective_timeout(&self, default: Duration) -> Option<Duration> {
        match self.screen_timeout {
            Some(d) if d == Duration::MAX => None,
            Some(d) => Some(d),
            None if default == Duration::MAX => None,
            None => Some(default),
        }
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_menu(&self) -> bool {
        !self.menu_children.is_empty()
    }

    pub fn menu_children(&self) -> &[Arc<Node>] {
        &self.menu_children
    }

    /// Build a route instance for this node: the auto-route closure when one
    /// is registered, else a bare route over the key.
    pub fn route(&self) -> Route {
        match &self.auto_route {
            Some(auto) => auto(),
            None => Route::new(self.route_key),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("route_key", &self.route_key)
            .field("name", &self.name)
            .field("screen_timeout", &self.screen_timeout)
            .field("requirements", &self.requirements)
            .field(
                "menu_children",
                &self
                    .menu_children
                    .iter()
                    .map(|c| c.route_key)
                    .collect::<Vec<_>>(),
            )
            .field("auto_route", &self.auto_route.is_some())
            .finish()
    }
}
