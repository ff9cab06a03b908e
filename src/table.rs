//! Radix-tree route table.
//!
//! One matchit tree per method key. Besides the exact-method trees there is a
//! wildcard tree for routes registered without a method, and an aggregate
//! tree holding every route regardless of method. The aggregate tree only
//! answers "does anything live at this path", which is what separates
//! `405 Method Not Allowed` from `404 Not Found`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;
use tracing::warn;

use crate::error::Error;
use crate::route::{Methods, Route};

/// Keys of the route table.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum MethodKey {
    Exact(Method),
    /// Routes registered without a method.
    Any,
    /// Every route, under every method it was registered for.
    All,
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(method) => f.write_str(method.as_str()),
            Self::Any => f.write_str("*"),
            Self::All => f.write_str("AllRoutes"),
        }
    }
}

/// A resolved route and the parameters captured from the path.
#[derive(Clone, Debug)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: HashMap<String, String>,
}

/// Outcome of resolving a method and path.
#[derive(Clone, Debug)]
pub enum Resolution {
    Matched(RouteMatch),
    /// Something lives at the path, but not for this method. `allow` is
    /// sorted and de-duplicated.
    MethodNotAllowed { allow: Vec<String> },
    NotFound,
}

/// The routes of one method key.
///
/// Several routes may share a pattern (the aggregate tree sees one copy per
/// registered method); the first registered one answers lookups.
#[derive(Default)]
pub struct Matcher {
    tree: MatchitRouter<usize>,
    slots: Vec<Vec<Arc<Route>>>,
    by_pattern: HashMap<String, usize>,
    /// Parameter names are replaced by position, so `/cars/:id` and
    /// `/cars/:carId` share a slot instead of conflicting.
    anonymous: bool,
}

impl Matcher {
    fn for_key(key: &MethodKey) -> Self {
        Self { anonymous: *key == MethodKey::All, ..Self::default() }
    }

    fn pattern(&self, path: &str) -> String {
        if self.anonymous { anonymize_pattern(path) } else { normalize_pattern(path) }
    }

    pub fn add_route(&mut self, route: Arc<Route>) -> Result<(), Error> {
        let pattern = self.pattern(route.path());
        if let Some(&slot) = self.by_pattern.get(&pattern) {
            self.slots[slot].push(route);
            return Ok(());
        }

        let slot = self.slots.len();
        self.tree.insert(pattern.as_str(), slot).map_err(|e| Error::InvalidRoute {
            path: route.path().to_owned(),
            reason: e.to_string(),
        })?;
        self.slots.push(vec![route]);
        self.by_pattern.insert(pattern, slot);
        Ok(())
    }

    pub fn find(&self, path: &str) -> Option<RouteMatch> {
        let matched = self.tree.at(path).ok()?;
        let route = Arc::clone(self.slots[*matched.value].first()?);
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some(RouteMatch { route, params })
    }

    /// Every registered route in registration order, duplicates included.
    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.slots.iter().flatten().cloned().collect()
    }
}

/// Per-method matchers plus the wildcard and aggregate tables.
#[derive(Default)]
pub struct RouteTable {
    matchers: HashMap<MethodKey, Matcher>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `route` under each of its methods (or the wildcard key) and
    /// once more into the aggregate table. Returns the keys it went under.
    ///
    /// The route is checked against every target tree first, so a pattern
    /// matchit rejects leaves the table untouched.
    pub fn add(&mut self, route: Arc<Route>) -> Result<Vec<MethodKey>, Error> {
        let keys: Vec<MethodKey> = match route.methods() {
            Methods::Any => vec![MethodKey::Any],
            Methods::Only(methods) => methods.iter().cloned().map(MethodKey::Exact).collect(),
        };

        for key in keys.iter().chain([&MethodKey::All]) {
            self.check(key, &route)?;
        }
        for key in keys.iter().chain([&MethodKey::All]) {
            let matcher = self.matchers.entry(key.clone()).or_insert_with(|| Matcher::for_key(key));
            if !matcher.anonymous && matcher.by_pattern.contains_key(&matcher.pattern(route.path())) {
                warn!(method = %key, path = %route.path(), "route already registered; the first one wins");
            }
            matcher.add_route(Arc::clone(&route))?;
        }
        Ok(keys)
    }

    fn check(&self, key: &MethodKey, route: &Route) -> Result<(), Error> {
        let Some(matcher) = self.matchers.get(key) else {
            let pattern = Matcher::for_key(key).pattern(route.path());
            // An empty tree still rejects malformed patterns.
            let mut probe = MatchitRouter::new();
            return probe.insert(pattern.as_str(), ()).map_err(|e| Error::InvalidRoute {
                path: route.path().to_owned(),
                reason: e.to_string(),
            });
        };
        let pattern = matcher.pattern(route.path());
        if matcher.by_pattern.contains_key(&pattern) {
            return Ok(());
        }
        // matchit has no dry-run insert; probe a copy of the patterns.
        // Each of them already went into the live tree, so re-inserting
        // them cannot conflict.
        let mut probe = MatchitRouter::new();
        for existing in matcher.by_pattern.keys() {
            let reinserted = probe.insert(existing.as_str(), ());
            debug_assert!(reinserted.is_ok(), "registered pattern {existing} rejected: {reinserted:?}");
        }
        probe.insert(pattern.as_str(), ()).map_err(|e| Error::InvalidRoute {
            path: route.path().to_owned(),
            reason: e.to_string(),
        })
    }

    pub fn find(&self, key: &MethodKey, path: &str) -> Option<RouteMatch> {
        self.matchers.get(key)?.find(path)
    }

    /// Exact method first, then the wildcard table, then the aggregate table
    /// to tell a method mismatch from a miss.
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution {
        let exact = MethodKey::Exact(method.clone());
        if let Some(found) = self.find(&exact, path).or_else(|| self.find(&MethodKey::Any, path)) {
            return Resolution::Matched(found);
        }

        if self.find(&MethodKey::All, path).is_none() {
            return Resolution::NotFound;
        }

        let allow: BTreeSet<&str> = self
            .matchers
            .iter()
            .filter_map(|(key, matcher)| match key {
                MethodKey::Exact(m) if matcher.find(path).is_some() => Some(m.as_str()),
                _ => None,
            })
            .collect();
        if allow.is_empty() {
            return Resolution::NotFound;
        }
        Resolution::MethodNotAllowed { allow: allow.into_iter().map(str::to_owned).collect() }
    }

    pub fn routes(&self, key: &MethodKey) -> Vec<Arc<Route>> {
        self.matchers.get(key).map(Matcher::routes).unwrap_or_default()
    }

    /// Drops every route registered under `key`, along with the aggregate
    /// entries it contributed. Resetting [`MethodKey::All`] empties the table.
    pub fn reset(&mut self, key: &MethodKey) {
        if *key == MethodKey::All {
            self.matchers.clear();
            return;
        }
        let Some(removed) = self.matchers.remove(key) else {
            return;
        };
        let Some(aggregate) = self.matchers.remove(&MethodKey::All) else {
            return;
        };

        // The aggregate holds one copy of a route per key it went under, so
        // each removed route takes exactly one copy with it.
        let mut removed = removed.routes();
        let mut rebuilt = Matcher::for_key(&MethodKey::All);
        for route in aggregate.routes() {
            if let Some(i) = removed.iter().position(|r| Arc::ptr_eq(r, &route)) {
                removed.swap_remove(i);
                continue;
            }
            if let Err(e) = rebuilt.add_route(route) {
                warn!(error = %e, "route dropped while pruning the aggregate table");
            }
        }
        if !rebuilt.slots.is_empty() {
            self.matchers.insert(MethodKey::All, rebuilt);
        }
    }
}

/// Rewrites `:name` segments to `{name}` and `*name` to `{*name}`.
pub fn normalize_pattern(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Like [`normalize_pattern`], with parameters named by position.
fn anonymize_pattern(path: &str) -> String {
    normalize_pattern(path)
        .split('/')
        .enumerate()
        .map(|(i, segment)| {
            if segment.starts_with("{*") {
                format!("{{*p{i}}}")
            } else if segment.starts_with('{') {
                format!("{{p{i}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteConfig;

    async fn noop(_ctx: crate::Context) {}

    fn route(path: &str, methods: &[Method]) -> Arc<Route> {
        let config = RouteConfig::new(path, noop).methods(methods.iter().cloned());
        Arc::new(Route::from_config(config))
    }

    fn matched(resolution: Resolution) -> RouteMatch {
        match resolution {
            Resolution::Matched(found) => found,
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn colon_params_are_normalized() {
        assert_eq!(normalize_pattern("/cars/:carId"), "/cars/{carId}");
        assert_eq!(normalize_pattern("/files/*rest"), "/files/{*rest}");
        assert_eq!(normalize_pattern("/cars/{id}"), "/cars/{id}");
    }

    #[test]
    fn exact_method_beats_wildcard() {
        let mut table = RouteTable::new();
        table.add(route("/cars/:carId", &[])).unwrap();
        table.add(route("/cars/:carId", &[Method::DELETE])).unwrap();

        let found = matched(table.resolve(&Method::DELETE, "/cars/123"));
        assert_eq!(found.route.methods(), &Methods::Only(vec![Method::DELETE]));
        assert_eq!(found.params["carId"], "123");

        let found = matched(table.resolve(&Method::GET, "/cars/9"));
        assert_eq!(found.route.methods(), &Methods::Any);
    }

    #[test]
    fn mismatch_lists_sorted_unique_methods() {
        let mut table = RouteTable::new();
        table.add(route("/cars", &[Method::POST, Method::GET])).unwrap();
        table.add(route("/cars", &[Method::GET])).unwrap();

        match table.resolve(&Method::PATCH, "/cars") {
            Resolution::MethodNotAllowed { allow } => assert_eq!(allow, ["GET", "POST"]),
            other => panic!("expected 405, got {other:?}"),
        }
        assert!(matches!(table.resolve(&Method::GET, "/bikes"), Resolution::NotFound));
    }

    #[test]
    fn registration_order_does_not_change_matches() {
        let routes = [
            route("/cars", &[Method::GET]),
            route("/cars/:carId", &[]),
            route("/trucks", &[Method::GET, Method::PUT]),
        ];
        let mut forward = RouteTable::new();
        let mut backward = RouteTable::new();
        for r in routes.iter() {
            forward.add(Arc::clone(r)).unwrap();
        }
        for r in routes.iter().rev() {
            backward.add(Arc::clone(r)).unwrap();
        }

        for (method, path) in [(Method::GET, "/cars"), (Method::PUT, "/trucks"), (Method::POST, "/cars/1")] {
            let a = matched(forward.resolve(&method, path));
            let b = matched(backward.resolve(&method, path));
            assert!(Arc::ptr_eq(&a.route, &b.route), "{method} {path}");
        }
    }

    #[test]
    fn aggregate_table_keeps_every_registration() {
        let mut table = RouteTable::new();
        table.add(route("/cars", &[Method::GET, Method::POST])).unwrap();
        table.add(route("/trucks", &[])).unwrap();
        assert_eq!(table.routes(&MethodKey::All).len(), 3);
        assert_eq!(table.routes(&MethodKey::Any).len(), 1);
    }

    #[test]
    fn reset_clears_one_method() {
        let mut table = RouteTable::new();
        table.add(route("/cars", &[Method::GET])).unwrap();
        table.reset(&MethodKey::Exact(Method::GET));
        assert!(table.routes(&MethodKey::Exact(Method::GET)).is_empty());
        assert!(table.routes(&MethodKey::All).is_empty());
        assert!(matches!(table.resolve(&Method::GET, "/cars"), Resolution::NotFound));
    }

    #[test]
    fn reset_prunes_only_that_methods_aggregate_entries() {
        let mut table = RouteTable::new();
        let cars = route("/cars", &[Method::GET, Method::POST]);
        table.add(Arc::clone(&cars)).unwrap();
        table.add(route("/trucks", &[Method::GET])).unwrap();
        table.add(route("/bikes", &[])).unwrap();

        table.reset(&MethodKey::Exact(Method::GET));
        let left = table.routes(&MethodKey::All);
        assert_eq!(left.len(), 2);
        assert!(Arc::ptr_eq(&left[0], &cars));
        assert_eq!(left[1].path(), "/bikes");
        assert!(matches!(table.resolve(&Method::GET, "/trucks"), Resolution::NotFound));
        match table.resolve(&Method::GET, "/cars") {
            Resolution::MethodNotAllowed { allow } => assert_eq!(allow, ["POST"]),
            other => panic!("expected 405, got {other:?}"),
        }

        table.reset(&MethodKey::All);
        assert!(table.routes(&MethodKey::Any).is_empty());
        assert!(matches!(table.resolve(&Method::PUT, "/bikes"), Resolution::NotFound));
    }

    #[test]
    fn parameter_names_may_differ_across_methods() {
        let mut table = RouteTable::new();
        table.add(route("/cars/:carId", &[Method::GET])).unwrap();
        table.add(route("/cars/:id", &[Method::DELETE])).unwrap();

        assert_eq!(matched(table.resolve(&Method::GET, "/cars/7")).params["carId"], "7");
        assert_eq!(matched(table.resolve(&Method::DELETE, "/cars/7")).params["id"], "7");
        match table.resolve(&Method::PUT, "/cars/7") {
            Resolution::MethodNotAllowed { allow } => assert_eq!(allow, ["DELETE", "GET"]),
            other => panic!("expected 405, got {other:?}"),
        }
    }

    #[test]
    fn conflicting_pattern_is_rejected_without_partial_insert() {
        let mut table = RouteTable::new();
        table.add(route("/cars/:id", &[Method::GET])).unwrap();
        let err = table.add(route("/cars/:carId", &[Method::POST, Method::GET])).unwrap_err();
        assert!(matches!(err, Error::InvalidRoute { .. }));
        assert!(table.routes(&MethodKey::Exact(Method::POST)).is_empty());
        assert_eq!(table.routes(&MethodKey::All).len(), 1);
    }
}
