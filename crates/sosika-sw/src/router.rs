//! Route registry: first-match dispatch from requests to caching strategies.
//!
//! Routes are scanned in registration order; the first matcher that returns
//! a match wins. A per-method default handler catches requests no route
//! matched; without one, the request passes through to normal networking.

use hashbrown::HashMap;
use http::Method;
use url::Url;

use crate::fetch::FetchRequest;
use crate::strategy::Strategy;

/// What a matcher extracted from a request.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched URL.
    pub url: Url,
}

/// A route matcher predicate.
pub type Matcher = Box<dyn Fn(&FetchRequest) -> Option<RouteMatch> + Send + Sync>;

struct Route {
    method: Method,
    matcher: Matcher,
    strategy: Strategy,
}

/// The route table.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    defaults: HashMap<Method, Strategy>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a GET route.
    pub fn register(&mut self, matcher: Matcher, strategy: Strategy) {
        self.register_with_method(matcher, strategy, Method::GET);
    }

    /// Register a route for an explicit method.
    pub fn register_with_method(&mut self, matcher: Matcher, strategy: Strategy, method: Method) {
        self.routes.push(Route {
            method,
            matcher,
            strategy,
        });
    }

    /// Set the fallback handler for a method.
    pub fn set_default_handler(&mut self, method: Method, strategy: Strategy) {
        self.defaults.insert(method, strategy);
    }

    /// Find the strategy for a request: first registered match wins, then the
    /// method's default handler, then `None` (pass through).
    pub fn find(&self, request: &FetchRequest) -> Option<(&Strategy, RouteMatch)> {
        for route in &self.routes {
            if route.method != request.method {
                continue;
            }
            if let Some(matched) = (route.matcher)(request) {
                return Some((&route.strategy, matched));
            }
        }

        self.defaults.get(&request.method).map(|strategy| {
            (
                strategy,
                RouteMatch {
                    url: request.url.clone(),
                },
            )
        })
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether any routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Matcher constructors for the routes the Sosika worker registers.
pub mod matchers {
    use super::{Matcher, RouteMatch};

    /// Match top-level navigation (HTML document) requests.
    pub fn navigation() -> Matcher {
        Box::new(|request| {
            request.is_navigation.then(|| RouteMatch {
                url: request.url.clone(),
            })
        })
    }

    /// Match an exact URL path.
    pub fn path_exact(path: &str) -> Matcher {
        let path = path.to_string();
        Box::new(move |request| {
            (request.url.path() == path).then(|| RouteMatch {
                url: request.url.clone(),
            })
        })
    }

    /// Match URL paths under a prefix.
    pub fn path_prefix(prefix: &str) -> Matcher {
        let prefix = prefix.to_string();
        Box::new(move |request| {
            request.url.path().starts_with(&prefix).then(|| RouteMatch {
                url: request.url.clone(),
            })
        })
    }

    /// Match URL paths ending in one of the given extensions.
    pub fn extensions(exts: &[&str]) -> Matcher {
        let exts: Vec<String> = exts.iter().map(|e| format!(".{e}")).collect();
        Box::new(move |request| {
            let path = request.url.path();
            exts.iter().any(|ext| path.ends_with(ext)).then(|| RouteMatch {
                url: request.url.clone(),
            })
        })
    }
}
