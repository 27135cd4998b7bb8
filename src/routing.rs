//! Request classification for the resource cache, expressed as data: an
//! ordered table of matchers, first match wins.

use crate::config::Endpoints;
use crate::transport::{Destination, Request, RequestMode};
use http::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Api,
    /// Login-class pages that answer with redirects and must never be stored.
    AuthPage,
    Navigation,
    Asset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Network only; a synthetic error payload when unreachable.
    Bypass,
    /// Network only, no-store; the offline page when unreachable.
    NetworkOnlyWithFallback,
    /// Network first, refreshing the stored copy; stored copy, then the
    /// offline page, when unreachable.
    NetworkFirstRevalidate,
    /// Stored copy first; network on a miss; typed fallback when both fail.
    CacheFirstWithNetworkFallback,
}

impl RequestClass {
    pub fn decision(self) -> CacheDecision {
        match self {
            RequestClass::Api => CacheDecision::Bypass,
            RequestClass::AuthPage => CacheDecision::NetworkOnlyWithFallback,
            RequestClass::Navigation => CacheDecision::NetworkFirstRevalidate,
            RequestClass::Asset => CacheDecision::CacheFirstWithNetworkFallback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    PathPrefix(String),
    /// A navigation to one of these exact paths.
    NavigationTo(Vec<String>),
    Navigation,
    Any,
}

impl Matcher {
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            Matcher::PathPrefix(prefix) => request.route().starts_with(prefix.as_str()),
            Matcher::NavigationTo(paths) => {
                is_navigation(request) && paths.iter().any(|path| path == request.route())
            }
            Matcher::Navigation => is_navigation(request),
            Matcher::Any => true,
        }
    }
}

fn is_navigation(request: &Request) -> bool {
    if request.method != Method::GET {
        return false;
    }
    request.mode == RequestMode::Navigate
        || request.destination == Destination::Document
        || request
            .header("accept")
            .is_some_and(|accept| accept.contains("text/html"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub matcher: Matcher,
    pub class: RequestClass,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn standard(endpoints: &Endpoints) -> Self {
        let auth_pages = ["/login", "/login.html", "/register", "/register.html"]
            .into_iter()
            .map(str::to_string)
            .collect();
        Self::new(vec![
            Route {
                matcher: Matcher::PathPrefix(endpoints.api_prefix.clone()),
                class: RequestClass::Api,
            },
            Route {
                matcher: Matcher::NavigationTo(auth_pages),
                class: RequestClass::AuthPage,
            },
            Route {
                matcher: Matcher::Navigation,
                class: RequestClass::Navigation,
            },
            Route {
                matcher: Matcher::Any,
                class: RequestClass::Asset,
            },
        ])
    }

    pub fn classify(&self, request: &Request) -> RequestClass {
        self.routes
            .iter()
            .find(|route| route.matcher.matches(request))
            .map(|route| route.class)
            .unwrap_or(RequestClass::Asset)
    }

    pub fn decide(&self, request: &Request) -> CacheDecision {
        self.classify(request).decision()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::standard(&Endpoints::default())
    }

    #[test]
    fn api_wins_even_for_navigations() {
        let table = table();
        assert_eq!(table.classify(&Request::get("/api/progress")), RequestClass::Api);
        assert_eq!(table.classify(&Request::navigate("/api/progress")), RequestClass::Api);
        assert_eq!(table.decide(&Request::get("/api/csrf-token")), CacheDecision::Bypass);
    }

    #[test]
    fn auth_pages_only_when_navigating() {
        let table = table();
        assert_eq!(table.classify(&Request::navigate("/login?next=/")), RequestClass::AuthPage);
        assert_eq!(table.classify(&Request::navigate("/register")), RequestClass::AuthPage);
        assert_eq!(table.classify(&Request::get("/login")), RequestClass::Asset);
    }

    #[test]
    fn html_accept_header_marks_navigation() {
        let request = Request::get("/week1.html").with_header("Accept", "text/html,*/*");
        assert_eq!(table().decide(&request), CacheDecision::NetworkFirstRevalidate);
    }

    #[test]
    fn everything_else_is_cache_first() {
        let table = table();
        for path in ["/static/app.js", "/static/styles.css", "/img/logo.png"] {
            assert_eq!(
                table.decide(&Request::get(path)),
                CacheDecision::CacheFirstWithNetworkFallback
            );
        }
    }

    #[test]
    fn post_is_never_a_navigation() {
        let mut request = Request::navigate("/index.html");
        request.method = Method::POST;
        assert_eq!(table().classify(&request), RequestClass::Asset);
    }
}
