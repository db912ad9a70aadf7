//! Request routing: normalized-path lookup with `{param}` patterns,
//! per-route transforms, and dispatch to the registered platform handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use creatorpulse_common::{GatewayError, Platform};
use serde_json::Value;

use crate::limiter::RateLimitInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Put => write!(f, "PUT"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

impl std::str::FromStr for Method {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!("unsupported method: {other}")),
        }
    }
}

/// An inbound scrape request as accepted by the gateway.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub platform: Platform,
    pub endpoint: String,
    pub method: Method,
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub api_key: String,
    pub user_id: Option<String>,
}

/// What a platform handler returns to the router.
#[derive(Debug, Clone)]
pub struct HandlerResponse {
    pub data: Value,
    pub status: u16,
    pub rate_limit: Option<RateLimitInfo>,
    pub cached: bool,
}

/// The response shape the gateway hands back to callers.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub data: Value,
    pub headers: HashMap<String, String>,
    pub status: u16,
    pub rate_limit_info: Option<RateLimitInfo>,
    pub cached: bool,
    pub request_id: String,
}

/// Payload rewrite applied before dispatch (request) or after (response).
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct Route {
    /// Path or pattern; `{name}` segments capture into `req.params`.
    pub path: String,
    pub methods: Vec<Method>,
    pub platform: Platform,
    pub target_endpoint: String,
    pub request_transform: Option<Transform>,
    pub response_transform: Option<Transform>,
}

#[async_trait]
pub trait PlatformHandler: Send + Sync {
    async fn handle(
        &self,
        route: &Route,
        req: &GatewayRequest,
    ) -> Result<HandlerResponse, GatewayError>;
}

/// Lowercase and strip the trailing slash; the root path stays `/`.
pub fn normalize_path(path: &str) -> String {
    let mut p = path.trim().to_lowercase();
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    if p.is_empty() {
        p.push('/');
    }
    p
}

/// Match a `{param}` pattern against a concrete path, returning captured
/// params on success.
fn match_pattern(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_segs: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if pattern_segs.len() != path_segs.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (pat, actual) in pattern_segs.iter().zip(path_segs.iter()) {
        if let Some(name) = pat.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            params.insert(name.to_string(), actual.to_string());
        } else if pat != actual {
            return None;
        }
    }
    Some(params)
}

pub struct Router {
    routes: HashMap<String, Route>,
    handlers: HashMap<Platform, Arc<dyn PlatformHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn add_route(&mut self, route: Route) {
        self.routes.insert(normalize_path(&route.path), route);
    }

    pub fn register_handler(&mut self, platform: Platform, handler: Arc<dyn PlatformHandler>) {
        self.handlers.insert(platform, handler);
    }

    /// Exact match on the normalized path first, then a pattern scan.
    /// Returns the route plus any extracted path params.
    fn find_route(
        &self,
        method: Method,
        path: &str,
    ) -> Result<(&Route, HashMap<String, String>), GatewayError> {
        let normalized = normalize_path(path);

        if let Some(route) = self.routes.get(&normalized) {
            if route.methods.contains(&method) {
                return Ok((route, HashMap::new()));
            }
        }

        for (pattern, route) in &self.routes {
            if !route.methods.contains(&method) {
                continue;
            }
            if let Some(params) = match_pattern(pattern, &normalized) {
                if !params.is_empty() {
                    return Ok((route, params));
                }
            }
        }

        Err(GatewayError::RouteNotFound {
            method: method.to_string(),
            path: path.to_string(),
        })
    }

    /// Route one request: transform, dispatch to the platform handler,
    /// transform the response, assemble headers.
    pub async fn dispatch(
        &self,
        mut req: GatewayRequest,
        request_id: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        let (route, path_params) = self.find_route(req.method, &req.endpoint)?;
        req.params.extend(path_params);

        if let Some(transform) = &route.request_transform {
            req.body = req.body.take().map(|b| transform(b));
        }

        let handler = self
            .handlers
            .get(&route.platform)
            .ok_or_else(|| GatewayError::HandlerNotFound(route.platform.to_string()))?;

        let mut response = handler.handle(route, &req).await?;

        if let Some(transform) = &route.response_transform {
            response.data = transform(response.data);
        }

        let mut headers = HashMap::from([
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-Request-ID".to_string(), request_id.to_string()),
        ]);
        if let Some(info) = response.rate_limit {
            headers.insert("X-RateLimit-Limit".to_string(), info.limit.to_string());
            headers.insert(
                "X-RateLimit-Remaining".to_string(),
                info.remaining.to_string(),
            );
            headers.insert(
                "X-RateLimit-Reset".to_string(),
                info.reset.timestamp().to_string(),
            );
        }

        Ok(GatewayResponse {
            data: response.data,
            headers,
            status: response.status,
            rate_limit_info: response.rate_limit,
            cached: response.cached,
            request_id: request_id.to_string(),
        })
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
