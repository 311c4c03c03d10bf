//! Translates a logical object request into physical source/destination
//! locations.
//!
//! A route is selected either by the request bucket or by one metadata tag.
//! Its `backend` side names where the object is read from, its `frontend`
//! side where it is written to. Every side names at least one modifier.
//! Modifiers are applied in order; each one replaces the bucket and
//! rewrites the path as `add_prefix + path.strip_prefix(remove_prefix)`.

use crate::config::{ModifierConfig, RouteEndpointConfig, RoutingConfig, RoutingMode};
use crate::error::{BotError, Result};
use crate::types::{ObjectLocation, ObjectRequest};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modifier {
    pub name: String,
    pub bucket: String,
    pub add_prefix: String,
    pub remove_prefix: String,
}

impl Modifier {
    pub fn apply(&self, path: &str) -> (String, String) {
        let stripped = path.strip_prefix(&self.remove_prefix).unwrap_or(path);
        (self.bucket.clone(), format!("{}{}", self.add_prefix, stripped))
    }
}

impl From<&ModifierConfig> for Modifier {
    fn from(config: &ModifierConfig) -> Self {
        Self {
            name: config.name.clone(),
            bucket: config.bucket.clone(),
            add_prefix: config.add_prefix.clone(),
            remove_prefix: config.remove_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct RouteEndpoint {
    source: String,
    modifiers: Vec<Modifier>,
}

#[derive(Debug, Clone)]
struct Route {
    frontend: RouteEndpoint,
    backend: RouteEndpoint,
}

/// Both ends of a transfer after modifier application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTransfer {
    pub source: ObjectLocation,
    pub destination: ObjectLocation,
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    mode: RoutingMode,
    metadata_key: Option<String>,
    routes: HashMap<String, Route>,
}

impl RoutingTable {
    pub fn new(config: &RoutingConfig, modifiers: &[ModifierConfig]) -> Result<Self> {
        let modifiers: HashMap<&str, Modifier> = modifiers
            .iter()
            .map(|m| (m.name.as_str(), Modifier::from(m)))
            .collect();

        let build_endpoint = |key: &str, endpoint: &RouteEndpointConfig| -> Result<RouteEndpoint> {
            if endpoint.modifiers.is_empty() {
                return Err(BotError::Config(format!(
                    "route '{}' has no modifiers for source '{}'",
                    key, endpoint.source
                )));
            }
            let resolved = endpoint
                .modifiers
                .iter()
                .map(|name| {
                    modifiers.get(name.as_str()).cloned().ok_or_else(|| {
                        BotError::Config(format!(
                            "route '{}' references unknown modifier '{}'",
                            key, name
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(RouteEndpoint {
                source: endpoint.source.clone(),
                modifiers: resolved,
            })
        };

        let mut routes = HashMap::with_capacity(config.routes.len());
        for (key, route) in &config.routes {
            routes.insert(
                key.clone(),
                Route {
                    frontend: build_endpoint(key, &route.frontend)?,
                    backend: build_endpoint(key, &route.backend)?,
                },
            );
        }

        Ok(Self {
            mode: config.mode,
            metadata_key: config.metadata_key.clone(),
            routes,
        })
    }

    /// The value a request is routed on, if it carries one.
    fn route_key<'a>(&self, request: &'a ObjectRequest) -> Option<&'a str> {
        match self.mode {
            RoutingMode::Bucket => Some(request.bucket.as_str()),
            RoutingMode::Metadata => self
                .metadata_key
                .as_deref()
                .and_then(|key| request.metadata.get(key))
                .map(String::as_str),
        }
    }

    pub fn resolve(&self, request: &ObjectRequest) -> Result<ResolvedTransfer> {
        let key = self.route_key(request).unwrap_or_default();
        let route = self
            .routes
            .get(key)
            .ok_or_else(|| BotError::NoRoute(format!("'{}' for {}", key, request)))?;

        Ok(ResolvedTransfer {
            source: resolve_endpoint(&route.backend, request)?,
            destination: resolve_endpoint(&route.frontend, request)?,
        })
    }
}

fn resolve_endpoint(endpoint: &RouteEndpoint, request: &ObjectRequest) -> Result<ObjectLocation> {
    let mut bucket = request.bucket.clone();
    let mut path = request.path.clone();
    for modifier in &endpoint.modifiers {
        (bucket, path) = modifier.apply(&path);
    }

    if bucket.is_empty() || path.is_empty() {
        return Err(BotError::Config(format!(
            "empty bucket or path resolving {} on source '{}', check modifiers",
            request, endpoint.source
        )));
    }

    Ok(ObjectLocation {
        source: endpoint.source.clone(),
        bucket,
        path,
    })
}
