//! Handler dispatch.
//!
//! Mappings from configuration pair a verb mask and a path regex with a
//! handler name. Names resolve through registered factories; handlers that
//! declare themselves reusable are built once and cached.

pub mod static_files;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use crate::config::Config;
use crate::error::HttpError;
use crate::http::request::{Method, MethodMask, Request};

pub use crate::http::writer::ResponseWriter;
pub use static_files::StaticFileHandler;

/// Produces the response for a parsed request.
///
/// Whatever is still buffered when `process` returns goes out with the
/// final flush. Handlers streaming a large body call
/// [`ResponseWriter::flush`] between pieces and stop once
/// [`ResponseWriter::is_client_connected`] turns false.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn process(
        &self,
        request: &mut Request,
        response: &mut ResponseWriter<'_>,
    ) -> Result<(), HttpError>;

    /// Reusable handlers are instantiated once and shared between requests.
    fn is_reusable(&self) -> bool {
        true
    }
}

pub type HandlerFactory = Arc<dyn Fn(&Config) -> Arc<dyn Handler> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct HandlerMapping {
    pub verbs: MethodMask,
    pub path: Regex,
    pub target: String,
}

impl HandlerMapping {
    pub fn matches(&self, method: Method, path: &str) -> bool {
        self.verbs.contains(method) && self.path.is_match(path)
    }
}

pub struct HandlerRegistry {
    config: Arc<Config>,
    mappings: RwLock<Vec<HandlerMapping>>,
    factories: RwLock<HashMap<String, HandlerFactory>>,
    instances: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    /// Registry with the built-in `static` handler and the configured mappings.
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let registry = Self {
            config: config.clone(),
            mappings: RwLock::new(Vec::new()),
            factories: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        };

        registry.register(StaticFileHandler::NAME, |cfg: &Config| {
            Arc::new(StaticFileHandler::new(&cfg.document_root)) as Arc<dyn Handler>
        });

        for mapping in &config.handlers {
            registry
                .map(&mapping.verb, &mapping.path, &mapping.handler)
                .with_context(|| format!("invalid handler path pattern {:?}", mapping.path))?;
        }
        Ok(registry)
    }

    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Config) -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        let name = name.into();
        self.instances.write().remove(&name);
        self.factories.write().insert(name, Arc::new(factory));
    }

    /// Appends a mapping; earlier mappings win.
    pub fn map(&self, verbs: &str, pattern: &str, target: impl Into<String>) -> Result<(), regex::Error> {
        let mapping = HandlerMapping {
            verbs: MethodMask::parse(verbs),
            path: Regex::new(pattern)?,
            target: target.into(),
        };
        self.mappings.write().push(mapping);
        Ok(())
    }

    pub fn mappings(&self) -> Vec<HandlerMapping> {
        self.mappings.read().clone()
    }

    /// Handler for `method` and `path`. `Ok(None)` when no mapping matches;
    /// an error when a mapping names an unregistered handler.
    pub fn resolve(&self, method: Method, path: &str) -> Result<Option<Arc<dyn Handler>>, HttpError> {
        let target = {
            let mappings = self.mappings.read();
            match mappings.iter().find(|m| m.matches(method, path)) {
                Some(mapping) => mapping.target.clone(),
                None => return Ok(None),
            }
        };

        if let Some(handler) = self.instances.read().get(&target) {
            return Ok(Some(handler.clone()));
        }

        let factory = self
            .factories
            .read()
            .get(&target)
            .cloned()
            .ok_or_else(|| HttpError::internal(format!("no handler registered as {target:?}")))?;

        let handler = factory(&self.config);
        if handler.is_reusable() {
            debug!(handler = %target, "Caching reusable handler");
            let mut instances = self.instances.write();
            let cached = instances.entry(target).or_insert(handler);
            return Ok(Some(cached.clone()));
        }
        Ok(Some(handler))
    }
}
